/// How prominently an indicator is shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicatorKind {
    Modal,
    Toast,
}

/// A user-facing progress or status indicator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIndicator {
    pub id: String,
    pub kind: IndicatorKind,
    pub title: String,
    pub persistent: bool,
}

/// Display-only sink for indicators. Implementations must not block.
pub trait UserIndicatorController: Send + Sync {
    fn submit_indicator(&self, indicator: UserIndicator);
    fn retract_indicator_with_id(&self, id: &str);
}

/// Controller for front-ends that show nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopIndicatorController;

impl UserIndicatorController for NoopIndicatorController {
    fn submit_indicator(&self, _indicator: UserIndicator) {}

    fn retract_indicator_with_id(&self, _id: &str) {}
}

/// Keeps a modal loading indicator on screen until dropped.
pub(crate) struct LoadingGuard<'a> {
    controller: &'a dyn UserIndicatorController,
    id: &'static str,
}

impl<'a> LoadingGuard<'a> {
    pub(crate) fn show(
        controller: &'a dyn UserIndicatorController,
        id: &'static str,
        title: &str,
    ) -> Self {
        controller.submit_indicator(UserIndicator {
            id: id.to_owned(),
            kind: IndicatorKind::Modal,
            title: title.to_owned(),
            persistent: true,
        });
        Self { controller, id }
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.controller.retract_indicator_with_id(self.id);
    }
}
