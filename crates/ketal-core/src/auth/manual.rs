use std::env;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use url::Url;

use super::{
    AuthError, BrowserSession, BrowserSessionProvider, BrowserSessionRequest, CallbackPattern,
    CompletionHandler, SessionError, SessionErrorCode,
};

type ReadInput = Arc<dyn Fn() -> BoxFuture<'static, Result<String, AuthError>> + Send + Sync>;
type Notify = Arc<dyn Fn(&Url) + Send + Sync>;

/// Browser-session provider for terminals.
///
/// Shows the target URL (optionally opening the system browser) and waits for
/// the user to paste the URL the browser was redirected to.
#[derive(Clone)]
pub struct ManualBrowserProvider {
    open_browser: bool,
    notify: Notify,
    read_input: ReadInput,
}

impl ManualBrowserProvider {
    pub fn new<N, I, Fut>(open_browser: bool, notify: N, read_input: I) -> Self
    where
        N: Fn(&Url) + Send + Sync + 'static,
        I: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, AuthError>> + Send + 'static,
    {
        Self {
            open_browser,
            notify: Arc::new(notify),
            read_input: Arc::new(move || Box::pin(read_input())),
        }
    }

    /// Whether a system browser can plausibly be launched from this environment.
    pub fn browser_available() -> bool {
        if env::var_os("KETAL_NO_BROWSER").is_some() {
            return false;
        }

        if env::var_os("SSH_CONNECTION").is_some() && env::var_os("DISPLAY").is_none() {
            return false;
        }

        if env::var_os("DISPLAY").is_some() || env::var_os("WAYLAND_DISPLAY").is_some() {
            return true;
        }

        cfg!(target_os = "windows") || cfg!(target_os = "macos")
    }
}

impl BrowserSessionProvider for ManualBrowserProvider {
    fn open(
        &self,
        request: BrowserSessionRequest,
        completion: CompletionHandler,
    ) -> Arc<dyn BrowserSession> {
        Arc::new(ManualSession {
            request,
            provider: self.clone(),
            completion: Mutex::new(Some(completion)),
            cancel: Mutex::new(None),
        })
    }
}

struct ManualSession {
    request: BrowserSessionRequest,
    provider: ManualBrowserProvider,
    completion: Mutex<Option<CompletionHandler>>,
    cancel: Mutex<Option<oneshot::Sender<()>>>,
}

impl BrowserSession for ManualSession {
    fn start(&self) -> bool {
        let Ok(runtime) = Handle::try_current() else {
            warn!("manual browser session started outside a tokio runtime");
            return false;
        };
        let Some(completion) = self.completion.lock().take() else {
            warn!("manual browser session already started");
            return false;
        };

        // A system browser cannot be handed extra headers or a private cookie jar.
        debug!(
            url = %self.request.url,
            ephemeral = self.request.ephemeral,
            headers = self.request.headers.len(),
            "starting manual browser session"
        );
        (self.provider.notify)(&self.request.url);
        if self.provider.open_browser {
            if let Err(err) = open::that(self.request.url.as_str()) {
                warn!(error = %err, "failed to launch system browser");
            }
        }

        let (cancel_tx, cancel_rx) = oneshot::channel();
        *self.cancel.lock() = Some(cancel_tx);
        let input = (self.provider.read_input)();
        let pattern = self.request.callback.clone();
        runtime.spawn(async move {
            let (callback_url, error) = tokio::select! {
                _ = cancel_rx => (None, Some(SessionError::canceled_login())),
                input = input => interpret_input(&pattern, input),
            };
            completion(callback_url, error);
        });
        true
    }

    fn cancel(&self) {
        if let Some(cancel) = self.cancel.lock().take() {
            let _ = cancel.send(());
        }
    }
}

fn interpret_input(
    pattern: &CallbackPattern,
    input: Result<String, AuthError>,
) -> (Option<Url>, Option<SessionError>) {
    let raw = match input {
        Ok(raw) => raw,
        Err(err) => {
            return (
                None,
                Some(SessionError::new(SessionErrorCode::Other(0), Some(err.to_string()))),
            )
        }
    };

    let raw = raw.trim();
    if raw.is_empty() {
        return (None, Some(SessionError::canceled_login()));
    }

    match Url::parse(raw) {
        Ok(url) if pattern.matches(&url) => (Some(url), None),
        Ok(url) => (
            None,
            Some(SessionError::new(
                SessionErrorCode::Other(0),
                Some(format!("{url} does not match the expected redirect")),
            )),
        ),
        Err(err) => (
            None,
            Some(SessionError::new(
                SessionErrorCode::Other(0),
                Some(format!("invalid callback URL: {err}")),
            )),
        ),
    }
}
