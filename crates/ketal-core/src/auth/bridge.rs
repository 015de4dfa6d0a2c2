use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

/// Single-resolution slot bridging a callback-based API into an awaitable result.
///
/// The first [`ResultSlot::resolve`] delivers the value; later calls are
/// ignored and report `false`.
#[derive(Debug)]
pub struct ResultSlot<T> {
    sender: Mutex<Option<oneshot::Sender<T>>>,
}

impl<T> ResultSlot<T> {
    /// Create a slot together with the receiver awaiting its value.
    pub fn channel() -> (Arc<Self>, oneshot::Receiver<T>) {
        let (tx, rx) = oneshot::channel();
        let slot = Arc::new(Self {
            sender: Mutex::new(Some(tx)),
        });
        (slot, rx)
    }

    pub fn resolve(&self, value: T) -> bool {
        match self.sender.lock().take() {
            Some(sender) => {
                // Receiver may be gone if the awaiting task was dropped.
                let _ = sender.send(value);
                true
            }
            None => {
                tracing::warn!("ignoring duplicate resolution of a one-shot result");
                false
            }
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.sender.lock().is_none()
    }
}
