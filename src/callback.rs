use std::fmt;
use std::sync::Arc;

use appsearch_core_types::{AppSearchError, AppSearchResult};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::warn;

type Responder<T> = Box<dyn FnOnce(AppSearchResult<T>) + Send + 'static>;

struct Slot<T> {
    responder: Mutex<Option<Responder<T>>>,
}

impl<T> Drop for Slot<T> {
    fn drop(&mut self) {
        if let Some(responder) = self.responder.get_mut().take() {
            warn!("result callback dropped unanswered");
            responder(Err(AppSearchError::internal(
                "call finished without producing a result",
            )));
        }
    }
}

/// Answers one call exactly once.
///
/// Clones share the same responder: the first [`ResultCallback::send`] wins
/// and later sends are ignored. When the last clone goes away without an
/// answer, the caller receives an internal error instead of waiting forever.
pub struct ResultCallback<T> {
    slot: Arc<Slot<T>>,
}

impl<T> Clone for ResultCallback<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> fmt::Debug for ResultCallback<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultCallback")
            .field("answered", &self.is_answered())
            .finish()
    }
}

impl<T: Send + 'static> ResultCallback<T> {
    pub fn new<F>(responder: F) -> Self
    where
        F: FnOnce(AppSearchResult<T>) + Send + 'static,
    {
        Self {
            slot: Arc::new(Slot {
                responder: Mutex::new(Some(Box::new(responder))),
            }),
        }
    }

    /// Callback paired with a receiver, for async hosts and tests.
    pub fn channel() -> (Self, oneshot::Receiver<AppSearchResult<T>>) {
        let (tx, rx) = oneshot::channel();
        let callback = Self::new(move |result| {
            let _ = tx.send(result);
        });
        (callback, rx)
    }
}

impl<T> ResultCallback<T> {
    /// Delivers `result`. Returns `false` when the call was already answered.
    pub fn send(&self, result: AppSearchResult<T>) -> bool {
        let responder = self.slot.responder.lock().take();
        match responder {
            Some(responder) => {
                responder(result);
                true
            }
            None => false,
        }
    }

    pub fn is_answered(&self) -> bool {
        self.slot.responder.lock().is_none()
    }
}
