use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

type Cleanup = Box<dyn FnOnce() + Send>;

/// Cancellation handle for one abortable call.
///
/// `abort()` cancels the token and runs the cleanup. The call that owns the
/// controller runs the cleanup when it reaches its terminal state. Whichever
/// comes first wins; the cleanup never runs twice.
pub struct AbortController {
    token: CancellationToken,
    cleanup: Mutex<Option<Cleanup>>,
}

impl Default for AbortController {
    fn default() -> Self {
        Self::new()
    }
}

impl AbortController {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            cleanup: Mutex::new(None),
        }
    }

    pub fn with_cleanup(cleanup: impl FnOnce() + Send + 'static) -> Self {
        Self {
            token: CancellationToken::new(),
            cleanup: Mutex::new(Some(Box::new(cleanup))),
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn abort(&self) {
        self.token.cancel();
        self.finish();
    }

    /// Run the cleanup if it has not run yet.
    pub fn finish(&self) {
        // Take under the lock, call outside it: the cleanup may lock other tables.
        let cleanup = self.cleanup.lock().ok().and_then(|mut slot| slot.take());
        if let Some(cleanup) = cleanup {
            cleanup();
        }
    }
}

/// Ties a controller's cleanup to the lifetime of one call. Dropping the guard
/// on any path (success, failure, cancellation, early return) finishes it.
pub(crate) struct TaskGuard(Option<Arc<AbortController>>);

impl TaskGuard {
    pub(crate) fn new(controller: Option<Arc<AbortController>>) -> Self {
        Self(controller)
    }

    pub(crate) fn token(&self) -> Option<CancellationToken> {
        self.0.as_ref().map(|c| c.token().clone())
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        if let Some(controller) = self.0.take() {
            controller.finish();
        }
    }
}

/// Resolves when the token is cancelled; never resolves without one.
pub(crate) async fn cancelled(token: Option<&CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}
