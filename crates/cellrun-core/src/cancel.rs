//! Cooperative cancellation for runs.

use tokio_util::sync::CancellationToken;

/// Handle for cooperative cancellation of a run.
///
/// `AbortHandle` can be cloned and shared across tasks; any clone can trigger
/// the abort, which is visible to all other clones. Runs observe it at each
/// suspension point (process exit, next output chunk, debounce delay) and
/// still perform their cleanup before returning.
///
/// # Example
///
/// ```
/// use cellrun_core::AbortHandle;
///
/// let handle = AbortHandle::new();
/// let clone = handle.clone();
///
/// assert!(!handle.is_aborted());
/// clone.abort();
/// assert!(handle.is_aborted());
/// ```
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    token: CancellationToken,
}

impl AbortHandle {
    /// Create a new abort handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if abort has been requested.
    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Request abort.
    pub fn abort(&self) {
        self.token.cancel();
    }

    /// Resolves once abort has been requested.
    pub async fn aborted(&self) {
        self.token.cancelled().await;
    }
}
