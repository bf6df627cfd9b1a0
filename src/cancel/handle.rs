//! An idempotent cancel action with a latched flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

type CancelAction = Box<dyn FnOnce() + Send>;

struct HandleInner {
    /// Consumed by the first `cancel` call.
    action: Mutex<Option<CancelAction>>,
    /// Latched once cancelled, even for action-less handles.
    cancelled: AtomicBool,
}

/// A handle naming a cancel operation.
///
/// The wrapped action runs at most once, no matter how many clones exist
/// or how many registries hold the handle. After the first `cancel` the
/// [`is_cancelled`](Self::is_cancelled) flag stays latched.
///
/// # Example
///
/// ```
/// use abridge::cancel::CancelHandle;
///
/// let handle = CancelHandle::new(|| println!("torn down"));
/// assert!(!handle.is_cancelled());
/// handle.cancel();
/// handle.cancel(); // second call is a no-op
/// assert!(handle.is_cancelled());
/// ```
#[derive(Clone, Debug)]
pub struct CancelHandle {
    inner: Arc<HandleInner>,
}

impl std::fmt::Debug for HandleInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleInner")
            .field("cancelled", &self.cancelled.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl CancelHandle {
    /// Creates a handle around a cancel action.
    #[must_use]
    pub fn new(action: impl FnOnce() + Send + 'static) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                action: Mutex::new(Some(Box::new(action))),
                cancelled: AtomicBool::new(false),
            }),
        }
    }

    /// Creates a handle with no action; only the flag is observable.
    #[must_use]
    pub fn flag_only() -> Self {
        Self {
            inner: Arc::new(HandleInner {
                action: Mutex::new(None),
                cancelled: AtomicBool::new(false),
            }),
        }
    }

    /// Runs the cancel action if it has not run yet.
    ///
    /// The action is taken out under the lock and invoked after the lock
    /// is released, so an action that re-enters cancellation machinery
    /// cannot deadlock on this handle.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        let action = {
            let mut slot = match self.inner.action.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            slot.take()
        };
        if let Some(action) = action {
            action();
        }
    }

    /// Returns true once [`cancel`](Self::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }
}
