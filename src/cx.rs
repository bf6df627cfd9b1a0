//! The capability context type.
//!
//! `Cx` is the token a task carries through the bridging primitives. It
//! grants access to:
//!
//! - Identity (the task ID, for logging)
//! - Cancellation (observing it, and hooking work onto it)
//!
//! Every suspending operation in this crate takes `&Cx`; cancellation of
//! the surrounding task is observed either eagerly via
//! [`checkpoint`](Cx::checkpoint) or reactively via
//! [`on_cancel`](Cx::on_cancel) hooks.
//!
//! `Cx` is cheaply clonable and clones share the same cancellation state.
//! Semantically a `Cx` belongs to one task; the factory that spawned the
//! task mints it and hands it to the task body.

use crate::cancel::{CancelHandle, CancelSignal, HookGuard};
use crate::error::{Error, Result};
use crate::types::{CancelReason, TaskId};
use tracing::trace;

/// The capability context for a task.
#[derive(Debug, Clone)]
pub struct Cx {
    task: TaskId,
    signal: CancelSignal,
}

impl Cx {
    /// Creates a context bound to an existing cancellation signal.
    ///
    /// Task factories use this to tie a spawned task's context to the
    /// signal its [`TaskHandle`](crate::task::TaskHandle) cancels.
    #[must_use]
    pub fn new(task: TaskId, signal: CancelSignal) -> Self {
        Self { task, signal }
    }

    /// Creates a standalone context for tests.
    ///
    /// The context has a fresh task ID and its own signal, so tests can
    /// drive cancellation directly via [`cancel`](Self::cancel).
    #[must_use]
    pub fn for_testing() -> Self {
        Self::new(TaskId::next(), CancelSignal::new())
    }

    /// Returns the ID of the task this context belongs to.
    #[must_use]
    pub const fn task_id(&self) -> TaskId {
        self.task
    }

    /// Returns true if cancellation of the surrounding task was requested.
    #[must_use]
    pub fn is_cancel_requested(&self) -> bool {
        self.signal.is_cancelled()
    }

    /// Returns the latched cancellation reason, if any.
    #[must_use]
    pub fn cancel_reason(&self) -> Option<CancelReason> {
        self.signal.reason()
    }

    /// A cancellation checkpoint.
    ///
    /// Returns `Err(Cancelled)` once cancellation has been requested, so
    /// progressing code can observe it with `?`.
    pub fn checkpoint(&self) -> Result<()> {
        match self.signal.reason() {
            Some(reason) => Err(Error::cancelled(&reason)),
            None => Ok(()),
        }
    }

    /// Requests cancellation of this context's task.
    pub fn cancel(&self, reason: CancelReason) {
        self.signal.cancel(reason);
    }

    /// Subscribes a hook to this task's cancellation.
    ///
    /// If the task is already cancelled the hook fires immediately and
    /// the returned guard is inert. The guard deregisters on drop.
    pub fn on_cancel(&self, hook: CancelHandle) -> HookGuard {
        self.signal.subscribe(hook)
    }

    /// Emits a trace-level breadcrumb attributed to this task.
    pub fn trace(&self, message: &str) {
        trace!(task = %self.task, "{message}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn checkpoint_passes_until_cancelled() {
        let cx = Cx::for_testing();
        assert!(cx.checkpoint().is_ok());
        cx.cancel(CancelReason::user("stop"));
        let err = cx.checkpoint().expect_err("checkpoint after cancel");
        assert!(err.is_cancelled());
    }

    #[test]
    fn clones_share_cancellation() {
        let cx = Cx::for_testing();
        let clone = cx.clone();
        clone.cancel(CancelReason::user("shared"));
        assert!(cx.is_cancel_requested());
        assert_eq!(cx.task_id(), clone.task_id());
    }

    #[test]
    fn on_cancel_hook_fires() {
        let cx = Cx::for_testing();
        let count = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&count);
        let _guard = cx.on_cancel(CancelHandle::new(move || {
            counted.fetch_add(1, Ordering::SeqCst);
        }));
        cx.cancel(CancelReason::user("fire"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancel_reason_is_observable() {
        let cx = Cx::for_testing();
        assert!(cx.cancel_reason().is_none());
        cx.cancel(CancelReason::user("observed"));
        assert_eq!(
            cx.cancel_reason().expect("reason").message,
            Some("observed")
        );
    }
}
