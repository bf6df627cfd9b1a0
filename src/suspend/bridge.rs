//! The cancellable continuation bridge.
//!
//! [`await_cancellable`] adapts a callback-plus-cancel API to a suspending
//! call. Exactly one of two outcomes is observed, arbitrated by a
//! [`CancellableRegistry`]:
//!
//! - the callback completes and the suspension resumes with its result, or
//! - the surrounding task is cancelled, the callback-side cancel handle is
//!   invoked, and the suspension resumes with a cancellation error.
//!
//! ```text
//!   caller ── await_cancellable(body) ──► registry R (Active)
//!      │                                     │
//!      │   body(completer) ── returns ──► composite handle added to R
//!      │                                     │
//!      ├─ callback: completer.complete ──► R.deactivate wins ─► resume Ok
//!      └─ task cancel: R.cancel ─────────► composite wins ────► cancel
//!                                          user handle, resume Err
//! ```

use crate::cancel::{CancelHandle, CancellableRegistry, RegistryState};
use crate::cx::Cx;
use crate::error::{Error, Result};
use crate::suspend::continuation;
use crate::types::CancelReason;
use std::sync::Arc;

/// One-shot completion callback handed to the body of
/// [`await_cancellable`].
///
/// Calling [`complete`](Self::complete) resumes the suspended caller,
/// unless cancellation already won the race, in which case the result is
/// discarded. The completer may be moved to another thread and invoked
/// asynchronously.
#[derive(Debug)]
pub struct Completer<T> {
    continuation: continuation::Continuation<T>,
    registry: Arc<CancellableRegistry>,
}

impl<T> Completer<T> {
    /// Completes the bridged operation with `result`.
    ///
    /// Claims victory over cancellation by deactivating the registry; if
    /// the claim fails (cancellation already won) the result is dropped.
    pub fn complete(self, result: Result<T>) {
        if self.registry.deactivate() {
            self.continuation.resume(result);
        }
    }
}

/// Suspends the caller, runs `body`, and resumes with the result the body
/// eventually supplies, or fails with a cancellation error if the
/// caller's task is cancelled first.
///
/// `body` runs synchronously on the calling task. It receives a
/// [`Completer`] that must be invoked at most once (possibly later, from
/// any thread), and may return a [`CancelHandle`] that will be invoked if
/// — and only if — cancellation wins before the callback completes.
///
/// If the task is already cancelled when this is called, `body` never
/// runs and the call fails immediately.
///
/// # Errors
///
/// Returns `Err` with [`ErrorKind::Cancelled`](crate::error::ErrorKind)
/// when the surrounding task is cancelled before the callback completes;
/// otherwise propagates whatever result the callback supplied.
///
/// # Example
///
/// ```
/// use abridge::cx::Cx;
/// use abridge::suspend::await_cancellable;
/// use abridge::test_utils::block_on;
///
/// let cx = Cx::for_testing();
/// let value = block_on(await_cancellable(&cx, |completer| {
///     completer.complete(Ok(21 * 2));
///     None
/// }));
/// assert_eq!(value.unwrap(), 42);
/// ```
pub async fn await_cancellable<T, F>(cx: &Cx, body: F) -> Result<T>
where
    F: FnOnce(Completer<T>) -> Option<CancelHandle>,
    T: Send + 'static,
{
    let registry = Arc::new(CancellableRegistry::new());

    // Drive the registry from task cancellation. If the task is already
    // cancelled the hook fires inside `on_cancel`, which the state probe
    // below observes.
    let hook_registry = Arc::clone(&registry);
    let _hook = cx.on_cancel(CancelHandle::new(move || hook_registry.cancel()));
    if registry.state() == RegistryState::Cancelled {
        cx.trace("await_cancellable: task already cancelled");
        return Err(cancellation_error(cx));
    }

    let (resume, suspended) = continuation::continuation::<T>();
    let completer = Completer {
        continuation: resume.clone(),
        registry: Arc::clone(&registry),
    };
    let user_handle = body(completer);

    // The composite propagates cancel to the body's handle, then resumes
    // the caller with a cancellation error. Added in `Cancelled` it is
    // invoked on the spot by the registry.
    let composite_cx = cx.clone();
    let composite = CancelHandle::new(move || {
        if let Some(handle) = user_handle {
            handle.cancel();
        }
        resume.resume(Err(cancellation_error(&composite_cx)));
    });
    registry.add(composite);

    suspended.await
}

fn cancellation_error(cx: &Cx) -> Error {
    let reason = cx
        .cancel_reason()
        .unwrap_or(CancelReason::user("task cancelled"));
    Error::cancelled(&reason)
}
