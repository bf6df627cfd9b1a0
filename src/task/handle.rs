//! TaskHandle for awaiting spawned task results.

use crate::cancel::{CancelHandle, CancelSignal};
use crate::types::{CancelReason, PanicPayload, TaskId};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

/// Error returned when joining a spawned task fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinError {
    /// The task went away before producing a result.
    Cancelled(CancelReason),
    /// The task panicked.
    Panicked(PanicPayload),
}

impl std::fmt::Display for JoinError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cancelled(reason) => write!(f, "task was cancelled: {reason}"),
            Self::Panicked(payload) => write!(f, "task panicked: {payload}"),
        }
    }
}

impl std::error::Error for JoinError {}

enum SlotState<T> {
    Running,
    Done(Result<T, JoinError>),
    Taken,
}

struct SlotInner<T> {
    state: SlotState<T>,
    wakers: Vec<Waker>,
}

/// Shared result slot between a spawned task and its handle.
pub(crate) struct JoinSlot<T> {
    inner: Mutex<SlotInner<T>>,
}

impl<T> JoinSlot<T> {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(SlotInner {
                state: SlotState::Running,
                wakers: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SlotInner<T>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Stores the task's result and wakes every waiter. First fill wins.
    pub(crate) fn fill(&self, result: Result<T, JoinError>) {
        let wakers = {
            let mut inner = self.lock();
            if !matches!(inner.state, SlotState::Running) {
                return;
            }
            inner.state = SlotState::Done(result);
            std::mem::take(&mut inner.wakers)
        };
        for waker in wakers {
            waker.wake();
        }
    }

    fn poll_take(&self, cx: &mut Context<'_>) -> Poll<Result<T, JoinError>> {
        let mut inner = self.lock();
        if matches!(inner.state, SlotState::Running) {
            inner.wakers.push(cx.waker().clone());
            return Poll::Pending;
        }
        match std::mem::replace(&mut inner.state, SlotState::Taken) {
            SlotState::Done(result) => Poll::Ready(result),
            SlotState::Running => unreachable!("checked above"),
            SlotState::Taken => unreachable!("join future polled after result was taken"),
        }
    }
}

trait DoneSignal: Send + Sync {
    fn poll_done(&self, cx: &mut Context<'_>) -> Poll<()>;
}

impl<T: Send> DoneSignal for JoinSlot<T> {
    fn poll_done(&self, cx: &mut Context<'_>) -> Poll<()> {
        let mut inner = self.lock();
        match inner.state {
            SlotState::Running => {
                inner.wakers.push(cx.waker().clone());
                Poll::Pending
            }
            SlotState::Done(_) | SlotState::Taken => Poll::Ready(()),
        }
    }
}

/// Guard owned by the task wrapper; guarantees the slot is always filled.
///
/// If the wrapper future is dropped before completing — the executor
/// abandoned it, or the task body panicked — the drop fills the slot so
/// joiners and completion waiters are released rather than suspended
/// forever.
pub(crate) struct FillGuard<T> {
    slot: Arc<JoinSlot<T>>,
    filled: bool,
}

impl<T> FillGuard<T> {
    pub(crate) fn new(slot: Arc<JoinSlot<T>>) -> Self {
        Self {
            slot,
            filled: false,
        }
    }

    pub(crate) fn fill(&mut self, value: T) {
        self.filled = true;
        self.slot.fill(Ok(value));
    }
}

impl<T> Drop for FillGuard<T> {
    fn drop(&mut self) {
        if !self.filled {
            let error = if std::thread::panicking() {
                JoinError::Panicked(PanicPayload::new("task panicked"))
            } else {
                JoinError::Cancelled(CancelReason::abandoned("task dropped before completion"))
            };
            self.slot.fill(Err(error));
        }
    }
}

/// A handle to a spawned task.
///
/// The handle does not own the task — dropping it leaves the task
/// running. It supports requesting cooperative cancellation and awaiting
/// the task's result.
pub struct TaskHandle<T> {
    id: TaskId,
    signal: CancelSignal,
    slot: Arc<JoinSlot<T>>,
}

impl<T> std::fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle").field("id", &self.id).finish()
    }
}

impl<T: Send + 'static> TaskHandle<T> {
    pub(crate) fn new(id: TaskId, signal: CancelSignal, slot: Arc<JoinSlot<T>>) -> Self {
        Self { id, signal, slot }
    }

    /// Returns the task ID of the spawned task.
    #[must_use]
    pub const fn task_id(&self) -> TaskId {
        self.id
    }

    /// Returns true if the task's result is ready.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        !matches!(self.slot.lock().state, SlotState::Running)
    }

    /// Requests cooperative cancellation of the task.
    ///
    /// The task observes this at its next checkpoint or suspension point;
    /// it may still complete with a normal result.
    pub fn cancel(&self) {
        self.signal
            .cancel(CancelReason::user("cancelled via task handle"));
    }

    /// Returns a [`CancelHandle`] that cancels this task when invoked.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        let signal = self.signal.clone();
        CancelHandle::new(move || {
            signal.cancel(CancelReason::user("cancelled via cancel handle"));
        })
    }

    /// Returns a type-erased signal that resolves when the task is done.
    ///
    /// Unlike [`join`](Self::join) this does not consume the handle or
    /// the result; any number of completion signals can wait on one task.
    #[must_use]
    pub fn completion(&self) -> TaskCompletion {
        TaskCompletion {
            signal: Arc::clone(&self.slot) as Arc<dyn DoneSignal>,
        }
    }

    /// Waits for the task to complete and returns its result.
    ///
    /// # Errors
    ///
    /// Returns `Err(JoinError::Cancelled)` if the task was dropped by its
    /// executor before completing, and `Err(JoinError::Panicked)` if the
    /// task body panicked.
    pub fn join(self) -> JoinFuture<T> {
        JoinFuture { slot: self.slot }
    }
}

/// Future returned by [`TaskHandle::join`].
pub struct JoinFuture<T> {
    slot: Arc<JoinSlot<T>>,
}

impl<T> Future for JoinFuture<T> {
    type Output = Result<T, JoinError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.slot.poll_take(cx)
    }
}

/// A type-erased task-done signal.
///
/// Created by [`TaskHandle::completion`]; used by the sequential queue to
/// chain a task onto its predecessor without caring about its result.
#[derive(Clone)]
pub struct TaskCompletion {
    signal: Arc<dyn DoneSignal>,
}

impl std::fmt::Debug for TaskCompletion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskCompletion").finish_non_exhaustive()
    }
}

impl TaskCompletion {
    /// Resolves once the task has completed, was abandoned, or panicked.
    pub async fn wait(&self) {
        std::future::poll_fn(|cx| self.signal.poll_done(cx)).await;
    }
}
