//! The task-factory interface and the host-spawner adapter.

use super::handle::{FillGuard, JoinSlot, TaskHandle};
use crate::cancel::CancelSignal;
use crate::cx::Cx;
use crate::types::{Priority, TaskId};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::debug;

/// An erased, ready-to-run task future.
pub type TaskFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Spawns cooperative tasks, yielding handles that support awaiting the
/// result and requesting cancellation.
///
/// The factory mints each task's [`Cx`]; the spawned body receives it as
/// its argument, and the returned handle cancels through it.
pub trait TaskFactory {
    /// Spawns a task carrying the caller's context.
    ///
    /// A `None` priority lets the host inherit the spawning context's
    /// priority, where the host supports that.
    fn task<T, F, Fut>(&self, priority: Option<Priority>, op: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(Cx) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static;

    /// Spawns a task detached from the caller's context.
    ///
    /// Nothing is inherited: a `None` priority becomes
    /// [`Priority::NORMAL`] instead of the caller's.
    fn detached<T, F, Fut>(&self, priority: Option<Priority>, op: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(Cx) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static;
}

/// Host seam: something that can run an erased task future.
///
/// Implementations hand the future to the host runtime's spawn entry
/// point. This crate creates no threads and runs no scheduler of its own.
pub trait Spawn: Send + Sync {
    /// Schedules `task` to run, with an optional priority hint.
    fn spawn(&self, priority: Option<Priority>, task: TaskFuture);
}

impl<F> Spawn for F
where
    F: Fn(Option<Priority>, TaskFuture) + Send + Sync,
{
    fn spawn(&self, priority: Option<Priority>, task: TaskFuture) {
        self(priority, task);
    }
}

/// Wraps a task body so its result always lands in the join slot, even
/// when the future is dropped or panics.
pub(crate) fn wrap_task<T, Fut>(slot: Arc<JoinSlot<T>>, fut: Fut) -> impl Future<Output = ()>
where
    T: Send + 'static,
    Fut: Future<Output = T>,
{
    async move {
        let mut guard = FillGuard::new(slot);
        let value = fut.await;
        guard.fill(value);
    }
}

/// Builds the per-task plumbing shared by every factory: context, join
/// slot, handle, and the erased wrapper future.
pub(crate) fn mint_task<T, F, Fut>(op: F) -> (TaskHandle<T>, TaskFuture)
where
    T: Send + 'static,
    F: FnOnce(Cx) -> Fut + Send + 'static,
    Fut: Future<Output = T> + Send + 'static,
{
    let id = TaskId::next();
    let signal = CancelSignal::new();
    let slot = Arc::new(JoinSlot::new());
    let cx = Cx::new(id, signal.clone());
    let wrapped = wrap_task(Arc::clone(&slot), op(cx));
    (TaskHandle::new(id, signal, slot), Box::pin(wrapped))
}

/// The production task factory: delegates to a host [`Spawn`] impl.
#[derive(Debug, Clone)]
pub struct SpawnTaskFactory<S> {
    spawner: S,
}

impl<S: Spawn> SpawnTaskFactory<S> {
    /// Creates a factory over a host spawner.
    pub const fn new(spawner: S) -> Self {
        Self { spawner }
    }
}

impl<S: Spawn> TaskFactory for SpawnTaskFactory<S> {
    fn task<T, F, Fut>(&self, priority: Option<Priority>, op: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(Cx) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (handle, future) = mint_task(op);
        debug!(task = %handle.task_id(), ?priority, "spawning task");
        self.spawner.spawn(priority, future);
        handle
    }

    fn detached<T, F, Fut>(&self, priority: Option<Priority>, op: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(Cx) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (handle, future) = mint_task(op);
        let priority = priority.or(Some(Priority::NORMAL));
        debug!(task = %handle.task_id(), ?priority, "spawning detached task");
        self.spawner.spawn(priority, future);
        handle
    }
}
