//! Deterministic task factory for tests.

use super::factory::{mint_task, TaskFactory, TaskFuture};
use super::handle::TaskHandle;
use crate::cx::Cx;
use crate::types::{Priority, TaskId};
use std::collections::VecDeque;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll, Wake, Waker};
use tracing::{debug, trace};

/// A task factory that records every spawned task so a test can drain
/// them deterministically.
///
/// Spawned tasks do not run until [`run_until_idle`] is called. The drain
/// loop dequeues one runnable task, polls it, then re-checks the list, so
/// tasks spawned transitively during the drain are picked up in the same
/// drain. A task that returns `Pending` is parked until its waker fires;
/// wakers re-enqueue parked tasks, including across separate
/// `run_until_idle` calls.
///
/// [`run_until_idle`]: Self::run_until_idle
///
/// # Example
///
/// ```
/// use abridge::task::{TaskFactory, TestTaskFactory};
/// use abridge::test_utils::block_on;
///
/// let factory = TestTaskFactory::new();
/// let handle = factory.task(None, |_cx| async { 2 + 2 });
/// factory.run_until_idle();
/// assert_eq!(block_on(handle.join()).unwrap(), 4);
/// ```
#[derive(Debug, Clone)]
pub struct TestTaskFactory {
    inner: Arc<FactoryInner>,
}

#[derive(Debug)]
struct FactoryInner {
    run_queue: Mutex<VecDeque<Arc<TestTask>>>,
}

impl FactoryInner {
    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Arc<TestTask>>> {
        match self.run_queue.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn push(&self, task: Arc<TestTask>) {
        self.lock().push_back(task);
    }

    fn pop(&self) -> Option<Arc<TestTask>> {
        self.lock().pop_front()
    }
}

struct TestTask {
    id: TaskId,
    /// `None` once the task has completed.
    future: Mutex<Option<TaskFuture>>,
    /// True while the task sits in the run queue; keeps duplicate wakes
    /// from enqueueing it twice.
    queued: AtomicBool,
    factory: Weak<FactoryInner>,
}

impl std::fmt::Debug for TestTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestTask").field("id", &self.id).finish()
    }
}

impl Wake for TestTask {
    fn wake(self: Arc<Self>) {
        if !self.queued.swap(true, Ordering::SeqCst) {
            if let Some(factory) = self.factory.upgrade() {
                trace!(task = %self.id, "test task woken");
                factory.push(self);
            }
        }
    }
}

impl TestTaskFactory {
    /// Creates an empty factory.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(FactoryInner {
                run_queue: Mutex::new(VecDeque::new()),
            }),
        }
    }

    /// Drains the run queue until no task is runnable.
    ///
    /// Each iteration dequeues one task, polls it once, and re-checks the
    /// list, so re-entrant spawns and same-drain wakes are honored. Tasks
    /// still pending when the queue empties stay parked; a later waker
    /// fire re-enqueues them for the next call.
    ///
    /// A panic in a task body is caught here and surfaced to joiners as
    /// [`JoinError::Panicked`](super::JoinError::Panicked); the drain
    /// continues with the remaining tasks.
    pub fn run_until_idle(&self) {
        while let Some(task) = self.inner.pop() {
            task.queued.store(false, Ordering::SeqCst);
            let taken = {
                let mut slot = match task.future.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                slot.take()
            };
            let Some(mut future) = taken else {
                continue;
            };

            let waker = Waker::from(Arc::clone(&task));
            let mut cx = Context::from_waker(&waker);
            match catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx))) {
                Ok(Poll::Ready(())) => {
                    trace!(task = %task.id, "test task completed");
                }
                Ok(Poll::Pending) => {
                    let mut slot = match task.future.lock() {
                        Ok(guard) => guard,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                    *slot = Some(future);
                }
                Err(_) => {
                    // The wrapper's fill guard already reported the panic
                    // to joiners while the future unwound.
                    debug!(task = %task.id, "test task panicked");
                }
            }
        }
    }

    fn spawn<T, F, Fut>(&self, op: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(Cx) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (handle, future) = mint_task(op);
        let task = Arc::new(TestTask {
            id: handle.task_id(),
            future: Mutex::new(Some(future)),
            queued: AtomicBool::new(true),
            factory: Arc::downgrade(&self.inner),
        });
        debug!(task = %handle.task_id(), "test task recorded");
        self.inner.push(task);
        handle
    }
}

impl Default for TestTaskFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskFactory for TestTaskFactory {
    fn task<T, F, Fut>(&self, _priority: Option<Priority>, op: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(Cx) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        self.spawn(op)
    }

    fn detached<T, F, Fut>(&self, _priority: Option<Priority>, op: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(Cx) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        self.spawn(op)
    }
}
