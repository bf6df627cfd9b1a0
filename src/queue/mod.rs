//! A queue that serializes submitted async operations.
//!
//! [`AsyncQueue`] chains each enqueued operation onto its predecessor's
//! completion: an operation starts only after the previous one's awaited
//! result has resolved, regardless of how the host schedules the spawned
//! tasks. The queue holds a reference to the *last enqueued* task only,
//! swapped under a briefly-held mutex that is never held across an await.

use crate::cx::Cx;
use crate::task::{JoinError, TaskCompletion, TaskFactory, TaskHandle};
use std::future::Future;
use std::sync::Mutex;
use tracing::debug;

/// Serializes async operations by chaining awaits through a task factory.
///
/// # Example
///
/// ```
/// use abridge::queue::AsyncQueue;
/// use abridge::task::TestTaskFactory;
/// use abridge::test_utils::block_on;
///
/// let factory = TestTaskFactory::new();
/// let queue = AsyncQueue::new(factory.clone());
/// let first = queue.enqueue(|_cx| async { 1 });
/// let second = queue.enqueue(|_cx| async { 2 });
/// factory.run_until_idle();
/// assert_eq!(block_on(first.join()).unwrap(), 1);
/// assert_eq!(block_on(second.join()).unwrap(), 2);
/// ```
#[derive(Debug)]
pub struct AsyncQueue<F> {
    factory: F,
    last: Mutex<Option<TaskCompletion>>,
}

impl<F: TaskFactory> AsyncQueue<F> {
    /// Creates an empty queue spawning through `factory`.
    pub const fn new(factory: F) -> Self {
        Self {
            factory,
            last: Mutex::new(None),
        }
    }

    /// Enqueues `op` behind every previously enqueued operation.
    ///
    /// The returned handle completes once `op` has run; callers that do
    /// not await it still get the ordering guarantee. Cancellation of the
    /// *caller's* task is not forwarded — use [`perform`](Self::perform)
    /// for that.
    pub fn enqueue<T, Op, Fut>(&self, op: Op) -> TaskHandle<T>
    where
        T: Send + 'static,
        Op: FnOnce(Cx) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let mut last = match self.last.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let predecessor = last.take();
        let handle = self.factory.task(None, move |cx| async move {
            if let Some(previous) = predecessor {
                previous.wait().await;
            }
            op(cx).await
        });
        debug!(task = %handle.task_id(), "operation enqueued");
        *last = Some(handle.completion());
        handle
    }

    /// Enqueues `op` and awaits it, forwarding caller cancellation.
    ///
    /// If the calling task is cancelled while waiting, the enqueued task
    /// is cancelled cooperatively; the queue's ordering is unaffected.
    ///
    /// # Errors
    ///
    /// Returns the spawned task's [`JoinError`] if it was abandoned by
    /// its executor or panicked.
    pub async fn perform<T, Op, Fut>(&self, cx: &Cx, op: Op) -> Result<T, JoinError>
    where
        T: Send + 'static,
        Op: FnOnce(Cx) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let handle = self.enqueue(op);
        let _hook = cx.on_cancel(handle.cancel_handle());
        handle.join().await
    }
}
