//! A multi-subscriber broadcasting sink with rendezvous semantics.
//!
//! [`AsyncChannel`] synchronizes one suspending producer with N
//! demand-driven subscribers:
//!
//! - [`send`](AsyncChannel::send) suspends until every current subscriber
//!   has positive demand, delivers the value to each, and resumes only
//!   once every subscriber has demand for the *next* value.
//! - [`send_completion`](AsyncChannel::send_completion) is synchronous
//!   and terminal; a subscriber attaching afterwards receives the
//!   terminal completion immediately.
//!
//! There is no buffering, fan-in, or replay: the channel is strictly
//! rendezvous-style, and overlapping sends are a programmer error
//! surfaced as [`ErrorKind::ConcurrentAccess`](crate::error::ErrorKind).
//!
//! ```text
//!                 ┌── check_demand ──┐
//!   idle ─ send ─► pending ──────────► sending ── send_finished ─► idle
//!                     │                  │ (no demand for next)      ▲
//!                     │                  └──► awaiting_demand ───────┘
//!                     └──────────── producer cancel ──► cancelled
//! ```

mod machine;
mod subscription;

use self::machine::{ChannelState, Event, ProducerState};
use self::subscription::ChannelSubscription;
use crate::cancel::CancelHandle;
use crate::cx::Cx;
use crate::error::{Error, ErrorKind, Result};
use crate::publisher::{Completion, Publisher, Subscriber};
use crate::suspend::continuation;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// A rendezvous broadcast channel from one producer to N subscribers.
///
/// Clones share the same channel. The producer side is single-flight:
/// overlapping `send`s fail rather than queue.
///
/// # Example
///
/// ```
/// use abridge::channel::AsyncChannel;
/// use abridge::cx::Cx;
/// use abridge::publisher::{Completion, Demand, Publisher};
/// use abridge::test_utils::{block_on, RecordingSubscriber};
/// use std::convert::Infallible;
/// use std::sync::Arc;
///
/// let cx = Cx::for_testing();
/// let channel = AsyncChannel::<u32, Infallible>::new();
/// let sub = Arc::new(RecordingSubscriber::with_initial_demand(Demand::unlimited()));
/// channel.subscribe(Box::new(Arc::clone(&sub)));
///
/// block_on(channel.send(&cx, 7)).unwrap();
/// channel.send_completion(Completion::Finished).unwrap();
/// assert_eq!(sub.values(), vec![7]);
/// ```
pub struct AsyncChannel<T, E> {
    core: Arc<ChannelCore<T, E>>,
}

impl<T, E> Clone for AsyncChannel<T, E> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T, E> std::fmt::Debug for AsyncChannel<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncChannel").finish_non_exhaustive()
    }
}

impl<T, E> AsyncChannel<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Creates an empty channel with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            core: Arc::new(ChannelCore {
                state: Mutex::new(ChannelState::new()),
                next_subscriber: AtomicU64::new(0),
            }),
        }
    }

    /// Sends `value` to every current subscriber.
    ///
    /// Suspends until each subscriber has positive demand, delivers, then
    /// suspends again until each has demand for the next value.
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::ConcurrentAccess`] if another `send` is outstanding
    /// - [`ErrorKind::OutputToFinished`] after `send_completion`
    /// - [`ErrorKind::Cancelled`] if the producer's task is cancelled or
    ///   the channel was cancelled earlier
    pub async fn send(&self, cx: &Cx, value: T) -> Result<()> {
        let hook_core = Arc::clone(&self.core);
        let _hook = cx.on_cancel(CancelHandle::new(move || {
            hook_core.feed(Event::ProducerCancelled);
        }));

        let (waiter, suspended) = continuation::<()>();
        self.core.feed(Event::Send { value, waiter });
        suspended.await
    }

    /// Terminates the channel with `completion`, synchronously.
    ///
    /// Every live subscriber receives the completion; subscribers
    /// attaching later receive it on attachment.
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::ConcurrentAccess`] while a `send` is outstanding
    /// - [`ErrorKind::OutputToFinished`] if already terminated
    pub fn send_completion(&self, completion: Completion<E>) -> Result<()> {
        let targets = {
            let mut state = self.core.lock();
            match state.producer {
                ProducerState::Pending { .. }
                | ProducerState::Sending { .. }
                | ProducerState::AwaitingDemand { .. } => {
                    return Err(Error::new(ErrorKind::ConcurrentAccess)
                        .with_context("completion while a send is outstanding"));
                }
                ProducerState::Finished | ProducerState::Cancelled => {
                    return Err(Error::new(ErrorKind::OutputToFinished)
                        .with_context("completion after terminal completion"));
                }
                ProducerState::Idle => {}
            }
            state.producer = ProducerState::Finished;
            state.terminal = Some(completion.clone());
            std::mem::take(&mut state.subscribers)
        };
        debug!(subscribers = targets.len(), "channel finished");
        for target in targets {
            target.finish(completion.clone());
        }
        Ok(())
    }
}

impl<T, E> Default for AsyncChannel<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> Publisher for AsyncChannel<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    type Output = T;
    type Failure = E;

    fn subscribe(&self, subscriber: Box<dyn Subscriber<Input = T, Failure = E>>) {
        ChannelCore::attach(&self.core, subscriber);
    }
}

/// Shared channel state plus the action pump.
pub(crate) struct ChannelCore<T, E> {
    state: Mutex<ChannelState<T, E>>,
    next_subscriber: AtomicU64,
}

impl<T, E> ChannelCore<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn lock(&self) -> std::sync::MutexGuard<'_, ChannelState<T, E>> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Processes one event and executes the resulting actions outside the
    /// lock, feeding follow-up events until the queue drains.
    fn feed(&self, event: Event<T>) {
        let mut queue: VecDeque<machine::Action<T, E>> =
            VecDeque::from(self.lock().process(event));
        while let Some(action) = queue.pop_front() {
            match action {
                machine::Action::Resume(waiter) => {
                    waiter.resume(Ok(()));
                }
                machine::Action::Fail(waiter, error) => {
                    waiter.resume(Err(error));
                }
                machine::Action::Deliver { value, targets } => {
                    for target in &targets {
                        target.deliver(value.clone());
                    }
                    queue.extend(self.lock().process(Event::SendFinished));
                }
                machine::Action::Finish {
                    completion,
                    targets,
                } => {
                    for target in targets {
                        target.finish(completion.clone());
                    }
                }
            }
        }
    }

    /// Attaches a subscriber; a terminated channel replays its terminal
    /// completion immediately after handing over the subscription.
    fn attach(this: &Arc<Self>, subscriber: Box<dyn Subscriber<Input = T, Failure = E>>) {
        let id = this.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let subscription = Arc::new(ChannelSubscription::new(
            id,
            Arc::downgrade(this),
            subscriber,
        ));
        let replay = {
            let mut state = this.lock();
            if let Some(completion) = state.terminal.clone() {
                Some(completion)
            } else {
                state.subscribers.push(Arc::clone(&subscription));
                None
            }
        };
        debug!(subscriber = id, late = replay.is_some(), "channel subscriber attached");
        ChannelSubscription::activate(&subscription);
        if let Some(completion) = replay {
            subscription.finish(completion);
        }
    }

    /// A subscriber's demand changed.
    pub(super) fn on_request(&self) {
        self.feed(Event::CheckDemand);
    }

    /// A subscriber cancelled; it leaves the live set, which can make the
    /// rendezvous predicate true for the remaining set.
    pub(super) fn on_subscriber_cancelled(&self, id: u64) {
        self.lock().subscribers.retain(|s| s.id() != id);
        self.feed(Event::CheckDemand);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::Demand;
    use crate::task::{TaskFactory, TestTaskFactory};
    use crate::test_utils::{block_on, init_test_logging, RecordingSubscriber};
    use std::convert::Infallible;

    type TestChannel = AsyncChannel<u32, Infallible>;

    fn unlimited_subscriber(channel: &TestChannel) -> Arc<RecordingSubscriber<u32, Infallible>> {
        let sub = Arc::new(RecordingSubscriber::with_initial_demand(
            Demand::unlimited(),
        ));
        channel.subscribe(Box::new(Arc::clone(&sub)));
        sub
    }

    #[test]
    fn broadcasts_to_every_subscriber_in_order() {
        init_test_logging();
        let factory = TestTaskFactory::new();
        let channel = TestChannel::new();
        let a = unlimited_subscriber(&channel);
        let b = unlimited_subscriber(&channel);

        let producer = channel.clone();
        let handle = factory.task(None, move |cx| async move {
            for value in 0..3 {
                producer.send(&cx, value).await?;
            }
            producer.send_completion(Completion::Finished)
        });
        factory.run_until_idle();

        block_on(handle.join())
            .expect("producer task")
            .expect("sends succeed");
        assert_eq!(a.values(), vec![0, 1, 2]);
        assert_eq!(b.values(), vec![0, 1, 2]);
        assert_eq!(a.completion(), Some(Completion::Finished));
        assert_eq!(b.completion(), Some(Completion::Finished));
    }

    #[test]
    fn concurrent_send_fails_and_first_send_still_delivers() {
        init_test_logging();
        let factory = TestTaskFactory::new();
        let channel = TestChannel::new();
        let a = Arc::new(RecordingSubscriber::<u32, Infallible>::with_initial_demand(
            Demand::none(),
        ));
        channel.subscribe(Box::new(Arc::clone(&a)));

        let first_channel = channel.clone();
        let first = factory.task(None, move |cx| async move {
            first_channel.send(&cx, 0).await
        });
        factory.run_until_idle();
        assert!(!first.is_finished(), "no demand yet, send pends");

        let second_channel = channel.clone();
        let second = factory.task(None, move |cx| async move {
            second_channel.send(&cx, 1).await
        });
        factory.run_until_idle();
        let err = block_on(second.join())
            .expect("second task finishes")
            .expect_err("overlapping send");
        assert!(err.is_concurrent_access());

        a.request(Demand::unlimited());
        factory.run_until_idle();
        block_on(first.join())
            .expect("first task finishes")
            .expect("first send completes");
        assert_eq!(a.values(), vec![0]);
    }

    #[test]
    fn send_waits_for_demand_for_the_next_value() {
        init_test_logging();
        let factory = TestTaskFactory::new();
        let channel = TestChannel::new();
        let a = Arc::new(RecordingSubscriber::<u32, Infallible>::with_initial_demand(
            Demand::max(1),
        ));
        channel.subscribe(Box::new(Arc::clone(&a)));

        let producer = channel.clone();
        let handle = factory.task(None, move |cx| async move {
            producer.send(&cx, 7).await
        });
        factory.run_until_idle();

        assert_eq!(a.values(), vec![7], "value delivered");
        assert!(
            !handle.is_finished(),
            "send holds until demand for the next value exists"
        );

        a.request(Demand::max(1));
        factory.run_until_idle();
        block_on(handle.join())
            .expect("producer task")
            .expect("send resumes");
    }

    #[test]
    fn termination_absorbs_later_output() {
        init_test_logging();
        let cx = Cx::for_testing();
        let channel = TestChannel::new();
        let a = unlimited_subscriber(&channel);

        channel
            .send_completion(Completion::Finished)
            .expect("first completion");
        assert_eq!(a.completion(), Some(Completion::Finished));

        let err = block_on(channel.send(&cx, 3)).expect_err("send after finish");
        assert!(err.is_output_to_finished());
        let err = channel
            .send_completion(Completion::Finished)
            .expect_err("second completion");
        assert!(err.is_output_to_finished());
    }

    #[test]
    fn late_subscriber_receives_terminal_completion() {
        init_test_logging();
        let channel = TestChannel::new();
        channel
            .send_completion(Completion::Finished)
            .expect("completion");

        let late = unlimited_subscriber(&channel);
        assert_eq!(late.completion(), Some(Completion::Finished));
        assert!(late.values().is_empty());
    }

    #[test]
    fn producer_cancellation_finishes_subscribers_and_fails_send() {
        init_test_logging();
        let factory = TestTaskFactory::new();
        let channel = TestChannel::new();
        let a = Arc::new(RecordingSubscriber::<u32, Infallible>::with_initial_demand(
            Demand::none(),
        ));
        channel.subscribe(Box::new(Arc::clone(&a)));

        let producer = channel.clone();
        let handle = factory.task(None, move |cx| async move {
            producer.send(&cx, 0).await
        });
        factory.run_until_idle();
        assert!(!handle.is_finished());

        handle.cancel();
        factory.run_until_idle();
        let err = block_on(handle.join())
            .expect("task finishes")
            .expect_err("send fails with cancellation");
        assert!(err.is_cancelled());
        assert_eq!(
            a.completion(),
            Some(Completion::Finished),
            "live subscribers are finished on producer cancel"
        );

        // The channel is terminally cancelled now.
        let cx = Cx::for_testing();
        let err = block_on(channel.send(&cx, 9)).expect_err("send on cancelled channel");
        assert!(err.is_cancelled());
    }

    #[test]
    fn subscriber_cancel_unblocks_the_rendezvous() {
        init_test_logging();
        let factory = TestTaskFactory::new();
        let channel = TestChannel::new();
        let ready = unlimited_subscriber(&channel);
        let stubborn = Arc::new(RecordingSubscriber::<u32, Infallible>::with_initial_demand(
            Demand::none(),
        ));
        channel.subscribe(Box::new(Arc::clone(&stubborn)));

        let producer = channel.clone();
        let handle = factory.task(None, move |cx| async move {
            producer.send(&cx, 4).await
        });
        factory.run_until_idle();
        assert!(!handle.is_finished(), "stubborn subscriber blocks the send");

        stubborn.cancel();
        factory.run_until_idle();
        block_on(handle.join())
            .expect("task finishes")
            .expect("send proceeds with the remaining set");
        assert_eq!(ready.values(), vec![4]);
        assert!(stubborn.values().is_empty());
    }

    #[test]
    fn subscriber_attaching_while_pending_joins_the_snapshot() {
        init_test_logging();
        let factory = TestTaskFactory::new();
        let channel = TestChannel::new();
        let a = Arc::new(RecordingSubscriber::<u32, Infallible>::with_initial_demand(
            Demand::none(),
        ));
        channel.subscribe(Box::new(Arc::clone(&a)));

        let producer = channel.clone();
        let handle = factory.task(None, move |cx| async move {
            producer.send(&cx, 1).await
        });
        factory.run_until_idle();

        // Attach while the first send is still pending.
        let late = Arc::new(RecordingSubscriber::<u32, Infallible>::with_initial_demand(
            Demand::unlimited(),
        ));
        channel.subscribe(Box::new(Arc::clone(&late)));

        a.request(Demand::unlimited());
        factory.run_until_idle();
        block_on(handle.join())
            .expect("task finishes")
            .expect("send completes");
        assert_eq!(a.values(), vec![1]);
        assert_eq!(
            late.values(),
            vec![1],
            "the snapshot is taken at the pending-to-sending decision, after attachment"
        );
    }
}
