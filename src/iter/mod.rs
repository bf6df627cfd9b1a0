//! Reactive-to-async iteration: consume a demand-driven publisher
//! element by element.
//!
//! [`values`] and [`try_values`] wrap a [`Publisher`] into a lazy,
//! pull-based asynchronous iterator. Each iterator owns one upstream
//! subscription (created on the first `next`), requests exactly one
//! element per `next` that needs a fresh one, and cancels the upstream
//! when dropped.
//!
//! All upstream callbacks and consumer arrivals feed one state machine:
//!
//! ```text
//!   idle ── consume ──► awaiting_subscription ── receive ─┐
//!     │                                                   ▼
//!     └─── receive ──► awaiting_consume ── consume ──► awaiting_input
//!                            ▲                              │ input
//!                            └────────── deliver ───────────┘
//! ```
//!
//! with `finishing`/`completed`/`cancelled` absorbing the tail. Events
//! are processed under one lock; the resulting actions (request, deliver,
//! finish, cancel upstream) run after the lock is released.

use crate::cancel::CancelHandle;
use crate::cx::Cx;
use crate::error::{Error, ErrorKind, Result};
use crate::publisher::{Completion, Demand, Publisher, Subscriber, Subscription};
use crate::suspend::{await_cancellable, Completer};
use std::sync::{Arc, Mutex};
use tracing::trace;

/// Wraps `publisher` into a non-throwing asynchronous iterator.
///
/// Upstream failure completions and cancellation both surface as
/// end-of-sequence: this shape is for publishers that are declared
/// never-failing, where the failure arm is unreachable anyway.
pub fn values<P>(publisher: P) -> Values<P>
where
    P: Publisher,
    P::Output: Send + 'static,
    P::Failure: std::error::Error + Send + Sync + 'static,
{
    Values {
        core: IterCore::new(publisher),
    }
}

/// Wraps `publisher` into a throwing asynchronous iterator.
///
/// Upstream failures surface as [`ErrorKind::User`] and cancellation as
/// [`ErrorKind::Cancelled`].
pub fn try_values<P>(publisher: P) -> TryValues<P>
where
    P: Publisher,
    P::Output: Send + 'static,
    P::Failure: std::error::Error + Send + Sync + 'static,
{
    TryValues {
        core: IterCore::new(publisher),
    }
}

/// Non-throwing asynchronous iterator over a publisher.
///
/// Created by [`values`].
#[derive(Debug)]
pub struct Values<P>
where
    P: Publisher,
    P::Output: Send + 'static,
    P::Failure: std::error::Error + Send + Sync + 'static,
{
    core: IterCore<P>,
}

impl<P> Values<P>
where
    P: Publisher,
    P::Output: Send + 'static,
    P::Failure: std::error::Error + Send + Sync + 'static,
{
    /// Returns the next element, or `None` once the sequence ended —
    /// normally, by failure, or by cancellation.
    pub async fn next(&mut self, cx: &Cx) -> Option<P::Output> {
        self.core.next(cx).await.unwrap_or(None)
    }
}

/// Throwing asynchronous iterator over a publisher.
///
/// Created by [`try_values`].
#[derive(Debug)]
pub struct TryValues<P>
where
    P: Publisher,
    P::Output: Send + 'static,
    P::Failure: std::error::Error + Send + Sync + 'static,
{
    core: IterCore<P>,
}

impl<P> TryValues<P>
where
    P: Publisher,
    P::Output: Send + 'static,
    P::Failure: std::error::Error + Send + Sync + 'static,
{
    /// Returns the next element, `Ok(None)` at end of sequence.
    ///
    /// # Errors
    ///
    /// Upstream failures are returned as [`ErrorKind::User`] wrapping the
    /// publisher's error; cancellation of the awaiting task as
    /// [`ErrorKind::Cancelled`].
    pub async fn next(&mut self, cx: &Cx) -> Result<Option<P::Output>> {
        self.core.next(cx).await
    }
}

struct IterCore<P>
where
    P: Publisher,
    P::Output: Send + 'static,
    P::Failure: std::error::Error + Send + Sync + 'static,
{
    publisher: P,
    machine: Arc<Machine<P::Output, P::Failure>>,
    subscribed: bool,
}

impl<P> std::fmt::Debug for IterCore<P>
where
    P: Publisher,
    P::Output: Send + 'static,
    P::Failure: std::error::Error + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IterCore")
            .field("subscribed", &self.subscribed)
            .finish_non_exhaustive()
    }
}

impl<P> IterCore<P>
where
    P: Publisher,
    P::Output: Send + 'static,
    P::Failure: std::error::Error + Send + Sync + 'static,
{
    fn new(publisher: P) -> Self {
        Self {
            publisher,
            machine: Arc::new(Machine::new()),
            subscribed: false,
        }
    }

    async fn next(&mut self, cx: &Cx) -> Result<Option<P::Output>> {
        if !self.subscribed {
            self.subscribed = true;
            self.publisher.subscribe(Box::new(Upstream {
                machine: Arc::clone(&self.machine),
            }));
        }
        let machine = Arc::clone(&self.machine);
        let on_cancel = Arc::clone(&self.machine);
        await_cancellable(cx, move |completer| {
            machine.feed(Event::Consume(completer));
            Some(CancelHandle::new(move || on_cancel.feed(Event::Cancel)))
        })
        .await
    }
}

impl<P> Drop for IterCore<P>
where
    P: Publisher,
    P::Output: Send + 'static,
    P::Failure: std::error::Error + Send + Sync + 'static,
{
    fn drop(&mut self) {
        // Dropping the iterator without exhausting the sequence must stop
        // the upstream; absorbed by terminal states otherwise.
        self.machine.feed(Event::Cancel);
    }
}

type Consumer<T> = Completer<Option<T>>;

enum State<T, E> {
    Idle,
    AwaitingSubscription(Consumer<T>),
    AwaitingConsume(Arc<dyn Subscription>),
    AwaitingInput(Arc<dyn Subscription>, Consumer<T>),
    Finishing(Completion<E>),
    Cancelled,
    Completed,
}

impl<T, E> State<T, E> {
    const fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::AwaitingSubscription(_) => "awaiting_subscription",
            Self::AwaitingConsume(_) => "awaiting_consume",
            Self::AwaitingInput(..) => "awaiting_input",
            Self::Finishing(_) => "finishing",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
        }
    }
}

enum Event<T, E> {
    Receive(Arc<dyn Subscription>),
    Consume(Consumer<T>),
    Input(T),
    Finish(Completion<E>),
    Cancel,
}

enum Action<T, E> {
    RequestOne(Arc<dyn Subscription>),
    Deliver(Consumer<T>, T),
    Finish(Consumer<T>, Completion<E>),
    FailCancelled(Consumer<T>),
    CancelUpstream(Arc<dyn Subscription>),
}

struct Machine<T, E> {
    state: Mutex<State<T, E>>,
}

impl<T, E> Machine<T, E>
where
    T: Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    fn new() -> Self {
        Self {
            state: Mutex::new(State::Idle),
        }
    }

    fn feed(&self, event: Event<T, E>) {
        let actions = self.process(event);
        for action in actions {
            match action {
                Action::RequestOne(subscription) => subscription.request(Demand::max(1)),
                Action::Deliver(consumer, value) => consumer.complete(Ok(Some(value))),
                Action::Finish(consumer, completion) => match completion {
                    Completion::Finished => consumer.complete(Ok(None)),
                    Completion::Failure(error) => consumer.complete(Err(Error::user(error))),
                },
                Action::FailCancelled(consumer) => consumer.complete(Err(Error::new(
                    ErrorKind::Cancelled,
                )
                .with_context("async iterator cancelled"))),
                Action::CancelUpstream(subscription) => subscription.cancel(),
            }
        }
    }

    /// Runs one transition under the lock and returns the actions to
    /// perform after unlocking. Blank table cells drop the event.
    fn process(&self, event: Event<T, E>) -> Vec<Action<T, E>> {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let (next, actions) = match (std::mem::replace(&mut *state, State::Idle), event) {
            (State::Idle, Event::Receive(sub)) => (State::AwaitingConsume(sub), vec![]),
            (State::Idle, Event::Consume(k)) => (State::AwaitingSubscription(k), vec![]),
            (State::Idle, Event::Finish(c)) => (State::Finishing(c), vec![]),
            (State::Idle, Event::Cancel) => (State::Cancelled, vec![]),

            (State::AwaitingSubscription(k), Event::Receive(sub)) => (
                State::AwaitingInput(Arc::clone(&sub), k),
                vec![Action::RequestOne(sub)],
            ),
            (State::AwaitingSubscription(k), Event::Finish(c)) => {
                (State::Completed, vec![Action::Finish(k, c)])
            }
            // The bridge resumes the pending consumer on its own
            // cancellation path; the machine just drops it.
            (State::AwaitingSubscription(_), Event::Cancel) => (State::Cancelled, vec![]),

            (State::AwaitingConsume(sub), Event::Consume(k)) => (
                State::AwaitingInput(Arc::clone(&sub), k),
                vec![Action::RequestOne(sub)],
            ),
            (State::AwaitingConsume(_), Event::Finish(c)) => (State::Finishing(c), vec![]),
            (State::AwaitingConsume(sub), Event::Cancel) => {
                (State::Cancelled, vec![Action::CancelUpstream(sub)])
            }

            (State::AwaitingInput(sub, k), Event::Input(value)) => (
                State::AwaitingConsume(sub),
                vec![Action::Deliver(k, value)],
            ),
            (State::AwaitingInput(_, k), Event::Finish(c)) => {
                (State::Completed, vec![Action::Finish(k, c)])
            }
            (State::AwaitingInput(sub, _), Event::Cancel) => {
                (State::Cancelled, vec![Action::CancelUpstream(sub)])
            }

            (State::Finishing(c), Event::Consume(k)) => {
                (State::Completed, vec![Action::Finish(k, c)])
            }
            (State::Finishing(_), Event::Cancel) => (State::Cancelled, vec![]),

            (State::Cancelled, Event::Receive(sub)) => {
                (State::Cancelled, vec![Action::CancelUpstream(sub)])
            }
            (State::Cancelled, Event::Consume(k)) => {
                (State::Cancelled, vec![Action::FailCancelled(k)])
            }

            // A consumer arriving after completion sees end-of-sequence.
            (State::Completed, Event::Consume(k)) => (
                State::Completed,
                vec![Action::Finish(k, Completion::Finished)],
            ),

            (current, _) => (current, vec![]),
        };
        trace!(state = next.name(), "iterator transition");
        *state = next;
        actions
    }
}

/// The subscriber half the iterator presents to the upstream publisher.
struct Upstream<T, E> {
    machine: Arc<Machine<T, E>>,
}

impl<T, E> Subscriber for Upstream<T, E>
where
    T: Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    type Input = T;
    type Failure = E;

    fn receive_subscription(&self, subscription: Arc<dyn Subscription>) {
        self.machine.feed(Event::Receive(subscription));
    }

    fn receive(&self, input: T) -> Demand {
        self.machine.feed(Event::Input(input));
        // Demand is issued explicitly, one request per consume.
        Demand::none()
    }

    fn receive_completion(&self, completion: Completion<E>) {
        self.machine.feed(Event::Finish(completion));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::SequencePublisher;
    use crate::task::{TaskFactory, TestTaskFactory};
    use crate::test_utils::{block_on, init_test_logging, ProbeEvent, ProbePublisher};
    use std::convert::Infallible;

    /// A publisher whose subscription accepts requests but never
    /// delivers; the canonical stalled upstream.
    #[derive(Debug, Clone)]
    struct PendingPublisher;

    struct PendingSubscription;

    impl Subscription for PendingSubscription {
        fn request(&self, _demand: Demand) {}
        fn cancel(&self) {}
    }

    impl Publisher for PendingPublisher {
        type Output = u32;
        type Failure = Infallible;

        fn subscribe(
            &self,
            subscriber: Box<dyn Subscriber<Input = u32, Failure = Infallible>>,
        ) {
            subscriber.receive_subscription(Arc::new(PendingSubscription));
        }
    }

    #[test]
    fn consumes_a_sequence_to_the_end() {
        init_test_logging();
        let cx = Cx::for_testing();
        let mut iter = values(SequencePublisher::new(vec![1, 2, 3]));

        assert_eq!(block_on(iter.next(&cx)), Some(1));
        assert_eq!(block_on(iter.next(&cx)), Some(2));
        assert_eq!(block_on(iter.next(&cx)), Some(3));
        assert_eq!(block_on(iter.next(&cx)), None);
        assert_eq!(block_on(iter.next(&cx)), None, "end of sequence is sticky");
    }

    #[test]
    fn try_variant_reports_end_as_ok_none() {
        init_test_logging();
        let cx = Cx::for_testing();
        let mut iter = try_values(SequencePublisher::new(0..2));

        assert_eq!(block_on(iter.next(&cx)).expect("value"), Some(0));
        assert_eq!(block_on(iter.next(&cx)).expect("value"), Some(1));
        assert_eq!(block_on(iter.next(&cx)).expect("end"), None);
    }

    #[test]
    fn prefix_and_drop_requests_one_by_one_then_cancels() {
        init_test_logging();
        let cx = Cx::for_testing();
        let probe = ProbePublisher::new(SequencePublisher::new(0..));
        let mut collected = Vec::new();
        {
            let mut iter = values(probe.clone());
            for _ in 0..3 {
                collected.extend(block_on(iter.next(&cx)));
            }
        }
        assert_eq!(collected, vec![0, 1, 2]);
        assert_eq!(
            probe.history(),
            vec![
                ProbeEvent::Request(Demand::max(1)),
                ProbeEvent::Request(Demand::max(1)),
                ProbeEvent::Request(Demand::max(1)),
                ProbeEvent::Cancel,
            ],
            "upstream history is exactly three singular requests then cancel"
        );
    }

    #[test]
    fn exhausted_iterator_does_not_cancel_upstream_on_drop() {
        init_test_logging();
        let cx = Cx::for_testing();
        let probe = ProbePublisher::new(SequencePublisher::new(0..1));
        {
            let mut iter = values(probe.clone());
            assert_eq!(block_on(iter.next(&cx)), Some(0));
            assert_eq!(block_on(iter.next(&cx)), None);
        }
        assert_eq!(
            probe.history(),
            vec![
                ProbeEvent::Request(Demand::max(1)),
                ProbeEvent::Request(Demand::max(1)),
            ],
            "terminal completion absorbs the drop-cancel"
        );
    }

    #[test]
    fn cancelling_the_awaiting_task_cancels_upstream_once() {
        init_test_logging();
        let factory = TestTaskFactory::new();
        let probe = ProbePublisher::new(PendingPublisher);

        let mut iter = try_values(probe.clone());
        let handle = factory.task(None, move |cx| async move {
            let first = iter.next(&cx).await;
            (first, iter)
        });

        factory.run_until_idle();
        assert!(!handle.is_finished(), "parked between request and input");

        handle.cancel();
        factory.run_until_idle();
        let (first, mut iter) = block_on(handle.join()).expect("task finishes");
        assert!(first.expect_err("cancelled").is_cancelled());
        assert_eq!(
            probe.history(),
            vec![
                ProbeEvent::Request(Demand::max(1)),
                ProbeEvent::Cancel,
            ],
            "exactly one upstream cancel"
        );

        // The throwing variant keeps reporting cancellation afterwards.
        let fresh = Cx::for_testing();
        let err = block_on(iter.next(&fresh)).expect_err("iterator stays cancelled");
        assert!(err.is_cancelled());
        drop(iter);
        assert_eq!(probe.history().len(), 2, "drop after cancel adds nothing");
    }

    #[test]
    fn cancelled_iterator_reports_end_in_non_throwing_variant() {
        init_test_logging();
        let factory = TestTaskFactory::new();
        let mut iter = values(PendingPublisher);

        let handle = factory.task(None, move |cx| async move {
            let first = iter.next(&cx).await;
            (first, iter)
        });
        factory.run_until_idle();
        handle.cancel();
        factory.run_until_idle();

        let (first, mut iter) = block_on(handle.join()).expect("task finishes");
        assert_eq!(first, None, "cancellation maps to end of sequence");
        let fresh = Cx::for_testing();
        assert_eq!(block_on(iter.next(&fresh)), None);
    }
}
