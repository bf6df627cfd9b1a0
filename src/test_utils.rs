//! Test utilities for abridge.
//!
//! Shared helpers for unit tests and downstream test suites:
//! - tracing-based logging initialization
//! - phase/assert macros for readable test output
//! - a spin-polling `block_on` for driving single futures
//! - reusable probes: a recording subscriber, a request/cancel probe
//!   publisher, and a manually-opened gate future

use crate::publisher::{Completion, Demand, Publisher, Subscriber, Subscription};
use std::future::Future;
use std::sync::{Arc, Mutex, Once};
use std::task::{Context, Poll, Wake, Waker};
use tracing_subscriber::fmt::format::FmtSpan;

/// Initialize test logging with trace-level output.
///
/// Safe to call multiple times; only initializes once.
pub fn init_test_logging() {
    static INIT_LOGGING: Once = Once::new();
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .with_target(true)
            .with_ansi(false)
            .with_span_events(FmtSpan::CLOSE)
            .try_init();
    });
}

/// Drives a single future to completion on the current thread.
///
/// Polls in a spin loop with a yielding no-op waker, so futures resumed
/// from other threads make progress too. Test-only: production code
/// belongs on a host runtime.
pub fn block_on<F: Future>(future: F) -> F::Output {
    struct NoopWaker;
    impl Wake for NoopWaker {
        fn wake(self: Arc<Self>) {}
    }
    let waker = Waker::from(Arc::new(NoopWaker));
    let mut cx = Context::from_waker(&waker);
    let mut pinned = Box::pin(future);
    loop {
        match pinned.as_mut().poll(&mut cx) {
            Poll::Ready(value) => return value,
            Poll::Pending => std::thread::yield_now(),
        }
    }
}

/// Log a test phase transition with a visual separator.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        tracing::info!(phase = %$name, "========================================");
        tracing::info!(phase = %$name, "TEST PHASE: {}", $name);
        tracing::info!(phase = %$name, "========================================");
    };
}

/// Log a section within a test phase.
#[macro_export]
macro_rules! test_section {
    ($name:expr) => {
        tracing::debug!(section = %$name, "--- {} ---", $name);
    };
}

/// Log test completion with summary.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        tracing::info!(test = %$name, "test completed successfully: {}", $name);
    };
}

/// Log before assertions for context.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $msg:expr, $expected:expr, $actual:expr) => {
        tracing::debug!(
            expected = ?$expected,
            actual = ?$actual,
            "Asserting: {}",
            $msg
        );
        assert!($cond, "{}: expected {:?}, got {:?}", $msg, $expected, $actual);
    };
}

/// A manually-opened gate: futures wait until [`open`](Gate::open).
///
/// The test analog of a one-shot event; once opened it stays open.
#[derive(Debug, Clone)]
pub struct Gate {
    inner: Arc<GateInner>,
}

#[derive(Debug)]
struct GateInner {
    state: Mutex<GateState>,
}

#[derive(Debug)]
struct GateState {
    open: bool,
    wakers: Vec<Waker>,
}

impl Gate {
    /// Creates a closed gate.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(GateInner {
                state: Mutex::new(GateState {
                    open: false,
                    wakers: Vec::new(),
                }),
            }),
        }
    }

    /// Opens the gate and wakes every waiter.
    pub fn open(&self) {
        let wakers = {
            let mut state = self.lock();
            state.open = true;
            std::mem::take(&mut state.wakers)
        };
        for waker in wakers {
            waker.wake();
        }
    }

    /// Returns true once opened.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    /// Resolves once the gate is open.
    pub async fn wait(&self) {
        std::future::poll_fn(|cx| {
            let mut state = self.lock();
            if state.open {
                Poll::Ready(())
            } else {
                state.wakers.push(cx.waker().clone());
                Poll::Pending
            }
        })
        .await;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GateState> {
        match self.inner.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

/// A subscriber that records everything it receives.
///
/// On subscription it requests `initial` demand; afterwards tests grant
/// more via [`request`](Self::request) or stop via
/// [`cancel`](Self::cancel).
#[derive(Debug)]
pub struct RecordingSubscriber<T, E> {
    initial: Demand,
    state: Mutex<RecorderState<T, E>>,
}

struct RecorderState<T, E> {
    subscription: Option<Arc<dyn Subscription>>,
    values: Vec<T>,
    completion: Option<Completion<E>>,
}

impl<T, E> std::fmt::Debug for RecorderState<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecorderState")
            .field("values", &self.values.len())
            .field("completed", &self.completion.is_some())
            .finish_non_exhaustive()
    }
}

impl<T, E> RecordingSubscriber<T, E> {
    /// Creates a recorder that requests `initial` demand on subscription.
    #[must_use]
    pub fn with_initial_demand(initial: Demand) -> Self {
        Self {
            initial,
            state: Mutex::new(RecorderState {
                subscription: None,
                values: Vec::new(),
                completion: None,
            }),
        }
    }

    /// Grants additional demand through the stored subscription.
    ///
    /// # Panics
    ///
    /// Panics if no subscription was received yet.
    pub fn request(&self, demand: Demand) {
        let subscription = self
            .lock()
            .subscription
            .clone()
            .expect("no subscription received");
        subscription.request(demand);
    }

    /// Cancels the stored subscription.
    ///
    /// # Panics
    ///
    /// Panics if no subscription was received yet.
    pub fn cancel(&self) {
        let subscription = self
            .lock()
            .subscription
            .clone()
            .expect("no subscription received");
        subscription.cancel();
    }

    /// Returns the values received so far.
    #[must_use]
    pub fn values(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.lock().values.clone()
    }

    /// Returns the terminal completion, if received.
    #[must_use]
    pub fn completion(&self) -> Option<Completion<E>>
    where
        E: Clone,
    {
        self.lock().completion.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RecorderState<T, E>> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<T, E> Subscriber for RecordingSubscriber<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    type Input = T;
    type Failure = E;

    fn receive_subscription(&self, subscription: Arc<dyn Subscription>) {
        self.lock().subscription = Some(Arc::clone(&subscription));
        if self.initial.has_any() {
            subscription.request(self.initial);
        }
    }

    fn receive(&self, input: T) -> Demand {
        self.lock().values.push(input);
        Demand::none()
    }

    fn receive_completion(&self, completion: Completion<E>) {
        self.lock().completion = Some(completion);
    }
}

/// Events recorded by a [`ProbePublisher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeEvent {
    /// The downstream requested demand.
    Request(Demand),
    /// The downstream cancelled the subscription.
    Cancel,
}

/// Wraps a publisher and records every `request`/`cancel` the downstream
/// issues, in order. Clones share the same history.
#[derive(Debug, Clone)]
pub struct ProbePublisher<P> {
    inner: P,
    history: Arc<Mutex<Vec<ProbeEvent>>>,
}

impl<P> ProbePublisher<P> {
    /// Wraps `inner` with a fresh history.
    #[must_use]
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Returns the recorded history so far.
    #[must_use]
    pub fn history(&self) -> Vec<ProbeEvent> {
        match self.history.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl<P> Publisher for ProbePublisher<P>
where
    P: Publisher,
    P::Output: Send + 'static,
    P::Failure: Send + 'static,
{
    type Output = P::Output;
    type Failure = P::Failure;

    fn subscribe(
        &self,
        subscriber: Box<dyn Subscriber<Input = Self::Output, Failure = Self::Failure>>,
    ) {
        self.inner.subscribe(Box::new(ProbeSubscriber {
            downstream: subscriber,
            history: Arc::clone(&self.history),
        }));
    }
}

struct ProbeSubscriber<T, E> {
    downstream: Box<dyn Subscriber<Input = T, Failure = E>>,
    history: Arc<Mutex<Vec<ProbeEvent>>>,
}

impl<T, E> Subscriber for ProbeSubscriber<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    type Input = T;
    type Failure = E;

    fn receive_subscription(&self, subscription: Arc<dyn Subscription>) {
        self.downstream.receive_subscription(Arc::new(ProbeSubscription {
            inner: subscription,
            history: Arc::clone(&self.history),
        }));
    }

    fn receive(&self, input: T) -> Demand {
        self.downstream.receive(input)
    }

    fn receive_completion(&self, completion: Completion<E>) {
        self.downstream.receive_completion(completion);
    }
}

struct ProbeSubscription {
    inner: Arc<dyn Subscription>,
    history: Arc<Mutex<Vec<ProbeEvent>>>,
}

impl ProbeSubscription {
    fn record(&self, event: ProbeEvent) {
        match self.history.lock() {
            Ok(mut guard) => guard.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

impl Subscription for ProbeSubscription {
    fn request(&self, demand: Demand) {
        self.record(ProbeEvent::Request(demand));
        self.inner.request(demand);
    }

    fn cancel(&self) {
        self.record(ProbeEvent::Cancel);
        self.inner.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::SequencePublisher;

    #[test]
    fn gate_blocks_until_opened() {
        let gate = Gate::new();
        assert!(!gate.is_open());
        gate.open();
        assert!(gate.is_open());
        block_on(gate.wait());
    }

    #[test]
    fn probe_records_request_and_cancel_in_order() {
        let probe = ProbePublisher::new(SequencePublisher::new(0..10));
        let recorder = Arc::new(RecordingSubscriber::with_initial_demand(Demand::max(2)));
        probe.subscribe(Box::new(Arc::clone(&recorder)));
        recorder.cancel();

        assert_eq!(recorder.values(), vec![0, 1]);
        assert_eq!(
            probe.history(),
            vec![ProbeEvent::Request(Demand::max(2)), ProbeEvent::Cancel]
        );
    }
}
