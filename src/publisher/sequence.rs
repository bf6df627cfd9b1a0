//! A demand-honoring publisher over an in-memory sequence.

use super::{Completion, Demand, Publisher, Subscriber, Subscription};
use std::convert::Infallible;
use std::sync::{Arc, Mutex};

/// Publishes the elements of a cloneable sequence, respecting demand.
///
/// Every subscriber gets its own pass over the sequence. Values are
/// delivered synchronously inside `request` while credit remains, which
/// makes this the canonical never-failing upstream for tests and
/// examples.
#[derive(Debug, Clone)]
pub struct SequencePublisher<I> {
    source: I,
}

impl<I> SequencePublisher<I>
where
    I: IntoIterator + Clone,
{
    /// Creates a publisher over `source`.
    pub const fn new(source: I) -> Self {
        Self { source }
    }
}

impl<I> Publisher for SequencePublisher<I>
where
    I: IntoIterator + Clone,
    I::IntoIter: Send + 'static,
    I::Item: Send + 'static,
{
    type Output = I::Item;
    type Failure = Infallible;

    fn subscribe(
        &self,
        subscriber: Box<dyn Subscriber<Input = Self::Output, Failure = Self::Failure>>,
    ) {
        let subscription = Arc::new(SequenceSubscription {
            subscriber,
            state: Mutex::new(SequenceState {
                iter: self.source.clone().into_iter(),
                demand: Demand::none(),
                delivering: false,
                finished: false,
            }),
        });
        subscription
            .subscriber
            .receive_subscription(Arc::clone(&subscription) as Arc<dyn Subscription>);
    }
}

struct SequenceState<It> {
    iter: It,
    demand: Demand,
    delivering: bool,
    finished: bool,
}

struct SequenceSubscription<It: Iterator> {
    subscriber: Box<dyn Subscriber<Input = It::Item, Failure = Infallible>>,
    state: Mutex<SequenceState<It>>,
}

impl<It: Iterator> SequenceSubscription<It> {
    fn lock(&self) -> std::sync::MutexGuard<'_, SequenceState<It>> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Delivers while credit remains. The `delivering` flag keeps a
    /// reentrant `request` from a `receive` callback out of this loop; it
    /// only tops up the credit the loop is already consuming.
    fn drain(&self) {
        loop {
            let step = {
                let mut state = self.lock();
                if state.finished || !state.demand.has_any() {
                    state.delivering = false;
                    return;
                }
                match state.iter.next() {
                    Some(value) => {
                        state.demand = state.demand.decrement();
                        Some(value)
                    }
                    None => {
                        state.finished = true;
                        None
                    }
                }
            };
            match step {
                Some(value) => {
                    let additional = self.subscriber.receive(value);
                    if additional.has_any() {
                        self.lock().demand += additional;
                    }
                }
                None => {
                    self.subscriber.receive_completion(Completion::Finished);
                    return;
                }
            }
        }
    }
}

impl<It> Subscription for SequenceSubscription<It>
where
    It: Iterator + Send,
    It::Item: Send,
{
    fn request(&self, demand: Demand) {
        {
            let mut state = self.lock();
            if state.finished {
                return;
            }
            state.demand += demand;
            if state.delivering || !state.demand.has_any() {
                return;
            }
            state.delivering = true;
        }
        self.drain();
    }

    fn cancel(&self) {
        self.lock().finished = true;
    }
}
