//! Per-subscriber demand state machine for the async channel.

use super::ChannelCore;
use crate::publisher::{Completion, Demand, Subscriber, Subscription};
use std::sync::{Mutex, Weak};
use tracing::trace;

/// Demand state of one channel subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubState {
    /// No outstanding demand.
    Idle,
    /// The downstream has issued unserved requests; the demand is always
    /// positive — reaching zero transitions back to `Idle`.
    HasDemand(Demand),
    /// Cancelled by the downstream or finished by the channel.
    Finished,
}

/// One attached subscriber: its downstream callbacks plus the demand
/// bookkeeping the channel's rendezvous predicate reads.
pub(super) struct ChannelSubscription<T, E> {
    id: u64,
    channel: Weak<ChannelCore<T, E>>,
    subscriber: Box<dyn Subscriber<Input = T, Failure = E>>,
    state: Mutex<SubState>,
}

impl<T, E> ChannelSubscription<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    pub(super) fn new(
        id: u64,
        channel: Weak<ChannelCore<T, E>>,
        subscriber: Box<dyn Subscriber<Input = T, Failure = E>>,
    ) -> Self {
        Self {
            id,
            channel,
            subscriber,
            state: Mutex::new(SubState::Idle),
        }
    }

    pub(super) const fn id(&self) -> u64 {
        self.id
    }

    /// Hands the subscription to the downstream. Called exactly once,
    /// right after attachment.
    pub(super) fn activate(this: &std::sync::Arc<Self>) {
        this.subscriber
            .receive_subscription(std::sync::Arc::clone(this) as std::sync::Arc<dyn Subscription>);
    }

    /// True while the downstream has positive demand.
    pub(super) fn has_demand(&self) -> bool {
        matches!(*self.lock(), SubState::HasDemand(_))
    }

    /// Delivers one value, consuming one unit of demand and crediting
    /// whatever additional demand the downstream returns.
    pub(super) fn deliver(&self, value: T) {
        {
            let mut state = self.lock();
            match *state {
                SubState::HasDemand(demand) => {
                    let remaining = demand.decrement();
                    *state = if remaining.has_any() {
                        SubState::HasDemand(remaining)
                    } else {
                        SubState::Idle
                    };
                }
                // Lost the race against a downstream cancel; the value is
                // not delivered.
                SubState::Idle | SubState::Finished => return,
            }
        }
        let additional = self.subscriber.receive(value);
        if additional.has_any() {
            self.credit(additional);
        }
    }

    /// Forwards the terminal completion. Idempotent against a concurrent
    /// downstream cancel.
    pub(super) fn finish(&self, completion: Completion<E>) {
        {
            let mut state = self.lock();
            if *state == SubState::Finished {
                return;
            }
            *state = SubState::Finished;
        }
        self.subscriber.receive_completion(completion);
    }

    fn credit(&self, demand: Demand) {
        let mut state = self.lock();
        match *state {
            SubState::Idle => *state = SubState::HasDemand(demand),
            SubState::HasDemand(existing) => *state = SubState::HasDemand(existing + demand),
            SubState::Finished => {}
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SubState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<T, E> Subscription for ChannelSubscription<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn request(&self, demand: Demand) {
        if !demand.has_any() {
            return;
        }
        {
            let mut state = self.lock();
            match *state {
                SubState::Idle => *state = SubState::HasDemand(demand),
                SubState::HasDemand(existing) => {
                    *state = SubState::HasDemand(existing + demand);
                }
                SubState::Finished => return,
            }
        }
        trace!(subscriber = self.id, %demand, "channel demand granted");
        // The lock is released before notifying; the channel re-evaluates
        // its rendezvous predicate.
        if let Some(channel) = self.channel.upgrade() {
            channel.on_request();
        }
    }

    fn cancel(&self) {
        {
            let mut state = self.lock();
            if *state == SubState::Finished {
                return;
            }
            *state = SubState::Finished;
        }
        trace!(subscriber = self.id, "channel subscriber cancelled");
        if let Some(channel) = self.channel.upgrade() {
            channel.on_subscriber_cancelled(self.id);
        }
    }
}
