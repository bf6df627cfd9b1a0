//! The demand-driven publisher contract.
//!
//! This is the upstream model the bridging primitives consume and
//! produce: a [`Publisher`] accepts a [`Subscriber`], hands it a
//! [`Subscription`], and then delivers at most as many values as the
//! subscriber has requested [`Demand`] for, ending with a terminal
//! [`Completion`].
//!
//! ```text
//!   Publisher ◄── subscribe(subscriber)
//!       │
//!       ├── receive_subscription(subscription) ──► Subscriber
//!       │                                            │
//!       │◄─────────────── request(demand) ───────────┤
//!       ├── receive(value) -> additional demand ────►│   (≤ demand times)
//!       └── receive_completion(finished | failure) ─►│   (once)
//! ```
//!
//! Callbacks may arrive on any thread; implementations serialize their
//! own state and never invoke a callback while holding an internal lock.

mod demand;
mod sequence;

pub use demand::Demand;
pub use sequence::SequencePublisher;

use std::sync::Arc;

/// Terminal completion of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion<E> {
    /// The sequence ended normally.
    Finished,
    /// The sequence ended with an upstream failure.
    Failure(E),
}

/// A handle on an active subscription, held by the downstream.
///
/// `request` grants additional delivery credit; `cancel` stops further
/// deliveries. Both are idempotent in effect: requesting on a finished
/// subscription and cancelling twice are no-ops.
pub trait Subscription: Send + Sync {
    /// Grants `demand` additional delivery credit.
    fn request(&self, demand: Demand);

    /// Stops further deliveries and releases upstream resources.
    fn cancel(&self);
}

/// The downstream half of a subscription.
///
/// Implementations are shared values: callbacks take `&self` and may be
/// invoked from any thread, so state lives behind interior mutability.
pub trait Subscriber: Send + Sync {
    /// The element type delivered by the upstream.
    type Input;
    /// The failure type of the upstream.
    type Failure;

    /// Called once, before any values, with the subscription handle.
    fn receive_subscription(&self, subscription: Arc<dyn Subscription>);

    /// Called once per delivered value, at most `demand` times.
    ///
    /// The return value is *additional* demand granted on top of any
    /// outstanding credit.
    fn receive(&self, input: Self::Input) -> Demand;

    /// Called at most once with the terminal completion.
    fn receive_completion(&self, completion: Completion<Self::Failure>);
}

impl<S: Subscriber + ?Sized> Subscriber for Arc<S> {
    type Input = S::Input;
    type Failure = S::Failure;

    fn receive_subscription(&self, subscription: Arc<dyn Subscription>) {
        (**self).receive_subscription(subscription);
    }

    fn receive(&self, input: Self::Input) -> Demand {
        (**self).receive(input)
    }

    fn receive_completion(&self, completion: Completion<Self::Failure>) {
        (**self).receive_completion(completion);
    }
}

/// A demand-driven source of values.
pub trait Publisher {
    /// The element type this publisher emits.
    type Output;
    /// The failure type this publisher can complete with.
    type Failure;

    /// Attaches a subscriber.
    ///
    /// The publisher calls `receive_subscription` exactly once (possibly
    /// synchronously, before this returns) and thereafter honors the
    /// demand protocol.
    fn subscribe(
        &self,
        subscriber: Box<dyn Subscriber<Input = Self::Output, Failure = Self::Failure>>,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_equality() {
        assert_eq!(Completion::<&str>::Finished, Completion::Finished);
        assert_eq!(Completion::Failure("boom"), Completion::Failure("boom"));
        assert_ne!(Completion::Failure("boom"), Completion::Finished);
    }
}
