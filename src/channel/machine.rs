//! Producer-side state machine for the async channel.
//!
//! The transition function runs under the channel lock and returns
//! actions; every blocking side effect (deliver, resume, fail, finish)
//! executes after the lock is released.

use super::subscription::ChannelSubscription;
use crate::error::{Error, ErrorKind};
use crate::publisher::Completion;
use crate::suspend::Continuation;
use std::sync::Arc;
use tracing::trace;

/// The producer's continuation, resumed when the rendezvous completes.
pub(super) type Waiter = Continuation<()>;

/// Producer state. At most one value is in flight and at most one
/// producer continuation is held; terminal states absorb all events.
pub(super) enum ProducerState<T> {
    /// No send outstanding.
    Idle,
    /// A send is waiting for every subscriber to have demand.
    Pending { value: T, waiter: Waiter },
    /// The value is being delivered to the snapshot set.
    Sending { waiter: Waiter },
    /// Delivered, but some subscriber lacks demand for the next value.
    AwaitingDemand { waiter: Waiter },
    /// Terminal: a completion was sent.
    Finished,
    /// Terminal: the producer's task was cancelled.
    Cancelled,
}

impl<T> ProducerState<T> {
    pub(super) const fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Pending { .. } => "pending",
            Self::Sending { .. } => "sending",
            Self::AwaitingDemand { .. } => "awaiting_demand",
            Self::Finished => "finished",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Events fed into the producer machine.
pub(super) enum Event<T> {
    /// A producer called `send`.
    Send { value: T, waiter: Waiter },
    /// Subscriber demand changed; re-evaluate the rendezvous predicate.
    CheckDemand,
    /// The delivery loop finished handing the value to the snapshot set.
    SendFinished,
    /// The producer's task was cancelled.
    ProducerCancelled,
}

/// Actions returned by the transition function, executed outside the lock.
pub(super) enum Action<T, E> {
    /// Resume the producer's continuation successfully.
    Resume(Waiter),
    /// Fail a continuation with an error.
    Fail(Waiter, Error),
    /// Deliver `value` to every subscription in the snapshot, then feed
    /// [`Event::SendFinished`].
    Deliver {
        value: T,
        targets: Vec<Arc<ChannelSubscription<T, E>>>,
    },
    /// Forward a terminal completion to the snapshot.
    Finish {
        completion: Completion<E>,
        targets: Vec<Arc<ChannelSubscription<T, E>>>,
    },
}

/// The complete channel state guarded by one lock.
pub(super) struct ChannelState<T, E> {
    pub(super) producer: ProducerState<T>,
    pub(super) subscribers: Vec<Arc<ChannelSubscription<T, E>>>,
    /// Set on termination; replayed to late subscribers.
    pub(super) terminal: Option<Completion<E>>,
}

impl<T, E> ChannelState<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    pub(super) const fn new() -> Self {
        Self {
            producer: ProducerState::Idle,
            subscribers: Vec::new(),
            terminal: None,
        }
    }

    /// The rendezvous predicate: a non-empty subscriber set in which
    /// every subscriber has positive demand.
    fn demand_ready(&self) -> bool {
        !self.subscribers.is_empty() && self.subscribers.iter().all(|s| s.has_demand())
    }

    pub(super) fn process(&mut self, event: Event<T>) -> Vec<Action<T, E>> {
        let producer = std::mem::replace(&mut self.producer, ProducerState::Idle);
        let actions = match (producer, event) {
            (ProducerState::Idle, Event::Send { value, waiter }) => {
                self.producer = ProducerState::Pending { value, waiter };
                self.recheck()
            }
            (
                active @ (ProducerState::Pending { .. }
                | ProducerState::Sending { .. }
                | ProducerState::AwaitingDemand { .. }),
                Event::Send { waiter, .. },
            ) => {
                self.producer = active;
                vec![Action::Fail(
                    waiter,
                    Error::new(ErrorKind::ConcurrentAccess)
                        .with_context("send while another send is outstanding"),
                )]
            }
            (ProducerState::Finished, Event::Send { waiter, .. }) => {
                self.producer = ProducerState::Finished;
                vec![Action::Fail(
                    waiter,
                    Error::new(ErrorKind::OutputToFinished)
                        .with_context("send after terminal completion"),
                )]
            }
            (ProducerState::Cancelled, Event::Send { waiter, .. }) => {
                self.producer = ProducerState::Cancelled;
                vec![Action::Fail(
                    waiter,
                    Error::new(ErrorKind::Cancelled).with_context("send on a cancelled channel"),
                )]
            }

            (producer, Event::CheckDemand) => {
                self.producer = producer;
                self.recheck()
            }

            (ProducerState::Sending { waiter }, Event::SendFinished) => {
                if self.demand_ready() {
                    self.producer = ProducerState::Idle;
                    vec![Action::Resume(waiter)]
                } else {
                    self.producer = ProducerState::AwaitingDemand { waiter };
                    vec![]
                }
            }
            // A cancel raced the delivery loop; the waiter was already
            // failed by the cancel transition.
            (producer, Event::SendFinished) => {
                self.producer = producer;
                vec![]
            }

            (
                terminal @ (ProducerState::Finished | ProducerState::Cancelled),
                Event::ProducerCancelled,
            ) => {
                self.producer = terminal;
                vec![]
            }
            (ProducerState::Idle, Event::ProducerCancelled) => {
                self.producer = ProducerState::Cancelled;
                vec![self.finish_all()]
            }
            (
                ProducerState::Pending { waiter, .. }
                | ProducerState::Sending { waiter }
                | ProducerState::AwaitingDemand { waiter },
                Event::ProducerCancelled,
            ) => {
                self.producer = ProducerState::Cancelled;
                vec![
                    Action::Fail(
                        waiter,
                        Error::new(ErrorKind::Cancelled)
                            .with_context("producer cancelled during send"),
                    ),
                    self.finish_all(),
                ]
            }
        };
        trace!(state = self.producer.name(), "channel transition");
        actions
    }

    /// Re-evaluates the rendezvous predicate for a pending or
    /// demand-starved producer.
    fn recheck(&mut self) -> Vec<Action<T, E>> {
        match std::mem::replace(&mut self.producer, ProducerState::Idle) {
            ProducerState::Pending { value, waiter } if self.demand_ready() => {
                self.producer = ProducerState::Sending { waiter };
                vec![Action::Deliver {
                    value,
                    targets: self.subscribers.clone(),
                }]
            }
            ProducerState::AwaitingDemand { waiter } if self.demand_ready() => {
                self.producer = ProducerState::Idle;
                vec![Action::Resume(waiter)]
            }
            other => {
                self.producer = other;
                vec![]
            }
        }
    }

    /// Finishes every live subscriber with `Finished` and records the
    /// terminal completion for late subscribers.
    fn finish_all(&mut self) -> Action<T, E> {
        self.terminal = Some(Completion::Finished);
        Action::Finish {
            completion: Completion::Finished,
            targets: std::mem::take(&mut self.subscribers),
        }
    }
}
