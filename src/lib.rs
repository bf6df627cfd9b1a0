//! Abridge: cancel-correct bridges between callback-driven APIs and
//! cooperative async Rust.
//!
//! # Overview
//!
//! Abridge connects two worlds that do not naturally compose: APIs that
//! complete through callbacks and cancel through handles, and async Rust
//! code that suspends, resumes once, and observes cooperative
//! cancellation. Three tightly coupled state machines carry the load,
//! arbitrated by one small primitive — a three-state cancel-handle
//! registry in which completion and cancellation race and exactly one
//! wins.
//!
//! # Core Guarantees
//!
//! - **At-most-once completion**: every continuation resumes exactly once,
//!   with the callback's result or a cancellation error, never both
//! - **Cancel-correctness**: cancellation propagates to callback-side
//!   cancel handles exactly when it wins, and never masks a completion
//!   that already resumed
//! - **Demand-based backpressure**: publishers deliver only against
//!   credit the downstream granted; the channel's `send` is a rendezvous
//!   with every live subscriber
//! - **Deterministic testing**: a recording task factory drains spawned
//!   tasks to idle under test control
//!
//! # Module Structure
//!
//! - [`cancel`]: cancel handles, the three-state registry, task signals
//! - [`cx`]: the capability context carried through suspending calls
//! - [`suspend`]: one-shot continuations and `await_cancellable`
//! - [`publisher`]: the demand-driven publisher/subscriber contract
//! - [`iter`]: publisher-to-async-iterator adapters
//! - [`channel`]: the rendezvous broadcast channel
//! - [`task`]: task factories and handles
//! - [`queue`]: the sequential async queue
//! - [`error`]: error types
//! - [`test_utils`]: probes, gates, and logging for tests

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::doc_markdown)]

pub mod cancel;
pub mod channel;
pub mod cx;
pub mod error;
pub mod iter;
pub mod publisher;
pub mod queue;
pub mod suspend;
pub mod task;
pub mod test_utils;
pub mod types;

// Re-exports for convenient access to core types
pub use cancel::{CancelHandle, CancelSignal, CancellableRegistry, HookGuard, RegistryState};
pub use channel::AsyncChannel;
pub use cx::Cx;
pub use error::{Error, ErrorKind, Result, ResultExt};
pub use iter::{try_values, values, TryValues, Values};
pub use publisher::{Completion, Demand, Publisher, SequencePublisher, Subscriber, Subscription};
pub use queue::AsyncQueue;
pub use suspend::{await_cancellable, continuation, Completer, Continuation, Suspended};
pub use task::{
    JoinError, Spawn, SpawnTaskFactory, TaskCompletion, TaskFactory, TaskHandle, TestTaskFactory,
};
pub use types::{CancelKind, CancelReason, PanicPayload, Priority, TaskId};
