//! Suspension primitives: one-shot continuations and the cancellable
//! continuation bridge.
//!
//! [`continuation`] creates a one-shot suspension point; [`await_cancellable`]
//! adapts a callback-plus-cancel API into a suspending call that honors
//! cooperative cancellation of the surrounding task.

mod bridge;
mod continuation;

pub use bridge::{await_cancellable, Completer};
pub use continuation::{continuation, Continuation, Suspended};
