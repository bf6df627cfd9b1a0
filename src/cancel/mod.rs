//! Cancellation primitives.
//!
//! Cancellation is a protocol, not a silent drop. This module provides the
//! three pieces the bridging state machines build on:
//!
//! - [`CancelHandle`]: an idempotent, at-most-once cancel action
//! - [`CancellableRegistry`]: the three-state arbiter that decides whether
//!   completion or cancellation wins a race
//! - [`CancelSignal`]: a latching, task-level cancellation source that
//!   invokes registered handles in order

mod handle;
mod registry;
mod signal;

pub use handle::CancelHandle;
pub use registry::{CancellableRegistry, RegistryState};
pub use signal::{CancelSignal, HookGuard};
