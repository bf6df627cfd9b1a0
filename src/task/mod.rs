//! Task spawning: the factory interface, handles, and the deterministic
//! test executor.
//!
//! The crate never schedules work itself. [`TaskFactory`] is the seam to
//! the host runtime: [`SpawnTaskFactory`] delegates erased task futures
//! to a host-provided [`Spawn`] impl, while [`TestTaskFactory`] is a
//! single-threaded executor that records spawned tasks and drains them
//! deterministically for tests.

mod factory;
mod handle;
mod test_factory;

pub use factory::{Spawn, SpawnTaskFactory, TaskFactory};
pub use handle::{JoinError, JoinFuture, TaskCompletion, TaskHandle};
pub use test_factory::TestTaskFactory;
