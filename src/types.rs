//! Core shared types: identifiers, priorities, cancellation reasons.

use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a spawned task.
///
/// Identifiers are allocated from a process-wide counter; they are never
/// reused within a process and carry no structural meaning beyond identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

impl TaskId {
    /// Allocates the next task identifier.
    #[must_use]
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw numeric value, for logging.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Scheduling priority hint forwarded to the host spawner.
///
/// The crate itself never schedules; the value is carried through
/// [`TaskFactory`](crate::task::TaskFactory) verbatim for the host runtime
/// to interpret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(
    /// Raw priority level; higher is more urgent.
    pub u8,
);

impl Priority {
    /// Background work.
    pub const LOW: Self = Self(1);
    /// Default priority.
    pub const NORMAL: Self = Self(2);
    /// Latency-sensitive work.
    pub const HIGH: Self = Self(3);
}

/// The kind of cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelKind {
    /// Explicit cancellation requested by user code.
    User,
    /// The owner of the operation went away before completion.
    Abandoned,
}

/// A structured reason attached to a cancellation request.
///
/// Messages are `&'static str` so reasons stay cheap and deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelReason {
    /// The kind of cancellation.
    pub kind: CancelKind,
    /// Optional human-readable message.
    pub message: Option<&'static str>,
}

impl CancelReason {
    /// Creates a new cancellation reason with the given kind.
    #[must_use]
    pub const fn new(kind: CancelKind) -> Self {
        Self {
            kind,
            message: None,
        }
    }

    /// Creates a user cancellation reason with a message.
    #[must_use]
    pub const fn user(message: &'static str) -> Self {
        Self {
            kind: CancelKind::User,
            message: Some(message),
        }
    }

    /// Creates an abandonment reason with a message.
    #[must_use]
    pub const fn abandoned(message: &'static str) -> Self {
        Self {
            kind: CancelKind::Abandoned,
            message: Some(message),
        }
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message {
            Some(msg) => write!(f, "{:?}: {msg}", self.kind),
            None => write!(f, "{:?}", self.kind),
        }
    }
}

/// Captured description of a task panic.
///
/// The original payload is not carried across the join boundary; a stable
/// textual description is, which keeps handles `Clone` and `Send`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanicPayload(String);

impl PanicPayload {
    /// Creates a panic payload from a description.
    #[must_use]
    pub fn new(description: impl Into<String>) -> Self {
        Self(description.into())
    }
}

impl fmt::Display for PanicPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_ids_are_unique_and_ordered() {
        let a = TaskId::next();
        let b = TaskId::next();
        assert_ne!(a, b);
        assert!(a.as_u64() < b.as_u64());
    }

    #[test]
    fn task_id_display() {
        let id = TaskId::next();
        assert_eq!(id.to_string(), format!("task-{}", id.as_u64()));
    }

    #[test]
    fn priority_ordering() {
        assert!(Priority::LOW < Priority::NORMAL);
        assert!(Priority::NORMAL < Priority::HIGH);
    }

    #[test]
    fn cancel_reason_display() {
        assert_eq!(CancelReason::new(CancelKind::User).to_string(), "User");
        assert_eq!(
            CancelReason::user("stop").to_string(),
            "User: stop"
        );
        assert_eq!(
            CancelReason::abandoned("executor dropped").to_string(),
            "Abandoned: executor dropped"
        );
    }

    #[test]
    fn panic_payload_display() {
        let payload = PanicPayload::new("boom");
        assert_eq!(payload.to_string(), "boom");
    }
}
