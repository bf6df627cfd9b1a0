//! Latching task-level cancellation source.

use super::CancelHandle;
use crate::types::CancelReason;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};

#[derive(Debug)]
struct SignalInner {
    reason: Option<CancelReason>,
    hooks: BTreeMap<u64, CancelHandle>,
    next_hook: u64,
}

/// The cancellation source backing a task's [`Cx`](crate::cx::Cx).
///
/// A signal latches on the first [`cancel`](Self::cancel): the reason is
/// recorded, every subscribed hook runs once (in subscription order,
/// outside the lock), and later subscriptions fire immediately. Clones
/// share the same state, so a signal can be held by a task's context and
/// its handle at the same time.
///
/// Hooks subscribed through [`subscribe`](Self::subscribe) are removed
/// when the returned [`HookGuard`] drops, so short-lived operations do not
/// accumulate dead hooks on long-lived tasks.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    inner: Arc<Mutex<SignalInner>>,
}

impl CancelSignal {
    /// Creates a signal in the not-cancelled state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(SignalInner {
                reason: None,
                hooks: BTreeMap::new(),
                next_hook: 0,
            })),
        }
    }

    /// Returns true once the signal has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.lock().reason.is_some()
    }

    /// Returns the latched cancellation reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<CancelReason> {
        self.lock().reason
    }

    /// Latches cancellation and runs every subscribed hook.
    ///
    /// Only the first call latches a reason; subsequent calls are no-ops.
    /// Hooks run after the lock is released, in subscription order.
    pub fn cancel(&self, reason: CancelReason) {
        let hooks: Vec<CancelHandle> = {
            let mut inner = self.lock();
            if inner.reason.is_some() {
                return;
            }
            inner.reason = Some(reason);
            let drained = std::mem::take(&mut inner.hooks);
            drained.into_values().collect()
        };
        for hook in hooks {
            hook.cancel();
        }
    }

    /// Subscribes a hook to run on cancellation.
    ///
    /// If the signal is already cancelled the hook runs immediately
    /// (outside the lock) and the returned guard is inert. Dropping the
    /// guard deregisters the hook.
    pub fn subscribe(&self, hook: CancelHandle) -> HookGuard {
        let id = {
            let mut inner = self.lock();
            if inner.reason.is_some() {
                None
            } else {
                let id = inner.next_hook;
                inner.next_hook += 1;
                inner.hooks.insert(id, hook.clone());
                Some(id)
            }
        };
        match id {
            Some(id) => HookGuard {
                inner: Arc::downgrade(&self.inner),
                id: Some(id),
            },
            None => {
                hook.cancel();
                HookGuard {
                    inner: Weak::new(),
                    id: None,
                }
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SignalInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Deregisters a subscribed cancellation hook on drop.
#[derive(Debug)]
#[must_use = "dropping the guard immediately deregisters the hook"]
pub struct HookGuard {
    inner: Weak<Mutex<SignalInner>>,
    id: Option<u64>,
}

impl Drop for HookGuard {
    fn drop(&mut self) {
        if let (Some(inner), Some(id)) = (self.inner.upgrade(), self.id.take()) {
            let mut guard = match inner.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.hooks.remove(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CancelKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_hook(count: &Arc<AtomicUsize>) -> CancelHandle {
        let counted = Arc::clone(count);
        CancelHandle::new(move || {
            counted.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn cancel_latches_reason() {
        let signal = CancelSignal::new();
        assert!(!signal.is_cancelled());
        signal.cancel(CancelReason::user("first"));
        signal.cancel(CancelReason::user("second"));
        let reason = signal.reason().expect("reason latched");
        assert_eq!(reason.kind, CancelKind::User);
        assert_eq!(reason.message, Some("first"));
    }

    #[test]
    fn hooks_run_once_in_subscription_order() {
        let signal = CancelSignal::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let guards: Vec<_> = (0..3)
            .map(|i| {
                let order = Arc::clone(&order);
                signal.subscribe(CancelHandle::new(move || {
                    order.lock().expect("order poisoned").push(i);
                }))
            })
            .collect();
        signal.cancel(CancelReason::user("go"));
        signal.cancel(CancelReason::user("again"));
        assert_eq!(*order.lock().expect("order poisoned"), vec![0, 1, 2]);
        drop(guards);
    }

    #[test]
    fn clones_share_cancellation_state() {
        let signal = CancelSignal::new();
        let clone = signal.clone();
        clone.cancel(CancelReason::user("shared"));
        assert!(signal.is_cancelled());
    }

    #[test]
    fn subscribe_after_cancel_fires_immediately() {
        let signal = CancelSignal::new();
        signal.cancel(CancelReason::user("done"));
        let count = Arc::new(AtomicUsize::new(0));
        let _guard = signal.subscribe(counting_hook(&count));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropped_guard_deregisters_hook() {
        let signal = CancelSignal::new();
        let count = Arc::new(AtomicUsize::new(0));
        {
            let _guard = signal.subscribe(counting_hook(&count));
        }
        signal.cancel(CancelReason::user("late"));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn guard_survives_signal_drop() {
        let count = Arc::new(AtomicUsize::new(0));
        let guard = {
            let signal = CancelSignal::new();
            signal.subscribe(counting_hook(&count))
        };
        // Signal is gone; dropping the guard must not panic.
        drop(guard);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
