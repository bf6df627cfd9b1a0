//! Three-state registry arbitrating callback-vs-cancel races.
//!
//! ```text
//!              ┌──────────► Cancelled ──┐ (absorbs)
//!    Active ───┤                        │
//!              └──────────► Deactivated ┘ (absorbs)
//! ```
//!
//! The registry is the tie-break at the heart of the continuation bridge:
//! a completing callback claims victory with [`deactivate`], a cancelling
//! task claims it with [`cancel`], and the monotonic state transition
//! guarantees exactly one of them wins.
//!
//! [`deactivate`]: CancellableRegistry::deactivate
//! [`cancel`]: CancellableRegistry::cancel

use super::CancelHandle;
use std::sync::Mutex;

/// Externally observable registry state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryState {
    /// Accepting handles; neither side has won yet.
    Active,
    /// Cancellation won; held handles have been (or are being) invoked.
    Cancelled,
    /// Completion won; held handles were discarded without invocation.
    Deactivated,
}

#[derive(Debug)]
struct RegistryInner {
    state: RegistryState,
    handles: Vec<CancelHandle>,
}

/// An ordered, state-gated list of cancel handles.
///
/// Transitions are monotonic: `Active → Cancelled` and
/// `Active → Deactivated` only. Terminal states absorb further
/// transitions. Once the registry leaves `Active` the list is never
/// appended to: a late [`add`](Self::add) in `Cancelled` cancels the
/// incoming handle on the spot, a late add in `Deactivated` drops it.
///
/// Handles are invoked strictly after the internal lock is released, so a
/// handle whose action re-enters the registry cannot deadlock.
#[derive(Debug)]
pub struct CancellableRegistry {
    inner: Mutex<RegistryInner>,
}

impl CancellableRegistry {
    /// Creates a registry in the `Active` state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                state: RegistryState::Active,
                handles: Vec::new(),
            }),
        }
    }

    /// Adds a handle, returning whether the registry stored it.
    ///
    /// In `Cancelled` the incoming handle is cancelled synchronously
    /// (outside the lock) and `false` is returned. In `Deactivated` the
    /// handle is dropped and `false` is returned.
    pub fn add(&self, handle: CancelHandle) -> bool {
        let state = {
            let mut inner = self.lock();
            match inner.state {
                RegistryState::Active => {
                    inner.handles.push(handle);
                    return true;
                }
                state => state,
            }
        };
        if state == RegistryState::Cancelled {
            handle.cancel();
        }
        false
    }

    /// Cancels the registry and every held handle.
    ///
    /// Transitions `Active → Cancelled`; in any other state this is a
    /// no-op. The handle list is snapshotted under the lock and invoked in
    /// insertion order after the lock is released.
    pub fn cancel(&self) {
        let snapshot = {
            let mut inner = self.lock();
            if inner.state != RegistryState::Active {
                return;
            }
            inner.state = RegistryState::Cancelled;
            std::mem::take(&mut inner.handles)
        };
        for handle in snapshot {
            handle.cancel();
        }
    }

    /// Claims completion, disabling any concurrent cancel.
    ///
    /// Transitions `Active → Deactivated` and returns `true`; in any
    /// other state returns `false`. Held handles are discarded without
    /// being invoked.
    pub fn deactivate(&self) -> bool {
        let mut inner = self.lock();
        if inner.state != RegistryState::Active {
            return false;
        }
        inner.state = RegistryState::Deactivated;
        inner.handles.clear();
        true
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> RegistryState {
        self.lock().state
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for CancellableRegistry {
    fn default() -> Self {
        Self::new()
    }
}
