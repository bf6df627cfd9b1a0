//! One-shot continuation: a suspension point resumed exactly once.

use crate::error::Result;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

#[derive(Debug)]
enum SlotState<T> {
    /// Not yet resumed; holds the waker of the suspended task, if polled.
    Pending { waker: Option<Waker> },
    /// Resumed; the result waits for the suspended task to pick it up.
    Resolved(Result<T>),
    /// The suspended task took the result.
    Consumed,
}

#[derive(Debug)]
struct Slot<T> {
    state: Mutex<SlotState<T>>,
}

impl<T> Slot<T> {
    fn lock(&self) -> std::sync::MutexGuard<'_, SlotState<T>> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Creates a one-shot suspension point.
///
/// Returns the resume half and the future half. The future resolves with
/// whatever the first successful [`Continuation::resume`] supplies.
#[must_use]
pub fn continuation<T>() -> (Continuation<T>, Suspended<T>) {
    let slot = Arc::new(Slot {
        state: Mutex::new(SlotState::Pending { waker: None }),
    });
    (
        Continuation {
            slot: Arc::clone(&slot),
        },
        Suspended { slot },
    )
}

/// The resume half of a one-shot suspension point.
///
/// Clones share the same slot; the first `resume` across all clones wins
/// and later attempts report `false`. The bridging state machines use the
/// [`CancellableRegistry`](crate::cancel::CancellableRegistry) to ensure
/// only one holder ever attempts to resume, so a `false` return there
/// indicates a logic error upstream.
#[derive(Debug)]
pub struct Continuation<T> {
    slot: Arc<Slot<T>>,
}

impl<T> Clone for Continuation<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> Continuation<T> {
    /// Resumes the suspended task with `result`.
    ///
    /// Returns `true` if this call resolved the suspension, `false` if it
    /// was already resolved. The waker is invoked after the slot lock is
    /// released.
    pub fn resume(&self, result: Result<T>) -> bool {
        let waker = {
            let mut state = self.slot.lock();
            match &mut *state {
                SlotState::Pending { waker } => {
                    let waker = waker.take();
                    *state = SlotState::Resolved(result);
                    waker
                }
                SlotState::Resolved(_) | SlotState::Consumed => return false,
            }
        };
        if let Some(waker) = waker {
            waker.wake();
        }
        true
    }
}

/// The future half of a one-shot suspension point.
///
/// Resolves with the result supplied to [`Continuation::resume`]. Polling
/// after completion returns `Pending` forever; the slot is consumed.
#[derive(Debug)]
pub struct Suspended<T> {
    slot: Arc<Slot<T>>,
}

impl<T> Future for Suspended<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.slot.lock();
        if let SlotState::Pending { waker } = &mut *state {
            match waker {
                Some(existing) => existing.clone_from(cx.waker()),
                None => *waker = Some(cx.waker().clone()),
            }
            return Poll::Pending;
        }
        match std::mem::replace(&mut *state, SlotState::Consumed) {
            SlotState::Resolved(result) => Poll::Ready(result),
            SlotState::Pending { .. } => unreachable!("checked above"),
            SlotState::Consumed => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, ErrorKind};
    use crate::test_utils::block_on;

    #[test]
    fn resume_before_await() {
        let (k, suspended) = continuation::<i32>();
        assert!(k.resume(Ok(7)));
        let value = block_on(suspended).expect("resumed with value");
        assert_eq!(value, 7);
    }

    #[test]
    fn resume_from_another_thread() {
        let (k, suspended) = continuation::<&'static str>();
        let thread = std::thread::spawn(move || {
            assert!(k.resume(Ok("done")));
        });
        let value = block_on(suspended).expect("resumed with value");
        assert_eq!(value, "done");
        thread.join().expect("resume thread panicked");
    }

    #[test]
    fn second_resume_loses() {
        let (k, suspended) = continuation::<i32>();
        let other = k.clone();
        assert!(k.resume(Ok(1)));
        assert!(!other.resume(Ok(2)));
        let value = block_on(suspended).expect("first resume wins");
        assert_eq!(value, 1);
    }

    #[test]
    fn resume_with_failure() {
        let (k, suspended) = continuation::<i32>();
        assert!(k.resume(Err(Error::new(ErrorKind::Cancelled))));
        let err = block_on(suspended).expect_err("resumed with failure");
        assert!(err.is_cancelled());
    }
}
