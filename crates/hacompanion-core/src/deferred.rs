// ── Deferred values ──
//
// A single-slot value that starts unresolved, can be awaited by any number
// of tasks, and can later be replaced or reset. Waiters registered before
// the first resolution all observe that first value.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;

/// What a call to [`Deferred::resolve`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The slot was pending; `woken` waiters received the value.
    Fulfilled { woken: usize },
    /// The slot was already resolved; the value was swapped silently.
    Replaced,
}

struct State<T> {
    value: Option<T>,
    waiters: Vec<oneshot::Sender<T>>,
}

/// Awaitable, replaceable single-value slot.
pub struct Deferred<T> {
    state: Mutex<State<T>>,
}

impl<T: Clone> Deferred<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                value: None,
                waiters: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_resolved(&self) -> bool {
        self.lock().value.is_some()
    }

    /// Current value without waiting.
    pub fn get(&self) -> Option<T> {
        self.lock().value.clone()
    }

    /// Fulfil the slot if pending, otherwise replace the value in place.
    ///
    /// Replacement never notifies anyone: only waiters that were pending at
    /// the moment of first fulfilment are woken, and they get that value.
    pub fn resolve(&self, value: T) -> Resolution {
        let mut state = self.lock();
        if state.value.is_some() {
            state.value = Some(value);
            return Resolution::Replaced;
        }

        let waiters = std::mem::take(&mut state.waiters);
        state.value = Some(value.clone());
        drop(state);

        let mut woken = 0;
        for waiter in waiters {
            if waiter.send(value.clone()).is_ok() {
                woken += 1;
            }
        }
        Resolution::Fulfilled { woken }
    }

    /// Return the slot to the pending state, yielding the previous value.
    pub fn reset(&self) -> Option<T> {
        self.lock().value.take()
    }

    /// Wait until the slot holds a value.
    pub async fn wait(&self) -> T {
        loop {
            let rx = {
                let mut state = self.lock();
                if let Some(value) = &state.value {
                    return value.clone();
                }
                state.waiters.retain(|tx| !tx.is_closed());
                let (tx, rx) = oneshot::channel();
                state.waiters.push(tx);
                rx
            };
            if let Ok(value) = rx.await {
                return value;
            }
        }
    }

    /// Like [`wait`](Self::wait), giving up after `timeout`.
    pub async fn wait_timeout(&self, timeout: Duration) -> Option<T> {
        tokio::time::timeout(timeout, self.wait()).await.ok()
    }
}

impl<T: Clone> Default for Deferred<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("Deferred")
            .field("resolved", &state.value.is_some())
            .field("waiters", &state.waiters.len())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn pending_waiters_observe_first_value() {
        let slot = Arc::new(Deferred::<u32>::new());

        let a = tokio::spawn({
            let slot = Arc::clone(&slot);
            async move { slot.wait().await }
        });
        let b = tokio::spawn({
            let slot = Arc::clone(&slot);
            async move { slot.wait().await }
        });
        tokio::task::yield_now().await;

        assert_eq!(slot.resolve(1), Resolution::Fulfilled { woken: 2 });
        assert_eq!(slot.resolve(2), Resolution::Replaced);

        assert_eq!(a.await.unwrap(), 1);
        assert_eq!(b.await.unwrap(), 1);
        assert_eq!(slot.wait().await, 2);
    }

    #[tokio::test]
    async fn reset_makes_slot_pending_again() {
        let slot = Deferred::new();
        slot.resolve("first");
        assert_eq!(slot.reset(), Some("first"));
        assert!(!slot.is_resolved());
        assert!(slot.get().is_none());

        assert_eq!(slot.resolve("second"), Resolution::Fulfilled { woken: 0 });
        assert_eq!(slot.wait().await, "second");
    }

    #[tokio::test(start_paused = true)]
    async fn wait_timeout_gives_up() {
        let slot = Deferred::<u8>::new();
        assert_eq!(slot.wait_timeout(Duration::from_secs(5)).await, None);
        // The abandoned waiter is pruned and not counted as woken.
        assert_eq!(slot.resolve(9), Resolution::Fulfilled { woken: 0 });
    }
}
