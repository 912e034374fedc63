// ── Periodic update scheduler ──
//
// Owns the single non-repeating keep-alive timer. Arming is refused while
// a timer is pending, while backgrounded, or when no interval is set. The
// fired callback typically re-arms by reconnecting, which makes the cadence
// self-sustaining only while the app stays in the foreground.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    Idle,
    Scheduled { fire_at: Instant, interval: Duration },
}

/// Result of an arming attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmDecision {
    Armed,
    AlreadyScheduled,
    Backgrounded,
    Disabled,
}

#[derive(Debug, Default)]
struct TimerSlot {
    /// Bumped on every arm and invalidation; a timer only fires if its
    /// generation is still current when it takes the slot lock.
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

#[derive(Debug)]
pub struct PeriodicScheduler {
    state: Arc<watch::Sender<TimerState>>,
    timer: Arc<Mutex<TimerSlot>>,
}

impl Default for PeriodicScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl PeriodicScheduler {
    pub fn new() -> Self {
        let (state, _) = watch::channel(TimerState::Idle);
        Self {
            state: Arc::new(state),
            timer: Arc::new(Mutex::new(TimerSlot::default())),
        }
    }

    fn lock_timer(&self) -> MutexGuard<'_, TimerSlot> {
        lock_slot(&self.timer)
    }

    pub fn state(&self) -> TimerState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<TimerState> {
        self.state.subscribe()
    }

    /// Arm a one-shot timer that runs `on_fire` after `interval`.
    pub fn arm<F, Fut>(
        &self,
        interval: Option<Duration>,
        backgrounded: bool,
        on_fire: F,
    ) -> ArmDecision
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut slot = self.lock_timer();

        if matches!(self.state(), TimerState::Scheduled { .. }) {
            debug!("periodic update already scheduled");
            return ArmDecision::AlreadyScheduled;
        }
        if backgrounded {
            debug!("not scheduling periodic update while backgrounded");
            return ArmDecision::Backgrounded;
        }
        let Some(interval) = interval.filter(|i| !i.is_zero()) else {
            debug!("periodic updates disabled");
            return ArmDecision::Disabled;
        };

        slot.generation += 1;
        let generation = slot.generation;
        let fire_at = Instant::now() + interval;
        self.state
            .send_replace(TimerState::Scheduled { fire_at, interval });

        let state = Arc::clone(&self.state);
        let timer = Arc::clone(&self.timer);
        slot.handle = Some(tokio::spawn(async move {
            tokio::time::sleep_until(fire_at).await;
            {
                // Checked and cleared under the lock, so an invalidation
                // (or a re-arm) either wins outright or sees the timer gone.
                let mut slot = lock_slot(&timer);
                if slot.generation != generation {
                    return;
                }
                slot.handle = None;
                state.send_replace(TimerState::Idle);
            }
            info!("periodic update timer fired");
            on_fire().await;
        }));
        debug!(?interval, "periodic update scheduled");
        ArmDecision::Armed
    }

    /// Cancel the pending timer, if any. Returns whether one was pending.
    pub fn invalidate(&self) -> bool {
        let mut slot = self.lock_timer();
        slot.generation += 1;
        let was_scheduled = matches!(
            self.state.send_replace(TimerState::Idle),
            TimerState::Scheduled { .. }
        );
        // A fired timer has already cleared its handle and may be running
        // its callback.
        if let Some(handle) = slot.handle.take() {
            handle.abort();
        }
        if was_scheduled {
            debug!("periodic update timer invalidated");
        }
        was_scheduled
    }
}

fn lock_slot(timer: &Mutex<TimerSlot>) -> MutexGuard<'_, TimerSlot> {
    timer.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn counter() -> (Arc<AtomicUsize>, impl FnOnce() -> std::future::Ready<()> + Send + 'static) {
        let fired = Arc::new(AtomicUsize::new(0));
        let callback = {
            let fired = Arc::clone(&fired);
            move || {
                fired.fetch_add(1, Ordering::SeqCst);
                std::future::ready(())
            }
        };
        (fired, callback)
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_after_interval() {
        let scheduler = PeriodicScheduler::new();
        let (fired, callback) = counter();

        let decision = scheduler.arm(Some(Duration::from_secs(60)), false, callback);
        assert_eq!(decision, ArmDecision::Armed);
        assert!(matches!(scheduler.state(), TimerState::Scheduled { interval, .. } if interval == Duration::from_secs(60)));

        let (_, second) = counter();
        assert_eq!(
            scheduler.arm(Some(Duration::from_secs(60)), false, second),
            ArmDecision::AlreadyScheduled
        );

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.state(), TimerState::Idle);

        // Non-repeating.
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn invalidate_prevents_firing() {
        let scheduler = PeriodicScheduler::new();
        let (fired, callback) = counter();
        scheduler.arm(Some(Duration::from_secs(30)), false, callback);

        assert!(scheduler.invalidate());
        assert!(!scheduler.invalidate());
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn refuses_when_backgrounded_or_disabled() {
        let scheduler = PeriodicScheduler::new();
        let (_, a) = counter();
        let (_, b) = counter();
        let (_, c) = counter();
        assert_eq!(
            scheduler.arm(Some(Duration::from_secs(30)), true, a),
            ArmDecision::Backgrounded
        );
        assert_eq!(scheduler.arm(None, false, b), ArmDecision::Disabled);
        assert_eq!(scheduler.arm(Some(Duration::ZERO), false, c), ArmDecision::Disabled);
        assert_eq!(scheduler.state(), TimerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn rearm_after_invalidate_fires_only_new_timer() {
        let scheduler = PeriodicScheduler::new();
        let (stale, first) = counter();
        let (fresh, second) = counter();
        scheduler.arm(Some(Duration::from_secs(30)), false, first);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(scheduler.invalidate());
        assert_eq!(
            scheduler.arm(Some(Duration::from_secs(30)), false, second),
            ArmDecision::Armed
        );

        // Past the first deadline: the stale timer must not clobber the new state.
        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(stale.load(Ordering::SeqCst), 0);
        assert!(matches!(scheduler.state(), TimerState::Scheduled { .. }));

        tokio::time::sleep(Duration::from_secs(16)).await;
        assert_eq!(stale.load(Ordering::SeqCst), 0);
        assert_eq!(fresh.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.state(), TimerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn invalidate_after_firing_reports_nothing_pending() {
        let scheduler = PeriodicScheduler::new();
        let (fired, callback) = counter();
        scheduler.arm(Some(Duration::from_secs(10)), false, callback);

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!scheduler.invalidate());
        assert!(scheduler.lock_timer().handle.is_none());
    }
}
