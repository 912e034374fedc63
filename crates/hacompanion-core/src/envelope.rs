// ── Background task envelope ──
//
// Work started from an external trigger may outlive the moment the host
// suspends us. Each unit of work runs inside a *background window* granted
// by a `BackgroundHost`: the window carries an execution budget, is always
// released exactly once, and when it expires the in-flight operation is
// abandoned (its late result discarded) and the caller gets
// `BudgetExhausted`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use strum::Display;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::CoreError;

// ── Results and budgets ──────────────────────────────────────────────

/// Terminal signal for background-fetch style completions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum FetchResult {
    NewData,
    NoData,
    Failed,
}

/// Anything an enveloped operation can report for a fetch-style completion.
pub trait FetchState {
    fn fetch_result(&self) -> FetchResult;
}

impl FetchState for () {
    fn fetch_result(&self) -> FetchResult {
        FetchResult::NewData
    }
}

impl FetchState for bool {
    fn fetch_result(&self) -> FetchResult {
        if *self {
            FetchResult::NewData
        } else {
            FetchResult::NoData
        }
    }
}

impl<T> FetchState for Option<T> {
    fn fetch_result(&self) -> FetchResult {
        if self.is_some() {
            FetchResult::NewData
        } else {
            FetchResult::NoData
        }
    }
}

impl FetchState for FetchResult {
    fn fetch_result(&self) -> FetchResult {
        *self
    }
}

/// Remaining execution time of a background window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Budget {
    deadline: Instant,
}

impl Budget {
    pub fn new(deadline: Instant) -> Self {
        Self { deadline }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left, sampled now.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining().is_zero()
    }
}

// ── Host ─────────────────────────────────────────────────────────────

/// A window granted by the host.
#[derive(Debug, Clone)]
pub struct WindowGrant {
    pub id: Uuid,
    pub budget: Budget,
    /// Cancelled by the host if it reclaims the window before the deadline.
    pub expired: CancellationToken,
}

/// Grants and reclaims background execution windows.
pub trait BackgroundHost: Send + Sync {
    fn begin(&self, name: &str) -> WindowGrant;

    fn end(&self, id: Uuid);
}

#[derive(Debug)]
struct ActiveWindow {
    name: String,
    token: CancellationToken,
}

/// Host that grants every window the same fixed budget and tracks the
/// open ones.
#[derive(Debug)]
pub struct TimedHost {
    budget: Duration,
    windows: DashMap<Uuid, ActiveWindow>,
}

impl TimedHost {
    pub fn new(budget: Duration) -> Self {
        Self {
            budget,
            windows: DashMap::new(),
        }
    }

    pub fn active_count(&self) -> usize {
        self.windows.len()
    }

    pub fn active_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.windows.iter().map(|w| w.name.clone()).collect();
        names.sort();
        names
    }

    /// Reclaim every open window now, as the system does under pressure.
    pub fn expire_all(&self) -> usize {
        let mut expired = 0;
        for window in &self.windows {
            window.token.cancel();
            expired += 1;
        }
        expired
    }
}

impl BackgroundHost for TimedHost {
    fn begin(&self, name: &str) -> WindowGrant {
        let id = Uuid::new_v4();
        let token = CancellationToken::new();
        self.windows.insert(
            id,
            ActiveWindow {
                name: name.to_owned(),
                token: token.clone(),
            },
        );
        debug!(name, %id, budget = ?self.budget, "background window opened");
        WindowGrant {
            id,
            budget: Budget::new(Instant::now() + self.budget),
            expired: token,
        }
    }

    fn end(&self, id: Uuid) {
        if let Some((_, window)) = self.windows.remove(&id) {
            debug!(name = window.name, %id, "background window closed");
        }
    }
}

// ── Window guard ─────────────────────────────────────────────────────

/// An open background window. Released on drop if not released
/// explicitly; never released twice.
pub struct BackgroundWindow {
    host: Option<Arc<dyn BackgroundHost>>,
    grant: WindowGrant,
    name: String,
}

impl BackgroundWindow {
    pub fn open(host: Arc<dyn BackgroundHost>, name: &str) -> Self {
        let grant = host.begin(name);
        Self {
            host: Some(host),
            grant,
            name: name.to_owned(),
        }
    }

    pub fn budget(&self) -> Budget {
        self.grant.budget
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolves when the budget runs out or the host reclaims the window.
    pub async fn expired(&self) {
        tokio::select! {
            () = tokio::time::sleep_until(self.grant.budget.deadline()) => {}
            () = self.grant.expired.cancelled() => {}
        }
    }

    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if let Some(host) = self.host.take() {
            host.end(self.grant.id);
        }
    }
}

impl Drop for BackgroundWindow {
    fn drop(&mut self) {
        self.release_inner();
    }
}

// ── Completion ───────────────────────────────────────────────────────

/// One-shot terminal signal owed to an external caller.
///
/// `complete` consumes the handle, so a second signal is impossible. If the
/// handle is dropped unsignalled, the fallback value is delivered instead.
pub struct Completion<R: Send + 'static> {
    callback: Option<Box<dyn FnOnce(R) + Send>>,
    fallback: Option<R>,
}

impl<R: Send + 'static> Completion<R> {
    pub fn new(callback: impl FnOnce(R) + Send + 'static, fallback: R) -> Self {
        Self {
            callback: Some(Box::new(callback)),
            fallback: Some(fallback),
        }
    }

    /// A completion whose signal arrives on the returned receiver.
    pub fn channel(fallback: R) -> (Self, oneshot::Receiver<R>) {
        let (tx, rx) = oneshot::channel();
        let completion = Self::new(
            move |value| {
                let _ = tx.send(value);
            },
            fallback,
        );
        (completion, rx)
    }

    /// A completion nobody listens to.
    pub fn detached(fallback: R) -> Self {
        Self::new(|_| {}, fallback)
    }

    pub fn complete(mut self, value: R) {
        self.fallback = None;
        if let Some(callback) = self.callback.take() {
            callback(value);
        }
    }
}

impl<R: Send + 'static> Drop for Completion<R> {
    fn drop(&mut self) {
        if let (Some(callback), Some(fallback)) = (self.callback.take(), self.fallback.take()) {
            warn!("completion dropped without a signal; delivering fallback");
            callback(fallback);
        }
    }
}

impl<R: Send + 'static> std::fmt::Debug for Completion<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("pending", &self.callback.is_some())
            .finish()
    }
}

// ── Envelope ─────────────────────────────────────────────────────────

/// Runs operations inside background windows.
#[derive(Clone)]
pub struct BackgroundEnvelope {
    host: Arc<dyn BackgroundHost>,
}

impl BackgroundEnvelope {
    pub fn new(host: Arc<dyn BackgroundHost>) -> Self {
        Self { host }
    }

    pub fn host(&self) -> &Arc<dyn BackgroundHost> {
        &self.host
    }

    /// Run `operation` inside a window called `name`.
    ///
    /// The operation receives the window's budget. It runs on its own task:
    /// if the window expires first, the task is left to finish on its own,
    /// its result is discarded, and `BudgetExhausted` is returned. Anything
    /// the operation still owes its caller (telemetry, say) must be settled
    /// by the caller on that path. The window is released exactly once on
    /// every path.
    pub async fn run<F, Fut, T>(&self, name: &str, operation: F) -> Result<T, CoreError>
    where
        F: FnOnce(Budget) -> Fut,
        Fut: Future<Output = Result<T, CoreError>> + Send + 'static,
        T: Send + 'static,
    {
        let window = BackgroundWindow::open(Arc::clone(&self.host), name);
        let mut task = tokio::spawn(operation(window.budget()));

        let result = tokio::select! {
            biased;
            joined = &mut task => match joined {
                Ok(result) => result,
                Err(e) => Err(CoreError::Internal(format!("background task '{name}' failed: {e}"))),
            },
            () = window.expired() => {
                warn!(name, "background window expired; discarding in-flight result");
                Err(CoreError::BudgetExhausted { name: name.to_owned() })
            }
        };

        window.release();
        result
    }

    /// Run `operation` and deliver a [`FetchResult`] through `completion`.
    ///
    /// Success maps through [`FetchState`]; any error (including budget
    /// expiry) maps to `Failed`.
    pub async fn run_with_completion<F, Fut, T>(
        &self,
        name: &str,
        completion: Completion<FetchResult>,
        operation: F,
    ) -> FetchResult
    where
        F: FnOnce(Budget) -> Fut,
        Fut: Future<Output = Result<T, CoreError>> + Send + 'static,
        T: FetchState + Send + 'static,
    {
        self.run_reporting(name, completion, operation, |_| async {})
            .await
    }

    /// Like [`run_with_completion`](Self::run_with_completion), but awaits
    /// `on_failure` with the error before `Failed` is signalled.
    pub async fn run_reporting<F, Fut, T, H, HFut>(
        &self,
        name: &str,
        completion: Completion<FetchResult>,
        operation: F,
        on_failure: H,
    ) -> FetchResult
    where
        F: FnOnce(Budget) -> Fut,
        Fut: Future<Output = Result<T, CoreError>> + Send + 'static,
        T: FetchState + Send + 'static,
        H: FnOnce(CoreError) -> HFut,
        HFut: Future<Output = ()>,
    {
        let result = match self.run(name, operation).await {
            Ok(state) => state.fetch_result(),
            Err(e) => {
                warn!(name, error = %e, "background operation failed");
                on_failure(e).await;
                FetchResult::Failed
            }
        };
        debug!(name, %result, "signalling completion");
        completion.complete(result);
        result
    }
}

impl std::fmt::Debug for BackgroundEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundEnvelope").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    fn envelope(budget: Duration) -> (Arc<TimedHost>, BackgroundEnvelope) {
        let host = Arc::new(TimedHost::new(budget));
        let envelope = BackgroundEnvelope::new(host.clone());
        (host, envelope)
    }

    #[tokio::test(start_paused = true)]
    async fn completes_within_budget_and_releases() {
        let (host, envelope) = envelope(Duration::from_secs(30));
        let value = envelope
            .run("quick", |budget| async move {
                assert!(budget.remaining() <= Duration::from_secs(30));
                Ok(7)
            })
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(host.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_discards_late_result() {
        let (host, envelope) = envelope(Duration::from_secs(2));
        let finished = Arc::new(AtomicBool::new(false));

        let result = envelope
            .run("slow", {
                let finished = Arc::clone(&finished);
                move |_| async move {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    finished.store(true, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await;

        assert!(matches!(result, Err(CoreError::BudgetExhausted { ref name }) if name == "slow"));
        assert_eq!(host.active_count(), 0);

        // The operation keeps running detached.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn host_reclaim_counts_as_expiry() {
        let (host, envelope) = envelope(Duration::from_secs(60));
        let run = tokio::spawn({
            let envelope = envelope.clone();
            async move {
                envelope
                    .run("reclaimed", |_| async {
                        tokio::time::sleep(Duration::from_secs(30)).await;
                        Ok(())
                    })
                    .await
            }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(host.active_names(), vec!["reclaimed".to_owned()]);
        assert_eq!(host.expire_all(), 1);

        assert!(matches!(
            run.await.unwrap(),
            Err(CoreError::BudgetExhausted { .. })
        ));
        assert_eq!(host.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn completion_maps_fetch_state() {
        let (_host, envelope) = envelope(Duration::from_secs(30));

        let (completion, rx) = Completion::channel(FetchResult::Failed);
        let result = envelope
            .run_with_completion("fetch", completion, |_| async { Ok(false) })
            .await;
        assert_eq!(result, FetchResult::NoData);
        assert_eq!(rx.await.unwrap(), FetchResult::NoData);

        let (completion, rx) = Completion::channel(FetchResult::NoData);
        envelope
            .run_with_completion("fetch", completion, |_| async {
                Err::<(), _>(CoreError::Unauthenticated)
            })
            .await;
        assert_eq!(rx.await.unwrap(), FetchResult::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_hook_runs_before_the_signal() {
        let (_host, envelope) = envelope(Duration::from_secs(1));
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let completion = Completion::new(
            {
                let order = Arc::clone(&order);
                move |result: FetchResult| order.lock().unwrap().push(format!("signal {result}"))
            },
            FetchResult::NewData,
        );

        let result = envelope
            .run_reporting(
                "fetch",
                completion,
                |_| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(())
                },
                |e| {
                    let order = Arc::clone(&order);
                    async move { order.lock().unwrap().push(format!("hook {}", e.kind())) }
                },
            )
            .await;

        assert_eq!(result, FetchResult::Failed);
        assert_eq!(
            *order.lock().unwrap(),
            vec!["hook budget_exhausted".to_owned(), "signal failed".to_owned()]
        );
    }

    #[test]
    fn dropped_completion_delivers_fallback() {
        let (completion, mut rx) = Completion::channel(FetchResult::Failed);
        drop(completion);
        assert_eq!(rx.try_recv().unwrap(), FetchResult::Failed);
    }

    #[test]
    fn completed_signal_is_not_followed_by_fallback() {
        let calls = Arc::new(std::sync::Mutex::new(Vec::new()));
        let completion = Completion::new(
            {
                let calls = Arc::clone(&calls);
                move |value| calls.lock().unwrap().push(value)
            },
            FetchResult::Failed,
        );
        completion.complete(FetchResult::NewData);
        assert_eq!(*calls.lock().unwrap(), vec![FetchResult::NewData]);
    }
}
