// ── Resource broker ──
//
// Gates access to the two late-bound resources every handler needs: the
// authenticated API handle and the primary UI surface. Both are deferred
// slots; handlers await them instead of polling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::deferred::{Deferred, Resolution};
use crate::error::CoreError;
use crate::remote::RemoteApi;
use crate::surface::UiSurface;

pub type ApiHandle = Arc<dyn RemoteApi>;
pub type SurfaceHandle = Arc<dyn UiSurface>;

/// Default time an `api()` caller waits for a pending sign-in to finish.
pub const DEFAULT_API_WAIT: Duration = Duration::from_secs(10);

pub struct ResourceBroker {
    api: Deferred<ApiHandle>,
    surface: Deferred<SurfaceHandle>,
    /// Credentials exist, so a handle is expected even if not yet built.
    credentials_present: AtomicBool,
    api_wait_timeout: Duration,
}

impl ResourceBroker {
    pub fn new(api_wait_timeout: Duration) -> Self {
        Self {
            api: Deferred::new(),
            surface: Deferred::new(),
            credentials_present: AtomicBool::new(false),
            api_wait_timeout,
        }
    }

    // ── API handle ───────────────────────────────────────────────────

    /// Publish a freshly authenticated API handle.
    ///
    /// Pending `api()` callers receive it. If a handle was already
    /// published it is replaced for future callers only.
    pub fn set_api(&self, handle: ApiHandle) {
        self.credentials_present.store(true, Ordering::SeqCst);
        match self.api.resolve(handle) {
            Resolution::Fulfilled { woken } => info!(woken, "API handle available"),
            Resolution::Replaced => debug!("API handle replaced"),
        }
    }

    /// Record that credentials exist and a handle is being built.
    ///
    /// Until this is called (or `set_api`), `api()` fails immediately
    /// instead of waiting.
    pub fn expect_api(&self) {
        self.credentials_present.store(true, Ordering::SeqCst);
    }

    /// Drop the current handle and forget the credentials.
    pub fn invalidate_api(&self) {
        self.credentials_present.store(false, Ordering::SeqCst);
        if self.api.reset().is_some() {
            warn!("API handle invalidated; sign-in required");
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.credentials_present.load(Ordering::SeqCst)
    }

    /// The API handle, waiting up to the configured timeout if sign-in is
    /// still in progress.
    pub async fn api(&self) -> Result<ApiHandle, CoreError> {
        if let Some(handle) = self.api.get() {
            return Ok(handle);
        }
        if !self.is_authenticated() {
            return Err(CoreError::Unauthenticated);
        }
        debug!(timeout = ?self.api_wait_timeout, "waiting for API handle");
        self.api
            .wait_timeout(self.api_wait_timeout)
            .await
            .ok_or(CoreError::Unauthenticated)
    }

    /// The API handle if one is published right now.
    pub fn api_now(&self) -> Option<ApiHandle> {
        self.api.get()
    }

    // ── UI surface ───────────────────────────────────────────────────

    /// Install (`Some`) or tear down (`None`) the primary UI surface.
    pub fn set_ui_surface(&self, surface: Option<SurfaceHandle>) {
        match surface {
            Some(surface) => {
                if let Resolution::Fulfilled { woken } = self.surface.resolve(surface) {
                    debug!(woken, "UI surface ready");
                }
            }
            None => {
                if self.surface.reset().is_some() {
                    debug!("UI surface torn down");
                }
            }
        }
    }

    /// Wait for the UI surface. There is no timeout: consumers run in
    /// detached tasks.
    pub async fn ui_surface(&self) -> SurfaceHandle {
        self.surface.wait().await
    }

    pub fn ui_surface_now(&self) -> Option<SurfaceHandle> {
        self.surface.get()
    }
}

impl Default for ResourceBroker {
    fn default() -> Self {
        Self::new(DEFAULT_API_WAIT)
    }
}

impl std::fmt::Debug for ResourceBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceBroker")
            .field("api", &self.api)
            .field("surface", &self.surface)
            .field("authenticated", &self.is_authenticated())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::recording::RecordingRemote;

    #[tokio::test]
    async fn api_fails_fast_without_credentials() {
        let broker = ResourceBroker::new(Duration::from_secs(30));
        let err = broker.api().await.err().unwrap();
        assert!(matches!(err, CoreError::Unauthenticated));
    }

    #[tokio::test(start_paused = true)]
    async fn api_waits_for_pending_sign_in() {
        let broker = Arc::new(ResourceBroker::new(Duration::from_secs(30)));
        broker.expect_api();

        let waiter = tokio::spawn({
            let broker = Arc::clone(&broker);
            async move { broker.api().await }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;

        let remote = Arc::new(RecordingRemote::default());
        broker.set_api(remote.clone());
        let handle = waiter.await.unwrap().unwrap();
        assert_eq!(
            Arc::as_ptr(&handle).cast::<()>(),
            Arc::as_ptr(&remote).cast::<()>()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn api_wait_times_out() {
        let broker = ResourceBroker::new(Duration::from_secs(5));
        broker.expect_api();
        let err = broker.api().await.err().unwrap();
        assert!(matches!(err, CoreError::Unauthenticated));
    }

    #[tokio::test]
    async fn invalidate_returns_to_unauthenticated() {
        let broker = ResourceBroker::default();
        broker.set_api(Arc::new(RecordingRemote::default()));
        assert!(broker.api_now().is_some());

        broker.invalidate_api();
        assert!(broker.api_now().is_none());
        assert!(!broker.is_authenticated());
        assert!(broker.api().await.is_err());
    }
}
