// ── Background transfer sessions ──
//
// Webhook uploads queued while backgrounded run on named sessions. When the
// host reports that a session finished its events, the registry lets the
// handler wait until every in-flight request on that session has settled.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;
use tracing::debug;

use crate::router::RouterError;

const WEBHOOK_SESSION_PREFIX: &str = "hacompanion.webhook.";

/// Identifier of the session carrying webhook calls for `webhook_id`.
pub fn webhook_session(webhook_id: &str) -> String {
    format!("{WEBHOOK_SESSION_PREFIX}{webhook_id}")
}

#[derive(Debug)]
struct SessionState {
    in_flight: watch::Sender<usize>,
}

/// Live sessions keyed by identifier.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<SessionState>>,
}

/// Marks one request in flight on a session. Dropping it settles the
/// request.
#[derive(Debug)]
pub struct SessionTicket {
    state: Arc<SessionState>,
}

impl Drop for SessionTicket {
    fn drop(&mut self) {
        self.state.in_flight.send_modify(|n| *n = n.saturating_sub(1));
    }
}

impl SessionRegistry {
    /// Register a session. Re-registering an existing identifier keeps its
    /// in-flight count.
    pub fn register(&self, identifier: impl Into<String>) {
        let identifier = identifier.into();
        self.sessions.entry(identifier.clone()).or_insert_with(|| {
            debug!(identifier, "registered background session");
            let (in_flight, _) = watch::channel(0);
            Arc::new(SessionState { in_flight })
        });
    }

    pub fn is_live(&self, identifier: &str) -> bool {
        self.sessions.contains_key(identifier)
    }

    pub fn in_flight(&self, identifier: &str) -> Option<usize> {
        self.sessions
            .get(identifier)
            .map(|state| *state.in_flight.borrow())
    }

    /// Start tracking a request on `identifier`. `None` if the session is
    /// unknown.
    pub fn begin_request(&self, identifier: &str) -> Option<SessionTicket> {
        let state = Arc::clone(self.sessions.get(identifier)?.value());
        state.in_flight.send_modify(|n| *n += 1);
        Some(SessionTicket { state })
    }

    /// Wait until no request is in flight on `identifier`.
    pub async fn drain(&self, identifier: &str) -> Result<(), RouterError> {
        let state = self
            .sessions
            .get(identifier)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| RouterError::UnknownSession(identifier.to_owned()))?;

        let mut rx = state.in_flight.subscribe();
        // The sender lives in `state`, so the channel cannot close here.
        let _ = rx.wait_for(|n| *n == 0).await;
        debug!(identifier, "background session drained");
        Ok(())
    }

    pub fn remove(&self, identifier: &str) -> bool {
        self.sessions.remove(identifier).is_some()
    }
}

/// A registered session that a remote tracks its requests on.
#[derive(Debug, Clone)]
pub struct TrackedSession {
    registry: Arc<SessionRegistry>,
    identifier: String,
}

impl TrackedSession {
    /// Register `identifier` on `registry` and track requests against it.
    pub fn register(registry: Arc<SessionRegistry>, identifier: impl Into<String>) -> Self {
        let identifier = identifier.into();
        registry.register(identifier.clone());
        Self {
            registry,
            identifier,
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Mark a request in flight until the ticket drops. `None` once the
    /// session has been removed.
    pub fn begin(&self) -> Option<SessionTicket> {
        self.registry.begin_request(&self.identifier)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn drain_waits_for_tickets() {
        let registry = Arc::new(SessionRegistry::default());
        registry.register("webhook");

        let ticket = registry.begin_request("webhook").unwrap();
        assert_eq!(registry.in_flight("webhook"), Some(1));

        let drained = tokio::spawn({
            let registry = Arc::clone(&registry);
            async move { registry.drain("webhook").await }
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!drained.is_finished());

        drop(ticket);
        drained.await.unwrap().unwrap();
        assert_eq!(registry.in_flight("webhook"), Some(0));
    }

    #[test]
    fn tracked_session_counts_its_requests() {
        let registry = Arc::new(SessionRegistry::default());
        let session = TrackedSession::register(Arc::clone(&registry), webhook_session("abc123"));
        assert_eq!(session.identifier(), "hacompanion.webhook.abc123");
        assert!(registry.is_live("hacompanion.webhook.abc123"));

        let first = session.begin().unwrap();
        let second = session.begin().unwrap();
        assert_eq!(registry.in_flight(session.identifier()), Some(2));
        drop(first);
        drop(second);
        assert_eq!(registry.in_flight(session.identifier()), Some(0));

        registry.remove(session.identifier());
        assert!(session.begin().is_none());
    }

    #[tokio::test]
    async fn unknown_session_is_an_error() {
        let registry = SessionRegistry::default();
        assert!(registry.begin_request("nope").is_none());
        assert_eq!(
            registry.drain("nope").await,
            Err(RouterError::UnknownSession("nope".into()))
        );
    }
}
