//! Recording session lifecycle transitions.

use std::sync::Arc;

use matchwork_core::{Session, SessionId, SessionStatus, StatusEvent};
use matchwork_events::{StatusPublisher, publish_best_effort};
use tracing::warn;

use crate::store::SessionStore;

/// Writes each transition to the store and publishes it as an event.
///
/// Both halves are best-effort: failures are logged and the caller carries on.
#[derive(Clone)]
pub struct StatusReporter {
    publisher: Arc<dyn StatusPublisher>,
    store: Arc<dyn SessionStore>,
}

impl StatusReporter {
    pub fn new(publisher: Arc<dyn StatusPublisher>, store: Arc<dyn SessionStore>) -> Self {
        Self { publisher, store }
    }

    pub async fn transition(&self, session_id: SessionId, status: SessionStatus) {
        if let Err(e) = self.store.update_session_status(session_id, &status).await {
            warn!(
                session_id = %session_id,
                status = %status,
                error = %e,
                "failed to store session status"
            );
        }
        publish_best_effort(&*self.publisher, &StatusEvent::for_status(session_id, status)).await;
    }

    /// Report a message body that could not be decoded as a session.
    ///
    /// The stored status is only touched when an id can be recovered from the
    /// body; the event is published either way, under the nil id if need be.
    pub async fn rejected(&self, body: &[u8]) -> Option<SessionId> {
        let recovered = Session::recover_id(body);
        let session_id = match recovered {
            Some(id) => {
                if let Err(e) = self.store.update_session_status(id, &SessionStatus::Failed).await {
                    warn!(session_id = %id, error = %e, "failed to store session status");
                }
                id
            }
            None => SessionId::nil(),
        };
        publish_best_effort(&*self.publisher, &StatusEvent::failed(session_id)).await;
        recovered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemorySessionStore;
    use matchwork_events::StatusBroadcaster;

    #[tokio::test]
    async fn transition_hits_store_and_subscribers() {
        let store = Arc::new(InMemorySessionStore::new());
        let hub = Arc::new(StatusBroadcaster::default());
        let reporter = StatusReporter::new(hub.clone(), store.clone());
        let id = SessionId::new();
        let mut sub = hub.subscribe(id);

        reporter.transition(id, SessionStatus::Processing).await;

        assert_eq!(store.status_history(id), vec![SessionStatus::Processing]);
        let event = sub.try_recv().unwrap();
        assert_eq!(event.message, "analysis started");
    }

    #[tokio::test]
    async fn store_failure_still_publishes() {
        let store = Arc::new(InMemorySessionStore::new());
        store.fail_status_updates();
        let hub = Arc::new(StatusBroadcaster::default());
        let reporter = StatusReporter::new(hub.clone(), store.clone());
        let id = SessionId::new();
        let mut sub = hub.subscribe(id);

        reporter.transition(id, SessionStatus::Completed).await;
        assert_eq!(sub.try_recv().unwrap().status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn rejected_body_with_recoverable_id() {
        let store = Arc::new(InMemorySessionStore::new());
        let hub = Arc::new(StatusBroadcaster::default());
        let reporter = StatusReporter::new(hub.clone(), store.clone());
        let id = SessionId::new();
        let mut sub = hub.subscribe(id);

        let body = format!(r#"{{"id":"{id}","user_id":17}}"#);
        assert_eq!(reporter.rejected(body.as_bytes()).await, Some(id));
        assert_eq!(store.status_history(id), vec![SessionStatus::Failed]);
        assert_eq!(sub.try_recv().unwrap().message, "analysis failed");
    }

    #[tokio::test]
    async fn rejected_garbage_publishes_under_nil() {
        let store = Arc::new(InMemorySessionStore::new());
        let hub = Arc::new(StatusBroadcaster::default());
        let reporter = StatusReporter::new(hub.clone(), store.clone());
        let mut sub = hub.subscribe(SessionId::nil());

        assert_eq!(reporter.rejected(b"\x00garbage").await, None);
        assert!(store.status_history(SessionId::nil()).is_empty());
        assert_eq!(sub.try_recv().unwrap().status, SessionStatus::Failed);
    }
}
