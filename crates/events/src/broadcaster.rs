//! In-process, per-session fan-out of status events.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use matchwork_core::{SessionId, StatusEvent};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::publisher::{PublishError, StatusPublisher};

pub const DEFAULT_BUFFER: usize = 16;

#[derive(Debug)]
struct Subscriber {
    id: u64,
    tx: mpsc::Sender<StatusEvent>,
}

/// Receiving end handed out by [`StatusBroadcaster::subscribe`].
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    session_id: SessionId,
    rx: mpsc::Receiver<StatusEvent>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Wait for the next event. `None` once the subscription was removed.
    pub async fn recv(&mut self) -> Option<StatusEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<StatusEvent> {
        self.rx.try_recv().ok()
    }

    pub fn into_stream(self) -> ReceiverStream<StatusEvent> {
        ReceiverStream::new(self.rx)
    }
}

/// Session-keyed broadcast hub.
///
/// Reads (every publish) take the shared lock; subscribe, unsubscribe and
/// pruning take the exclusive one. Each subscriber has a bounded buffer and a
/// full buffer drops the event for that subscriber only, so a slow listener
/// never stalls a worker.
#[derive(Debug)]
pub struct StatusBroadcaster {
    subscribers: RwLock<HashMap<SessionId, Vec<Subscriber>>>,
    buffer: usize,
    next_id: AtomicU64,
    dropped: AtomicU64,
}

impl Default for StatusBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER)
    }
}

impl StatusBroadcaster {
    pub fn new(buffer: usize) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            buffer: buffer.max(1),
            next_id: AtomicU64::new(1),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self, session_id: SessionId) -> Subscription {
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(session_id)
            .or_default()
            .push(Subscriber { id, tx });
        Subscription { id, session_id, rx }
    }

    pub fn unsubscribe(&self, session_id: SessionId, subscription_id: u64) {
        let mut map = self.subscribers.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(subs) = map.get_mut(&session_id) {
            subs.retain(|s| s.id != subscription_id);
            if subs.is_empty() {
                map.remove(&session_id);
            }
        }
    }

    pub fn subscriber_count(&self, session_id: SessionId) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&session_id)
            .map_or(0, Vec::len)
    }

    /// Events dropped so far because a subscriber buffer was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Deliver to every live subscriber of the event's session.
    ///
    /// Returns the number of subscribers that accepted the event.
    pub fn broadcast(&self, event: &StatusEvent) -> usize {
        let mut delivered = 0;
        let mut saw_closed = false;
        {
            let map = self.subscribers.read().unwrap_or_else(PoisonError::into_inner);
            let Some(subs) = map.get(&event.session_id) else {
                return 0;
            };
            for sub in subs {
                match sub.tx.try_send(event.clone()) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        debug!(
                            session_id = %event.session_id,
                            subscriber = sub.id,
                            "subscriber full, event dropped"
                        );
                    }
                    Err(TrySendError::Closed(_)) => saw_closed = true,
                }
            }
        }
        if saw_closed {
            self.prune(event.session_id);
        }
        delivered
    }

    fn prune(&self, session_id: SessionId) {
        let mut map = self.subscribers.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(subs) = map.get_mut(&session_id) {
            subs.retain(|s| !s.tx.is_closed());
            if subs.is_empty() {
                map.remove(&session_id);
            }
        }
    }
}

#[async_trait]
impl StatusPublisher for StatusBroadcaster {
    async fn publish(&self, event: &StatusEvent) -> Result<(), PublishError> {
        self.broadcast(event);
        Ok(())
    }
}
