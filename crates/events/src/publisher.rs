//! Status publishing abstraction.
//!
//! A [`StatusPublisher`] delivers [`StatusEvent`]s to whoever listens for
//! session progress: a broker exchange, in-process subscribers, or just the log.
//!
//! Delivery is fire-and-forget. Callers on the processing path go through
//! [`publish_best_effort`], which logs failures and never propagates them; a
//! session is never failed because a status event could not be delivered.

use std::sync::Arc;

use async_trait::async_trait;
use matchwork_core::StatusEvent;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum PublishError {
    /// The underlying transport refused or lost the message.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The publisher has been shut down.
    #[error("publisher closed")]
    Closed,
}

/// Sink for session lifecycle events.
///
/// Implementations must be safe to share between worker tasks.
#[async_trait]
pub trait StatusPublisher: Send + Sync {
    async fn publish(&self, event: &StatusEvent) -> Result<(), PublishError>;
}

#[async_trait]
impl<P> StatusPublisher for Arc<P>
where
    P: StatusPublisher + ?Sized,
{
    async fn publish(&self, event: &StatusEvent) -> Result<(), PublishError> {
        (**self).publish(event).await
    }
}

/// Publish and swallow the error after logging it.
pub async fn publish_best_effort<P>(publisher: &P, event: &StatusEvent)
where
    P: StatusPublisher + ?Sized,
{
    if let Err(e) = publisher.publish(event).await {
        warn!(
            session_id = %event.session_id,
            status = %event.status,
            error = %e,
            "status publish failed"
        );
    }
}

/// Writes events to the log and nothing else.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingStatusPublisher;

#[async_trait]
impl StatusPublisher for LoggingStatusPublisher {
    async fn publish(&self, event: &StatusEvent) -> Result<(), PublishError> {
        info!(
            session_id = %event.session_id,
            status = %event.status,
            message = %event.message,
            "session status"
        );
        Ok(())
    }
}

/// Publishes to every inner publisher in order.
///
/// One failing sink does not stop the others; the first error is returned
/// after all of them have been tried.
#[derive(Default, Clone)]
pub struct FanOutPublisher {
    sinks: Vec<Arc<dyn StatusPublisher>>,
}

impl FanOutPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn StatusPublisher>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl StatusPublisher for FanOutPublisher {
    async fn publish(&self, event: &StatusEvent) -> Result<(), PublishError> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(e) = sink.publish(event).await {
                warn!(session_id = %event.session_id, error = %e, "fan-out sink failed");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}
