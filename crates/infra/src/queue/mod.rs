//! Session message delivery.
//!
//! A [`MessageSource`] yields [`Delivery`]s one at a time to a single worker.
//! Each delivery carries the raw message body and, unless the source runs in
//! [`AckMode::Immediate`], a handle used to acknowledge it once the worker is
//! done with it.

pub mod amqp;
pub mod in_memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use self::amqp::{AmqpMessageSource, AmqpStatusPublisher};
pub use self::in_memory::{ChannelMessageSource, QueueSender, channel};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("channel error: {0}")]
    Channel(String),

    #[error("consume error: {0}")]
    Consume(String),

    #[error("ack error: {0}")]
    Ack(String),

    #[error("worker {worker} stopped: message source closed")]
    SourceClosed { worker: usize },

    #[error("worker task failed: {0}")]
    WorkerFailed(String),
}

/// When a delivery is acknowledged to the broker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckMode {
    /// Ack once the session reached a terminal state or the body was rejected.
    /// A crash mid-session leaves the message for redelivery.
    #[default]
    AfterProcessing,
    /// Broker auto-ack on delivery (at-most-once).
    Immediate,
}

impl core::str::FromStr for AckMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "after_processing" | "after-processing" | "manual" => Ok(Self::AfterProcessing),
            "immediate" | "auto" => Ok(Self::Immediate),
            other => Err(format!(
                "unknown ack mode `{other}` (expected after_processing or immediate)"
            )),
        }
    }
}

/// Broker-side acknowledgement of one delivery.
#[async_trait]
pub trait DeliveryAck: Send {
    async fn ack(self: Box<Self>) -> Result<(), QueueError>;
}

/// One received message.
pub struct Delivery {
    pub body: Vec<u8>,
    acker: Option<Box<dyn DeliveryAck>>,
}

impl Delivery {
    pub fn new(body: Vec<u8>, acker: Option<Box<dyn DeliveryAck>>) -> Self {
        Self { body, acker }
    }

    /// Whether the worker still has to acknowledge this delivery.
    pub fn needs_ack(&self) -> bool {
        self.acker.is_some()
    }

    /// Acknowledge; a no-op for auto-acked deliveries.
    pub async fn ack(self) -> Result<(), QueueError> {
        match self.acker {
            Some(acker) => acker.ack().await,
            None => Ok(()),
        }
    }
}

impl core::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Delivery")
            .field("body_len", &self.body.len())
            .field("needs_ack", &self.needs_ack())
            .finish()
    }
}

/// Per-worker stream of deliveries.
#[async_trait]
pub trait MessageSource: Send {
    /// Next delivery. `None` means the source is closed and the worker should stop.
    async fn next(&mut self) -> Option<Result<Delivery, QueueError>>;
}
