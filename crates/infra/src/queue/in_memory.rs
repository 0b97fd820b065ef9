//! Channel-backed message source for tests/dev.
//!
//! Every clone of a [`ChannelMessageSource`] pulls from the same queue, so a
//! pool of workers competes for messages the way consumers on one broker
//! queue do. Dropping every [`QueueSender`] closes the sources.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};

use super::{AckMode, Delivery, DeliveryAck, MessageSource, QueueError};

pub fn channel(capacity: usize, ack_mode: AckMode) -> (QueueSender, ChannelMessageSource) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let acks = Arc::new(AtomicUsize::new(0));
    (
        QueueSender {
            tx,
            acks: Arc::clone(&acks),
        },
        ChannelMessageSource {
            rx: Arc::new(Mutex::new(rx)),
            acks,
            ack_mode,
        },
    )
}

#[derive(Debug, Clone)]
pub struct QueueSender {
    tx: mpsc::Sender<Vec<u8>>,
    acks: Arc<AtomicUsize>,
}

impl QueueSender {
    pub async fn send(&self, body: impl Into<Vec<u8>>) -> Result<(), QueueError> {
        self.tx
            .send(body.into())
            .await
            .map_err(|_| QueueError::Channel("queue closed".into()))
    }

    pub async fn send_json<T: Serialize>(&self, message: &T) -> Result<(), QueueError> {
        let body = serde_json::to_vec(message).map_err(|e| QueueError::Channel(e.to_string()))?;
        self.send(body).await
    }

    /// Deliveries acknowledged so far.
    pub fn acked(&self) -> usize {
        self.acks.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct ChannelMessageSource {
    rx: Arc<Mutex<mpsc::Receiver<Vec<u8>>>>,
    acks: Arc<AtomicUsize>,
    ack_mode: AckMode,
}

impl ChannelMessageSource {
    /// Deliveries acknowledged so far, across every clone.
    pub fn acked(&self) -> usize {
        self.acks.load(Ordering::SeqCst)
    }
}

struct CountingAck {
    acks: Arc<AtomicUsize>,
}

#[async_trait]
impl DeliveryAck for CountingAck {
    async fn ack(self: Box<Self>) -> Result<(), QueueError> {
        self.acks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl MessageSource for ChannelMessageSource {
    async fn next(&mut self) -> Option<Result<Delivery, QueueError>> {
        let body = self.rx.lock().await.recv().await?;
        let acker: Option<Box<dyn DeliveryAck>> = match self.ack_mode {
            AckMode::AfterProcessing => Some(Box::new(CountingAck {
                acks: Arc::clone(&self.acks),
            })),
            AckMode::Immediate => {
                self.acks.fetch_add(1, Ordering::SeqCst);
                None
            }
        };
        Some(Ok(Delivery::new(body, acker)))
    }
}
