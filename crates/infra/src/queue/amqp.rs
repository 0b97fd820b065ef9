//! RabbitMQ transport built on `lapin`.
//!
//! One `Connection` is shared by the whole process. Every worker opens its own
//! channel for consuming, and the status publisher holds one more channel for
//! publishing to the `session_updates` topic exchange.

use async_trait::async_trait;
use futures::StreamExt;
use lapin::acker::Acker;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
    ConfirmSelectOptions, ExchangeDeclareOptions, QueueDeclareOptions,
};
use lapin::publisher_confirm::Confirmation;
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind};
use matchwork_core::StatusEvent;
use matchwork_events::{PublishError, StatusPublisher};
use tracing::{debug, info, instrument};

use super::{AckMode, Delivery, DeliveryAck, MessageSource, QueueError};

/// Unacked deliveries a single worker may hold.
const PREFETCH: u16 = 1;

pub async fn connect(url: &str) -> Result<Connection, QueueError> {
    let properties =
        ConnectionProperties::default().with_connection_name("matchwork-worker".into());
    Connection::connect(url, properties)
        .await
        .map_err(|e| QueueError::Connection(format!("RabbitMQ connection failed: {e}")))
}

async fn open_channel(conn: &Connection) -> Result<Channel, QueueError> {
    conn.create_channel()
        .await
        .map_err(|e| QueueError::Channel(format!("RabbitMQ channel creation failed: {e}")))
}

/// Consumer on the durable session queue, one per worker.
pub struct AmqpMessageSource {
    consumer: Consumer,
    ack_mode: AckMode,
    // keeps the channel open for the consumer's lifetime
    _channel: Channel,
}

impl AmqpMessageSource {
    #[instrument(skip(conn), err)]
    pub async fn open(
        conn: &Connection,
        queue: &str,
        ack_mode: AckMode,
        worker: usize,
    ) -> Result<Self, QueueError> {
        let channel = open_channel(conn).await?;
        channel
            .basic_qos(PREFETCH, BasicQosOptions::default())
            .await
            .map_err(|e| QueueError::Channel(format!("failed to set QoS: {e}")))?;
        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| QueueError::Channel(format!("queue declare failed for {queue}: {e}")))?;

        let consumer = channel
            .basic_consume(
                queue,
                &format!("matchwork-worker-{worker}"),
                BasicConsumeOptions {
                    no_ack: ack_mode == AckMode::Immediate,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| QueueError::Consume(format!("basic_consume failed for {queue}: {e}")))?;

        info!(queue, worker, ?ack_mode, "consumer registered");
        Ok(Self {
            consumer,
            ack_mode,
            _channel: channel,
        })
    }
}

struct LapinAck(Acker);

#[async_trait]
impl DeliveryAck for LapinAck {
    async fn ack(self: Box<Self>) -> Result<(), QueueError> {
        self.0
            .ack(BasicAckOptions::default())
            .await
            .map_err(|e| QueueError::Ack(e.to_string()))
    }
}

#[async_trait]
impl MessageSource for AmqpMessageSource {
    async fn next(&mut self) -> Option<Result<Delivery, QueueError>> {
        let delivery = match self.consumer.next().await? {
            Ok(delivery) => delivery,
            Err(e) => return Some(Err(QueueError::Consume(e.to_string()))),
        };
        let acker: Option<Box<dyn DeliveryAck>> = match self.ack_mode {
            AckMode::AfterProcessing => Some(Box::new(LapinAck(delivery.acker))),
            AckMode::Immediate => None,
        };
        Some(Ok(Delivery::new(delivery.data, acker)))
    }
}

/// Publishes status events as JSON to a topic exchange, routed by `session.<id>`.
#[derive(Debug, Clone)]
pub struct AmqpStatusPublisher {
    channel: Channel,
    exchange: String,
}

impl AmqpStatusPublisher {
    /// Open a publishing channel in confirm mode and make sure the exchange
    /// exists.
    #[instrument(skip(conn), err)]
    pub async fn declare(conn: &Connection, exchange: &str) -> Result<Self, QueueError> {
        let channel = open_channel(conn).await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| QueueError::Channel(format!("failed to enable publisher confirms: {e}")))?;
        channel
            .exchange_declare(
                exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                QueueError::Channel(format!("exchange declare failed for {exchange}: {e}"))
            })?;
        Ok(Self {
            channel,
            exchange: exchange.to_owned(),
        })
    }
}

#[async_trait]
impl StatusPublisher for AmqpStatusPublisher {
    async fn publish(&self, event: &StatusEvent) -> Result<(), PublishError> {
        let payload = serde_json::to_vec(event)?;
        let routing_key = event.routing_key();
        let confirmation = self
            .channel
            .basic_publish(
                &self.exchange,
                &routing_key,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default().with_content_type("application/json".into()),
            )
            .await
            .map_err(|e| PublishError::Transport(format!("publish failed: {e}")))?
            .await
            .map_err(|e| PublishError::Transport(format!("publish confirm failed: {e}")))?;
        check_confirmation(confirmation)?;
        debug!(exchange = %self.exchange, routing_key = %routing_key, "status published");
        Ok(())
    }
}

/// Only a broker ack counts as delivered.
fn check_confirmation(confirmation: Confirmation) -> Result<(), PublishError> {
    match confirmation {
        Confirmation::Ack(_) => Ok(()),
        Confirmation::Nack(_) => Err(PublishError::Transport("broker nacked status event".into())),
        Confirmation::NotRequested => Err(PublishError::Transport(
            "publisher confirms are not enabled on the channel".into(),
        )),
    }
}
