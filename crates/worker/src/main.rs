use std::sync::Arc;

use anyhow::Context;
use matchwork_ai::{GeminiConfig, GeminiOracle};
use matchwork_events::{FanOutPublisher, LoggingStatusPublisher};
use matchwork_infra::queue::{self, AmqpMessageSource, AmqpStatusPublisher};
use matchwork_infra::{
    MimeDecoder, ObjectStoreBlobStore, PostgresSessionStore, SessionPipeline, StatusReporter,
    WorkerContext, WorkerPool, WorkerSettings,
};

/// Connections kept in the Postgres pool beyond one per worker.
const SPARE_DB_CONNECTIONS: u32 = 2;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    matchwork_observability::init();

    let settings = WorkerSettings::from_env().context("loading settings")?;
    tracing::info!(?settings, "starting matchwork worker");

    let max_connections = u32::try_from(settings.worker_count)
        .unwrap_or(u32::MAX)
        .saturating_add(SPARE_DB_CONNECTIONS);
    let store = Arc::new(
        PostgresSessionStore::connect(&settings.database_url, max_connections)
            .await
            .context("connecting to Postgres")?,
    );
    let blobs = Arc::new(ObjectStoreBlobStore::r2(&settings.r2).context("building R2 client")?);
    let oracle = Arc::new(
        GeminiOracle::new(GeminiConfig::new(&settings.google_api_key, &settings.gemini_model))
            .context("building Gemini client")?,
    );

    let conn = queue::amqp::connect(&settings.rabbitmq_url)
        .await
        .context("connecting to RabbitMQ")?;
    let amqp_publisher = AmqpStatusPublisher::declare(&conn, &settings.status_exchange)
        .await
        .context("declaring status exchange")?;
    let publisher = FanOutPublisher::new()
        .with(Arc::new(amqp_publisher))
        .with(Arc::new(LoggingStatusPublisher));

    let pipeline = SessionPipeline::new(blobs, Arc::new(MimeDecoder), oracle, store.clone())
        .with_config(settings.pipeline_config());
    let reporter = StatusReporter::new(Arc::new(publisher), store);
    let ctx = Arc::new(WorkerContext::new(pipeline, reporter));

    let queue_name = settings.session_queue.as_str();
    let handle = WorkerPool::new(settings.worker_count)
        .spawn(ctx, |worker| {
            AmqpMessageSource::open(&conn, queue_name, settings.ack_mode, worker)
        })
        .await
        .context("starting workers")?;

    tokio::select! {
        stopped = handle.wait() => stopped.context("worker pool stopped")?,
        signal = tokio::signal::ctrl_c() => {
            signal.context("listening for shutdown signal")?;
            tracing::info!("shutdown requested, stopping workers");
        }
    }
    Ok(())
}
