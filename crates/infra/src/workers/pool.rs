use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use matchwork_core::{Session, SessionStatus};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::pipeline::{PipelineError, SessionPipeline, SessionReport, StatusReporter};
use crate::queue::{Delivery, MessageSource, QueueError};

/// Pause after a receive error before asking the source again.
const RECEIVE_BACKOFF: Duration = Duration::from_secs(1);

/// What a worker did with one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Completed,
    Failed,
    /// Body was not a session message.
    Rejected,
}

/// State shared by every worker of a pool.
#[derive(Clone)]
pub struct WorkerContext {
    pipeline: SessionPipeline,
    reporter: StatusReporter,
}

impl WorkerContext {
    pub fn new(pipeline: SessionPipeline, reporter: StatusReporter) -> Self {
        Self { pipeline, reporter }
    }

    /// Drive one session through `processing` to `completed` or `failed`.
    ///
    /// Exactly one terminal transition is recorded per call.
    pub async fn run_session(&self, session: &Session) -> Result<SessionReport, PipelineError> {
        self.reporter.transition(session.id, SessionStatus::Processing).await;
        match self.pipeline.process(session).await {
            Ok(report) => {
                self.reporter.transition(session.id, SessionStatus::Completed).await;
                Ok(report)
            }
            Err(e) => {
                error!(session_id = %session.id, error = %e, "session failed");
                self.reporter.transition(session.id, SessionStatus::Failed).await;
                Err(e)
            }
        }
    }

    /// Decode, process and acknowledge one delivery.
    pub async fn handle_delivery(&self, worker: usize, delivery: Delivery) -> DeliveryOutcome {
        let outcome = match Session::from_json(&delivery.body) {
            Ok(session) => {
                info!(worker, session_id = %session.id, "session received");
                match self.run_session(&session).await {
                    Ok(_) => DeliveryOutcome::Completed,
                    Err(_) => DeliveryOutcome::Failed,
                }
            }
            Err(e) => {
                warn!(worker, error = %e, "undecodable session message");
                self.reporter.rejected(&delivery.body).await;
                DeliveryOutcome::Rejected
            }
        };
        if let Err(e) = delivery.ack().await {
            warn!(worker, error = %e, "failed to ack delivery");
        }
        outcome
    }
}

/// Fixed-size pool of queue workers, each running on its own tokio task.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    workers: usize,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn size(&self) -> usize {
        self.workers
    }

    /// Open one message source per worker, then start the workers.
    ///
    /// All sources are opened before any worker starts, so a broker that is
    /// unreachable at startup fails here rather than inside a task.
    pub async fn spawn<S, F, Fut>(
        &self,
        ctx: Arc<WorkerContext>,
        mut connect: F,
    ) -> Result<WorkerPoolHandle, QueueError>
    where
        S: MessageSource + 'static,
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<S, QueueError>>,
    {
        let mut sources = Vec::with_capacity(self.workers);
        for worker in 0..self.workers {
            sources.push(connect(worker).await?);
        }

        let (shutdown, stop) = watch::channel(false);
        let mut tasks = JoinSet::new();
        for (worker, source) in sources.into_iter().enumerate() {
            tasks.spawn(worker_loop(worker, source, Arc::clone(&ctx), stop.clone()));
        }
        info!(workers = self.workers, "worker pool started");
        Ok(WorkerPoolHandle { tasks, shutdown })
    }
}

#[derive(Debug)]
pub struct WorkerPoolHandle {
    tasks: JoinSet<usize>,
    shutdown: watch::Sender<bool>,
}

impl WorkerPoolHandle {
    /// Resolve once any worker stops.
    ///
    /// A worker only stops when its source closes or its task dies, so a
    /// running pool always resolves to an error. The remaining workers are
    /// told to stop and finish the delivery they are handling first.
    pub async fn wait(mut self) -> Result<(), QueueError> {
        let first = match self.tasks.join_next().await {
            Some(Ok(worker)) => QueueError::SourceClosed { worker },
            Some(Err(e)) => QueueError::WorkerFailed(e.to_string()),
            None => return Ok(()),
        };
        error!(error = %first, "worker stopped, shutting down pool");

        let _ = self.shutdown.send(true);
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "worker task ended abnormally");
            }
        }
        Err(first)
    }
}

/// Pull deliveries until the source closes or the pool shuts down.
///
/// Returns the worker index. Shutdown is only observed between deliveries.
async fn worker_loop<S: MessageSource>(
    worker: usize,
    mut source: S,
    ctx: Arc<WorkerContext>,
    mut stop: watch::Receiver<bool>,
) -> usize {
    loop {
        let next = tokio::select! {
            biased;
            _ = stop.changed() => {
                info!(worker, "pool shutting down, worker stopping");
                return worker;
            }
            next = source.next() => next,
        };
        match next {
            Some(Ok(delivery)) => {
                ctx.handle_delivery(worker, delivery).await;
            }
            Some(Err(e)) => {
                warn!(worker, error = %e, "receive failed");
                tokio::time::sleep(RECEIVE_BACKOFF).await;
            }
            None => {
                warn!(worker, "message source closed, worker stopping");
                return worker;
            }
        }
    }
}
