use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::{
    job::ErasedJob,
    queue::DEFAULT_CHANNEL,
    storage::QueueStorage,
    JobEnvelope, JobOutcome, JobResult, Queue, QueueError, QueueResult,
};

/// Configuration for a polling worker
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Channels to watch, in priority order; earlier channels always win
    pub channels: Vec<String>,

    /// Delay between polls when the watched channels are empty
    pub poll_interval: Duration,

    /// When set, immediately attempt another dequeue after finishing a job
    /// instead of waiting for the next tick, draining the channel under load
    pub until_empty: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            channels: vec![DEFAULT_CHANNEL.to_string()],
            poll_interval: Duration::from_secs(1),
            until_empty: false,
        }
    }
}

impl WorkerConfig {
    /// Set the prioritized channel list
    pub fn with_channels(mut self, channels: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.channels = channels.into_iter().map(Into::into).collect();
        self
    }

    /// Set the poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Enable or disable drain mode
    pub fn until_empty(mut self, enabled: bool) -> Self {
        self.until_empty = enabled;
        self
    }
}

/// Handle for managing a worker's lifecycle
pub struct WorkerHandle {
    shutdown_tx: oneshot::Sender<()>,
    join_handle: JoinHandle<()>,
}

impl WorkerHandle {
    /// Gracefully shut down the worker, waiting for an in-flight job to
    /// finish
    pub async fn shutdown(self) -> QueueResult<()> {
        let _ = self.shutdown_tx.send(());
        self.join_handle
            .await
            .map_err(|e| QueueError::Internal(format!("Worker join error: {e}")))
    }
}

/// Polling loop that repeatedly asks a [`Queue`] for the next job across a
/// prioritized list of channels, executes it, and reports the outcome
///
/// Multiple workers (in the same process or different processes) may poll
/// the same backend concurrently and race for jobs; the storage layer
/// guarantees each job goes to at most one of them.
pub struct Worker<S: QueueStorage> {
    queue: Queue<S>,
    context: Arc<dyn Any + Send + Sync>,
    config: WorkerConfig,
}

impl<S: QueueStorage + 'static> Worker<S> {
    /// Create a worker over `queue` with the context handed to every job
    pub fn new<C: Send + Sync + 'static>(queue: Queue<S>, context: C, config: WorkerConfig) -> Self {
        Self {
            queue,
            context: Arc::new(context),
            config,
        }
    }

    /// Spawn the polling loop onto the runtime
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let join_handle = tokio::spawn(self.run(shutdown_rx));

        WorkerHandle { shutdown_tx, join_handle }
    }

    async fn run(self, mut shutdown_rx: oneshot::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(channels = ?self.config.channels, "Worker started");

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("Worker shutdown requested");
                    break;
                }

                _ = ticker.tick() => {
                    loop {
                        match self.run_tick().await {
                            Ok(true) if self.config.until_empty => continue,
                            Ok(_) => break,
                            Err(e) => {
                                // Storage trouble is absorbed here; the loop
                                // tries again on the next tick
                                error!(error = %e, "Poll tick failed");
                                break;
                            }
                        }
                    }
                }
            }
        }

        info!("Worker stopped");
    }

    /// Process at most one job; returns whether another dequeue is worth
    /// attempting right away
    pub async fn run_tick(&self) -> QueueResult<bool> {
        let Some(mut envelope) = self.queue.dequeue(&self.config.channels).await? else {
            return Ok(false);
        };

        envelope.attempts += 1;

        match self.queue.registry().create(&envelope) {
            Ok(job) => {
                self.execute(envelope, job).await?;
                Ok(true)
            }
            Err(QueueError::UnknownJobType(name)) => {
                // Roll the pre-increment back so a worker that doesn't know
                // this type yet doesn't consume its retry budget
                envelope.attempts -= 1;
                envelope.arm_backoff(Utc::now());

                warn!(job_id = %envelope.id, job_type = %name, "Unknown job type, re-queueing");
                self.queue.complete(&envelope, JobOutcome::Retry).await?;
                Ok(false)
            }
            Err(QueueError::Serialization(e)) => {
                // A payload that cannot be decoded will never decode; terminal
                error!(job_id = %envelope.id, error = %e, "Failed to decode job payload");
                self.queue.complete(&envelope, JobOutcome::Failed).await?;
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }

    async fn execute(&self, mut envelope: JobEnvelope, job: Box<dyn ErasedJob>) -> QueueResult<()> {
        match job.handle(self.context.clone()).await {
            Ok(()) => {
                self.queue.complete(&envelope, JobOutcome::Success).await?;
                job.finished(&JobResult::Success).await;
            }
            Err(error) if envelope.retries_remain() => {
                envelope.arm_backoff(Utc::now());

                warn!(
                    job_id = %envelope.id,
                    job_type = %envelope.job_type_name,
                    attempt = envelope.attempts,
                    error = %error,
                    "Job failed, will retry"
                );
                self.queue.complete(&envelope, JobOutcome::Retry).await?;
                job.failed(&error).await;
            }
            Err(error) => {
                error!(
                    job_id = %envelope.id,
                    job_type = %envelope.job_type_name,
                    attempts = envelope.attempts,
                    error = %error,
                    "Job failed permanently"
                );
                self.queue.complete(&envelope, JobOutcome::Failed).await?;
                job.finished(&JobResult::Failure(error.clone())).await;
                job.failed(&error).await;
            }
        }

        Ok(())
    }
}
