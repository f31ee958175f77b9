use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::{
    job::JobTypeRegistry,
    storage::QueueStorage,
    types::JobId,
    Job, JobEnvelope, JobOutcome, QueueResult,
};

/// Channel used when a caller doesn't care about routing
pub const DEFAULT_CHANNEL: &str = "default";

/// Thin façade binding a [`QueueStorage`] to a [`JobTypeRegistry`]
///
/// Producers call [`enqueue`](Queue::enqueue); workers drive
/// `dequeue`/`complete`. Cloning is cheap and all clones share the same
/// storage and registry.
pub struct Queue<S: QueueStorage> {
    storage: Arc<S>,
    registry: Arc<JobTypeRegistry>,
}

impl<S: QueueStorage> Queue<S> {
    /// Create a queue with its own registry
    pub fn new(storage: S) -> Self {
        Self {
            storage: Arc::new(storage),
            registry: Arc::new(JobTypeRegistry::new()),
        }
    }

    /// Create a queue sharing an existing registry
    pub fn with_registry(storage: S, registry: Arc<JobTypeRegistry>) -> Self {
        Self {
            storage: Arc::new(storage),
            registry,
        }
    }

    /// Enqueue a job on `channel`
    ///
    /// Registers the job's type as a side effect, so the registry knows
    /// every type that has ever been enqueued in-process. Once this call
    /// returns the job is durable (for non-memory backends) until a worker
    /// completes it.
    #[instrument(skip(self, job), fields(job_type = J::NAME))]
    pub async fn enqueue<J: Job>(&self, job: &J, channel: &str) -> QueueResult<JobId> {
        self.registry.register::<J>();

        let payload = serde_json::to_vec(job)?;
        let envelope = JobEnvelope::new(
            payload,
            J::NAME.to_string(),
            channel.to_string(),
            job.recovery_strategy(),
            job.retry_backoff_seconds(),
        );
        let job_id = envelope.id.clone();

        self.storage.enqueue(envelope).await?;

        info!(job_id = %job_id, "Enqueued job");
        Ok(job_id)
    }

    /// Try each channel in priority order, returning the first available
    /// envelope
    ///
    /// Earlier channels always win over later ones; a caller wanting
    /// round-robin fairness must rotate the list itself.
    pub async fn dequeue(&self, channels: &[String]) -> QueueResult<Option<JobEnvelope>> {
        for channel in channels {
            if let Some(envelope) = self.storage.dequeue(channel).await? {
                debug!(
                    job_id = %envelope.id,
                    job_type = %envelope.job_type_name,
                    channel = %channel,
                    "Dequeued job"
                );
                return Ok(Some(envelope));
            }
        }

        Ok(None)
    }

    /// Persist the outcome of an execution attempt
    pub async fn complete(&self, envelope: &JobEnvelope, outcome: JobOutcome) -> QueueResult<()> {
        self.storage.complete(envelope, outcome).await
    }

    /// Shut down the backing storage, stopping any background tasks it owns
    pub async fn shutdown(&self) -> QueueResult<()> {
        self.storage.shutdown().await
    }

    /// Get the registry shared by this queue
    pub fn registry(&self) -> &JobTypeRegistry {
        &self.registry
    }

    /// Get the backing storage
    pub fn storage(&self) -> &S {
        &self.storage
    }
}

impl<S: QueueStorage> Clone for Queue<S> {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
            registry: self.registry.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{storage::memory::MemoryStorage, JobError};
    use async_trait::async_trait;

    #[derive(serde::Serialize, serde::Deserialize)]
    struct PingJob {
        target: String,
    }

    #[async_trait]
    impl Job for PingJob {
        type Context = ();

        const NAME: &'static str = "ping";

        async fn handle(&self, _ctx: Self::Context) -> Result<(), JobError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_enqueue_registers_type_and_persists() {
        let queue = Queue::new(MemoryStorage::new());
        let job = PingJob { target: "a".to_string() };

        queue.enqueue(&job, DEFAULT_CHANNEL).await.unwrap();

        assert!(queue.registry().is_registered("ping"));

        let envelope = queue
            .dequeue(&[DEFAULT_CHANNEL.to_string()])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(envelope.job_type_name, "ping");
        assert_eq!(envelope.attempts, 0);
        assert!(envelope.backoff_until.is_none());
    }

    #[tokio::test]
    async fn test_dequeue_respects_channel_priority() {
        let queue = Queue::new(MemoryStorage::new());

        // "low" enqueued first, but "high" is listed first
        queue.enqueue(&PingJob { target: "l".into() }, "low").await.unwrap();
        queue.enqueue(&PingJob { target: "h".into() }, "high").await.unwrap();

        let channels = vec!["high".to_string(), "low".to_string()];
        let first = queue.dequeue(&channels).await.unwrap().unwrap();
        assert_eq!(first.channel, "high");

        let second = queue.dequeue(&channels).await.unwrap().unwrap();
        assert_eq!(second.channel, "low");
    }

    #[tokio::test]
    async fn test_dequeue_empty_returns_none() {
        let queue = Queue::new(MemoryStorage::new());
        let channels = vec![DEFAULT_CHANNEL.to_string()];

        assert!(queue.dequeue(&channels).await.unwrap().is_none());
    }
}
