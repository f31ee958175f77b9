pub mod memory;

#[cfg(feature = "postgres")]
pub mod sql;

#[cfg(feature = "redis")]
pub mod redis;

use async_trait::async_trait;

use crate::{JobEnvelope, JobOutcome, QueueResult};

/// Pluggable persistence contract for queued jobs
///
/// Implementations exclusively own the durable copy of every
/// [`JobEnvelope`]; workers hold only a transient working copy during
/// execution and report every state transition through [`complete`].
///
/// Each backend guarantees with its own primitive that a job is visible to
/// at most one of {pending, reserved} at any instant, and that two
/// concurrent `dequeue` calls never both win the same job.
///
/// [`complete`]: QueueStorage::complete
#[async_trait]
pub trait QueueStorage: Send + Sync {
    /// Persist a new envelope; once this returns, the job survives process
    /// restart (for durable backends) until a worker completes it
    async fn enqueue(&self, envelope: JobEnvelope) -> QueueResult<()>;

    /// Reserve and return the oldest eligible job on `channel`, or `None`
    /// when every pending job is absent or still in backoff
    async fn dequeue(&self, channel: &str) -> QueueResult<Option<JobEnvelope>>;

    /// Persist the outcome of an execution attempt
    ///
    /// On [`JobOutcome::Retry`] the stored envelope is replaced with the
    /// caller's updated copy (attempts, backoff) and the reservation is
    /// released; the job stays invisible until `backoff_until` passes.
    async fn complete(&self, envelope: &JobEnvelope, outcome: JobOutcome) -> QueueResult<()>;

    /// Stop any backend-owned background work and release resources
    async fn shutdown(&self) -> QueueResult<()>;
}
