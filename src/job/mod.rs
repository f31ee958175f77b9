pub mod registry;

pub use registry::{ErasedJob, JobTypeRegistry};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use crate::{JobError, JobResult, RecoveryStrategy};

/// Trait for defining jobs that can be processed by the queue
///
/// A job serializes its own state into the envelope payload on enqueue and is
/// reconstructed fresh from that payload on every dequeue; workers hold no
/// job state between attempts.
#[async_trait]
pub trait Job: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Context type passed to job execution
    type Context: Send + Sync + Clone + 'static;

    /// Job type identifier for registry dispatch
    const NAME: &'static str;

    /// Execute the job with the given context
    async fn handle(&self, ctx: Self::Context) -> Result<(), JobError>;

    /// Retry policy for failed attempts (default: fail on first error)
    fn recovery_strategy(&self) -> RecoveryStrategy {
        RecoveryStrategy::default()
    }

    /// Base delay before a retried job becomes visible again (default: none)
    fn retry_backoff_seconds(&self) -> u32 {
        0
    }

    /// Called once the job reaches a terminal state
    async fn finished(&self, _result: &JobResult) {}

    /// Called after every failed attempt, terminal or not
    async fn failed(&self, _error: &JobError) {}
}
