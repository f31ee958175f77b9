use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::JobId;

/// Retry policy declared by a job type.
///
/// Travels with the envelope so a worker that doesn't have the job type
/// registered can still enforce the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecoveryStrategy {
    /// Fail terminally on the first error
    None,

    /// Re-queue up to `max_attempts` additional times after the first failure
    Retry { max_attempts: u32 },
}

impl RecoveryStrategy {
    /// Maximum number of retries after the initial attempt (0 for `None`)
    pub fn max_attempts(&self) -> u32 {
        match self {
            Self::None => 0,
            Self::Retry { max_attempts } => *max_attempts,
        }
    }
}

impl Default for RecoveryStrategy {
    fn default() -> Self {
        Self::None
    }
}

/// Result of one execution attempt, as reported to `complete`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobOutcome {
    /// Job finished; remove it from storage
    Success,

    /// Terminal failure; remove it from storage, no more retries
    Failed,

    /// Re-queue with the envelope's updated `attempts`/`backoff_until`
    Retry,
}

/// The durable, backend-agnostic representation of a queued unit of work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEnvelope {
    /// Storage key in all backends; immutable once created
    pub id: JobId,

    /// The job's self-serialized state (opaque to the framework)
    pub payload: Vec<u8>,

    /// Identifies which registered factory can reconstruct the job
    pub job_type_name: String,

    /// Logical sub-queue; workers watch a prioritized list of channels
    pub channel: String,

    /// Incremented once per execution attempt, before execution
    pub attempts: u32,

    /// Retry policy declared by the job type
    pub recovery_strategy: RecoveryStrategy,

    /// Base delay before a retried job becomes visible again
    pub retry_backoff_seconds: u32,

    /// When set, the job is invisible to `dequeue` until this instant passes
    pub backoff_until: Option<DateTime<Utc>>,

    /// Enqueue instant, used for FIFO ordering within a channel
    pub queued_at: DateTime<Utc>,
}

impl JobEnvelope {
    /// Create a fresh envelope for a just-enqueued job
    pub fn new(
        payload: Vec<u8>,
        job_type_name: String,
        channel: String,
        recovery_strategy: RecoveryStrategy,
        retry_backoff_seconds: u32,
    ) -> Self {
        Self {
            id: JobId::new(),
            payload,
            job_type_name,
            channel,
            attempts: 0,
            recovery_strategy,
            retry_backoff_seconds,
            backoff_until: None,
            queued_at: Utc::now(),
        }
    }

    /// Check whether the job is visible to `dequeue` at `now`
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        match self.backoff_until {
            Some(until) => until <= now,
            None => true,
        }
    }

    /// Whether another retry is allowed after the attempt counter has been
    /// incremented for the failing execution
    pub fn retries_remain(&self) -> bool {
        self.attempts <= self.recovery_strategy.max_attempts()
    }

    /// Arm the backoff window starting at `now`; a zero base delay clears
    /// the window so the retried job is immediately visible again
    pub fn arm_backoff(&mut self, now: DateTime<Utc>) {
        self.backoff_until = if self.retry_backoff_seconds > 0 {
            Some(now + chrono::Duration::seconds(i64::from(self.retry_backoff_seconds)))
        } else {
            None
        };
    }
}
