use thiserror::Error;

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Infrastructure errors for queue operations
#[derive(Error, Debug, Clone)]
pub enum QueueError {
    /// The envelope's declared job type has no registered factory.
    /// Retryable: an older worker process must not permanently kill a job
    /// type it doesn't recognize yet.
    #[error("Unknown job type: {0}")]
    UnknownJobType(String),

    /// Connection or transport failure in the storage backend
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Payload encode/decode failure; terminal for the attempt
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error raised by a job's `handle`.
///
/// The framework never inspects this beyond logging it and handing it to the
/// job's lifecycle hooks; whether the job retries is decided solely by its
/// declared [`RecoveryStrategy`](crate::RecoveryStrategy).
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct JobError {
    message: String,
}

impl JobError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for JobError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for JobError {
    fn from(message: &str) -> Self {
        Self { message: message.to_string() }
    }
}

/// Outcome handed to a job's `finished` hook.
#[derive(Debug, Clone)]
pub enum JobResult {
    Success,
    Failure(JobError),
}

impl JobResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for QueueError {
    fn from(err: sqlx::Error) -> Self {
        Self::StorageUnavailable(err.to_string())
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for QueueError {
    fn from(err: redis::RedisError) -> Self {
        Self::StorageUnavailable(err.to_string())
    }
}
