//! # mule-queue: Background Job Processing
//!
//! **Deferred work queue with interchangeable storage backends**
//!
//! mule-queue lets a caller enqueue a unit of deferred work, have one of any
//! number of racing worker processes execute it, and feed the outcome
//! (success, failure, retry) back into durable storage. The same contract is
//! implemented over an in-memory store for tests, PostgreSQL row locking for
//! crash-safe durability, and Redis list primitives for low latency.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mule_queue::prelude::*;
//! use serde::{Deserialize, Serialize};
//! use std::time::Duration;
//!
//! #[derive(Serialize, Deserialize)]
//! struct SendEmail {
//!     to: String,
//! }
//!
//! #[derive(Clone)]
//! struct Mailer;
//!
//! #[async_trait]
//! impl Job for SendEmail {
//!     type Context = Mailer;
//!
//!     const NAME: &'static str = "send_email";
//!
//!     async fn handle(&self, _mailer: Mailer) -> Result<(), JobError> {
//!         // deliver the message
//!         Ok(())
//!     }
//!
//!     fn recovery_strategy(&self) -> RecoveryStrategy {
//!         RecoveryStrategy::Retry { max_attempts: 3 }
//!     }
//!
//!     fn retry_backoff_seconds(&self) -> u32 {
//!         30
//!     }
//! }
//!
//! # async fn example() -> QueueResult<()> {
//! let queue = Queue::new(MemoryStorage::new());
//! queue.enqueue(&SendEmail { to: "a@example.com".into() }, DEFAULT_CHANNEL).await?;
//!
//! let config = WorkerConfig::default()
//!     .with_channels(["priority", DEFAULT_CHANNEL])
//!     .with_poll_interval(Duration::from_secs(1));
//! let handle = Worker::new(queue.clone(), Mailer, config).start();
//!
//! // ... later
//! handle.shutdown().await?;
//! queue.shutdown().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Guarantees
//!
//! - A dequeued job is held by at most one worker; each backend enforces
//!   this with its own primitive (an exclusive in-process lock, SQL
//!   skip-locked row locking, Redis's atomic list-to-list move).
//! - Within a channel, the memory and SQL backends dequeue in FIFO enqueue
//!   order, subject to backoff skipping.
//! - A job completed with `Retry` stays invisible until its backoff instant
//!   passes, then becomes visible exactly once.
//! - A job whose type is unknown to the dequeuing worker is re-queued with
//!   its attempt counter intact, so mixed worker fleets during a rolling
//!   deploy never kill a job type they don't recognize yet.

pub mod error;
pub mod types;
pub mod job;
pub mod queue;
pub mod storage;
pub mod worker;

pub use error::{JobError, JobResult, QueueError, QueueResult};
pub use types::{JobEnvelope, JobId, JobOutcome, RecoveryStrategy};
pub use job::{ErasedJob, Job, JobTypeRegistry};
pub use queue::{Queue, DEFAULT_CHANNEL};
pub use storage::QueueStorage;
pub use worker::{Worker, WorkerConfig, WorkerHandle};

// Backend implementations
pub use storage::memory::MemoryStorage;

#[cfg(feature = "redis")]
pub use storage::redis::RedisStorage;

#[cfg(feature = "postgres")]
pub use storage::sql::{SqlStorage, JOBS_TABLE_DDL};

/// Everything needed to define and process jobs
pub mod prelude {
    pub use crate::{
        Job, JobError, JobOutcome, JobResult, JobTypeRegistry, MemoryStorage, Queue,
        QueueResult, QueueStorage, RecoveryStrategy, Worker, WorkerConfig, WorkerHandle,
        DEFAULT_CHANNEL,
    };

    #[cfg(feature = "redis")]
    pub use crate::RedisStorage;

    #[cfg(feature = "postgres")]
    pub use crate::SqlStorage;

    pub use async_trait::async_trait;
}
