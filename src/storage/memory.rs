use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::{
    storage::QueueStorage,
    types::JobId,
    JobEnvelope, JobOutcome, QueueResult,
};

#[derive(Default)]
struct MemoryState {
    /// Envelope store indexed by job id
    jobs: HashMap<JobId, JobEnvelope>,

    /// Per-channel FIFO of pending job ids
    pending: HashMap<String, VecDeque<JobId>>,

    /// Per-channel ids currently held by a worker
    reserved: HashMap<String, Vec<JobId>>,
}

/// In-memory backend for tests and development
///
/// All state mutation is serialized through a single async mutex, so
/// `enqueue`/`dequeue`/`complete` form a total order per channel. The
/// dequeue scan is linear; acceptable for a test-only backend.
pub struct MemoryStorage {
    state: Mutex<MemoryState>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// Number of pending jobs on a channel (test support)
    pub async fn pending_count(&self, channel: &str) -> usize {
        let state = self.state.lock().await;
        state.pending.get(channel).map_or(0, |q| q.len())
    }

    /// Number of reserved jobs on a channel (test support)
    pub async fn reserved_count(&self, channel: &str) -> usize {
        let state = self.state.lock().await;
        state.reserved.get(channel).map_or(0, |r| r.len())
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueStorage for MemoryStorage {
    async fn enqueue(&self, envelope: JobEnvelope) -> QueueResult<()> {
        let mut state = self.state.lock().await;

        let id = envelope.id.clone();
        state
            .pending
            .entry(envelope.channel.clone())
            .or_default()
            .push_back(id.clone());
        state.jobs.insert(id, envelope);

        Ok(())
    }

    async fn dequeue(&self, channel: &str) -> QueueResult<Option<JobEnvelope>> {
        let now = Utc::now();
        let mut state = self.state.lock().await;

        let Some(queue) = state.pending.get(channel) else {
            return Ok(None);
        };

        // First pending id whose envelope is out of backoff
        let position = queue.iter().position(|id| {
            state
                .jobs
                .get(id)
                .is_some_and(|envelope| envelope.is_eligible(now))
        });

        let Some(position) = position else {
            return Ok(None);
        };

        let Some(id) = state.pending.get_mut(channel).and_then(|q| q.remove(position)) else {
            return Ok(None);
        };
        state.reserved.entry(channel.to_string()).or_default().push(id.clone());

        let envelope = state.jobs.get(&id).cloned();
        Ok(envelope)
    }

    async fn complete(&self, envelope: &JobEnvelope, outcome: JobOutcome) -> QueueResult<()> {
        let mut state = self.state.lock().await;

        if let Some(reserved) = state.reserved.get_mut(&envelope.channel) {
            reserved.retain(|id| id != &envelope.id);
        }

        match outcome {
            JobOutcome::Success | JobOutcome::Failed => {
                state.jobs.remove(&envelope.id);
            }
            JobOutcome::Retry => {
                debug!(job_id = %envelope.id, attempts = envelope.attempts, "Re-queueing job for retry");
                state.jobs.insert(envelope.id.clone(), envelope.clone());
                state
                    .pending
                    .entry(envelope.channel.clone())
                    .or_default()
                    .push_back(envelope.id.clone());
            }
        }

        Ok(())
    }

    async fn shutdown(&self) -> QueueResult<()> {
        Ok(())
    }
}
