use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::{
    storage::QueueStorage,
    JobEnvelope, JobOutcome, QueueError, QueueResult,
};

/// Hash mapping job id to serialized envelope JSON
const DATA_KEY: &str = "jobs:data";

/// List of job ids currently reserved by any worker
const PROCESSING_KEY: &str = "jobs:processing";

/// Sorted set of `<id>:<channel>` members scored by retry-eligibility epoch
const BACKOFFS_KEY: &str = "jobs:backoffs";

fn channel_key(channel: &str) -> String {
    format!("jobs:queue:{channel}")
}

struct PromoterHandle {
    shutdown_tx: oneshot::Sender<()>,
    join_handle: JoinHandle<()>,
}

/// Redis-backed storage for high-throughput use
///
/// Pending jobs live in one list per channel; `RPOPLPUSH` onto the
/// processing list is the mutual-exclusion primitive, since only one caller
/// can pop a given list element. Backed-off jobs sit outside the pending
/// lists in a sorted set until the promoter task moves them back.
///
/// Promoted jobs re-enter at the head of the pending list (the side that is
/// popped last), so they are not guaranteed to interleave chronologically
/// with freshly enqueued jobs.
pub struct RedisStorage {
    conn: ConnectionManager,
    promoter: Mutex<Option<PromoterHandle>>,
}

impl RedisStorage {
    /// Default interval between backoff-promotion sweeps
    pub const PROMOTION_INTERVAL: Duration = Duration::from_secs(1);

    /// Connect and start the backoff promoter task
    pub async fn connect(url: &str) -> QueueResult<Self> {
        Self::connect_with_interval(url, Self::PROMOTION_INTERVAL).await
    }

    /// Connect with a custom promotion sweep interval
    pub async fn connect_with_interval(url: &str, interval: Duration) -> QueueResult<Self> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let join_handle = tokio::spawn(run_promoter(conn.clone(), shutdown_rx, interval));

        Ok(Self {
            conn,
            promoter: Mutex::new(Some(PromoterHandle { shutdown_tx, join_handle })),
        })
    }

    /// Run one promotion sweep immediately (test support)
    pub async fn run_promoter_tick(&self) -> QueueResult<usize> {
        let mut conn = self.conn.clone();
        promote_due(&mut conn).await
    }
}

/// Atomically drain due backoff entries and re-push each job onto its
/// channel's pending list; returns the number promoted
async fn promote_due(conn: &mut ConnectionManager) -> QueueResult<usize> {
    let now = Utc::now().timestamp();

    // Read and remove in one MULTI/EXEC so no entry is seen twice
    let (due, _removed): (Vec<String>, i64) = redis::pipe()
        .atomic()
        .zrangebyscore(BACKOFFS_KEY, "-inf", now)
        .zrembyscore(BACKOFFS_KEY, "-inf", now)
        .query_async(conn)
        .await?;

    let mut promoted = 0;
    for entry in &due {
        let Some((id, channel)) = entry.split_once(':') else {
            warn!(entry = %entry, "Malformed backoff entry, dropping");
            continue;
        };

        let _: i64 = conn.lpush(channel_key(channel), id).await?;
        promoted += 1;
    }

    if promoted > 0 {
        debug!(count = promoted, "Promoted jobs out of backoff");
    }

    Ok(promoted)
}

async fn run_promoter(
    mut conn: ConnectionManager,
    mut shutdown_rx: oneshot::Receiver<()>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                debug!("Backoff promoter stopping");
                break;
            }

            _ = ticker.tick() => {
                if let Err(e) = promote_due(&mut conn).await {
                    warn!(error = %e, "Backoff promotion sweep failed");
                }
            }
        }
    }
}

#[async_trait]
impl QueueStorage for RedisStorage {
    async fn enqueue(&self, envelope: JobEnvelope) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_vec(&envelope)?;

        let _: () = redis::pipe()
            .atomic()
            .hset(DATA_KEY, envelope.id.as_str(), json)
            .lpush(channel_key(&envelope.channel), envelope.id.as_str())
            .query_async(&mut conn)
            .await?;

        Ok(())
    }

    async fn dequeue(&self, channel: &str) -> QueueResult<Option<JobEnvelope>> {
        let mut conn = self.conn.clone();

        let id: Option<String> = conn.rpoplpush(channel_key(channel), PROCESSING_KEY).await?;
        let Some(id) = id else {
            return Ok(None);
        };

        let raw: Option<Vec<u8>> = conn.hget(DATA_KEY, &id).await?;
        match raw {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => {
                // Stale id without a data entry; drop the reservation
                warn!(job_id = %id, "Dequeued id with no stored envelope");
                let _: i64 = conn.lrem(PROCESSING_KEY, 0, &id).await?;
                Ok(None)
            }
        }
    }

    async fn complete(&self, envelope: &JobEnvelope, outcome: JobOutcome) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        let id = envelope.id.as_str();

        match outcome {
            JobOutcome::Success | JobOutcome::Failed => {
                let _: () = redis::pipe()
                    .atomic()
                    .lrem(PROCESSING_KEY, 0, id)
                    .hdel(DATA_KEY, id)
                    .query_async(&mut conn)
                    .await?;
            }
            JobOutcome::Retry => {
                let json = serde_json::to_vec(envelope)?;

                match envelope.backoff_until {
                    Some(until) => {
                        // Park in the backoff set; the promoter re-queues it
                        let _: () = redis::pipe()
                            .atomic()
                            .lrem(PROCESSING_KEY, 0, id)
                            .hset(DATA_KEY, id, json)
                            .zadd(
                                BACKOFFS_KEY,
                                format!("{}:{}", id, envelope.channel),
                                until.timestamp(),
                            )
                            .query_async(&mut conn)
                            .await?;
                    }
                    None => {
                        let _: () = redis::pipe()
                            .atomic()
                            .lrem(PROCESSING_KEY, 0, id)
                            .hset(DATA_KEY, id, json)
                            .lpush(channel_key(&envelope.channel), id)
                            .query_async(&mut conn)
                            .await?;
                    }
                }
            }
        }

        Ok(())
    }

    async fn shutdown(&self) -> QueueResult<()> {
        let handle = self.promoter.lock().await.take();

        if let Some(PromoterHandle { shutdown_tx, join_handle }) = handle {
            let _ = shutdown_tx.send(());
            join_handle
                .await
                .map_err(|e| QueueError::Internal(format!("Backoff promoter join error: {e}")))?;
        }

        Ok(())
    }
}
