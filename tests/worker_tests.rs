//! Worker-level integration tests over the memory backend

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use mule_queue::prelude::*;

/// Per-test-run observation point handed to jobs through the worker context
#[derive(Clone, Default)]
struct Probe {
    handled: Arc<AtomicU32>,
    order: Arc<Mutex<Vec<String>>>,
}

// Hook invocations can't reach the worker context (hooks run on the bare
// reconstructed job), so the scenario test counts them in statics scoped to
// its own job type.
static SEND_FAILED_HOOK: AtomicU32 = AtomicU32::new(0);
static SEND_FINISHED_FAILURE: AtomicU32 = AtomicU32::new(0);

#[derive(Serialize, Deserialize)]
struct SendJob {
    to: String,
}

#[async_trait]
impl Job for SendJob {
    type Context = Probe;

    const NAME: &'static str = "send";

    async fn handle(&self, probe: Probe) -> Result<(), JobError> {
        probe.handled.fetch_add(1, Ordering::SeqCst);
        Err(JobError::new("delivery refused"))
    }

    fn recovery_strategy(&self) -> RecoveryStrategy {
        RecoveryStrategy::Retry { max_attempts: 2 }
    }

    async fn finished(&self, result: &JobResult) {
        if !result.is_success() {
            SEND_FINISHED_FAILURE.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn failed(&self, _error: &JobError) {
        SEND_FAILED_HOOK.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Serialize, Deserialize)]
struct RecordJob {
    label: String,
}

#[async_trait]
impl Job for RecordJob {
    type Context = Probe;

    const NAME: &'static str = "record";

    async fn handle(&self, probe: Probe) -> Result<(), JobError> {
        probe.order.lock().push(self.label.clone());
        Ok(())
    }
}

fn worker_on(queue: &Queue<MemoryStorage>, probe: Probe, channels: &[&str]) -> Worker<MemoryStorage> {
    let config = WorkerConfig::default().with_channels(channels.iter().copied());
    Worker::new(queue.clone(), probe, config)
}

/// Scenario: retry(2) job failing every attempt runs exactly three times
/// (one initial attempt plus two retries), then completes as failed
#[tokio::test]
async fn test_retry_budget_then_terminal_failure() {
    let queue = Queue::new(MemoryStorage::new());
    let probe = Probe::default();

    queue
        .enqueue(&SendJob { to: "a".to_string() }, DEFAULT_CHANNEL)
        .await
        .unwrap();

    let worker = worker_on(&queue, probe.clone(), &[DEFAULT_CHANNEL]);
    while worker.run_tick().await.unwrap() {}

    assert_eq!(probe.handled.load(Ordering::SeqCst), 3);
    assert_eq!(SEND_FAILED_HOOK.load(Ordering::SeqCst), 3);
    assert_eq!(SEND_FINISHED_FAILURE.load(Ordering::SeqCst), 1);

    // Nothing is left behind in the channel
    assert_eq!(queue.storage().pending_count(DEFAULT_CHANNEL).await, 0);
    assert_eq!(queue.storage().reserved_count(DEFAULT_CHANNEL).await, 0);
}

/// Scenario: a worker watching ["high", "low"] takes the "high" job first
/// even though "low" was enqueued earlier
#[tokio::test]
async fn test_channel_priority_order() {
    let queue = Queue::new(MemoryStorage::new());
    let probe = Probe::default();

    queue
        .enqueue(&RecordJob { label: "low".to_string() }, "low")
        .await
        .unwrap();
    queue
        .enqueue(&RecordJob { label: "high".to_string() }, "high")
        .await
        .unwrap();

    let worker = worker_on(&queue, probe.clone(), &["high", "low"]);
    while worker.run_tick().await.unwrap() {}

    assert_eq!(*probe.order.lock(), vec!["high".to_string(), "low".to_string()]);
}

/// Unknown job types are re-queued with the attempt counter unchanged
#[tokio::test]
async fn test_unknown_type_is_retried_without_burning_attempts() {
    let queue = Queue::new(MemoryStorage::new());
    let probe = Probe::default();

    queue
        .enqueue(&RecordJob { label: "x".to_string() }, DEFAULT_CHANNEL)
        .await
        .unwrap();

    // Simulate a worker process that has never seen this job type
    queue.registry().reset();

    let worker = worker_on(&queue, probe.clone(), &[DEFAULT_CHANNEL]);
    assert!(!worker.run_tick().await.unwrap());

    // Never executed, still pending, attempts untouched
    assert_eq!(probe.handled.load(Ordering::SeqCst), 0);
    assert_eq!(queue.storage().pending_count(DEFAULT_CHANNEL).await, 1);

    let envelope = queue
        .dequeue(&[DEFAULT_CHANNEL.to_string()])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(envelope.attempts, 0);
}

/// A registered worker picks the job up after the unknown-type detour
#[tokio::test]
async fn test_rolling_deploy_recovery() {
    let queue = Queue::new(MemoryStorage::new());
    let probe = Probe::default();

    queue
        .enqueue(&RecordJob { label: "deferred".to_string() }, DEFAULT_CHANNEL)
        .await
        .unwrap();
    queue.registry().reset();

    let old_worker = worker_on(&queue, probe.clone(), &[DEFAULT_CHANNEL]);
    assert!(!old_worker.run_tick().await.unwrap());

    // The "new" worker process knows the type again
    queue.registry().register::<RecordJob>();
    let new_worker = worker_on(&queue, probe.clone(), &[DEFAULT_CHANNEL]);
    assert!(new_worker.run_tick().await.unwrap());

    assert_eq!(*probe.order.lock(), vec!["deferred".to_string()]);
}

/// Drain mode processes a burst of jobs without waiting for timer ticks
#[tokio::test]
async fn test_until_empty_drains_channel() {
    let queue = Queue::new(MemoryStorage::new());
    let probe = Probe::default();

    for i in 0..5 {
        queue
            .enqueue(&RecordJob { label: format!("job-{i}") }, DEFAULT_CHANNEL)
            .await
            .unwrap();
    }

    let config = WorkerConfig::default()
        .with_channels([DEFAULT_CHANNEL])
        .with_poll_interval(Duration::from_secs(30))
        .until_empty(true);
    let handle = Worker::new(queue.clone(), probe.clone(), config).start();

    // With a 30s poll interval, only drain mode can finish this quickly
    tokio::time::sleep(Duration::from_millis(200)).await;
    handle.shutdown().await.unwrap();

    assert_eq!(probe.order.lock().len(), 5);
}

/// A retried job with a backoff delay stays invisible until the delay passes
#[tokio::test]
async fn test_worker_respects_retry_backoff() {
    #[derive(Serialize, Deserialize)]
    struct SlowRetryJob;

    #[async_trait]
    impl Job for SlowRetryJob {
        type Context = Probe;

        const NAME: &'static str = "slow_retry";

        async fn handle(&self, probe: Probe) -> Result<(), JobError> {
            if probe.handled.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(JobError::new("first attempt fails"))
            } else {
                Ok(())
            }
        }

        fn recovery_strategy(&self) -> RecoveryStrategy {
            RecoveryStrategy::Retry { max_attempts: 1 }
        }

        fn retry_backoff_seconds(&self) -> u32 {
            1
        }
    }

    let queue = Queue::new(MemoryStorage::new());
    let probe = Probe::default();
    queue.enqueue(&SlowRetryJob, DEFAULT_CHANNEL).await.unwrap();

    let worker = worker_on(&queue, probe.clone(), &[DEFAULT_CHANNEL]);

    assert!(worker.run_tick().await.unwrap());
    assert_eq!(probe.handled.load(Ordering::SeqCst), 1);

    // Still inside the backoff window
    assert!(!worker.run_tick().await.unwrap());

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert!(worker.run_tick().await.unwrap());
    assert_eq!(probe.handled.load(Ordering::SeqCst), 2);
}
