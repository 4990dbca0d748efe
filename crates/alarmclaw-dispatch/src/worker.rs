//! Worker pool — drains the work queue and runs the alarm handler.
//!
//! Each job runs in its own tokio task so a panicking handler fails that
//! job only. Failed jobs are retried with linear backoff up to
//! `max_attempts`. Workers exit once every queue producer is dropped and
//! the queue is empty.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use alarmclaw_core::config::QueueConfig;
use alarmclaw_core::traits::{AlarmHandler, PowerManager};
use alarmclaw_core::types::LeaseSpec;
use serde::Serialize;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::lease::WakeLease;
use crate::queue::{WorkItem, WorkReceiver};

/// Retry policy for failed jobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero is treated as one.
    pub max_attempts: u32,
    /// Delay after attempt `n` is `backoff * n`.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &QueueConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            backoff: Duration::from_millis(config.backoff_ms),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

/// Worker pool options.
#[derive(Clone)]
pub struct WorkerOptions {
    pub workers: usize,
    pub retry: RetryPolicy,
    /// Hold a wake lease for the whole run of each job.
    pub job_lease: Option<(Arc<dyn PowerManager>, LeaseSpec)>,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            workers: 2,
            retry: RetryPolicy::default(),
            job_lease: None,
        }
    }
}

/// Snapshot of worker counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub retried: u64,
}

#[derive(Default)]
struct Counters {
    processed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> WorkerStats {
        WorkerStats {
            processed: self.processed.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
        }
    }
}

/// Running workers.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl WorkerPool {
    /// Spawn `options.workers` workers on the current tokio runtime.
    pub fn spawn(
        receiver: WorkReceiver,
        handler: Arc<dyn AlarmHandler>,
        options: WorkerOptions,
    ) -> Self {
        let rx = Arc::new(Mutex::new(receiver.rx));
        let counters = Arc::new(Counters::default());
        let count = options.workers.max(1);

        tracing::info!(
            "👷 Starting {} alarm worker(s) with handler '{}'",
            count,
            handler.name()
        );

        let handles = (0..count)
            .map(|id| {
                tokio::spawn(worker_loop(
                    id,
                    rx.clone(),
                    handler.clone(),
                    options.clone(),
                    counters.clone(),
                ))
            })
            .collect();

        Self { handles, counters }
    }

    pub fn stats(&self) -> WorkerStats {
        self.counters.snapshot()
    }

    /// Wait for all workers to exit (after the queue closes).
    pub async fn join(self) -> WorkerStats {
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!("❌ Alarm worker crashed: {e}");
            }
        }
        self.counters.snapshot()
    }
}

async fn worker_loop(
    id: usize,
    rx: Arc<Mutex<mpsc::Receiver<WorkItem>>>,
    handler: Arc<dyn AlarmHandler>,
    options: WorkerOptions,
    counters: Arc<Counters>,
) {
    loop {
        let item = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };
        let Some(item) = item else {
            tracing::debug!("Worker {} stopping: queue closed", id);
            break;
        };

        let _lease = options.job_lease.as_ref().and_then(|(power, spec)| {
            WakeLease::acquire(power.clone(), spec)
                .map_err(|e| {
                    tracing::warn!(
                        "⚠️ Worker {} running '{}' without a wake lease: {e}",
                        id,
                        item.event.event_id
                    );
                })
                .ok()
        });

        run_job(id, &item, &handler, &options.retry, &counters).await;
    }
}

async fn run_job(
    worker: usize,
    item: &WorkItem,
    handler: &Arc<dyn AlarmHandler>,
    retry: &RetryPolicy,
    counters: &Counters,
) {
    counters.processed.fetch_add(1, Ordering::Relaxed);
    let attempts = retry.attempts();

    for attempt in 1..=attempts {
        let task_handler = handler.clone();
        let event = item.event.clone();
        let outcome = tokio::spawn(async move { task_handler.handle(&event).await }).await;

        let error = match outcome {
            Ok(Ok(())) => {
                counters.succeeded.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    "✅ Alarm '{}' handled by worker {} ({})",
                    item.event.event_id,
                    worker,
                    item.handle.id
                );
                return;
            }
            Ok(Err(e)) => e.to_string(),
            Err(e) if e.is_panic() => "handler panicked".to_string(),
            Err(e) => e.to_string(),
        };

        if attempt < attempts {
            counters.retried.fetch_add(1, Ordering::Relaxed);
            let delay = retry.delay_for(attempt);
            tracing::warn!(
                "⚠️ Alarm '{}' attempt {}/{} failed: {} (retry in {:?})",
                item.event.event_id,
                attempt,
                attempts,
                error,
                delay
            );
            tokio::time::sleep(delay).await;
        } else {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            tracing::error!(
                "❌ Alarm '{}' failed after {} attempt(s): {}",
                item.event.event_id,
                attempts,
                error
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::power::ProcessPowerManager;
    use crate::queue::ChannelWorkQueue;
    use alarmclaw_core::error::{AlarmClawError, Result};
    use alarmclaw_core::traits::WorkQueue;
    use alarmclaw_core::types::AlarmEvent;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    /// Fails the first `fail_first` calls, then succeeds.
    struct FlakyHandler {
        calls: AtomicU32,
        fail_first: u32,
    }

    #[async_trait]
    impl AlarmHandler for FlakyHandler {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn handle(&self, _event: &AlarmEvent) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                Err(AlarmClawError::Handler(format!("call {call} failed")))
            } else {
                Ok(())
            }
        }
    }

    struct PanickingHandler;

    #[async_trait]
    impl AlarmHandler for PanickingHandler {
        fn name(&self) -> &str {
            "panicking"
        }

        async fn handle(&self, _event: &AlarmEvent) -> Result<()> {
            panic!("handler bug");
        }
    }

    fn fast_retry(max_attempts: u32) -> WorkerOptions {
        WorkerOptions {
            workers: 2,
            retry: RetryPolicy {
                max_attempts,
                backoff: Duration::from_millis(1),
            },
            job_lease: None,
        }
    }

    #[tokio::test]
    async fn test_drains_queue_then_stops() {
        let (queue, rx) = ChannelWorkQueue::new(8);
        let handler = Arc::new(FlakyHandler {
            calls: AtomicU32::new(0),
            fail_first: 0,
        });
        let pool = WorkerPool::spawn(rx, handler.clone(), fast_retry(1));

        for i in 0..5 {
            queue.enqueue(AlarmEvent::new(i.to_string(), "")).unwrap();
        }
        drop(queue);

        let stats = pool.join().await;
        assert_eq!(stats.processed, 5);
        assert_eq!(stats.succeeded, 5);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let (queue, rx) = ChannelWorkQueue::new(8);
        let handler = Arc::new(FlakyHandler {
            calls: AtomicU32::new(0),
            fail_first: 2,
        });
        let pool = WorkerPool::spawn(rx, handler, fast_retry(3));
        queue.enqueue(AlarmEvent::new("1", "")).unwrap();
        drop(queue);

        let stats = pool.join().await;
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.retried, 2);
        assert_eq!(stats.failed, 0);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let (queue, rx) = ChannelWorkQueue::new(8);
        let handler = Arc::new(FlakyHandler {
            calls: AtomicU32::new(0),
            fail_first: u32::MAX,
        });
        let pool = WorkerPool::spawn(rx, handler.clone(), fast_retry(2));
        queue.enqueue(AlarmEvent::new("1", "")).unwrap();
        drop(queue);

        let stats = pool.join().await;
        assert_eq!(stats.failed, 1);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_panicking_handler_does_not_kill_worker() {
        let (queue, rx) = ChannelWorkQueue::new(8);
        let pool = WorkerPool::spawn(rx, Arc::new(PanickingHandler), fast_retry(1));
        queue.enqueue(AlarmEvent::new("1", "")).unwrap();
        queue.enqueue(AlarmEvent::new("2", "")).unwrap();
        drop(queue);

        let stats = pool.join().await;
        assert_eq!(stats.processed, 2);
        assert_eq!(stats.failed, 2);
    }

    #[tokio::test]
    async fn test_job_lease_released_after_run() {
        let power = Arc::new(ProcessPowerManager::new(4));
        let (queue, rx) = ChannelWorkQueue::new(8);
        let handler = Arc::new(FlakyHandler {
            calls: AtomicU32::new(0),
            fail_first: 0,
        });
        let options = WorkerOptions {
            job_lease: Some((power.clone() as Arc<dyn PowerManager>, LeaseSpec::default())),
            ..fast_retry(1)
        };
        let pool = WorkerPool::spawn(rx, handler, options);
        queue.enqueue(AlarmEvent::new("1", "")).unwrap();
        drop(queue);
        pool.join().await;

        let stats = power.stats();
        assert_eq!(stats.acquired, 1);
        assert_eq!(stats.released, 1);
        assert_eq!(stats.held, 0);
    }

    #[test]
    fn test_linear_backoff() {
        let retry = RetryPolicy {
            max_attempts: 0,
            backoff: Duration::from_millis(100),
        };
        assert_eq!(retry.attempts(), 1);
        assert_eq!(retry.delay_for(3), Duration::from_millis(300));
    }

    #[test]
    fn test_huge_backoff_saturates() {
        let retry = RetryPolicy::from_config(&QueueConfig {
            backoff_ms: u64::MAX,
            ..QueueConfig::default()
        });
        assert_eq!(retry.delay_for(2), Duration::MAX);
    }
}
