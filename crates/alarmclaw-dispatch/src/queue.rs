//! Channel-backed work queue — the dispatcher's fire-and-forget submission.
//!
//! `enqueue` is a `try_send` on a bounded channel: it never waits, it fails
//! fast when the queue is full or the workers are gone.

use std::sync::atomic::{AtomicU64, Ordering};

use alarmclaw_core::error::EnqueueError;
use alarmclaw_core::traits::WorkQueue;
use alarmclaw_core::types::{AlarmEvent, WorkHandle};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// A submitted job.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub handle: WorkHandle,
    pub event: AlarmEvent,
}

/// Producer side, handed to the dispatcher.
pub struct ChannelWorkQueue {
    tx: mpsc::Sender<WorkItem>,
    capacity: usize,
    submitted: AtomicU64,
}

/// Consumer side, handed to the worker pool.
pub struct WorkReceiver {
    pub(crate) rx: mpsc::Receiver<WorkItem>,
}

impl WorkReceiver {
    /// Take the next job directly (without a worker pool).
    pub async fn recv(&mut self) -> Option<WorkItem> {
        self.rx.recv().await
    }
}

impl ChannelWorkQueue {
    /// Create a queue holding at most `capacity` pending jobs.
    pub fn new(capacity: usize) -> (Self, WorkReceiver) {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx,
                capacity,
                submitted: AtomicU64::new(0),
            },
            WorkReceiver { rx },
        )
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Jobs accepted so far.
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    /// Jobs waiting for a worker.
    pub fn pending(&self) -> usize {
        self.capacity - self.tx.capacity()
    }
}

impl WorkQueue for ChannelWorkQueue {
    fn enqueue(&self, event: AlarmEvent) -> Result<WorkHandle, EnqueueError> {
        let handle = WorkHandle::new(&event.event_id);
        let item = WorkItem {
            handle: handle.clone(),
            event,
        };
        match self.tx.try_send(item) {
            Ok(()) => {
                self.submitted.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    "📥 Queued alarm '{}' as {} (pending: {})",
                    handle.event_id,
                    handle.id,
                    self.pending()
                );
                Ok(handle)
            }
            Err(TrySendError::Full(_)) => Err(EnqueueError::Full(self.capacity)),
            Err(TrySendError::Closed(_)) => Err(EnqueueError::Closed),
        }
    }
}
