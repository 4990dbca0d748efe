//! Work queue trait — fire-and-forget submission of alarm processing.

use crate::error::EnqueueError;
use crate::types::{AlarmEvent, WorkHandle};

/// Accepts alarm processing jobs.
///
/// `enqueue` must return without waiting for the job to run.
pub trait WorkQueue: Send + Sync {
    fn enqueue(&self, event: AlarmEvent) -> Result<WorkHandle, EnqueueError>;
}
