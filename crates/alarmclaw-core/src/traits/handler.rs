//! Alarm handler trait — the background work an alarm triggers.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::AlarmEvent;

/// Runs the application's alarm logic on a worker.
#[async_trait]
pub trait AlarmHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn handle(&self, event: &AlarmEvent) -> Result<()>;
}
