//! Event source trait — where fired alarms come from.

use async_trait::async_trait;

use crate::types::AlarmEvent;

/// Delivers fired alarms. Stands in for the OS receiver registration.
#[async_trait]
pub trait AlarmEventSource: Send {
    /// Next fired alarm; `None` once the source is exhausted.
    async fn next_event(&mut self) -> Option<AlarmEvent>;
}
