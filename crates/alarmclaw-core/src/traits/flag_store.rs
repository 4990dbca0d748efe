//! Flag store trait — remembers which alarm fired.

use crate::error::StoreError;
use crate::types::AlarmFlag;

/// Durable record of the last fired alarm, read later by the application.
///
/// Implementations must not block indefinitely and must tolerate concurrent
/// writers; the last `set` wins.
pub trait FlagStore: Send + Sync {
    /// Backend name (for logs).
    fn name(&self) -> &str;

    /// Record that `event_id` fired with `payload`.
    fn set(&self, event_id: &str, payload: &[u8]) -> Result<(), StoreError>;

    /// The last recorded alarm, if any.
    fn get(&self) -> Result<Option<AlarmFlag>, StoreError>;

    /// Forget the recorded alarm.
    fn clear(&self) -> Result<(), StoreError>;
}
