//! Data model for the wake-and-dispatch path.

use std::borrow::Cow;
use std::ops::BitOr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AlarmClawError, Result};

/// Alarm id used by hosts that deliver an integer extra with no value set.
pub const MISSING_ALARM_ID: i64 = -1;

/// A fired alarm, as delivered by the OS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmEvent {
    /// Which scheduled alarm fired. Opaque to the dispatcher.
    pub event_id: String,
    /// Opaque payload passed at schedule time. May be empty.
    #[serde(default)]
    pub payload: Vec<u8>,
    /// When the OS fired the alarm.
    pub fired_at: DateTime<Utc>,
}

impl AlarmEvent {
    /// Create an event fired now.
    pub fn new(event_id: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            event_id: event_id.into(),
            payload: payload.into(),
            fired_at: Utc::now(),
        }
    }

    /// Payload as text (lossy for non-UTF-8 payloads).
    pub fn payload_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    /// Parse an event from the host's intent-extras JSON.
    ///
    /// Accepts `{"id": 7, "payload": ..., "fired_at": "..."}`. `id` may be an
    /// integer or a string; absent or of any other type it is `-1`. A string
    /// payload is taken verbatim; any other JSON payload is stored as its
    /// JSON text. A missing or malformed `fired_at` means now. Only input that
    /// is not a JSON object is rejected.
    pub fn from_intent_extras(json: &str) -> Result<Self> {
        let extras: serde_json::Value = serde_json::from_str(json)?;
        let obj = extras
            .as_object()
            .ok_or_else(|| AlarmClawError::InvalidEvent("expected a JSON object".into()))?;

        let event_id = match obj.get("id") {
            None | Some(serde_json::Value::Null) => MISSING_ALARM_ID.to_string(),
            Some(serde_json::Value::Number(n)) => n.to_string(),
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => {
                tracing::warn!("⚠️ Unsupported alarm id {other}, using {MISSING_ALARM_ID}");
                MISSING_ALARM_ID.to_string()
            }
        };

        let payload = match obj.get("payload") {
            None | Some(serde_json::Value::Null) => Vec::new(),
            Some(serde_json::Value::String(s)) => s.as_bytes().to_vec(),
            Some(other) => other.to_string().into_bytes(),
        };

        let fired_at = match obj.get("fired_at").and_then(|v| v.as_str()) {
            Some(ts) => DateTime::parse_from_rfc3339(ts)
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_else(|e| {
                    tracing::warn!("⚠️ Bad alarm fired_at '{ts}' ({e}), using now");
                    Utc::now()
                }),
            None => Utc::now(),
        };

        Ok(Self {
            event_id,
            payload,
            fired_at,
        })
    }
}

/// What the flag store remembers about the last fired alarm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmFlag {
    pub event_id: String,
    #[serde(default)]
    pub payload: Vec<u8>,
    pub recorded_at: DateTime<Utc>,
}

impl AlarmFlag {
    pub fn new(event_id: &str, payload: &[u8]) -> Self {
        Self {
            event_id: event_id.to_string(),
            payload: payload.to_vec(),
            recorded_at: Utc::now(),
        }
    }

    /// The alarm id as an integer, for hosts that schedule by numeric id.
    pub fn numeric_id(&self) -> Option<i64> {
        self.event_id.parse().ok()
    }
}

/// Activation flags carried by a launch request.
///
/// Bit values match the host activity flags so they can be handed across
/// the FFI boundary unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LaunchFlags(u32);

impl LaunchFlags {
    pub const NONE: Self = Self(0);
    /// Bring an existing task to the front instead of starting another.
    pub const REORDER_TO_FRONT: Self = Self(0x0002_0000);
    /// Reset the task to its root if it was left in an inconsistent state.
    pub const RESET_TASK_IF_NEEDED: Self = Self(0x0020_0000);
    /// Start a new task if none is running.
    pub const NEW_TASK: Self = Self(0x1000_0000);

    /// The flag set used to bring the app forward from an alarm.
    pub const fn foreground() -> Self {
        Self(Self::REORDER_TO_FRONT.0 | Self::NEW_TASK.0 | Self::RESET_TASK_IF_NEEDED.0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for LaunchFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Descriptor for bringing the application's primary surface forward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchRequest {
    /// Identity of the application being launched.
    pub target: String,
    /// Host-specific launch arguments (e.g. an argv for process launchers).
    #[serde(default)]
    pub args: Vec<String>,
    pub flags: LaunchFlags,
}

impl LaunchRequest {
    pub fn new(target: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            target: target.into(),
            args,
            flags: LaunchFlags::NONE,
        }
    }

    pub fn with_flags(mut self, flags: LaunchFlags) -> Self {
        self.flags = flags;
        self
    }
}

/// How a wake lease should be requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseSpec {
    /// Tag reported to the power subsystem.
    pub tag: String,
    /// Hard ceiling on how long the lease may be held.
    pub max_hold_ms: u64,
    /// Keep the screen on, not just the CPU.
    pub wakes_screen: bool,
    /// Turn the screen on when the lease is acquired.
    pub acquire_causes_wakeup: bool,
    /// Poke the user-activity timer on release so the screen stays on briefly.
    pub on_after_release: bool,
}

/// Default ceiling on a wake lease: 3 minutes.
pub const DEFAULT_MAX_HOLD_MS: u64 = 3 * 60 * 1000;

impl Default for LeaseSpec {
    fn default() -> Self {
        Self {
            tag: "AlarmClaw:AlarmWakeLock".into(),
            max_hold_ms: DEFAULT_MAX_HOLD_MS,
            wakes_screen: true,
            acquire_causes_wakeup: true,
            on_after_release: true,
        }
    }
}

impl LeaseSpec {
    pub fn max_hold(&self) -> Duration {
        Duration::from_millis(self.max_hold_ms)
    }

    /// Host power-lock level flags for this spec.
    pub fn level_flags(&self) -> u32 {
        const PARTIAL_WAKE_LOCK: u32 = 0x0000_0001;
        const FULL_WAKE_LOCK: u32 = 0x0000_001a;
        const ACQUIRE_CAUSES_WAKEUP: u32 = 0x1000_0000;
        const ON_AFTER_RELEASE: u32 = 0x2000_0000;

        let mut flags = if self.wakes_screen {
            FULL_WAKE_LOCK
        } else {
            PARTIAL_WAKE_LOCK
        };
        if self.acquire_causes_wakeup {
            flags |= ACQUIRE_CAUSES_WAKEUP;
        }
        if self.on_after_release {
            flags |= ON_AFTER_RELEASE;
        }
        flags
    }
}

/// Proof of a held lease, returned by a power manager.
#[derive(Debug, PartialEq, Eq)]
pub struct LeaseToken {
    pub id: u64,
    pub tag: String,
    pub acquired_at: DateTime<Utc>,
    pub max_hold_ms: u64,
}

/// Receipt for a job submitted to a work queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkHandle {
    pub id: String,
    pub event_id: String,
    pub submitted_at: DateTime<Utc>,
}

impl WorkHandle {
    pub fn new(event_id: &str) -> Self {
        Self {
            id: format!("work-{}", uuid::Uuid::new_v4()),
            event_id: event_id.to_string(),
            submitted_at: Utc::now(),
        }
    }
}

/// A non-fatal failure observed during a dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum DispatchFailure {
    FlagWrite(String),
    LeaseAcquisition(String),
    NoLaunchTarget,
    Launch(String),
    Enqueue(String),
}

impl DispatchFailure {
    /// Whether the alarm's actual work never started.
    pub fn is_severe(&self) -> bool {
        matches!(self, DispatchFailure::Enqueue(_))
    }
}

/// Per-invocation state transitions, in the order they happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStage {
    Start,
    FlagWritten,
    FlagSkipped,
    LeaseHeld,
    LeaseDegraded,
    LaunchSucceeded,
    LaunchFailed,
    LaunchSkipped,
    Enqueued,
    EnqueueFailed,
    LeaseReleased,
    OverlaysDismissed,
    Done,
}

/// Outcome of one dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchResult {
    pub flag_recorded: bool,
    pub lease_held: bool,
    pub launch_attempted: bool,
    pub launch_succeeded: bool,
    pub enqueued: bool,
    pub overlays_dismissed: bool,
    /// Handle of the submitted background job, if enqueue succeeded.
    pub work: Option<WorkHandle>,
    pub failures: Vec<DispatchFailure>,
    pub trace: Vec<DispatchStage>,
}

impl DispatchResult {
    pub fn started() -> Self {
        Self {
            trace: vec![DispatchStage::Start],
            ..Self::default()
        }
    }

    pub fn enter(&mut self, stage: DispatchStage) {
        self.trace.push(stage);
    }

    pub fn fail(&mut self, failure: DispatchFailure) {
        self.failures.push(failure);
    }

    pub fn is_done(&self) -> bool {
        self.trace.last() == Some(&DispatchStage::Done)
    }

    /// Position of a stage in the trace.
    pub fn stage_index(&self, stage: DispatchStage) -> Option<usize> {
        self.trace.iter().position(|s| *s == stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_extras_numeric_id() {
        let event = AlarmEvent::from_intent_extras(r#"{"id": 42, "payload": "wake"}"#).unwrap();
        assert_eq!(event.event_id, "42");
        assert_eq!(event.payload_text(), "wake");
    }

    #[test]
    fn test_intent_extras_missing_id() {
        let event = AlarmEvent::from_intent_extras(r#"{"payload": {"k": 1}}"#).unwrap();
        assert_eq!(event.event_id, "-1");
        assert_eq!(event.payload_text(), r#"{"k":1}"#);
    }

    #[test]
    fn test_intent_extras_fired_at() {
        let event =
            AlarmEvent::from_intent_extras(r#"{"id": "a", "fired_at": "2026-01-15T15:30:18Z"}"#)
                .unwrap();
        assert_eq!(event.fired_at.to_rfc3339(), "2026-01-15T15:30:18+00:00");
        assert!(event.payload.is_empty());
    }

    #[test]
    fn test_intent_extras_rejects_non_object() {
        assert!(AlarmEvent::from_intent_extras("[1, 2]").is_err());
        assert!(AlarmEvent::from_intent_extras("not json").is_err());
    }

    #[test]
    fn test_intent_extras_wrong_id_type_falls_back() {
        for json in [r#"{"id": [1]}"#, r#"{"id": true, "payload": "x"}"#, r#"{"id": {}}"#] {
            let event = AlarmEvent::from_intent_extras(json).unwrap();
            assert_eq!(event.event_id, "-1");
        }
    }

    #[test]
    fn test_intent_extras_bad_fired_at_is_now() {
        let before = Utc::now();
        let event =
            AlarmEvent::from_intent_extras(r#"{"id": 7, "fired_at": "yesterday"}"#).unwrap();
        assert_eq!(event.event_id, "7");
        assert!(event.fired_at >= before);
    }

    #[test]
    fn test_foreground_flags() {
        let flags = LaunchFlags::foreground();
        assert!(flags.contains(LaunchFlags::REORDER_TO_FRONT));
        assert!(flags.contains(LaunchFlags::NEW_TASK));
        assert!(flags.contains(LaunchFlags::RESET_TASK_IF_NEEDED));
        assert_eq!(flags.bits(), 0x1022_0000);
    }

    #[test]
    fn test_lease_spec_defaults() {
        let spec = LeaseSpec::default();
        assert_eq!(spec.max_hold(), Duration::from_secs(180));
        assert_eq!(spec.level_flags(), 0x3000_001a);

        let partial = LeaseSpec {
            wakes_screen: false,
            acquire_causes_wakeup: false,
            on_after_release: false,
            ..LeaseSpec::default()
        };
        assert_eq!(partial.level_flags(), 0x1);
    }

    #[test]
    fn test_flag_numeric_id() {
        assert_eq!(AlarmFlag::new("7", b"").numeric_id(), Some(7));
        assert_eq!(AlarmFlag::new("morning", b"").numeric_id(), None);
    }

    #[test]
    fn test_failure_severity() {
        assert!(DispatchFailure::Enqueue("closed".into()).is_severe());
        assert!(!DispatchFailure::NoLaunchTarget.is_severe());
    }
}
