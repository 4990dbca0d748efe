//! Host bridge — the callbacks the embedding app implements, and adapters
//! that present them to the dispatcher as its collaborator traits.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use alarmclaw_core::error::{AlarmClawError, LaunchError, LeaseError, Result};
use alarmclaw_core::traits::{AlarmHandler, LaunchTargetResolver, Launcher, Platform, PowerManager};
use alarmclaw_core::types::{AlarmEvent, LaunchRequest, LeaseSpec, LeaseToken};
use async_trait::async_trait;
use chrono::Utc;

/// Implemented on the host side (Kotlin via UniFFI callback interface).
///
/// Calls arrive on the thread that invoked `on_alarm_fired`, except
/// `run_alarm_callback`, which runs on a blocking worker thread.
pub trait HostBridge: Send + Sync {
    /// Acquire a wake lock. `level_flags` are the platform's wake-lock
    /// level bits; the host must auto-release after `timeout_ms`.
    fn acquire_wake_lock(
        &self,
        lease_id: u64,
        tag: &str,
        level_flags: u32,
        timeout_ms: u64,
    ) -> std::result::Result<(), String>;
    fn release_wake_lock(&self, lease_id: u64);
    /// Whether `package` has a launchable entry point.
    fn has_launch_intent(&self, package: &str) -> bool;
    fn start_activity(&self, package: &str, flags: u32) -> std::result::Result<(), String>;
    fn sdk_int(&self) -> u32;
    /// Broadcast the close-system-dialogs intent.
    fn close_system_dialogs(&self);
    /// Run the registered alarm callback for one alarm.
    fn run_alarm_callback(&self, event_id: &str, payload: &[u8]) -> std::result::Result<(), String>;
}

/// Wake locks through the host's power service.
pub struct BridgePower {
    bridge: Arc<dyn HostBridge>,
    next_id: AtomicU64,
}

impl BridgePower {
    pub fn new(bridge: Arc<dyn HostBridge>) -> Self {
        Self {
            bridge,
            next_id: AtomicU64::new(1),
        }
    }
}

impl PowerManager for BridgePower {
    fn acquire(&self, spec: &LeaseSpec) -> std::result::Result<LeaseToken, LeaseError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.bridge
            .acquire_wake_lock(id, &spec.tag, spec.level_flags(), spec.max_hold_ms)
            .map_err(LeaseError::Denied)?;
        Ok(LeaseToken {
            id,
            tag: spec.tag.clone(),
            acquired_at: Utc::now(),
            max_hold_ms: spec.max_hold_ms,
        })
    }

    fn release(&self, token: LeaseToken) {
        self.bridge.release_wake_lock(token.id);
    }
}

/// Launch intents through the host's package manager.
pub struct BridgeLauncher {
    bridge: Arc<dyn HostBridge>,
}

impl BridgeLauncher {
    pub fn new(bridge: Arc<dyn HostBridge>) -> Self {
        Self { bridge }
    }
}

impl LaunchTargetResolver for BridgeLauncher {
    fn resolve_launch_target(&self, identity: &str) -> Option<LaunchRequest> {
        self.bridge
            .has_launch_intent(identity)
            .then(|| LaunchRequest::new(identity, Vec::new()))
    }
}

impl Launcher for BridgeLauncher {
    fn launch(&self, request: &LaunchRequest) -> std::result::Result<(), LaunchError> {
        self.bridge
            .start_activity(&request.target, request.flags.bits())
            .map_err(|e| {
                if e.contains("SecurityException") {
                    LaunchError::Security(e)
                } else {
                    LaunchError::Rejected(e)
                }
            })
    }
}

pub struct BridgePlatform {
    bridge: Arc<dyn HostBridge>,
}

impl BridgePlatform {
    pub fn new(bridge: Arc<dyn HostBridge>) -> Self {
        Self { bridge }
    }
}

impl Platform for BridgePlatform {
    fn sdk_version(&self) -> u32 {
        self.bridge.sdk_int()
    }

    fn close_system_overlays(&self) {
        self.bridge.close_system_dialogs();
    }
}

/// Runs queued alarms through the host's registered callback.
pub struct BridgeHandler {
    bridge: Arc<dyn HostBridge>,
}

impl BridgeHandler {
    pub fn new(bridge: Arc<dyn HostBridge>) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl AlarmHandler for BridgeHandler {
    fn name(&self) -> &str {
        "host-callback"
    }

    async fn handle(&self, event: &AlarmEvent) -> Result<()> {
        let bridge = self.bridge.clone();
        let event = event.clone();
        tokio::task::spawn_blocking(move || bridge.run_alarm_callback(&event.event_id, &event.payload))
            .await
            .map_err(|e| AlarmClawError::Handler(format!("alarm callback crashed: {e}")))?
            .map_err(AlarmClawError::Handler)
    }
}
