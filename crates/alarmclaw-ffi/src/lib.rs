//! Android FFI Layer — expose the alarm dispatcher as a native library.
//!
//! Architecture: AlarmBroadcastReceiver (Kotlin) → UniFFI → alarmclaw-ffi.so
//!
//! The host registers a [`HostBridge`] once and then forwards every fired
//! alarm's intent extras to [`on_alarm_fired`]:
//! - start_dispatcher(config, bridge)
//! - on_alarm_fired(extras_json) → DispatchResult JSON
//! - last_fired_alarm() → flag JSON / last_fired_alarm_id() → i64
//! - clear_alarm_flag()
//! - get_status() → JSON
//! - get_version() → String
//!
//! ## Safety
//! All FFI exports wrap their body in `catch_unwind` to prevent
//! Rust panics from crashing the JVM/Dalvik runtime.

pub mod bridge;

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use alarmclaw_core::config::AlarmClawConfig;
use alarmclaw_core::traits::FlagStore;
use alarmclaw_core::types::{AlarmEvent, DispatchResult, MISSING_ALARM_ID};
use alarmclaw_dispatch::{
    ChannelWorkQueue, Collaborators, DispatchSettings, RetryPolicy, WakeDispatcher, WorkerOptions,
    WorkerPool, WorkerStats, open_flag_store,
};
use serde::{Deserialize, Serialize};

pub use bridge::{BridgeHandler, BridgeLauncher, BridgePlatform, BridgePower, HostBridge};

/// Global dispatcher — initialized once via start_dispatcher().
static DISPATCHER: OnceLock<FfiDispatcher> = OnceLock::new();

/// Configuration passed from the host side.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FfiConfig {
    /// Path to alarmclaw.toml. Empty = built-in defaults.
    pub config_path: String,
    /// App-private directory for the alarm flag. Empty = config value.
    pub data_dir: String,
    /// The app's package name, used to resolve its launch intent.
    pub package_name: String,
}

/// Status snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FfiStatus {
    pub running: bool,
    pub uptime_secs: u64,
    pub alarms_dispatched: u64,
    pub jobs_processed: u64,
    pub jobs_failed: u64,
    pub version: String,
}

/// A started dispatcher with its own Tokio runtime for the worker pool.
pub struct FfiDispatcher {
    dispatcher: WakeDispatcher,
    flags: Arc<dyn FlagStore>,
    queue: Arc<ChannelWorkQueue>,
    workers: WorkerPool,
    started: Instant,
    // Dropped last: workers run on it.
    _runtime: tokio::runtime::Runtime,
}

impl FfiDispatcher {
    pub fn start(config: &FfiConfig, bridge: Arc<dyn HostBridge>) -> Result<Self, String> {
        let mut settings = if config.config_path.is_empty() {
            AlarmClawConfig::default()
        } else {
            AlarmClawConfig::load_from(Path::new(&config.config_path)).map_err(|e| e.to_string())?
        };
        if !config.data_dir.is_empty() {
            settings.flags.path = config.data_dir.clone();
        }
        if !config.package_name.is_empty() {
            settings.app.identity = config.package_name.clone();
        }

        // Lightweight runtime (edge-device friendly)
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .thread_name("alarmclaw-ffi")
            .build()
            .map_err(|e| format!("Failed to create runtime: {e}"))?;

        let flags = open_flag_store(&settings.flags).map_err(|e| e.to_string())?;
        let (queue, receiver) = ChannelWorkQueue::new(settings.queue.capacity);
        let queue = Arc::new(queue);

        let workers = {
            let _enter = runtime.enter();
            WorkerPool::spawn(
                receiver,
                Arc::new(BridgeHandler::new(bridge.clone())),
                WorkerOptions {
                    workers: settings.queue.workers,
                    retry: RetryPolicy::from_config(&settings.queue),
                    job_lease: None,
                },
            )
        };

        let launcher = Arc::new(BridgeLauncher::new(bridge.clone()));
        let dispatcher = WakeDispatcher::new(
            DispatchSettings::from_config(&settings),
            Collaborators {
                flags: flags.clone(),
                power: Arc::new(BridgePower::new(bridge.clone())),
                resolver: launcher.clone(),
                launcher,
                queue: queue.clone(),
                platform: Arc::new(BridgePlatform::new(bridge)),
            },
        );

        tracing::info!(
            "⏰ AlarmClaw dispatcher started for '{}' (flags: {})",
            settings.app.identity,
            flags.name()
        );

        Ok(Self {
            dispatcher,
            flags,
            queue,
            workers,
            started: Instant::now(),
            _runtime: runtime,
        })
    }

    /// Dispatch one alarm from its intent-extras JSON.
    pub fn on_alarm_fired(&self, extras_json: &str) -> Result<DispatchResult, String> {
        let event = AlarmEvent::from_intent_extras(extras_json).map_err(|e| e.to_string())?;
        Ok(self.dispatcher.dispatch(&event))
    }

    pub fn last_fired_alarm(&self) -> Result<Option<serde_json::Value>, String> {
        let flag = self.flags.get().map_err(|e| e.to_string())?;
        Ok(flag.map(|flag| {
            serde_json::json!({
                "id": flag.event_id,
                "numeric_id": flag.numeric_id().unwrap_or(MISSING_ALARM_ID),
                "payload": String::from_utf8_lossy(&flag.payload),
                "recorded_at": flag.recorded_at.to_rfc3339(),
            })
        }))
    }

    pub fn clear_alarm_flag(&self) -> Result<(), String> {
        self.flags.clear().map_err(|e| e.to_string())
    }

    pub fn worker_stats(&self) -> WorkerStats {
        self.workers.stats()
    }

    pub fn status(&self) -> FfiStatus {
        let workers = self.workers.stats();
        FfiStatus {
            running: true,
            uptime_secs: self.started.elapsed().as_secs(),
            alarms_dispatched: self.queue.submitted(),
            jobs_processed: workers.processed,
            jobs_failed: workers.failed,
            version: get_version(),
        }
    }
}

/// Start the dispatcher. Call once, before the first alarm can fire.
///
/// # Safety
/// Wraps in catch_unwind to prevent panics from crossing FFI boundary.
pub fn start_dispatcher(config: FfiConfig, bridge: Arc<dyn HostBridge>) -> Result<(), String> {
    catch_unwind(AssertUnwindSafe(|| {
        if DISPATCHER.get().is_some() {
            return Err("Dispatcher already running".to_string());
        }
        let dispatcher = FfiDispatcher::start(&config, bridge)?;
        DISPATCHER
            .set(dispatcher)
            .map_err(|_| "Dispatcher already running".to_string())
    }))
    .unwrap_or_else(|e| Err(format!("Panic: {}", panic_message(e))))
}

/// Handle a fired alarm. Returns the DispatchResult as JSON, or
/// `{"success":false,"error":...}` when the alarm could not be dispatched.
pub fn on_alarm_fired(extras_json: &str) -> String {
    catch_unwind(|| {
        let Some(dispatcher) = DISPATCHER.get() else {
            return error_json("Dispatcher not running");
        };
        match dispatcher.on_alarm_fired(extras_json) {
            Ok(result) => serde_json::to_string(&result).unwrap_or_else(|_| "{}".into()),
            Err(e) => error_json(&e),
        }
    })
    .unwrap_or_else(|_| error_json("panic"))
}

/// The last recorded alarm flag as JSON, `null` if none.
pub fn last_fired_alarm() -> String {
    catch_unwind(|| match DISPATCHER.get().map(|d| d.last_fired_alarm()) {
        Some(Ok(flag)) => serde_json::to_string(&flag).unwrap_or_else(|_| "null".into()),
        Some(Err(e)) => error_json(&e),
        None => error_json("Dispatcher not running"),
    })
    .unwrap_or_else(|_| error_json("panic"))
}

/// The last fired alarm's integer id, `-1` if none was recorded.
pub fn last_fired_alarm_id() -> i64 {
    catch_unwind(|| {
        DISPATCHER
            .get()
            .and_then(|d| d.flags.get().ok().flatten())
            .and_then(|flag| flag.numeric_id())
            .unwrap_or(MISSING_ALARM_ID)
    })
    .unwrap_or(MISSING_ALARM_ID)
}

/// Forget the last fired alarm (after the UI has shown it).
pub fn clear_alarm_flag() -> Result<(), String> {
    catch_unwind(|| match DISPATCHER.get() {
        Some(dispatcher) => dispatcher.clear_alarm_flag(),
        None => Err("Dispatcher not running".into()),
    })
    .unwrap_or_else(|_| Err("Panic in clear_alarm_flag".into()))
}

/// Status as JSON.
pub fn get_status() -> String {
    catch_unwind(|| {
        let status = match DISPATCHER.get() {
            Some(dispatcher) => dispatcher.status(),
            None => FfiStatus {
                running: false,
                uptime_secs: 0,
                alarms_dispatched: 0,
                jobs_processed: 0,
                jobs_failed: 0,
                version: get_version(),
            },
        };
        serde_json::to_string(&status).unwrap_or_else(|_| "{}".into())
    })
    .unwrap_or_else(|_| r#"{"running":false,"error":"panic"}"#.into())
}

/// Get AlarmClaw version string.
pub fn get_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn error_json(error: &str) -> String {
    serde_json::json!({ "success": false, "error": error }).to_string()
}

fn panic_message(e: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = e.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = e.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
