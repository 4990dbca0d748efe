//! AlarmClaw configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AlarmClawError, Result};
use crate::types::{DEFAULT_MAX_HOLD_MS, LeaseSpec};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlarmClawConfig {
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub wake: WakeConfig,
    #[serde(default)]
    pub launch: LaunchConfig,
    #[serde(default)]
    pub flags: FlagsConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub platform: PlatformConfig,
}

impl AlarmClawConfig {
    /// Load config from the default path (~/.alarmclaw/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AlarmClawError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml(&content)
    }

    /// Parse config from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| AlarmClawError::Config(format!("Failed to parse config: {e}")))
    }

    /// Render config as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| AlarmClawError::Config(format!("Failed to serialize config: {e}")))
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, self.to_toml()?)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the AlarmClaw home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".alarmclaw")
    }
}

/// Application identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_identity")]
    pub identity: String,
}

fn default_identity() -> String { "alarmclaw".into() }

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            identity: default_identity(),
        }
    }
}

/// Wake lease configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WakeConfig {
    #[serde(default = "default_max_hold_ms")]
    pub max_hold_ms: u64,
    #[serde(default = "default_wake_tag")]
    pub tag: String,
    #[serde(default = "bool_true")]
    pub wakes_screen: bool,
    #[serde(default = "bool_true")]
    pub acquire_causes_wakeup: bool,
    #[serde(default = "bool_true")]
    pub on_after_release: bool,
    /// Max leases the in-process power manager grants at once.
    #[serde(default = "default_max_leases")]
    pub max_concurrent_leases: usize,
}

fn bool_true() -> bool { true }
fn default_max_hold_ms() -> u64 { DEFAULT_MAX_HOLD_MS }
fn default_wake_tag() -> String { "AlarmClaw:AlarmWakeLock".into() }
fn default_max_leases() -> usize { 16 }

impl Default for WakeConfig {
    fn default() -> Self {
        Self {
            max_hold_ms: default_max_hold_ms(),
            tag: default_wake_tag(),
            wakes_screen: true,
            acquire_causes_wakeup: true,
            on_after_release: true,
            max_concurrent_leases: default_max_leases(),
        }
    }
}

impl WakeConfig {
    pub fn lease_spec(&self) -> LeaseSpec {
        LeaseSpec {
            tag: self.tag.clone(),
            max_hold_ms: self.max_hold_ms,
            wakes_screen: self.wakes_screen,
            acquire_causes_wakeup: self.acquire_causes_wakeup,
            on_after_release: self.on_after_release,
        }
    }
}

/// Foreground launch configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LaunchConfig {
    /// Command that brings the app's surface up. Empty = no launch target.
    #[serde(default)]
    pub command: Vec<String>,
}

/// Flag store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlagsConfig {
    /// "file", "sqlite" or "memory".
    #[serde(default = "default_flags_backend")]
    pub backend: String,
    #[serde(default = "default_flags_path")]
    pub path: String,
}

fn default_flags_backend() -> String { "file".into() }
fn default_flags_path() -> String { "~/.alarmclaw/flags".into() }

impl Default for FlagsConfig {
    fn default() -> Self {
        Self {
            backend: default_flags_backend(),
            path: default_flags_path(),
        }
    }
}

impl FlagsConfig {
    /// Store directory with `~` expanded.
    pub fn resolved_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.path).to_string())
    }
}

/// Background work queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    /// Hold a wake lease per job while it runs on a worker.
    #[serde(default)]
    pub hold_lease_while_running: bool,
    /// Command run for each alarm. Empty = log the alarm only.
    #[serde(default)]
    pub handler_command: Vec<String>,
}

fn default_capacity() -> usize { 64 }
fn default_workers() -> usize { 2 }
fn default_max_attempts() -> u32 { 3 }
fn default_backoff_ms() -> u64 { 500 }

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            workers: default_workers(),
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
            hold_lease_while_running: false,
            handler_command: Vec::new(),
        }
    }
}

/// Platform configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Reported OS API level.
    #[serde(default = "default_sdk_version")]
    pub sdk_version: u32,
    /// Below this level the close-system-overlays signal is emitted.
    #[serde(default = "default_overlay_threshold")]
    pub legacy_overlay_threshold: u32,
}

fn default_sdk_version() -> u32 { 34 }
fn default_overlay_threshold() -> u32 { 31 }

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            sdk_version: default_sdk_version(),
            legacy_overlay_threshold: default_overlay_threshold(),
        }
    }
}
