//! Host platform — reports the configured OS level and emits the
//! close-system-overlays signal as a log broadcast.

use std::sync::atomic::{AtomicU64, Ordering};

use alarmclaw_core::config::PlatformConfig;
use alarmclaw_core::traits::Platform;

pub struct HostPlatform {
    sdk_version: u32,
    overlay_signals: AtomicU64,
}

impl HostPlatform {
    pub fn new(sdk_version: u32) -> Self {
        Self {
            sdk_version,
            overlay_signals: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &PlatformConfig) -> Self {
        Self::new(config.sdk_version)
    }

    /// How many close-system-overlays signals were emitted.
    pub fn overlay_signals(&self) -> u64 {
        self.overlay_signals.load(Ordering::Relaxed)
    }
}

impl Platform for HostPlatform {
    fn sdk_version(&self) -> u32 {
        self.sdk_version
    }

    fn close_system_overlays(&self) {
        self.overlay_signals.fetch_add(1, Ordering::Relaxed);
        tracing::info!("📣 Broadcast: close system overlays (sdk {})", self.sdk_version);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_signals() {
        let platform = HostPlatform::from_config(&PlatformConfig {
            sdk_version: 28,
            legacy_overlay_threshold: 31,
        });
        assert_eq!(platform.sdk_version(), 28);
        platform.close_system_overlays();
        platform.close_system_overlays();
        assert_eq!(platform.overlay_signals(), 2);
    }
}
