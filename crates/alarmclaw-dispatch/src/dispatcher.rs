//! Wake dispatcher — the fixed reaction to a fired alarm.
//!
//! ```text
//! fired alarm
//!   ├── 1. record flag            (best-effort)
//!   ├── 2. acquire wake lease     (degraded mode on failure)
//!   ├── 3. resolve launch target  (skip launch if none)
//!   ├── 4. launch app             (failure logged, never fatal)
//!   ├── 5. enqueue processing     (always, non-blocking)
//!   ├── 6. release wake lease     (after submission, not completion)
//!   └── 7. close system overlays  (legacy OS versions only)
//! ```
//!
//! Every collaborator call is isolated: an error or a panic in one step is
//! logged, folded into the `DispatchResult`, and the next step runs. The
//! lease is a `WakeLease` guard, so it is released even if the dispatcher
//! itself unwinds.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use alarmclaw_core::config::AlarmClawConfig;
use alarmclaw_core::error::LaunchError;
use alarmclaw_core::traits::{
    FlagStore, LaunchTargetResolver, Launcher, Platform, PowerManager, WorkQueue,
};
use alarmclaw_core::types::{
    AlarmEvent, DispatchFailure, DispatchResult, DispatchStage, LaunchFlags, LeaseSpec,
};

use crate::lease::WakeLease;

/// Static settings of a dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchSettings {
    /// The application's own identity, used to resolve its launch target.
    pub identity: String,
    pub lease: LeaseSpec,
    /// Platform versions below this get the close-system-overlays signal.
    pub legacy_overlay_threshold: u32,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            identity: "alarmclaw".into(),
            lease: LeaseSpec::default(),
            legacy_overlay_threshold: 31,
        }
    }
}

impl DispatchSettings {
    pub fn from_config(config: &AlarmClawConfig) -> Self {
        Self {
            identity: config.app.identity.clone(),
            lease: config.wake.lease_spec(),
            legacy_overlay_threshold: config.platform.legacy_overlay_threshold,
        }
    }

    /// Whether a platform at `sdk` still shows system overlays over a
    /// launched activity.
    pub fn is_legacy(&self, sdk: u32) -> bool {
        sdk < self.legacy_overlay_threshold
    }
}

/// Everything the dispatcher talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub flags: Arc<dyn FlagStore>,
    pub power: Arc<dyn PowerManager>,
    pub resolver: Arc<dyn LaunchTargetResolver>,
    pub launcher: Arc<dyn Launcher>,
    pub queue: Arc<dyn WorkQueue>,
    pub platform: Arc<dyn Platform>,
}

/// Reacts to fired alarms. Holds no per-invocation state, so one
/// dispatcher can serve concurrent alarms from many threads.
pub struct WakeDispatcher {
    settings: DispatchSettings,
    parts: Collaborators,
}

impl WakeDispatcher {
    pub fn new(settings: DispatchSettings, parts: Collaborators) -> Self {
        Self { settings, parts }
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// Handle one fired alarm. Always returns; never leaves the lease held.
    pub fn dispatch(&self, event: &AlarmEvent) -> DispatchResult {
        tracing::info!("⏰ Alarm received: '{}'", event.event_id);
        if event.event_id.is_empty() {
            tracing::warn!("⚠️ Alarm fired with an empty id");
        }

        let mut result = DispatchResult::started();

        self.record_flag(event, &mut result);
        let lease = self.acquire_lease(&mut result);
        self.launch_app(&mut result);
        self.enqueue_work(event, &mut result);

        if let Some(lease) = lease {
            let held = lease.release();
            result.enter(DispatchStage::LeaseReleased);
            tracing::debug!("Alarm '{}' held awake for {:?}", event.event_id, held);
        }

        self.dismiss_overlays(&mut result);

        result.enter(DispatchStage::Done);
        tracing::info!(
            "🏁 Alarm '{}' dispatched (flag: {}, launch: {}, enqueued: {}, failures: {})",
            event.event_id,
            result.flag_recorded,
            result.launch_succeeded,
            result.enqueued,
            result.failures.len()
        );
        result
    }

    fn record_flag(&self, event: &AlarmEvent, result: &mut DispatchResult) {
        let flags = &self.parts.flags;
        match isolate(|| flags.set(&event.event_id, &event.payload)) {
            Ok(Ok(())) => {
                result.flag_recorded = true;
                result.enter(DispatchStage::FlagWritten);
            }
            Ok(Err(e)) => self.flag_failed(e.to_string(), result),
            Err(panic) => self.flag_failed(panic, result),
        }
    }

    fn flag_failed(&self, reason: String, result: &mut DispatchResult) {
        tracing::warn!(
            "⚠️ Failed to record alarm flag in {} store: {}",
            self.parts.flags.name(),
            reason
        );
        result.fail(DispatchFailure::FlagWrite(reason));
        result.enter(DispatchStage::FlagSkipped);
    }

    fn acquire_lease(&self, result: &mut DispatchResult) -> Option<WakeLease> {
        let power = self.parts.power.clone();
        let spec = &self.settings.lease;
        let reason = match isolate(|| WakeLease::acquire(power, spec)) {
            Ok(Ok(lease)) => {
                result.lease_held = true;
                result.enter(DispatchStage::LeaseHeld);
                return Some(lease);
            }
            Ok(Err(e)) => e.to_string(),
            Err(panic) => panic,
        };
        tracing::warn!("⚠️ No wake lease, dispatching in degraded mode: {}", reason);
        result.fail(DispatchFailure::LeaseAcquisition(reason));
        result.enter(DispatchStage::LeaseDegraded);
        None
    }

    fn launch_app(&self, result: &mut DispatchResult) {
        let resolver = &self.parts.resolver;
        let identity = self.settings.identity.as_str();
        let request = match isolate(|| resolver.resolve_launch_target(identity)) {
            Ok(Some(request)) => request.with_flags(LaunchFlags::foreground()),
            Ok(None) => {
                tracing::warn!("⚠️ No launch target for '{}', skipping launch", identity);
                result.fail(DispatchFailure::NoLaunchTarget);
                result.enter(DispatchStage::LaunchSkipped);
                return;
            }
            Err(panic) => {
                tracing::warn!("⚠️ Launch target resolution panicked: {}", panic);
                result.fail(DispatchFailure::NoLaunchTarget);
                result.enter(DispatchStage::LaunchSkipped);
                return;
            }
        };

        result.launch_attempted = true;
        let launcher = &self.parts.launcher;
        let reason = match isolate(|| launcher.launch(&request)) {
            Ok(Ok(())) => {
                tracing::info!("📱 App '{}' launched", request.target);
                result.launch_succeeded = true;
                result.enter(DispatchStage::LaunchSucceeded);
                return;
            }
            Ok(Err(e)) => e.to_string(),
            Err(panic) => LaunchError::Panicked(panic).to_string(),
        };
        tracing::warn!("⚠️ Failed to launch app '{}': {}", request.target, reason);
        result.fail(DispatchFailure::Launch(reason));
        result.enter(DispatchStage::LaunchFailed);
    }

    fn enqueue_work(&self, event: &AlarmEvent, result: &mut DispatchResult) {
        let queue = &self.parts.queue;
        let reason = match isolate(|| queue.enqueue(event.clone())) {
            Ok(Ok(handle)) => {
                result.enqueued = true;
                result.work = Some(handle);
                result.enter(DispatchStage::Enqueued);
                return;
            }
            Ok(Err(e)) => e.to_string(),
            Err(panic) => format!("work queue panicked: {panic}"),
        };
        tracing::error!(
            "❌ Alarm '{}' was not queued, its work will not run: {}",
            event.event_id,
            reason
        );
        result.fail(DispatchFailure::Enqueue(reason));
        result.enter(DispatchStage::EnqueueFailed);
    }

    fn dismiss_overlays(&self, result: &mut DispatchResult) {
        let platform = &self.parts.platform;
        let sdk = match isolate(|| platform.sdk_version()) {
            Ok(sdk) => sdk,
            Err(panic) => {
                tracing::warn!("⚠️ Could not read platform version: {}", panic);
                return;
            }
        };
        if !self.settings.is_legacy(sdk) {
            return;
        }
        match isolate(|| platform.close_system_overlays()) {
            Ok(()) => {
                result.overlays_dismissed = true;
                result.enter(DispatchStage::OverlaysDismissed);
            }
            Err(panic) => tracing::warn!("⚠️ Close-system-overlays signal failed: {}", panic),
        }
    }
}

/// Run one collaborator call, turning a panic into an error message.
fn isolate<T>(f: impl FnOnce() -> T) -> Result<T, String> {
    catch_unwind(AssertUnwindSafe(f)).map_err(|e| {
        if let Some(s) = e.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = e.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alarmclaw_core::error::{EnqueueError, LeaseError, StoreError};
    use alarmclaw_core::types::{AlarmFlag, LaunchRequest, LeaseToken, WorkHandle};
    use chrono::Utc;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

    /// Shared log of collaborator calls, in order.
    #[derive(Default)]
    struct CallLog(Mutex<Vec<&'static str>>);

    impl CallLog {
        fn push(&self, call: &'static str) {
            self.0.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<&'static str> {
            self.0.lock().unwrap().clone()
        }

        fn count(&self, call: &str) -> usize {
            self.calls().iter().filter(|c| **c == call).count()
        }
    }

    #[derive(Clone, Copy, PartialEq)]
    enum Mode {
        Ok,
        Fail,
        Panic,
    }

    struct Fixture {
        log: Arc<CallLog>,
        flag_mode: Mode,
        lease_mode: Mode,
        has_target: bool,
        launch_mode: Mode,
        enqueue_mode: Mode,
        sdk: u32,
        enqueued: Arc<Mutex<Vec<AlarmEvent>>>,
        held: Arc<AtomicUsize>,
    }

    impl Default for Fixture {
        fn default() -> Self {
            Self {
                log: Arc::new(CallLog::default()),
                flag_mode: Mode::Ok,
                lease_mode: Mode::Ok,
                has_target: true,
                launch_mode: Mode::Ok,
                enqueue_mode: Mode::Ok,
                sdk: 34,
                enqueued: Arc::new(Mutex::new(Vec::new())),
                held: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    struct Flags(Arc<CallLog>, Mode);

    impl FlagStore for Flags {
        fn name(&self) -> &str {
            "mock"
        }
        fn set(&self, _event_id: &str, _payload: &[u8]) -> Result<(), StoreError> {
            self.0.push("flag");
            match self.1 {
                Mode::Ok => Ok(()),
                Mode::Fail => Err(StoreError::Unavailable("disk gone".into())),
                Mode::Panic => panic!("flag store bug"),
            }
        }
        fn get(&self) -> Result<Option<AlarmFlag>, StoreError> {
            Ok(None)
        }
        fn clear(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    struct Power {
        log: Arc<CallLog>,
        mode: Mode,
        held: Arc<AtomicUsize>,
        next: AtomicU64,
    }

    impl PowerManager for Power {
        fn acquire(&self, spec: &LeaseSpec) -> Result<LeaseToken, LeaseError> {
            self.log.push("acquire");
            match self.mode {
                Mode::Ok => {
                    self.held.fetch_add(1, Ordering::SeqCst);
                    Ok(LeaseToken {
                        id: self.next.fetch_add(1, Ordering::SeqCst),
                        tag: spec.tag.clone(),
                        acquired_at: Utc::now(),
                        max_hold_ms: spec.max_hold_ms,
                    })
                }
                Mode::Fail => Err(LeaseError::Exhausted { held: 0, limit: 0 }),
                Mode::Panic => panic!("power service bug"),
            }
        }
        fn release(&self, _token: LeaseToken) {
            self.log.push("release");
            self.held.fetch_sub(1, Ordering::SeqCst);
        }
    }

    struct Launch(Arc<CallLog>, bool, Mode);

    impl LaunchTargetResolver for Launch {
        fn resolve_launch_target(&self, identity: &str) -> Option<LaunchRequest> {
            self.0.push("resolve");
            self.1.then(|| LaunchRequest::new(identity, vec![]))
        }
    }

    impl Launcher for Launch {
        fn launch(&self, request: &LaunchRequest) -> Result<(), LaunchError> {
            self.0.push("launch");
            assert_eq!(request.flags, LaunchFlags::foreground());
            match self.2 {
                Mode::Ok => Ok(()),
                Mode::Fail => Err(LaunchError::Throttled),
                Mode::Panic => panic!("launcher bug"),
            }
        }
    }

    struct Queue(Arc<CallLog>, Mode, Arc<Mutex<Vec<AlarmEvent>>>);

    impl WorkQueue for Queue {
        fn enqueue(&self, event: AlarmEvent) -> Result<WorkHandle, EnqueueError> {
            self.0.push("enqueue");
            self.2.lock().unwrap().push(event.clone());
            match self.1 {
                Mode::Ok => Ok(WorkHandle::new(&event.event_id)),
                Mode::Fail => Err(EnqueueError::Closed),
                Mode::Panic => panic!("queue bug"),
            }
        }
    }

    struct Os(Arc<CallLog>, u32, AtomicBool);

    impl Platform for Os {
        fn sdk_version(&self) -> u32 {
            self.1
        }
        fn close_system_overlays(&self) {
            self.0.push("overlays");
            self.2.store(true, Ordering::SeqCst);
        }
    }

    impl Fixture {
        fn dispatcher(&self) -> WakeDispatcher {
            let launch = Arc::new(Launch(self.log.clone(), self.has_target, self.launch_mode));
            WakeDispatcher::new(
                DispatchSettings::default(),
                Collaborators {
                    flags: Arc::new(Flags(self.log.clone(), self.flag_mode)),
                    power: Arc::new(Power {
                        log: self.log.clone(),
                        mode: self.lease_mode,
                        held: self.held.clone(),
                        next: AtomicU64::new(1),
                    }),
                    resolver: launch.clone(),
                    launcher: launch,
                    queue: Arc::new(Queue(self.log.clone(), self.enqueue_mode, self.enqueued.clone())),
                    platform: Arc::new(Os(self.log.clone(), self.sdk, AtomicBool::new(false))),
                },
            )
        }
    }

    fn event() -> AlarmEvent {
        AlarmEvent::new("42", "payload")
    }

    #[test]
    fn test_scenario_a_happy_path() {
        let fx = Fixture::default();
        let result = fx.dispatcher().dispatch(&event());

        assert!(result.flag_recorded);
        assert!(result.lease_held);
        assert!(result.launch_attempted);
        assert!(result.launch_succeeded);
        assert!(result.enqueued);
        assert!(result.work.is_some());
        assert!(result.failures.is_empty());
        assert!(result.is_done());
        assert_eq!(
            fx.log.calls(),
            vec!["flag", "acquire", "resolve", "launch", "enqueue", "release"]
        );
    }

    #[test]
    fn test_scenario_b_no_launch_target() {
        let fx = Fixture {
            has_target: false,
            ..Fixture::default()
        };
        let result = fx.dispatcher().dispatch(&event());

        assert!(!result.launch_attempted);
        assert!(!result.launch_succeeded);
        assert!(result.enqueued);
        assert_eq!(fx.log.count("launch"), 0);
        assert_eq!(result.failures, vec![DispatchFailure::NoLaunchTarget]);
        assert!(result.stage_index(DispatchStage::LaunchSkipped).is_some());
    }

    #[test]
    fn test_scenario_c_lease_exhausted() {
        let fx = Fixture {
            lease_mode: Mode::Fail,
            ..Fixture::default()
        };
        let result = fx.dispatcher().dispatch(&event());

        assert!(result.is_done());
        assert!(!result.lease_held);
        assert!(result.enqueued);
        assert!(result.launch_succeeded);
        assert_eq!(fx.log.count("release"), 0);
        assert!(result.stage_index(DispatchStage::LeaseDegraded).is_some());
        assert!(matches!(
            result.failures.as_slice(),
            [DispatchFailure::LeaseAcquisition(_)]
        ));
    }

    #[test]
    fn test_scenario_d_legacy_overlays() {
        let legacy = Fixture {
            sdk: 30,
            ..Fixture::default()
        };
        let result = legacy.dispatcher().dispatch(&event());
        assert!(result.overlays_dismissed);
        assert_eq!(legacy.log.count("overlays"), 1);
        let enqueued = result.stage_index(DispatchStage::Enqueued).unwrap();
        let dismissed = result.stage_index(DispatchStage::OverlaysDismissed).unwrap();
        assert!(dismissed > enqueued);

        for sdk in [31, 34] {
            let modern = Fixture {
                sdk,
                ..Fixture::default()
            };
            let result = modern.dispatcher().dispatch(&event());
            assert!(!result.overlays_dismissed);
            assert_eq!(modern.log.count("overlays"), 0);
        }
    }

    #[test]
    fn test_lease_conserved_under_every_failure() {
        let modes = [Mode::Ok, Mode::Fail, Mode::Panic];
        for flag_mode in modes {
            for launch_mode in modes {
                for enqueue_mode in modes {
                    let fx = Fixture {
                        flag_mode,
                        launch_mode,
                        enqueue_mode,
                        ..Fixture::default()
                    };
                    let result = fx.dispatcher().dispatch(&event());

                    assert!(result.is_done());
                    assert_eq!(fx.log.count("acquire"), 1);
                    assert_eq!(fx.log.count("release"), 1);
                    assert_eq!(fx.held.load(Ordering::SeqCst), 0);

                    // Release happens after the submission attempt.
                    let calls = fx.log.calls();
                    let enqueue = calls.iter().position(|c| *c == "enqueue").unwrap();
                    let release = calls.iter().position(|c| *c == "release").unwrap();
                    assert!(release > enqueue);
                }
            }
        }
    }

    #[test]
    fn test_enqueue_exactly_once_for_every_launch_outcome() {
        let cases = [
            (true, Mode::Ok),
            (true, Mode::Fail),
            (true, Mode::Panic),
            (false, Mode::Ok),
        ];
        for (has_target, launch_mode) in cases {
            let fx = Fixture {
                has_target,
                launch_mode,
                ..Fixture::default()
            };
            let original = event();
            let result = fx.dispatcher().dispatch(&original);

            assert!(result.enqueued);
            let enqueued = fx.enqueued.lock().unwrap();
            assert_eq!(enqueued.len(), 1);
            assert_eq!(enqueued[0], original);
        }
    }

    #[test]
    fn test_flag_failure_does_not_stop_dispatch() {
        for flag_mode in [Mode::Fail, Mode::Panic] {
            let fx = Fixture {
                flag_mode,
                sdk: 29,
                ..Fixture::default()
            };
            let result = fx.dispatcher().dispatch(&event());

            assert!(!result.flag_recorded);
            assert!(result.lease_held);
            assert!(result.launch_succeeded);
            assert!(result.enqueued);
            assert!(result.overlays_dismissed);
            assert!(matches!(result.failures[0], DispatchFailure::FlagWrite(_)));
        }
    }

    #[test]
    fn test_launch_failure_is_recorded() {
        let fx = Fixture {
            launch_mode: Mode::Fail,
            ..Fixture::default()
        };
        let result = fx.dispatcher().dispatch(&event());
        assert!(result.launch_attempted);
        assert!(!result.launch_succeeded);
        assert!(result.stage_index(DispatchStage::LaunchFailed).is_some());
    }

    #[test]
    fn test_enqueue_failure_is_severe() {
        let fx = Fixture {
            enqueue_mode: Mode::Fail,
            ..Fixture::default()
        };
        let result = fx.dispatcher().dispatch(&event());
        assert!(!result.enqueued);
        assert!(result.work.is_none());
        assert!(result.failures.iter().any(|f| f.is_severe()));
        assert!(result.stage_index(DispatchStage::EnqueueFailed).is_some());
    }

    #[test]
    fn test_total_failure_still_completes() {
        let fx = Fixture {
            flag_mode: Mode::Panic,
            lease_mode: Mode::Panic,
            has_target: true,
            launch_mode: Mode::Panic,
            enqueue_mode: Mode::Panic,
            ..Fixture::default()
        };
        let result = fx.dispatcher().dispatch(&event());
        assert!(result.is_done());
        assert!(!result.flag_recorded && !result.lease_held && !result.enqueued);
        assert_eq!(result.failures.len(), 4);
        assert_eq!(fx.held.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_same_event_twice_is_independent() {
        let fx = Fixture::default();
        let dispatcher = fx.dispatcher();
        let original = event();

        let first = dispatcher.dispatch(&original);
        let second = dispatcher.dispatch(&original);

        assert_eq!(first.trace, second.trace);
        assert_ne!(first.work, second.work);
        assert_eq!(fx.log.count("acquire"), 2);
        assert_eq!(fx.log.count("release"), 2);
        assert_eq!(fx.enqueued.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_concurrent_dispatches_hold_separate_leases() {
        let fx = Fixture::default();
        let dispatcher = Arc::new(fx.dispatcher());

        let threads: Vec<_> = (0..8)
            .map(|i| {
                let dispatcher = dispatcher.clone();
                std::thread::spawn(move || dispatcher.dispatch(&AlarmEvent::new(i.to_string(), "")))
            })
            .collect();
        for t in threads {
            assert!(t.join().unwrap().enqueued);
        }

        assert_eq!(fx.log.count("acquire"), 8);
        assert_eq!(fx.log.count("release"), 8);
        assert_eq!(fx.held.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = AlarmClawConfig::default();
        config.app.identity = "clock".into();
        config.wake.max_hold_ms = 1_000;
        let settings = DispatchSettings::from_config(&config);
        assert_eq!(settings.identity, "clock");
        assert_eq!(settings.lease.max_hold_ms, 1_000);
        assert_eq!(settings.legacy_overlay_threshold, 31);
        assert!(settings.is_legacy(30));
        assert!(!settings.is_legacy(31));

        config.platform.legacy_overlay_threshold = 0;
        assert!(!DispatchSettings::from_config(&config).is_legacy(0));
    }
}
