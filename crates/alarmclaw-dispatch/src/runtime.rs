//! Alarm runtime — wires the dispatcher, its collaborators and the worker
//! pool from one `AlarmClawConfig`.

use std::sync::Arc;
use std::time::Duration;

use alarmclaw_core::config::AlarmClawConfig;
use alarmclaw_core::error::Result;
use alarmclaw_core::traits::{AlarmHandler, FlagStore, PowerManager};
use alarmclaw_core::types::{AlarmEvent, DispatchResult};

use crate::dispatcher::{Collaborators, DispatchSettings, WakeDispatcher};
use crate::handler::{CommandHandler, LogHandler};
use crate::launch::CommandLauncher;
use crate::platform::HostPlatform;
use crate::power::{PowerStats, ProcessPowerManager};
use crate::queue::ChannelWorkQueue;
use crate::store::open_flag_store;
use crate::worker::{RetryPolicy, WorkerOptions, WorkerPool, WorkerStats};

/// A running dispatcher plus the workers behind its queue.
pub struct AlarmRuntime {
    dispatcher: Arc<WakeDispatcher>,
    flags: Arc<dyn FlagStore>,
    power: Arc<ProcessPowerManager>,
    queue: Arc<ChannelWorkQueue>,
    workers: WorkerPool,
}

impl AlarmRuntime {
    /// Build everything from config. Must be called inside a tokio runtime.
    pub fn from_config(config: &AlarmClawConfig) -> Result<Self> {
        let flags = open_flag_store(&config.flags)?;
        let power = Arc::new(ProcessPowerManager::new(config.wake.max_concurrent_leases));
        let launcher = Arc::new(CommandLauncher::new(config.launch.command.clone()));
        let platform = Arc::new(HostPlatform::from_config(&config.platform));
        let (queue, receiver) = ChannelWorkQueue::new(config.queue.capacity);
        let queue = Arc::new(queue);

        let handler: Arc<dyn AlarmHandler> = if config.queue.handler_command.is_empty() {
            Arc::new(LogHandler)
        } else {
            Arc::new(CommandHandler::new(config.queue.handler_command.clone())?)
        };

        let job_lease = config.queue.hold_lease_while_running.then(|| {
            (
                power.clone() as Arc<dyn PowerManager>,
                config.wake.lease_spec(),
            )
        });
        let workers = WorkerPool::spawn(
            receiver,
            handler,
            WorkerOptions {
                workers: config.queue.workers,
                retry: RetryPolicy::from_config(&config.queue),
                job_lease,
            },
        );

        let dispatcher = Arc::new(WakeDispatcher::new(
            DispatchSettings::from_config(config),
            Collaborators {
                flags: flags.clone(),
                power: power.clone(),
                resolver: launcher.clone(),
                launcher,
                queue: queue.clone(),
                platform,
            },
        ));

        tracing::info!(
            "🚀 Alarm runtime ready: flags={}, workers={}, queue={}, sdk={}",
            flags.name(),
            config.queue.workers.max(1),
            queue.capacity(),
            config.platform.sdk_version
        );

        Ok(Self {
            dispatcher,
            flags,
            power,
            queue,
            workers,
        })
    }

    pub fn dispatcher(&self) -> Arc<WakeDispatcher> {
        self.dispatcher.clone()
    }

    pub fn flags(&self) -> Arc<dyn FlagStore> {
        self.flags.clone()
    }

    /// Dispatch one alarm off the async executor.
    pub async fn fire(&self, event: AlarmEvent) -> DispatchResult {
        let dispatcher = self.dispatcher.clone();
        let event_id = event.event_id.clone();
        match tokio::task::spawn_blocking(move || dispatcher.dispatch(&event)).await {
            Ok(result) => result,
            Err(e) => {
                // Only reachable if the dispatcher itself panics.
                tracing::error!("❌ Dispatch of '{}' crashed: {e}", event_id);
                DispatchResult::default()
            }
        }
    }

    pub fn power_stats(&self) -> PowerStats {
        self.power.stats()
    }

    pub fn worker_stats(&self) -> WorkerStats {
        self.workers.stats()
    }

    /// Jobs accepted by the queue so far.
    pub fn submitted(&self) -> u64 {
        self.queue.submitted()
    }

    /// Stop accepting alarms and wait up to `timeout` for queued work.
    ///
    /// The queue only closes once every dispatcher handle is gone, so any
    /// clone taken from [`AlarmRuntime::dispatcher`] must be dropped first.
    pub async fn shutdown(self, timeout: Duration) -> WorkerStats {
        let Self {
            dispatcher,
            queue,
            workers,
            ..
        } = self;
        drop(dispatcher);
        drop(queue);

        let last = workers.stats();
        match tokio::time::timeout(timeout, workers.join()).await {
            Ok(stats) => stats,
            Err(_) => {
                tracing::warn!(
                    "⚠️ Workers still busy after {:?}, abandoning queued alarms",
                    timeout
                );
                last
            }
        }
    }
}
