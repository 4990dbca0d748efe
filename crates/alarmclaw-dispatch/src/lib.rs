//! # AlarmClaw Dispatch
//!
//! The wake-and-dispatch path for OS-fired alarms.
//!
//! ## Design Principles
//! - Never drop an alarm: processing is always enqueued, whatever else fails
//! - Never leak a wake lease: the lease is a guard released exactly once
//! - Never block the alarm callback: enqueue is a non-blocking submission
//! - Best-effort side effects: flag write and app launch failures are logged
//!
//! ## Architecture
//! ```text
//! AlarmEventSource (channel / JSON lines / FFI)
//!   └── WakeDispatcher::dispatch
//!         ├── FlagStore        (file / sqlite / memory)
//!         ├── WakeLease        (ProcessPowerManager, 180s ceiling)
//!         ├── Launcher         (CommandLauncher, foreground flags)
//!         ├── WorkQueue        (ChannelWorkQueue, try_send)
//!         │     └── WorkerPool → AlarmHandler (log / command), retry
//!         └── Platform         (close system overlays on sdk < 31)
//! ```

pub mod dispatcher;
pub mod handler;
pub mod launch;
pub mod lease;
pub mod persistence;
pub mod platform;
pub mod power;
pub mod queue;
pub mod runtime;
pub mod source;
pub mod store;
pub mod worker;

pub use dispatcher::{Collaborators, DispatchSettings, WakeDispatcher};
pub use handler::{CommandHandler, LogHandler};
pub use launch::CommandLauncher;
pub use lease::WakeLease;
pub use persistence::SqliteFlagStore;
pub use platform::HostPlatform;
pub use power::{PowerStats, ProcessPowerManager};
pub use queue::{ChannelWorkQueue, WorkItem, WorkReceiver};
pub use runtime::AlarmRuntime;
pub use source::{
    AlarmSender, ChannelEventSource, DispatchLoopStats, JsonLinesEventSource, channel,
    run_dispatch_loop,
};
pub use store::{FileFlagStore, MemoryFlagStore, open_flag_store};
pub use worker::{RetryPolicy, WorkerOptions, WorkerPool, WorkerStats};
