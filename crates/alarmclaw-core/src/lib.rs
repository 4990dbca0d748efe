//! # AlarmClaw Core
//!
//! Shared vocabulary for the wake-and-dispatch path:
//! - `types` — alarm events, launch requests, lease specs, dispatch results
//! - `traits` — the collaborators the dispatcher is wired to
//! - `config` — TOML configuration (`~/.alarmclaw/config.toml`)
//! - `error` — error types

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::AlarmClawConfig;
pub use error::{AlarmClawError, EnqueueError, LaunchError, LeaseError, Result, StoreError};
pub use traits::{
    AlarmEventSource, AlarmHandler, FlagStore, LaunchTargetResolver, Launcher, Platform,
    PowerManager, WorkQueue,
};
pub use types::{
    AlarmEvent, AlarmFlag, DispatchFailure, DispatchResult, DispatchStage, LaunchFlags,
    LaunchRequest, LeaseSpec, LeaseToken, WorkHandle,
};
