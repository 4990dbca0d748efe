//! Error types for AlarmClaw.
//!
//! `AlarmClawError` covers setup (config, IO, parsing). The per-collaborator
//! errors (`StoreError`, `LeaseError`, `LaunchError`, `EnqueueError`) never
//! escape `WakeDispatcher::dispatch` — they are logged and folded into the
//! `DispatchResult`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AlarmClawError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid alarm event: {0}")]
    InvalidEvent(String),

    #[error("Alarm handler failed: {0}")]
    Handler(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, AlarmClawError>;

/// Flag store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Flag store unavailable: {0}")]
    Unavailable(String),

    #[error("Flag store IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Flag encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("Flag store backend error: {0}")]
    Backend(String),
}

/// Wake lease acquisition failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LeaseError {
    #[error("Wake lease exhausted ({held}/{limit} held)")]
    Exhausted { held: usize, limit: usize },

    #[error("Wake lease denied: {0}")]
    Denied(String),
}

/// Launch failures. Never fatal to a dispatch.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LaunchError {
    #[error("Launch target rejected the request: {0}")]
    Rejected(String),

    #[error("Background activity start throttled")]
    Throttled,

    #[error("Launch not permitted: {0}")]
    Security(String),

    #[error("Launch panicked: {0}")]
    Panicked(String),
}

/// Work queue submission failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EnqueueError {
    #[error("Work queue full (capacity {0})")]
    Full(usize),

    #[error("Work queue closed")]
    Closed,
}
