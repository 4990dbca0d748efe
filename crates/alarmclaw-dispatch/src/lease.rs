//! Wake lease guard — a held power lease that is released exactly once.
//!
//! The lease is released either explicitly with [`WakeLease::release`] or by
//! `Drop`, whichever happens first. Unwinding through a dispatch drops the
//! guard, so no exit path can leak the lease.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::{Duration, Instant};

use alarmclaw_core::error::LeaseError;
use alarmclaw_core::traits::PowerManager;
use alarmclaw_core::types::{LeaseSpec, LeaseToken};
use chrono::{DateTime, Utc};

/// A held wake lease. Not `Clone`: one owner, one release.
pub struct WakeLease {
    power: Arc<dyn PowerManager>,
    token: Option<LeaseToken>,
    started: Instant,
    max_hold: Duration,
}

impl WakeLease {
    /// Ask `power` for a lease described by `spec`.
    pub fn acquire(power: Arc<dyn PowerManager>, spec: &LeaseSpec) -> Result<Self, LeaseError> {
        let token = power.acquire(spec)?;
        tracing::debug!(
            "🔒 Wake lease #{} acquired: {} (max {}ms)",
            token.id,
            token.tag,
            spec.max_hold_ms
        );
        Ok(Self {
            power,
            token: Some(token),
            started: Instant::now(),
            max_hold: spec.max_hold(),
        })
    }

    pub fn acquired_at(&self) -> Option<DateTime<Utc>> {
        self.token.as_ref().map(|t| t.acquired_at)
    }

    pub fn max_hold(&self) -> Duration {
        self.max_hold
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Whether the lease has been held past its ceiling (the OS may have
    /// reclaimed it already).
    pub fn is_overdue(&self) -> bool {
        self.elapsed() > self.max_hold
    }

    /// Release now. Returns how long the lease was held.
    pub fn release(mut self) -> Duration {
        let held = self.elapsed();
        self.release_inner();
        held
    }

    fn release_inner(&mut self) {
        let Some(token) = self.token.take() else {
            return;
        };
        let id = token.id;
        if self.is_overdue() {
            tracing::warn!(
                "⚠️ Wake lease #{} held {:?}, past its {:?} ceiling",
                id,
                self.elapsed(),
                self.max_hold
            );
        }
        // Release runs from Drop during unwinding too; a second panic there
        // would abort the process.
        let power = &self.power;
        if catch_unwind(AssertUnwindSafe(|| power.release(token))).is_err() {
            tracing::error!("❌ Power manager panicked releasing wake lease #{}", id);
        } else {
            tracing::debug!("🔓 Wake lease #{} released after {:?}", id, self.elapsed());
        }
    }
}

impl Drop for WakeLease {
    fn drop(&mut self) {
        if self.token.is_some() {
            tracing::debug!("Wake lease dropped while held, releasing");
        }
        self.release_inner();
    }
}

impl std::fmt::Debug for WakeLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WakeLease")
            .field("token", &self.token)
            .field("max_hold", &self.max_hold)
            .finish()
    }
}
