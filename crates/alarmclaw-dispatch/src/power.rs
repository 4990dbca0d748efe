//! In-process power manager — tracks wake leases for hosts without a real
//! power subsystem (desktop, tests, the CLI).
//!
//! Behaves like an OS power service: leases are bounded by their ceiling and
//! reclaimed once it passes, and acquisition fails when too many are held.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use alarmclaw_core::error::LeaseError;
use alarmclaw_core::traits::PowerManager;
use alarmclaw_core::types::{LeaseSpec, LeaseToken};
use chrono::Utc;
use serde::Serialize;

struct HeldLease {
    tag: String,
    since: Instant,
    max_hold: Duration,
}

/// Counters exposed for monitoring and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PowerStats {
    pub acquired: u64,
    pub released: u64,
    /// Leases dropped by the manager because they outlived their ceiling.
    pub reclaimed: u64,
    /// Acquisitions refused.
    pub refused: u64,
    pub held: usize,
}

/// Wake lease bookkeeping for a single process.
pub struct ProcessPowerManager {
    held: Mutex<HashMap<u64, HeldLease>>,
    next_id: AtomicU64,
    limit: usize,
    acquired: AtomicU64,
    released: AtomicU64,
    reclaimed: AtomicU64,
    refused: AtomicU64,
}

impl ProcessPowerManager {
    /// `limit` = how many leases may be held at once.
    pub fn new(limit: usize) -> Self {
        Self {
            held: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            limit,
            acquired: AtomicU64::new(0),
            released: AtomicU64::new(0),
            reclaimed: AtomicU64::new(0),
            refused: AtomicU64::new(0),
        }
    }

    /// Number of leases currently held (after reclaiming expired ones).
    pub fn held_count(&self) -> usize {
        let mut held = self.lock();
        self.reclaim_expired(&mut held);
        held.len()
    }

    pub fn stats(&self) -> PowerStats {
        let held = self.held_count();
        PowerStats {
            acquired: self.acquired.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            reclaimed: self.reclaimed.load(Ordering::Relaxed),
            refused: self.refused.load(Ordering::Relaxed),
            held,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, HeldLease>> {
        // Bookkeeping stays consistent even if a holder panicked.
        self.held.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn reclaim_expired(&self, held: &mut HashMap<u64, HeldLease>) {
        let before = held.len();
        held.retain(|id, lease| {
            let expired = lease.since.elapsed() > lease.max_hold;
            if expired {
                tracing::warn!(
                    "⏱️ Wake lease #{} ({}) reclaimed after its {:?} ceiling",
                    id,
                    lease.tag,
                    lease.max_hold
                );
            }
            !expired
        });
        let dropped = (before - held.len()) as u64;
        if dropped > 0 {
            self.reclaimed.fetch_add(dropped, Ordering::Relaxed);
        }
    }
}

impl Default for ProcessPowerManager {
    fn default() -> Self {
        Self::new(16)
    }
}

impl PowerManager for ProcessPowerManager {
    fn acquire(&self, spec: &LeaseSpec) -> Result<LeaseToken, LeaseError> {
        let mut held = self.lock();
        self.reclaim_expired(&mut held);

        if held.len() >= self.limit {
            self.refused.fetch_add(1, Ordering::Relaxed);
            return Err(LeaseError::Exhausted {
                held: held.len(),
                limit: self.limit,
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        held.insert(
            id,
            HeldLease {
                tag: spec.tag.clone(),
                since: Instant::now(),
                max_hold: spec.max_hold(),
            },
        );
        self.acquired.fetch_add(1, Ordering::Relaxed);

        Ok(LeaseToken {
            id,
            tag: spec.tag.clone(),
            acquired_at: Utc::now(),
            max_hold_ms: spec.max_hold_ms,
        })
    }

    fn release(&self, token: LeaseToken) {
        let mut held = self.lock();
        if held.remove(&token.id).is_some() {
            self.released.fetch_add(1, Ordering::Relaxed);
        } else {
            tracing::debug!("Wake lease #{} already reclaimed", token.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_release() {
        let power = ProcessPowerManager::new(4);
        let token = power.acquire(&LeaseSpec::default()).unwrap();
        assert_eq!(power.held_count(), 1);
        power.release(token);
        let stats = power.stats();
        assert_eq!(stats.held, 0);
        assert_eq!(stats.acquired, 1);
        assert_eq!(stats.released, 1);
    }

    #[test]
    fn test_exhaustion() {
        let power = ProcessPowerManager::new(1);
        let _first = power.acquire(&LeaseSpec::default()).unwrap();
        let err = power.acquire(&LeaseSpec::default()).unwrap_err();
        assert_eq!(err, LeaseError::Exhausted { held: 1, limit: 1 });
        assert_eq!(power.stats().refused, 1);
    }

    #[test]
    fn test_zero_limit_always_refuses() {
        let power = ProcessPowerManager::new(0);
        assert!(power.acquire(&LeaseSpec::default()).is_err());
    }

    #[test]
    fn test_expired_lease_reclaimed() {
        let power = ProcessPowerManager::new(1);
        let spec = LeaseSpec {
            max_hold_ms: 1,
            ..LeaseSpec::default()
        };
        let token = power.acquire(&spec).unwrap();
        std::thread::sleep(Duration::from_millis(10));
        // Expired lease frees the slot.
        let second = power.acquire(&LeaseSpec::default()).unwrap();
        assert_eq!(power.stats().reclaimed, 1);
        // Releasing the reclaimed token is a no-op.
        power.release(token);
        assert_eq!(power.stats().released, 0);
        power.release(second);
        assert_eq!(power.stats().released, 1);
    }
}
