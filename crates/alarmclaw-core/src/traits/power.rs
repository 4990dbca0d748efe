//! Power manager trait — acquisition and release of wake leases.

use crate::error::LeaseError;
use crate::types::{LeaseSpec, LeaseToken};

/// Grants wake leases.
///
/// A granted lease is bounded by `spec.max_hold_ms`; the power subsystem may
/// reclaim it after that. `release` consumes the token, so a lease cannot be
/// released twice through this interface.
pub trait PowerManager: Send + Sync {
    fn acquire(&self, spec: &LeaseSpec) -> Result<LeaseToken, LeaseError>;

    fn release(&self, token: LeaseToken);
}
