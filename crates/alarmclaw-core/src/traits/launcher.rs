//! Launch traits — bringing the application's surface forward.

use crate::error::LaunchError;
use crate::types::LaunchRequest;

/// Resolves how to launch the application identified by `identity`.
pub trait LaunchTargetResolver: Send + Sync {
    /// `None` when the application has no launchable surface.
    fn resolve_launch_target(&self, identity: &str) -> Option<LaunchRequest>;
}

/// Issues launch requests.
pub trait Launcher: Send + Sync {
    fn launch(&self, request: &LaunchRequest) -> Result<(), LaunchError>;
}
