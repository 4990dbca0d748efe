//! Process launcher — brings the app's surface up by running a command.
//!
//! Activation flags map onto the spawned process:
//! - `REORDER_TO_FRONT`: if the previous instance is still running, reuse it
//! - `NEW_TASK`: otherwise start a fresh instance
//! - `RESET_TASK_IF_NEEDED`: an instance that exited abnormally is forgotten
//!   before relaunching
//!
//! A replaced instance is killed and reaped.

use std::process::{Child, Command, Stdio};
use std::sync::Mutex;

use alarmclaw_core::error::LaunchError;
use alarmclaw_core::traits::{LaunchTargetResolver, Launcher};
use alarmclaw_core::types::{LaunchFlags, LaunchRequest};

/// Launches the configured command as the app's foreground surface.
pub struct CommandLauncher {
    command: Vec<String>,
    running: Mutex<Option<Child>>,
}

impl CommandLauncher {
    /// An empty `command` means there is nothing to launch.
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            running: Mutex::new(None),
        }
    }

    fn spawn(&self, request: &LaunchRequest) -> Result<Child, LaunchError> {
        let (program, args) = request
            .args
            .split_first()
            .ok_or_else(|| LaunchError::Rejected("empty launch command".into()))?;

        Command::new(program)
            .args(args)
            .env("ALARMCLAW_LAUNCH_TARGET", &request.target)
            .env("ALARMCLAW_LAUNCH_FLAGS", format!("{:#x}", request.flags.bits()))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::PermissionDenied => LaunchError::Security(e.to_string()),
                _ => LaunchError::Rejected(format!("{program}: {e}")),
            })
    }
}

fn retire(mut child: Child) {
    let pid = child.id();
    if let Err(e) = child.kill() {
        tracing::debug!("Previous instance {pid} not killed: {e}");
    }
    match child.wait() {
        Ok(status) => tracing::debug!("Previous instance {pid} reaped ({status})"),
        Err(e) => tracing::warn!("⚠️ Could not reap previous instance {pid}: {e}"),
    }
}

impl LaunchTargetResolver for CommandLauncher {
    fn resolve_launch_target(&self, identity: &str) -> Option<LaunchRequest> {
        if self.command.is_empty() {
            return None;
        }
        Some(LaunchRequest::new(identity, self.command.clone()))
    }
}

impl Launcher for CommandLauncher {
    fn launch(&self, request: &LaunchRequest) -> Result<(), LaunchError> {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());

        let alive = match running.as_mut() {
            None => false,
            Some(child) => match child.try_wait() {
                Ok(None) => true,
                Ok(Some(status)) => {
                    if !status.success()
                        && !request.flags.contains(LaunchFlags::RESET_TASK_IF_NEEDED)
                    {
                        return Err(LaunchError::Rejected(format!(
                            "previous instance exited with {status}"
                        )));
                    }
                    false
                }
                Err(e) => {
                    tracing::warn!("⚠️ Could not poll previous instance: {e}");
                    false
                }
            },
        };

        if alive && request.flags.contains(LaunchFlags::REORDER_TO_FRONT) {
            if let Some(child) = running.as_ref() {
                tracing::info!(
                    "📱 '{}' already running (pid {}), brought to front",
                    request.target,
                    child.id()
                );
            }
            return Ok(());
        }

        if !alive && !request.flags.contains(LaunchFlags::NEW_TASK) {
            return Err(LaunchError::Rejected(
                "no running instance and NEW_TASK not set".into(),
            ));
        }

        let child = self.spawn(request)?;
        tracing::info!("📱 Launched '{}' (pid {})", request.target, child.id());
        if let Some(previous) = running.replace(child) {
            retire(previous);
        }
        Ok(())
    }
}
