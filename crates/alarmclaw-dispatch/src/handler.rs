//! Built-in alarm handlers run by the worker pool.

use std::process::Stdio;

use alarmclaw_core::error::{AlarmClawError, Result};
use alarmclaw_core::traits::AlarmHandler;
use alarmclaw_core::types::AlarmEvent;
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

/// Logs each alarm. Used when no handler command is configured.
pub struct LogHandler;

#[async_trait]
impl AlarmHandler for LogHandler {
    fn name(&self) -> &str {
        "log"
    }

    async fn handle(&self, event: &AlarmEvent) -> Result<()> {
        tracing::info!(
            "🔔 Alarm '{}' fired at {}: {}",
            event.event_id,
            event.fired_at.to_rfc3339(),
            event.payload_text()
        );
        Ok(())
    }
}

/// Runs a command per alarm. The event id and fire time are passed as
/// environment variables and the payload on stdin. A non-zero exit fails
/// the job (and makes it eligible for retry).
pub struct CommandHandler {
    command: Vec<String>,
}

impl CommandHandler {
    pub fn new(command: Vec<String>) -> Result<Self> {
        if command.is_empty() {
            return Err(AlarmClawError::Config("handler command is empty".into()));
        }
        Ok(Self { command })
    }
}

#[async_trait]
impl AlarmHandler for CommandHandler {
    fn name(&self) -> &str {
        &self.command[0]
    }

    async fn handle(&self, event: &AlarmEvent) -> Result<()> {
        let mut child = tokio::process::Command::new(&self.command[0])
            .args(&self.command[1..])
            .env("ALARMCLAW_EVENT_ID", &event.event_id)
            .env("ALARMCLAW_FIRED_AT", event.fired_at.to_rfc3339())
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AlarmClawError::Handler(format!("{}: {e}", self.command[0])))?;

        if let Some(mut stdin) = child.stdin.take() {
            // A handler that ignores stdin may close it early.
            if let Err(e) = stdin.write_all(&event.payload).await {
                tracing::debug!("Handler stdin closed early: {e}");
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| AlarmClawError::Handler(format!("{}: {e}", self.command[0])))?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(AlarmClawError::Handler(format!(
                "{} exited with {}: {}",
                self.command[0],
                output.status,
                stderr.trim()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_handler() {
        assert!(LogHandler.handle(&AlarmEvent::new("1", "x")).await.is_ok());
    }

    #[test]
    fn test_empty_command_rejected() {
        assert!(CommandHandler::new(vec![]).is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_exit_status() {
        let ok = CommandHandler::new(vec!["sh".into(), "-c".into(), "cat >/dev/null".into()])
            .unwrap();
        assert!(ok.handle(&AlarmEvent::new("1", "payload")).await.is_ok());

        let failing = CommandHandler::new(vec![
            "sh".into(),
            "-c".into(),
            "echo boom >&2; exit 3".into(),
        ])
        .unwrap();
        let err = failing
            .handle(&AlarmEvent::new("2", ""))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_sees_event_id() {
        let handler = CommandHandler::new(vec![
            "sh".into(),
            "-c".into(),
            "test \"$ALARMCLAW_EVENT_ID\" = morning".into(),
        ])
        .unwrap();
        assert!(handler.handle(&AlarmEvent::new("morning", "")).await.is_ok());
        assert!(handler.handle(&AlarmEvent::new("evening", "")).await.is_err());
    }
}
