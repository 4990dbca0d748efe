//! Alarm event sources and the dispatch loop that drains them.

use std::sync::Arc;

use alarmclaw_core::traits::AlarmEventSource;
use alarmclaw_core::types::AlarmEvent;
use async_trait::async_trait;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::dispatcher::WakeDispatcher;

/// In-process source fed by an [`AlarmSender`].
pub struct ChannelEventSource {
    rx: mpsc::Receiver<AlarmEvent>,
}

/// Fires alarms into a [`ChannelEventSource`].
pub type AlarmSender = mpsc::Sender<AlarmEvent>;

/// Create a connected sender/source pair.
pub fn channel(capacity: usize) -> (AlarmSender, ChannelEventSource) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (tx, ChannelEventSource { rx })
}

#[async_trait]
impl AlarmEventSource for ChannelEventSource {
    async fn next_event(&mut self) -> Option<AlarmEvent> {
        self.rx.recv().await
    }
}

/// Reads one alarm per line, each line a JSON object of intent extras
/// (`{"id": 7, "payload": "..."}`). Blank and malformed lines are
/// skipped.
pub struct JsonLinesEventSource<R> {
    lines: Lines<BufReader<R>>,
    skipped: u64,
}

impl<R: AsyncRead + Unpin + Send> JsonLinesEventSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: BufReader::new(reader).lines(),
            skipped: 0,
        }
    }

    /// Lines dropped because they did not parse.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> AlarmEventSource for JsonLinesEventSource<R> {
    async fn next_event(&mut self) -> Option<AlarmEvent> {
        loop {
            let line = match self.lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return None,
                Err(e) => {
                    tracing::error!("❌ Alarm input failed: {e}");
                    return None;
                }
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match AlarmEvent::from_intent_extras(line) {
                Ok(event) => return Some(event),
                Err(e) => {
                    self.skipped += 1;
                    tracing::warn!("⚠️ Skipping malformed alarm line: {e}");
                }
            }
        }
    }
}

/// Totals for one run of [`run_dispatch_loop`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchLoopStats {
    pub received: u64,
    pub enqueued: u64,
    pub launched: u64,
    pub degraded: u64,
    pub crashed: u64,
}

/// Dispatch every event from `source` until it is exhausted. Each alarm is
/// dispatched on the blocking pool so overlapping alarms run concurrently
/// and a slow launch never stalls the source.
pub async fn run_dispatch_loop<S>(mut source: S, dispatcher: Arc<WakeDispatcher>) -> DispatchLoopStats
where
    S: AlarmEventSource,
{
    let mut stats = DispatchLoopStats::default();
    let mut tasks = JoinSet::new();

    while let Some(event) = source.next_event().await {
        stats.received += 1;
        let dispatcher = dispatcher.clone();
        tasks.spawn_blocking(move || dispatcher.dispatch(&event));

        // Reap finished dispatches as we go.
        while let Some(done) = tasks.try_join_next() {
            tally(&mut stats, done);
        }
    }

    while let Some(done) = tasks.join_next().await {
        tally(&mut stats, done);
    }

    tracing::info!(
        "📊 Dispatch loop finished: {} received, {} enqueued, {} degraded",
        stats.received,
        stats.enqueued,
        stats.degraded
    );
    stats
}

fn tally(
    stats: &mut DispatchLoopStats,
    done: Result<alarmclaw_core::types::DispatchResult, tokio::task::JoinError>,
) {
    match done {
        Ok(result) => {
            if result.enqueued {
                stats.enqueued += 1;
            }
            if result.launch_succeeded {
                stats.launched += 1;
            }
            if !result.lease_held {
                stats.degraded += 1;
            }
        }
        Err(e) => {
            stats.crashed += 1;
            tracing::error!("❌ Dispatch task crashed: {e}");
        }
    }
}
