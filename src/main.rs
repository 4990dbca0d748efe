//! # AlarmClaw — alarm wake-and-dispatch CLI
//!
//! Drives the dispatcher on a desktop or server host, where alarms arrive
//! from a scheduler (cron, systemd timers) instead of the OS alarm service.
//!
//! Usage:
//!   alarmclaw fire --id 7 --payload "standup"    # Dispatch one alarm
//!   alarmclaw listen < alarms.jsonl               # Dispatch one alarm per JSON line
//!   alarmclaw flag show | clear                   # Inspect the last fired alarm
//!   alarmclaw config show | init                  # Print or write the config

use std::path::PathBuf;
use std::time::Duration;

use alarmclaw_core::config::AlarmClawConfig;
use alarmclaw_core::types::{AlarmEvent, MISSING_ALARM_ID};
use alarmclaw_dispatch::{AlarmRuntime, JsonLinesEventSource, open_flag_store, run_dispatch_loop};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "alarmclaw",
    version,
    about = "⏰ AlarmClaw — wake, flag, launch and enqueue on every fired alarm"
)]
struct Cli {
    /// Config file (default: ~/.alarmclaw/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Dispatch a single alarm
    Fire {
        /// Alarm id
        #[arg(long, default_value_t = MISSING_ALARM_ID.to_string())]
        id: String,
        /// Alarm payload
        #[arg(long, default_value = "")]
        payload: String,
        /// Print the dispatch result as JSON
        #[arg(long)]
        json: bool,
        /// Seconds to wait for the queued work before exiting
        #[arg(long, default_value = "30")]
        wait: u64,
    },
    /// Dispatch alarms read as JSON lines (intent extras) until EOF
    Listen {
        /// Input file; stdin when omitted
        #[arg(long)]
        input: Option<String>,
        /// Seconds to wait for queued work after EOF
        #[arg(long, default_value = "30")]
        wait: u64,
    },
    /// Inspect or clear the last-fired-alarm flag
    Flag {
        #[command(subcommand)]
        action: FlagAction,
    },
    /// Print or write the configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum FlagAction {
    Show,
    Clear,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Write the default configuration to ~/.alarmclaw/config.toml
    Init,
}

fn expand_path(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(p).to_string())
}

fn load_config(path: Option<&str>) -> Result<AlarmClawConfig> {
    let config = match path {
        Some(p) => AlarmClawConfig::load_from(&expand_path(p))
            .with_context(|| format!("loading config from {p}"))?,
        None => AlarmClawConfig::load()?,
    };
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "alarmclaw=debug,alarmclaw_dispatch=debug,alarmclaw_core=debug"
    } else {
        "alarmclaw=info,alarmclaw_dispatch=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Fire {
            id,
            payload,
            json,
            wait,
        } => {
            let runtime = AlarmRuntime::from_config(&config)?;
            let result = runtime.fire(AlarmEvent::new(id, payload)).await;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("⏰ Alarm dispatched");
                println!("   Flag recorded:  {}", result.flag_recorded);
                println!("   Wake lease:     {}", if result.lease_held { "held" } else { "degraded" });
                println!(
                    "   Launch:         {}",
                    match (result.launch_attempted, result.launch_succeeded) {
                        (false, _) => "no target",
                        (true, true) => "ok",
                        (true, false) => "failed",
                    }
                );
                println!("   Enqueued:       {}", result.enqueued);
                for failure in &result.failures {
                    println!("   ⚠️  {failure:?}");
                }
            }

            let stats = runtime.shutdown(Duration::from_secs(wait)).await;
            tracing::debug!("Workers: {:?}", stats);
            if !result.enqueued {
                anyhow::bail!("alarm was not queued");
            }
        }

        Command::Listen { input, wait } => {
            let runtime = AlarmRuntime::from_config(&config)?;
            let stats = match input {
                Some(path) => {
                    let file = tokio::fs::File::open(expand_path(&path))
                        .await
                        .with_context(|| format!("opening {path}"))?;
                    run_dispatch_loop(JsonLinesEventSource::new(file), runtime.dispatcher()).await
                }
                None => {
                    tracing::info!("👂 Reading alarms from stdin (one JSON object per line)");
                    run_dispatch_loop(JsonLinesEventSource::new(tokio::io::stdin()), runtime.dispatcher())
                        .await
                }
            };
            let workers = runtime.shutdown(Duration::from_secs(wait)).await;
            println!("{}", serde_json::json!({ "dispatch": stats, "workers": workers }));
        }

        Command::Flag { action } => {
            let store = open_flag_store(&config.flags)?;
            match action {
                FlagAction::Show => match store.get()? {
                    Some(flag) => {
                        println!("🔔 Last fired alarm: {}", flag.event_id);
                        println!("   Recorded at: {}", flag.recorded_at.to_rfc3339());
                        println!("   Payload:     {}", String::from_utf8_lossy(&flag.payload));
                    }
                    None => println!("No alarm flag recorded ({MISSING_ALARM_ID})"),
                },
                FlagAction::Clear => {
                    store.clear()?;
                    println!("✅ Alarm flag cleared");
                }
            }
        }

        Command::Config { action } => match action {
            ConfigAction::Show => print!("{}", config.to_toml()?),
            ConfigAction::Init => {
                let path = AlarmClawConfig::default_path();
                if path.exists() {
                    println!("⚠️  Config already exists: {}", path.display());
                } else {
                    AlarmClawConfig::default().save()?;
                    println!("✅ Config written: {}", path.display());
                }
            }
        },
    }

    Ok(())
}
