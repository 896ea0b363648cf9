//! WorkLogix Timer - command-line timer client.
//!
//! # Commands
//!
//! - `worklogix-timer status --task <ID>`: Show the current timer
//! - `worklogix-timer start --task <ID>`: Start or resume the timer
//! - `worklogix-timer pause --task <ID>`: Pause the running timer
//! - `worklogix-timer complete --task <ID>`: Complete the timer and the task
//! - `worklogix-timer watch --task <ID>`: Live view, ticking every second
//!
//! # Environment Variables
//!
//! See the [`config`](worklogix_client::config) module for available
//! configuration options.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use worklogix_client::api::TimerClient;
use worklogix_client::config::Config;
use worklogix_client::projector::project;
use worklogix_client::push::PushChannel;
use worklogix_client::types::{TimerKey, TimerSnapshot};
use worklogix_client::view::TimerView;

/// Local display tick.
const TICK: Duration = Duration::from_secs(1);

/// WorkLogix Timer - per-task time tracking from the terminal.
#[derive(Parser, Debug)]
#[command(name = "worklogix-timer")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "\
ENVIRONMENT VARIABLES:
    WORKLOGIX_SERVER_URL        Server URL (required)
    WORKLOGIX_USER_ID           Acting user (required)
    WORKLOGIX_API_TOKEN         Bearer token for REST and push channel
    WORKLOGIX_POLL_INTERVAL_MS  Re-sync period in ms (default: 1000)

EXAMPLES:
    export WORKLOGIX_SERVER_URL=http://localhost:8080
    export WORKLOGIX_USER_ID=u-1

    worklogix-timer start --task t-1
    worklogix-timer watch --task t-1
    worklogix-timer complete --task t-1 --date 2024-05-14
")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// Identifies the timer to act on.
#[derive(Args, Debug)]
struct TimerArgs {
    /// Task identifier.
    #[arg(short, long)]
    task: String,

    /// Calendar day (YYYY-MM-DD). Defaults to today.
    #[arg(short, long)]
    date: Option<NaiveDate>,
}

/// CLI subcommands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Show the current timer.
    Status(TimerArgs),

    /// Start or resume the timer.
    Start(TimerArgs),

    /// Pause the running timer.
    Pause(TimerArgs),

    /// Complete the timer and mark the task completed.
    Complete {
        #[command(flatten)]
        timer: TimerArgs,

        /// Locally observed total in seconds, sent for the server's records.
        #[arg(long)]
        duration: Option<u64>,
    },

    /// Live view that re-syncs periodically and on push notifications.
    Watch(TimerArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    let config = Config::from_env().context("Failed to load configuration")?;
    let client = TimerClient::new(config.server_url.clone(), config.api_token.clone())
        .context("Failed to create HTTP client")?;

    let key_for = |args: &TimerArgs| {
        TimerKey::new(
            args.task.clone(),
            config.user_id.clone(),
            args.date.unwrap_or_else(|| Local::now().date_naive()),
        )
    };

    match cli.command {
        Command::Status(args) => {
            let key = key_for(&args);
            let snapshot = client.get_timer(&key).await.context("Failed to read timer")?;
            print_snapshot(&key, &snapshot);
        }
        Command::Start(args) => {
            let key = key_for(&args);
            let snapshot = client.start(&key).await.context("Failed to start timer")?;
            print_snapshot(&key, &snapshot);
        }
        Command::Pause(args) => {
            let key = key_for(&args);
            let snapshot = client.pause(&key).await.context("Failed to pause timer")?;
            print_snapshot(&key, &snapshot);
        }
        Command::Complete { timer, duration } => {
            let key = key_for(&timer);
            let snapshot = client
                .complete(&key, duration)
                .await
                .context("Failed to complete timer")?;
            print_snapshot(&key, &snapshot);
            match client.get_task(&key.task_id).await {
                Ok(task) => println!("task {} is {}", task.id, task.status),
                Err(e) => warn!(error = %e, "Could not read task status"),
            }
        }
        Command::Watch(args) => {
            let key = key_for(&args);
            run_watch(&config, client, key).await?;
        }
    }

    Ok(())
}

/// Mounts a view and prints the projected value every second until Ctrl+C.
async fn run_watch(config: &Config, client: TimerClient, key: TimerKey) -> Result<()> {
    let push = PushChannel::connect(&config.server_url, config.api_token.as_deref())
        .context("Failed to set up push channel")?;
    let view = TimerView::mount(
        key.clone(),
        Arc::new(client),
        Some(push.subscribe()),
        config.poll_interval,
    );

    info!(key = %key, "Watching timer. Press Ctrl+C to stop.");

    let shutdown = wait_for_shutdown();
    tokio::pin!(shutdown);
    let mut ticker = tokio::time::interval(TICK);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                if let Some(snapshot) = view.snapshot() {
                    println!(
                        "{}  {}  {}",
                        key,
                        format_hms(project(&snapshot, Utc::now())),
                        snapshot.timer_status
                    );
                }
            }
        }
    }

    drop(view);
    drop(push);
    Ok(())
}

fn print_snapshot(key: &TimerKey, snapshot: &TimerSnapshot) {
    println!(
        "{}  {}  {}",
        key,
        format_hms(project(snapshot, Utc::now())),
        snapshot.timer_status
    );
}

/// Formats seconds as `HH:MM:SS`.
fn format_hms(total: u64) -> String {
    format!("{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

/// Initializes the tracing subscriber, logging to stderr.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();
}

/// Resolves on Ctrl+C.
async fn wait_for_shutdown() {
    if let Err(e) = signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_complete_with_duration() {
        let cli = Cli::try_parse_from([
            "worklogix-timer",
            "complete",
            "--task",
            "t-1",
            "--date",
            "2024-05-14",
            "--duration",
            "25",
        ])
        .unwrap();

        match cli.command {
            Command::Complete { timer, duration } => {
                assert_eq!(timer.task, "t-1");
                assert_eq!(timer.date, NaiveDate::from_ymd_opt(2024, 5, 14));
                assert_eq!(duration, Some(25));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_rejects_bad_date() {
        assert!(Cli::try_parse_from(["worklogix-timer", "status", "--task", "t-1", "--date", "May 14"]).is_err());
    }

    #[test]
    fn test_format_hms() {
        assert_eq!(format_hms(0), "00:00:00");
        assert_eq!(format_hms(25), "00:00:25");
        assert_eq!(format_hms(3_725), "01:02:05");
    }
}
