//! # M365 Dash
//!
//! Live telemetry from a Xiaomi M365 scooter over Bluetooth LE.
//!
//! Scans for a scooter, keeps the link up and polls its registers, logging
//! state changes and recording telemetry snapshots to JSON Lines files.

use std::path::Path;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use m365_dash::config::{Config, LoggingConfig, TelemetryConfig};
use m365_dash::link::ble::BleTransport;
use m365_dash::link::{event_channel, ConnectionManager, LinkStatus};
use m365_dash::telemetry::TelemetryRecorder;

/// Config file used when none is given on the command line
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// File name prefix for rolling diagnostic logs
const LOG_FILE_PREFIX: &str = "m365-dash.log";

/// Main entry point for M365 Dash
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Load configuration from the first argument, `config/default.toml`, or defaults
///    - Set up logging (stdout, or daily rolling files when configured)
///    - Open the first Bluetooth adapter and start scanning
///
/// 2. **Main Loop**
///    - Call `update()` every `tick_ms`; it connects, polls and decodes
///    - Log connection state changes
///    - A separate task records the published status every `log_interval_ms`
///
/// 3. **Graceful Shutdown**
///    - Ctrl+C disconnects from the scooter
///    - The recorder flushes and exits once the link is dropped
///
/// # Errors
///
/// Returns error if the configuration is invalid or no Bluetooth adapter is
/// available. Link failures are never fatal; the manager rescans.
///
/// # Examples
///
/// ```bash
/// cargo run --release -- config/default.toml
/// ```
#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config(std::env::args().nth(1))?;
    let _log_guard = init_logging(&config.logging);

    info!("M365 Dash v{} starting...", env!("CARGO_PKG_VERSION"));

    let (events_tx, events_rx) = event_channel();
    let transport = BleTransport::first_adapter(events_tx, &config.ble)
        .await
        .context("Failed to open Bluetooth adapter")?;
    let mut link = ConnectionManager::new(transport, events_rx, &config);

    let recorder_task = if config.telemetry.enabled {
        let recorder = TelemetryRecorder::new(&config.telemetry)
            .context("Failed to create telemetry recorder")?;
        Some(spawn_recorder(recorder, &config.telemetry, link.watch_status()))
    } else {
        None
    };

    link.begin().await;

    let mut tick = interval(Duration::from_millis(config.poll.tick_ms));
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_state = link.state();

    info!("Press Ctrl+C to exit");

    loop {
        tokio::select! {
            _ = tick.tick() => {
                link.update().await;

                let state = link.state();
                if state != last_state {
                    info!("{} -> {}", last_state, state);
                    if state.is_ready() {
                        info!("Signal {} dBm", link.signal_strength());
                    }
                    last_state = state;
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    let snapshot = link.snapshot();
    info!(
        "Session: odometer {:.2} km, trip {:.2} km, ride time {}s",
        snapshot.odometer as f32 / 1000.0,
        snapshot.trip_distance as f32 / 1000.0,
        snapshot.ride_time
    );

    link.disconnect().await;
    drop(link);

    if let Some(task) = recorder_task {
        if let Err(e) = task.await {
            warn!("Recorder task failed: {}", e);
        }
    }

    Ok(())
}

/// Load the config named on the command line, the default file, or defaults
fn load_config(arg: Option<String>) -> Result<Config> {
    match arg {
        Some(path) => Config::load(&path).with_context(|| format!("Failed to load config {}", path)),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            Config::load(DEFAULT_CONFIG_PATH).context("Failed to load default config")
        }
        None => Ok(Config::default()),
    }
}

/// Install the tracing subscriber
///
/// The returned guard must be held for the life of the program when logging
/// to files, or buffered lines are lost on exit.
fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match &config.file_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}

/// Record the latest published status on a fixed interval
///
/// Ends when the connection manager is dropped.
fn spawn_recorder(
    mut recorder: TelemetryRecorder,
    config: &TelemetryConfig,
    mut status: watch::Receiver<LinkStatus>,
) -> JoinHandle<()> {
    let period = Duration::from_millis(config.log_interval_ms);

    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            if status.has_changed().is_err() {
                break;
            }

            let latest = status.borrow_and_update().clone();
            if let Err(e) = recorder.record(latest.state, &latest.snapshot) {
                warn!("Failed to record telemetry: {}", e);
            }
        }

        if let Err(e) = recorder.flush() {
            warn!("Failed to flush telemetry: {}", e);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_path() {
        assert!(DEFAULT_CONFIG_PATH.ends_with(".toml"));
    }

    #[test]
    fn test_load_config_missing_file_is_error() {
        let result = load_config(Some("/nonexistent/m365-dash.toml".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_explicit_path() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join(DEFAULT_CONFIG_PATH);
        let config = load_config(Some(path.to_string_lossy().into_owned())).unwrap();
        assert_eq!(config.poll.tick_ms, 20);
    }
}
