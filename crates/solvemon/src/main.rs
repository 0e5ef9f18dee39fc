//! solvemon CLI
//!
//! Thin wrapper over solvemon-core: parse once, watch, sample trends, query
//! the solver process, or serve the HTTP API.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use serde::Serialize;
use solvemon_core::config::{Config, LogFormat};
use solvemon_core::heatmap::HeatmapStats;
use solvemon_core::logging::{LogConfig, init_logging};
use solvemon_core::monitor::{self, MonitorHandle, MonitorOptions};
use solvemon_core::snapshot::Snapshot;
use solvemon_core::trends::CsvRecord;
use solvemon_core::watcher::{FileSnapshotSource, SnapshotSource};
use solvemon_core::web::{WebServerConfig, start_web_server};
use solvemon_core::{process, trends};
use tokio::sync::broadcast::error::RecvError;

/// How often long-running commands check that the watcher thread is alive.
const LIVENESS_CHECK: Duration = Duration::from_millis(500);

#[derive(Parser, Debug)]
#[command(
    name = "solvemon",
    version,
    about = "Live monitor for a long-running puzzle solver"
)]
struct Cli {
    /// Config file (default: ./solvemon.toml, then the user config dir)
    #[arg(long, global = true, env = "SOLVEMON_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "SOLVEMON_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format (pretty, json)
    #[arg(long, global = true, env = "SOLVEMON_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    /// Directory the solver writes its snapshot and logs into
    #[arg(long, global = true, env = "SOLVEMON_LOG_DIR")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse the snapshot file once and print it as JSON.
    Snapshot {
        /// Snapshot file (default: from config)
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Watch the snapshot file and print one JSON line per change.
    Watch {
        /// Exit after this many lines
        #[arg(long)]
        count: Option<usize>,
    },
    /// Print a down-sampled CSV of the progress log.
    Trends {
        /// Upper bound on sampled rows (default: from config)
        #[arg(long)]
        max_points: Option<usize>,
    },
    /// Print solver process stats as JSON (`null` when not running).
    Process {
        /// Executable name (default: from config)
        #[arg(long)]
        name: Option<String>,
    },
    /// Serve the HTTP API and live snapshot stream.
    Serve {
        #[arg(long, env = "SOLVEMON_HOST")]
        host: Option<String>,
        #[arg(long, env = "SOLVEMON_PORT")]
        port: Option<u16>,
        /// Allow binding to a non-loopback address
        #[arg(long)]
        dangerous_bind_any: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = resolve_config(&cli)?;

    init_logging(&LogConfig::from(&config.general)).context("failed to initialize logging")?;

    match cli.command {
        Command::Snapshot { file } => snapshot_command(&config, file),
        Command::Watch { count } => watch_command(&config, count).await,
        Command::Trends { max_points } => {
            let max_points = max_points.unwrap_or(config.trends.max_points).max(1);
            let series = trends::sample_or_empty(&config.paths.stats_path(), max_points);
            print!("{}", series.to_csv());
            Ok(())
        }
        Command::Process { name } => {
            let name = name.unwrap_or_else(|| config.process.name.clone());
            let stats = process::find_solver_process(&name);
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }
        Command::Serve {
            host,
            port,
            dangerous_bind_any,
        } => serve_command(config, host, port, dangerous_bind_any).await,
    }
}

/// Config file values, overridden by flags and `SOLVEMON_*` variables.
fn resolve_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load_or_default(cli.config.as_deref()).map_err(with_remediation)?;
    if let Some(level) = &cli.log_level {
        config.general.log_level.clone_from(level);
    }
    if let Some(format) = cli.log_format {
        config.general.log_format = format;
    }
    if let Some(dir) = &cli.log_dir {
        config.paths.log_dir.clone_from(dir);
    }
    config.validate().map_err(|err| with_remediation(err.into()))?;
    Ok(config)
}

/// Attach remediation text to a core error.
fn with_remediation(err: solvemon_core::Error) -> anyhow::Error {
    match err.remediation() {
        Some(remediation) => anyhow!("{err}\n\n{}", remediation.render_plain().trim_end()),
        None => err.into(),
    }
}

fn snapshot_command(config: &Config, file: Option<PathBuf>) -> Result<()> {
    let path = file.unwrap_or_else(|| config.paths.snapshot_path());
    let snapshot = FileSnapshotSource::new(path)
        .with_stats_log(config.paths.stats_path())
        .load()
        .map_err(with_remediation)?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

/// One line of `solvemon watch` output.
#[derive(Serialize)]
struct WatchLine<'a> {
    seq: u64,
    emitted_at: chrono::DateTime<chrono::Utc>,
    #[serde(flatten)]
    snapshot: &'a Snapshot,
    progress: Option<CsvRecord>,
    heatmap: HeatmapStats,
}

fn print_watch_line(
    monitor: &MonitorHandle,
    seq: u64,
    emitted_at: chrono::DateTime<chrono::Utc>,
    snapshot: &Snapshot,
) -> Result<()> {
    let line = WatchLine {
        seq,
        emitted_at,
        snapshot,
        progress: snapshot.csv_record(),
        heatmap: monitor.state().with_heatmap(|heatmap| heatmap.stats()),
    };
    println!("{}", serde_json::to_string(&line)?);
    Ok(())
}

async fn watch_command(config: &Config, count: Option<usize>) -> Result<()> {
    let monitor =
        monitor::spawn(&MonitorOptions::from(config)).map_err(with_remediation)?;
    let mut rx = monitor.bus().subscribe();
    let mut printed = 0usize;
    let limit = count.unwrap_or(usize::MAX);

    if let Some(latest) = monitor.latest() {
        print_watch_line(&monitor, monitor.bus().last_seq(), chrono::Utc::now(), &latest)?;
        printed += 1;
    }

    let mut liveness = tokio::time::interval(LIVENESS_CHECK);
    while printed < limit {
        tokio::select! {
            received = rx.recv() => match received {
                Ok(frame) => {
                    print_watch_line(&monitor, frame.seq, frame.emitted_at, &frame.snapshot)?;
                    printed += 1;
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Output fell behind; frames skipped");
                }
                Err(RecvError::Closed) => break,
            },
            _ = liveness.tick() => {
                if monitor.is_finished() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    monitor.shutdown().map_err(with_remediation)
}

async fn serve_command(
    config: Config,
    host: Option<String>,
    port: Option<u16>,
    dangerous_bind_any: bool,
) -> Result<()> {
    let monitor =
        monitor::spawn(&MonitorOptions::from(&config)).map_err(with_remediation)?;

    let mut web = WebServerConfig::from(&config);
    if let Some(host) = host {
        web = web.with_host(host);
    }
    if let Some(port) = port {
        web = web.with_port(port);
    }
    if dangerous_bind_any {
        web = web.with_dangerous_public_bind();
    }

    let server = start_web_server(web, monitor.state().clone())
        .await
        .map_err(with_remediation)?;
    eprintln!("solvemon listening on http://{}", server.bound_addr());

    let mut liveness = tokio::time::interval(LIVENESS_CHECK);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = liveness.tick() => {
                if monitor.is_finished() {
                    break;
                }
            }
        }
    }

    server.shutdown().await.map_err(with_remediation)?;
    monitor.shutdown().map_err(with_remediation)
}
