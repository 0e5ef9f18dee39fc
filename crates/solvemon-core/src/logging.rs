//! `tracing` setup for solvemon.
//!
//! One stderr layer in the configured [`LogFormat`], plus an optional
//! append-only file layer in the same format. The filter comes from
//! `RUST_LOG` when set, else from `general.log_level`.
//!
//! ```ignore
//! use solvemon_core::logging::{init_logging, LogConfig};
//!
//! init_logging(&LogConfig::from(&config.general))?;
//! ```
//!
//! Field names used across the crate: `path`, `stats`, `seq`, `subscriber`,
//! `changed_cells`, `max_age_ever`.

pub use crate::config::LogFormat;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::time::SystemTime;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

/// Set once a subscriber has been installed.
static INSTALLED: OnceLock<()> = OnceLock::new();

/// Where and how log lines are written.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter level; `RUST_LOG` wins when set.
    pub level: String,
    pub format: LogFormat,
    /// Append-only copy of the console output.
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            file: None,
        }
    }
}

impl From<&crate::config::GeneralConfig> for LogConfig {
    fn from(general: &crate::config::GeneralConfig) -> Self {
        Self {
            level: general.log_level.clone(),
            format: general.log_format,
            file: general.log_file.clone(),
        }
    }
}

/// Why [`init_logging`] refused to install a subscriber.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("logging already initialized")]
    AlreadyInitialized,

    #[error("invalid log level: {0}")]
    InvalidLevel(String),

    #[error("failed to create log file: {0}")]
    FileCreate(#[from] io::Error),

    #[error("failed to set global subscriber: {0}")]
    SetSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Open `path` for appending, creating private parent dirs and file on unix.
fn open_log_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if !parent.exists() {
            std::fs::create_dir_all(parent)?;
            #[cfg(unix)]
            std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700))?;
        }
    }

    let fresh = !path.exists();
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    #[cfg(unix)]
    if fresh {
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    #[cfg(not(unix))]
    let _ = fresh;
    Ok(file)
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Console output on stderr; colored unless `format` is JSON.
fn stderr_layer(format: LogFormat) -> BoxedLayer {
    match format {
        LogFormat::Pretty => fmt::layer()
            .with_writer(io::stderr)
            .with_target(true)
            .with_thread_names(true)
            .with_span_events(FmtSpan::NONE)
            .with_ansi(true)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_timer(SystemTime)
            .with_writer(io::stderr)
            .with_target(true)
            .with_current_span(true)
            .with_span_list(false)
            .flatten_event(true)
            .boxed(),
    }
}

/// Mirror of the console output into `file`, never colored.
fn file_layer(format: LogFormat, file: File) -> BoxedLayer {
    match format {
        LogFormat::Pretty => fmt::layer()
            .with_writer(Arc::new(file))
            .with_target(true)
            .with_ansi(false)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_timer(SystemTime)
            .with_writer(Arc::new(file))
            .with_target(true)
            .with_current_span(true)
            .flatten_event(true)
            .boxed(),
    }
}

/// Install the global `tracing` subscriber.
///
/// The level is validated before anything is installed, so a bad level can
/// be corrected and retried. Once a subscriber is in place every further
/// call returns [`LogError::AlreadyInitialized`].
///
/// `RUST_LOG` overrides the configured level, e.g.
/// `RUST_LOG=solvemon_core::watcher=trace`.
pub fn init_logging(config: &LogConfig) -> Result<(), LogError> {
    config
        .level
        .parse::<LogLevel>()
        .map_err(|_| LogError::InvalidLevel(config.level.clone()))?;
    if INSTALLED.get().is_some() {
        return Err(LogError::AlreadyInitialized);
    }

    let mut layers = vec![stderr_layer(config.format)];
    if let Some(path) = config.file.as_deref() {
        layers.push(file_layer(config.format, open_log_file(path)?));
    }
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    if INSTALLED.set(()).is_err() {
        return Err(LogError::AlreadyInitialized);
    }
    tracing::subscriber::set_global_default(tracing_subscriber::registry().with(layers).with(filter))?;

    tracing::debug!(
        log_level = %config.level,
        log_format = %config.format,
        log_file = ?config.file,
        "Logging initialized"
    );
    Ok(())
}

/// Accepted spellings for `general.log_level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(format!(
                "unknown log level: {s}. Expected one of: trace, debug, info, warn, error"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GeneralConfig;

    #[test]
    fn log_level_spellings() {
        assert_eq!("trace".parse::<LogLevel>(), Ok(LogLevel::Trace));
        assert_eq!("DEBUG".parse::<LogLevel>(), Ok(LogLevel::Debug));
        assert_eq!("warning".parse::<LogLevel>(), Ok(LogLevel::Warn));
        assert_eq!("Error".parse::<LogLevel>(), Ok(LogLevel::Error));
        assert!("verbose".parse::<LogLevel>().is_err());
        assert!(LogLevel::Trace < LogLevel::Error);
    }

    #[test]
    fn defaults_match_general_section_defaults() {
        let from_general = LogConfig::from(&GeneralConfig::default());
        let default = LogConfig::default();
        assert_eq!(from_general.level, default.level);
        assert_eq!(from_general.format, default.format);
        assert!(from_general.file.is_none());
    }

    #[test]
    fn open_log_file_creates_private_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("solvemon.log");
        let mut file = open_log_file(&path).unwrap();
        io::Write::write_all(&mut file, b"line\n").unwrap();
        drop(file);

        // Reopening appends instead of truncating.
        let mut file = open_log_file(&path).unwrap();
        io::Write::write_all(&mut file, b"again\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "line\nagain\n");
        #[cfg(unix)]
        {
            let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o600);
        }
    }

    /// The subscriber is process-global, so the whole lifecycle lives in one test.
    #[test]
    fn init_from_general_section_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let log_file = dir.path().join("logs").join("solvemon.log");

        let bad = GeneralConfig {
            log_level: "loud".to_string(),
            log_format: LogFormat::Json,
            log_file: Some(log_file.clone()),
        };
        let err = init_logging(&LogConfig::from(&bad)).unwrap_err();
        assert!(matches!(err, LogError::InvalidLevel(ref level) if level == "loud"));
        assert!(!log_file.exists(), "rejected config must not touch the log file");

        let general = GeneralConfig {
            log_level: "info".to_string(),
            ..bad
        };
        init_logging(&LogConfig::from(&general)).unwrap();

        tracing::error!(seq = 7u64, stats = "1: 2 / 3 / 4", "Snapshot change published");
        let written = std::fs::read_to_string(&log_file).unwrap();
        let line = written
            .lines()
            .find(|line| line.contains("Snapshot change published"))
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(line).unwrap();
        assert!(parsed.get("timestamp").is_some());
        assert_eq!(parsed["seq"], 7);
        assert_eq!(parsed["stats"], "1: 2 / 3 / 4");

        let again = init_logging(&LogConfig::from(&general)).unwrap_err();
        assert!(matches!(again, LogError::AlreadyInitialized));
    }
}
