//! Configuration management for solvemon
//!
//! Handles loading and validation of solvemon.toml configuration files.
//! Every section is optional; a missing file yields the defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Config file name searched for in the working directory and the user
/// config directory.
pub const CONFIG_FILE_NAME: &str = "solvemon.toml";

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Locations of the solver's artifacts
    #[serde(default)]
    pub paths: PathsConfig,

    /// Watcher loop settings
    #[serde(default)]
    pub watcher: WatcherConfig,

    /// Trend sampling settings
    #[serde(default)]
    pub trends: TrendsConfig,

    /// Solver process lookup
    #[serde(default)]
    pub process: ProcessConfig,

    /// HTTP server settings
    #[serde(default)]
    pub web: WebConfig,
}

// =============================================================================
// Sections
// =============================================================================

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable colored output
    #[default]
    Pretty,
    /// JSON lines
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pretty => f.write_str("pretty"),
            Self::Json => f.write_str("json"),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(format!(
                "unknown log format: {s}. Expected one of: pretty, json"
            )),
        }
    }
}

/// General configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log output format
    #[serde(default)]
    pub log_format: LogFormat,

    /// Optional log file (appended to)
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            log_file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Paths configuration. File names are resolved against `log_dir` unless
/// absolute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory the solver writes into
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Snapshot file, rewritten in place by the solver
    #[serde(default = "default_snapshot_file")]
    pub snapshot_file: PathBuf,

    /// Append-only CSV progress log
    #[serde(default = "default_stats_file")]
    pub stats_file: PathBuf,

    /// Solutions found so far
    #[serde(default = "default_solutions_file")]
    pub solutions_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            snapshot_file: default_snapshot_file(),
            stats_file: default_stats_file(),
            solutions_file: default_solutions_file(),
        }
    }
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_snapshot_file() -> PathBuf {
    PathBuf::from("snapshot-treequence.txt")
}

fn default_stats_file() -> PathBuf {
    PathBuf::from("stats-treequence.csv")
}

fn default_solutions_file() -> PathBuf {
    PathBuf::from("solutions.txt")
}

impl PathsConfig {
    fn resolve(&self, file: &Path) -> PathBuf {
        if file.is_absolute() {
            file.to_path_buf()
        } else {
            self.log_dir.join(file)
        }
    }

    #[must_use]
    pub fn snapshot_path(&self) -> PathBuf {
        self.resolve(&self.snapshot_file)
    }

    #[must_use]
    pub fn stats_path(&self) -> PathBuf {
        self.resolve(&self.stats_file)
    }

    #[must_use]
    pub fn solutions_path(&self) -> PathBuf {
        self.resolve(&self.solutions_file)
    }
}

/// Watcher loop configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// How often the watcher thread checks its stop flag, in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
        }
    }
}

fn default_poll_interval() -> u64 {
    250
}

/// Trend sampling configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendsConfig {
    /// Upper bound on sampled points per trend query
    #[serde(default = "default_max_points")]
    pub max_points: usize,
}

impl Default for TrendsConfig {
    fn default() -> Self {
        Self {
            max_points: default_max_points(),
        }
    }
}

fn default_max_points() -> usize {
    crate::trends::DEFAULT_MAX_POINTS
}

/// Solver process lookup configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessConfig {
    /// Executable name of the solver
    #[serde(default = "default_process_name")]
    pub name: String,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            name: default_process_name(),
        }
    }
}

fn default_process_name() -> String {
    "solve_file".to_string()
}

/// HTTP server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebConfig {
    /// Bind host
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Frames a slow stream client may fall behind before it lags
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,

    /// Allow binding to a non-loopback address
    #[serde(default)]
    pub allow_public_bind: bool,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            bus_capacity: default_bus_capacity(),
            allow_public_bind: false,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3001
}

fn default_bus_capacity() -> usize {
    crate::bus::DEFAULT_BUS_CAPACITY
}

// =============================================================================
// Loading
// =============================================================================

impl Config {
    /// Load configuration from default locations.
    ///
    /// Searches `./solvemon.toml`, then `<config_dir>/solvemon/solvemon.toml`.
    /// Falls back to defaults when neither exists.
    pub fn load() -> crate::Result<Self> {
        match Self::default_search_paths()
            .into_iter()
            .find(|candidate| candidate.is_file())
        {
            Some(path) => Self::load_from(&path),
            None => {
                tracing::debug!("No config file found; using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> crate::Result<Self> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()).into());
        }
        let text = std::fs::read_to_string(path).map_err(|err| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Load from `path` when given, otherwise from the default locations.
    pub fn load_or_default(path: Option<&Path>) -> crate::Result<Self> {
        match path {
            Some(path) => Self::load_from(path),
            None => Self::load(),
        }
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> crate::Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|err| ConfigError::ParseError(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML.
    pub fn to_toml_string(&self) -> crate::Result<String> {
        toml::to_string_pretty(self)
            .map_err(|err| ConfigError::ParseError(err.to_string()).into())
    }

    /// Candidate config files in search order.
    #[must_use]
    pub fn default_search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(CONFIG_FILE_NAME)];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("solvemon").join(CONFIG_FILE_NAME));
        }
        paths
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.general
            .log_level
            .parse::<crate::logging::LogLevel>()
            .map_err(ConfigError::ValidationError)?;
        if self.watcher.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "watcher.poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.trends.max_points == 0 {
            return Err(ConfigError::ValidationError(
                "trends.max_points must be greater than 0".to_string(),
            ));
        }
        if self.web.bus_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "web.bus_capacity must be greater than 0".to_string(),
            ));
        }
        if self.process.name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "process.name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.watcher.poll_interval_ms, 250);
        assert_eq!(config.trends.max_points, 1000);
        assert_eq!(config.web.port, 3001);
        assert!(!config.web.allow_public_bind);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_document_yields_defaults() {
        assert_eq!(Config::from_toml_str("").unwrap(), Config::default());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::from_toml_str(
            r#"
            [general]
            log_format = "json"

            [paths]
            log_dir = "/var/solver"

            [web]
            port = 8080
            "#,
        )
        .unwrap();
        assert_eq!(config.general.log_format, LogFormat::Json);
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.web.port, 8080);
        assert_eq!(config.web.host, "127.0.0.1");
        assert_eq!(
            config.paths.snapshot_path(),
            PathBuf::from("/var/solver/snapshot-treequence.txt")
        );
    }

    #[test]
    fn absolute_file_names_ignore_log_dir() {
        let paths = PathsConfig {
            stats_file: PathBuf::from("/elsewhere/stats.csv"),
            ..PathsConfig::default()
        };
        assert_eq!(paths.stats_path(), PathBuf::from("/elsewhere/stats.csv"));
        assert_eq!(paths.solutions_path(), PathBuf::from("logs/solutions.txt"));
    }

    #[test]
    fn invalid_values_are_rejected() {
        for doc in [
            "[watcher]\npoll_interval_ms = 0",
            "[trends]\nmax_points = 0",
            "[web]\nbus_capacity = 0",
            "[general]\nlog_level = \"loud\"",
            "[process]\nname = \"  \"",
        ] {
            assert!(
                matches!(
                    Config::from_toml_str(doc),
                    Err(Error::Config(ConfigError::ValidationError(_)))
                ),
                "{doc}"
            );
        }
    }

    #[test]
    fn syntax_errors_are_parse_errors() {
        assert!(matches!(
            Config::from_toml_str("[general"),
            Err(Error::Config(ConfigError::ParseError(_)))
        ));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[process]\nname = \"solver\"\n").unwrap();
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.process.name, "solver");

        let missing = dir.path().join("missing.toml");
        assert!(matches!(
            Config::load_from(&missing),
            Err(Error::Config(ConfigError::FileNotFound(_)))
        ));
    }

    #[test]
    fn toml_roundtrip() {
        let mut config = Config::default();
        config.general.log_file = Some(PathBuf::from("/tmp/solvemon.log"));
        config.trends.max_points = 50;
        let text = config.to_toml_string().unwrap();
        assert_eq!(Config::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn log_format_parse_and_display() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!(LogFormat::Pretty.to_string(), "pretty");
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
