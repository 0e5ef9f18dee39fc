//! Error types for solvemon-core

use std::fmt::Write;
use std::path::PathBuf;
use thiserror::Error;

/// Remediation command for resolving an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RemediationCommand {
    /// Short label describing the command purpose
    pub label: String,
    /// Command to run
    pub command: String,
}

/// Actionable remediation guidance for an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Remediation {
    /// One-line summary of how to fix the issue
    pub summary: String,
    /// Suggested commands to resolve or diagnose the issue
    pub commands: Vec<RemediationCommand>,
    /// Additional alternative guidance
    pub alternatives: Vec<String>,
}

impl Remediation {
    /// Create a new remediation with a summary
    #[must_use]
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            commands: Vec::new(),
            alternatives: Vec::new(),
        }
    }

    /// Add a command
    #[must_use]
    pub fn command(mut self, label: impl Into<String>, command: impl Into<String>) -> Self {
        self.commands.push(RemediationCommand {
            label: label.into(),
            command: command.into(),
        });
        self
    }

    /// Add an alternative suggestion
    #[must_use]
    pub fn alternative(mut self, alternative: impl Into<String>) -> Self {
        self.alternatives.push(alternative.into());
        self
    }

    /// Render remediation text for human-readable output
    #[must_use]
    pub fn render_plain(&self) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "To fix:");
        let _ = writeln!(output, "  {}", self.summary);

        if !self.commands.is_empty() {
            let _ = writeln!(output, "  Commands:");
            for cmd in &self.commands {
                let _ = writeln!(output, "    - {}: {}", cmd.label, cmd.command);
            }
        }

        if !self.alternatives.is_empty() {
            let _ = writeln!(output, "  Alternatives:");
            for alt in &self.alternatives {
                let _ = writeln!(output, "    - {alt}");
            }
        }

        output
    }
}

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for solvemon-core
#[derive(Error, Debug)]
pub enum Error {
    /// Structural or grammar violation in the snapshot file
    #[error("Malformed snapshot: {0}")]
    Snapshot(#[from] SnapshotError),

    /// Backing file or process information could not be read
    #[error("Resource unavailable: {0}")]
    Resource(#[from] ResourceError),

    /// The file-change notification mechanism failed
    #[error("Watcher failure: {0}")]
    Watch(#[from] WatchError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Runtime errors (thread spawn, channel failures, etc.)
    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl Error {
    /// Return remediation guidance when available.
    #[must_use]
    pub fn remediation(&self) -> Option<Remediation> {
        match self {
            Self::Snapshot(err) => Some(err.remediation()),
            Self::Resource(err) => Some(err.remediation()),
            Self::Watch(err) => Some(err.remediation()),
            Self::Config(err) => Some(err.remediation()),
            Self::Io(_) => Some(
                Remediation::new("Check filesystem permissions and paths, then retry.")
                    .alternative("Verify the solver log directory exists and is readable."),
            ),
            Self::Json(_) => None,
            Self::Runtime(_) => Some(
                Remediation::new("Restart the monitor and retry.")
                    .command("Restart", "solvemon watch"),
            ),
        }
    }

    /// Whether the error is expected to clear up on its own (the next tick
    /// may succeed).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Snapshot(_) | Self::Resource(_))
    }
}

/// Snapshot grammar violations.
///
/// The solver rewrites its snapshot file in place, so a reader can observe a
/// torn write. Every variant here means "discard this tick".
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SnapshotError {
    #[error("snapshot is too short ({len} bytes, need at least {min})")]
    TooShort { len: usize, min: usize },

    #[error("snapshot is truncated ({lines} lines, need at least {min})")]
    Truncated { lines: usize, min: usize },

    #[error("board section is empty")]
    EmptyBoard,

    #[error("board row {row} has length {actual}, expected {expected}")]
    RaggedBoard {
        row: usize,
        expected: usize,
        actual: usize,
    },

    #[error("stats line is missing")]
    MissingStats,

    #[error("stats line does not match `<steps>: <n> / <n> / <n>`: {0:?}")]
    InvalidStats(String),

    #[error("metric line is missing")]
    MissingMetric,

    #[error("metric line is not a finite number: {0:?}")]
    InvalidMetric(String),
}

impl SnapshotError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::TooShort { .. } | Self::Truncated { .. } => Remediation::new(
                "The snapshot file was read mid-rewrite. Wait for the next update.",
            )
            .alternative("If this persists, check that the solver is still running."),
            Self::EmptyBoard | Self::RaggedBoard { .. } => Remediation::new(
                "The board section is malformed. Inspect the snapshot file.",
            )
            .command("Parse once", "solvemon snapshot"),
            Self::MissingStats | Self::InvalidStats(_) => Remediation::new(
                "The progress line is missing or malformed. Inspect the snapshot file.",
            )
            .command("Parse once", "solvemon snapshot"),
            Self::MissingMetric | Self::InvalidMetric(_) => Remediation::new(
                "The growth metric line is missing or malformed.",
            )
            .command("Parse once", "solvemon snapshot"),
        }
    }
}

/// A backing file or process query could not be read.
#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is not valid UTF-8")]
    NotUtf8 { path: PathBuf },
}

impl ResourceError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::Read { path, .. } | Self::NotUtf8 { path } => Remediation::new(format!(
                "Verify that {} exists and is readable.",
                path.display()
            ))
            .command("Show resolved paths", "solvemon --help")
            .alternative("Point --log-dir at the solver's save directory."),
        }
    }
}

/// The file-change observer failed. Watching stops and must be restarted.
#[derive(Error, Debug, Clone)]
pub enum WatchError {
    #[error("failed to install watcher on {path}: {reason}")]
    Install { path: PathBuf, reason: String },

    #[error("file watcher reported an error: {0}")]
    Observer(String),
}

impl WatchError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::Install { path, .. } => Remediation::new(format!(
                "Make sure {} exists before starting the watcher.",
                path.display()
            ))
            .command("Restart", "solvemon watch"),
            Self::Observer(_) => Remediation::new(
                "The file watcher stopped delivering updates. Restart the monitor.",
            )
            .command("Restart", "solvemon watch")
            .alternative("Check inotify limits: cat /proc/sys/fs/inotify/max_user_watches"),
        }
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read config {path}: {message}")]
    ReadFailed { path: PathBuf, message: String },

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid config value: {0}")]
    ValidationError(String),
}

impl ConfigError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::FileNotFound(path) => Remediation::new(format!(
                "Create {} or pass --config with an existing file.",
                path.display()
            )),
            Self::ReadFailed { .. } => {
                Remediation::new("Check config file permissions and retry.")
            }
            Self::ParseError(_) => Remediation::new("Fix the TOML syntax in the config file.")
                .alternative("Remove the file to fall back to defaults."),
            Self::ValidationError(_) => {
                Remediation::new("Correct the reported value in the config file.")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remediation_available_for_error_variants() {
        let errors = vec![
            Error::Snapshot(SnapshotError::EmptyBoard),
            Error::Snapshot(SnapshotError::TooShort { len: 2, min: 8 }),
            Error::Resource(ResourceError::NotUtf8 {
                path: PathBuf::from("/tmp/snapshot.txt"),
            }),
            Error::Watch(WatchError::Observer("inotify".to_string())),
            Error::Config(ConfigError::ParseError("bad".to_string())),
            Error::Runtime("boom".to_string()),
        ];

        for err in errors {
            let remediation = err.remediation().expect("remediation");
            assert!(!remediation.summary.is_empty(), "{err}");
        }
    }

    #[test]
    fn snapshot_and_resource_errors_are_transient() {
        assert!(Error::Snapshot(SnapshotError::MissingStats).is_transient());
        let unreadable = ResourceError::NotUtf8 {
            path: PathBuf::from("snapshot.txt"),
        };
        assert!(Error::Resource(unreadable).is_transient());
        assert!(!Error::Watch(WatchError::Observer("x".to_string())).is_transient());
    }

    #[test]
    fn render_plain_lists_commands_and_alternatives() {
        let text = Remediation::new("Do the thing")
            .command("Run", "solvemon snapshot")
            .alternative("Or wait")
            .render_plain();
        assert!(text.contains("To fix:"));
        assert!(text.contains("Run: solvemon snapshot"));
        assert!(text.contains("Or wait"));
    }

    #[test]
    fn ragged_board_message_names_row() {
        let err = SnapshotError::RaggedBoard {
            row: 3,
            expected: 8,
            actual: 7,
        };
        assert_eq!(err.to_string(), "board row 3 has length 7, expected 8");
    }
}
