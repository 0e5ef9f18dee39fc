//! solvemon-core: Core library for solvemon
//!
//! Watches the snapshot file a long-running puzzle solver rewrites in place,
//! turns it into a stream of validated, de-duplicated snapshots, and derives
//! a per-cell stability heatmap from successive boards.
//!
//! # Architecture
//!
//! ```text
//! snapshot file ──notify──→ SnapshotWatcher ──→ StabilityHeatmap
//!                              (parse, dedup)        ↓
//! stats CSV ──tail──────────────────┘          SnapshotBus → web / CLI
//! ```
//!
//! # Modules
//!
//! - `snapshot`: Snapshot grammar, `Board` and `parse`
//! - `watcher`: Change notification, reload and de-duplication
//! - `heatmap`: Per-cell age tracking and derived views
//! - `bus`: Broadcast fanout of accepted snapshots
//! - `monitor`: Watcher thread plus shared state
//! - `trends`: CSV log tail and down-sampling
//! - `process`: Solver process liveness
//! - `web`: Read-only HTTP and server-sent events
//! - `config`: Configuration management
//! - `logging`: `tracing` subscriber setup
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod bus;
pub mod config;
pub mod error;
pub mod heatmap;
pub mod logging;
pub mod monitor;
pub mod process;
pub mod snapshot;
pub mod trends;
pub mod watcher;
pub mod web;

pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
