//! Time-series log access: the trailing row and down-sampled trends.
//!
//! The solver appends one comma-separated row per reporting interval. Only a
//! handful of columns matter here (1-based):
//!
//! | Column | Field                    |
//! |--------|--------------------------|
//! | 1      | total steps              |
//! | 4      | queue size               |
//! | 5      | queue growth rate        |
//! | 6      | cumulative solutions     |
//! | 8      | average steps per second |

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::ResourceError;

/// Header emitted by [`TrendSeries::to_csv`].
pub const TREND_CSV_HEADER: &str = "steps,queueSize,queueGrowthRate,solutions,stepsPerSecond";

/// Default number of points returned by [`sample`].
pub const DEFAULT_MAX_POINTS: usize = 1000;

const COL_STEPS: usize = 0;
const COL_QUEUE_SIZE: usize = 3;
const COL_GROWTH_RATE: usize = 4;
const COL_SOLUTIONS: usize = 5;
const COL_STEPS_PER_SEC: usize = 7;

/// Initial window when scanning backwards for the last row.
const TAIL_CHUNK_BYTES: u64 = 4096;

// =============================================================================
// CsvRecord
// =============================================================================

/// The columns of one time-series row that the monitor uses.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CsvRecord {
    pub steps: u64,
    pub queue_size: u64,
    pub queue_growth_rate: f64,
    pub solutions: u64,
    pub steps_per_second: f64,
}

impl CsvRecord {
    /// Parse a raw row. Returns `None` for headers, short rows, or rows with
    /// non-numeric values in the used columns.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let fields: Vec<&str> = line.trim().split(',').map(str::trim).collect();
        if fields.len() <= COL_STEPS_PER_SEC {
            return None;
        }
        let count = |idx: usize| -> Option<u64> {
            let raw = fields[idx];
            raw.parse::<u64>().ok().or_else(|| {
                // Some writers emit integral counters as floats ("1.2e6").
                raw.parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite() && *v >= 0.0)
                    .map(|v| v as u64)
            })
        };
        let real = |idx: usize| -> Option<f64> {
            fields[idx].parse::<f64>().ok().filter(|v| v.is_finite())
        };

        Some(Self {
            steps: count(COL_STEPS)?,
            queue_size: count(COL_QUEUE_SIZE)?,
            queue_growth_rate: real(COL_GROWTH_RATE)?,
            solutions: count(COL_SOLUTIONS)?,
            steps_per_second: real(COL_STEPS_PER_SEC)?,
        })
    }

    /// Render in [`TREND_CSV_HEADER`] column order.
    #[must_use]
    pub fn to_csv_row(&self) -> String {
        format!(
            "{},{},{},{},{}",
            self.steps, self.queue_size, self.queue_growth_rate, self.solutions, self.steps_per_second
        )
    }
}

// =============================================================================
// Trailing row
// =============================================================================

fn read_error(path: &Path, source: std::io::Error) -> ResourceError {
    ResourceError::Read {
        path: path.to_path_buf(),
        source,
    }
}

/// Return the last non-empty line of the log, reading only the file tail.
///
/// `Ok(None)` means the file exists but holds no rows yet.
pub fn read_last_row(path: &Path) -> Result<Option<String>, ResourceError> {
    let mut file = File::open(path).map_err(|e| read_error(path, e))?;
    let len = file.metadata().map_err(|e| read_error(path, e))?.len();

    let mut window = TAIL_CHUNK_BYTES.min(len);
    loop {
        let start = len - window;
        file.seek(SeekFrom::Start(start))
            .map_err(|e| read_error(path, e))?;
        let mut buf = Vec::with_capacity(window as usize);
        (&mut file)
            .take(window)
            .read_to_end(&mut buf)
            .map_err(|e| read_error(path, e))?;

        let trimmed_len = buf
            .iter()
            .rposition(|b| !b.is_ascii_whitespace())
            .map_or(0, |pos| pos + 1);
        let body = &buf[..trimmed_len];

        match body.iter().rposition(|&b| b == b'\n') {
            Some(nl) => return decode_line(path, &body[nl + 1..]),
            // The whole file fits in the window: it is a single row.
            None if start == 0 => {
                return if body.is_empty() {
                    Ok(None)
                } else {
                    decode_line(path, body)
                };
            }
            None => window = (window * 2).min(len),
        }
    }
}

fn decode_line(path: &Path, bytes: &[u8]) -> Result<Option<String>, ResourceError> {
    let line = std::str::from_utf8(bytes).map_err(|_| ResourceError::NotUtf8 {
        path: path.to_path_buf(),
    })?;
    let line = line.trim();
    Ok((!line.is_empty()).then(|| line.to_string()))
}

// =============================================================================
// Trend sampling
// =============================================================================

/// Down-sampled view of the time-series log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrendSeries {
    /// Lines in the log at sampling time (header included).
    pub total_lines: usize,
    /// Every `interval`-th line was kept.
    pub interval: usize,
    pub points: Vec<CsvRecord>,
}

impl TrendSeries {
    /// CSV text with [`TREND_CSV_HEADER`], one row per point.
    #[must_use]
    pub fn to_csv(&self) -> String {
        let mut out = String::with_capacity(TREND_CSV_HEADER.len() + 1 + self.points.len() * 32);
        out.push_str(TREND_CSV_HEADER);
        out.push('\n');
        for point in &self.points {
            out.push_str(&point.to_csv_row());
            out.push('\n');
        }
        out
    }
}

/// Keep roughly `max_points` evenly spaced rows of the log.
///
/// The interval is `max(1, total_lines / max_points)`; a line is kept when its
/// 1-based number is a multiple of the interval. Rows that do not parse
/// (headers, torn appends) are skipped.
pub fn sample(path: &Path, max_points: usize) -> Result<TrendSeries, ResourceError> {
    let file = File::open(path).map_err(|e| read_error(path, e))?;
    let total_lines = BufReader::new(file)
        .split(b'\n')
        .try_fold(0usize, |n, line| line.map(|_| n + 1))
        .map_err(|e| read_error(path, e))?;

    if total_lines == 0 {
        return Ok(TrendSeries {
            total_lines,
            interval: 1,
            points: Vec::new(),
        });
    }

    let interval = (total_lines / max_points.max(1)).max(1);
    tracing::debug!(
        path = %path.display(),
        total_lines,
        interval,
        points = total_lines / interval,
        "Sampling trend log"
    );

    let file = File::open(path).map_err(|e| read_error(path, e))?;
    let mut points = Vec::with_capacity(total_lines / interval + 1);
    for (idx, line) in BufReader::new(file).split(b'\n').enumerate() {
        let line = line.map_err(|e| read_error(path, e))?;
        if (idx + 1) % interval != 0 {
            continue;
        }
        if let Some(record) = std::str::from_utf8(&line).ok().and_then(CsvRecord::parse) {
            points.push(record);
        }
    }

    Ok(TrendSeries {
        total_lines,
        interval,
        points,
    })
}

/// [`sample`], degrading to an empty series when the log is unreadable.
#[must_use]
pub fn sample_or_empty(path: &Path, max_points: usize) -> TrendSeries {
    match sample(path, max_points) {
        Ok(series) => series,
        Err(err) => {
            tracing::warn!(error = %err, "Trend log unavailable");
            TrendSeries {
                interval: 1,
                ..TrendSeries::default()
            }
        }
    }
}
