//! Snapshot parsing and validation.
//!
//! The solver periodically rewrites a plain-text snapshot file with this
//! layout:
//!
//! ```text
//! ##AB.C##          <- board rows, one character per cell
//! #DDB..C#
//!                   <- exactly one blank separator line
//! 1234: 17 / 88 / 901   <- progress line
//! 1.0042            <- queue growth metric
//! ```
//!
//! The file is not replaced atomically, so a reader may observe a torn
//! write. [`parse`] therefore rejects any structural anomaly with a
//! [`SnapshotError`] instead of guessing, and never returns a partially
//! populated [`Snapshot`].

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::error::SnapshotError;
use crate::trends::CsvRecord;

/// Inputs shorter than this (after trimming trailing whitespace) are rejected.
pub const MIN_SNAPSHOT_BYTES: usize = 8;

/// Board row + blank separator + stats line + metric line.
pub const MIN_SNAPSHOT_LINES: usize = 4;

/// Cell character for a permanently blocked cell.
pub const BLOCKED_CELL: char = '#';

/// Cell character for a currently vacant cell.
pub const VACANT_CELL: char = '.';

static STATS_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+):\s*(\d+)\s*/\s*(\d+)\s*/\s*(\d+)$").expect("stats regex is valid")
});

// =============================================================================
// Board
// =============================================================================

/// Classification of a single board cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellKind {
    /// `#`: never available for placement.
    Blocked,
    /// `.`: currently empty.
    Vacant,
    /// Any other character identifies a placed piece.
    Piece(char),
}

impl CellKind {
    #[must_use]
    pub fn classify(ch: char) -> Self {
        match ch {
            BLOCKED_CELL => Self::Blocked,
            VACANT_CELL => Self::Vacant,
            other => Self::Piece(other),
        }
    }
}

/// Rectangular grid of single-character cells, stored row-major.
///
/// Invariant: at least one row and one column, every row the same length.
/// Serializes as an array of row strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct Board {
    width: usize,
    height: usize,
    cells: Vec<char>,
}

impl Board {
    /// Build a board from its rows, validating the rectangular invariant.
    pub fn from_rows<I, S>(rows: I) -> Result<Self, SnapshotError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut width = None;
        let mut height = 0;
        let mut cells = Vec::new();

        for (idx, row) in rows.into_iter().enumerate() {
            let row = row.as_ref();
            let before = cells.len();
            cells.extend(row.chars());
            let len = cells.len() - before;

            match width {
                None => width = Some(len),
                Some(expected) if expected != len => {
                    return Err(SnapshotError::RaggedBoard {
                        row: idx,
                        expected,
                        actual: len,
                    });
                }
                Some(_) => {}
            }
            height += 1;
        }

        let width = width.unwrap_or(0);
        if height == 0 || width == 0 {
            return Err(SnapshotError::EmptyBoard);
        }

        Ok(Self {
            width,
            height,
            cells,
        })
    }

    #[must_use]
    pub fn width(&self) -> usize {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> usize {
        self.height
    }

    /// `(width, height)`
    #[must_use]
    pub fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    #[must_use]
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Character at column `x`, row `y`.
    #[must_use]
    pub fn cell(&self, x: usize, y: usize) -> Option<char> {
        if x < self.width && y < self.height {
            self.cells.get(y * self.width + x).copied()
        } else {
            None
        }
    }

    #[must_use]
    pub fn cell_kind(&self, x: usize, y: usize) -> Option<CellKind> {
        self.cell(x, y).map(CellKind::classify)
    }

    /// Row-major view of every cell.
    #[must_use]
    pub fn cells(&self) -> &[char] {
        &self.cells
    }

    /// Iterate rows as character slices.
    pub fn rows(&self) -> impl Iterator<Item = &[char]> + '_ {
        self.cells.chunks(self.width)
    }

    /// Rows rendered back to strings.
    #[must_use]
    pub fn to_rows(&self) -> Vec<String> {
        self.rows().map(|row| row.iter().collect()).collect()
    }

    /// Number of cells holding a placed piece.
    #[must_use]
    pub fn placed_pieces(&self) -> usize {
        self.cells
            .iter()
            .filter(|&&ch| matches!(CellKind::classify(ch), CellKind::Piece(_)))
            .count()
    }
}

impl TryFrom<Vec<String>> for Board {
    type Error = SnapshotError;

    fn try_from(rows: Vec<String>) -> Result<Self, Self::Error> {
        Self::from_rows(rows)
    }
}

impl From<Board> for Vec<String> {
    fn from(board: Board) -> Self {
        board.to_rows()
    }
}

// =============================================================================
// Progress line
// =============================================================================

/// Typed view of the `<total-steps>: <since-dequeue> / <queue> / <dequeues>`
/// progress line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressStats {
    pub total_steps: u64,
    pub steps_since_dequeue: u64,
    pub queue_size: u64,
    pub total_dequeues: u64,
}

impl ProgressStats {
    /// Parse a progress line. Surrounding whitespace is ignored.
    pub fn parse(line: &str) -> Result<Self, SnapshotError> {
        let invalid = || SnapshotError::InvalidStats(line.to_string());
        let caps = STATS_LINE.captures(line.trim()).ok_or_else(invalid)?;
        let field = |idx: usize| -> Result<u64, SnapshotError> {
            caps.get(idx)
                .and_then(|m| m.as_str().parse::<u64>().ok())
                .ok_or_else(invalid)
        };
        Ok(Self {
            total_steps: field(1)?,
            steps_since_dequeue: field(2)?,
            queue_size: field(3)?,
            total_dequeues: field(4)?,
        })
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// One validated, immutable observation of solver state.
///
/// Equality is full value equality: two snapshots parsed from different bytes
/// compare equal when board, stats, metric and CSV tail all match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    board: Board,
    stats: String,
    metric: Option<f64>,
    csv_stats: Option<String>,
}

impl Snapshot {
    #[must_use]
    pub fn new(board: Board, stats: impl Into<String>, metric: Option<f64>) -> Self {
        Self {
            board,
            stats: stats.into(),
            metric,
            csv_stats: None,
        }
    }

    /// Attach the trailing row of the time-series log.
    #[must_use]
    pub fn with_csv_stats(mut self, csv_stats: Option<String>) -> Self {
        self.csv_stats = csv_stats;
        self
    }

    #[must_use]
    pub fn board(&self) -> &Board {
        &self.board
    }

    /// Raw progress line as written by the solver.
    #[must_use]
    pub fn stats(&self) -> &str {
        &self.stats
    }

    /// Queue growth ratio: above 1 growing, below 1 shrinking.
    #[must_use]
    pub fn metric(&self) -> Option<f64> {
        self.metric
    }

    #[must_use]
    pub fn csv_stats(&self) -> Option<&str> {
        self.csv_stats.as_deref()
    }

    /// Typed progress line. `None` when a counter does not fit in `u64`.
    #[must_use]
    pub fn progress(&self) -> Option<ProgressStats> {
        ProgressStats::parse(&self.stats).ok()
    }

    /// Typed CSV tail, when present and well-formed.
    #[must_use]
    pub fn csv_record(&self) -> Option<CsvRecord> {
        self.csv_stats.as_deref().and_then(CsvRecord::parse)
    }
}

/// Parse raw snapshot text.
///
/// Board rows run until the first blank line, exactly one blank separator is
/// skipped, then come the stats line and the metric line. Anything after the
/// metric line is ignored. The returned snapshot has no CSV tail attached.
pub fn parse(raw: &str) -> Result<Snapshot, SnapshotError> {
    let text = raw.trim_end();
    if text.len() < MIN_SNAPSHOT_BYTES {
        return Err(SnapshotError::TooShort {
            len: text.len(),
            min: MIN_SNAPSHOT_BYTES,
        });
    }

    let lines: Vec<&str> = text.lines().collect();
    if lines.len() < MIN_SNAPSHOT_LINES {
        return Err(SnapshotError::Truncated {
            lines: lines.len(),
            min: MIN_SNAPSHOT_LINES,
        });
    }

    let board_len = lines
        .iter()
        .position(|line| line.trim().is_empty())
        .unwrap_or(lines.len());
    let board = Board::from_rows(&lines[..board_len])?;

    // Skip the single blank separator.
    let stats_idx = board_len + 1;
    let stats = match lines.get(stats_idx) {
        Some(line) if !line.trim().is_empty() => line.trim(),
        _ => return Err(SnapshotError::MissingStats),
    };
    // Grammar only; counters wider than u64 still parse, `progress()` is None.
    if !STATS_LINE.is_match(stats) {
        return Err(SnapshotError::InvalidStats(stats.to_string()));
    }

    let metric = match lines.get(stats_idx + 1) {
        Some(line) if !line.trim().is_empty() => line.trim(),
        _ => return Err(SnapshotError::MissingMetric),
    };
    let metric = metric
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or_else(|| SnapshotError::InvalidMetric(metric.to_string()))?;

    Ok(Snapshot::new(board, stats, Some(metric)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = "##AB.C##\n#DDB..C#\n\n1234: 17 / 88 / 901\n1.0042\n";

    #[test]
    fn parses_valid_snapshot() {
        let snap = parse(VALID).unwrap();
        assert_eq!(snap.board().dimensions(), (8, 2));
        assert_eq!(snap.stats(), "1234: 17 / 88 / 901");
        assert_eq!(snap.metric(), Some(1.0042));
        assert!(snap.csv_stats().is_none());
        assert_eq!(
            snap.board().to_rows(),
            vec!["##AB.C##".to_string(), "#DDB..C#".to_string()]
        );
    }

    #[test]
    fn progress_is_typed() {
        let snap = parse(VALID).unwrap();
        let progress = snap.progress().unwrap();
        assert_eq!(progress.total_steps, 1234);
        assert_eq!(progress.steps_since_dequeue, 17);
        assert_eq!(progress.queue_size, 88);
        assert_eq!(progress.total_dequeues, 901);
    }

    #[test]
    fn accepts_crlf_and_trailing_lines() {
        let text = "AB\r\nCD\r\n\r\n1: 2 / 3 / 4\r\n0.5\r\nextra trailing line\r\n";
        let snap = parse(text).unwrap();
        assert_eq!(snap.board().to_rows(), vec!["AB", "CD"]);
        assert_eq!(snap.metric(), Some(0.5));
    }

    #[test]
    fn stats_spacing_is_flexible() {
        let snap = parse("AB\n\n10:2/3/4\n1\n").unwrap();
        assert_eq!(snap.progress().unwrap().queue_size, 3);
    }

    #[test]
    fn rejects_empty_and_short_input() {
        assert!(matches!(parse(""), Err(SnapshotError::TooShort { .. })));
        assert!(matches!(parse("   \n\n"), Err(SnapshotError::TooShort { .. })));
        assert!(matches!(parse("A\n\n1"), Err(SnapshotError::TooShort { .. })));
    }

    #[test]
    fn rejects_too_few_lines() {
        assert!(matches!(
            parse("ABCDEFGHIJ\n\n1: 2 / 3 / 4"),
            Err(SnapshotError::Truncated { lines: 3, .. })
        ));
    }

    #[test]
    fn rejects_empty_board_section() {
        let err = parse("\n1: 2 / 3 / 4\n1.0\nmore\n").unwrap_err();
        assert_eq!(err, SnapshotError::EmptyBoard);
    }

    #[test]
    fn rejects_ragged_rows() {
        let err = parse("ABC\nAB\n\n1: 2 / 3 / 4\n1.0\n").unwrap_err();
        assert_eq!(
            err,
            SnapshotError::RaggedBoard {
                row: 1,
                expected: 3,
                actual: 2
            }
        );
    }

    #[test]
    fn rejects_double_separator() {
        let err = parse("AB\nCD\n\n\n1: 2 / 3 / 4\n1.0\n").unwrap_err();
        assert_eq!(err, SnapshotError::MissingStats);
    }

    #[test]
    fn rejects_bad_stats_shape() {
        let err = parse("AB\nCD\n\n1: 2 / 3\n1.0\n").unwrap_err();
        assert!(matches!(err, SnapshotError::InvalidStats(_)));
        let err = parse("AB\nCD\n\nsteps: 2 / 3 / 4\n1.0\n").unwrap_err();
        assert!(matches!(err, SnapshotError::InvalidStats(_)));
    }

    #[test]
    fn oversized_counters_still_parse() {
        let snap = parse("AB\nCD\n\n99999999999999999999: 1 / 2 / 3\n1.0\n").unwrap();
        assert_eq!(snap.stats(), "99999999999999999999: 1 / 2 / 3");
        assert_eq!(snap.progress(), None);
    }

    #[test]
    fn rejects_bad_metric() {
        let err = parse("AB\nCD\n\n1: 2 / 3 / 4\ngrowing\n").unwrap_err();
        assert!(matches!(err, SnapshotError::InvalidMetric(_)));
        let err = parse("AB\nCD\n\n1: 2 / 3 / 4\nNaN\n").unwrap_err();
        assert!(matches!(err, SnapshotError::InvalidMetric(_)));
    }

    #[test]
    fn rejects_missing_metric() {
        let err = parse("ABCD\nEFGH\n\n1: 2 / 3 / 4\n").unwrap_err();
        assert_eq!(err, SnapshotError::MissingMetric);
    }

    #[test]
    fn truncations_never_yield_partial_snapshot() {
        let cuts = [
            "##AB.C##\n#DDB..C#\n",
            "##AB.C##\n#DDB..C#\n\n",
            "##AB.C##\n#DDB..C#\n\n1234: 17 / 88 / 901\n",
        ];
        for cut in cuts {
            assert!(parse(cut).is_err(), "cut {cut:?} should fail");
        }
    }

    #[test]
    fn formatting_noise_yields_equal_snapshots() {
        let a = parse("AB\nCD\n\n1: 2 / 3 / 4\n1.5\n").unwrap();
        let b = parse("AB\nCD\n\n1: 2 / 3 / 4\n1.50\n\n\n").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn board_serializes_as_row_strings() {
        let board = Board::from_rows(["A.", "#B"]).unwrap();
        let json = serde_json::to_string(&board).unwrap();
        assert_eq!(json, r##"["A.","#B"]"##);
        let back: Board = serde_json::from_str(&json).unwrap();
        assert_eq!(back, board);
        assert!(serde_json::from_str::<Board>(r#"["AB","C"]"#).is_err());
    }

    #[test]
    fn cell_classification() {
        let board = Board::from_rows(["#.", "Aa"]).unwrap();
        assert_eq!(board.cell_kind(0, 0), Some(CellKind::Blocked));
        assert_eq!(board.cell_kind(1, 0), Some(CellKind::Vacant));
        assert_eq!(board.cell_kind(0, 1), Some(CellKind::Piece('A')));
        assert_eq!(board.cell_kind(2, 0), None);
        assert_eq!(board.placed_pieces(), 2);
    }

    #[test]
    fn board_width_counts_characters_not_bytes() {
        let board = Board::from_rows(["é.", "ab"]).unwrap();
        assert_eq!(board.width(), 2);
    }
}
