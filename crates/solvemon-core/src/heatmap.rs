//! Stability heatmap: how long each board cell has held the same character.
//!
//! Every observed board is compared cell-by-cell with the previous one. A cell
//! whose character is unchanged ages by one; a changed cell resets to zero.
//! Low ages mark the region the solver is actively exploring, high ages mark
//! settled placements.
//!
//! Derived views:
//!
//! - **normalized**: `age / max_age_ever`, stable colour scaling across updates
//! - **percentile**: rank of each age within the current matrix, with every
//!   cell at the current maximum pinned to exactly `1.0` so the most stable
//!   cells always sit at the top of the colour scale
//!
//! `max_age_ever` is seeded to 1, which keeps normalization well-defined
//! before any cell has aged.

use serde::{Serialize, Serializer};
use std::cell::OnceCell;

use crate::snapshot::Board;

// =============================================================================
// Grid
// =============================================================================

/// Dense row-major matrix matching a board's dimensions.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Grid<T> {
    width: usize,
    height: usize,
    values: Vec<T>,
}

impl<T: Clone> Grid<T> {
    fn filled(width: usize, height: usize, value: T) -> Self {
        Self {
            width,
            height,
            values: vec![value; width * height],
        }
    }
}

impl<T> Grid<T> {
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
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn get(&self, x: usize, y: usize) -> Option<&T> {
        if x < self.width && y < self.height {
            self.values.get(y * self.width + x)
        } else {
            None
        }
    }

    /// Row-major view of every value.
    #[must_use]
    pub fn values(&self) -> &[T] {
        &self.values
    }

    pub fn rows(&self) -> impl Iterator<Item = &[T]> + '_ {
        // chunks(0) panics; an empty grid simply has no rows.
        self.values.chunks(self.width.max(1))
    }

    #[must_use]
    pub fn to_nested(&self) -> Vec<Vec<T>>
    where
        T: Clone,
    {
        self.rows().map(<[T]>::to_vec).collect()
    }
}

impl<T: Serialize> Serialize for Grid<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.rows())
    }
}

// =============================================================================
// Update reporting
// =============================================================================

/// How an observation related to the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    /// First observation since construction, reset, or resize.
    Baseline,
    /// Identical board observed again; every age advanced.
    Unchanged,
    /// Ages existed before and every cell changed. Usually a solved puzzle
    /// or a solver restart.
    FullReset,
    /// Some cells changed.
    Progress,
}

/// Result of one [`StabilityHeatmap::update_board`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UpdateSummary {
    pub kind: UpdateKind,
    pub changed_cells: usize,
    pub total_cells: usize,
    /// Dimensions changed and prior history was discarded.
    pub resized: bool,
}

/// Instantaneous summary of the age matrix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HeatmapStats {
    pub min: u64,
    pub max: u64,
    pub average: f64,
    pub total_cells: usize,
    /// Historical high-water mark, never below 1.
    pub max_age_ever: u64,
}

/// Serializable bundle of every heatmap view, for transport.
#[derive(Debug, Clone, Serialize)]
pub struct HeatmapView {
    pub width: usize,
    pub height: usize,
    pub ages: Grid<u64>,
    pub normalized: Grid<f64>,
    pub percentile: Grid<f64>,
    pub stats: HeatmapStats,
    pub observations: u64,
}

// =============================================================================
// StabilityHeatmap
// =============================================================================

/// Per-cell age tracker over successive boards.
#[derive(Debug)]
pub struct StabilityHeatmap {
    ages: Grid<u64>,
    previous: Option<Board>,
    max_age_ever: u64,
    observations: u64,
    percentile_cache: OnceCell<Grid<f64>>,
}

impl Default for StabilityHeatmap {
    fn default() -> Self {
        Self::new()
    }
}

impl StabilityHeatmap {
    #[must_use]
    pub fn new() -> Self {
        Self {
            ages: Grid::default(),
            previous: None,
            max_age_ever: 1,
            observations: 0,
            percentile_cache: OnceCell::new(),
        }
    }

    /// Fold a new observation into the age matrix.
    pub fn update_board(&mut self, board: &Board) -> UpdateSummary {
        let (width, height) = board.dimensions();
        let total_cells = board.cell_count();

        let mut resized = false;
        if self.ages.dimensions() != (width, height) {
            resized = !self.ages.is_empty();
            if resized {
                tracing::info!(
                    from_width = self.ages.width(),
                    from_height = self.ages.height(),
                    width,
                    height,
                    "Board dimensions changed, discarding heatmap history"
                );
            }
            self.ages = Grid::filled(width, height, 0);
            self.previous = None;
        }

        let had_ages = self.previous.is_some() && self.ages.values.iter().any(|&age| age > 0);
        let mut changed_cells = 0;

        let kind = match &self.previous {
            None => {
                self.ages.values.fill(0);
                UpdateKind::Baseline
            }
            Some(previous) => {
                for ((age, current), prior) in self
                    .ages
                    .values
                    .iter_mut()
                    .zip(board.cells())
                    .zip(previous.cells())
                {
                    if current == prior {
                        *age += 1;
                        self.max_age_ever = self.max_age_ever.max(*age);
                    } else {
                        *age = 0;
                        changed_cells += 1;
                    }
                }

                if changed_cells == 0 {
                    UpdateKind::Unchanged
                } else if had_ages && changed_cells == total_cells {
                    UpdateKind::FullReset
                } else {
                    UpdateKind::Progress
                }
            }
        };

        match kind {
            UpdateKind::Unchanged => tracing::warn!(
                total_cells,
                "Heatmap received an identical board; possible duplicate event"
            ),
            UpdateKind::FullReset => tracing::info!(
                changed_cells,
                total_cells,
                "Every cell changed; likely a solution or solver restart"
            ),
            _ => tracing::debug!(changed_cells, total_cells, ?kind, "Heatmap updated"),
        }

        self.previous = Some(board.clone());
        self.observations += 1;
        self.percentile_cache = OnceCell::new();

        UpdateSummary {
            kind,
            changed_cells,
            total_cells,
            resized,
        }
    }

    /// Copy of the raw age matrix.
    #[must_use]
    pub fn age_matrix(&self) -> Grid<u64> {
        self.ages.clone()
    }

    /// Age at column `x`, row `y`.
    #[must_use]
    pub fn age_at(&self, x: usize, y: usize) -> Option<u64> {
        self.ages.get(x, y).copied()
    }

    #[must_use]
    pub fn max_age_ever(&self) -> u64 {
        self.max_age_ever
    }

    /// Boards folded in since construction or the last [`Self::reset`].
    #[must_use]
    pub fn observations(&self) -> u64 {
        self.observations
    }

    /// The most recently observed board.
    #[must_use]
    pub fn current_board(&self) -> Option<&Board> {
        self.previous.as_ref()
    }

    #[must_use]
    pub fn dimensions(&self) -> (usize, usize) {
        self.ages.dimensions()
    }

    /// `age / max_age_ever` for every cell.
    #[must_use]
    pub fn normalized_age_matrix(&self) -> Grid<f64> {
        let max = self.max_age_ever as f64;
        Grid {
            width: self.ages.width,
            height: self.ages.height,
            values: self.ages.values.iter().map(|&age| age as f64 / max).collect(),
        }
    }

    /// Percentile rank of every cell, memoized until the next update.
    pub fn percentile_matrix(&self) -> &Grid<f64> {
        self.percentile_cache
            .get_or_init(|| compute_percentiles(&self.ages))
    }

    #[must_use]
    pub fn percentile_at(&self, x: usize, y: usize) -> Option<f64> {
        self.percentile_matrix().get(x, y).copied()
    }

    #[must_use]
    pub fn stats(&self) -> HeatmapStats {
        let values = &self.ages.values;
        if values.is_empty() {
            return HeatmapStats {
                min: 0,
                max: 0,
                average: 0.0,
                total_cells: 0,
                max_age_ever: self.max_age_ever,
            };
        }

        let (min, max, sum) = values.iter().fold(
            (u64::MAX, 0u64, 0u128),
            |(min, max, sum), &age| (min.min(age), max.max(age), sum + u128::from(age)),
        );

        HeatmapStats {
            min,
            max,
            average: sum as f64 / values.len() as f64,
            total_cells: values.len(),
            max_age_ever: self.max_age_ever,
        }
    }

    /// Every view in one serializable bundle.
    #[must_use]
    pub fn view(&self) -> HeatmapView {
        HeatmapView {
            width: self.ages.width,
            height: self.ages.height,
            ages: self.age_matrix(),
            normalized: self.normalized_age_matrix(),
            percentile: self.percentile_matrix().clone(),
            stats: self.stats(),
            observations: self.observations,
        }
    }

    /// Forget all history, as if newly constructed.
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

fn compute_percentiles(ages: &Grid<u64>) -> Grid<f64> {
    let mut sorted = ages.values.clone();
    sorted.sort_unstable();
    let current_max = sorted.last().copied();
    let denominator = sorted.len().saturating_sub(1);

    let values = ages
        .values
        .iter()
        .map(|&age| {
            if Some(age) == current_max {
                1.0
            } else if denominator > 0 {
                let younger = sorted.partition_point(|&other| other < age);
                younger as f64 / denominator as f64
            } else {
                0.0
            }
        })
        .collect();

    Grid {
        width: ages.width,
        height: ages.height,
        values,
    }
}
