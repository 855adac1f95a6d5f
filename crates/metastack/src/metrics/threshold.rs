//! Greedy decision-threshold search.

use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};

use super::{check_beta, ConfusionCounts, MetricError};
use crate::error::ConfigError;

// =============================================================================
// ThresholdGrid
// =============================================================================

/// Ascending list of candidate decision thresholds in `[0, 1]`.
///
/// Built once by the caller and passed to every search; there is no
/// process-wide default list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct ThresholdGrid(Vec<f64>);

impl ThresholdGrid {
    /// Validate an explicit candidate list.
    pub fn new(thresholds: Vec<f64>) -> Result<Self, ConfigError> {
        let in_range = thresholds.iter().all(|t| (0.0..=1.0).contains(t));
        let ascending = thresholds.windows(2).all(|w| w[0] < w[1]);
        if thresholds.is_empty() || !in_range || !ascending {
            return Err(ConfigError::InvalidThresholdGrid);
        }
        Ok(Self(thresholds))
    }

    /// `steps` evenly spaced thresholds `k / steps` for `k` in `0..steps`.
    ///
    /// With the default 100 steps every multiple of 0.01 below 1 is a candidate.
    pub fn uniform(steps: usize) -> Self {
        let steps = steps.max(1);
        Self((0..steps).map(|k| k as f64 / steps as f64).collect())
    }

    /// Candidates concentrated where multi-label cutoffs cluster:
    /// every 0.03 from 0.03 to 0.27, then every 0.05 from 0.30 to 0.50.
    pub fn sparse() -> Self {
        let low = (3..30).step_by(3).map(|i| i as f64 / 100.0);
        let high = (30..=50).step_by(5).map(|i| i as f64 / 100.0);
        Self(low.chain(high).collect())
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for ThresholdGrid {
    fn default() -> Self {
        Self::sparse()
    }
}

impl TryFrom<Vec<f64>> for ThresholdGrid {
    type Error = ConfigError;

    fn try_from(value: Vec<f64>) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ThresholdGrid> for Vec<f64> {
    fn from(grid: ThresholdGrid) -> Self {
        grid.0
    }
}

// =============================================================================
// Search
// =============================================================================

/// Outcome of a greedy threshold search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdSearch {
    pub threshold: f64,
    pub score: f64,
}

/// Scan `grid` in ascending order and return the threshold with the highest
/// F-beta of `y_score > threshold`.
///
/// The first threshold to reach the maximum wins, so ties resolve toward the
/// lower cutoff.
pub fn greedy_threshold_search(
    y_true: ArrayView1<f32>,
    y_score: ArrayView1<f32>,
    beta: f64,
    grid: &ThresholdGrid,
) -> Result<ThresholdSearch, MetricError> {
    check_beta(beta)?;
    let mut best: Option<ThresholdSearch> = None;
    for &threshold in grid.as_slice() {
        let score = ConfusionCounts::at_threshold(y_true, y_score, threshold)?.fbeta(beta);
        if best.is_none_or(|b| score > b.score) {
            best = Some(ThresholdSearch { threshold, score });
        }
    }
    // Grids are validated non-empty on construction.
    best.ok_or(MetricError::Empty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::threshold_fbeta;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn sparse_grid_values() {
        let grid = ThresholdGrid::sparse();
        let expected = [
            0.03, 0.06, 0.09, 0.12, 0.15, 0.18, 0.21, 0.24, 0.27, 0.30, 0.35, 0.40, 0.45, 0.50,
        ];
        assert_eq!(grid.len(), expected.len());
        for (a, b) in grid.as_slice().iter().zip(expected) {
            assert_abs_diff_eq!(*a, b, epsilon = 1e-12);
        }
    }

    #[test]
    fn uniform_grid_contains_point_two() {
        let grid = ThresholdGrid::uniform(100);
        assert_eq!(grid.len(), 100);
        assert!(grid.as_slice().contains(&0.2));
    }

    #[test]
    fn invalid_grids_rejected() {
        assert!(ThresholdGrid::new(vec![]).is_err());
        assert!(ThresholdGrid::new(vec![0.5, 0.2]).is_err());
        assert!(ThresholdGrid::new(vec![0.2, 1.5]).is_err());
        assert!(serde_json::from_str::<ThresholdGrid>("[0.3, 0.1]").is_err());
    }

    #[test]
    fn picks_best_threshold() {
        // F2 is 15/16 at 0.2 (everything positive) and 5/7 at 0.5.
        let y = array![1.0f32, 0.0, 1.0, 1.0];
        let s = array![0.9f32, 0.4, 0.6, 0.3];
        let grid = ThresholdGrid::new(vec![0.2, 0.3, 0.4, 0.5]).unwrap();
        let found = greedy_threshold_search(y.view(), s.view(), 2.0, &grid).unwrap();
        assert_eq!(found.threshold, 0.2);
        assert_abs_diff_eq!(found.score, 15.0 / 16.0, epsilon = 1e-12);

        let at_half = threshold_fbeta(y.view(), s.view(), 0.5, 2.0).unwrap();
        assert_abs_diff_eq!(at_half, 5.0 / 7.0, epsilon = 1e-12);
    }

    #[test]
    fn ties_keep_lowest_threshold() {
        let y = array![1.0f32, 0.0];
        let s = array![0.9f32, 0.1];
        let grid = ThresholdGrid::new(vec![0.2, 0.3, 0.4]).unwrap();
        let found = greedy_threshold_search(y.view(), s.view(), 2.0, &grid).unwrap();
        assert_eq!(found.threshold, 0.2);
        assert_eq!(found.score, 1.0);
    }

    #[test]
    fn score_on_grid_point_is_not_above_it() {
        let y = array![1.0f32, 1.0];
        let s = array![0.2f32, 0.35];
        let grid = ThresholdGrid::new(vec![0.19, 0.2]).unwrap();
        assert_abs_diff_eq!(threshold_fbeta(y.view(), s.view(), 0.2, 2.0).unwrap(), 5.0 / 9.0, epsilon = 1e-12);
        let found = greedy_threshold_search(y.view(), s.view(), 2.0, &grid).unwrap();
        assert_eq!(found.threshold, 0.19);
        assert_eq!(found.score, 1.0);
    }

    #[test]
    fn never_below_fixed_cutoff_in_grid() {
        let y = array![1.0f32, 0.0, 1.0, 0.0, 1.0, 0.0];
        let s = array![0.15f32, 0.25, 0.6, 0.05, 0.35, 0.7];
        let grid = ThresholdGrid::uniform(100);
        let found = greedy_threshold_search(y.view(), s.view(), 2.0, &grid).unwrap();
        let fixed = threshold_fbeta(y.view(), s.view(), 0.2, 2.0).unwrap();
        assert!(found.score >= fixed);
    }
}
