//! F-beta metric engine.
//!
//! Every other component scores predictions through this module:
//!
//! - [`fbeta`], [`threshold_fbeta`]: exact F-beta on binary decisions
//! - [`fbeta_per_label`], [`fbeta_macro`]: column-wise variants for
//!   samples × labels matrices
//! - [`smooth_fbeta`]: continuous surrogate computed on raw scores
//! - [`greedy_threshold_search`]: best cutoff over a [`ThresholdGrid`]
//!
//! Binary inputs are read as positive when `> 0.5`; scores are positive when
//! strictly greater than the threshold, compared in `f32` (see [`exceeds`]).

mod smooth;
mod threshold;

pub use smooth::smooth_fbeta;
pub use threshold::{greedy_threshold_search, ThresholdGrid, ThresholdSearch};

use ndarray::{Array, ArrayView, ArrayView1, ArrayView2, Dimension};

/// Errors from metric computation on malformed inputs.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MetricError {
    #[error("cannot score an empty prediction vector")]
    Empty,

    #[error("length mismatch: {truth} ground-truth values, {predicted} predictions")]
    LengthMismatch { truth: usize, predicted: usize },

    #[error("shape mismatch: ground truth {truth:?}, predictions {predicted:?}")]
    ShapeMismatch {
        truth: (usize, usize),
        predicted: (usize, usize),
    },

    #[error("beta must be positive and finite, got {0}")]
    InvalidBeta(f64),
}

// =============================================================================
// Decisions
// =============================================================================

/// Whether `score` is strictly above `threshold`, compared at the scores'
/// own `f32` precision so that a score stored as `0.2` is not above `0.2`.
#[inline]
pub fn exceeds(score: f32, threshold: f64) -> bool {
    score > threshold as f32
}

/// `1.0` where the score exceeds `threshold`, `0.0` elsewhere.
pub fn binarize<D: Dimension>(scores: ArrayView<f32, D>, threshold: f64) -> Array<f32, D> {
    scores.mapv(|s| if exceeds(s, threshold) { 1.0 } else { 0.0 })
}

// =============================================================================
// Confusion counts
// =============================================================================

/// True-positive, false-positive and false-negative counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfusionCounts {
    pub tp: usize,
    pub fp: usize,
    pub fn_: usize,
}

impl ConfusionCounts {
    /// Count decisions `score > threshold` against binary ground truth.
    pub fn at_threshold(
        y_true: ArrayView1<f32>,
        y_score: ArrayView1<f32>,
        threshold: f64,
    ) -> Result<Self, MetricError> {
        check_lengths(y_true, y_score)?;
        let mut counts = Self::default();
        for (&t, &s) in y_true.iter().zip(y_score.iter()) {
            let truth = t > 0.5;
            let predicted = exceeds(s, threshold);
            match (truth, predicted) {
                (true, true) => counts.tp += 1,
                (false, true) => counts.fp += 1,
                (true, false) => counts.fn_ += 1,
                (false, false) => {}
            }
        }
        Ok(counts)
    }

    /// F-beta from the counts; `0.0` when there is nothing to score.
    pub fn fbeta(&self, beta: f64) -> f64 {
        let b2 = beta * beta;
        let tp = self.tp as f64;
        let denom = (1.0 + b2) * tp + b2 * self.fn_ as f64 + self.fp as f64;
        if denom > 0.0 { (1.0 + b2) * tp / denom } else { 0.0 }
    }
}

fn check_lengths(y_true: ArrayView1<f32>, y_pred: ArrayView1<f32>) -> Result<(), MetricError> {
    if y_true.len() != y_pred.len() {
        return Err(MetricError::LengthMismatch {
            truth: y_true.len(),
            predicted: y_pred.len(),
        });
    }
    if y_true.is_empty() {
        return Err(MetricError::Empty);
    }
    Ok(())
}

pub(crate) fn check_beta(beta: f64) -> Result<(), MetricError> {
    if beta > 0.0 && beta.is_finite() {
        Ok(())
    } else {
        Err(MetricError::InvalidBeta(beta))
    }
}

// =============================================================================
// F-beta
// =============================================================================

/// F-beta of binary predictions against binary ground truth.
pub fn fbeta(y_true: ArrayView1<f32>, y_pred: ArrayView1<f32>, beta: f64) -> Result<f64, MetricError> {
    threshold_fbeta(y_true, y_pred, 0.5, beta)
}

/// F-beta of `y_score > threshold` against binary ground truth.
pub fn threshold_fbeta(
    y_true: ArrayView1<f32>,
    y_score: ArrayView1<f32>,
    threshold: f64,
    beta: f64,
) -> Result<f64, MetricError> {
    check_beta(beta)?;
    Ok(ConfusionCounts::at_threshold(y_true, y_score, threshold)?.fbeta(beta))
}

/// F-beta of every column of two samples × labels matrices.
pub fn fbeta_per_label(
    y_true: ArrayView2<f32>,
    y_pred: ArrayView2<f32>,
    beta: f64,
) -> Result<Vec<f64>, MetricError> {
    if y_true.dim() != y_pred.dim() {
        return Err(MetricError::ShapeMismatch {
            truth: y_true.dim(),
            predicted: y_pred.dim(),
        });
    }
    y_true
        .columns()
        .into_iter()
        .zip(y_pred.columns())
        .map(|(t, p)| fbeta(t, p, beta))
        .collect()
}

/// Unweighted mean of [`fbeta_per_label`].
pub fn fbeta_macro(y_true: ArrayView2<f32>, y_pred: ArrayView2<f32>, beta: f64) -> Result<f64, MetricError> {
    let per_label = fbeta_per_label(y_true, y_pred, beta)?;
    if per_label.is_empty() {
        return Err(MetricError::Empty);
    }
    Ok(per_label.iter().sum::<f64>() / per_label.len() as f64)
}
