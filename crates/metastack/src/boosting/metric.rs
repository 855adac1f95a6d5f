//! Validation metrics driving early stopping of the second stage.
//!
//! All stopping metrics are losses of the form `1 - F-beta`, so lower is
//! better and a perfect classifier scores `0`.

use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};

use crate::metrics::{greedy_threshold_search, threshold_fbeta, MetricError, ThresholdGrid};

// =============================================================================
// MetricValue
// =============================================================================

/// A computed metric value with metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricValue {
    /// Name of the metric (e.g., "valid-f2_loss@0.2").
    pub name: String,
    pub value: f64,
    pub higher_is_better: bool,
}

impl MetricValue {
    pub fn new(name: impl Into<String>, value: f64, higher_is_better: bool) -> Self {
        Self {
            name: name.into(),
            value,
            higher_is_better,
        }
    }

    /// Returns true if this value is better than another.
    pub fn is_better_than(&self, other: &Self) -> bool {
        if self.higher_is_better {
            self.value > other.value
        } else {
            self.value < other.value
        }
    }
}

impl std::fmt::Display for MetricValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {:.6}", self.name, self.value)
    }
}

// =============================================================================
// Metric trait
// =============================================================================

/// A metric evaluated on validation probabilities after every boosting round.
pub trait StoppingMetric: Send + Sync {
    fn evaluate(&self, y_true: ArrayView1<f32>, y_prob: ArrayView1<f32>) -> Result<f64, MetricError>;

    /// Name of the metric (for logging).
    fn name(&self) -> String;

    fn higher_is_better(&self) -> bool {
        false
    }
}

/// `1 - F-beta` with predictions cut at a fixed threshold.
#[derive(Debug, Clone, Copy)]
pub struct FixedThresholdLoss {
    pub threshold: f64,
    pub beta: f64,
}

impl StoppingMetric for FixedThresholdLoss {
    fn evaluate(&self, y_true: ArrayView1<f32>, y_prob: ArrayView1<f32>) -> Result<f64, MetricError> {
        Ok(1.0 - threshold_fbeta(y_true, y_prob, self.threshold, self.beta)?)
    }

    fn name(&self) -> String {
        format!("f{}_loss@{}", self.beta, self.threshold)
    }
}

/// `1 - F-beta` at the best threshold of a grid.
#[derive(Debug, Clone)]
pub struct GreedyLoss {
    pub grid: ThresholdGrid,
    pub beta: f64,
    name: &'static str,
}

impl GreedyLoss {
    /// Search every uniform threshold `k / steps`.
    pub fn uniform(steps: usize, beta: f64) -> Self {
        Self {
            grid: ThresholdGrid::uniform(steps),
            beta,
            name: "greedy",
        }
    }

    /// Search an explicit sparse candidate list.
    pub fn sparse(grid: ThresholdGrid, beta: f64) -> Self {
        Self {
            grid,
            beta,
            name: "sparse_greedy",
        }
    }
}

impl StoppingMetric for GreedyLoss {
    fn evaluate(&self, y_true: ArrayView1<f32>, y_prob: ArrayView1<f32>) -> Result<f64, MetricError> {
        let found = greedy_threshold_search(y_true, y_prob, self.beta, &self.grid)?;
        Ok(1.0 - found.score)
    }

    fn name(&self) -> String {
        format!("f{}_loss@{}", self.beta, self.name)
    }
}

// =============================================================================
// EvalMetricKind
// =============================================================================

/// Serializable choice of stopping metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvalMetricKind {
    /// Fixed cutoff (default: 0.2).
    FixedThreshold { threshold: f64 },
    /// Best of the uniform greedy grid.
    Greedy,
    /// Best of the sparse grid.
    SparseGreedy,
}

impl Default for EvalMetricKind {
    fn default() -> Self {
        EvalMetricKind::FixedThreshold { threshold: 0.2 }
    }
}

impl EvalMetricKind {
    /// Instantiate the metric with the ensemble's beta and threshold grids.
    pub fn build(
        &self,
        beta: f64,
        greedy_steps: usize,
        sparse: &ThresholdGrid,
    ) -> Box<dyn StoppingMetric> {
        match self {
            EvalMetricKind::FixedThreshold { threshold } => Box::new(FixedThresholdLoss {
                threshold: *threshold,
                beta,
            }),
            EvalMetricKind::Greedy => Box::new(GreedyLoss::uniform(greedy_steps, beta)),
            EvalMetricKind::SparseGreedy => Box::new(GreedyLoss::sparse(sparse.clone(), beta)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn fixed_loss_is_complement_of_fbeta() {
        let y = array![1.0f32, 0.0, 1.0, 1.0];
        let p = array![0.9f32, 0.4, 0.6, 0.1];
        let metric = FixedThresholdLoss { threshold: 0.5, beta: 2.0 };
        // tp=2, fn=1, fp=0 -> F2 = 10/14
        assert_abs_diff_eq!(
            metric.evaluate(y.view(), p.view()).unwrap(),
            1.0 - 10.0 / 14.0,
            epsilon = 1e-12
        );
        assert!(!metric.higher_is_better());
    }

    #[test]
    fn greedy_loss_never_worse_than_fixed() {
        let y = array![1.0f32, 0.0, 1.0, 1.0, 0.0];
        let p = array![0.9f32, 0.4, 0.6, 0.3, 0.05];
        let fixed = FixedThresholdLoss { threshold: 0.5, beta: 2.0 };
        let greedy = GreedyLoss::uniform(100, 2.0);
        assert!(greedy.evaluate(y.view(), p.view()).unwrap() <= fixed.evaluate(y.view(), p.view()).unwrap());
    }

    #[test]
    fn metric_value_direction() {
        let lower = MetricValue::new("loss", 0.1, false);
        let higher = MetricValue::new("loss", 0.2, false);
        assert!(lower.is_better_than(&higher));
        assert_eq!(lower.to_string(), "loss: 0.100000");
    }

    #[test]
    fn kind_serde_and_default() {
        assert_eq!(EvalMetricKind::default(), EvalMetricKind::FixedThreshold { threshold: 0.2 });
        let kind: EvalMetricKind = serde_json::from_str(r#"{"kind": "sparse_greedy"}"#).unwrap();
        assert_eq!(kind, EvalMetricKind::SparseGreedy);
        let metric = kind.build(2.0, 100, &ThresholdGrid::sparse());
        assert_eq!(metric.name(), "f2_loss@sparse_greedy");
    }
}
