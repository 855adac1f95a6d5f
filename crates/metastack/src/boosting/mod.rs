//! Second-stage gradient boosting.
//!
//! A compact binary GBDT: logistic objective, exact greedy depth-wise trees,
//! early stopping on a validation metric, and JSON persistence.
//!
//! - [`Booster`] - trained ensemble, prediction with an optional tree limit
//! - [`BoosterParams`] - per-run hyperparameters
//! - [`StoppingMetric`] - validation metrics (`1 - F-beta` variants)
//! - [`EarlyStopping`] - patience-based stopping state

mod booster;
mod callback;
mod gain;
mod metric;
mod objective;
mod tree;

pub use booster::{Booster, BoosterParams, TrainOutcome, TrainingSet};
pub use callback::EarlyStopping;
pub use gain::GainParams;
pub use metric::{EvalMetricKind, FixedThresholdLoss, GreedyLoss, MetricValue, StoppingMetric};
pub use objective::LogisticLoss;
pub use tree::{Node, Tree};
