//! Second-stage stacking: grid search, evaluation records and merging.
//!
//! For every (fold, label) a [`StackingTrainer`] trains one gradient-boosted
//! booster per [`ParamGrid`] point on the other four folds' stacked features,
//! keeps the point with the best greedy F-beta on the held-out fold, and
//! records it in `evaluate.json` as an [`EvaluationRecord`].

mod grid;
mod merge;
mod record;
mod trainer;

pub use grid::{GridPoint, ParamGrid};
pub use merge::merge_best;
pub use record::{EvaluationMap, EvaluationRecord, EvaluationStore, ValidationScores};
pub use trainer::{PairState, StackingTrainer};
