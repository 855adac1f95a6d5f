//! metastack: correlation-aware meta-model selection and stacking.
//!
//! Combines the saved predictions of many multi-label base classifiers
//! (one per cross-validation fold) into a single decision per label.
//!
//! # Pipeline
//!
//! 1. [`selection::CorrelationPruner`] picks `top_n` diverse, high-scoring
//!    base models per (fold, label).
//! 2. [`selection::MetaModelRegistry`] persists that choice and reloads it
//!    on every later run instead of selecting again.
//! 3. [`dataset::DatasetBuilder`] stacks the selected models' prediction
//!    columns into feature matrices.
//! 4. [`stacking::StackingTrainer`] grid-searches a gradient-boosted
//!    second stage for every (fold, label).
//! 5. [`vote::VoteAggregator`] thresholds and majority-votes the
//!    second-stage outputs across folds and inputs.
//!
//! [`Ensemble`] wires these together the way a competition run uses them.
//!
//! # Key Types
//!
//! - [`Fold`], [`Label`], [`ModelId`], [`BaseModelDescriptor`] - domain identifiers
//! - [`EnsembleConfig`] - validated configuration builder
//! - [`metrics::ThresholdGrid`] - candidate thresholds for F-beta search
//! - [`boosting::Booster`] - the second-stage tree ensemble

// Re-export approx traits for callers comparing scores
pub use approx;

pub mod artifacts;
pub mod boosting;
pub mod catalog;
pub mod config;
pub mod dataset;
pub mod error;
pub mod logger;
pub mod metrics;
pub mod pipeline;
pub mod selection;
pub mod stacking;
pub mod stats;
pub mod submission;
pub mod testing;
pub mod types;
pub mod utils;
pub mod vote;

// =============================================================================
// Convenience Re-exports
// =============================================================================

pub use config::{EnsembleConfig, MissingArtifactPolicy, RecordPaths};
pub use error::{ConfigError, Error, Result};
pub use logger::{TrainingLogger, Verbosity};
pub use pipeline::Ensemble;
pub use types::{BaseModelDescriptor, Fold, Label, ModelId, N_FOLDS, N_LABELS};
pub use utils::Parallelism;
