//! Error types shared across the crate.
//!
//! Configuration and invariant violations are fatal and never retried;
//! every variant carries the fold, label, model or path it concerns.

use std::io;
use std::path::PathBuf;

use crate::metrics::MetricError;
use crate::types::{Fold, Label, ModelId};

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while validating an [`EnsembleConfig`](crate::EnsembleConfig).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("top_n must be at least 1")]
    InvalidTopN,

    #[error("search breadth {search} is smaller than top_n {top_n}")]
    SearchTooNarrow { search: usize, top_n: usize },

    #[error("beta must be positive, got {0}")]
    InvalidBeta(f64),

    #[error("num_rounds must be at least 1")]
    InvalidNumRounds,

    #[error("hyperparameter list `{0}` is empty")]
    MissingHyperparameter(&'static str),

    #[error("{field} must be positive, got {value}")]
    NonPositive { field: &'static str, value: f64 },

    #[error("threshold grid must be non-empty, ascending and within [0, 1]")]
    InvalidThresholdGrid,

    #[error("fold index {0} out of range 1..=5")]
    FoldOutOfRange(usize),

    #[error("label index {0} out of range 0..13")]
    LabelOutOfRange(usize),
}

/// Crate-wide error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("metric error: {0}")]
    Metric(#[from] MetricError),

    #[error("fold {fold}, label {label}: only {found} of {top_n} models survived correlation pruning")]
    InsufficientSurvivors {
        fold: Fold,
        label: Label,
        found: usize,
        top_n: usize,
    },

    #[error("fold {fold}, label {label}: candidate {position} is ranked above a lower score")]
    UnrankedCandidates {
        fold: Fold,
        label: Label,
        position: usize,
    },

    #[error("fold {fold}, label {label}: correlation matrix is {got}x{got}, need at least {expected}")]
    CorrelationShape {
        fold: Fold,
        label: Label,
        expected: usize,
        got: usize,
    },

    #[error("fold {fold}, label {label}: no candidate statistics")]
    MissingCandidates { fold: Fold, label: Label },

    #[error("malformed selection: {0}")]
    SelectionShape(String),

    #[error("fold {fold}, label {label}: reloaded selection differs from the persisted one")]
    RegistryMismatch { fold: Fold, label: Label },

    #[error("fold {fold}: stacked dataset has {found} columns, expected {expected}")]
    ColumnCountMismatch {
        fold: Fold,
        expected: usize,
        found: usize,
    },

    #[error("fold {fold}: stacked dataset has {found} rows, expected {expected}")]
    RowCountMismatch {
        fold: Fold,
        expected: usize,
        found: usize,
    },

    #[error("fold {fold}, label {label}: prediction artifact for `{model}` is missing")]
    MissingArtifact {
        fold: Fold,
        label: Label,
        model: ModelId,
    },

    #[error("{source_name} ground truth has {columns} label columns, expected 13")]
    LabelMatrixShape { source_name: String, columns: usize },

    #[error("prediction artifact for `{model}` has {columns} columns, cannot read label {label}")]
    ArtifactShape {
        model: ModelId,
        label: Label,
        columns: usize,
    },

    #[error("model `{0}` is not registered in the catalog")]
    UnknownModel(ModelId),

    #[error("model `{0}` is registered twice")]
    DuplicateModel(ModelId),

    #[error("catalog entry `{model}` is invalid: {reason}")]
    InvalidCatalogEntry { model: ModelId, reason: String },

    #[error("no evaluation record for `{0}`")]
    MissingEvaluation(String),

    #[error("`{name}`: reloaded booster scores {reloaded:.6}, trained booster scored {trained:.6}")]
    SerializationMismatch {
        name: String,
        trained: f64,
        reloaded: f64,
    },

    #[error("fold {fold}, label {label} is already being grid-searched")]
    PairBusy { fold: Fold, label: Label },

    #[error("fold {fold}, label {label}: grid search cancelled")]
    Cancelled { fold: Fold, label: Label },

    #[error("boosting input mismatch: {0}")]
    TrainingInput(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("JSON error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.into(),
            source,
        }
    }
}
