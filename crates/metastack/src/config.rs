//! Ensemble configuration with builder pattern.
//!
//! [`EnsembleConfig`] gathers every knob of a stacking run: selection breadth,
//! the second-stage hyperparameter grid, metric and threshold candidates, and
//! file locations. It is built with `bon` and validated on `build()`, or
//! loaded from JSON and validated after parsing.
//!
//! # Example
//!
//! ```
//! use metastack::EnsembleConfig;
//! use metastack::stacking::ParamGrid;
//!
//! let config = EnsembleConfig::builder()
//!     .name("inception_stack")
//!     .record_dir("record/inception_stack")
//!     .top_n(5)
//!     .corr_threshold(0.92)
//!     .grid(ParamGrid::new(vec![0.05, 0.1], vec![3, 6], vec![1.0]))
//!     .build()
//!     .unwrap();
//! assert_eq!(config.search, 20);
//! ```

use std::path::{Path, PathBuf};

use bon::Builder;
use serde::{Deserialize, Serialize};

use crate::boosting::EvalMetricKind;
use crate::error::{ConfigError, Result};
use crate::logger::Verbosity;
use crate::metrics::ThresholdGrid;
use crate::stacking::ParamGrid;
use crate::types::{Fold, Label};
use crate::utils::read_json;

// =============================================================================
// MissingArtifactPolicy
// =============================================================================

/// What the dataset builder does when a selected model has no prediction file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingArtifactPolicy {
    /// Abort with [`Error::MissingArtifact`](crate::Error::MissingArtifact).
    #[default]
    Fail,
    /// Log a warning and substitute a column of zeros.
    ZeroFill,
}

// =============================================================================
// EnsembleConfig
// =============================================================================

/// Configuration of one stacking ensemble.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(
    derive(Clone, Debug),
    finish_fn(vis = "", name = __build_internal)
)]
#[serde(default)]
pub struct EnsembleConfig {
    // === Identity & storage ===
    /// Ensemble name, used as the key in statistics books. Default: `"ensemble"`.
    #[builder(default = "ensemble".to_string(), into)]
    pub name: String,

    /// Directory holding the selection, evaluation records and boosters.
    #[builder(default = PathBuf::from("record"), into)]
    pub record_dir: PathBuf,

    /// Directory of the cross-ensemble statistics books. Default: `record_dir`.
    #[builder(into)]
    pub shared_stats_dir: Option<PathBuf>,

    // === Selection ===
    /// Correlation above which a lower-ranked model is pruned. Default: 0.9.
    #[builder(default = 0.9)]
    pub corr_threshold: f64,

    /// Number of top-ranked candidates examined for correlation. Default: 20.
    #[builder(default = 20)]
    pub search: usize,

    /// Models kept per (fold, label). Default: 5.
    #[builder(default = 5)]
    pub top_n: usize,

    // === Metric ===
    /// F-beta weight of recall. Default: 2.
    #[builder(default = 2.0)]
    pub beta: f64,

    /// Number of uniform thresholds for greedy F-beta. Default: 100.
    #[builder(default = 100)]
    pub greedy_steps: usize,

    /// Candidates for the sparse greedy stopping metric.
    #[builder(default)]
    pub sparse_thresholds: ThresholdGrid,

    // === Second stage ===
    /// Hyperparameter grid searched per (fold, label).
    #[builder(default)]
    pub grid: ParamGrid,

    /// Maximum boosting rounds. Default: 200.
    #[builder(default = 200)]
    pub num_rounds: u32,

    /// Rounds without validation improvement before stopping. Default: 10.
    #[builder(default = 10)]
    pub early_stopping_rounds: u32,

    /// L2 regularization on leaf weights. Default: 1.
    #[builder(default = 1.0)]
    pub reg_lambda: f32,

    /// Minimum split gain. Default: 0.
    #[builder(default = 0.0)]
    pub gamma: f32,

    /// Validation metric driving early stopping.
    #[builder(default)]
    pub eval_metric: EvalMetricKind,

    /// Maximum relative drift of the reloaded booster's score. Default: 0.001.
    #[builder(default = 1e-3)]
    pub self_check_tolerance: f64,

    // === Data ===
    /// Handling of absent prediction artifacts.
    #[builder(default)]
    pub missing_artifacts: MissingArtifactPolicy,

    // === Resources & logging ===
    /// Worker threads for independent (fold, label) units; 0 = all cores. Default: 1.
    #[builder(default = 1)]
    pub n_threads: usize,

    /// Verbosity of training output. Default: `Info`.
    #[builder(default)]
    pub verbosity: Verbosity,
}

impl<S: ensemble_config_builder::IsComplete> EnsembleConfigBuilder<S> {
    /// Build and validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `top_n == 0`, `search < top_n`, `beta <= 0`,
    /// `num_rounds == 0`, a hyperparameter list is empty or non-positive, or the
    /// tolerance is not positive.
    pub fn build(self) -> std::result::Result<EnsembleConfig, ConfigError> {
        let config = self.__build_internal();
        config.validate()?;
        Ok(config)
    }
}

impl EnsembleConfig {
    /// Load a JSON configuration; absent fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let config: Self = read_json(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    /// Validate field ranges and cross-field constraints.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.top_n == 0 {
            return Err(ConfigError::InvalidTopN);
        }
        if self.search < self.top_n {
            return Err(ConfigError::SearchTooNarrow {
                search: self.search,
                top_n: self.top_n,
            });
        }
        if !(self.beta > 0.0 && self.beta.is_finite()) {
            return Err(ConfigError::InvalidBeta(self.beta));
        }
        if self.num_rounds == 0 {
            return Err(ConfigError::InvalidNumRounds);
        }
        if self.greedy_steps == 0 {
            return Err(ConfigError::NonPositive {
                field: "greedy_steps",
                value: 0.0,
            });
        }
        if !(self.self_check_tolerance > 0.0) {
            return Err(ConfigError::NonPositive {
                field: "self_check_tolerance",
                value: self.self_check_tolerance,
            });
        }
        self.grid.validate()
    }

    /// File layout derived from `record_dir`.
    pub fn paths(&self) -> RecordPaths {
        RecordPaths::new(&self.record_dir, self.shared_stats_dir.as_deref())
    }

    /// Uniform grid used for greedy F-beta.
    pub fn greedy_grid(&self) -> ThresholdGrid {
        ThresholdGrid::uniform(self.greedy_steps)
    }
}

impl Default for EnsembleConfig {
    /// Builder defaults; they pass [`EnsembleConfig::validate`].
    fn default() -> Self {
        Self::builder().__build_internal()
    }
}

// =============================================================================
// RecordPaths
// =============================================================================

/// Locations of every persisted artifact of an ensemble.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordPaths {
    root: PathBuf,
    shared: PathBuf,
}

impl RecordPaths {
    pub fn new(root: impl Into<PathBuf>, shared: Option<&Path>) -> Self {
        let root = root.into();
        let shared = shared.map(Path::to_path_buf).unwrap_or_else(|| root.clone());
        Self { root, shared }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn meta_model_json(&self) -> PathBuf {
        self.root.join("meta_model.json")
    }

    pub fn meta_model_txt(&self) -> PathBuf {
        self.root.join("meta_model.txt")
    }

    pub fn rank_txt(&self) -> PathBuf {
        self.root.join("meta_model_rank.txt")
    }

    pub fn statistics_dir(&self) -> PathBuf {
        self.root.join("statistics")
    }

    pub fn inventory_txt(&self) -> PathBuf {
        self.statistics_dir().join("meta_model_statis.txt")
    }

    pub fn evaluate_json(&self) -> PathBuf {
        self.root.join("evaluate.json")
    }

    pub fn booster_dir(&self) -> PathBuf {
        self.root.join("booster")
    }

    /// `booster/ensemble_val<fold>_label<label>.xgb`
    pub fn booster_path(&self, fold: Fold, label: Label) -> PathBuf {
        self.booster_dir().join(booster_name(fold, label))
    }

    pub fn score_report_txt(&self) -> PathBuf {
        self.root.join("predict_real_f2_score.txt")
    }

    pub fn ensemble_cv_json(&self) -> PathBuf {
        self.shared.join("ensemble_cv.json")
    }

    pub fn ensemble_test_json(&self) -> PathBuf {
        self.shared.join("ensemble_test.json")
    }
}

/// Name of the second-stage booster for one (fold, label).
pub fn booster_name(fold: Fold, label: Label) -> String {
    format!("ensemble_val{}_label{}.xgb", fold.number(), label.index())
}

// =============================================================================
// Tests
// =============================================================================
