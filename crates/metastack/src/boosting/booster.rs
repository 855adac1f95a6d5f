//! Boosted tree ensemble: training, prediction and persistence.

use std::path::Path;

use ndarray::{Array1, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

use super::callback::EarlyStopping;
use super::gain::GainParams;
use super::metric::{MetricValue, StoppingMetric};
use super::objective::LogisticLoss;
use super::tree::{Tree, TreeGrower};
use crate::error::{Error, Result};
use crate::logger::TrainingLogger;
use crate::utils::{read_json, write_json_atomic};

// =============================================================================
// Parameters
// =============================================================================

/// Hyperparameters of one boosting run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoosterParams {
    /// Learning rate.
    pub eta: f32,
    pub max_depth: u32,
    pub min_child_weight: f32,
    pub reg_lambda: f32,
    /// Minimum split gain.
    pub gamma: f32,
    pub num_rounds: u32,
    /// Patience for early stopping; `None` trains all rounds.
    pub early_stopping_rounds: Option<u32>,
}

impl Default for BoosterParams {
    fn default() -> Self {
        Self {
            eta: 0.3,
            max_depth: 6,
            min_child_weight: 1.0,
            reg_lambda: 1.0,
            gamma: 0.0,
            num_rounds: 200,
            early_stopping_rounds: Some(10),
        }
    }
}

impl BoosterParams {
    fn gain_params(&self) -> GainParams {
        GainParams {
            reg_lambda: self.reg_lambda,
            min_gain: self.gamma,
            min_child_weight: self.min_child_weight,
        }
    }
}

/// Feature matrix with one binary target per row.
#[derive(Debug, Clone, Copy)]
pub struct TrainingSet<'a> {
    pub features: ArrayView2<'a, f32>,
    pub targets: ArrayView1<'a, f32>,
}

impl<'a> TrainingSet<'a> {
    pub fn new(features: ArrayView2<'a, f32>, targets: ArrayView1<'a, f32>) -> Self {
        Self { features, targets }
    }

    fn validate(&self, n_features: Option<usize>) -> Result<()> {
        if self.features.nrows() != self.targets.len() {
            return Err(Error::TrainingInput(format!(
                "{} feature rows but {} targets",
                self.features.nrows(),
                self.targets.len()
            )));
        }
        if self.features.nrows() == 0 {
            return Err(Error::TrainingInput("no rows".into()));
        }
        if let Some(n) = n_features
            && n != self.features.ncols()
        {
            return Err(Error::TrainingInput(format!(
                "training has {n} features, evaluation has {}",
                self.features.ncols()
            )));
        }
        Ok(())
    }
}

/// A trained booster and where its validation metric peaked.
#[derive(Debug, Clone)]
pub struct TrainOutcome {
    pub booster: Booster,
    /// 0-based round with the best validation metric.
    pub best_iteration: usize,
    /// Number of trees to use for prediction (`best_iteration + 1`).
    pub best_ntree_limit: usize,
    /// Validation metric at `best_iteration`.
    pub best_score: f64,
}

// =============================================================================
// Booster
// =============================================================================

/// Gradient-boosted binary classifier: `sigmoid(base_score + Σ trees)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booster {
    base_score: f32,
    n_features: usize,
    trees: Vec<Tree>,
}

impl Booster {
    /// Train with logistic loss, evaluating `metric` on `valid` after every
    /// round and stopping early when configured.
    pub fn train(
        params: &BoosterParams,
        train: TrainingSet<'_>,
        valid: TrainingSet<'_>,
        metric: &dyn StoppingMetric,
        logger: &TrainingLogger,
    ) -> Result<TrainOutcome> {
        train.validate(None)?;
        valid.validate(Some(train.features.ncols()))?;
        if params.num_rounds == 0 {
            return Err(Error::TrainingInput("num_rounds must be at least 1".into()));
        }

        let objective = LogisticLoss;
        let targets: Vec<f32> = train.targets.to_vec();
        let base_score = objective.base_score(&targets);
        let gain = params.gain_params();
        let grower = TreeGrower {
            features: train.features.view(),
            params: &gain,
            max_depth: params.max_depth,
            learning_rate: params.eta,
        };

        let n_rows = train.features.nrows();
        let mut train_margin = vec![base_score; n_rows];
        let mut valid_margin = vec![base_score; valid.features.nrows()];
        let mut gradients = vec![0.0f32; n_rows];
        let mut hessians = vec![0.0f32; n_rows];

        let mut early_stop = EarlyStopping::new(
            params.early_stopping_rounds.map_or(usize::MAX, |p| p as usize),
            metric.higher_is_better(),
        );
        let metric_name = format!("valid-{}", metric.name());
        let mut trees = Vec::with_capacity(params.num_rounds as usize);

        logger.start_training(params.num_rounds as usize);
        for round in 0..params.num_rounds as usize {
            objective.compute_gradients(&train_margin, &targets, &mut gradients, &mut hessians);
            let tree = grower.grow(&gradients, &hessians);

            for (i, row) in train.features.rows().into_iter().enumerate() {
                train_margin[i] += tree.predict_row(row);
            }
            for (i, row) in valid.features.rows().into_iter().enumerate() {
                valid_margin[i] += tree.predict_row(row);
            }
            trees.push(tree);

            let prob: Array1<f32> = valid_margin.iter().map(|&m| LogisticLoss::sigmoid(m)).collect();
            let value = metric.evaluate(valid.targets, prob.view())?;
            logger.log_metrics(
                round,
                &[MetricValue::new(metric_name.as_str(), value, metric.higher_is_better())],
            );

            if early_stop.should_stop(value) {
                logger.log_early_stopping(round, early_stop.best_round(), &metric_name);
                break;
            }
        }
        logger.finish_training(trees.len());

        let best_iteration = early_stop.best_round();
        Ok(TrainOutcome {
            best_iteration,
            best_ntree_limit: best_iteration + 1,
            best_score: early_stop.best_value().unwrap_or(f64::NAN),
            booster: Booster {
                base_score,
                n_features: train.features.ncols(),
                trees,
            },
        })
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn trees(&self) -> &[Tree] {
        &self.trees
    }

    /// Positive-class probabilities using the first `ntree_limit` trees
    /// (all trees when `None` or larger than the ensemble).
    pub fn predict(&self, features: ArrayView2<f32>, ntree_limit: Option<usize>) -> Result<Array1<f32>> {
        if features.ncols() != self.n_features {
            return Err(Error::TrainingInput(format!(
                "booster expects {} features, got {}",
                self.n_features,
                features.ncols()
            )));
        }
        let limit = ntree_limit.unwrap_or(self.trees.len()).min(self.trees.len());
        let trees = &self.trees[..limit];
        Ok(features
            .rows()
            .into_iter()
            .map(|row| {
                let margin = trees
                    .iter()
                    .fold(self.base_score, |acc, tree| acc + tree.predict_row(row));
                LogisticLoss::sigmoid(margin)
            })
            .collect())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, self)
    }

    /// Load a booster and reject structurally invalid trees.
    pub fn load(path: &Path) -> Result<Self> {
        let booster: Self = read_json(path)?;
        if !booster.trees.iter().all(|t| t.is_well_formed(booster.n_features)) {
            return Err(Error::TrainingInput(format!(
                "{} contains a malformed tree",
                path.display()
            )));
        }
        Ok(booster)
    }
}
