//! Per-(fold, label) grid search of second-stage boosters.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, Mutex, MutexGuard};

use crate::boosting::{Booster, BoosterParams, StoppingMetric, TrainOutcome, TrainingSet};
use crate::config::{booster_name, EnsembleConfig, RecordPaths};
use crate::dataset::{DatasetBuilder, TrainValSplit};
use crate::error::{ConfigError, Error, Result};
use crate::logger::TrainingLogger;
use crate::metrics::ThresholdGrid;
use crate::types::{Fold, Label};
use crate::utils::{canonical_key, CancellationToken, Parallelism};

use super::grid::GridPoint;
use super::record::{EvaluationRecord, EvaluationStore, ValidationScores};

/// Training state of one (fold, label).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairState {
    Untrained,
    /// A grid search for the pair is running in this process.
    GridSearching,
    /// An evaluation record exists.
    Trained,
}

type PairKey = (PathBuf, Fold, Label);

/// Pairs being grid-searched anywhere in this process, per record directory.
static IN_FLIGHT: LazyLock<Mutex<HashSet<PairKey>>> = LazyLock::new(|| Mutex::new(HashSet::new()));

fn in_flight() -> MutexGuard<'static, HashSet<PairKey>> {
    IN_FLIGHT.lock().unwrap_or_else(|p| p.into_inner())
}

/// Removes a pair from the in-flight set when dropped.
struct InFlightGuard {
    key: PairKey,
}

impl InFlightGuard {
    fn acquire(root: &Path, fold: Fold, label: Label) -> Result<Self> {
        let key = (canonical_key(root), fold, label);
        if !in_flight().insert(key.clone()) {
            return Err(Error::PairBusy { fold, label });
        }
        Ok(Self { key })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        in_flight().remove(&self.key);
    }
}

/// Trains, persists and self-checks one booster per (fold, label).
///
/// The booster of a pair is trained on the other four folds and early-stopped
/// on its own fold. Each grid point is scored by greedy F-beta on that fold;
/// the best point's booster is saved, reloaded and re-scored before its
/// evaluation record is written.
pub struct StackingTrainer<'a> {
    config: &'a EnsembleConfig,
    paths: RecordPaths,
    builder: DatasetBuilder<'a>,
    records: EvaluationStore,
    cancel: CancellationToken,
    logger: TrainingLogger,
}

impl<'a> StackingTrainer<'a> {
    pub fn new(config: &'a EnsembleConfig, builder: DatasetBuilder<'a>) -> Self {
        let paths = config.paths();
        Self {
            records: EvaluationStore::new(paths.evaluate_json()),
            paths,
            config,
            builder,
            cancel: CancellationToken::new(),
            logger: TrainingLogger::new(config.verbosity),
        }
    }

    /// Share a cancellation token with a controller.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn records(&self) -> &EvaluationStore {
        &self.records
    }

    pub fn model_name(&self, fold: Fold, label: Label) -> String {
        booster_name(fold, label)
    }

    pub fn state(&self, fold: Fold, label: Label) -> Result<PairState> {
        let busy = in_flight().contains(&(canonical_key(self.paths.root()), fold, label));
        if busy {
            return Ok(PairState::GridSearching);
        }
        if self.records.contains(&self.model_name(fold, label))? {
            Ok(PairState::Trained)
        } else {
            Ok(PairState::Untrained)
        }
    }

    /// The pair's record, training it first if no record exists.
    pub fn train_single(&self, fold: Fold, label: Label) -> Result<EvaluationRecord> {
        if let Some(record) = self.records.get(&self.model_name(fold, label))? {
            tracing::debug!(fold = fold.number(), label = label.index(), "already trained");
            return Ok(record);
        }
        self.grid_search(fold, label)
    }

    /// Run the grid search again, replacing any existing booster and record.
    pub fn retrain(&self, fold: Fold, label: Label) -> Result<EvaluationRecord> {
        self.grid_search(fold, label)
    }

    /// Train every pair that has no record yet; returns all 65 records.
    pub fn train_all(&self, parallelism: Parallelism) -> Result<BTreeMap<(Fold, Label), EvaluationRecord>> {
        let pairs: Vec<(Fold, Label)> = Fold::all()
            .flat_map(|fold| Label::all().map(move |label| (fold, label)))
            .collect();
        parallelism
            .maybe_par_map(pairs, |(fold, label)| {
                self.train_single(fold, label).map(|r| ((fold, label), r))
            })
            .into_iter()
            .collect()
    }

    fn grid_search(&self, fold: Fold, label: Label) -> Result<EvaluationRecord> {
        let _guard = InFlightGuard::acquire(self.paths.root(), fold, label)?;
        let name = self.model_name(fold, label);
        let logger = self.logger.clone().with_context(name.as_str());
        let config = self.config;

        let split = self.builder.build_train_val(fold, label, None)?;
        let TrainValSplit { train, valid } = &split;
        let train_set = TrainingSet::new(train.features.view(), train.targets.view());
        let valid_set = TrainingSet::new(valid.features.view(), valid.targets.view());

        let metric: Box<dyn StoppingMetric> =
            config
                .eval_metric
                .build(config.beta, config.greedy_steps, &config.sparse_thresholds);
        let greedy_grid = config.greedy_grid();
        let base = BoosterParams {
            reg_lambda: config.reg_lambda,
            gamma: config.gamma,
            num_rounds: config.num_rounds,
            early_stopping_rounds: Some(config.early_stopping_rounds),
            ..Default::default()
        };

        logger.info(&format!(
            "grid search over {} points, {} train rows, {} validation rows",
            config.grid.len(),
            train.n_rows(),
            valid.n_rows()
        ));

        let mut best: Option<(GridPoint, TrainOutcome, ValidationScores)> = None;
        for point in config.grid.points() {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled { fold, label });
            }
            let outcome = Booster::train(&point.apply(&base), train_set, valid_set, metric.as_ref(), &logger)?;
            let prob = outcome
                .booster
                .predict(valid_set.features, Some(outcome.best_ntree_limit))?;
            let scores = ValidationScores::compute(valid_set.targets, prob.view(), config.beta, &greedy_grid)?;
            logger.info(&format!(
                "eta:{} max_depth:{} min_child_weight:{} f2:{:.6} best_iteration:{} best_score:{:.6} best_ntree_limit:{}",
                point.eta,
                point.max_depth,
                point.min_child_weight,
                scores.greedy_f2,
                outcome.best_iteration,
                outcome.best_score,
                outcome.best_ntree_limit
            ));
            if best
                .as_ref()
                .is_none_or(|(_, _, b)| scores.greedy_f2 > b.greedy_f2)
            {
                best = Some((point, outcome, scores));
            }
        }
        // validated grids are never empty
        let (point, outcome, scores) = best.ok_or(ConfigError::MissingHyperparameter("eta"))?;
        self.persist_best(fold, label, point, &outcome, scores, valid_set, &greedy_grid)
    }

    /// Save the winning booster, verify the saved copy and only then write
    /// its evaluation record. A failed check leaves the booster on disk and
    /// the pair untrained.
    #[allow(clippy::too_many_arguments)]
    fn persist_best(
        &self,
        fold: Fold,
        label: Label,
        point: GridPoint,
        outcome: &TrainOutcome,
        scores: ValidationScores,
        valid_set: TrainingSet<'_>,
        greedy_grid: &ThresholdGrid,
    ) -> Result<EvaluationRecord> {
        let name = self.model_name(fold, label);
        let path = self.paths.booster_path(fold, label);
        outcome.booster.save(&path)?;

        let reloaded = Booster::load(&path)?;
        let prob = reloaded.predict(valid_set.features, Some(outcome.best_ntree_limit))?;
        let check = ValidationScores::compute(valid_set.targets, prob.view(), self.config.beta, greedy_grid)?;
        check_reloaded(&name, &scores, &check, self.config.self_check_tolerance)?;

        let record = EvaluationRecord::new(point, outcome, scores);
        self.records.put(&name, record.clone())?;
        tracing::info!(
            fold = fold.number(),
            label = label.index(),
            greedy_f2 = record.greedy_f2(),
            eta = record.eta,
            max_depth = record.max_depth,
            min_child_weight = record.min_child_weight,
            best_ntree_limit = record.best_ntree_limit,
            "saved best booster"
        );
        Ok(record)
    }
}

/// Compare the greedy F-beta of a reloaded booster with the one it was
/// selected on, within `tolerance` relative error.
fn check_reloaded(name: &str, trained: &ValidationScores, reloaded: &ValidationScores, tolerance: f64) -> Result<()> {
    if approx::relative_eq!(reloaded.greedy_f2, trained.greedy_f2, max_relative = tolerance) {
        Ok(())
    } else {
        Err(Error::SerializationMismatch {
            name: name.to_string(),
            trained: trained.greedy_f2,
            reloaded: reloaded.greedy_f2,
        })
    }
}
