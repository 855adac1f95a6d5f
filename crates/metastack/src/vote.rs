//! Threshold-and-vote aggregation of second-stage and first-stage outputs.
//!
//! Every (fold, label) booster casts `+1` when its probability exceeds the
//! record's `greedy_threshold` and `-1` otherwise; a label is predicted
//! positive when the votes sum to more than zero.

use ndarray::{Array1, Array2};

use crate::artifacts::PredictionSource;
use crate::boosting::Booster;
use crate::catalog::ModelCatalog;
use crate::config::{booster_name, RecordPaths};
use crate::dataset::FoldLabels;
use crate::error::{Error, Result};
use crate::metrics::{binarize, exceeds};
use crate::selection::MetaModelSelection;
use crate::stacking::{EvaluationRecord, EvaluationStore};
use crate::stats::ScoreSummary;
use crate::types::{Fold, Label, N_FOLDS, N_LABELS};

/// How several feature matrices for the same samples are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputAggregation {
    /// Average each booster's raw scores over the inputs, then vote once.
    AverageScores,
    /// Vote on every input separately and add all votes.
    VoteEach,
}

// =============================================================================
// ScoreGrid
// =============================================================================

/// Raw probabilities indexed `[label][fold]`, all of one length.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreGrid {
    scores: Vec<Vec<Array1<f32>>>,
    n_rows: usize,
}

impl ScoreGrid {
    pub fn new(scores: Vec<Vec<Array1<f32>>>) -> Result<Self> {
        if scores.len() != N_LABELS || scores.iter().any(|per_fold| per_fold.len() != N_FOLDS) {
            return Err(Error::TrainingInput(format!(
                "score grid must be {N_LABELS} labels x {N_FOLDS} folds"
            )));
        }
        let n_rows = scores[0][0].len();
        if let Some(bad) = scores.iter().flatten().find(|s| s.len() != n_rows) {
            return Err(Error::TrainingInput(format!(
                "score columns differ in length: {} and {n_rows}",
                bad.len()
            )));
        }
        Ok(Self { scores, n_rows })
    }

    pub fn get(&self, label: Label, fold: Fold) -> &Array1<f32> {
        &self.scores[label.index()][fold.index()]
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    fn mean(grids: &[ScoreGrid]) -> Result<ScoreGrid> {
        let Some(first) = grids.first() else {
            return Err(Error::TrainingInput("no inputs to average".into()));
        };
        let mut sum = first.scores.clone();
        for grid in &grids[1..] {
            for (acc, other) in sum.iter_mut().flatten().zip(grid.scores.iter().flatten()) {
                *acc += other;
            }
        }
        let n = grids.len() as f32;
        for column in sum.iter_mut().flatten() {
            *column /= n;
        }
        ScoreGrid::new(sum)
    }
}

// =============================================================================
// VoteAggregator
// =============================================================================

struct Voter {
    booster: Booster,
    record: EvaluationRecord,
}

/// The 65 trained boosters of one ensemble with their evaluation records.
pub struct VoteAggregator {
    voters: Vec<Vec<Voter>>,
}

impl VoteAggregator {
    /// Load every booster and record of a trained ensemble.
    pub fn load(paths: &RecordPaths) -> Result<Self> {
        let records = EvaluationStore::new(paths.evaluate_json()).load()?;
        let mut voters = Vec::with_capacity(N_LABELS);
        for label in Label::all() {
            let mut per_fold = Vec::with_capacity(N_FOLDS);
            for fold in Fold::all() {
                let name = booster_name(fold, label);
                let record = records.get(&name).cloned().ok_or(Error::MissingEvaluation(name))?;
                let booster = Booster::load(&paths.booster_path(fold, label))?;
                per_fold.push(Voter { booster, record });
            }
            voters.push(per_fold);
        }
        tracing::debug!(root = %paths.root().display(), "loaded boosters for voting");
        Ok(Self { voters })
    }

    fn voter(&self, label: Label, fold: Fold) -> &Voter {
        &self.voters[label.index()][fold.index()]
    }

    /// Each booster's probabilities on `features`, truncated at its
    /// `best_ntree_limit`.
    pub fn predict_all_labels(&self, features: &Array2<f32>) -> Result<ScoreGrid> {
        let mut scores = Vec::with_capacity(N_LABELS);
        for label in Label::all() {
            let mut per_fold = Vec::with_capacity(N_FOLDS);
            for fold in Fold::all() {
                let voter = self.voter(label, fold);
                per_fold.push(
                    voter
                        .booster
                        .predict(features.view(), Some(voter.record.best_ntree_limit))?,
                );
            }
            scores.push(per_fold);
        }
        ScoreGrid::new(scores)
    }

    /// Binary samples × labels decisions for several inputs of the same
    /// samples.
    pub fn predict_with_voting(&self, inputs: &[Array2<f32>], aggregation: InputAggregation) -> Result<Array2<f32>> {
        if inputs.is_empty() {
            return Err(Error::TrainingInput("no inputs to vote on".into()));
        }
        let grids = inputs
            .iter()
            .map(|x| self.predict_all_labels(x))
            .collect::<Result<Vec<_>>>()?;
        let n_rows = grids[0].n_rows();
        if let Some(bad) = grids.iter().find(|g| g.n_rows() != n_rows) {
            return Err(Error::TrainingInput(format!(
                "inputs have {} and {n_rows} rows",
                bad.n_rows()
            )));
        }

        let mut votes = Array2::<f32>::zeros((n_rows, N_LABELS));
        match aggregation {
            InputAggregation::AverageScores => {
                tracing::info!(inputs = inputs.len(), "averaging booster scores across inputs");
                self.add_votes(&ScoreGrid::mean(&grids)?, &mut votes);
            }
            InputAggregation::VoteEach => {
                for grid in &grids {
                    self.add_votes(grid, &mut votes);
                }
            }
        }
        Ok(binarize(votes.view(), 0.0))
    }

    /// Decisions for a single input.
    pub fn predict(&self, features: &Array2<f32>) -> Result<Array2<f32>> {
        self.predict_with_voting(std::slice::from_ref(features), InputAggregation::VoteEach)
    }

    fn add_votes(&self, grid: &ScoreGrid, votes: &mut Array2<f32>) {
        for label in Label::all() {
            let mut column = votes.column_mut(label.index());
            for fold in Fold::all() {
                let threshold = self.voter(label, fold).record.greedy_threshold();
                for (v, &p) in column.iter_mut().zip(grid.get(label, fold)) {
                    *v += if exceeds(p, threshold) { 1.0 } else { -1.0 };
                }
            }
        }
    }
}

// =============================================================================
// FirstStageVote
// =============================================================================

/// Majority vote of the selected base models themselves, each cut at its
/// own catalog threshold.
pub struct FirstStageVote<'a> {
    pub selection: &'a MetaModelSelection,
    pub catalog: &'a ModelCatalog,
    pub store: &'a dyn PredictionSource,
    pub labels: &'a dyn FoldLabels,
    pub beta: f64,
}

impl FirstStageVote<'_> {
    /// Per fold, a label is positive when more than half of its `top_n`
    /// models agree; scores are averaged over folds.
    pub fn cross_validation(&self) -> Result<ScoreSummary> {
        let top_n = self.selection.top_n() as f64;
        let mut per_label = [0.0; N_LABELS];
        for fold in Fold::all() {
            let truth = self.labels.fold_labels(fold)?;
            let mut votes = Array2::<f32>::zeros(truth.dim());
            self.add_votes(fold, false, &mut votes)?;
            let decisions = binarize(votes.view(), top_n / 2.0);
            let summary = ScoreSummary::from_predictions(truth.view(), decisions.view(), self.beta)?;
            for (acc, s) in per_label.iter_mut().zip(summary.per_label()) {
                *acc += s;
            }
        }
        for acc in &mut per_label {
            *acc /= N_FOLDS as f64;
        }
        Ok(ScoreSummary::from_per_label(per_label))
    }

    /// Test-set decisions from every fold's models, positive when more than
    /// half of all `5 * top_n` votes agree, with their scores.
    pub fn test(&self) -> Result<(Array2<f32>, ScoreSummary)> {
        let truth = self.labels.test_labels()?;
        let mut votes = Array2::<f32>::zeros(truth.dim());
        for fold in Fold::all() {
            self.add_votes(fold, true, &mut votes)?;
        }
        let limit = self.selection.top_n() as f64 * N_FOLDS as f64 / 2.0;
        let decisions = binarize(votes.view(), limit);
        let summary = ScoreSummary::from_predictions(truth.view(), decisions.view(), self.beta)?;
        Ok((decisions, summary))
    }

    fn add_votes(&self, fold: Fold, test: bool, votes: &mut Array2<f32>) -> Result<()> {
        for label in Label::all() {
            for model in self.selection.models(fold, label) {
                let spec = self.catalog.get(&model.id)?;
                let predictions = if test {
                    self.store.test(&model.id)?
                } else {
                    self.store.validation(&model.id)?
                };
                let predictions = predictions.ok_or_else(|| Error::MissingArtifact {
                    fold,
                    label,
                    model: model.id.clone(),
                })?;
                if predictions.ncols() <= label.index() {
                    return Err(Error::ArtifactShape {
                        model: model.id.clone(),
                        label,
                        columns: predictions.ncols(),
                    });
                }
                if predictions.nrows() != votes.nrows() {
                    return Err(Error::RowCountMismatch {
                        fold,
                        expected: votes.nrows(),
                        found: predictions.nrows(),
                    });
                }
                let threshold = spec.threshold(label);
                let mut column = votes.column_mut(label.index());
                for (v, &p) in column.iter_mut().zip(predictions.column(label.index())) {
                    if exceeds(p, threshold) {
                        *v += 1.0;
                    }
                }
            }
        }
        Ok(())
    }
}
