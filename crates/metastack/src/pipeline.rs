//! End-to-end ensemble workflow over one record directory.

use std::collections::BTreeMap;

use ndarray::Array2;

use crate::artifacts::{PredictionSource, Split};
use crate::catalog::ModelCatalog;
use crate::config::{EnsembleConfig, RecordPaths};
use crate::dataset::{DatasetBuilder, FoldLabels};
use crate::error::Result;
use crate::selection::{CandidateStatistics, CorrelationPruner, MetaModelRegistry, MetaModelSelection};
use crate::stacking::{merge_best, EvaluationMap, EvaluationRecord, EvaluationStore, StackingTrainer};
use crate::stats::{cv_summary, write_prediction_statistics, write_score_report, ScoreSummary, StatisticsBook};
use crate::submission::SubmissionWriter;
use crate::types::{Fold, Label, ModelId};
use crate::utils::{run_with_threads, CancellationToken};
use crate::vote::{FirstStageVote, InputAggregation, VoteAggregator};

/// Scored decisions of one test-time aggregation variant.
#[derive(Debug, Clone)]
pub struct TestResult {
    pub name: String,
    pub decisions: Array2<f32>,
    pub summary: ScoreSummary,
}

/// A stacking ensemble bound to its record directory and data sources.
///
/// Opening an ensemble selects (or reloads) its meta models; every later
/// step reads that same selection.
pub struct Ensemble<'a> {
    config: EnsembleConfig,
    paths: RecordPaths,
    selection: MetaModelSelection,
    store: &'a dyn PredictionSource,
    labels: &'a dyn FoldLabels,
    cancel: CancellationToken,
}

impl<'a> Ensemble<'a> {
    /// Validate `config`, then select or reload the meta models and write
    /// the model inventory.
    pub fn open(
        config: EnsembleConfig,
        statistics: &dyn CandidateStatistics,
        store: &'a dyn PredictionSource,
        labels: &'a dyn FoldLabels,
    ) -> Result<Self> {
        config.validate()?;
        let paths = config.paths();
        let registry = MetaModelRegistry::new(paths.clone());
        let pruner = CorrelationPruner::from_config(&config);
        let selection = registry.select_or_load(&pruner, statistics)?;
        registry.write_inventory(&selection)?;
        tracing::info!(
            name = %config.name,
            top_n = selection.top_n(),
            models = selection.unique_models().len(),
            "ensemble opened"
        );

        let ensemble = Self {
            config,
            paths,
            selection,
            store,
            labels,
            cancel: CancellationToken::new(),
        };
        let missing = ensemble.dataset_builder().missing_artifacts(Split::Validation);
        if !missing.is_empty() {
            tracing::warn!(count = missing.len(), policy = ?ensemble.config.missing_artifacts, "selected models without validation predictions");
        }
        Ok(ensemble)
    }

    pub fn config(&self) -> &EnsembleConfig {
        &self.config
    }

    pub fn paths(&self) -> &RecordPaths {
        &self.paths
    }

    pub fn selection(&self) -> &MetaModelSelection {
        &self.selection
    }

    /// Token that stops grid searches between grid points.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn dataset_builder(&self) -> DatasetBuilder<'_> {
        DatasetBuilder::new(&self.selection, self.store, self.labels, self.config.missing_artifacts)
    }

    pub fn trainer(&self) -> StackingTrainer<'_> {
        StackingTrainer::new(&self.config, self.dataset_builder()).with_cancellation(self.cancel.clone())
    }

    /// Write `meta_model_rank.txt` with the `top_k` most used models per fold.
    pub fn write_rank_report(&self, top_k: usize) -> Result<()> {
        MetaModelRegistry::new(self.paths.clone()).write_rank_report(&self.selection, top_k)
    }

    /// Selected models trained on segmented images.
    pub fn segmented_models<'c>(&self, catalog: &'c ModelCatalog) -> Vec<&'c ModelId> {
        let selected = self.selection.unique_models();
        catalog
            .segmented_models()
            .filter(|spec| selected.contains(&&spec.id))
            .map(|spec| &spec.id)
            .collect()
    }

    // =========================================================================
    // Training
    // =========================================================================

    /// Train every untrained (fold, label) on `n_threads` workers.
    pub fn train_all(&self) -> Result<BTreeMap<(Fold, Label), EvaluationRecord>> {
        let trainer = self.trainer();
        run_with_threads(self.config.n_threads, |parallelism| trainer.train_all(parallelism))
    }

    pub fn train_single(&self, fold: Fold, label: Label) -> Result<EvaluationRecord> {
        self.trainer().train_single(fold, label)
    }

    pub fn retrain(&self, fold: Fold, label: Label) -> Result<EvaluationRecord> {
        self.trainer().retrain(fold, label)
    }

    pub fn records(&self) -> Result<EvaluationMap> {
        EvaluationStore::new(self.paths.evaluate_json()).load()
    }

    /// Replace this ensemble's boosters with the best of `sources`.
    pub fn merge(&self, sources: &[RecordPaths]) -> Result<EvaluationMap> {
        merge_best(&self.paths, sources)
    }

    // =========================================================================
    // Reports
    // =========================================================================

    /// Record the cross-validation summary as `gbdt_<name>` in
    /// `ensemble_cv.json`.
    pub fn cv_report(&self) -> Result<ScoreSummary> {
        let summary = cv_summary(&self.records()?)?;
        StatisticsBook::open(self.paths.ensemble_cv_json()).record(&format!("gbdt_{}", self.config.name), summary)?;
        Ok(summary)
    }

    /// Predict the test set three ways, score each against the test labels,
    /// record the scores in `ensemble_test.json` and pass the decisions to
    /// `writer`:
    ///
    /// - `gbdt_<name>_avg[base]`: base predictions averaged over folds, voted
    /// - `gbdt_<name>_avg[inputs]`: one input per fold, booster scores averaged
    /// - `gbdt_<name>`: one input per fold, every input voted
    pub fn evaluate_test(&self, writer: &dyn SubmissionWriter) -> Result<Vec<TestResult>> {
        let aggregator = VoteAggregator::load(&self.paths)?;
        let y_true = self.labels.test_labels()?;
        let builder = self.dataset_builder();
        let name = &self.config.name;

        let averaged = builder.build_test(true)?;
        let per_fold = builder.build_test(false)?;
        let variants = [
            (format!("gbdt_{name}_avg[base]"), &averaged, InputAggregation::VoteEach),
            (format!("gbdt_{name}_avg[inputs]"), &per_fold, InputAggregation::AverageScores),
            (format!("gbdt_{name}"), &per_fold, InputAggregation::VoteEach),
        ];

        let book = StatisticsBook::open(self.paths.ensemble_test_json());
        let mut results = Vec::with_capacity(variants.len());
        for (variant, inputs, aggregation) in variants {
            let decisions = aggregator.predict_with_voting(inputs, aggregation)?;
            let summary = ScoreSummary::from_predictions(y_true.view(), decisions.view(), self.config.beta)?;
            for (i, score) in summary.per_label().iter().enumerate() {
                tracing::info!(variant = %variant, label = i, f2 = score, "test score");
            }
            tracing::info!(variant = %variant, avg = summary.avg(), "test average");
            book.record(&variant, summary)?;
            writer.write(&variant, &decisions)?;
            results.push(TestResult {
                name: variant,
                decisions,
                summary,
            });
        }

        let named: Vec<(String, Array2<f32>)> = results.iter().map(|r| (r.name.clone(), r.decisions.clone())).collect();
        write_prediction_statistics(
            &self.paths.statistics_dir().join(format!("gbdt_{name}_test.txt")),
            &named,
        )?;
        Ok(results)
    }

    /// Vote on arbitrary stacked features and write the per-label score
    /// report against `y_true`.
    pub fn score_features(&self, features: &Array2<f32>, y_true: &Array2<f32>) -> Result<(Array2<f32>, ScoreSummary)> {
        let decisions = VoteAggregator::load(&self.paths)?.predict(features)?;
        let summary = ScoreSummary::from_predictions(y_true.view(), decisions.view(), self.config.beta)?;
        write_score_report(&self.paths.score_report_txt(), &summary)?;
        Ok((decisions, summary))
    }

    /// Score the selected base models' own majority vote and record it as
    /// `base_<name>` in both statistics books.
    pub fn first_stage_report(&self, catalog: &ModelCatalog) -> Result<(ScoreSummary, ScoreSummary)> {
        let vote = FirstStageVote {
            selection: &self.selection,
            catalog,
            store: self.store,
            labels: self.labels,
            beta: self.config.beta,
        };
        let cv = vote.cross_validation()?;
        let (_, test) = vote.test()?;
        let key = format!("base_{}", self.config.name);
        StatisticsBook::open(self.paths.ensemble_cv_json()).record(&key, cv)?;
        StatisticsBook::open(self.paths.ensemble_test_json()).record(&key, test)?;
        Ok((cv, test))
    }
}
