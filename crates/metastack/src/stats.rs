//! Score summaries, statistics books and text reports.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use ndarray::{Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::config::booster_name;
use crate::error::{Error, Result};
use crate::metrics::{fbeta_per_label, MetricError};
use crate::selection::CorrelationMatrix;
use crate::stacking::EvaluationMap;
use crate::types::{Fold, Label, N_FOLDS, N_LABELS};
use crate::utils::{read_json_opt, update_json, write_atomic};

// =============================================================================
// ScoreSummary
// =============================================================================

/// Per-label F-beta scores and their unweighted average.
///
/// Serialized as `{"0": f, ..., "12": f, "avg": f}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, f64>", into = "BTreeMap<String, f64>")]
pub struct ScoreSummary {
    per_label: [f64; N_LABELS],
    avg: f64,
}

impl ScoreSummary {
    pub fn from_per_label(per_label: [f64; N_LABELS]) -> Self {
        let avg = per_label.iter().sum::<f64>() / N_LABELS as f64;
        Self { per_label, avg }
    }

    /// Score binary decisions against ground truth, label by label.
    pub fn from_predictions(
        y_true: ArrayView2<f32>,
        y_pred: ArrayView2<f32>,
        beta: f64,
    ) -> std::result::Result<Self, MetricError> {
        let scores = fbeta_per_label(y_true, y_pred, beta)?;
        let per_label: [f64; N_LABELS] = scores.try_into().map_err(|v: Vec<f64>| MetricError::ShapeMismatch {
            truth: (y_true.nrows(), N_LABELS),
            predicted: (y_pred.nrows(), v.len()),
        })?;
        Ok(Self::from_per_label(per_label))
    }

    pub fn label(&self, label: Label) -> f64 {
        self.per_label[label.index()]
    }

    pub fn per_label(&self) -> &[f64; N_LABELS] {
        &self.per_label
    }

    pub fn avg(&self) -> f64 {
        self.avg
    }
}

impl TryFrom<BTreeMap<String, f64>> for ScoreSummary {
    type Error = String;

    fn try_from(mut map: BTreeMap<String, f64>) -> std::result::Result<Self, Self::Error> {
        let mut per_label = [0.0; N_LABELS];
        for (i, slot) in per_label.iter_mut().enumerate() {
            *slot = map.remove(&i.to_string()).ok_or_else(|| format!("missing label {i}"))?;
        }
        let avg = map.remove("avg").ok_or("missing avg")?;
        Ok(Self { per_label, avg })
    }
}

impl From<ScoreSummary> for BTreeMap<String, f64> {
    fn from(summary: ScoreSummary) -> Self {
        let mut map: BTreeMap<String, f64> = summary
            .per_label
            .iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), *v))
            .collect();
        map.insert("avg".to_string(), summary.avg);
        map
    }
}

/// Cross-validation summary of a trained ensemble: per label, the mean
/// `greedy_f2` of its five boosters.
pub fn cv_summary(records: &EvaluationMap) -> Result<ScoreSummary> {
    let mut per_label = [0.0; N_LABELS];
    for label in Label::all() {
        let mut sum = 0.0;
        for fold in Fold::all() {
            let name = booster_name(fold, label);
            let record = records.get(&name).ok_or(Error::MissingEvaluation(name))?;
            sum += record.greedy_f2();
        }
        per_label[label.index()] = sum / N_FOLDS as f64;
    }
    Ok(ScoreSummary::from_per_label(per_label))
}

// =============================================================================
// StatisticsBook
// =============================================================================

/// A JSON document mapping result names to [`ScoreSummary`]s, shared by
/// every ensemble that reports into it.
#[derive(Debug, Clone)]
pub struct StatisticsBook {
    path: PathBuf,
}

impl StatisticsBook {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> Result<BTreeMap<String, ScoreSummary>> {
        Ok(read_json_opt(&self.path)?.unwrap_or_default())
    }

    pub fn get(&self, name: &str) -> Result<Option<ScoreSummary>> {
        Ok(self.entries()?.remove(name))
    }

    /// Add or replace one entry, keeping every other entry, including
    /// those written concurrently by other books on the same file.
    pub fn record(&self, name: &str, summary: ScoreSummary) -> Result<()> {
        update_json(&self.path, |entries: &mut BTreeMap<String, ScoreSummary>| {
            entries.insert(name.to_string(), summary);
        })?;
        tracing::info!(book = %self.path.display(), name, avg = summary.avg(), "recorded scores");
        Ok(())
    }
}

// =============================================================================
// Text reports
// =============================================================================

/// Per-label scores followed by their average.
pub fn write_score_report(path: &Path, summary: &ScoreSummary) -> Result<()> {
    let mut out = String::new();
    for (i, score) in summary.per_label().iter().enumerate() {
        let _ = writeln!(out, "Label{i} f2_score: {score}");
    }
    out.push_str(&"=".repeat(20));
    out.push('\n');
    let _ = writeln!(out, "Total f2_score: {}", summary.avg());
    write_atomic(path, out.as_bytes())
}

/// Positive counts of several named decision matrices, label by label,
/// with the correlation between their columns.
pub fn write_prediction_statistics(path: &Path, predictions: &[(String, Array2<f32>)]) -> Result<()> {
    let mut out = String::new();
    for label in Label::all() {
        let mut columns: Vec<ArrayView1<f32>> = Vec::with_capacity(predictions.len());
        for (name, matrix) in predictions {
            if matrix.ncols() <= label.index() {
                return Err(Error::LabelMatrixShape {
                    source_name: name.clone(),
                    columns: matrix.ncols(),
                });
            }
            let column = matrix.column(label.index());
            let positives = column.iter().filter(|&&v| v > 0.0).count();
            let _ = writeln!(out, "========={name}=========");
            let _ = writeln!(out, "label {label} positive number: {positives}");
            columns.push(column);
        }
        let corr = CorrelationMatrix::from_columns(&columns);
        let _ = writeln!(out, "label {label} correlation:");
        for row in corr.values().rows() {
            let cells: Vec<String> = row.iter().map(|v| format!("{v:.4}")).collect();
            let _ = writeln!(out, "{}", cells.join(" "));
        }
    }
    write_atomic(path, out.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stacking::{EvaluationRecord, ValidationScores};
    use approx::assert_abs_diff_eq;
    use ndarray::Array2;

    fn record(greedy_f2: f64) -> EvaluationRecord {
        EvaluationRecord {
            eta: 0.3,
            max_depth: 6,
            min_child_weight: 1.0,
            best_iteration: 0,
            best_ntree_limit: 1,
            scores: ValidationScores {
                smooth_f2: 0.0,
                f2_at_0_1: 0.0,
                f2_at_0_2: 0.0,
                greedy_threshold: 0.5,
                greedy_f2,
            },
        }
    }

    #[test]
    fn summary_json_keys() {
        let summary = ScoreSummary::from_per_label([0.5; N_LABELS]);
        let json = serde_json::to_value(summary).unwrap();
        assert_eq!(json["12"], 0.5);
        assert_eq!(json["avg"], 0.5);
        let back: ScoreSummary = serde_json::from_value(json).unwrap();
        assert_eq!(back, summary);
    }

    #[test]
    fn summary_missing_label_rejected() {
        let err = serde_json::from_str::<ScoreSummary>(r#"{"0": 1.0, "avg": 1.0}"#);
        assert!(err.is_err());
    }

    #[test]
    fn cv_summary_averages_folds_then_labels() {
        let mut records = EvaluationMap::new();
        for fold in Fold::all() {
            for label in Label::all() {
                let f2 = if label.index() == 0 { fold.number() as f64 / 10.0 } else { 0.5 };
                records.insert(booster_name(fold, label), record(f2));
            }
        }
        let summary = cv_summary(&records).unwrap();
        assert_abs_diff_eq!(summary.per_label()[0], 0.3, epsilon = 1e-12);
        assert_abs_diff_eq!(summary.avg(), (0.3 + 12.0 * 0.5) / 13.0, epsilon = 1e-12);
    }

    #[test]
    fn cv_summary_requires_every_booster() {
        let records = EvaluationMap::new();
        assert!(matches!(cv_summary(&records), Err(Error::MissingEvaluation(_))));
    }

    #[test]
    fn book_keeps_other_entries() {
        let dir = tempfile::tempdir().unwrap();
        let book = StatisticsBook::open(dir.path().join("ensemble_cv.json"));
        book.record("a", ScoreSummary::from_per_label([0.1; N_LABELS])).unwrap();
        book.record("b", ScoreSummary::from_per_label([0.2; N_LABELS])).unwrap();
        book.record("a", ScoreSummary::from_per_label([0.3; N_LABELS])).unwrap();
        let entries = book.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_abs_diff_eq!(entries["a"].avg(), 0.3, epsilon = 1e-12);
    }

    #[test]
    fn books_on_one_file_do_not_lose_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ensemble_test.json");
        std::thread::scope(|scope| {
            for i in 0..12 {
                let path = &path;
                scope.spawn(move || {
                    StatisticsBook::open(path)
                        .record(&format!("gbdt_{i}"), ScoreSummary::from_per_label([0.5; N_LABELS]))
                        .unwrap();
                });
            }
        });
        assert_eq!(StatisticsBook::open(&path).entries().unwrap().len(), 12);
    }

    #[test]
    fn score_report_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.txt");
        write_score_report(&path, &ScoreSummary::from_per_label([1.0; N_LABELS])).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Label0 f2_score: 1");
        assert_eq!(lines[13], "====================");
        assert_eq!(lines[14], "Total f2_score: 1");
    }

    #[test]
    fn prediction_statistics_counts_positives() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("statis.txt");
        let mut a = Array2::<f32>::zeros((4, N_LABELS));
        a[[0, 0]] = 1.0;
        a[[1, 0]] = 1.0;
        let b = Array2::<f32>::ones((4, N_LABELS));
        write_prediction_statistics(&path, &[("a".into(), a), ("b".into(), b)]).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("label 0 positive number: 2"));
        assert!(text.contains("label 0 positive number: 4"));
    }
}
