//! Evaluation records of trained second-stage boosters.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};

use crate::boosting::TrainOutcome;
use crate::error::Result;
use crate::metrics::{greedy_threshold_search, smooth_fbeta, threshold_fbeta, MetricError, ThresholdGrid};
use crate::utils::{read_json_opt, update_json};

use super::grid::GridPoint;

/// Scores of one booster on its validation fold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidationScores {
    pub smooth_f2: f64,
    #[serde(rename = "f2_0.1")]
    pub f2_at_0_1: f64,
    #[serde(rename = "f2_0.2")]
    pub f2_at_0_2: f64,
    pub greedy_threshold: f64,
    pub greedy_f2: f64,
}

impl ValidationScores {
    /// Score validation probabilities at the fixed cutoffs, smoothly, and at
    /// the best threshold of `grid`.
    pub fn compute(
        y_true: ArrayView1<f32>,
        y_prob: ArrayView1<f32>,
        beta: f64,
        grid: &ThresholdGrid,
    ) -> std::result::Result<Self, MetricError> {
        let greedy = greedy_threshold_search(y_true, y_prob, beta, grid)?;
        Ok(Self {
            smooth_f2: smooth_fbeta(y_true, y_prob, beta)?,
            f2_at_0_1: threshold_fbeta(y_true, y_prob, 0.1, beta)?,
            f2_at_0_2: threshold_fbeta(y_true, y_prob, 0.2, beta)?,
            greedy_threshold: greedy.threshold,
            greedy_f2: greedy.score,
        })
    }
}

/// Persisted outcome of the grid search for one (fold, label).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub eta: f32,
    pub max_depth: u32,
    pub min_child_weight: f32,
    pub best_iteration: usize,
    pub best_ntree_limit: usize,
    #[serde(flatten)]
    pub scores: ValidationScores,
}

impl EvaluationRecord {
    pub fn new(point: GridPoint, outcome: &TrainOutcome, scores: ValidationScores) -> Self {
        Self {
            eta: point.eta,
            max_depth: point.max_depth,
            min_child_weight: point.min_child_weight,
            best_iteration: outcome.best_iteration,
            best_ntree_limit: outcome.best_ntree_limit,
            scores,
        }
    }

    pub fn greedy_f2(&self) -> f64 {
        self.scores.greedy_f2
    }

    pub fn greedy_threshold(&self) -> f64 {
        self.scores.greedy_threshold
    }
}

/// `evaluate.json`: booster name → [`EvaluationRecord`].
///
/// Writers hold the process-wide lock of the file for a full
/// reload-merge-write cycle and replace it atomically. Any number of stores
/// may point at the same file.
#[derive(Debug, Clone)]
pub struct EvaluationStore {
    path: PathBuf,
}

pub type EvaluationMap = BTreeMap<String, EvaluationRecord>;

impl EvaluationStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All records; empty if the file does not exist yet.
    pub fn load(&self) -> Result<EvaluationMap> {
        Ok(read_json_opt(&self.path)?.unwrap_or_default())
    }

    pub fn get(&self, name: &str) -> Result<Option<EvaluationRecord>> {
        Ok(self.load()?.remove(name))
    }

    pub fn contains(&self, name: &str) -> Result<bool> {
        Ok(self.load()?.contains_key(name))
    }

    /// Insert or replace one record.
    pub fn put(&self, name: &str, record: EvaluationRecord) -> Result<()> {
        self.update(|map| {
            map.insert(name.to_string(), record);
        })
    }

    /// Replace the whole map.
    pub fn replace(&self, records: EvaluationMap) -> Result<()> {
        self.update(|map| *map = records)
    }

    fn update(&self, f: impl FnOnce(&mut EvaluationMap)) -> Result<()> {
        update_json(&self.path, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(greedy_f2: f64) -> EvaluationRecord {
        EvaluationRecord {
            eta: 0.3,
            max_depth: 6,
            min_child_weight: 1.0,
            best_iteration: 4,
            best_ntree_limit: 5,
            scores: ValidationScores {
                smooth_f2: 0.5,
                f2_at_0_1: 0.6,
                f2_at_0_2: 0.7,
                greedy_threshold: 0.23,
                greedy_f2,
            },
        }
    }

    #[test]
    fn json_field_names() {
        let value = serde_json::to_value(record(0.8)).unwrap();
        for key in [
            "eta",
            "max_depth",
            "min_child_weight",
            "best_iteration",
            "best_ntree_limit",
            "smooth_f2",
            "f2_0.1",
            "f2_0.2",
            "greedy_threshold",
            "greedy_f2",
        ] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
    }

    #[test]
    fn concurrent_stores_keep_every_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("evaluate.json");
        for _ in 0..5 {
            std::thread::scope(|scope| {
                for i in 0..16 {
                    let path = &path;
                    scope.spawn(move || {
                        // A fresh store per writer, as separate trainers build them.
                        EvaluationStore::new(path).put(&format!("b{i}"), record(i as f64 / 100.0)).unwrap();
                    });
                }
            });
            let map = EvaluationStore::new(&path).load().unwrap();
            assert_eq!(map.len(), 16);
            assert_eq!(map["b3"].greedy_f2(), 0.03);
        }
        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = EvaluationStore::new(dir.path().join("evaluate.json"));
        assert!(store.load().unwrap().is_empty());
        assert_eq!(store.get("x").unwrap(), None);
    }

    #[test]
    fn scores_match_metric_engine() {
        use ndarray::array;
        let y = array![1.0f32, 0.0, 1.0, 1.0];
        let p = array![0.9f32, 0.4, 0.6, 0.3];
        let scores = ValidationScores::compute(y.view(), p.view(), 2.0, &ThresholdGrid::uniform(100)).unwrap();
        assert!(scores.greedy_f2 >= scores.f2_at_0_2);
        assert!(scores.greedy_f2 >= scores.f2_at_0_1);
        assert!(scores.greedy_threshold < 0.3);
    }
}
