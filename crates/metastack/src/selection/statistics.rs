//! Sources of ranked candidates for the pruner.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::artifacts::PredictionSource;
use crate::catalog::ModelCatalog;
use crate::dataset::FoldLabels;
use crate::error::{Error, Result};
use crate::metrics::threshold_fbeta;
use crate::types::{BaseModelDescriptor, Fold, Label};
use crate::utils::{read_json, write_json_atomic};

use super::candidates::RankedCandidates;

/// Per-(fold, label) candidate rankings with their correlation matrices.
pub trait CandidateStatistics {
    fn candidates(&self, fold: Fold, label: Label) -> Result<RankedCandidates>;
}

// =============================================================================
// JSON statistics
// =============================================================================

/// Precomputed statistics stored as a JSON object keyed `"<fold>/<label>"`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JsonCandidateStatistics {
    entries: BTreeMap<String, RankedCandidates>,
}

impl JsonCandidateStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(fold: Fold, label: Label) -> String {
        format!("{}/{}", fold.number(), label.index())
    }

    pub fn insert(&mut self, fold: Fold, label: Label, candidates: RankedCandidates) {
        self.entries.insert(Self::key(fold, label), candidates);
    }

    pub fn load(path: &Path) -> Result<Self> {
        read_json(path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, self)
    }
}

impl CandidateStatistics for JsonCandidateStatistics {
    fn candidates(&self, fold: Fold, label: Label) -> Result<RankedCandidates> {
        self.entries
            .get(&Self::key(fold, label))
            .cloned()
            .ok_or(Error::MissingCandidates { fold, label })
    }
}

// =============================================================================
// Statistics from predictions
// =============================================================================

/// Scores every catalog model on its fold's validation predictions.
///
/// A model's score for a label is the F-beta of its validation column cut
/// at the model's own decision threshold for that label. Models without a
/// validation artifact cannot be scored and are skipped with a warning.
pub struct PredictionStatistics<'a> {
    pub catalog: &'a ModelCatalog,
    pub store: &'a dyn PredictionSource,
    pub labels: &'a dyn FoldLabels,
    pub beta: f64,
    /// Candidates correlated with each other; usually the pruner's `search`.
    pub search: usize,
}

impl CandidateStatistics for PredictionStatistics<'_> {
    fn candidates(&self, fold: Fold, label: Label) -> Result<RankedCandidates> {
        let truth = self.labels.fold_labels(fold)?;
        let y_true = truth.column(label.index());

        let mut scored = Vec::new();
        for spec in self.catalog.candidates(fold, label) {
            let Some(predictions) = self.store.validation(&spec.id)? else {
                tracing::warn!(model = %spec.id, fold = fold.number(), "no validation predictions, skipping");
                continue;
            };
            if predictions.ncols() <= label.index() {
                return Err(Error::ArtifactShape {
                    model: spec.id.clone(),
                    label,
                    columns: predictions.ncols(),
                });
            }
            if predictions.nrows() != truth.nrows() {
                return Err(Error::RowCountMismatch {
                    fold,
                    expected: truth.nrows(),
                    found: predictions.nrows(),
                });
            }
            let column = predictions.column(label.index()).to_owned();
            let score = threshold_fbeta(y_true, column.view(), spec.threshold(label), self.beta)?;
            scored.push((BaseModelDescriptor::new(spec.id.clone(), score), column));
        }

        if scored.is_empty() {
            return Err(Error::MissingCandidates { fold, label });
        }
        Ok(RankedCandidates::rank(scored, self.search))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selection::CorrelationMatrix;
    use ndarray::Array2;

    #[test]
    fn json_statistics_keyed_by_fold_and_label() {
        let fold = Fold::new(2).unwrap();
        let label = Label::new(4).unwrap();
        let ranked = RankedCandidates::new(
            vec![BaseModelDescriptor::new("a", 0.8)],
            CorrelationMatrix::new(Array2::eye(1)).unwrap(),
        );
        let mut stats = JsonCandidateStatistics::new();
        stats.insert(fold, label, ranked.clone());

        let json = serde_json::to_value(&stats).unwrap();
        assert!(json.get("2/4").is_some());
        assert_eq!(stats.candidates(fold, label).unwrap(), ranked);
        assert!(matches!(
            stats.candidates(fold, Label::new(5).unwrap()),
            Err(Error::MissingCandidates { .. })
        ));
    }
}
