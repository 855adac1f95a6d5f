//! Persisted meta-model selection.
//!
//! The selection is computed once per record directory. Later runs reload
//! it as-is, so every downstream artifact is built from the same models.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::config::RecordPaths;
use crate::error::{Error, Result};
use crate::types::{BaseModelDescriptor, Fold, Label, ModelId, N_FOLDS, N_LABELS};
use crate::utils::{read_json_opt, write_atomic, write_json_atomic};

use super::pruner::CorrelationPruner;
use super::statistics::CandidateStatistics;

// =============================================================================
// MetaModelSelection
// =============================================================================

type Nested = Vec<Vec<Vec<BaseModelDescriptor>>>;

/// The `top_n` chosen base models for every (fold, label).
///
/// All 65 slots are present and hold the same number of models; this is
/// checked on construction and on deserialization. Serialized as a nested
/// `[fold][label][rank]` array of `[id, score]` pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Nested", into = "Nested")]
pub struct MetaModelSelection {
    top_n: usize,
    slots: BTreeMap<(Fold, Label), Vec<BaseModelDescriptor>>,
}

impl MetaModelSelection {
    pub fn new(slots: BTreeMap<(Fold, Label), Vec<BaseModelDescriptor>>) -> Result<Self> {
        if slots.len() != N_FOLDS * N_LABELS {
            return Err(Error::SelectionShape(format!(
                "{} (fold, label) slots, expected {}",
                slots.len(),
                N_FOLDS * N_LABELS
            )));
        }
        let top_n = slots.values().next().map_or(0, Vec::len);
        if top_n == 0 {
            return Err(Error::SelectionShape("empty model lists".into()));
        }
        if let Some(((fold, label), models)) = slots.iter().find(|(_, m)| m.len() != top_n) {
            return Err(Error::SelectionShape(format!(
                "fold {fold}, label {label} has {} models, expected {top_n}",
                models.len()
            )));
        }
        Ok(Self { top_n, slots })
    }

    /// Build from a `[fold][label][rank]` nested array.
    pub fn from_nested(nested: Nested) -> Result<Self> {
        if nested.len() != N_FOLDS {
            return Err(Error::SelectionShape(format!(
                "{} folds, expected {N_FOLDS}",
                nested.len()
            )));
        }
        let mut slots = BTreeMap::new();
        for (fold, per_fold) in Fold::all().zip(nested) {
            if per_fold.len() != N_LABELS {
                return Err(Error::SelectionShape(format!(
                    "fold {fold} has {} labels, expected {N_LABELS}",
                    per_fold.len()
                )));
            }
            for (label, models) in Label::all().zip(per_fold) {
                slots.insert((fold, label), models);
            }
        }
        Self::new(slots)
    }

    pub fn to_nested(&self) -> Nested {
        Fold::all()
            .map(|fold| Label::all().map(|label| self.models(fold, label).to_vec()).collect())
            .collect()
    }

    pub fn top_n(&self) -> usize {
        self.top_n
    }

    /// Selected models for one (fold, label), best first.
    pub fn models(&self, fold: Fold, label: Label) -> &[BaseModelDescriptor] {
        self.slots.get(&(fold, label)).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every distinct model appearing anywhere in the selection.
    pub fn unique_models(&self) -> BTreeSet<&ModelId> {
        self.slots.values().flatten().map(|d| &d.id).collect()
    }

    /// Model stems of one fold counted across labels, most frequent first;
    /// equal counts keep first-appearance order.
    pub fn rank(&self, fold: Fold, top_k: usize) -> Vec<(String, usize)> {
        let mut counts: Vec<(String, usize)> = Vec::new();
        for label in Label::all() {
            for model in self.models(fold, label) {
                let stem = model.id.stem();
                match counts.iter_mut().find(|(s, _)| s == stem) {
                    Some((_, n)) => *n += 1,
                    None => counts.push((stem.to_string(), 1)),
                }
            }
        }
        counts.sort_by(|a, b| b.1.cmp(&a.1));
        counts.truncate(top_k);
        counts
    }

    /// Human-readable listing grouped by fold and label. Folds are headed
    /// by their 0-based index.
    pub fn text_report(&self) -> String {
        let mut out = String::new();
        for fold in Fold::all() {
            let _ = writeln!(out, "##############val {}###############", fold.index());
            for label in Label::all() {
                let _ = writeln!(out, "--------------label {label}--------------");
                for model in self.models(fold, label) {
                    let _ = writeln!(out, "[f2 {:.6}]:{}", model.score, model.id);
                }
            }
        }
        out
    }
}

impl TryFrom<Nested> for MetaModelSelection {
    type Error = Error;

    fn try_from(nested: Nested) -> Result<Self> {
        Self::from_nested(nested)
    }
}

impl From<MetaModelSelection> for Nested {
    fn from(selection: MetaModelSelection) -> Self {
        selection.to_nested()
    }
}

// =============================================================================
// MetaModelRegistry
// =============================================================================

/// Owner of `meta_model.json` and its reports in one record directory.
#[derive(Debug, Clone)]
pub struct MetaModelRegistry {
    paths: RecordPaths,
}

impl MetaModelRegistry {
    pub fn new(paths: RecordPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &RecordPaths {
        &self.paths
    }

    /// The persisted selection, if any.
    pub fn load(&self) -> Result<Option<MetaModelSelection>> {
        read_json_opt(&self.paths.meta_model_json())
    }

    /// Reload a persisted selection, or prune every (fold, label) and persist
    /// the result.
    ///
    /// A fresh selection is written, read back and compared slot by slot
    /// before it is returned.
    pub fn select_or_load(
        &self,
        pruner: &CorrelationPruner,
        statistics: &dyn CandidateStatistics,
    ) -> Result<MetaModelSelection> {
        if let Some(selection) = self.load()? {
            tracing::info!(path = %self.paths.meta_model_json().display(), "loaded meta model selection");
            if selection.top_n() != pruner.top_n {
                tracing::warn!(
                    persisted = selection.top_n(),
                    configured = pruner.top_n,
                    "persisted selection keeps its own top_n"
                );
            }
            return Ok(selection);
        }

        let mut slots = BTreeMap::new();
        for fold in Fold::all() {
            tracing::info!(fold = fold.number(), "selecting meta models");
            for label in Label::all() {
                let candidates = statistics.candidates(fold, label)?;
                slots.insert((fold, label), pruner.select(fold, label, &candidates)?);
            }
        }
        let selection = MetaModelSelection::new(slots)?;
        self.persist(&selection)?;

        let reloaded = self.load()?.ok_or_else(|| {
            Error::SelectionShape(format!(
                "{} vanished after writing",
                self.paths.meta_model_json().display()
            ))
        })?;
        for fold in Fold::all() {
            for label in Label::all() {
                if reloaded.models(fold, label) != selection.models(fold, label) {
                    return Err(Error::RegistryMismatch { fold, label });
                }
            }
        }
        Ok(selection)
    }

    /// Write `meta_model.json` and `meta_model.txt`.
    pub fn persist(&self, selection: &MetaModelSelection) -> Result<()> {
        write_json_atomic(&self.paths.meta_model_json(), selection)?;
        write_atomic(&self.paths.meta_model_txt(), selection.text_report().as_bytes())
    }

    /// Write `meta_model_rank.txt` with the `top_k` most used stems per fold.
    pub fn write_rank_report(&self, selection: &MetaModelSelection, top_k: usize) -> Result<()> {
        let mut out = String::new();
        for fold in Fold::all() {
            out.push_str("================================================\n");
            let _ = writeln!(out, "val {fold}");
            for (stem, count) in selection.rank(fold, top_k) {
                let _ = writeln!(out, "{count}: {stem}");
            }
        }
        write_atomic(&self.paths.rank_txt(), out.as_bytes())
    }

    /// Write `statistics/meta_model_statis.txt`: distinct model count and ids.
    pub fn write_inventory(&self, selection: &MetaModelSelection) -> Result<()> {
        let models = selection.unique_models();
        let mut out = format!("model_number: {}\n", models.len());
        for id in models {
            let _ = writeln!(out, "{id}");
        }
        write_atomic(&self.paths.inventory_txt(), out.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform_selection(top_n: usize) -> MetaModelSelection {
        let nested = (0..N_FOLDS)
            .map(|f| {
                (0..N_LABELS)
                    .map(|l| {
                        (0..top_n)
                            .map(|r| {
                                BaseModelDescriptor::new(
                                    format!("run{}.e{}", (l + r) % 3, f).as_str(),
                                    0.9 - r as f64 * 0.01,
                                )
                            })
                            .collect()
                    })
                    .collect()
            })
            .collect();
        MetaModelSelection::from_nested(nested).unwrap()
    }

    #[test]
    fn ragged_selection_rejected() {
        let mut nested = uniform_selection(2).to_nested();
        nested[3][7].pop();
        assert!(matches!(
            MetaModelSelection::from_nested(nested),
            Err(Error::SelectionShape(_))
        ));
        let mut short = uniform_selection(2).to_nested();
        short.pop();
        assert!(MetaModelSelection::from_nested(short).is_err());
    }

    #[test]
    fn json_is_nested_pairs() {
        let selection = uniform_selection(1);
        let value = serde_json::to_value(&selection).unwrap();
        assert_eq!(value[0][0][0][0], "run0.e0");
        let back: MetaModelSelection = serde_json::from_value(value).unwrap();
        assert_eq!(back, selection);
    }

    #[test]
    fn rank_counts_stems_per_fold() {
        let selection = uniform_selection(2);
        let fold = Fold::new(1).unwrap();
        let ranked = selection.rank(fold, 10);
        // 13 labels x 2 ranks over stems run0..run2
        assert_eq!(ranked.iter().map(|(_, n)| n).sum::<usize>(), 26);
        assert!(ranked.windows(2).all(|w| w[0].1 >= w[1].1));
        assert_eq!(selection.rank(fold, 1).len(), 1);
    }

    #[test]
    fn text_report_layout() {
        let report = uniform_selection(1).text_report();
        let mut lines = report.lines();
        assert_eq!(lines.next(), Some("##############val 0###############"));
        assert_eq!(lines.next(), Some("--------------label 0--------------"));
        assert_eq!(lines.next(), Some("[f2 0.900000]:run0.e0"));
        let headers: Vec<&str> = report.lines().filter(|l| l.starts_with("####")).collect();
        assert_eq!(headers.last(), Some(&"##############val 4###############"));
    }

    #[test]
    fn persisted_selection_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let registry = MetaModelRegistry::new(RecordPaths::new(dir.path(), None));
        let selection = uniform_selection(2);
        registry.persist(&selection).unwrap();

        struct NoStatistics;
        impl CandidateStatistics for NoStatistics {
            fn candidates(&self, fold: Fold, label: Label) -> Result<super::super::RankedCandidates> {
                Err(Error::MissingCandidates { fold, label })
            }
        }
        let pruner = CorrelationPruner::new(0.9, 20, 5);
        let loaded = registry.select_or_load(&pruner, &NoStatistics).unwrap();
        assert_eq!(loaded, selection);
    }

    #[test]
    fn inventory_lists_distinct_models() {
        let dir = tempfile::tempdir().unwrap();
        let registry = MetaModelRegistry::new(RecordPaths::new(dir.path(), None));
        let selection = uniform_selection(1);
        registry.write_inventory(&selection).unwrap();
        let text = std::fs::read_to_string(registry.paths().inventory_txt()).unwrap();
        // stems run0..run2 x epochs e0..e4
        assert!(text.starts_with("model_number: 15\n"));
    }
}
