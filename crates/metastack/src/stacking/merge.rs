//! Combine the second stages of several ensembles into one.

use std::fs;

use crate::config::RecordPaths;
use crate::error::{Error, Result};

use super::record::{EvaluationMap, EvaluationStore};

/// For every booster name of the first source, keep the record and booster
/// file with the highest `greedy_f2` across `sources`, and write them under
/// `target`.
///
/// Ties keep the earlier source. Every source must hold a record for every
/// name of the first one.
pub fn merge_best(target: &RecordPaths, sources: &[RecordPaths]) -> Result<EvaluationMap> {
    let Some(first) = sources.first() else {
        return Ok(EvaluationMap::new());
    };
    let maps = sources
        .iter()
        .map(|paths| EvaluationStore::new(paths.evaluate_json()).load())
        .collect::<Result<Vec<_>>>()?;

    let booster_dir = target.booster_dir();
    fs::create_dir_all(&booster_dir).map_err(|e| Error::io(&booster_dir, e))?;

    let mut merged = EvaluationMap::new();
    for name in maps[0].keys() {
        let mut best: Option<usize> = None;
        let mut best_f2 = -1.0;
        for (i, map) in maps.iter().enumerate() {
            let record = map.get(name).ok_or_else(|| {
                Error::MissingEvaluation(format!("{name} in {}", sources[i].evaluate_json().display()))
            })?;
            if record.greedy_f2() > best_f2 {
                best_f2 = record.greedy_f2();
                best = Some(i);
            }
        }
        let Some(i) = best else {
            continue;
        };

        let from = sources[i].booster_dir().join(name);
        let to = booster_dir.join(name);
        if from != to {
            fs::copy(&from, &to).map_err(|e| Error::io(&from, e))?;
        }
        tracing::info!(booster = %name, source = %sources[i].root().display(), greedy_f2 = best_f2, "merged");
        merged.insert(name.clone(), maps[i][name].clone());
    }
    tracing::debug!(first = %first.root().display(), boosters = merged.len(), "merge complete");

    EvaluationStore::new(target.evaluate_json()).replace(merged.clone())?;
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stacking::{EvaluationRecord, ValidationScores};

    fn record(greedy_f2: f64) -> EvaluationRecord {
        EvaluationRecord {
            eta: 0.1,
            max_depth: 3,
            min_child_weight: 1.0,
            best_iteration: 2,
            best_ntree_limit: 3,
            scores: ValidationScores {
                smooth_f2: 0.0,
                f2_at_0_1: 0.0,
                f2_at_0_2: 0.0,
                greedy_threshold: 0.3,
                greedy_f2,
            },
        }
    }

    fn source(dir: &std::path::Path, name: &str, scores: &[(&str, f64)]) -> RecordPaths {
        let paths = RecordPaths::new(dir.join(name), None);
        let store = EvaluationStore::new(paths.evaluate_json());
        fs::create_dir_all(paths.booster_dir()).unwrap();
        for (booster, f2) in scores {
            store.put(booster, record(*f2)).unwrap();
            fs::write(paths.booster_dir().join(booster), name).unwrap();
        }
        paths
    }

    #[test]
    fn keeps_best_per_booster() {
        let dir = tempfile::tempdir().unwrap();
        let a = source(dir.path(), "a", &[("x.xgb", 0.7), ("y.xgb", 0.5)]);
        let b = source(dir.path(), "b", &[("x.xgb", 0.6), ("y.xgb", 0.5)]);
        let c = source(dir.path(), "c", &[("x.xgb", 0.65), ("y.xgb", 0.55)]);
        let target = RecordPaths::new(dir.path().join("merged"), None);

        let merged = merge_best(&target, &[a, b, c]).unwrap();
        assert_eq!(merged["x.xgb"].greedy_f2(), 0.7);
        assert_eq!(merged["y.xgb"].greedy_f2(), 0.55);
        assert_eq!(fs::read_to_string(target.booster_dir().join("x.xgb")).unwrap(), "a");
        assert_eq!(fs::read_to_string(target.booster_dir().join("y.xgb")).unwrap(), "c");
        assert_eq!(EvaluationStore::new(target.evaluate_json()).load().unwrap(), merged);
    }

    #[test]
    fn tie_keeps_earlier_source() {
        let dir = tempfile::tempdir().unwrap();
        let a = source(dir.path(), "a", &[("x.xgb", 0.5)]);
        let b = source(dir.path(), "b", &[("x.xgb", 0.5)]);
        let target = RecordPaths::new(dir.path().join("merged"), None);
        merge_best(&target, &[a, b]).unwrap();
        assert_eq!(fs::read_to_string(target.booster_dir().join("x.xgb")).unwrap(), "a");
    }

    #[test]
    fn missing_record_in_later_source() {
        let dir = tempfile::tempdir().unwrap();
        let a = source(dir.path(), "a", &[("x.xgb", 0.5), ("y.xgb", 0.5)]);
        let b = source(dir.path(), "b", &[("x.xgb", 0.5)]);
        let target = RecordPaths::new(dir.path().join("merged"), None);
        assert!(matches!(
            merge_best(&target, &[a, b]),
            Err(Error::MissingEvaluation(_))
        ));
    }
}
