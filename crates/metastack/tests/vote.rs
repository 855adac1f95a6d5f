//! Voting over hand-built boosters with known outputs.

use ndarray::{array, Array2};

use metastack::boosting::Booster;
use metastack::config::booster_name;
use metastack::metrics::binarize;
use metastack::stacking::{EvaluationMap, EvaluationRecord, EvaluationStore, ValidationScores};
use metastack::vote::{InputAggregation, VoteAggregator};
use metastack::{Fold, Label, RecordPaths};

/// One split on feature 0 at 0.5: below gives sigmoid(-2) ≈ 0.12, above
/// gives sigmoid(2) ≈ 0.88.
const STEP_BOOSTER: &str = r#"{
    "base_score": 0.0,
    "n_features": 1,
    "trees": [{"nodes": [
        {"kind": "split", "feature": 0, "threshold": 0.5, "left": 1, "right": 2},
        {"kind": "leaf", "value": -2.0},
        {"kind": "leaf", "value": 2.0}
    ]}]
}"#;

fn record(greedy_threshold: f64) -> EvaluationRecord {
    EvaluationRecord {
        eta: 0.3,
        max_depth: 1,
        min_child_weight: 1.0,
        best_iteration: 0,
        best_ntree_limit: 1,
        scores: ValidationScores {
            smooth_f2: 0.5,
            f2_at_0_1: 0.5,
            f2_at_0_2: 0.5,
            greedy_threshold,
            greedy_f2: 0.5,
        },
    }
}

/// Label 0: three folds cut at 0.5, two at 0.95 (net +1 on high rows).
/// Label 1: two folds cut at 0.5, three at 0.95 (net -1 on high rows).
/// Other labels: every fold cut at 0.5.
fn threshold(fold: Fold, label: Label) -> f64 {
    match label.index() {
        0 if fold.number() > 3 => 0.95,
        1 if fold.number() > 2 => 0.95,
        _ => 0.5,
    }
}

fn trained_ensemble(dir: &std::path::Path) -> RecordPaths {
    let paths = RecordPaths::new(dir, None);
    let booster: Booster = serde_json::from_str(STEP_BOOSTER).unwrap();
    let mut records = EvaluationMap::new();
    for fold in Fold::all() {
        for label in Label::all() {
            booster.save(&paths.booster_path(fold, label)).unwrap();
            records.insert(booster_name(fold, label), record(threshold(fold, label)));
        }
    }
    EvaluationStore::new(paths.evaluate_json()).replace(records).unwrap();
    paths
}

#[test]
fn majority_of_folds_decides() {
    let dir = tempfile::tempdir().unwrap();
    let aggregator = VoteAggregator::load(&trained_ensemble(dir.path())).unwrap();

    let features = array![[0.0f32], [1.0]];
    let decisions = aggregator.predict(&features).unwrap();
    assert_eq!(decisions.dim(), (2, 13));
    assert!(decisions.row(0).iter().all(|&d| d == 0.0));
    assert_eq!(decisions[[1, 0]], 1.0);
    assert_eq!(decisions[[1, 1]], 0.0);
    assert_eq!(decisions[[1, 2]], 1.0);
}

#[test]
fn decisions_survive_rethresholding() {
    let dir = tempfile::tempdir().unwrap();
    let aggregator = VoteAggregator::load(&trained_ensemble(dir.path())).unwrap();
    let decisions = aggregator.predict(&array![[0.0f32], [1.0], [0.7], [0.2]]).unwrap();
    for threshold in [0.01, 0.2, 0.5, 0.8, 0.99] {
        assert_eq!(binarize(decisions.view(), threshold), decisions);
    }
}

#[test]
fn score_grid_uses_every_booster() {
    let dir = tempfile::tempdir().unwrap();
    let aggregator = VoteAggregator::load(&trained_ensemble(dir.path())).unwrap();
    let grid = aggregator.predict_all_labels(&array![[0.0f32], [1.0], [2.0]]).unwrap();
    assert_eq!(grid.n_rows(), 3);
    for fold in Fold::all() {
        for label in Label::all() {
            let scores = grid.get(label, fold);
            assert!(scores[0] < 0.2);
            assert!(scores[1] > 0.8);
        }
    }
}

#[test]
fn averaging_and_voting_inputs_differ() {
    let dir = tempfile::tempdir().unwrap();
    let aggregator = VoteAggregator::load(&trained_ensemble(dir.path())).unwrap();

    // Row 0 is high in one input and low in two; averaged scores are
    // (0.88 + 0.12 + 0.12) / 3 ≈ 0.37, below every cutoff.
    let inputs: Vec<Array2<f32>> = vec![array![[1.0f32]], array![[0.0f32]], array![[0.0f32]]];
    let averaged = aggregator
        .predict_with_voting(&inputs, InputAggregation::AverageScores)
        .unwrap();
    assert!(averaged.iter().all(|&d| d == 0.0));

    // Voting each input: label 2 gets +5 from the high input and -10 from
    // the low ones.
    let voted = aggregator.predict_with_voting(&inputs, InputAggregation::VoteEach).unwrap();
    assert_eq!(voted[[0, 2]], 0.0);

    // Two high inputs and one low one: +10 - 5 > 0.
    let inputs: Vec<Array2<f32>> = vec![array![[1.0f32]], array![[1.0f32]], array![[0.0f32]]];
    let voted = aggregator.predict_with_voting(&inputs, InputAggregation::VoteEach).unwrap();
    assert_eq!(voted[[0, 2]], 1.0);
    let averaged = aggregator
        .predict_with_voting(&inputs, InputAggregation::AverageScores)
        .unwrap();
    // (0.88 + 0.88 + 0.12) / 3 ≈ 0.63 > 0.5 on every fold of label 2.
    assert_eq!(averaged[[0, 2]], 1.0);
}

#[test]
fn missing_record_fails_to_load() {
    let dir = tempfile::tempdir().unwrap();
    let paths = trained_ensemble(dir.path());
    let store = EvaluationStore::new(paths.evaluate_json());
    let mut records = store.load().unwrap();
    records.remove(&booster_name(Fold::new(5).unwrap(), Label::new(12).unwrap()));
    store.replace(records).unwrap();
    assert!(matches!(
        VoteAggregator::load(&paths),
        Err(metastack::Error::MissingEvaluation(_))
    ));
}

#[test]
fn no_inputs_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let aggregator = VoteAggregator::load(&trained_ensemble(dir.path())).unwrap();
    assert!(aggregator.predict_with_voting(&[], InputAggregation::VoteEach).is_err());
}
