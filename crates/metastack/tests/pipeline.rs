//! End-to-end run on a seeded synthetic world.

use metastack::selection::PredictionStatistics;
use metastack::stacking::ParamGrid;
use metastack::submission::JsonDecisionWriter;
use metastack::testing::SyntheticWorld;
use metastack::{Ensemble, EnsembleConfig, Fold, Label, Verbosity, N_FOLDS, N_LABELS};

const FOLD_SIZES: [usize; N_FOLDS] = [30, 30, 30, 30, 30];
const TEST_ROWS: usize = 24;

fn config(record_dir: &std::path::Path, top_n: usize) -> EnsembleConfig {
    EnsembleConfig::builder()
        .name("synthetic")
        .record_dir(record_dir)
        .top_n(top_n)
        .search(8)
        .num_rounds(8)
        .early_stopping_rounds(3)
        .grid(ParamGrid::new(vec![0.3], vec![2], vec![1.0]))
        .n_threads(2)
        .verbosity(Verbosity::Silent)
        .build()
        .unwrap()
}

#[test]
fn select_train_and_predict() {
    let world = SyntheticWorld::generate(&FOLD_SIZES, TEST_ROWS, 4, 2, 11);
    let dir = tempfile::tempdir().unwrap();
    let statistics = PredictionStatistics {
        catalog: &world.catalog,
        store: &world.store,
        labels: &world.labels,
        beta: 2.0,
        search: 8,
    };

    let ensemble = Ensemble::open(config(dir.path(), 2), &statistics, &world.store, &world.labels).unwrap();
    let selection = ensemble.selection();
    assert_eq!(selection.top_n(), 2);

    // Epochs of one run are near-duplicates, so each slot keeps two runs.
    for fold in Fold::all() {
        for label in Label::all() {
            let models = selection.models(fold, label);
            assert_ne!(models[0].id.stem(), models[1].id.stem());
            assert!(models[0].score >= models[1].score);
        }
    }

    let records = ensemble.train_all().unwrap();
    assert_eq!(records.len(), N_FOLDS * N_LABELS);
    for ((fold, label), record) in &records {
        assert!(ensemble.paths().booster_path(*fold, *label).exists());
        assert!((0.0..=1.0).contains(&record.greedy_f2()));
        assert!(record.best_ntree_limit >= 1 && record.best_ntree_limit <= 8);
    }

    let cv = ensemble.cv_report().unwrap();
    assert!((0.0..=1.0).contains(&cv.avg()));

    let out = tempfile::tempdir().unwrap();
    let writer = JsonDecisionWriter::new(out.path());
    let results = ensemble.evaluate_test(&writer).unwrap();
    let names: Vec<&str> = results.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["gbdt_synthetic_avg[base]", "gbdt_synthetic_avg[inputs]", "gbdt_synthetic"]
    );
    for result in &results {
        assert_eq!(result.decisions.dim(), (TEST_ROWS, N_LABELS));
        assert!(result.decisions.iter().all(|&d| d == 0.0 || d == 1.0));
        assert!(writer.path(&result.name).exists());
    }

    let (base_cv, base_test) = ensemble.first_stage_report(&world.catalog).unwrap();
    assert!((0.0..=1.0).contains(&base_cv.avg()));
    assert!((0.0..=1.0).contains(&base_test.avg()));

    let cv_book = std::fs::read_to_string(dir.path().join("ensemble_cv.json")).unwrap();
    assert!(cv_book.contains("gbdt_synthetic"));
    assert!(cv_book.contains("base_synthetic"));
    let test_book = std::fs::read_to_string(dir.path().join("ensemble_test.json")).unwrap();
    assert!(test_book.contains("gbdt_synthetic_avg[inputs]"));
    assert!(dir.path().join("statistics/meta_model_statis.txt").exists());

    // Reopening with another top_n reuses the persisted selection and records.
    let reopened = Ensemble::open(config(dir.path(), 3), &statistics, &world.store, &world.labels).unwrap();
    assert_eq!(reopened.selection(), ensemble.selection());
    let again = reopened.train_all().unwrap();
    assert_eq!(again, records);
}

#[test]
fn single_pair_and_retrain() {
    let world = SyntheticWorld::generate(&FOLD_SIZES, TEST_ROWS, 3, 1, 5);
    let dir = tempfile::tempdir().unwrap();
    let statistics = PredictionStatistics {
        catalog: &world.catalog,
        store: &world.store,
        labels: &world.labels,
        beta: 2.0,
        search: 8,
    };
    let ensemble = Ensemble::open(config(dir.path(), 2), &statistics, &world.store, &world.labels).unwrap();

    let fold = Fold::new(4).unwrap();
    let label = Label::new(6).unwrap();
    let first = ensemble.train_single(fold, label).unwrap();
    let records = ensemble.records().unwrap();
    assert_eq!(records.len(), 1);

    // The data and grid are unchanged, so a retrain reproduces the record.
    let second = ensemble.retrain(fold, label).unwrap();
    assert_eq!(second, first);
}
