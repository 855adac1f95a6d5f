//! Persistence of the meta-model selection.

use proptest::collection::vec as prop_vec;
use proptest::prelude::*;

use metastack::selection::{
    CandidateStatistics, CorrelationMatrix, CorrelationPruner, JsonCandidateStatistics, MetaModelRegistry,
    MetaModelSelection, RankedCandidates,
};
use metastack::{BaseModelDescriptor, Fold, Label, RecordPaths, N_FOLDS, N_LABELS};

fn arb_selection() -> impl Strategy<Value = MetaModelSelection> {
    (1usize..=4).prop_flat_map(|top_n| {
        prop_vec((0u32..50, 0.0f64..1.0), N_FOLDS * N_LABELS * top_n).prop_map(move |entries| {
            let mut entries = entries.into_iter();
            let nested = (0..N_FOLDS)
                .map(|f| {
                    (0..N_LABELS)
                        .map(|_| {
                            entries
                                .by_ref()
                                .take(top_n)
                                .map(|(run, score)| {
                                    BaseModelDescriptor::new(format!("run{run}_val{}.e3", f + 1).as_str(), score)
                                })
                                .collect()
                        })
                        .collect()
                })
                .collect();
            MetaModelSelection::from_nested(nested).unwrap()
        })
    })
}

/// Statistics with `n` uncorrelated candidates per slot, prefixed by `tag`.
fn statistics(tag: &str, n: usize) -> JsonCandidateStatistics {
    let mut stats = JsonCandidateStatistics::new();
    for fold in Fold::all() {
        for label in Label::all() {
            let models = (0..n)
                .map(|i| BaseModelDescriptor::new(format!("{tag}{i}_f{fold}_l{label}.e1").as_str(), 0.9 - i as f64 * 0.1))
                .collect();
            stats.insert(
                fold,
                label,
                RankedCandidates::new(models, CorrelationMatrix::new(ndarray::Array2::eye(n)).unwrap()),
            );
        }
    }
    stats
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// What the registry writes is what it reads back.
    #[test]
    fn persist_then_load(selection in arb_selection()) {
        let dir = tempfile::tempdir().unwrap();
        let registry = MetaModelRegistry::new(RecordPaths::new(dir.path(), None));
        registry.persist(&selection).unwrap();
        let loaded = registry.load().unwrap().unwrap();
        prop_assert_eq!(loaded, selection);
    }
}

#[test]
fn selection_runs_once_per_record_dir() {
    let dir = tempfile::tempdir().unwrap();
    let registry = MetaModelRegistry::new(RecordPaths::new(dir.path(), None));
    let pruner = CorrelationPruner::new(0.9, 4, 2);

    let first = registry.select_or_load(&pruner, &statistics("a", 4)).unwrap();
    assert_eq!(first.top_n(), 2);
    let fold = Fold::new(4).unwrap();
    let label = Label::new(9).unwrap();
    assert_eq!(first.models(fold, label)[0].id.as_str(), "a0_f4_l9.e1");

    // Different statistics and top_n: the persisted selection wins.
    let other = CorrelationPruner::new(0.9, 4, 3);
    let second = registry.select_or_load(&other, &statistics("b", 4)).unwrap();
    assert_eq!(second, first);

    assert!(dir.path().join("meta_model.json").exists());
    assert!(dir.path().join("meta_model.txt").exists());
}

#[test]
fn missing_statistics_fail_before_persisting() {
    let dir = tempfile::tempdir().unwrap();
    let registry = MetaModelRegistry::new(RecordPaths::new(dir.path(), None));
    let pruner = CorrelationPruner::new(0.9, 4, 2);
    let empty = JsonCandidateStatistics::new();
    assert!(empty.candidates(Fold::new(1).unwrap(), Label::new(0).unwrap()).is_err());
    assert!(registry.select_or_load(&pruner, &empty).is_err());
    assert!(registry.load().unwrap().is_none());
}

#[test]
fn reports_list_models() {
    let dir = tempfile::tempdir().unwrap();
    let registry = MetaModelRegistry::new(RecordPaths::new(dir.path(), None));
    let pruner = CorrelationPruner::new(0.9, 3, 3);
    let selection = registry.select_or_load(&pruner, &statistics("m", 3)).unwrap();

    registry.write_inventory(&selection).unwrap();
    let inventory = std::fs::read_to_string(dir.path().join("statistics/meta_model_statis.txt")).unwrap();
    assert_eq!(inventory.lines().next(), Some("model_number: 195"));

    registry.write_rank_report(&selection, 2).unwrap();
    let rank = std::fs::read_to_string(dir.path().join("meta_model_rank.txt")).unwrap();
    assert_eq!(rank.lines().filter(|l| l.starts_with("val ")).count(), N_FOLDS);
}
