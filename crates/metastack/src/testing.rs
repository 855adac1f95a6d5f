//! Testing utilities for metastack.
//!
//! In-memory implementations of the external collaborators and seeded
//! synthetic data, shared by unit tests and integration tests.
//!
//! ```
//! use metastack::testing::SyntheticWorld;
//!
//! let world = SyntheticWorld::generate(&[6, 6, 6, 6, 6], 8, 3, 2, 7);
//! assert_eq!(world.catalog.len(), 5 * 3 * 2);
//! ```

use std::collections::{BTreeMap, HashMap};

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::artifacts::{PredictionSource, Split};
use crate::catalog::{ModelCatalog, ModelSpec, Preprocessing};
use crate::dataset::FoldLabels;
use crate::error::{Error, Result};
use crate::selection::MetaModelSelection;
use crate::types::{BaseModelDescriptor, Fold, Label, ModelId, N_FOLDS, N_LABELS};

/// Default tolerance for comparing probabilities.
pub const DEFAULT_TOLERANCE: f64 = 1e-5;

// =============================================================================
// In-memory collaborators
// =============================================================================

/// Prediction artifacts held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    artifacts: HashMap<(Split, ModelId), Array2<f32>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, split: Split, model: &ModelId, predictions: Array2<f32>) {
        self.artifacts.insert((split, model.clone()), predictions);
    }

    pub fn remove(&mut self, split: Split, model: &ModelId) -> Option<Array2<f32>> {
        self.artifacts.remove(&(split, model.clone()))
    }

    /// Noisy predictions for every model of `selection`: validation rows
    /// follow the model's fold, test rows follow the test labels.
    pub fn for_selection(selection: &MetaModelSelection, labels: &dyn FoldLabels, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut store = Self::new();
        let test = labels.test_labels().unwrap_or_else(|_| Array2::zeros((0, N_LABELS)));
        for fold in Fold::all() {
            let truth = labels
                .fold_labels(fold)
                .unwrap_or_else(|_| Array2::zeros((0, N_LABELS)));
            for label in Label::all() {
                for model in selection.models(fold, label) {
                    let noise = rng.gen_range(0.1..0.4);
                    store.insert(Split::Validation, &model.id, noisy_predictions(&truth, noise, &mut rng));
                    store.insert(Split::Test, &model.id, noisy_predictions(&test, noise, &mut rng));
                }
            }
        }
        store
    }
}

impl PredictionSource for InMemoryStore {
    fn predictions(&self, split: Split, model: &ModelId) -> Result<Option<Array2<f32>>> {
        Ok(self.artifacts.get(&(split, model.clone())).cloned())
    }

    fn exists(&self, split: Split, model: &ModelId) -> bool {
        self.artifacts.contains_key(&(split, model.clone()))
    }
}

/// Ground-truth matrices held in memory.
#[derive(Debug, Clone)]
pub struct InMemoryLabels {
    folds: Vec<Array2<f32>>,
    test: Array2<f32>,
}

impl InMemoryLabels {
    pub fn new(folds: Vec<Array2<f32>>, test: Array2<f32>) -> Self {
        Self { folds, test }
    }

    /// Random labels with a 30% positive rate; every label has at least one
    /// positive and one negative per fold when the fold has two rows or more.
    pub fn synthetic(fold_sizes: &[usize], test_rows: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let folds = fold_sizes.iter().map(|&n| random_labels(n, 0.3, &mut rng)).collect();
        let test = random_labels(test_rows, 0.3, &mut rng);
        Self { folds, test }
    }
}

impl FoldLabels for InMemoryLabels {
    fn fold_labels(&self, fold: Fold) -> Result<Array2<f32>> {
        self.folds
            .get(fold.index())
            .cloned()
            .ok_or_else(|| Error::TrainingInput(format!("no labels for fold {fold}")))
    }

    fn test_labels(&self) -> Result<Array2<f32>> {
        Ok(self.test.clone())
    }
}

// =============================================================================
// Generators
// =============================================================================

/// `rows × 13` binary matrix with roughly `positive_rate` ones.
pub fn random_labels(rows: usize, positive_rate: f64, rng: &mut impl Rng) -> Array2<f32> {
    let mut labels = Array2::from_shape_fn((rows, N_LABELS), |_| {
        if rng.gen_bool(positive_rate) { 1.0 } else { 0.0 }
    });
    if rows >= 2 {
        for mut column in labels.columns_mut() {
            column[0] = 1.0;
            column[1] = 0.0;
        }
    }
    labels
}

/// Probabilities that lean toward `truth`, perturbed by uniform noise of
/// amplitude `noise`.
pub fn noisy_predictions(truth: &Array2<f32>, noise: f32, rng: &mut impl Rng) -> Array2<f32> {
    truth.mapv(|y| (0.6 * y + 0.2 + rng.gen_range(-noise..=noise)).clamp(0.0, 1.0))
}

/// A valid selection whose models are unique per (fold, label, rank):
/// `f<fold>_l<label>_r<rank>.e1`.
pub fn synthetic_selection(top_n: usize) -> MetaModelSelection {
    let mut slots = BTreeMap::new();
    for fold in Fold::all() {
        for label in Label::all() {
            let models = (0..top_n)
                .map(|rank| {
                    BaseModelDescriptor::new(
                        format!("f{fold}_l{label}_r{rank}.e1").as_str(),
                        0.9 - rank as f64 * 0.05,
                    )
                })
                .collect();
            slots.insert((fold, label), models);
        }
    }
    match MetaModelSelection::new(slots) {
        Ok(selection) => selection,
        Err(e) => panic!("synthetic selection is malformed: {e}"),
    }
}

/// A complete set of collaborators for pipeline tests.
///
/// Each fold has `runs` independent training runs with `epochs` epochs each.
/// Epochs of one run share most of their noise, so they are strongly
/// correlated; different runs are not.
pub struct SyntheticWorld {
    pub catalog: ModelCatalog,
    pub store: InMemoryStore,
    pub labels: InMemoryLabels,
}

impl SyntheticWorld {
    pub fn generate(fold_sizes: &[usize], test_rows: usize, runs: usize, epochs: usize, seed: u64) -> Self {
        assert_eq!(fold_sizes.len(), N_FOLDS, "one size per fold");
        let labels = InMemoryLabels::synthetic(fold_sizes, test_rows, seed);
        let mut rng = StdRng::seed_from_u64(seed.wrapping_add(1));
        let mut catalog = ModelCatalog::new();
        let mut store = InMemoryStore::new();

        for fold in Fold::all() {
            let truth = &labels.folds[fold.index()];
            for run in 0..runs {
                let amplitude = 0.3 + 0.05 * run as f32;
                let shared_val = uniform_noise(truth.dim(), &mut rng);
                let shared_test = uniform_noise(labels.test.dim(), &mut rng);
                for epoch in 0..epochs {
                    let id = ModelId::new(format!("run{run}_val{}.e{}", fold.number(), epoch + 1));
                    let val = blend(truth, &shared_val, amplitude, &mut rng);
                    let test = blend(&labels.test, &shared_test, amplitude, &mut rng);
                    store.insert(Split::Validation, &id, val);
                    store.insert(Split::Test, &id, test);
                    let spec = ModelSpec {
                        id,
                        architecture: format!("arch{run}"),
                        resolution: 224,
                        fold,
                        labels: Label::all().collect(),
                        preprocessing: vec![if run % 2 == 0 {
                            Preprocessing::Original
                        } else {
                            Preprocessing::Segmented
                        }],
                        label_thresholds: vec![0.5; N_LABELS],
                    };
                    if let Err(e) = catalog.register(spec) {
                        panic!("synthetic catalog entry rejected: {e}");
                    }
                }
            }
        }
        Self { catalog, store, labels }
    }
}

fn uniform_noise(dim: (usize, usize), rng: &mut impl Rng) -> Array2<f32> {
    Array2::from_shape_fn(dim, |_| rng.gen_range(-1.0f32..=1.0))
}

fn blend(truth: &Array2<f32>, shared: &Array2<f32>, amplitude: f32, rng: &mut impl Rng) -> Array2<f32> {
    let mut out = truth.clone();
    for ((o, &y), &s) in out.iter_mut().zip(truth.iter()).zip(shared.iter()) {
        let own: f32 = rng.gen_range(-1.0..=1.0);
        *o = (0.6 * y + 0.2 + amplitude * (0.95 * s + 0.05 * own)).clamp(0.0, 1.0);
    }
    out
}
