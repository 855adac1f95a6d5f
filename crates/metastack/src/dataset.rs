//! Stacked feature matrices for the second stage.
//!
//! A row of a stacked matrix is one image; its columns are the selected base
//! models' predicted probabilities, ordered by label ascending, then model
//! rank ascending. For a fold with `k` labels and `top_n` models per label
//! the matrix has `k * top_n` columns.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use ndarray::{concatenate, Array1, Array2, ArrayView2, Axis};

use crate::artifacts::{PredictionSource, Split};
use crate::config::MissingArtifactPolicy;
use crate::error::{Error, Result};
use crate::selection::MetaModelSelection;
use crate::types::{Fold, Label, ModelId, N_LABELS};
use crate::utils::read_json;

// =============================================================================
// Ground truth
// =============================================================================

/// Ground-truth label matrices (samples × 13, values 0/1).
///
/// Which samples belong to which fold is decided outside this crate.
pub trait FoldLabels: Send + Sync {
    /// Labels of the validation split of `fold`.
    fn fold_labels(&self, fold: Fold) -> Result<Array2<f32>>;

    /// Labels of the held-out test set.
    fn test_labels(&self) -> Result<Array2<f32>>;
}

/// Label matrices stored as `fold<k>.json` and `test.json` in one directory.
#[derive(Debug, Clone)]
pub struct JsonFoldLabels {
    dir: PathBuf,
}

impl JsonFoldLabels {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn read(&self, file: &str) -> Result<Array2<f32>> {
        let matrix: Array2<f32> = read_json(&self.dir.join(file))?;
        check_label_columns(file, &matrix)?;
        Ok(matrix)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl FoldLabels for JsonFoldLabels {
    fn fold_labels(&self, fold: Fold) -> Result<Array2<f32>> {
        self.read(&format!("fold{}.json", fold.number()))
    }

    fn test_labels(&self) -> Result<Array2<f32>> {
        self.read("test.json")
    }
}

pub(crate) fn check_label_columns(source_name: &str, matrix: &Array2<f32>) -> Result<()> {
    if matrix.ncols() != N_LABELS {
        return Err(Error::LabelMatrixShape {
            source_name: source_name.to_string(),
            columns: matrix.ncols(),
        });
    }
    Ok(())
}

// =============================================================================
// Datasets
// =============================================================================

/// Features with one binary target column.
#[derive(Debug, Clone, PartialEq)]
pub struct StackedDataset {
    pub features: Array2<f32>,
    pub targets: Array1<f32>,
}

impl StackedDataset {
    pub fn n_rows(&self) -> usize {
        self.features.nrows()
    }
}

/// Training rows from four folds and validation rows from the fifth.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainValSplit {
    pub train: StackedDataset,
    pub valid: StackedDataset,
}

/// Every fold's validation rows with the full label matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct FullDataset {
    pub features: Array2<f32>,
    pub labels: Array2<f32>,
}

/// A selected model whose artifact could not be found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingArtifact {
    pub fold: Fold,
    pub label: Label,
    pub model: ModelId,
}

// =============================================================================
// Builder
// =============================================================================

/// Reads each artifact once per build.
struct ArtifactCache {
    split: Split,
    loaded: HashMap<ModelId, Option<Array2<f32>>>,
}

impl ArtifactCache {
    fn new(split: Split) -> Self {
        Self {
            split,
            loaded: HashMap::new(),
        }
    }

    fn get(&mut self, store: &dyn PredictionSource, model: &ModelId) -> Result<Option<&Array2<f32>>> {
        if !self.loaded.contains_key(model) {
            let matrix = store.predictions(self.split, model)?;
            self.loaded.insert(model.clone(), matrix);
        }
        Ok(self.loaded.get(model).and_then(Option::as_ref))
    }
}

/// Assembles stacked matrices from a selection and a prediction source.
pub struct DatasetBuilder<'a> {
    selection: &'a MetaModelSelection,
    store: &'a dyn PredictionSource,
    labels: &'a dyn FoldLabels,
    policy: MissingArtifactPolicy,
}

impl<'a> DatasetBuilder<'a> {
    pub fn new(
        selection: &'a MetaModelSelection,
        store: &'a dyn PredictionSource,
        labels: &'a dyn FoldLabels,
        policy: MissingArtifactPolicy,
    ) -> Self {
        Self {
            selection,
            store,
            labels,
            policy,
        }
    }

    /// Number of feature columns for `n_labels` labels.
    pub fn n_columns(&self, n_labels: usize) -> usize {
        n_labels * self.selection.top_n()
    }

    /// Validation rows of `fold` against training rows of the other folds
    /// (ascending fold order), targeting `target`.
    ///
    /// `label_subset` restricts which labels' models contribute features;
    /// `None` uses all 13.
    pub fn build_train_val(
        &self,
        fold: Fold,
        target: Label,
        label_subset: Option<&[Label]>,
    ) -> Result<TrainValSplit> {
        let labels = normalize_labels(label_subset);
        let mut cache = ArtifactCache::new(Split::Validation);

        let mut train_x = Vec::with_capacity(4);
        let mut train_y = Vec::with_capacity(4);
        let mut valid = None;
        for f in Fold::all() {
            let truth = self.labels.fold_labels(f)?;
            check_label_columns(&format!("fold {f}"), &truth)?;
            let features = self.stack(f, &labels, Some(truth.nrows()), &mut cache)?;
            let targets = truth.column(target.index()).to_owned();
            if f == fold {
                valid = Some(StackedDataset { features, targets });
            } else {
                train_x.push(features);
                train_y.push(targets);
            }
        }

        let valid = valid.ok_or_else(|| Error::TrainingInput(format!("fold {fold} produced no rows")))?;
        let train_views: Vec<_> = train_x.iter().map(Array2::view).collect();
        let target_views: Vec<_> = train_y.iter().map(Array1::view).collect();
        let train = StackedDataset {
            features: vstack(&train_views)?,
            targets: concatenate(Axis(0), &target_views).map_err(shape_error)?,
        };
        Ok(TrainValSplit { train, valid })
    }

    /// One test feature matrix per fold's selection, or their element-wise
    /// mean when `average` is set.
    pub fn build_test(&self, average: bool) -> Result<Vec<Array2<f32>>> {
        let labels: Vec<Label> = Label::all().collect();
        let mut cache = ArtifactCache::new(Split::Test);
        let mut per_fold: Vec<Array2<f32>> = Vec::with_capacity(Fold::all().count());
        for fold in Fold::all() {
            let expected = per_fold.first().map(Array2::nrows);
            per_fold.push(self.stack(fold, &labels, expected, &mut cache)?);
        }

        if !average {
            return Ok(per_fold);
        }
        let n = per_fold.len() as f32;
        let mut mean = per_fold[0].clone();
        for other in &per_fold[1..] {
            mean += other;
        }
        mean /= n;
        tracing::info!(inputs = per_fold.len(), "averaged test features across folds");
        Ok(vec![mean])
    }

    /// All folds' validation rows stacked, with the matching label rows.
    pub fn build_full(&self) -> Result<FullDataset> {
        let labels: Vec<Label> = Label::all().collect();
        let mut cache = ArtifactCache::new(Split::Validation);
        let mut features = Vec::new();
        let mut truths = Vec::new();
        for fold in Fold::all() {
            let truth = self.labels.fold_labels(fold)?;
            check_label_columns(&format!("fold {fold}"), &truth)?;
            features.push(self.stack(fold, &labels, Some(truth.nrows()), &mut cache)?);
            truths.push(truth);
        }
        let feature_views: Vec<_> = features.iter().map(Array2::view).collect();
        let truth_views: Vec<_> = truths.iter().map(Array2::view).collect();
        Ok(FullDataset {
            features: vstack(&feature_views)?,
            labels: vstack(&truth_views)?,
        })
    }

    /// Every selected (fold, label, model) whose artifact is absent.
    pub fn missing_artifacts(&self, split: Split) -> Vec<MissingArtifact> {
        let mut missing = Vec::new();
        for fold in Fold::all() {
            for label in Label::all() {
                for model in self.selection.models(fold, label) {
                    if !self.store.exists(split, &model.id) {
                        tracing::warn!(
                            %split,
                            fold = fold.number(),
                            label = label.index(),
                            model = %model.id,
                            "missing prediction artifact"
                        );
                        missing.push(MissingArtifact {
                            fold,
                            label,
                            model: model.id.clone(),
                        });
                    }
                }
            }
        }
        missing
    }

    fn stack(
        &self,
        fold: Fold,
        labels: &[Label],
        expected_rows: Option<usize>,
        cache: &mut ArtifactCache,
    ) -> Result<Array2<f32>> {
        let mut columns: Vec<Option<Array1<f32>>> = Vec::with_capacity(self.n_columns(labels.len()));
        let mut rows = expected_rows;
        let mut first_missing: Option<(Label, ModelId)> = None;

        for &label in labels {
            for model in self.selection.models(fold, label) {
                let Some(matrix) = cache.get(self.store, &model.id)? else {
                    if self.policy == MissingArtifactPolicy::Fail {
                        return Err(Error::MissingArtifact {
                            fold,
                            label,
                            model: model.id.clone(),
                        });
                    }
                    tracing::warn!(
                        fold = fold.number(),
                        label = label.index(),
                        model = %model.id,
                        "missing prediction artifact, filling zeros"
                    );
                    first_missing.get_or_insert_with(|| (label, model.id.clone()));
                    columns.push(None);
                    continue;
                };

                if matrix.ncols() <= label.index() {
                    return Err(Error::ArtifactShape {
                        model: model.id.clone(),
                        label,
                        columns: matrix.ncols(),
                    });
                }
                match rows {
                    Some(expected) if expected != matrix.nrows() => {
                        return Err(Error::RowCountMismatch {
                            fold,
                            expected,
                            found: matrix.nrows(),
                        });
                    }
                    Some(_) => {}
                    None => rows = Some(matrix.nrows()),
                }
                columns.push(Some(matrix.column(label.index()).to_owned()));
            }
        }

        let expected_columns = self.n_columns(labels.len());
        if columns.len() != expected_columns {
            return Err(Error::ColumnCountMismatch {
                fold,
                expected: expected_columns,
                found: columns.len(),
            });
        }

        let n_rows = match (rows, first_missing) {
            (Some(n), _) => n,
            (None, Some((label, model))) => return Err(Error::MissingArtifact { fold, label, model }),
            (None, None) => 0,
        };
        let mut features = Array2::<f32>::zeros((n_rows, columns.len()));
        for (j, column) in columns.into_iter().enumerate() {
            if let Some(column) = column {
                features.column_mut(j).assign(&column);
            }
        }
        Ok(features)
    }
}

fn normalize_labels(subset: Option<&[Label]>) -> Vec<Label> {
    match subset {
        None => Label::all().collect(),
        Some(labels) => {
            let mut labels = labels.to_vec();
            labels.sort();
            labels.dedup();
            labels
        }
    }
}

fn vstack(parts: &[ArrayView2<f32>]) -> Result<Array2<f32>> {
    concatenate(Axis(0), parts).map_err(shape_error)
}

fn shape_error(e: ndarray::ShapeError) -> Error {
    Error::TrainingInput(format!("cannot stack folds: {e}"))
}
