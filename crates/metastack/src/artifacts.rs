//! Read access to saved base-model predictions.
//!
//! A prediction artifact is a samples × labels matrix produced by one base
//! model, either on its fold's validation split or on the test set.

use std::fmt;
use std::path::{Path, PathBuf};

use ndarray::Array2;

use crate::error::Result;
use crate::types::ModelId;
use crate::utils::{read_json_opt, write_json_atomic};

/// Which predictions of a base model to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Split {
    /// The validation split of the model's own fold.
    Validation,
    /// The full test set.
    Test,
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Split::Validation => f.write_str("validation"),
            Split::Test => f.write_str("test"),
        }
    }
}

/// Source of base-model prediction matrices.
///
/// Returns `Ok(None)` when a model has no artifact; how that is handled is
/// up to the caller.
pub trait PredictionSource: Send + Sync {
    fn predictions(&self, split: Split, model: &ModelId) -> Result<Option<Array2<f32>>>;

    /// Whether an artifact exists, without necessarily reading it.
    fn exists(&self, split: Split, model: &ModelId) -> bool {
        matches!(self.predictions(split, model), Ok(Some(_)))
    }

    fn validation(&self, model: &ModelId) -> Result<Option<Array2<f32>>> {
        self.predictions(Split::Validation, model)
    }

    fn test(&self, model: &ModelId) -> Result<Option<Array2<f32>>> {
        self.predictions(Split::Test, model)
    }
}

/// Artifacts stored as `<dir>/<artifact_name>.json`.
#[derive(Debug, Clone)]
pub struct FsPredictionStore {
    validation_dir: PathBuf,
    test_dir: PathBuf,
}

impl FsPredictionStore {
    pub fn new(validation_dir: impl Into<PathBuf>, test_dir: impl Into<PathBuf>) -> Self {
        Self {
            validation_dir: validation_dir.into(),
            test_dir: test_dir.into(),
        }
    }

    /// `<root>/validation` and `<root>/test`.
    pub fn under(root: &Path) -> Self {
        Self::new(root.join("validation"), root.join("test"))
    }

    pub fn path(&self, split: Split, model: &ModelId) -> PathBuf {
        let dir = match split {
            Split::Validation => &self.validation_dir,
            Split::Test => &self.test_dir,
        };
        dir.join(format!("{}.json", model.artifact_name()))
    }

    pub fn write(&self, split: Split, model: &ModelId, predictions: &Array2<f32>) -> Result<()> {
        write_json_atomic(&self.path(split, model), predictions)
    }
}

impl PredictionSource for FsPredictionStore {
    fn predictions(&self, split: Split, model: &ModelId) -> Result<Option<Array2<f32>>> {
        read_json_opt(&self.path(split, model))
    }

    fn exists(&self, split: Split, model: &ModelId) -> bool {
        self.path(split, model).exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn flattened_file_names() {
        let store = FsPredictionStore::new("val", "test");
        let id = ModelId::new("model/inceptionv3/model13_val1.e5");
        assert_eq!(
            store.path(Split::Validation, &id),
            PathBuf::from("val/model-inceptionv3-model13_val1.e5.json")
        );
    }

    #[test]
    fn write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsPredictionStore::under(dir.path());
        let id = ModelId::new("m.e1");
        let preds = array![[0.1f32, 0.9], [0.4, 0.25]];
        store.write(Split::Test, &id, &preds).unwrap();

        assert!(store.exists(Split::Test, &id));
        assert!(!store.exists(Split::Validation, &id));
        assert_eq!(store.test(&id).unwrap(), Some(preds));
        assert_eq!(store.validation(&id).unwrap(), None);
    }
}
