//! Explicit registry of base models.
//!
//! Every base model that may appear in a selection is registered here with
//! its configuration record. Lookups go through [`ModelId`]; nothing is
//! resolved from file paths at runtime.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{Fold, Label, ModelId, N_LABELS};
use crate::utils::{read_json, write_json_atomic};

/// Image preprocessing a base model was trained on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preprocessing {
    Original,
    Segmented,
}

/// Configuration record of one base model (one epoch of one training run).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub id: ModelId,
    /// Architecture tag, e.g. `"inception_v3"`.
    pub architecture: String,
    /// Square input resolution in pixels.
    pub resolution: u32,
    /// Fold whose training split produced this model.
    pub fold: Fold,
    /// Labels the model was trained to predict.
    pub labels: Vec<Label>,
    pub preprocessing: Vec<Preprocessing>,
    /// Per-label decision thresholds of the selected epoch.
    pub label_thresholds: Vec<f64>,
}

impl ModelSpec {
    /// Decision threshold for `label`.
    pub fn threshold(&self, label: Label) -> f64 {
        self.label_thresholds[label.index()]
    }

    pub fn uses(&self, preprocessing: Preprocessing) -> bool {
        self.preprocessing.contains(&preprocessing)
    }

    fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Error::InvalidCatalogEntry {
            model: self.id.clone(),
            reason,
        };
        if self.label_thresholds.len() != N_LABELS {
            return Err(invalid(format!(
                "{} label thresholds, expected {N_LABELS}",
                self.label_thresholds.len()
            )));
        }
        if let Some(t) = self.label_thresholds.iter().find(|t| !(0.0..=1.0).contains(*t)) {
            return Err(invalid(format!("threshold {t} outside [0, 1]")));
        }
        if self.preprocessing.is_empty() {
            return Err(invalid("no preprocessing variant".into()));
        }
        Ok(())
    }
}

/// All registered base models, keyed by identifier.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelCatalog {
    models: BTreeMap<ModelId, ModelSpec>,
}

impl ModelCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model; identifiers must be unique.
    pub fn register(&mut self, spec: ModelSpec) -> Result<()> {
        spec.validate()?;
        if self.models.contains_key(&spec.id) {
            return Err(Error::DuplicateModel(spec.id));
        }
        self.models.insert(spec.id.clone(), spec);
        Ok(())
    }

    pub fn get(&self, id: &ModelId) -> Result<&ModelSpec> {
        self.models.get(id).ok_or_else(|| Error::UnknownModel(id.clone()))
    }

    pub fn contains(&self, id: &ModelId) -> bool {
        self.models.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.values()
    }

    /// Models trained on `fold` that predict `label`.
    pub fn candidates(&self, fold: Fold, label: Label) -> impl Iterator<Item = &ModelSpec> {
        self.models
            .values()
            .filter(move |m| m.fold == fold && m.labels.contains(&label))
    }

    /// Models that consume the segmented image variant.
    pub fn segmented_models(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.values().filter(|m| m.uses(Preprocessing::Segmented))
    }

    /// Load `catalog.json`: a list of [`ModelSpec`].
    pub fn load(path: &Path) -> Result<Self> {
        let specs: Vec<ModelSpec> = read_json(path)?;
        let mut catalog = Self::new();
        for spec in specs {
            catalog.register(spec)?;
        }
        tracing::debug!(path = %path.display(), models = catalog.len(), "loaded model catalog");
        Ok(catalog)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let specs: Vec<&ModelSpec> = self.models.values().collect();
        write_json_atomic(path, &specs)
    }
}
