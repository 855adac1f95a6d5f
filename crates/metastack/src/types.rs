//! Domain identifiers: folds, labels, base models.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Number of cross-validation folds.
pub const N_FOLDS: usize = 5;

/// Number of independent binary target labels.
pub const N_LABELS: usize = 13;

// =============================================================================
// Fold
// =============================================================================

/// One of the five cross-validation partitions, numbered `1..=5`.
///
/// The assignment of samples to folds is external; this type only names a
/// partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Fold(u8);

impl Fold {
    /// Create a fold from its 1-based number.
    pub fn new(number: usize) -> Result<Self, ConfigError> {
        if (1..=N_FOLDS).contains(&number) {
            Ok(Self(number as u8))
        } else {
            Err(ConfigError::FoldOutOfRange(number))
        }
    }

    /// All folds in ascending order.
    pub fn all() -> impl Iterator<Item = Fold> + Clone {
        (1..=N_FOLDS as u8).map(Fold)
    }

    /// 1-based fold number, as used in file names.
    #[inline]
    pub fn number(self) -> usize {
        self.0 as usize
    }

    /// 0-based position, for indexing per-fold arrays.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize - 1
    }
}

impl TryFrom<u8> for Fold {
    type Error = ConfigError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value as usize)
    }
}

impl From<Fold> for u8 {
    fn from(fold: Fold) -> Self {
        fold.0
    }
}

impl fmt::Display for Fold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Label
// =============================================================================

/// One of the thirteen binary target classes, numbered `0..13`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Label(u8);

impl Label {
    pub fn new(index: usize) -> Result<Self, ConfigError> {
        if index < N_LABELS {
            Ok(Self(index as u8))
        } else {
            Err(ConfigError::LabelOutOfRange(index))
        }
    }

    /// All labels in ascending order.
    pub fn all() -> impl Iterator<Item = Label> + Clone {
        (0..N_LABELS as u8).map(Label)
    }

    /// Column index of this label in a prediction matrix.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl TryFrom<u8> for Label {
    type Error = ConfigError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value as usize)
    }
}

impl From<Label> for u8 {
    fn from(label: Label) -> Self {
        label.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// ModelId
// =============================================================================

/// Stable identifier of one trained base classifier (one epoch of one run).
///
/// Assigned when the model is registered and independent of where its
/// weights or predictions live on disk.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelId(String);

impl ModelId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File-name-safe form: path separators flattened into `-`.
    pub fn artifact_name(&self) -> String {
        self.0.replace(['/', '\\'], "-")
    }

    /// Text before the first `.`, shared by all epochs of one run.
    pub fn stem(&self) -> &str {
        self.0.split('.').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModelId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

// =============================================================================
// BaseModelDescriptor
// =============================================================================

/// A base model together with its validation F-beta for one label.
///
/// Serialized as the pair `[id, score]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "(ModelId, f64)", into = "(ModelId, f64)")]
pub struct BaseModelDescriptor {
    pub id: ModelId,
    pub score: f64,
}

impl BaseModelDescriptor {
    pub fn new(id: impl Into<ModelId>, score: f64) -> Self {
        Self {
            id: id.into(),
            score,
        }
    }
}

impl From<(ModelId, f64)> for BaseModelDescriptor {
    fn from((id, score): (ModelId, f64)) -> Self {
        Self { id, score }
    }
}

impl From<BaseModelDescriptor> for (ModelId, f64) {
    fn from(d: BaseModelDescriptor) -> Self {
        (d.id, d.score)
    }
}
