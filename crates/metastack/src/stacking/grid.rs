//! Hyperparameter grid for the second stage.

use serde::{Deserialize, Serialize};

use crate::boosting::BoosterParams;
use crate::error::ConfigError;

/// Candidate values for each searched hyperparameter.
///
/// Missing lists take the single default value (`eta 0.3`, `max_depth 6`,
/// `min_child_weight 1`); an explicitly empty list is a configuration error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParamGrid {
    pub eta: Vec<f32>,
    pub max_depth: Vec<u32>,
    pub min_child_weight: Vec<f32>,
}

impl Default for ParamGrid {
    fn default() -> Self {
        Self {
            eta: vec![0.3],
            max_depth: vec![6],
            min_child_weight: vec![1.0],
        }
    }
}

/// One point of a [`ParamGrid`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridPoint {
    pub eta: f32,
    pub max_depth: u32,
    pub min_child_weight: f32,
}

impl GridPoint {
    /// Booster parameters for this point on top of the fixed ones in `base`.
    pub fn apply(&self, base: &BoosterParams) -> BoosterParams {
        BoosterParams {
            eta: self.eta,
            max_depth: self.max_depth,
            min_child_weight: self.min_child_weight,
            ..base.clone()
        }
    }
}

impl ParamGrid {
    pub fn new(eta: Vec<f32>, max_depth: Vec<u32>, min_child_weight: Vec<f32>) -> Self {
        Self {
            eta,
            max_depth,
            min_child_weight,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.eta.is_empty() {
            return Err(ConfigError::MissingHyperparameter("eta"));
        }
        if self.max_depth.is_empty() {
            return Err(ConfigError::MissingHyperparameter("max_depth"));
        }
        if self.min_child_weight.is_empty() {
            return Err(ConfigError::MissingHyperparameter("min_child_weight"));
        }
        if let Some(&eta) = self.eta.iter().find(|&&e| !(e > 0.0)) {
            return Err(ConfigError::NonPositive {
                field: "eta",
                value: f64::from(eta),
            });
        }
        if self.max_depth.contains(&0) {
            return Err(ConfigError::NonPositive {
                field: "max_depth",
                value: 0.0,
            });
        }
        if let Some(&w) = self.min_child_weight.iter().find(|&&w| !(w >= 0.0)) {
            return Err(ConfigError::NonPositive {
                field: "min_child_weight",
                value: f64::from(w),
            });
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.eta.len() * self.max_depth.len() * self.min_child_weight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cartesian product, `eta` outermost and `min_child_weight` innermost.
    pub fn points(&self) -> impl Iterator<Item = GridPoint> + '_ {
        self.eta.iter().flat_map(move |&eta| {
            self.max_depth.iter().flat_map(move |&max_depth| {
                self.min_child_weight.iter().map(move |&min_child_weight| GridPoint {
                    eta,
                    max_depth,
                    min_child_weight,
                })
            })
        })
    }
}
