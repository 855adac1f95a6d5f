//! Correlation pruning of ranked candidates.

use crate::config::EnsembleConfig;
use crate::error::{Error, Result};
use crate::types::{BaseModelDescriptor, Fold, Label};

use super::candidates::RankedCandidates;

/// Keeps the `top_n` best-ranked candidates after dropping near-duplicates.
///
/// Within the first `search` candidates, every non-excluded model `i`
/// excludes each other model `j` whose correlation with it exceeds
/// `corr_threshold`. Since models are visited in rank order, the better
/// model of a correlated pair is the one kept.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrelationPruner {
    pub corr_threshold: f64,
    pub search: usize,
    pub top_n: usize,
}

impl CorrelationPruner {
    pub fn new(corr_threshold: f64, search: usize, top_n: usize) -> Self {
        Self {
            corr_threshold,
            search,
            top_n,
        }
    }

    pub fn from_config(config: &EnsembleConfig) -> Self {
        Self::new(config.corr_threshold, config.search, config.top_n)
    }

    /// Select exactly `top_n` survivors, in rank order.
    ///
    /// # Errors
    ///
    /// - [`Error::UnrankedCandidates`] if scores increase anywhere in the list
    /// - [`Error::CorrelationShape`] if the matrix does not cover the search window
    /// - [`Error::InsufficientSurvivors`] if fewer than `top_n` remain
    pub fn select(
        &self,
        fold: Fold,
        label: Label,
        candidates: &RankedCandidates,
    ) -> Result<Vec<BaseModelDescriptor>> {
        let models = &candidates.models;
        if let Some(position) = models
            .windows(2)
            .position(|w| w[1].score > w[0].score)
        {
            return Err(Error::UnrankedCandidates {
                fold,
                label,
                position: position + 1,
            });
        }

        let window = self.search.min(models.len());
        let corr = &candidates.correlation;
        if corr.dim() < window {
            return Err(Error::CorrelationShape {
                fold,
                label,
                expected: window,
                got: corr.dim(),
            });
        }

        let mut excluded = vec![false; models.len()];
        for i in 0..window {
            for j in 0..window {
                let c = corr.get(i, j);
                if i != j && !excluded[i] && c > self.corr_threshold {
                    if !excluded[j] {
                        tracing::info!(
                            fold = fold.number(),
                            label = label.index(),
                            corr = c,
                            kept = %models[i].id,
                            excluded = %models[j].id,
                            "pruned correlated model"
                        );
                    }
                    excluded[j] = true;
                }
            }
        }

        let survivors: Vec<BaseModelDescriptor> = models
            .iter()
            .zip(&excluded)
            .filter(|(_, excluded)| !**excluded)
            .map(|(m, _)| m.clone())
            .take(self.top_n)
            .collect();

        if survivors.len() != self.top_n {
            return Err(Error::InsufficientSurvivors {
                fold,
                label,
                found: survivors.len(),
                top_n: self.top_n,
            });
        }
        Ok(survivors)
    }
}
