//! Ranked candidate lists and their prediction correlations.

use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::types::BaseModelDescriptor;

// =============================================================================
// CorrelationMatrix
// =============================================================================

const SYMMETRY_TOLERANCE: f64 = 1e-9;

/// Square, symmetric matrix of pairwise prediction correlations for one
/// (fold, label), indexed in candidate rank order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Array2<f64>", into = "Array2<f64>")]
pub struct CorrelationMatrix(Array2<f64>);

impl CorrelationMatrix {
    /// Wrap an existing matrix; it must be square and symmetric with entries
    /// in `[-1, 1]`.
    pub fn new(values: Array2<f64>) -> Result<Self, Error> {
        let (rows, cols) = values.dim();
        if rows != cols {
            return Err(Error::SelectionShape(format!(
                "correlation matrix is {rows}x{cols}, expected square"
            )));
        }
        // Pearson estimates may overshoot by rounding.
        if let Some(v) = values.iter().find(|v| !(-1.0 - 1e-9..=1.0 + 1e-9).contains(*v)) {
            return Err(Error::SelectionShape(format!("correlation {v} outside [-1, 1]")));
        }
        for i in 0..rows {
            for j in (i + 1)..rows {
                let (upper, lower) = (values[[i, j]], values[[j, i]]);
                if (upper - lower).abs() > SYMMETRY_TOLERANCE {
                    return Err(Error::SelectionShape(format!(
                        "correlation matrix is not symmetric at ({i}, {j}): {upper} vs {lower}"
                    )));
                }
            }
        }
        Ok(Self(values))
    }

    /// Pearson correlation of every pair of prediction columns.
    ///
    /// A constant column is uncorrelated with everything but itself.
    pub fn from_columns(columns: &[ArrayView1<f32>]) -> Self {
        let n = columns.len();
        let centered: Vec<(Array1<f64>, f64)> = columns
            .iter()
            .map(|c| {
                let values = c.mapv(f64::from);
                let mean = values.mean().unwrap_or(0.0);
                let centered = values - mean;
                let norm = centered.dot(&centered).sqrt();
                (centered, norm)
            })
            .collect();

        let mut corr = Array2::<f64>::eye(n);
        for i in 0..n {
            for j in (i + 1)..n {
                let (a, na) = &centered[i];
                let (b, nb) = &centered[j];
                let r = if *na > 0.0 && *nb > 0.0 && a.len() == b.len() {
                    (a.dot(b) / (na * nb)).clamp(-1.0, 1.0)
                } else {
                    0.0
                };
                corr[[i, j]] = r;
                corr[[j, i]] = r;
            }
        }
        Self(corr)
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.0[[i, j]]
    }

    /// Number of candidates covered.
    pub fn dim(&self) -> usize {
        self.0.nrows()
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.0
    }
}

impl TryFrom<Array2<f64>> for CorrelationMatrix {
    type Error = Error;

    fn try_from(values: Array2<f64>) -> Result<Self, Self::Error> {
        Self::new(values)
    }
}

impl From<CorrelationMatrix> for Array2<f64> {
    fn from(m: CorrelationMatrix) -> Self {
        m.0
    }
}

// =============================================================================
// RankedCandidates
// =============================================================================

/// Candidate base models for one (fold, label), best first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedCandidates {
    pub models: Vec<BaseModelDescriptor>,
    pub correlation: CorrelationMatrix,
}

impl RankedCandidates {
    pub fn new(models: Vec<BaseModelDescriptor>, correlation: CorrelationMatrix) -> Self {
        Self { models, correlation }
    }

    /// Sort scored prediction columns by descending score (stable) and
    /// correlate the first `search` of them.
    pub fn rank(mut scored: Vec<(BaseModelDescriptor, Array1<f32>)>, search: usize) -> Self {
        scored.sort_by(|a, b| b.0.score.total_cmp(&a.0.score));
        let window = search.min(scored.len());
        let columns: Vec<ArrayView1<f32>> = scored[..window].iter().map(|(_, c)| c.view()).collect();
        let correlation = CorrelationMatrix::from_columns(&columns);
        Self {
            models: scored.into_iter().map(|(d, _)| d).collect(),
            correlation,
        }
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}
