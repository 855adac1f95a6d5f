//! Meta-model selection.
//!
//! - [`CorrelationPruner`] - keeps `top_n` diverse models per (fold, label)
//! - [`CandidateStatistics`] - where ranked candidates come from
//! - [`MetaModelRegistry`] - persists the selection and reloads it on later runs

mod candidates;
mod pruner;
mod registry;
mod statistics;

pub use candidates::{CorrelationMatrix, RankedCandidates};
pub use pruner::CorrelationPruner;
pub use registry::{MetaModelRegistry, MetaModelSelection};
pub use statistics::{CandidateStatistics, JsonCandidateStatistics, PredictionStatistics};
