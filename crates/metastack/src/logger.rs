//! Verbosity-gated training logger.
//!
//! Emits `tracing` events; the subscriber (installed by the binary or the
//! embedding application) decides where they go.

use serde::{Deserialize, Serialize};

use crate::boosting::MetricValue;

/// Amount of training output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verbosity {
    /// No output.
    Silent,
    /// Errors and warnings only.
    Warning,
    /// Progress and important information.
    #[default]
    Info,
    /// Per-round details.
    Debug,
}

/// Logger for one boosting run or grid search.
#[derive(Debug, Clone)]
pub struct TrainingLogger {
    verbosity: Verbosity,
    context: String,
}

impl TrainingLogger {
    pub fn new(verbosity: Verbosity) -> Self {
        Self {
            verbosity,
            context: String::new(),
        }
    }

    /// Attach a context string (e.g. the booster name) to every event.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    pub fn start_training(&self, n_rounds: usize) {
        if self.verbosity >= Verbosity::Debug {
            tracing::debug!(context = %self.context, n_rounds, "starting boosting");
        }
    }

    pub fn log_metrics(&self, round: usize, metrics: &[MetricValue]) {
        if self.verbosity >= Verbosity::Debug && !metrics.is_empty() {
            let line = metrics
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("\t");
            tracing::debug!(context = %self.context, round, "{line}");
        }
    }

    pub fn log_early_stopping(&self, round: usize, best_round: usize, metric: &str) {
        if self.verbosity >= Verbosity::Info {
            tracing::info!(
                context = %self.context,
                round,
                best_round,
                metric,
                "early stopping: no improvement since best round"
            );
        }
    }

    pub fn finish_training(&self, n_trees: usize) {
        if self.verbosity >= Verbosity::Debug {
            tracing::debug!(context = %self.context, n_trees, "boosting finished");
        }
    }

    pub fn info(&self, message: &str) {
        if self.verbosity >= Verbosity::Info {
            tracing::info!(context = %self.context, "{message}");
        }
    }

    pub fn warn(&self, message: &str) {
        if self.verbosity >= Verbosity::Warning {
            tracing::warn!(context = %self.context, "{message}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_ordering() {
        assert!(Verbosity::Debug > Verbosity::Info);
        assert!(Verbosity::Warning > Verbosity::Silent);
        assert_eq!(Verbosity::default(), Verbosity::Info);
    }

    #[test]
    fn verbosity_serde_names() {
        assert_eq!(serde_json::to_string(&Verbosity::Silent).unwrap(), "\"silent\"");
        let v: Verbosity = serde_json::from_str("\"debug\"").unwrap();
        assert_eq!(v, Verbosity::Debug);
    }
}
