//! Early stopping callback for training.
//!
//! Monitors a validation metric and stops training when no improvement is seen
//! for a specified number of rounds.

/// Early stopping configuration and state.
///
/// # Example
///
/// ```
/// use metastack::boosting::EarlyStopping;
///
/// // Lower is better (a loss)
/// let mut early_stop = EarlyStopping::new(2, false);
/// assert!(!early_stop.should_stop(0.5));
/// assert!(!early_stop.should_stop(0.6));
/// assert!(early_stop.should_stop(0.7));
/// assert_eq!(early_stop.best_round(), 0);
/// ```
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    /// Number of rounds without improvement before stopping.
    patience: usize,
    best_value: Option<f64>,
    best_round: usize,
    current_round: usize,
    higher_is_better: bool,
}

impl EarlyStopping {
    pub fn new(patience: usize, higher_is_better: bool) -> Self {
        Self {
            patience,
            best_value: None,
            best_round: 0,
            current_round: 0,
            higher_is_better,
        }
    }

    /// Record the metric of the current round.
    ///
    /// Returns `true` once `patience` rounds have passed without strict
    /// improvement; ties keep the earlier round.
    pub fn should_stop(&mut self, value: f64) -> bool {
        let is_improvement = match self.best_value {
            None => true,
            Some(best) if self.higher_is_better => value > best,
            Some(best) => value < best,
        };

        if is_improvement {
            self.best_value = Some(value);
            self.best_round = self.current_round;
        }

        self.current_round += 1;
        self.current_round - self.best_round > self.patience
    }

    pub fn best_value(&self) -> Option<f64> {
        self.best_value
    }

    /// 0-based round at which the best value was observed.
    pub fn best_round(&self) -> usize {
        self.best_round
    }

    pub fn current_round(&self) -> usize {
        self.current_round
    }
}
