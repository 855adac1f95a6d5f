//! Logistic objective for binary second-stage targets.

/// Logistic loss (binary cross-entropy) on log-odds outputs.
///
/// - Gradient: `σ(pred) - y`
/// - Hessian: `σ(pred) * (1 - σ(pred))`, floored at `1e-6`
#[derive(Debug, Clone, Copy, Default)]
pub struct LogisticLoss;

impl LogisticLoss {
    const HESS_MIN: f32 = 1e-6;

    #[inline]
    pub fn sigmoid(x: f32) -> f32 {
        1.0 / (1.0 + (-x).exp())
    }

    /// Fill `gradients` and `hessians` from current margins.
    pub fn compute_gradients(
        &self,
        margins: &[f32],
        targets: &[f32],
        gradients: &mut [f32],
        hessians: &mut [f32],
    ) {
        debug_assert_eq!(margins.len(), targets.len());
        debug_assert_eq!(margins.len(), gradients.len());
        debug_assert_eq!(margins.len(), hessians.len());

        for (i, (&m, &t)) in margins.iter().zip(targets).enumerate() {
            let p = Self::sigmoid(m);
            gradients[i] = p - t;
            hessians[i] = (p * (1.0 - p)).max(Self::HESS_MIN);
        }
    }

    /// Log-odds of the positive rate, clamped away from 0 and 1.
    pub fn base_score(&self, targets: &[f32]) -> f32 {
        if targets.is_empty() {
            return 0.0;
        }
        let positive: f64 = targets.iter().map(|&t| f64::from(t)).sum();
        let p = (positive / targets.len() as f64).clamp(1e-7, 1.0 - 1e-7);
        (p / (1.0 - p)).ln() as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn gradients_at_zero_margin() {
        let mut g = [0.0f32; 2];
        let mut h = [0.0f32; 2];
        LogisticLoss.compute_gradients(&[0.0, 0.0], &[1.0, 0.0], &mut g, &mut h);
        assert_abs_diff_eq!(g[0], -0.5);
        assert_abs_diff_eq!(g[1], 0.5);
        assert_abs_diff_eq!(h[0], 0.25);
    }

    #[test]
    fn base_score_is_log_odds() {
        assert_abs_diff_eq!(LogisticLoss.base_score(&[1.0, 0.0]), 0.0);
        assert!(LogisticLoss.base_score(&[1.0, 1.0, 1.0, 0.0]) > 0.0);
        assert!(LogisticLoss.base_score(&[0.0, 0.0]).is_finite());
    }
}
