//! Differentiable F-beta surrogate.

use ndarray::ArrayView1;

use super::{check_beta, MetricError};

const EPS: f64 = 1e-7;

/// Smooth F-beta: precision and recall computed from raw scores instead of
/// thresholded decisions.
///
/// ```text
/// tp = Σ y·s,  precision = tp / (Σ s + ε),  recall = tp / (Σ y + ε)
/// f  = (1 + β²)·precision·recall / (β²·precision + recall + ε)
/// ```
///
/// Useful as an optimization-friendly proxy; reports use [`fbeta`](super::fbeta).
pub fn smooth_fbeta(y_true: ArrayView1<f32>, y_score: ArrayView1<f32>, beta: f64) -> Result<f64, MetricError> {
    check_beta(beta)?;
    if y_true.len() != y_score.len() {
        return Err(MetricError::LengthMismatch {
            truth: y_true.len(),
            predicted: y_score.len(),
        });
    }
    if y_true.is_empty() {
        return Err(MetricError::Empty);
    }

    let (tp, score_sum, truth_sum) = y_true.iter().zip(y_score.iter()).fold(
        (0.0f64, 0.0f64, 0.0f64),
        |(tp, ss, ts), (&t, &s)| {
            let (t, s) = (f64::from(t), f64::from(s));
            (tp + t * s, ss + s, ts + t)
        },
    );

    let precision = tp / (score_sum + EPS);
    let recall = tp / (truth_sum + EPS);
    let b2 = beta * beta;
    Ok((1.0 + b2) * precision * recall / (b2 * precision + recall + EPS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn confident_correct_scores_near_one() {
        let y = array![1.0f32, 0.0, 1.0];
        assert_abs_diff_eq!(smooth_fbeta(y.view(), y.view(), 2.0).unwrap(), 1.0, epsilon = 1e-5);
    }

    #[test]
    fn hedged_scores_are_penalized() {
        let y = array![1.0f32, 0.0, 1.0];
        let s = array![0.6f32, 0.4, 0.6];
        let f = smooth_fbeta(y.view(), s.view(), 2.0).unwrap();
        assert!(f < 0.9 && f > 0.5, "got {f}");
    }

    #[test]
    fn rejects_mismatched_input() {
        let y = array![1.0f32, 0.0];
        let s = array![0.5f32];
        assert!(smooth_fbeta(y.view(), s.view(), 2.0).is_err());
    }
}
