//! Class-balanced logistic regression.
//!
//! Batch gradient descent on z-scored vectors. Each class carries a total
//! example weight of 0.5 split evenly across its examples, so a handful of
//! rejections counts as much as many acceptances. The L2 penalty applies to
//! the weights only.

use ndarray::{Array1, Array2};
use tracing::trace;

use crate::cancel::CancellationToken;
use crate::config::TrainingConfig;
use crate::error::{Error, Result};
use crate::types::TrainingDiagnostics;

/// Logits are clamped to this magnitude before the sigmoid.
pub const LOGIT_CLAMP: f64 = 20.0;

/// Learning rate decay per iteration: `lr / (1 + DECAY * t)`.
pub const LEARNING_RATE_DECAY: f64 = 0.01;

const LOG_EPSILON: f64 = 1e-12;

/// Logistic function with the input clamped to `±LOGIT_CLAMP`.
pub fn sigmoid(z: f64) -> f64 {
    let z = z.clamp(-LOGIT_CLAMP, LOGIT_CLAMP);
    1.0 / (1.0 + (-z).exp())
}

/// `w·x + b`.
pub fn logit(weights: &[f64], bias: f64, x: &[f64]) -> f64 {
    weights.iter().zip(x.iter()).map(|(w, v)| w * v).sum::<f64>() + bias
}

/// A trained model.
#[derive(Debug, Clone, PartialEq)]
pub struct LogisticFit {
    /// Per-dimension weights
    pub weights: Vec<f64>,
    /// Intercept
    pub bias: f64,
    /// Training diagnostics
    pub diagnostics: TrainingDiagnostics,
}

/// Train on positive and negative examples of equal dimensionality.
pub fn train(
    positives: &[Vec<f64>],
    negatives: &[Vec<f64>],
    config: &TrainingConfig,
    cancel: &CancellationToken,
) -> Result<LogisticFit> {
    if positives.is_empty() || negatives.is_empty() {
        return Err(Error::training(format!(
            "need both classes, got {} positives and {} negatives",
            positives.len(),
            negatives.len()
        )));
    }

    let dims = positives[0].len();
    let n = positives.len() + negatives.len();

    let mut flat = Vec::with_capacity(n * dims);
    for x in positives.iter().chain(negatives.iter()) {
        if x.len() != dims {
            return Err(Error::DimensionMismatch {
                expected: dims,
                actual: x.len(),
            });
        }
        flat.extend_from_slice(x);
    }
    let design =
        Array2::from_shape_vec((n, dims), flat).map_err(|e| Error::training(e.to_string()))?;

    let targets: Array1<f64> = (0..n)
        .map(|i| if i < positives.len() { 1.0 } else { 0.0 })
        .collect();
    let pos_weight = 0.5 / positives.len() as f64;
    let neg_weight = 0.5 / negatives.len() as f64;
    let sample_weights: Array1<f64> = (0..n)
        .map(|i| if i < positives.len() { pos_weight } else { neg_weight })
        .collect();

    let mut weights = Array1::<f64>::zeros(dims);
    let mut bias = 0.0;

    let mut previous = loss(&design, &targets, &sample_weights, &weights, bias, config.l2);
    let mut diagnostics = TrainingDiagnostics {
        iterations: 0,
        final_loss: previous,
        converged: false,
        positives: positives.len(),
        negatives: negatives.len(),
    };

    let mut checkpoint = cancel.checkpoint();
    for t in 0..config.iterations {
        checkpoint.tick()?;

        let probabilities = predict(&design, &weights, bias);
        let residual = (&probabilities - &targets) * &sample_weights;
        let grad_w = design.t().dot(&residual) + &weights * config.l2;
        let grad_b = residual.sum();

        let rate = config.learning_rate / (1.0 + LEARNING_RATE_DECAY * t as f64);
        weights.scaled_add(-rate, &grad_w);
        bias -= rate * grad_b;

        let current = loss(&design, &targets, &sample_weights, &weights, bias, config.l2);
        if !current.is_finite() || !bias.is_finite() || weights.iter().any(|w| !w.is_finite()) {
            return Err(Error::training(format!("diverged at iteration {}", t)));
        }

        diagnostics.iterations = t + 1;
        diagnostics.final_loss = current;
        trace!("iteration {}: loss {:.6}", t, current);

        if (previous - current).abs() < config.tolerance {
            diagnostics.converged = true;
            break;
        }
        previous = current;
    }

    Ok(LogisticFit {
        weights: weights.to_vec(),
        bias,
        diagnostics,
    })
}

fn predict(design: &Array2<f64>, weights: &Array1<f64>, bias: f64) -> Array1<f64> {
    design.dot(weights).mapv(|z| sigmoid(z + bias))
}

fn loss(
    design: &Array2<f64>,
    targets: &Array1<f64>,
    sample_weights: &Array1<f64>,
    weights: &Array1<f64>,
    bias: f64,
    l2: f64,
) -> f64 {
    let probabilities = predict(design, weights, bias);
    let cross_entropy: f64 = probabilities
        .iter()
        .zip(targets.iter())
        .zip(sample_weights.iter())
        .map(|((&p, &y), &s)| {
            let p = p.clamp(LOG_EPSILON, 1.0 - LOG_EPSILON);
            -s * (y * p.ln() + (1.0 - y) * (1.0 - p).ln())
        })
        .sum();
    cross_entropy + 0.5 * l2 * weights.dot(weights)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn separable() -> (Vec<Vec<f64>>, Vec<Vec<f64>>) {
        let positives = vec![vec![2.0, 0.1], vec![1.5, -0.2], vec![2.5, 0.0]];
        let negatives = vec![vec![-2.0, 0.0]];
        (positives, negatives)
    }

    #[test]
    fn test_sigmoid_clamped() {
        assert_eq!(sigmoid(0.0), 0.5);
        assert_eq!(sigmoid(1000.0), sigmoid(20.0));
        assert!(sigmoid(-1000.0) > 0.0);
    }

    #[test]
    fn test_separates_classes() {
        let (positives, negatives) = separable();
        let cancel = CancellationToken::never();
        let fit = train(&positives, &negatives, &TrainingConfig::default(), &cancel).unwrap();

        for x in &positives {
            assert!(sigmoid(logit(&fit.weights, fit.bias, x)) > 0.5);
        }
        assert!(sigmoid(logit(&fit.weights, fit.bias, &negatives[0])) < 0.5);
        assert!(fit.weights[0] > 0.0);
        assert_eq!(fit.diagnostics.positives, 3);
        assert_eq!(fit.diagnostics.negatives, 1);
        assert!(fit.diagnostics.iterations >= 1);
        assert!(fit.diagnostics.final_loss < std::f64::consts::LN_2);
    }

    #[test]
    fn test_deterministic() {
        let (positives, negatives) = separable();
        let config = TrainingConfig::default();
        let a = train(&positives, &negatives, &config, &CancellationToken::never()).unwrap();
        let b = train(&positives, &negatives, &config, &CancellationToken::never()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_early_stop() {
        let (positives, negatives) = separable();
        let config = TrainingConfig {
            iterations: 10_000,
            tolerance: 1e-3,
            ..Default::default()
        };
        let fit = train(&positives, &negatives, &config, &CancellationToken::never()).unwrap();
        assert!(fit.diagnostics.converged);
        assert!(fit.diagnostics.iterations < 10_000);
    }

    #[test]
    fn test_zero_iterations_keeps_zero_model() {
        let (positives, negatives) = separable();
        let config = TrainingConfig {
            iterations: 0,
            ..Default::default()
        };
        let fit = train(&positives, &negatives, &config, &CancellationToken::never()).unwrap();
        assert!(fit.weights.iter().all(|&w| w == 0.0));
        assert_eq!(fit.bias, 0.0);
        assert!((fit.diagnostics.final_loss - std::f64::consts::LN_2).abs() < 1e-9);
    }

    #[test]
    fn test_requires_both_classes() {
        let (positives, _) = separable();
        let cancel = CancellationToken::never();
        let err = train(&positives, &[], &TrainingConfig::default(), &cancel).unwrap_err();
        assert!(matches!(err, Error::Training(_)));
    }

    #[test]
    fn test_divergence_is_an_error() {
        let positives = vec![vec![1e200, 0.0]];
        let negatives = vec![vec![-1e200, 0.0]];
        let config = TrainingConfig {
            learning_rate: 1e200,
            ..Default::default()
        };
        let err = train(&positives, &negatives, &config, &CancellationToken::never()).unwrap_err();
        assert!(matches!(err, Error::Training(_)));
    }

    #[test]
    fn test_cancelled() {
        let (positives, negatives) = separable();
        let err = train(
            &positives,
            &negatives,
            &TrainingConfig::default(),
            &CancellationToken::from_fn(|| true),
        )
        .unwrap_err();
        assert!(err.is_cancellation());
    }
}
