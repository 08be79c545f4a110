//! Scoring models and their selection policy.

use tracing::debug;

use crate::cancel::CancellationToken;
use crate::config::{BlockWeights, TrainingConfig};
use crate::error::{Error, Result};
use crate::layout::FeatureVectorLayout;
use crate::scoring::logistic::{self, sigmoid};
use crate::scoring::similarity::{baseline_score, cosine_similarity, rescale};
use crate::scoring::zscore::Standardizer;
use crate::types::{ModelKind, TrainingDiagnostics};

/// Accepted labels needed before any model is trained.
pub const MIN_ACCEPTED: usize = 2;

/// A scoring model, rebuilt for every search.
#[derive(Debug, Clone, PartialEq)]
pub enum Model {
    /// Weighted block cosine to the query
    Baseline,
    /// Cosine to the mean z-scored positive
    Prototype {
        /// Mean of the z-scored positives
        vector: Vec<f64>,
    },
    /// Logistic regression on z-scored vectors
    Logistic {
        /// Per-dimension weights
        weights: Vec<f64>,
        /// Intercept
        bias: f64,
        /// Training diagnostics
        diagnostics: TrainingDiagnostics,
    },
}

impl Model {
    /// Model kind to train for the given valid label counts.
    pub fn select(accepted: usize, rejected: usize, refinement_enabled: bool) -> ModelKind {
        if !refinement_enabled || accepted < MIN_ACCEPTED {
            ModelKind::Baseline
        } else if rejected == 0 {
            ModelKind::Prototype
        } else {
            ModelKind::Logistic
        }
    }

    /// Kind of this model.
    pub fn kind(&self) -> ModelKind {
        match self {
            Model::Baseline => ModelKind::Baseline,
            Model::Prototype { .. } => ModelKind::Prototype,
            Model::Logistic { .. } => ModelKind::Logistic,
        }
    }

    /// Logistic diagnostics, if any.
    pub fn diagnostics(&self) -> Option<&TrainingDiagnostics> {
        match self {
            Model::Logistic { diagnostics, .. } => Some(diagnostics),
            _ => None,
        }
    }

    /// Fit a model of `kind` on z-scored examples.
    pub fn fit(
        kind: ModelKind,
        positives: &[Vec<f64>],
        negatives: &[Vec<f64>],
        config: &TrainingConfig,
        cancel: &CancellationToken,
    ) -> Result<Model> {
        match kind {
            ModelKind::Baseline => Ok(Model::Baseline),
            ModelKind::Prototype => Self::fit_prototype(positives),
            ModelKind::Logistic => {
                let fit = logistic::train(positives, negatives, config, cancel)?;
                debug!(
                    "Logistic model: {} iterations, loss {:.5}, converged={}",
                    fit.diagnostics.iterations,
                    fit.diagnostics.final_loss,
                    fit.diagnostics.converged
                );
                Ok(Model::Logistic {
                    weights: fit.weights,
                    bias: fit.bias,
                    diagnostics: fit.diagnostics,
                })
            }
        }
    }

    fn fit_prototype(positives: &[Vec<f64>]) -> Result<Model> {
        let first = positives
            .first()
            .ok_or_else(|| Error::training("prototype needs at least one positive"))?;
        let dims = first.len();
        let mut vector = vec![0.0; dims];
        for x in positives {
            if x.len() != dims {
                return Err(Error::DimensionMismatch {
                    expected: dims,
                    actual: x.len(),
                });
            }
            for (acc, v) in vector.iter_mut().zip(x) {
                *acc += v;
            }
        }
        let n = positives.len() as f64;
        vector.iter_mut().for_each(|v| *v /= n);

        if vector.iter().any(|v| !v.is_finite()) {
            return Err(Error::training("non-finite prototype"));
        }
        debug!("Prototype model from {} positives", positives.len());
        Ok(Model::Prototype { vector })
    }
}

/// Scores raw window vectors with one model.
#[derive(Debug, Clone)]
pub struct Scorer<'a> {
    model: &'a Model,
    layout: &'a FeatureVectorLayout,
    weights: BlockWeights,
    query: &'a [f64],
    standardizer: Option<&'a Standardizer>,
}

impl<'a> Scorer<'a> {
    /// Create a scorer. Trained models require a standardizer.
    pub fn new(
        model: &'a Model,
        layout: &'a FeatureVectorLayout,
        weights: BlockWeights,
        query: &'a [f64],
        standardizer: Option<&'a Standardizer>,
    ) -> Self {
        Self {
            model,
            layout,
            weights,
            query,
            standardizer,
        }
    }

    /// Z-score `raw` with the pass statistics.
    pub fn standardize(&self, raw: &[f64]) -> Result<Vec<f64>> {
        self.standardizer
            .ok_or_else(|| Error::training("trained model scored without statistics"))?
            .transform(raw)
    }

    /// Score one window vector into [0, 1].
    pub fn score(&self, raw: &[f64]) -> Result<f64> {
        let score = match self.model {
            Model::Baseline => baseline_score(self.layout, raw, self.query, &self.weights),
            Model::Prototype { vector } => {
                rescale(cosine_similarity(&self.standardize(raw)?, vector))
            }
            Model::Logistic { weights, bias, .. } => {
                sigmoid(logistic::logit(weights, *bias, &self.standardize(raw)?))
            }
        };
        Ok(if score.is_nan() { 0.0 } else { score.clamp(0.0, 1.0) })
    }
}
