//! Per-dimension z-score normalisation.
//!
//! Statistics are accumulated with Welford's update over every scan window of
//! a pass, then frozen into a [`Standardizer`] applied to both training and
//! scan vectors.

use crate::error::{Error, Result};

/// Standard deviations below this map the dimension to 0.
pub const MIN_STD: f64 = 1e-9;

/// Streaming mean/variance accumulator.
#[derive(Debug, Clone)]
pub struct StandardizerBuilder {
    count: usize,
    mean: Vec<f64>,
    m2: Vec<f64>,
}

impl StandardizerBuilder {
    /// Accumulator for `dims`-dimensional vectors.
    pub fn new(dims: usize) -> Self {
        Self {
            count: 0,
            mean: vec![0.0; dims],
            m2: vec![0.0; dims],
        }
    }

    /// Add one observation.
    pub fn push(&mut self, x: &[f64]) -> Result<()> {
        if x.len() != self.mean.len() {
            return Err(Error::DimensionMismatch {
                expected: self.mean.len(),
                actual: x.len(),
            });
        }
        self.count += 1;
        let n = self.count as f64;
        for ((mean, m2), &v) in self.mean.iter_mut().zip(self.m2.iter_mut()).zip(x) {
            let delta = v - *mean;
            *mean += delta / n;
            *m2 += delta * (v - *mean);
        }
        Ok(())
    }

    /// Observations so far.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Freeze into a standardizer (population statistics).
    pub fn finish(self) -> Standardizer {
        let n = self.count.max(1) as f64;
        let std = self.m2.iter().map(|m2| (m2 / n).max(0.0).sqrt()).collect();
        Standardizer {
            mean: self.mean,
            std,
        }
    }
}

/// Frozen per-dimension mean and standard deviation.
#[derive(Debug, Clone, PartialEq)]
pub struct Standardizer {
    mean: Vec<f64>,
    std: Vec<f64>,
}

impl Standardizer {
    /// Per-dimension means.
    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    /// Per-dimension standard deviations.
    pub fn std(&self) -> &[f64] {
        &self.std
    }

    /// Z-score one vector.
    pub fn transform(&self, x: &[f64]) -> Result<Vec<f64>> {
        if x.len() != self.mean.len() {
            return Err(Error::DimensionMismatch {
                expected: self.mean.len(),
                actual: x.len(),
            });
        }
        Ok(x.iter()
            .zip(self.mean.iter().zip(self.std.iter()))
            .map(|(&v, (&m, &s))| if s < MIN_STD { 0.0 } else { (v - m) / s })
            .collect())
    }

    /// Z-score a batch of vectors.
    pub fn transform_all(&self, xs: &[Vec<f64>]) -> Result<Vec<Vec<f64>>> {
        xs.iter().map(|x| self.transform(x)).collect()
    }
}
