//! Window fingerprints.
//!
//! A fingerprint summarises one time window of frames as block statistics:
//! per-band mel mean/variance, onset mean/max/peak density and per-coefficient
//! cepstral mean/variance (coefficients 1..=12, the 0th is energy and is left
//! out).
//!
//! # Variants
//!
//! - **Plain**: unweighted moments from running sums. This is the arithmetic
//!   the sliding engine uses, so plain fingerprints of the same window agree
//!   with scan vectors.
//! - **Energy-weighted**: every frame is weighted by the L2 norm of its mel
//!   vector. Used for single-shot fingerprinting where loud frames should
//!   dominate the summary.

use std::ops::Range;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cancel::CancellationToken;
use crate::error::Result;
use crate::peaks::{pick_peaks, PeakPickOptions};
use crate::types::{FrameSeries, TimeWindow};

/// Highest cepstral coefficient index kept in fingerprints.
pub const MAX_CEPSTRAL_INDEX: usize = 12;

/// Number of cepstral dimensions kept for `coefficients` input coefficients.
pub fn cepstral_dims(coefficients: usize) -> usize {
    coefficients.saturating_sub(1).min(MAX_CEPSTRAL_INDEX)
}

/// Statistical summary of one window, before flattening.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fingerprint {
    /// Mean energy per mel band
    pub mel_mean: Vec<f64>,
    /// Energy variance per mel band
    pub mel_variance: Vec<f64>,
    /// Mean onset strength
    pub onset_mean: f64,
    /// Maximum onset strength
    pub onset_max: f64,
    /// Onset peaks per second
    pub onset_peak_density: f64,
    /// Mean per cepstral coefficient
    pub mfcc_mean: Vec<f64>,
    /// Variance per cepstral coefficient
    pub mfcc_variance: Vec<f64>,
}

impl Fingerprint {
    /// All-zero fingerprint of the given dimensionality.
    pub fn zeros(mel_bands: usize, mfcc_dims: usize) -> Self {
        Self {
            mel_mean: vec![0.0; mel_bands],
            mel_variance: vec![0.0; mel_bands],
            onset_mean: 0.0,
            onset_max: 0.0,
            onset_peak_density: 0.0,
            mfcc_mean: vec![0.0; mfcc_dims],
            mfcc_variance: vec![0.0; mfcc_dims],
        }
    }

    /// Element-wise `self - background`, the local contrast of a window.
    pub fn contrast(&self, background: &Fingerprint) -> Fingerprint {
        fn diff(a: &[f64], b: &[f64]) -> Vec<f64> {
            a.iter().zip(b.iter()).map(|(x, y)| x - y).collect()
        }

        Fingerprint {
            mel_mean: diff(&self.mel_mean, &background.mel_mean),
            mel_variance: diff(&self.mel_variance, &background.mel_variance),
            onset_mean: self.onset_mean - background.onset_mean,
            onset_max: self.onset_max - background.onset_max,
            onset_peak_density: self.onset_peak_density - background.onset_peak_density,
            mfcc_mean: diff(&self.mfcc_mean, &background.mfcc_mean),
            mfcc_variance: diff(&self.mfcc_variance, &background.mfcc_variance),
        }
    }

    /// Onset scalars in layout order.
    pub fn onset_scalars(&self) -> [f64; 3] {
        [self.onset_mean, self.onset_max, self.onset_peak_density]
    }
}

/// Sums and sums of squares of mel and cepstral values over a frame range.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameTotals {
    /// Frames accumulated
    pub count: usize,
    /// Per-band mel sum
    pub mel_sum: Vec<f64>,
    /// Per-band mel sum of squares
    pub mel_sum_sq: Vec<f64>,
    /// Per-coefficient cepstral sum
    pub mfcc_sum: Vec<f64>,
    /// Per-coefficient cepstral sum of squares
    pub mfcc_sum_sq: Vec<f64>,
}

impl FrameTotals {
    /// Empty totals.
    pub fn zeros(mel_bands: usize, mfcc_dims: usize) -> Self {
        Self {
            count: 0,
            mel_sum: vec![0.0; mel_bands],
            mel_sum_sq: vec![0.0; mel_bands],
            mfcc_sum: vec![0.0; mfcc_dims],
            mfcc_sum_sq: vec![0.0; mfcc_dims],
        }
    }

    /// Accumulate a frame range directly.
    pub fn over(frames: &FrameSeries, range: Range<usize>, mfcc_dims: usize) -> Self {
        let mut totals = Self::zeros(frames.mel_bands(), mfcc_dims);
        for i in range {
            totals.add_frame(frames, i);
        }
        totals
    }

    /// Add frame `i`.
    pub fn add_frame(&mut self, frames: &FrameSeries, i: usize) {
        self.apply(frames, i, 1.0);
        self.count += 1;
    }

    /// Remove frame `i`, which must have been added before.
    pub fn remove_frame(&mut self, frames: &FrameSeries, i: usize) {
        self.apply(frames, i, -1.0);
        self.count = self.count.saturating_sub(1);
    }

    fn apply(&mut self, frames: &FrameSeries, i: usize, sign: f64) {
        for (b, &v) in frames.mel().row(i).iter().enumerate() {
            let v = v as f64;
            self.mel_sum[b] += sign * v;
            self.mel_sum_sq[b] += sign * v * v;
        }
        if let Some(mfcc) = frames.mfcc() {
            let dims = self.mfcc_sum.len();
            for (c, &v) in mfcc.row(i).iter().skip(1).take(dims).enumerate() {
                let v = v as f64;
                self.mfcc_sum[c] += sign * v;
                self.mfcc_sum_sq[c] += sign * v * v;
            }
        }
    }

    /// Totals of `self` with the frames of `inner` taken out.
    ///
    /// `inner` must cover a sub-range of the frames accumulated in `self`.
    pub fn excluding(&self, inner: &FrameTotals) -> FrameTotals {
        fn diff(a: &[f64], b: &[f64]) -> Vec<f64> {
            a.iter().zip(b.iter()).map(|(x, y)| x - y).collect()
        }

        FrameTotals {
            count: self.count.saturating_sub(inner.count),
            mel_sum: diff(&self.mel_sum, &inner.mel_sum),
            mel_sum_sq: diff(&self.mel_sum_sq, &inner.mel_sum_sq),
            mfcc_sum: diff(&self.mfcc_sum, &inner.mfcc_sum),
            mfcc_sum_sq: diff(&self.mfcc_sum_sq, &inner.mfcc_sum_sq),
        }
    }

    /// Fingerprint with mean/variance blocks from these totals and the given
    /// onset scalars.
    pub fn fingerprint(
        &self,
        onset_mean: f64,
        onset_max: f64,
        onset_peak_density: f64,
    ) -> Fingerprint {
        let (mel_mean, mel_variance) = moments(&self.mel_sum, &self.mel_sum_sq, self.count);
        let (mfcc_mean, mfcc_variance) = moments(&self.mfcc_sum, &self.mfcc_sum_sq, self.count);
        Fingerprint {
            mel_mean,
            mel_variance,
            onset_mean,
            onset_max,
            onset_peak_density,
            mfcc_mean,
            mfcc_variance,
        }
    }
}

/// Mean and variance from running sums; variance is clamped at zero.
fn moments(sum: &[f64], sum_sq: &[f64], count: usize) -> (Vec<f64>, Vec<f64>) {
    if count == 0 {
        return (vec![0.0; sum.len()], vec![0.0; sum.len()]);
    }
    let n = count as f64;
    let mean: Vec<f64> = sum.iter().map(|s| s / n).collect();
    let variance = sum_sq
        .iter()
        .zip(mean.iter())
        .map(|(sq, m)| (sq / n - m * m).max(0.0))
        .collect();
    (mean, variance)
}

/// How frames are weighted inside a window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FingerprintMode {
    /// Frames weighted by their mel L2 norm
    #[default]
    EnergyWeighted,
    /// Unweighted moments
    Plain,
}

/// Per-frame scale factors (mel L2 norms) for energy weighting.
#[derive(Debug, Clone)]
pub struct FrameWeights {
    norms: Vec<f64>,
}

impl FrameWeights {
    /// Precompute the mel norm of every frame.
    pub fn compute(frames: &FrameSeries, cancel: &CancellationToken) -> Result<Self> {
        let mut checkpoint = cancel.checkpoint();
        let mut norms = Vec::with_capacity(frames.len());
        for row in frames.mel().rows() {
            checkpoint.tick()?;
            let energy: f64 = row.iter().map(|&v| (v as f64) * (v as f64)).sum();
            norms.push(energy.sqrt());
        }
        Ok(Self { norms })
    }

    /// Norm of frame `i`.
    pub fn get(&self, i: usize) -> f64 {
        self.norms.get(i).copied().unwrap_or(0.0)
    }
}

/// Single-shot fingerprint extractor.
#[derive(Debug, Clone)]
pub struct FingerprintExtractor {
    mode: FingerprintMode,
    peak_pick: PeakPickOptions,
}

impl FingerprintExtractor {
    /// Create an extractor.
    pub fn new(mode: FingerprintMode, peak_pick: PeakPickOptions) -> Self {
        Self { mode, peak_pick }
    }

    /// Fingerprint of the frames inside `window`.
    ///
    /// An empty window yields an all-zero fingerprint.
    pub fn extract(
        &self,
        frames: &FrameSeries,
        window: TimeWindow,
        cancel: &CancellationToken,
    ) -> Result<Fingerprint> {
        let mfcc_dims = cepstral_dims(frames.mfcc_coefficients());
        let range = frames.frame_range(window);

        if range.is_empty() {
            return Ok(Fingerprint::zeros(frames.mel_bands(), mfcc_dims));
        }

        let onset: Vec<f64> = frames.onset()[range.clone()]
            .iter()
            .map(|&v| v as f64)
            .collect();
        let onset_max = onset.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let peaks = pick_peaks(&frames.times()[range.clone()], &onset, &self.peak_pick, None);
        let peak_density = if window.duration() > 0.0 {
            peaks.len() as f64 / window.duration()
        } else {
            0.0
        };

        let fingerprint = match self.mode {
            FingerprintMode::Plain => {
                let onset_mean = onset.iter().sum::<f64>() / onset.len() as f64;
                FrameTotals::over(frames, range.clone(), mfcc_dims).fingerprint(
                    onset_mean,
                    onset_max,
                    peak_density,
                )
            }
            FingerprintMode::EnergyWeighted => {
                let weights = FrameWeights::compute(frames, cancel)?;
                weighted_fingerprint(
                    frames,
                    range.clone(),
                    mfcc_dims,
                    &weights,
                    onset_max,
                    peak_density,
                )
            }
        };

        debug!(
            "Fingerprinted {:.3}s..{:.3}s ({} frames, {:?})",
            window.start,
            window.end,
            range.len(),
            self.mode
        );

        Ok(fingerprint)
    }
}

fn weighted_fingerprint(
    frames: &FrameSeries,
    range: Range<usize>,
    mfcc_dims: usize,
    weights: &FrameWeights,
    onset_max: f64,
    onset_peak_density: f64,
) -> Fingerprint {
    let total: f64 = range.clone().map(|i| weights.get(i)).sum();
    let uniform = total <= f64::EPSILON;
    let (total, weight_of) = if uniform {
        (range.len() as f64, None)
    } else {
        (total, Some(weights))
    };
    let w = |i: usize| weight_of.map_or(1.0, |ws| ws.get(i)) / total;

    let mel_bands = frames.mel_bands();
    let mut mel_mean = vec![0.0; mel_bands];
    let mut mfcc_mean = vec![0.0; mfcc_dims];
    let mut onset_mean = 0.0;

    for i in range.clone() {
        let wi = w(i);
        for (b, &v) in frames.mel().row(i).iter().enumerate() {
            mel_mean[b] += wi * v as f64;
        }
        if let Some(mfcc) = frames.mfcc() {
            for (c, &v) in mfcc.row(i).iter().skip(1).take(mfcc_dims).enumerate() {
                mfcc_mean[c] += wi * v as f64;
            }
        }
        onset_mean += wi * frames.onset()[i] as f64;
    }

    let mut mel_variance = vec![0.0; mel_bands];
    let mut mfcc_variance = vec![0.0; mfcc_dims];

    for i in range {
        let wi = w(i);
        for (b, &v) in frames.mel().row(i).iter().enumerate() {
            mel_variance[b] += wi * (v as f64 - mel_mean[b]).powi(2);
        }
        if let Some(mfcc) = frames.mfcc() {
            for (c, &v) in mfcc.row(i).iter().skip(1).take(mfcc_dims).enumerate() {
                mfcc_variance[c] += wi * (v as f64 - mfcc_mean[c]).powi(2);
            }
        }
    }

    Fingerprint {
        mel_mean,
        mel_variance,
        onset_mean,
        onset_max,
        onset_peak_density,
        mfcc_mean,
        mfcc_variance,
    }
}
