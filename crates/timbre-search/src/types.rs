//! Core types for similarity search.

use std::ops::Range;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::explain::ScoreExplanation;

/// Time-aligned feature frames of one track, computed upstream.
///
/// Every frame carries a timestamp, a mel-band energy vector, one onset
/// strength value and, optionally, a cepstral coefficient vector.
#[derive(Debug, Clone)]
pub struct FrameSeries {
    times: Vec<f64>,
    mel: Array2<f32>,
    onset: Vec<f32>,
    mfcc: Option<Array2<f32>>,
}

impl FrameSeries {
    /// Create a frame series from matrices (frames × dims).
    pub fn new(
        times: Vec<f64>,
        mel: Array2<f32>,
        onset: Vec<f32>,
        mfcc: Option<Array2<f32>>,
    ) -> Result<Self> {
        let n = times.len();

        if mel.nrows() != n {
            return Err(Error::InvalidFrames(format!(
                "{} mel frames for {} timestamps",
                mel.nrows(),
                n
            )));
        }
        if onset.len() != n {
            return Err(Error::InvalidFrames(format!(
                "{} onset values for {} timestamps",
                onset.len(),
                n
            )));
        }
        if let Some(ref m) = mfcc {
            if m.nrows() != n {
                return Err(Error::InvalidFrames(format!(
                    "{} cepstral frames for {} timestamps",
                    m.nrows(),
                    n
                )));
            }
        }

        if times.iter().any(|t| !t.is_finite()) {
            return Err(Error::InvalidFrames("non-finite timestamp".into()));
        }
        if times.windows(2).any(|w| w[1] <= w[0]) {
            return Err(Error::InvalidFrames(
                "timestamps must be strictly increasing".into(),
            ));
        }
        if mel.iter().chain(onset.iter()).any(|v| !v.is_finite())
            || mfcc.as_ref().map_or(false, |m| m.iter().any(|v| !v.is_finite()))
        {
            return Err(Error::InvalidFrames("non-finite feature value".into()));
        }

        Ok(Self {
            times,
            mel,
            onset,
            mfcc,
        })
    }

    /// Create a frame series from row vectors, as decoded from JSON.
    pub fn from_rows(
        times: Vec<f64>,
        mel: Vec<Vec<f32>>,
        onset: Vec<f32>,
        mfcc: Option<Vec<Vec<f32>>>,
    ) -> Result<Self> {
        let mel = rows_to_matrix(mel, "mel")?;
        let mfcc = mfcc.map(|rows| rows_to_matrix(rows, "mfcc")).transpose()?;
        Self::new(times, mel, onset, mfcc)
    }

    /// Frame timestamps in seconds.
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    /// Mel energies, frames × bands.
    pub fn mel(&self) -> &Array2<f32> {
        &self.mel
    }

    /// Onset strength per frame.
    pub fn onset(&self) -> &[f32] {
        &self.onset
    }

    /// Cepstral coefficients, frames × coefficients.
    pub fn mfcc(&self) -> Option<&Array2<f32>> {
        self.mfcc.as_ref()
    }

    /// Number of frames.
    pub fn len(&self) -> usize {
        self.times.len()
    }

    /// Check if the series holds no frames.
    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Number of mel bands per frame.
    pub fn mel_bands(&self) -> usize {
        self.mel.ncols()
    }

    /// Number of cepstral coefficients per frame (0 when absent).
    pub fn mfcc_coefficients(&self) -> usize {
        self.mfcc.as_ref().map_or(0, |m| m.ncols())
    }

    /// Timestamp of the last frame; 0 for an empty series.
    pub fn end_time(&self) -> f64 {
        self.times.last().copied().unwrap_or(0.0)
    }

    /// Frame hop estimated from the first two timestamps.
    pub fn hop_sec(&self) -> f64 {
        match self.times.as_slice() {
            [a, b, ..] => b - a,
            _ => 0.0,
        }
    }

    /// Index range of frames whose timestamps lie in `[start, end]`.
    pub fn frame_range(&self, window: TimeWindow) -> Range<usize> {
        let lo = self.times.partition_point(|&t| t < window.start);
        let hi = self.times.partition_point(|&t| t <= window.end);
        lo..hi.max(lo)
    }
}

fn rows_to_matrix(rows: Vec<Vec<f32>>, name: &str) -> Result<Array2<f32>> {
    let n = rows.len();
    let dims = rows.first().map_or(0, |r| r.len());

    if let Some(bad) = rows.iter().position(|r| r.len() != dims) {
        return Err(Error::InvalidFrames(format!(
            "{} frame {} has {} values, expected {}",
            name,
            bad,
            rows[bad].len(),
            dims
        )));
    }

    let flat: Vec<f32> = rows.into_iter().flatten().collect();
    Array2::from_shape_vec((n, dims), flat)
        .map_err(|e| Error::InvalidFrames(format!("{} matrix: {}", name, e)))
}

/// Frame series as stored on disk: `{ times, mel: [[..]], onset, mfcc?: [[..]] }`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrameFile {
    /// Frame timestamps in seconds
    pub times: Vec<f64>,
    /// Mel energies, one row per frame
    pub mel: Vec<Vec<f32>>,
    /// Onset strength per frame
    pub onset: Vec<f32>,
    /// Cepstral coefficients, one row per frame
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mfcc: Option<Vec<Vec<f32>>>,
}

impl FrameFile {
    /// Validate into a [`FrameSeries`].
    pub fn into_series(self) -> Result<FrameSeries> {
        FrameSeries::from_rows(self.times, self.mel, self.onset, self.mfcc)
    }
}

/// A time window in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Window start
    #[serde(alias = "t0")]
    pub start: f64,
    /// Window end
    #[serde(alias = "t1")]
    pub end: f64,
}

impl TimeWindow {
    /// Create a new window.
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    /// Window length in seconds (never negative).
    pub fn duration(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }

    /// True when the two windows share a non-empty interval.
    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        self.start < other.end && self.end > other.start
    }

    /// True when the window is finite and non-empty.
    pub fn is_valid(&self) -> bool {
        self.start.is_finite() && self.end.is_finite() && self.end > self.start
    }
}

/// User or heuristic judgement on a candidate window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelStatus {
    /// Window sounds like the query
    Accepted,
    /// Window does not sound like the query
    Rejected,
}

/// Origin of a refinement label.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelSource {
    /// Produced by a heuristic
    Auto,
    /// Set by the user
    #[default]
    Manual,
}

/// Training example for the refinement model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RefinementLabel {
    /// Window start in seconds
    #[serde(alias = "t0")]
    pub start: f64,
    /// Window end in seconds
    #[serde(alias = "t1")]
    pub end: f64,
    /// Accepted or rejected
    pub status: LabelStatus,
    /// Who produced the label
    #[serde(default)]
    pub source: LabelSource,
}

impl RefinementLabel {
    /// A manual accepted label.
    pub fn accepted(start: f64, end: f64) -> Self {
        Self {
            start,
            end,
            status: LabelStatus::Accepted,
            source: LabelSource::Manual,
        }
    }

    /// A manual rejected label.
    pub fn rejected(start: f64, end: f64) -> Self {
        Self {
            start,
            end,
            status: LabelStatus::Rejected,
            source: LabelSource::Manual,
        }
    }

    /// The labelled window.
    pub fn window(&self) -> TimeWindow {
        TimeWindow::new(self.start, self.end)
    }
}

/// Meaning of the per-window score curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CurveKind {
    /// Fixed cosine similarity to the query
    Similarity,
    /// Output of a trained refinement model
    Confidence,
}

/// Kind of model that produced the score curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// Weighted block cosine similarity
    Baseline,
    /// Cosine similarity to the mean positive example
    Prototype,
    /// Logistic regression
    Logistic,
}

/// Diagnostics of one logistic training run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingDiagnostics {
    /// Gradient steps performed
    pub iterations: usize,
    /// Loss after the last step
    pub final_loss: f64,
    /// Whether the loss change dropped below tolerance
    pub converged: bool,
    /// Positive examples used
    pub positives: usize,
    /// Negative examples used
    pub negatives: usize,
}

/// Summary of the model used by a search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSummary {
    /// Model kind that scored the curve
    pub kind: ModelKind,
    /// Accepted labels taken into account
    pub accepted_labels: usize,
    /// Rejected labels taken into account
    pub rejected_labels: usize,
    /// Labels produced by heuristics
    pub auto_labels: usize,
    /// Labels set by the user
    pub manual_labels: usize,
    /// Labels dropped because their window held no frames
    pub ignored_labels: usize,
    /// Logistic training diagnostics
    pub diagnostics: Option<TrainingDiagnostics>,
    /// Why refinement was abandoned, if it was
    pub fallback_reason: Option<String>,
}

impl ModelSummary {
    /// Summary of an unrefined search.
    pub fn baseline() -> Self {
        Self {
            kind: ModelKind::Baseline,
            accepted_labels: 0,
            rejected_labels: 0,
            auto_labels: 0,
            manual_labels: 0,
            ignored_labels: 0,
            diagnostics: None,
            fallback_reason: None,
        }
    }
}

/// Wall-clock breakdown of one search, in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchTimings {
    /// Frame validation, layout, onset index and query featurisation
    pub feature_prep_ms: f64,
    /// Window scan passes
    pub scan_ms: f64,
    /// Label featurisation and model fitting
    pub training_ms: f64,
    /// Whole call
    pub total_ms: f64,
}

/// A discrete match emitted by the search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchCandidate {
    /// Event time (window start) in seconds
    pub time: f64,
    /// Score in [0, 1]
    pub score: f64,
    /// Scanned window start
    pub window_start: f64,
    /// Scanned window end
    pub window_end: f64,
    /// Logit decomposition, logistic model only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explain: Option<ScoreExplanation>,
}

/// Complete output of one search call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    /// Query window that was searched for
    pub query: TimeWindow,
    /// Window start times of the score curve
    pub times: Vec<f64>,
    /// Score per scanned window
    pub scores: Vec<f64>,
    /// Meaning of `scores`
    pub curve_kind: CurveKind,
    /// Peak-picked matches, time-ordered
    pub candidates: Vec<SearchCandidate>,
    /// Model summary
    pub model: ModelSummary,
    /// Timing breakdown
    pub timings: SearchTimings,
    /// Windows scored by the model
    pub scanned_windows: usize,
    /// Windows forced to zero by the skip range
    pub skipped_windows: usize,
}

impl SearchResult {
    /// Well-formed result for a track too short to hold the query.
    pub fn empty(query: TimeWindow) -> Self {
        Self {
            query,
            times: Vec::new(),
            scores: Vec::new(),
            curve_kind: CurveKind::Similarity,
            candidates: Vec::new(),
            model: ModelSummary::baseline(),
            timings: SearchTimings::default(),
            scanned_windows: 0,
            skipped_windows: 0,
        }
    }
}
