//! Search configuration.
//!
//! [`SearchOptions`] mirrors the JSON option object accepted by front-ends:
//! every field is optional on the wire and has a stated default. A call
//! resolves it exactly once into [`ResolvedOptions`] (clamped, with defaults
//! that depend on the query filled in) and never re-reads it mid-scan.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cancel::CancellationToken;
use crate::error::{Error, Result};
use crate::peaks::{PeakPickOptions, PeakThreshold};
use crate::types::{RefinementLabel, TimeWindow};

/// Smallest accepted scan hop.
pub const MIN_HOP_SEC: f64 = 1e-3;

/// Options for one search call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchOptions {
    /// Scan step in seconds
    pub hop_sec: f64,
    /// Minimum score for a candidate, clamped to [0, 1]
    pub threshold: f64,
    /// Minimum time between candidates (default 0.8 × query duration)
    pub min_candidate_spacing_sec: Option<f64>,
    /// Windows overlapping this range score 0
    pub skip_window_overlap: Option<TimeWindow>,
    /// Per-block weights for baseline similarity
    pub weights: BlockWeights,
    /// Foreground/background contrast features
    pub local_contrast: LocalContrastConfig,
    /// Label-driven refinement
    pub refinement: RefinementConfig,
    /// Onset peak picking for the peak-density feature
    pub query_peak_pick: PeakPickOptions,
    /// Candidate peak picking
    pub candidate_peak_pick: CandidatePeakPick,
    /// Cooperative cancellation
    #[serde(skip)]
    pub cancellation: CancellationToken,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            hop_sec: 0.03,
            threshold: 0.75,
            min_candidate_spacing_sec: None,
            skip_window_overlap: None,
            weights: BlockWeights::default(),
            local_contrast: LocalContrastConfig::default(),
            refinement: RefinementConfig::default(),
            query_peak_pick: PeakPickOptions::default(),
            candidate_peak_pick: CandidatePeakPick::default(),
            cancellation: CancellationToken::never(),
        }
    }
}

/// Per-block weights for baseline cosine scoring.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockWeights {
    /// Mel mean/variance block
    pub mel: f64,
    /// Onset scalar block
    pub transient: f64,
    /// Cepstral block
    pub mfcc: f64,
}

impl Default for BlockWeights {
    fn default() -> Self {
        Self {
            mel: 1.0,
            transient: 1.0,
            mfcc: 1.0,
        }
    }
}

/// Local contrast (foreground minus background) features.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LocalContrastConfig {
    /// Include contrast blocks in the feature vector
    pub enabled: bool,
    /// Background duration as a multiple of the foreground duration
    pub background_scale: f64,
}

impl Default for LocalContrastConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            background_scale: 3.0,
        }
    }
}

/// Refinement settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RefinementConfig {
    /// Allow trained models at all
    pub enabled: bool,
    /// Training labels
    pub labels: Vec<RefinementLabel>,
    /// Add the query to the positives once two labels are accepted
    pub include_query_as_positive: bool,
    /// Gradient descent iteration budget
    pub iterations: usize,
    /// Initial learning rate
    pub learning_rate: f64,
    /// L2 penalty on the weights
    pub l2: f64,
}

impl Default for RefinementConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            labels: Vec::new(),
            include_query_as_positive: true,
            iterations: 80,
            learning_rate: 0.5,
            l2: 0.01,
        }
    }
}

/// Candidate extraction tuning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CandidatePeakPick {
    /// Require strictly greater scores than both neighbours
    pub strict: bool,
}

impl SearchOptions {
    /// Parse options from a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load options from a JSON file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(&path)?;
        let options = Self::from_json_str(&contents)?;
        info!("Loaded search options from {:?}", path.as_ref());
        Ok(options)
    }

    /// Resolve defaults and clamp every field for a query window.
    pub fn resolve(&self, query: TimeWindow) -> Result<ResolvedOptions> {
        if !query.is_valid() {
            return Err(Error::InvalidQuery {
                start: query.start,
                end: query.end,
            });
        }

        let defaults = SearchOptions::default();
        let refinement_defaults = RefinementConfig::default();

        let hop_sec = finite_or(self.hop_sec, defaults.hop_sec).max(MIN_HOP_SEC);
        let threshold = finite_or(self.threshold, defaults.threshold).clamp(0.0, 1.0);
        let min_spacing_sec = self
            .min_candidate_spacing_sec
            .filter(|s| s.is_finite() && *s >= 0.0)
            .unwrap_or(0.8 * query.duration());

        let background_scale = if self.local_contrast.enabled {
            Some(finite_or(self.local_contrast.background_scale, 3.0).max(1.0))
        } else {
            None
        };

        let weights = BlockWeights {
            mel: weight(self.weights.mel),
            transient: weight(self.weights.transient),
            mfcc: weight(self.weights.mfcc),
        };

        let training = TrainingConfig {
            iterations: self.refinement.iterations,
            learning_rate: finite_or(
                self.refinement.learning_rate,
                refinement_defaults.learning_rate,
            )
            .max(0.0),
            l2: finite_or(self.refinement.l2, refinement_defaults.l2).max(0.0),
            tolerance: 1e-6,
        };

        let mut query_peak_pick = self.query_peak_pick;
        query_peak_pick.min_spacing_sec = finite_or(query_peak_pick.min_spacing_sec, 0.0).max(0.0);

        let candidate_peak_pick = PeakPickOptions {
            threshold: PeakThreshold::Fixed { value: threshold },
            min_spacing_sec,
            strict: self.candidate_peak_pick.strict,
        };

        let resolved = ResolvedOptions {
            hop_sec,
            threshold,
            min_spacing_sec,
            skip_window: self.skip_window_overlap.filter(TimeWindow::is_valid),
            weights,
            background_scale,
            refinement_enabled: self.refinement.enabled,
            labels: self.refinement.labels.clone(),
            include_query_as_positive: self.refinement.include_query_as_positive,
            training,
            query_peak_pick,
            candidate_peak_pick,
            cancellation: self.cancellation.clone(),
        };

        debug!(
            "Resolved options: hop={:.3}s threshold={:.2} spacing={:.3}s contrast={:?}",
            resolved.hop_sec,
            resolved.threshold,
            resolved.min_spacing_sec,
            resolved.background_scale
        );

        Ok(resolved)
    }
}

fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

fn weight(value: f64) -> f64 {
    finite_or(value, 1.0).max(0.0)
}

/// Gradient descent settings for the logistic model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingConfig {
    /// Maximum number of gradient steps
    pub iterations: usize,
    /// Initial learning rate, decayed as `lr / (1 + 0.01 t)`
    pub learning_rate: f64,
    /// L2 penalty (bias excluded)
    pub l2: f64,
    /// Early stopping threshold on the loss change
    pub tolerance: f64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            iterations: 80,
            learning_rate: 0.5,
            l2: 0.01,
            tolerance: 1e-6,
        }
    }
}

/// Options after defaulting and clamping, fixed for the whole call.
#[derive(Debug, Clone)]
pub struct ResolvedOptions {
    /// Scan step in seconds
    pub hop_sec: f64,
    /// Candidate threshold in [0, 1]
    pub threshold: f64,
    /// Minimum candidate spacing in seconds
    pub min_spacing_sec: f64,
    /// Windows overlapping this range are skipped
    pub skip_window: Option<TimeWindow>,
    /// Non-negative baseline weights
    pub weights: BlockWeights,
    /// Background scale, `None` when contrast features are off
    pub background_scale: Option<f64>,
    /// Refinement allowed
    pub refinement_enabled: bool,
    /// Training labels
    pub labels: Vec<RefinementLabel>,
    /// Use the query as an extra positive
    pub include_query_as_positive: bool,
    /// Logistic training settings
    pub training: TrainingConfig,
    /// Onset peak picking
    pub query_peak_pick: PeakPickOptions,
    /// Candidate peak picking (threshold and spacing filled in)
    pub candidate_peak_pick: PeakPickOptions,
    /// Cooperative cancellation
    pub cancellation: CancellationToken,
}
