//! Baseline block cosine similarity.

use std::ops::Range;

use crate::config::BlockWeights;
use crate::layout::{FeatureGroup, FeatureVectorLayout};

/// Norms below this count as zero.
pub const NORM_EPSILON: f64 = 1e-12;

/// Cosine similarity over a set of index ranges.
///
/// Returns `None` when either side has a near-zero norm.
pub fn cosine_over(a: &[f64], b: &[f64], ranges: &[Range<usize>]) -> Option<f64> {
    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;

    for range in ranges {
        let end = range.end.min(a.len()).min(b.len());
        let start = range.start.min(end);
        for (x, y) in a[start..end].iter().zip(b[start..end].iter()) {
            dot += x * y;
            norm_a += x * x;
            norm_b += y * y;
        }
    }

    let norm_a = norm_a.sqrt();
    let norm_b = norm_b.sqrt();
    if norm_a < NORM_EPSILON || norm_b < NORM_EPSILON {
        return None;
    }

    Some((dot / (norm_a * norm_b)).clamp(-1.0, 1.0))
}

/// Cosine similarity of two whole vectors, 0 for mismatched lengths or
/// zero norms.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }
    cosine_over(a, b, &[0..a.len()]).unwrap_or(0.0)
}

/// Map a cosine in [-1, 1] to a score in [0, 1].
pub fn rescale(cosine: f64) -> f64 {
    if cosine.is_nan() {
        return 0.0;
    }
    ((cosine + 1.0) / 2.0).clamp(0.0, 1.0)
}

fn group_weight(weights: &BlockWeights, group: FeatureGroup) -> f64 {
    match group {
        FeatureGroup::Mel => weights.mel,
        FeatureGroup::Onset => weights.transient,
        FeatureGroup::Mfcc => weights.mfcc,
    }
}

/// Combined cosine `Σ w²·cos / Σ w²` over the mel, onset and cepstral groups.
///
/// Each group covers its foreground and contrast slices. A group with a
/// zero norm on either side adds nothing to the numerator but keeps its
/// weight in the denominator. All-zero weights give 0.
pub fn weighted_cosine(
    layout: &FeatureVectorLayout,
    a: &[f64],
    b: &[f64],
    weights: &BlockWeights,
) -> f64 {
    let mut numerator = 0.0;
    let mut denominator = 0.0;

    for group in FeatureGroup::ALL {
        let ranges = layout.group_all(group);
        if ranges.is_empty() {
            continue;
        }
        let w = group_weight(weights, group);
        let w2 = w * w;
        if w2 == 0.0 {
            continue;
        }
        denominator += w2;
        if let Some(cos) = cosine_over(a, b, &ranges) {
            numerator += w2 * cos;
        }
    }

    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

/// Baseline score in [0, 1].
pub fn baseline_score(
    layout: &FeatureVectorLayout,
    window: &[f64],
    query: &[f64],
    weights: &BlockWeights,
) -> f64 {
    rescale(weighted_cosine(layout, window, query, weights))
}
