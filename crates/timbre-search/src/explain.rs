//! Logit decomposition for logistic candidates.
//!
//! The logit `w·z + b` splits exactly into per-group dot products, so each
//! emitted candidate can report how much its mel, onset and cepstral blocks
//! (foreground and contrast separately) pushed the score.

use serde::{Deserialize, Serialize};

use crate::layout::{FeatureGroup, FeaturePart, FeatureVectorLayout};
use crate::scoring::logistic::sigmoid;

/// Contribution of one feature group to a logit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupContribution {
    /// Foreground slices
    pub foreground: f64,
    /// Contrast slices
    pub contrast: f64,
}

impl GroupContribution {
    /// Foreground plus contrast.
    pub fn total(&self) -> f64 {
        self.foreground + self.contrast
    }
}

/// Additive breakdown of one logistic score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreExplanation {
    /// Mel mean/variance contribution
    pub mel: GroupContribution,
    /// Onset scalar contribution
    pub onset: GroupContribution,
    /// Cepstral contribution, absent without cepstra
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mfcc: Option<GroupContribution>,
    /// Model intercept
    pub bias: f64,
    /// Full logit before clamping
    pub logit: f64,
}

impl ScoreExplanation {
    /// Sum of every part; equals `logit` up to rounding.
    pub fn sum(&self) -> f64 {
        self.mel.total() + self.onset.total() + self.mfcc.map_or(0.0, |c| c.total()) + self.bias
    }

    /// Score implied by the logit.
    pub fn score(&self) -> f64 {
        sigmoid(self.logit)
    }
}

/// Decompose `weights·z + bias` along the layout.
pub fn explain_logit(
    layout: &FeatureVectorLayout,
    weights: &[f64],
    bias: f64,
    z: &[f64],
) -> ScoreExplanation {
    let partial = |group: FeatureGroup, part: FeaturePart| -> f64 {
        layout
            .group_ranges(group, part)
            .into_iter()
            .flat_map(|range| range.filter(|&i| i < weights.len() && i < z.len()))
            .map(|i| weights[i] * z[i])
            .sum()
    };
    let contribution = |group| GroupContribution {
        foreground: partial(group, FeaturePart::Foreground),
        contrast: partial(group, FeaturePart::Contrast),
    };

    let mel = contribution(FeatureGroup::Mel);
    let onset = contribution(FeatureGroup::Onset);
    let mfcc = layout.has_mfcc().then(|| contribution(FeatureGroup::Mfcc));

    let mut explanation = ScoreExplanation {
        mel,
        onset,
        mfcc,
        bias,
        logit: 0.0,
    };
    explanation.logit = explanation.sum();
    explanation
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::logistic::logit;

    #[test]
    fn test_parts_sum_to_logit() {
        let layout = FeatureVectorLayout::new(3, 2, true);
        let n = layout.len();
        let weights: Vec<f64> = (0..n).map(|i| (i as f64 * 0.37).sin()).collect();
        let z: Vec<f64> = (0..n).map(|i| (i as f64 * 0.11).cos()).collect();

        let explanation = explain_logit(&layout, &weights, 0.25, &z);
        let direct = logit(&weights, 0.25, &z);

        assert!((explanation.logit - direct).abs() < 1e-12);
        assert!((explanation.sum() - direct).abs() < 1e-12);
        assert!((explanation.score() - sigmoid(direct)).abs() < 1e-12);
        assert!(explanation.mfcc.is_some());
    }

    #[test]
    fn test_contrast_parts_zero_without_contrast() {
        let layout = FeatureVectorLayout::new(2, 0, false);
        let weights = vec![1.0; layout.len()];
        let z = vec![1.0; layout.len()];
        let explanation = explain_logit(&layout, &weights, 0.0, &z);

        assert_eq!(explanation.mel.foreground, 4.0);
        assert_eq!(explanation.mel.contrast, 0.0);
        assert_eq!(explanation.onset.foreground, 3.0);
        assert!(explanation.mfcc.is_none());
        assert_eq!(explanation.logit, 7.0);
    }

    #[test]
    fn test_serializes_camel_case() {
        let layout = FeatureVectorLayout::new(1, 0, false);
        let explanation = explain_logit(&layout, &[0.0; 5], 1.5, &[0.0; 5]);
        let json = serde_json::to_value(&explanation).unwrap();
        assert_eq!(json["bias"], 1.5);
        assert!(json.get("mfcc").is_none());
        assert!(json["mel"].get("foreground").is_some());
    }
}
