//! Peak picking over scalar curves.
//!
//! Used twice per search: once over the onset envelope (to mark onset peaks
//! for the peak-density feature) and once over the final score curve (to turn
//! it into discrete candidates).
//!
//! The scan runs left to right. A peak closer than `min_spacing_sec` to the
//! previously accepted one replaces it only when strictly stronger, so the
//! output is time-ordered and consecutive peaks are always at least
//! `min_spacing_sec` apart.

use serde::{Deserialize, Serialize};
use tracing::trace;

/// Minimum peak height policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum PeakThreshold {
    /// Absolute height
    Fixed {
        /// Minimum value
        value: f64,
    },
    /// `mean + factor * stdev` of the curve
    MeanStd {
        /// Standard deviation multiplier
        factor: f64,
    },
    /// `median * factor` of the curve
    Median {
        /// Median multiplier
        factor: f64,
    },
}

impl PeakThreshold {
    /// Resolve the policy into an absolute height for `values`.
    pub fn resolve(&self, values: &[f64]) -> f64 {
        match *self {
            PeakThreshold::Fixed { value } => value,
            PeakThreshold::MeanStd { factor } => {
                if values.is_empty() {
                    return 0.0;
                }
                let n = values.len() as f64;
                let mean = values.iter().sum::<f64>() / n;
                let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
                mean + factor * variance.sqrt()
            }
            PeakThreshold::Median { factor } => median(values) * factor,
        }
    }
}

fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Peak picking parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PeakPickOptions {
    /// Minimum peak height
    pub threshold: PeakThreshold,
    /// Minimum time between accepted peaks
    pub min_spacing_sec: f64,
    /// Require strictly greater values than both neighbours
    pub strict: bool,
}

impl Default for PeakPickOptions {
    /// Onset-envelope defaults.
    fn default() -> Self {
        Self {
            threshold: PeakThreshold::MeanStd { factor: 1.0 },
            min_spacing_sec: 0.05,
            strict: true,
        }
    }
}

/// An accepted peak.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    /// Index into the input curve
    pub index: usize,
    /// Time of the peak
    pub time: f64,
    /// Curve value at the peak
    pub value: f64,
}

/// Pick peaks from a curve sampled at `times`.
///
/// Indices flagged in `skip` are never reported. Non-finite values are never
/// peaks. `times` and `values` must have the same length; extra entries of
/// the longer slice are ignored.
pub fn pick_peaks(
    times: &[f64],
    values: &[f64],
    options: &PeakPickOptions,
    skip: Option<&[bool]>,
) -> Vec<Peak> {
    let n = times.len().min(values.len());
    let values = &values[..n];
    let height = options.threshold.resolve(values);
    let spacing = options.min_spacing_sec.max(0.0);

    let mut peaks: Vec<Peak> = Vec::new();

    for i in 0..n {
        let value = values[i];
        if !value.is_finite() || value < height {
            continue;
        }
        if skip.map_or(false, |mask| mask.get(i).copied().unwrap_or(false)) {
            continue;
        }

        let left = if i > 0 { values[i - 1] } else { f64::NEG_INFINITY };
        let right = if i + 1 < n { values[i + 1] } else { f64::NEG_INFINITY };
        let is_peak = if options.strict {
            value > left && value > right
        } else {
            value >= left && value >= right
        };
        if !is_peak {
            continue;
        }

        let candidate = Peak {
            index: i,
            time: times[i],
            value,
        };

        match peaks.last_mut() {
            Some(last) if candidate.time - last.time < spacing => {
                if candidate.value > last.value {
                    *last = candidate;
                }
            }
            _ => peaks.push(candidate),
        }
    }

    trace!(
        "Picked {} peaks from {} values (height {:.4}, spacing {:.3}s)",
        peaks.len(),
        n,
        height,
        spacing
    );

    peaks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed(value: f64, spacing: f64, strict: bool) -> PeakPickOptions {
        PeakPickOptions {
            threshold: PeakThreshold::Fixed { value },
            min_spacing_sec: spacing,
            strict,
        }
    }

    fn unit_times(n: usize) -> Vec<f64> {
        (0..n).map(|i| i as f64).collect()
    }

    #[test]
    fn test_simple_peaks() {
        let values = vec![0.0, 0.5, 1.0, 0.7, 0.3, 0.9, 0.2];
        let peaks = pick_peaks(&unit_times(7), &values, &fixed(0.5, 0.0, true), None);
        let indices: Vec<usize> = peaks.iter().map(|p| p.index).collect();
        assert_eq!(indices, vec![2, 5]);
    }

    #[test]
    fn test_spacing_keeps_stronger_peak() {
        let values = vec![0.0, 0.8, 0.0, 0.9, 0.0, 0.1, 0.0, 0.95, 0.0];
        let peaks = pick_peaks(&unit_times(9), &values, &fixed(0.5, 3.0, true), None);
        let indices: Vec<usize> = peaks.iter().map(|p| p.index).collect();
        // 0.9 at 3 replaces 0.8 at 1; 0.95 at 7 is 4s later
        assert_eq!(indices, vec![3, 7]);
    }

    #[test]
    fn test_weaker_peak_within_spacing_dropped() {
        let values = vec![0.0, 0.9, 0.0, 0.8, 0.0];
        let peaks = pick_peaks(&unit_times(5), &values, &fixed(0.5, 3.0, true), None);
        assert_eq!(peaks.len(), 1);
        assert_eq!(peaks[0].index, 1);
    }

    #[test]
    fn test_output_respects_spacing() {
        let values: Vec<f64> = (0..200).map(|i| ((i as f64) * 0.37).sin().abs()).collect();
        let times: Vec<f64> = (0..200).map(|i| i as f64 * 0.03).collect();
        let peaks = pick_peaks(&times, &values, &fixed(0.2, 0.4, false), None);
        for pair in peaks.windows(2) {
            assert!(pair[1].time - pair[0].time >= 0.4 - 1e-9);
        }
    }

    #[test]
    fn test_strict_vs_plateau() {
        let values = vec![0.0, 1.0, 1.0, 0.0];
        assert!(pick_peaks(&unit_times(4), &values, &fixed(0.5, 0.0, true), None).is_empty());

        let peaks = pick_peaks(&unit_times(4), &values, &fixed(0.5, 0.0, false), None);
        assert_eq!(peaks.len(), 2);
        assert_eq!(peaks[0].index, 1);
    }

    #[test]
    fn test_plateau_with_spacing_keeps_first() {
        let values = vec![0.0, 1.0, 1.0, 0.0];
        let peaks = pick_peaks(&unit_times(4), &values, &fixed(0.5, 5.0, false), None);
        assert_eq!(peaks.len(), 1);
        assert_eq!(peaks[0].index, 1);
    }

    #[test]
    fn test_edges_can_be_peaks() {
        let values = vec![1.0, 0.5, 0.2, 0.9];
        let peaks = pick_peaks(&unit_times(4), &values, &fixed(0.5, 0.0, true), None);
        let indices: Vec<usize> = peaks.iter().map(|p| p.index).collect();
        assert_eq!(indices, vec![0, 3]);
    }

    #[test]
    fn test_skip_mask() {
        let values = vec![0.0, 1.0, 0.0, 0.8, 0.0];
        let skip = vec![false, true, false, false, false];
        let peaks = pick_peaks(&unit_times(5), &values, &fixed(0.5, 0.0, true), Some(&skip));
        assert_eq!(peaks.len(), 1);
        assert_eq!(peaks[0].index, 3);
    }

    #[test]
    fn test_adaptive_thresholds() {
        let values = vec![1.0, 1.0, 1.0, 5.0];
        let mean_std = PeakThreshold::MeanStd { factor: 1.0 }.resolve(&values);
        // mean 2, stdev sqrt(3)
        assert!((mean_std - (2.0 + 3.0f64.sqrt())).abs() < 1e-12);

        let med = PeakThreshold::Median { factor: 2.0 }.resolve(&values);
        assert!((med - 2.0).abs() < 1e-12);

        assert_eq!(PeakThreshold::MeanStd { factor: 1.0 }.resolve(&[]), 0.0);
    }

    #[test]
    fn test_empty_input() {
        assert!(pick_peaks(&[], &[], &PeakPickOptions::default(), None).is_empty());
    }

    #[test]
    fn test_options_json() {
        let options: PeakPickOptions =
            serde_json::from_str(r#"{"threshold": {"mode": "median", "factor": 1.5}}"#).unwrap();
        assert_eq!(options.threshold, PeakThreshold::Median { factor: 1.5 });
        assert!(options.strict);
    }
}
