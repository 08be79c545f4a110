//! Flat feature vector layout.
//!
//! Fingerprints are flattened into one `Vec<f64>` per window. The layout fixes
//! the offset of every block once per search, so scan vectors, label vectors
//! and model weights can be indexed by block without re-deriving positions.
//!
//! ```text
//! | mel_mean | mel_var | onset(3) | mfcc_mean | mfcc_var | <same five, contrast> |
//! ```

use std::ops::Range;

use serde::Serialize;

use crate::fingerprint::{cepstral_dims, Fingerprint, MAX_CEPSTRAL_INDEX};
use crate::types::FrameSeries;

/// Onset scalars per fingerprint: mean, max, peak density.
pub const ONSET_SCALARS: usize = 3;

/// One block of a fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureBlock {
    /// Mean per mel band
    MelMean,
    /// Variance per mel band
    MelVariance,
    /// Onset mean, max and peak density
    Onset,
    /// Mean per cepstral coefficient
    MfccMean,
    /// Variance per cepstral coefficient
    MfccVariance,
}

impl FeatureBlock {
    /// All blocks in layout order.
    pub const ALL: [FeatureBlock; 5] = [
        FeatureBlock::MelMean,
        FeatureBlock::MelVariance,
        FeatureBlock::Onset,
        FeatureBlock::MfccMean,
        FeatureBlock::MfccVariance,
    ];

    /// Scoring group this block belongs to.
    pub fn group(self) -> FeatureGroup {
        match self {
            FeatureBlock::MelMean | FeatureBlock::MelVariance => FeatureGroup::Mel,
            FeatureBlock::Onset => FeatureGroup::Onset,
            FeatureBlock::MfccMean | FeatureBlock::MfccVariance => FeatureGroup::Mfcc,
        }
    }
}

/// Blocks scored and explained together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureGroup {
    /// Mel mean and variance
    Mel,
    /// Onset scalars
    Onset,
    /// Cepstral mean and variance
    Mfcc,
}

impl FeatureGroup {
    /// All groups in layout order.
    pub const ALL: [FeatureGroup; 3] = [FeatureGroup::Mel, FeatureGroup::Onset, FeatureGroup::Mfcc];
}

/// Whether a slice holds foreground values or their local contrast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeaturePart {
    /// Statistics of the window itself
    Foreground,
    /// Window minus its surrounding background
    Contrast,
}

/// Offsets of every block in a flattened fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureVectorLayout {
    mel_bands: usize,
    mfcc_dims: usize,
    contrast: bool,
}

impl FeatureVectorLayout {
    /// Layout for `mel_bands` bands and `mfcc_dims` kept cepstral dims.
    ///
    /// Cepstral dims beyond the kept coefficients are clamped.
    pub fn new(mel_bands: usize, mfcc_dims: usize, contrast: bool) -> Self {
        Self {
            mel_bands,
            mfcc_dims: mfcc_dims.min(MAX_CEPSTRAL_INDEX),
            contrast,
        }
    }

    /// Layout matching a frame series.
    pub fn for_frames(frames: &FrameSeries, contrast: bool) -> Self {
        Self::new(
            frames.mel_bands(),
            cepstral_dims(frames.mfcc_coefficients()),
            contrast,
        )
    }

    /// Mel bands per block.
    pub fn mel_bands(&self) -> usize {
        self.mel_bands
    }

    /// Cepstral dims per block.
    pub fn mfcc_dims(&self) -> usize {
        self.mfcc_dims
    }

    /// Whether contrast blocks are present.
    pub fn has_contrast(&self) -> bool {
        self.contrast
    }

    /// Whether cepstral blocks are non-empty.
    pub fn has_mfcc(&self) -> bool {
        self.mfcc_dims > 0
    }

    fn block_len(&self, block: FeatureBlock) -> usize {
        match block {
            FeatureBlock::MelMean | FeatureBlock::MelVariance => self.mel_bands,
            FeatureBlock::Onset => ONSET_SCALARS,
            FeatureBlock::MfccMean | FeatureBlock::MfccVariance => self.mfcc_dims,
        }
    }

    fn half_len(&self) -> usize {
        2 * self.mel_bands + ONSET_SCALARS + 2 * self.mfcc_dims
    }

    /// Total vector length.
    pub fn len(&self) -> usize {
        if self.contrast {
            2 * self.half_len()
        } else {
            self.half_len()
        }
    }

    /// Always false: the onset block is never empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Range of one block, `None` for contrast blocks when contrast is off.
    pub fn slice(&self, block: FeatureBlock, part: FeaturePart) -> Option<Range<usize>> {
        let base = match part {
            FeaturePart::Foreground => 0,
            FeaturePart::Contrast if self.contrast => self.half_len(),
            FeaturePart::Contrast => return None,
        };
        let offset: usize = FeatureBlock::ALL
            .iter()
            .take_while(|&&b| b != block)
            .map(|&b| self.block_len(b))
            .sum();
        let start = base + offset;
        Some(start..start + self.block_len(block))
    }

    /// Ranges of one group and part, in layout order.
    pub fn group_ranges(&self, group: FeatureGroup, part: FeaturePart) -> Vec<Range<usize>> {
        FeatureBlock::ALL
            .iter()
            .filter(|b| b.group() == group)
            .filter_map(|&b| self.slice(b, part))
            .filter(|r| !r.is_empty())
            .collect()
    }

    /// Ranges of one group, foreground and contrast together.
    pub fn group_all(&self, group: FeatureGroup) -> Vec<Range<usize>> {
        let mut ranges = self.group_ranges(group, FeaturePart::Foreground);
        ranges.extend(self.group_ranges(group, FeaturePart::Contrast));
        ranges
    }

    /// Write a fingerprint (and its contrast) into a flat vector.
    ///
    /// With contrast enabled and `contrast` absent, the contrast blocks are
    /// zero. Blocks shorter than the layout are zero-padded.
    pub fn flatten(&self, fingerprint: &Fingerprint, contrast: Option<&Fingerprint>) -> Vec<f64> {
        let mut out = vec![0.0; self.len()];
        self.write(&mut out, FeaturePart::Foreground, fingerprint);
        if let Some(contrast) = contrast {
            self.write(&mut out, FeaturePart::Contrast, contrast);
        }
        out
    }

    fn write(&self, out: &mut [f64], part: FeaturePart, fp: &Fingerprint) {
        let onset = fp.onset_scalars();
        for block in FeatureBlock::ALL {
            let Some(range) = self.slice(block, part) else {
                continue;
            };
            let source: &[f64] = match block {
                FeatureBlock::MelMean => &fp.mel_mean,
                FeatureBlock::MelVariance => &fp.mel_variance,
                FeatureBlock::Onset => &onset,
                FeatureBlock::MfccMean => &fp.mfcc_mean,
                FeatureBlock::MfccVariance => &fp.mfcc_variance,
            };
            for (dst, src) in out[range].iter_mut().zip(source.iter()) {
                *dst = *src;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lengths() {
        let layout = FeatureVectorLayout::new(4, 12, false);
        assert_eq!(layout.len(), 4 * 2 + 3 + 12 * 2);

        let with_contrast = FeatureVectorLayout::new(4, 12, true);
        assert_eq!(with_contrast.len(), 2 * layout.len());
    }

    #[test]
    fn test_slices_are_contiguous_and_ordered() {
        let layout = FeatureVectorLayout::new(5, 3, true);
        let mut cursor = 0;
        for part in [FeaturePart::Foreground, FeaturePart::Contrast] {
            for block in FeatureBlock::ALL {
                let range = layout.slice(block, part).unwrap();
                assert_eq!(range.start, cursor);
                cursor = range.end;
            }
        }
        assert_eq!(cursor, layout.len());
    }

    #[test]
    fn test_contrast_slice_absent_when_disabled() {
        let layout = FeatureVectorLayout::new(5, 3, false);
        assert!(layout.slice(FeatureBlock::MelMean, FeaturePart::Contrast).is_none());
        assert!(layout.group_ranges(FeatureGroup::Onset, FeaturePart::Contrast).is_empty());
        assert_eq!(layout.group_all(FeatureGroup::Mel), vec![0..5, 5..10]);
    }

    #[test]
    fn test_no_mfcc_group_without_cepstra() {
        let layout = FeatureVectorLayout::new(8, 0, true);
        assert!(!layout.has_mfcc());
        assert!(layout.group_all(FeatureGroup::Mfcc).is_empty());
        assert_eq!(layout.group_all(FeatureGroup::Onset).len(), 2);
    }

    #[test]
    fn test_clamps_dimensions() {
        let layout = FeatureVectorLayout::new(4, 40, false);
        assert_eq!(layout.mfcc_dims(), 12);
    }

    #[test]
    fn test_keeps_every_mel_band() {
        let layout = FeatureVectorLayout::new(1100, 0, true);
        assert_eq!(layout.mel_bands(), 1100);
        let contrast = layout.slice(FeatureBlock::MelVariance, FeaturePart::Contrast).unwrap();
        assert_eq!(contrast.len(), 1100);

        let mut fp = Fingerprint::zeros(1100, 0);
        fp.mel_mean[1099] = 50.0;
        let v = layout.flatten(&fp, None);
        assert_eq!(v[1099], 50.0);
    }

    #[test]
    fn test_flatten_places_blocks() {
        let layout = FeatureVectorLayout::new(2, 1, true);
        let mut fp = Fingerprint::zeros(2, 1);
        fp.mel_mean = vec![1.0, 2.0];
        fp.onset_max = 7.0;
        fp.mfcc_variance = vec![9.0];
        let mut contrast = Fingerprint::zeros(2, 1);
        contrast.onset_peak_density = -3.0;

        let v = layout.flatten(&fp, Some(&contrast));
        assert_eq!(v.len(), layout.len());
        assert_eq!(&v[0..2], &[1.0, 2.0]);
        let onset = layout.slice(FeatureBlock::Onset, FeaturePart::Foreground).unwrap();
        assert_eq!(v[onset.start + 1], 7.0);
        let mfcc_var = layout.slice(FeatureBlock::MfccVariance, FeaturePart::Foreground).unwrap();
        assert_eq!(v[mfcc_var.start], 9.0);
        let onset_c = layout.slice(FeatureBlock::Onset, FeaturePart::Contrast).unwrap();
        assert_eq!(v[onset_c.start + 2], -3.0);
    }
}
