//! Sliding window aggregation.
//!
//! A search featurises thousands of overlapping windows of one duration. The
//! scanner keeps running sums for the foreground window and its background in
//! lockstep, so moving to the next window only touches the frames that entered
//! or left. Onset statistics come from an [`OnsetIndex`] answering range
//! sum, range max and peak count queries in O(1).
//!
//! Direct featurisation of arbitrary windows (query, labels, explained
//! candidates) uses the same [`FrameTotals`] arithmetic, so a scan vector and
//! a direct vector of the same window agree up to rounding.

use std::ops::Range;

use tracing::debug;

use crate::cancel::CancellationToken;
use crate::error::Result;
use crate::fingerprint::{Fingerprint, FrameTotals};
use crate::layout::FeatureVectorLayout;
use crate::peaks::{pick_peaks, PeakPickOptions};
use crate::types::{FrameSeries, TimeWindow};

const GRID_EPSILON: f64 = 1e-9;

/// Scan windows of `duration` seconds every `hop` seconds inside `[0, end_time]`.
///
/// Empty when the track is shorter than the window.
pub fn scan_windows(end_time: f64, duration: f64, hop: f64) -> Vec<TimeWindow> {
    if !(duration > 0.0) || !(hop > 0.0) || duration > end_time + GRID_EPSILON {
        return Vec::new();
    }
    let count = ((end_time - duration) / hop + GRID_EPSILON).floor() as usize + 1;
    (0..count)
        .map(|k| {
            let start = k as f64 * hop;
            TimeWindow::new(start, start + duration)
        })
        .collect()
}

/// Running totals over a frame index range that only moves forward.
#[derive(Debug, Clone)]
pub struct RunningTotals<'a> {
    frames: &'a FrameSeries,
    range: Range<usize>,
    totals: FrameTotals,
}

impl<'a> RunningTotals<'a> {
    /// Empty totals positioned at frame 0.
    pub fn new(frames: &'a FrameSeries, mfcc_dims: usize) -> Self {
        Self {
            frames,
            range: 0..0,
            totals: FrameTotals::zeros(frames.mel_bands(), mfcc_dims),
        }
    }

    /// Move to `new_start..new_end`.
    ///
    /// Frames entering at the end are added before frames leaving at the
    /// start are removed. A range moving backwards is rebuilt from scratch.
    pub fn advance(&mut self, new_start: usize, new_end: usize) {
        let new_end = new_end.max(new_start);
        if new_start < self.range.start || new_end < self.range.end {
            let mfcc_dims = self.totals.mfcc_sum.len();
            self.totals = FrameTotals::over(self.frames, new_start..new_end, mfcc_dims);
            self.range = new_start..new_end;
            return;
        }

        for i in self.range.end.max(new_start)..new_end {
            self.totals.add_frame(self.frames, i);
        }
        for i in self.range.start..new_start.min(self.range.end) {
            self.totals.remove_frame(self.frames, i);
        }
        self.range = new_start..new_end;
    }

    /// Current totals.
    pub fn totals(&self) -> &FrameTotals {
        &self.totals
    }
}

/// Range max in O(1) after an O(n log n) build.
#[derive(Debug, Clone)]
pub struct SparseTable {
    levels: Vec<Vec<f64>>,
}

impl SparseTable {
    /// Build over `values`.
    pub fn build(values: &[f64], cancel: &CancellationToken) -> Result<Self> {
        let mut checkpoint = cancel.checkpoint();
        let mut levels = vec![values.to_vec()];
        let mut width = 1;
        while 2 * width <= values.len() {
            let prev = &levels[levels.len() - 1];
            let mut next = Vec::with_capacity(prev.len() - width);
            for i in 0..prev.len() - width {
                checkpoint.tick()?;
                next.push(prev[i].max(prev[i + width]));
            }
            levels.push(next);
            width *= 2;
        }
        Ok(Self { levels })
    }

    /// Maximum over `range`, `None` when it is empty.
    pub fn max(&self, range: Range<usize>) -> Option<f64> {
        let len = range.end.checked_sub(range.start).filter(|&n| n > 0)?;
        if range.end > self.levels[0].len() {
            return None;
        }
        let level = (usize::BITS - 1 - len.leading_zeros()) as usize;
        let row = &self.levels[level];
        Some(row[range.start].max(row[range.end - (1 << level)]))
    }
}

/// Constant-time onset statistics over frame ranges.
#[derive(Debug, Clone)]
pub struct OnsetIndex {
    prefix: Vec<f64>,
    table: SparseTable,
    peak_prefix: Vec<usize>,
}

impl OnsetIndex {
    /// Build prefix sums, the range-max table and the peak mask.
    ///
    /// Peaks are picked once over the whole envelope.
    pub fn build(
        frames: &FrameSeries,
        peak_pick: &PeakPickOptions,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let values: Vec<f64> = frames.onset().iter().map(|&v| v as f64).collect();
        let mut checkpoint = cancel.checkpoint();

        let mut prefix = Vec::with_capacity(values.len() + 1);
        prefix.push(0.0);
        let mut acc = 0.0;
        for &v in &values {
            checkpoint.tick()?;
            acc += v;
            prefix.push(acc);
        }

        let table = SparseTable::build(&values, cancel)?;

        cancel.check()?;
        let peaks = pick_peaks(frames.times(), &values, peak_pick, None);
        cancel.check()?;
        let mut mask = vec![false; values.len()];
        for peak in &peaks {
            mask[peak.index] = true;
        }
        let mut peak_prefix = Vec::with_capacity(values.len() + 1);
        peak_prefix.push(0);
        let mut count = 0;
        for &is_peak in &mask {
            checkpoint.tick()?;
            count += usize::from(is_peak);
            peak_prefix.push(count);
        }

        debug!(
            "Onset index: {} frames, {} peaks",
            values.len(),
            peaks.len()
        );

        Ok(Self {
            prefix,
            table,
            peak_prefix,
        })
    }

    /// Onset sum over `range`.
    pub fn sum(&self, range: Range<usize>) -> f64 {
        match (self.prefix.get(range.end), self.prefix.get(range.start)) {
            (Some(hi), Some(lo)) if range.end > range.start => hi - lo,
            _ => 0.0,
        }
    }

    /// Onset mean over `range`, 0 when empty.
    pub fn mean(&self, range: Range<usize>) -> f64 {
        let n = range.len();
        if n == 0 {
            0.0
        } else {
            self.sum(range) / n as f64
        }
    }

    /// Onset max over `range`.
    pub fn max(&self, range: Range<usize>) -> Option<f64> {
        self.table.max(range)
    }

    /// Onset peaks inside `range`.
    pub fn peak_count(&self, range: Range<usize>) -> usize {
        match (self.peak_prefix.get(range.end), self.peak_prefix.get(range.start)) {
            (Some(hi), Some(lo)) if range.end > range.start => hi - lo,
            _ => 0,
        }
    }
}

/// Forward-only time-to-frame cursor.
#[derive(Debug, Clone, Default)]
struct FrameCursor {
    pos: usize,
}

impl FrameCursor {
    /// First index whose time is not `before(t)`, seeking forward from the
    /// last answer. Falls back to binary search when `t` moved backwards.
    fn seek(&mut self, times: &[f64], t: f64, before: impl Fn(f64, f64) -> bool) -> usize {
        if self.pos > 0 && !before(times[self.pos - 1], t) {
            self.pos = times.partition_point(|&x| before(x, t));
            return self.pos;
        }
        while self.pos < times.len() && before(times[self.pos], t) {
            self.pos += 1;
        }
        self.pos
    }
}

/// Cursor pair resolving windows to frame ranges with the same bounds as
/// [`FrameSeries::frame_range`].
#[derive(Debug, Clone, Default)]
struct WindowCursor {
    lo: FrameCursor,
    hi: FrameCursor,
}

impl WindowCursor {
    fn range(&mut self, times: &[f64], window: TimeWindow) -> Range<usize> {
        let lo = self.lo.seek(times, window.start, |x, t| x < t);
        let hi = self.hi.seek(times, window.end, |x, t| x <= t);
        lo..hi.max(lo)
    }
}

/// Turns windows into flat feature vectors for one search.
#[derive(Debug, Clone)]
pub struct WindowFeaturizer<'a> {
    frames: &'a FrameSeries,
    layout: FeatureVectorLayout,
    onset: OnsetIndex,
    background_scale: Option<f64>,
}

impl<'a> WindowFeaturizer<'a> {
    /// Create a featuriser. Contrast blocks are produced when
    /// `background_scale` is set and the layout carries them.
    pub fn new(
        frames: &'a FrameSeries,
        layout: FeatureVectorLayout,
        onset: OnsetIndex,
        background_scale: Option<f64>,
    ) -> Self {
        let background_scale = background_scale.filter(|_| layout.has_contrast());
        Self {
            frames,
            layout,
            onset,
            background_scale,
        }
    }

    /// Vector layout.
    pub fn layout(&self) -> &FeatureVectorLayout {
        &self.layout
    }

    /// Background window of `window`: centred, scaled, clamped to the track
    /// and never smaller than the window itself.
    pub fn background_window(&self, window: TimeWindow, scale: f64) -> TimeWindow {
        let center = (window.start + window.end) / 2.0;
        let half = window.duration() * scale / 2.0;
        let end_time = self.frames.end_time();
        TimeWindow::new(
            (center - half).max(0.0).min(window.start),
            (center + half).min(end_time).max(window.end),
        )
    }

    /// Featurise one window from scratch.
    pub fn featurize(&self, window: TimeWindow) -> Vec<f64> {
        let fg_range = self.frames.frame_range(window);
        let fg = FrameTotals::over(self.frames, fg_range.clone(), self.layout.mfcc_dims());

        let background = self.background_scale.map(|scale| {
            let bg_window = self.background_window(window, scale);
            let bg_range = self.frames.frame_range(bg_window);
            let bg = FrameTotals::over(self.frames, bg_range.clone(), self.layout.mfcc_dims());
            (bg_window, bg_range, bg)
        });

        self.assemble(
            window,
            fg_range,
            &fg,
            background.as_ref().map(|(w, r, t)| (*w, r.clone(), t)),
        )
    }

    /// A scanner for one forward pass.
    pub fn scanner(&self) -> WindowScanner<'_, 'a> {
        let mfcc_dims = self.layout.mfcc_dims();
        WindowScanner {
            featurizer: self,
            fg_cursor: WindowCursor::default(),
            bg_cursor: WindowCursor::default(),
            foreground: RunningTotals::new(self.frames, mfcc_dims),
            background: self
                .background_scale
                .map(|_| RunningTotals::new(self.frames, mfcc_dims)),
        }
    }

    fn foreground_fingerprint(
        &self,
        window: TimeWindow,
        range: Range<usize>,
        totals: &FrameTotals,
    ) -> Fingerprint {
        let density = if window.duration() > 0.0 {
            self.onset.peak_count(range.clone()) as f64 / window.duration()
        } else {
            0.0
        };
        totals.fingerprint(
            self.onset.mean(range.clone()),
            self.onset.max(range).unwrap_or(0.0),
            density,
        )
    }

    fn assemble(
        &self,
        window: TimeWindow,
        fg_range: Range<usize>,
        fg: &FrameTotals,
        background: Option<(TimeWindow, Range<usize>, &FrameTotals)>,
    ) -> Vec<f64> {
        let foreground = self.foreground_fingerprint(window, fg_range.clone(), fg);

        let contrast = background.map(|(bg_window, bg_range, bg)| {
            let excluded = bg.excluding(fg);
            if excluded.count == 0 || fg_range.is_empty() {
                return Fingerprint::zeros(self.layout.mel_bands(), self.layout.mfcc_dims());
            }

            let onset_sum = self.onset.sum(bg_range.clone()) - self.onset.sum(fg_range.clone());
            let left = self.onset.max(bg_range.start..fg_range.start);
            let right = self.onset.max(fg_range.end..bg_range.end);
            let onset_max = match (left, right) {
                (Some(a), Some(b)) => a.max(b),
                (Some(a), None) | (None, Some(a)) => a,
                (None, None) => foreground.onset_max,
            };
            let peaks = self
                .onset
                .peak_count(bg_range)
                .saturating_sub(self.onset.peak_count(fg_range.clone()));
            let excluded_duration = bg_window.duration() - window.duration();
            let density = if excluded_duration > 0.0 {
                peaks as f64 / excluded_duration
            } else {
                foreground.onset_peak_density
            };

            let onset_mean = onset_sum / excluded.count as f64;
            let outside = excluded.fingerprint(onset_mean, onset_max, density);
            foreground.contrast(&outside)
        });

        self.layout.flatten(&foreground, contrast.as_ref())
    }
}

/// Forward pass over monotonically increasing windows.
#[derive(Debug)]
pub struct WindowScanner<'f, 'a> {
    featurizer: &'f WindowFeaturizer<'a>,
    fg_cursor: WindowCursor,
    bg_cursor: WindowCursor,
    foreground: RunningTotals<'a>,
    background: Option<RunningTotals<'a>>,
}

impl WindowScanner<'_, '_> {
    /// Feature vector of the next window.
    pub fn next_window(&mut self, window: TimeWindow) -> Vec<f64> {
        let featurizer = self.featurizer;
        let times = featurizer.frames.times();

        let fg_range = self.fg_cursor.range(times, window);
        self.foreground.advance(fg_range.start, fg_range.end);

        let background = match (self.background.as_mut(), featurizer.background_scale) {
            (Some(bg), Some(scale)) => {
                let bg_window = featurizer.background_window(window, scale);
                let bg_range = self.bg_cursor.range(times, bg_window);
                bg.advance(bg_range.start, bg_range.end);
                Some((bg_window, bg_range, &*bg))
            }
            _ => None,
        };

        featurizer.assemble(
            window,
            fg_range,
            self.foreground.totals(),
            background.map(|(w, r, bg)| (w, r, bg.totals())),
        )
    }
}
