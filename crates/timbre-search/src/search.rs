//! Search orchestration.
//!
//! A call runs through fixed phases:
//!
//! 1. resolve options, build the layout, onset index and query vector
//! 2. pick a model from the valid labels
//! 3. baseline: one scoring pass against the query vector
//! 4. trained: a statistics pass, training, then a scoring pass
//! 5. peak-pick candidates and, for logistic models, explain them
//!
//! A failure anywhere in the trained branch other than cancellation drops
//! that branch and reruns the baseline from scratch.

use std::time::Instant;

use tracing::{debug, info, warn};

use crate::cancel::CancellationToken;
use crate::config::{ResolvedOptions, SearchOptions};
use crate::error::{Error, Result};
use crate::explain::explain_logit;
use crate::fingerprint::{Fingerprint, FingerprintExtractor, FingerprintMode};
use crate::layout::FeatureVectorLayout;
use crate::peaks::pick_peaks;
use crate::scoring::{Model, Scorer, Standardizer, StandardizerBuilder};
use crate::sliding::{scan_windows, OnsetIndex, WindowFeaturizer};
use crate::types::{
    CurveKind, FrameSeries, LabelSource, LabelStatus, ModelKind, ModelSummary, SearchCandidate,
    SearchResult, SearchTimings, TimeWindow,
};

/// Plain similarity search: every window scored against the query.
///
/// Labels in `options` are ignored.
pub fn search(
    query: TimeWindow,
    frames: &FrameSeries,
    options: &SearchOptions,
) -> Result<SearchResult> {
    run(query, frames, options, false)
}

/// Refinement-aware search.
///
/// With at least two accepted labels the curve comes from a trained model
/// (prototype without rejections, logistic with them). Training failures
/// fall back to the baseline and are reported in `model.fallback_reason`.
pub fn guided_search(
    query: TimeWindow,
    frames: &FrameSeries,
    options: &SearchOptions,
) -> Result<SearchResult> {
    run(query, frames, options, true)
}

/// Energy-weighted fingerprint of a single window.
pub fn fingerprint_window(
    window: TimeWindow,
    frames: &FrameSeries,
    options: &SearchOptions,
) -> Result<Fingerprint> {
    if !window.is_valid() {
        return Err(Error::InvalidQuery {
            start: window.start,
            end: window.end,
        });
    }
    options.cancellation.check()?;
    FingerprintExtractor::new(FingerprintMode::EnergyWeighted, options.query_peak_pick).extract(
        frames,
        window,
        &options.cancellation,
    )
}

fn elapsed_ms(since: Instant) -> f64 {
    since.elapsed().as_secs_f64() * 1000.0
}

/// Valid labels of one call, split by status.
#[derive(Debug, Default)]
struct LabelSet {
    accepted: Vec<TimeWindow>,
    rejected: Vec<TimeWindow>,
    auto: usize,
    manual: usize,
    ignored: usize,
}

impl LabelSet {
    fn collect(frames: &FrameSeries, resolved: &ResolvedOptions) -> Self {
        let mut set = LabelSet::default();
        for label in &resolved.labels {
            let window = label.window();
            if !window.is_valid() || frames.frame_range(window).is_empty() {
                warn!(
                    "Ignoring label {:.3}s..{:.3}s: no frames in window",
                    label.start, label.end
                );
                set.ignored += 1;
                continue;
            }
            match label.status {
                LabelStatus::Accepted => set.accepted.push(window),
                LabelStatus::Rejected => set.rejected.push(window),
            }
            match label.source {
                LabelSource::Auto => set.auto += 1,
                LabelSource::Manual => set.manual += 1,
            }
        }
        set
    }

    fn summary(&self, kind: ModelKind) -> ModelSummary {
        ModelSummary {
            kind,
            accepted_labels: self.accepted.len(),
            rejected_labels: self.rejected.len(),
            auto_labels: self.auto,
            manual_labels: self.manual,
            ignored_labels: self.ignored,
            diagnostics: None,
            fallback_reason: None,
        }
    }
}

/// Everything computed once per call before scanning.
struct SearchContext<'a> {
    query: TimeWindow,
    resolved: ResolvedOptions,
    windows: Vec<TimeWindow>,
    skip_mask: Vec<bool>,
    featurizer: WindowFeaturizer<'a>,
    query_vector: Vec<f64>,
}

impl SearchContext<'_> {
    fn cancel(&self) -> &CancellationToken {
        &self.resolved.cancellation
    }

    fn layout(&self) -> &FeatureVectorLayout {
        self.featurizer.layout()
    }

    fn skipped(&self) -> usize {
        self.skip_mask.iter().filter(|&&s| s).count()
    }

    /// Score every window; skipped ones get exactly 0.
    fn score_pass(&self, scorer: &Scorer<'_>) -> Result<Vec<f64>> {
        let mut checkpoint = self.cancel().checkpoint();
        let mut scanner = self.featurizer.scanner();
        let mut scores = Vec::with_capacity(self.windows.len());
        for (window, &skip) in self.windows.iter().zip(&self.skip_mask) {
            checkpoint.tick()?;
            if skip {
                scores.push(0.0);
                continue;
            }
            let vector = scanner.next_window(*window);
            scores.push(scorer.score(&vector)?);
        }
        Ok(scores)
    }

    /// Z-score statistics over every window of the track.
    fn statistics_pass(&self) -> Result<Standardizer> {
        let mut checkpoint = self.cancel().checkpoint();
        let mut scanner = self.featurizer.scanner();
        let mut builder = StandardizerBuilder::new(self.layout().len());
        for window in &self.windows {
            checkpoint.tick()?;
            builder.push(&scanner.next_window(*window))?;
        }
        Ok(builder.finish())
    }
}

/// Output of a scoring branch.
struct Scored {
    model: Model,
    scores: Vec<f64>,
    standardizer: Option<Standardizer>,
    scan_ms: f64,
    training_ms: f64,
}

fn run(
    query: TimeWindow,
    frames: &FrameSeries,
    options: &SearchOptions,
    refine: bool,
) -> Result<SearchResult> {
    let started = Instant::now();
    let resolved = options.resolve(query)?;
    resolved.cancellation.check()?;

    info!(
        "Searching {:.3}s..{:.3}s over {} frames (refine={})",
        query.start,
        query.end,
        frames.len(),
        refine
    );

    let windows = scan_windows(frames.end_time(), query.duration(), resolved.hop_sec);
    if frames.is_empty() || windows.is_empty() {
        info!(
            "Track ({:.3}s) too short for a {:.3}s query",
            frames.end_time(),
            query.duration()
        );
        let mut result = SearchResult::empty(query);
        result.timings.total_ms = elapsed_ms(started);
        return Ok(result);
    }

    let layout = FeatureVectorLayout::for_frames(frames, resolved.background_scale.is_some());
    let onset = OnsetIndex::build(frames, &resolved.query_peak_pick, &resolved.cancellation)?;
    let featurizer = WindowFeaturizer::new(frames, layout, onset, resolved.background_scale);
    let query_vector = featurizer.featurize(query);
    let skip_mask = windows
        .iter()
        .map(|w| resolved.skip_window.is_some_and(|skip| w.overlaps(&skip)))
        .collect();

    let ctx = SearchContext {
        query,
        resolved,
        windows,
        skip_mask,
        featurizer,
        query_vector,
    };
    let feature_prep_ms = elapsed_ms(started);
    ctx.cancel().check()?;

    debug!(
        "Prepared {} windows of {} dims ({} skipped) in {:.1}ms",
        ctx.windows.len(),
        ctx.layout().len(),
        ctx.skipped(),
        feature_prep_ms
    );

    let labels = if refine {
        LabelSet::collect(frames, &ctx.resolved)
    } else {
        LabelSet::default()
    };
    let kind = Model::select(
        labels.accepted.len(),
        labels.rejected.len(),
        refine && ctx.resolved.refinement_enabled,
    );
    let mut summary = labels.summary(kind);

    let scored = match kind {
        ModelKind::Baseline => baseline(&ctx)?,
        trained => match refined(&ctx, &labels, trained) {
            Ok(scored) => scored,
            Err(e) if e.is_cancellation() => return Err(e),
            Err(e) => {
                warn!("Refinement failed ({}), falling back to baseline", e);
                summary.fallback_reason = Some(e.to_string());
                baseline(&ctx)?
            }
        },
    };

    ctx.cancel().check()?;
    summary.kind = scored.model.kind();
    summary.diagnostics = scored.model.diagnostics().cloned();

    let candidates = extract_candidates(&ctx, &scored)?;

    let curve_kind = match scored.model {
        Model::Baseline => CurveKind::Similarity,
        _ => CurveKind::Confidence,
    };

    let result = SearchResult {
        query: ctx.query,
        times: ctx.windows.iter().map(|w| w.start).collect(),
        scanned_windows: ctx.windows.len(),
        skipped_windows: ctx.skipped(),
        scores: scored.scores,
        curve_kind,
        candidates,
        model: summary,
        timings: SearchTimings {
            feature_prep_ms,
            scan_ms: scored.scan_ms,
            training_ms: scored.training_ms,
            total_ms: elapsed_ms(started),
        },
    };

    info!(
        "Search complete: {} candidates from {} windows ({:?}, {:.1}ms)",
        result.candidates.len(),
        result.scanned_windows,
        result.model.kind,
        result.timings.total_ms
    );

    Ok(result)
}

fn baseline(ctx: &SearchContext<'_>) -> Result<Scored> {
    let started = Instant::now();
    let model = Model::Baseline;
    let scorer = Scorer::new(
        &model,
        ctx.layout(),
        ctx.resolved.weights,
        &ctx.query_vector,
        None,
    );
    let scores = ctx.score_pass(&scorer)?;
    Ok(Scored {
        model,
        scores,
        standardizer: None,
        scan_ms: elapsed_ms(started),
        training_ms: 0.0,
    })
}

fn refined(ctx: &SearchContext<'_>, labels: &LabelSet, kind: ModelKind) -> Result<Scored> {
    let scan_started = Instant::now();
    let standardizer = ctx.statistics_pass()?;
    let mut scan_ms = elapsed_ms(scan_started);

    let training_started = Instant::now();
    let mut positives = Vec::with_capacity(labels.accepted.len() + 1);
    for window in &labels.accepted {
        ctx.cancel().check()?;
        positives.push(standardizer.transform(&ctx.featurizer.featurize(*window))?);
    }
    if ctx.resolved.include_query_as_positive {
        positives.push(standardizer.transform(&ctx.query_vector)?);
    }
    let mut negatives = Vec::with_capacity(labels.rejected.len());
    for window in &labels.rejected {
        ctx.cancel().check()?;
        negatives.push(standardizer.transform(&ctx.featurizer.featurize(*window))?);
    }

    debug!(
        "Training {:?} on {} positives and {} negatives",
        kind,
        positives.len(),
        negatives.len()
    );

    let model = Model::fit(kind, &positives, &negatives, &ctx.resolved.training, ctx.cancel())?;
    let training_ms = elapsed_ms(training_started);

    let score_started = Instant::now();
    let scorer = Scorer::new(
        &model,
        ctx.layout(),
        ctx.resolved.weights,
        &ctx.query_vector,
        Some(&standardizer),
    );
    let scores = ctx.score_pass(&scorer)?;
    scan_ms += elapsed_ms(score_started);

    Ok(Scored {
        model,
        scores,
        standardizer: Some(standardizer),
        scan_ms,
        training_ms,
    })
}

fn extract_candidates(ctx: &SearchContext<'_>, scored: &Scored) -> Result<Vec<SearchCandidate>> {
    let times: Vec<f64> = ctx.windows.iter().map(|w| w.start).collect();
    let peaks = pick_peaks(
        &times,
        &scored.scores,
        &ctx.resolved.candidate_peak_pick,
        Some(&ctx.skip_mask),
    );

    let mut candidates = Vec::with_capacity(peaks.len());
    for peak in peaks {
        let window = ctx.windows[peak.index];
        let explain = match (&scored.model, &scored.standardizer) {
            (Model::Logistic { weights, bias, .. }, Some(standardizer)) => {
                ctx.cancel().check()?;
                let z = standardizer.transform(&ctx.featurizer.featurize(window))?;
                Some(explain_logit(ctx.layout(), weights, *bias, &z))
            }
            _ => None,
        };
        candidates.push(SearchCandidate {
            time: window.start,
            score: peak.value,
            window_start: window.start,
            window_end: window.end,
            explain,
        });
    }

    debug!("Extracted {} candidates", candidates.len());
    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RefinementLabel;

    /// Noise-like background with a distinctive half-second burst every 5 seconds.
    fn track(seconds: f64) -> FrameSeries {
        let n = (seconds * 100.0) as usize + 1;
        let times: Vec<f64> = (0..n).map(|i| i as f64 / 100.0).collect();
        let mel = (0..n)
            .map(|i| {
                let x = i as f32;
                if i % 500 < 50 {
                    vec![2.0 + (x * 0.9).sin(), 0.1, 1.5, 0.2]
                } else {
                    vec![0.3, 0.8 + 0.2 * (x * 0.21).sin(), 0.2, 0.6 + 0.1 * (x * 0.07).cos()]
                }
            })
            .collect();
        let onset = (0..n).map(|i| if i % 500 == 0 { 3.0 } else { 0.1 }).collect();
        FrameSeries::from_rows(times, mel, onset, None).unwrap()
    }

    #[test]
    fn test_search_finds_query() {
        let frames = track(20.0);
        let result = search(TimeWindow::new(5.0, 5.5), &frames, &SearchOptions::default()).unwrap();

        assert_eq!(result.curve_kind, CurveKind::Similarity);
        assert_eq!(result.scores.len(), result.times.len());
        assert!(result
            .candidates
            .iter()
            .any(|c| (c.time - 5.0).abs() < 0.1 && c.score > 0.95));
    }

    #[test]
    fn test_search_ignores_labels() {
        let frames = track(20.0);
        let mut options = SearchOptions::default();
        options.refinement.labels = vec![
            RefinementLabel::accepted(10.0, 10.5),
            RefinementLabel::accepted(15.0, 15.5),
        ];
        let result = search(TimeWindow::new(5.0, 5.5), &frames, &options).unwrap();
        assert_eq!(result.model.kind, ModelKind::Baseline);
        assert_eq!(result.model.accepted_labels, 0);
    }

    #[test]
    fn test_short_track_is_empty() {
        let frames = track(0.3);
        let options = SearchOptions::default();
        let result = guided_search(TimeWindow::new(0.0, 0.5), &frames, &options).unwrap();
        assert!(result.times.is_empty());
        assert!(result.candidates.is_empty());
        assert_eq!(result.model.kind, ModelKind::Baseline);
    }

    #[test]
    fn test_invalid_query() {
        let frames = track(2.0);
        let options = SearchOptions::default();
        let err = search(TimeWindow::new(1.0, 0.5), &frames, &options).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_QUERY");
    }

    #[test]
    fn test_ignored_labels_counted() {
        let frames = track(20.0);
        let mut options = SearchOptions::default();
        options.refinement.labels = vec![
            RefinementLabel::accepted(10.0, 10.5),
            RefinementLabel::accepted(100.0, 100.5),
        ];
        let result = guided_search(TimeWindow::new(5.0, 5.5), &frames, &options).unwrap();
        assert_eq!(result.model.kind, ModelKind::Baseline);
        assert_eq!(result.model.accepted_labels, 1);
        assert_eq!(result.model.ignored_labels, 1);
    }

    #[test]
    fn test_training_failure_falls_back() {
        let frames = track(20.0);
        let mut options = SearchOptions::default();
        options.refinement.learning_rate = 1e300;
        options.refinement.labels = vec![
            RefinementLabel::accepted(10.0, 10.5),
            RefinementLabel::accepted(15.0, 15.5),
            RefinementLabel::rejected(7.0, 7.5),
        ];
        let result = guided_search(TimeWindow::new(5.0, 5.5), &frames, &options).unwrap();

        assert_eq!(result.model.kind, ModelKind::Baseline);
        assert_eq!(result.curve_kind, CurveKind::Similarity);
        assert!(result.model.fallback_reason.is_some());
        assert_eq!(result.model.accepted_labels, 2);
        assert_eq!(result.model.rejected_labels, 1);
    }

    #[test]
    fn test_upper_mel_bands_affect_scores() {
        let n = 1001;
        let times: Vec<f64> = (0..n).map(|i| i as f64 / 100.0).collect();
        let mel = (0..n)
            .map(|i| {
                (0..1100)
                    .map(|b| if i >= 500 && b >= 1024 { 50.0 } else { 1.0 })
                    .collect()
            })
            .collect();
        let onset = vec![0.1; n];
        let frames = FrameSeries::from_rows(times, mel, onset, None).unwrap();

        let mut options = SearchOptions::default();
        options.local_contrast.enabled = false;
        let result = search(TimeWindow::new(0.0, 0.5), &frames, &options).unwrap();

        assert!((result.scores[0] - 1.0).abs() < 1e-9);
        let late: Vec<f64> = result
            .times
            .iter()
            .zip(&result.scores)
            .filter(|(&t, _)| t >= 5.0)
            .map(|(_, &s)| s)
            .collect();
        assert!(!late.is_empty());
        assert!(late.iter().all(|&s| s < 0.9));
    }

    #[test]
    fn test_fingerprint_window() {
        let frames = track(10.0);
        let options = SearchOptions::default();
        let fp = fingerprint_window(TimeWindow::new(5.0, 5.5), &frames, &options).unwrap();
        assert_eq!(fp.mel_mean.len(), 4);
        assert!(fp.mfcc_mean.is_empty());
        assert_eq!(fp.onset_max, 3.0);

        let err = fingerprint_window(TimeWindow::new(2.0, 2.0), &frames, &SearchOptions::default());
        assert!(err.is_err());
    }
}
