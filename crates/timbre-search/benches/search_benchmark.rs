//! Benchmark tests for similarity search operations
//!
//! Run with: cargo bench -p timbre-search

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use timbre_search::cancel::CancellationToken;
use timbre_search::layout::FeatureVectorLayout;
use timbre_search::sliding::{scan_windows, OnsetIndex, WindowFeaturizer};
use timbre_search::{
    guided_search, search, FrameSeries, PeakPickOptions, RefinementLabel, SearchOptions,
    TimeWindow,
};

// Helper to generate a track of frames at 100 frames per second
fn generate_frames(duration_secs: usize, mel_bands: usize, mfcc_coeffs: usize) -> FrameSeries {
    let n = duration_secs * 100 + 1;
    let times = (0..n).map(|i| i as f64 / 100.0).collect();
    let mel = (0..n)
        .map(|i| {
            (0..mel_bands)
                .map(|b| ((i * (b + 3)) as f32 * 0.013).sin().abs() + 0.1)
                .collect()
        })
        .collect();
    let onset = (0..n)
        .map(|i| if i % 47 == 0 { 2.0 } else { ((i as f32) * 0.3).sin().abs() * 0.3 })
        .collect();
    let mfcc = (0..n)
        .map(|i| (0..mfcc_coeffs).map(|c| ((i + c * 7) as f32 * 0.021).cos()).collect())
        .collect();
    FrameSeries::from_rows(times, mel, onset, Some(mfcc)).unwrap()
}

// ============================================================================
// Sliding Scan Benchmarks
// ============================================================================

fn bench_sliding_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("Sliding Scan");
    let cancel = CancellationToken::never();

    for duration in [30usize, 120, 300].iter() {
        let frames = generate_frames(*duration, 64, 20);
        let onset = OnsetIndex::build(&frames, &PeakPickOptions::default(), &cancel).unwrap();
        let featurizer = WindowFeaturizer::new(
            &frames,
            FeatureVectorLayout::for_frames(&frames, true),
            onset,
            Some(3.0),
        );
        let windows = scan_windows(frames.end_time(), 0.5, 0.03);

        group.bench_with_input(BenchmarkId::new("scan", duration), &windows, |b, windows| {
            b.iter(|| {
                let mut scanner = featurizer.scanner();
                for window in windows {
                    black_box(scanner.next_window(*window));
                }
            });
        });
    }

    group.finish();
}

fn bench_direct_featurize(c: &mut Criterion) {
    let frames = generate_frames(60, 64, 20);
    let cancel = CancellationToken::never();
    let onset = OnsetIndex::build(&frames, &PeakPickOptions::default(), &cancel).unwrap();
    let featurizer = WindowFeaturizer::new(
        &frames,
        FeatureVectorLayout::for_frames(&frames, true),
        onset,
        Some(3.0),
    );

    c.bench_function("featurize_window", |b| {
        b.iter(|| black_box(featurizer.featurize(black_box(TimeWindow::new(30.0, 30.5)))))
    });
}

// ============================================================================
// Search Benchmarks
// ============================================================================

fn bench_search(c: &mut Criterion) {
    let frames = generate_frames(120, 64, 20);
    let query = TimeWindow::new(10.0, 10.5);

    c.bench_function("baseline_search_120s", |b| {
        b.iter(|| search(black_box(query), &frames, &SearchOptions::default()).unwrap())
    });

    let mut prototype = SearchOptions::default();
    prototype.refinement.labels = vec![
        RefinementLabel::accepted(20.0, 20.5),
        RefinementLabel::accepted(30.0, 30.5),
    ];
    c.bench_function("prototype_search_120s", |b| {
        b.iter(|| guided_search(black_box(query), &frames, &prototype).unwrap())
    });

    let mut logistic = prototype.clone();
    logistic.refinement.labels.push(RefinementLabel::rejected(45.0, 45.5));
    c.bench_function("logistic_search_120s", |b| {
        b.iter(|| guided_search(black_box(query), &frames, &logistic).unwrap())
    });
}

criterion_group!(benches, bench_sliding_scan, bench_direct_featurize, bench_search);
criterion_main!(benches);
