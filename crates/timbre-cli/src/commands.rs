//! CLI command implementations

use anyhow::{bail, Context};
use std::path::{Path, PathBuf};
use tracing::info;

use timbre_search::{
    fingerprint_window, guided_search, search as plain_search, FrameFile, FrameSeries,
    RefinementLabel, SearchOptions, TimeWindow,
};

use crate::output;

/// Flag overrides applied on top of the options file
#[derive(Debug, Default, Clone, Copy)]
pub struct Overrides {
    pub threshold: Option<f64>,
    pub hop: Option<f64>,
    pub skip_query: bool,
}

/// Load and validate a frame file
pub fn load_frames(path: &Path) -> anyhow::Result<FrameSeries> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read frame file {}", path.display()))?;
    let file: FrameFile = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse frame file {}", path.display()))?;
    let frames = file
        .into_series()
        .with_context(|| format!("Invalid frames in {}", path.display()))?;

    info!(
        "Loaded {} frames ({} mel bands, {} cepstral coefficients, {:.1}ms hop) from {}",
        frames.len(),
        frames.mel_bands(),
        frames.mfcc_coefficients(),
        frames.hop_sec() * 1000.0,
        path.display()
    );
    Ok(frames)
}

/// Load options from an optional file and apply flag overrides
pub fn load_options(
    path: Option<PathBuf>,
    query: TimeWindow,
    overrides: Overrides,
) -> anyhow::Result<SearchOptions> {
    let mut options = match path {
        Some(path) => SearchOptions::load_from_file(&path)
            .with_context(|| format!("Failed to load options from {}", path.display()))?,
        None => SearchOptions::default(),
    };

    if let Some(threshold) = overrides.threshold {
        options.threshold = threshold;
    }
    if let Some(hop) = overrides.hop {
        options.hop_sec = hop;
    }
    if overrides.skip_query {
        options.skip_window_overlap = Some(query);
    }

    Ok(options)
}

/// Load refinement labels (a JSON array)
pub fn load_labels(path: &Path) -> anyhow::Result<Vec<RefinementLabel>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read labels {}", path.display()))?;
    let labels: Vec<RefinementLabel> = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse labels {}", path.display()))?;
    Ok(labels)
}

fn query_window(start: f64, end: f64) -> anyhow::Result<TimeWindow> {
    let window = TimeWindow::new(start, end);
    if !window.is_valid() {
        bail!("Invalid window: start {} must be before end {}", start, end);
    }
    Ok(window)
}

/// Plain similarity search
pub fn search(
    frames_path: &Path,
    start: f64,
    end: f64,
    options_path: Option<PathBuf>,
    overrides: Overrides,
    format: &str,
) -> anyhow::Result<()> {
    let query = query_window(start, end)?;
    let frames = load_frames(frames_path)?;
    let options = load_options(options_path, query, overrides)?;

    let result = plain_search(query, &frames, &options)?;
    println!("{}", output::format_result(&result, format));
    Ok(())
}

/// Label-guided search
pub fn refine(
    frames_path: &Path,
    start: f64,
    end: f64,
    labels_path: &Path,
    options_path: Option<PathBuf>,
    overrides: Overrides,
    format: &str,
) -> anyhow::Result<()> {
    let query = query_window(start, end)?;
    let frames = load_frames(frames_path)?;
    let mut options = load_options(options_path, query, overrides)?;

    let labels = load_labels(labels_path)?;
    info!("Refining with {} labels", labels.len());
    options.refinement.labels.extend(labels);

    let result = guided_search(query, &frames, &options)?;
    println!("{}", output::format_result(&result, format));
    Ok(())
}

/// Single-window fingerprint
pub fn fingerprint(frames_path: &Path, start: f64, end: f64, format: &str) -> anyhow::Result<()> {
    let window = query_window(start, end)?;
    let frames = load_frames(frames_path)?;

    let fingerprint = fingerprint_window(window, &frames, &SearchOptions::default())?;
    println!("{}", output::format_fingerprint(window, &fingerprint, format));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &tempfile::TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_load_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "frames.json",
            r#"{"times": [0.0, 0.01, 0.02], "mel": [[1, 2], [3, 4], [5, 6]], "onset": [0, 1, 0]}"#,
        );
        let frames = load_frames(&path).unwrap();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames.mel_bands(), 2);
    }

    #[test]
    fn test_load_frames_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "bad.json", r#"{"times": [0.0], "mel": [], "onset": [0]}"#);
        let err = load_frames(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("bad.json"));
    }

    #[test]
    fn test_overrides_applied() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "options.json", r#"{"threshold": 0.5, "hopSec": 0.05}"#);
        let query = TimeWindow::new(1.0, 1.5);

        let options = load_options(
            Some(path),
            query,
            Overrides {
                threshold: Some(0.9),
                hop: None,
                skip_query: true,
            },
        )
        .unwrap();

        assert_eq!(options.threshold, 0.9);
        assert_eq!(options.hop_sec, 0.05);
        assert_eq!(options.skip_window_overlap, Some(query));
    }

    #[test]
    fn test_load_labels() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "labels.json",
            r#"[
                {"start": 1.0, "end": 1.5, "status": "accepted"},
                {"t0": 3.0, "t1": 3.5, "status": "rejected", "source": "auto"}
            ]"#,
        );
        let labels = load_labels(&path).unwrap();
        assert_eq!(labels.len(), 2);
        assert_eq!(labels[1], RefinementLabel {
            source: timbre_search::LabelSource::Auto,
            ..RefinementLabel::rejected(3.0, 3.5)
        });
    }

    #[test]
    fn test_invalid_window() {
        assert!(query_window(2.0, 1.0).is_err());
    }
}
