//! Output formatting for CLI

use serde::Serialize;
use tabled::{Table, Tabled};

use timbre_search::{Fingerprint, SearchCandidate, SearchResult, TimeWindow};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
    Table,
}

impl From<&str> for OutputFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            "table" => OutputFormat::Table,
            _ => OutputFormat::Text,
        }
    }
}

fn to_json<T: Serialize>(data: &T) -> String {
    serde_json::to_string_pretty(data).unwrap_or_else(|_| "{}".to_string())
}

#[derive(Tabled)]
struct CandidateRow {
    #[tabled(rename = "#")]
    rank: usize,
    #[tabled(rename = "Time (s)")]
    time: String,
    #[tabled(rename = "Window")]
    window: String,
    #[tabled(rename = "Score")]
    score: String,
    #[tabled(rename = "Top group")]
    top_group: String,
}

/// Group with the largest absolute logit contribution.
fn top_group(candidate: &SearchCandidate) -> String {
    let Some(explain) = &candidate.explain else {
        return "-".to_string();
    };
    let mut groups = vec![("mel", explain.mel.total()), ("onset", explain.onset.total())];
    if let Some(mfcc) = explain.mfcc {
        groups.push(("mfcc", mfcc.total()));
    }
    groups
        .into_iter()
        .max_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
        .map(|(name, value)| format!("{} ({:+.2})", name, value))
        .unwrap_or_else(|| "-".to_string())
}

/// Format a search result
pub fn format_result(result: &SearchResult, format: &str) -> String {
    match OutputFormat::from(format) {
        OutputFormat::Json => to_json(result),
        OutputFormat::Table => {
            let rows: Vec<CandidateRow> = result
                .candidates
                .iter()
                .enumerate()
                .map(|(i, c)| CandidateRow {
                    rank: i + 1,
                    time: format!("{:.3}", c.time),
                    window: format!("{:.3}-{:.3}", c.window_start, c.window_end),
                    score: format!("{:.3}", c.score),
                    top_group: top_group(c),
                })
                .collect();
            format!("{}\n{}", summary_line(result), Table::new(rows))
        }
        OutputFormat::Text => {
            let mut out = summary_line(result);
            if let Some(reason) = &result.model.fallback_reason {
                out.push_str(&format!("\n  Fallback: {}", reason));
            }
            if let Some(d) = &result.model.diagnostics {
                out.push_str(&format!(
                    "\n  Training: {} iterations, loss {:.4}, converged {}",
                    d.iterations, d.final_loss, d.converged
                ));
            }
            out.push_str("\n\nCandidates:");
            if result.candidates.is_empty() {
                out.push_str("\n  (none)");
            }
            for (i, c) in result.candidates.iter().enumerate() {
                out.push_str(&format!("\n  {}. {:>8.3}s  score {:.3}", i + 1, c.time, c.score));
                if c.explain.is_some() {
                    out.push_str(&format!("  [{}]", top_group(c)));
                }
            }
            out
        }
    }
}

fn summary_line(result: &SearchResult) -> String {
    format!(
        "Query {:.3}-{:.3}s: {:?} model, {} windows ({} skipped), {} candidates in {:.1}ms",
        result.query.start,
        result.query.end,
        result.model.kind,
        result.scanned_windows,
        result.skipped_windows,
        result.candidates.len(),
        result.timings.total_ms
    )
}

/// Format a window fingerprint
pub fn format_fingerprint(window: TimeWindow, fingerprint: &Fingerprint, format: &str) -> String {
    match OutputFormat::from(format) {
        OutputFormat::Json => to_json(fingerprint),
        OutputFormat::Text | OutputFormat::Table => {
            let fmt = |values: &[f64]| {
                values
                    .iter()
                    .map(|v| format!("{:.3}", v))
                    .collect::<Vec<_>>()
                    .join(" ")
            };
            let mut out = format!("Fingerprint {:.3}-{:.3}s", window.start, window.end);
            out.push_str(&format!("\n  Mel mean:      {}", fmt(&fingerprint.mel_mean)));
            out.push_str(&format!("\n  Mel variance:  {}", fmt(&fingerprint.mel_variance)));
            out.push_str(&format!(
                "\n  Onset:         mean {:.3}, max {:.3}, {:.2} peaks/s",
                fingerprint.onset_mean, fingerprint.onset_max, fingerprint.onset_peak_density
            ));
            if !fingerprint.mfcc_mean.is_empty() {
                out.push_str(&format!("\n  MFCC mean:     {}", fmt(&fingerprint.mfcc_mean)));
                out.push_str(&format!("\n  MFCC variance: {}", fmt(&fingerprint.mfcc_variance)));
            }
            out
        }
    }
}
