//! Timbre Search - Content-Based Similarity Search Library
//!
//! This crate finds every moment in a track that sounds like a user-selected
//! excerpt, and learns from accept/reject feedback:
//! - **Similarity Search**: Sliding-window fingerprints scored by weighted block cosine
//! - **Local Contrast**: Foreground statistics relative to their surroundings
//! - **Refinement**: Prototype or logistic models trained on labelled windows
//! - **Explainability**: Per-block logit breakdown of logistic candidates
//!
//! Frames (mel energies, onset strength, optional cepstral coefficients) are
//! computed upstream; this crate only consumes them.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐    ┌──────────────────┐    ┌──────────────────┐
//! │ FrameSeries  │───▶│  Onset Index +   │───▶│  Window Scanner  │
//! │ (mel/onset)  │    │  Feature Layout  │    │  (running sums)  │
//! └──────────────┘    └──────────────────┘    └────────┬─────────┘
//!                                                      │
//!                         ┌────────────────────────────┼──────────────────┐
//!                         │                            │                  │
//!                         ▼                            ▼                  ▼
//!                 ┌───────────────┐          ┌──────────────────┐  ┌──────────────┐
//!                 │   Baseline    │          │    Prototype     │  │   Logistic   │
//!                 │ (block cosine)│          │ (z-scored mean)  │  │  (explained) │
//!                 └───────┬───────┘          └────────┬─────────┘  └──────┬───────┘
//!                         │                           │                   │
//!                         └───────────────────────────┼───────────────────┘
//!                                                     ▼
//!                                            ┌──────────────────┐
//!                                            │   Peak Picking   │
//!                                            │   (candidates)   │
//!                                            └──────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use timbre_search::{guided_search, FrameSeries, RefinementLabel, SearchOptions, TimeWindow};
//!
//! fn main() -> timbre_search::Result<()> {
//!     let json = std::fs::read_to_string("frames.json")?;
//!     let frames: timbre_search::FrameFile = serde_json::from_str(&json)?;
//!     let frames = frames.into_series()?;
//!
//!     let mut options = SearchOptions::default();
//!     options.refinement.labels = vec![
//!         RefinementLabel::accepted(20.0, 20.5),
//!         RefinementLabel::accepted(30.0, 30.5),
//!     ];
//!
//!     let result = guided_search(TimeWindow::new(10.0, 10.5), &frames, &options)?;
//!     for candidate in &result.candidates {
//!         println!("{:.2}s  {:.3}", candidate.time, candidate.score);
//!     }
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod cancel;
pub mod config;
pub mod error;
pub mod explain;
pub mod fingerprint;
pub mod layout;
pub mod peaks;
pub mod scoring;
pub mod search;
pub mod sliding;
pub mod types;

pub use cancel::CancellationToken;
pub use config::{
    BlockWeights, CandidatePeakPick, LocalContrastConfig, RefinementConfig, ResolvedOptions,
    SearchOptions,
};
pub use error::{Error, Result};
pub use explain::{GroupContribution, ScoreExplanation};
pub use fingerprint::{Fingerprint, FingerprintExtractor, FingerprintMode};
pub use layout::FeatureVectorLayout;
pub use peaks::{pick_peaks, Peak, PeakPickOptions, PeakThreshold};
pub use scoring::Model;
pub use search::{fingerprint_window, guided_search, search};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
