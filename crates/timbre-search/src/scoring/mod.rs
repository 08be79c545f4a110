//! Window scoring: baseline similarity, normalisation and trained models.

pub mod logistic;
pub mod model;
pub mod similarity;
pub mod zscore;

pub use model::{Model, Scorer};
pub use similarity::{baseline_score, cosine_similarity, weighted_cosine};
pub use zscore::{Standardizer, StandardizerBuilder};
