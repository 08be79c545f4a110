//! Error types for Timbre Search

use thiserror::Error;

/// Result type alias for search operations
pub type Result<T> = std::result::Result<T, Error>;

/// Search error types
#[derive(Error, Debug)]
pub enum Error {
    // Control flow
    /// The cancellation token fired
    #[error("Search cancelled")]
    Cancelled,

    // Input errors
    /// Frame series failed validation
    #[error("Invalid frame series: {0}")]
    InvalidFrames(String),

    /// Query or fingerprint window is empty or not finite
    #[error("Invalid query window: {start}s..{end}s")]
    InvalidQuery {
        /// Window start in seconds
        start: f64,
        /// Window end in seconds
        end: f64,
    },

    /// A feature vector does not match the layout
    #[error("Feature dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Layout length
        expected: usize,
        /// Length received
        actual: usize,
    },

    // Refinement errors
    /// Training diverged or had unusable input
    #[error("Model training failed: {0}")]
    Training(String),

    // Configuration errors
    /// Options could not be used
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// JSON (de)serialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Reading a file failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a training error
    pub fn training(msg: impl Into<String>) -> Self {
        Error::Training(msg.into())
    }

    /// Returns true if this error is the cooperative cancellation signal.
    ///
    /// Cancellation must reach the caller untouched; every other error raised
    /// while refining is eligible for the baseline fallback.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Returns the error code for diagnostics
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Cancelled => "CANCELLED",
            Error::InvalidFrames(_) => "INVALID_FRAMES",
            Error::InvalidQuery { .. } => "INVALID_QUERY",
            Error::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
            Error::Training(_) => "TRAINING",
            Error::Config(_) => "INVALID_CONFIG",
            Error::Json(_) => "JSON",
            Error::Io(_) => "IO",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_is_distinguished() {
        assert!(Error::Cancelled.is_cancellation());
        assert!(!Error::training("diverged").is_cancellation());
        assert!(!Error::InvalidFrames("empty".into()).is_cancellation());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::Cancelled.error_code(), "CANCELLED");
        assert_eq!(Error::training("x").error_code(), "TRAINING");
        assert_eq!(
            Error::DimensionMismatch { expected: 3, actual: 2 }.error_code(),
            "DIMENSION_MISMATCH"
        );
    }

    #[test]
    fn test_display_messages() {
        let err = Error::InvalidQuery { start: 2.0, end: 1.0 };
        assert!(err.to_string().contains("2s..1s"));

        let err = Error::DimensionMismatch { expected: 10, actual: 4 };
        assert!(err.to_string().contains("expected 10"));
    }
}
