//! # Error Types
//!
//! This module defines the error types for the alignment pipeline.
//!
//! Recoverable data inconsistencies (a tie stop with no open tie start, a relative
//! marking with no preceding absolute marking, a tempo region with too few matched
//! notes) are never errors: they are logged with `tracing::warn!` and processing
//! continues. Only problems that make a whole (score, performance) pair unusable
//! surface as an [`AlignError`].
//!
//! ## Error Types
//! - `PerformedNoteNotFound` / `ScoreNoteNotFound` / `UnknownScoreId` - the oracle
//!   asserted a correspondence that cannot be located in the inputs
//! - `Oracle` - the external alignment tool failed or produced malformed output
//! - `Document` / `Config` - invalid input document or pipeline configuration
//! - `Io` / `Yaml` / `Json` - reading inputs or writing features
//!
//! ## Usage
//! ```text
//! match scorealign::process_pair(&score, &performance, &oracle_output, &config, &mut rng) {
//!     Ok(features) => write(features),
//!     Err(e) if e.is_recoverable() => skip_and_report(e),
//!     Err(e) => abort_pair(e),
//! }
//! ```

use crate::oracle::OracleError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AlignError {
    /// A match record names a performance time/pitch with no performed note
    /// inside the tolerance window.
    #[error("No performed note with pitch {pitch} within {tolerance}s of {time:.4}s (match record {record})")]
    PerformedNoteNotFound {
        record: usize,
        pitch: u8,
        time: f64,
        tolerance: f64,
    },

    /// A score id resolved through the correspondence table has no score note
    /// with that pitch inside the tolerance window.
    #[error("No score note with pitch {pitch} within {tolerance}s of {time:.4}s for score id '{score_id}' (match record {record})")]
    ScoreNoteNotFound {
        record: usize,
        score_id: String,
        pitch: u8,
        time: f64,
        tolerance: f64,
    },

    /// A match record references a score id absent from the correspondence table.
    #[error("Score id '{score_id}' (match record {record}) is missing from the correspondence table")]
    UnknownScoreId { record: usize, score_id: String },

    /// The external alignment oracle failed for this pair.
    #[error("Alignment oracle failed: {0}")]
    Oracle(#[from] OracleError),

    /// The score or performance document is structurally unusable.
    #[error("Invalid document: {0}")]
    Document(String),

    /// The pipeline configuration is inconsistent.
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AlignError {
    /// Whether the failure is an input or oracle problem rather than a broken
    /// alignment. Batch tooling skips the pair either way; this only changes how
    /// the failure is reported.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            AlignError::PerformedNoteNotFound { .. }
                | AlignError::ScoreNoteNotFound { .. }
                | AlignError::UnknownScoreId { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matching_failure_message_names_inputs() {
        let err = AlignError::ScoreNoteNotFound {
            record: 7,
            score_id: "42".to_string(),
            pitch: 60,
            time: 1.5,
            tolerance: 0.01,
        };
        let text = err.to_string();
        assert!(text.contains("'42'"));
        assert!(text.contains("pitch 60"));
        assert!(text.contains("1.5000s"));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_oracle_failure_is_recoverable() {
        let err = AlignError::from(OracleError::TimedOut { millis: 30_000 });
        assert!(err.is_recoverable());
        assert_eq!(err.to_string(), "Alignment oracle failed: Oracle timed out after 30000ms");
    }
}
