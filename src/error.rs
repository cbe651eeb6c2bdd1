//! Error types for pipeline parsing and execution.

use thiserror::Error;

/// Errors surfaced to whoever builds or runs a pipeline.
///
/// Per-row extraction mismatches are not errors: they produce empty values.
/// Broken internal invariants are `BUG:` panics, never a variant here.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// An `extract` pattern could not be compiled.
    #[error("malformed extract pattern {pattern:?}: {reason}")]
    MalformedPattern { pattern: String, reason: String },

    /// The pipeline text is not well formed.
    #[error("syntax error at offset {position}: {message}")]
    Syntax { position: usize, message: String },

    /// A pipe name that is not known.
    #[error("unknown pipe: {0}")]
    UnknownPipe(String),

    /// The pipeline text contains no pipes.
    #[error("pipeline is empty")]
    EmptyPipeline,

    /// A run configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A worker thread panicked while processing blocks.
    #[error("worker failed: {0}")]
    WorkerFailed(String),

    /// A line of NDJSON input could not be decoded.
    #[error("line {line}: invalid JSON: {source}")]
    Json {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub(crate) fn malformed(pattern: &str, reason: impl Into<String>) -> Self {
        PipelineError::MalformedPattern {
            pattern: pattern.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn syntax(position: usize, message: impl Into<String>) -> Self {
        PipelineError::Syntax {
            position,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
