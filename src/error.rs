//! Pipeline error taxonomy.
//!
//! Per-record and per-column isolation everywhere: only connection-level
//! failures or whole-batch validation problems abort an entire run. Batch
//! operations report success/failure counts instead of propagating the first
//! record error.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Malformed ingest input (null natural-key component, empty key tuple,
    /// unknown source). Rejected at the gateway, never auto-retried.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Payload could not be parsed into the declared source's container
    /// shape. Rejected at the gateway, never auto-retried.
    #[error("payload does not match container shape for source '{source_name}': {detail}")]
    SchemaMismatch { source_name: String, detail: String },

    /// One record's source-specific extraction failed on an unexpected
    /// payload shape. Recorded on the raw record; the batch loop continues.
    #[error("extraction failed: {0}")]
    TransientExtraction(String),

    /// Grid document fingerprint changed between header scan and write.
    /// The sync pass aborts with no partial writes.
    #[error("grid document changed during sync pass: {0}")]
    ConcurrencyConflict(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
