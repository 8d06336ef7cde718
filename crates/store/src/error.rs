//! Store error types.

use thiserror::Error;

/// Store operation errors.
///
/// Contended conditional writes are NOT errors: membership and reminder CAS
/// paths report them as `Ok(false)` and callers re-read and retry. Only the
/// grain-state write path surfaces a conflict as [`StoreError::VersionConflict`],
/// because persistence callers expect a hard failure there.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Core(#[from] granary_core::Error),

    #[error("database driver error: {0}")]
    Driver(String),

    #[error("statement missing from query catalog: {0}")]
    MissingStatement(String),

    #[error("malformed row: {0}")]
    MalformedRow(String),

    #[error("version conflict writing state for grain {grain} of type {grain_type}")]
    VersionConflict { grain_type: String, grain: String },

    #[error("inconsistent stored state: {0}")]
    InconsistentState(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
