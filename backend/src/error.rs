//! Error types for the SkinHerb ingestion pipeline.
//!
//! One enum per layer:
//!
//! - [`SourceError`] - opening, decoding and splitting source files
//! - [`StoreError`] - the SQLite document store
//! - [`BackendError`] - a reconciler back end (store or remote API)
//! - [`ConfigError`] - settings and CLI configuration
//! - [`PipelineError`] - top-level, fatal-only orchestration errors
//!
//! Conversions are `From` based so `?` works across layer boundaries.

use std::path::PathBuf;
use thiserror::Error;

// =============================================================================
// Source Errors
// =============================================================================

/// Errors while opening or reading a source file.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The declared file does not exist.
    #[error("Source file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The file exists but could not be read.
    #[error("Cannot read source file {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Bytes that do not belong to the declared encoding.
    #[error("File is not valid {encoding} text")]
    EncodingDecodeFailure { encoding: String },

    /// Extension or declared format not supported.
    #[error("Unsupported source format: {0}")]
    UnsupportedFormat(String),

    /// Workbook could not be opened or has no usable sheet.
    #[error("Spreadsheet error: {0}")]
    Spreadsheet(String),

    /// A single record could not be split into cells.
    #[error("Line {line}: {message}")]
    Parse { line: usize, message: String },

    /// Nothing at all in the file, not even a header row.
    #[error("Source file is empty")]
    EmptySource,
}

// =============================================================================
// Store Errors
// =============================================================================

/// Errors from the document store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another run has the store open.
    #[error("Store at {} is locked by another run", .0.display())]
    Locked(PathBuf),

    /// A unique index rejected the write.
    #[error("Duplicate key in '{collection}': {key}")]
    DuplicateKey { collection: String, key: String },

    /// The document does not match its collection schema.
    #[error("Document rejected by '{collection}' schema: {}", errors.join("; "))]
    SchemaViolation {
        collection: String,
        errors: Vec<String>,
    },

    /// No document with that id.
    #[error("No document '{id}' in '{collection}'")]
    NotFound { collection: String, id: String },

    /// Documents must be JSON objects.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// The database file vanished or stopped answering underneath the run.
    #[error("Store connection lost: {0}")]
    ConnectionLost(String),

    /// IO error.
    #[error("Store IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("Store JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// SQLite error not covered above.
    #[error("Store database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

// =============================================================================
// Back-end Errors
// =============================================================================

/// Errors surfaced by a reconciler back end.
///
/// Only [`BackendError::Unauthorized`] and [`BackendError::ConnectionLost`]
/// end a run; the rest are counted against the single record.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Natural key already taken.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// The back end refused this record.
    #[error("Record rejected: {0}")]
    Rejected(String),

    /// Timeout, 5xx or a one-off IO failure.
    #[error("Transient failure: {0}")]
    Transient(String),

    /// Credentials refused.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The persistence connection itself is gone.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),
}

impl BackendError {
    /// Whether the remaining batch must be abandoned.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BackendError::Unauthorized(_) | BackendError::ConnectionLost(_)
        )
    }
}

impl From<StoreError> for BackendError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateKey { key, .. } => BackendError::DuplicateKey(key),
            StoreError::SchemaViolation { .. } | StoreError::InvalidDocument(_) => {
                BackendError::Rejected(err.to_string())
            }
            StoreError::ConnectionLost(msg) => BackendError::ConnectionLost(msg),
            StoreError::Locked(_) => BackendError::ConnectionLost(err.to_string()),
            other => BackendError::Transient(other.to_string()),
        }
    }
}

// =============================================================================
// Config Errors
// =============================================================================

/// Errors while assembling settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable or flag is absent.
    #[error("Missing {0} (set it in the environment, .env or on the command line)")]
    MissingVar(&'static str),

    /// Value present but unusable.
    #[error("Invalid value for {name}: {message}")]
    Invalid { name: &'static str, message: String },
}

// =============================================================================
// Pipeline Errors (top-level)
// =============================================================================

/// Fatal errors that abort a run.
///
/// Per-record problems never show up here; they are counted in the summary.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The source could not be opened or decoded.
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// The store could not be opened or closed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A fatal back-end failure.
    #[error("Back end error: {0}")]
    Backend(#[from] BackendError),

    /// Bad configuration.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Relation mapping could not be loaded.
    #[error("Relation mapping error: {0}")]
    Mapping(String),
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for source operations.
pub type SourceResult<T> = Result<T, SourceError>;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type for back-end operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion_chain() {
        let source_err = SourceError::NotFound(PathBuf::from("herbs.csv"));
        let pipeline_err: PipelineError = source_err.into();
        assert!(pipeline_err.to_string().contains("herbs.csv"));

        let store_err = StoreError::DuplicateKey {
            collection: "herbs".into(),
            key: "Curcuma longa".into(),
        };
        let backend_err: BackendError = store_err.into();
        assert!(matches!(backend_err, BackendError::DuplicateKey(ref k) if k == "Curcuma longa"));
    }

    #[test]
    fn test_fatality() {
        assert!(BackendError::ConnectionLost("gone".into()).is_fatal());
        assert!(BackendError::Unauthorized("401".into()).is_fatal());
        assert!(!BackendError::Transient("timeout".into()).is_fatal());
        assert!(!BackendError::DuplicateKey("x".into()).is_fatal());

        let lost: BackendError = StoreError::ConnectionLost("root removed".into()).into();
        assert!(lost.is_fatal());
    }

    #[test]
    fn test_schema_violation_format() {
        let err = StoreError::SchemaViolation {
            collection: "herbs".into(),
            errors: vec!["\"usage\" is a required property".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("herbs"));
        assert!(msg.contains("usage"));
    }
}
