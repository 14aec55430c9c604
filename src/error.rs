//! Error types for schema compatibility checking

use thiserror::Error;

/// Result type for compatibility operations
pub type Result<T> = std::result::Result<T, CompatError>;

/// Which side of a comparison a payload belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Old,
    New,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Old => write!(f, "old"),
            Side::New => write!(f, "new"),
        }
    }
}

/// Compatibility checker errors
#[derive(Error, Debug)]
pub enum CompatError {
    #[error("Malformed metadata payload: {0}")]
    MetadataShape(String),

    #[error("Metadata missing for {side} snapshot: strict normalization requires both sides")]
    MetadataMissing { side: Side },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
