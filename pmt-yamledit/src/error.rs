//! Error types for YAML editing.

use thiserror::Error;

/// Result type alias for editing operations.
pub type Result<T> = std::result::Result<T, EditError>;

/// Errors that can occur while editing a YAML file in place.
#[derive(Debug, Error)]
pub enum EditError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Parse(String),

    #[error("path {0} does not exist in the document")]
    PathNotFound(String),

    #[error("path {0} does not point to a mapping or sequence")]
    NotAContainer(String),

    #[error("invalid edit: {0}")]
    InvalidEdit(String),

    #[error("edit produced invalid YAML, file left untouched: {0}")]
    PostValidation(String),

    #[error("unsupported YAML feature: {0}")]
    Unsupported(String),
}
