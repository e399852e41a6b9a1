//! Error types for the registry client.

use thiserror::Error;

/// Result type alias for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Errors that can occur when talking to an OCI registry or the Quay API.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// HTTP transport failure that was not worth retrying.
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// The registry answered with a non-success status.
    #[error("registry error (status {status}) for {url}")]
    Status { status: u16, url: String },

    /// Retries were exhausted or the global deadline elapsed.
    #[error("registry unavailable after {attempts} attempt(s): {url}")]
    Unavailable { url: String, attempts: u32 },

    /// The registry auth file could not be read or decoded.
    #[error("registry auth configuration: {0}")]
    AuthConfig(String),

    /// The response body did not match the expected shape.
    #[error("failed to parse registry response: {0}")]
    ParseError(String),

    /// Annotation/referrer inconsistency on a task bundle.
    #[error("malformed bundle {reference}: {detail}")]
    MalformedBundle { reference: String, detail: String },

    /// An operation that needs a digest or tag was called without one.
    #[error("incomplete reference: {0}")]
    IncompleteReference(String),
}

impl RegistryError {
    /// Whether this error corresponds to a 404 answer.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { status: 404, .. })
    }
}

impl From<RegistryError> for pmt_core::Error {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::MalformedBundle { reference, detail } => {
                pmt_core::Error::MalformedBundle { reference, detail }
            }
            other => pmt_core::Error::RegistryUnavailable(other.to_string()),
        }
    }
}
