//! Error kinds raised by the tool core.
//!
//! Every kind carries the process exit code it maps to, so the binary can
//! translate any failure into the documented CLI contract.

use thiserror::Error;

/// Errors raised by the migration engine and the YAML commands.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed upgrades JSON or an invalid CLI combination.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A registry could not be reached after exhausting retries.
    #[error("registry unavailable: {0}")]
    RegistryUnavailable(String),

    /// Annotation/referrer inconsistency on a task bundle.
    #[error("malformed bundle {reference}: {detail}")]
    MalformedBundle { reference: String, detail: String },

    /// Old or new digest of an upgrade is absent from the tag history.
    #[error("upgrade endpoint not found: {0}")]
    UpgradeEndpointNotFound(String),

    /// A migration script exited non-zero or timed out.
    #[error("migration failed: {0}")]
    MigrationFailed(String),

    /// A semantic YAML edit precondition was violated, e.g. the targeted
    /// task does not exist or an existing param carries a different value.
    #[error("{0}")]
    YamlSurgeryConflict(String),

    /// Invariant violation inside the tool itself.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl Error {
    /// Process exit code for this error kind.
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::InvalidInput(_) | Error::YamlSurgeryConflict(_) => 1,
            Error::RegistryUnavailable(_)
            | Error::MalformedBundle { .. }
            | Error::UpgradeEndpointNotFound(_) => 2,
            Error::MigrationFailed(_) => 3,
            Error::Internal(_) => 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_follow_cli_contract() {
        assert_eq!(Error::InvalidInput("x".into()).exit_code(), 1);
        assert_eq!(Error::RegistryUnavailable("x".into()).exit_code(), 2);
        assert_eq!(
            Error::MalformedBundle {
                reference: "r".into(),
                detail: "d".into()
            }
            .exit_code(),
            2
        );
        assert_eq!(Error::UpgradeEndpointNotFound("x".into()).exit_code(), 2);
        assert_eq!(Error::MigrationFailed("x".into()).exit_code(), 3);
        assert_eq!(
            Error::Internal(anyhow::anyhow!("boom")).exit_code(),
            4
        );
    }
}
