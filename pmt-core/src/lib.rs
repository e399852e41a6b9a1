//! Core domain types for the pipeline migration tool.
//!
//! This crate holds everything the other crates agree on: bundle
//! references, Renovate upgrade records, pipeline file discovery and
//! classification, and the error kinds that map to process exit codes.

pub mod bundle;
pub mod error;
pub mod pipeline;
pub mod upgrade;

pub use bundle::{BundleRef, Migration};
pub use error::Error;
pub use upgrade::Upgrade;

/// Result type alias used throughout the tool.
pub type Result<T> = std::result::Result<T, Error>;

/// Annotation on a bundle manifest declaring that a migration is attached.
pub const ANNOTATION_HAS_MIGRATION: &str = "dev.konflux-ci.task.has-migration";

/// Annotation on a referrer marking it as the migration artifact.
pub const ANNOTATION_IS_MIGRATION: &str = "dev.konflux-ci.task.is-migration";

/// String form of a true annotation value.
pub const ANNOTATION_TRUTH_VALUE: &str = "true";

/// Artifact type of migration script referrers.
pub const MEDIA_TYPE_SHELLSCRIPT: &str = "text/x-shellscript";

/// The Renovate dependency type handled by this tool.
pub const DEP_TYPE_TASK_BUNDLE: &str = "tekton-bundle";

/// Task bundles are expected to live under this organization unless
/// `PMT_LOCAL_TEST` is set.
pub const KONFLUX_ORG_PREFIX: &str = "quay.io/konflux-ci/";
