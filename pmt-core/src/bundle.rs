//! Task bundle references and migrations.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A fully qualified OCI reference to a task bundle.
///
/// A bundle is identified by its digest; the tag is a version hint used
/// for discovery and ordering. References used for execution must carry
/// both tag and digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleRef {
    /// Repository including the registry host, e.g. `quay.io/ns/task-clone`.
    pub repository: String,
    /// Version label, e.g. `0.2`.
    pub tag: Option<String>,
    /// Manifest digest, `sha256:...`.
    pub digest: Option<String>,
}

impl BundleRef {
    pub fn new(repository: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            tag: None,
            digest: None,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn with_digest(mut self, digest: impl Into<String>) -> Self {
        self.digest = Some(digest.into());
        self
    }

    /// Registry host part of the repository.
    pub fn registry_host(&self) -> &str {
        self.repository.split('/').next().unwrap_or_default()
    }

    /// Repository path below the registry host.
    pub fn repo_path(&self) -> &str {
        match self.repository.split_once('/') {
            Some((_, path)) => path,
            None => "",
        }
    }

    /// Last path segment of the repository, conventionally the task name.
    pub fn name(&self) -> &str {
        self.repository
            .rsplit('/')
            .next()
            .unwrap_or(&self.repository)
    }
}

impl fmt::Display for BundleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

impl FromStr for BundleRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(Error::InvalidInput("empty bundle reference".into()));
        }
        let (rest, digest) = match s.split_once('@') {
            Some((rest, digest)) => {
                if !is_valid_digest(digest) {
                    return Err(Error::InvalidInput(format!(
                        "{s} does not carry a valid sha256 digest"
                    )));
                }
                (rest, Some(digest.to_string()))
            }
            None => (s, None),
        };
        // A colon after the last slash separates the tag; a colon before it
        // would be a registry port.
        let tag_sep = rest
            .rfind(':')
            .filter(|i| *i > rest.rfind('/').unwrap_or(0));
        let (repository, tag) = match tag_sep {
            Some(i) => (rest[..i].to_string(), Some(rest[i + 1..].to_string())),
            None => (rest.to_string(), None),
        };
        if repository.is_empty() {
            return Err(Error::InvalidInput(format!(
                "{s} does not include a repository"
            )));
        }
        if tag.as_deref() == Some("") {
            return Err(Error::InvalidInput(format!("{s} has an empty tag")));
        }
        Ok(BundleRef {
            repository,
            tag,
            digest,
        })
    }
}

/// Check the `sha256:<hex>` digest shape.
pub fn is_valid_digest(digest: &str) -> bool {
    match digest.strip_prefix("sha256:") {
        Some(hex) => !hex.is_empty() && hex.chars().all(|c| c.is_ascii_hexdigit()),
        None => false,
    }
}

/// A migration attached to a task bundle.
///
/// At most one migration exists per bundle. The script is an opaque
/// executable taking the pipeline file path as its only argument.
#[derive(Debug, Clone)]
pub struct Migration {
    /// The bundle this migration belongs to, with both tag and digest.
    pub bundle: BundleRef,
    /// Raw script bytes.
    pub script: Vec<u8>,
    /// Filename derived from the bundle, used when staging the script.
    pub script_name: String,
}
