//! Tag history listing.
//!
//! Quay-hosted repositories go through the paginated Quay API, which
//! answers newest-first with timestamps. Other registries fall back to the
//! OCI distribution tag listing, resolving each tag's digest through a
//! manifest HEAD.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::{CacheKey, CacheValue};
use crate::error::{RegistryError, Result};
use crate::{split_repository, RegistryClient};

/// Host served by the Quay API.
pub const QUAY_HOST: &str = "quay.io";

/// One entry of a repository's tag history, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagRecord {
    pub name: String,
    pub digest: String,
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct QuayTagsPage {
    #[serde(default)]
    tags: Vec<QuayTag>,
    #[serde(default)]
    has_additional: bool,
    #[serde(default)]
    page: u32,
}

#[derive(Debug, Deserialize)]
struct QuayTag {
    name: String,
    manifest_digest: String,
    #[serde(default)]
    start_ts: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct OciTagList {
    #[serde(default)]
    tags: Vec<String>,
}

impl RegistryClient {
    /// List the logical tag history of a repository, newest first.
    ///
    /// Tags following the referrers fallback convention (`sha256-<hex>`)
    /// are not part of the logical history and are excluded.
    pub async fn list_tags(&self, repository: &str) -> Result<Vec<TagRecord>> {
        let key = CacheKey::Tags {
            repository: repository.to_string(),
        };
        self.cache()
            .get_or_fetch(key, || async move {
                let (host, _) = split_repository(repository);
                let records = if host == QUAY_HOST {
                    self.list_quay_tags(repository).await?
                } else {
                    self.list_oci_tags(repository).await?
                };
                Ok(CacheValue::Tags(records))
            })
            .await?
            .into_tags()
    }

    async fn list_quay_tags(&self, repository: &str) -> Result<Vec<TagRecord>> {
        let (host, path) = split_repository(repository);
        let mut records = Vec::new();
        let mut page: u32 = 1;
        loop {
            let url = format!(
                "https://{host}/api/v1/repository/{path}/tag/?page={page}&onlyActiveTags=true"
            );
            let response = self
                .execute_with_retry(&url, || self.http_get(&url, repository))
                .await?;
            let body: QuayTagsPage = response
                .json()
                .await
                .map_err(|e| RegistryError::ParseError(e.to_string()))?;
            for tag in body.tags {
                if is_referrers_fallback_tag(&tag.name) {
                    continue;
                }
                records.push(TagRecord {
                    name: tag.name,
                    digest: tag.manifest_digest,
                    last_modified: tag.start_ts.and_then(|ts| DateTime::from_timestamp(ts, 0)),
                });
            }
            if !body.has_additional {
                break;
            }
            page = body.page + 1;
        }
        debug!("{repository}: {} active tag(s)", records.len());
        Ok(records)
    }

    async fn list_oci_tags(&self, repository: &str) -> Result<Vec<TagRecord>> {
        let (host, path) = split_repository(repository);
        let url = format!("https://{host}/v2/{path}/tags/list");
        let response = self
            .execute_with_retry(&url, || self.http_get(&url, repository))
            .await?;
        let body: OciTagList = response
            .json()
            .await
            .map_err(|e| RegistryError::ParseError(e.to_string()))?;

        // The distribution API lists tags lexicographically, oldest first
        // by the version-per-tag convention; reverse to keep the
        // newest-first contract.
        let mut records = Vec::new();
        for name in body.tags {
            if is_referrers_fallback_tag(&name) {
                continue;
            }
            let digest = self.resolve_tag_digest(repository, &name).await?;
            records.push(TagRecord {
                name,
                digest,
                last_modified: None,
            });
        }
        records.reverse();
        Ok(records)
    }

    /// Look up a single active tag on a Quay repository.
    pub async fn get_quay_tag(&self, repository: &str, tag: &str) -> Result<Option<TagRecord>> {
        let (host, path) = split_repository(repository);
        let url = format!(
            "https://{host}/api/v1/repository/{path}/tag/?page=1&onlyActiveTags=true&specificTag={tag}"
        );
        let response = self
            .execute_with_retry(&url, || self.http_get(&url, repository))
            .await?;
        let body: QuayTagsPage = response
            .json()
            .await
            .map_err(|e| RegistryError::ParseError(e.to_string()))?;
        Ok(body.tags.into_iter().next().map(|t| TagRecord {
            name: t.name,
            digest: t.manifest_digest,
            last_modified: t.start_ts.and_then(|ts| DateTime::from_timestamp(ts, 0)),
        }))
    }

    fn http_get(&self, url: &str, repository: &str) -> reqwest::RequestBuilder {
        self.authorized(self.http().get(url), repository)
    }
}

/// Whether a tag follows the referrers fallback convention.
pub fn is_referrers_fallback_tag(name: &str) -> bool {
    match name.strip_prefix("sha256-") {
        Some(hex) => !hex.is_empty() && hex.chars().all(|c| c.is_ascii_hexdigit()),
        None => false,
    }
}
