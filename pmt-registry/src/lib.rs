//! OCI registry client for the pipeline migration tool.
//!
//! This crate talks to container registries on behalf of the migration
//! engine: manifests, referrer listings (with the fallback-tag convention),
//! blobs, and tag histories. All responses are memoized in a process-scoped
//! [`cache::RequestCache`] so the migration graph can be walked without
//! repeated round-trips.
//!
//! # Example
//!
//! ```no_run
//! use pmt_registry::RegistryClient;
//! use pmt_core::BundleRef;
//!
//! # async fn example() -> Result<(), pmt_registry::RegistryError> {
//! let client = RegistryClient::from_env()?;
//! let bundle: BundleRef = "quay.io/konflux-ci/task-clone:0.2@sha256:abc123"
//!     .parse()
//!     .unwrap();
//! if client.has_migration(&bundle).await? {
//!     let migration = client.fetch_migration(&bundle).await?;
//!     println!("migration: {:?}", migration.map(|m| m.script_name));
//! }
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod bundles;
pub mod cache;
pub mod error;
pub mod manifest;
pub mod quay;

pub use error::{RegistryError, Result};
pub use manifest::{Descriptor, ImageIndex, Manifest};
pub use quay::TagRecord;

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use pmt_core::BundleRef;

use crate::auth::AuthConfig;
use crate::cache::{CacheKey, CacheValue, RequestCache};

const MAX_ATTEMPTS: u32 = 5;
const INITIAL_DELAY: Duration = Duration::from_secs(1);
const MAX_DELAY: Duration = Duration::from_secs(30);
const GLOBAL_DEADLINE: Duration = Duration::from_secs(120);

const ACCEPT_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json, \
     application/vnd.oci.image.index.v1+json, \
     application/vnd.docker.distribution.manifest.v2+json";

/// Client for OCI registries and the Quay API.
///
/// Cheap to clone is not a goal; the orchestrator creates one client per
/// invocation and shares it by reference.
pub struct RegistryClient {
    http: reqwest::Client,
    auth: AuthConfig,
    cache: RequestCache,
}

impl RegistryClient {
    /// Create a client reading credentials from the ambient auth file.
    pub fn from_env() -> Result<Self> {
        Ok(Self::with_auth(AuthConfig::from_env()?))
    }

    /// Create a client with explicit credentials.
    pub fn with_auth(auth: AuthConfig) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .build()
            .expect("default TLS backend is available");
        Self {
            http,
            auth,
            cache: RequestCache::new(),
        }
    }

    /// The request cache backing this client.
    pub fn cache(&self) -> &RequestCache {
        &self.cache
    }

    /// Fetch the manifest of a bundle. The digest is preferred over the
    /// tag when both are present.
    pub async fn get_manifest(&self, bundle: &BundleRef) -> Result<Manifest> {
        let reference = bundle
            .digest
            .as_deref()
            .or(bundle.tag.as_deref())
            .ok_or_else(|| {
                RegistryError::IncompleteReference(format!(
                    "{bundle} has neither tag nor digest"
                ))
            })?
            .to_string();
        self.get_manifest_by(&bundle.repository, &reference).await
    }

    /// Fetch a manifest by repository and tag or digest.
    pub async fn get_manifest_by(&self, repository: &str, reference: &str) -> Result<Manifest> {
        let key = CacheKey::Manifest {
            repository: repository.to_string(),
            reference: reference.to_string(),
        };
        let url = self.manifest_url(repository, reference);
        self.cache
            .get_or_fetch(key, || async move {
                let response = self
                    .execute_with_retry(&url, || {
                        self.authorized(self.http.get(&url), repository)
                            .header(reqwest::header::ACCEPT, ACCEPT_MANIFEST)
                    })
                    .await?;
                let manifest = response
                    .json::<Manifest>()
                    .await
                    .map_err(|e| RegistryError::ParseError(e.to_string()))?;
                Ok(CacheValue::Manifest(manifest))
            })
            .await?
            .into_manifest()
    }

    /// Resolve the manifest digest a tag currently points to.
    pub async fn resolve_tag_digest(&self, repository: &str, tag: &str) -> Result<String> {
        let key = CacheKey::TagDigest {
            repository: repository.to_string(),
            tag: tag.to_string(),
        };
        let url = self.manifest_url(repository, tag);
        self.cache
            .get_or_fetch(key, || async move {
                let response = self
                    .execute_with_retry(&url, || {
                        self.authorized(self.http.head(&url), repository)
                            .header(reqwest::header::ACCEPT, ACCEPT_MANIFEST)
                    })
                    .await?;
                let digest = response
                    .headers()
                    .get("docker-content-digest")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
                    .ok_or_else(|| {
                        RegistryError::ParseError(format!(
                            "{url} did not answer with a Docker-Content-Digest header"
                        ))
                    })?;
                Ok(CacheValue::Digest(digest))
            })
            .await?
            .into_digest()
    }

    /// List referrers of a digest per the OCI v1.1 referrers API.
    ///
    /// When the registry does not serve the referrers endpoint, the
    /// fallback convention is used: an image index pushed under the tag
    /// `sha256-<hex>`. The artifact type filter is always applied
    /// client-side as well, since servers may ignore the query parameter.
    pub async fn list_referrers(
        &self,
        repository: &str,
        digest: &str,
        artifact_type: Option<&str>,
    ) -> Result<Vec<Descriptor>> {
        let key = CacheKey::Referrers {
            repository: repository.to_string(),
            digest: digest.to_string(),
            artifact_type: artifact_type.map(str::to_string),
        };
        let (host, path) = split_repository(repository);
        let mut url = format!("https://{host}/v2/{path}/referrers/{digest}");
        if let Some(artifact_type) = artifact_type {
            url.push_str("?artifactType=");
            url.push_str(&urlencode(artifact_type));
        }
        self.cache
            .get_or_fetch(key, || async move {
                let index = match self
                    .execute_with_retry(&url, || self.authorized(self.http.get(&url), repository))
                    .await
                {
                    Ok(response) => response
                        .json::<ImageIndex>()
                        .await
                        .map_err(|e| RegistryError::ParseError(e.to_string()))?,
                    Err(e) if e.is_not_found() => {
                        debug!(
                            "referrers API not available for {repository}; \
                             falling back to the referrers tag"
                        );
                        self.referrers_by_fallback_tag(repository, digest).await?
                    }
                    Err(e) => return Err(e),
                };
                let referrers = index
                    .manifests
                    .into_iter()
                    .filter(|d| match artifact_type {
                        Some(wanted) => d.artifact_type.as_deref() == Some(wanted),
                        None => true,
                    })
                    .collect();
                Ok(CacheValue::Referrers(referrers))
            })
            .await?
            .into_referrers()
    }

    async fn referrers_by_fallback_tag(
        &self,
        repository: &str,
        digest: &str,
    ) -> Result<ImageIndex> {
        let hex = digest.strip_prefix("sha256:").ok_or_else(|| {
            RegistryError::IncompleteReference(format!("{digest} is not a sha256 digest"))
        })?;
        let url = self.manifest_url(repository, &format!("sha256-{hex}"));
        match self
            .execute_with_retry(&url, || {
                self.authorized(self.http.get(&url), repository)
                    .header(reqwest::header::ACCEPT, ACCEPT_MANIFEST)
            })
            .await
        {
            Ok(response) => response
                .json::<ImageIndex>()
                .await
                .map_err(|e| RegistryError::ParseError(e.to_string())),
            // No fallback tag means the digest simply has no referrers.
            Err(e) if e.is_not_found() => Ok(ImageIndex::default()),
            Err(e) => Err(e),
        }
    }

    /// Retrieve a blob by digest.
    pub async fn fetch_blob(&self, repository: &str, digest: &str) -> Result<Vec<u8>> {
        let key = CacheKey::Blob {
            repository: repository.to_string(),
            digest: digest.to_string(),
        };
        let (host, path) = split_repository(repository);
        let url = format!("https://{host}/v2/{path}/blobs/{digest}");
        self.cache
            .get_or_fetch(key, || async move {
                let response = self
                    .execute_with_retry(&url, || self.authorized(self.http.get(&url), repository))
                    .await?;
                let bytes = response.bytes().await?;
                Ok(CacheValue::Blob(bytes.to_vec()))
            })
            .await?
            .into_blob()
    }

    fn manifest_url(&self, repository: &str, reference: &str) -> String {
        let (host, path) = split_repository(repository);
        format!("https://{host}/v2/{path}/manifests/{reference}")
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub(crate) fn authorized(
        &self,
        request: reqwest::RequestBuilder,
        repository: &str,
    ) -> reqwest::RequestBuilder {
        let (host, _) = split_repository(repository);
        match self.auth.header_for(host) {
            Some(header) => request.header(reqwest::header::AUTHORIZATION, header),
            None => request,
        }
    }

    /// Send a request with capped exponential backoff on transient
    /// failures. 5xx, 429 and connection errors are retried; 4xx answers
    /// are returned immediately. Once the global deadline elapses the
    /// operation fails as unavailable.
    pub(crate) async fn execute_with_retry<B>(
        &self,
        url: &str,
        build: B,
    ) -> Result<reqwest::Response>
    where
        B: Fn() -> reqwest::RequestBuilder,
    {
        let deadline = Instant::now() + GLOBAL_DEADLINE;
        let mut delay = INITIAL_DELAY;
        let mut attempt = 0;

        loop {
            attempt += 1;
            match build().send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }
                    if status.as_u16() != 429 && !status.is_server_error() {
                        return Err(RegistryError::Status {
                            status: status.as_u16(),
                            url: url.to_string(),
                        });
                    }
                    warn!(
                        "transient registry failure (status {}) for {url}, attempt {attempt}",
                        status.as_u16()
                    );
                }
                Err(e) => {
                    if !e.is_connect() && !e.is_timeout() {
                        return Err(e.into());
                    }
                    warn!("transient registry failure for {url}, attempt {attempt}: {e}");
                }
            }

            if attempt >= MAX_ATTEMPTS || Instant::now() + delay > deadline {
                return Err(RegistryError::Unavailable {
                    url: url.to_string(),
                    attempts: attempt,
                });
            }
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(MAX_DELAY);
        }
    }
}

/// Split a repository into registry host and path.
pub(crate) fn split_repository(repository: &str) -> (&str, &str) {
    repository.split_once('/').unwrap_or((repository, ""))
}

fn urlencode(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_repository() {
        assert_eq!(
            split_repository("quay.io/ns/task-clone"),
            ("quay.io", "ns/task-clone")
        );
        assert_eq!(split_repository("quay.io"), ("quay.io", ""));
    }

    #[test]
    fn test_urlencode_media_type() {
        assert_eq!(urlencode("text/x-shellscript"), "text%2Fx-shellscript");
    }

    #[test]
    fn test_manifest_url() {
        let client = RegistryClient::with_auth(AuthConfig::default());
        assert_eq!(
            client.manifest_url("quay.io/ns/task", "sha256:aa"),
            "https://quay.io/v2/ns/task/manifests/sha256:aa"
        );
    }
}
