//! Process-scoped memoization of registry responses.
//!
//! The cache doubles as the fan-out coalescer: each key owns a
//! [`tokio::sync::OnceCell`], so concurrent lookups of the same key join a
//! single in-flight fill while lookups of different keys proceed
//! independently. A failed or cancelled fill leaves the cell empty, so no
//! partial value is ever observed. There is no eviction and no
//! persistence; entries live for one invocation.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::OnceCell;

use crate::error::{RegistryError, Result};
use crate::manifest::{Descriptor, Manifest};
use crate::quay::TagRecord;

/// Cache key: operation name plus its arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Manifest {
        repository: String,
        reference: String,
    },
    TagDigest {
        repository: String,
        tag: String,
    },
    Referrers {
        repository: String,
        digest: String,
        artifact_type: Option<String>,
    },
    Blob {
        repository: String,
        digest: String,
    },
    Tags {
        repository: String,
    },
}

/// Cached response value. Values are cloned on read so callers can never
/// mutate a cached structure.
#[derive(Debug, Clone)]
pub enum CacheValue {
    Manifest(Manifest),
    Digest(String),
    Referrers(Vec<Descriptor>),
    Blob(Vec<u8>),
    Tags(Vec<TagRecord>),
}

impl CacheValue {
    pub fn into_manifest(self) -> Result<Manifest> {
        match self {
            CacheValue::Manifest(m) => Ok(m),
            other => Err(type_mismatch("manifest", &other)),
        }
    }

    pub fn into_digest(self) -> Result<String> {
        match self {
            CacheValue::Digest(d) => Ok(d),
            other => Err(type_mismatch("digest", &other)),
        }
    }

    pub fn into_referrers(self) -> Result<Vec<Descriptor>> {
        match self {
            CacheValue::Referrers(r) => Ok(r),
            other => Err(type_mismatch("referrers", &other)),
        }
    }

    pub fn into_blob(self) -> Result<Vec<u8>> {
        match self {
            CacheValue::Blob(b) => Ok(b),
            other => Err(type_mismatch("blob", &other)),
        }
    }

    pub fn into_tags(self) -> Result<Vec<TagRecord>> {
        match self {
            CacheValue::Tags(t) => Ok(t),
            other => Err(type_mismatch("tags", &other)),
        }
    }
}

fn type_mismatch(expected: &str, got: &CacheValue) -> RegistryError {
    RegistryError::ParseError(format!("cache holds {got:?} where {expected} was expected"))
}

/// In-memory request cache with per-key fill coalescing.
#[derive(Default)]
pub struct RequestCache {
    entries: Mutex<HashMap<CacheKey, Arc<OnceCell<CacheValue>>>>,
}

impl RequestCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached value for `key`, filling it with `fetch` on the
    /// first lookup. Concurrent lookups of the same key wait for the one
    /// in-flight fill instead of issuing their own.
    pub async fn get_or_fetch<F, Fut>(&self, key: CacheKey, fetch: F) -> Result<CacheValue>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CacheValue>>,
    {
        let cell = {
            let mut entries = self.entries.lock().expect("cache lock poisoned");
            entries.entry(key).or_default().clone()
        };
        let value = cell.get_or_try_init(fetch).await?;
        Ok(value.clone())
    }

    /// Number of populated entries, for diagnostics.
    pub fn len(&self) -> usize {
        let entries = self.entries.lock().expect("cache lock poisoned");
        entries.values().filter(|cell| cell.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
