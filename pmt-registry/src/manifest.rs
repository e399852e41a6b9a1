//! OCI manifest and descriptor shapes.
//!
//! Only the fields the migration engine consumes are modeled; everything
//! else the registry returns is ignored on deserialization.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub const MEDIA_TYPE_OCI_IMAGE_MANIFEST_V1: &str = "application/vnd.oci.image.manifest.v1+json";
pub const MEDIA_TYPE_OCI_IMAGE_INDEX_V1: &str = "application/vnd.oci.image.index.v1+json";

/// A content descriptor, as found in manifest layers, referrer listings
/// and image indexes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Descriptor {
    pub media_type: String,
    pub digest: String,
    pub size: Option<u64>,
    pub artifact_type: Option<String>,
    pub annotations: HashMap<String, String>,
}

/// An OCI image manifest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Manifest {
    pub schema_version: u32,
    pub media_type: Option<String>,
    pub artifact_type: Option<String>,
    pub config: Option<Descriptor>,
    pub layers: Vec<Descriptor>,
    pub annotations: HashMap<String, String>,
}

impl Manifest {
    /// Look up an annotation value.
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }
}

/// An OCI image index. The referrers API answers with this shape, where
/// `manifests` lists the referring artifacts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImageIndex {
    pub schema_version: u32,
    pub media_type: Option<String>,
    pub manifests: Vec<Descriptor>,
    pub annotations: HashMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_deserializes_with_unknown_fields() {
        let raw = serde_json::json!({
            "schemaVersion": 2,
            "mediaType": MEDIA_TYPE_OCI_IMAGE_MANIFEST_V1,
            "config": {"mediaType": "application/vnd.oci.empty.v1+json", "digest": "sha256:aa", "size": 2},
            "layers": [{"mediaType": "text/x-shellscript", "digest": "sha256:bb", "size": 123}],
            "annotations": {"dev.konflux-ci.task.has-migration": "true"},
            "subject": {"digest": "sha256:cc"}
        });
        let manifest: Manifest = serde_json::from_value(raw).unwrap();
        assert_eq!(manifest.layers.len(), 1);
        assert_eq!(
            manifest.annotation("dev.konflux-ci.task.has-migration"),
            Some("true")
        );
    }

    #[test]
    fn test_image_index_defaults() {
        let index: ImageIndex = serde_json::from_str("{}").unwrap();
        assert!(index.manifests.is_empty());
    }
}
