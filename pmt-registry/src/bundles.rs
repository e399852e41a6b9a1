//! Task bundle inspection.
//!
//! A bundle declares a migration through a manifest annotation; the script
//! itself is attached as an OCI referrer of artifact type
//! `text/x-shellscript`. Exactly one such referrer must exist when the
//! annotation claims one.

use tracing::{debug, info};

use pmt_core::{
    BundleRef, Migration, ANNOTATION_HAS_MIGRATION, ANNOTATION_IS_MIGRATION,
    ANNOTATION_TRUTH_VALUE, MEDIA_TYPE_SHELLSCRIPT,
};

use crate::error::{RegistryError, Result};
use crate::manifest::Descriptor;
use crate::RegistryClient;

impl RegistryClient {
    /// Whether the bundle's manifest declares an attached migration.
    pub async fn has_migration(&self, bundle: &BundleRef) -> Result<bool> {
        let manifest = self.get_manifest(bundle).await?;
        Ok(manifest.annotation(ANNOTATION_HAS_MIGRATION) == Some(ANNOTATION_TRUTH_VALUE))
    }

    /// Fetch the migration attached to a bundle, if any.
    ///
    /// Returns `None` when the bundle does not declare a migration. When
    /// it does, anything other than exactly one matching referrer is a
    /// malformed bundle.
    pub async fn fetch_migration(&self, bundle: &BundleRef) -> Result<Option<Migration>> {
        if !self.has_migration(bundle).await? {
            debug!("task bundle {bundle} does not have a migration");
            return Ok(None);
        }

        let digest = bundle.digest.as_deref().ok_or_else(|| {
            RegistryError::IncompleteReference(format!("{bundle} is missing a digest"))
        })?;
        let referrers = self
            .list_referrers(&bundle.repository, digest, Some(MEDIA_TYPE_SHELLSCRIPT))
            .await?;
        let referrer = select_migration_referrer(referrers, bundle)?;
        let manifest = self
            .get_manifest_by(&bundle.repository, &referrer.digest)
            .await?;
        let layer = manifest.layers.first().ok_or_else(|| {
            RegistryError::MalformedBundle {
                reference: bundle.to_string(),
                detail: format!("migration referrer {} has no layers", referrer.digest),
            }
        })?;
        let script = self.fetch_blob(&bundle.repository, &layer.digest).await?;
        info!("task bundle {bundle} has a migration");

        Ok(Some(Migration {
            script_name: script_name(bundle),
            bundle: bundle.clone(),
            script,
        }))
    }
}

/// Pick the single migration referrer of a bundle.
///
/// Referrers are filtered to migration attachments with duplicate digests
/// elided; the first listing of a digest is canonical. A bundle that
/// declares a migration must end up with exactly one candidate.
fn select_migration_referrer(
    referrers: Vec<Descriptor>,
    bundle: &BundleRef,
) -> Result<Descriptor> {
    let candidates = migration_referrers(referrers);
    if candidates.len() != 1 {
        return Err(RegistryError::MalformedBundle {
            reference: bundle.to_string(),
            detail: format!(
                "{} migration referrer(s) are attached, expected exactly one",
                candidates.len()
            ),
        });
    }
    Ok(candidates.into_iter().next().expect("length checked"))
}

/// Filter referrers down to migration attachments, eliding duplicate
/// digests. The first listing of a digest is canonical.
fn migration_referrers(referrers: Vec<Descriptor>) -> Vec<Descriptor> {
    let mut seen = std::collections::HashSet::new();
    referrers
        .into_iter()
        .filter(|d| {
            d.annotations.get(ANNOTATION_IS_MIGRATION).map(String::as_str)
                == Some(ANNOTATION_TRUTH_VALUE)
        })
        .filter(|d| seen.insert(d.digest.clone()))
        .collect()
}

fn script_name(bundle: &BundleRef) -> String {
    match &bundle.tag {
        Some(tag) => format!("{}-{tag}.sh", bundle.name()),
        None => format!("{}.sh", bundle.name()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn migration_descriptor(digest: &str) -> Descriptor {
        Descriptor {
            media_type: "application/vnd.oci.image.manifest.v1+json".into(),
            digest: digest.into(),
            artifact_type: Some(MEDIA_TYPE_SHELLSCRIPT.into()),
            annotations: [(ANNOTATION_IS_MIGRATION.to_string(), "true".to_string())]
                .into_iter()
                .collect(),
            ..Descriptor::default()
        }
    }

    #[test]
    fn test_migration_referrers_filters_annotation() {
        let mut unrelated = migration_descriptor("sha256:aa");
        unrelated.annotations.clear();
        let kept = migration_referrers(vec![unrelated, migration_descriptor("sha256:bb")]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].digest, "sha256:bb");
    }

    #[test]
    fn test_migration_referrers_elides_duplicate_digests() {
        let kept = migration_referrers(vec![
            migration_descriptor("sha256:aa"),
            migration_descriptor("sha256:aa"),
        ]);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn test_zero_migration_referrers_is_malformed() {
        let bundle = BundleRef::new("quay.io/ns/task-clone")
            .with_tag("0.2")
            .with_digest("sha256:aa");
        let err = select_migration_referrer(Vec::new(), &bundle).unwrap_err();
        match err {
            RegistryError::MalformedBundle { detail, .. } => {
                assert!(detail.contains("0 migration referrer(s)"), "{detail}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_multiple_migration_referrers_is_malformed() {
        let bundle = BundleRef::new("quay.io/ns/task-clone")
            .with_tag("0.2")
            .with_digest("sha256:aa");
        let referrers = vec![
            migration_descriptor("sha256:bb"),
            migration_descriptor("sha256:cc"),
        ];
        assert!(select_migration_referrer(referrers, &bundle).is_err());
    }

    #[test]
    fn test_duplicate_listings_resolve_to_one_referrer() {
        let bundle = BundleRef::new("quay.io/ns/task-clone")
            .with_tag("0.2")
            .with_digest("sha256:aa");
        let referrers = vec![
            migration_descriptor("sha256:bb"),
            migration_descriptor("sha256:bb"),
        ];
        let picked = select_migration_referrer(referrers, &bundle).unwrap();
        assert_eq!(picked.digest, "sha256:bb");
    }

    #[test]
    fn test_script_name_derivation() {
        let bundle = BundleRef::new("quay.io/ns/task-clone")
            .with_tag("0.2")
            .with_digest("sha256:aa");
        assert_eq!(script_name(&bundle), "task-clone-0.2.sh");
    }
}
