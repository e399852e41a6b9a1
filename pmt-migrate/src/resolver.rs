//! Migration resolution for one upgrade.
//!
//! Given an upgrade old→new, the resolver determines which bundles were
//! published between the two digests and collects their migrations in
//! chronological order. The old bundle's own migration was applied on a
//! prior upgrade and is never included; the new bundle's migration, when
//! present, comes last.

use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{info, warn};

use pmt_core::{BundleRef, Error, Migration, Upgrade};
use pmt_registry::{RegistryClient, TagRecord};

/// Compute the chronological window of bundles an upgrade passes through:
/// everything strictly after the old digest, up to and including the new
/// digest.
///
/// `tags` is the tag history as listed by the registry, newest first.
/// Re-tagged digests are elided keeping their earliest occurrence. A
/// downgrade yields an empty window with a warning; a digest absent from
/// the history is an error.
pub fn upgrade_window(tags: &[TagRecord], upgrade: &Upgrade) -> Result<Vec<TagRecord>, Error> {
    // Chronological (old to new) order with duplicate digests elided; the
    // earliest occurrence of a digest is its canonical position.
    let mut seen = std::collections::HashSet::new();
    let chronological: Vec<&TagRecord> = tags
        .iter()
        .rev()
        .filter(|record| seen.insert(record.digest.as_str()))
        .collect();

    let position = |digest: &str| chronological.iter().position(|r| r.digest == digest);
    let old_pos = position(&upgrade.current_digest).ok_or_else(|| {
        Error::UpgradeEndpointNotFound(format!(
            "current bundle {} is not present in the tag history of {}",
            upgrade.current_bundle(),
            upgrade.dep_name
        ))
    })?;
    let new_pos = position(&upgrade.new_digest).ok_or_else(|| {
        Error::UpgradeEndpointNotFound(format!(
            "new bundle {} is not present in the tag history of {}",
            upgrade.new_bundle(),
            upgrade.dep_name
        ))
    })?;

    if chronological[old_pos].name != upgrade.current_value {
        warn!(
            "tag {} recorded for {} does not match the digest-derived tag {}",
            upgrade.current_value, upgrade.dep_name, chronological[old_pos].name
        );
    }
    if chronological[new_pos].name != upgrade.new_value {
        warn!(
            "tag {} recorded for {} does not match the digest-derived tag {}",
            upgrade.new_value, upgrade.dep_name, chronological[new_pos].name
        );
    }

    if new_pos == old_pos {
        return Ok(Vec::new());
    }
    if new_pos < old_pos {
        warn!(
            "new bundle {} is older than current bundle {}; migrations are not inverted",
            upgrade.new_bundle(),
            upgrade.current_bundle()
        );
        return Ok(Vec::new());
    }

    Ok(chronological[old_pos + 1..=new_pos]
        .iter()
        .map(|record| (*record).clone())
        .collect())
}

/// Resolve the ordered migrations for one upgrade.
///
/// Bundle inspections for the window fan out with bounded concurrency;
/// results assemble in window order, so the returned list is
/// chronological.
pub async fn resolve_migrations(
    client: &RegistryClient,
    upgrade: &Upgrade,
    concurrency: usize,
) -> Result<Vec<Migration>, Error> {
    let tags = client.list_tags(&upgrade.dep_name).await.map_err(Error::from)?;
    let window = upgrade_window(&tags, upgrade)?;
    if window.is_empty() {
        info!("upgrade window is empty for {}", upgrade.dep_name);
        return Ok(Vec::new());
    }

    let fetched: Vec<Option<Migration>> = stream::iter(window.into_iter().map(|record| {
        let bundle = BundleRef::new(&upgrade.dep_name)
            .with_tag(record.name)
            .with_digest(record.digest);
        async move { client.fetch_migration(&bundle).await }
    }))
    .buffered(concurrency.max(1))
    .try_collect()
    .await
    .map_err(Error::from)?;

    let migrations: Vec<Migration> = fetched.into_iter().flatten().collect();
    info!(
        "{}: {} migration(s) between {} and {}",
        upgrade.dep_name,
        migrations.len(),
        upgrade.current_value,
        upgrade.new_value
    );
    Ok(migrations)
}
