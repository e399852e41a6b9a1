//! Development-only migration search in a local directory layout.
//!
//! Instead of walking the registry, migrations are read from
//! `migrations/<task name>/<version>.sh` under the working tree. Scripts
//! with versions strictly after the current tag, up to and including the
//! new tag, are applied in version order. This mode never touches the
//! network and is meant for developing migrations locally.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use pmt_core::{BundleRef, Error, Migration, Upgrade};

/// Root directory of the local migration layout.
pub const LEGACY_MIGRATIONS_DIR: &str = "migrations";

/// Resolve migrations for an upgrade from the local directory layout.
pub fn resolve_legacy_migrations(root: &Path, upgrade: &Upgrade) -> Result<Vec<Migration>, Error> {
    let task_name = upgrade
        .dep_name
        .rsplit('/')
        .next()
        .unwrap_or(&upgrade.dep_name);
    let dir = root.join(LEGACY_MIGRATIONS_DIR).join(task_name);
    if !dir.is_dir() {
        info!(
            "no local migrations directory {} for {}",
            dir.display(),
            upgrade.dep_name
        );
        return Ok(Vec::new());
    }

    let mut versions: Vec<(String, PathBuf)> = Vec::new();
    let entries = std::fs::read_dir(&dir)
        .map_err(|e| Error::InvalidInput(format!("cannot list {}: {e}", dir.display())))?;
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("sh") {
            continue;
        }
        let Some(version) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        versions.push((version.to_string(), path));
    }

    versions.retain(|(version, _)| {
        compare_versions(version, &upgrade.current_value) == Ordering::Greater
            && compare_versions(version, &upgrade.new_value) != Ordering::Greater
    });
    versions.sort_by(|(a, _), (b, _)| compare_versions(a, b));

    let mut migrations = Vec::with_capacity(versions.len());
    for (version, path) in versions {
        let script = std::fs::read(&path)
            .map_err(|e| Error::InvalidInput(format!("cannot read {}: {e}", path.display())))?;
        warn!(
            "using local migration {} for {} (development mode)",
            path.display(),
            upgrade.dep_name
        );
        migrations.push(Migration {
            bundle: BundleRef::new(&upgrade.dep_name).with_tag(&version),
            script,
            script_name: format!("{task_name}-{version}.sh"),
        });
    }
    Ok(migrations)
}

/// Compare dot-separated version labels numerically, falling back to
/// string order for non-numeric components.
fn compare_versions(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.');
    let mut right = b.split('.');
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let ordering = match (x.parse::<u64>(), y.parse::<u64>()) {
                    (Ok(x), Ok(y)) => x.cmp(&y),
                    _ => x.cmp(y),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upgrade(current: &str, new: &str) -> Upgrade {
        serde_json::from_value(serde_json::json!({
            "depName": "quay.io/konflux-ci/task-clone",
            "currentValue": current,
            "currentDigest": "sha256:a1",
            "newValue": new,
            "newDigest": "sha256:b2",
            "packageFile": ".tekton/pull.yaml",
            "parentDir": ".tekton",
            "depTypes": ["tekton-bundle"],
        }))
        .unwrap()
    }

    #[test]
    fn test_compare_versions() {
        assert_eq!(compare_versions("0.2", "0.10"), Ordering::Less);
        assert_eq!(compare_versions("0.2", "0.2"), Ordering::Equal);
        assert_eq!(compare_versions("1.0", "0.9"), Ordering::Greater);
        assert_eq!(compare_versions("0.2.1", "0.2"), Ordering::Greater);
    }

    #[test]
    fn test_selects_versions_in_window_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let task_dir = dir.path().join(LEGACY_MIGRATIONS_DIR).join("task-clone");
        std::fs::create_dir_all(&task_dir).unwrap();
        for version in ["0.1", "0.2", "0.3", "0.10"] {
            std::fs::write(task_dir.join(format!("{version}.sh")), "#!/bin/bash\n").unwrap();
        }

        let migrations = resolve_legacy_migrations(dir.path(), &upgrade("0.1", "0.10")).unwrap();
        let tags: Vec<&str> = migrations
            .iter()
            .map(|m| m.bundle.tag.as_deref().unwrap())
            .collect();
        assert_eq!(tags, ["0.2", "0.3", "0.10"]);
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let migrations = resolve_legacy_migrations(dir.path(), &upgrade("0.1", "0.2")).unwrap();
        assert!(migrations.is_empty());
    }
}
