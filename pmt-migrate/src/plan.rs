//! Migration plan construction.
//!
//! A plan is the ordered sequence of (migration, pipeline file) pairs the
//! runner executes: grouped by upgrade in input order, migrations in
//! chronological order within a group, and affected pipeline files in
//! lexicographic order within a migration. The same input and registry
//! state always produce the same plan.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use pmt_core::pipeline::{discover_pipeline_files, DEFAULT_PIPELINE_DIR};
use pmt_core::{Migration, Upgrade};

/// One unit of work for the runner.
#[derive(Debug, Clone)]
pub struct PlanEntry {
    pub migration: Arc<Migration>,
    pub pipeline_file: PathBuf,
    /// The upgrade this migration belongs to; the runner exposes it to the
    /// script through the environment.
    pub upgrade: Arc<Upgrade>,
}

/// The ordered execution plan plus everything that was skipped while
/// building it.
#[derive(Debug, Default)]
pub struct MigrationPlan {
    pub entries: Vec<PlanEntry>,
    pub skipped_files: Vec<(PathBuf, String)>,
}

impl MigrationPlan {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Build the global plan from per-upgrade migration lists.
///
/// Affected files are the union of pipeline files discovered under the
/// upgrade's parent directory and the upgrade's own package file. When
/// `explicit_files` is non-empty, discovery is restricted to those files.
pub fn build_plan(
    resolved: Vec<(Upgrade, Vec<Migration>)>,
    explicit_files: &[PathBuf],
) -> MigrationPlan {
    let mut plan = MigrationPlan::default();

    for (upgrade, migrations) in resolved {
        if migrations.is_empty() {
            continue;
        }
        let (files, skipped) = affected_files(&upgrade, explicit_files);
        plan.skipped_files.extend(skipped);
        if files.is_empty() {
            info!(
                "no pipeline file is affected by the upgrade of {}",
                upgrade.dep_name
            );
            continue;
        }
        let upgrade = Arc::new(upgrade);
        for migration in migrations {
            let migration = Arc::new(migration);
            for file in &files {
                plan.entries.push(PlanEntry {
                    migration: migration.clone(),
                    pipeline_file: file.clone(),
                    upgrade: upgrade.clone(),
                });
            }
        }
    }
    plan
}

fn affected_files(
    upgrade: &Upgrade,
    explicit_files: &[PathBuf],
) -> (Vec<PathBuf>, Vec<(PathBuf, String)>) {
    let locations: Vec<PathBuf> = if explicit_files.is_empty() {
        let parent_dir = if upgrade.parent_dir.is_empty() {
            PathBuf::from(DEFAULT_PIPELINE_DIR)
        } else {
            PathBuf::from(&upgrade.parent_dir)
        };
        vec![parent_dir, PathBuf::from(&upgrade.package_file)]
    } else {
        explicit_files.to_vec()
    };

    let (pipelines, skipped) = discover_pipeline_files(&locations);
    let mut files: Vec<PathBuf> = pipelines.into_iter().map(|p| p.path).collect();
    files.sort();
    files.dedup();
    (files, skipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmt_core::BundleRef;

    fn upgrade(dep: &str, package_file: &str, parent_dir: &str) -> Upgrade {
        serde_json::from_value(serde_json::json!({
            "depName": dep,
            "currentValue": "0.1",
            "currentDigest": "sha256:a1",
            "newValue": "0.2",
            "newDigest": "sha256:b2",
            "packageFile": package_file,
            "parentDir": parent_dir,
            "depTypes": ["tekton-bundle"],
        }))
        .unwrap()
    }

    fn migration(dep: &str, tag: &str) -> Migration {
        Migration {
            bundle: BundleRef::new(dep).with_tag(tag).with_digest("sha256:ff"),
            script: b"#!/bin/bash\n".to_vec(),
            script_name: format!("{tag}.sh"),
        }
    }

    fn pipeline_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for name in ["pull.yaml", "push.yaml"] {
            std::fs::write(
                dir.path().join(name),
                "kind: Pipeline\nspec:\n  tasks: []\n",
            )
            .unwrap();
        }
        dir
    }

    #[test]
    fn test_plan_orders_upgrades_then_migrations_then_files() {
        let dir = pipeline_dir();
        let dir_path = dir.path().to_str().unwrap().to_string();
        let package_file = dir.path().join("pull.yaml");

        let resolved = vec![
            (
                upgrade("quay.io/konflux-ci/task-a", package_file.to_str().unwrap(), &dir_path),
                vec![migration("quay.io/konflux-ci/task-a", "0.2")],
            ),
            (
                upgrade("quay.io/konflux-ci/task-b", package_file.to_str().unwrap(), &dir_path),
                vec![
                    migration("quay.io/konflux-ci/task-b", "0.1"),
                    migration("quay.io/konflux-ci/task-b", "0.2"),
                ],
            ),
        ];
        let plan = build_plan(resolved, &[]);

        // 1 migration x 2 files + 2 migrations x 2 files
        assert_eq!(plan.entries.len(), 6);
        let bundles: Vec<String> = plan
            .entries
            .iter()
            .map(|e| e.migration.bundle.to_string())
            .collect();
        assert!(bundles[0].starts_with("quay.io/konflux-ci/task-a"));
        assert!(bundles[2].contains("task-b:0.1"));
        assert!(bundles[4].contains("task-b:0.2"));
        // Files sorted lexicographically within one migration.
        assert!(plan.entries[0].pipeline_file < plan.entries[1].pipeline_file);
    }

    #[test]
    fn test_plan_restricted_to_explicit_files() {
        let dir = pipeline_dir();
        let only = dir.path().join("push.yaml");
        let resolved = vec![(
            upgrade("quay.io/konflux-ci/task-a", "unused.yaml", "unused"),
            vec![migration("quay.io/konflux-ci/task-a", "0.2")],
        )];
        let plan = build_plan(resolved, std::slice::from_ref(&only));
        assert_eq!(plan.entries.len(), 1);
        assert_eq!(plan.entries[0].pipeline_file, only);
    }

    #[test]
    fn test_upgrade_without_migrations_contributes_nothing() {
        let dir = pipeline_dir();
        let resolved = vec![(
            upgrade(
                "quay.io/konflux-ci/task-a",
                dir.path().join("pull.yaml").to_str().unwrap(),
                dir.path().to_str().unwrap(),
            ),
            vec![],
        )];
        let plan = build_plan(resolved, &[]);
        assert!(plan.is_empty());
    }

    #[test]
    fn test_unparseable_files_are_reported_not_fatal() {
        let dir = pipeline_dir();
        std::fs::write(dir.path().join("broken.yaml"), "kind: [unclosed\n").unwrap();
        let resolved = vec![(
            upgrade(
                "quay.io/konflux-ci/task-a",
                dir.path().join("pull.yaml").to_str().unwrap(),
                dir.path().to_str().unwrap(),
            ),
            vec![migration("quay.io/konflux-ci/task-a", "0.2")],
        )];
        let plan = build_plan(resolved, &[]);
        assert_eq!(plan.entries.len(), 2);
        assert_eq!(plan.skipped_files.len(), 1);
    }
}
