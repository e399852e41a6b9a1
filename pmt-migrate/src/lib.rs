//! Migration engine: resolve, plan, run.
//!
//! The orchestration here is deliberately sequential and deterministic:
//! upgrades are processed in input order, migrations within an upgrade in
//! chronological order, and scripts run one at a time. The only
//! concurrency lives in the registry fan-out while inspecting an upgrade
//! window, bounded by `PMT_REGISTRY_CONCURRENCY`.

pub mod legacy;
pub mod plan;
pub mod resolver;
pub mod runner;

use std::path::PathBuf;

use tracing::{info, warn};

use pmt_core::upgrade::{dedupe_upgrades, filter_task_bundle_upgrades};
use pmt_core::{Error, Migration, Upgrade};
use pmt_registry::RegistryClient;

use crate::plan::{build_plan, MigrationPlan};
use crate::runner::{AppliedMigration, MigrationRunner};

/// Environment variable bounding the registry fan-out.
pub const ENV_REGISTRY_CONCURRENCY: &str = "PMT_REGISTRY_CONCURRENCY";

const DEFAULT_CONCURRENCY: usize = 8;

/// Options for one `migrate` run.
#[derive(Debug, Clone, Default)]
pub struct MigrateOptions {
    /// Restrict discovery to these pipeline files.
    pub pipeline_files: Vec<PathBuf>,
    /// Bound for concurrent bundle inspections; 0 picks the default.
    pub concurrency: usize,
    /// Read migrations from the local `migrations/` layout instead of the
    /// registry. Development only.
    pub use_legacy_search: bool,
}

impl MigrateOptions {
    /// Resolve the effective concurrency, considering the environment.
    pub fn effective_concurrency(&self) -> usize {
        if self.concurrency > 0 {
            return self.concurrency;
        }
        std::env::var(ENV_REGISTRY_CONCURRENCY)
            .ok()
            .and_then(|raw| raw.parse().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_CONCURRENCY)
    }
}

/// Outcome of a `migrate` run.
#[derive(Debug, Default)]
pub struct MigrateReport {
    pub applied: Vec<AppliedMigration>,
    pub skipped_files: Vec<(PathBuf, String)>,
    /// Number of unique task bundle upgrades that were considered.
    pub upgrades: usize,
}

/// Resolve and apply migrations for the given upgrades.
///
/// Upgrades that are not task bundles or do not come from the Konflux
/// organization are skipped up front; the rest are de-duplicated by
/// `(depName, currentDigest, newDigest)` preserving input order.
pub async fn run_migrations(
    upgrades: Vec<Upgrade>,
    options: &MigrateOptions,
) -> Result<MigrateReport, Error> {
    let upgrades = dedupe_upgrades(filter_task_bundle_upgrades(upgrades));
    if upgrades.is_empty() {
        warn!("input upgrades do not include any task bundle this tool handles");
        return Ok(MigrateReport::default());
    }

    let resolved = resolve_all(&upgrades, options).await?;
    let migration_count: usize = resolved.iter().map(|(_, m)| m.len()).sum();
    let plan = build_plan(resolved, &options.pipeline_files);

    if plan.is_empty() {
        if migration_count > 0 && !plan.skipped_files.is_empty() {
            return Err(Error::InvalidInput(format!(
                "every affected pipeline file was skipped: {}",
                describe_skips(&plan)
            )));
        }
        info!("nothing to migrate");
        return Ok(MigrateReport {
            skipped_files: plan.skipped_files,
            upgrades: upgrades.len(),
            ..MigrateReport::default()
        });
    }

    let runner = MigrationRunner::from_env()?;
    let applied = runner.run(&plan).await?;
    Ok(MigrateReport {
        applied,
        skipped_files: plan.skipped_files,
        upgrades: upgrades.len(),
    })
}

async fn resolve_all(
    upgrades: &[Upgrade],
    options: &MigrateOptions,
) -> Result<Vec<(Upgrade, Vec<Migration>)>, Error> {
    let mut resolved = Vec::with_capacity(upgrades.len());

    if options.use_legacy_search {
        let root = std::env::current_dir()
            .map_err(|e| Error::Internal(anyhow::anyhow!("cannot determine working directory: {e}")))?;
        for upgrade in upgrades {
            let migrations = legacy::resolve_legacy_migrations(&root, upgrade)?;
            resolved.push((upgrade.clone(), migrations));
        }
        return Ok(resolved);
    }

    let client = RegistryClient::from_env().map_err(Error::from)?;
    let concurrency = options.effective_concurrency();
    for upgrade in upgrades {
        let migrations = resolver::resolve_migrations(&client, upgrade, concurrency).await?;
        resolved.push((upgrade.clone(), migrations));
    }
    Ok(resolved)
}

fn describe_skips(plan: &MigrationPlan) -> String {
    plan.skipped_files
        .iter()
        .map(|(path, reason)| format!("{}: {reason}", path.display()))
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upgrade_value(dep: &str, package_file: &str, parent_dir: &str) -> serde_json::Value {
        serde_json::json!({
            "depName": dep,
            "currentValue": "0.1",
            "currentDigest": "sha256:a1",
            "newValue": "0.2",
            "newDigest": "sha256:b2",
            "packageFile": package_file,
            "parentDir": parent_dir,
            "depTypes": ["tekton-bundle"],
        })
    }

    // The legacy search exercises the whole resolve -> plan -> run path
    // without touching the network.
    #[tokio::test]
    async fn test_legacy_end_to_end_applies_script() {
        let dir = tempfile::tempdir().unwrap();
        let tekton = dir.path().join(".tekton");
        std::fs::create_dir_all(&tekton).unwrap();
        let pipeline = tekton.join("pull.yaml");
        std::fs::write(&pipeline, "kind: Pipeline\nspec:\n  tasks: []\n").unwrap();

        let task_dir = dir.path().join("migrations").join("task-clone");
        std::fs::create_dir_all(&task_dir).unwrap();
        std::fs::write(
            task_dir.join("0.2.sh"),
            "#!/bin/bash\necho \"# migrated to $PMT_MIGRATION_VERSION\" >> \"$1\"\n",
        )
        .unwrap();

        let upgrade: Upgrade = serde_json::from_value(upgrade_value(
            "quay.io/konflux-ci/task-clone",
            pipeline.to_str().unwrap(),
            tekton.to_str().unwrap(),
        ))
        .unwrap();

        let cwd = std::env::current_dir().unwrap();
        std::env::set_current_dir(dir.path()).unwrap();
        let report = run_migrations(
            vec![upgrade],
            &MigrateOptions {
                use_legacy_search: true,
                ..MigrateOptions::default()
            },
        )
        .await;
        std::env::set_current_dir(cwd).unwrap();

        let report = report.unwrap();
        assert_eq!(report.applied.len(), 1);
        let content = std::fs::read_to_string(&pipeline).unwrap();
        assert!(content.ends_with("# migrated to 0.2\n"), "{content}");
    }

    #[tokio::test]
    async fn test_non_task_bundle_upgrades_are_ignored() {
        let mut value = upgrade_value("quay.io/konflux-ci/task-clone", "a.yaml", ".tekton");
        value["depTypes"] = serde_json::json!(["docker"]);
        let upgrade: Upgrade = serde_json::from_value(value).unwrap();

        let report = run_migrations(vec![upgrade], &MigrateOptions::default())
            .await
            .unwrap();
        assert_eq!(report.upgrades, 0);
        assert!(report.applied.is_empty());
    }
}
