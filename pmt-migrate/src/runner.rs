//! Migration script execution.
//!
//! Scripts run strictly serially, in plan order: ordering is a
//! correctness property and scripts mutate shared pipeline files. Each
//! script is staged as an executable temporary file, receives the
//! absolute pipeline file path as its only argument, and is bounded by a
//! per-script timeout. The staged file is removed on every exit path.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, error, info};

use pmt_core::{Error, Migration};

use crate::plan::{MigrationPlan, PlanEntry};

/// Environment variable naming the bundle whose migration is running.
pub const ENV_MIGRATION_BUNDLE_REF: &str = "PMT_MIGRATION_BUNDLE_REF";
/// Environment variable carrying the bundle's tag.
pub const ENV_MIGRATION_VERSION: &str = "PMT_MIGRATION_VERSION";
/// Environment variable overriding the per-script timeout.
pub const ENV_MIGRATION_TIMEOUT: &str = "PMT_MIGRATION_TIMEOUT_SECONDS";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// One successfully applied plan entry, for the final summary.
#[derive(Debug, Clone)]
pub struct AppliedMigration {
    pub bundle: String,
    pub pipeline_file: PathBuf,
}

/// Executes a migration plan.
pub struct MigrationRunner {
    timeout: Duration,
    repo_root: PathBuf,
}

impl MigrationRunner {
    pub fn new(timeout: Duration, repo_root: PathBuf) -> Self {
        Self { timeout, repo_root }
    }

    /// Build a runner from the environment: the working directory is the
    /// repository root and `PMT_MIGRATION_TIMEOUT_SECONDS` overrides the
    /// default timeout.
    pub fn from_env() -> Result<Self, Error> {
        let timeout = match std::env::var(ENV_MIGRATION_TIMEOUT) {
            Ok(raw) => {
                let secs: u64 = raw.parse().map_err(|_| {
                    Error::InvalidInput(format!(
                        "{ENV_MIGRATION_TIMEOUT} must be a number of seconds, got {raw:?}"
                    ))
                })?;
                Duration::from_secs(secs)
            }
            Err(_) => DEFAULT_TIMEOUT,
        };
        let repo_root = std::env::current_dir()
            .map_err(|e| Error::Internal(anyhow::anyhow!("cannot determine working directory: {e}")))?;
        Ok(Self::new(timeout, repo_root))
    }

    /// Run the plan in order. The first failure aborts the remaining
    /// entries; edits already written to disk are left for the caller's
    /// version control to sort out.
    pub async fn run(&self, plan: &MigrationPlan) -> Result<Vec<AppliedMigration>, Error> {
        let mut applied = Vec::with_capacity(plan.entries.len());
        for entry in &plan.entries {
            self.run_entry(entry).await?;
            applied.push(AppliedMigration {
                bundle: entry.migration.bundle.to_string(),
                pipeline_file: entry.pipeline_file.clone(),
            });
        }
        Ok(applied)
    }

    async fn run_entry(&self, entry: &PlanEntry) -> Result<(), Error> {
        let migration = &entry.migration;
        info!(
            "applying migration of task bundle {} to {}",
            migration.bundle,
            entry.pipeline_file.display()
        );

        let script = stage_script(migration)?;
        let pipeline_file = absolute(&entry.pipeline_file);

        let mut command = Command::new(script.path());
        command
            .arg(&pipeline_file)
            .current_dir(&self.repo_root)
            .env(ENV_MIGRATION_BUNDLE_REF, migration.bundle.to_string())
            .env(
                ENV_MIGRATION_VERSION,
                migration.bundle.tag.clone().unwrap_or_default(),
            )
            .kill_on_drop(true);
        debug!("run: {:?} {}", script.path(), pipeline_file.display());

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(result) => result.map_err(|e| {
                Error::MigrationFailed(format!(
                    "cannot execute migration script of {}: {e}",
                    migration.bundle
                ))
            })?,
            Err(_) => {
                error!(
                    "migration of {} timed out after {:?}",
                    migration.bundle, self.timeout
                );
                return Err(Error::MigrationFailed(format!(
                    "migration of {} timed out after {}s",
                    migration.bundle,
                    self.timeout.as_secs()
                )));
            }
        };

        log_output("stdout", &output.stdout);
        log_output("stderr", &output.stderr);

        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            return Err(Error::MigrationFailed(format!(
                "migration of {} exited with code {code} on {}: {}",
                migration.bundle,
                entry.pipeline_file.display(),
                output_tail(&output.stderr, &output.stdout)
            )));
        }
        Ok(())
    }
}

/// Write the script to an executable temporary file. Dropping the handle
/// removes the file, failure paths included.
fn stage_script(migration: &Migration) -> Result<tempfile::NamedTempFile, Error> {
    let script = tempfile::Builder::new()
        .prefix("pmt-migration-")
        .suffix(".sh")
        .tempfile()
        .map_err(stage_error)?;
    std::fs::write(script.path(), &migration.script).map_err(stage_error)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(script.path(), std::fs::Permissions::from_mode(0o755))
            .map_err(stage_error)?;
    }
    Ok(script)
}

fn stage_error(e: std::io::Error) -> Error {
    Error::Internal(anyhow::anyhow!("cannot stage migration script: {e}"))
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

fn log_output(stream: &str, bytes: &[u8]) {
    let text = String::from_utf8_lossy(bytes);
    if !text.trim().is_empty() {
        debug!("migration {stream}: {}", text.trim_end());
    }
}

fn output_tail(stderr: &[u8], stdout: &[u8]) -> String {
    let source = if stderr.is_empty() { stdout } else { stderr };
    let text = String::from_utf8_lossy(source);
    let tail: Vec<&str> = text.lines().rev().take(5).collect();
    tail.into_iter().rev().collect::<Vec<_>>().join(" | ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::PlanEntry;
    use pmt_core::{BundleRef, Upgrade};
    use std::sync::Arc;

    fn upgrade() -> Arc<Upgrade> {
        Arc::new(
            serde_json::from_value(serde_json::json!({
                "depName": "quay.io/konflux-ci/task-clone",
                "currentValue": "0.1",
                "currentDigest": "sha256:a1",
                "newValue": "0.2",
                "newDigest": "sha256:b2",
                "packageFile": ".tekton/pull.yaml",
                "parentDir": ".tekton",
                "depTypes": ["tekton-bundle"],
            }))
            .unwrap(),
        )
    }

    fn plan_with_script(script: &str, pipeline_file: &Path) -> MigrationPlan {
        let migration = Arc::new(Migration {
            bundle: BundleRef::new("quay.io/konflux-ci/task-clone")
                .with_tag("0.2")
                .with_digest("sha256:b2"),
            script: script.as_bytes().to_vec(),
            script_name: "task-clone-0.2.sh".into(),
        });
        MigrationPlan {
            entries: vec![PlanEntry {
                migration,
                pipeline_file: pipeline_file.to_path_buf(),
                upgrade: upgrade(),
            }],
            skipped_files: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_script_receives_pipeline_file_and_env() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = dir.path().join("pull.yaml");
        std::fs::write(&pipeline, "kind: Pipeline\n").unwrap();
        let out = dir.path().join("observed");

        let script = format!(
            "#!/bin/bash\necho \"$1 $PMT_MIGRATION_VERSION $PMT_MIGRATION_BUNDLE_REF\" > {}\n",
            out.display()
        );
        let runner = MigrationRunner::new(Duration::from_secs(30), dir.path().to_path_buf());
        let applied = runner.run(&plan_with_script(&script, &pipeline)).await.unwrap();

        assert_eq!(applied.len(), 1);
        let observed = std::fs::read_to_string(&out).unwrap();
        assert!(observed.contains(pipeline.to_str().unwrap()));
        assert!(observed.contains("0.2"));
        assert!(observed.contains("quay.io/konflux-ci/task-clone:0.2@sha256:b2"));
    }

    #[tokio::test]
    async fn test_failing_script_aborts_with_migration_failed() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = dir.path().join("pull.yaml");
        std::fs::write(&pipeline, "kind: Pipeline\n").unwrap();

        let runner = MigrationRunner::new(Duration::from_secs(30), dir.path().to_path_buf());
        let err = runner
            .run(&plan_with_script(
                "#!/bin/bash\necho broken >&2\nexit 7\n",
                &pipeline,
            ))
            .await
            .unwrap_err();
        match err {
            Error::MigrationFailed(msg) => {
                assert!(msg.contains("code 7"), "{msg}");
                assert!(msg.contains("broken"), "{msg}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_is_a_migration_failure() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = dir.path().join("pull.yaml");
        std::fs::write(&pipeline, "kind: Pipeline\n").unwrap();

        let runner = MigrationRunner::new(Duration::from_millis(200), dir.path().to_path_buf());
        let err = runner
            .run(&plan_with_script("#!/bin/bash\nsleep 5\n", &pipeline))
            .await
            .unwrap_err();
        match err {
            Error::MigrationFailed(msg) => assert!(msg.contains("timed out"), "{msg}"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_later_entries_do_not_run_after_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = dir.path().join("pull.yaml");
        std::fs::write(&pipeline, "kind: Pipeline\n").unwrap();
        let marker = dir.path().join("second-ran");

        let mut plan = plan_with_script("#!/bin/bash\nexit 1\n", &pipeline);
        let second = plan_with_script(
            &format!("#!/bin/bash\ntouch {}\n", marker.display()),
            &pipeline,
        );
        plan.entries.extend(second.entries);

        let runner = MigrationRunner::new(Duration::from_secs(30), dir.path().to_path_buf());
        assert!(runner.run(&plan).await.is_err());
        assert!(!marker.exists());
    }
}
