//! `migrate` command handler.
//!
//! The usual flow takes a Renovate upgrades payload, resolves every
//! migration published between each upgrade's digests and runs them
//! against the affected pipeline files. The manual `--new-bundle` flow
//! replaces bundle references textually and never runs migrations.

use std::path::PathBuf;
use std::str::FromStr;

use clap::Args;
use colored::Colorize;
use tracing::{debug, info};

use pmt_core::pipeline::{discover_pipeline_files, DEFAULT_PIPELINE_DIR};
use pmt_core::upgrade::parse_upgrades;
use pmt_core::{BundleRef, Error};
use pmt_migrate::{run_migrations, MigrateOptions, MigrateReport};

/// Arguments of the `migrate` command.
#[derive(Args)]
pub struct MigrateArgs {
    /// JSON string converted from the Renovate template field `upgrades`
    #[arg(short = 'u', long = "upgrades", value_name = "JSON")]
    upgrades: Option<String>,

    /// Read the upgrades JSON from a file
    #[arg(
        short = 'f',
        long = "upgrades-file",
        value_name = "PATH",
        conflicts_with = "upgrades"
    )]
    upgrades_file: Option<PathBuf>,

    /// Replace the current bundle of this repository with the given
    /// reference (tag and digest required) without running migrations.
    /// Repeatable.
    #[arg(
        long = "new-bundle",
        value_name = "REF",
        conflicts_with_all = ["upgrades", "upgrades_file"]
    )]
    new_bundles: Vec<String>,

    /// Restrict discovery to these pipeline files. Repeatable.
    #[arg(long = "pipeline-file", value_name = "PATH")]
    pipeline_files: Vec<PathBuf>,

    /// Read migrations from the local migrations/ directory layout
    /// instead of the registry. Development only.
    #[arg(long)]
    use_legacy_migration_search: bool,
}

pub async fn handle_migrate(args: MigrateArgs) -> Result<(), Error> {
    if !args.new_bundles.is_empty() {
        return replace_bundles(&args.new_bundles, &args.pipeline_files);
    }

    let payload = match (&args.upgrades, &args.upgrades_file) {
        (Some(payload), _) => payload.clone(),
        (None, Some(path)) => std::fs::read_to_string(path).map_err(|e| {
            Error::InvalidInput(format!("cannot read upgrades file {}: {e}", path.display()))
        })?,
        (None, None) => {
            return Err(Error::InvalidInput(
                "one of --upgrades, --upgrades-file or --new-bundle is required".into(),
            ))
        }
    };

    let upgrades = parse_upgrades(&payload)?;
    if upgrades.is_empty() {
        info!("input upgrades are empty; nothing to do");
        return Ok(());
    }

    let options = MigrateOptions {
        pipeline_files: args.pipeline_files,
        concurrency: 0,
        use_legacy_search: args.use_legacy_migration_search,
    };
    let report = run_migrations(upgrades, &options).await?;
    print_report(&report);
    Ok(())
}

fn print_report(report: &MigrateReport) {
    for applied in &report.applied {
        println!(
            "{} applied migration of {} to {}",
            "✓".green().bold(),
            applied.bundle.cyan(),
            applied.pipeline_file.display()
        );
    }
    for (path, reason) in &report.skipped_files {
        println!(
            "{} skipped {}: {}",
            "!".yellow().bold(),
            path.display(),
            reason.dimmed()
        );
    }
    if report.applied.is_empty() {
        println!("{}", "No migrations to apply.".dimmed());
    }
}

/// Manual bundle replacement: rewrite `value: <repo>:<tag>@<digest>`
/// occurrences of the bundle's repository with the new reference. This
/// path intentionally does not discover migrations.
fn replace_bundles(new_bundles: &[String], pipeline_files: &[PathBuf]) -> Result<(), Error> {
    let mut bundles = Vec::with_capacity(new_bundles.len());
    for raw in new_bundles {
        let bundle = BundleRef::from_str(raw)?;
        if bundle.tag.is_none() || bundle.digest.is_none() {
            return Err(Error::InvalidInput(format!(
                "{raw} must carry both tag and digest for a manual replacement"
            )));
        }
        bundles.push(bundle);
    }

    let locations: Vec<PathBuf> = if pipeline_files.is_empty() {
        vec![PathBuf::from(DEFAULT_PIPELINE_DIR)]
    } else {
        pipeline_files.to_vec()
    };
    let (files, _skipped) = discover_pipeline_files(&locations);
    if files.is_empty() {
        info!("no pipeline file found under the given locations");
        return Ok(());
    }

    for file in &files {
        let content = std::fs::read_to_string(&file.path).map_err(|e| {
            Error::InvalidInput(format!("cannot read {}: {e}", file.path.display()))
        })?;
        let mut updated = content.clone();
        for bundle in &bundles {
            updated = replace_bundle_refs(&updated, bundle);
        }
        if updated != content {
            std::fs::write(&file.path, &updated).map_err(|e| {
                Error::InvalidInput(format!("cannot write {}: {e}", file.path.display()))
            })?;
            println!(
                "{} updated bundle reference(s) in {}",
                "✓".green().bold(),
                file.path.display()
            );
        } else {
            debug!("no matching bundle reference in {}", file.path.display());
        }
    }
    Ok(())
}

/// Replace references to `bundle.repository` with the new reference,
/// touching nothing else in the file.
fn replace_bundle_refs(content: &str, bundle: &BundleRef) -> String {
    let pattern = format!(
        r"(?m)^(?P<prefix>[ \t]*value:[ \t]*){}:[A-Za-z0-9][A-Za-z0-9_.\-]*@sha256:[0-9a-f]+[ \t]*$",
        regex::escape(&bundle.repository)
    );
    let re = regex::Regex::new(&pattern).expect("bundle reference pattern is valid");
    re.replace_all(content, |caps: &regex::Captures<'_>| {
        format!("{}{bundle}", &caps["prefix"])
    })
    .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replace_bundle_refs_touches_only_matching_repo() {
        let content = "\
spec:
  tasks:
    - name: clone
      taskRef:
        params:
          - name: bundle
            value: quay.io/konflux-ci/task-clone:0.1@sha256:aa11
    - name: lint
      taskRef:
        params:
          - name: bundle
            value: quay.io/konflux-ci/task-lint:0.3@sha256:cc33
";
        let bundle: BundleRef = "quay.io/konflux-ci/task-clone:0.2@sha256:bb22"
            .parse()
            .unwrap();
        let updated = replace_bundle_refs(content, &bundle);
        assert!(updated.contains("value: quay.io/konflux-ci/task-clone:0.2@sha256:bb22"));
        assert!(updated.contains("value: quay.io/konflux-ci/task-lint:0.3@sha256:cc33"));
        assert!(!updated.contains("sha256:aa11"));
    }

    #[test]
    fn test_replace_bundle_refs_is_idempotent() {
        let content = "            value: quay.io/konflux-ci/task-clone:0.2@sha256:bb22\n";
        let bundle: BundleRef = "quay.io/konflux-ci/task-clone:0.2@sha256:bb22"
            .parse()
            .unwrap();
        assert_eq!(replace_bundle_refs(content, &bundle), content);
    }
}
