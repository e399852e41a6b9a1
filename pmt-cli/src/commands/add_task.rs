//! `add-task` command handler.
//!
//! Inserts a task referenced by its bundle into build pipelines. For
//! quay.io bundles the tag is validated against the registry and the
//! digest resolved when missing; other registries require the full
//! immutable reference.

use std::collections::HashSet;
use std::path::PathBuf;
use std::str::FromStr;

use clap::Args;
use colored::Colorize;
use serde_yaml::{Mapping, Value};
use tracing::{info, warn};

use pmt_core::pipeline::{classify_file, iterate_files_or_dirs, PipelineKind, DEFAULT_PIPELINE_DIR};
use pmt_core::{BundleRef, Error};
use pmt_registry::quay::QUAY_HOST;
use pmt_registry::RegistryClient;
use pmt_yamledit::{Node, YamlEditor, YamlPath};

/// Suffix of trusted-artifact task variants, stripped when deriving the
/// pipeline task name.
const OCI_TA_SUFFIX: &str = "-oci-ta";

/// Arguments of the `add-task` command.
#[derive(Args)]
pub struct AddTaskArgs {
    /// Task bundle reference. For quay.io a tag alone is enough and the
    /// digest is resolved automatically; other registries require both
    /// tag and digest.
    bundle_ref: String,

    /// Files or directories to search for pipelines. Defaults to the
    /// ./.tekton/ directory.
    file_or_dir: Vec<PathBuf>,

    /// Alternative name for the task in the pipeline. Derived from the
    /// bundle repository name when omitted.
    #[arg(short = 'n', long = "pipeline-task-name", value_name = "NAME")]
    pipeline_task_name: Option<String>,

    /// Name of a task that runs before the added task. Repeatable.
    #[arg(short = 'a', long = "run-after", value_name = "TASK_NAME")]
    run_after: Vec<String>,

    /// Task parameter as name=value. Repeatable.
    #[arg(short = 'p', long = "param", value_name = "NAME=VALUE", value_parser = parse_key_val)]
    params: Vec<(String, String)>,

    /// Guard the task behind the skip-checks pipeline parameter
    #[arg(short = 's', long)]
    skip_checks: bool,

    /// Add the task to the finally section instead of tasks
    #[arg(long)]
    add_to_finally: bool,
}

/// Parse a single key=value pair
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid NAME=VALUE: no `=` found in `{s}`"))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

pub async fn handle_add_task(args: AddTaskArgs) -> Result<(), Error> {
    let bundle = resolve_bundle_ref(&args.bundle_ref).await?;
    let actual_task_name = bundle.name().to_string();
    let pipeline_task_name = args.pipeline_task_name.clone().unwrap_or_else(|| {
        actual_task_name
            .strip_suffix(OCI_TA_SUFFIX)
            .unwrap_or(&actual_task_name)
            .to_string()
    });
    info!("adding task {actual_task_name}, bundle {bundle}");

    let task = build_task_value(
        &pipeline_task_name,
        &actual_task_name,
        &bundle,
        &args.params,
        &args.run_after,
        args.skip_checks,
    );
    let section = if args.add_to_finally { "finally" } else { "tasks" };

    let locations = if args.file_or_dir.is_empty() {
        vec![PathBuf::from(DEFAULT_PIPELINE_DIR)]
    } else {
        args.file_or_dir.clone()
    };
    for file in iterate_files_or_dirs(&locations) {
        let kind = classify_file(&file)?;
        if !kind.is_editable() {
            warn!("skip {}: not an editable pipeline file", file.display());
            continue;
        }
        let mut editor = YamlEditor::open(&file).map_err(|e| Error::InvalidInput(e.to_string()))?;
        if !should_add_task(
            &editor,
            kind,
            section,
            &pipeline_task_name,
            &actual_task_name,
            &args.run_after,
            &file,
        )? {
            continue;
        }
        insert_task(&mut editor, kind, section, task.clone())?;
        println!(
            "{} task {} added to {}",
            "✓".green().bold(),
            pipeline_task_name.cyan(),
            file.display()
        );
    }
    Ok(())
}

/// Validate the bundle reference and resolve its digest.
async fn resolve_bundle_ref(raw: &str) -> Result<BundleRef, Error> {
    let mut bundle = BundleRef::from_str(raw)?;
    if bundle.tag.is_none() {
        return Err(Error::InvalidInput(format!(
            "missing tag in {raw}; a task bundle reference must have a tag"
        )));
    }
    if bundle.registry_host() != QUAY_HOST {
        // The Quay API cannot validate these, so the full immutable
        // reference is required.
        if bundle.digest.is_none() {
            return Err(Error::InvalidInput(format!(
                "missing digest in {raw}; for non-Quay registries the reference \
                 must have both tag and digest"
            )));
        }
        return Ok(bundle);
    }

    let client = RegistryClient::from_env().map_err(Error::from)?;
    let tag = bundle.tag.clone().unwrap_or_default();
    let record = client
        .get_quay_tag(&bundle.repository, &tag)
        .await
        .map_err(Error::from)?
        .ok_or_else(|| {
            Error::InvalidInput(format!(
                "tag {tag} does not exist in the image repository {}",
                bundle.repository
            ))
        })?;
    match &bundle.digest {
        Some(digest) if *digest != record.digest => Err(Error::InvalidInput(format!(
            "mismatched digest: tag {tag} points to {}",
            record.digest
        ))),
        Some(_) => Ok(bundle),
        None => {
            bundle.digest = Some(record.digest);
            Ok(bundle)
        }
    }
}

fn mapping(pairs: Vec<(&str, Value)>) -> Value {
    let mut out = Mapping::new();
    for (key, value) in pairs {
        out.insert(Value::String(key.to_string()), value);
    }
    Value::Mapping(out)
}

fn name_value(name: &str, value: &str) -> Value {
    mapping(vec![
        ("name", Value::String(name.to_string())),
        ("value", Value::String(value.to_string())),
    ])
}

fn build_task_value(
    pipeline_task_name: &str,
    actual_task_name: &str,
    bundle: &BundleRef,
    params: &[(String, String)],
    run_after: &[String],
    skip_checks: bool,
) -> Value {
    let task_ref = mapping(vec![
        ("resolver", Value::String("bundles".into())),
        (
            "params",
            Value::Sequence(vec![
                name_value("kind", "task"),
                name_value("name", actual_task_name),
                name_value("bundle", &bundle.to_string()),
            ]),
        ),
    ]);

    let mut entries = vec![
        ("name", Value::String(pipeline_task_name.to_string())),
        ("taskRef", task_ref),
    ];
    if !params.is_empty() {
        entries.push((
            "params",
            Value::Sequence(params.iter().map(|(n, v)| name_value(n, v)).collect()),
        ));
    }
    if !run_after.is_empty() {
        entries.push((
            "runAfter",
            Value::Sequence(
                run_after
                    .iter()
                    .map(|name| Value::String(name.clone()))
                    .collect(),
            ),
        ));
    }
    if skip_checks {
        entries.push((
            "when",
            Value::Sequence(vec![mapping(vec![
                ("input", Value::String("$(params.skip-checks)".into())),
                ("operator", Value::String("in".into())),
                ("values", Value::Sequence(vec![Value::String("false".into())])),
            ])]),
        ));
    }
    mapping(entries)
}

fn section_path(kind: PipelineKind, section: &str) -> YamlPath {
    let mut path = YamlPath::root();
    for step in kind.spec_prefix() {
        path.push(*step);
    }
    path.push(section);
    path
}

/// Pipeline task names and bundle-resolved task names already present in
/// the section.
fn existing_task_names(
    editor: &YamlEditor,
    path: &YamlPath,
) -> (HashSet<String>, HashSet<String>) {
    let mut pipeline_names = HashSet::new();
    let mut actual_names = HashSet::new();
    let Some(Node::Sequence(tasks)) = editor.lookup(path) else {
        return (pipeline_names, actual_names);
    };
    for task in &tasks.items {
        let Some(task) = task.as_mapping() else { continue };
        let Some(name) = task.get("name").and_then(|n| n.as_scalar()) else {
            warn!("cannot get the pipeline task name of a task entry, skip it");
            continue;
        };
        pipeline_names.insert(name.value.clone());

        let Some(task_ref) = task.get("taskRef").and_then(|n| n.as_mapping()) else {
            continue;
        };
        let resolver = task_ref
            .get("resolver")
            .and_then(|n| n.as_scalar())
            .map(|s| s.value.as_str());
        if resolver != Some("bundles") {
            continue;
        }
        let Some(Node::Sequence(params)) = task_ref.get("params") else {
            continue;
        };
        for param in &params.items {
            let Some(param) = param.as_mapping() else { continue };
            let is_name = param
                .get("name")
                .and_then(|n| n.as_scalar())
                .map(|s| s.value == "name")
                .unwrap_or(false);
            if is_name {
                if let Some(value) = param.get("value").and_then(|n| n.as_scalar()) {
                    actual_names.insert(value.value.clone());
                }
                break;
            }
        }
    }
    (pipeline_names, actual_names)
}

fn should_add_task(
    editor: &YamlEditor,
    kind: PipelineKind,
    section: &str,
    pipeline_task_name: &str,
    actual_task_name: &str,
    run_after: &[String],
    file: &std::path::Path,
) -> Result<bool, Error> {
    let path = section_path(kind, section);
    let (pipeline_names, actual_names) = existing_task_names(editor, &path);

    for name in run_after {
        if !pipeline_names.contains(name) {
            return Err(Error::InvalidInput(format!(
                "task {name} does not exist in the pipeline definition {}",
                file.display()
            )));
        }
    }
    if pipeline_names.contains(pipeline_task_name) {
        info!(
            "task {pipeline_task_name} is included in pipeline {} already",
            file.display()
        );
        return Ok(false);
    }
    if actual_names.contains(actual_task_name) {
        info!(
            "task {actual_task_name} is referenced in pipeline {} already",
            file.display()
        );
        return Ok(false);
    }
    if pipeline_names.contains(actual_task_name) || actual_names.contains(pipeline_task_name) {
        warn!("the pipeline task name and actual task name seem swapped; skip adding the task");
        return Ok(false);
    }
    Ok(true)
}

/// Insert the task into the section, creating missing intermediate keys.
fn insert_task(
    editor: &mut YamlEditor,
    kind: PipelineKind,
    section: &str,
    task: Value,
) -> Result<(), Error> {
    let mut chain: Vec<String> = kind.spec_prefix().iter().map(|s| s.to_string()).collect();
    chain.push(section.to_string());

    let mut existing = YamlPath::root();
    let mut depth = 0;
    for key in &chain {
        let candidate = existing.join(key.as_str());
        match editor.lookup(&candidate) {
            Some(node) if node.as_scalar().is_none() => {
                existing = candidate;
                depth += 1;
            }
            _ => break,
        }
    }

    if depth == chain.len() {
        return editor
            .insert(&existing, task)
            .map_err(|e| Error::YamlSurgeryConflict(e.to_string()));
    }

    let mut value = Value::Sequence(vec![task]);
    for key in chain[depth..].iter().rev() {
        let mut wrapper = Mapping::new();
        wrapper.insert(Value::String(key.clone()), value);
        value = Value::Mapping(wrapper);
    }
    editor
        .insert(&existing, value)
        .map_err(|e| Error::YamlSurgeryConflict(e.to_string()))
}
