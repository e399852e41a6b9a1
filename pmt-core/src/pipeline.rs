//! Pipeline file discovery and classification.
//!
//! Tekton pipeline definitions live in YAML files, conventionally under
//! `.tekton/`. A file either holds a `Pipeline`, a `PipelineRun` embedding
//! its pipeline under `spec.pipelineSpec`, or something this tool does not
//! touch.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::Error;

/// Default directory searched for pipeline files.
pub const DEFAULT_PIPELINE_DIR: &str = ".tekton";

pub const TEKTON_KIND_PIPELINE: &str = "Pipeline";
pub const TEKTON_KIND_PIPELINE_RUN: &str = "PipelineRun";

/// How a YAML file relates to the pipelines this tool edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineKind {
    /// `kind: Pipeline`; tasks live under `spec.tasks`.
    Pipeline,
    /// `kind: PipelineRun` with the pipeline inline under
    /// `spec.pipelineSpec`.
    PipelineRunInline,
    /// `kind: PipelineRun` referencing an external pipeline. Skipped.
    PipelineRunRef,
    /// Anything else. Skipped silently.
    Other,
}

impl PipelineKind {
    /// Whether migrations and edits apply to a file of this kind.
    pub fn is_editable(&self) -> bool {
        matches!(self, PipelineKind::Pipeline | PipelineKind::PipelineRunInline)
    }

    /// YAML path from the document root to the pipeline spec.
    pub fn spec_prefix(&self) -> &'static [&'static str] {
        match self {
            PipelineKind::PipelineRunInline => &["spec", "pipelineSpec"],
            _ => &["spec"],
        }
    }
}

/// A classified pipeline file.
#[derive(Debug, Clone)]
pub struct PipelineFile {
    pub path: PathBuf,
    pub kind: PipelineKind,
}

#[derive(Debug, Deserialize)]
struct DocHead {
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    spec: Option<serde_yaml::Value>,
}

/// Classify a pipeline YAML file by its first non-empty document.
pub fn classify_file(path: &Path) -> Result<PipelineKind, Error> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::InvalidInput(format!("cannot read {}: {e}", path.display())))?;
    classify_content(&content)
        .map_err(|e| Error::InvalidInput(format!("cannot parse {}: {e}", path.display())))
}

/// Classify raw YAML content. Multi-document input is tolerated; only the
/// first non-empty document is considered.
pub fn classify_content(content: &str) -> Result<PipelineKind, serde_yaml::Error> {
    for document in serde_yaml::Deserializer::from_str(content) {
        let value = serde_yaml::Value::deserialize(document)?;
        if value.is_null() {
            continue;
        }
        let head: DocHead = serde_yaml::from_value(value)?;
        return Ok(classify_head(head));
    }
    Ok(PipelineKind::Other)
}

fn classify_head(head: DocHead) -> PipelineKind {
    match head.kind.as_deref() {
        Some(TEKTON_KIND_PIPELINE) => PipelineKind::Pipeline,
        Some(TEKTON_KIND_PIPELINE_RUN) => {
            let spec = head.spec.unwrap_or(serde_yaml::Value::Null);
            if spec.get("pipelineSpec").is_some() {
                PipelineKind::PipelineRunInline
            } else {
                PipelineKind::PipelineRunRef
            }
        }
        _ => PipelineKind::Other,
    }
}

/// Enumerate candidate YAML files under the given files or directories.
///
/// Directories are scanned one level deep for `.yaml`/`.yml` files.
/// Symlinks are skipped with a warning so edits never escape the
/// repository.
pub fn iterate_files_or_dirs(locations: &[PathBuf]) -> Vec<PathBuf> {
    let mut found = Vec::new();
    for location in locations {
        if location.as_os_str().is_empty() {
            continue;
        }
        if location.is_symlink() {
            warn!(
                "skip symlink {}; specify the destination file or directory instead",
                location.display()
            );
            continue;
        }
        if location.is_dir() {
            let entries = match std::fs::read_dir(location) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("cannot list {}: {e}", location.display());
                    continue;
                }
            };
            let mut children: Vec<PathBuf> = entries
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.path())
                .filter(|p| !p.is_symlink() && p.is_file() && is_yaml_file(p))
                .collect();
            children.sort();
            found.extend(children);
        } else if location.is_file() {
            found.push(location.clone());
        } else {
            warn!("{} does not exist", location.display());
        }
    }
    found
}

fn is_yaml_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

/// Discover and classify pipeline files under the given locations.
///
/// Unreadable or unparseable files are skipped and reported in the second
/// element of the returned tuple; ref-only PipelineRuns are skipped with a
/// warning; non-pipeline YAML files are skipped silently.
pub fn discover_pipeline_files(
    locations: &[PathBuf],
) -> (Vec<PipelineFile>, Vec<(PathBuf, String)>) {
    let mut pipelines = Vec::new();
    let mut skipped = Vec::new();
    for path in iterate_files_or_dirs(locations) {
        match classify_file(&path) {
            Ok(kind) if kind.is_editable() => pipelines.push(PipelineFile { path, kind }),
            Ok(PipelineKind::PipelineRunRef) => {
                warn!(
                    "skip {}: PipelineRun does not embed its pipeline",
                    path.display()
                );
            }
            Ok(_) => debug!("skip {}: not a pipeline file", path.display()),
            Err(e) => {
                warn!("skip {}: {e}", path.display());
                skipped.push((path, e.to_string()));
            }
        }
    }
    (pipelines, skipped)
}
