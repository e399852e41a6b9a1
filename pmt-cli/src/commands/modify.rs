//! `modify` command handler.
//!
//! Stable, comment-preserving edits on pipeline YAML files. The `task`
//! resource understands pipeline semantics (params, runAfter) and works
//! on both `spec.tasks` and `spec.finally`, including the
//! `spec.pipelineSpec` variants of an inline PipelineRun. The `generic`
//! resource edits raw YAML paths and should be the last resort, since it
//! validates nothing semantically.

use std::path::PathBuf;

use clap::{Args, Subcommand};
use serde_yaml::Value;
use tracing::{info, warn};

use pmt_core::pipeline::{classify_file, iterate_files_or_dirs, PipelineKind, DEFAULT_PIPELINE_DIR};
use pmt_core::Error;
use pmt_yamledit::{EditError, Node, YamlEditor, YamlPath};

/// Arguments of the `modify` command.
#[derive(Args)]
pub struct ModifyArgs {
    /// Pipeline file to modify. Repeatable. Defaults to the YAML files
    /// under ./.tekton/.
    #[arg(short = 'f', long = "file", value_name = "PATH")]
    files: Vec<PathBuf>,

    #[command(subcommand)]
    resource: ModifyResource,
}

#[derive(Subcommand)]
enum ModifyResource {
    /// Update the named pipeline task
    Task {
        /// Pipeline task name in the Pipeline/PipelineRun YAML file
        task_name: String,
        #[command(subcommand)]
        op: TaskOp,
    },
    /// Raw modification at a YAML path (no semantic validation)
    Generic {
        #[command(subcommand)]
        op: GenericOp,
    },
}

#[derive(Subcommand)]
enum TaskOp {
    /// Append a param to the task; a param already holding the value is a
    /// no-op, a different value is an error unless --replace is given
    AddParam {
        name: String,
        value: String,
        /// Overwrite the param when it exists with a different value
        #[arg(long)]
        replace: bool,
    },
    /// Overwrite a param, appending it when missing
    SetParam { name: String, value: String },
    /// Remove a param from the task
    RemoveParam { name: String },
    /// Add a task name to the task's runAfter list; idempotent
    AddRunAfter { task: String },
}

#[derive(Subcommand)]
enum GenericOp {
    /// Insert a value into the mapping or sequence at a YAML path
    Insert {
        /// YAML path as a JSON array of keys and indexes
        yaml_path: String,
        /// Value in YAML syntax
        value: String,
    },
    /// Replace the node at a YAML path
    Replace {
        yaml_path: String,
        value: String,
    },
    /// Remove the node at a YAML path
    Remove { yaml_path: String },
}

pub fn handle_modify(args: ModifyArgs) -> Result<(), Error> {
    let locations = if args.files.is_empty() {
        vec![PathBuf::from(DEFAULT_PIPELINE_DIR)]
    } else {
        args.files.clone()
    };
    let files = iterate_files_or_dirs(&locations);
    if files.is_empty() {
        warn!("no YAML file found under the given locations");
        return Ok(());
    }

    for file in files {
        let kind = classify_file(&file)?;
        if !kind.is_editable() {
            warn!("skip {}: not an editable pipeline file", file.display());
            continue;
        }
        let mut editor = YamlEditor::open(&file).map_err(edit_error)?;
        match &args.resource {
            ModifyResource::Task { task_name, op } => {
                apply_task_op(&mut editor, kind, task_name, op, &file)?
            }
            ModifyResource::Generic { op } => apply_generic_op(&mut editor, op, &file)?,
        }
    }
    Ok(())
}

// ----------------------------------------------------------------------
// task resource
// ----------------------------------------------------------------------

fn apply_task_op(
    editor: &mut YamlEditor,
    kind: PipelineKind,
    task_name: &str,
    op: &TaskOp,
    file: &std::path::Path,
) -> Result<(), Error> {
    let task_path = find_task(editor, kind, task_name).ok_or_else(|| {
        Error::YamlSurgeryConflict(format!(
            "task '{task_name}' does not exist in '{}'",
            file.display()
        ))
    })?;

    let applied = match op {
        TaskOp::AddParam {
            name,
            value,
            replace,
        } => add_param(editor, &task_path, task_name, name, value, *replace)?,
        TaskOp::SetParam { name, value } => {
            add_param(editor, &task_path, task_name, name, value, true)?
        }
        TaskOp::RemoveParam { name } => remove_param(editor, &task_path, name)?,
        TaskOp::AddRunAfter { task } => add_run_after(editor, &task_path, task)?,
    };
    if applied {
        info!("task '{task_name}' updated in '{}'", file.display());
    } else {
        info!(
            "task '{task_name}' in '{}' already matches, nothing to do",
            file.display()
        );
    }
    Ok(())
}

/// Locate a task by name across the tasks and finally sections.
fn find_task(editor: &YamlEditor, kind: PipelineKind, task_name: &str) -> Option<YamlPath> {
    for section in ["tasks", "finally"] {
        let mut path = YamlPath::root();
        for step in kind.spec_prefix() {
            path.push(*step);
        }
        path.push(section);

        let Some(Node::Sequence(tasks)) = editor.lookup(&path) else {
            continue;
        };
        for (index, task) in tasks.items.iter().enumerate() {
            let name = task
                .as_mapping()
                .and_then(|m| m.get("name"))
                .and_then(|n| n.as_scalar());
            if name.map(|s| s.value == task_name).unwrap_or(false) {
                return Some(path.join(index));
            }
        }
    }
    None
}

fn param_value(name: &str, value: &str) -> Value {
    let mut entry = serde_yaml::Mapping::new();
    entry.insert(
        Value::String("name".into()),
        Value::String(name.to_string()),
    );
    entry.insert(
        Value::String("value".into()),
        Value::String(value.to_string()),
    );
    Value::Mapping(entry)
}

/// How an existing param relates to the requested value.
enum ParamState {
    Missing,
    NoParamsSection,
    Same(usize),
    Different(usize),
}

fn param_state(editor: &YamlEditor, task_path: &YamlPath, name: &str, value: &str) -> ParamState {
    let params_path = task_path.join("params");
    let Some(Node::Sequence(params)) = editor.lookup(&params_path) else {
        return ParamState::NoParamsSection;
    };
    for (index, param) in params.items.iter().enumerate() {
        let Some(mapping) = param.as_mapping() else {
            continue;
        };
        let matches = mapping
            .get("name")
            .and_then(|n| n.as_scalar())
            .map(|s| s.value == name)
            .unwrap_or(false);
        if !matches {
            continue;
        }
        let same = mapping
            .get("value")
            .and_then(|v| v.as_scalar())
            .map(|s| s.value == value)
            .unwrap_or(false);
        return if same {
            ParamState::Same(index)
        } else {
            ParamState::Different(index)
        };
    }
    ParamState::Missing
}

fn add_param(
    editor: &mut YamlEditor,
    task_path: &YamlPath,
    task_name: &str,
    name: &str,
    value: &str,
    replace: bool,
) -> Result<bool, Error> {
    match param_state(editor, task_path, name, value) {
        ParamState::NoParamsSection => {
            let mut wrapper = serde_yaml::Mapping::new();
            wrapper.insert(
                Value::String("params".into()),
                Value::Sequence(vec![param_value(name, value)]),
            );
            editor
                .insert(task_path, Value::Mapping(wrapper))
                .map_err(edit_error)?;
            Ok(true)
        }
        ParamState::Missing => {
            editor
                .insert(&task_path.join("params"), param_value(name, value))
                .map_err(edit_error)?;
            Ok(true)
        }
        ParamState::Same(_) => Ok(false),
        ParamState::Different(index) => {
            if !replace {
                return Err(Error::YamlSurgeryConflict(format!(
                    "param '{name}' of task '{task_name}' already has a different value; \
                     use --replace to overwrite"
                )));
            }
            let param_path = task_path.join("params").join(index);
            let has_value_key = editor
                .lookup(&param_path)
                .and_then(|n| n.as_mapping())
                .map(|m| m.get("value").is_some())
                .unwrap_or(false);
            if has_value_key {
                editor
                    .replace(
                        &param_path.join("value"),
                        Value::String(value.to_string()),
                    )
                    .map_err(edit_error)?;
            } else {
                editor
                    .replace(&param_path, param_value(name, value))
                    .map_err(edit_error)?;
            }
            Ok(true)
        }
    }
}

fn remove_param(
    editor: &mut YamlEditor,
    task_path: &YamlPath,
    name: &str,
) -> Result<bool, Error> {
    match param_state(editor, task_path, name, "") {
        ParamState::NoParamsSection | ParamState::Missing => Ok(false),
        ParamState::Same(index) | ParamState::Different(index) => {
            editor
                .remove(&task_path.join("params").join(index))
                .map_err(edit_error)?;
            Ok(true)
        }
    }
}

fn add_run_after(
    editor: &mut YamlEditor,
    task_path: &YamlPath,
    reference: &str,
) -> Result<bool, Error> {
    let run_after_path = task_path.join("runAfter");
    match editor.lookup(&run_after_path) {
        Some(Node::Sequence(entries)) => {
            let present = entries
                .items
                .iter()
                .any(|item| item.as_scalar().map(|s| s.value == reference).unwrap_or(false));
            if present {
                return Ok(false);
            }
            editor
                .insert(&run_after_path, Value::String(reference.to_string()))
                .map_err(edit_error)?;
            Ok(true)
        }
        _ => {
            let mut wrapper = serde_yaml::Mapping::new();
            wrapper.insert(
                Value::String("runAfter".into()),
                Value::Sequence(vec![Value::String(reference.to_string())]),
            );
            editor
                .insert(task_path, Value::Mapping(wrapper))
                .map_err(edit_error)?;
            Ok(true)
        }
    }
}

// ----------------------------------------------------------------------
// generic resource
// ----------------------------------------------------------------------

fn apply_generic_op(
    editor: &mut YamlEditor,
    op: &GenericOp,
    file: &std::path::Path,
) -> Result<(), Error> {
    let result = match op {
        GenericOp::Insert { yaml_path, value } => {
            let path = YamlPath::parse_json(yaml_path).map_err(edit_error)?;
            editor.insert(&path, parse_value(value)?)
        }
        GenericOp::Replace { yaml_path, value } => {
            let path = YamlPath::parse_json(yaml_path).map_err(edit_error)?;
            editor.replace(&path, parse_value(value)?)
        }
        GenericOp::Remove { yaml_path } => {
            let path = YamlPath::parse_json(yaml_path).map_err(edit_error)?;
            editor.remove(&path)
        }
    };
    match result {
        Ok(()) => Ok(()),
        // Missing paths only skip the file; other pipelines may match.
        Err(EditError::PathNotFound(path)) => {
            warn!("skipped {}: path {path} not found", file.display());
            Ok(())
        }
        Err(e) => Err(edit_error(e)),
    }
}

fn parse_value(raw: &str) -> Result<Value, Error> {
    serde_yaml::from_str(raw)
        .map_err(|e| Error::InvalidInput(format!("value is not valid YAML: {e}")))
}

fn edit_error(e: EditError) -> Error {
    match e {
        EditError::Io(e) => Error::InvalidInput(e.to_string()),
        EditError::Parse(msg) | EditError::Unsupported(msg) => Error::InvalidInput(msg),
        EditError::PathNotFound(path) => {
            Error::YamlSurgeryConflict(format!("path {path} not found"))
        }
        EditError::NotAContainer(msg) | EditError::InvalidEdit(msg) => {
            Error::YamlSurgeryConflict(msg)
        }
        EditError::PostValidation(msg) => Error::Internal(anyhow::anyhow!(msg)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PIPELINE: &str = "\
apiVersion: tekton.dev/v1
kind: Pipeline
spec:
  tasks:
    - name: clone
      params:
        - name: depth
          value: \"1\"
      taskRef:
        name: git-clone
    - name: lint
      taskRef:
        name: lint
  finally:
    - name: summary
      taskRef:
        name: summary
";

    const PIPELINE_RUN: &str = "\
apiVersion: tekton.dev/v1
kind: PipelineRun
spec:
  pipelineSpec:
    tasks:
      - name: clone
        taskRef:
          name: git-clone
";

    fn editor_for(content: &str) -> (tempfile::TempDir, YamlEditor, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("pipeline.yaml");
        std::fs::write(&file, content).unwrap();
        let editor = YamlEditor::open(&file).unwrap();
        (dir, editor, file)
    }

    fn read(path: &std::path::Path) -> String {
        std::fs::read_to_string(path).unwrap()
    }

    #[test]
    fn test_find_task_in_tasks_and_finally() {
        let (_dir, editor, _file) = editor_for(PIPELINE);
        assert_eq!(
            find_task(&editor, PipelineKind::Pipeline, "clone")
                .unwrap()
                .to_string(),
            ".spec.tasks[0]"
        );
        assert_eq!(
            find_task(&editor, PipelineKind::Pipeline, "summary")
                .unwrap()
                .to_string(),
            ".spec.finally[0]"
        );
        assert!(find_task(&editor, PipelineKind::Pipeline, "nope").is_none());
    }

    #[test]
    fn test_find_task_in_pipeline_run() {
        let (_dir, editor, _file) = editor_for(PIPELINE_RUN);
        assert_eq!(
            find_task(&editor, PipelineKind::PipelineRunInline, "clone")
                .unwrap()
                .to_string(),
            ".spec.pipelineSpec.tasks[0]"
        );
    }

    #[test]
    fn test_add_param_same_value_is_a_noop() {
        let (_dir, mut editor, file) = editor_for(PIPELINE);
        let task = find_task(&editor, PipelineKind::Pipeline, "clone").unwrap();
        let applied = add_param(&mut editor, &task, "clone", "depth", "1", false).unwrap();
        assert!(!applied);
        assert_eq!(read(&file), PIPELINE);
    }

    #[test]
    fn test_add_param_different_value_conflicts_without_replace() {
        let (_dir, mut editor, file) = editor_for(PIPELINE);
        let task = find_task(&editor, PipelineKind::Pipeline, "clone").unwrap();
        let err = add_param(&mut editor, &task, "clone", "depth", "2", false).unwrap_err();
        assert!(matches!(err, Error::YamlSurgeryConflict(_)));
        assert_eq!(read(&file), PIPELINE);
    }

    #[test]
    fn test_add_param_replace_overwrites_value() {
        let (_dir, mut editor, file) = editor_for(PIPELINE);
        let task = find_task(&editor, PipelineKind::Pipeline, "clone").unwrap();
        let applied = add_param(&mut editor, &task, "clone", "depth", "2", true).unwrap();
        assert!(applied);
        let expected = PIPELINE.replace("          value: \"1\"\n", "          value: \"2\"\n");
        assert_eq!(read(&file), expected);
    }

    #[test]
    fn test_add_param_appends_missing_param() {
        let (_dir, mut editor, file) = editor_for(PIPELINE);
        let task = find_task(&editor, PipelineKind::Pipeline, "clone").unwrap();
        let applied = add_param(&mut editor, &task, "clone", "refspec", "main", false).unwrap();
        assert!(applied);
        let expected = PIPELINE.replace(
            "          value: \"1\"\n",
            "          value: \"1\"\n        - name: refspec\n          value: main\n",
        );
        assert_eq!(read(&file), expected);
    }

    #[test]
    fn test_add_param_creates_params_section() {
        let (_dir, mut editor, file) = editor_for(PIPELINE);
        let task = find_task(&editor, PipelineKind::Pipeline, "lint").unwrap();
        let applied = add_param(&mut editor, &task, "lint", "level", "strict", false).unwrap();
        assert!(applied);
        let expected = PIPELINE.replace(
            "    - name: lint\n      taskRef:\n        name: lint\n",
            "    - name: lint\n      taskRef:\n        name: lint\n\
             \x20     params:\n        - name: level\n          value: strict\n",
        );
        assert_eq!(read(&file), expected);
    }

    #[test]
    fn test_remove_param_cascades_empty_section() {
        let (_dir, mut editor, file) = editor_for(PIPELINE);
        let task = find_task(&editor, PipelineKind::Pipeline, "clone").unwrap();
        let applied = remove_param(&mut editor, &task, "depth").unwrap();
        assert!(applied);
        let expected = PIPELINE.replace(
            "      params:\n        - name: depth\n          value: \"1\"\n",
            "",
        );
        assert_eq!(read(&file), expected);
    }

    #[test]
    fn test_remove_missing_param_is_a_noop() {
        let (_dir, mut editor, file) = editor_for(PIPELINE);
        let task = find_task(&editor, PipelineKind::Pipeline, "lint").unwrap();
        assert!(!remove_param(&mut editor, &task, "depth").unwrap());
        assert_eq!(read(&file), PIPELINE);
    }

    #[test]
    fn test_add_run_after_is_idempotent() {
        let (_dir, mut editor, file) = editor_for(PIPELINE);
        let task = find_task(&editor, PipelineKind::Pipeline, "lint").unwrap();
        assert!(add_run_after(&mut editor, &task, "clone").unwrap());
        let after_first = read(&file);
        assert!(after_first.contains("      runAfter:\n        - clone\n"));

        let task = find_task(&editor, PipelineKind::Pipeline, "lint").unwrap();
        assert!(!add_run_after(&mut editor, &task, "clone").unwrap());
        assert_eq!(read(&file), after_first);
    }

    #[test]
    fn test_generic_remove_skips_missing_path() {
        let (_dir, mut editor, file) = editor_for(PIPELINE);
        apply_generic_op(
            &mut editor,
            &GenericOp::Remove {
                yaml_path: r#"["spec", "nope"]"#.into(),
            },
            &file,
        )
        .unwrap();
        assert_eq!(read(&file), PIPELINE);
    }

    #[test]
    fn test_generic_replace() {
        let (_dir, mut editor, file) = editor_for(PIPELINE);
        apply_generic_op(
            &mut editor,
            &GenericOp::Replace {
                yaml_path: r#"["spec", "tasks", 0, "taskRef", "name"]"#.into(),
                value: "git-clone-oci-ta".into(),
            },
            &file,
        )
        .unwrap();
        let expected = PIPELINE.replace("        name: git-clone\n", "        name: git-clone-oci-ta\n");
        assert_eq!(read(&file), expected);
    }
}
