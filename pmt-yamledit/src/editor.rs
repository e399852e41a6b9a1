//! In-place YAML editing with minimal textual diffs.
//!
//! Edits are line splices computed from the located node tree: the target
//! node's first line and the line where the next entry begins bound the
//! region that gets rewritten. Everything outside the region keeps its
//! original bytes, including comments, blank lines and key order.
//!
//! Flow-style targets cannot be spliced line-wise; the nearest enclosing
//! flow node whose parent is in block style is re-emitted in block style
//! with the edit applied. This conversion is local to that subtree.
//!
//! Every mutation re-parses the candidate text before atomically renaming
//! it over the original file, so a bad splice can never corrupt the file
//! on disk.

use std::io::Write as _;
use std::path::{Path, PathBuf};

use serde_yaml::Value;
use tracing::debug;

use crate::emit;
use crate::error::{EditError, Result};
use crate::loader::{self, Document, Node, ScalarNode, ScalarStyle};
use crate::path::{display_steps, Step, YamlPath};

enum FlowEdit {
    Insert(Value),
    Replace(Value),
    Remove,
}

/// Editor over one YAML file.
///
/// The file is re-read after every mutation, so node references never go
/// stale; callers re-run their lookups against [`YamlEditor::root`]
/// between edits.
pub struct YamlEditor {
    path: PathBuf,
    lines: Vec<String>,
    trailing_newline: bool,
    doc: Document,
    seq_indent: usize,
}

impl YamlEditor {
    /// Open a YAML file for editing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let text = std::fs::read_to_string(&path)?;
        let doc = loader::load_first_document(&text)?;
        let lines: Vec<String> = text.lines().map(String::from).collect();
        let seq_indent = detect_seq_indent(&doc.root).unwrap_or(2);
        Ok(Self {
            path,
            trailing_newline: text.ends_with('\n') || text.is_empty(),
            lines,
            doc,
            seq_indent,
        })
    }

    /// Root node of the first document.
    pub fn root(&self) -> &Node {
        &self.doc.root
    }

    /// Block-sequence indentation detected from the file.
    pub fn seq_indent(&self) -> usize {
        self.seq_indent
    }

    /// Node at `path`, if present.
    pub fn lookup(&self, path: &YamlPath) -> Option<&Node> {
        let mut node = &self.doc.root;
        for step in path.steps() {
            node = node.child(step)?;
        }
        Some(node)
    }

    fn node_at(&self, steps: &[Step]) -> Result<&Node> {
        let mut node = &self.doc.root;
        for (i, step) in steps.iter().enumerate() {
            node = node
                .child(step)
                .ok_or_else(|| EditError::PathNotFound(display_steps(&steps[..=i])))?;
        }
        Ok(node)
    }

    /// Insert `value` into the mapping or sequence at `path`.
    ///
    /// Sequences take any value as a new trailing item; mappings take a
    /// mapping whose keys are merged in. Inserting a key that already
    /// exists is an error.
    pub fn insert(&mut self, path: &YamlPath, value: Value) -> Result<()> {
        let steps = path.steps();
        let target = self.node_at(steps)?;
        if target.as_scalar().is_some() {
            return Err(EditError::NotAContainer(path.to_string()));
        }
        debug!("insert at {path} in {}", self.path.display());

        if let Some(depth) = self.flow_depth(steps, true) {
            return self.flow_rewrite(&steps[..depth], steps, FlowEdit::Insert(value));
        }

        let text = match target {
            Node::Sequence(seq) => emit::emit_seq_item(&value, seq.mark.col, self.seq_indent),
            Node::Mapping(map) => {
                let entries = match &value {
                    Value::Mapping(entries) => entries,
                    _ => {
                        return Err(EditError::InvalidEdit(
                            "only mappings can be inserted into a mapping".into(),
                        ))
                    }
                };
                for key in entries.keys() {
                    if let Value::String(key) = key {
                        if map.get(key).is_some() {
                            return Err(EditError::InvalidEdit(format!(
                                "key {key} already exists at {path}"
                            )));
                        }
                    }
                }
                emit::emit_block(&value, map.mark.col, self.seq_indent)
            }
            Node::Scalar(_) => unreachable!("checked above"),
        };
        let at = self.next_entry_line(steps);
        self.splice(at, at, Some(&text))
    }

    /// Replace the node at `path` with `value`.
    ///
    /// Replacing a single-line scalar with another scalar splices within
    /// the line and keeps a trailing comment; its column may shift.
    pub fn replace(&mut self, path: &YamlPath, value: Value) -> Result<()> {
        let steps = path.steps();
        self.node_at(steps)?;
        debug!("replace at {path} in {}", self.path.display());

        if let Some(depth) = self.flow_depth(steps, true) {
            if depth < steps.len() {
                return self.flow_rewrite(&steps[..depth], steps, FlowEdit::Replace(value));
            }
            // The target itself is the outermost flow node; rebuilding its
            // entry converts it to block style.
            return self.rewrite_entry(steps, value);
        }

        let target = self.node_at(steps)?;
        match target {
            Node::Scalar(scalar) => {
                if let Some(text) = emit::emit_scalar_opt(&value) {
                    if self.scalar_is_single_line(steps, scalar) {
                        let scalar = scalar.clone();
                        return self.replace_scalar_inline(&scalar, &text);
                    }
                }
                self.rewrite_entry(steps, value)
            }
            _ => {
                if steps.is_empty() || emit::emit_scalar_opt(&value).is_some() {
                    return self.rewrite_entry(steps, value);
                }
                let parent = self.node_at(&steps[..steps.len() - 1])?;
                if parent.as_sequence().is_some() {
                    // Sequence items carry their dash; rebuild the item.
                    return self.rewrite_entry(steps, value);
                }
                // A block container value starts below its key; only the
                // value lines are replaced.
                let mark = target.mark();
                let text = emit::emit_block(&value, mark.col, self.seq_indent);
                let end = self.next_entry_line(steps);
                self.splice(mark.line, end, Some(&text))
            }
        }
    }

    /// Remove the node at `path`.
    ///
    /// When the removal would leave an empty mapping or sequence behind,
    /// the emptied container's own entry is removed instead, cascading
    /// upward.
    pub fn remove(&mut self, path: &YamlPath) -> Result<()> {
        if path.is_empty() {
            return Err(EditError::InvalidEdit("cannot remove the document root".into()));
        }
        let mut steps = path.steps().to_vec();
        self.node_at(&steps)?;
        debug!("remove at {path} in {}", self.path.display());

        while steps.len() > 1 {
            let parent = self.node_at(&steps[..steps.len() - 1])?;
            if parent.container_len().unwrap_or(usize::MAX) > 1 {
                break;
            }
            steps.pop();
        }

        if let Some(depth) = self.flow_depth(&steps, false) {
            return self.flow_rewrite(&steps[..depth], &steps, FlowEdit::Remove);
        }

        let start = self.entry_start_line(&steps)?;
        let end = self.next_entry_line(&steps);
        self.splice(start, end, None)
    }

    // ------------------------------------------------------------------
    // Location helpers
    // ------------------------------------------------------------------

    /// Line where the entry holding the node at `steps` begins: the key
    /// line for mapping values, the item line for sequence items.
    fn entry_start_line(&self, steps: &[Step]) -> Result<usize> {
        let (parent_steps, last) = match steps.split_last() {
            Some((last, parent)) => (parent, last),
            None => return Ok(self.doc.root.mark().line),
        };
        let parent = self.node_at(parent_steps)?;
        match (parent, last) {
            (Node::Mapping(map), Step::Key(key)) => {
                let entry = map
                    .entry(key)
                    .ok_or_else(|| EditError::PathNotFound(display_steps(steps)))?;
                Ok(entry.key.mark.line)
            }
            (Node::Sequence(seq), Step::Index(index)) => {
                let item = seq
                    .items
                    .get(*index)
                    .ok_or_else(|| EditError::PathNotFound(display_steps(steps)))?;
                Ok(item.mark().line)
            }
            _ => Err(EditError::PathNotFound(display_steps(steps))),
        }
    }

    /// Line where the entry after the node at `steps` begins, looking at
    /// siblings of each ancestor when the node closes its container. Falls
    /// back to the end of the document.
    fn next_entry_line(&self, steps: &[Step]) -> usize {
        for depth in (0..steps.len()).rev() {
            let Ok(container) = self.node_at(&steps[..depth]) else {
                break;
            };
            let sibling_line = match (container, &steps[depth]) {
                (Node::Mapping(map), Step::Key(key)) => map
                    .index_of(key)
                    .and_then(|i| map.entries.get(i + 1))
                    .map(|entry| entry.key.mark.line),
                (Node::Sequence(seq), Step::Index(index)) => {
                    seq.items.get(index + 1).map(|item| item.mark().line)
                }
                _ => None,
            };
            if let Some(line) = sibling_line {
                return line;
            }
        }
        self.eof_line()
    }

    fn eof_line(&self) -> usize {
        self.doc.end_line.min(self.lines.len())
    }

    /// Length of the shortest path prefix whose node is in flow style.
    fn flow_depth(&self, steps: &[Step], include_target: bool) -> Option<usize> {
        let max = if include_target {
            steps.len()
        } else {
            steps.len().saturating_sub(1)
        };
        (0..=max).find(|depth| {
            self.node_at(&steps[..*depth])
                .map(|node| node.is_flow())
                .unwrap_or(false)
        })
    }

    // ------------------------------------------------------------------
    // Rewriting
    // ------------------------------------------------------------------

    /// Apply an edit beneath a flow node by re-emitting the nearest
    /// enclosing block-parented subtree in block style.
    fn flow_rewrite(&mut self, anchor: &[Step], full: &[Step], edit: FlowEdit) -> Result<()> {
        let node = self.node_at(anchor)?;
        let mut value = loader::node_to_value(node);
        apply_value_edit(&mut value, &full[anchor.len()..], edit)?;
        self.rewrite_entry(anchor, value)
    }

    /// Replace the whole entry (key and value, or sequence item) at
    /// `steps` with block-style emission of `value`.
    fn rewrite_entry(&mut self, steps: &[Step], value: Value) -> Result<()> {
        let end = self.next_entry_line(steps);
        let (parent_steps, last) = match steps.split_last() {
            Some((last, parent)) => (parent, last),
            None => {
                let start = self.doc.root.mark().line;
                let text = emit::emit_block(&value, 0, self.seq_indent);
                return self.splice(start, self.eof_line().max(start), Some(&text));
            }
        };
        let parent = self.node_at(parent_steps)?;
        match (parent, last) {
            (Node::Mapping(map), Step::Key(key)) => {
                let entry = map
                    .entry(key)
                    .ok_or_else(|| EditError::PathNotFound(display_steps(steps)))?;
                let col = entry.key.mark.col;
                let start = entry.key.mark.line;
                let text = emit::emit_entry(key, &value, col, self.seq_indent);
                self.splice(start, end, Some(&text))
            }
            (Node::Sequence(seq), Step::Index(index)) => {
                let item = seq
                    .items
                    .get(*index)
                    .ok_or_else(|| EditError::PathNotFound(display_steps(steps)))?;
                let start = item.mark().line;
                let text = emit::emit_seq_item(&value, seq.mark.col, self.seq_indent);
                self.splice(start, end, Some(&text))
            }
            _ => Err(EditError::PathNotFound(display_steps(steps))),
        }
    }

    /// Whether a scalar occupies a single source line, so it can be
    /// replaced within the line.
    fn scalar_is_single_line(&self, steps: &[Step], scalar: &ScalarNode) -> bool {
        if matches!(scalar.style, ScalarStyle::Literal | ScalarStyle::Folded) {
            return false;
        }
        let end = self.next_entry_line(steps);
        if end <= scalar.mark.line + 1 {
            return true;
        }
        let anchor_col = self
            .entry_start_line(steps)
            .ok()
            .and_then(|line| self.lines.get(line))
            .map(|line| line.len() - line.trim_start().len())
            .unwrap_or(0);
        // Lines between the scalar and the next entry are fine if they are
        // blank or comments; deeper content is a continuation line.
        self.lines[scalar.mark.line + 1..end.min(self.lines.len())]
            .iter()
            .all(|line| {
                let trimmed = line.trim_start();
                trimmed.is_empty()
                    || trimmed.starts_with('#')
                    || line.len() - trimmed.len() <= anchor_col
            })
    }

    fn replace_scalar_inline(&mut self, scalar: &ScalarNode, text: &str) -> Result<()> {
        let line_idx = scalar.mark.line;
        let line = self
            .lines
            .get(line_idx)
            .ok_or_else(|| EditError::Parse("scalar mark out of range".into()))?;
        let byte_col = char_col_to_byte(line, scalar.mark.col);
        let mut new_line = format!("{}{}", &line[..byte_col], text);
        if let Some(comment) = find_inline_comment(&line[byte_col..]) {
            new_line.push(' ');
            new_line.push_str(comment);
        }
        self.splice(line_idx, line_idx + 1, Some(&new_line))
    }

    // ------------------------------------------------------------------
    // Text splicing
    // ------------------------------------------------------------------

    /// Replace lines `[start, end)` with `replacement` (or delete them),
    /// validate the result, and atomically write it back.
    fn splice(&mut self, start: usize, end: usize, replacement: Option<&str>) -> Result<()> {
        let mut new_lines: Vec<String> = Vec::with_capacity(self.lines.len() + 4);
        new_lines.extend_from_slice(&self.lines[..start.min(self.lines.len())]);
        if let Some(text) = replacement {
            new_lines.extend(text.lines().map(String::from));
        }
        if end < self.lines.len() {
            new_lines.extend_from_slice(&self.lines[end..]);
        }
        let mut new_text = new_lines.join("\n");
        if self.trailing_newline && !new_text.is_empty() {
            new_text.push('\n');
        }

        loader::check_valid(&new_text)
            .map_err(|e| EditError::PostValidation(e.to_string()))?;
        let doc = loader::load_first_document(&new_text)
            .map_err(|e| EditError::PostValidation(e.to_string()))?;

        write_atomically(&self.path, &new_text)?;
        self.lines = new_lines;
        self.doc = doc;
        Ok(())
    }
}

fn write_atomically(path: &Path, content: &str) -> Result<()> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
    let mut temp = match dir {
        Some(dir) => tempfile::NamedTempFile::new_in(dir)?,
        None => tempfile::NamedTempFile::new_in(".")?,
    };
    temp.write_all(content.as_bytes())?;
    temp.persist(path).map_err(|e| EditError::Io(e.error))?;
    Ok(())
}

/// Detect the block-sequence indentation used by the document: the column
/// offset between a mapping key and the dashes of its sequence value.
fn detect_seq_indent(node: &Node) -> Option<usize> {
    match node {
        Node::Mapping(map) => {
            for entry in &map.entries {
                if let Node::Sequence(seq) = &entry.value {
                    if !seq.flow && !seq.items.is_empty() && seq.mark.line > entry.key.mark.line {
                        return Some(seq.mark.col.saturating_sub(entry.key.mark.col));
                    }
                }
                if let Some(found) = detect_seq_indent(&entry.value) {
                    return Some(found);
                }
            }
            None
        }
        Node::Sequence(seq) => seq.items.iter().find_map(detect_seq_indent),
        Node::Scalar(_) => None,
    }
}

fn char_col_to_byte(line: &str, col: usize) -> usize {
    line.char_indices()
        .nth(col)
        .map(|(i, _)| i)
        .unwrap_or(line.len())
}

/// Find a trailing comment in the rest of a line starting at a scalar.
/// Quote state is tracked so `#` inside quoted scalars is not mistaken
/// for a comment.
fn find_inline_comment(rest: &str) -> Option<&str> {
    let mut in_single = false;
    let mut in_double = false;
    let mut escaped = false;
    let mut prev_is_space = false;
    for (i, c) in rest.char_indices() {
        if escaped {
            escaped = false;
            prev_is_space = false;
            continue;
        }
        match c {
            '\\' if in_double => escaped = true,
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            '#' if !in_single && !in_double && prev_is_space => return Some(&rest[i..]),
            _ => {}
        }
        prev_is_space = c == ' ' || c == '\t';
    }
    None
}

fn apply_value_edit(value: &mut Value, rel: &[Step], edit: FlowEdit) -> Result<()> {
    let Some((head, tail)) = rel.split_first() else {
        return match edit {
            FlowEdit::Replace(new) => {
                *value = new;
                Ok(())
            }
            FlowEdit::Insert(new) => match value {
                Value::Sequence(items) => {
                    items.push(new);
                    Ok(())
                }
                Value::Mapping(map) => match new {
                    Value::Mapping(entries) => {
                        for (k, v) in entries {
                            map.insert(k, v);
                        }
                        Ok(())
                    }
                    _ => Err(EditError::InvalidEdit(
                        "only mappings can be inserted into a mapping".into(),
                    )),
                },
                _ => Err(EditError::NotAContainer("flow scalar".into())),
            },
            FlowEdit::Remove => Err(EditError::InvalidEdit(
                "cannot remove the re-serialized subtree root".into(),
            )),
        };
    };

    match (head, tail.is_empty(), &edit) {
        (Step::Key(key), true, FlowEdit::Remove) => match value {
            Value::Mapping(map) => {
                let wanted = Value::String(key.clone());
                let filtered: serde_yaml::Mapping = map
                    .iter()
                    .filter(|(k, _)| **k != wanted)
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                *map = filtered;
                Ok(())
            }
            _ => Err(EditError::PathNotFound(format!(".{key}"))),
        },
        (Step::Index(index), true, FlowEdit::Remove) => match value {
            Value::Sequence(items) if *index < items.len() => {
                items.remove(*index);
                Ok(())
            }
            _ => Err(EditError::PathNotFound(format!("[{index}]"))),
        },
        (Step::Key(key), ..) => {
            let child = value
                .get_mut(key.as_str())
                .ok_or_else(|| EditError::PathNotFound(format!(".{key}")))?;
            apply_value_edit(child, tail, edit)
        }
        (Step::Index(index), ..) => {
            let child = value
                .get_mut(*index)
                .ok_or_else(|| EditError::PathNotFound(format!("[{index}]")))?;
            apply_value_edit(child, tail, edit)
        }
    }
}
