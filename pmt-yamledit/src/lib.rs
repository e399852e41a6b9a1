//! Comment-preserving YAML edits with minimal textual diffs.
//!
//! Pipeline files are reviewed by humans, so an automated edit must not
//! reformat anything it does not touch: comments, blank lines, key order,
//! indentation and flow style of untouched regions all keep their exact
//! bytes. This crate achieves that by locating the target node through a
//! marker-carrying parse and splicing generated block YAML into the raw
//! text, instead of re-serializing the whole document.
//!
//! # Example
//!
//! ```no_run
//! use pmt_yamledit::{YamlEditor, YamlPath};
//!
//! # fn example() -> Result<(), pmt_yamledit::EditError> {
//! let mut editor = YamlEditor::open(".tekton/pull.yaml")?;
//! let path = YamlPath::parse_json(r#"["spec", "tasks", 0, "params"]"#)?;
//! let value = serde_yaml::from_str("{name: depth, value: \"1\"}").unwrap();
//! editor.insert(&path, value)?;
//! # Ok(())
//! # }
//! ```

mod editor;
mod emit;
mod error;
mod loader;
mod path;

pub use editor::YamlEditor;
pub use emit::{emit_block, emit_entry, emit_seq_item};
pub use error::{EditError, Result};
pub use loader::{
    load_first_document, node_to_value, Document, MapEntry, MappingNode, Mark, Node, ScalarNode,
    ScalarStyle, SequenceNode,
};
pub use path::{Step, YamlPath};
