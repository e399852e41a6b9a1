//! Located YAML node tree.
//!
//! The editor needs to know where every node starts in the source text.
//! `serde_yaml` discards positions, so the tree is built from the
//! `yaml-rust2` event stream, which reports a marker per event. Only the
//! first non-empty document is materialized; the surrounding text is left
//! alone by the editor.

use yaml_rust2::parser::{Event, MarkedEventReceiver, Parser};
use yaml_rust2::scanner::{Marker, TScalarStyle};

use crate::error::EditError;
use crate::path::Step;

/// Zero-based source position of a node's first token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mark {
    pub line: usize,
    /// Column in characters, matching the scanner's notion.
    pub col: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarStyle {
    Plain,
    SingleQuoted,
    DoubleQuoted,
    Literal,
    Folded,
}

#[derive(Debug, Clone)]
pub struct ScalarNode {
    pub value: String,
    pub style: ScalarStyle,
    pub mark: Mark,
}

impl ScalarNode {
    /// Whether this scalar denotes YAML null.
    pub fn is_null(&self) -> bool {
        self.style == ScalarStyle::Plain
            && matches!(self.value.as_str(), "" | "~" | "null" | "Null" | "NULL")
    }
}

#[derive(Debug, Clone)]
pub struct SequenceNode {
    pub items: Vec<Node>,
    pub mark: Mark,
    pub flow: bool,
}

#[derive(Debug, Clone)]
pub struct MapEntry {
    pub key: ScalarNode,
    pub value: Node,
}

#[derive(Debug, Clone)]
pub struct MappingNode {
    pub entries: Vec<MapEntry>,
    pub mark: Mark,
    pub flow: bool,
}

impl MappingNode {
    pub fn get(&self, key: &str) -> Option<&Node> {
        self.entry(key).map(|e| &e.value)
    }

    pub fn entry(&self, key: &str) -> Option<&MapEntry> {
        self.entries.iter().find(|e| e.key.value == key)
    }

    pub fn index_of(&self, key: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.key.value == key)
    }
}

#[derive(Debug, Clone)]
pub enum Node {
    Scalar(ScalarNode),
    Sequence(SequenceNode),
    Mapping(MappingNode),
}

impl Node {
    pub fn mark(&self) -> Mark {
        match self {
            Node::Scalar(s) => s.mark,
            Node::Sequence(s) => s.mark,
            Node::Mapping(m) => m.mark,
        }
    }

    pub fn is_flow(&self) -> bool {
        match self {
            Node::Scalar(_) => false,
            Node::Sequence(s) => s.flow,
            Node::Mapping(m) => m.flow,
        }
    }

    pub fn as_scalar(&self) -> Option<&ScalarNode> {
        match self {
            Node::Scalar(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&SequenceNode> {
        match self {
            Node::Sequence(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_mapping(&self) -> Option<&MappingNode> {
        match self {
            Node::Mapping(m) => Some(m),
            _ => None,
        }
    }

    /// Number of children for containers.
    pub fn container_len(&self) -> Option<usize> {
        match self {
            Node::Scalar(_) => None,
            Node::Sequence(s) => Some(s.items.len()),
            Node::Mapping(m) => Some(m.entries.len()),
        }
    }

    pub fn child(&self, step: &Step) -> Option<&Node> {
        match (self, step) {
            (Node::Mapping(m), Step::Key(key)) => m.get(key),
            (Node::Sequence(s), Step::Index(index)) => s.items.get(*index),
            _ => None,
        }
    }
}

/// The first non-empty document of a file.
#[derive(Debug, Clone)]
pub struct Document {
    pub root: Node,
    /// Exclusive line where the document's content ends. Appends must not
    /// cross into a following document.
    pub end_line: usize,
}

enum Frame {
    Sequence(SequenceNode),
    Mapping {
        node: MappingNode,
        pending_key: Option<ScalarNode>,
    },
}

struct TreeBuilder<'a> {
    lines: &'a [&'a str],
    stack: Vec<Frame>,
    pending_root: Option<Node>,
    docs: Vec<Document>,
    error: Option<EditError>,
}

impl<'a> TreeBuilder<'a> {
    fn new(lines: &'a [&'a str]) -> Self {
        Self {
            lines,
            stack: Vec::new(),
            pending_root: None,
            docs: Vec::new(),
            error: None,
        }
    }

    fn mark(&self, marker: Marker) -> Mark {
        Mark {
            line: marker.line().saturating_sub(1),
            col: marker.col(),
        }
    }

    fn char_at(&self, mark: Mark) -> Option<char> {
        self.lines.get(mark.line)?.chars().nth(mark.col)
    }

    fn push_value(&mut self, node: Node) {
        match self.stack.last_mut() {
            None => self.pending_root = Some(node),
            Some(Frame::Sequence(seq)) => seq.items.push(node),
            Some(Frame::Mapping { node: map, pending_key }) => match pending_key.take() {
                None => match node {
                    Node::Scalar(scalar) => *pending_key = Some(scalar),
                    _ => {
                        self.error
                            .get_or_insert(EditError::Unsupported("complex mapping keys".into()));
                    }
                },
                Some(key) => map.entries.push(MapEntry { key, value: node }),
            },
        }
    }
}

impl MarkedEventReceiver for TreeBuilder<'_> {
    fn on_event(&mut self, ev: Event, marker: Marker) {
        if self.error.is_some() {
            return;
        }
        let mark = self.mark(marker);
        match ev {
            Event::Scalar(value, style, ..) => {
                let style = match style {
                    TScalarStyle::SingleQuoted => ScalarStyle::SingleQuoted,
                    TScalarStyle::DoubleQuoted => ScalarStyle::DoubleQuoted,
                    TScalarStyle::Literal => ScalarStyle::Literal,
                    TScalarStyle::Folded => ScalarStyle::Folded,
                    _ => ScalarStyle::Plain,
                };
                self.push_value(Node::Scalar(ScalarNode { value, style, mark }));
            }
            Event::SequenceStart(..) => {
                let flow = self.char_at(mark) == Some('[');
                self.stack.push(Frame::Sequence(SequenceNode {
                    items: Vec::new(),
                    mark,
                    flow,
                }));
            }
            Event::SequenceEnd => {
                if let Some(Frame::Sequence(seq)) = self.stack.pop() {
                    self.push_value(Node::Sequence(seq));
                }
            }
            Event::MappingStart(..) => {
                let flow = self.char_at(mark) == Some('{');
                self.stack.push(Frame::Mapping {
                    node: MappingNode {
                        entries: Vec::new(),
                        mark,
                        flow,
                    },
                    pending_key: None,
                });
            }
            Event::MappingEnd => {
                if let Some(Frame::Mapping { node, .. }) = self.stack.pop() {
                    self.push_value(Node::Mapping(node));
                }
            }
            Event::DocumentEnd => {
                if let Some(root) = self.pending_root.take() {
                    self.docs.push(Document {
                        root,
                        end_line: mark.line,
                    });
                }
            }
            Event::Alias(_) => {
                self.error
                    .get_or_insert(EditError::Unsupported("YAML anchors and aliases".into()));
            }
            _ => {}
        }
    }
}

/// Parse `text` and return its first non-empty document.
pub fn load_first_document(text: &str) -> Result<Document, EditError> {
    let lines: Vec<&str> = text.lines().collect();
    let mut builder = TreeBuilder::new(&lines);
    let mut parser = Parser::new_from_str(text);
    parser
        .load(&mut builder, true)
        .map_err(|e| EditError::Parse(e.to_string()))?;
    if let Some(error) = builder.error {
        return Err(error);
    }
    let sole_document = builder.docs.len() == 1;
    builder
        .docs
        .into_iter()
        .find(|doc| match &doc.root {
            Node::Scalar(s) => !s.is_null(),
            _ => true,
        })
        .map(|mut doc| {
            if sole_document {
                doc.end_line = lines.len();
            } else {
                doc.end_line = doc.end_line.min(lines.len());
            }
            doc
        })
        .ok_or_else(|| EditError::Parse("no YAML document found".into()))
}

/// Validate that `text` is parseable YAML.
pub fn check_valid(text: &str) -> Result<(), EditError> {
    let lines: Vec<&str> = text.lines().collect();
    let mut builder = TreeBuilder::new(&lines);
    let mut parser = Parser::new_from_str(text);
    parser
        .load(&mut builder, true)
        .map_err(|e| EditError::Parse(e.to_string()))?;
    Ok(())
}

/// Convert a located node into a plain value for re-emission.
///
/// Plain scalars keep their typed interpretation so numbers and booleans
/// are not quoted when written back.
pub fn node_to_value(node: &Node) -> serde_yaml::Value {
    match node {
        Node::Scalar(scalar) => scalar_to_value(scalar),
        Node::Sequence(seq) => {
            serde_yaml::Value::Sequence(seq.items.iter().map(node_to_value).collect())
        }
        Node::Mapping(map) => {
            let mut out = serde_yaml::Mapping::new();
            for entry in &map.entries {
                out.insert(
                    serde_yaml::Value::String(entry.key.value.clone()),
                    node_to_value(&entry.value),
                );
            }
            serde_yaml::Value::Mapping(out)
        }
    }
}

fn scalar_to_value(scalar: &ScalarNode) -> serde_yaml::Value {
    if scalar.style != ScalarStyle::Plain {
        return serde_yaml::Value::String(scalar.value.clone());
    }
    if scalar.is_null() {
        return serde_yaml::Value::Null;
    }
    match scalar.value.as_str() {
        "true" => return serde_yaml::Value::Bool(true),
        "false" => return serde_yaml::Value::Bool(false),
        _ => {}
    }
    if let Ok(n) = scalar.value.parse::<i64>() {
        return serde_yaml::Value::Number(n.into());
    }
    if let Ok(f) = scalar.value.parse::<f64>() {
        if scalar.value.contains(['.', 'e', 'E']) {
            return serde_yaml::Value::Number(serde_yaml::Number::from(f));
        }
    }
    serde_yaml::Value::String(scalar.value.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
apiVersion: tekton.dev/v1
kind: Pipeline
spec:
  tasks:
    - name: clone
      params:
        - name: url
          value: https://example.com
";

    #[test]
    fn test_marks_point_at_nodes() {
        let doc = load_first_document(SAMPLE).unwrap();
        let root = doc.root.as_mapping().unwrap();
        assert_eq!(root.mark, Mark { line: 0, col: 0 });

        let spec = root.get("spec").unwrap().as_mapping().unwrap();
        assert_eq!(spec.mark, Mark { line: 3, col: 2 });

        let tasks = spec.get("tasks").unwrap().as_sequence().unwrap();
        assert!(!tasks.flow);
        // The sequence starts at its first dash.
        assert_eq!(tasks.mark, Mark { line: 4, col: 4 });

        let task = tasks.items[0].as_mapping().unwrap();
        assert_eq!(task.mark, Mark { line: 4, col: 6 });

        let key = &task.entry("params").unwrap().key;
        assert_eq!(key.mark, Mark { line: 5, col: 6 });
    }

    #[test]
    fn test_flow_detection() {
        let doc = load_first_document("labels: {app: demo}\nitems: [1, 2]\n").unwrap();
        let root = doc.root.as_mapping().unwrap();
        assert!(root.get("labels").unwrap().is_flow());
        assert!(root.get("items").unwrap().is_flow());
        assert!(!doc.root.is_flow());
    }

    #[test]
    fn test_first_non_empty_document_wins() {
        let doc = load_first_document("---\n---\nkind: Pipeline\n---\nkind: Other\n").unwrap();
        let root = doc.root.as_mapping().unwrap();
        assert_eq!(
            root.get("kind").unwrap().as_scalar().unwrap().value,
            "Pipeline"
        );
        // The document ends before the following one starts.
        assert!(doc.end_line <= 3);
    }

    #[test]
    fn test_sole_document_ends_at_eof() {
        let doc = load_first_document("kind: Pipeline\n\n# trailing\n").unwrap();
        assert_eq!(doc.end_line, 3);
    }

    #[test]
    fn test_aliases_are_rejected() {
        let err = load_first_document("a: &x 1\nb: *x\n").unwrap_err();
        assert!(matches!(err, EditError::Unsupported(_)));
    }

    #[test]
    fn test_node_to_value_types() {
        let doc = load_first_document("a: 1\nb: '2'\nc: true\nd:\ne: text\n").unwrap();
        let value = node_to_value(&doc.root);
        assert_eq!(value["a"], serde_yaml::Value::Number(1.into()));
        assert_eq!(value["b"], serde_yaml::Value::String("2".into()));
        assert_eq!(value["c"], serde_yaml::Value::Bool(true));
        assert_eq!(value["d"], serde_yaml::Value::Null);
        assert_eq!(value["e"], serde_yaml::Value::String("text".into()));
    }
}
