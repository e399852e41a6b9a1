//! Paths into a YAML document.
//!
//! A path is a sequence of mapping keys and sequence indexes, the same
//! shape `yq`'s `path` function prints. On the CLI a path is written as a
//! JSON array, e.g. `["spec", "tasks", 0, "params"]`.

use std::fmt;

use crate::error::EditError;

/// One step of a [`YamlPath`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Key(String),
    Index(usize),
}

impl From<&str> for Step {
    fn from(key: &str) -> Self {
        Step::Key(key.to_string())
    }
}

impl From<usize> for Step {
    fn from(index: usize) -> Self {
        Step::Index(index)
    }
}

/// A path from the document root to a node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct YamlPath(pub Vec<Step>);

impl YamlPath {
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a JSON array of strings and non-negative integers.
    pub fn parse_json(input: &str) -> Result<Self, EditError> {
        let raw: serde_json::Value = serde_json::from_str(input)
            .map_err(|e| EditError::InvalidEdit(format!("YAML path is not valid JSON: {e}")))?;
        let items = raw.as_array().ok_or_else(|| {
            EditError::InvalidEdit("YAML path must be a JSON array of keys and indexes".into())
        })?;
        let mut steps = Vec::with_capacity(items.len());
        for item in items {
            match item {
                serde_json::Value::String(key) => steps.push(Step::Key(key.clone())),
                serde_json::Value::Number(n) => {
                    let index = n.as_u64().ok_or_else(|| {
                        EditError::InvalidEdit(format!("{n} is not a valid sequence index"))
                    })?;
                    steps.push(Step::Index(index as usize));
                }
                other => {
                    return Err(EditError::InvalidEdit(format!(
                        "YAML path elements must be strings or integers, got {other}"
                    )))
                }
            }
        }
        Ok(YamlPath(steps))
    }

    pub fn steps(&self) -> &[Step] {
        &self.0
    }

    pub fn push(&mut self, step: impl Into<Step>) {
        self.0.push(step.into());
    }

    pub fn join(&self, step: impl Into<Step>) -> Self {
        let mut steps = self.0.clone();
        steps.push(step.into());
        YamlPath(steps)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<Step>> for YamlPath {
    fn from(steps: Vec<Step>) -> Self {
        YamlPath(steps)
    }
}

impl fmt::Display for YamlPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, ".");
        }
        for step in &self.0 {
            match step {
                Step::Key(key) => write!(f, ".{key}")?,
                Step::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

/// Render a slice of steps for error messages.
pub(crate) fn display_steps(steps: &[Step]) -> String {
    YamlPath(steps.to_vec()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_path() {
        let path = YamlPath::parse_json(r#"["spec", "tasks", 0, "params"]"#).unwrap();
        assert_eq!(
            path.steps(),
            &[
                Step::Key("spec".into()),
                Step::Key("tasks".into()),
                Step::Index(0),
                Step::Key("params".into()),
            ]
        );
        assert_eq!(path.to_string(), ".spec.tasks[0].params");
    }

    #[test]
    fn test_parse_rejects_invalid_elements() {
        assert!(YamlPath::parse_json(r#"["a", -1]"#).is_err());
        assert!(YamlPath::parse_json(r#"["a", {"b": 1}]"#).is_err());
        assert!(YamlPath::parse_json(r#""a""#).is_err());
        assert!(YamlPath::parse_json("not json").is_err());
    }
}
