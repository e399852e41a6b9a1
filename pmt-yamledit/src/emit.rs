//! Block-style YAML emission for spliced regions.
//!
//! Only the region being edited is ever generated; everything else in the
//! file keeps its original bytes. The emitter therefore produces plain
//! block YAML with a configurable sequence indentation so inserted text
//! blends into the surrounding document.

use serde_yaml::Value;

/// Render a value as block YAML, every line indented to `col`.
pub fn emit_block(value: &Value, col: usize, seq_indent: usize) -> String {
    let indent = " ".repeat(col);
    match value {
        Value::Mapping(map) => {
            if map.is_empty() {
                return format!("{indent}{{}}");
            }
            map.iter()
                .map(|(key, val)| emit_entry(&key_string(key), val, col, seq_indent))
                .collect::<Vec<_>>()
                .join("\n")
        }
        Value::Sequence(items) => {
            if items.is_empty() {
                return format!("{indent}[]");
            }
            items
                .iter()
                .map(|item| emit_seq_item(item, col, seq_indent))
                .collect::<Vec<_>>()
                .join("\n")
        }
        scalar => format!("{indent}{}", emit_scalar(scalar)),
    }
}

/// Render one `key: value` mapping entry at column `col`.
pub fn emit_entry(key: &str, value: &Value, col: usize, seq_indent: usize) -> String {
    let indent = " ".repeat(col);
    let key = scalar_string(key);
    match value {
        Value::Mapping(map) if !map.is_empty() => {
            format!(
                "{indent}{key}:\n{}",
                emit_block(value, col + 2, seq_indent)
            )
        }
        Value::Sequence(items) if !items.is_empty() => {
            format!(
                "{indent}{key}:\n{}",
                emit_block(value, col + seq_indent, seq_indent)
            )
        }
        Value::Mapping(_) => format!("{indent}{key}: {{}}"),
        Value::Sequence(_) => format!("{indent}{key}: []"),
        Value::Null => format!("{indent}{key}:"),
        scalar => format!("{indent}{key}: {}", emit_scalar(scalar)),
    }
}

/// Render one sequence item with its dash at `dash_col`.
pub fn emit_seq_item(value: &Value, dash_col: usize, seq_indent: usize) -> String {
    let indent = " ".repeat(dash_col);
    match value {
        Value::Mapping(map) if !map.is_empty() => {
            let mut text = emit_block(value, dash_col + 2, seq_indent);
            text.replace_range(dash_col..dash_col + 2, "- ");
            text
        }
        Value::Sequence(items) if !items.is_empty() => {
            let mut text = emit_block(value, dash_col + 2, seq_indent);
            text.replace_range(dash_col..dash_col + 2, "- ");
            text
        }
        Value::Mapping(_) => format!("{indent}- {{}}"),
        Value::Sequence(_) => format!("{indent}- []"),
        scalar => format!("{indent}- {}", emit_scalar(scalar)),
    }
}

/// Render a scalar value on a single line, or `None` for containers.
pub fn emit_scalar_opt(value: &Value) -> Option<String> {
    match value {
        Value::Mapping(_) | Value::Sequence(_) => None,
        Value::Tagged(tagged) => emit_scalar_opt(&tagged.value),
        scalar => Some(emit_scalar(scalar)),
    }
}

fn emit_scalar(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => scalar_string(s),
        Value::Tagged(tagged) => emit_scalar(&tagged.value),
        Value::Mapping(_) | Value::Sequence(_) => "null".to_string(),
    }
}

fn key_string(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        other => emit_scalar(other),
    }
}

/// Quote a string when plain style would change its meaning.
fn scalar_string(s: &str) -> String {
    if needs_quotes(s) {
        let mut out = String::with_capacity(s.len() + 2);
        out.push('"');
        for c in s.chars() {
            match c {
                '"' => out.push_str("\\\""),
                '\\' => out.push_str("\\\\"),
                '\n' => out.push_str("\\n"),
                '\t' => out.push_str("\\t"),
                c => out.push(c),
            }
        }
        out.push('"');
        out
    } else {
        s.to_string()
    }
}

fn needs_quotes(s: &str) -> bool {
    if s.is_empty() {
        return true;
    }
    if s.trim() != s {
        return true;
    }
    let lowered = s.to_ascii_lowercase();
    if matches!(
        lowered.as_str(),
        "true" | "false" | "null" | "~" | "yes" | "no" | "on" | "off"
    ) {
        return true;
    }
    if s.parse::<f64>().is_ok() {
        return true;
    }
    let first = s.chars().next().unwrap();
    if "-?:,[]{}#&*!|>'\"%@`".contains(first) {
        return true;
    }
    s.contains(": ") || s.ends_with(':') || s.contains(" #") || s.contains(['\n', '\t'])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value(yaml: &str) -> Value {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_emit_entry_with_nested_sequence() {
        let params = value(r#"[{name: depth, value: shallow}]"#);
        assert_eq!(
            emit_entry("params", &params, 6, 2),
            "      params:\n        - name: depth\n          value: shallow"
        );
    }

    #[test]
    fn test_emit_entry_zero_indented_sequence() {
        let run_after = value(r#"[clone, lint]"#);
        assert_eq!(
            emit_entry("runAfter", &run_after, 4, 0),
            "    runAfter:\n    - clone\n    - lint"
        );
    }

    #[test]
    fn test_emit_seq_item_compact_mapping() {
        let item = value(r#"{name: depth, value: shallow}"#);
        assert_eq!(
            emit_seq_item(&item, 4, 2),
            "    - name: depth\n      value: shallow"
        );
    }

    #[test]
    fn test_emit_scalar_quoting() {
        assert_eq!(emit_scalar(&Value::String("plain".into())), "plain");
        assert_eq!(emit_scalar(&Value::String("1".into())), "\"1\"");
        assert_eq!(emit_scalar(&Value::String("true".into())), "\"true\"");
        assert_eq!(emit_scalar(&Value::String("".into())), "\"\"");
        assert_eq!(emit_scalar(&Value::String("a: b".into())), "\"a: b\"");
        assert_eq!(emit_scalar(&Value::Bool(true)), "true");
        assert_eq!(emit_scalar(&Value::Number(3.into())), "3");
    }

    #[test]
    fn test_emit_block_nested() {
        let task = value(
            r#"{name: sast, taskRef: {resolver: bundles, params: [{name: kind, value: task}]}}"#,
        );
        assert_eq!(
            emit_block(&task, 0, 2),
            "name: sast\n\
             taskRef:\n\
             \x20 resolver: bundles\n\
             \x20 params:\n\
             \x20   - name: kind\n\
             \x20     value: task"
        );
    }
}
