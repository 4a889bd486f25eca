//! Payload-pattern compilation and evaluation.

use globset::{GlobBuilder, GlobMatcher};
use regex::Regex;
use serde_json::Value;

/// A compiled node of a capability's `payload` pattern tree.
pub enum CompiledNode {
    Object(Vec<(KeyMatcher, CompiledNode)>),
    OneOf(Vec<CompiledNode>),
    StringGlob(GlobMatcher),
    StringRegex(Regex),
    Number(serde_json::Number),
    Bool(bool),
    Null,
}

pub enum KeyMatcher {
    Literal(String),
    /// `"*"` - matches any single non-recursive key.
    AnyKey,
    /// `"**"` - matches any descendant, short-circuiting to true on the
    /// first match found at any depth.
    AnyDescendant,
    /// A `$`-prefixed JSONPath, evaluated against the whole envelope.
    JsonPath(String),
}

/// Compile a JSON pattern value into a `CompiledNode` tree, pre-compiling
/// every glob/regex leaf once at grant time rather than on every envelope.
pub fn compile_payload_pattern(value: &Value) -> Result<CompiledNode, String> {
    match value {
        Value::Object(map) => {
            let mut entries = Vec::with_capacity(map.len());
            for (key, sub) in map {
                let key_matcher = if key == "*" {
                    KeyMatcher::AnyKey
                } else if key == "**" {
                    KeyMatcher::AnyDescendant
                } else if let Some(path) = key.strip_prefix('$') {
                    KeyMatcher::JsonPath(format!("${path}"))
                } else {
                    KeyMatcher::Literal(key.clone())
                };
                entries.push((key_matcher, compile_payload_pattern(sub)?));
            }
            Ok(CompiledNode::Object(entries))
        }
        Value::Array(items) => {
            let compiled = items
                .iter()
                .map(compile_payload_pattern)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(CompiledNode::OneOf(compiled))
        }
        Value::String(s) => {
            if s.len() >= 2 && s.starts_with('/') && s.ends_with('/') {
                let inner = &s[1..s.len() - 1];
                let re =
                    Regex::new(inner).map_err(|e| format!("invalid payload regex /{inner}/: {e}"))?;
                Ok(CompiledNode::StringRegex(re))
            } else {
                let glob = GlobBuilder::new(s)
                    .build()
                    .map_err(|e| format!("invalid payload glob {s:?}: {e}"))?;
                Ok(CompiledNode::StringGlob(glob.compile_matcher()))
            }
        }
        Value::Number(n) => Ok(CompiledNode::Number(n.clone())),
        Value::Bool(b) => Ok(CompiledNode::Bool(*b)),
        Value::Null => Ok(CompiledNode::Null),
    }
}

/// Evaluate a compiled node against `value` (the envelope subtree currently
/// under consideration), with `root` the whole envelope as JSON for
/// JSONPath keys to search against. Never panics - a shape mismatch is
/// simply `false`.
pub fn eval_node(node: &CompiledNode, value: Option<&Value>, root: &Value) -> bool {
    match node {
        CompiledNode::Object(entries) => {
            let Some(Value::Object(map)) = value else {
                return false;
            };
            entries.iter().all(|(key, child)| match key {
                KeyMatcher::Literal(k) => map.get(k).is_some_and(|v| eval_node(child, Some(v), root)),
                KeyMatcher::AnyKey => map.values().any(|v| eval_node(child, Some(v), root)),
                KeyMatcher::AnyDescendant => {
                    any_descendant(&Value::Object(map.clone()), child, root)
                }
                KeyMatcher::JsonPath(path) => jsonpath_matches(path, child, root),
            })
        }
        CompiledNode::OneOf(options) => options.iter().any(|o| eval_node(o, value, root)),
        CompiledNode::StringGlob(g) => match value {
            Some(Value::String(s)) => g.is_match(s),
            _ => false,
        },
        CompiledNode::StringRegex(re) => match value {
            Some(Value::String(s)) => re.is_match(s),
            _ => false,
        },
        CompiledNode::Number(n) => matches!(value, Some(Value::Number(v)) if v == n),
        CompiledNode::Bool(b) => matches!(value, Some(Value::Bool(v)) if v == b),
        CompiledNode::Null => matches!(value, Some(Value::Null)),
    }
}

/// Existential search over every value reachable from `value` (including
/// itself), used by `"**"`.
fn any_descendant(value: &Value, child: &CompiledNode, root: &Value) -> bool {
    if eval_node(child, Some(value), root) {
        return true;
    }
    match value {
        Value::Object(map) => map.values().any(|v| any_descendant(v, child, root)),
        Value::Array(items) => items.iter().any(|v| any_descendant(v, child, root)),
        _ => false,
    }
}

/// Evaluate a JSONPath against the whole envelope and test each resulting
/// value against `child` - existential: at least one result must match.
fn jsonpath_matches(path: &str, child: &CompiledNode, root: &Value) -> bool {
    match jsonpath_lib::select(root, path) {
        Ok(values) => values.iter().any(|v| eval_node(child, Some(v), root)),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(pattern: Value, payload: Value) -> bool {
        let node = compile_payload_pattern(&pattern).unwrap();
        let root = serde_json::json!({ "payload": payload.clone() });
        eval_node(&node, Some(&payload), &root)
    }

    #[test]
    fn literal_key_requires_matching_value() {
        assert!(check(
            serde_json::json!({"method": "tools/list"}),
            serde_json::json!({"method": "tools/list"})
        ));
        assert!(!check(
            serde_json::json!({"method": "tools/list"}),
            serde_json::json!({"method": "tools/call"})
        ));
    }

    #[test]
    fn glob_leaf_matches_by_segment() {
        assert!(check(
            serde_json::json!({"params": {"name": "read_*"}}),
            serde_json::json!({"params": {"name": "read_file"}})
        ));
        assert!(!check(
            serde_json::json!({"params": {"name": "read_*"}}),
            serde_json::json!({"params": {"name": "write_file"}})
        ));
    }

    #[test]
    fn missing_key_is_false_not_error() {
        assert!(!check(
            serde_json::json!({"method": "tools/list"}),
            serde_json::json!({"other": "value"})
        ));
    }

    #[test]
    fn any_key_is_existential() {
        assert!(check(
            serde_json::json!({"*": "dangerous"}),
            serde_json::json!({"a": "safe", "b": "dangerous"})
        ));
        assert!(!check(
            serde_json::json!({"*": "dangerous"}),
            serde_json::json!({"a": "safe", "b": "also-safe"})
        ));
    }

    #[test]
    fn any_descendant_searches_nested_structure() {
        assert!(check(
            serde_json::json!({"**": "/dangerous/"}),
            serde_json::json!({"outer": {"inner": "potential /dangerous/ command"}})
        ));
        assert!(!check(
            serde_json::json!({"**": "/dangerous/"}),
            serde_json::json!({"outer": {"inner": "benign text"}})
        ));
    }

    #[test]
    fn array_pattern_is_set_of_acceptable_literals() {
        assert!(check(
            serde_json::json!({"name": ["read_file", "list_files"]}),
            serde_json::json!({"name": "list_files"})
        ));
        assert!(!check(
            serde_json::json!({"name": ["read_file", "list_files"]}),
            serde_json::json!({"name": "write_file"})
        ));
    }

    #[test]
    fn number_and_bool_leaves_require_equality() {
        assert!(check(
            serde_json::json!({"count": 2, "enabled": true}),
            serde_json::json!({"count": 2, "enabled": true})
        ));
        assert!(!check(
            serde_json::json!({"count": 2}),
            serde_json::json!({"count": 3})
        ));
    }

    #[test]
    fn jsonpath_key_evaluates_against_whole_envelope() {
        let pattern = serde_json::json!({"$.from": "alice"});
        let node = compile_payload_pattern(&pattern).unwrap();
        let root = serde_json::json!({"from": "alice", "payload": {"text": "hi"}});
        assert!(eval_node(&node, Some(&root["payload"]), &root));

        let root_other = serde_json::json!({"from": "bob", "payload": {"text": "hi"}});
        assert!(!eval_node(&node, Some(&root_other["payload"]), &root_other));
    }
}
