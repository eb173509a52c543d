//! Structural deep merge with sequence directives.

use serde_json::{Map, Value};

use super::expr::{tokenize, Token};
use super::{child_path, operator_body, Document, MergeError};

/// Directive placed as the first element of an overlay sequence.
#[derive(Debug, Clone, PartialEq)]
enum SequenceDirective {
    Append,
    Prepend,
    Replace,
    /// Index-wise deep merge; surplus elements from either side are kept.
    Inline,
    /// Drop base elements equal to one of the literals, or mappings whose
    /// `name` equals one of them. Remaining overlay elements are appended.
    Delete(Vec<Value>),
}

impl SequenceDirective {
    fn parse(value: &Value, path: &str) -> Result<Option<Self>, MergeError> {
        let Some(body) = value.as_str().and_then(operator_body) else {
            return Ok(None);
        };

        let (name, args) = match body.split_once(char::is_whitespace) {
            Some((name, args)) => (name, args.trim()),
            None => (body, ""),
        };

        let invalid = |reason: &str| MergeError::InvalidDirective {
            path: path.to_string(),
            directive: body.to_string(),
            reason: reason.to_string(),
        };

        let directive = match name {
            "append" => SequenceDirective::Append,
            "prepend" => SequenceDirective::Prepend,
            "replace" => SequenceDirective::Replace,
            "inline" => SequenceDirective::Inline,
            "delete" => {
                let tokens = tokenize(args).map_err(|reason| invalid(&reason))?;
                if tokens.is_empty() {
                    return Err(invalid("delete needs at least one value"));
                }
                let mut targets = Vec::with_capacity(tokens.len());
                for token in tokens {
                    match token {
                        Token::Literal(value) => targets.push(value),
                        // Bare words are element names here, not references.
                        Token::Word(word) => targets.push(Value::String(word)),
                        Token::Or => return Err(invalid("'||' is not allowed in delete")),
                    }
                }
                return Ok(Some(SequenceDirective::Delete(targets)));
            }
            // Not a directive; possibly an expression for the evaluator.
            _ => return Ok(None),
        };

        if !args.is_empty() {
            return Err(invalid("directive takes no arguments"));
        }

        Ok(Some(directive))
    }
}

/// Merge two documents, overlay winning. See the module docs for the rules.
pub fn merge_documents(base: Document, overlay: Document) -> Result<Document, MergeError> {
    merge_maps(base, overlay, "")
}

/// Deep merge two values, overlay winning.
pub fn deep_merge(base: Value, overlay: Value) -> Result<Value, MergeError> {
    merge_values(base, overlay, "")
}

fn merge_maps(
    mut base: Map<String, Value>,
    overlay: Map<String, Value>,
    path: &str,
) -> Result<Map<String, Value>, MergeError> {
    for (key, overlay_value) in overlay {
        let key_path = child_path(path, &key);
        let merged = match base.remove(&key) {
            Some(base_value) => merge_values(base_value, overlay_value, &key_path)?,
            None => normalize(overlay_value, &key_path)?,
        };
        base.insert(key, merged);
    }
    Ok(base)
}

fn merge_values(base: Value, overlay: Value, path: &str) -> Result<Value, MergeError> {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            Ok(Value::Object(merge_maps(base_map, overlay_map, path)?))
        }
        (Value::Array(base_items), Value::Array(overlay_items)) => {
            merge_sequences(base_items, overlay_items, path)
        }
        // Scalars, null and type changes: overlay wins
        (_, overlay) => normalize(overlay, path),
    }
}

fn merge_sequences(
    base: Vec<Value>,
    mut overlay: Vec<Value>,
    path: &str,
) -> Result<Value, MergeError> {
    let directive = match overlay.first() {
        Some(first) => SequenceDirective::parse(first, path)?,
        None => None,
    };

    let Some(directive) = directive else {
        return normalize_sequence(overlay, path);
    };

    let rest = overlay.split_off(1);

    let merged = match directive {
        SequenceDirective::Inline => {
            let mut merged = Vec::with_capacity(base.len().max(rest.len()));
            let mut base_items = base.into_iter();
            let mut rest_items = rest.into_iter();
            let mut index = 0usize;
            loop {
                let item_path = child_path(path, &index.to_string());
                match (base_items.next(), rest_items.next()) {
                    (Some(b), Some(o)) => merged.push(merge_values(b, o, &item_path)?),
                    (Some(b), None) => merged.push(b),
                    (None, Some(o)) => merged.push(normalize(o, &item_path)?),
                    (None, None) => break,
                }
                index += 1;
            }
            merged
        }
        SequenceDirective::Append => {
            let mut merged = base;
            merged.extend(normalize_items(rest, path)?);
            merged
        }
        SequenceDirective::Prepend => {
            let mut merged = normalize_items(rest, path)?;
            merged.extend(base);
            merged
        }
        SequenceDirective::Replace => normalize_items(rest, path)?,
        SequenceDirective::Delete(targets) => {
            let mut merged: Vec<Value> = base
                .into_iter()
                .filter(|item| !targets.iter().any(|target| is_delete_target(item, target)))
                .collect();
            merged.extend(normalize_items(rest, path)?);
            merged
        }
    };

    Ok(Value::Array(merged))
}

fn is_delete_target(item: &Value, target: &Value) -> bool {
    item == target || item.get("name").is_some_and(|name| name == target)
}

/// Strips directives from a value that has nothing to merge with.
fn normalize(value: Value, path: &str) -> Result<Value, MergeError> {
    match value {
        Value::Object(map) => {
            let mut normalized = Map::with_capacity(map.len());
            for (key, value) in map {
                let key_path = child_path(path, &key);
                normalized.insert(key, normalize(value, &key_path)?);
            }
            Ok(Value::Object(normalized))
        }
        Value::Array(items) => merge_sequences(Vec::new(), items, path),
        other => Ok(other),
    }
}

fn normalize_sequence(items: Vec<Value>, path: &str) -> Result<Value, MergeError> {
    Ok(Value::Array(normalize_items(items, path)?))
}

fn normalize_items(items: Vec<Value>, path: &str) -> Result<Vec<Value>, MergeError> {
    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| normalize(item, &child_path(path, &index.to_string())))
        .collect()
}
