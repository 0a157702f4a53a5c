//! Gadget parameter schema: a small descriptor tree used both to generate the JSON
//! schema a model sees and to validate/coerce the arguments a model sends back.
//!
//! Leaf nodes describe scalars (`String`, `Number`, `Bool`, `Enum`, `Literal`); internal
//! nodes compose them (`Object`, `Array`, `Tuple`, `Record`, `Union`, `Intersect`,
//! `Optional`, `Default`). Validation walks the tree against a `serde_json::Value`;
//! coercion walks it against a JSON-pointer path for the block-form gadget call syntax
//! (`ARG:<path>\n<value>\n`), converting the string value found at each leaf into the
//! type the leaf describes.

use crate::error::{Error, Result};
use serde_json::{Map, Value};

/// A node in a gadget's parameter schema tree.
#[derive(Debug, Clone)]
pub enum SchemaNode {
    String,
    Number,
    Bool,
    Enum(Vec<String>),
    Literal(Value),
    Object(Vec<(String, SchemaNode)>),
    Array(Box<SchemaNode>),
    Tuple(Vec<SchemaNode>),
    /// A map with string keys and a uniform value schema.
    Record(Box<SchemaNode>),
    Union(Vec<SchemaNode>),
    Intersect(Vec<SchemaNode>),
    Optional(Box<SchemaNode>),
    Default(Box<SchemaNode>, Value),
}

impl SchemaNode {
    /// Convenience constructor for an object with required fields.
    pub fn object(fields: impl IntoIterator<Item = (&'static str, SchemaNode)>) -> Self {
        SchemaNode::Object(fields.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }

    /// Validate a JSON value against this schema node.
    pub fn validate(&self, value: &Value) -> Result<()> {
        match self {
            SchemaNode::String => {
                if value.is_string() {
                    Ok(())
                } else {
                    Err(Error::invalid_input(format!("expected string, got {}", value)))
                }
            }
            SchemaNode::Number => {
                if value.is_number() {
                    Ok(())
                } else {
                    Err(Error::invalid_input(format!("expected number, got {}", value)))
                }
            }
            SchemaNode::Bool => {
                if value.is_boolean() {
                    Ok(())
                } else {
                    Err(Error::invalid_input(format!("expected bool, got {}", value)))
                }
            }
            SchemaNode::Enum(variants) => {
                let s = value
                    .as_str()
                    .ok_or_else(|| Error::invalid_input(format!("expected string enum, got {}", value)))?;
                if variants.iter().any(|v| v == s) {
                    Ok(())
                } else {
                    Err(Error::invalid_input(format!(
                        "{:?} is not one of {:?}",
                        s, variants
                    )))
                }
            }
            SchemaNode::Literal(expected) => {
                if value == expected {
                    Ok(())
                } else {
                    Err(Error::invalid_input(format!(
                        "expected literal {}, got {}",
                        expected, value
                    )))
                }
            }
            SchemaNode::Object(fields) => {
                let obj = value
                    .as_object()
                    .ok_or_else(|| Error::invalid_input(format!("expected object, got {}", value)))?;
                for (key, schema) in fields {
                    match obj.get(key) {
                        Some(v) => schema.validate(v)?,
                        None => {
                            if !schema.is_optional() {
                                return Err(Error::invalid_input(format!(
                                    "missing required field '{}'",
                                    key
                                )));
                            }
                        }
                    }
                }
                Ok(())
            }
            SchemaNode::Array(item) => {
                let arr = value
                    .as_array()
                    .ok_or_else(|| Error::invalid_input(format!("expected array, got {}", value)))?;
                for (i, v) in arr.iter().enumerate() {
                    item.validate(v)
                        .map_err(|e| Error::invalid_input(format!("array[{}]: {}", i, e)))?;
                }
                Ok(())
            }
            SchemaNode::Tuple(items) => {
                let arr = value
                    .as_array()
                    .ok_or_else(|| Error::invalid_input(format!("expected tuple, got {}", value)))?;
                if arr.len() != items.len() {
                    return Err(Error::invalid_input(format!(
                        "expected tuple of length {}, got {}",
                        items.len(),
                        arr.len()
                    )));
                }
                for (schema, v) in items.iter().zip(arr.iter()) {
                    schema.validate(v)?;
                }
                Ok(())
            }
            SchemaNode::Record(value_schema) => {
                let obj = value
                    .as_object()
                    .ok_or_else(|| Error::invalid_input(format!("expected object, got {}", value)))?;
                for (key, v) in obj {
                    value_schema
                        .validate(v)
                        .map_err(|e| Error::invalid_input(format!("record[{}]: {}", key, e)))?;
                }
                Ok(())
            }
            SchemaNode::Union(options) => {
                if options.iter().any(|o| o.validate(value).is_ok()) {
                    Ok(())
                } else {
                    Err(Error::invalid_input(format!(
                        "value did not match any union member: {}",
                        value
                    )))
                }
            }
            SchemaNode::Intersect(parts) => {
                for part in parts {
                    part.validate(value)?;
                }
                Ok(())
            }
            SchemaNode::Optional(inner) => {
                if value.is_null() {
                    Ok(())
                } else {
                    inner.validate(value)
                }
            }
            SchemaNode::Default(inner, _) => inner.validate(value),
        }
    }

    fn is_optional(&self) -> bool {
        matches!(self, SchemaNode::Optional(_) | SchemaNode::Default(_, _))
    }

    /// Fill in defaults and return a normalized copy, recursing into objects/arrays.
    pub fn apply_defaults(&self, value: Value) -> Value {
        match self {
            SchemaNode::Default(_, default) if value.is_null() => default.clone(),
            SchemaNode::Object(fields) => {
                let mut obj = value.as_object().cloned().unwrap_or_default();
                for (key, schema) in fields {
                    let current = obj.remove(key).unwrap_or(Value::Null);
                    let filled = schema.apply_defaults(current);
                    if !filled.is_null() {
                        obj.insert(key.clone(), filled);
                    }
                }
                Value::Object(obj)
            }
            SchemaNode::Array(item) => match value {
                Value::Array(arr) => {
                    Value::Array(arr.into_iter().map(|v| item.apply_defaults(v)).collect())
                }
                other => other,
            },
            _ => value,
        }
    }

    /// Coerce a raw string (as found at a leaf in a block-form `ARG:<path>` call) into the
    /// JSON value type this leaf expects.
    pub fn coerce_leaf(&self, raw: &str) -> Result<Value> {
        match self {
            SchemaNode::String | SchemaNode::Enum(_) => Ok(Value::String(raw.to_string())),
            SchemaNode::Number => raw
                .trim()
                .parse::<f64>()
                .map(|n| serde_json::Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null))
                .map_err(|_| Error::invalid_input(format!("'{}' is not a valid number", raw))),
            SchemaNode::Bool => match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(Value::Bool(true)),
                "false" | "0" | "no" => Ok(Value::Bool(false)),
                _ => Err(Error::invalid_input(format!("'{}' is not a valid bool", raw))),
            },
            SchemaNode::Literal(v) => Ok(v.clone()),
            SchemaNode::Optional(inner) | SchemaNode::Default(inner, _) => inner.coerce_leaf(raw),
            other => Err(Error::invalid_input(format!(
                "cannot coerce a raw string into {:?}; use structured form instead",
                other
            ))),
        }
    }
}

/// Set a value at a JSON-pointer-style path (`a/b/0/c`) inside a JSON object, creating
/// intermediate objects/arrays as needed. Used by the block-form gadget call parser to
/// assemble a single arguments object from a sequence of `ARG:<path>` lines.
pub fn set_by_pointer(root: &mut Value, path: &str, value: Value) -> Result<()> {
    if path.is_empty() {
        *root = value;
        return Ok(());
    }

    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        *root = value;
        return Ok(());
    }

    if !root.is_object() {
        *root = Value::Object(Map::new());
    }

    let mut cursor = root;
    for (i, segment) in segments.iter().enumerate() {
        let is_last = i == segments.len() - 1;
        let obj = cursor
            .as_object_mut()
            .ok_or_else(|| Error::invalid_input(format!("cannot descend into non-object at '{}'", segment)))?;

        if is_last {
            obj.insert((*segment).to_string(), value);
            return Ok(());
        }

        cursor = obj
            .entry((*segment).to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }

    Ok(())
}
