//! Schema descriptor AST
//!
//! A descriptor is a JSON tree of `{ "type": ..., "definition": { ... } }`
//! nodes. It is parsed into [`SchemaNode`], a tagged union with one variant
//! per node kind. Unknown or missing `type` values parse to
//! [`SchemaNode::Unrecognized`], which validates anything: contracts written
//! against a newer or older descriptor vocabulary keep working.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::error::{SchemaError, SchemaResult};

/// Node kinds, as spelled in the `type` field of a descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    String,
    Number,
    Boolean,
    Array,
    Object,
    Enum,
    Literal,
    Date,
    Null,
    Undefined,
    Any,
    Unknown,
    Union,
    Optional,
    Nullable,
    Unrecognized,
}

impl NodeKind {
    fn from_type_name(name: &str) -> Self {
        match name {
            "string" => NodeKind::String,
            "number" => NodeKind::Number,
            "boolean" => NodeKind::Boolean,
            "array" => NodeKind::Array,
            "object" => NodeKind::Object,
            "enum" => NodeKind::Enum,
            "literal" => NodeKind::Literal,
            "date" => NodeKind::Date,
            "null" => NodeKind::Null,
            "undefined" => NodeKind::Undefined,
            "any" => NodeKind::Any,
            "unknown" => NodeKind::Unknown,
            "union" => NodeKind::Union,
            "optional" => NodeKind::Optional,
            "nullable" => NodeKind::Nullable,
            _ => NodeKind::Unrecognized,
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeKind::String => "string",
            NodeKind::Number => "number",
            NodeKind::Boolean => "boolean",
            NodeKind::Array => "array",
            NodeKind::Object => "object",
            NodeKind::Enum => "enum",
            NodeKind::Literal => "literal",
            NodeKind::Date => "date",
            NodeKind::Null => "null",
            NodeKind::Undefined => "undefined",
            NodeKind::Any => "any",
            NodeKind::Unknown => "unknown",
            NodeKind::Union => "union",
            NodeKind::Optional => "optional",
            NodeKind::Nullable => "nullable",
            NodeKind::Unrecognized => "unrecognized",
        };
        write!(f, "{}", name)
    }
}

/// Well-known string formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StringFormat {
    Email,
    Url,
    Uuid,
    Datetime,
}

impl StringFormat {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "email" => Some(StringFormat::Email),
            "url" => Some(StringFormat::Url),
            "uuid" => Some(StringFormat::Uuid),
            "datetime" | "date-time" => Some(StringFormat::Datetime),
            _ => None,
        }
    }
}

impl fmt::Display for StringFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StringFormat::Email => write!(f, "email"),
            StringFormat::Url => write!(f, "url"),
            StringFormat::Uuid => write!(f, "uuid"),
            StringFormat::Datetime => write!(f, "datetime"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StringDef {
    pub min: Option<usize>,
    pub max: Option<usize>,
    pub length: Option<usize>,
    pub pattern: Option<String>,
    pub format: Option<StringFormat>,
}

/// Sign constraint for numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sign {
    Positive,
    Negative,
    NonNegative,
    NonPositive,
}

impl Sign {
    pub fn admits(&self, n: f64) -> bool {
        match self {
            Sign::Positive => n > 0.0,
            Sign::Negative => n < 0.0,
            Sign::NonNegative => n >= 0.0,
            Sign::NonPositive => n <= 0.0,
        }
    }
}

impl fmt::Display for Sign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sign::Positive => write!(f, "positive"),
            Sign::Negative => write!(f, "negative"),
            Sign::NonNegative => write!(f, "nonnegative"),
            Sign::NonPositive => write!(f, "nonpositive"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NumberDef {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub int: bool,
    pub signs: Vec<Sign>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArrayDef {
    pub items: Box<SchemaNode>,
    pub min: Option<usize>,
    pub max: Option<usize>,
}

/// Treatment of keys not declared in an object's shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnknownKeys {
    /// Drop undeclared keys from the validated output
    #[default]
    Strip,
    /// Keep undeclared keys as-is
    Passthrough,
    /// Fail validation on undeclared keys
    Strict,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObjectDef {
    /// Declared fields in descriptor order
    pub shape: Vec<(String, SchemaNode)>,
    pub unknown_keys: UnknownKeys,
}

impl ObjectDef {
    pub fn field(&self, name: &str) -> Option<&SchemaNode> {
        self.shape.iter().find(|(k, _)| k == name).map(|(_, n)| n)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DateDef {
    pub min: Option<DateTime<Utc>>,
    pub max: Option<DateTime<Utc>>,
}

/// A parsed schema descriptor node
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaNode {
    String(StringDef),
    Number(NumberDef),
    Boolean,
    Array(ArrayDef),
    Object(ObjectDef),
    Enum(Vec<String>),
    Literal(Value),
    Date(DateDef),
    Null,
    Undefined,
    Any,
    Unknown,
    Union(Vec<SchemaNode>),
    Optional(Box<SchemaNode>),
    Nullable(Box<SchemaNode>),
    /// Missing or unrecognized `type`; accepts any value
    Unrecognized(Option<String>),
}

impl SchemaNode {
    /// Parse a descriptor tree
    pub fn parse(descriptor: &Value) -> SchemaResult<SchemaNode> {
        parse_node(descriptor, "$")
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            SchemaNode::String(_) => NodeKind::String,
            SchemaNode::Number(_) => NodeKind::Number,
            SchemaNode::Boolean => NodeKind::Boolean,
            SchemaNode::Array(_) => NodeKind::Array,
            SchemaNode::Object(_) => NodeKind::Object,
            SchemaNode::Enum(_) => NodeKind::Enum,
            SchemaNode::Literal(_) => NodeKind::Literal,
            SchemaNode::Date(_) => NodeKind::Date,
            SchemaNode::Null => NodeKind::Null,
            SchemaNode::Undefined => NodeKind::Undefined,
            SchemaNode::Any => NodeKind::Any,
            SchemaNode::Unknown => NodeKind::Unknown,
            SchemaNode::Union(_) => NodeKind::Union,
            SchemaNode::Optional(_) => NodeKind::Optional,
            SchemaNode::Nullable(_) => NodeKind::Nullable,
            SchemaNode::Unrecognized(_) => NodeKind::Unrecognized,
        }
    }

    /// Whether an absent value fails validation against this node
    pub fn is_required(&self) -> bool {
        match self {
            SchemaNode::Optional(_)
            | SchemaNode::Undefined
            | SchemaNode::Any
            | SchemaNode::Unknown
            | SchemaNode::Unrecognized(_) => false,
            SchemaNode::Nullable(inner) => inner.is_required(),
            _ => true,
        }
    }

    /// The node with `optional`/`nullable` wrappers removed
    pub fn unwrap_modifiers(&self) -> &SchemaNode {
        match self {
            SchemaNode::Optional(inner) | SchemaNode::Nullable(inner) => inner.unwrap_modifiers(),
            other => other,
        }
    }

    /// Whether `null` is accepted at this node
    pub fn is_nullable(&self) -> bool {
        match self {
            SchemaNode::Nullable(_)
            | SchemaNode::Null
            | SchemaNode::Any
            | SchemaNode::Unknown
            | SchemaNode::Unrecognized(_) => true,
            SchemaNode::Optional(inner) => inner.is_nullable(),
            SchemaNode::Union(options) => options.iter().any(|o| o.is_nullable()),
            _ => false,
        }
    }
}

fn parse_node(value: &Value, path: &str) -> SchemaResult<SchemaNode> {
    let node = value
        .as_object()
        .ok_or_else(|| SchemaError::invalid(path, "descriptor node must be an object"))?;

    let type_name = match node.get("type") {
        Some(Value::String(t)) => t.as_str(),
        Some(other) => {
            tracing::debug!(path = path, found = %other, "non-string schema type, accepting any value");
            return Ok(SchemaNode::Unrecognized(None));
        }
        None => return Ok(SchemaNode::Unrecognized(None)),
    };

    let empty = Map::new();
    let def = match node.get("definition") {
        None | Some(Value::Null) => &empty,
        Some(Value::Object(map)) => map,
        Some(_) => return Err(SchemaError::invalid(path, "definition must be an object")),
    };

    let parsed = match NodeKind::from_type_name(type_name) {
        NodeKind::String => SchemaNode::String(StringDef {
            min: usize_field(def, "min", path)?,
            max: usize_field(def, "max", path)?,
            length: usize_field(def, "length", path)?,
            pattern: str_field(def, "pattern", path)?,
            format: match str_field(def, "format", path)? {
                Some(name) => match StringFormat::parse(&name) {
                    Some(format) => Some(format),
                    None => {
                        tracing::debug!(path = path, format = %name, "unknown string format ignored");
                        None
                    }
                },
                None => None,
            },
        }),
        NodeKind::Number => {
            let mut signs = Vec::new();
            for (key, sign) in [
                ("positive", Sign::Positive),
                ("negative", Sign::Negative),
                ("nonnegative", Sign::NonNegative),
                ("nonpositive", Sign::NonPositive),
            ] {
                if bool_field(def, key, path)? {
                    signs.push(sign);
                }
            }
            SchemaNode::Number(NumberDef {
                min: f64_field(def, "min", path)?,
                max: f64_field(def, "max", path)?,
                int: bool_field(def, "int", path)?,
                signs,
            })
        }
        NodeKind::Boolean => SchemaNode::Boolean,
        NodeKind::Array => {
            let items = match def.get("items") {
                Some(items) => parse_node(items, &format!("{}.items", path))?,
                None => SchemaNode::Any,
            };
            SchemaNode::Array(ArrayDef {
                items: Box::new(items),
                min: usize_field(def, "min", path)?,
                max: usize_field(def, "max", path)?,
            })
        }
        NodeKind::Object => {
            let mut shape = Vec::new();
            match def.get("shape") {
                None | Some(Value::Null) => {}
                Some(Value::Object(fields)) => {
                    for (name, child) in fields {
                        let child_path = format!("{}.shape.{}", path, name);
                        shape.push((name.clone(), parse_node(child, &child_path)?));
                    }
                }
                Some(_) => return Err(SchemaError::invalid(path, "object shape must be an object")),
            }
            let unknown_keys = if bool_field(def, "strict", path)? {
                UnknownKeys::Strict
            } else if bool_field(def, "passthrough", path)? {
                UnknownKeys::Passthrough
            } else {
                UnknownKeys::Strip
            };
            SchemaNode::Object(ObjectDef { shape, unknown_keys })
        }
        NodeKind::Enum => {
            let values = def
                .get("values")
                .and_then(|v| v.as_array())
                .ok_or_else(|| SchemaError::invalid(path, "enum requires a values array"))?;
            let values = values
                .iter()
                .map(|v| {
                    v.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| SchemaError::invalid(path, "enum values must be strings"))
                })
                .collect::<SchemaResult<Vec<_>>>()?;
            if values.is_empty() {
                return Err(SchemaError::invalid(path, "enum requires at least one value"));
            }
            SchemaNode::Enum(values)
        }
        NodeKind::Literal => {
            let value = def
                .get("value")
                .cloned()
                .ok_or_else(|| SchemaError::invalid(path, "literal requires a value"))?;
            SchemaNode::Literal(value)
        }
        NodeKind::Date => SchemaNode::Date(DateDef {
            min: date_field(def, "min", path)?,
            max: date_field(def, "max", path)?,
        }),
        NodeKind::Null => SchemaNode::Null,
        NodeKind::Undefined => SchemaNode::Undefined,
        NodeKind::Any => SchemaNode::Any,
        NodeKind::Unknown => SchemaNode::Unknown,
        NodeKind::Union => {
            let options = def
                .get("options")
                .and_then(|v| v.as_array())
                .ok_or_else(|| SchemaError::invalid(path, "union requires an options array"))?;
            if options.len() < 2 {
                return Err(SchemaError::invalid(path, "union requires at least 2 options"));
            }
            let options = options
                .iter()
                .enumerate()
                .map(|(i, o)| parse_node(o, &format!("{}.options[{}]", path, i)))
                .collect::<SchemaResult<Vec<_>>>()?;
            SchemaNode::Union(options)
        }
        NodeKind::Optional => SchemaNode::Optional(Box::new(inner_node(def, path)?)),
        NodeKind::Nullable => SchemaNode::Nullable(Box::new(inner_node(def, path)?)),
        NodeKind::Unrecognized => {
            tracing::debug!(path = path, type_name = type_name, "unrecognized schema type, accepting any value");
            SchemaNode::Unrecognized(Some(type_name.to_string()))
        }
    };

    Ok(parsed)
}

fn inner_node(def: &Map<String, Value>, path: &str) -> SchemaResult<SchemaNode> {
    match def.get("inner") {
        Some(inner) => parse_node(inner, &format!("{}.inner", path)),
        None => Err(SchemaError::invalid(path, "modifier requires an inner node")),
    }
}

fn usize_field(def: &Map<String, Value>, key: &str, path: &str) -> SchemaResult<Option<usize>> {
    match def.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .map(|n| Some(n as usize))
            .ok_or_else(|| SchemaError::invalid(path, format!("'{}' must be a non-negative integer", key))),
    }
}

fn f64_field(def: &Map<String, Value>, key: &str, path: &str) -> SchemaResult<Option<f64>> {
    match def.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_f64()
            .map(Some)
            .ok_or_else(|| SchemaError::invalid(path, format!("'{}' must be a number", key))),
    }
}

fn bool_field(def: &Map<String, Value>, key: &str, path: &str) -> SchemaResult<bool> {
    match def.get(key) {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(b)) => Ok(*b),
        Some(_) => Err(SchemaError::invalid(path, format!("'{}' must be a boolean", key))),
    }
}

fn str_field(def: &Map<String, Value>, key: &str, path: &str) -> SchemaResult<Option<String>> {
    match def.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(SchemaError::invalid(path, format!("'{}' must be a string", key))),
    }
}

fn date_field(def: &Map<String, Value>, key: &str, path: &str) -> SchemaResult<Option<DateTime<Utc>>> {
    match str_field(def, key, path)? {
        None => Ok(None),
        Some(s) => DateTime::parse_from_rfc3339(&s)
            .map(|d| Some(d.with_timezone(&Utc)))
            .map_err(|e| SchemaError::invalid(path, format!("'{}' must be an RFC 3339 date: {}", key, e))),
    }
}

/// Top-level field of an object descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    /// Kind with `optional`/`nullable` wrappers removed
    pub kind: NodeKind,
    pub required: bool,
    pub nullable: bool,
}

/// Describe the top-level fields of an object descriptor, sorted by name
///
/// Non-object descriptors have no fields.
pub fn describe_fields(node: &SchemaNode) -> Vec<FieldDescriptor> {
    let mut fields: Vec<FieldDescriptor> = match node.unwrap_modifiers() {
        SchemaNode::Object(obj) => obj
            .shape
            .iter()
            .map(|(name, child)| FieldDescriptor {
                name: name.clone(),
                kind: child.unwrap_modifiers().kind(),
                required: child.is_required(),
                nullable: child.is_nullable(),
            })
            .collect(),
        _ => Vec::new(),
    };
    fields.sort_by(|a, b| a.name.cmp(&b.name));
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_nested_object() {
        let node = SchemaNode::parse(&json!({
            "type": "object",
            "definition": {
                "strict": true,
                "shape": {
                    "name": {"type": "string", "definition": {"min": 1}},
                    "tags": {"type": "array", "definition": {"items": {"type": "string"}}},
                    "note": {"type": "optional", "definition": {"inner": {"type": "string"}}}
                }
            }
        }))
        .unwrap();

        match node {
            SchemaNode::Object(obj) => {
                assert_eq!(obj.unknown_keys, UnknownKeys::Strict);
                assert_eq!(obj.shape.len(), 3);
                assert_eq!(obj.field("name").unwrap().kind(), NodeKind::String);
                assert!(!obj.field("note").unwrap().is_required());
            }
            other => panic!("expected object, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_or_unknown_type_is_unrecognized() {
        assert_eq!(
            SchemaNode::parse(&json!({"definition": {}})).unwrap(),
            SchemaNode::Unrecognized(None)
        );
        assert_eq!(
            SchemaNode::parse(&json!({"type": "bigint"})).unwrap(),
            SchemaNode::Unrecognized(Some("bigint".into()))
        );
    }

    #[test]
    fn test_union_needs_two_options() {
        let err = SchemaNode::parse(&json!({
            "type": "union",
            "definition": {"options": [{"type": "string"}]}
        }))
        .unwrap_err();
        assert!(err.to_string().contains("at least 2 options"));
    }

    #[test]
    fn test_malformed_descriptors_rejected() {
        assert!(SchemaNode::parse(&json!("string")).is_err());
        assert!(SchemaNode::parse(&json!({"type": "string", "definition": {"min": "one"}})).is_err());
        assert!(SchemaNode::parse(&json!({"type": "enum", "definition": {"values": []}})).is_err());
        assert!(SchemaNode::parse(&json!({"type": "optional"})).is_err());

        let err = SchemaNode::parse(&json!({
            "type": "object",
            "definition": {"shape": {"age": {"type": "number", "definition": {"int": "yes"}}}}
        }))
        .unwrap_err();
        assert_eq!(err.path(), "$.shape.age");
    }

    #[test]
    fn test_describe_fields_sorted() {
        let node = SchemaNode::parse(&json!({
            "type": "object",
            "definition": {"shape": {
                "name": {"type": "string"},
                "id": {"type": "number"},
                "email": {"type": "nullable", "definition": {"inner": {"type": "string"}}},
                "age": {"type": "optional", "definition": {"inner": {"type": "number"}}}
            }}
        }))
        .unwrap();

        let fields = describe_fields(&node);
        let names: Vec<_> = fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["age", "email", "id", "name"]);
        assert!(!fields[0].required);
        assert!(fields[1].nullable && fields[1].required);
        assert_eq!(fields[1].kind, NodeKind::String);
    }
}
