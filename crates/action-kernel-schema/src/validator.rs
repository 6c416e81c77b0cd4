//! Compiled validators
//!
//! [`Validator::compile`] walks a [`SchemaNode`] once and produces a tree of
//! closures. Regexes and format checkers are built at compile time; every
//! constraint is checked at validation time. Validators are pure and cheap to
//! clone, so they can be shared across tasks and cached per contract version.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::descriptor::{SchemaNode, UnknownKeys};
use crate::error::{SchemaError, SchemaResult};
use crate::formats::FormatChecker;

/// Machine-readable issue codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCode {
    InvalidType,
    Required,
    TooSmall,
    TooBig,
    InvalidString,
    InvalidFormat,
    NotInteger,
    InvalidSign,
    InvalidEnumValue,
    InvalidLiteral,
    InvalidDate,
    UnrecognizedKeys,
    InvalidUnion,
}

impl fmt::Display for IssueCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IssueCode::InvalidType => "invalid_type",
            IssueCode::Required => "required",
            IssueCode::TooSmall => "too_small",
            IssueCode::TooBig => "too_big",
            IssueCode::InvalidString => "invalid_string",
            IssueCode::InvalidFormat => "invalid_format",
            IssueCode::NotInteger => "not_integer",
            IssueCode::InvalidSign => "invalid_sign",
            IssueCode::InvalidEnumValue => "invalid_enum_value",
            IssueCode::InvalidLiteral => "invalid_literal",
            IssueCode::InvalidDate => "invalid_date",
            IssueCode::UnrecognizedKeys => "unrecognized_keys",
            IssueCode::InvalidUnion => "invalid_union",
        };
        write!(f, "{}", s)
    }
}

/// A single validation failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// JSON path of the offending value (`$`, `$.items[2].name`)
    pub path: String,
    pub code: IssueCode,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(path: impl Into<String>, code: IssueCode, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at '{}': {}", self.code, self.path, self.message)
    }
}

/// Result of validating one value
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationOutcome {
    /// The value conforms; `data` is the validated output (unknown keys of
    /// non-strict objects stripped)
    Success { data: Value },
    Failure { issues: Vec<ValidationIssue> },
}

impl ValidationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ValidationOutcome::Success { .. })
    }

    pub fn issues(&self) -> &[ValidationIssue] {
        match self {
            ValidationOutcome::Success { .. } => &[],
            ValidationOutcome::Failure { issues } => issues,
        }
    }

    pub fn into_result(self) -> Result<Value, Vec<ValidationIssue>> {
        match self {
            ValidationOutcome::Success { data } => Ok(data),
            ValidationOutcome::Failure { issues } => Err(issues),
        }
    }
}

impl Serialize for ValidationOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Wire<'a> {
            success: bool,
            #[serde(skip_serializing_if = "Option::is_none")]
            data: Option<&'a Value>,
            #[serde(skip_serializing_if = "Option::is_none")]
            issues: Option<&'a [ValidationIssue]>,
        }

        let wire = match self {
            ValidationOutcome::Success { data } => Wire {
                success: true,
                data: Some(data),
                issues: None,
            },
            ValidationOutcome::Failure { issues } => Wire {
                success: false,
                data: None,
                issues: Some(issues),
            },
        };
        wire.serialize(serializer)
    }
}

type CheckFn = dyn Fn(Option<&Value>, &str, &mut Vec<ValidationIssue>) -> Option<Value> + Send + Sync;

fn boxed<F>(f: F) -> Box<CheckFn>
where
    F: Fn(Option<&Value>, &str, &mut Vec<ValidationIssue>) -> Option<Value> + Send + Sync + 'static,
{
    Box::new(f)
}

/// A compiled, reusable validator
#[derive(Clone)]
pub struct Validator {
    check: Arc<CheckFn>,
    node: Arc<SchemaNode>,
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Validator").field("kind", &self.node.kind()).finish()
    }
}

impl Validator {
    /// Compile a parsed descriptor
    pub fn compile(node: &SchemaNode) -> SchemaResult<Self> {
        Ok(Self {
            check: Arc::from(compile_node(node, "$")?),
            node: Arc::new(node.clone()),
        })
    }

    /// Parse and compile a raw descriptor
    pub fn from_descriptor(descriptor: &Value) -> SchemaResult<Self> {
        Self::compile(&SchemaNode::parse(descriptor)?)
    }

    /// Validator used when a contract declares no schema
    pub fn pass_through() -> Self {
        Self {
            check: Arc::from(boxed(|value, _, _| value.cloned())),
            node: Arc::new(SchemaNode::Any),
        }
    }

    pub fn node(&self) -> &SchemaNode {
        &self.node
    }

    pub fn validate(&self, value: &Value) -> ValidationOutcome {
        self.validate_option(Some(value))
    }

    /// Validate a possibly absent value; an accepted absent value yields `null`
    pub fn validate_option(&self, value: Option<&Value>) -> ValidationOutcome {
        let mut issues = Vec::new();
        let data = (self.check)(value, "$", &mut issues);
        if issues.is_empty() {
            ValidationOutcome::Success {
                data: data.unwrap_or(Value::Null),
            }
        } else {
            ValidationOutcome::Failure { issues }
        }
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn require<'a>(value: Option<&'a Value>, path: &str, issues: &mut Vec<ValidationIssue>) -> Option<&'a Value> {
    if value.is_none() {
        issues.push(ValidationIssue::new(path, IssueCode::Required, "Required"));
    }
    value
}

fn invalid_type(path: &str, expected: &str, found: &Value) -> ValidationIssue {
    ValidationIssue::new(
        path,
        IssueCode::InvalidType,
        format!("Expected {}, received {}", expected, json_type(found)),
    )
}

fn compile_node(node: &SchemaNode, path: &str) -> SchemaResult<Box<CheckFn>> {
    let check: Box<CheckFn> = match node {
        SchemaNode::String(def) => {
            let pattern = match &def.pattern {
                Some(p) => Some(Regex::new(p).map_err(|e| SchemaError::InvalidPattern {
                    path: path.to_string(),
                    message: e.to_string(),
                })?),
                None => None,
            };
            let format = def.format.map(FormatChecker::new);
            let def = def.clone();
            boxed(move |value, path, issues| {
                let v = require(value, path, issues)?;
                let Some(s) = v.as_str() else {
                    issues.push(invalid_type(path, "string", v));
                    return None;
                };
                let len = s.chars().count();
                if let Some(min) = def.min {
                    if len < min {
                        issues.push(ValidationIssue::new(
                            path,
                            IssueCode::TooSmall,
                            format!("String must contain at least {} character(s)", min),
                        ));
                    }
                }
                if let Some(max) = def.max {
                    if len > max {
                        issues.push(ValidationIssue::new(
                            path,
                            IssueCode::TooBig,
                            format!("String must contain at most {} character(s)", max),
                        ));
                    }
                }
                if let Some(exact) = def.length {
                    if len != exact {
                        let code = if len < exact { IssueCode::TooSmall } else { IssueCode::TooBig };
                        issues.push(ValidationIssue::new(
                            path,
                            code,
                            format!("String must contain exactly {} character(s)", exact),
                        ));
                    }
                }
                if let Some(re) = &pattern {
                    if !re.is_match(s) {
                        issues.push(ValidationIssue::new(
                            path,
                            IssueCode::InvalidString,
                            format!("String does not match pattern '{}'", re.as_str()),
                        ));
                    }
                }
                if let Some(checker) = &format {
                    if !checker.check(s) {
                        issues.push(ValidationIssue::new(
                            path,
                            IssueCode::InvalidFormat,
                            format!("Invalid {}", checker.format()),
                        ));
                    }
                }
                Some(v.clone())
            })
        }
        SchemaNode::Number(def) => {
            let def = def.clone();
            boxed(move |value, path, issues| {
                let v = require(value, path, issues)?;
                let Some(n) = v.as_f64() else {
                    issues.push(invalid_type(path, "number", v));
                    return None;
                };
                if def.int && n.fract() != 0.0 {
                    issues.push(ValidationIssue::new(path, IssueCode::NotInteger, "Expected integer, received float"));
                }
                if let Some(min) = def.min {
                    if n < min {
                        issues.push(ValidationIssue::new(
                            path,
                            IssueCode::TooSmall,
                            format!("Number must be greater than or equal to {}", min),
                        ));
                    }
                }
                if let Some(max) = def.max {
                    if n > max {
                        issues.push(ValidationIssue::new(
                            path,
                            IssueCode::TooBig,
                            format!("Number must be less than or equal to {}", max),
                        ));
                    }
                }
                for sign in &def.signs {
                    if !sign.admits(n) {
                        issues.push(ValidationIssue::new(
                            path,
                            IssueCode::InvalidSign,
                            format!("Number must be {}", sign),
                        ));
                    }
                }
                Some(v.clone())
            })
        }
        SchemaNode::Boolean => boxed(|value, path, issues| {
            let v = require(value, path, issues)?;
            if !v.is_boolean() {
                issues.push(invalid_type(path, "boolean", v));
                return None;
            }
            Some(v.clone())
        }),
        SchemaNode::Array(def) => {
            let items = compile_node(&def.items, &format!("{}.items", path))?;
            let (min, max) = (def.min, def.max);
            boxed(move |value, path, issues| {
                let v = require(value, path, issues)?;
                let Some(elements) = v.as_array() else {
                    issues.push(invalid_type(path, "array", v));
                    return None;
                };
                if let Some(min) = min {
                    if elements.len() < min {
                        issues.push(ValidationIssue::new(
                            path,
                            IssueCode::TooSmall,
                            format!("Array must contain at least {} element(s)", min),
                        ));
                    }
                }
                if let Some(max) = max {
                    if elements.len() > max {
                        issues.push(ValidationIssue::new(
                            path,
                            IssueCode::TooBig,
                            format!("Array must contain at most {} element(s)", max),
                        ));
                    }
                }
                let out = elements
                    .iter()
                    .enumerate()
                    .map(|(i, element)| {
                        items(Some(element), &format!("{}[{}]", path, i), issues).unwrap_or(Value::Null)
                    })
                    .collect();
                Some(Value::Array(out))
            })
        }
        SchemaNode::Object(def) => {
            let mut shape = Vec::with_capacity(def.shape.len());
            for (name, child) in &def.shape {
                shape.push((name.clone(), compile_node(child, &format!("{}.shape.{}", path, name))?));
            }
            let declared: HashSet<String> = def.shape.iter().map(|(k, _)| k.clone()).collect();
            let unknown_keys = def.unknown_keys;
            boxed(move |value, path, issues| {
                let v = require(value, path, issues)?;
                let Some(obj) = v.as_object() else {
                    issues.push(invalid_type(path, "object", v));
                    return None;
                };
                let mut out = Map::new();
                for (name, check) in &shape {
                    if let Some(field) = check(obj.get(name), &format!("{}.{}", path, name), issues) {
                        out.insert(name.clone(), field);
                    }
                }
                let extra: Vec<&String> = obj.keys().filter(|k| !declared.contains(*k)).collect();
                if !extra.is_empty() {
                    match unknown_keys {
                        UnknownKeys::Strict => {
                            let names: Vec<&str> = extra.iter().map(|k| k.as_str()).collect();
                            issues.push(ValidationIssue::new(
                                path,
                                IssueCode::UnrecognizedKeys,
                                format!("Unrecognized key(s) in object: {}", names.join(", ")),
                            ));
                        }
                        UnknownKeys::Passthrough => {
                            for key in extra {
                                out.insert(key.clone(), obj[key].clone());
                            }
                        }
                        UnknownKeys::Strip => {}
                    }
                }
                Some(Value::Object(out))
            })
        }
        SchemaNode::Enum(values) => {
            let values = values.clone();
            boxed(move |value, path, issues| {
                let v = require(value, path, issues)?;
                match v.as_str() {
                    Some(s) if values.iter().any(|allowed| allowed == s) => Some(v.clone()),
                    _ => {
                        issues.push(ValidationIssue::new(
                            path,
                            IssueCode::InvalidEnumValue,
                            format!("Expected one of [{}]", values.join(", ")),
                        ));
                        None
                    }
                }
            })
        }
        SchemaNode::Literal(expected) => {
            let expected = expected.clone();
            boxed(move |value, path, issues| {
                let v = require(value, path, issues)?;
                if *v != expected {
                    issues.push(ValidationIssue::new(
                        path,
                        IssueCode::InvalidLiteral,
                        format!("Expected literal {}", expected),
                    ));
                    return None;
                }
                Some(v.clone())
            })
        }
        SchemaNode::Date(def) => {
            let def = def.clone();
            boxed(move |value, path, issues| {
                let v = require(value, path, issues)?;
                let Some(s) = v.as_str() else {
                    issues.push(invalid_type(path, "date", v));
                    return None;
                };
                let parsed: DateTime<Utc> = match DateTime::parse_from_rfc3339(s) {
                    Ok(d) => d.with_timezone(&Utc),
                    Err(_) => {
                        issues.push(ValidationIssue::new(path, IssueCode::InvalidDate, "Invalid date"));
                        return None;
                    }
                };
                if let Some(min) = def.min {
                    if parsed < min {
                        issues.push(ValidationIssue::new(
                            path,
                            IssueCode::TooSmall,
                            format!("Date must be on or after {}", min.to_rfc3339()),
                        ));
                    }
                }
                if let Some(max) = def.max {
                    if parsed > max {
                        issues.push(ValidationIssue::new(
                            path,
                            IssueCode::TooBig,
                            format!("Date must be on or before {}", max.to_rfc3339()),
                        ));
                    }
                }
                Some(v.clone())
            })
        }
        SchemaNode::Null => boxed(|value, path, issues| {
            let v = require(value, path, issues)?;
            if !v.is_null() {
                issues.push(invalid_type(path, "null", v));
                return None;
            }
            Some(Value::Null)
        }),
        SchemaNode::Undefined => boxed(|value, path, issues| {
            if let Some(v) = value {
                issues.push(invalid_type(path, "undefined", v));
            }
            None
        }),
        SchemaNode::Any | SchemaNode::Unknown | SchemaNode::Unrecognized(_) => {
            boxed(|value, _, _| value.cloned())
        }
        SchemaNode::Union(options) => {
            let compiled = options
                .iter()
                .enumerate()
                .map(|(i, o)| compile_node(o, &format!("{}.options[{}]", path, i)))
                .collect::<SchemaResult<Vec<_>>>()?;
            boxed(move |value, path, issues| {
                let mut failures = Vec::with_capacity(compiled.len());
                for option in &compiled {
                    let mut local = Vec::new();
                    let out = option(value, path, &mut local);
                    if local.is_empty() {
                        return out;
                    }
                    failures.push(
                        local
                            .first()
                            .map(|issue| issue.message.clone())
                            .unwrap_or_default(),
                    );
                }
                let detail: Vec<String> = failures
                    .iter()
                    .enumerate()
                    .map(|(i, m)| format!("option {}: {}", i, m))
                    .collect();
                issues.push(ValidationIssue::new(
                    path,
                    IssueCode::InvalidUnion,
                    format!("No union option matched ({})", detail.join("; ")),
                ));
                None
            })
        }
        SchemaNode::Optional(inner) => {
            let inner = compile_node(inner, &format!("{}.inner", path))?;
            boxed(move |value, path, issues| match value {
                None => None,
                Some(v) => inner(Some(v), path, issues),
            })
        }
        SchemaNode::Nullable(inner) => {
            let inner = compile_node(inner, &format!("{}.inner", path))?;
            boxed(move |value, path, issues| match value {
                Some(Value::Null) => Some(Value::Null),
                other => inner(other, path, issues),
            })
        }
    };
    Ok(check)
}
