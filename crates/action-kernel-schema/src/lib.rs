//! Schema Descriptor Interpreter
//!
//! Compiles serialized, JSON-safe schema descriptors into reusable
//! validators.
//!
//! ## Descriptor format
//!
//! ```json
//! {
//!   "type": "object",
//!   "definition": {
//!     "strict": true,
//!     "shape": {
//!       "name":  { "type": "string", "definition": { "min": 1, "max": 120 } },
//!       "email": { "type": "string", "definition": { "format": "email" } },
//!       "age":   { "type": "optional", "definition": { "inner": { "type": "number", "definition": { "int": true } } } }
//!     }
//!   }
//! }
//! ```
//!
//! Supported node types: string, number, boolean, array, object, enum,
//! literal, date, null, undefined, any, unknown, union, optional, nullable.
//! An unrecognized or missing `type` accepts any value.
//!
//! ## Example
//!
//! ```rust
//! use action_kernel_schema::Validator;
//! use serde_json::json;
//!
//! let validator = Validator::from_descriptor(&json!({
//!     "type": "number",
//!     "definition": { "min": 0, "int": true }
//! })).unwrap();
//!
//! assert!(validator.validate(&json!(3)).is_success());
//! assert!(!validator.validate(&json!(-1)).is_success());
//! ```

pub mod cache;
pub mod descriptor;
pub mod error;
mod formats;
pub mod validator;

pub use cache::{SchemaSide, ValidatorCache};
pub use descriptor::{describe_fields, FieldDescriptor, NodeKind, SchemaNode, StringFormat, UnknownKeys};
pub use error::{SchemaError, SchemaResult};
pub use validator::{IssueCode, ValidationIssue, ValidationOutcome, Validator};
