//! # Argument Validation
//!
//! Paths receive a loosely-typed argument bag. Every action declares the keys
//! it consumes as [`ParameterSpecification`]s; the executor gathers those
//! across the pipeline of a path and validates the bag against them before
//! any mutation takes place.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use super::errors::{invalid_argument, ActionError, ActionResult};

/// Argument bag passed to every action of a path
pub type Arguments = BTreeMap<String, Value>;

/// Validation messages per argument key; empty when valid
pub type ValidationErrors = BTreeMap<String, Vec<String>>;

pub type DefaultProvider = Arc<dyn Fn() -> Value + Send + Sync>;

pub const REQUIRED_MESSAGE: &str = "required";

/// Declared type of an argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Any,
    Bool,
    Integer,
    Number,
    String,
    Array,
    Object,
    /// A string holding a UUID
    Uuid,
    /// A string holding an RFC 3339 timestamp
    Timestamp,
}

impl ValueType {
    /// Structural assignability of a JSON value to this type
    ///
    /// `null` is never assignable; callers decide what absence means.
    pub fn is_assignable_from(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => false,
            (Self::Any, _) => true,
            (Self::Bool, Value::Bool(_)) => true,
            (Self::Integer, Value::Number(n)) => n.is_i64() || n.is_u64(),
            (Self::Number, Value::Number(_)) => true,
            (Self::String, Value::String(_)) => true,
            (Self::Array, Value::Array(_)) => true,
            (Self::Object, Value::Object(_)) => true,
            (Self::Uuid, Value::String(s)) => Uuid::parse_str(s).is_ok(),
            (Self::Timestamp, Value::String(s)) => DateTime::parse_from_rfc3339(s).is_ok(),
            _ => false,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Any => "any",
            Self::Bool => "bool",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::String => "string",
            Self::Array => "array",
            Self::Object => "object",
            Self::Uuid => "uuid",
            Self::Timestamp => "timestamp",
        };
        write!(f, "{name}")
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// One argument consumed by an action
#[derive(Clone)]
pub struct ParameterSpecification {
    pub key: String,
    pub required: bool,
    pub value_type: ValueType,
    pub default: Option<DefaultProvider>,
}

impl ParameterSpecification {
    pub fn required(key: &str, value_type: ValueType) -> Self {
        Self {
            key: key.to_string(),
            required: true,
            value_type,
            default: None,
        }
    }

    pub fn optional(key: &str, value_type: ValueType) -> Self {
        Self {
            key: key.to_string(),
            required: false,
            value_type,
            default: None,
        }
    }

    pub fn with_default<F>(mut self, provider: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.default = Some(Arc::new(provider));
        self
    }
}

impl fmt::Debug for ParameterSpecification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParameterSpecification")
            .field("key", &self.key)
            .field("required", &self.required)
            .field("value_type", &self.value_type)
            .field("has_default", &self.default.is_some())
            .finish()
    }
}

/// Gathers and validates parameter specifications
pub struct ParameterValidator;

impl ParameterValidator {
    /// Merge pre- and post-action specifications
    ///
    /// Within one phase a later declaration replaces an earlier one for the
    /// same key. Post-action declarations never replace a key a pre-action
    /// already declared. Order of first declaration is preserved.
    pub fn gather<Pre, Post>(pre: Pre, post: Post) -> Vec<ParameterSpecification>
    where
        Pre: IntoIterator<Item = ParameterSpecification>,
        Post: IntoIterator<Item = ParameterSpecification>,
    {
        let mut gathered: Vec<ParameterSpecification> = Vec::new();

        for spec in pre {
            upsert(&mut gathered, spec);
        }

        let pre_count = gathered.len();
        for spec in post {
            if gathered[..pre_count].iter().any(|s| s.key == spec.key) {
                continue;
            }
            upsert(&mut gathered, spec);
        }

        gathered
    }

    /// Fill absent keys that declare a default provider
    pub fn apply_defaults(specs: &[ParameterSpecification], args: &mut Arguments) {
        for spec in specs {
            if let Some(provider) = &spec.default {
                args.entry(spec.key.clone()).or_insert_with(|| provider());
            }
        }
    }

    pub fn validate(specs: &[ParameterSpecification], args: &Arguments) -> ValidationErrors {
        let mut errors = ValidationErrors::new();

        for spec in specs {
            match args.get(&spec.key) {
                None | Some(Value::Null) if spec.required => {
                    push_error(&mut errors, &spec.key, REQUIRED_MESSAGE.to_string());
                }
                None | Some(Value::Null) => {}
                Some(value) if !spec.value_type.is_assignable_from(value) => {
                    push_error(
                        &mut errors,
                        &spec.key,
                        format!("expected {}, found {}", spec.value_type, json_kind(value)),
                    );
                }
                Some(_) => {}
            }
        }

        errors
    }
}

fn upsert(gathered: &mut Vec<ParameterSpecification>, spec: ParameterSpecification) {
    match gathered.iter_mut().find(|s| s.key == spec.key) {
        Some(existing) => *existing = spec,
        None => gathered.push(spec),
    }
}

fn push_error(errors: &mut ValidationErrors, key: &str, message: String) {
    errors.entry(key.to_string()).or_default().push(message);
}

/// Typed accessors used by actions once the bag has been validated
pub mod args {
    use super::*;

    pub fn require<'a>(args: &'a Arguments, key: &str) -> ActionResult<&'a Value> {
        match args.get(key) {
            None | Some(Value::Null) => Err(ActionError::MissingArgument {
                key: key.to_string(),
            }),
            Some(value) => Ok(value),
        }
    }

    pub fn require_str<'a>(args: &'a Arguments, key: &str) -> ActionResult<&'a str> {
        require(args, key)?
            .as_str()
            .ok_or_else(|| invalid_argument(key, "expected string"))
    }

    pub fn optional_str<'a>(args: &'a Arguments, key: &str) -> ActionResult<Option<&'a str>> {
        match args.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(_) => Err(invalid_argument(key, "expected string")),
        }
    }

    pub fn require_uuid(args: &Arguments, key: &str) -> ActionResult<Uuid> {
        let raw = require_str(args, key)?;
        Uuid::parse_str(raw).map_err(|e| invalid_argument(key, e.to_string()))
    }

    pub fn optional_uuid(args: &Arguments, key: &str) -> ActionResult<Option<Uuid>> {
        optional_str(args, key)?
            .map(|raw| Uuid::parse_str(raw).map_err(|e| invalid_argument(key, e.to_string())))
            .transpose()
    }

    pub fn optional_timestamp(args: &Arguments, key: &str) -> ActionResult<Option<DateTime<Utc>>> {
        optional_str(args, key)?
            .map(|raw| {
                DateTime::parse_from_rfc3339(raw)
                    .map(|ts| ts.with_timezone(&Utc))
                    .map_err(|e| invalid_argument(key, e.to_string()))
            })
            .transpose()
    }

    pub fn require_deserialized<T: serde::de::DeserializeOwned>(
        args: &Arguments,
        key: &str,
    ) -> ActionResult<T> {
        Ok(serde_json::from_value(require(args, key)?.clone())?)
    }
}
