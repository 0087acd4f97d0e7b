use serde_json::{Map, Value};

use crate::error::TypeError;
use crate::version::VersionToken;

/// A schemaless record: a JSON object keyed by field name.
///
/// Shape checking is left to validators and to typed wrappers in the
/// embedding application.
pub type Record = Map<String, Value>;

/// Convert an arbitrary JSON value into a [`Record`].
pub fn record_from_value(value: Value) -> Result<Record, TypeError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(TypeError::NotAnObject(json_kind(&other).to_string())),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A value together with the version token it was observed at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Versioned<T> {
    pub data: T,
    pub version: VersionToken,
}

impl<T> Versioned<T> {
    pub fn new(data: T, version: VersionToken) -> Self {
        Self { data, version }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Versioned<U> {
        Versioned {
            data: f(self.data),
            version: self.version,
        }
    }
}
