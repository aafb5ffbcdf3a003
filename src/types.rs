//! Core data types for proto-sandbox
//!
//! This module contains the fundamental data structures shared by the
//! signal proxy, the sandbox and the plugin loader.
//!
//! # Main Types
//!
//! - [`NodeKind`] - Kind of a schema node (branch, sensor, actuator, attribute)
//! - [`DataType`] - Datatype of a leaf signal, with its default value
//! - [`SignalValue`] - A value read from or written to a signal
//! - [`Operation`] - The operations a signal supports (get, set, subscribe)
//! - [`OutputEntry`] - One line of a script's output log
//!
//! # Default Values
//!
//! Every known datatype maps to a default that `get()` returns when nothing
//! else has been written or observed:
//! - Integer types: `0`
//! - `float` / `double`: `0.0`
//! - `string`: `""`
//! - `boolean`: `false`
//! - Array types (`string[]`, `uint8[]`, ...): `[]`

use crate::error::SandboxError;
use rhai::Dynamic;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of a node in the signal schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// Interior node grouping other nodes
    Branch,
    /// Read-only measured value
    Sensor,
    /// Value that can be commanded
    Actuator,
    /// Static property of the vehicle
    Attribute,
}

impl NodeKind {
    /// Returns true for every kind that carries a value
    pub fn is_leaf(&self) -> bool {
        !matches!(self, NodeKind::Branch)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Branch => write!(f, "branch"),
            NodeKind::Sensor => write!(f, "sensor"),
            NodeKind::Actuator => write!(f, "actuator"),
            NodeKind::Attribute => write!(f, "attribute"),
        }
    }
}

/// Datatype of a leaf signal
///
/// Unrecognised names are kept as [`DataType::Unknown`] so a schema can still
/// be loaded; reading such a signal fails with `UnknownDatatype`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DataType {
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Int8,
    Int16,
    Int32,
    Int64,
    Float,
    Double,
    Boolean,
    String,
    /// Array of a scalar type, written `<type>[]`
    Array(Box<DataType>),
    Unknown(String),
}

impl DataType {
    /// Parse a datatype name as it appears in the schema
    pub fn parse(name: &str) -> Self {
        if let Some(element) = name.strip_suffix("[]") {
            return match Self::parse(element) {
                DataType::Array(_) | DataType::Unknown(_) => DataType::Unknown(name.to_string()),
                scalar => DataType::Array(Box::new(scalar)),
            };
        }

        match name {
            "uint8" => DataType::Uint8,
            "uint16" => DataType::Uint16,
            "uint32" => DataType::Uint32,
            "uint64" => DataType::Uint64,
            "int8" => DataType::Int8,
            "int16" => DataType::Int16,
            "int32" => DataType::Int32,
            "int64" => DataType::Int64,
            "float" => DataType::Float,
            "double" => DataType::Double,
            "boolean" => DataType::Boolean,
            "string" => DataType::String,
            other => DataType::Unknown(other.to_string()),
        }
    }

    /// Returns true for the integer types
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            DataType::Uint8
                | DataType::Uint16
                | DataType::Uint32
                | DataType::Uint64
                | DataType::Int8
                | DataType::Int16
                | DataType::Int32
                | DataType::Int64
        )
    }

    /// Returns true for `float` and `double`
    pub fn is_float(&self) -> bool {
        matches!(self, DataType::Float | DataType::Double)
    }

    /// The value a signal of this type reads as before anything is written.
    ///
    /// `None` for [`DataType::Unknown`].
    pub fn default_value(&self) -> Option<SignalValue> {
        match self {
            t if t.is_integer() => Some(SignalValue::Int(0)),
            t if t.is_float() => Some(SignalValue::Float(0.0)),
            DataType::Boolean => Some(SignalValue::Bool(false)),
            DataType::String => Some(SignalValue::String(String::new())),
            DataType::Array(_) => Some(SignalValue::Array(Vec::new())),
            _ => None,
        }
    }
}

impl From<String> for DataType {
    fn from(name: String) -> Self {
        DataType::parse(&name)
    }
}

impl From<&str> for DataType {
    fn from(name: &str) -> Self {
        DataType::parse(name)
    }
}

impl From<DataType> for String {
    fn from(datatype: DataType) -> Self {
        datatype.to_string()
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Uint8 => write!(f, "uint8"),
            DataType::Uint16 => write!(f, "uint16"),
            DataType::Uint32 => write!(f, "uint32"),
            DataType::Uint64 => write!(f, "uint64"),
            DataType::Int8 => write!(f, "int8"),
            DataType::Int16 => write!(f, "int16"),
            DataType::Int32 => write!(f, "int32"),
            DataType::Int64 => write!(f, "int64"),
            DataType::Float => write!(f, "float"),
            DataType::Double => write!(f, "double"),
            DataType::Boolean => write!(f, "boolean"),
            DataType::String => write!(f, "string"),
            DataType::Array(element) => write!(f, "{}[]", element),
            DataType::Unknown(name) => write!(f, "{}", name),
        }
    }
}

/// Operations a signal node supports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Get,
    Set,
    Subscribe,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Get => "get",
            Operation::Set => "set",
            Operation::Subscribe => "subscribe",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = SandboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "get" => Ok(Operation::Get),
            "set" => Ok(Operation::Set),
            "subscribe" => Ok(Operation::Subscribe),
            other => Err(SandboxError::Script(format!("Unknown operation '{}'", other))),
        }
    }
}

/// A value carried by a signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignalValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<SignalValue>),
}

impl SignalValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SignalValue::Null)
    }

    /// Numeric view of the value (integers are widened)
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SignalValue::Float(v) => Some(*v),
            SignalValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SignalValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SignalValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SignalValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Convert into a Rhai value
    pub fn to_dynamic(&self) -> Dynamic {
        match self {
            SignalValue::Null => Dynamic::UNIT,
            SignalValue::Bool(v) => Dynamic::from_bool(*v),
            SignalValue::Int(v) => Dynamic::from_int(*v),
            SignalValue::Float(v) => Dynamic::from_float(*v),
            SignalValue::String(s) => Dynamic::from(s.clone()),
            SignalValue::Array(items) => {
                Dynamic::from_array(items.iter().map(SignalValue::to_dynamic).collect())
            }
        }
    }

    /// Convert from a Rhai value; shared values are flattened first.
    ///
    /// Object maps and custom types have no signal representation.
    pub fn from_dynamic(value: &Dynamic) -> crate::error::Result<Self> {
        let value = value.flatten_clone();

        if value.is_unit() {
            return Ok(SignalValue::Null);
        }
        if let Ok(v) = value.as_bool() {
            return Ok(SignalValue::Bool(v));
        }
        if let Ok(v) = value.as_int() {
            return Ok(SignalValue::Int(v));
        }
        if let Ok(v) = value.as_float() {
            return Ok(SignalValue::Float(v));
        }
        if let Ok(c) = value.as_char() {
            return Ok(SignalValue::String(c.to_string()));
        }
        if value.is_string() {
            return value
                .into_string()
                .map(SignalValue::String)
                .map_err(|t| SandboxError::Serialization(format!("Expected string, got {}", t)));
        }
        if value.is_array() {
            let items = value
                .into_array()
                .map_err(|t| SandboxError::Serialization(format!("Expected array, got {}", t)))?;
            return items
                .iter()
                .map(SignalValue::from_dynamic)
                .collect::<crate::error::Result<Vec<_>>>()
                .map(SignalValue::Array);
        }

        Err(SandboxError::Serialization(format!(
            "Value of type '{}' cannot be stored in a signal",
            value.type_name()
        )))
    }
}

impl fmt::Display for SignalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalValue::Null => write!(f, "null"),
            SignalValue::Bool(v) => write!(f, "{}", v),
            SignalValue::Int(v) => write!(f, "{}", v),
            // Debug formatting keeps the trailing ".0"
            SignalValue::Float(v) => write!(f, "{:?}", v),
            SignalValue::String(s) => write!(f, "{}", s),
            SignalValue::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<bool> for SignalValue {
    fn from(v: bool) -> Self {
        SignalValue::Bool(v)
    }
}

impl From<i64> for SignalValue {
    fn from(v: i64) -> Self {
        SignalValue::Int(v)
    }
}

impl From<i32> for SignalValue {
    fn from(v: i32) -> Self {
        SignalValue::Int(v as i64)
    }
}

impl From<f64> for SignalValue {
    fn from(v: f64) -> Self {
        SignalValue::Float(v)
    }
}

impl From<&str> for SignalValue {
    fn from(v: &str) -> Self {
        SignalValue::String(v.to_string())
    }
}

impl From<String> for SignalValue {
    fn from(v: String) -> Self {
        SignalValue::String(v)
    }
}

impl From<Vec<SignalValue>> for SignalValue {
    fn from(v: Vec<SignalValue>) -> Self {
        SignalValue::Array(v)
    }
}

impl TryFrom<serde_json::Value> for SignalValue {
    type Error = SandboxError;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        use serde_json::Value;

        Ok(match value {
            Value::Null => SignalValue::Null,
            Value::Bool(v) => SignalValue::Bool(v),
            Value::Number(n) => match n.as_i64() {
                Some(i) => SignalValue::Int(i),
                None => SignalValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => SignalValue::String(s),
            Value::Array(items) => SignalValue::Array(
                items
                    .into_iter()
                    .map(SignalValue::try_from)
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            Value::Object(_) => {
                return Err(SandboxError::Serialization(
                    "JSON objects cannot be stored in a signal".to_string(),
                ))
            }
        })
    }
}

impl From<SignalValue> for serde_json::Value {
    fn from(value: SignalValue) -> Self {
        use serde_json::Value;

        match value {
            SignalValue::Null => Value::Null,
            SignalValue::Bool(v) => Value::Bool(v),
            SignalValue::Int(v) => Value::from(v),
            SignalValue::Float(v) => serde_json::Number::from_f64(v)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            SignalValue::String(s) => Value::String(s),
            SignalValue::Array(items) => {
                Value::Array(items.into_iter().map(serde_json::Value::from).collect())
            }
        }
    }
}

/// Kind of an output log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputKind {
    /// Console output from `print` / `debug`
    #[serde(rename = "string")]
    Text,
    /// Translation or runtime error
    #[serde(rename = "error")]
    Error,
}

/// One entry of an execution's output log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputEntry {
    #[serde(rename = "type")]
    pub kind: OutputKind,
    pub text: String,
}

impl OutputEntry {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: OutputKind::Text,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            kind: OutputKind::Error,
            text: text.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.kind == OutputKind::Error
    }
}
