//! ## evbus-core::value
//! **Serializable payload values**
//!
//! Every argument that can cross a process boundary is a [`Value`]. Handler
//! parameters are decoded from values through [`FromValue`]; publishers build
//! them through [`IntoValue`].

use std::fmt;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ArgError;

/// A single payload element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    /// Non-finite floats are written as the strings `"NaN"`, `"inf"` and `"-inf"`.
    Float(#[serde(with = "float_repr")] f64),
    Str(String),
    Bytes(Bytes),
    List(Vec<Value>),
    /// Structured data carried as JSON (see [`Json`]).
    Json(serde_json::Value),
}

mod float_repr {
    use serde::de::{self, Deserializer};
    use serde::{Deserialize, Serializer};

    pub fn serialize<S: Serializer>(f: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if f.is_finite() {
            serializer.serialize_f64(*f)
        } else if f.is_nan() {
            serializer.serialize_str("NaN")
        } else if f.is_sign_positive() {
            serializer.serialize_str("inf")
        } else {
            serializer.serialize_str("-inf")
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Number(f) => Ok(f),
            Repr::Text(text) => match text.as_str() {
                "NaN" => Ok(f64::NAN),
                "inf" => Ok(f64::INFINITY),
                "-inf" => Ok(f64::NEG_INFINITY),
                other => Err(de::Error::invalid_value(
                    de::Unexpected::Str(other),
                    &"a number, \"NaN\", \"inf\" or \"-inf\"",
                )),
            },
        }
    }
}

/// Shape of a [`Value`], used in handler signatures and mismatch reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    Null,
    Bool,
    Int,
    Float,
    Str,
    Bytes,
    List,
    Json,
    /// Accepts any value.
    Any,
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::Str(_) => ValueKind::Str,
            Value::Bytes(_) => ValueKind::Bytes,
            Value::List(_) => ValueKind::List,
            Value::Json(_) => ValueKind::Json,
        }
    }

    /// Encodes any serde type as [`Value::Json`].
    pub fn json<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_value(value).map(Value::Json)
    }
}

impl ValueKind {
    pub fn accepts(self, found: ValueKind) -> bool {
        self == ValueKind::Any || self == found
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Null => "null",
            ValueKind::Bool => "bool",
            ValueKind::Int => "int",
            ValueKind::Float => "float",
            ValueKind::Str => "string",
            ValueKind::Bytes => "bytes",
            ValueKind::List => "list",
            ValueKind::Json => "json",
            ValueKind::Any => "any",
        };
        f.write_str(name)
    }
}

/// Conversion into a payload value.
pub trait IntoValue {
    fn into_value(self) -> Value;
}

/// Conversion out of a payload value.
pub trait FromValue: Sized {
    /// The value kind this type decodes from.
    const KIND: ValueKind;

    fn from_value(value: Value) -> Result<Self, ArgError>;
}

fn mismatch(expected: ValueKind, found: &Value) -> ArgError {
    ArgError::Mismatch {
        expected,
        found: found.kind(),
    }
}

impl IntoValue for Value {
    fn into_value(self) -> Value {
        self
    }
}

impl FromValue for Value {
    const KIND: ValueKind = ValueKind::Any;

    fn from_value(value: Value) -> Result<Self, ArgError> {
        Ok(value)
    }
}

impl IntoValue for () {
    fn into_value(self) -> Value {
        Value::Null
    }
}

impl FromValue for () {
    const KIND: ValueKind = ValueKind::Null;

    fn from_value(value: Value) -> Result<Self, ArgError> {
        match value {
            Value::Null => Ok(()),
            other => Err(mismatch(Self::KIND, &other)),
        }
    }
}

impl IntoValue for bool {
    fn into_value(self) -> Value {
        Value::Bool(self)
    }
}

impl FromValue for bool {
    const KIND: ValueKind = ValueKind::Bool;

    fn from_value(value: Value) -> Result<Self, ArgError> {
        match value {
            Value::Bool(b) => Ok(b),
            other => Err(mismatch(Self::KIND, &other)),
        }
    }
}

macro_rules! impl_int_into {
    ($($t:ty),*) => {
        $(
            impl IntoValue for $t {
                fn into_value(self) -> Value {
                    Value::Int(i64::from(self))
                }
            }
        )*
    };
}

impl_int_into!(i8, i16, i32, i64, u8, u16, u32);

macro_rules! impl_wide_int_into {
    ($($t:ty),*) => {
        $(
            /// Values beyond the `i64` range are carried as a float.
            impl IntoValue for $t {
                fn into_value(self) -> Value {
                    match i64::try_from(self) {
                        Ok(n) => Value::Int(n),
                        Err(_) => {
                            tracing::warn!(value = %self, "integer exceeds i64, sent as float");
                            Value::Float(self as f64)
                        }
                    }
                }
            }
        )*
    };
}

impl_wide_int_into!(isize, u64, usize);

macro_rules! impl_int_from {
    ($($t:ty),*) => {
        $(
            impl FromValue for $t {
                const KIND: ValueKind = ValueKind::Int;

                fn from_value(value: Value) -> Result<Self, ArgError> {
                    match value {
                        Value::Int(n) => <$t>::try_from(n).map_err(|_| ArgError::OutOfRange {
                            value: n,
                            target: stringify!($t),
                        }),
                        other => Err(mismatch(Self::KIND, &other)),
                    }
                }
            }
        )*
    };
}

impl_int_from!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

impl IntoValue for f64 {
    fn into_value(self) -> Value {
        Value::Float(self)
    }
}

impl IntoValue for f32 {
    fn into_value(self) -> Value {
        Value::Float(f64::from(self))
    }
}

impl FromValue for f64 {
    const KIND: ValueKind = ValueKind::Float;

    fn from_value(value: Value) -> Result<Self, ArgError> {
        match value {
            Value::Float(f) => Ok(f),
            other => Err(mismatch(Self::KIND, &other)),
        }
    }
}

impl FromValue for f32 {
    const KIND: ValueKind = ValueKind::Float;

    fn from_value(value: Value) -> Result<Self, ArgError> {
        f64::from_value(value).map(|f| f as f32)
    }
}

impl IntoValue for String {
    fn into_value(self) -> Value {
        Value::Str(self)
    }
}

impl IntoValue for &str {
    fn into_value(self) -> Value {
        Value::Str(self.to_owned())
    }
}

impl FromValue for String {
    const KIND: ValueKind = ValueKind::Str;

    fn from_value(value: Value) -> Result<Self, ArgError> {
        match value {
            Value::Str(s) => Ok(s),
            other => Err(mismatch(Self::KIND, &other)),
        }
    }
}

impl IntoValue for Bytes {
    fn into_value(self) -> Value {
        Value::Bytes(self)
    }
}

impl IntoValue for Vec<u8> {
    fn into_value(self) -> Value {
        Value::Bytes(Bytes::from(self))
    }
}

impl FromValue for Bytes {
    const KIND: ValueKind = ValueKind::Bytes;

    fn from_value(value: Value) -> Result<Self, ArgError> {
        match value {
            Value::Bytes(b) => Ok(b),
            other => Err(mismatch(Self::KIND, &other)),
        }
    }
}

impl FromValue for Vec<u8> {
    const KIND: ValueKind = ValueKind::Bytes;

    fn from_value(value: Value) -> Result<Self, ArgError> {
        Bytes::from_value(value).map(|b| b.to_vec())
    }
}

impl IntoValue for Vec<Value> {
    fn into_value(self) -> Value {
        Value::List(self)
    }
}

impl FromValue for Vec<Value> {
    const KIND: ValueKind = ValueKind::List;

    fn from_value(value: Value) -> Result<Self, ArgError> {
        match value {
            Value::List(items) => Ok(items),
            other => Err(mismatch(Self::KIND, &other)),
        }
    }
}

/// Wrapper carrying any serde type as [`Value::Json`].
///
/// ```
/// use evbus_core::value::{IntoValue, Json};
/// #[derive(serde::Serialize)]
/// struct Order { id: u32 }
/// let value = Json(Order { id: 7 }).into_value();
/// assert_eq!(value.kind(), evbus_core::value::ValueKind::Json);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Json<T>(pub T);

impl<T: Serialize> IntoValue for Json<T> {
    /// A type whose `Serialize` impl fails is carried as JSON `null` and a
    /// warning is logged. Use [`Value::json`] to handle the error instead.
    fn into_value(self) -> Value {
        match serde_json::to_value(&self.0) {
            Ok(json) => Value::Json(json),
            Err(error) => {
                tracing::warn!(%error, "json payload could not be encoded, sending null");
                Value::Json(serde_json::Value::Null)
            }
        }
    }
}

impl<T: DeserializeOwned> FromValue for Json<T> {
    const KIND: ValueKind = ValueKind::Json;

    fn from_value(value: Value) -> Result<Self, ArgError> {
        match value {
            Value::Json(json) => serde_json::from_value(json)
                .map(Json)
                .map_err(|e| ArgError::Decode(e.to_string())),
            other => Err(mismatch(Self::KIND, &other)),
        }
    }
}
