// Switchboard - JSON-RPC multiplexing proxy
// Copyright (C) 2025 The Switchboard Authors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! The tagged RPC value model shared by the wire and proxy layers.
//!
//! Every value travelling through the dispatcher or the proxy is one of these
//! variants. Ownership is strict: a subtree has exactly one owner, deep copies
//! are explicit (`Clone`) and moving a value across the proxy's asynchronous
//! boundaries transfers the whole subtree.

use std::{collections::BTreeMap, fmt};

use thiserror::Error;

/// Type tag of a [`Value`], used in dispatch checks and error reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// The JSON `null` literal.
    Null,
    /// `true` / `false`.
    Bool,
    /// 64-bit signed integer.
    Int,
    /// 64-bit floating point number.
    Float,
    /// UTF-8 text.
    Str,
    /// Ordered sequence of owned values.
    Array,
    /// String-keyed mapping of owned values.
    Object,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Null => "null",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::Str => "string",
            Self::Array => "array",
            Self::Object => "object",
        };
        f.write_str(name)
    }
}

/// Error returned by the typed accessors when the caller assumed the wrong tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("type mismatch: expected {expected}, got {actual}")]
pub struct TypeMismatchError {
    /// The kind the accessor was asked for.
    pub expected: Kind,
    /// The kind the value actually carries.
    pub actual: Kind,
}

/// A dynamically tagged, recursively owned RPC value.
///
/// Object keys are unique and their insertion order is not significant, hence
/// the `BTreeMap` (which also keeps serialization deterministic).
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// The JSON `null` literal.
    #[default]
    Null,
    /// `true` / `false`.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit floating point number.
    Float(f64),
    /// UTF-8 text.
    Str(String),
    /// Ordered sequence of owned values.
    Array(Vec<Value>),
    /// String-keyed mapping of owned values.
    Object(BTreeMap<String, Value>),
}

impl Value {
    /// Returns the type tag of this value.
    pub fn kind(&self) -> Kind {
        match self {
            Self::Null => Kind::Null,
            Self::Bool(_) => Kind::Bool,
            Self::Int(_) => Kind::Int,
            Self::Float(_) => Kind::Float,
            Self::Str(_) => Kind::Str,
            Self::Array(_) => Kind::Array,
            Self::Object(_) => Kind::Object,
        }
    }

    /// True if this value is `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    fn mismatch(&self, expected: Kind) -> TypeMismatchError {
        TypeMismatchError { expected, actual: self.kind() }
    }

    /// Reads a boolean, failing on any other tag.
    pub fn as_bool(&self) -> Result<bool, TypeMismatchError> {
        match self {
            Self::Bool(b) => Ok(*b),
            other => Err(other.mismatch(Kind::Bool)),
        }
    }

    /// Reads an integer, failing on any other tag.
    pub fn as_i64(&self) -> Result<i64, TypeMismatchError> {
        match self {
            Self::Int(i) => Ok(*i),
            other => Err(other.mismatch(Kind::Int)),
        }
    }

    /// Reads an integer that must fit `i32` (connection and call ids on the
    /// wire are 32-bit). Out-of-range integers are reported as a mismatch.
    pub fn as_i32(&self) -> Result<i32, TypeMismatchError> {
        let wide = self.as_i64()?;
        i32::try_from(wide).map_err(|_| self.mismatch(Kind::Int))
    }

    /// Reads a number, widening `Int` to `Float`. This is the only implicit
    /// coercion the model performs.
    pub fn as_f64(&self) -> Result<f64, TypeMismatchError> {
        match self {
            Self::Float(f) => Ok(*f),
            Self::Int(i) => Ok(*i as f64),
            other => Err(other.mismatch(Kind::Float)),
        }
    }

    /// Borrows the text of a string value.
    pub fn as_str(&self) -> Result<&str, TypeMismatchError> {
        match self {
            Self::Str(s) => Ok(s),
            other => Err(other.mismatch(Kind::Str)),
        }
    }

    /// Borrows the elements of an array value.
    pub fn as_array(&self) -> Result<&[Value], TypeMismatchError> {
        match self {
            Self::Array(items) => Ok(items),
            other => Err(other.mismatch(Kind::Array)),
        }
    }

    /// Borrows the entries of an object value.
    pub fn as_object(&self) -> Result<&BTreeMap<String, Value>, TypeMismatchError> {
        match self {
            Self::Object(entries) => Ok(entries),
            other => Err(other.mismatch(Kind::Object)),
        }
    }

    /// Takes ownership of a string value.
    pub fn into_string(self) -> Result<String, TypeMismatchError> {
        match self {
            Self::Str(s) => Ok(s),
            other => Err(other.mismatch(Kind::Str)),
        }
    }

    /// Takes ownership of an array's elements.
    pub fn into_array(self) -> Result<Vec<Value>, TypeMismatchError> {
        match self {
            Self::Array(items) => Ok(items),
            other => Err(other.mismatch(Kind::Array)),
        }
    }

    /// Takes ownership of an object's entries.
    pub fn into_object(self) -> Result<BTreeMap<String, Value>, TypeMismatchError> {
        match self {
            Self::Object(entries) => Ok(entries),
            other => Err(other.mismatch(Kind::Object)),
        }
    }

    /// Moves this value out, leaving `Null` behind. The explicit-emptying
    /// counterpart of transferring a subtree to another call frame.
    pub fn take(&mut self) -> Self {
        std::mem::take(self)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

macro_rules! impl_from_int {
    ($($ty:ty),*) => {$(
        impl From<$ty> for Value {
            fn from(i: $ty) -> Self {
                Self::Int(i64::from(i))
            }
        }
    )*};
}

impl_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<f32> for Value {
    fn from(f: f32) -> Self {
        Self::Float(f64::from(f))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Self::Array(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<BTreeMap<String, T>> for Value {
    fn from(entries: BTreeMap<String, T>) -> Self {
        Self::Object(entries.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

impl FromIterator<Value> for Value {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self::Array(iter.into_iter().collect())
    }
}

impl FromIterator<(String, Value)> for Value {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self::Object(iter.into_iter().collect())
    }
}

impl From<serde_json::Value> for Value {
    /// Interop with the serde_json model. `u64` numbers beyond `i64::MAX`
    /// degrade to floats.
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else {
                    Self::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Self::Str(s),
            serde_json::Value::Array(items) => {
                Self::Array(items.into_iter().map(Into::into).collect())
            }
            serde_json::Value::Object(entries) => {
                Self::Object(entries.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

impl From<Value> for serde_json::Value {
    /// Interop with the serde_json model. Non-finite floats (which JSON
    /// cannot carry) become `null`.
    fn from(v: Value) -> Self {
        match v {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Int(i) => Self::from(i),
            Value::Float(f) => {
                serde_json::Number::from_f64(f).map(Self::Number).unwrap_or(Self::Null)
            }
            Value::Str(s) => Self::String(s),
            Value::Array(items) => Self::Array(items.into_iter().map(Into::into).collect()),
            Value::Object(entries) => {
                Self::Object(entries.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_and_accessors() {
        assert_eq!(Value::Null.kind(), Kind::Null);
        assert_eq!(Value::from(3).as_i64(), Ok(3));
        assert_eq!(Value::from("x").as_str(), Ok("x"));
        assert_eq!(Value::from(true).as_bool(), Ok(true));

        let err = Value::from("x").as_i64().unwrap_err();
        assert_eq!(err, TypeMismatchError { expected: Kind::Int, actual: Kind::Str });
        assert_eq!(err.to_string(), "type mismatch: expected int, got string");
    }

    #[test]
    fn test_number_widening() {
        // An accessor for "a number" accepts either tag; nothing else widens.
        assert_eq!(Value::from(2).as_f64(), Ok(2.0));
        assert_eq!(Value::from(2.5).as_f64(), Ok(2.5));
        assert!(Value::from(2.0).as_i64().is_err());
        assert!(Value::from("2").as_f64().is_err());
    }

    #[test]
    fn test_i32_range_check() {
        assert_eq!(Value::from(-1).as_i32(), Ok(-1));
        assert!(Value::Int(i64::from(i32::MAX) + 1).as_i32().is_err());
    }

    #[test]
    fn test_deep_copy_is_independent() {
        let original = Value::from(vec![Value::from(1), Value::from(vec!["a", "b"])]);
        let mut copy = original.clone();
        if let Value::Array(items) = &mut copy {
            items.clear();
        }
        assert_eq!(original.as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_take_leaves_null() {
        let mut v = Value::from("payload");
        let moved = v.take();
        assert_eq!(moved, Value::from("payload"));
        assert!(v.is_null());
    }

    #[test]
    fn test_collect_object() {
        let v: Value =
            [("a".to_string(), Value::from(1)), ("b".to_string(), Value::Null)].into_iter().collect();
        assert_eq!(v.as_object().unwrap().len(), 2);
    }

    #[test]
    fn test_serde_json_round_trip() {
        let json: serde_json::Value = serde_json::from_str(
            r#"{"a": [1, 2.5, "x", null], "b": {"nested": true}, "c": -7}"#,
        )
        .unwrap();
        let ours = Value::from(json.clone());
        assert_eq!(ours.as_object().unwrap()["c"].as_i64(), Ok(-7));
        let back: serde_json::Value = ours.into();
        assert_eq!(back, json);
    }
}
