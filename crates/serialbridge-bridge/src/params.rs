//! Flat key/value startup parameters.
//!
//! Keys are dotted paths (`topics.imu.type`), values are scalars. Nested
//! configuration sources are flattened into this shape before the bridge
//! sees them.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{BridgeError, Result};

/// One scalar parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl ParamValue {
    /// Integer view; decimal strings are accepted so that values coming from
    /// flags or environment variables behave like typed file values.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Int(v) => Some(*v),
            ParamValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// String view. Only string values qualify.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::String(s) => Some(s),
            _ => None,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ParamValue::Bool(_) => "bool",
            ParamValue::Int(_) => "integer",
            ParamValue::Float(_) => "float",
            ParamValue::String(_) => "string",
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(v) => write!(f, "{v}"),
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::String(v) => f.write_str(v),
        }
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::String(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::String(v)
    }
}

/// Ordered set of startup parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Parameters {
    values: BTreeMap<String, ParamValue>,
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a parameter, replacing any earlier value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// All parameters in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Overlay `other` on top of `self`.
    pub fn merge(&mut self, other: Parameters) {
        self.values.extend(other.values);
    }

    /// A required string parameter.
    pub fn require_str(&self, name: &str) -> Result<&str> {
        let value = self.require(name)?;
        value.as_str().ok_or_else(|| wrong_type(name, "string", value))
    }

    /// A required integer parameter.
    pub fn require_i64(&self, name: &str) -> Result<i64> {
        let value = self.require(name)?;
        value.as_i64().ok_or_else(|| wrong_type(name, "integer", value))
    }

    /// A required integer parameter that must fit `T`.
    pub fn require_int<T: TryFrom<i64>>(&self, name: &str) -> Result<T> {
        let raw = self.require_i64(name)?;
        T::try_from(raw).map_err(|_| BridgeError::InvalidParameter {
            name: name.to_string(),
            reason: format!("{raw} is out of range"),
        })
    }

    /// An optional string parameter; a present value of another type is an
    /// error.
    pub fn optional_str(&self, name: &str) -> Result<Option<&str>> {
        match self.get(name) {
            None => Ok(None),
            Some(value) => value
                .as_str()
                .map(Some)
                .ok_or_else(|| wrong_type(name, "string", value)),
        }
    }

    /// An optional integer parameter that must fit `T`.
    pub fn optional_int<T: TryFrom<i64>>(&self, name: &str) -> Result<Option<T>> {
        if self.contains(name) {
            self.require_int(name).map(Some)
        } else {
            Ok(None)
        }
    }

    fn require(&self, name: &str) -> Result<&ParamValue> {
        self.get(name)
            .ok_or_else(|| BridgeError::MissingParameter(name.to_string()))
    }
}

impl<K: Into<String>, V: Into<ParamValue>> FromIterator<(K, V)> for Parameters {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Parameters::new();
        for (k, v) in iter {
            params.insert(k, v);
        }
        params
    }
}

fn wrong_type(name: &str, expected: &str, value: &ParamValue) -> BridgeError {
    BridgeError::InvalidParameter {
        name: name.to_string(),
        reason: format!("expected {expected}, got {} '{value}'", value.kind()),
    }
}
