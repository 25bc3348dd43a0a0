//! Anchor metadata values
//!
//! Metadata is an ordered string-keyed map over a small closed set of JSON
//! shapes. `null` is not representable, which keeps two spellings of "no
//! value" from hashing differently.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ValidationError;

/// Ordered metadata map; keys are sorted, which is also the hashing order
pub type Metadata = BTreeMap<String, MetadataValue>;

/// A JSON-compatible metadata value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Array(Vec<MetadataValue>),
    Map(BTreeMap<String, MetadataValue>),
}

impl MetadataValue {
    /// Build a float value; NaN and infinities have no JSON form
    pub fn float(value: f64) -> Option<Self> {
        serde_json::Number::from_f64(value).map(Self::Number)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        Self::Number(value.into())
    }
}

impl From<u64> for MetadataValue {
    fn from(value: u64) -> Self {
        Self::Number(value.into())
    }
}

impl<T: Into<MetadataValue>> From<Vec<T>> for MetadataValue {
    fn from(values: Vec<T>) -> Self {
        Self::Array(values.into_iter().map(Into::into).collect())
    }
}

impl TryFrom<serde_json::Value> for MetadataValue {
    type Error = ValidationError;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        use serde_json::Value;
        match value {
            Value::Null => Err(ValidationError::new(
                "metadata",
                "null values are not allowed",
            )),
            Value::Bool(b) => Ok(Self::Bool(b)),
            Value::Number(n) => Ok(Self::Number(n)),
            Value::String(s) => Ok(Self::String(s)),
            Value::Array(items) => items
                .into_iter()
                .map(Self::try_from)
                .collect::<Result<Vec<_>, _>>()
                .map(Self::Array),
            Value::Object(map) => map
                .into_iter()
                .map(|(k, v)| Self::try_from(v).map(|v| (k, v)))
                .collect::<Result<BTreeMap<_, _>, _>>()
                .map(Self::Map),
        }
    }
}

impl From<MetadataValue> for serde_json::Value {
    fn from(value: MetadataValue) -> Self {
        match value {
            MetadataValue::Bool(b) => Self::Bool(b),
            MetadataValue::Number(n) => Self::Number(n),
            MetadataValue::String(s) => Self::String(s),
            MetadataValue::Array(items) => Self::Array(items.into_iter().map(Into::into).collect()),
            MetadataValue::Map(map) => {
                Self::Object(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_conversion_keeps_shape() {
        let raw = json!({"b": [1, "two", true], "a": {"nested": 2.5}});
        let value = MetadataValue::try_from(raw.clone()).unwrap();
        assert_eq!(serde_json::Value::from(value), raw);
    }

    #[test]
    fn test_null_rejected() {
        assert!(MetadataValue::try_from(json!({"k": null})).is_err());
        assert!(serde_json::from_value::<MetadataValue>(json!(null)).is_err());
    }

    #[test]
    fn test_float_rejects_nan() {
        assert!(MetadataValue::float(f64::NAN).is_none());
        assert!(MetadataValue::float(1.5).is_some());
    }
}
