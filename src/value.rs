use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};

/// Represents the value of a feature flag variation.
///
/// # Examples
///
/// ```rust
/// use flagstream::Value;
///
/// let bool_val = Value::Bool(true);
/// let int_val = Value::Int(42);
/// ```
#[derive(PartialEq, Debug, Clone)]
pub enum Value {
    /// A bool flag's value.
    Bool(bool),
    /// A whole number flag's value.
    Int(i64),
    /// A decimal number flag's value.
    Float(f64),
    /// A text flag's value.
    String(String),
}

impl Value {
    /// Reads the value as `bool`. Returns [`None`] if it's not a [`Value::Bool`].
    pub fn as_bool(&self) -> Option<bool> {
        if let Value::Bool(val) = self {
            return Some(*val);
        }
        None
    }

    /// Reads the value as `i64`. Returns [`None`] if it's not a [`Value::Int`].
    pub fn as_int(&self) -> Option<i64> {
        if let Value::Int(val) = self {
            return Some(*val);
        }
        None
    }

    /// Reads the value as `f64`. Returns [`None`] if it's not a [`Value::Float`].
    pub fn as_float(&self) -> Option<f64> {
        if let Value::Float(val) = self {
            return Some(*val);
        }
        None
    }

    /// Reads the value as [`String`]. Returns [`None`] if it's not a [`Value::String`].
    pub fn as_str(&self) -> Option<String> {
        if let Value::String(val) = self {
            return Some(val.clone());
        }
        None
    }

    /// Creates a [`Value`] from a [`serde_json::Value`]. Returns [`None`] if the conversion is not possible.
    pub fn from_json_val(json_val: &serde_json::Value) -> Option<Value> {
        match json_val {
            serde_json::Value::Bool(val) => Some(Value::Bool(*val)),
            serde_json::Value::String(val) => Some(Value::String(val.clone())),
            serde_json::Value::Number(val) => {
                if let Some(int_val) = val.as_i64() {
                    return Some(Value::Int(int_val));
                }
                if let Some(float_val) = val.as_f64() {
                    return Some(Value::Float(float_val));
                }
                None
            }
            _ => None,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Bool(val) => write!(f, "{val}"),
            Value::Int(val) => write!(f, "{val}"),
            Value::Float(val) => write!(f, "{val}"),
            Value::String(val) => f.write_str(val),
        }
    }
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Value::Bool(val) => serializer.serialize_bool(*val),
            Value::Int(val) => serializer.serialize_i64(*val),
            Value::Float(val) => serializer.serialize_f64(*val),
            Value::String(val) => serializer.serialize_str(val),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let json_val = serde_json::Value::deserialize(deserializer)?;
        Value::from_json_val(&json_val)
            .ok_or_else(|| D::Error::custom("expected a boolean, number, or string value"))
    }
}

/// Represents a primitive type that can describe the value of a feature flag.
pub trait ValuePrimitive: Into<Value> {
    /// Reads the primitive value from a [`Value`].
    fn from_value(value: &Value) -> Option<Self>;
}

macro_rules! primitive_impl {
    ($ob:ident $to:ident $as_m:ident $t:ty) => (
        from_val_to_enum!($ob $to $t);

        impl ValuePrimitive for $t {
            fn from_value(value: &Value) -> Option<Self> {
                value.$as_m()
            }
        }
    )
}

primitive_impl!(Value String as_str String);
primitive_impl!(Value Float as_float f64);
primitive_impl!(Value Int as_int i64);
primitive_impl!(Value Bool as_bool bool);
from_val_to_enum_into!(Value String &str);

#[cfg(test)]
mod value_tests {
    use super::Value;

    #[test]
    fn scalar_json_round_trip() {
        let parsed: Value = serde_json::from_str("true").unwrap();
        assert_eq!(parsed, Value::Bool(true));
        let parsed: Value = serde_json::from_str("42").unwrap();
        assert_eq!(parsed, Value::Int(42));
        let parsed: Value = serde_json::from_str("1.5").unwrap();
        assert_eq!(parsed, Value::Float(1.5));
        let parsed: Value = serde_json::from_str("\"on\"").unwrap();
        assert_eq!(parsed, Value::String("on".to_owned()));

        assert_eq!(serde_json::to_string(&Value::Int(42)).unwrap(), "42");
        assert_eq!(serde_json::to_string(&Value::String("on".to_owned())).unwrap(), "\"on\"");
    }

    #[test]
    fn rejects_non_scalar() {
        assert!(serde_json::from_str::<Value>("[1, 2]").is_err());
        assert!(serde_json::from_str::<Value>("{\"a\": 1}").is_err());
    }
}
