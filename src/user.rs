use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::fmt::{Display, Formatter};

const KEY_ATTRIBUTES: [&str; 2] = ["key", "keyid"];
const NAME_ATTRIBUTE: &str = "name";

/// Supported user attribute value types.
#[derive(Debug, Clone, PartialEq)]
pub enum UserValue {
    /// String user attribute value.
    String(String),
    /// Signed integer user attribute value.
    Int(i64),
    /// Float user attribute value.
    Float(f64),
    /// Bool user attribute value.
    Bool(bool),
}

impl UserValue {
    pub(crate) fn as_str(&self) -> String {
        match self {
            UserValue::String(val) => val.clone(),
            UserValue::Int(val) => val.to_string(),
            UserValue::Float(val) => val.to_string(),
            UserValue::Bool(val) => val.to_string(),
        }
    }

    pub(crate) fn as_float(&self) -> Option<f64> {
        match self {
            UserValue::String(val) => val.trim().parse().ok(),
            UserValue::Int(val) => Some(*val as f64),
            UserValue::Float(val) => Some(*val),
            UserValue::Bool(_) => None,
        }
    }
}

impl Display for UserValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str().as_str())
    }
}

/// Describes a user context. Contains the attributes used for evaluating targeting
/// rules and percentage rollouts.
///
/// A user context has two required attributes, `key` and `name`. The `key` uniquely
/// identifies the user and serves as the default input of rollout bucketing. Any
/// number of additional scalar attributes can be attached for rule targeting.
/// The SDK never persists user contexts beyond the duration of one evaluation call.
///
/// # Examples
///
/// ```rust
/// use flagstream::User;
///
/// let user = User::new("u-123", "Jane")
///     .custom("country", "US")
///     .custom("age", 42);
/// ```
#[derive(Debug, Clone)]
pub struct User {
    key: String,
    name: String,
    custom: HashMap<String, UserValue>,
}

impl User {
    /// Initializes a new [`User`] with the two required attributes.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use flagstream::User;
    ///
    /// let user = User::new("u-123", "Jane");
    /// ```
    pub fn new(key: &str, name: &str) -> Self {
        Self {
            key: key.to_owned(),
            name: name.to_owned(),
            custom: HashMap::new(),
        }
    }

    /// Custom attribute of the user for advanced targeting rule definitions
    /// (e.g. user role, subscription type, etc.).
    ///
    /// Attempts to overwrite the built-in `key`, `keyid`, or `name` attributes are ignored.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use flagstream::User;
    ///
    /// let user = User::new("u-123", "Jane")
    ///     .custom("country", "US")
    ///     .custom("beta_opt_in", true);
    /// ```
    pub fn custom<T: Into<UserValue>>(mut self, key: &str, value: T) -> Self {
        let lower = key.to_lowercase();
        if KEY_ATTRIBUTES.contains(&lower.as_str()) || lower == NAME_ATTRIBUTE {
            return self;
        }
        self.custom.insert(key.to_owned(), value.into());
        self
    }

    /// The unique key of the user.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The display name of the user.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn get(&self, attribute: &str) -> Option<UserValue> {
        if let Some(val) = self.custom.get(attribute) {
            return Some(val.clone());
        }
        let lower = attribute.to_lowercase();
        if KEY_ATTRIBUTES.contains(&lower.as_str()) {
            return Some(UserValue::String(self.key.clone()));
        }
        if lower == NAME_ATTRIBUTE {
            return Some(UserValue::String(self.name.clone()));
        }
        None
    }

    pub(crate) fn is_valid(&self) -> bool {
        !self.key.trim().is_empty() && !self.name.trim().is_empty()
    }
}

impl Serialize for User {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        struct CustomProperties<'a>(&'a HashMap<String, UserValue>);

        impl Serialize for CustomProperties<'_> {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                #[derive(Serialize)]
                struct Property<'a> {
                    name: &'a str,
                    value: String,
                }
                let mut seq = serializer.serialize_seq(Some(self.0.len()))?;
                for (name, value) in self.0 {
                    seq.serialize_element(&Property {
                        name: name.as_str(),
                        value: value.as_str(),
                    })?;
                }
                seq.end()
            }
        }

        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry("keyId", &self.key)?;
        map.serialize_entry("name", &self.name)?;
        map.serialize_entry("customizedProperties", &CustomProperties(&self.custom))?;
        map.end()
    }
}

impl Display for User {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match serde_json::to_string(self) {
            Ok(str) => write!(f, "{str}"),
            Err(_) => f.write_str("<invalid user>"),
        }
    }
}

from_val_to_enum!(UserValue String String);
from_val_to_enum!(UserValue Bool bool);
from_val_to_enum_into!(UserValue Float f64 f32);
from_val_to_enum_into!(UserValue Int i8 i16 i32 i64 u8 u16 u32);
from_val_to_enum_into!(UserValue String &str);

#[cfg(test)]
mod user_tests {
    use super::{User, UserValue};

    #[test]
    fn builtin_attributes_resolve_case_insensitively() {
        let user = User::new("u1", "Jane");
        assert_eq!(user.get("key").unwrap().as_str(), "u1");
        assert_eq!(user.get("KeyId").unwrap().as_str(), "u1");
        assert_eq!(user.get("Name").unwrap().as_str(), "Jane");
        assert!(user.get("country").is_none());
    }

    #[test]
    fn builtin_attributes_cannot_be_overwritten() {
        let user = User::new("u1", "Jane").custom("keyid", "other").custom("country", "US");
        assert_eq!(user.get("keyid").unwrap().as_str(), "u1");
        assert_eq!(user.get("country").unwrap().as_str(), "US");
    }

    #[test]
    fn numeric_conversion() {
        assert_eq!(UserValue::from("2.5").as_float().unwrap(), 2.5);
        assert_eq!(UserValue::from(3).as_float().unwrap(), 3.0);
        assert!(UserValue::from(true).as_float().is_none());
        assert!(UserValue::from("not a number").as_float().is_none());
    }

    #[test]
    fn validity_requires_key_and_name() {
        assert!(User::new("u1", "Jane").is_valid());
        assert!(!User::new("", "Jane").is_valid());
        assert!(!User::new("u1", "  ").is_valid());
    }
}
