//! Typed bag for free-form frontmatter keys.

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Number, Value};
use std::collections::BTreeMap;

/// Frontmatter key holding a task's workflow status.
pub const TASK_STATUS_KEY: &str = "status";

/// A frontmatter value the engine does not interpret.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CustomValue {
    /// `~` / `null`.
    Null,
    /// `true` / `false`.
    Bool(bool),
    /// Integer scalar.
    Int(i64),
    /// Non-integer number.
    Float(f64),
    /// String scalar (dates stay strings).
    String(String),
    /// Sequence of values.
    List(Vec<CustomValue>),
    /// Nested mapping with string keys.
    Map(BTreeMap<String, CustomValue>),
}

impl CustomValue {
    /// Borrow as a string slice.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }

    /// Read as bool.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(flag) => Some(*flag),
            _ => None,
        }
    }

    /// Read as integer.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// Read as float (integers widen).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(value) => Some(*value),
            Self::Int(value) => Some(*value as f64),
            _ => None,
        }
    }

    /// Borrow as a list.
    #[must_use]
    pub fn as_list(&self) -> Option<&[CustomValue]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Convert from a parsed YAML value. Tagged values keep their inner value.
    #[must_use]
    pub fn from_yaml(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(flag) => Self::Bool(*flag),
            Value::Number(number) => number.as_i64().map_or_else(
                || Self::Float(number.as_f64().unwrap_or_default()),
                Self::Int,
            ),
            Value::String(text) => Self::String(text.clone()),
            Value::Sequence(items) => Self::List(items.iter().map(Self::from_yaml).collect()),
            Value::Mapping(map) => Self::Map(
                map.iter()
                    .map(|(key, value)| (yaml_key_to_string(key), Self::from_yaml(value)))
                    .collect(),
            ),
            Value::Tagged(tagged) => Self::from_yaml(&tagged.value),
        }
    }

    /// Convert back into a YAML value for serialization.
    #[must_use]
    pub fn to_yaml(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(flag) => Value::Bool(*flag),
            Self::Int(value) => Value::Number(Number::from(*value)),
            Self::Float(value) => Value::Number(Number::from(*value)),
            Self::String(text) => Value::String(text.clone()),
            Self::List(items) => Value::Sequence(items.iter().map(Self::to_yaml).collect()),
            Self::Map(map) => {
                let mut out = Mapping::new();
                for (key, value) in map {
                    out.insert(Value::String(key.clone()), value.to_yaml());
                }
                Value::Mapping(out)
            }
        }
    }
}

impl From<&str> for CustomValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for CustomValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for CustomValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for CustomValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

pub(crate) fn yaml_key_to_string(key: &Value) -> String {
    match key {
        Value::String(text) => text.clone(),
        Value::Number(number) => number.to_string(),
        Value::Bool(flag) => flag.to_string(),
        Value::Null => "null".to_string(),
        other => serde_yaml::to_string(other)
            .map(|raw| raw.trim().to_string())
            .unwrap_or_default(),
    }
}

/// Ordered map of custom frontmatter keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CustomFields(BTreeMap<String, CustomValue>);

impl CustomFields {
    /// Empty bag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a key, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<CustomValue>) -> Option<CustomValue> {
        self.0.insert(key.into(), value.into())
    }

    /// Remove a key.
    pub fn remove(&mut self, key: &str) -> Option<CustomValue> {
        self.0.remove(key)
    }

    /// Raw value lookup.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&CustomValue> {
        self.0.get(key)
    }

    /// String value lookup.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(CustomValue::as_str)
    }

    /// Bool value lookup.
    #[must_use]
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(CustomValue::as_bool)
    }

    /// Integer value lookup.
    #[must_use]
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(CustomValue::as_i64)
    }

    /// List value lookup.
    #[must_use]
    pub fn get_list(&self, key: &str) -> Option<&[CustomValue]> {
        self.get(key).and_then(CustomValue::as_list)
    }

    /// Task workflow status (`status:` key).
    #[must_use]
    pub fn task_status(&self) -> Option<&str> {
        self.get_str(TASK_STATUS_KEY)
    }

    /// Whether the bag has no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterate keys in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &CustomValue)> {
        self.0.iter()
    }
}

impl FromIterator<(String, CustomValue)> for CustomFields {
    fn from_iter<T: IntoIterator<Item = (String, CustomValue)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_conversion_keeps_kinds() {
        let yaml: Value = serde_yaml::from_str(
            "owner: kevin\ncount: 3\nratio: 0.5\ndone: false\nitems: [a, 1]\nnested:\n  k: v\n",
        )
        .unwrap();
        let Value::Mapping(map) = yaml else {
            panic!("expected mapping");
        };
        let fields: CustomFields = map
            .iter()
            .map(|(k, v)| (yaml_key_to_string(k), CustomValue::from_yaml(v)))
            .collect();

        assert_eq!(fields.get_str("owner"), Some("kevin"));
        assert_eq!(fields.get_i64("count"), Some(3));
        assert_eq!(fields.get("ratio").and_then(CustomValue::as_f64), Some(0.5));
        assert_eq!(fields.get_bool("done"), Some(false));
        assert_eq!(fields.get_list("items").map(<[CustomValue]>::len), Some(2));
        assert!(matches!(fields.get("nested"), Some(CustomValue::Map(_))));

        for (_, value) in fields.iter() {
            assert_eq!(&CustomValue::from_yaml(&value.to_yaml()), value);
        }
    }

    #[test]
    fn test_task_status_accessor() {
        let mut fields = CustomFields::new();
        fields.insert(TASK_STATUS_KEY, "done");
        assert_eq!(fields.task_status(), Some("done"));
        fields.remove(TASK_STATUS_KEY);
        assert_eq!(fields.task_status(), None);
    }
}
