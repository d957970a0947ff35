use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Typed metadata value
///
/// Replaces dynamically-typed metadata with a tagged union so conflict
/// conditions and namespace policies can inspect values without reflection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum MetaValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<MetaValue>),
    Map(BTreeMap<String, MetaValue>),
}

impl MetaValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MetaValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            MetaValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            MetaValue::Float(f) => Some(*f),
            MetaValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetaValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[MetaValue]> {
        match self {
            MetaValue::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, MetaValue>> {
        match self {
            MetaValue::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Look up a nested field by key (maps only)
    pub fn get(&self, key: &str) -> Option<&MetaValue> {
        self.as_map().and_then(|m| m.get(key))
    }
}

impl From<bool> for MetaValue {
    fn from(b: bool) -> Self {
        MetaValue::Bool(b)
    }
}

impl From<i64> for MetaValue {
    fn from(i: i64) -> Self {
        MetaValue::Int(i)
    }
}

impl From<f64> for MetaValue {
    fn from(f: f64) -> Self {
        MetaValue::Float(f)
    }
}

impl From<&str> for MetaValue {
    fn from(s: &str) -> Self {
        MetaValue::Str(s.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(s: String) -> Self {
        MetaValue::Str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meta_value_accessors() {
        assert_eq!(MetaValue::from(true).as_bool(), Some(true));
        assert_eq!(MetaValue::from(42i64).as_int(), Some(42));
        assert_eq!(MetaValue::from(42i64).as_float(), Some(42.0));
        assert_eq!(MetaValue::from("hi").as_str(), Some("hi"));
        assert_eq!(MetaValue::from("hi").as_int(), None);
    }

    #[test]
    fn test_meta_value_nested_lookup() {
        let mut inner = BTreeMap::new();
        inner.insert("level".to_string(), MetaValue::Int(3));
        let value = MetaValue::Map(inner);

        assert_eq!(value.get("level").and_then(|v| v.as_int()), Some(3));
        assert!(value.get("missing").is_none());
    }

    #[test]
    fn test_meta_value_serde_roundtrip() {
        let value = MetaValue::List(vec![
            MetaValue::Int(1),
            MetaValue::Str("two".to_string()),
            MetaValue::Bool(false),
        ]);
        let json = serde_json::to_string(&value).unwrap();
        let back: MetaValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, value);
    }
}
