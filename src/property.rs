//! Property bags exchanged with the modem daemon
//!
//! `PropertyMap` is the typed key/value store every remote interface speaks.
//! Getters return `None` both for absent keys and for type mismatches, so
//! callers treat "wrong type" the same as "not reported".

use std::collections::HashMap;

/// A single remote property value
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Bool(bool),
    Int(i32),
    Uint(u32),
    Uint64(u64),
    String(String),
    Strings(Vec<String>),
    ObjectPath(String),
    ObjectPaths(Vec<String>),
    Uints(Vec<u32>),
    Map(PropertyMap),
    /// Lock type code -> retries left
    LockRetries(HashMap<u32, u32>),
    /// (quality percent, recently updated)
    SignalQuality(u32, bool),
    Structure(Vec<PropertyValue>),
}

/// Typed key/value store
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyMap {
    values: HashMap<String, PropertyValue>,
}

impl PropertyMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &str, value: PropertyValue) {
        self.values.insert(key.to_string(), value);
    }

    pub fn with(mut self, key: &str, value: PropertyValue) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<PropertyValue> {
        self.values.remove(key)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key)? {
            PropertyValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_int(&self, key: &str) -> Option<i32> {
        match self.get(key)? {
            PropertyValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_uint(&self, key: &str) -> Option<u32> {
        match self.get(key)? {
            PropertyValue::Uint(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        match self.get(key)? {
            PropertyValue::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn get_strings(&self, key: &str) -> Option<&[String]> {
        match self.get(key)? {
            PropertyValue::Strings(v) => Some(v),
            _ => None,
        }
    }

    pub fn get_object_path(&self, key: &str) -> Option<&str> {
        match self.get(key)? {
            PropertyValue::ObjectPath(v) => Some(v),
            _ => None,
        }
    }

    pub fn get_object_paths(&self, key: &str) -> Option<&[String]> {
        match self.get(key)? {
            PropertyValue::ObjectPaths(v) => Some(v),
            _ => None,
        }
    }

    pub fn get_uints(&self, key: &str) -> Option<&[u32]> {
        match self.get(key)? {
            PropertyValue::Uints(v) => Some(v),
            _ => None,
        }
    }

    pub fn get_map(&self, key: &str) -> Option<&PropertyMap> {
        match self.get(key)? {
            PropertyValue::Map(v) => Some(v),
            _ => None,
        }
    }

    pub fn get_lock_retries(&self, key: &str) -> Option<&HashMap<u32, u32>> {
        match self.get(key)? {
            PropertyValue::LockRetries(v) => Some(v),
            _ => None,
        }
    }

    pub fn get_signal_quality(&self, key: &str) -> Option<(u32, bool)> {
        match self.get(key)? {
            PropertyValue::SignalQuality(q, recent) => Some((*q, *recent)),
            _ => None,
        }
    }
}

impl FromIterator<(String, PropertyValue)> for PropertyMap {
    fn from_iter<I: IntoIterator<Item = (String, PropertyValue)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_getters_reject_mismatch() {
        let map = PropertyMap::new()
            .with("State", PropertyValue::Int(11))
            .with("Plugin", PropertyValue::String("Generic".to_string()));

        assert_eq!(map.get_int("State"), Some(11));
        assert_eq!(map.get_uint("State"), None);
        assert_eq!(map.get_string("Plugin"), Some("Generic"));
        assert_eq!(map.get_string("Missing"), None);
        assert!(map.contains("State"));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_nested_maps() {
        let inner = PropertyMap::new().with("address", PropertyValue::String("10.0.0.2".into()));
        let outer = PropertyMap::new().with("Ip4Config", PropertyValue::Map(inner));
        assert_eq!(
            outer.get_map("Ip4Config").and_then(|m| m.get_string("address")),
            Some("10.0.0.2")
        );
    }
}
