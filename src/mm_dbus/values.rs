//! Conversion between D-Bus variants and `PropertyValue`

use std::collections::HashMap;
use zvariant::{Array, Dict, OwnedValue, Structure, Value};

use crate::property::{PropertyMap, PropertyValue};

/// Convert one variant. Types the capability never reads come back as `None`.
pub fn from_value(value: &Value<'_>) -> Option<PropertyValue> {
    match value {
        Value::Bool(v) => Some(PropertyValue::Bool(*v)),
        Value::U8(v) => Some(PropertyValue::Uint(u32::from(*v))),
        Value::U16(v) => Some(PropertyValue::Uint(u32::from(*v))),
        Value::U32(v) => Some(PropertyValue::Uint(*v)),
        Value::U64(v) => Some(PropertyValue::Uint64(*v)),
        Value::I16(v) => Some(PropertyValue::Int(i32::from(*v))),
        Value::I32(v) => Some(PropertyValue::Int(*v)),
        Value::Str(v) => Some(PropertyValue::String(v.to_string())),
        Value::ObjectPath(v) => Some(PropertyValue::ObjectPath(v.to_string())),
        Value::Value(inner) => from_value(inner),
        Value::Array(array) => from_array(array),
        Value::Dict(dict) => from_dict(dict),
        Value::Structure(structure) => from_structure(structure),
        _ => None,
    }
}

fn from_array(array: &Array<'_>) -> Option<PropertyValue> {
    let signature = array.element_signature().to_string();
    match signature.as_str() {
        "s" => Some(PropertyValue::Strings(
            array
                .iter()
                .filter_map(|v| match v {
                    Value::Str(s) => Some(s.to_string()),
                    _ => None,
                })
                .collect(),
        )),
        "o" => Some(PropertyValue::ObjectPaths(
            array
                .iter()
                .filter_map(|v| match v {
                    Value::ObjectPath(p) => Some(p.to_string()),
                    _ => None,
                })
                .collect(),
        )),
        "u" => Some(PropertyValue::Uints(
            array
                .iter()
                .filter_map(|v| match v {
                    Value::U32(u) => Some(*u),
                    _ => None,
                })
                .collect(),
        )),
        _ => Some(PropertyValue::Structure(array.iter().filter_map(from_value).collect())),
    }
}

fn from_dict(dict: &Dict<'_, '_>) -> Option<PropertyValue> {
    let mut properties = PropertyMap::new();
    let mut retries = HashMap::new();
    for (key, value) in dict.iter() {
        match (key, value) {
            (Value::Str(key), value) => {
                if let Some(value) = from_value(value) {
                    properties.set(key.as_str(), value);
                }
            }
            // UnlockRetries: lock type -> retries
            (Value::U32(lock), Value::U32(count)) => {
                retries.insert(*lock, *count);
            }
            _ => {}
        }
    }
    if !retries.is_empty() {
        return Some(PropertyValue::LockRetries(retries));
    }
    Some(PropertyValue::Map(properties))
}

fn from_structure(structure: &Structure<'_>) -> Option<PropertyValue> {
    match structure.fields() {
        // SignalQuality: (quality, recent)
        [Value::U32(quality), Value::Bool(recent)] => {
            Some(PropertyValue::SignalQuality(*quality, *recent))
        }
        fields => Some(PropertyValue::Structure(
            fields.iter().filter_map(from_value).collect(),
        )),
    }
}

/// Convert an `a{sv}` dictionary.
pub fn property_map(values: &HashMap<String, OwnedValue>) -> PropertyMap {
    values
        .iter()
        .filter_map(|(key, value)| from_value(value).map(|v| (key.clone(), v)))
        .collect()
}

/// Variant for an outgoing argument. Only scalar values are sent.
pub fn to_value(value: &PropertyValue) -> Option<Value<'_>> {
    match value {
        PropertyValue::Bool(v) => Some(Value::from(*v)),
        PropertyValue::Int(v) => Some(Value::from(*v)),
        PropertyValue::Uint(v) => Some(Value::from(*v)),
        PropertyValue::Uint64(v) => Some(Value::from(*v)),
        PropertyValue::String(v) => Some(Value::from(v.as_str())),
        _ => None,
    }
}

/// `a{sv}` argument for `property_map`
pub fn to_dict(properties: &PropertyMap) -> HashMap<&str, Value<'_>> {
    properties
        .keys()
        .filter_map(|key| {
            let value = properties.get(key).and_then(to_value)?;
            Some((key, value))
        })
        .collect()
}
