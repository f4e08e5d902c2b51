// Copyright (c) 2021-2025 RBB S.r.l
// opensource@mintlayer.org
// SPDX-License-Identifier: MIT
// Licensed under the MIT License;
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://github.com/mintlayer/mintlayer-core/blob/master/LICENSE
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
use std::collections::BTreeMap;

use serde::{ser::SerializeMap, Serialize, Serializer};

/// Well-known property keys.
pub mod keys {
    pub const OBJECTCLASS: &str = "objectclass";
    pub const SERVICE_ID: &str = "service.id";
    pub const SERVICE_PID: &str = "service.pid";
    pub const SERVICE_RANKING: &str = "service.ranking";
    pub const SERVICE_SCOPE: &str = "service.scope";
    pub const SERVICE_FACTORY_PID: &str = "service.factoryPid";
    pub const COMPONENT_NAME: &str = "component.name";
    pub const COMPONENT_ID: &str = "component.id";
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PropertyError {
    #[error("Property '{0}' has an unsupported null value")]
    NullValue(String),
    #[error("Property '{key}' holds a number that is out of range: {value}")]
    NumberOutOfRange { key: String, value: String },
    #[error("Expected a JSON object for a property map, got: {0}")]
    NotAnObject(String),
}

/// A typed property value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<PropertyValue>),
    Map(Properties),
}

impl PropertyValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropertyValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Float(v) => Some(*v),
            PropertyValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[PropertyValue]> {
        match self {
            PropertyValue::List(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Properties> {
        match self {
            PropertyValue::Map(v) => Some(v),
            _ => None,
        }
    }

    /// Convert a JSON value; `key` is only used for error reporting.
    pub fn from_json(key: &str, value: &serde_json::Value) -> Result<Self, PropertyError> {
        use serde_json::Value;

        let result = match value {
            Value::Null => return Err(PropertyError::NullValue(key.to_owned())),
            Value::Bool(v) => PropertyValue::Bool(*v),
            Value::Number(n) => {
                if let Some(v) = n.as_i64() {
                    PropertyValue::Int(v)
                } else if let Some(v) = n.as_f64() {
                    if n.is_u64() {
                        return Err(PropertyError::NumberOutOfRange {
                            key: key.to_owned(),
                            value: n.to_string(),
                        });
                    }
                    PropertyValue::Float(v)
                } else {
                    return Err(PropertyError::NumberOutOfRange {
                        key: key.to_owned(),
                        value: n.to_string(),
                    });
                }
            }
            Value::String(v) => PropertyValue::String(v.clone()),
            Value::Array(items) => PropertyValue::List(
                items
                    .iter()
                    .map(|item| PropertyValue::from_json(key, item))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Object(map) => PropertyValue::Map(Properties::from_json_map(map)?),
        };
        Ok(result)
    }

    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;

        match self {
            PropertyValue::Bool(v) => Value::Bool(*v),
            PropertyValue::Int(v) => Value::from(*v),
            PropertyValue::Float(v) => Value::from(*v),
            PropertyValue::String(v) => Value::String(v.clone()),
            PropertyValue::List(items) => {
                Value::Array(items.iter().map(PropertyValue::to_json).collect())
            }
            PropertyValue::Map(map) => map.to_json(),
        }
    }
}

impl std::fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PropertyValue::Bool(v) => write!(f, "{v}"),
            PropertyValue::Int(v) => write!(f, "{v}"),
            PropertyValue::Float(v) => write!(f, "{v}"),
            PropertyValue::String(v) => f.write_str(v),
            PropertyValue::List(_) | PropertyValue::Map(_) => write!(f, "{}", self.to_json()),
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        PropertyValue::Bool(v)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Int(v)
    }
}

impl From<i32> for PropertyValue {
    fn from(v: i32) -> Self {
        PropertyValue::Int(v.into())
    }
}

impl From<u32> for PropertyValue {
    fn from(v: u32) -> Self {
        PropertyValue::Int(v.into())
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        PropertyValue::Float(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::String(v.to_owned())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        PropertyValue::String(v)
    }
}

impl<T: Into<PropertyValue>> From<Vec<T>> for PropertyValue {
    fn from(v: Vec<T>) -> Self {
        PropertyValue::List(v.into_iter().map(Into::into).collect())
    }
}

impl From<Properties> for PropertyValue {
    fn from(v: Properties) -> Self {
        PropertyValue::Map(v)
    }
}

/// A property map with case-insensitive keys.
///
/// The spelling used when a key was last inserted is kept for display and iteration.
/// Equality compares keys case-insensitively and values exactly.
#[derive(Debug, Clone, Default)]
pub struct Properties {
    // Lower-cased key -> (original key, value)
    entries: BTreeMap<String, (String, PropertyValue)>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.entries.get(&key.to_lowercase()).map(|(_, value)| value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(&key.to_lowercase())
    }

    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) -> Option<PropertyValue> {
        let key = key.into();
        self.entries
            .insert(key.to_lowercase(), (key, value.into()))
            .map(|(_, old)| old)
    }

    pub fn remove(&mut self, key: &str) -> Option<PropertyValue> {
        self.entries.remove(&key.to_lowercase()).map(|(_, old)| old)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyValue)> + '_ {
        self.entries.values().map(|(key, value)| (key.as_str(), value))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.values().map(|(key, _)| key.as_str())
    }

    /// Overlay `other` on top of `self`; keys present in both take the value from `other`.
    pub fn merge(&mut self, other: &Properties) {
        for (lower, (key, value)) in &other.entries {
            self.entries.insert(lower.clone(), (key.clone(), value.clone()));
        }
    }

    /// Keys whose value differs between `self` and `other`, including keys present in only one.
    pub fn changed_keys(&self, other: &Properties) -> Vec<String> {
        let mut changed: Vec<String> = self
            .entries
            .iter()
            .filter(|(lower, (_, value))| {
                other.entries.get(*lower).is_none_or(|(_, other_value)| other_value != value)
            })
            .map(|(_, (key, _))| key.clone())
            .collect();
        changed.extend(
            other
                .entries
                .iter()
                .filter(|(lower, _)| !self.entries.contains_key(*lower))
                .map(|(_, (key, _))| key.clone()),
        );
        changed
    }

    pub fn from_json_map(
        map: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Self, PropertyError> {
        map.iter()
            .map(|(key, value)| Ok((key.clone(), PropertyValue::from_json(key, value)?)))
            .collect()
    }

    pub fn from_json(value: &serde_json::Value) -> Result<Self, PropertyError> {
        match value {
            serde_json::Value::Object(map) => Self::from_json_map(map),
            other => Err(PropertyError::NotAnObject(other.to_string())),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.iter().map(|(key, value)| (key.to_owned(), value.to_json())).collect(),
        )
    }
}

impl PartialEq for Properties {
    fn eq(&self, other: &Self) -> bool {
        self.entries.len() == other.entries.len()
            && self.entries.iter().zip(other.entries.iter()).all(
                |((lower, (_, value)), (other_lower, (_, other_value)))| {
                    lower == other_lower && value == other_value
                },
            )
    }
}

impl<K: Into<String>, V: Into<PropertyValue>> FromIterator<(K, V)> for Properties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut props = Properties::new();
        for (key, value) in iter {
            props.insert(key, value);
        }
        props
    }
}

impl Serialize for Properties {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (key, value) in self.iter() {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}
