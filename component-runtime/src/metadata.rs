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

//! Component descriptions as declared in a module's `scr` manifest header.

use std::collections::BTreeSet;

use framework::{Filter, Properties};
use logging::log;
use serde::Serialize;
use serde_json::{Map, Value};

/// Manifest header holding a module's component descriptions.
pub const SCR_HEADER: &str = "scr";

/// The only manifest format version understood by the parser.
pub const SUPPORTED_VERSION: i64 = 1;

/// Configuration PID placeholder standing for the component name.
const COMPONENT_NAME_PID: &str = "$";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MetadataError {
    #[error("Expected a JSON object")]
    NotAnObject,
    #[error("Missing mandatory key '{0}'")]
    MissingKey(String),
    #[error("Invalid value for '{key}': expected {expected}")]
    InvalidType { key: String, expected: &'static str },
    #[error("Invalid value '{value}' for '{key}'")]
    InvalidChoice { key: String, value: String },
    #[error("Unsupported metadata version {0}")]
    UnsupportedVersion(i64),
    #[error("'immediate' can't be false for a component that provides no service")]
    DelayedWithoutService,
    #[error("Duplicate configuration PID '{0}'")]
    DuplicatePid(String),
    #[error("Duplicate reference name '{0}'")]
    DuplicateReference(String),
    #[error("Invalid target filter '{filter}' of reference '{reference}': {reason}")]
    InvalidTarget {
        reference: String,
        filter: String,
        reason: String,
    },
    #[error("Invalid properties: {0}")]
    InvalidProperties(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Cardinality {
    #[serde(rename = "0..1")]
    ZeroToOne,
    #[default]
    #[serde(rename = "1..1")]
    ExactlyOne,
    #[serde(rename = "0..n")]
    ZeroToMany,
    #[serde(rename = "1..n")]
    OneToMany,
}

impl Cardinality {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "0..1" => Some(Self::ZeroToOne),
            "1..1" => Some(Self::ExactlyOne),
            "0..n" => Some(Self::ZeroToMany),
            "1..n" => Some(Self::OneToMany),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ZeroToOne => "0..1",
            Self::ExactlyOne => "1..1",
            Self::ZeroToMany => "0..n",
            Self::OneToMany => "1..n",
        }
    }

    pub fn min(&self) -> usize {
        match self {
            Self::ZeroToOne | Self::ZeroToMany => 0,
            Self::ExactlyOne | Self::OneToMany => 1,
        }
    }

    /// `usize::MAX` stands for "unbounded".
    pub fn max(&self) -> usize {
        match self {
            Self::ZeroToOne | Self::ExactlyOne => 1,
            Self::ZeroToMany | Self::OneToMany => usize::MAX,
        }
    }

    pub fn is_optional(&self) -> bool {
        self.min() == 0
    }

    pub fn is_multiple(&self) -> bool {
        self.max() > 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferencePolicy {
    #[default]
    Static,
    Dynamic,
}

impl ReferencePolicy {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "static" => Some(Self::Static),
            "dynamic" => Some(Self::Dynamic),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyOption {
    #[default]
    Reluctant,
    Greedy,
}

impl PolicyOption {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "reluctant" => Some(Self::Reluctant),
            "greedy" => Some(Self::Greedy),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceScope {
    #[default]
    Bundle,
    Prototype,
    PrototypeRequired,
}

impl ReferenceScope {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "bundle" => Some(Self::Bundle),
            "prototype" => Some(Self::Prototype),
            "prototype_required" => Some(Self::PrototypeRequired),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceScope {
    #[default]
    Singleton,
    Bundle,
    Prototype,
}

impl ServiceScope {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "singleton" => Some(Self::Singleton),
            "bundle" => Some(Self::Bundle),
            "prototype" => Some(Self::Prototype),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Singleton => "singleton",
            Self::Bundle => "bundle",
            Self::Prototype => "prototype",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigurationPolicy {
    #[default]
    Ignore,
    Optional,
    Require,
}

impl ConfigurationPolicy {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "ignore" => Some(Self::Ignore),
            "optional" => Some(Self::Optional),
            "require" => Some(Self::Require),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceMetadata {
    pub interfaces: Vec<String>,
    pub scope: ServiceScope,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceMetadata {
    pub name: String,
    pub interface: String,
    pub cardinality: Cardinality,
    pub policy: ReferencePolicy,
    pub policy_option: PolicyOption,
    pub target: Option<Filter>,
    pub scope: ReferenceScope,
}

impl ReferenceMetadata {
    pub fn is_dynamic(&self) -> bool {
        self.policy == ReferencePolicy::Dynamic
    }

    pub fn is_greedy(&self) -> bool {
        self.policy_option == PolicyOption::Greedy
    }

    /// Property that overrides the target filter of this reference at runtime.
    pub fn target_property(&self) -> String {
        format!("{}.target", self.name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComponentMetadata {
    pub name: String,
    pub implementation_class: String,
    pub enabled: bool,
    pub immediate: bool,
    pub activate: String,
    pub deactivate: String,
    /// Without a modified callback a configuration change restarts the component.
    pub modified: Option<String>,
    pub configuration_policy: ConfigurationPolicy,
    pub configuration_pids: Vec<String>,
    pub properties: Properties,
    pub service: Option<ServiceMetadata>,
    pub references: Vec<ReferenceMetadata>,
}

impl ComponentMetadata {
    /// Whether configurations from the configuration admin are consumed at all.
    pub fn uses_configuration(&self) -> bool {
        self.configuration_policy != ConfigurationPolicy::Ignore
            && !self.configuration_pids.is_empty()
    }

    /// Parse one component description.
    pub fn parse(value: &Value) -> Result<Self, MetadataError> {
        let map = value.as_object().ok_or(MetadataError::NotAnObject)?;

        let implementation_class = required_string(map, "implementation-class")?;
        let name = optional_string(map, "name")?.unwrap_or_else(|| implementation_class.clone());

        let service = map.get("service").map(parse_service).transpose()?;
        let immediate = match optional_bool(map, "immediate")? {
            Some(false) if service.is_none() => return Err(MetadataError::DelayedWithoutService),
            Some(immediate) => immediate,
            None => service.is_none(),
        };

        let (configuration_policy, configuration_pids) = parse_configuration(map, &name)?;

        let properties = match map.get("properties") {
            Some(value) => Properties::from_json(value)
                .map_err(|err| MetadataError::InvalidProperties(err.to_string()))?,
            None => Properties::new(),
        };

        let references = match map.get("references") {
            Some(value) => {
                let list = value.as_array().ok_or_else(|| invalid_type("references", "a list"))?;
                let references =
                    list.iter().map(parse_reference).collect::<Result<Vec<_>, _>>()?;
                let mut names = BTreeSet::new();
                if let Some(duplicate) = references.iter().find(|r| !names.insert(r.name.as_str()))
                {
                    return Err(MetadataError::DuplicateReference(duplicate.name.clone()));
                }
                references
            }
            None => Vec::new(),
        };

        Ok(Self {
            name,
            implementation_class,
            enabled: optional_bool(map, "enabled")?.unwrap_or(true),
            immediate,
            activate: optional_string(map, "activate")?.unwrap_or_else(|| "activate".to_owned()),
            deactivate: optional_string(map, "deactivate")?
                .unwrap_or_else(|| "deactivate".to_owned()),
            modified: optional_string(map, "modified")?,
            configuration_policy,
            configuration_pids,
            properties,
            service,
            references,
        })
    }
}

/// Parse the `scr` header of a module.
///
/// An invalid envelope fails as a whole; an invalid component is logged and skipped.
pub fn parse_manifest(value: &Value) -> Result<Vec<ComponentMetadata>, MetadataError> {
    let map = value.as_object().ok_or(MetadataError::NotAnObject)?;
    let version = required(map, "version")?
        .as_i64()
        .ok_or_else(|| invalid_type("version", "an integer"))?;
    if version != SUPPORTED_VERSION {
        return Err(MetadataError::UnsupportedVersion(version));
    }
    let components = required(map, "components")?
        .as_array()
        .ok_or_else(|| invalid_type("components", "a list"))?;

    Ok(components
        .iter()
        .enumerate()
        .filter_map(|(index, component)| match ComponentMetadata::parse(component) {
            Ok(metadata) => Some(metadata),
            Err(err) => {
                log::error!("Could not load the component with index {index}: {err}");
                None
            }
        })
        .collect())
}

fn parse_configuration(
    map: &Map<String, Value>,
    name: &str,
) -> Result<(ConfigurationPolicy, Vec<String>), MetadataError> {
    let policy = optional_choice(map, "configuration-policy", ConfigurationPolicy::parse)?;
    let pids = match map.get("configuration-pid") {
        Some(value) => {
            let list = value.as_array().ok_or_else(|| invalid_type("configuration-pid", "a list"))?;
            let mut seen = BTreeSet::new();
            let mut pids = Vec::with_capacity(list.len());
            for pid in list {
                let pid = pid
                    .as_str()
                    .ok_or_else(|| invalid_type("configuration-pid", "a list of strings"))?;
                let pid = if pid == COMPONENT_NAME_PID { name } else { pid };
                if !seen.insert(pid.to_owned()) {
                    return Err(MetadataError::DuplicatePid(pid.to_owned()));
                }
                pids.push(pid.to_owned());
            }
            Some(pids)
        }
        None => None,
    };

    match (policy, pids) {
        (Some(ConfigurationPolicy::Ignore), _) => Ok((ConfigurationPolicy::Ignore, Vec::new())),
        (Some(policy), Some(pids)) => Ok((policy, pids)),
        (None, None) => Ok((ConfigurationPolicy::Ignore, Vec::new())),
        _ => {
            log::warn!(
                "Component '{name}': both 'configuration-policy' and 'configuration-pid' are needed to use configurations, policy set to 'ignore'"
            );
            Ok((ConfigurationPolicy::Ignore, Vec::new()))
        }
    }
}

fn parse_service(value: &Value) -> Result<ServiceMetadata, MetadataError> {
    let map = value.as_object().ok_or_else(|| invalid_type("service", "an object"))?;
    let interfaces = required(map, "interfaces")?
        .as_array()
        .ok_or_else(|| invalid_type("interfaces", "a list"))?
        .iter()
        .map(|interface| {
            interface
                .as_str()
                .map(strip_namespace_prefix)
                .ok_or_else(|| invalid_type("interfaces", "a list of strings"))
        })
        .collect::<Result<Vec<_>, _>>()?;
    if interfaces.is_empty() {
        return Err(invalid_type("interfaces", "a non-empty list"));
    }
    Ok(ServiceMetadata {
        interfaces,
        scope: optional_choice(map, "scope", ServiceScope::parse)?.unwrap_or_default(),
    })
}

fn parse_reference(value: &Value) -> Result<ReferenceMetadata, MetadataError> {
    let map = value.as_object().ok_or_else(|| invalid_type("references", "a list of objects"))?;
    let name = required_string(map, "name")?;
    let target = optional_string(map, "target")?
        .map(|source| {
            Filter::parse(&source).map_err(|err| MetadataError::InvalidTarget {
                reference: name.clone(),
                filter: source.clone(),
                reason: err.to_string(),
            })
        })
        .transpose()?;

    Ok(ReferenceMetadata {
        interface: strip_namespace_prefix(&required_string(map, "interface")?),
        cardinality: optional_choice(map, "cardinality", Cardinality::parse)?.unwrap_or_default(),
        policy: optional_choice(map, "policy", ReferencePolicy::parse)?.unwrap_or_default(),
        policy_option: optional_choice(map, "policy-option", PolicyOption::parse)?
            .unwrap_or_default(),
        target,
        scope: optional_choice(map, "scope", ReferenceScope::parse)?.unwrap_or_default(),
        name,
    })
}

/// `::ns::Iface` and `ns::Iface` name the same interface.
fn strip_namespace_prefix(interface: &str) -> String {
    interface.trim_start_matches(':').to_owned()
}

fn invalid_type(key: &str, expected: &'static str) -> MetadataError {
    MetadataError::InvalidType {
        key: key.to_owned(),
        expected,
    }
}

fn required<'a>(map: &'a Map<String, Value>, key: &str) -> Result<&'a Value, MetadataError> {
    map.get(key).ok_or_else(|| MetadataError::MissingKey(key.to_owned()))
}

fn required_string(map: &Map<String, Value>, key: &str) -> Result<String, MetadataError> {
    optional_string(map, key)?.ok_or_else(|| MetadataError::MissingKey(key.to_owned()))
}

fn optional_string(map: &Map<String, Value>, key: &str) -> Result<Option<String>, MetadataError> {
    map.get(key)
        .map(|value| {
            value
                .as_str()
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .ok_or_else(|| invalid_type(key, "a non-empty string"))
        })
        .transpose()
}

fn optional_bool(map: &Map<String, Value>, key: &str) -> Result<Option<bool>, MetadataError> {
    map.get(key)
        .map(|value| value.as_bool().ok_or_else(|| invalid_type(key, "a boolean")))
        .transpose()
}

fn optional_choice<T>(
    map: &Map<String, Value>,
    key: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<Option<T>, MetadataError> {
    let Some(value) = map.get(key) else {
        return Ok(None);
    };
    let s = value.as_str().ok_or_else(|| invalid_type(key, "a string"))?;
    parse(s).map(Some).ok_or_else(|| MetadataError::InvalidChoice {
        key: key.to_owned(),
        value: s.to_owned(),
    })
}
