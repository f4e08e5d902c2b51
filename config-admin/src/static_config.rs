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
//! Configurations declared in a module's `cm` manifest header.
//!
//! ```json
//! "cm": {
//!   "version": 1,
//!   "configurations": [ { "pid": "sample.pid", "properties": { "anInt": 5 } } ]
//! }
//! ```

use framework::{Module, ModuleId, Properties};
use logging::log;
use serde_json::Value;

use crate::{ConfigurationAdmin, CM_HEADER};

const SUPPORTED_VERSION: i64 = 1;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub(crate) enum StaticConfigError {
    #[error("The 'cm' header is not an object")]
    NotAnObject,
    #[error("Missing or invalid 'version'")]
    MissingVersion,
    #[error("Unsupported version {0}")]
    UnsupportedVersion(i64),
    #[error("Missing or invalid 'configurations' list")]
    MissingConfigurations,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct StaticConfiguration {
    pub pid: String,
    pub properties: Properties,
}

/// Parse the header; malformed entries are skipped with a warning.
pub(crate) fn parse(header: &Value) -> Result<Vec<StaticConfiguration>, StaticConfigError> {
    let header = header.as_object().ok_or(StaticConfigError::NotAnObject)?;
    let version = header
        .get("version")
        .and_then(Value::as_i64)
        .ok_or(StaticConfigError::MissingVersion)?;
    if version != SUPPORTED_VERSION {
        return Err(StaticConfigError::UnsupportedVersion(version));
    }
    let entries = header
        .get("configurations")
        .and_then(Value::as_array)
        .ok_or(StaticConfigError::MissingConfigurations)?;

    let mut result = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        let Some(pid) = entry.get("pid").and_then(Value::as_str).filter(|p| !p.is_empty()) else {
            log::warn!("Static configuration #{index} has no valid 'pid', skipping it");
            continue;
        };
        let properties = match entry.get("properties") {
            Some(props) => match Properties::from_json(props) {
                Ok(props) => props,
                Err(err) => {
                    log::warn!("Static configuration '{pid}' has invalid properties: {err}");
                    continue;
                }
            },
            None => {
                log::warn!("Static configuration '{pid}' has no 'properties', skipping it");
                continue;
            }
        };
        result.push(StaticConfiguration {
            pid: pid.to_owned(),
            properties,
        });
    }
    Ok(result)
}

pub(crate) fn add_module_configurations(admin: &ConfigurationAdmin, module: &Module) {
    let Some(header) = module.header(CM_HEADER) else {
        return;
    };
    if admin.inner().state.lock().static_configurations.contains_key(&module.id()) {
        log::debug!("Static configurations of module '{}' already loaded", module.name());
        return;
    }

    let configurations = match parse(header) {
        Ok(configurations) => configurations,
        Err(err) => {
            log::warn!("Ignoring static configurations of module '{}': {err}", module.name());
            return;
        }
    };

    let mut added = Vec::with_capacity(configurations.len());
    for StaticConfiguration { pid, properties } in configurations {
        let result = admin.get_configuration(&pid).and_then(|config| {
            let _ = config.update_if_different(properties)?;
            config.get_change_count()
        });
        match result {
            Ok(change_count) => added.push((pid, change_count)),
            Err(err) => log::warn!(
                "Failed to add static configuration '{pid}' of module '{}': {err}",
                module.name()
            ),
        }
    }

    log::debug!("Added {} static configuration(s) of module '{}'", added.len(), module.name());
    admin.inner().state.lock().static_configurations.insert(module.id(), added);
}

/// Remove what the module added, except configurations that were changed since.
pub(crate) fn remove_module_configurations(admin: &ConfigurationAdmin, module: ModuleId) {
    let Some(added) = admin.inner().state.lock().static_configurations.remove(&module) else {
        return;
    };
    for (pid, change_count) in added {
        // Module stop must not wait for consumers to handle the removal.
        let _ = admin.inner().remove_if_unchanged(&pid, change_count);
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    #[test]
    fn parse_valid_header() {
        let header = json!({
            "version": 1,
            "configurations": [
                {"pid": "a", "properties": {"x": 1}},
                {"pid": "", "properties": {}},
                {"properties": {}},
                {"pid": "b", "properties": {"bad": null}},
                {"pid": "c"},
                {"pid": "d", "properties": {}},
            ]
        });
        let parsed = parse(&header).unwrap();
        assert_eq!(
            parsed,
            vec![
                StaticConfiguration {
                    pid: "a".to_owned(),
                    properties: Properties::new().with("x", 1),
                },
                StaticConfiguration {
                    pid: "d".to_owned(),
                    properties: Properties::new(),
                },
            ]
        );
    }

    #[rstest]
    #[case(json!([]), StaticConfigError::NotAnObject)]
    #[case(json!({"configurations": []}), StaticConfigError::MissingVersion)]
    #[case(json!({"version": "1", "configurations": []}), StaticConfigError::MissingVersion)]
    #[case(json!({"version": 2, "configurations": []}), StaticConfigError::UnsupportedVersion(2))]
    #[case(json!({"version": 1}), StaticConfigError::MissingConfigurations)]
    #[case(json!({"version": 1, "configurations": {}}), StaticConfigError::MissingConfigurations)]
    fn parse_invalid_header(#[case] header: Value, #[case] expected: StaticConfigError) {
        assert_eq!(parse(&header), Err(expected));
    }
}
