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

//! Serializable snapshots of the runtime for operators and diagnostics.

use framework::{Module, Properties, ServiceReference};
use itertools::{Either, Itertools};
use serde::Serialize;

use crate::{
    configuration::{ComponentConfiguration, ComponentState, ReferenceSnapshot},
    metadata::{
        Cardinality, ComponentMetadata, ConfigurationPolicy, PolicyOption, ReferenceMetadata,
        ReferencePolicy, ReferenceScope, ServiceScope,
    },
};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModuleDto {
    pub id: u64,
    pub name: String,
}

impl From<&Module> for ModuleDto {
    fn from(module: &Module) -> Self {
        Self {
            id: module.id().value(),
            name: module.name().to_owned(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReferenceDto {
    pub name: String,
    pub interface: String,
    pub cardinality: Cardinality,
    pub policy: ReferencePolicy,
    pub policy_option: PolicyOption,
    pub target: Option<String>,
    pub scope: ReferenceScope,
}

impl From<&ReferenceMetadata> for ReferenceDto {
    fn from(reference: &ReferenceMetadata) -> Self {
        Self {
            name: reference.name.clone(),
            interface: reference.interface.clone(),
            cardinality: reference.cardinality,
            policy: reference.policy,
            policy_option: reference.policy_option,
            target: reference.target.as_ref().map(|f| f.as_str().to_owned()),
            scope: reference.scope,
        }
    }
}

/// Static description of one component; the default value stands for "no such component".
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ComponentDescriptionDto {
    pub name: String,
    pub module: ModuleDto,
    pub implementation_class: String,
    pub default_enabled: bool,
    pub immediate: bool,
    pub activate: String,
    pub deactivate: String,
    pub modified: Option<String>,
    pub configuration_policy: ConfigurationPolicy,
    pub configuration_pids: Vec<String>,
    pub service_interfaces: Vec<String>,
    pub scope: ServiceScope,
    pub properties: Properties,
    pub references: Vec<ReferenceDto>,
}

impl ComponentDescriptionDto {
    pub(crate) fn new(module: &Module, metadata: &ComponentMetadata) -> Self {
        Self {
            name: metadata.name.clone(),
            module: module.into(),
            implementation_class: metadata.implementation_class.clone(),
            default_enabled: metadata.enabled,
            immediate: metadata.immediate,
            activate: metadata.activate.clone(),
            deactivate: metadata.deactivate.clone(),
            modified: metadata.modified.clone(),
            configuration_policy: metadata.configuration_policy,
            configuration_pids: metadata.configuration_pids.clone(),
            service_interfaces: metadata
                .service
                .as_ref()
                .map(|service| service.interfaces.clone())
                .unwrap_or_default(),
            scope: metadata.service.as_ref().map(|service| service.scope).unwrap_or_default(),
            properties: metadata.properties.clone(),
            references: metadata.references.iter().map(ReferenceDto::from).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ServiceReferenceDto {
    pub id: u64,
    pub module: u64,
    pub interfaces: Vec<String>,
    pub properties: Properties,
}

impl From<&ServiceReference> for ServiceReferenceDto {
    fn from(reference: &ServiceReference) -> Self {
        Self {
            id: reference.id().value(),
            module: reference.module().value(),
            interfaces: reference.interfaces().to_vec(),
            properties: reference.properties(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SatisfiedReferenceDto {
    pub name: String,
    pub target: Option<String>,
    pub bound_services: Vec<ServiceReferenceDto>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UnsatisfiedReferenceDto {
    pub name: String,
    pub target: Option<String>,
    /// Services matching the interface and target that could satisfy the reference.
    pub target_services: Vec<ServiceReferenceDto>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ComponentConfigurationDto {
    pub description: ComponentDescriptionDto,
    pub id: u64,
    pub state: ComponentState,
    pub properties: Properties,
    pub satisfied_references: Vec<SatisfiedReferenceDto>,
    pub unsatisfied_references: Vec<UnsatisfiedReferenceDto>,
}

impl ComponentConfigurationDto {
    pub(crate) fn new(
        description: ComponentDescriptionDto,
        configuration: &ComponentConfiguration,
    ) -> Self {
        let snapshot = configuration.snapshot();
        let (satisfied_references, unsatisfied_references) =
            snapshot.references.into_iter().partition_map(|reference| {
                let ReferenceSnapshot {
                    name,
                    target,
                    satisfied,
                    bound,
                    candidates,
                } = reference;
                if satisfied {
                    Either::Left(SatisfiedReferenceDto {
                        name,
                        target,
                        bound_services: bound.iter().map(ServiceReferenceDto::from).collect(),
                    })
                } else {
                    Either::Right(UnsatisfiedReferenceDto {
                        name,
                        target,
                        target_services: candidates.iter().map(ServiceReferenceDto::from).collect(),
                    })
                }
            });
        Self {
            description,
            id: snapshot.id,
            state: snapshot.state,
            properties: snapshot.properties,
            satisfied_references,
            unsatisfied_references,
        }
    }
}
