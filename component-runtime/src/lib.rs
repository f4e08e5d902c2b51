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

//! Declarative services runtime.
//!
//! Modules describe their components in the `scr` manifest header. For every described
//! component the runtime keeps a [ComponentManager], which creates one
//! [ComponentConfiguration] per configuration instance. A configuration tracks the services
//! its references need, creates the component instance through the [ComponentFactory] the
//! module exports once they are available, and publishes the component's own service.

mod config;
mod configuration;
mod context;
mod dto;
mod error;
mod extension;
mod instance;
mod manager;
mod metadata;
mod reference_manager;
mod registry;
mod runtime;

pub use config::{RuntimeConfig, DEFAULT_DISABLE_WAIT_TIMEOUT};
pub use configuration::{
    ComponentConfiguration, ComponentState, ConfigurationSnapshot, ReferenceSnapshot,
};
pub use dto::{
    ComponentConfigurationDto, ComponentDescriptionDto, ModuleDto, ReferenceDto,
    SatisfiedReferenceDto, ServiceReferenceDto, UnsatisfiedReferenceDto,
};
pub use error::{ComponentError, RuntimeError};
pub use instance::{
    BoundService, ComponentContext, ComponentFactory, ComponentFactorySymbol, ComponentInstance,
};
pub use manager::ComponentManager;
pub use metadata::{
    parse_manifest, Cardinality, ComponentMetadata, ConfigurationPolicy, MetadataError,
    PolicyOption, ReferenceMetadata, ReferencePolicy, ReferenceScope, ServiceMetadata,
    ServiceScope, SCR_HEADER, SUPPORTED_VERSION,
};
pub use registry::ComponentRegistry;
pub use runtime::ServiceComponentRuntime;

#[cfg(test)]
#[ctor::ctor]
fn init() {
    logging::init_logging();
}
