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
//! The module and service layer the component runtime is hosted on.
//!
//! This is an in-process stand-in for a dynamic module framework: modules are started from
//! a [ModuleDescriptor] carrying their manifest headers and exported symbols, and publish or
//! consume services through the [ServiceRegistry].

pub mod filter;
pub mod module;
pub mod properties;
pub mod service;

use std::sync::Arc;

pub use filter::{Filter, FilterError};
pub use module::{
    Module, ModuleDescriptor, ModuleError, ModuleEvent, ModuleEventKind, ModuleId,
    ModuleListener, ModuleRegistry, ModuleState, Symbol,
};
pub use properties::{keys, Properties, PropertyError, PropertyValue};
pub use service::{
    ServiceError, ServiceEvent, ServiceEventKind, ServiceFactory, ServiceId, ServiceListener,
    ServiceObject, ServiceReference, ServiceRegistration, ServiceRegistry, ServiceSource,
};

/// Identifies a registered listener so that it can be removed later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerToken(u64);

impl ListenerToken {
    pub fn new(value: u64) -> Self {
        Self(value)
    }
}

/// The service registry and the module registry of one framework instance.
pub struct Framework {
    services: Arc<ServiceRegistry>,
    modules: Arc<ModuleRegistry>,
}

impl Framework {
    pub fn new() -> Arc<Self> {
        let services = Arc::new(ServiceRegistry::new());
        let modules = Arc::new(ModuleRegistry::new(Arc::clone(&services)));
        Arc::new(Self { services, modules })
    }

    pub fn services(&self) -> &Arc<ServiceRegistry> {
        &self.services
    }

    pub fn modules(&self) -> &Arc<ModuleRegistry> {
        &self.modules
    }
}

#[cfg(test)]
#[ctor::ctor]
fn init() {
    logging::init_logging();
}
