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

//! The seam between the runtime and component implementation code.
//!
//! A module exports one [ComponentFactory] per implementation class as a symbol named after
//! the class; the runtime looks it up when a configuration is activated.

use std::{any::Any, collections::BTreeMap, sync::Arc};

use framework::{keys, Module, ModuleId, Properties, ServiceObject, ServiceReference, Symbol};

use crate::error::ComponentError;

/// A service bound to a reference, together with the object obtained from the registry.
#[derive(Clone)]
pub struct BoundService {
    pub reference: ServiceReference,
    pub object: ServiceObject,
}

impl BoundService {
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.object).downcast::<T>().ok()
    }
}

impl std::fmt::Debug for BoundService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundService").field("reference", &self.reference).finish()
    }
}

/// What a component instance gets to see of its configuration.
#[derive(Debug, Clone)]
pub struct ComponentContext {
    module: ModuleId,
    properties: Properties,
    bound: BTreeMap<String, Vec<BoundService>>,
}

impl ComponentContext {
    pub(crate) fn new(
        module: ModuleId,
        properties: Properties,
        bound: BTreeMap<String, Vec<BoundService>>,
    ) -> Self {
        Self {
            module,
            properties,
            bound,
        }
    }

    pub fn module_id(&self) -> ModuleId {
        self.module
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn component_name(&self) -> Option<&str> {
        self.properties.get(keys::COMPONENT_NAME).and_then(|v| v.as_str())
    }

    pub fn component_id(&self) -> Option<i64> {
        self.properties.get(keys::COMPONENT_ID).and_then(|v| v.as_i64())
    }

    /// The services bound to `reference` when the instance was created, best ranked first.
    pub fn bound_services(&self, reference: &str) -> &[BoundService] {
        self.bound.get(reference).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn locate_service(&self, reference: &str) -> Option<ServiceObject> {
        self.bound_services(reference).first().map(|bound| Arc::clone(&bound.object))
    }

    pub fn locate_service_as<T: Any + Send + Sync>(&self, reference: &str) -> Option<Arc<T>> {
        self.bound_services(reference).first().and_then(BoundService::downcast)
    }

    pub fn locate_services(&self, reference: &str) -> Vec<ServiceObject> {
        self.bound_services(reference).iter().map(|bound| Arc::clone(&bound.object)).collect()
    }

    pub(crate) fn set_properties(&mut self, properties: Properties) {
        self.properties = properties;
    }

    pub(crate) fn bind(&mut self, reference: &str, service: BoundService) {
        self.bound.entry(reference.to_owned()).or_default().push(service);
    }

    pub(crate) fn unbind(&mut self, reference: &str, service: &ServiceReference) {
        if let Some(bound) = self.bound.get_mut(reference) {
            bound.retain(|b| b.reference != *service);
        }
    }

    pub(crate) fn take_bound(&mut self) -> BTreeMap<String, Vec<BoundService>> {
        std::mem::take(&mut self.bound)
    }
}

/// One live instance of a component implementation.
///
/// Every method runs on the owning configuration's transition context, never concurrently.
/// Static references are injected through the context passed to [ComponentFactory::create];
/// dynamic references additionally get [Self::bind]/[Self::unbind] calls while active.
pub trait ComponentInstance: Send {
    fn activate(&mut self, _context: &ComponentContext) -> Result<(), ComponentError> {
        Ok(())
    }

    fn deactivate(&mut self, _context: &ComponentContext) -> Result<(), ComponentError> {
        Ok(())
    }

    /// Only called when the component declares a modified callback.
    fn modified(&mut self, _context: &ComponentContext) -> Result<(), ComponentError> {
        Ok(())
    }

    fn bind(&mut self, _reference: &str, _service: &BoundService) -> Result<(), ComponentError> {
        Ok(())
    }

    fn unbind(&mut self, _reference: &str, _service: &BoundService) -> Result<(), ComponentError> {
        Ok(())
    }

    /// The object registered for the component's declared service interfaces.
    fn provided_service(&self) -> Option<ServiceObject> {
        None
    }
}

/// Creates instances of one implementation class.
pub trait ComponentFactory: Send + Sync {
    fn create(&self, context: &ComponentContext)
        -> Result<Box<dyn ComponentInstance>, ComponentError>;
}

/// The symbol a module exports for an implementation class.
pub struct ComponentFactorySymbol(pub Arc<dyn ComponentFactory>);

impl ComponentFactorySymbol {
    pub fn symbol(factory: Arc<dyn ComponentFactory>) -> Symbol {
        Arc::new(Self(factory))
    }
}

/// Blanket factory for closures, handy for small components.
impl<F> ComponentFactory for F
where
    F: Fn(&ComponentContext) -> Result<Box<dyn ComponentInstance>, ComponentError> + Send + Sync,
{
    fn create(
        &self,
        context: &ComponentContext,
    ) -> Result<Box<dyn ComponentInstance>, ComponentError> {
        self(context)
    }
}

pub(crate) fn find_factory(
    module: &Module,
    implementation_class: &str,
) -> Result<Arc<dyn ComponentFactory>, ComponentError> {
    let symbol = module.symbol(implementation_class).ok_or_else(|| {
        ComponentError::new(format!(
            "module '{}' exports no factory for '{implementation_class}'",
            module.name()
        ))
    })?;
    let factory = symbol.downcast::<ComponentFactorySymbol>().map_err(|_| {
        ComponentError::new(format!(
            "symbol '{implementation_class}' of module '{}' is not a component factory",
            module.name()
        ))
    })?;
    Ok(Arc::clone(&factory.0))
}
