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
use std::{any::Any, collections::BTreeMap, sync::Arc};

use logging::log;
use parking_lot::Mutex;
use serde_json::Value;

use crate::{ListenerToken, ServiceRegistry};

/// Something a module exports by name, e.g. a component factory.
pub type Symbol = Arc<dyn Any + Send + Sync>;

pub type ModuleListener = Arc<dyn Fn(&ModuleEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(u64);

impl ModuleId {
    /// Owner of registrations made by the host itself rather than by a module.
    pub const SYSTEM: ModuleId = ModuleId(0);

    pub(crate) fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ModuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ModuleError {
    #[error("Module {0} not found")]
    NotFound(ModuleId),
    #[error("Module {0} is not active")]
    NotActive(ModuleId),
}

/// Everything needed to start a module.
#[derive(Clone, Default)]
pub struct ModuleDescriptor {
    name: String,
    headers: serde_json::Map<String, Value>,
    symbols: BTreeMap<String, Symbol>,
}

impl ModuleDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: Value) -> Self {
        self.headers.insert(key.into(), value);
        self
    }

    pub fn with_symbol(mut self, name: impl Into<String>, symbol: Symbol) -> Self {
        self.symbols.insert(name.into(), symbol);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    Active,
    Stopping,
    Stopped,
}

pub struct Module {
    id: ModuleId,
    name: String,
    headers: serde_json::Map<String, Value>,
    symbols: BTreeMap<String, Symbol>,
    state: Mutex<ModuleState>,
}

impl Module {
    pub fn id(&self) -> ModuleId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn headers(&self) -> &serde_json::Map<String, Value> {
        &self.headers
    }

    pub fn header(&self, key: &str) -> Option<&Value> {
        self.headers.get(key)
    }

    pub fn symbol(&self, name: &str) -> Option<Symbol> {
        self.symbols.get(name).cloned()
    }

    pub fn state(&self) -> ModuleState {
        *self.state.lock()
    }
}

impl std::fmt::Debug for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Module")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleEventKind {
    Started,
    Stopping,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct ModuleEvent {
    pub kind: ModuleEventKind,
    pub module: Arc<Module>,
}

struct RegistryState {
    next_module_id: u64,
    next_listener_id: u64,
    modules: BTreeMap<ModuleId, Arc<Module>>,
    listeners: Vec<(ListenerToken, ModuleListener)>,
}

/// Starts and stops modules and tells listeners about it.
///
/// Events are delivered synchronously on the thread that starts or stops the module.
pub struct ModuleRegistry {
    services: Arc<ServiceRegistry>,
    state: Mutex<RegistryState>,
}

impl ModuleRegistry {
    pub fn new(services: Arc<ServiceRegistry>) -> Self {
        Self {
            services,
            state: Mutex::new(RegistryState {
                next_module_id: 1,
                next_listener_id: 1,
                modules: BTreeMap::new(),
                listeners: Vec::new(),
            }),
        }
    }

    pub fn start_module(&self, descriptor: ModuleDescriptor) -> Arc<Module> {
        let module = {
            let mut state = self.state.lock();
            let id = ModuleId(state.next_module_id);
            state.next_module_id += 1;
            let module = Arc::new(Module {
                id,
                name: descriptor.name,
                headers: descriptor.headers,
                symbols: descriptor.symbols,
                state: Mutex::new(ModuleState::Active),
            });
            state.modules.insert(id, Arc::clone(&module));
            module
        };

        log::debug!("Module {} '{}' started", module.id(), module.name());
        self.fire(ModuleEventKind::Started, &module);
        module
    }

    /// Stop a module; its services are unregistered after the `Stopping` event is delivered.
    pub fn stop_module(&self, id: ModuleId) -> Result<(), ModuleError> {
        let module = self.module(id).ok_or(ModuleError::NotFound(id))?;
        {
            let mut state = module.state.lock();
            if *state != ModuleState::Active {
                return Err(ModuleError::NotActive(id));
            }
            *state = ModuleState::Stopping;
        }

        log::debug!("Stopping module {} '{}'", module.id(), module.name());
        self.fire(ModuleEventKind::Stopping, &module);

        self.services.unregister_module_services(id);
        *module.state.lock() = ModuleState::Stopped;
        self.state.lock().modules.remove(&id);

        self.fire(ModuleEventKind::Stopped, &module);
        log::debug!("Module {} '{}' stopped", module.id(), module.name());
        Ok(())
    }

    pub fn module(&self, id: ModuleId) -> Option<Arc<Module>> {
        self.state.lock().modules.get(&id).cloned()
    }

    /// Modules that are currently started, in start order.
    pub fn modules(&self) -> Vec<Arc<Module>> {
        self.state.lock().modules.values().cloned().collect()
    }

    pub fn module_headers(
        &self,
        id: ModuleId,
    ) -> Result<serde_json::Map<String, Value>, ModuleError> {
        self.module(id)
            .map(|module| module.headers.clone())
            .ok_or(ModuleError::NotFound(id))
    }

    pub fn add_module_listener(&self, listener: ModuleListener) -> ListenerToken {
        let mut state = self.state.lock();
        let token = ListenerToken::new(state.next_listener_id);
        state.next_listener_id += 1;
        state.listeners.push((token, listener));
        token
    }

    pub fn remove_module_listener(&self, token: ListenerToken) -> bool {
        let mut state = self.state.lock();
        let before = state.listeners.len();
        state.listeners.retain(|(t, _)| *t != token);
        state.listeners.len() != before
    }

    fn fire(&self, kind: ModuleEventKind, module: &Arc<Module>) {
        let listeners: Vec<ModuleListener> =
            self.state.lock().listeners.iter().map(|(_, l)| Arc::clone(l)).collect();
        let event = ModuleEvent {
            kind,
            module: Arc::clone(module),
        };
        for listener in listeners {
            listener(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{Framework, Properties, ServiceSource};

    #[test]
    fn start_and_stop() {
        let framework = Framework::new();
        let modules = framework.modules();
        let events = Arc::new(Mutex::new(Vec::new()));
        {
            let events = Arc::clone(&events);
            modules.add_module_listener(Arc::new(move |event: &ModuleEvent| {
                events.lock().push((event.kind, event.module.id(), event.module.state()));
            }));
        }

        let module = modules.start_module(
            ModuleDescriptor::new("sample")
                .with_header("scr", json!({"version": 1}))
                .with_symbol("answer", Arc::new(42_u32)),
        );
        assert_eq!(module.name(), "sample");
        assert_eq!(module.header("scr"), Some(&json!({"version": 1})));
        assert_eq!(
            module.symbol("answer").and_then(|s| s.downcast::<u32>().ok()).as_deref(),
            Some(&42)
        );
        assert!(module.symbol("missing").is_none());
        assert_eq!(modules.module_headers(module.id()).unwrap().len(), 1);
        assert_eq!(modules.modules().len(), 1);

        modules.stop_module(module.id()).unwrap();
        assert_eq!(module.state(), ModuleState::Stopped);
        assert!(modules.module(module.id()).is_none());
        assert_eq!(modules.stop_module(module.id()), Err(ModuleError::NotFound(module.id())));
        assert_eq!(
            modules.module_headers(module.id()),
            Err(ModuleError::NotFound(module.id()))
        );

        let id = module.id();
        assert_eq!(
            *events.lock(),
            vec![
                (ModuleEventKind::Started, id, ModuleState::Active),
                (ModuleEventKind::Stopping, id, ModuleState::Stopping),
                (ModuleEventKind::Stopped, id, ModuleState::Stopped),
            ]
        );
    }

    #[test]
    fn stopping_unregisters_services_after_stopping_event() {
        let framework = Framework::new();
        let module = framework.modules().start_module(ModuleDescriptor::new("provider"));
        framework
            .services()
            .register_service(
                module.id(),
                vec!["test::Service".to_owned()],
                ServiceSource::Object(Arc::new(())),
                Properties::new(),
            )
            .unwrap();

        let seen_during_stopping = Arc::new(Mutex::new(None));
        {
            let services = Arc::clone(framework.services());
            let seen = Arc::clone(&seen_during_stopping);
            framework.modules().add_module_listener(Arc::new(move |event: &ModuleEvent| {
                if event.kind == ModuleEventKind::Stopping {
                    let found = services.get_service_references("test::Service", None).len();
                    *seen.lock() = Some(found);
                }
            }));
        }

        framework.modules().stop_module(module.id()).unwrap();
        assert_eq!(*seen_during_stopping.lock(), Some(1));
        assert!(framework.services().get_service_references("test::Service", None).is_empty());
    }

    #[test]
    fn stop_from_stopping_listener_is_rejected() {
        let framework = Framework::new();
        let module = framework.modules().start_module(ModuleDescriptor::new("reentrant"));
        let nested = Arc::new(Mutex::new(None));
        {
            let modules = Arc::downgrade(framework.modules());
            let nested = Arc::clone(&nested);
            framework.modules().add_module_listener(Arc::new(move |event: &ModuleEvent| {
                if event.kind == ModuleEventKind::Stopping {
                    if let Some(modules) = modules.upgrade() {
                        *nested.lock() = Some(modules.stop_module(event.module.id()));
                    }
                }
            }));
        }

        framework.modules().stop_module(module.id()).unwrap();
        assert_eq!(*nested.lock(), Some(Err(ModuleError::NotActive(module.id()))));
    }
}
