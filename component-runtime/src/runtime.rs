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

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
};

use async_work::{CompletionHandle, WorkerPool};
use config_admin::ConfigurationAdmin;
use framework::{
    Framework, ListenerToken, Module, ModuleEvent, ModuleEventKind, ModuleId, ModuleState,
};
use logging::log;
use parking_lot::Mutex;

use crate::{
    config::RuntimeConfig,
    context::RuntimeContext,
    dto::{ComponentConfigurationDto, ComponentDescriptionDto},
    error::RuntimeError,
    extension::ModuleExtension,
    manager::ComponentManager,
    registry::ComponentRegistry,
};

struct RuntimeInner {
    framework: Arc<Framework>,
    context: Arc<RuntimeContext>,
    registry: Arc<ComponentRegistry>,
    extensions: Mutex<HashMap<ModuleId, Arc<ModuleExtension>>>,
    module_listener: Mutex<Option<ListenerToken>>,
    stopped: AtomicBool,
}

impl RuntimeInner {
    fn module_changed(&self, event: &ModuleEvent) {
        match event.kind {
            ModuleEventKind::Started => self.module_started(&event.module),
            ModuleEventKind::Stopping => self.module_stopping(event.module.id()),
            ModuleEventKind::Stopped => {}
        }
    }

    fn module_started(&self, module: &Arc<Module>) {
        if self.stopped.load(Ordering::Acquire) {
            return;
        }
        let extension = {
            let mut extensions = self.extensions.lock();
            if extensions.contains_key(&module.id()) {
                return;
            }
            let extension = Arc::new(ModuleExtension::new(
                Arc::clone(module),
                Arc::clone(&self.context),
                Arc::clone(&self.registry),
            ));
            extensions.insert(module.id(), Arc::clone(&extension));
            extension
        };

        if extension.initialize().is_err() {
            let mut extensions = self.extensions.lock();
            if extensions.get(&module.id()).is_some_and(|e| Arc::ptr_eq(e, &extension)) {
                extensions.remove(&module.id());
            }
        }
    }

    fn module_stopping(&self, module: ModuleId) {
        let extension = self.extensions.lock().remove(&module);
        if let Some(extension) = extension {
            extension.teardown();
        }
    }

    fn find_manager(
        &self,
        description: &ComponentDescriptionDto,
    ) -> Result<Arc<ComponentManager>, RuntimeError> {
        let module =
            self.extensions.lock().keys().find(|id| id.value() == description.module.id).copied();
        module
            .and_then(|module| self.registry.get(module, &description.name))
            .ok_or_else(|| RuntimeError::NotFound {
                module: description.module.id,
                name: description.name.clone(),
            })
    }
}

/// The declarative services runtime of one framework.
///
/// Picks up the `scr` manifest header of every started module, manages the declared
/// components and answers introspection queries about them.
pub struct ServiceComponentRuntime {
    inner: Arc<RuntimeInner>,
}

impl ServiceComponentRuntime {
    pub fn start(
        framework: &Arc<Framework>,
        admin: &ConfigurationAdmin,
        config: RuntimeConfig,
    ) -> Result<Self, RuntimeError> {
        let pool = WorkerPool::new("scr", &config.pool_config())?;
        let context =
            RuntimeContext::new(Arc::clone(framework.services()), admin.clone(), pool, config);
        let inner = Arc::new(RuntimeInner {
            framework: Arc::clone(framework),
            context,
            registry: Arc::new(ComponentRegistry::new()),
            extensions: Mutex::new(HashMap::new()),
            module_listener: Mutex::new(None),
            stopped: AtomicBool::new(false),
        });

        let weak: Weak<RuntimeInner> = Arc::downgrade(&inner);
        let listener = move |event: &ModuleEvent| {
            if let Some(inner) = weak.upgrade() {
                inner.module_changed(event);
            }
        };
        let token = framework.modules().add_module_listener(Arc::new(listener));
        *inner.module_listener.lock() = Some(token);

        for module in framework.modules().modules() {
            if module.state() == ModuleState::Active {
                inner.module_started(&module);
            }
        }
        log::info!("Service component runtime started");
        Ok(Self { inner })
    }

    /// Tear down the components of every module; waits for each module up to the configured
    /// timeout.
    pub fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(token) = self.inner.module_listener.lock().take() {
            self.inner.framework.modules().remove_module_listener(token);
        }
        let extensions: Vec<_> = self.inner.extensions.lock().drain().map(|(_, e)| e).collect();
        for extension in extensions {
            extension.teardown();
        }
        self.inner.registry.clear();
        log::info!("Service component runtime stopped");
    }

    pub fn registry(&self) -> &Arc<ComponentRegistry> {
        &self.inner.registry
    }

    pub fn component_manager(
        &self,
        module: ModuleId,
        name: &str,
    ) -> Option<Arc<ComponentManager>> {
        self.inner.registry.get(module, name)
    }

    /// Descriptions of the components of `modules`, or of all modules if the list is empty.
    pub fn component_description_dtos(
        &self,
        modules: &[ModuleId],
    ) -> Vec<ComponentDescriptionDto> {
        let managers = if modules.is_empty() {
            self.inner.registry.get_all()
        } else {
            modules.iter().flat_map(|m| self.inner.registry.get_all_of_module(*m)).collect()
        };
        managers
            .iter()
            .map(|manager| ComponentDescriptionDto::new(manager.module(), manager.metadata()))
            .collect()
    }

    /// The description of one component; the default description if there is no such
    /// component.
    pub fn component_description_dto(
        &self,
        module: ModuleId,
        name: &str,
    ) -> ComponentDescriptionDto {
        self.inner
            .registry
            .get(module, name)
            .map(|manager| ComponentDescriptionDto::new(manager.module(), manager.metadata()))
            .unwrap_or_default()
    }

    pub fn component_configuration_dtos(
        &self,
        description: &ComponentDescriptionDto,
    ) -> Result<Vec<ComponentConfigurationDto>, RuntimeError> {
        let manager = self.inner.find_manager(description)?;
        let description = ComponentDescriptionDto::new(manager.module(), manager.metadata());
        Ok(manager
            .configurations()
            .iter()
            .map(|configuration| ComponentConfigurationDto::new(description.clone(), configuration))
            .collect())
    }

    pub fn is_component_enabled(
        &self,
        description: &ComponentDescriptionDto,
    ) -> Result<bool, RuntimeError> {
        Ok(self.inner.find_manager(description)?.is_enabled())
    }

    pub fn enable_component(
        &self,
        description: &ComponentDescriptionDto,
    ) -> Result<CompletionHandle, RuntimeError> {
        self.ensure_running()?;
        Ok(self.inner.find_manager(description)?.enable())
    }

    pub fn disable_component(
        &self,
        description: &ComponentDescriptionDto,
    ) -> Result<CompletionHandle, RuntimeError> {
        self.ensure_running()?;
        Ok(self.inner.find_manager(description)?.disable())
    }

    fn ensure_running(&self) -> Result<(), RuntimeError> {
        if self.inner.stopped.load(Ordering::Acquire) {
            return Err(RuntimeError::Stopped);
        }
        Ok(())
    }
}

impl Drop for ServiceComponentRuntime {
    fn drop(&mut self) {
        self.stop();
    }
}
