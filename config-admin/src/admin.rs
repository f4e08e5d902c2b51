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
    collections::{BTreeSet, HashMap},
    sync::{Arc, Weak},
};

use async_work::{CompletionHandle, WorkerPool};
use framework::{
    keys, Filter, Framework, ListenerToken, ModuleEvent, ModuleEventKind, ModuleId,
    ModuleRegistry, ServiceEvent, ServiceEventKind, ServiceId, ServiceRegistry,
};
use logging::log;
use parking_lot::Mutex;
use rand::{distributions::Alphanumeric, Rng};

use crate::{
    configuration::ConfigurationEntity,
    factory_pid_of, managed,
    notifier::{ConfigurationListener, ListenerScope, Notifier},
    static_config, Configuration, ConfigurationError, Result, FACTORY_PID_SEPARATOR,
};

const INSTANCE_NAME_LEN: usize = 6;

#[derive(Default)]
pub(crate) struct AdminState {
    configurations: HashMap<String, Arc<ConfigurationEntity>>,
    // Factory PID -> instance PIDs
    factory_instances: HashMap<String, BTreeSet<String>>,
    // Static configurations added for a module, with their change count at that time.
    pub static_configurations: HashMap<ModuleId, Vec<(String, u64)>>,
}

pub(crate) struct AdminInner {
    pub state: Mutex<AdminState>,
    notifier: Arc<Notifier>,
}

impl AdminInner {
    fn get_or_create(self: &Arc<Self>, pid: &str) -> Arc<ConfigurationEntity> {
        let mut state = self.state.lock();
        if let Some(entity) = state.configurations.get(pid) {
            return Arc::clone(entity);
        }
        Self::create_locked(self, &mut state, pid.to_owned())
    }

    fn create_locked(
        this: &Arc<Self>,
        state: &mut AdminState,
        pid: String,
    ) -> Arc<ConfigurationEntity> {
        log::debug!("Creating configuration '{pid}'");
        let entity =
            ConfigurationEntity::new(pid.clone(), Arc::clone(&this.notifier), Arc::downgrade(this));
        if let Some(factory_pid) = factory_pid_of(&pid) {
            state
                .factory_instances
                .entry(factory_pid.to_owned())
                .or_default()
                .insert(pid.clone());
        }
        state.configurations.insert(pid, Arc::clone(&entity));
        entity
    }

    fn unlink_locked(state: &mut AdminState, entity: &Arc<ConfigurationEntity>) {
        let pid = entity.pid();
        if state.configurations.get(pid).is_some_and(|current| Arc::ptr_eq(current, entity)) {
            state.configurations.remove(pid);
            if let Some(factory_pid) = entity.factory_pid() {
                if let Some(instances) = state.factory_instances.get_mut(factory_pid) {
                    instances.remove(pid);
                    if instances.is_empty() {
                        state.factory_instances.remove(factory_pid);
                    }
                }
            }
        }
    }

    pub fn remove_entity(&self, entity: &Arc<ConfigurationEntity>) -> Result<CompletionHandle> {
        let mut state = self.state.lock();
        let mut entity_state = entity.lock();
        if entity_state.removed {
            return Err(ConfigurationError::Removed(entity.pid().to_owned()));
        }
        Self::unlink_locked(&mut state, entity);
        log::debug!("Removing configuration '{}'", entity.pid());
        Ok(entity.mark_removed(&mut entity_state))
    }

    /// Remove the configuration `pid` unless it changed since it had `change_count`.
    pub fn remove_if_unchanged(&self, pid: &str, change_count: u64) -> Option<CompletionHandle> {
        let mut state = self.state.lock();
        let entity = state.configurations.get(pid).cloned()?;
        let mut entity_state = entity.lock();
        if entity_state.removed || entity_state.change_count != change_count {
            log::debug!("Keeping configuration '{pid}', it was changed after it was added");
            return None;
        }
        Self::unlink_locked(&mut state, &entity);
        Some(entity.mark_removed(&mut entity_state))
    }

    fn matching_entities(
        state: &AdminState,
        scope: &ListenerScope,
    ) -> Vec<Arc<ConfigurationEntity>> {
        match scope {
            ListenerScope::Pid(pid) => state.configurations.get(pid).cloned().into_iter().collect(),
            ListenerScope::Factory(factory_pid) => state
                .factory_instances
                .get(factory_pid)
                .into_iter()
                .flatten()
                .filter_map(|pid| state.configurations.get(pid).cloned())
                .collect(),
        }
    }
}

/// Creates, looks up and removes configurations, and routes their changes to listeners.
#[derive(Clone)]
pub struct ConfigurationAdmin {
    inner: Arc<AdminInner>,
}

impl ConfigurationAdmin {
    pub fn new(pool: &WorkerPool) -> Self {
        Self {
            inner: Arc::new(AdminInner {
                state: Mutex::new(AdminState::default()),
                notifier: Notifier::new(pool.clone()),
            }),
        }
    }

    pub(crate) fn inner(&self) -> &Arc<AdminInner> {
        &self.inner
    }

    /// The configuration for `pid`, created with empty properties if it doesn't exist.
    pub fn get_configuration(&self, pid: &str) -> Result<Configuration> {
        validate_pid(pid)?;
        Ok(Configuration::new(self.inner.get_or_create(pid)))
    }

    /// A new factory configuration instance with a generated, unique instance name.
    pub fn create_factory_configuration(&self, factory_pid: &str) -> Result<Configuration> {
        validate_factory_pid(factory_pid)?;
        let mut rng = rand::thread_rng();
        let mut state = self.inner.state.lock();
        let pid = loop {
            let name: String = (&mut rng)
                .sample_iter(&Alphanumeric)
                .take(INSTANCE_NAME_LEN)
                .map(char::from)
                .collect();
            let pid = format!("{factory_pid}{FACTORY_PID_SEPARATOR}{name}");
            if !state.configurations.contains_key(&pid) {
                break pid;
            }
        };
        Ok(Configuration::new(AdminInner::create_locked(&self.inner, &mut state, pid)))
    }

    pub fn get_factory_configuration(
        &self,
        factory_pid: &str,
        instance_name: &str,
    ) -> Result<Configuration> {
        validate_factory_pid(factory_pid)?;
        if instance_name.is_empty() || instance_name.contains(FACTORY_PID_SEPARATOR) {
            return Err(ConfigurationError::InvalidInstanceName(instance_name.to_owned()));
        }
        self.get_configuration(&format!("{factory_pid}{FACTORY_PID_SEPARATOR}{instance_name}"))
    }

    /// Configurations that have been updated at least once and match `filter`.
    ///
    /// The filter sees the configuration properties plus `service.pid` and, for factory
    /// instances, `service.factoryPid`.
    pub fn list_configurations(&self, filter: Option<&Filter>) -> Vec<Configuration> {
        let entities: Vec<_> = self.inner.state.lock().configurations.values().cloned().collect();
        let mut result: Vec<Configuration> = entities
            .into_iter()
            .filter(|entity| {
                let state = entity.lock();
                if state.removed || state.change_count == 0 {
                    return false;
                }
                filter.is_none_or(|filter| {
                    let mut props = state.properties.clone();
                    props.insert(keys::SERVICE_PID, entity.pid());
                    if let Some(factory_pid) = entity.factory_pid() {
                        props.insert(keys::SERVICE_FACTORY_PID, factory_pid);
                    }
                    filter.matches(&props)
                })
            })
            .map(Configuration::new)
            .collect();
        result.sort_by(|a, b| a.entity().pid().cmp(b.entity().pid()));
        result
    }

    /// Register a listener; it first receives the current state of every matching
    /// configuration that has been updated at least once.
    pub fn add_configuration_listener(
        &self,
        scope: ListenerScope,
        listener: Arc<dyn ConfigurationListener>,
    ) -> ListenerToken {
        let token = self.inner.notifier.add_listener(scope.clone(), listener);

        // The listener is visible to new notifications before the current state is read, so a
        // concurrent change can only lead to a stale delivery, which the notifier drops.
        let state = self.inner.state.lock();
        for entity in AdminInner::matching_entities(&state, &scope) {
            let entity_state = entity.lock();
            if let Some(event) = ConfigurationEntity::current_event(&entity_state, entity.pid()) {
                log::debug!(
                    "Queueing initial delivery of '{}' to listener {token:?}",
                    entity.pid()
                );
                let _ = self.inner.notifier.notify_one(token, event);
            }
        }
        token
    }

    pub fn remove_configuration_listener(&self, token: ListenerToken) -> bool {
        self.inner.notifier.remove_listener(token)
    }

    /// Start serving the managed services registered in `framework` and the static
    /// configurations declared by its modules.
    pub fn connect(&self, framework: &Arc<Framework>) -> FrameworkConnection {
        FrameworkConnection::new(self.clone(), framework)
    }
}

fn validate_pid(pid: &str) -> Result<()> {
    let valid = !pid.is_empty()
        && match pid.split_once(FACTORY_PID_SEPARATOR) {
            Some((factory_pid, name)) => {
                !factory_pid.is_empty() && !name.is_empty() && !name.contains(FACTORY_PID_SEPARATOR)
            }
            None => true,
        };
    if valid {
        Ok(())
    } else {
        Err(ConfigurationError::InvalidPid(pid.to_owned()))
    }
}

fn validate_factory_pid(factory_pid: &str) -> Result<()> {
    if factory_pid.is_empty() || factory_pid.contains(FACTORY_PID_SEPARATOR) {
        return Err(ConfigurationError::InvalidFactoryPid(factory_pid.to_owned()));
    }
    Ok(())
}

/// Keeps the configuration admin subscribed to a framework's service and module events.
///
/// Dropping it unsubscribes; managed services stop receiving updates.
pub struct FrameworkConnection {
    admin: ConfigurationAdmin,
    services: Weak<ServiceRegistry>,
    modules: Weak<ModuleRegistry>,
    service_listener: ListenerToken,
    module_listener: ListenerToken,
    tracked: Arc<Mutex<HashMap<ServiceId, ListenerToken>>>,
}

impl FrameworkConnection {
    fn new(admin: ConfigurationAdmin, framework: &Arc<Framework>) -> Self {
        let tracked: Arc<Mutex<HashMap<ServiceId, ListenerToken>>> = Arc::default();
        let services = Arc::downgrade(framework.services());

        let service_listener = {
            let admin = admin.clone();
            let tracked = Arc::clone(&tracked);
            let services = services.clone();
            framework.services().add_service_listener(Arc::new(move |event: &ServiceEvent| {
                let Some(services) = services.upgrade() else {
                    return;
                };
                match event.kind {
                    ServiceEventKind::Registered => {
                        managed::track(&admin, &services, &tracked, &event.reference)
                    }
                    ServiceEventKind::Unregistering => {
                        managed::untrack(&admin, &services, &tracked, &event.reference)
                    }
                    // The PID of a managed service is assumed not to change.
                    ServiceEventKind::Modified => {}
                }
            }))
        };
        for interface in [
            managed::MANAGED_SERVICE_INTERFACE,
            managed::MANAGED_SERVICE_FACTORY_INTERFACE,
        ] {
            for reference in framework.services().get_service_references(interface, None) {
                managed::track(&admin, framework.services(), &tracked, &reference);
            }
        }

        let module_listener = {
            let admin = admin.clone();
            framework.modules().add_module_listener(Arc::new(move |event: &ModuleEvent| {
                match event.kind {
                    ModuleEventKind::Started => {
                        static_config::add_module_configurations(&admin, &event.module)
                    }
                    ModuleEventKind::Stopping => {
                        static_config::remove_module_configurations(&admin, event.module.id())
                    }
                    ModuleEventKind::Stopped => {}
                }
            }))
        };
        for module in framework.modules().modules() {
            static_config::add_module_configurations(&admin, &module);
        }

        Self {
            admin,
            services,
            modules: Arc::downgrade(framework.modules()),
            service_listener,
            module_listener,
            tracked,
        }
    }

    /// Number of managed services and managed service factories currently served.
    pub fn tracked_count(&self) -> usize {
        self.tracked.lock().len()
    }
}

impl Drop for FrameworkConnection {
    fn drop(&mut self) {
        if let Some(services) = self.services.upgrade() {
            services.remove_service_listener(self.service_listener);
        }
        if let Some(modules) = self.modules.upgrade() {
            modules.remove_module_listener(self.module_listener);
        }
        for (_, token) in self.tracked.lock().drain() {
            self.admin.remove_configuration_listener(token);
        }
    }
}
