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
    collections::BTreeMap,
    sync::{Arc, Weak},
};

use async_work::{CompletionHandle, SerialQueue};
use config_admin::{
    ConfigurationEvent, ConfigurationEventKind, ConfigurationListener, ListenerScope,
};
use framework::{keys, Filter, ListenerToken, Module, ModuleId, Properties};
use logging::log;
use parking_lot::Mutex;

use crate::{
    configuration::ComponentConfiguration,
    context::RuntimeContext,
    metadata::{ComponentMetadata, ConfigurationPolicy},
};

#[derive(Default)]
struct ManagerState {
    enabled: bool,
    // Bumped by every enable and disable; a queued enable that sees a newer epoch is stale.
    epoch: u64,
    listeners: Vec<ListenerToken>,
    // Latest configuration admin state per PID: change count and properties.
    cache: BTreeMap<String, (u64, Properties)>,
    singleton: Option<ComponentConfiguration>,
    factory_instances: BTreeMap<String, ComponentConfiguration>,
}

/// Owns the configurations of one component and turns enable, disable and configuration
/// admin changes into configuration lifecycle work.
///
/// All of that work runs on the manager's serial queue; the public operations only schedule
/// it and hand back a completion handle.
pub struct ComponentManager {
    module: Arc<Module>,
    metadata: Arc<ComponentMetadata>,
    context: Arc<RuntimeContext>,
    queue: SerialQueue,
    state: Mutex<ManagerState>,
}

impl ComponentManager {
    pub(crate) fn new(
        module: Arc<Module>,
        metadata: ComponentMetadata,
        context: Arc<RuntimeContext>,
    ) -> Arc<Self> {
        let queue = SerialQueue::new(&context.pool, format!("manager:{}", metadata.name));
        Arc::new(Self {
            module,
            metadata: Arc::new(metadata),
            context,
            queue,
            state: Mutex::new(ManagerState::default()),
        })
    }

    pub fn module_id(&self) -> ModuleId {
        self.module.id()
    }

    pub fn module(&self) -> &Arc<Module> {
        &self.module
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn metadata(&self) -> &ComponentMetadata {
        &self.metadata
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().enabled
    }

    /// The singleton configuration, if any, followed by the factory instances by PID.
    pub fn configurations(&self) -> Vec<ComponentConfiguration> {
        let state = self.state.lock();
        state.singleton.iter().chain(state.factory_instances.values()).cloned().collect()
    }

    /// Enable the component; a no-op with a completed handle if it already is.
    pub fn enable(self: &Arc<Self>) -> CompletionHandle {
        let epoch = {
            let mut state = self.state.lock();
            if state.enabled {
                return CompletionHandle::ready();
            }
            state.enabled = true;
            state.epoch += 1;
            state.epoch
        };
        log::debug!("Enabling component '{}'", self.metadata.name);
        let this = Arc::clone(self);
        self.queue.post_chained(move || this.do_enable(epoch))
    }

    /// Dispose of every configuration; a no-op with a completed handle if already disabled.
    pub fn disable(self: &Arc<Self>) -> CompletionHandle {
        {
            let mut state = self.state.lock();
            if !state.enabled {
                return CompletionHandle::ready();
            }
            state.enabled = false;
            state.epoch += 1;
            for configuration in state.singleton.iter().chain(state.factory_instances.values()) {
                configuration.cancel();
            }
        }
        log::debug!("Disabling component '{}'", self.metadata.name);
        let this = Arc::clone(self);
        self.queue.post_chained(move || this.do_disable())
    }

    fn do_enable(self: &Arc<Self>, epoch: u64) -> CompletionHandle {
        if self.is_stale(&self.state.lock(), epoch) {
            return CompletionHandle::ready();
        }

        if !self.metadata.uses_configuration() {
            let mut state = self.state.lock();
            if self.is_stale(&state, epoch) {
                return CompletionHandle::ready();
            }
            let configuration = self.create_configuration(&Properties::new());
            let handle = configuration.start();
            state.singleton = Some(configuration);
            return handle;
        }

        let require = self.metadata.configuration_policy == ConfigurationPolicy::Require;
        let listener: Arc<dyn ConfigurationListener> = Arc::new(ManagerListener {
            manager: Arc::downgrade(self),
        });
        let mut tokens = Vec::new();
        for pid in &self.metadata.configuration_pids {
            let admin = &self.context.admin;
            tokens.push(
                admin.add_configuration_listener(ListenerScope::Pid(pid.clone()), listener.clone()),
            );
            if require {
                tokens.push(admin.add_configuration_listener(
                    ListenerScope::Factory(pid.clone()),
                    listener.clone(),
                ));
            }
        }

        let cache = self.read_current_configurations(require);
        let mut state = self.state.lock();
        // Stored even when stale: the queued disable removes them.
        state.listeners = tokens;
        state.cache = cache;
        if self.is_stale(&state, epoch) {
            return CompletionHandle::ready();
        }

        let mut handles = vec![self.reconcile_singleton(&mut state)];
        let instance_pids: Vec<String> = state
            .cache
            .keys()
            .filter(|pid| !self.metadata.configuration_pids.contains(pid))
            .cloned()
            .collect();
        for pid in instance_pids {
            handles.push(self.reconcile_factory_instance(&mut state, &pid));
        }
        CompletionHandle::join(handles)
    }

    /// A disable was requested after the enable that posted this job.
    fn is_stale(&self, state: &ManagerState, epoch: u64) -> bool {
        let stale = !state.enabled || state.epoch != epoch;
        if stale {
            log::debug!("Skipping stale enable of '{}'", self.metadata.name);
        }
        stale
    }

    fn read_current_configurations(&self, require: bool) -> BTreeMap<String, (u64, Properties)> {
        let admin = &self.context.admin;
        let mut cache = BTreeMap::new();
        for pid in &self.metadata.configuration_pids {
            let mut found =
                admin.list_configurations(Some(&Filter::equals(keys::SERVICE_PID, pid)));
            if require {
                let instances = Filter::equals(keys::SERVICE_FACTORY_PID, pid);
                found.extend(admin.list_configurations(Some(&instances)));
            }
            for configuration in found {
                // A configuration removed in the meantime reports an error; its removal
                // notification is on the way.
                let read = configuration.get_pid().and_then(|pid| {
                    Ok((pid, configuration.get_change_count()?, configuration.get_properties()?))
                });
                if let Ok((pid, change_count, properties)) = read {
                    cache.insert(pid, (change_count, properties));
                }
            }
        }
        cache
    }

    fn do_disable(&self) -> CompletionHandle {
        let (tokens, configurations) = {
            let mut state = self.state.lock();
            state.cache.clear();
            let tokens = std::mem::take(&mut state.listeners);
            let mut configurations: Vec<_> = state.singleton.take().into_iter().collect();
            configurations.extend(std::mem::take(&mut state.factory_instances).into_values());
            (tokens, configurations)
        };
        for token in tokens {
            self.context.admin.remove_configuration_listener(token);
        }
        CompletionHandle::join(configurations.iter().map(ComponentConfiguration::dispose))
    }

    fn apply_configuration_event(&self, event: &ConfigurationEvent) -> CompletionHandle {
        let mut state = self.state.lock();
        if !state.enabled || state.listeners.is_empty() {
            return CompletionHandle::ready();
        }
        match event.kind {
            ConfigurationEventKind::Updated => {
                if let Some((change_count, _)) = state.cache.get(&event.pid) {
                    // Already seen while reading the current state on enable.
                    if event.change_count <= *change_count {
                        return CompletionHandle::ready();
                    }
                }
                state
                    .cache
                    .insert(event.pid.clone(), (event.change_count, event.properties.clone()));
            }
            ConfigurationEventKind::Removed => {
                if state.cache.remove(&event.pid).is_none() {
                    return CompletionHandle::ready();
                }
            }
        }
        log::debug!(
            "Component '{}' got {:?} of configuration '{}'",
            self.metadata.name,
            event.kind,
            event.pid
        );

        if self.metadata.configuration_pids.contains(&event.pid) {
            self.reconcile_singleton(&mut state)
        } else {
            self.reconcile_factory_instance(&mut state, &event.pid)
        }
    }

    /// Create, update or dispose the singleton so that it reflects the cached configurations.
    fn reconcile_singleton(&self, state: &mut ManagerState) -> CompletionHandle {
        let pids = &self.metadata.configuration_pids;
        let wanted = self.metadata.configuration_policy != ConfigurationPolicy::Require
            || pids.iter().all(|pid| state.cache.contains_key(pid));
        let mut overlay = Properties::new();
        for (_, properties) in pids.iter().filter_map(|pid| state.cache.get(pid)) {
            overlay.merge(properties);
        }

        match (&state.singleton, wanted) {
            (Some(configuration), true) => configuration.update_properties(overlay),
            (Some(_), false) => match state.singleton.take() {
                Some(configuration) => configuration.dispose(),
                None => CompletionHandle::ready(),
            },
            (None, true) => {
                let configuration = self.create_configuration(&overlay);
                let handle = configuration.start();
                state.singleton = Some(configuration);
                handle
            }
            (None, false) => CompletionHandle::ready(),
        }
    }

    fn reconcile_factory_instance(&self, state: &mut ManagerState, pid: &str) -> CompletionHandle {
        let properties = state.cache.get(pid).map(|(_, properties)| properties.clone());
        match (state.factory_instances.get(pid), properties) {
            (Some(configuration), Some(properties)) => configuration.update_properties(properties),
            (Some(_), None) => match state.factory_instances.remove(pid) {
                Some(configuration) => configuration.dispose(),
                None => CompletionHandle::ready(),
            },
            (None, Some(properties)) => {
                let configuration = self.create_configuration(&properties);
                let handle = configuration.start();
                state.factory_instances.insert(pid.to_owned(), configuration);
                handle
            }
            (None, None) => CompletionHandle::ready(),
        }
    }

    fn create_configuration(&self, overlay: &Properties) -> ComponentConfiguration {
        let configuration = ComponentConfiguration::new(
            &self.context,
            Arc::clone(&self.metadata),
            Arc::clone(&self.module),
            overlay,
        );
        log::debug!(
            "Created configuration {} of component '{}'",
            configuration.id(),
            self.metadata.name
        );
        configuration
    }
}

impl std::fmt::Debug for ComponentManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentManager")
            .field("module", &self.module.id())
            .field("name", &self.metadata.name)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

struct ManagerListener {
    manager: Weak<ComponentManager>,
}

impl ConfigurationListener for ManagerListener {
    fn configuration_event(&self, event: &ConfigurationEvent) -> CompletionHandle {
        let Some(manager) = self.manager.upgrade() else {
            return CompletionHandle::ready();
        };
        let event = event.clone();
        let queue_manager = Arc::clone(&manager);
        manager.queue.post_chained(move || queue_manager.apply_configuration_event(&event))
    }
}
