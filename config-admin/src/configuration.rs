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
use std::sync::{Arc, Weak};

use async_work::CompletionHandle;
use framework::Properties;
use parking_lot::{Mutex, MutexGuard};

use crate::{
    admin::AdminInner,
    factory_pid_of,
    notifier::{ConfigurationEvent, Notifier},
    ConfigurationError, Result,
};

pub(crate) struct EntityState {
    pub properties: Properties,
    // Zero until the first update; every update increments it.
    pub change_count: u64,
    pub removed: bool,
}

pub(crate) struct ConfigurationEntity {
    pid: String,
    factory_pid: Option<String>,
    state: Mutex<EntityState>,
    notifier: Arc<Notifier>,
    admin: Weak<AdminInner>,
}

impl ConfigurationEntity {
    pub fn new(pid: String, notifier: Arc<Notifier>, admin: Weak<AdminInner>) -> Arc<Self> {
        Arc::new(Self {
            factory_pid: factory_pid_of(&pid).map(str::to_owned),
            pid,
            state: Mutex::new(EntityState {
                properties: Properties::new(),
                change_count: 0,
                removed: false,
            }),
            notifier,
            admin,
        })
    }

    pub fn pid(&self) -> &str {
        &self.pid
    }

    pub fn factory_pid(&self) -> Option<&str> {
        self.factory_pid.as_deref()
    }

    pub fn lock(&self) -> MutexGuard<'_, EntityState> {
        self.state.lock()
    }

    fn lock_live(&self) -> Result<MutexGuard<'_, EntityState>> {
        let state = self.state.lock();
        if state.removed {
            return Err(ConfigurationError::Removed(self.pid.clone()));
        }
        Ok(state)
    }

    fn ensure_live(&self) -> Result<()> {
        self.lock_live().map(|_| ())
    }

    /// Replace the properties and queue a notification.
    ///
    /// The notification is queued under the entity lock, so queue order matches change order.
    fn store(&self, state: &mut EntityState, properties: Properties) -> CompletionHandle {
        state.properties = properties;
        state.change_count += 1;
        self.notifier.notify(ConfigurationEvent::updated(
            &self.pid,
            state.properties.clone(),
            state.change_count,
        ))
    }

    /// Mark removed and queue the removal notification; the caller holds the admin lock.
    pub fn mark_removed(&self, state: &mut EntityState) -> CompletionHandle {
        state.removed = true;
        if state.change_count == 0 {
            // Never updated, so nobody was told about it.
            return CompletionHandle::ready();
        }
        self.notifier.notify(ConfigurationEvent::removed(&self.pid, state.change_count))
    }

    /// An update event reflecting the current state, if there is anything to report.
    pub fn current_event(state: &EntityState, pid: &str) -> Option<ConfigurationEvent> {
        (!state.removed && state.change_count > 0)
            .then(|| ConfigurationEvent::updated(pid, state.properties.clone(), state.change_count))
    }
}

/// A handle to a configuration entity.
///
/// Two handles compare equal only if they refer to the same entity. Once the entity is
/// removed, every operation on its handles fails with [ConfigurationError::Removed], even if
/// a new configuration with the same PID has been created since.
#[derive(Clone)]
pub struct Configuration {
    entity: Arc<ConfigurationEntity>,
}

impl Configuration {
    pub(crate) fn new(entity: Arc<ConfigurationEntity>) -> Self {
        Self { entity }
    }

    pub fn get_pid(&self) -> Result<String> {
        self.entity.ensure_live()?;
        Ok(self.entity.pid.clone())
    }

    /// The factory PID for a factory configuration instance, `None` otherwise.
    pub fn get_factory_pid(&self) -> Result<Option<String>> {
        self.entity.ensure_live()?;
        Ok(self.entity.factory_pid.clone())
    }

    pub fn get_properties(&self) -> Result<Properties> {
        Ok(self.entity.lock_live()?.properties.clone())
    }

    pub fn get_change_count(&self) -> Result<u64> {
        Ok(self.entity.lock_live()?.change_count)
    }

    pub fn is_removed(&self) -> bool {
        self.entity.lock().removed
    }

    /// Replace the properties; consumers are always notified.
    pub fn update(&self, properties: Properties) -> Result<CompletionHandle> {
        let mut state = self.entity.lock_live()?;
        Ok(self.entity.store(&mut state, properties))
    }

    /// Replace the properties only if they differ from the current ones.
    ///
    /// Returns whether anything changed; nothing is delivered and the change count stays the
    /// same otherwise.
    pub fn update_if_different(&self, properties: Properties) -> Result<(bool, CompletionHandle)> {
        let mut state = self.entity.lock_live()?;
        if state.properties == properties {
            return Ok((false, CompletionHandle::ready()));
        }
        Ok((true, self.entity.store(&mut state, properties)))
    }

    /// Delete the configuration; consumers are told with empty properties.
    ///
    /// The returned handle completes once consumers have processed the removal; this call
    /// itself never waits for them.
    pub fn remove(&self) -> Result<CompletionHandle> {
        match self.entity.admin.upgrade() {
            Some(admin) => admin.remove_entity(&self.entity),
            None => {
                let mut state = self.entity.lock_live()?;
                state.removed = true;
                Ok(CompletionHandle::ready())
            }
        }
    }

    pub(crate) fn entity(&self) -> &Arc<ConfigurationEntity> {
        &self.entity
    }
}

impl PartialEq for Configuration {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.entity, &other.entity)
    }
}

impl Eq for Configuration {}

impl std::fmt::Debug for Configuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.entity.lock();
        f.debug_struct("Configuration")
            .field("pid", &self.entity.pid)
            .field("change_count", &state.change_count)
            .field("removed", &state.removed)
            .finish()
    }
}
