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

use std::{collections::BTreeMap, sync::Arc};

use framework::ModuleId;
use parking_lot::Mutex;

use crate::manager::ComponentManager;

type Key = (ModuleId, String);

/// Index of the component managers of all modules, keyed by module and component name.
///
/// Pure bookkeeping: the lock is only held for map operations, never across lifecycle work.
#[derive(Default)]
pub struct ComponentRegistry {
    managers: Mutex<BTreeMap<Key, Arc<ComponentManager>>>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if a manager with the same module and name is already present.
    pub fn add(&self, manager: Arc<ComponentManager>) -> bool {
        let key = (manager.module_id(), manager.name().to_owned());
        let mut managers = self.managers.lock();
        if managers.contains_key(&key) {
            return false;
        }
        managers.insert(key, manager);
        true
    }

    pub fn remove(&self, module: ModuleId, name: &str) -> Option<Arc<ComponentManager>> {
        self.managers.lock().remove(&(module, name.to_owned()))
    }

    /// Remove `manager` itself; a different manager stored under the same key stays.
    pub fn remove_manager(&self, manager: &Arc<ComponentManager>) -> bool {
        let key = (manager.module_id(), manager.name().to_owned());
        let mut managers = self.managers.lock();
        match managers.get(&key) {
            Some(stored) if Arc::ptr_eq(stored, manager) => {
                managers.remove(&key);
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, module: ModuleId, name: &str) -> Option<Arc<ComponentManager>> {
        self.managers.lock().get(&(module, name.to_owned())).cloned()
    }

    pub fn get_all(&self) -> Vec<Arc<ComponentManager>> {
        self.managers.lock().values().cloned().collect()
    }

    pub fn get_all_of_module(&self, module: ModuleId) -> Vec<Arc<ComponentManager>> {
        self.managers
            .lock()
            .range((module, String::new())..)
            .take_while(|((m, _), _)| *m == module)
            .map(|(_, manager)| Arc::clone(manager))
            .collect()
    }

    pub fn clear(&self) {
        self.managers.lock().clear();
    }

    pub fn count(&self) -> usize {
        self.managers.lock().len()
    }
}
