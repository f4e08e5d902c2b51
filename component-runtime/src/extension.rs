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

use std::sync::Arc;

use async_work::CompletionHandle;
use framework::Module;
use logging::{log, tracing};
use parking_lot::Mutex;

use crate::{
    context::RuntimeContext,
    error::RuntimeError,
    manager::ComponentManager,
    metadata::{parse_manifest, SCR_HEADER},
    registry::ComponentRegistry,
};

/// The components of one started module.
pub(crate) struct ModuleExtension {
    module: Arc<Module>,
    context: Arc<RuntimeContext>,
    registry: Arc<ComponentRegistry>,
    managers: Mutex<Vec<Arc<ComponentManager>>>,
}

impl ModuleExtension {
    pub fn new(
        module: Arc<Module>,
        context: Arc<RuntimeContext>,
        registry: Arc<ComponentRegistry>,
    ) -> Self {
        Self {
            module,
            context,
            registry,
            managers: Mutex::new(Vec::new()),
        }
    }

    /// Load the component descriptions of the module and enable the default-enabled ones.
    ///
    /// Waits until every enabled component has been set up, up to the configured timeout.
    pub fn initialize(&self) -> Result<(), RuntimeError> {
        let Some(header) = self.module.header(SCR_HEADER) else {
            return Ok(());
        };
        let _span = tracing::debug_span!("module", name = self.module.name()).entered();
        let descriptions = parse_manifest(header).inspect_err(|err| {
            log::error!("Invalid component manifest in module '{}': {err}", self.module.name())
        })?;

        let mut handles = Vec::new();
        for metadata in descriptions {
            let enabled = metadata.enabled;
            let module = Arc::clone(&self.module);
            let manager = ComponentManager::new(module, metadata, Arc::clone(&self.context));
            if !self.registry.add(Arc::clone(&manager)) {
                log::error!(
                    "Module '{}' declares component '{}' more than once",
                    self.module.name(),
                    manager.name()
                );
                continue;
            }
            self.managers.lock().push(Arc::clone(&manager));
            if enabled {
                handles.push(manager.enable());
            }
        }

        log::info!(
            "Loaded {} component(s) of module '{}'",
            self.managers.lock().len(),
            self.module.name()
        );
        self.wait(CompletionHandle::join(handles), "enabling");
        Ok(())
    }

    /// Disable and forget every component of the module.
    pub fn teardown(&self) {
        let _span = tracing::debug_span!("module", name = self.module.name()).entered();
        let managers = std::mem::take(&mut *self.managers.lock());
        let handles: Vec<CompletionHandle> = managers
            .iter()
            .map(|manager| {
                let handle = manager.disable();
                self.registry.remove_manager(manager);
                handle
            })
            .collect();
        self.wait(CompletionHandle::join(handles), "disabling");
        log::debug!("Tore down the components of module '{}'", self.module.name());
    }

    fn wait(&self, handle: CompletionHandle, what: &str) {
        let timeout = self.context.config.disable_wait_timeout;
        if handle.wait_timeout(timeout) {
            return;
        }
        if handle.is_queued_behind_current_job() {
            log::warn!(
                "Not waiting for {what} the components of module '{}': \
                 the work is queued behind the calling component callback",
                self.module.name()
            );
        } else {
            log::warn!(
                "Timed out after {timeout:?} {what} the components of module '{}'",
                self.module.name()
            );
        }
    }
}
