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
use std::{collections::HashMap, sync::Arc};

use async_work::CompletionHandle;
use framework::{
    keys, ListenerToken, Properties, ServiceId, ServiceObject, ServiceReference, ServiceRegistry,
};
use logging::log;
use parking_lot::Mutex;

use crate::{
    factory_pid_of,
    notifier::{ConfigurationEvent, ConfigurationEventKind, ConfigurationListener, ListenerScope},
    ConfigurationAdmin, DeliveryError,
};

/// Interface name under which managed services are registered.
pub const MANAGED_SERVICE_INTERFACE: &str = "cm::ManagedService";

/// Interface name under which managed service factories are registered.
pub const MANAGED_SERVICE_FACTORY_INTERFACE: &str = "cm::ManagedServiceFactory";

/// A service configured through the configuration whose PID is its `service.pid` property.
pub trait ManagedService: Send + Sync {
    /// Called with the new properties, or `None` once the configuration is removed.
    fn updated(&self, properties: Option<&Properties>) -> Result<(), DeliveryError>;
}

/// Manages one service instance per factory configuration instance of its `service.pid`.
pub trait ManagedServiceFactory: Send + Sync {
    fn updated(&self, pid: &str, properties: &Properties) -> Result<(), DeliveryError>;

    fn removed(&self, pid: &str);
}

/// The object to register under [MANAGED_SERVICE_INTERFACE].
pub struct ManagedServiceHandle(pub Arc<dyn ManagedService>);

impl ManagedServiceHandle {
    pub fn service_object(service: Arc<dyn ManagedService>) -> ServiceObject {
        Arc::new(Self(service))
    }
}

/// The object to register under [MANAGED_SERVICE_FACTORY_INTERFACE].
pub struct ManagedServiceFactoryHandle(pub Arc<dyn ManagedServiceFactory>);

impl ManagedServiceFactoryHandle {
    pub fn service_object(service: Arc<dyn ManagedServiceFactory>) -> ServiceObject {
        Arc::new(Self(service))
    }
}

struct ManagedServiceAdapter {
    service: Arc<dyn ManagedService>,
}

impl ConfigurationListener for ManagedServiceAdapter {
    fn configuration_event(&self, event: &ConfigurationEvent) -> CompletionHandle {
        let properties = match event.kind {
            ConfigurationEventKind::Updated => Some(&event.properties),
            ConfigurationEventKind::Removed => None,
        };
        if let Err(err) = self.service.updated(properties) {
            log::error!("Managed service failed to apply configuration '{}': {err}", event.pid);
        }
        CompletionHandle::ready()
    }
}

struct ManagedServiceFactoryAdapter {
    factory: Arc<dyn ManagedServiceFactory>,
}

impl ConfigurationListener for ManagedServiceFactoryAdapter {
    fn configuration_event(&self, event: &ConfigurationEvent) -> CompletionHandle {
        match event.kind {
            ConfigurationEventKind::Updated => {
                if let Err(err) = self.factory.updated(&event.pid, &event.properties) {
                    log::error!(
                        "Managed service factory failed to apply configuration '{}': {err}",
                        event.pid
                    );
                }
            }
            ConfigurationEventKind::Removed => self.factory.removed(&event.pid),
        }
        CompletionHandle::ready()
    }
}

/// The PID a managed service asks for: `service.pid`, falling back to `component.name`.
fn managed_pid(reference: &ServiceReference) -> Option<String> {
    [keys::SERVICE_PID, keys::COMPONENT_NAME].iter().find_map(|key| {
        reference
            .property(key)
            .and_then(|value| value.as_str().map(str::to_owned))
            .filter(|pid| !pid.is_empty())
    })
}

pub(crate) fn track(
    admin: &ConfigurationAdmin,
    services: &Arc<ServiceRegistry>,
    tracked: &Mutex<HashMap<ServiceId, ListenerToken>>,
    reference: &ServiceReference,
) {
    let is_service = reference.interfaces().iter().any(|i| i == MANAGED_SERVICE_INTERFACE);
    let is_factory = reference.interfaces().iter().any(|i| i == MANAGED_SERVICE_FACTORY_INTERFACE);
    if !is_service && !is_factory {
        return;
    }

    // Holding the lock keeps a concurrent scan from tracking the same service twice.
    let mut tracked = tracked.lock();
    if tracked.contains_key(&reference.id()) {
        return;
    }

    let Some(pid) = managed_pid(reference) else {
        log::warn!(
            "Ignoring managed service {} of module {}: it has no '{}' or '{}' property",
            reference.id(),
            reference.module(),
            keys::SERVICE_PID,
            keys::COMPONENT_NAME
        );
        return;
    };

    let (scope, listener): (ListenerScope, Arc<dyn ConfigurationListener>) = if is_service {
        let Some(handle) = services.get_service_as::<ManagedServiceHandle>(reference) else {
            log::warn!(
                "Ignoring managed service {}: the service object is unusable",
                reference.id()
            );
            return;
        };
        (
            ListenerScope::Pid(pid.clone()),
            Arc::new(ManagedServiceAdapter {
                service: Arc::clone(&handle.0),
            }),
        )
    } else {
        let Some(handle) = services.get_service_as::<ManagedServiceFactoryHandle>(reference) else {
            log::warn!(
                "Ignoring managed service factory {}: the service object is unusable",
                reference.id()
            );
            return;
        };
        if factory_pid_of(&pid).is_some() {
            log::warn!("Managed service factory {} has an invalid PID '{pid}'", reference.id());
            return;
        }
        (
            ListenerScope::Factory(pid.clone()),
            Arc::new(ManagedServiceFactoryAdapter {
                factory: Arc::clone(&handle.0),
            }),
        )
    };

    let token = admin.add_configuration_listener(scope, listener);
    tracked.insert(reference.id(), token);
    log::debug!("Tracking managed service {} for PID '{pid}'", reference.id());
}

pub(crate) fn untrack(
    admin: &ConfigurationAdmin,
    services: &Arc<ServiceRegistry>,
    tracked: &Mutex<HashMap<ServiceId, ListenerToken>>,
    reference: &ServiceReference,
) {
    let Some(token) = tracked.lock().remove(&reference.id()) else {
        return;
    };
    admin.remove_configuration_listener(token);
    services.unget_service(reference);
    log::debug!("Managed service {} is no longer tracked", reference.id());
}
