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
#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use async_work::{WorkerPool, WorkerPoolConfig};
use config_admin::{
    ConfigurationAdmin, DeliveryError, FrameworkConnection, ManagedService,
    ManagedServiceFactory, ManagedServiceFactoryHandle, ManagedServiceHandle,
    MANAGED_SERVICE_FACTORY_INTERFACE, MANAGED_SERVICE_INTERFACE,
};
use framework::{keys, Framework, ModuleId, Properties, ServiceRegistration, ServiceSource};
use parking_lot::Mutex;

pub const TIMEOUT: Duration = Duration::from_secs(30);

#[ctor::ctor]
fn init() {
    logging::init_logging();
}

pub struct TestEnv {
    pub pool: WorkerPool,
    pub framework: Arc<Framework>,
    pub admin: ConfigurationAdmin,
    pub connection: FrameworkConnection,
}

impl TestEnv {
    pub fn new() -> Self {
        let pool =
            WorkerPool::new("test", &WorkerPoolConfig::new().with_worker_threads(4)).unwrap();
        let framework = Framework::new();
        let admin = ConfigurationAdmin::new(&pool);
        let connection = admin.connect(&framework);
        Self {
            pool,
            framework,
            admin,
            connection,
        }
    }

    pub fn register_managed_service(
        &self,
        pid: &str,
        service: Arc<dyn ManagedService>,
    ) -> ServiceRegistration {
        self.framework
            .services()
            .register_service(
                ModuleId::SYSTEM,
                vec![MANAGED_SERVICE_INTERFACE.to_owned()],
                ServiceSource::Object(ManagedServiceHandle::service_object(service)),
                Properties::new().with(keys::SERVICE_PID, pid),
            )
            .unwrap()
    }

    pub fn register_managed_service_factory(
        &self,
        factory_pid: &str,
        factory: Arc<dyn ManagedServiceFactory>,
    ) -> ServiceRegistration {
        self.framework
            .services()
            .register_service(
                ModuleId::SYSTEM,
                vec![MANAGED_SERVICE_FACTORY_INTERFACE.to_owned()],
                ServiceSource::Object(ManagedServiceFactoryHandle::service_object(factory)),
                Properties::new().with(keys::SERVICE_PID, factory_pid),
            )
            .unwrap()
    }

    /// Wait until every queued delivery has run.
    pub fn settle(&self) {
        assert!(self.pool.wait_idle_timeout(TIMEOUT));
    }
}

/// Records every `updated` call.
#[derive(Default)]
pub struct RecordingService {
    pub calls: Mutex<Vec<Option<Properties>>>,
    pub fail: bool,
}

impl RecordingService {
    pub fn failing() -> Self {
        Self {
            calls: Mutex::default(),
            fail: true,
        }
    }

    pub fn calls(&self) -> Vec<Option<Properties>> {
        self.calls.lock().clone()
    }
}

impl ManagedService for RecordingService {
    fn updated(&self, properties: Option<&Properties>) -> Result<(), DeliveryError> {
        self.calls.lock().push(properties.cloned());
        if self.fail {
            return Err(DeliveryError::new("rejected"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FactoryCall {
    Updated(String, Properties),
    Removed(String),
}

#[derive(Default)]
pub struct RecordingFactory {
    pub calls: Mutex<Vec<FactoryCall>>,
}

impl RecordingFactory {
    pub fn calls(&self) -> Vec<FactoryCall> {
        self.calls.lock().clone()
    }
}

impl ManagedServiceFactory for RecordingFactory {
    fn updated(&self, pid: &str, properties: &Properties) -> Result<(), DeliveryError> {
        self.calls.lock().push(FactoryCall::Updated(pid.to_owned(), properties.clone()));
        Ok(())
    }

    fn removed(&self, pid: &str) {
        self.calls.lock().push(FactoryCall::Removed(pid.to_owned()));
    }
}
