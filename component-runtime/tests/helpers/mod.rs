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

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_work::{WorkerPool, WorkerPoolConfig};
use component_runtime::{
    BoundService, ComponentConfiguration, ComponentContext, ComponentError, ComponentFactory,
    ComponentFactorySymbol, ComponentInstance, ComponentManager, ComponentState, RuntimeConfig,
    ServiceComponentRuntime, SCR_HEADER,
};
use config_admin::ConfigurationAdmin;
use framework::{
    Framework, Module, ModuleDescriptor, ModuleId, Properties, ServiceId, ServiceObject,
    ServiceRegistration, ServiceSource,
};
use parking_lot::{Condvar, Mutex};
use serde_json::{json, Value};

pub const TIMEOUT: Duration = Duration::from_secs(30);

#[ctor::ctor]
fn init() {
    logging::init_logging();
}

/// Object registered for plain test services.
#[derive(Debug)]
pub struct Marker(pub &'static str);

/// Object provided by the recording components.
#[derive(Debug)]
pub struct Provided {
    pub component_id: i64,
}

pub struct TestEnv {
    pub pool: WorkerPool,
    pub framework: Arc<Framework>,
    pub admin: ConfigurationAdmin,
    pub runtime: ServiceComponentRuntime,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_runtime_threads(4)
    }

    pub fn with_runtime_threads(threads: usize) -> Self {
        let pool =
            WorkerPool::new("test", &WorkerPoolConfig::new().with_worker_threads(2)).unwrap();
        let framework = Framework::new();
        let admin = ConfigurationAdmin::new(&pool);
        let config =
            RuntimeConfig::new().with_worker_threads(threads).with_disable_wait_timeout(TIMEOUT);
        let runtime = ServiceComponentRuntime::start(&framework, &admin, config).unwrap();
        Self {
            pool,
            framework,
            admin,
            runtime,
        }
    }

    /// Start a module declaring `components`, each implemented by the given factory.
    pub fn start_module(
        &self,
        name: &str,
        components: Value,
        factories: &[(&str, Arc<dyn ComponentFactory>)],
    ) -> Arc<Module> {
        let mut descriptor = ModuleDescriptor::new(name)
            .with_header(SCR_HEADER, json!({"version": 1, "components": components}));
        for (class, factory) in factories {
            descriptor =
                descriptor.with_symbol(*class, ComponentFactorySymbol::symbol(Arc::clone(factory)));
        }
        self.framework.modules().start_module(descriptor)
    }

    pub fn stop_module(&self, module: &Module) {
        self.framework.modules().stop_module(module.id()).unwrap();
    }

    pub fn register(&self, interface: &str, properties: Properties) -> ServiceRegistration {
        self.framework
            .services()
            .register_service(
                ModuleId::SYSTEM,
                vec![interface.to_owned()],
                ServiceSource::Object(Arc::new(Marker("test"))),
                properties,
            )
            .unwrap()
    }

    pub fn manager(&self, module: &Module, name: &str) -> Arc<ComponentManager> {
        self.runtime.component_manager(module.id(), name).unwrap()
    }

    /// The single configuration of a component, once it exists.
    pub fn configuration(&self, module: &Module, name: &str) -> ComponentConfiguration {
        let manager = self.manager(module, name);
        assert!(test_utils::wait_until(TIMEOUT, || manager.configurations().len() == 1));
        manager.configurations().remove(0)
    }

    pub fn wait_state(&self, configuration: &ComponentConfiguration, state: ComponentState) {
        assert!(
            test_utils::wait_until(TIMEOUT, || configuration.state() == state),
            "{configuration:?} never reached {state:?}"
        );
    }

    pub fn settle(&self) {
        assert!(self.pool.wait_idle_timeout(TIMEOUT));
    }
}

/// Blocks callers of [Gate::pass] while closed; counts who is waiting.
#[derive(Default)]
pub struct Gate {
    closed: Mutex<bool>,
    changed: Condvar,
    waiting: AtomicUsize,
}

impl Gate {
    pub fn closed() -> Arc<Self> {
        let gate = Self::default();
        *gate.closed.lock() = true;
        Arc::new(gate)
    }

    pub fn open(&self) {
        *self.closed.lock() = false;
        self.changed.notify_all();
    }

    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    pub fn pass(&self) {
        let mut closed = self.closed.lock();
        self.waiting.fetch_add(1, Ordering::SeqCst);
        while *closed {
            self.changed.wait(&mut closed);
        }
        self.waiting.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Factory of instances whose bind callbacks wait at `gate`; used to keep runtime workers busy.
pub fn gated_factory(gate: &Arc<Gate>) -> Arc<dyn ComponentFactory> {
    let gate = Arc::clone(gate);
    Arc::new(move |_: &ComponentContext| {
        let instance: Box<dyn ComponentInstance> = Box::new(GatedInstance {
            gate: Arc::clone(&gate),
        });
        Ok::<_, ComponentError>(instance)
    })
}

struct GatedInstance {
    gate: Arc<Gate>,
}

impl ComponentInstance for GatedInstance {
    fn bind(&mut self, _reference: &str, _service: &BoundService) -> Result<(), ComponentError> {
        self.gate.pass();
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Create(Properties),
    Activate,
    Deactivate,
    Modified(Properties),
    Bind(String, ServiceId),
    Unbind(String, ServiceId),
}

/// Records the callbacks of every instance of one component.
#[derive(Default)]
pub struct Recorder {
    calls: Mutex<Vec<Call>>,
    pub fail_activate: AtomicBool,
    pub fail_bind: AtomicBool,
    // Callbacks currently running, per component.id.
    running: Mutex<HashMap<i64, usize>>,
    pub overlapped: AtomicBool,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().iter().filter(|call| predicate(call)).count()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    fn record(&self, component_id: i64, call: Call) {
        {
            let mut running = self.running.lock();
            let count = running.entry(component_id).or_default();
            if *count != 0 {
                self.overlapped.store(true, Ordering::SeqCst);
            }
            *count += 1;
        }
        self.calls.lock().push(call);
        std::thread::yield_now();
        if let Some(count) = self.running.lock().get_mut(&component_id) {
            *count -= 1;
        }
    }

    pub fn factory(self: &Arc<Self>) -> Arc<dyn ComponentFactory> {
        Arc::new(RecordingFactory(Arc::clone(self)))
    }
}

struct RecordingFactory(Arc<Recorder>);

impl ComponentFactory for RecordingFactory {
    fn create(
        &self,
        context: &ComponentContext,
    ) -> Result<Box<dyn ComponentInstance>, ComponentError> {
        let component_id = context.component_id().unwrap_or_default();
        self.0.record(component_id, Call::Create(context.properties().clone()));
        let provided: ServiceObject = Arc::new(Provided { component_id });
        Ok(Box::new(RecordingInstance {
            recorder: Arc::clone(&self.0),
            component_id,
            provided,
        }))
    }
}

struct RecordingInstance {
    recorder: Arc<Recorder>,
    component_id: i64,
    provided: ServiceObject,
}

impl ComponentInstance for RecordingInstance {
    fn activate(&mut self, _context: &ComponentContext) -> Result<(), ComponentError> {
        self.recorder.record(self.component_id, Call::Activate);
        if self.recorder.fail_activate.load(Ordering::SeqCst) {
            return Err(ComponentError::new("activation refused"));
        }
        Ok(())
    }

    fn deactivate(&mut self, _context: &ComponentContext) -> Result<(), ComponentError> {
        self.recorder.record(self.component_id, Call::Deactivate);
        Ok(())
    }

    fn modified(&mut self, context: &ComponentContext) -> Result<(), ComponentError> {
        self.recorder.record(self.component_id, Call::Modified(context.properties().clone()));
        Ok(())
    }

    fn bind(&mut self, reference: &str, service: &BoundService) -> Result<(), ComponentError> {
        let call = Call::Bind(reference.to_owned(), service.reference.id());
        self.recorder.record(self.component_id, call);
        if self.recorder.fail_bind.load(Ordering::SeqCst) {
            return Err(ComponentError::new("bind refused"));
        }
        Ok(())
    }

    fn unbind(&mut self, reference: &str, service: &BoundService) -> Result<(), ComponentError> {
        let call = Call::Unbind(reference.to_owned(), service.reference.id());
        self.recorder.record(self.component_id, call);
        Ok(())
    }

    fn provided_service(&self) -> Option<ServiceObject> {
        Some(Arc::clone(&self.provided))
    }
}
