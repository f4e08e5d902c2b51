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

//! One runtime instance of a component and its lifecycle state machine.
//!
//! Every transition runs with the configuration's core lock held, and all work triggered from
//! outside (service events, configuration changes, disposal) is posted to the configuration's
//! own serial queue, so transitions never overlap and keep their arrival order. The only
//! transition that may run on a foreign thread is the activation of a delayed component by the
//! first user of its service. Service registry calls on the component's own service happen
//! after the core lock is released.

use std::{
    collections::BTreeMap,
    ops::{Deref, DerefMut},
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
    thread::{self, ThreadId},
};

use async_work::{CompletionHandle, SerialQueue};
use framework::{
    keys, Filter, ListenerToken, Module, Properties, ServiceEvent, ServiceEventKind,
    ServiceFactory, ServiceObject, ServiceReference, ServiceRegistration, ServiceRegistry,
    ServiceSource,
};
use logging::log;
use parking_lot::{Mutex, MutexGuard, RwLock};
use serde::Serialize;

use crate::{
    context::RuntimeContext,
    error::{ComponentError, RuntimeError},
    instance::{find_factory, BoundService, ComponentContext, ComponentInstance},
    metadata::{ComponentMetadata, ReferenceMetadata},
    reference_manager::{BindingDelta, ManualBind, ReferenceManager},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComponentState {
    #[default]
    UnsatisfiedReference,
    Satisfied,
    Active,
    FailedActivation,
}

/// Binding state of one reference, as captured by the last transition.
#[derive(Debug, Clone)]
pub struct ReferenceSnapshot {
    pub name: String,
    pub target: Option<String>,
    pub satisfied: bool,
    pub bound: Vec<ServiceReference>,
    /// Every service currently matching the reference, bound or not.
    pub candidates: Vec<ServiceReference>,
}

/// Consistent view of a configuration for introspection.
#[derive(Debug, Clone)]
pub struct ConfigurationSnapshot {
    pub id: u64,
    pub state: ComponentState,
    pub properties: Properties,
    pub references: Vec<ReferenceSnapshot>,
}

struct ActiveInstance {
    instance: Box<dyn ComponentInstance>,
    context: ComponentContext,
    provided: Option<ServiceObject>,
}

/// What the component's own service registration should look like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Publication {
    None,
    Delayed { epoch: u64 },
    Immediate { generation: u64 },
}

struct CoreState {
    state: ComponentState,
    disposed: bool,
    properties: Properties,
    references: Vec<ReferenceManager>,
    active: Option<ActiveInstance>,
    // Bumped on every activation; an immediate component re-registers for a new instance.
    generation: u64,
    delayed_users: usize,
    // Bumped when an instance in use through the delayed service goes away, so that the
    // service is registered anew and users drop the stale object.
    delayed_epoch: u64,
    published: Publication,
    published_properties: Properties,
    registration: Option<Arc<ServiceRegistration>>,
}

struct CoreGuard<'a> {
    guard: MutexGuard<'a, CoreState>,
    owner: &'a Mutex<Option<ThreadId>>,
}

impl Deref for CoreGuard<'_> {
    type Target = CoreState;

    fn deref(&self) -> &CoreState {
        &self.guard
    }
}

impl DerefMut for CoreGuard<'_> {
    fn deref_mut(&mut self) -> &mut CoreState {
        &mut self.guard
    }
}

impl Drop for CoreGuard<'_> {
    fn drop(&mut self) {
        *self.owner.lock() = None;
    }
}

struct ConfigurationInner {
    id: u64,
    metadata: Arc<ComponentMetadata>,
    module: Arc<Module>,
    services: Arc<ServiceRegistry>,
    queue: SerialQueue,
    core: Mutex<CoreState>,
    // Thread currently holding `core`; used to refuse re-entrant calls from callbacks.
    owner: Mutex<Option<ThreadId>>,
    // Set by the manager as soon as a disable is requested; queued work then never activates.
    cancelled: AtomicBool,
    snapshot: RwLock<ConfigurationSnapshot>,
    listener: Mutex<Option<ListenerToken>>,
}

/// One runtime instance of a component: the singleton, or one per factory configuration.
#[derive(Clone)]
pub struct ComponentConfiguration {
    inner: Arc<ConfigurationInner>,
}

impl ComponentConfiguration {
    pub(crate) fn new(
        context: &RuntimeContext,
        metadata: Arc<ComponentMetadata>,
        module: Arc<Module>,
        overlay: &Properties,
    ) -> Self {
        let id = context.next_configuration_id();
        let properties = merge_properties(&metadata, overlay, id);
        let references: Vec<ReferenceManager> = metadata
            .references
            .iter()
            .map(|reference| {
                let mut manager = ReferenceManager::new(reference.clone(), id as i64);
                manager.set_target(target_for(reference, &properties));
                manager
            })
            .collect();

        let core = CoreState {
            state: ComponentState::UnsatisfiedReference,
            disposed: false,
            properties,
            references,
            active: None,
            generation: 0,
            delayed_users: 0,
            delayed_epoch: 0,
            published: Publication::None,
            published_properties: Properties::new(),
            registration: None,
        };
        let snapshot = make_snapshot(id, &core);
        let queue = SerialQueue::new(&context.pool, format!("component:{}#{id}", metadata.name));

        Self {
            inner: Arc::new(ConfigurationInner {
                id,
                metadata,
                module,
                services: Arc::clone(&context.services),
                queue,
                core: Mutex::new(core),
                owner: Mutex::new(None),
                cancelled: AtomicBool::new(false),
                snapshot: RwLock::new(snapshot),
                listener: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn component_name(&self) -> &str {
        &self.inner.metadata.name
    }

    pub fn state(&self) -> ComponentState {
        self.inner.snapshot.read().state
    }

    pub fn properties(&self) -> Properties {
        self.inner.snapshot.read().properties.clone()
    }

    pub fn snapshot(&self) -> ConfigurationSnapshot {
        self.inner.snapshot.read().clone()
    }

    /// Bind `service` to `reference` by hand.
    ///
    /// Fails with [RuntimeError::StaticReference] for a static reference of an active
    /// configuration; the bindings stay as they were.
    pub fn bind_service(
        &self,
        reference: &str,
        service: &ServiceReference,
    ) -> Result<(), RuntimeError> {
        let reference = reference.to_owned();
        let service = service.clone();
        self.inner.run_sync(move |this| {
            this.transition(|this, core| this.manual_bind(core, &reference, &service))
        })
    }

    /// Unbind `service` from `reference`; it stays unbound until it is registered again or
    /// bound by hand.
    pub fn unbind_service(
        &self,
        reference: &str,
        service: &ServiceReference,
    ) -> Result<(), RuntimeError> {
        let reference = reference.to_owned();
        let service = service.clone();
        self.inner.run_sync(move |this| {
            this.transition(|this, core| this.manual_unbind(core, &reference, &service))
        })
    }

    /// Start tracking services; the returned handle completes after the first evaluation.
    pub(crate) fn start(&self) -> CompletionHandle {
        let inner = &self.inner;
        if !inner.metadata.references.is_empty() {
            let weak = Arc::downgrade(inner);
            let listener = move |event: &ServiceEvent| {
                if let Some(inner) = weak.upgrade() {
                    inner.service_changed(event);
                }
            };
            let token = inner.services.add_service_listener(Arc::new(listener));
            *inner.listener.lock() = Some(token);
        }

        let this = Arc::clone(inner);
        inner.queue.post(move || {
            this.transition(|this, core| {
                for manager in core.references.iter_mut() {
                    let candidates =
                        this.services.get_service_references(manager.interface(), manager.target());
                    manager.reset(candidates);
                }
                this.evaluate(core);
            })
        })
    }

    /// Apply new configuration admin properties on top of the metadata properties.
    pub(crate) fn update_properties(&self, overlay: Properties) -> CompletionHandle {
        let this = Arc::clone(&self.inner);
        self.inner.queue.post(move || {
            this.transition(|this, core| this.apply_properties(core, &overlay))
        })
    }

    /// Make every queued transition refrain from activating; the dispose job follows.
    pub(crate) fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
    }

    /// Deactivate and stop tracking for good.
    pub(crate) fn dispose(&self) -> CompletionHandle {
        let this = Arc::clone(&self.inner);
        self.inner.queue.post(move || {
            this.transition(|this, core| {
                if core.disposed {
                    return;
                }
                this.deactivate(core);
                core.state = ComponentState::UnsatisfiedReference;
                core.disposed = true;
            });
            if let Some(token) = this.listener.lock().take() {
                this.services.remove_service_listener(token);
            }
            log::debug!("Disposed configuration {} of '{}'", this.id, this.metadata.name);
        })
    }
}

impl std::fmt::Debug for ComponentConfiguration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentConfiguration")
            .field("id", &self.inner.id)
            .field("component", &self.inner.metadata.name)
            .field("state", &self.state())
            .finish()
    }
}

impl ConfigurationInner {
    fn lock_core(&self) -> CoreGuard<'_> {
        let guard = self.core.lock();
        *self.owner.lock() = Some(thread::current().id());
        CoreGuard {
            guard,
            owner: &self.owner,
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn is_transition_thread(&self) -> bool {
        *self.owner.lock() == Some(thread::current().id())
    }

    /// Run `f` as one transition, then bring the own service registration up to date.
    fn transition<R>(self: &Arc<Self>, f: impl FnOnce(&Arc<Self>, &mut CoreState) -> R) -> R {
        let result = {
            let mut core = self.lock_core();
            let result = f(self, &mut *core);
            self.publish(&core);
            result
        };
        self.reconcile_registration();
        result
    }

    /// Run `f` on the queue of this configuration and wait for its result.
    fn run_sync<R: Send + 'static>(
        self: &Arc<Self>,
        f: impl FnOnce(&Arc<Self>) -> Result<R, RuntimeError> + Send + 'static,
    ) -> Result<R, RuntimeError> {
        if self.is_transition_thread() {
            return Err(RuntimeError::Reentrant(self.id));
        }
        if self.queue.is_current() {
            return f(self);
        }
        let slot = Arc::new(Mutex::new(None));
        let handle = {
            let slot = Arc::clone(&slot);
            let this = Arc::clone(self);
            self.queue.post(move || {
                *slot.lock() = Some(f(&this));
            })
        };
        handle.wait();
        let result = slot.lock().take();
        // An empty slot means the job panicked.
        result.unwrap_or(Err(RuntimeError::Disposed(self.id)))
    }

    fn service_changed(self: &Arc<Self>, event: &ServiceEvent) {
        let interested = self
            .metadata
            .references
            .iter()
            .any(|reference| event.reference.interfaces().contains(&reference.interface));
        if !interested {
            return;
        }
        let this = Arc::clone(self);
        let event = event.clone();
        let _ = self.queue.post(move || {
            this.transition(|this, core| this.handle_service_event(core, &event))
        });
    }

    fn handle_service_event(&self, core: &mut CoreState, event: &ServiceEvent) {
        if core.disposed {
            return;
        }
        let active = core.state == ComponentState::Active;
        let mut lost_static = false;
        let mut deltas = Vec::new();
        for (index, manager) in core.references.iter_mut().enumerate() {
            if !event.reference.interfaces().iter().any(|i| i == manager.interface()) {
                continue;
            }
            let frozen = active && !manager.is_dynamic();
            let delta = match event.kind {
                ServiceEventKind::Registered => manager.service_added(&event.reference, frozen),
                ServiceEventKind::Modified => manager.service_modified(&event.reference, frozen),
                ServiceEventKind::Unregistering => {
                    manager.service_removed(&event.reference, frozen)
                }
            };
            if delta.is_empty() {
                continue;
            }
            // A frozen reference only ever reports the loss of a bound service.
            lost_static |= frozen;
            deltas.push((index, delta));
        }
        // Retrying a failed activation needs an actual binding change.
        if deltas.is_empty() && core.state == ComponentState::FailedActivation {
            return;
        }

        if core.state == ComponentState::Active {
            if lost_static {
                log::debug!(
                    "Configuration {} of '{}' lost a statically bound service",
                    self.id,
                    self.metadata.name
                );
                self.deactivate(core);
                core.state = ComponentState::Satisfied;
                for manager in core.references.iter_mut() {
                    manager.refresh();
                }
            } else {
                for (index, delta) in deltas {
                    self.apply_dynamic(core, index, delta);
                }
            }
        }
        self.evaluate(core);
    }

    /// Hand binding changes of a dynamic reference to the active instance.
    fn apply_dynamic(&self, core: &mut CoreState, index: usize, delta: BindingDelta) {
        let CoreState {
            active, references, ..
        } = core;
        let Some(active) = active.as_mut() else {
            return;
        };
        let manager = &mut references[index];
        let name = manager.name().to_owned();

        let mut pending = delta;
        while !pending.is_empty() {
            for reference in &pending.unbound {
                self.invoke_unbind(active, &name, reference);
            }
            let mut retry = BindingDelta::default();
            for reference in &pending.bound {
                if let Err(reason) = self.invoke_bind(active, &name, reference) {
                    log::error!(
                        "Configuration {} of '{}' failed to bind service {} to '{name}': {reason}",
                        self.id,
                        self.metadata.name,
                        reference.id()
                    );
                    let replacement = manager.reject(reference);
                    retry.bound.extend(replacement.bound);
                    retry.unbound.extend(replacement.unbound);
                }
            }
            pending = retry;
        }
    }

    fn invoke_bind(
        &self,
        active: &mut ActiveInstance,
        name: &str,
        reference: &ServiceReference,
    ) -> Result<(), String> {
        let object = self
            .services
            .get_service(reference)
            .ok_or_else(|| "the service is not available".to_owned())?;
        let bound = BoundService {
            reference: reference.clone(),
            object,
        };
        let result = catch_unwind(AssertUnwindSafe(|| active.instance.bind(name, &bound)));
        match result {
            Ok(Ok(())) => {
                active.context.bind(name, bound);
                Ok(())
            }
            Ok(Err(err)) => {
                self.services.unget_service(reference);
                Err(err.to_string())
            }
            Err(_) => {
                self.services.unget_service(reference);
                Err("the bind callback panicked".to_owned())
            }
        }
    }

    fn invoke_unbind(&self, active: &mut ActiveInstance, name: &str, reference: &ServiceReference) {
        let bound = active
            .context
            .bound_services(name)
            .iter()
            .find(|bound| bound.reference == *reference)
            .cloned();
        let Some(bound) = bound else {
            return;
        };
        match catch_unwind(AssertUnwindSafe(|| active.instance.unbind(name, &bound))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => log::error!(
                "Configuration {} of '{}' failed to unbind service {} from '{name}': {err}",
                self.id,
                self.metadata.name,
                reference.id()
            ),
            Err(_) => log::error!(
                "Unbind callback of '{}' panicked for service {}",
                self.metadata.name,
                reference.id()
            ),
        }
        active.context.unbind(name, reference);
        self.services.unget_service(reference);
    }

    /// Move to the state the current reference satisfaction calls for.
    fn evaluate(&self, core: &mut CoreState) {
        if core.disposed {
            return;
        }
        let satisfied = core.references.iter().all(ReferenceManager::is_satisfied);
        match (core.state, satisfied) {
            (ComponentState::Active, true) => {}
            (ComponentState::Active, false) => {
                self.deactivate(core);
                core.state = ComponentState::UnsatisfiedReference;
            }
            (_, false) => core.state = ComponentState::UnsatisfiedReference,
            (_, true) => {
                core.state = ComponentState::Satisfied;
                if self.metadata.immediate {
                    self.activate(core);
                }
            }
        }
    }

    /// Create and activate the instance; returns whether the configuration is now active.
    fn activate(&self, core: &mut CoreState) -> bool {
        if self.is_cancelled() {
            log::debug!(
                "Not activating configuration {} of '{}': its component is being disabled",
                self.id,
                self.metadata.name
            );
            return false;
        }
        let Some(bound) = self.collect_bound(core) else {
            core.state = ComponentState::UnsatisfiedReference;
            return false;
        };
        let context = ComponentContext::new(self.module.id(), core.properties.clone(), bound);

        let result = catch_unwind(AssertUnwindSafe(|| {
            let factory = find_factory(&self.module, &self.metadata.implementation_class)?;
            let mut instance = factory.create(&context)?;
            instance.activate(&context)?;
            let provided = instance.provided_service();
            if self.metadata.service.is_some() && provided.is_none() {
                return Err(ComponentError::new("the instance provides no service object"));
            }
            Ok((instance, provided))
        }))
        .unwrap_or_else(|_| Err(ComponentError::new("activation panicked")));

        match result {
            Ok((instance, provided)) => {
                core.generation += 1;
                core.active = Some(ActiveInstance {
                    instance,
                    context,
                    provided,
                });
                core.state = ComponentState::Active;
                true
            }
            Err(err) => {
                log::error!(
                    "Failed to activate configuration {} of '{}': {err}",
                    self.id,
                    self.metadata.name
                );
                let mut context = context;
                self.release_bound(context.take_bound());
                core.state = ComponentState::FailedActivation;
                false
            }
        }
    }

    /// Get the objects of all bound services; unavailable ones are rejected and replaced
    /// where possible. `None` if that leaves a reference unsatisfied.
    fn collect_bound(&self, core: &mut CoreState) -> Option<BTreeMap<String, Vec<BoundService>>> {
        loop {
            let mut bound = BTreeMap::new();
            let mut missing = false;
            for manager in core.references.iter_mut() {
                let mut services = Vec::new();
                for reference in manager.bound().to_vec() {
                    match self.services.get_service(&reference) {
                        Some(object) => services.push(BoundService { reference, object }),
                        None => {
                            log::warn!(
                                "Service {} bound to '{}' of '{}' is not available",
                                reference.id(),
                                manager.name(),
                                self.metadata.name
                            );
                            let _ = manager.reject(&reference);
                            missing = true;
                        }
                    }
                }
                bound.insert(manager.name().to_owned(), services);
            }
            if !missing {
                return Some(bound);
            }
            self.release_bound(bound);
            if !core.references.iter().all(ReferenceManager::is_satisfied) {
                return None;
            }
        }
    }

    fn release_bound(&self, bound: BTreeMap<String, Vec<BoundService>>) {
        for service in bound.into_values().flatten() {
            self.services.unget_service(&service.reference);
        }
    }

    fn deactivate(&self, core: &mut CoreState) {
        for manager in core.references.iter_mut() {
            manager.clear_rejections();
        }
        let Some(mut active) = core.active.take() else {
            return;
        };
        match catch_unwind(AssertUnwindSafe(|| active.instance.deactivate(&active.context))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => log::error!(
                "Deactivating configuration {} of '{}' failed: {err}",
                self.id,
                self.metadata.name
            ),
            Err(_) => log::error!("Deactivate callback of '{}' panicked", self.metadata.name),
        }
        drop(active.instance);
        self.release_bound(active.context.take_bound());
        if core.delayed_users > 0 {
            core.delayed_epoch += 1;
            core.delayed_users = 0;
        }
    }

    fn apply_properties(&self, core: &mut CoreState, overlay: &Properties) {
        if core.disposed {
            return;
        }
        let properties = merge_properties(&self.metadata, overlay, self.id);
        if properties == core.properties {
            return;
        }
        let targets: Vec<Option<Filter>> =
            self.metadata.references.iter().map(|r| target_for(r, &properties)).collect();
        let targets_changed = core
            .references
            .iter()
            .zip(&targets)
            .any(|(manager, target)| manager.target() != target.as_ref());
        core.properties = properties;

        let restart = targets_changed || self.metadata.modified.is_none();
        if core.state == ComponentState::Active && restart {
            self.deactivate(core);
            core.state = ComponentState::Satisfied;
        }
        for (manager, target) in core.references.iter_mut().zip(targets) {
            if manager.set_target(target) {
                let candidates =
                    self.services.get_service_references(manager.interface(), manager.target());
                manager.reset(candidates);
            }
        }

        if let Some(active) = core.active.as_mut() {
            active.context.set_properties(core.properties.clone());
            match catch_unwind(AssertUnwindSafe(|| active.instance.modified(&active.context))) {
                Ok(Ok(())) => log::debug!(
                    "Configuration {} of '{}' took new properties in place",
                    self.id,
                    self.metadata.name
                ),
                Ok(Err(err)) => log::error!(
                    "Modified callback of configuration {} of '{}' failed: {err}",
                    self.id,
                    self.metadata.name
                ),
                Err(_) => log::error!("Modified callback of '{}' panicked", self.metadata.name),
            }
        } else if core.state == ComponentState::FailedActivation {
            core.state = ComponentState::Satisfied;
        }
        self.evaluate(core);
    }

    fn reference_index(&self, core: &CoreState, reference: &str) -> Result<usize, RuntimeError> {
        core.references.iter().position(|m| m.name() == reference).ok_or_else(|| {
            RuntimeError::UnknownReference {
                component: self.metadata.name.clone(),
                reference: reference.to_owned(),
            }
        })
    }

    /// Common checks of manual binding; returns the index of the reference.
    fn check_manual(
        &self,
        core: &CoreState,
        reference: &str,
        service: &ServiceReference,
    ) -> Result<usize, RuntimeError> {
        if core.disposed {
            return Err(RuntimeError::Disposed(self.id));
        }
        let index = self.reference_index(core, reference)?;
        let manager = &core.references[index];
        if core.state == ComponentState::Active && !manager.is_dynamic() {
            return Err(RuntimeError::StaticReference {
                component: self.metadata.name.clone(),
                reference: reference.to_owned(),
            });
        }
        if !service.interfaces().iter().any(|i| i == manager.interface()) {
            return Err(RuntimeError::ServiceMismatch {
                reference: reference.to_owned(),
                service: service.id(),
            });
        }
        Ok(index)
    }

    fn manual_bind(
        &self,
        core: &mut CoreState,
        reference: &str,
        service: &ServiceReference,
    ) -> Result<(), RuntimeError> {
        let index = self.check_manual(core, reference, service)?;
        if !service.is_registered() {
            return Err(RuntimeError::ServiceMismatch {
                reference: reference.to_owned(),
                service: service.id(),
            });
        }
        match core.references[index].manual_bind(service) {
            ManualBind::AlreadyBound => return Ok(()),
            ManualBind::Full => {
                return Err(RuntimeError::BindFailed {
                    reference: reference.to_owned(),
                    service: service.id(),
                    reason: "the reference is bound to its maximum number of services".to_owned(),
                })
            }
            ManualBind::Added => {}
        }

        if let Some(active) = core.active.as_mut() {
            if let Err(reason) = self.invoke_bind(active, reference, service) {
                core.references[index].manual_unbind(service);
                return Err(RuntimeError::BindFailed {
                    reference: reference.to_owned(),
                    service: service.id(),
                    reason,
                });
            }
        }
        self.evaluate(core);
        Ok(())
    }

    fn manual_unbind(
        &self,
        core: &mut CoreState,
        reference: &str,
        service: &ServiceReference,
    ) -> Result<(), RuntimeError> {
        let index = self.check_manual(core, reference, service)?;
        if !core.references[index].manual_unbind(service) {
            return Ok(());
        }
        if let Some(active) = core.active.as_mut() {
            self.invoke_unbind(active, reference, service);
        }
        self.evaluate(core);
        Ok(())
    }

    /// First use of the delayed service: activate on the calling thread.
    fn get_delayed_service(self: &Arc<Self>) -> Option<ServiceObject> {
        if self.is_transition_thread() {
            log::warn!(
                "Configuration {} of '{}' asked for its own service while changing state",
                self.id,
                self.metadata.name
            );
            return None;
        }
        let provided = {
            let mut core = self.lock_core();
            if core.disposed || self.is_cancelled() {
                return None;
            }
            let activated = match core.state {
                ComponentState::Active => true,
                ComponentState::Satisfied => self.activate(&mut core),
                ComponentState::UnsatisfiedReference | ComponentState::FailedActivation => false,
            };
            if activated {
                core.delayed_users += 1;
            }
            self.publish(&core);
            activated.then(|| core.active.as_ref().and_then(|a| a.provided.clone())).flatten()
        };
        if provided.is_none() {
            // Let the queue withdraw the registration of a failed component.
            let this = Arc::clone(self);
            let _ = self.queue.post(move || this.transition(|_, _| ()));
        }
        provided
    }

    fn release_delayed_service(self: &Arc<Self>, service: ServiceObject) {
        let this = Arc::clone(self);
        let _ = self.queue.post(move || {
            this.transition(|this, core| {
                let current = core
                    .active
                    .as_ref()
                    .and_then(|active| active.provided.as_ref())
                    .is_some_and(|provided| Arc::ptr_eq(provided, &service));
                if !current {
                    return;
                }
                core.delayed_users = core.delayed_users.saturating_sub(1);
                if core.delayed_users == 0
                    && core.state == ComponentState::Active
                    && !core.disposed
                {
                    log::debug!(
                        "Delayed configuration {} of '{}' is no longer used",
                        this.id,
                        this.metadata.name
                    );
                    this.deactivate(core);
                    core.state = ComponentState::Satisfied;
                }
            })
        });
    }

    fn wanted_publication(&self, core: &CoreState) -> Publication {
        if core.disposed || self.is_cancelled() || self.metadata.service.is_none() {
            return Publication::None;
        }
        match (core.state, self.metadata.immediate) {
            (ComponentState::Active, true) => Publication::Immediate {
                generation: core.generation,
            },
            (ComponentState::Satisfied | ComponentState::Active, false) => Publication::Delayed {
                epoch: core.delayed_epoch,
            },
            _ => Publication::None,
        }
    }

    fn service_properties(&self, core: &CoreState) -> Properties {
        let mut properties = core.properties.clone();
        if let Some(service) = &self.metadata.service {
            properties.insert(keys::SERVICE_SCOPE, service.scope.as_str());
        }
        properties
    }

    /// Register, unregister or update the own service to match the current state.
    fn reconcile_registration(self: &Arc<Self>) {
        let (withdrawn, register, update) = {
            let mut core = self.lock_core();
            let wanted = self.wanted_publication(&core);
            let properties = self.service_properties(&core);
            if wanted != core.published {
                let withdrawn = core.registration.take();
                core.published = wanted;
                core.published_properties = properties.clone();
                let source = match wanted {
                    Publication::None => None,
                    Publication::Delayed { .. } => {
                        let factory: Arc<dyn ServiceFactory> = Arc::new(DelayedServiceFactory {
                            configuration: Arc::downgrade(self),
                        });
                        Some(ServiceSource::Factory(factory))
                    }
                    Publication::Immediate { .. } => core
                        .active
                        .as_ref()
                        .and_then(|active| active.provided.clone())
                        .map(ServiceSource::Object),
                };
                (withdrawn, source.map(|source| (source, properties)), None)
            } else if core.published != Publication::None
                && core.published_properties != properties
            {
                core.published_properties = properties.clone();
                (None, None, core.registration.clone().map(|r| (r, properties)))
            } else {
                return;
            }
        };

        if let Some(registration) = withdrawn {
            if let Err(err) = registration.unregister() {
                log::debug!("Service of '{}' was already gone: {err}", self.metadata.name);
            }
        }
        if let Some((registration, properties)) = update {
            if let Err(err) = registration.set_properties(properties) {
                log::debug!("Updating the service of '{}' failed: {err}", self.metadata.name);
            }
        }
        let Some((source, properties)) = register else {
            return;
        };
        let Some(service) = &self.metadata.service else {
            return;
        };
        match self.services.register_service(
            self.module.id(),
            service.interfaces.clone(),
            source,
            properties,
        ) {
            Ok(registration) => {
                log::debug!(
                    "Registered service {} of configuration {} of '{}'",
                    registration.reference().id(),
                    self.id,
                    self.metadata.name
                );
                self.lock_core().registration = Some(Arc::new(registration));
            }
            Err(err) => {
                log::error!("Failed to register the service of '{}': {err}", self.metadata.name);
                let mut core = self.lock_core();
                core.published = Publication::None;
                if core.state == ComponentState::Active {
                    self.deactivate(&mut core);
                    core.state = ComponentState::FailedActivation;
                }
                self.publish(&core);
            }
        }
    }

    fn publish(&self, core: &CoreState) {
        let mut snapshot = self.snapshot.write();
        if snapshot.state != core.state {
            log::debug!(
                "Configuration {} of '{}': {:?} -> {:?}",
                self.id,
                self.metadata.name,
                snapshot.state,
                core.state
            );
        }
        *snapshot = make_snapshot(self.id, core);
    }
}

/// Registered for delayed components; the first `get_service` activates the configuration.
struct DelayedServiceFactory {
    configuration: Weak<ConfigurationInner>,
}

impl ServiceFactory for DelayedServiceFactory {
    fn get_service(&self, _reference: &ServiceReference) -> Option<ServiceObject> {
        self.configuration.upgrade()?.get_delayed_service()
    }

    fn unget_service(&self, _reference: &ServiceReference, service: ServiceObject) {
        if let Some(configuration) = self.configuration.upgrade() {
            configuration.release_delayed_service(service);
        }
    }
}

fn make_snapshot(id: u64, core: &CoreState) -> ConfigurationSnapshot {
    ConfigurationSnapshot {
        id,
        state: core.state,
        properties: core.properties.clone(),
        references: core
            .references
            .iter()
            .map(|manager| ReferenceSnapshot {
                name: manager.name().to_owned(),
                target: manager.target().map(|f| f.as_str().to_owned()),
                satisfied: manager.is_satisfied(),
                bound: manager.bound().to_vec(),
                candidates: manager.matched().to_vec(),
            })
            .collect(),
    }
}

/// Metadata properties overlaid by configuration properties, plus the component identity.
fn merge_properties(metadata: &ComponentMetadata, overlay: &Properties, id: u64) -> Properties {
    let mut properties = metadata.properties.clone();
    properties.merge(overlay);
    properties.insert(keys::COMPONENT_NAME, metadata.name.as_str());
    properties.insert(keys::COMPONENT_ID, id as i64);
    properties
}

/// The target filter of `reference`: `<name>.target` from the properties wins.
fn target_for(reference: &ReferenceMetadata, properties: &Properties) -> Option<Filter> {
    let key = reference.target_property();
    let Some(source) = properties.get(&key).and_then(|v| v.as_str()) else {
        return reference.target.clone();
    };
    match Filter::parse(source) {
        Ok(filter) => Some(filter),
        Err(err) => {
            log::warn!("Ignoring invalid '{key}' filter '{source}': {err}");
            reference.target.clone()
        }
    }
}
