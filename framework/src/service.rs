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
    any::Any,
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
};

use logging::log;
use parking_lot::{Mutex, RwLock};

use crate::{keys, Filter, ListenerToken, ModuleId, Properties, PropertyValue};

/// A type-erased service object; consumers downcast it to the concrete type they expect.
pub type ServiceObject = Arc<dyn Any + Send + Sync>;

pub type ServiceListener = Arc<dyn Fn(&ServiceEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceId(u64);

impl ServiceId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ServiceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("Service {0} is not registered")]
    NotRegistered(ServiceId),
    #[error("A service must be registered under at least one interface")]
    NoInterfaces,
}

/// Produces service objects on demand; used to defer creating the object until first use.
pub trait ServiceFactory: Send + Sync {
    fn get_service(&self, reference: &ServiceReference) -> Option<ServiceObject>;

    fn unget_service(&self, reference: &ServiceReference, service: ServiceObject);
}

#[derive(Clone)]
pub enum ServiceSource {
    Object(ServiceObject),
    Factory(Arc<dyn ServiceFactory>),
}

impl std::fmt::Debug for ServiceSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceSource::Object(_) => f.write_str("ServiceSource::Object"),
            ServiceSource::Factory(_) => f.write_str("ServiceSource::Factory"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceEventKind {
    Registered,
    Modified,
    Unregistering,
}

#[derive(Debug, Clone)]
pub struct ServiceEvent {
    pub kind: ServiceEventKind,
    pub reference: ServiceReference,
    /// Keys whose values changed; only filled for [ServiceEventKind::Modified].
    pub changed_keys: Vec<String>,
}

#[derive(Default)]
struct FactoryUsage {
    object: Option<ServiceObject>,
    count: usize,
}

struct ServiceEntry {
    id: ServiceId,
    module: ModuleId,
    interfaces: Vec<String>,
    properties: RwLock<Properties>,
    source: ServiceSource,
    registered: AtomicBool,
    usage: Mutex<FactoryUsage>,
}

/// A handle to a registered service, valid (but inert) after unregistration.
#[derive(Clone)]
pub struct ServiceReference {
    entry: Arc<ServiceEntry>,
}

impl ServiceReference {
    pub fn id(&self) -> ServiceId {
        self.entry.id
    }

    /// The module that registered the service.
    pub fn module(&self) -> ModuleId {
        self.entry.module
    }

    pub fn interfaces(&self) -> &[String] {
        &self.entry.interfaces
    }

    pub fn properties(&self) -> Properties {
        self.entry.properties.read().clone()
    }

    pub fn property(&self, key: &str) -> Option<PropertyValue> {
        self.entry.properties.read().get(key).cloned()
    }

    pub fn ranking(&self) -> i64 {
        ranking_of(&self.entry.properties.read())
    }

    pub fn is_registered(&self) -> bool {
        self.entry.registered.load(Ordering::Acquire)
    }

    pub fn is_factory(&self) -> bool {
        matches!(self.entry.source, ServiceSource::Factory(_))
    }

    pub fn matches(&self, interface: &str, filter: Option<&Filter>) -> bool {
        self.entry.interfaces.iter().any(|i| i == interface)
            && filter.is_none_or(|filter| filter.matches(&self.entry.properties.read()))
    }

    fn sort_key(&self) -> (std::cmp::Reverse<i64>, ServiceId) {
        (std::cmp::Reverse(self.ranking()), self.id())
    }
}

impl PartialEq for ServiceReference {
    fn eq(&self, other: &Self) -> bool {
        self.entry.id == other.entry.id
    }
}

impl Eq for ServiceReference {}

impl std::hash::Hash for ServiceReference {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.entry.id.hash(state);
    }
}

/// Orders by ranking (highest first), then by registration order.
impl Ord for ServiceReference {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl PartialOrd for ServiceReference {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Debug for ServiceReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceReference")
            .field("id", &self.entry.id)
            .field("interfaces", &self.entry.interfaces)
            .finish()
    }
}

fn ranking_of(props: &Properties) -> i64 {
    props.get(keys::SERVICE_RANKING).and_then(PropertyValue::as_i64).unwrap_or(0)
}

/// Returned by [ServiceRegistry::register_service]; used to modify or withdraw the service.
pub struct ServiceRegistration {
    reference: ServiceReference,
    registry: Weak<RegistryInner>,
}

impl ServiceRegistration {
    pub fn reference(&self) -> &ServiceReference {
        &self.reference
    }

    /// Replace the service properties; the framework-owned keys are preserved.
    pub fn set_properties(&self, properties: Properties) -> Result<(), ServiceError> {
        self.registry()?.set_properties(&self.reference, properties)
    }

    pub fn unregister(&self) -> Result<(), ServiceError> {
        self.registry()?.unregister(&self.reference)
    }

    fn registry(&self) -> Result<Arc<RegistryInner>, ServiceError> {
        self.registry.upgrade().ok_or(ServiceError::NotRegistered(self.reference.id()))
    }
}

impl std::fmt::Debug for ServiceRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ServiceRegistration").field(&self.reference).finish()
    }
}

#[derive(Default)]
struct RegistryState {
    next_service_id: u64,
    next_listener_id: u64,
    services: BTreeMap<ServiceId, ServiceReference>,
    listeners: Vec<(ListenerToken, ServiceListener)>,
}

struct RegistryInner {
    state: Mutex<RegistryState>,
}

impl RegistryInner {
    fn listeners(&self) -> Vec<ServiceListener> {
        self.state.lock().listeners.iter().map(|(_, listener)| Arc::clone(listener)).collect()
    }

    /// Deliver an event on the calling thread; no registry lock is held while listeners run.
    fn fire(&self, event: ServiceEvent) {
        for listener in self.listeners() {
            listener(&event);
        }
    }

    fn set_properties(
        &self,
        reference: &ServiceReference,
        mut properties: Properties,
    ) -> Result<(), ServiceError> {
        if !reference.is_registered() {
            return Err(ServiceError::NotRegistered(reference.id()));
        }
        let changed_keys = {
            let mut current = reference.entry.properties.write();
            for key in [keys::OBJECTCLASS, keys::SERVICE_ID, keys::SERVICE_SCOPE] {
                if let Some(value) = current.get(key) {
                    properties.insert(key, value.clone());
                }
            }
            let changed_keys = properties.changed_keys(&current);
            *current = properties;
            changed_keys
        };
        self.fire(ServiceEvent {
            kind: ServiceEventKind::Modified,
            reference: reference.clone(),
            changed_keys,
        });
        Ok(())
    }

    fn unregister(&self, reference: &ServiceReference) -> Result<(), ServiceError> {
        if !reference.entry.registered.swap(false, Ordering::AcqRel) {
            return Err(ServiceError::NotRegistered(reference.id()));
        }

        log::debug!("Unregistering service {} {:?}", reference.id(), reference.interfaces());

        // Listeners still see the service in the registry while they handle the event.
        self.fire(ServiceEvent {
            kind: ServiceEventKind::Unregistering,
            reference: reference.clone(),
            changed_keys: Vec::new(),
        });
        self.state.lock().services.remove(&reference.id());

        let released = {
            let mut usage = reference.entry.usage.lock();
            usage.count = 0;
            usage.object.take()
        };
        if let (Some(object), ServiceSource::Factory(factory)) = (released, &reference.entry.source)
        {
            factory.unget_service(reference, object);
        }
        Ok(())
    }
}

/// Publish-find-bind registry of services.
pub struct ServiceRegistry {
    inner: Arc<RegistryInner>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                state: Mutex::new(RegistryState {
                    next_service_id: 1,
                    next_listener_id: 1,
                    ..Default::default()
                }),
            }),
        }
    }

    pub fn register_service(
        &self,
        module: ModuleId,
        interfaces: Vec<String>,
        source: ServiceSource,
        mut properties: Properties,
    ) -> Result<ServiceRegistration, ServiceError> {
        if interfaces.is_empty() {
            return Err(ServiceError::NoInterfaces);
        }

        let reference = {
            let mut state = self.inner.state.lock();
            let id = ServiceId(state.next_service_id);
            state.next_service_id += 1;

            properties.insert(keys::OBJECTCLASS, interfaces.clone());
            properties.insert(keys::SERVICE_ID, id.0 as i64);

            let reference = ServiceReference {
                entry: Arc::new(ServiceEntry {
                    id,
                    module,
                    interfaces,
                    properties: RwLock::new(properties),
                    source,
                    registered: AtomicBool::new(true),
                    usage: Mutex::new(FactoryUsage::default()),
                }),
            };
            state.services.insert(id, reference.clone());
            reference
        };

        log::debug!(
            "Registered service {} {:?} for module {module}",
            reference.id(),
            reference.interfaces()
        );

        self.inner.fire(ServiceEvent {
            kind: ServiceEventKind::Registered,
            reference: reference.clone(),
            changed_keys: Vec::new(),
        });

        Ok(ServiceRegistration {
            reference,
            registry: Arc::downgrade(&self.inner),
        })
    }

    /// Services registered under `interface` and matching `filter`, best ranked first.
    pub fn get_service_references(
        &self,
        interface: &str,
        filter: Option<&Filter>,
    ) -> Vec<ServiceReference> {
        let mut result: Vec<ServiceReference> = self
            .inner
            .state
            .lock()
            .services
            .values()
            .filter(|reference| reference.matches(interface, filter))
            .cloned()
            .collect();
        result.sort();
        result
    }

    pub fn get_service_reference(&self, interface: &str) -> Option<ServiceReference> {
        self.get_service_references(interface, None).into_iter().next()
    }

    /// Services registered by `module`.
    pub fn services_of_module(&self, module: ModuleId) -> Vec<ServiceReference> {
        self.inner
            .state
            .lock()
            .services
            .values()
            .filter(|reference| reference.module() == module)
            .cloned()
            .collect()
    }

    /// Get the service object; a factory-backed service is created on first use.
    pub fn get_service(&self, reference: &ServiceReference) -> Option<ServiceObject> {
        if !reference.is_registered() {
            return None;
        }
        match &reference.entry.source {
            ServiceSource::Object(object) => Some(Arc::clone(object)),
            ServiceSource::Factory(factory) => {
                let mut usage = reference.entry.usage.lock();
                if usage.object.is_none() {
                    let object = factory.get_service(reference)?;
                    usage.object = Some(object);
                }
                usage.count += 1;
                usage.object.clone()
            }
        }
    }

    /// Typed convenience over [Self::get_service].
    pub fn get_service_as<T: Any + Send + Sync>(
        &self,
        reference: &ServiceReference,
    ) -> Option<Arc<T>> {
        self.get_service(reference)?.downcast::<T>().ok()
    }

    /// Release one use of a factory-backed service; the factory is told once nobody uses it.
    pub fn unget_service(&self, reference: &ServiceReference) -> bool {
        let ServiceSource::Factory(factory) = &reference.entry.source else {
            return reference.is_registered();
        };
        let released = {
            let mut usage = reference.entry.usage.lock();
            if usage.count == 0 {
                return false;
            }
            usage.count -= 1;
            if usage.count == 0 {
                usage.object.take()
            } else {
                None
            }
        };
        if let Some(object) = released {
            factory.unget_service(reference, object);
        }
        true
    }

    pub fn unregister(&self, reference: &ServiceReference) -> Result<(), ServiceError> {
        self.inner.unregister(reference)
    }

    /// Unregister everything `module` registered; used when the module stops.
    pub fn unregister_module_services(&self, module: ModuleId) {
        for reference in self.services_of_module(module) {
            // Another thread may have unregistered it in the meantime.
            let _ = self.inner.unregister(&reference);
        }
    }

    pub fn add_service_listener(&self, listener: ServiceListener) -> ListenerToken {
        let mut state = self.inner.state.lock();
        let token = ListenerToken::new(state.next_listener_id);
        state.next_listener_id += 1;
        state.listeners.push((token, listener));
        token
    }

    pub fn remove_service_listener(&self, token: ListenerToken) -> bool {
        let mut state = self.inner.state.lock();
        let before = state.listeners.len();
        state.listeners.retain(|(t, _)| *t != token);
        state.listeners.len() != before
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    static_assertions::assert_impl_all!(ServiceRegistry: Send, Sync);
    static_assertions::assert_impl_all!(ServiceReference: Send, Sync, Clone);

    struct Greeter(&'static str);

    fn greeter(
        registry: &ServiceRegistry,
        name: &'static str,
        ranking: i64,
    ) -> ServiceRegistration {
        registry
            .register_service(
                ModuleId::SYSTEM,
                vec!["test::Greeter".to_owned()],
                ServiceSource::Object(Arc::new(Greeter(name))),
                Properties::new().with("name", name).with(keys::SERVICE_RANKING, ranking),
            )
            .unwrap()
    }

    #[test]
    fn references_are_ordered_by_ranking_then_id() {
        let registry = ServiceRegistry::new();
        let low = greeter(&registry, "low", 0);
        let high = greeter(&registry, "high", 10);
        let low2 = greeter(&registry, "low2", 0);

        let refs = registry.get_service_references("test::Greeter", None);
        assert_eq!(
            refs,
            vec![high.reference().clone(), low.reference().clone(), low2.reference().clone()]
        );
        assert_eq!(
            registry.get_service_reference("test::Greeter").as_ref(),
            Some(high.reference())
        );
        assert!(registry.get_service_references("test::Missing", None).is_empty());

        let filter = Filter::parse("(name=low*)").unwrap();
        assert_eq!(registry.get_service_references("test::Greeter", Some(&filter)).len(), 2);
    }

    #[test]
    fn framework_properties_are_set() {
        let registry = ServiceRegistry::new();
        let reg = greeter(&registry, "g", 0);
        let props = reg.reference().properties();
        assert_eq!(
            props.get(keys::SERVICE_ID).and_then(PropertyValue::as_i64),
            Some(reg.reference().id().value() as i64)
        );
        assert_eq!(props.get(keys::OBJECTCLASS), Some(&PropertyValue::from(vec!["test::Greeter"])));
    }

    #[test]
    fn events_are_delivered_in_order() {
        let registry = ServiceRegistry::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let token = {
            let events = Arc::clone(&events);
            registry.add_service_listener(Arc::new(move |event: &ServiceEvent| {
                events.lock().push((event.kind, event.changed_keys.clone()));
            }))
        };

        let reg = greeter(&registry, "g", 0);
        reg.set_properties(Properties::new().with("name", "changed")).unwrap();
        reg.unregister().unwrap();
        assert_eq!(reg.unregister(), Err(ServiceError::NotRegistered(reg.reference().id())));
        assert!(!reg.reference().is_registered());

        assert!(registry.remove_service_listener(token));
        let _other = greeter(&registry, "other", 0);

        assert_eq!(
            *events.lock(),
            vec![
                (ServiceEventKind::Registered, vec![]),
                (
                    ServiceEventKind::Modified,
                    vec!["name".to_owned(), keys::SERVICE_RANKING.to_owned()]
                ),
                (ServiceEventKind::Unregistering, vec![]),
            ]
        );
    }

    #[test]
    fn listener_may_call_back_into_registry() {
        let registry = Arc::new(ServiceRegistry::new());
        let seen = Arc::new(AtomicUsize::new(0));
        {
            let weak = Arc::downgrade(&registry);
            let seen = Arc::clone(&seen);
            registry.add_service_listener(Arc::new(move |event: &ServiceEvent| {
                if let Some(registry) = weak.upgrade() {
                    let found = registry.get_service_references("test::Greeter", None);
                    if event.kind == ServiceEventKind::Unregistering {
                        assert!(found.contains(&event.reference));
                    }
                    seen.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }
        let reg = greeter(&registry, "g", 0);
        reg.unregister().unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    struct CountingFactory {
        created: AtomicUsize,
        released: AtomicUsize,
    }

    impl ServiceFactory for CountingFactory {
        fn get_service(&self, _reference: &ServiceReference) -> Option<ServiceObject> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Some(Arc::new(Greeter("lazy")))
        }

        fn unget_service(&self, _reference: &ServiceReference, _service: ServiceObject) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn factory_services_are_created_lazily_and_shared() {
        let registry = ServiceRegistry::new();
        let factory = Arc::new(CountingFactory {
            created: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
        });
        let reg = registry
            .register_service(
                ModuleId::SYSTEM,
                vec!["test::Greeter".to_owned()],
                ServiceSource::Factory(Arc::clone(&factory) as Arc<dyn ServiceFactory>),
                Properties::new(),
            )
            .unwrap();
        assert_eq!(factory.created.load(Ordering::SeqCst), 0);

        let first = registry.get_service_as::<Greeter>(reg.reference()).unwrap();
        let second = registry.get_service_as::<Greeter>(reg.reference()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.0, "lazy");
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);

        assert!(registry.unget_service(reg.reference()));
        assert_eq!(factory.released.load(Ordering::SeqCst), 0);
        assert!(registry.unget_service(reg.reference()));
        assert_eq!(factory.released.load(Ordering::SeqCst), 1);
        assert!(!registry.unget_service(reg.reference()));

        // Unregistering releases an object still in use.
        let _third = registry.get_service(reg.reference()).unwrap();
        reg.unregister().unwrap();
        assert_eq!(factory.released.load(Ordering::SeqCst), 2);
        assert!(registry.get_service(reg.reference()).is_none());
    }

    #[test]
    fn module_services_are_unregistered_together() {
        let registry = ServiceRegistry::new();
        let module = ModuleId::new(7);
        for _ in 0..3 {
            registry
                .register_service(
                    module,
                    vec!["test::Greeter".to_owned()],
                    ServiceSource::Object(Arc::new(Greeter("m"))),
                    Properties::new(),
                )
                .unwrap();
        }
        let _system = greeter(&registry, "system", 0);

        assert_eq!(registry.services_of_module(module).len(), 3);
        registry.unregister_module_services(module);
        assert!(registry.services_of_module(module).is_empty());
        assert_eq!(registry.get_service_references("test::Greeter", None).len(), 1);
    }

    #[test]
    fn registering_without_interfaces_fails() {
        let registry = ServiceRegistry::new();
        let result = registry.register_service(
            ModuleId::SYSTEM,
            vec![],
            ServiceSource::Object(Arc::new(Greeter("x"))),
            Properties::new(),
        );
        assert_eq!(result.err(), Some(ServiceError::NoInterfaces));
    }
}
