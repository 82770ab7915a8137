use crate::di::definition::{Capabilities, Caster, DestroyFn};
use crate::di::{Bean, ComponentDefinition, DefinitionRegistry, Resolution, Role};
use crate::error::{ContextError, Result};
use crate::interceptor::ConstructionInterceptor;
use dashmap::DashMap;
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};
use tracing::{debug, info, trace, warn};

/// Resolves `${...}` style values handed to [`Resolution::resolve_value`].
pub type ValueResolver = Arc<dyn Fn(&str) -> Result<String> + Send + Sync>;

/// Converts raw property strings into typed values.
///
/// Returns `None` when the service has no conversion for `target`, in which
/// case the caller falls back to `FromStr`.
pub trait ConversionService: Send + Sync {
    fn convert(&self, raw: &str, target: TypeId, target_name: &str) -> Option<anyhow::Result<Bean>>;
}

struct Disposable {
    name: String,
    bean: Bean,
    destroy: DestroyFn,
}

struct FactoryInner {
    definitions: DashMap<String, Arc<ComponentDefinition>>,
    definition_names: RwLock<Vec<String>>,
    frozen: AtomicBool,
    allow_overriding: AtomicBool,
    allow_circular: AtomicBool,

    singletons: DashMap<String, Bean>,
    early_singletons: DashMap<String, Bean>,
    /// Raw instances of singletons that are still being populated.
    raw_in_creation: DashMap<String, Bean>,
    /// Raw instances of capability-bearing singletons whose interceptors
    /// exposed a different instance.
    replaced_originals: DashMap<String, Bean>,
    registered_singletons: Mutex<Vec<String>>,
    in_creation: Mutex<Vec<String>>,
    prototypes_in_creation: Mutex<Vec<(ThreadId, String)>>,
    /// dependency -> components declaring `depends_on` it
    dependents: Mutex<HashMap<String, Vec<String>>>,
    disposables: Mutex<Vec<Disposable>>,

    interceptors: RwLock<Vec<Arc<dyn ConstructionInterceptor>>>,
    resolvable: DashMap<TypeId, Bean>,
    value_resolvers: RwLock<Vec<ValueResolver>>,
    conversion_service: RwLock<Option<Arc<dyn ConversionService>>>,
    parent: RwLock<Option<DefaultComponentFactory>>,

    creation_lock: ReentrantMutex<()>,
}

/// The component store behind a context.
///
/// Holds definitions, shared instances and everything needed to build new
/// ones. Cloning is cheap and every clone sees the same store.
///
/// Singletons are built under a reentrant lock, so a thread creating a
/// component can resolve its dependencies recursively while other threads
/// wait for the finished instance. When circular references are allowed, a
/// singleton that is still being populated is visible to its cycle partners
/// through an early reference.
#[derive(Clone)]
pub struct DefaultComponentFactory {
    inner: Arc<FactoryInner>,
}

/// Non-owning handle to a [`DefaultComponentFactory`].
#[derive(Clone)]
pub struct WeakFactory(Weak<FactoryInner>);

impl WeakFactory {
    pub fn upgrade(&self) -> Option<DefaultComponentFactory> {
        self.0.upgrade().map(|inner| DefaultComponentFactory { inner })
    }
}

impl DefaultComponentFactory {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(FactoryInner {
                definitions: DashMap::new(),
                definition_names: RwLock::new(Vec::new()),
                frozen: AtomicBool::new(false),
                allow_overriding: AtomicBool::new(true),
                allow_circular: AtomicBool::new(true),
                singletons: DashMap::new(),
                early_singletons: DashMap::new(),
                raw_in_creation: DashMap::new(),
                replaced_originals: DashMap::new(),
                registered_singletons: Mutex::new(Vec::new()),
                in_creation: Mutex::new(Vec::new()),
                prototypes_in_creation: Mutex::new(Vec::new()),
                dependents: Mutex::new(HashMap::new()),
                disposables: Mutex::new(Vec::new()),
                interceptors: RwLock::new(Vec::new()),
                resolvable: DashMap::new(),
                value_resolvers: RwLock::new(Vec::new()),
                conversion_service: RwLock::new(None),
                parent: RwLock::new(None),
                creation_lock: ReentrantMutex::new(()),
            }),
        }
    }

    pub fn with_parent(parent: Option<DefaultComponentFactory>) -> Self {
        let factory = Self::new();
        factory.set_parent(parent);
        factory
    }

    pub fn set_parent(&self, parent: Option<DefaultComponentFactory>) {
        *self.inner.parent.write() = parent;
    }

    pub fn parent(&self) -> Option<DefaultComponentFactory> {
        self.inner.parent.read().clone()
    }

    pub fn downgrade(&self) -> WeakFactory {
        WeakFactory(Arc::downgrade(&self.inner))
    }

    pub fn ptr_eq(&self, other: &DefaultComponentFactory) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn set_allow_circular_references(&self, allow: bool) {
        self.inner.allow_circular.store(allow, Ordering::SeqCst);
    }

    pub fn allows_circular_references(&self) -> bool {
        self.inner.allow_circular.load(Ordering::SeqCst)
    }

    pub fn set_allow_definition_overriding(&self, allow: bool) {
        self.inner.allow_overriding.store(allow, Ordering::SeqCst);
    }

    pub fn allows_definition_overriding(&self) -> bool {
        self.inner.allow_overriding.load(Ordering::SeqCst)
    }

    /// Stops definitions from being registered, removed or modified.
    pub fn freeze_configuration(&self) {
        self.inner.frozen.store(true, Ordering::SeqCst);
    }

    pub fn is_configuration_frozen(&self) -> bool {
        self.inner.frozen.load(Ordering::SeqCst)
    }

    // ---- lookup ----

    /// Returns the component registered under `name`, creating it if needed.
    ///
    /// Falls back to the parent factory when `name` has no local definition.
    pub fn get_bean(&self, name: &str) -> Result<Bean> {
        if let Some(bean) = self.cached_or_early(name)? {
            trace!(component = name, "Returning cached instance of singleton");
            return Ok(bean);
        }

        let Some(definition) = self.local_definition(name) else {
            if let Some(parent) = self.parent() {
                return parent.get_bean(name);
            }
            return Err(ContextError::NoSuchDefinition {
                name: name.to_string(),
            });
        };

        for dependency in definition.dependencies() {
            if self.is_dependent(name, dependency) {
                return Err(ContextError::creation(
                    name,
                    ContextError::circular(format!(
                        "'{name}' and '{dependency}' depend on each other through depends-on"
                    )),
                ));
            }
            self.register_dependent(dependency, name);
            self.get_bean(dependency)
                .map_err(|e| ContextError::creation(name, e))?;
        }

        if definition.is_singleton() {
            self.singleton_or_create(name, &definition)
        } else {
            self.create_prototype(name, &definition)
        }
    }

    pub fn get<T: Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>> {
        let bean = self.get_bean(name)?;
        let actual = self.actual_type_name(name);
        bean.downcast::<T>().map_err(|_| ContextError::TypeMismatch {
            name: name.to_string(),
            expected: std::any::type_name::<T>().to_string(),
            actual,
        })
    }

    /// Like [`get`](Self::get) but clones the value out of the stored `Arc`.
    ///
    /// Useful for components stored as trait-object handles, e.g.
    /// `Arc<dyn MessageSource>`.
    pub fn get_shared<T: Clone + Send + Sync + 'static>(&self, name: &str) -> Result<T> {
        self.get::<T>(name).map(|value| (*value).clone())
    }

    pub fn contains_bean(&self, name: &str) -> bool {
        self.contains_local_bean(name)
            || self
                .parent()
                .is_some_and(|parent| parent.contains_bean(name))
    }

    pub fn contains_local_bean(&self, name: &str) -> bool {
        self.inner.singletons.contains_key(name) || self.inner.definitions.contains_key(name)
    }

    pub fn contains_singleton(&self, name: &str) -> bool {
        self.inner.singletons.contains_key(name)
    }

    /// Names of the singletons built or registered so far, in completion order.
    pub fn singleton_names(&self) -> Vec<String> {
        self.inner.registered_singletons.lock().clone()
    }

    pub fn singleton_count(&self) -> usize {
        self.inner.singletons.len()
    }

    pub fn is_singleton(&self, name: &str) -> Result<bool> {
        if self.inner.singletons.contains_key(name) {
            return Ok(true);
        }
        match self.local_definition(name) {
            Some(definition) => Ok(definition.is_singleton()),
            None => match self.parent() {
                Some(parent) => parent.is_singleton(name),
                None => Err(ContextError::NoSuchDefinition {
                    name: name.to_string(),
                }),
            },
        }
    }

    pub fn is_prototype(&self, name: &str) -> Result<bool> {
        match self.local_definition(name) {
            Some(definition) => Ok(definition.is_prototype()),
            None if self.inner.singletons.contains_key(name) => Ok(false),
            None => match self.parent() {
                Some(parent) => parent.is_prototype(name),
                None => Err(ContextError::NoSuchDefinition {
                    name: name.to_string(),
                }),
            },
        }
    }

    /// Whether `name` would produce a `T`, without creating anything.
    pub fn is_type_match<T: 'static>(&self, name: &str) -> bool {
        if let Some(bean) = self.inner.singletons.get(name).map(|e| e.value().clone()) {
            return Any::type_id(&*bean) == TypeId::of::<T>();
        }
        match self.local_definition(name) {
            Some(definition) => definition.type_id() == TypeId::of::<T>(),
            None => self
                .parent()
                .is_some_and(|parent| parent.is_type_match::<T>(name)),
        }
    }

    /// Local definition names whose declared type is `T`.
    pub fn names_for_type<T: 'static>(&self) -> Vec<String> {
        self.names_where(|definition| definition.type_id() == TypeId::of::<T>())
    }

    pub(crate) fn names_where(&self, predicate: impl Fn(&ComponentDefinition) -> bool) -> Vec<String> {
        self.definition_names()
            .into_iter()
            .filter(|name| {
                self.local_definition(name)
                    .is_some_and(|definition| predicate(&definition))
            })
            .collect()
    }

    /// Fetches `name` and views it through one of its declared capabilities.
    ///
    /// Returns `Ok(None)` when the definition does not declare the capability.
    /// If an interceptor exposed an instance of another type, the capability
    /// is taken from the instance the definition built. When neither cast
    /// succeeds the component is skipped with a warning.
    pub(crate) fn capability<U>(
        &self,
        name: &str,
        select: impl Fn(&Capabilities) -> Option<&Caster<U>>,
    ) -> Result<Option<Arc<U>>>
    where
        U: ?Sized + 'static,
    {
        let Some(definition) = self.local_definition(name) else {
            return Ok(None);
        };
        let Some(cast) = select(&definition.capabilities).cloned() else {
            return Ok(None);
        };
        let bean = self.get_bean(name)?;
        if let Some(view) = cast(&bean) {
            return Ok(Some(view));
        }
        let original = self
            .inner
            .replaced_originals
            .get(name)
            .map(|entry| entry.value().clone());
        if let Some(view) = original.as_ref().and_then(|original| cast(original)) {
            debug!(
                component = name,
                "Interceptor replaced the instance, using the original for its declared capability"
            );
            return Ok(Some(view));
        }
        warn!(
            component = name,
            declared = %self.actual_type_name(name),
            "Instance no longer has its declared type, ignoring its capability"
        );
        Ok(None)
    }

    /// Registers an already built instance under `name`.
    pub fn register_singleton(&self, name: &str, bean: Bean) -> Result<()> {
        let _guard = self.inner.creation_lock.lock();
        if self.inner.singletons.contains_key(name) {
            return Err(ContextError::SingletonExists {
                name: name.to_string(),
            });
        }
        self.add_singleton(name, bean);
        Ok(())
    }

    /// Makes `value` available to [`Resolution::resolve_dependency`] by type.
    pub fn register_resolvable_dependency<T: Clone + Send + Sync + 'static>(&self, value: T) {
        self.inner
            .resolvable
            .insert(TypeId::of::<T>(), Arc::new(value));
    }

    pub fn resolve_dependency<T: Clone + Send + Sync + 'static>(&self) -> Result<T> {
        let local = self
            .inner
            .resolvable
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.value().downcast_ref::<T>().cloned());
        match local {
            Some(value) => Ok(value),
            None => match self.parent() {
                Some(parent) => parent.resolve_dependency::<T>(),
                None => Err(ContextError::UnsatisfiedDependency {
                    type_name: std::any::type_name::<T>().to_string(),
                }),
            },
        }
    }

    // ---- configuration ----

    /// Appends an interceptor. Interceptors run in the order they were added.
    pub fn add_interceptor(&self, interceptor: Arc<dyn ConstructionInterceptor>) {
        let mut interceptors = self.inner.interceptors.write();
        interceptors.retain(|existing| !Arc::ptr_eq(existing, &interceptor));
        interceptors.push(interceptor);
    }

    pub fn interceptor_count(&self) -> usize {
        self.inner.interceptors.read().len()
    }

    pub fn add_value_resolver(&self, resolver: ValueResolver) {
        self.inner.value_resolvers.write().push(resolver);
    }

    pub fn has_value_resolver(&self) -> bool {
        !self.inner.value_resolvers.read().is_empty()
    }

    /// Runs `value` through every registered value resolver in turn.
    pub fn resolve_embedded_value(&self, value: &str) -> Result<String> {
        let resolvers = self.inner.value_resolvers.read().clone();
        let mut resolved = value.to_string();
        for resolver in &resolvers {
            resolved = resolver(&resolved)?;
        }
        Ok(resolved)
    }

    pub fn set_conversion_service(&self, service: Arc<dyn ConversionService>) {
        *self.inner.conversion_service.write() = Some(service);
    }

    pub fn conversion_service(&self) -> Option<Arc<dyn ConversionService>> {
        self.inner.conversion_service.read().clone()
    }

    // ---- bulk operations ----

    /// Instantiates every non-lazy singleton definition, in registration order.
    pub fn pre_instantiate_singletons(&self) -> Result<()> {
        debug!(
            definitions = self.inner.definitions.len(),
            "Pre-instantiating singletons"
        );
        for name in self.definition_names() {
            let Some(definition) = self.local_definition(&name) else {
                continue;
            };
            if definition.is_singleton() && !definition.is_lazy_init() {
                self.get_bean(&name)?;
            }
        }
        Ok(())
    }

    /// Destroys every singleton, newest first, and empties the caches.
    ///
    /// A failing destroy callback is logged and the remaining ones still run.
    pub fn destroy_singletons(&self) {
        let _guard = self.inner.creation_lock.lock();
        let disposables = std::mem::take(&mut *self.inner.disposables.lock());
        debug!(count = disposables.len(), "Destroying singletons");
        for disposable in disposables.into_iter().rev() {
            self.run_destroy(disposable);
        }
        self.inner.singletons.clear();
        self.inner.early_singletons.clear();
        self.inner.raw_in_creation.clear();
        self.inner.replaced_originals.clear();
        self.inner.registered_singletons.lock().clear();
        self.inner.dependents.lock().clear();
    }

    /// Destroys a single cached singleton, if present.
    pub fn destroy_singleton(&self, name: &str) {
        let _guard = self.inner.creation_lock.lock();
        self.inner.singletons.remove(name);
        self.inner.early_singletons.remove(name);
        self.inner.replaced_originals.remove(name);
        self.inner.registered_singletons.lock().retain(|n| n != name);
        let disposable = {
            let mut disposables = self.inner.disposables.lock();
            disposables
                .iter()
                .position(|d| d.name == name)
                .map(|index| disposables.remove(index))
        };
        if let Some(disposable) = disposable {
            self.run_destroy(disposable);
        }
    }

    fn run_destroy(&self, disposable: Disposable) {
        trace!(component = %disposable.name, "Invoking destroy callback");
        if let Err(e) = (disposable.destroy)(&disposable.bean) {
            warn!(
                component = %disposable.name,
                error = %e,
                "Destroy callback failed"
            );
        }
    }

    // ---- creation ----

    fn local_definition(&self, name: &str) -> Option<Arc<ComponentDefinition>> {
        self.inner
            .definitions
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
    }

    fn actual_type_name(&self, name: &str) -> String {
        self.local_definition(name)
            .map(|definition| definition.type_name().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }

    fn is_in_creation(&self, name: &str) -> bool {
        self.inner.in_creation.lock().iter().any(|n| n == name)
    }

    /// Finished singleton, or an early reference to one still being populated.
    fn cached_or_early(&self, name: &str) -> Result<Option<Bean>> {
        if let Some(bean) = self.cached(name) {
            return Ok(Some(bean));
        }
        if !self.is_in_creation(name) {
            return Ok(None);
        }

        let _guard = self.inner.creation_lock.lock();
        if let Some(bean) = self.cached(name) {
            return Ok(Some(bean));
        }
        if let Some(bean) = self
            .inner
            .early_singletons
            .get(name)
            .map(|e| e.value().clone())
        {
            return Ok(Some(bean));
        }
        let Some((_, raw)) = self.inner.raw_in_creation.remove(name) else {
            return Ok(None);
        };
        let early = self.early_reference(name, raw)?;
        self.inner
            .early_singletons
            .insert(name.to_string(), Arc::clone(&early));
        Ok(Some(early))
    }

    fn cached(&self, name: &str) -> Option<Bean> {
        self.inner.singletons.get(name).map(|e| e.value().clone())
    }

    fn early_reference(&self, name: &str, raw: Bean) -> Result<Bean> {
        let Some(definition) = self.local_definition(name) else {
            return Ok(raw);
        };
        let mut exposed = raw;
        for interceptor in self.interceptors_for(&definition) {
            exposed = interceptor
                .early_reference(exposed, name)
                .map_err(|e| ContextError::creation(name, e))?;
        }
        Ok(exposed)
    }

    fn singleton_or_create(&self, name: &str, definition: &ComponentDefinition) -> Result<Bean> {
        let _guard = self.inner.creation_lock.lock();
        if let Some(bean) = self.cached(name) {
            return Ok(bean);
        }
        if self.is_in_creation(name) {
            return Err(ContextError::circular(self.cycle_path(name)));
        }

        debug!(component = name, "Creating shared instance of singleton");
        self.inner.in_creation.lock().push(name.to_string());
        let created = self.create_component(name, definition);
        self.inner.in_creation.lock().retain(|n| n != name);

        match created {
            Ok(bean) => {
                self.add_singleton(name, Arc::clone(&bean));
                Ok(bean)
            }
            Err(e) => {
                self.inner.raw_in_creation.remove(name);
                self.inner.early_singletons.remove(name);
                Err(e)
            }
        }
    }

    fn create_prototype(&self, name: &str, definition: &ComponentDefinition) -> Result<Bean> {
        let key = (thread::current().id(), name.to_string());
        {
            let mut creating = self.inner.prototypes_in_creation.lock();
            if creating.contains(&key) {
                return Err(ContextError::circular(format!(
                    "prototype '{name}' is already in creation"
                )));
            }
            creating.push(key.clone());
        }
        let created = self.create_component(name, definition);
        self.inner
            .prototypes_in_creation
            .lock()
            .retain(|entry| entry != &key);
        created
    }

    fn create_component(&self, name: &str, definition: &ComponentDefinition) -> Result<Bean> {
        let resolution = Resolution::new(self.clone(), name);
        let raw = definition
            .instantiate(&resolution)
            .map_err(|e| ContextError::creation(name, e))?;

        let expose_early =
            definition.is_singleton() && self.allows_circular_references() && self.is_in_creation(name);
        if expose_early {
            trace!(
                component = name,
                "Caching raw instance to resolve potential circular references"
            );
            self.inner
                .raw_in_creation
                .insert(name.to_string(), Arc::clone(&raw));
        }

        definition
            .run_populate(&raw, &resolution)
            .map_err(|e| ContextError::creation(name, e))?;
        let mut exposed = self.initialize(name, definition, Arc::clone(&raw), &resolution)?;

        if expose_early {
            self.inner.raw_in_creation.remove(name);
            let early = self
                .inner
                .early_singletons
                .get(name)
                .map(|e| e.value().clone());
            if let Some(early) = early {
                if !same_instance(&exposed, &raw) {
                    return Err(ContextError::creation(
                        name,
                        ContextError::circular(format!(
                            "'{name}' was handed to other components as part of a circular \
                             reference but was replaced by an interceptor afterwards"
                        )),
                    ));
                }
                exposed = early;
            }
        }

        if definition.is_singleton() {
            if definition.capabilities.any() && !same_instance(&exposed, &raw) {
                self.inner
                    .replaced_originals
                    .insert(name.to_string(), Arc::clone(&raw));
            }
            if let Some(destroy) = definition.destroyer() {
                self.inner.disposables.lock().push(Disposable {
                    name: name.to_string(),
                    bean: raw,
                    destroy,
                });
            }
        }
        Ok(exposed)
    }

    fn initialize(
        &self,
        name: &str,
        definition: &ComponentDefinition,
        raw: Bean,
        resolution: &Resolution,
    ) -> Result<Bean> {
        let interceptors = self.interceptors_for(definition);
        let mut current = Arc::clone(&raw);
        for interceptor in &interceptors {
            current = interceptor
                .before_initialization(current, name)
                .map_err(|e| ContextError::creation(name, e))?;
        }
        definition
            .run_init(&raw, resolution)
            .map_err(|e| ContextError::creation(name, e))?;
        for interceptor in &interceptors {
            current = interceptor
                .after_initialization(current, name)
                .map_err(|e| ContextError::creation(name, e))?;
        }
        Ok(current)
    }

    fn interceptors_for(&self, definition: &ComponentDefinition) -> Vec<Arc<dyn ConstructionInterceptor>> {
        if definition.role_kind() == Role::Infrastructure {
            return Vec::new();
        }
        self.inner.interceptors.read().clone()
    }

    fn add_singleton(&self, name: &str, bean: Bean) {
        self.inner.singletons.insert(name.to_string(), bean);
        self.inner.early_singletons.remove(name);
        self.inner.raw_in_creation.remove(name);
        self.inner
            .registered_singletons
            .lock()
            .push(name.to_string());
    }

    fn cycle_path(&self, name: &str) -> String {
        let creating = self.inner.in_creation.lock();
        let start = creating.iter().position(|n| n == name).unwrap_or(0);
        let mut path: Vec<&str> = creating[start..].iter().map(String::as_str).collect();
        path.push(name);
        path.join(" -> ")
    }

    fn register_dependent(&self, dependency: &str, dependent: &str) {
        let mut dependents = self.inner.dependents.lock();
        let entry = dependents.entry(dependency.to_string()).or_default();
        if !entry.iter().any(|n| n == dependent) {
            entry.push(dependent.to_string());
        }
    }

    /// Whether `candidate` depends on `name`, directly or transitively.
    fn is_dependent(&self, name: &str, candidate: &str) -> bool {
        let dependents = self.inner.dependents.lock();
        let mut seen = HashSet::new();
        let mut pending = vec![name.to_string()];
        while let Some(current) = pending.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(list) = dependents.get(&current) {
                if list.iter().any(|n| n == candidate) {
                    return true;
                }
                pending.extend(list.iter().cloned());
            }
        }
        false
    }

    fn check_not_frozen(&self, name: &str) -> Result<()> {
        if self.is_configuration_frozen() {
            return Err(ContextError::ConfigurationFrozen {
                name: name.to_string(),
            });
        }
        Ok(())
    }
}

impl Default for DefaultComponentFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl DefinitionRegistry for DefaultComponentFactory {
    fn register_definition(&self, definition: ComponentDefinition) -> Result<()> {
        let name = definition.name().to_string();
        self.check_not_frozen(&name)?;

        if self.inner.definitions.contains_key(&name) {
            if !self.allows_definition_overriding() {
                return Err(ContextError::DefinitionOverride { name });
            }
            info!(component = %name, "Overriding component definition");
            self.inner.definitions.insert(name.clone(), Arc::new(definition));
            self.destroy_singleton(&name);
        } else {
            self.inner.definitions.insert(name.clone(), Arc::new(definition));
            self.inner.definition_names.write().push(name);
        }
        Ok(())
    }

    fn remove_definition(&self, name: &str) -> Result<()> {
        self.check_not_frozen(name)?;
        if self.inner.definitions.remove(name).is_none() {
            return Err(ContextError::NoSuchDefinition {
                name: name.to_string(),
            });
        }
        self.inner.definition_names.write().retain(|n| n != name);
        self.destroy_singleton(name);
        Ok(())
    }

    fn modify_definition(
        &self,
        name: &str,
        edit: &mut dyn FnMut(&mut ComponentDefinition),
    ) -> Result<()> {
        self.check_not_frozen(name)?;
        let Some(current) = self.local_definition(name) else {
            return Err(ContextError::NoSuchDefinition {
                name: name.to_string(),
            });
        };
        let mut modified = (*current).clone();
        edit(&mut modified);
        modified.set_name(name);
        self.inner.definitions.insert(name.to_string(), Arc::new(modified));
        self.destroy_singleton(name);
        Ok(())
    }

    fn definition(&self, name: &str) -> Option<Arc<ComponentDefinition>> {
        self.local_definition(name)
    }

    fn contains_definition(&self, name: &str) -> bool {
        self.inner.definitions.contains_key(name)
    }

    fn definition_names(&self) -> Vec<String> {
        self.inner.definition_names.read().clone()
    }

    fn definition_count(&self) -> usize {
        self.inner.definitions.len()
    }
}

fn same_instance(a: &Bean, b: &Bean) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}
