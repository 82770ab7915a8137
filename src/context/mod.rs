//! Application context
//!
//! [`ApplicationContext`] drives a component factory through its refresh and
//! close sequences. How the factory is built is left to a
//! [`FactoryStrategy`]; everything around it is fixed here: extension and
//! interceptor registration, the message source, event publishing and
//! lifecycle phases.
//!
//! # Example
//!
//! ```rust,ignore
//! use meshestra_context::prelude::*;
//!
//! let context = ContextBuilder::generic().id("app").build();
//! context.register_definition(ComponentDefinition::new("greeting", |_| Ok("hello".to_string())))?;
//! context.refresh()?;
//!
//! let greeting = context.get::<String>("greeting")?;
//! context.close();
//! ```

mod builder;
mod config;
mod parent;

pub use builder::ContextBuilder;
pub use config::ContextConfig;
pub use parent::{ContextParent, EventPublisher, MessageResolver, Publisher};

use crate::caches;
use crate::di::{Bean, ComponentDefinition, ConversionService, DefaultComponentFactory, DefinitionRegistry};
use crate::environment::Environment;
use crate::error::{ContextError, Result};
use crate::event::{ApplicationEvent, ApplicationListener, EventMulticaster, SimpleEventMulticaster};
use crate::extension::{FactoryExtension, RegistryExtension, StaticExtension, invoke_factory_extensions};
use crate::interceptor::{ConstructionInterceptor, register_interceptors};
use crate::lifecycle::{DefaultLifecycleProcessor, LifecycleError, LifecycleProcessor, ShutdownHook, lifecycle_pool};
use crate::loader::DefinitionLoader;
use crate::message::{DelegatingMessageSource, MessageSource};
use crate::strategy::{FactorySetup, FactoryStrategy, GenericFactoryStrategy, RefreshableFactoryStrategy};
use chrono::{DateTime, Utc};
use parent::ParentMessages;
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use rayon::ThreadPool;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, trace, warn};

/// Name of the message source component.
pub const MESSAGE_SOURCE: &str = "messageSource";
/// Name of the event multicaster component.
pub const EVENT_MULTICASTER: &str = "eventMulticaster";
/// Name of the lifecycle processor component.
pub const LIFECYCLE_PROCESSOR: &str = "lifecycleProcessor";
/// Name of the conversion service component.
pub const CONVERSION_SERVICE: &str = "conversionService";
pub const ENVIRONMENT: &str = "environment";
pub const SYSTEM_ENVIRONMENT: &str = "systemEnvironment";

/// A context that is populated through its registry and refreshed once.
pub type GenericContext = ApplicationContext<GenericFactoryStrategy>;

/// A context that rebuilds its factory from `L` on every refresh.
pub type RefreshableContext<L> = ApplicationContext<RefreshableFactoryStrategy<L>>;

/// Orchestrates the refresh and close of a component factory.
///
/// Refresh and close serialize on one re-entrant monitor, so listeners and
/// lifecycle components may call back into the context while either runs.
/// Cloning gives another handle to the same context.
pub struct ApplicationContext<S: FactoryStrategy> {
    inner: Arc<ContextInner<S>>,
}

impl<S: FactoryStrategy> Clone for ApplicationContext<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

pub(crate) struct ContextParts<S> {
    pub(crate) strategy: S,
    pub(crate) config: ContextConfig,
    pub(crate) parent: Option<Arc<dyn ContextParent>>,
    pub(crate) environment: Arc<Environment>,
    pub(crate) listeners: Vec<Arc<dyn ApplicationListener>>,
    pub(crate) extensions: Vec<StaticExtension>,
    pub(crate) interceptors: Vec<Arc<dyn ConstructionInterceptor>>,
}

struct ContextInner<S: FactoryStrategy> {
    this: Weak<ContextInner<S>>,
    id: String,
    display_name: String,
    config: ContextConfig,
    parent: Option<Arc<dyn ContextParent>>,
    environment: Arc<Environment>,
    strategy: S,

    monitor: ReentrantMutex<()>,
    active: AtomicBool,
    closed: AtomicBool,
    startup_date: RwLock<Option<DateTime<Utc>>>,

    extensions: RwLock<Vec<StaticExtension>>,
    interceptors: RwLock<Vec<Arc<dyn ConstructionInterceptor>>>,
    listeners: RwLock<Vec<Arc<dyn ApplicationListener>>>,
    /// Static listeners as they were at the first refresh.
    early_listeners: RwLock<Option<Vec<Arc<dyn ApplicationListener>>>>,
    /// Open from refresh preparation until listeners are registered. Holds
    /// each event id once, in publish order.
    early_events: Mutex<Option<Vec<ApplicationEvent>>>,

    multicaster: RwLock<Option<Arc<dyn EventMulticaster>>>,
    message_source: RwLock<Option<Arc<dyn MessageSource>>>,
    lifecycle_processor: RwLock<Option<Arc<dyn LifecycleProcessor>>>,
    /// Created by the first refresh that needs a default processor.
    lifecycle_pool: Mutex<Option<Arc<ThreadPool>>>,
    shutdown_hook: Mutex<Option<ShutdownHook>>,
}

impl<S: FactoryStrategy> ApplicationContext<S> {
    /// A context with default settings. See [`ContextBuilder`] for the rest.
    pub fn new(strategy: S) -> Self {
        ContextBuilder::new(strategy).build()
    }

    pub(crate) fn from_parts(parts: ContextParts<S>) -> Self {
        let id = parts
            .config
            .id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let display_name = parts.config.display_name.clone().unwrap_or_else(|| id.clone());

        let inner = Arc::new_cyclic(|this| ContextInner {
            this: this.clone(),
            id,
            display_name,
            config: parts.config,
            parent: parts.parent,
            environment: parts.environment,
            strategy: parts.strategy,
            monitor: ReentrantMutex::new(()),
            active: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            startup_date: RwLock::new(None),
            extensions: RwLock::new(parts.extensions),
            interceptors: RwLock::new(parts.interceptors),
            listeners: RwLock::new(parts.listeners),
            early_listeners: RwLock::new(None),
            early_events: Mutex::new(None),
            multicaster: RwLock::new(None),
            message_source: RwLock::new(None),
            lifecycle_processor: RwLock::new(None),
            lifecycle_pool: Mutex::new(None),
            shutdown_hook: Mutex::new(None),
        });
        Self { inner }
    }

    /// Builds or rebuilds the factory and brings every component up.
    ///
    /// On failure the singletons created so far are destroyed, the context
    /// is left inactive and the first error is returned.
    pub fn refresh(&self) -> Result<()> {
        self.inner.refresh()
    }

    /// Closes the context. Closing an inactive or already closed context does
    /// nothing.
    pub fn close(&self) {
        {
            let _monitor = self.inner.monitor.lock();
            self.inner.do_close();
        }
        let hook = self.inner.shutdown_hook.lock().take();
        if let Some(hook) = hook {
            hook.cancel();
        }
    }

    /// Closes the context when the process receives Ctrl+C or SIGTERM. The
    /// process then exits with 130 or 143. Registering twice keeps the first
    /// hook.
    ///
    /// [`close`](Self::close) removes the hook. A later signal terminates the
    /// process the same way it would without a hook.
    pub fn register_shutdown_hook(&self) -> Result<()> {
        let mut slot = self.inner.shutdown_hook.lock();
        if slot.is_some() {
            return Ok(());
        }
        let context = Arc::downgrade(&self.inner);
        let hook = ShutdownHook::register(&self.inner.id, move || {
            if let Some(inner) = context.upgrade() {
                let _monitor = inner.monitor.lock();
                inner.do_close();
            }
        })
        .map_err(LifecycleError::from)?;
        debug!(context = %self.inner.display_name, "Registered shutdown hook");
        *slot = Some(hook);
        Ok(())
    }

    pub fn has_shutdown_hook(&self) -> bool {
        self.inner.shutdown_hook.lock().is_some()
    }

    /// Lock-free; does not wait for a running refresh or close.
    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn display_name(&self) -> &str {
        &self.inner.display_name
    }

    /// When the last refresh started.
    pub fn startup_date(&self) -> Option<DateTime<Utc>> {
        *self.inner.startup_date.read()
    }

    pub fn config(&self) -> &ContextConfig {
        &self.inner.config
    }

    pub fn environment(&self) -> Arc<Environment> {
        Arc::clone(&self.inner.environment)
    }

    pub fn parent(&self) -> Option<Arc<dyn ContextParent>> {
        self.inner.parent.clone()
    }

    pub fn strategy(&self) -> &S {
        &self.inner.strategy
    }

    /// This context as the parent of another.
    pub fn as_parent(&self) -> Arc<dyn ContextParent> {
        self.inner.clone()
    }

    /// The current factory.
    ///
    /// # Errors
    /// `FactoryNotInitialized` before the first refresh and after close.
    pub fn factory(&self) -> Result<DefaultComponentFactory> {
        self.inner.strategy.factory()
    }

    pub fn get_bean(&self, name: &str) -> Result<Bean> {
        self.inner.assert_active()?;
        self.factory()?.get_bean(name)
    }

    pub fn get<T: Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>> {
        self.inner.assert_active()?;
        self.factory()?.get::<T>(name)
    }

    pub fn get_shared<T: Clone + Send + Sync + 'static>(&self, name: &str) -> Result<T> {
        self.inner.assert_active()?;
        self.factory()?.get_shared::<T>(name)
    }

    pub fn contains_bean(&self, name: &str) -> bool {
        self.factory().is_ok_and(|factory| factory.contains_bean(name))
    }

    pub fn contains_definition(&self, name: &str) -> bool {
        self.factory()
            .is_ok_and(|factory| factory.contains_definition(name))
    }

    pub fn definition_names(&self) -> Vec<String> {
        self.factory()
            .map(|factory| factory.definition_names())
            .unwrap_or_default()
    }

    /// Publishes to this context's listeners, then to the parent's.
    ///
    /// Events published while a refresh is still preparing are held back and
    /// delivered once listeners are registered. An event published again
    /// while held back is delivered only once.
    pub fn publish_event(&self, event: ApplicationEvent) -> Result<()> {
        self.inner.publish(event)
    }

    pub fn publish_payload<T: Send + Sync + 'static>(&self, value: T) -> Result<()> {
        self.inner
            .publish(ApplicationEvent::from_payload(self.inner.id.clone(), value))
    }

    /// A weak publishing handle, the same one components can resolve.
    pub fn publisher(&self) -> Publisher {
        Publisher::new(self.inner.weak_parent(), &self.inner.id)
    }

    pub fn message_resolver(&self) -> MessageResolver {
        MessageResolver::new(self.inner.weak_parent(), &self.inner.id)
    }

    /// Adds a listener instance. It also joins the live multicaster if one
    /// exists.
    pub fn add_listener(&self, listener: Arc<dyn ApplicationListener>) {
        let multicaster = self.inner.multicaster.read().clone();
        if let Some(multicaster) = multicaster {
            multicaster.add_listener(Arc::clone(&listener));
        }
        let mut listeners = self.inner.listeners.write();
        if !listeners.iter().any(|existing| same_listener(existing, &listener)) {
            listeners.push(listener);
        }
    }

    pub fn listeners(&self) -> Vec<Arc<dyn ApplicationListener>> {
        self.inner.listeners.read().clone()
    }

    /// Adds a registry extension that runs before any definition-backed one.
    pub fn add_registry_extension(&self, extension: Arc<dyn RegistryExtension>) {
        self.inner
            .extensions
            .write()
            .push(StaticExtension::Registry(extension));
    }

    pub fn add_factory_extension(&self, extension: Arc<dyn FactoryExtension>) {
        self.inner
            .extensions
            .write()
            .push(StaticExtension::Factory(extension));
    }

    /// Adds an interceptor that precedes every definition-backed one.
    pub fn add_interceptor(&self, interceptor: Arc<dyn ConstructionInterceptor>) {
        self.inner.interceptors.write().push(interceptor);
    }

    pub fn get_message(&self, code: &str, args: &[&str], locale: &str) -> Result<String> {
        self.message_resolver().get_message(code, args, locale)
    }

    pub fn get_message_or(&self, code: &str, args: &[&str], default: &str, locale: &str) -> Result<String> {
        self.message_resolver()
            .get_message_or(code, args, default, locale)
    }

    pub fn find_message(&self, code: &str, args: &[&str], locale: &str) -> Result<Option<String>> {
        self.message_resolver().find_message(code, args, locale)
    }

    /// Starts every lifecycle component, including those without auto-startup.
    pub fn start(&self) -> Result<()> {
        self.inner.lifecycle_processor()?.start()?;
        self.inner
            .publish(ApplicationEvent::context_started(self.inner.id.clone()))
    }

    pub fn stop(&self) -> Result<()> {
        self.inner.lifecycle_processor()?.stop()?;
        self.inner
            .publish(ApplicationEvent::context_stopped(self.inner.id.clone()))
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .lifecycle_processor
            .read()
            .as_ref()
            .is_some_and(|processor| processor.is_running())
    }
}

impl ApplicationContext<GenericFactoryStrategy> {
    pub fn generic() -> Self {
        Self::new(GenericFactoryStrategy::new())
    }

    /// The registry to populate before [`refresh`](Self::refresh).
    pub fn registry(&self) -> &dyn DefinitionRegistry {
        self.inner.strategy.registry()
    }

    pub fn register_definition(&self, definition: ComponentDefinition) -> Result<()> {
        self.registry().register_definition(definition)
    }
}

impl<L: DefinitionLoader + 'static> ApplicationContext<RefreshableFactoryStrategy<L>> {
    pub fn refreshable(loader: L) -> Self {
        Self::new(RefreshableFactoryStrategy::new(loader))
    }
}

impl<S: FactoryStrategy> fmt::Debug for ApplicationContext<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApplicationContext")
            .field("id", &self.inner.id)
            .field("display_name", &self.inner.display_name)
            .field("strategy", &self.inner.strategy.name())
            .field("active", &self.is_active())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<S: FactoryStrategy> ContextInner<S> {
    fn weak_parent(&self) -> Weak<dyn ContextParent> {
        let this: Weak<dyn ContextParent> = self.this.clone();
        this
    }

    fn assert_active(&self) -> Result<()> {
        if self.active.load(Ordering::SeqCst) {
            return Ok(());
        }
        let context = self.display_name.clone();
        if self.closed.load(Ordering::SeqCst) {
            Err(ContextError::AlreadyClosed { context })
        } else {
            Err(ContextError::NotRefreshed { context })
        }
    }

    fn multicaster(&self) -> Result<Arc<dyn EventMulticaster>> {
        self.multicaster
            .read()
            .clone()
            .ok_or_else(|| ContextError::MulticasterNotInitialized {
                context: self.display_name.clone(),
            })
    }

    fn lifecycle_processor(&self) -> Result<Arc<dyn LifecycleProcessor>> {
        self.lifecycle_processor
            .read()
            .clone()
            .ok_or_else(|| ContextError::LifecycleNotInitialized {
                context: self.display_name.clone(),
            })
    }

    fn publish(&self, event: ApplicationEvent) -> Result<()> {
        trace!(context = %self.display_name, event = %event.describe(), "Publishing event");
        let buffered = match self.early_events.lock().as_mut() {
            Some(buffer) => {
                if !buffer.iter().any(|held| held.id() == event.id()) {
                    buffer.push(event.clone());
                }
                true
            }
            None => false,
        };
        if !buffered {
            self.multicaster()?.multicast_event(&event)?;
        }
        if let Some(parent) = &self.parent {
            parent.publish_event(event)?;
        }
        Ok(())
    }

    fn refresh(&self) -> Result<()> {
        let _monitor = self.monitor.lock();

        let result = self.prepare_refresh().and_then(|()| {
            self.refresh_factory().inspect_err(|e| {
                warn!(
                    context = %self.display_name,
                    error = %e,
                    "Exception encountered during refresh - cancelling refresh attempt"
                );
                self.roll_back(e);
            })
        });
        if result.is_err() {
            self.active.store(false, Ordering::SeqCst);
            *self.early_events.lock() = None;
        }
        caches::reset_all();
        result
    }

    fn prepare_refresh(&self) -> Result<()> {
        *self.startup_date.write() = Some(Utc::now());
        self.closed.store(false, Ordering::SeqCst);
        self.active.store(true, Ordering::SeqCst);
        info!(context = %self.display_name, strategy = self.strategy.name(), "Refreshing");

        self.strategy.init_property_sources(&self.environment)?;
        self.environment.validate_required_properties()?;

        {
            let mut baseline = self.early_listeners.write();
            match baseline.as_ref() {
                None => *baseline = Some(self.listeners.read().clone()),
                Some(early) => *self.listeners.write() = early.clone(),
            }
        }
        *self.early_events.lock() = Some(Vec::new());
        Ok(())
    }

    fn refresh_factory(&self) -> Result<()> {
        let factory = self.obtain_fresh_factory()?;
        self.prepare_factory(&factory)?;
        self.strategy.post_process_factory(&factory)?;

        let extensions = self.extensions.read().clone();
        invoke_factory_extensions(&factory, &extensions)?;
        let interceptors = self.interceptors.read().clone();
        register_interceptors(&factory, &interceptors)?;

        self.init_message_source(&factory)?;
        self.init_event_multicaster(&factory)?;
        self.strategy.on_refresh()?;
        self.register_listeners(&factory)?;
        self.finish_factory_initialization(&factory)?;
        self.finish_refresh(&factory)
    }

    fn roll_back(&self, error: &ContextError) {
        if let Ok(factory) = self.strategy.factory() {
            factory.destroy_singletons();
        }
        self.strategy.cancel_refresh(error);
    }

    fn obtain_fresh_factory(&self) -> Result<DefaultComponentFactory> {
        let setup = FactorySetup {
            id: self.id.clone(),
            parent: self
                .parent
                .as_ref()
                .and_then(|parent| parent.component_factory()),
            allow_circular_references: self.config.allow_circular_references,
            allow_definition_overriding: self.config.allow_definition_overriding,
        };
        self.strategy.refresh_factory(&setup)?;
        let factory = self.strategy.factory()?;
        debug!(
            context = %self.display_name,
            definitions = factory.definition_count(),
            "Obtained component factory"
        );
        Ok(factory)
    }

    fn prepare_factory(&self, factory: &DefaultComponentFactory) -> Result<()> {
        factory.register_resolvable_dependency(Publisher::new(self.weak_parent(), &self.id));
        factory.register_resolvable_dependency(Arc::clone(&self.environment));
        factory.register_resolvable_dependency(MessageResolver::new(self.weak_parent(), &self.id));

        if !factory.contains_local_bean(ENVIRONMENT) {
            factory.register_singleton(ENVIRONMENT, Arc::new(Arc::clone(&self.environment)))?;
        }
        if !factory.contains_local_bean(SYSTEM_ENVIRONMENT) {
            let vars: HashMap<String, String> = std::env::vars().collect();
            factory.register_singleton(SYSTEM_ENVIRONMENT, Arc::new(vars))?;
        }
        Ok(())
    }

    fn parent_messages(&self) -> Option<Arc<dyn MessageSource>> {
        self.parent.as_ref().map(|parent| {
            let messages: Arc<dyn MessageSource> = Arc::new(ParentMessages(Arc::clone(parent)));
            messages
        })
    }

    fn init_message_source(&self, factory: &DefaultComponentFactory) -> Result<()> {
        let source = if factory.contains_local_bean(MESSAGE_SOURCE) {
            let source = factory.get_shared::<Arc<dyn MessageSource>>(MESSAGE_SOURCE)?;
            if source.parent().is_none()
                && let Some(parent) = self.parent_messages()
            {
                source.set_parent(parent);
            }
            debug!(context = %self.display_name, "Using message source '{MESSAGE_SOURCE}'");
            source
        } else {
            let source: Arc<dyn MessageSource> =
                Arc::new(DelegatingMessageSource::new(self.parent_messages()));
            factory.register_singleton(MESSAGE_SOURCE, Arc::new(Arc::clone(&source)))?;
            debug!(context = %self.display_name, "No '{MESSAGE_SOURCE}' component, using a delegating one");
            source
        };
        *self.message_source.write() = Some(source);
        Ok(())
    }

    fn init_event_multicaster(&self, factory: &DefaultComponentFactory) -> Result<()> {
        let multicaster = if factory.contains_local_bean(EVENT_MULTICASTER) {
            debug!(context = %self.display_name, "Using event multicaster '{EVENT_MULTICASTER}'");
            factory.get_shared::<Arc<dyn EventMulticaster>>(EVENT_MULTICASTER)?
        } else {
            let multicaster: Arc<dyn EventMulticaster> = Arc::new(SimpleEventMulticaster::with_factory(factory));
            factory.register_singleton(EVENT_MULTICASTER, Arc::new(Arc::clone(&multicaster)))?;
            multicaster
        };
        *self.multicaster.write() = Some(multicaster);
        Ok(())
    }

    fn register_listeners(&self, factory: &DefaultComponentFactory) -> Result<()> {
        let multicaster = self.multicaster()?;
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            multicaster.add_listener(listener);
        }
        for name in factory.names_where(|definition| definition.is_listener()) {
            multicaster.add_listener_name(&name);
        }

        let early = self.early_events.lock().take();
        if let Some(events) = early {
            debug!(context = %self.display_name, events = events.len(), "Replaying early events");
            for event in &events {
                multicaster.multicast_event(event)?;
            }
        }
        Ok(())
    }

    fn finish_factory_initialization(&self, factory: &DefaultComponentFactory) -> Result<()> {
        if factory.contains_local_bean(CONVERSION_SERVICE)
            && factory.is_type_match::<Arc<dyn ConversionService>>(CONVERSION_SERVICE)
        {
            factory.set_conversion_service(factory.get_shared::<Arc<dyn ConversionService>>(CONVERSION_SERVICE)?);
        }

        if !factory.has_value_resolver() {
            let environment = Arc::clone(&self.environment);
            factory.add_value_resolver(Arc::new(move |value: &str| {
                environment.resolve_required_placeholders(value)
            }));
        }

        for name in factory.names_where(|definition| definition.is_instantiated_early()) {
            factory.get_bean(&name)?;
        }

        factory.freeze_configuration();
        factory.pre_instantiate_singletons()
    }

    fn finish_refresh(&self, factory: &DefaultComponentFactory) -> Result<()> {
        self.strategy.clear_resource_caches();

        let processor = self.init_lifecycle_processor(factory)?;
        processor.on_refresh()?;

        self.publish(ApplicationEvent::context_refreshed(self.id.clone()))?;
        info!(
            context = %self.display_name,
            singletons = factory.singleton_count(),
            "Refreshed"
        );
        Ok(())
    }

    fn init_lifecycle_processor(&self, factory: &DefaultComponentFactory) -> Result<Arc<dyn LifecycleProcessor>> {
        let processor = if factory.contains_local_bean(LIFECYCLE_PROCESSOR) {
            factory.get_shared::<Arc<dyn LifecycleProcessor>>(LIFECYCLE_PROCESSOR)?
        } else {
            let processor: Arc<dyn LifecycleProcessor> =
                Arc::new(DefaultLifecycleProcessor::with_pool(factory, self.shared_lifecycle_pool()?));
            factory.register_singleton(LIFECYCLE_PROCESSOR, Arc::new(Arc::clone(&processor)))?;
            processor
        };
        *self.lifecycle_processor.write() = Some(Arc::clone(&processor));
        Ok(processor)
    }

    fn shared_lifecycle_pool(&self) -> Result<Arc<ThreadPool>> {
        let mut slot = self.lifecycle_pool.lock();
        if let Some(pool) = slot.as_ref() {
            return Ok(Arc::clone(pool));
        }
        let pool = lifecycle_pool(num_cpus::get())?;
        *slot = Some(Arc::clone(&pool));
        Ok(pool)
    }

    fn do_close(&self) {
        if !self.active.load(Ordering::SeqCst)
            || self
                .closed
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
        {
            return;
        }
        info!(context = %self.display_name, "Closing");

        if let Err(e) = self.publish(ApplicationEvent::context_closed(self.id.clone())) {
            warn!(context = %self.display_name, error = %e, "Exception thrown from listener handling close event");
        }

        let processor = self.lifecycle_processor.read().clone();
        if let Some(processor) = processor
            && let Err(e) = processor.on_close()
        {
            error!(context = %self.display_name, error = %e, "Lifecycle processor failed during close");
        }

        if let Ok(factory) = self.strategy.factory() {
            factory.destroy_singletons();
        }
        self.strategy.close_factory();
        self.strategy.on_close();

        let early = self.early_listeners.read().clone();
        if let Some(early) = early {
            *self.listeners.write() = early;
        }
        self.active.store(false, Ordering::SeqCst);
        info!(context = %self.display_name, "Closed");
    }
}

impl<S: FactoryStrategy> ContextParent for ContextInner<S> {
    fn id(&self) -> &str {
        &self.id
    }

    fn publish_event(&self, event: ApplicationEvent) -> Result<()> {
        self.publish(event)
    }

    fn environment(&self) -> Arc<Environment> {
        Arc::clone(&self.environment)
    }

    fn message_source(&self) -> Option<Arc<dyn MessageSource>> {
        self.message_source.read().clone()
    }

    fn component_factory(&self) -> Option<DefaultComponentFactory> {
        self.strategy.factory().ok()
    }
}

fn same_listener(a: &Arc<dyn ApplicationListener>, b: &Arc<dyn ApplicationListener>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::FnListener;
    use crate::environment::MapPropertySource;
    use std::sync::atomic::AtomicUsize;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, Arc<dyn ApplicationListener>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let listener: Arc<dyn ApplicationListener> = Arc::new(FnListener::new(move |event: &ApplicationEvent| {
            sink.lock().push(event.describe());
            Ok(())
        }));
        (seen, listener)
    }

    #[test]
    fn test_state_errors_before_refresh_and_after_close() {
        let context = ApplicationContext::generic();
        context
            .register_definition(ComponentDefinition::new("n", |_| Ok(1u32)))
            .unwrap();
        assert!(matches!(context.get_bean("n"), Err(ContextError::NotRefreshed { .. })));

        context.refresh().unwrap();
        assert!(context.is_active());
        assert_eq!(*context.get::<u32>("n").unwrap(), 1);

        context.close();
        assert!(!context.is_active());
        assert!(context.is_closed());
        assert!(matches!(context.get_bean("n"), Err(ContextError::AlreadyClosed { .. })));
    }

    #[test]
    fn test_refresh_installs_infrastructure_components() {
        let context = ApplicationContext::generic();
        context.refresh().unwrap();

        let factory = context.factory().unwrap();
        for name in [MESSAGE_SOURCE, EVENT_MULTICASTER, LIFECYCLE_PROCESSOR, ENVIRONMENT, SYSTEM_ENVIRONMENT] {
            assert!(factory.contains_singleton(name), "{name} missing");
        }
        assert!(factory.is_configuration_frozen());
        assert!(context.startup_date().is_some());
        assert!(factory.resolve_dependency::<Publisher>().is_ok());
        assert!(factory.resolve_dependency::<MessageResolver>().is_ok());
    }

    #[test]
    fn test_missing_required_property_aborts_refresh() {
        let environment = Environment::empty();
        environment.add_last(MapPropertySource::from_pairs("test", [("present", "1")]));
        let context = ContextBuilder::generic()
            .environment(environment)
            .required_property("present")
            .required_property("absent")
            .build();

        let err = context.refresh().unwrap_err();
        match err {
            ContextError::MissingRequiredProperties { keys } => assert_eq!(keys, vec!["absent".to_string()]),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!context.is_active());
    }

    #[test]
    fn test_events_published_during_refresh_are_replayed_once() {
        let (seen, listener) = recorder();
        let context = ApplicationContext::generic();
        context.add_listener(listener);
        context
            .register_definition(ComponentDefinition::new("announcer", |r| {
                r.resolve_dependency::<Publisher>()?.publish_payload("early")?;
                Ok(())
            }).instantiate_early())
            .unwrap();
        context
            .register_definition(
                ComponentDefinition::new("extension", |_| Ok(())).as_factory_extension(|_: Arc<()>| {
                    let extension: Arc<dyn FactoryExtension> = Arc::new(EarlyPublisher);
                    extension
                }),
            )
            .unwrap();
        context.refresh().unwrap();

        assert_eq!(
            *seen.lock(),
            vec![
                "Payload<&str>".to_string(),
                "Payload<&str>".to_string(),
                "ContextRefreshed".to_string(),
            ]
        );
    }

    struct EarlyPublisher;

    impl FactoryExtension for EarlyPublisher {
        fn process_factory(&self, factory: &DefaultComponentFactory) -> anyhow::Result<()> {
            factory.resolve_dependency::<Publisher>()?.publish_payload("buffered")?;
            Ok(())
        }
    }

    #[test]
    fn test_publish_without_multicaster_fails() {
        let context = ApplicationContext::generic();
        let err = context.publish_payload(1u8).unwrap_err();
        assert!(matches!(err, ContextError::MulticasterNotInitialized { .. }));
    }

    #[test]
    fn test_close_publishes_and_is_idempotent() {
        let (seen, listener) = recorder();
        let destroyed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&destroyed);
        let context = ApplicationContext::generic();
        context.add_listener(listener);
        context
            .register_definition(ComponentDefinition::new("n", |_| Ok(1u32)).on_destroy(move |_: &u32| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
            .unwrap();
        context.refresh().unwrap();

        context.close();
        context.close();

        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
        assert_eq!(
            seen.lock().iter().filter(|e| *e == "ContextClosed").count(),
            1
        );
    }

    #[test]
    fn test_close_before_refresh_does_nothing() {
        let context = ApplicationContext::generic();
        context.close();
        assert!(!context.is_closed());
        assert!(matches!(context.get_bean("x"), Err(ContextError::NotRefreshed { .. })));
    }

    #[test]
    fn test_messages_before_and_after_refresh() {
        let context = ApplicationContext::generic();
        assert!(matches!(
            context.get_message("x", &[], "en"),
            Err(ContextError::MessageSourceNotInitialized { .. })
        ));
        context.refresh().unwrap();
        assert!(matches!(context.get_message("x", &[], "en"), Err(ContextError::NoSuchMessage { .. })));
        assert_eq!(context.get_message_or("x", &["a"], "fallback {0}", "en").unwrap(), "fallback a");
        assert_eq!(context.find_message("x", &[], "en").unwrap(), None);
    }

    #[test]
    fn test_start_and_stop_publish_events() {
        let (seen, listener) = recorder();
        let context = ApplicationContext::generic();
        assert!(matches!(context.start(), Err(ContextError::LifecycleNotInitialized { .. })));

        context.add_listener(listener);
        context.refresh().unwrap();
        context.start().unwrap();
        context.stop().unwrap();

        let seen = seen.lock();
        assert_eq!(&seen[1..], ["ContextStarted".to_string(), "ContextStopped".to_string()]);
    }

    #[test]
    fn test_refreshes_share_one_lifecycle_pool() {
        let context = ApplicationContext::refreshable(|_: &dyn DefinitionRegistry| -> anyhow::Result<()> { Ok(()) });
        context.refresh().unwrap();
        let first_processor = context.inner.lifecycle_processor().unwrap();
        let first_pool = context.inner.lifecycle_pool.lock().clone().unwrap();

        context.refresh().unwrap();
        let second_processor = context.inner.lifecycle_processor().unwrap();
        let second_pool = context.inner.lifecycle_pool.lock().clone().unwrap();

        assert!(!Arc::ptr_eq(&first_processor, &second_processor));
        assert!(Arc::ptr_eq(&first_pool, &second_pool));
        context.close();
    }

    #[test]
    fn test_shutdown_hook_registered_once_and_cancelled_on_close() {
        let context = ApplicationContext::generic();
        context.refresh().unwrap();
        context.register_shutdown_hook().unwrap();
        context.register_shutdown_hook().unwrap();
        assert!(context.has_shutdown_hook());

        context.close();
        assert!(!context.has_shutdown_hook());
    }
}
