//! How a context obtains its component factory.
//!
//! A [`FactoryStrategy`] owns the factory behind a context: it builds it on
//! refresh, releases it on close and exposes it in between. The strategy is
//! also where a context variant hooks into the refresh sequence.

use crate::di::{DefaultComponentFactory, DefinitionRegistry};
use crate::environment::Environment;
use crate::error::{ContextError, Result};
use crate::loader::DefinitionLoader;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Settings a strategy applies to every factory it creates.
#[derive(Clone, Default)]
pub struct FactorySetup {
    pub id: String,
    pub parent: Option<DefaultComponentFactory>,
    pub allow_circular_references: bool,
    pub allow_definition_overriding: bool,
}

impl FactorySetup {
    fn apply(&self, factory: &DefaultComponentFactory) {
        factory.set_parent(self.parent.clone());
        factory.set_allow_circular_references(self.allow_circular_references);
        factory.set_allow_definition_overriding(self.allow_definition_overriding);
    }
}

pub trait FactoryStrategy: Send + Sync + 'static {
    /// Creates or rebuilds the factory and loads its definitions.
    fn refresh_factory(&self, setup: &FactorySetup) -> Result<()>;

    /// Releases the factory. `factory()` fails afterwards.
    fn close_factory(&self);

    /// The current factory.
    ///
    /// # Errors
    /// `FactoryNotInitialized` before the first refresh and after close.
    fn factory(&self) -> Result<DefaultComponentFactory>;

    /// Adds property sources before required properties are validated.
    fn init_property_sources(&self, _environment: &Environment) -> Result<()> {
        Ok(())
    }

    /// Last chance to adjust the factory before extensions run.
    fn post_process_factory(&self, _factory: &DefaultComponentFactory) -> Result<()> {
        Ok(())
    }

    /// Called after the message source and multicaster exist, before
    /// singletons are created.
    fn on_refresh(&self) -> Result<()> {
        Ok(())
    }

    fn on_close(&self) {}

    /// Called when a refresh attempt failed.
    fn cancel_refresh(&self, _error: &ContextError) {}

    fn clear_resource_caches(&self) {}

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Builds a fresh factory on every refresh and loads it with `L`.
pub struct RefreshableFactoryStrategy<L> {
    loader: L,
    factory: RwLock<Option<DefaultComponentFactory>>,
}

impl<L: DefinitionLoader> RefreshableFactoryStrategy<L> {
    pub fn new(loader: L) -> Self {
        Self {
            loader,
            factory: RwLock::new(None),
        }
    }

    pub fn loader(&self) -> &L {
        &self.loader
    }

    pub fn has_factory(&self) -> bool {
        self.factory.read().is_some()
    }
}

impl<L: DefinitionLoader + 'static> FactoryStrategy for RefreshableFactoryStrategy<L> {
    fn refresh_factory(&self, setup: &FactorySetup) -> Result<()> {
        if self.has_factory() {
            debug!(context = %setup.id, "Destroying previous component factory");
            if let Some(previous) = self.factory.write().take() {
                previous.destroy_singletons();
            }
        }

        let factory = DefaultComponentFactory::new();
        setup.apply(&factory);
        self.loader
            .load_definitions(&factory)
            .map_err(|source| ContextError::DefinitionLoad { source })?;
        debug!(
            context = %setup.id,
            definitions = factory.definition_count(),
            "Loaded component definitions"
        );
        *self.factory.write() = Some(factory);
        Ok(())
    }

    fn close_factory(&self) {
        self.factory.write().take();
    }

    fn factory(&self) -> Result<DefaultComponentFactory> {
        self.factory
            .read()
            .clone()
            .ok_or(ContextError::FactoryNotInitialized)
    }

    fn cancel_refresh(&self, _error: &ContextError) {
        self.factory.write().take();
    }

    fn clear_resource_caches(&self) {
        self.loader.clear_caches();
    }
}

/// One factory created up front and refreshed exactly once.
///
/// Definitions are registered directly through [`registry`](Self::registry)
/// before the context is refreshed.
pub struct GenericFactoryStrategy {
    factory: DefaultComponentFactory,
    refreshed: AtomicBool,
    closed: AtomicBool,
}

impl GenericFactoryStrategy {
    pub fn new() -> Self {
        Self {
            factory: DefaultComponentFactory::new(),
            refreshed: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// The factory's registry, usable before refresh.
    pub fn registry(&self) -> &dyn DefinitionRegistry {
        &self.factory
    }
}

impl Default for GenericFactoryStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl FactoryStrategy for GenericFactoryStrategy {
    fn refresh_factory(&self, setup: &FactorySetup) -> Result<()> {
        if self
            .refreshed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ContextError::RefreshNotSupported {
                strategy: "GenericFactoryStrategy".to_string(),
            });
        }
        setup.apply(&self.factory);
        Ok(())
    }

    fn close_factory(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn factory(&self) -> Result<DefaultComponentFactory> {
        if !self.refreshed.load(Ordering::SeqCst) || self.closed.load(Ordering::SeqCst) {
            return Err(ContextError::FactoryNotInitialized);
        }
        Ok(self.factory.clone())
    }

    fn name(&self) -> &str {
        "GenericFactoryStrategy"
    }
}
