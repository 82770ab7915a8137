use super::{ApplicationContext, ContextConfig, ContextParent, ContextParts};
use crate::environment::Environment;
use crate::event::ApplicationListener;
use crate::extension::{FactoryExtension, RegistryExtension, StaticExtension};
use crate::interceptor::ConstructionInterceptor;
use crate::loader::DefinitionLoader;
use crate::strategy::{FactoryStrategy, GenericFactoryStrategy, RefreshableFactoryStrategy};
use std::sync::Arc;

/// Builder for [`ApplicationContext`].
///
/// # Example
///
/// ```rust,ignore
/// let parent = ContextBuilder::generic().id("root").build();
/// parent.refresh()?;
///
/// let child = ContextBuilder::refreshable(loader)
///     .id("web")
///     .parent(&parent)
///     .required_property("PORT")
///     .build();
/// ```
pub struct ContextBuilder<S> {
    strategy: S,
    config: ContextConfig,
    parent: Option<Arc<dyn ContextParent>>,
    environment: Option<Environment>,
    listeners: Vec<Arc<dyn ApplicationListener>>,
    extensions: Vec<StaticExtension>,
    interceptors: Vec<Arc<dyn ConstructionInterceptor>>,
}

impl ContextBuilder<GenericFactoryStrategy> {
    pub fn generic() -> Self {
        Self::new(GenericFactoryStrategy::new())
    }
}

impl<L: DefinitionLoader + 'static> ContextBuilder<RefreshableFactoryStrategy<L>> {
    pub fn refreshable(loader: L) -> Self {
        Self::new(RefreshableFactoryStrategy::new(loader))
    }
}

impl<S: FactoryStrategy> ContextBuilder<S> {
    pub fn new(strategy: S) -> Self {
        Self {
            strategy,
            config: ContextConfig::default(),
            parent: None,
            environment: None,
            listeners: Vec::new(),
            extensions: Vec::new(),
            interceptors: Vec::new(),
        }
    }

    /// Replaces every setting with `config`.
    pub fn config(mut self, config: ContextConfig) -> Self {
        self.config = config;
        self
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.config.id = Some(id.into());
        self
    }

    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.config.display_name = Some(name.into());
        self
    }

    pub fn allow_circular_references(mut self, allow: bool) -> Self {
        self.config.allow_circular_references = allow;
        self
    }

    pub fn allow_definition_overriding(mut self, allow: bool) -> Self {
        self.config.allow_definition_overriding = allow;
        self
    }

    pub fn required_property(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        if !self.config.required_properties.contains(&key) {
            self.config.required_properties.push(key);
        }
        self
    }

    /// Property sources to use instead of the process environment.
    pub fn environment(mut self, environment: Environment) -> Self {
        self.environment = Some(environment);
        self
    }

    pub fn parent<P: FactoryStrategy>(self, parent: &ApplicationContext<P>) -> Self {
        self.parent_handle(parent.as_parent())
    }

    pub fn parent_handle(mut self, parent: Arc<dyn ContextParent>) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn listener(mut self, listener: Arc<dyn ApplicationListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn registry_extension(mut self, extension: Arc<dyn RegistryExtension>) -> Self {
        self.extensions.push(StaticExtension::Registry(extension));
        self
    }

    pub fn factory_extension(mut self, extension: Arc<dyn FactoryExtension>) -> Self {
        self.extensions.push(StaticExtension::Factory(extension));
        self
    }

    pub fn interceptor(mut self, interceptor: Arc<dyn ConstructionInterceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Builds the context. It stays inactive until refreshed.
    ///
    /// With a parent, the parent's property sources and required properties
    /// are appended after this context's own.
    pub fn build(self) -> ApplicationContext<S> {
        let environment = Arc::new(self.environment.unwrap_or_default());
        for key in &self.config.required_properties {
            environment.add_required_property(key.clone());
        }
        if let Some(parent) = &self.parent {
            environment.merge(&parent.environment());
        }

        ApplicationContext::from_parts(ContextParts {
            strategy: self.strategy,
            config: self.config,
            parent: self.parent,
            environment,
            listeners: self.listeners,
            extensions: self.extensions,
            interceptors: self.interceptors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::MapPropertySource;

    #[test]
    fn test_builder_applies_config() {
        let context = ContextBuilder::generic()
            .id("orders")
            .display_name("Orders")
            .allow_circular_references(false)
            .required_property("DB_URL")
            .required_property("DB_URL")
            .build();

        assert_eq!(context.id(), "orders");
        assert_eq!(context.display_name(), "Orders");
        assert!(!context.config().allow_circular_references);
        assert_eq!(context.environment().required_properties(), vec!["DB_URL".to_string()]);
        assert!(!context.is_active());
    }

    #[test]
    fn test_generated_id_is_display_name_by_default() {
        let context = ContextBuilder::generic().build();
        assert!(!context.id().is_empty());
        assert_eq!(context.id(), context.display_name());
    }

    #[test]
    fn test_child_inherits_parent_property_sources() {
        let parent_env = Environment::empty();
        parent_env.add_last(MapPropertySource::from_pairs("parent", [("region", "eu"), ("tier", "gold")]));
        let parent = ContextBuilder::generic().environment(parent_env).build();

        let child_env = Environment::empty();
        child_env.add_last(MapPropertySource::from_pairs("child", [("tier", "silver")]));
        let child = ContextBuilder::generic()
            .environment(child_env)
            .parent(&parent)
            .build();

        let environment = child.environment();
        assert_eq!(environment.property("region").as_deref(), Some("eu"));
        assert_eq!(environment.property("tier").as_deref(), Some("silver"));
        assert_eq!(environment.source_names(), vec!["child".to_string(), "parent".to_string()]);
    }
}
