use crate::di::{Bean, DefaultComponentFactory, WeakFactory};
use crate::environment::Environment;
use crate::error::{ContextError, Result};
use std::any::TypeId;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

/// Handle given to instantiate, populate and init callbacks.
///
/// Dependencies resolved through it are created on demand, which is what
/// lets the factory detect and break reference cycles.
pub struct Resolution {
    factory: DefaultComponentFactory,
    name: String,
}

impl Resolution {
    pub(crate) fn new(factory: DefaultComponentFactory, name: &str) -> Self {
        Self {
            factory,
            name: name.to_string(),
        }
    }

    /// Name of the component being built.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn factory(&self) -> &DefaultComponentFactory {
        &self.factory
    }

    pub fn get_bean(&self, name: &str) -> Result<Bean> {
        self.factory.get_bean(name)
    }

    pub fn get<T: Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>> {
        self.factory.get::<T>(name)
    }

    pub fn get_shared<T: Clone + Send + Sync + 'static>(&self, name: &str) -> Result<T> {
        self.factory.get_shared::<T>(name)
    }

    /// A reference resolved on first use instead of now.
    pub fn lazy<T: Send + Sync + 'static>(&self, name: &str) -> LazyRef<T> {
        LazyRef {
            factory: self.factory.downgrade(),
            name: name.to_string(),
            instance: OnceLock::new(),
        }
    }

    pub fn resolve_dependency<T: Clone + Send + Sync + 'static>(&self) -> Result<T> {
        self.factory.resolve_dependency::<T>()
    }

    /// Runs `value` through the factory's value resolvers.
    pub fn resolve_value(&self, value: &str) -> Result<String> {
        self.factory.resolve_embedded_value(value)
    }

    /// Looks up `key` in the environment and converts it to `T`.
    ///
    /// The conversion service gets the first try; `FromStr` is the fallback.
    pub fn property<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr + Clone + Send + Sync + 'static,
        T::Err: fmt::Display,
    {
        let environment = self.factory.resolve_dependency::<Arc<Environment>>()?;
        let Some(raw) = environment.property(key) else {
            return Ok(None);
        };
        let target = std::any::type_name::<T>();
        let conversion_error = |message: String| ContextError::PropertyConversion {
            key: key.to_string(),
            target: target.to_string(),
            message,
        };

        if let Some(service) = self.factory.conversion_service() {
            if let Some(converted) = service.convert(&raw, TypeId::of::<T>(), target) {
                let bean = converted.map_err(|e| conversion_error(e.to_string()))?;
                return bean
                    .downcast_ref::<T>()
                    .cloned()
                    .map(Some)
                    .ok_or_else(|| conversion_error("conversion produced a different type".into()));
            }
        }
        raw.parse::<T>()
            .map(Some)
            .map_err(|e| conversion_error(e.to_string()))
    }
}

/// A component reference resolved on first access.
///
/// Holds the factory weakly, so a `LazyRef` stored inside a component does
/// not keep its factory alive.
pub struct LazyRef<T> {
    factory: WeakFactory,
    name: String,
    instance: OnceLock<Arc<T>>,
}

impl<T: Send + Sync + 'static> LazyRef<T> {
    pub fn get(&self) -> Result<Arc<T>> {
        if let Some(instance) = self.instance.get() {
            return Ok(Arc::clone(instance));
        }
        let factory = self
            .factory
            .upgrade()
            .ok_or(ContextError::FactoryNotInitialized)?;
        let resolved = factory.get::<T>(&self.name)?;
        Ok(Arc::clone(self.instance.get_or_init(|| resolved)))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_resolved(&self) -> bool {
        self.instance.get().is_some()
    }
}

impl<T> Clone for LazyRef<T> {
    fn clone(&self) -> Self {
        Self {
            factory: self.factory.clone(),
            name: self.name.clone(),
            instance: self.instance.clone(),
        }
    }
}

impl<T> fmt::Debug for LazyRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyRef")
            .field("name", &self.name)
            .field("resolved", &self.instance.get().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::di::{ComponentDefinition, ConversionService, DefinitionRegistry};
    use crate::environment::MapPropertySource;
    use std::time::Duration;

    struct Holder {
        later: LazyRef<String>,
    }

    #[test]
    fn test_lazy_ref_resolves_on_first_access() {
        let factory = DefaultComponentFactory::new();
        factory
            .register_definition(ComponentDefinition::new("holder", |r: &Resolution| {
                Ok(Holder {
                    later: r.lazy::<String>("greeting"),
                })
            }))
            .unwrap();
        factory
            .register_definition(ComponentDefinition::new("greeting", |_| Ok("hi".to_string())).lazy())
            .unwrap();

        let holder = factory.get::<Holder>("holder").unwrap();
        assert!(!holder.later.is_resolved());
        assert!(!factory.contains_singleton("greeting"));

        assert_eq!(holder.later.get().unwrap().as_str(), "hi");
        assert!(holder.later.clone().is_resolved());
    }

    #[test]
    fn test_lazy_ref_outliving_factory() {
        let factory = DefaultComponentFactory::new();
        let resolution = Resolution::new(factory.clone(), "x");
        let lazy = resolution.lazy::<String>("anything");
        drop(resolution);
        drop(factory);
        assert!(matches!(lazy.get(), Err(ContextError::FactoryNotInitialized)));
    }

    struct Seconds;

    impl ConversionService for Seconds {
        fn convert(&self, raw: &str, target: TypeId, _: &str) -> Option<anyhow::Result<Bean>> {
            if target != TypeId::of::<Duration>() {
                return None;
            }
            Some(
                raw.trim_end_matches('s')
                    .parse::<u64>()
                    .map(|n| Arc::new(Duration::from_secs(n)) as Bean)
                    .map_err(Into::into),
            )
        }
    }

    #[test]
    fn test_property_conversion() {
        let environment = Arc::new(Environment::empty());
        environment.add_first(MapPropertySource::from_pairs(
            "test",
            [("pool.size", "8"), ("pool.timeout", "30s"), ("pool.name", "x")],
        ));
        let factory = DefaultComponentFactory::new();
        factory.register_resolvable_dependency(Arc::clone(&environment));
        factory.set_conversion_service(Arc::new(Seconds));
        let resolution = Resolution::new(factory, "pool");

        assert_eq!(resolution.property::<u32>("pool.size").unwrap(), Some(8));
        assert_eq!(
            resolution.property::<Duration>("pool.timeout").unwrap(),
            Some(Duration::from_secs(30))
        );
        assert_eq!(resolution.property::<u32>("pool.missing").unwrap(), None);
        assert!(matches!(
            resolution.property::<u32>("pool.name"),
            Err(ContextError::PropertyConversion { .. })
        ));
    }
}
