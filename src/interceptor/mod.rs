//! Construction interceptors.
//!
//! Interceptors are called around the initialization of every application
//! component, in the order they were registered. Each hook receives the
//! current instance and returns the instance to continue with, so an
//! interceptor may wrap or replace it entirely.
//!
//! # Example
//!
//! ```rust,ignore
//! struct Audit;
//!
//! impl ConstructionInterceptor for Audit {
//!     fn after_initialization(&self, bean: Bean, name: &str) -> anyhow::Result<Bean> {
//!         tracing::info!(component = name, "ready");
//!         Ok(bean)
//!     }
//! }
//! ```

mod logging;

pub use logging::LoggingInterceptor;

use crate::di::{Bean, DefaultComponentFactory, Precedence, sort_by_precedence};
use crate::error::Result;
use std::sync::Arc;
use tracing::debug;

pub trait ConstructionInterceptor: Send + Sync {
    /// Called before the component's init callback.
    fn before_initialization(&self, bean: Bean, _name: &str) -> anyhow::Result<Bean> {
        Ok(bean)
    }

    /// Called after the component's init callback.
    fn after_initialization(&self, bean: Bean, _name: &str) -> anyhow::Result<Bean> {
        Ok(bean)
    }

    /// Called when a singleton still being populated is handed to a cycle
    /// partner. The returned instance is what the partner receives, and what
    /// the component resolves to once finished.
    fn early_reference(&self, bean: Bean, _name: &str) -> anyhow::Result<Bean> {
        Ok(bean)
    }
}

/// Instantiates the interceptor definitions and appends them to the factory's
/// chain, after any statically added interceptors.
pub fn register_interceptors(
    factory: &DefaultComponentFactory,
    statics: &[Arc<dyn ConstructionInterceptor>],
) -> Result<()> {
    for interceptor in statics {
        factory.add_interceptor(Arc::clone(interceptor));
    }

    let mut ordered: Vec<(Precedence, Arc<dyn ConstructionInterceptor>)> = Vec::new();
    for name in factory.names_where(|d| d.is_interceptor()) {
        let Some(definition) = crate::di::DefinitionRegistry::definition(factory, &name) else {
            continue;
        };
        if let Some(interceptor) = factory.capability(&name, |c| c.interceptor.as_ref())? {
            ordered.push((definition.ordering(), interceptor));
        }
    }
    sort_by_precedence(&mut ordered);

    debug!(
        statics = statics.len(),
        definitions = ordered.len(),
        "Registering construction interceptors"
    );
    for (_, interceptor) in ordered {
        factory.add_interceptor(interceptor);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::di::{ComponentDefinition, DefinitionRegistry};
    use parking_lot::Mutex;

    struct Tag {
        label: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl ConstructionInterceptor for Tag {
        fn after_initialization(&self, bean: Bean, _: &str) -> anyhow::Result<Bean> {
            self.log.lock().push(self.label);
            Ok(bean)
        }
    }

    #[test]
    fn test_interceptors_are_sorted_and_applied_to_later_components() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let factory = DefaultComponentFactory::new();
        for (label, precedence) in [("second", Precedence::Order(2)), ("first", Precedence::Priority(9))] {
            let log = Arc::clone(&log);
            factory
                .register_definition(
                    ComponentDefinition::new(label, move |_| {
                        Ok(Tag {
                            label,
                            log: Arc::clone(&log),
                        })
                    })
                    .precedence(precedence)
                    .as_interceptor(|t: Arc<Tag>| t as Arc<dyn ConstructionInterceptor>),
                )
                .unwrap();
        }
        factory
            .register_definition(ComponentDefinition::new("service", |_| Ok(1u8)))
            .unwrap();
        let statics: Vec<Arc<dyn ConstructionInterceptor>> = vec![Arc::new(Tag {
            label: "static",
            log: Arc::clone(&log),
        })];

        register_interceptors(&factory, &statics).unwrap();
        assert_eq!(factory.interceptor_count(), 3);
        assert!(log.lock().is_empty());

        factory.get_bean("service").unwrap();
        assert_eq!(*log.lock(), vec!["static", "first", "second"]);
    }
}
