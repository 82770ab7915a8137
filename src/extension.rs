//! Extensions run against the definitions before any ordinary component exists.
//!
//! Registry extensions come first and may register further definitions,
//! including further registry extensions. Factory extensions run once the
//! definition set is final and may only inspect or adjust it.

use crate::di::{DefaultComponentFactory, DefinitionRegistry, Precedence, sort_by_precedence};
use crate::error::{ContextError, Result};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, trace};

/// Adjusts the component factory after all definitions are loaded.
pub trait FactoryExtension: Send + Sync {
    fn process_factory(&self, factory: &DefaultComponentFactory) -> anyhow::Result<()>;

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// May add, remove or modify definitions before factory extensions run.
pub trait RegistryExtension: Send + Sync {
    fn process_registry(&self, registry: &dyn DefinitionRegistry) -> anyhow::Result<()>;

    /// Runs after every registry extension finished `process_registry`.
    fn process_factory(&self, _factory: &DefaultComponentFactory) -> anyhow::Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// An extension instance added to a context directly rather than through a
/// definition. Static extensions run before definition-backed ones.
#[derive(Clone)]
pub enum StaticExtension {
    Registry(Arc<dyn RegistryExtension>),
    Factory(Arc<dyn FactoryExtension>),
}

/// Runs every extension against `factory` in order.
///
/// A definition-backed extension is run at most once per call.
pub fn invoke_factory_extensions(
    factory: &DefaultComponentFactory,
    statics: &[StaticExtension],
) -> Result<()> {
    let mut processed: HashSet<String> = HashSet::new();
    let mut registry_extensions: Vec<(String, Arc<dyn RegistryExtension>)> = Vec::new();

    for extension in statics {
        if let StaticExtension::Registry(extension) = extension {
            let name = extension.name().to_string();
            run_registry_extension(&name, extension.as_ref(), factory)?;
            registry_extensions.push((name, Arc::clone(extension)));
        }
    }

    // Priority first, then Priority + Order, then everything left until a
    // scan finds nothing new. Each pass rescans since extensions may have
    // registered more of their kind.
    let tiers: [fn(Precedence) -> bool; 2] = [|p| p.is_priority(), |p| !p.is_unordered()];
    for in_tier in tiers {
        let pending = pending_registry_extensions(factory, &mut processed, in_tier);
        run_registry_definitions(factory, pending, &mut registry_extensions)?;
    }
    loop {
        let pending = pending_registry_extensions(factory, &mut processed, |_| true);
        if pending.is_empty() {
            break;
        }
        run_registry_definitions(factory, pending, &mut registry_extensions)?;
    }

    for (name, extension) in &registry_extensions {
        trace!(extension = %name, "Invoking registry extension factory callback");
        extension
            .process_factory(factory)
            .map_err(|e| ContextError::extension(name, e))?;
    }

    for extension in statics {
        if let StaticExtension::Factory(extension) = extension {
            run_factory_extension(extension.name(), extension.as_ref(), factory)?;
        }
    }

    let mut candidates: Vec<(Precedence, String)> = factory
        .names_where(|d| d.is_factory_extension())
        .into_iter()
        .filter(|name| !processed.contains(name))
        .filter_map(|name| factory.definition(&name).map(|d| (d.ordering(), name)))
        .collect();
    sort_by_precedence(&mut candidates);
    let (priority, rest): (Vec<_>, Vec<_>) = candidates.into_iter().partition(|(p, _)| p.is_priority());
    let (ordered, unordered): (Vec<_>, Vec<_>) = rest.into_iter().partition(|(p, _)| !p.is_unordered());
    for tier in [priority, ordered, unordered] {
        let extensions = tier
            .into_iter()
            .filter_map(|(_, name)| {
                factory
                    .capability(&name, |c| c.factory_extension.as_ref())
                    .transpose()
                    .map(|extension| extension.map(|e| (name, e)))
            })
            .collect::<Result<Vec<_>>>()?;
        for (name, extension) in extensions {
            run_factory_extension(&name, extension.as_ref(), factory)?;
        }
    }

    debug!(
        registry_extensions = registry_extensions.len(),
        "Factory extensions complete"
    );
    Ok(())
}

fn pending_registry_extensions(
    factory: &DefaultComponentFactory,
    processed: &mut HashSet<String>,
    in_tier: impl Fn(Precedence) -> bool,
) -> Vec<(Precedence, String)> {
    let mut pending: Vec<(Precedence, String)> = factory
        .names_where(|d| d.is_registry_extension() && in_tier(d.ordering()))
        .into_iter()
        .filter(|name| !processed.contains(name))
        .filter_map(|name| factory.definition(&name).map(|d| (d.ordering(), name)))
        .collect();
    sort_by_precedence(&mut pending);
    for (_, name) in &pending {
        processed.insert(name.clone());
    }
    pending
}

/// Instantiates the whole batch first, then runs it in order.
fn run_registry_definitions(
    factory: &DefaultComponentFactory,
    pending: Vec<(Precedence, String)>,
    registry_extensions: &mut Vec<(String, Arc<dyn RegistryExtension>)>,
) -> Result<()> {
    let mut batch = Vec::with_capacity(pending.len());
    for (_, name) in pending {
        if let Some(extension) = factory.capability(&name, |c| c.registry_extension.as_ref())? {
            batch.push((name, extension));
        }
    }
    for (name, extension) in batch {
        run_registry_extension(&name, extension.as_ref(), factory)?;
        registry_extensions.push((name, extension));
    }
    Ok(())
}

fn run_registry_extension(
    name: &str,
    extension: &dyn RegistryExtension,
    factory: &DefaultComponentFactory,
) -> Result<()> {
    trace!(extension = name, "Invoking registry extension");
    extension
        .process_registry(factory)
        .map_err(|e| ContextError::extension(name, e))
}

fn run_factory_extension(
    name: &str,
    extension: &dyn FactoryExtension,
    factory: &DefaultComponentFactory,
) -> Result<()> {
    trace!(extension = name, "Invoking factory extension");
    extension
        .process_factory(factory)
        .map_err(|e| ContextError::extension(name, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::di::ComponentDefinition;
    use parking_lot::Mutex;

    type Log = Arc<Mutex<Vec<String>>>;

    struct Recorder {
        label: &'static str,
        log: Log,
        adds: Option<ComponentDefinition>,
    }

    impl RegistryExtension for Recorder {
        fn process_registry(&self, registry: &dyn DefinitionRegistry) -> anyhow::Result<()> {
            self.log.lock().push(self.label.to_string());
            if let Some(definition) = &self.adds {
                registry.register_definition(definition.clone())?;
            }
            Ok(())
        }

        fn process_factory(&self, _: &DefaultComponentFactory) -> anyhow::Result<()> {
            self.log.lock().push(format!("{}:factory", self.label));
            Ok(())
        }
    }

    struct Inspector {
        label: &'static str,
        log: Log,
    }

    impl FactoryExtension for Inspector {
        fn process_factory(&self, _: &DefaultComponentFactory) -> anyhow::Result<()> {
            self.log.lock().push(self.label.to_string());
            Ok(())
        }
    }

    fn registry_definition(
        label: &'static str,
        precedence: Precedence,
        log: &Log,
        adds: Option<ComponentDefinition>,
    ) -> ComponentDefinition {
        let log = Arc::clone(log);
        ComponentDefinition::new(label, move |_| {
            Ok(Recorder {
                label,
                log: Arc::clone(&log),
                adds: adds.clone(),
            })
        })
        .precedence(precedence)
        .as_registry_extension(|r: Arc<Recorder>| r as Arc<dyn RegistryExtension>)
    }

    fn factory_definition(label: &'static str, precedence: Precedence, log: &Log) -> ComponentDefinition {
        let log = Arc::clone(log);
        ComponentDefinition::new(label, move |_| {
            Ok(Inspector {
                label,
                log: Arc::clone(&log),
            })
        })
        .precedence(precedence)
        .as_factory_extension(|i: Arc<Inspector>| i as Arc<dyn FactoryExtension>)
    }

    fn factory_labels(log: &Log) -> Vec<String> {
        log.lock()
            .iter()
            .filter(|l| !l.ends_with(":factory"))
            .cloned()
            .collect()
    }

    #[test]
    fn test_precedence_tiers_order_extensions() {
        let log: Log = Arc::default();
        let factory = DefaultComponentFactory::new();
        for (label, precedence) in [
            ("d", Precedence::Unordered),
            ("c", Precedence::Order(5)),
            ("b", Precedence::Priority(1)),
            ("a", Precedence::Priority(0)),
        ] {
            factory
                .register_definition(factory_definition(label, precedence, &log))
                .unwrap();
        }

        invoke_factory_extensions(&factory, &[]).unwrap();
        assert_eq!(factory_labels(&log), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_registry_extensions_run_before_factory_extensions_and_discover_new_ones() {
        let log: Log = Arc::default();
        let factory = DefaultComponentFactory::new();
        let nested = registry_definition("nested", Precedence::Priority(0), &log, None);
        factory
            .register_definition(registry_definition(
                "outer",
                Precedence::Unordered,
                &log,
                Some(nested),
            ))
            .unwrap();
        factory
            .register_definition(factory_definition("inspect", Precedence::Unordered, &log))
            .unwrap();
        let statics = vec![
            StaticExtension::Factory(Arc::new(Inspector {
                label: "static-factory",
                log: Arc::clone(&log),
            })),
            StaticExtension::Registry(Arc::new(Recorder {
                label: "static-registry",
                log: Arc::clone(&log),
                adds: None,
            })),
        ];

        invoke_factory_extensions(&factory, &statics).unwrap();

        assert_eq!(
            *log.lock(),
            vec![
                "static-registry",
                "outer",
                "nested",
                "static-registry:factory",
                "outer:factory",
                "nested:factory",
                "static-factory",
                "inspect",
            ]
        );
        assert!(factory.contains_definition("nested"));
    }

    #[test]
    fn test_extension_error_is_wrapped() {
        struct Failing;
        impl FactoryExtension for Failing {
            fn process_factory(&self, _: &DefaultComponentFactory) -> anyhow::Result<()> {
                anyhow::bail!("rejected")
            }
            fn name(&self) -> &str {
                "failing"
            }
        }

        let factory = DefaultComponentFactory::new();
        let err = invoke_factory_extensions(&factory, &[StaticExtension::Factory(Arc::new(Failing))])
            .unwrap_err();
        assert!(matches!(err, ContextError::Extension { ref name, .. } if name == "failing"));
    }
}
