use super::{ApplicationEvent, ApplicationListener};
use crate::di::{DefaultComponentFactory, WeakFactory};
use crate::error::{ContextError, Result};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{trace, warn};

/// Receives listener failures when installed on a [`SimpleEventMulticaster`].
pub type ErrorHandler = Arc<dyn Fn(&ApplicationEvent, anyhow::Error) + Send + Sync>;

/// Fans events out to listeners.
pub trait EventMulticaster: Send + Sync {
    fn add_listener(&self, listener: Arc<dyn ApplicationListener>);

    /// Adds a listener by component name. The component is looked up on
    /// every dispatch.
    fn add_listener_name(&self, name: &str);

    fn remove_listener(&self, listener: &Arc<dyn ApplicationListener>);

    fn remove_listener_name(&self, name: &str);

    fn remove_all_listeners(&self);

    fn multicast_event(&self, event: &ApplicationEvent) -> Result<()>;
}

/// Calls every interested listener on the publishing thread, in registration
/// order: instances first, then named components.
///
/// A listener error stops the dispatch and is returned to the publisher,
/// unless an error handler is installed.
#[derive(Default)]
pub struct SimpleEventMulticaster {
    factory: Option<WeakFactory>,
    listeners: RwLock<Vec<Arc<dyn ApplicationListener>>>,
    listener_names: RwLock<Vec<String>>,
    error_handler: RwLock<Option<ErrorHandler>>,
}

impl SimpleEventMulticaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// A multicaster that can resolve named listeners through `factory`.
    pub fn with_factory(factory: &DefaultComponentFactory) -> Self {
        Self {
            factory: Some(factory.downgrade()),
            ..Self::default()
        }
    }

    pub fn set_error_handler(&self, handler: ErrorHandler) {
        *self.error_handler.write() = Some(handler);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len() + self.listener_names.read().len()
    }

    /// Static listeners plus the named ones that currently resolve, without
    /// duplicates.
    fn retrieve_listeners(&self) -> Result<Vec<Arc<dyn ApplicationListener>>> {
        let mut resolved = self.listeners.read().clone();
        let names = self.listener_names.read().clone();
        if names.is_empty() {
            return Ok(resolved);
        }
        let Some(factory) = self.factory.as_ref().and_then(WeakFactory::upgrade) else {
            return Ok(resolved);
        };
        for name in names {
            let listener = match factory.capability(&name, |c| c.listener.as_ref()) {
                Ok(Some(listener)) => listener,
                Ok(None) => continue,
                // Removed since it was registered.
                Err(ContextError::NoSuchDefinition { .. }) => continue,
                Err(e) => return Err(e),
            };
            if !resolved.iter().any(|existing| same_listener(existing, &listener)) {
                resolved.push(listener);
            }
        }
        Ok(resolved)
    }
}

impl EventMulticaster for SimpleEventMulticaster {
    fn add_listener(&self, listener: Arc<dyn ApplicationListener>) {
        let mut listeners = self.listeners.write();
        if !listeners.iter().any(|existing| same_listener(existing, &listener)) {
            listeners.push(listener);
        }
    }

    fn add_listener_name(&self, name: &str) {
        let mut names = self.listener_names.write();
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }

    fn remove_listener(&self, listener: &Arc<dyn ApplicationListener>) {
        self.listeners
            .write()
            .retain(|existing| !same_listener(existing, listener));
    }

    fn remove_listener_name(&self, name: &str) {
        self.listener_names.write().retain(|n| n != name);
    }

    fn remove_all_listeners(&self) {
        self.listeners.write().clear();
        self.listener_names.write().clear();
    }

    fn multicast_event(&self, event: &ApplicationEvent) -> Result<()> {
        let handler = self.error_handler.read().clone();
        for listener in self.retrieve_listeners()? {
            if !listener.supports_event(event) {
                continue;
            }
            trace!(event = %event.describe(), "Invoking listener");
            if let Err(e) = listener.on_event(event) {
                match &handler {
                    Some(handler) => handler(event, e),
                    None => {
                        warn!(event = %event.describe(), error = %e, "Listener failed");
                        return Err(ContextError::Listener {
                            event: event.describe(),
                            source: e,
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

fn same_listener(a: &Arc<dyn ApplicationListener>, b: &Arc<dyn ApplicationListener>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::di::{ComponentDefinition, DefinitionRegistry};
    use crate::event::{EventKind, FnListener};
    use parking_lot::Mutex;

    type Log = Arc<Mutex<Vec<String>>>;

    fn recording(label: &'static str, log: &Log) -> Arc<dyn ApplicationListener> {
        let log = Arc::clone(log);
        Arc::new(FnListener::new(move |event: &ApplicationEvent| {
            log.lock().push(format!("{label}:{}", event.describe()));
            Ok(())
        }))
    }

    struct Named {
        log: Log,
    }

    impl ApplicationListener for Named {
        fn on_event(&self, event: &ApplicationEvent) -> anyhow::Result<()> {
            self.log.lock().push(format!("named:{}", event.describe()));
            Ok(())
        }
    }

    #[test]
    fn test_registration_order_and_filtering() {
        let log: Log = Arc::default();
        let multicaster = SimpleEventMulticaster::new();
        multicaster.add_listener(recording("first", &log));
        multicaster.add_listener(Arc::new(FnListener::for_kinds(
            [EventKind::ContextClosed],
            |_: &ApplicationEvent| anyhow::bail!("should not be called"),
        )));
        multicaster.add_listener(recording("second", &log));

        multicaster
            .multicast_event(&ApplicationEvent::context_refreshed("ctx"))
            .unwrap();

        assert_eq!(
            *log.lock(),
            vec!["first:ContextRefreshed", "second:ContextRefreshed"]
        );
    }

    #[test]
    fn test_named_listener_resolved_at_dispatch_and_deduplicated() {
        let log: Log = Arc::default();
        let factory = DefaultComponentFactory::new();
        let shared = Arc::clone(&log);
        factory
            .register_definition(
                ComponentDefinition::new("audit", move |_| {
                    Ok(Named {
                        log: Arc::clone(&shared),
                    })
                })
                .as_listener(|n: Arc<Named>| n as Arc<dyn ApplicationListener>),
            )
            .unwrap();

        let multicaster = SimpleEventMulticaster::with_factory(&factory);
        multicaster.add_listener_name("audit");
        multicaster.add_listener_name("gone");
        assert!(!factory.contains_singleton("audit"));

        let instance = factory
            .capability("audit", |c| c.listener.as_ref())
            .unwrap()
            .unwrap();
        multicaster.add_listener(instance);

        multicaster
            .multicast_event(&ApplicationEvent::context_started("ctx"))
            .unwrap();
        assert_eq!(*log.lock(), vec!["named:ContextStarted"]);
    }

    #[test]
    fn test_listener_error_propagates_without_handler() {
        let log: Log = Arc::default();
        let multicaster = SimpleEventMulticaster::new();
        multicaster.add_listener(Arc::new(FnListener::new(|_: &ApplicationEvent| anyhow::bail!("boom"))));
        multicaster.add_listener(recording("after", &log));

        let err = multicaster
            .multicast_event(&ApplicationEvent::context_stopped("ctx"))
            .unwrap_err();
        assert!(matches!(err, ContextError::Listener { .. }));
        assert!(log.lock().is_empty());

        let failures = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&failures);
        multicaster.set_error_handler(Arc::new(move |_: &ApplicationEvent, _: anyhow::Error| *counter.lock() += 1));
        multicaster
            .multicast_event(&ApplicationEvent::context_stopped("ctx"))
            .unwrap();
        assert_eq!(*failures.lock(), 1);
        assert_eq!(*log.lock(), vec!["after:ContextStopped"]);
    }

    #[test]
    fn test_remove_listeners() {
        let log: Log = Arc::default();
        let multicaster = SimpleEventMulticaster::new();
        let listener = recording("gone", &log);
        multicaster.add_listener(Arc::clone(&listener));
        multicaster.add_listener(Arc::clone(&listener));
        multicaster.add_listener_name("named");
        assert_eq!(multicaster.listener_count(), 2);

        multicaster.remove_listener(&listener);
        multicaster.remove_listener_name("named");
        assert_eq!(multicaster.listener_count(), 0);
    }
}
