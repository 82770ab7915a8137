use super::{ApplicationEvent, EventKind};
use std::marker::PhantomData;

/// Receives events published on a context.
pub trait ApplicationListener: Send + Sync {
    /// Filters events before [`on_event`](ApplicationListener::on_event) is called.
    fn supports_event(&self, _event: &ApplicationEvent) -> bool {
        true
    }

    fn on_event(&self, event: &ApplicationEvent) -> anyhow::Result<()>;
}

/// A listener backed by a closure, optionally restricted to some event kinds.
pub struct FnListener<F> {
    kinds: Option<Vec<EventKind>>,
    handler: F,
}

impl<F> FnListener<F>
where
    F: Fn(&ApplicationEvent) -> anyhow::Result<()> + Send + Sync,
{
    pub fn new(handler: F) -> Self {
        Self {
            kinds: None,
            handler,
        }
    }

    pub fn for_kinds(kinds: impl IntoIterator<Item = EventKind>, handler: F) -> Self {
        Self {
            kinds: Some(kinds.into_iter().collect()),
            handler,
        }
    }
}

impl<F> ApplicationListener for FnListener<F>
where
    F: Fn(&ApplicationEvent) -> anyhow::Result<()> + Send + Sync,
{
    fn supports_event(&self, event: &ApplicationEvent) -> bool {
        self.kinds
            .as_ref()
            .is_none_or(|kinds| kinds.contains(&event.kind()))
    }

    fn on_event(&self, event: &ApplicationEvent) -> anyhow::Result<()> {
        (self.handler)(event)
    }
}

/// A listener for payload events carrying a `T`.
pub struct PayloadListener<T, F> {
    handler: F,
    _payload: PhantomData<fn(&T)>,
}

impl<T, F> PayloadListener<T, F>
where
    T: 'static,
    F: Fn(&T, &ApplicationEvent) -> anyhow::Result<()> + Send + Sync,
{
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _payload: PhantomData,
        }
    }
}

impl<T, F> ApplicationListener for PayloadListener<T, F>
where
    T: 'static,
    F: Fn(&T, &ApplicationEvent) -> anyhow::Result<()> + Send + Sync,
{
    fn supports_event(&self, event: &ApplicationEvent) -> bool {
        event.payload_as::<T>().is_some()
    }

    fn on_event(&self, event: &ApplicationEvent) -> anyhow::Result<()> {
        match event.payload_as::<T>() {
            Some(payload) => (self.handler)(payload, event),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_kind_filter() {
        let listener = FnListener::for_kinds([EventKind::ContextClosed], |_: &ApplicationEvent| Ok(()));
        assert!(listener.supports_event(&ApplicationEvent::context_closed("ctx")));
        assert!(!listener.supports_event(&ApplicationEvent::context_refreshed("ctx")));
    }

    #[test]
    fn test_payload_listener_matches_by_type() {
        let seen = Mutex::new(Vec::new());
        let listener = PayloadListener::new(|value: &u64, _: &ApplicationEvent| {
            seen.lock().push(*value);
            Ok(())
        });

        let matching = ApplicationEvent::from_payload("ctx", 5u64);
        let other = ApplicationEvent::from_payload("ctx", "text");
        assert!(listener.supports_event(&matching));
        assert!(!listener.supports_event(&other));

        listener.on_event(&matching).unwrap();
        listener.on_event(&other).unwrap();
        assert_eq!(*seen.lock(), vec![5]);
    }
}
