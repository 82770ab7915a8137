//! Application events and their synchronous dispatch.

mod listener;
mod multicaster;

pub use listener::{ApplicationListener, FnListener, PayloadListener};
pub use multicaster::{ErrorHandler, EventMulticaster, SimpleEventMulticaster};

use chrono::{DateTime, Utc};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use strum_macros::{Display, EnumDiscriminants};
use uuid::Uuid;

/// What an [`ApplicationEvent`] carries.
#[derive(Clone, EnumDiscriminants)]
#[strum_discriminants(name(EventKind), derive(Display, Hash))]
pub enum EventPayload {
    ContextRefreshed,
    ContextStarted,
    ContextStopped,
    ContextClosed,
    /// An arbitrary value published through `publish_payload`.
    Payload {
        value: Arc<dyn Any + Send + Sync>,
        type_name: &'static str,
    },
}

/// An event published by a context. Cheap to clone.
///
/// Every event gets a fresh id; clones keep it.
#[derive(Clone)]
pub struct ApplicationEvent {
    id: Uuid,
    source: String,
    timestamp: DateTime<Utc>,
    payload: EventPayload,
}

impl ApplicationEvent {
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: source.into(),
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Wraps an arbitrary value into a payload event.
    pub fn from_payload<T: Send + Sync + 'static>(source: impl Into<String>, value: T) -> Self {
        Self::new(
            source,
            EventPayload::Payload {
                value: Arc::new(value),
                type_name: std::any::type_name::<T>(),
            },
        )
    }

    pub fn context_refreshed(source: impl Into<String>) -> Self {
        Self::new(source, EventPayload::ContextRefreshed)
    }

    pub fn context_started(source: impl Into<String>) -> Self {
        Self::new(source, EventPayload::ContextStarted)
    }

    pub fn context_stopped(source: impl Into<String>) -> Self {
        Self::new(source, EventPayload::ContextStopped)
    }

    pub fn context_closed(source: impl Into<String>) -> Self {
        Self::new(source, EventPayload::ContextClosed)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Id of the context the event was first published on.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }

    pub fn kind(&self) -> EventKind {
        EventKind::from(&self.payload)
    }

    /// The payload value, if this is a payload event carrying a `T`.
    pub fn payload_as<T: 'static>(&self) -> Option<&T> {
        match &self.payload {
            EventPayload::Payload { value, .. } => value.downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Short name used in logs and error messages.
    pub fn describe(&self) -> String {
        match &self.payload {
            EventPayload::Payload { type_name, .. } => format!("Payload<{type_name}>"),
            _ => self.kind().to_string(),
        }
    }
}

impl fmt::Debug for ApplicationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApplicationEvent")
            .field("id", &self.id)
            .field("source", &self.source)
            .field("timestamp", &self.timestamp)
            .field("payload", &self.describe())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct OrderPlaced(u32);

    #[test]
    fn test_payload_access() {
        let event = ApplicationEvent::from_payload("ctx", OrderPlaced(7));
        assert_eq!(event.kind(), EventKind::Payload);
        assert_eq!(event.payload_as::<OrderPlaced>(), Some(&OrderPlaced(7)));
        assert_eq!(event.payload_as::<String>(), None);
        assert!(event.describe().contains("OrderPlaced"));
    }

    #[test]
    fn test_context_events() {
        let event = ApplicationEvent::context_refreshed("ctx");
        assert_eq!(event.kind(), EventKind::ContextRefreshed);
        assert_eq!(event.describe(), "ContextRefreshed");
        assert_eq!(event.source(), "ctx");
        assert!(event.payload_as::<u8>().is_none());
    }
}
