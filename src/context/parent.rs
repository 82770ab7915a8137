//! What a context exposes to its children and to the components it manages.

use crate::di::DefaultComponentFactory;
use crate::environment::Environment;
use crate::error::{ContextError, Result};
use crate::event::ApplicationEvent;
use crate::message::MessageSource;
use std::sync::{Arc, Weak};

/// The view a child context has of its parent.
pub trait ContextParent: Send + Sync {
    fn id(&self) -> &str;

    /// Publishes on the parent, which forwards to its own parent in turn.
    fn publish_event(&self, event: ApplicationEvent) -> Result<()>;

    fn environment(&self) -> Arc<Environment>;

    /// `None` until the parent's refresh initialized its message source.
    fn message_source(&self) -> Option<Arc<dyn MessageSource>>;

    /// `None` while the parent has no live factory.
    fn component_factory(&self) -> Option<DefaultComponentFactory>;
}

pub trait EventPublisher: Send + Sync {
    fn publish_event(&self, event: ApplicationEvent) -> Result<()>;

    fn publish_payload<T: Send + Sync + 'static>(&self, value: T) -> Result<()>
    where
        Self: Sized;
}

/// Publishing handle injected into components as a resolvable dependency.
///
/// Holds the context weakly, so components keeping it do not keep the
/// context alive.
#[derive(Clone)]
pub struct Publisher {
    context: Weak<dyn ContextParent>,
    id: String,
}

impl Publisher {
    pub(crate) fn new(context: Weak<dyn ContextParent>, id: &str) -> Self {
        Self {
            context,
            id: id.to_string(),
        }
    }

    fn upgrade(&self) -> Result<Arc<dyn ContextParent>> {
        self.context.upgrade().ok_or_else(|| ContextError::AlreadyClosed {
            context: self.id.clone(),
        })
    }
}

impl EventPublisher for Publisher {
    fn publish_event(&self, event: ApplicationEvent) -> Result<()> {
        self.upgrade()?.publish_event(event)
    }

    fn publish_payload<T: Send + Sync + 'static>(&self, value: T) -> Result<()> {
        let context = self.upgrade()?;
        let event = ApplicationEvent::from_payload(context.id(), value);
        context.publish_event(event)
    }
}

/// Message lookup handle injected into components as a resolvable dependency.
#[derive(Clone)]
pub struct MessageResolver {
    context: Weak<dyn ContextParent>,
    id: String,
}

impl MessageResolver {
    pub(crate) fn new(context: Weak<dyn ContextParent>, id: &str) -> Self {
        Self {
            context,
            id: id.to_string(),
        }
    }

    fn source(&self) -> Result<Arc<dyn MessageSource>> {
        let context = self.context.upgrade().ok_or_else(|| ContextError::AlreadyClosed {
            context: self.id.clone(),
        })?;
        context
            .message_source()
            .ok_or_else(|| ContextError::MessageSourceNotInitialized {
                context: self.id.clone(),
            })
    }

    /// # Errors
    /// `NoSuchMessage` when no source in the chain knows `code`.
    pub fn get_message(&self, code: &str, args: &[&str], locale: &str) -> Result<String> {
        self.find_message(code, args, locale)?
            .ok_or_else(|| ContextError::NoSuchMessage {
                code: code.to_string(),
                locale: locale.to_string(),
            })
    }

    pub fn get_message_or(&self, code: &str, args: &[&str], default: &str, locale: &str) -> Result<String> {
        Ok(self
            .find_message(code, args, locale)?
            .unwrap_or_else(|| crate::message::format_message(default, args)))
    }

    pub fn find_message(&self, code: &str, args: &[&str], locale: &str) -> Result<Option<String>> {
        Ok(self.source()?.resolve(code, args, locale))
    }
}

/// Resolves through whatever message source the parent has at lookup time.
pub(crate) struct ParentMessages(pub(crate) Arc<dyn ContextParent>);

impl MessageSource for ParentMessages {
    fn resolve(&self, code: &str, args: &[&str], locale: &str) -> Option<String> {
        self.0
            .message_source()
            .and_then(|source| source.resolve(code, args, locale))
    }
}
