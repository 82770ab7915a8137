//! # Meshestra Context
//!
//! The lifecycle core of Meshestra's dependency injection: a component
//! registry, an object store that resolves references on demand, and an
//! application context that drives both through refresh and close.
//!
//! ## Features
//!
//! - **Refresh/close state machine**: ordered refresh steps with rollback on failure
//! - **Extension pipeline**: registry and factory extensions run before any component exists
//! - **Construction interceptors**: hooks around every component's initialization
//! - **Events**: synchronous multicasting with early-event buffering and parent propagation
//! - **Lifecycle phases**: components started in ascending phase order, stopped in reverse
//! - **Circular references**: singleton cycles broken through early references
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use meshestra_context::prelude::*;
//!
//! struct Database {
//!     url: String,
//! }
//!
//! struct UserService {
//!     database: Arc<Database>,
//! }
//!
//! fn main() -> Result<()> {
//!     let context = ContextBuilder::generic().id("app").build();
//!
//!     context.register_definition(ComponentDefinition::new("database", |_| {
//!         Ok(Database { url: "postgres://localhost".to_string() })
//!     }))?;
//!     context.register_definition(ComponentDefinition::new("userService", |r: &Resolution| {
//!         Ok(UserService { database: r.get::<Database>("database")? })
//!     }))?;
//!
//!     context.refresh()?;
//!     let users = context.get::<UserService>("userService")?;
//!     println!("{}", users.database.url);
//!
//!     context.close();
//!     Ok(())
//! }
//! ```

pub mod caches;
pub mod context;
pub mod di;
pub mod environment;
pub mod error;
pub mod event;
pub mod extension;
pub mod interceptor;
pub mod lifecycle;
pub mod loader;
pub mod message;
pub mod strategy;

// Re-export core types
pub use context::{ApplicationContext, ContextBuilder, ContextConfig, GenericContext, RefreshableContext};
pub use di::{ComponentDefinition, DefaultComponentFactory, DefinitionRegistry, Resolution};
pub use error::{ContextError, Result};

/// Prelude module for convenient imports
///
/// ```
/// use meshestra_context::prelude::*;
/// ```
pub mod prelude {
    pub use crate::context::{
        ApplicationContext, ContextBuilder, ContextConfig, ContextParent, EventPublisher, GenericContext,
        MessageResolver, Publisher, RefreshableContext,
    };
    pub use crate::di::{
        Bean, ComponentDefinition, DefaultComponentFactory, DefinitionRegistry, LazyRef, Precedence, Resolution,
        Role, Scope,
    };
    pub use crate::environment::{Environment, MapPropertySource, PropertySource};
    pub use crate::error::{ContextError, Result};
    pub use crate::event::{
        ApplicationEvent, ApplicationListener, EventKind, EventMulticaster, EventPayload, FnListener,
        PayloadListener, SimpleEventMulticaster,
    };
    pub use crate::extension::{FactoryExtension, RegistryExtension};
    pub use crate::interceptor::ConstructionInterceptor;
    pub use crate::lifecycle::{Lifecycle, LifecycleError, LifecycleProcessor};
    pub use crate::loader::{ConfigDefinitionLoader, DefinitionLoader, TypeCatalog};
    pub use crate::message::{MessageSource, StaticMessageSource};
    pub use crate::strategy::{FactoryStrategy, GenericFactoryStrategy, RefreshableFactoryStrategy};
    pub use std::sync::Arc;
}
