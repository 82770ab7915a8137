mod definition;
mod factory;
mod registry;
mod resolution;

pub use definition::{Bean, ComponentDefinition, Precedence, Role, Scope, sort_by_precedence};
pub(crate) use definition::{Capabilities, Caster};
pub use factory::{ConversionService, DefaultComponentFactory, ValueResolver, WeakFactory};
pub use registry::DefinitionRegistry;
pub use resolution::{LazyRef, Resolution};
