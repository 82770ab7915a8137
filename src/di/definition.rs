use crate::di::Resolution;
use crate::event::ApplicationListener;
use crate::extension::{FactoryExtension, RegistryExtension};
use crate::interceptor::ConstructionInterceptor;
use crate::lifecycle::Lifecycle;
use serde::Deserialize;
use std::any::{Any, TypeId};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use strum_macros::{Display, EnumString};

/// A managed instance, type-erased.
pub type Bean = Arc<dyn Any + Send + Sync>;

pub(crate) type InstantiateFn = Arc<dyn Fn(&Resolution) -> anyhow::Result<Bean> + Send + Sync>;
pub(crate) type CallbackFn = Arc<dyn Fn(&Bean, &Resolution) -> anyhow::Result<()> + Send + Sync>;
pub(crate) type DestroyFn = Arc<dyn Fn(&Bean) -> anyhow::Result<()> + Send + Sync>;

/// Views a bean as a trait object, if the bean still has the declared type.
pub(crate) type Caster<T> = Arc<dyn Fn(&Bean) -> Option<Arc<T>> + Send + Sync>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display, EnumString, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// One shared instance per container.
    #[default]
    Singleton,
    /// A new instance per lookup.
    Prototype,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    #[default]
    Application,
    /// Container plumbing; construction interceptors are not applied to it.
    Infrastructure,
}

/// Ordering key for extensions and interceptors.
///
/// Every `Priority` sorts before every `Order`, which sorts before `Unordered`.
/// Within a tier lower values come first. Sorting is stable, so equal keys keep
/// registration order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Precedence {
    Priority(i32),
    Order(i32),
    #[default]
    Unordered,
}

impl Precedence {
    fn key(self) -> (u8, i32) {
        match self {
            Precedence::Priority(n) => (0, n),
            Precedence::Order(n) => (1, n),
            Precedence::Unordered => (2, 0),
        }
    }

    pub fn is_priority(self) -> bool {
        matches!(self, Precedence::Priority(_))
    }

    pub fn is_unordered(self) -> bool {
        matches!(self, Precedence::Unordered)
    }
}

impl Ord for Precedence {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl PartialOrd for Precedence {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Stable sort by precedence.
pub fn sort_by_precedence<T>(items: &mut [(Precedence, T)]) {
    items.sort_by_key(|(precedence, _)| *precedence);
}

#[derive(Clone, Default)]
pub(crate) struct Capabilities {
    pub(crate) listener: Option<Caster<dyn ApplicationListener>>,
    pub(crate) lifecycle: Option<Caster<dyn Lifecycle>>,
    pub(crate) registry_extension: Option<Caster<dyn RegistryExtension>>,
    pub(crate) factory_extension: Option<Caster<dyn FactoryExtension>>,
    pub(crate) interceptor: Option<Caster<dyn ConstructionInterceptor>>,
}

impl Capabilities {
    pub(crate) fn any(&self) -> bool {
        self.listener.is_some()
            || self.lifecycle.is_some()
            || self.registry_extension.is_some()
            || self.factory_extension.is_some()
            || self.interceptor.is_some()
    }
}

fn caster<T, U, F>(cast: F) -> Caster<U>
where
    T: Send + Sync + 'static,
    U: ?Sized + 'static,
    F: Fn(Arc<T>) -> Arc<U> + Send + Sync + 'static,
{
    Arc::new(move |bean: &Bean| Arc::clone(bean).downcast::<T>().ok().map(|typed| cast(typed)))
}

/// Declarative description of one managed component.
///
/// Construction happens in two steps: `instantiate` allocates the instance and
/// may resolve the dependencies it needs up front, `populate` (optional) wires
/// further references into the already allocated instance. A component that is
/// still being populated can be handed out to a cycle partner, see
/// [`DefaultComponentFactory`](crate::di::DefaultComponentFactory).
///
/// # Example
///
/// ```rust,ignore
/// let repo = ComponentDefinition::new("userRepository", |_| Ok(UserRepository::default()));
/// let service = ComponentDefinition::new("userService", |r| {
///     Ok(UserService::new(r.get::<UserRepository>("userRepository")?))
/// })
/// .lazy();
/// ```
#[derive(Clone)]
pub struct ComponentDefinition {
    name: String,
    type_id: TypeId,
    type_name: &'static str,
    scope: Scope,
    lazy_init: bool,
    depends_on: Vec<String>,
    role: Role,
    precedence: Precedence,
    instantiate_early: bool,
    instantiate: InstantiateFn,
    populate: Option<CallbackFn>,
    init: Option<CallbackFn>,
    destroy: Option<DestroyFn>,
    pub(crate) capabilities: Capabilities,
}

impl ComponentDefinition {
    pub fn new<T, F>(name: impl Into<String>, factory: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Resolution) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            scope: Scope::Singleton,
            lazy_init: false,
            depends_on: Vec::new(),
            role: Role::Application,
            precedence: Precedence::Unordered,
            instantiate_early: false,
            instantiate: Arc::new(move |resolution: &Resolution| Ok(Arc::new(factory(resolution)?) as Bean)),
            populate: None,
            init: None,
            destroy: None,
            capabilities: Capabilities::default(),
        }
    }

    /// A singleton wrapping an already built value. Each lookup shares the value.
    pub fn instance<T>(name: impl Into<String>, value: T) -> Self
    where
        T: Clone + Send + Sync + 'static,
    {
        Self::new(name, move |_| Ok(value.clone()))
    }

    /// Registers a property-injection step that runs after instantiation.
    pub fn populate<T, F>(mut self, populate: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&T, &Resolution) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.populate = Some(typed_callback(populate));
        self
    }

    /// Registers an init callback, run between the before- and after-init interceptors.
    pub fn on_init<T, F>(mut self, init: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&T, &Resolution) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.init = Some(typed_callback(init));
        self
    }

    /// Registers a destruction callback for singletons.
    pub fn on_destroy<T, F>(mut self, destroy: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.destroy = Some(Arc::new(move |bean: &Bean| match bean.downcast_ref::<T>() {
            Some(typed) => destroy(typed),
            None => Ok(()),
        }));
        self
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn prototype(self) -> Self {
        self.scope(Scope::Prototype)
    }

    pub fn lazy(mut self) -> Self {
        self.lazy_init = true;
        self
    }

    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.depends_on.push(name.into());
        self
    }

    pub fn role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn precedence(mut self, precedence: Precedence) -> Self {
        self.precedence = precedence;
        self
    }

    /// Instantiates this component before every other non-lazy singleton.
    pub fn instantiate_early(mut self) -> Self {
        self.instantiate_early = true;
        self
    }

    pub fn as_listener<T, F>(mut self, cast: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(Arc<T>) -> Arc<dyn ApplicationListener> + Send + Sync + 'static,
    {
        self.capabilities.listener = Some(caster(cast));
        self
    }

    pub fn as_lifecycle<T, F>(mut self, cast: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(Arc<T>) -> Arc<dyn Lifecycle> + Send + Sync + 'static,
    {
        self.capabilities.lifecycle = Some(caster(cast));
        self
    }

    /// Marks the component as a registry extension. Extensions are plumbing, so
    /// the role becomes [`Role::Infrastructure`].
    pub fn as_registry_extension<T, F>(mut self, cast: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(Arc<T>) -> Arc<dyn RegistryExtension> + Send + Sync + 'static,
    {
        self.capabilities.registry_extension = Some(caster(cast));
        self.role = Role::Infrastructure;
        self
    }

    pub fn as_factory_extension<T, F>(mut self, cast: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(Arc<T>) -> Arc<dyn FactoryExtension> + Send + Sync + 'static,
    {
        self.capabilities.factory_extension = Some(caster(cast));
        self.role = Role::Infrastructure;
        self
    }

    pub fn as_interceptor<T, F>(mut self, cast: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(Arc<T>) -> Arc<dyn ConstructionInterceptor> + Send + Sync + 'static,
    {
        self.capabilities.interceptor = Some(caster(cast));
        self.role = Role::Infrastructure;
        self
    }

    pub fn set_scope(&mut self, scope: Scope) {
        self.scope = scope;
    }

    pub fn set_lazy_init(&mut self, lazy: bool) {
        self.lazy_init = lazy;
    }

    pub fn set_depends_on(&mut self, names: Vec<String>) {
        self.depends_on = names;
    }

    pub fn set_precedence(&mut self, precedence: Precedence) {
        self.precedence = precedence;
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn scope_kind(&self) -> Scope {
        self.scope
    }

    pub fn is_singleton(&self) -> bool {
        self.scope == Scope::Singleton
    }

    pub fn is_prototype(&self) -> bool {
        self.scope == Scope::Prototype
    }

    pub fn is_lazy_init(&self) -> bool {
        self.lazy_init
    }

    pub fn dependencies(&self) -> &[String] {
        &self.depends_on
    }

    pub fn role_kind(&self) -> Role {
        self.role
    }

    pub fn ordering(&self) -> Precedence {
        self.precedence
    }

    pub fn is_instantiated_early(&self) -> bool {
        self.instantiate_early
    }

    pub fn is_listener(&self) -> bool {
        self.capabilities.listener.is_some()
    }

    pub fn is_lifecycle(&self) -> bool {
        self.capabilities.lifecycle.is_some()
    }

    pub fn is_registry_extension(&self) -> bool {
        self.capabilities.registry_extension.is_some()
    }

    pub fn is_factory_extension(&self) -> bool {
        self.capabilities.factory_extension.is_some()
    }

    pub fn is_interceptor(&self) -> bool {
        self.capabilities.interceptor.is_some()
    }

    pub fn has_destroy_callback(&self) -> bool {
        self.destroy.is_some()
    }

    pub(crate) fn instantiate(&self, resolution: &Resolution) -> anyhow::Result<Bean> {
        (self.instantiate)(resolution)
    }

    pub(crate) fn run_populate(&self, bean: &Bean, resolution: &Resolution) -> anyhow::Result<()> {
        match &self.populate {
            Some(populate) => populate(bean, resolution),
            None => Ok(()),
        }
    }

    pub(crate) fn run_init(&self, bean: &Bean, resolution: &Resolution) -> anyhow::Result<()> {
        match &self.init {
            Some(init) => init(bean, resolution),
            None => Ok(()),
        }
    }

    pub(crate) fn destroyer(&self) -> Option<DestroyFn> {
        self.destroy.clone()
    }
}

fn typed_callback<T, F>(callback: F) -> CallbackFn
where
    T: Send + Sync + 'static,
    F: Fn(&T, &Resolution) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(move |bean: &Bean, resolution: &Resolution| {
        match bean.downcast_ref::<T>() {
            Some(typed) => callback(typed, resolution),
            None => Err(anyhow::anyhow!(
                "component '{}' is not a {}",
                resolution.name(),
                std::any::type_name::<T>()
            )),
        }
    })
}

impl fmt::Debug for ComponentDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentDefinition")
            .field("name", &self.name)
            .field("type", &self.type_name)
            .field("scope", &self.scope)
            .field("lazy_init", &self.lazy_init)
            .field("depends_on", &self.depends_on)
            .field("role", &self.role)
            .field("precedence", &self.precedence)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_precedence_tiers() {
        let mut items = vec![
            (Precedence::Unordered, "d"),
            (Precedence::Order(5), "c"),
            (Precedence::Priority(1), "b"),
            (Precedence::Unordered, "e"),
            (Precedence::Priority(0), "a"),
            (Precedence::Order(-10), "c0"),
        ];
        sort_by_precedence(&mut items);
        let names: Vec<_> = items.iter().map(|(_, n)| *n).collect();
        assert_eq!(names, vec!["a", "b", "c0", "c", "d", "e"]);
        assert!(Precedence::Priority(100) < Precedence::Order(-100));
    }

    #[test]
    fn test_scope_strings() {
        assert_eq!(Scope::Singleton.to_string(), "singleton");
        assert_eq!(Scope::from_str("prototype").unwrap(), Scope::Prototype);
        assert!(Scope::from_str("request").is_err());
    }

    #[test]
    fn test_extension_capability_marks_infrastructure() {
        struct Noop;
        impl FactoryExtension for Noop {
            fn process_factory(&self, _: &crate::di::DefaultComponentFactory) -> anyhow::Result<()> {
                Ok(())
            }
        }

        let definition = ComponentDefinition::new("noop", |_| Ok(Noop))
            .as_factory_extension(|n: Arc<Noop>| n as Arc<dyn FactoryExtension>);
        assert!(definition.is_factory_extension());
        assert_eq!(definition.role_kind(), Role::Infrastructure);
        assert_eq!(definition.type_id(), TypeId::of::<Noop>());
    }
}
