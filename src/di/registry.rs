use crate::di::ComponentDefinition;
use crate::error::Result;
use std::sync::Arc;

/// Mutable view of the definitions a factory holds.
///
/// Loaders and registry extensions see the factory through this trait only.
pub trait DefinitionRegistry: Send + Sync {
    /// Adds a definition.
    ///
    /// # Errors
    /// `DefinitionOverride` when the name is taken and overriding is disabled,
    /// `ConfigurationFrozen` once instantiation has begun.
    fn register_definition(&self, definition: ComponentDefinition) -> Result<()>;

    /// Removes a definition, dropping any cached instance of it.
    fn remove_definition(&self, name: &str) -> Result<()>;

    /// Edits a registered definition in place.
    fn modify_definition(
        &self,
        name: &str,
        edit: &mut dyn FnMut(&mut ComponentDefinition),
    ) -> Result<()>;

    fn definition(&self, name: &str) -> Option<Arc<ComponentDefinition>>;

    fn contains_definition(&self, name: &str) -> bool;

    /// Definition names in registration order.
    fn definition_names(&self) -> Vec<String>;

    fn definition_count(&self) -> usize {
        self.definition_names().len()
    }
}
