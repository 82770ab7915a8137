use crate::lifecycle::LifecycleError;
use std::error::Error as StdError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ContextError>;

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("{context} has not been refreshed yet")]
    NotRefreshed { context: String },

    #[error("{context} has been closed already")]
    AlreadyClosed { context: String },

    #[error(
        "Component factory not initialized or already closed - call 'refresh' before accessing components"
    )]
    FactoryNotInitialized,

    #[error(
        "Event multicaster not initialized - call 'refresh' before multicasting events via {context}"
    )]
    MulticasterNotInitialized { context: String },

    #[error(
        "Lifecycle processor not initialized - call 'refresh' before invoking lifecycle methods via {context}"
    )]
    LifecycleNotInitialized { context: String },

    #[error("Message source not initialized - call 'refresh' before accessing messages via {context}")]
    MessageSourceNotInitialized { context: String },

    #[error("{strategy} does not support multiple refresh attempts: just call 'refresh' once")]
    RefreshNotSupported { strategy: String },

    #[error(
        "The following properties were declared as required but could not be resolved: {}",
        .keys.join(", ")
    )]
    MissingRequiredProperties { keys: Vec<String> },

    #[error("Could not resolve placeholder '{placeholder}' in value \"{value}\"")]
    UnresolvablePlaceholder { placeholder: String, value: String },

    #[error("Circular placeholder reference in value \"{value}\"")]
    CircularPlaceholder { value: String },

    #[error("Failed to convert property '{key}' to {target}: {message}")]
    PropertyConversion {
        key: String,
        target: String,
        message: String,
    },

    #[error("Failed to load component definitions: {source}")]
    DefinitionLoad {
        #[source]
        source: anyhow::Error,
    },

    #[error("No component named '{name}' is defined")]
    NoSuchDefinition { name: String },

    #[error("Cannot register definition '{name}': there is already a definition bound")]
    DefinitionOverride { name: String },

    #[error("Cannot register '{name}': there is already an instance bound")]
    SingletonExists { name: String },

    #[error("Cannot change definition '{name}': configuration is frozen")]
    ConfigurationFrozen { name: String },

    #[error("Circular dependency detected: {cycle}")]
    CircularDependency { cycle: String },

    #[error("No resolvable dependency of type '{type_name}'")]
    UnsatisfiedDependency { type_name: String },

    #[error("Error creating component '{name}': {source}")]
    Creation {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Component '{name}' is expected to be of type '{expected}' but was '{actual}'")]
    TypeMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("Extension '{name}' failed: {source}")]
    Extension {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Listener failed handling {event}: {source}")]
    Listener {
        event: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("No message found under code '{code}' for locale '{locale}'")]
    NoSuchMessage { code: String, locale: String },

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

impl ContextError {
    pub fn creation(name: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::Creation {
            name: name.into(),
            source: source.into(),
        }
    }

    pub fn extension(name: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::Extension {
            name: name.into(),
            source: source.into(),
        }
    }

    pub fn circular(cycle: impl Into<String>) -> Self {
        Self::CircularDependency {
            cycle: cycle.into(),
        }
    }

    /// True for `NotRefreshed` and `AlreadyClosed`.
    pub fn is_state_error(&self) -> bool {
        matches!(self, Self::NotRefreshed { .. } | Self::AlreadyClosed { .. })
    }

    /// Walks the source chain looking for a circular-dependency error.
    ///
    /// Construction failures are wrapped once per component on the resolution
    /// path, so the cycle itself is usually a few levels down.
    pub fn is_circular_dependency(&self) -> bool {
        self.causes()
            .any(|e| matches!(e, ContextError::CircularDependency { .. }))
    }

    /// Iterates this error and every `ContextError` found in its source chain.
    pub fn causes(&self) -> impl Iterator<Item = &ContextError> {
        std::iter::successors(Some(self as &(dyn StdError + 'static)), |&e| e.source())
            .filter_map(|e| e.downcast_ref::<ContextError>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circular_dependency_found_through_creation_chain() {
        let inner = ContextError::circular("p -> q -> p");
        let middle = ContextError::creation("q", inner);
        let outer = ContextError::creation("p", middle);

        assert!(outer.is_circular_dependency());
        assert_eq!(outer.causes().count(), 3);
    }

    #[test]
    fn test_state_errors_are_distinguished() {
        let never = ContextError::NotRefreshed {
            context: "ctx".into(),
        };
        let closed = ContextError::AlreadyClosed {
            context: "ctx".into(),
        };
        assert!(never.is_state_error());
        assert!(closed.is_state_error());
        assert_eq!(never.to_string(), "ctx has not been refreshed yet");
        assert_eq!(closed.to_string(), "ctx has been closed already");
    }

    #[test]
    fn test_missing_properties_lists_every_key() {
        let err = ContextError::MissingRequiredProperties {
            keys: vec!["db.url".into(), "db.user".into()],
        };
        assert!(err.to_string().ends_with("db.url, db.user"));
    }
}
