//! Lifecycle-specific error types

use thiserror::Error;

/// Errors raised while starting or stopping lifecycle components
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// A component failed to start
    #[error("Failed to start component '{component}' in phase {phase}: {message}")]
    HookFailed {
        /// Name of the component that failed
        component: String,
        phase: i32,
        message: String,
    },

    /// A component failed to stop
    #[error("Failed to stop component '{component}' in phase {phase}: {message}")]
    StopFailed {
        component: String,
        phase: i32,
        message: String,
    },

    /// The worker pool for a phase could not be built
    #[error("Lifecycle worker pool unavailable: {0}")]
    PoolUnavailable(String),

    /// The shutdown hook thread could not be started
    #[error("Failed to register shutdown hook: {0}")]
    ShutdownHook(#[from] std::io::Error),
}

impl LifecycleError {
    /// Create a start failure error
    pub fn hook_failed(component: impl Into<String>, phase: i32, message: impl Into<String>) -> Self {
        Self::HookFailed {
            component: component.into(),
            phase,
            message: message.into(),
        }
    }

    /// Create a stop failure error
    pub fn stop_failed(component: impl Into<String>, phase: i32, message: impl Into<String>) -> Self {
        Self::StopFailed {
            component: component.into(),
            phase,
            message: message.into(),
        }
    }

    pub fn pool_unavailable(message: impl Into<String>) -> Self {
        Self::PoolUnavailable(message.into())
    }
}

/// A specialized Result type for lifecycle operations
pub type Result<T> = std::result::Result<T, LifecycleError>;
