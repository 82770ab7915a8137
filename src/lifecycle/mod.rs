//! Lifecycle Module
//!
//! Starting and stopping of long-running components, plus the process
//! shutdown hook.
//!
//! # Phases
//!
//! ```text
//! refresh() finished
//!    ↓
//! on_refresh: start auto-startup components, lowest phase first
//!    ↓
//! [Running...]        start()/stop() may be called explicitly
//!    ↓
//! close() or shutdown signal
//!    ↓
//! on_close: stop running components, highest phase first
//!    ↓
//! singletons destroyed
//! ```

mod error;
mod processor;
mod shutdown;
mod traits;

pub use error::{LifecycleError, Result};
pub use processor::{DefaultLifecycleProcessor, lifecycle_pool};
pub use shutdown::{ShutdownHook, ShutdownSignal, shutdown_signal};
pub use traits::{Lifecycle, LifecycleProcessor};
