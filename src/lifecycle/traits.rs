//! Lifecycle traits
//!
//! These traits define the contract for components that are started after
//! the context is refreshed and stopped before it closes.

use super::Result;

/// A component with an explicit running state.
///
/// Components are started in ascending [`phase`](Lifecycle::phase) order and
/// stopped in descending order. Components sharing a phase start and stop
/// concurrently.
///
/// # Example
///
/// ```rust,ignore
/// use meshestra_context::lifecycle::{Lifecycle, Result};
/// use std::sync::atomic::{AtomicBool, Ordering};
///
/// struct Poller {
///     running: AtomicBool,
/// }
///
/// impl Lifecycle for Poller {
///     fn start(&self) -> Result<()> {
///         self.running.store(true, Ordering::SeqCst);
///         Ok(())
///     }
///
///     fn stop(&self) -> Result<()> {
///         self.running.store(false, Ordering::SeqCst);
///         Ok(())
///     }
///
///     fn is_running(&self) -> bool {
///         self.running.load(Ordering::SeqCst)
///     }
///
///     fn phase(&self) -> i32 {
///         10
///     }
/// }
/// ```
pub trait Lifecycle: Send + Sync {
    fn start(&self) -> Result<()>;

    fn stop(&self) -> Result<()>;

    fn is_running(&self) -> bool;

    fn phase(&self) -> i32 {
        0
    }

    /// Whether the component is started when its context is refreshed,
    /// rather than only on an explicit `start()`.
    fn is_auto_startup(&self) -> bool {
        true
    }
}

/// Drives the [`Lifecycle`] components of a context.
pub trait LifecycleProcessor: Send + Sync {
    /// Starts every lifecycle component that is not running yet.
    fn start(&self) -> Result<()>;

    /// Stops every running lifecycle component.
    fn stop(&self) -> Result<()>;

    fn is_running(&self) -> bool;

    /// Called once the context finished refreshing. Starts auto-startup
    /// components only.
    fn on_refresh(&self) -> Result<()>;

    /// Called while the context closes.
    fn on_close(&self) -> Result<()>;
}
