//! Default lifecycle processor
//!
//! Starts and stops the [`Lifecycle`] components of a factory, phase by phase.

use super::{Lifecycle, LifecycleError, LifecycleProcessor, Result};
use crate::di::{DefaultComponentFactory, WeakFactory};
use rayon::ThreadPool;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, warn};

type Phases = BTreeMap<i32, Vec<(String, Arc<dyn Lifecycle>)>>;

/// Manages lifecycle components for one context
///
/// Components are grouped by phase. Phases start in ascending order and stop
/// in descending order; the members of a phase run in parallel on a worker
/// pool and the next phase begins once the whole group has finished.
///
/// Start failures abort the remaining phases. Stop failures are logged and
/// every remaining component is still stopped.
pub struct DefaultLifecycleProcessor {
    factory: WeakFactory,
    pool: Arc<ThreadPool>,
    running: AtomicBool,
}

/// Builds the worker pool lifecycle phases run on.
pub fn lifecycle_pool(num_threads: usize) -> Result<Arc<ThreadPool>> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads.max(1))
        .thread_name(|i| format!("lifecycle-{i}"))
        .build()
        .map_err(|e| LifecycleError::pool_unavailable(e.to_string()))?;
    Ok(Arc::new(pool))
}

impl DefaultLifecycleProcessor {
    pub fn new(factory: &DefaultComponentFactory) -> Result<Self> {
        Self::with_threads(factory, num_cpus::get())
    }

    pub fn with_threads(factory: &DefaultComponentFactory, num_threads: usize) -> Result<Self> {
        Ok(Self::with_pool(factory, lifecycle_pool(num_threads)?))
    }

    /// A processor running its phases on an existing pool, so one pool can
    /// outlive many refreshes.
    pub fn with_pool(factory: &DefaultComponentFactory, pool: Arc<ThreadPool>) -> Self {
        Self {
            factory: factory.downgrade(),
            pool,
            running: AtomicBool::new(false),
        }
    }

    pub fn pool(&self) -> &Arc<ThreadPool> {
        &self.pool
    }

    /// Lifecycle singletons grouped by phase. With `instantiate` unset only
    /// already created singletons are considered.
    fn phases(&self, instantiate: bool) -> Result<Phases> {
        let mut phases = Phases::new();
        let Some(factory) = self.factory.upgrade() else {
            return Ok(phases);
        };
        for name in factory.names_where(|d| d.is_lifecycle() && d.is_singleton()) {
            if !instantiate && !factory.contains_singleton(&name) {
                continue;
            }
            let component = factory
                .capability(&name, |c| c.lifecycle.as_ref())
                .map_err(|e| LifecycleError::hook_failed(&name, 0, e.to_string()))?;
            if let Some(component) = component {
                phases
                    .entry(component.phase())
                    .or_default()
                    .push((name, component));
            }
        }
        Ok(phases)
    }

    fn start_phases(&self, auto_startup_only: bool) -> Result<()> {
        let phases = self.phases(true)?;
        for (phase, members) in phases {
            let members: Vec<_> = members
                .into_iter()
                .filter(|(_, c)| !auto_startup_only || c.is_auto_startup())
                .collect();
            if members.is_empty() {
                continue;
            }
            info!(phase, count = members.len(), "Starting lifecycle components");

            let results: Vec<Result<()>> = self.pool.install(|| {
                members
                    .par_iter()
                    .map(|(name, component)| {
                        if component.is_running() {
                            return Ok(());
                        }
                        debug!(component = %name, phase, "Starting");
                        component.start().map_err(|e| {
                            error!(component = %name, phase, error = %e, "Start failed");
                            LifecycleError::hook_failed(name, phase, e.to_string())
                        })
                    })
                    .collect()
            });
            results.into_iter().collect::<Result<Vec<()>>>()?;
        }
        Ok(())
    }

    fn stop_phases(&self) {
        let phases = match self.phases(false) {
            Ok(phases) => phases,
            Err(e) => {
                warn!(error = %e, "Could not collect lifecycle components to stop");
                return;
            }
        };
        for (phase, members) in phases.into_iter().rev() {
            let members: Vec<_> = members.into_iter().filter(|(_, c)| c.is_running()).collect();
            if members.is_empty() {
                continue;
            }
            info!(phase, count = members.len(), "Stopping lifecycle components");

            self.pool.install(|| {
                members.par_iter().for_each(|(name, component)| {
                    debug!(component = %name, phase, "Stopping");
                    if let Err(e) = component.stop() {
                        // Log error but continue with other components
                        let e = LifecycleError::stop_failed(name, phase, e.to_string());
                        warn!(error = %e, "Stop failed");
                    }
                });
            });
        }
    }
}

impl LifecycleProcessor for DefaultLifecycleProcessor {
    fn start(&self) -> Result<()> {
        self.start_phases(false)?;
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.stop_phases();
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn on_refresh(&self) -> Result<()> {
        self.start_phases(true)?;
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn on_close(&self) -> Result<()> {
        self.stop_phases();
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }
}
