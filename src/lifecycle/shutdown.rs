//! Process shutdown hook
//!
//! One dispatcher thread per process owns the Ctrl+C and SIGTERM handlers.
//! A signal runs every registered hook and then exits with the conventional
//! status. When no hook is registered the process exits right away, as it
//! would without any handler installed.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{LazyLock, OnceLock, mpsc};
use tokio::signal;
use tracing::{debug, error, info};

type Callback = Box<dyn FnOnce() + Send>;

struct Registration {
    id: u64,
    name: String,
    callback: Callback,
}

static HOOKS: LazyLock<Mutex<Vec<Registration>>> = LazyLock::new(|| Mutex::new(Vec::new()));
static NEXT_ID: AtomicU64 = AtomicU64::new(1);
static DISPATCHER: OnceLock<Result<(), String>> = OnceLock::new();

/// The signal that asked the process to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// Ctrl+C or SIGINT
    Interrupt,
    /// SIGTERM
    Terminate,
}

impl ShutdownSignal {
    /// Exit status a shell reports for a process killed by this signal.
    pub fn exit_code(self) -> i32 {
        match self {
            ShutdownSignal::Interrupt => 130,
            ShutdownSignal::Terminate => 143,
        }
    }
}

/// A cancellable registration that runs a callback on Ctrl+C or SIGTERM.
///
/// The handlers are installed once, on a dispatcher thread with its own
/// single-threaded tokio runtime, so hooks work whether or not the caller is
/// inside a runtime. Registration returns only after the handlers are live.
///
/// After the hooks of a signal have run, the process exits with
/// [`ShutdownSignal::exit_code`]. A signal that arrives while no hook is
/// registered, including a second signal during a slow close, exits with the
/// same status immediately.
///
/// # Example
///
/// ```rust,ignore
/// use meshestra_context::lifecycle::ShutdownHook;
///
/// let hook = ShutdownHook::register("app", move || context.close())?;
/// // ... explicit close path:
/// hook.cancel();
/// ```
pub struct ShutdownHook {
    id: u64,
    cancelled: AtomicBool,
}

impl ShutdownHook {
    pub fn register<F>(name: &str, on_signal: F) -> std::io::Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        ensure_dispatcher()?;
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        HOOKS.lock().push(Registration {
            id,
            name: name.to_string(),
            callback: Box::new(on_signal),
        });
        Ok(Self {
            id,
            cancelled: AtomicBool::new(false),
        })
    }

    /// Removes the callback. Has no effect after the first call.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            HOOKS.lock().retain(|registration| registration.id != self.id);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn is_registered(&self) -> bool {
        HOOKS.lock().iter().any(|registration| registration.id == self.id)
    }
}

impl Drop for ShutdownHook {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn ensure_dispatcher() -> std::io::Result<()> {
    DISPATCHER
        .get_or_init(start_dispatcher)
        .clone()
        .map_err(std::io::Error::other)
}

fn start_dispatcher() -> Result<(), String> {
    let (ready_tx, ready_rx) = mpsc::channel();
    std::thread::Builder::new()
        .name("shutdown-dispatcher".to_string())
        .spawn(move || dispatch(ready_tx))
        .map_err(|e| e.to_string())?;
    ready_rx.recv().map_err(|e| e.to_string())?
}

fn dispatch(ready: mpsc::Sender<Result<(), String>>) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            let _ = ready.send(Err(format!("failed to start shutdown runtime: {e}")));
            return;
        }
    };

    runtime.block_on(async move {
        let mut listener = match SignalListener::install() {
            Ok(listener) => listener,
            Err(e) => {
                let _ = ready.send(Err(format!("failed to install signal handlers: {e}")));
                return;
            }
        };
        let _ = ready.send(Ok(()));

        loop {
            let received = listener.recv().await;
            let hooks = std::mem::take(&mut *HOOKS.lock());
            if hooks.is_empty() {
                info!(signal = ?received, "No shutdown hook registered, exiting");
                std::process::exit(received.exit_code());
            }

            info!(signal = ?received, hooks = hooks.len(), "Starting graceful shutdown...");
            let spawned = std::thread::Builder::new()
                .name("shutdown-hook".to_string())
                .spawn(move || {
                    for registration in hooks {
                        debug!(hook = %registration.name, "Running shutdown hook");
                        (registration.callback)();
                    }
                    std::process::exit(received.exit_code());
                });
            if let Err(e) = spawned {
                error!(error = %e, "Failed to run shutdown hooks");
                std::process::exit(received.exit_code());
            }
        }
    });
}

/// Ctrl+C and SIGTERM streams. Creating one installs the handlers.
struct SignalListener {
    #[cfg(unix)]
    interrupt: signal::unix::Signal,
    #[cfg(unix)]
    terminate: signal::unix::Signal,
    #[cfg(windows)]
    ctrl_c: signal::windows::CtrlC,
}

impl SignalListener {
    fn install() -> std::io::Result<Self> {
        #[cfg(unix)]
        {
            use signal::unix::{SignalKind, signal};
            Ok(Self {
                interrupt: signal(SignalKind::interrupt())?,
                terminate: signal(SignalKind::terminate())?,
            })
        }
        #[cfg(windows)]
        {
            Ok(Self {
                ctrl_c: signal::windows::ctrl_c()?,
            })
        }
    }

    async fn recv(&mut self) -> ShutdownSignal {
        #[cfg(unix)]
        {
            tokio::select! {
                Some(()) = self.interrupt.recv() => ShutdownSignal::Interrupt,
                Some(()) = self.terminate.recv() => ShutdownSignal::Terminate,
                else => std::future::pending().await,
            }
        }
        #[cfg(windows)]
        {
            match self.ctrl_c.recv().await {
                Some(()) => ShutdownSignal::Interrupt,
                None => std::future::pending().await,
            }
        }
    }
}

/// Create a future that completes when a shutdown signal is received
///
/// # Example
///
/// ```rust,ignore
/// use meshestra_context::lifecycle::shutdown_signal;
///
/// tokio::select! {
///     signal = shutdown_signal() => {
///         println!("Shutdown signal received: {signal:?}");
///     }
///     _ = server.serve() => {}
/// }
/// ```
pub async fn shutdown_signal() -> ShutdownSignal {
    match SignalListener::install() {
        Ok(mut listener) => {
            let received = listener.recv().await;
            info!(signal = ?received, "Received shutdown signal");
            received
        }
        Err(e) => {
            error!(error = %e, "Failed to install signal handlers");
            std::future::pending().await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_cancelled_hook_never_runs_callback() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let hook = ShutdownHook::register("test", move || flag.store(true, Ordering::SeqCst)).unwrap();

        assert!(!hook.is_cancelled());
        assert!(hook.is_registered());
        hook.cancel();
        hook.cancel();

        assert!(hook.is_cancelled());
        assert!(!hook.is_registered());
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_cancel_leaves_other_hooks_registered() {
        let first = ShutdownHook::register("first", || {}).unwrap();
        let second = ShutdownHook::register("second", || {}).unwrap();

        first.cancel();
        assert!(!first.is_registered());
        assert!(second.is_registered());

        drop(second);
        assert!(!HOOKS.lock().iter().any(|registration| registration.name == "second"));
    }

    #[test]
    fn test_exit_codes_follow_shell_convention() {
        assert_eq!(ShutdownSignal::Interrupt.exit_code(), 130);
        assert_eq!(ShutdownSignal::Terminate.exit_code(), 143);
    }
}
