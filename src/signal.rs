//! Ctrl+C handling.
//!
//! The binary installs one process-wide handler. On interrupt it raises the
//! shutdown flag and runs every registered hook; the CLI registers a hook
//! that cancels all active jobs, which then stop cooperatively at their
//! next checkpoint. A link action already past its undo entry always
//! finishes before the job unwinds.
//!
//! ```no_run
//! use dupelink::signal::install_handler;
//!
//! let handler = install_handler().unwrap();
//! handler.on_shutdown(|| eprintln!("stopping jobs"));
//! ```

use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

/// Exit code for an interrupted run.
pub const EXIT_CODE_INTERRUPTED: i32 = 130;

type Hook = Box<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct ShutdownInner {
    flag: AtomicBool,
    hooks: Mutex<Vec<Hook>>,
}

/// Shared shutdown flag with hooks run on interrupt.
#[derive(Clone, Default)]
pub struct ShutdownHandler {
    inner: Arc<ShutdownInner>,
}

impl fmt::Debug for ShutdownHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownHandler")
            .field("requested", &self.is_shutdown_requested())
            .finish_non_exhaustive()
    }
}

impl ShutdownHandler {
    /// Create a handler that is not hooked to any signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an interrupt was received.
    #[must_use]
    pub fn is_shutdown_requested(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    /// Raise the flag and run hooks. Hooks run only on the first request.
    pub fn request_shutdown(&self) {
        if self.inner.flag.swap(true, Ordering::SeqCst) {
            return;
        }
        let hooks = self.inner.hooks.lock().unwrap_or_else(PoisonError::into_inner);
        for hook in hooks.iter() {
            hook();
        }
    }

    /// Register a hook run on interrupt.
    pub fn on_shutdown(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.inner
            .hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(hook));
    }

    /// Lower the flag and drop all hooks.
    pub fn reset(&self) {
        self.inner.flag.store(false, Ordering::SeqCst);
        self.inner
            .hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Errors from installing the handler.
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    /// The OS handler could not be registered.
    #[error("Failed to install signal handler: {0}")]
    InstallFailed(#[from] ctrlc::Error),
}

static GLOBAL_HANDLER: OnceLock<ShutdownHandler> = OnceLock::new();

/// Install the process-wide Ctrl+C handler, or return the existing one reset.
///
/// # Errors
///
/// Returns [`SignalError::InstallFailed`] if the OS handler cannot be set
/// and no handler was installed earlier.
pub fn install_handler() -> Result<ShutdownHandler, SignalError> {
    if let Some(handler) = GLOBAL_HANDLER.get() {
        handler.reset();
        return Ok(handler.clone());
    }

    let handler = ShutdownHandler::new();
    let hooked = handler.clone();
    ctrlc::set_handler(move || {
        let _ = writeln!(std::io::stderr(), "\nInterrupted. Stopping jobs...");
        let _ = std::io::stderr().flush();
        log::info!("Shutdown signal received");
        hooked.request_shutdown();
    })?;

    Ok(GLOBAL_HANDLER.get_or_init(|| handler).clone())
}
