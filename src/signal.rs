//! Ctrl+C handling.
//!
//! One [`Shutdown`] owns the `Arc<AtomicBool>` that every scanner, planner
//! and comparator receives through `with_shutdown_flag`. Workers check it
//! between files; the planner also checks it between archives. Nothing is
//! killed mid-write: the fingerprint cache flushes whole batches only, and
//! the binary exits with code 130 once the current step returns.
//!
//! ```rust,no_run
//! use takeout_dedupe::signal::install_handler;
//!
//! let shutdown = install_handler()?;
//! let flag = shutdown.flag();
//! // pass `flag` to DirectoryScanner::with_shutdown_flag, ...
//! if shutdown.is_requested() {
//!     return Ok(());
//! }
//! # Ok::<(), takeout_dedupe::signal::SignalError>(())
//! ```

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

/// Shared shutdown flag.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    flag: Arc<AtomicBool>,
}

impl Shutdown {
    /// A flag with no hook attached.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Request shutdown by hand.
    pub fn request(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Clear a previous request.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    /// The flag to hand to workers.
    #[must_use]
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }
}

/// Failure installing the Ctrl+C hook.
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    /// `ctrlc` refused the handler.
    #[error("Failed to install signal handler: {0}")]
    InstallFailed(#[from] ctrlc::Error),
}

static INSTALLED: OnceLock<Shutdown> = OnceLock::new();

/// Install the Ctrl+C hook once per process and return its flag.
///
/// Later calls return the same flag, reset to `false`. If another hook is
/// already registered (as happens when tests drive several runs in one
/// process), an unhooked flag is returned instead of failing.
///
/// # Errors
///
/// Currently always succeeds; the `Result` leaves room for platforms where
/// a missing hook should be fatal.
pub fn install_handler() -> Result<Shutdown, SignalError> {
    if let Some(existing) = INSTALLED.get() {
        existing.reset();
        return Ok(existing.clone());
    }

    let shutdown = Shutdown::new();
    let flag = shutdown.flag();
    let hooked = ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
        let mut stderr = std::io::stderr();
        let _ = writeln!(stderr, "\nInterrupted, finishing current step...");
        let _ = stderr.flush();
        log::info!("Shutdown requested");
    });

    if let Err(e) = hooked {
        log::debug!("Ctrl+C hook unavailable ({}), using unhooked flag", e);
    }
    Ok(INSTALLED.get_or_init(|| shutdown).clone())
}
