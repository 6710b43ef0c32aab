//! Making sure the watchdog window is flushed however the process ends.
//!
//! Every route below ends in [`Watchdog::flush`], which only acts once, so
//! it's safe to use several of them together:
//!
//! - [`SharedWatchdog::guard`]: flush when the guard is dropped, including
//!   while unwinding.
//! - [`SharedWatchdog::install_exit_hooks`]: a panic hook and, on unix, an
//!   `atexit` callback that also runs on `std::process::exit`.
//! - [`SharedWatchdog::flush_on_shutdown`]: flush on ctrl-c or, on unix,
//!   SIGTERM.

use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::{Mutex, MutexGuard};
use tokio::select;
use tokio::signal::ctrl_c;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::watchdog::{FlushOutcome, Watchdog};

static EXIT_WATCHDOG: OnceCell<SharedWatchdog> = OnceCell::new();

/// A [`Watchdog`] shared between the query path and the exit hooks.
#[derive(Debug, Clone)]
pub struct SharedWatchdog {
    inner: Arc<Mutex<Watchdog>>,
}

impl SharedWatchdog {
    pub fn new(watchdog: Watchdog) -> Self {
        Self {
            inner: Arc::new(Mutex::new(watchdog)),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, Watchdog> {
        self.inner.lock()
    }

    pub fn init(&self) -> bool {
        self.inner.lock().init()
    }

    pub fn observe(&self, sql: &str) {
        self.inner.lock().observe(sql);
    }

    pub fn query_count(&self) -> usize {
        self.inner.lock().query_count()
    }

    pub fn flush(&self) -> Result<FlushOutcome> {
        self.inner.lock().flush()
    }

    /// Flush when the returned guard goes out of scope.
    #[must_use = "the window is flushed when the guard is dropped"]
    pub fn guard(&self) -> FlushGuard {
        FlushGuard {
            watchdog: self.clone(),
        }
    }

    /// Register this watchdog to be flushed on panic and at process exit.
    ///
    /// Only one watchdog per process can be registered; returns `false` if
    /// one already was.
    pub fn install_exit_hooks(&self) -> bool {
        if EXIT_WATCHDOG.set(self.clone()).is_err() {
            return false;
        }

        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            flush_registered("panic");
            previous(info);
        }));

        register_at_exit();
        true
    }

    /// Wait for ctrl-c or SIGTERM, then flush.
    ///
    /// Needs a tokio runtime with signal handling enabled.
    pub async fn flush_on_shutdown(self) -> Result<FlushOutcome> {
        let mut terminate = Terminate::new().map_err(Error::Signal)?;

        select! {
            interrupted = ctrl_c() => {
                interrupted.map_err(Error::Signal)?;
                debug!("interrupted, flushing performance watchdog");
            }

            _ = terminate.recv() => {
                debug!("terminated, flushing performance watchdog");
            }
        }

        self.flush()
    }
}

/// SIGTERM listener; never fires where there's no such signal.
struct Terminate {
    #[cfg(unix)]
    sig: tokio::signal::unix::Signal,
}

impl Terminate {
    #[cfg(unix)]
    fn new() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            sig: signal(SignalKind::terminate())?,
        })
    }

    #[cfg(not(unix))]
    fn new() -> std::io::Result<Self> {
        Ok(Self {})
    }

    async fn recv(&mut self) {
        #[cfg(unix)]
        self.sig.recv().await;

        #[cfg(not(unix))]
        std::future::pending::<()>().await;
    }
}

/// Flushes its watchdog on drop.
#[derive(Debug)]
pub struct FlushGuard {
    watchdog: SharedWatchdog,
}

impl Drop for FlushGuard {
    fn drop(&mut self) {
        if let Err(err) = self.watchdog.flush() {
            warn!(error = %err, "performance watchdog flush failed");
        }
    }
}

fn flush_registered(trigger: &str) {
    let Some(watchdog) = EXIT_WATCHDOG.get() else {
        return;
    };

    // Held already means we're inside the query path; the guard or the
    // holder will flush instead.
    let Some(mut watchdog) = watchdog.inner.try_lock() else {
        return;
    };

    if let Err(err) = watchdog.flush() {
        warn!(trigger, error = %err, "performance watchdog flush failed");
    }
}

#[cfg(unix)]
extern "C" fn flush_at_exit() {
    let _ = std::panic::catch_unwind(|| flush_registered("exit"));
}

#[cfg(unix)]
fn register_at_exit() {
    // SAFETY: `flush_at_exit` takes no arguments and never unwinds.
    let registered = unsafe { libc::atexit(flush_at_exit) };
    if registered != 0 {
        warn!("couldn't register the watchdog exit hook");
    }
}

#[cfg(not(unix))]
fn register_at_exit() {}
