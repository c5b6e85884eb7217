//! Process-wide shutdown hooks
//!
//! Subscriptions register a hook that releases their output file. The CLI runs
//! the hooks once when a termination signal arrives or the command ends.

use futures::StreamExt;
use once_cell::sync::Lazy;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook_tokio::Signals;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

type Hook = Box<dyn FnOnce() + Send>;

/// Run-once registry of teardown actions
#[derive(Default)]
pub struct ShutdownHooks {
    hooks: Mutex<Vec<Hook>>,
    fired: AtomicBool,
}

static SHUTDOWN_HOOKS: Lazy<Arc<ShutdownHooks>> = Lazy::new(|| Arc::new(ShutdownHooks::new()));

/// Get the global shutdown hook registry
pub fn shutdown_hooks() -> Arc<ShutdownHooks> {
    SHUTDOWN_HOOKS.clone()
}

impl ShutdownHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `hook`. After [`run`](Self::run) it executes immediately instead.
    pub fn register<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut hooks = self.hooks.lock().unwrap_or_else(PoisonError::into_inner);
        if self.fired.load(Ordering::SeqCst) {
            drop(hooks);
            debug!("Shutdown already ran, executing late hook now");
            hook();
            return;
        }
        hooks.push(Box::new(hook));
    }

    /// Execute every registered hook once. Returns how many ran; later calls run none.
    pub fn run(&self) -> usize {
        let hooks = {
            let mut hooks = self.hooks.lock().unwrap_or_else(PoisonError::into_inner);
            if self.fired.swap(true, Ordering::SeqCst) {
                return 0;
            }
            std::mem::take(&mut *hooks)
        };

        let count = hooks.len();
        for hook in hooks {
            hook();
        }
        debug!(count, "Shutdown hooks executed");
        count
    }

    pub fn has_run(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    pub fn pending(&self) -> usize {
        self.hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl std::fmt::Debug for ShutdownHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownHooks")
            .field("pending", &self.pending())
            .field("fired", &self.has_run())
            .finish()
    }
}

/// Wait for SIGINT or SIGTERM and return the signal number
pub async fn wait_for_termination() -> io::Result<i32> {
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    let handle = signals.handle();

    let signal = signals.next().await.unwrap_or(SIGTERM);
    handle.close();

    match signal {
        SIGINT => info!("Received SIGINT, shutting down"),
        _ => info!("Received SIGTERM, shutting down"),
    }
    Ok(signal)
}
