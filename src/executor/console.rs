//! Undecorated output channel for received payloads

use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::warn;

/// Serialized line writer, stdout unless a test swaps in a buffer
#[derive(Clone)]
pub struct Console {
    out: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl Console {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    pub fn new<W: Write + Send + 'static>(writer: W) -> Self {
        Self {
            out: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    /// Write `text` and a newline, nothing else
    pub fn println(&self, text: &str) {
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = writeln!(out, "{text}").and_then(|()| out.flush()) {
            warn!("Writing to stdout failed: {}", e);
        }
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::stdout()
    }
}

impl std::fmt::Debug for Console {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Console").finish_non_exhaustive()
    }
}
