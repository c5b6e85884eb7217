//! Append-only output file for received messages
//!
//! One sink per subscription. Writers and the shutdown hook share it through an
//! `Arc`; the mutex makes `append + flush` the unit of mutation, so a close
//! waits for an in-flight write and later writes become no-ops.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

enum SinkState {
    Open(File),
    Closed,
    /// An I/O error disabled the sink for the rest of the process
    Failed,
}

pub struct FileSink {
    path: PathBuf,
    state: Mutex<SinkState>,
}

impl FileSink {
    /// Open `path` for appending, creating it and its parent directories
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        debug!(path = %path.display(), "Opened output file");

        Ok(Self {
            path: path.to_path_buf(),
            state: Mutex::new(SinkState::Open(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn state(&self) -> MutexGuard<'_, SinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_open(&self) -> bool {
        matches!(*self.state(), SinkState::Open(_))
    }

    /// Append `line` plus a newline and flush. Returns whether the line was written.
    ///
    /// The first I/O error is logged and disables the sink.
    pub fn append_line(&self, line: &str) -> bool {
        let mut state = self.state();
        let SinkState::Open(file) = &mut *state else {
            return false;
        };

        let mut record = String::with_capacity(line.len() + 1);
        record.push_str(line);
        record.push('\n');

        match file.write_all(record.as_bytes()).and_then(|()| file.flush()) {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    "Writing to output file failed, no further messages will be written to it: {}",
                    e
                );
                *state = SinkState::Failed;
                false
            }
        }
    }

    /// Flush and release the file. Safe to call any number of times.
    pub fn close(&self) {
        let mut state = self.state();
        if let SinkState::Open(file) = &mut *state {
            if let Err(e) = file.flush() {
                warn!(path = %self.path.display(), "Flushing output file on close failed: {}", e);
            }
            debug!(path = %self.path.display(), "Closed output file");
            *state = SinkState::Closed;
        }
    }
}

impl std::fmt::Debug for FileSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSink")
            .field("path", &self.path)
            .field("open", &self.is_open())
            .finish()
    }
}
