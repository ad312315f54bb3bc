//! Console log output mirrored into `<OUT_PREFIX>.log`.
//!
//! The logger starts before the output prefix is known, so records are held
//! in memory until [`LogMirror::attach`] names the file.

use anyhow::{anyhow, Result};
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct MirrorState {
    pending: Vec<u8>,
    file: Option<File>,
}

/// `env_logger` pipe target writing every record to stderr and to the log file.
#[derive(Clone, Default)]
pub struct LogMirror {
    state: Arc<Mutex<MirrorState>>,
}

/// Log file that belongs to an output prefix.
pub fn log_path_for(out_prefix: &str) -> PathBuf {
    PathBuf::from(format!("{}.log", out_prefix))
}

impl LogMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates `path` and starts copying records into it, beginning with the
    /// ones logged so far.
    pub fn attach(&self, path: &Path) -> Result<()> {
        let mut file = File::create(path)
            .map_err(|e| anyhow!("Failed to create log file {}: {}", path.display(), e))?;
        let mut guard = self.lock();
        let state = &mut *guard;
        file.write_all(&state.pending)
            .map_err(|e| anyhow!("Failed to write log file {}: {}", path.display(), e))?;
        state.pending = Vec::new();
        state.file = Some(file);
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, MirrorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Write for LogMirror {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        let mut guard = self.lock();
        let state = &mut *guard;
        match state.file.as_mut() {
            Some(file) => file.write_all(buf)?,
            None => state.pending.extend_from_slice(buf),
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        if let Some(file) = self.lock().file.as_mut() {
            file.flush()?;
        }
        Ok(())
    }
}
