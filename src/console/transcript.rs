use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::Path;

use crate::error::RunError;

/// Run output sinks: the log file and the operator's terminal.
///
/// Device output goes to both. Diagnostics of the run itself go to the log
/// only, except for the per-line headers which are announced on both.
pub struct Transcript<L: Write, E: Write> {
    log: L,
    echo: E,
}

impl<L: Write, E: Write> Transcript<L, E> {
    pub fn new(log: L, echo: E) -> Self {
        Self { log, echo }
    }

    /// Writes one line to the log only.
    pub fn note(&mut self, text: &str) -> io::Result<()> {
        writeln!(self.log, "{text}")
    }

    /// Writes one line to the log and the terminal.
    pub fn announce(&mut self, text: &str) -> io::Result<()> {
        writeln!(self.log, "{text}")?;
        writeln!(self.echo, "{text}")?;
        self.echo.flush()
    }

    /// Raw device bytes, unmodified, to both sinks.
    pub fn chunk(&mut self, data: &[u8]) -> io::Result<()> {
        self.log.write_all(data)?;
        self.echo.write_all(data)?;
        self.echo.flush()
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.log.flush()?;
        self.echo.flush()
    }

    pub fn into_parts(self) -> (L, E) {
        (self.log, self.echo)
    }
}

/// Fails with [`RunError::LogExists`] when `path` is already taken.
pub fn ensure_log_free(path: &Path) -> Result<(), RunError> {
    if path.exists() {
        return Err(RunError::LogExists(path.to_path_buf()));
    }
    Ok(())
}

/// Creates the run log, refusing to touch an existing file.
pub fn create_log(path: &Path) -> Result<File, RunError> {
    ensure_log_free(path)?;
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|source| match source.kind() {
            ErrorKind::AlreadyExists => RunError::LogExists(path.to_path_buf()),
            _ => RunError::LogCreate {
                path: path.to_path_buf(),
                source,
            },
        })
}
