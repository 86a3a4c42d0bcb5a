//! Error types for credential resolution, SSH sessions and console runs.
//!
//! Each layer has its own enum so callers can decide how far an error is
//! allowed to travel: a [`CryptoError`] only ever costs one secret field,
//! an [`Unresolved`] device stops the run before any connection is made,
//! and a [`ConnectError`] on the primary session ends the run.

use std::path::PathBuf;

use thiserror::Error;
use tokio::sync::mpsc::error::SendError;

/// Token decryption failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// The token is not a well-formed envelope (encoding, length, version,
    /// padding or plaintext encoding).
    #[error("malformed token: {0}")]
    Format(String),

    /// The integrity tag does not match: the token was altered or was
    /// produced with another key.
    #[error("token integrity check failed")]
    Integrity,
}

/// A single malformed line in a credential table.
///
/// These are never fatal on their own; the store logs them and skips the line.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{file}:{line}: {reason}")]
pub struct ConfigError {
    pub file: String,
    pub line: usize,
    pub reason: String,
}

/// The credential store itself could not be used.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store directory setting is missing or does not name a directory.
    #[error("credential store unavailable: {0}")]
    Unavailable(String),

    /// One of the table files could not be read.
    #[error("unable to read {}: {source}", .path.display())]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The requested device has no complete credential.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Unresolved {
    /// No device line carries the requested id.
    #[error("device {0} not found")]
    NotFound(String),

    /// A required field is empty after realm and token resolution.
    #[error("empty {field} for device {device}")]
    MissingField { device: String, field: &'static str },

    /// The port field is not a valid TCP/UDP port.
    #[error("invalid port '{port}' for device {device}")]
    BadPort { device: String, port: String },
}

/// Any failure of [`CredentialStore`](crate::credentials::CredentialStore) lookups.
#[derive(Error, Debug)]
pub enum CredentialError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Unresolved(#[from] Unresolved),
}

/// Errors that can occur on the SSH session and its channels.
#[derive(Error, Debug)]
pub enum ConnectError {
    /// The SSH channel was closed by the remote side while we still needed it.
    #[error("channel disconnect")]
    ChannelDisconnectError,

    /// The SSH connection has been closed.
    #[error("connect closed")]
    ConnectClosedError,

    /// A line-oriented command finished with a non-zero status.
    #[error("command '{command}' failed with status {status}")]
    CommandFailed { command: String, status: u32 },

    /// An error occurred in the async-ssh2-tokio library.
    #[error("async ssh2 error: {0}")]
    Ssh2Error(#[from] async_ssh2_tokio::Error),

    /// An error occurred in the russh library.
    #[error("russh error: {0}")]
    RusshError(#[from] russh::Error),

    /// Failed to hand data to the channel I/O task.
    #[error("Failed to send data: {0}")]
    SendDataError(#[from] SendError<Vec<u8>>),
}

/// Session recording failures.
#[derive(Error, Debug)]
pub enum RecordError {
    #[error("record lock error: {0}")]
    Lock(String),

    #[error("record encode error: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("record decode error at line {line}: {source}")]
    Decode {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Run-level failures of the `do-oob-device` entry point, each with its exit code.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("{0}")]
    Syntax(String),

    #[error("{0}")]
    InputMissing(String),

    #[error("logfile {} exists", .0.display())]
    LogExists(PathBuf),

    #[error("unable to create logfile {}: {source}", .path.display())]
    LogCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to determine credentials for {device}: {source}")]
    Credentials {
        device: String,
        #[source]
        source: CredentialError,
    },

    #[error("unable to connect to {device}: {source}")]
    Connect {
        device: String,
        #[source]
        source: ConnectError,
    },
}

impl RunError {
    pub const SUCCESS: i32 = 0;

    /// Process exit status for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunError::Syntax(_) => 1,
            RunError::InputMissing(_) => 2,
            RunError::LogExists(_) => 3,
            RunError::LogCreate { .. } => 4,
            RunError::Credentials { .. } => 11,
            RunError::Connect { .. } => 12,
        }
    }
}
