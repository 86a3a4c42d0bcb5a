//! # oobline - out-of-band console line takeover
//!
//! `oobline` resolves per-device credentials from a small encrypted store,
//! opens an SSH session to a console server, discovers its async console
//! lines and walks each one through a reverse-connect until the attached
//! device shows a login prompt.
//!
//! ## Features
//!
//! - **Token cipher**: Fernet-compatible encrypted secrets with a fixed key
//! - **Realm credentials**: secrets shared across devices through realm aliases
//! - **Console takeover**: a polling state machine over an ack-less shell channel
//! - **Maximum Compatibility**: legacy SSH algorithms for old console servers
//! - **Recording**: per-line JSONL event trail
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use oobline::config::RunConfig;
//! use oobline::console::{Transcript, create_log, resolve_device, run_device};
//! use oobline::session::SessionRecorder;
//! use std::path::Path;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RunConfig::from_env()?;
//!     let credential = resolve_device("oob1", &config)?;
//!     let log = create_log(Path::new("oob1-oob.log"))?;
//!     let mut transcript = Transcript::new(log, std::io::stdout());
//!
//!     let summary = run_device(&credential, &config, &mut transcript, &SessionRecorder::default()).await?;
//!     println!("{summary}");
//!     Ok(())
//! }
//! ```
//!
//! ## Main Components
//!
//! - [`cipher::Envelope`] - token encryption and decryption
//! - [`credentials::CredentialStore`] - realm and device tables
//! - [`session::ConsoleSession`] - the primary SSH session
//! - [`lines::parse_show_line`] - console line discovery
//! - [`console::ConsoleEngine`] - per-line takeover state machine
//! - [`error`] - error types and exit codes

pub mod cipher;
pub mod config;
pub mod console;
pub mod credentials;
pub mod error;
pub mod lines;
pub mod session;
