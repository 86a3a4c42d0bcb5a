//! Primary SSH session to a console server.
//!
//! [`ConsoleSession`] is opened once per run with the resolved credential and
//! offers two ways in: line-oriented command execution for inventory
//! commands, and raw PTY shell channels for console line takeover.
//!
//! # Main Components
//!
//! - [`ConsoleSession`] - the bootstrapped SSH session
//! - [`ShellChannel`] - one PTY shell channel pumped by a background task
//! - [`DeviceSession`] / [`ConsoleChannel`] - the seams the enumerator and
//!   engine are written against
//! - [`SessionRecorder`] - structured per-line event trail

use async_ssh2_tokio::client::{AuthMethod, Client};
use async_ssh2_tokio::{Config, ServerCheckMethod};
use log::{debug, trace};
use russh::{ChannelMsg, Preferred};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::time::Duration;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::task::JoinHandle;

use crate::config;
use crate::credentials::ResolvedCredential;
use crate::error::ConnectError;

pub use recording::{
    NormalizeOptions, SessionEvent, SessionRecordEntry, SessionRecordLevel, SessionRecorder,
};
pub use security::{ConnectionSecurityOptions, SecurityLevel};

/// Command execution and channel opening on a device session.
#[allow(async_fn_in_trait)]
pub trait DeviceSession {
    type Channel: ConsoleChannel;

    /// Runs one command and returns its standard output.
    async fn exec(&mut self, command: &str) -> Result<String, ConnectError>;

    /// Opens a fresh interactive channel.
    async fn open_channel(&mut self) -> Result<Self::Channel, ConnectError>;
}

/// Raw, ack-less interactive byte stream.
#[allow(async_fn_in_trait)]
pub trait ConsoleChannel {
    async fn send(&mut self, data: &[u8]) -> Result<(), ConnectError>;

    /// Everything received since the last read, or `None` when nothing is
    /// waiting. Never blocks.
    fn try_read(&mut self) -> Result<Option<Vec<u8>>, ConnectError>;

    /// Releases the channel. Further sends fail.
    async fn close(&mut self) -> Result<(), ConnectError> {
        Ok(())
    }
}

/// The bootstrapped SSH session to a console server.
pub struct ConsoleSession {
    client: Client,
    device_addr: String,
}

impl ConsoleSession {
    /// Opens the session with exactly one attempt. Retrying is the caller's call.
    pub async fn connect(
        credential: &ResolvedCredential,
        security: &ConnectionSecurityOptions,
    ) -> Result<Self, ConnectError> {
        let device_addr = format!(
            "{}@{}:{}",
            credential.username, credential.address, credential.port
        );

        let config = Config {
            preferred: security.preferred(),
            inactivity_timeout: Some(Duration::from_secs(60)),
            ..Default::default()
        };

        let client = Client::connect_with_config(
            (credential.address.clone(), credential.port),
            &credential.username,
            AuthMethod::with_password(&credential.password),
            security.server_check.clone(),
            config,
        )
        .await?;
        debug!("{device_addr} TCP connection successful");

        Ok(Self {
            client,
            device_addr,
        })
    }

    pub fn device_addr(&self) -> &str {
        &self.device_addr
    }

    /// Checks if the underlying SSH connection is still active.
    pub fn is_connected(&self) -> bool {
        !self.client.is_closed()
    }

    /// Opens a PTY shell channel and starts its I/O task.
    pub async fn open_shell(&self) -> Result<ShellChannel, ConnectError> {
        let mut channel = self.client.get_channel().await?;
        channel
            .request_pty(false, "xterm", 800, 600, 0, 0, &[])
            .await?;
        channel.request_shell(false).await?;
        debug!("{} Shell request successful", self.device_addr);

        let (sender_to_shell, mut receiver_from_engine) = mpsc::channel::<Vec<u8>>(256);
        let (sender_to_engine, receiver_from_shell) = mpsc::channel::<Vec<u8>>(256);

        let io_task_device_addr = self.device_addr.clone();
        let io_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    outgoing = receiver_from_engine.recv() => match outgoing {
                        Some(data) => {
                            if let Err(e) = channel.data(&data[..]).await {
                                debug!("{} Failed to send data to shell: {:?}", io_task_device_addr, e);
                                break;
                            }
                        }
                        None => {
                            let _ = channel.eof().await;
                            let _ = channel.close().await;
                            break;
                        }
                    },
                    msg = channel.wait() => match msg {
                        Some(ChannelMsg::Data { ref data })
                        | Some(ChannelMsg::ExtendedData { ref data, .. }) => {
                            trace!("{} received {} bytes", io_task_device_addr, data.len());
                            if sender_to_engine.send(data.to_vec()).await.is_err() {
                                debug!("{} Shell output receiver dropped. Closing task.", io_task_device_addr);
                                break;
                            }
                        }
                        Some(ChannelMsg::ExitStatus { exit_status }) => {
                            debug!("{} Shell exited with status code: {}", io_task_device_addr, exit_status);
                            let _ = channel.eof().await;
                            break;
                        }
                        Some(ChannelMsg::Eof) | None => {
                            debug!("{} Shell sent EOF.", io_task_device_addr);
                            break;
                        }
                        Some(_) => {}
                    },
                }
            }
            debug!("{} SSH I/O task ended.", io_task_device_addr);
        });

        Ok(ShellChannel {
            sender: Some(sender_to_shell),
            recv: receiver_from_shell,
            io_task: Some(io_task),
        })
    }

    /// Disconnects the session.
    pub async fn close(self) -> Result<(), ConnectError> {
        debug!("Closing SSH connection {}", self.device_addr);
        if self.is_connected() {
            self.client.disconnect().await?;
        }
        Ok(())
    }
}

impl DeviceSession for ConsoleSession {
    type Channel = ShellChannel;

    async fn exec(&mut self, command: &str) -> Result<String, ConnectError> {
        let result = self.client.execute(command).await?;
        debug!(
            "{} '{}' exited with status {}",
            self.device_addr, command, result.exit_status
        );
        if result.exit_status != 0 && result.stdout.is_empty() {
            return Err(ConnectError::CommandFailed {
                command: command.to_string(),
                status: result.exit_status,
            });
        }
        Ok(result.stdout)
    }

    async fn open_channel(&mut self) -> Result<ShellChannel, ConnectError> {
        self.open_shell().await
    }
}

/// One PTY shell channel on a [`ConsoleSession`].
pub struct ShellChannel {
    sender: Option<Sender<Vec<u8>>>,
    recv: Receiver<Vec<u8>>,
    io_task: Option<JoinHandle<()>>,
}

impl ConsoleChannel for ShellChannel {
    async fn send(&mut self, data: &[u8]) -> Result<(), ConnectError> {
        let sender = self
            .sender
            .as_ref()
            .ok_or(ConnectError::ConnectClosedError)?;
        sender.send(data.to_vec()).await?;
        Ok(())
    }

    fn try_read(&mut self) -> Result<Option<Vec<u8>>, ConnectError> {
        drain(&mut self.recv)
    }

    async fn close(&mut self) -> Result<(), ConnectError> {
        // Dropping the sender tells the I/O task to send EOF and close.
        self.sender.take();
        self.recv.close();
        if let Some(task) = self.io_task.take() {
            let _ = tokio::time::timeout(Duration::from_secs(2), task).await;
        }
        Ok(())
    }
}

impl Drop for ShellChannel {
    fn drop(&mut self) {
        if let Some(task) = self.io_task.take() {
            task.abort();
        }
    }
}

/// Concatenates every queued chunk. A closed queue with nothing left is a
/// disconnect.
fn drain(recv: &mut Receiver<Vec<u8>>) -> Result<Option<Vec<u8>>, ConnectError> {
    let mut out: Option<Vec<u8>> = None;
    loop {
        match recv.try_recv() {
            Ok(chunk) => out.get_or_insert_with(Vec::new).extend_from_slice(&chunk),
            Err(TryRecvError::Empty) => return Ok(out),
            Err(TryRecvError::Disconnected) => {
                return match out {
                    Some(data) => Ok(Some(data)),
                    None => Err(ConnectError::ChannelDisconnectError),
                };
            }
        }
    }
}

mod recording;
mod security;
