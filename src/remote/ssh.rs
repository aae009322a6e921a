//! SSH transport
//!
//! Connects with password authentication, opens a session channel, optionally
//! requests a pseudo-terminal and starts the remote shell. The started
//! channel is handed to the [`pump`] so the multiplexer only ever sees plain
//! byte streams.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle, Msg};
use russh::{Channel, ChannelMsg, Disconnect, Pty, Sig};
use tracing::{debug, info};

use super::pump::{self, ChannelEvent, ShellChannel};
use super::{Credential, RemoteSession, RemoteSignal, Target};
use crate::session::SessionError;

/// Terminal speed announced in VT mode, in baud
const TERMINAL_SPEED: u32 = 14400;

/// Pseudo-terminal parameters for VT mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtyRequest {
    pub term: String,
    pub cols: u32,
    pub rows: u32,
}

/// Connection settings
#[derive(Debug, Clone)]
pub struct SshOptions {
    pub connect_timeout: Duration,
    pub keepalive: Option<Duration>,
    pub pty: Option<PtyRequest>,
}

/// Accepts every host key; host key verification is not performed.
struct AcceptAnyHostKey;

#[async_trait]
impl client::Handler for AcceptAnyHostKey {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh_keys::key::PublicKey,
    ) -> Result<bool, Self::Error> {
        debug!("Accepting server host key without verification");
        Ok(true)
    }
}

/// Connect, authenticate and start a shell on `target`
pub async fn connect(
    target: &Target,
    credential: &Credential,
    options: &SshOptions,
) -> Result<RemoteSession, SessionError> {
    info!("Connecting to {}", target);

    let handle = tokio::time::timeout(options.connect_timeout, establish(target, credential, options))
        .await
        .map_err(|_| {
            SessionError::ConnectFailure(format!(
                "timed out after {}s",
                options.connect_timeout.as_secs()
            ))
        })??;

    open_shell(handle, options).await
}

async fn establish(
    target: &Target,
    credential: &Credential,
    options: &SshOptions,
) -> Result<Handle<AcceptAnyHostKey>, SessionError> {
    let config = client::Config {
        keepalive_interval: options.keepalive,
        ..Default::default()
    };

    let mut handle = client::connect(
        Arc::new(config),
        (target.host.as_str(), target.port),
        AcceptAnyHostKey,
    )
    .await
    .map_err(|e| SessionError::ConnectFailure(e.to_string()))?;

    let authenticated = handle
        .authenticate_password(target.user.clone(), credential.expose())
        .await
        .map_err(|e| SessionError::ConnectFailure(e.to_string()))?;

    if !authenticated {
        return Err(SessionError::ConnectFailure(format!(
            "authentication failed for {}",
            target.user
        )));
    }

    info!("Authenticated as {}", target.user);
    Ok(handle)
}

async fn open_shell(
    handle: Handle<AcceptAnyHostKey>,
    options: &SshOptions,
) -> Result<RemoteSession, SessionError> {
    let setup = |e: russh::Error| SessionError::SessionSetupFailure(e.to_string());

    let mut channel = handle.channel_open_session().await.map_err(setup)?;

    if let Some(pty) = &options.pty {
        let modes = [
            (Pty::ECHO, 0),
            (Pty::TTY_OP_ISPEED, TERMINAL_SPEED),
            (Pty::TTY_OP_OSPEED, TERMINAL_SPEED),
        ];
        channel
            .request_pty(true, &pty.term, pty.cols, pty.rows, 0, 0, &modes)
            .await
            .map_err(setup)?;
        await_reply(&mut channel, "pseudo terminal").await?;
        debug!("Pseudo terminal granted: {} {}x{}", pty.term, pty.cols, pty.rows);
    }

    channel.request_shell(true).await.map_err(setup)?;
    await_reply(&mut channel, "interactive shell").await?;
    info!("Remote shell started");

    Ok(pump::spawn_session(SshChannel { handle, channel }))
}

async fn await_reply(channel: &mut Channel<Msg>, what: &str) -> Result<(), SessionError> {
    loop {
        match channel.wait().await {
            Some(ChannelMsg::Success) => return Ok(()),
            Some(ChannelMsg::Failure) => {
                return Err(SessionError::SessionSetupFailure(format!(
                    "server refused {}",
                    what
                )));
            }
            Some(other) => debug!("Ignoring {:?} while waiting for {}", other, what),
            None => {
                return Err(SessionError::SessionSetupFailure(format!(
                    "channel closed while requesting {}",
                    what
                )));
            }
        }
    }
}

/// The started shell channel together with the connection it lives on
struct SshChannel {
    handle: Handle<AcceptAnyHostKey>,
    channel: Channel<Msg>,
}

#[async_trait]
impl ShellChannel for SshChannel {
    async fn next_event(&mut self) -> ChannelEvent {
        match self.channel.wait().await {
            Some(ChannelMsg::Data { data }) => ChannelEvent::Stdout(data.to_vec()),
            Some(ChannelMsg::ExtendedData { data, ext: 1 }) => ChannelEvent::Stderr(data.to_vec()),
            Some(ChannelMsg::ExitStatus { exit_status }) => ChannelEvent::ExitStatus(exit_status),
            Some(ChannelMsg::Eof) => ChannelEvent::Eof,
            Some(ChannelMsg::Close) | None => ChannelEvent::Closed,
            Some(other) => {
                debug!("Ignoring channel message {:?}", other);
                ChannelEvent::Ignored
            }
        }
    }

    async fn send_data(&mut self, data: &[u8]) -> Result<(), SessionError> {
        self.channel
            .data(data)
            .await
            .map_err(|e| SessionError::WriteFailure(io::Error::other(e.to_string())))
    }

    async fn send_eof(&mut self) -> Result<(), SessionError> {
        self.channel
            .eof()
            .await
            .map_err(|e| SessionError::WriteFailure(io::Error::other(e.to_string())))
    }

    async fn send_signal(&mut self, signal: RemoteSignal) -> Result<(), SessionError> {
        let sig = match signal {
            RemoteSignal::Interrupt => Sig::INT,
        };
        self.channel
            .signal(sig)
            .await
            .map_err(|e| SessionError::SignalDeliveryFailure(e.to_string()))
    }

    async fn close(&mut self) {
        if let Err(e) = self.channel.close().await {
            debug!("Channel close: {}", e);
        }
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "session ended", "en")
            .await
        {
            debug!("Disconnect: {}", e);
        }
    }
}
