//! Channel pump
//!
//! One task owns the remote channel. It relays local input to the channel,
//! routes remote stdout and stderr into in-memory pipes and executes control
//! commands. Commands are polled first, then local input, and pipe writes
//! never hold the loop, so an interrupt or a close request is served even
//! while nobody is draining the output.

use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::{RemoteSession, RemoteSignal, SessionControl};
use crate::session::SessionError;

/// Buffer size of each in-memory pipe, and of the backlog held per stream
pub const PIPE_CAPACITY: usize = 64 * 1024;

/// What the remote side sent on the channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
    ExitStatus(u32),
    /// The remote side will send no more data
    Eof,
    /// The channel is gone
    Closed,
    /// Anything the session has no use for
    Ignored,
}

/// A started remote shell channel
#[async_trait]
pub trait ShellChannel: Send + 'static {
    /// Next message from the remote side. Must be cancel safe.
    async fn next_event(&mut self) -> ChannelEvent;

    async fn send_data(&mut self, data: &[u8]) -> Result<(), SessionError>;

    async fn send_eof(&mut self) -> Result<(), SessionError>;

    async fn send_signal(&mut self, signal: RemoteSignal) -> Result<(), SessionError>;

    /// Close the channel and release the connection behind it
    async fn close(&mut self);
}

/// Start the pump for `channel` and hand out the session it serves
pub fn spawn_session<C: ShellChannel>(channel: C) -> RemoteSession {
    let (input, input_pump) = tokio::io::duplex(PIPE_CAPACITY);
    let (output, output_pump) = tokio::io::duplex(PIPE_CAPACITY);
    let (error, error_pump) = tokio::io::duplex(PIPE_CAPACITY);
    let (commands_tx, commands_rx) = mpsc::channel(8);

    tokio::spawn(pump(channel, input_pump, output_pump, error_pump, commands_rx));

    RemoteSession::new(
        Box::new(input),
        Box::new(output),
        Box::new(error),
        Box::new(PumpControl {
            commands: commands_tx,
        }),
    )
}

enum Command {
    Signal(RemoteSignal, oneshot::Sender<Result<(), SessionError>>),
    Close(oneshot::Sender<()>),
}

struct PumpControl {
    commands: mpsc::Sender<Command>,
}

#[async_trait]
impl SessionControl for PumpControl {
    async fn signal(&mut self, signal: RemoteSignal) -> Result<(), SessionError> {
        let gone = || SessionError::SignalDeliveryFailure("channel closed".to_string());
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Signal(signal, reply_tx))
            .await
            .map_err(|_| gone())?;

        reply_rx.await.map_err(|_| gone())?
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.commands.send(Command::Close(reply_tx)).await.is_ok() {
            let _ = reply_rx.await;
        }
        Ok(())
    }
}

/// One remote stream's pipe and the bytes still waiting to go into it
struct Outbound {
    name: &'static str,
    pipe: Option<DuplexStream>,
    backlog: Vec<u8>,
    closing: bool,
}

impl Outbound {
    fn new(name: &'static str, pipe: DuplexStream) -> Self {
        Self {
            name,
            pipe: Some(pipe),
            backlog: Vec::new(),
            closing: false,
        }
    }

    fn push(&mut self, data: &[u8]) {
        if self.pipe.is_some() {
            self.backlog.extend_from_slice(data);
        }
    }

    fn has_backlog(&self) -> bool {
        self.pipe.is_some() && !self.backlog.is_empty()
    }

    fn has_room(&self) -> bool {
        self.backlog.len() < PIPE_CAPACITY
    }

    fn is_drained(&self) -> bool {
        self.pipe.is_none() || self.backlog.is_empty()
    }

    /// Write as much of the backlog as the pipe takes right now. Cancel safe.
    async fn write_backlog(&mut self) -> io::Result<usize> {
        match self.pipe.as_mut() {
            Some(pipe) => pipe.write(&self.backlog).await,
            None => Ok(0),
        }
    }

    fn advance(&mut self, written: io::Result<usize>) {
        match written {
            Ok(n) if n > 0 => {
                self.backlog.drain(..n);
                if self.closing && self.backlog.is_empty() {
                    self.pipe = None;
                }
            }
            Ok(_) => self.abandon("reader is gone"),
            Err(e) => self.abandon(&e.to_string()),
        }
    }

    fn abandon(&mut self, reason: &str) {
        debug!("Dropping remote {}: {}", self.name, reason);
        self.pipe = None;
        self.backlog.clear();
    }

    /// Close the pipe once the backlog is written
    fn finish(&mut self) {
        self.closing = true;
        if self.backlog.is_empty() {
            self.pipe = None;
        }
    }
}

async fn pump<C: ShellChannel>(
    mut channel: C,
    mut input: DuplexStream,
    output: DuplexStream,
    error: DuplexStream,
    mut commands: mpsc::Receiver<Command>,
) {
    let mut output = Outbound::new("stdout", output);
    let mut error = Outbound::new("stderr", error);
    let mut input_open = true;
    let mut remote_done = false;
    let mut buf = vec![0u8; 8192];
    let mut close_reply = None;

    loop {
        if remote_done && output.is_drained() && error.is_drained() {
            debug!("Remote channel finished and drained");
            break;
        }
        let accepting = !remote_done && output.has_room() && error.has_room();

        tokio::select! {
            biased;

            command = commands.recv() => match command {
                Some(Command::Signal(signal, reply)) => {
                    let _ = reply.send(channel.send_signal(signal).await);
                }
                Some(Command::Close(reply)) => {
                    close_reply = Some(reply);
                    break;
                }
                None => break,
            },

            read = input.read(&mut buf), if input_open => match read {
                Ok(0) | Err(_) => {
                    input_open = false;
                    if let Err(e) = channel.send_eof().await {
                        warn!("Failed to send EOF to remote: {}", e);
                    }
                }
                Ok(n) => {
                    if let Err(e) = channel.send_data(&buf[..n]).await {
                        warn!("Failed to send data to remote: {}", e);
                        break;
                    }
                }
            },

            written = output.write_backlog(), if output.has_backlog() => output.advance(written),

            written = error.write_backlog(), if error.has_backlog() => error.advance(written),

            event = channel.next_event(), if accepting => match event {
                ChannelEvent::Stdout(data) => output.push(&data),
                ChannelEvent::Stderr(data) => error.push(&data),
                ChannelEvent::ExitStatus(status) => {
                    info!("Remote shell exited with status {}", status);
                }
                ChannelEvent::Eof => {
                    debug!("Remote side sent EOF");
                    output.finish();
                    error.finish();
                }
                ChannelEvent::Closed => {
                    debug!("Remote channel closed");
                    output.finish();
                    error.finish();
                    remote_done = true;
                }
                ChannelEvent::Ignored => {}
            },

        }
    }

    channel.close().await;
    info!("Remote channel released");

    if let Some(reply) = close_reply {
        let _ = reply.send(());
    }
}
