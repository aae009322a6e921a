//! Remote session module
//!
//! A [`RemoteSession`] is what the multiplexer drives: an input sink, the
//! remote stdout and stderr sources, and a control handle for interrupts and
//! teardown. The SSH transport in [`ssh`] produces one through the [`pump`].

pub mod pump;
pub mod ssh;
pub mod target;

use std::fmt;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::session::SessionError;

pub use target::Target;

/// Write side of the remote process's stdin
pub type RemoteInput = Box<dyn AsyncWrite + Send + Unpin>;

/// Read side of a remote output stream
pub type RemoteStream = Box<dyn AsyncRead + Send + Unpin>;

/// Session liveness
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Active,
    Closing,
    Closed,
}

/// Signals that can be delivered to the remote process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteSignal {
    Interrupt,
}

/// Out-of-band control over an established session
#[async_trait]
pub trait SessionControl: Send {
    /// Deliver a signal to the remote process
    async fn signal(&mut self, signal: RemoteSignal) -> Result<(), SessionError>;

    /// Close the session and release the transport
    async fn close(&mut self) -> Result<(), SessionError>;
}

/// Password or other secret; never printed
#[derive(Clone)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// An established remote shell
pub struct RemoteSession {
    pub input: RemoteInput,
    pub output: RemoteStream,
    pub error: RemoteStream,
    control: Box<dyn SessionControl>,
    liveness: Liveness,
}

impl RemoteSession {
    pub fn new(
        input: RemoteInput,
        output: RemoteStream,
        error: RemoteStream,
        control: Box<dyn SessionControl>,
    ) -> Self {
        Self {
            input,
            output,
            error,
            control,
            liveness: Liveness::Active,
        }
    }

    /// Split into the streams and a handle that keeps the control side
    pub fn into_parts(self) -> (RemoteInput, RemoteStream, RemoteStream, SessionHandle) {
        (
            self.input,
            self.output,
            self.error,
            SessionHandle {
                control: self.control,
                liveness: self.liveness,
            },
        )
    }
}

/// Control side of a session once its streams have been handed out
pub struct SessionHandle {
    control: Box<dyn SessionControl>,
    liveness: Liveness,
}

impl SessionHandle {
    pub fn liveness(&self) -> Liveness {
        self.liveness
    }

    /// Mark that the local side stopped sending input
    pub fn begin_closing(&mut self) {
        if self.liveness == Liveness::Active {
            self.liveness = Liveness::Closing;
        }
    }

    pub async fn interrupt(&mut self) -> Result<(), SessionError> {
        if self.liveness == Liveness::Closed {
            return Err(SessionError::SignalDeliveryFailure(
                "session already closed".to_string(),
            ));
        }
        self.control.signal(RemoteSignal::Interrupt).await
    }

    /// Close the session; repeated calls are no-ops
    pub async fn close(&mut self) -> Result<(), SessionError> {
        if self.liveness == Liveness::Closed {
            return Ok(());
        }
        self.liveness = Liveness::Closed;
        self.control.close().await
    }
}
