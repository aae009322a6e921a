//! Signal bridge
//!
//! Turns process interrupts into [`SignalEvent`]s for the multiplexer. The
//! channel is unbounded so a slow consumer never blocks or loses an
//! interrupt. Listening stops when the bridge is dropped.

use std::io;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::event::SignalEvent;

/// Something that completes once per interrupt
#[async_trait]
pub trait InterruptSource: Send + 'static {
    /// Wait for the next interrupt; an error ends the bridge
    async fn next_interrupt(&mut self) -> io::Result<()>;
}

/// SIGINT / Ctrl+C for the current process
pub struct ProcessInterrupts {
    #[cfg(unix)]
    signal: tokio::signal::unix::Signal,
}

impl ProcessInterrupts {
    pub fn register() -> io::Result<Self> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            Ok(Self {
                signal: signal(SignalKind::interrupt())?,
            })
        }

        #[cfg(not(unix))]
        {
            Ok(Self {})
        }
    }
}

#[async_trait]
impl InterruptSource for ProcessInterrupts {
    #[cfg(unix)]
    async fn next_interrupt(&mut self) -> io::Result<()> {
        self.signal
            .recv()
            .await
            .ok_or_else(|| io::Error::other("interrupt stream ended"))
    }

    #[cfg(not(unix))]
    async fn next_interrupt(&mut self) -> io::Result<()> {
        tokio::signal::ctrl_c().await
    }
}

pub struct SignalBridge {
    task: JoinHandle<()>,
}

impl SignalBridge {
    /// Listen for process interrupts for as long as the bridge is alive
    pub fn install(events: mpsc::UnboundedSender<SignalEvent>) -> io::Result<Self> {
        Ok(Self::spawn(ProcessInterrupts::register()?, events))
    }

    /// Forward every interrupt from `source` as one signal event
    pub fn spawn<S>(mut source: S, events: mpsc::UnboundedSender<SignalEvent>) -> Self
    where
        S: InterruptSource,
    {
        let task = tokio::spawn(async move {
            loop {
                if let Err(e) = source.next_interrupt().await {
                    error!("Interrupt listener stopped: {}", e);
                    break;
                }

                info!("Interrupt received");
                if events.send(SignalEvent).is_err() {
                    debug!("Signal bridge stopping: multiplexer is gone");
                    break;
                }
            }
        });

        Self { task }
    }
}

impl Drop for SignalBridge {
    fn drop(&mut self) {
        self.task.abort();
    }
}
