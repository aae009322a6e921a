//! Session multiplexer
//!
//! Single consumer for every event source of an interactive session. Three
//! line readers (local input, remote stdout, remote stderr) and the signal
//! bridge run as producers on their own tasks; all decisions, all writes to
//! the remote input and all terminal output happen here.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::SessionConfig;
use crate::remote::{RemoteInput, RemoteSession, SessionHandle};
use crate::ui::{Console, END_OF_INPUT_NOTICE};

use super::error::SessionError;
use super::event::{Line, LineEvent, Origin, SessionEvent, SignalEvent};
use super::line_reader::{LineMode, LineSourceReader};
use super::prompt::PromptCoordinator;
use super::signal_bridge::SignalBridge;

/// Multiplexer lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiplexerState {
    Starting,
    Running,
    Draining,
    Closed,
}

/// Tuning for one session
#[derive(Debug, Clone)]
pub struct MultiplexerOptions {
    /// Idle prompt; `None` when the remote side prints its own
    pub prompt: Option<String>,
    pub prompt_delay: Duration,
    pub drain_timeout: Duration,
    pub max_drain_batch: usize,
    pub line_buffer: usize,
    /// Line handling for the remote streams
    pub remote_mode: LineMode,
}

impl MultiplexerOptions {
    /// Options for line mode, or for VT mode when `vt_mode` is set
    pub fn from_config(config: &SessionConfig, vt_mode: bool) -> Self {
        Self {
            prompt: (!vt_mode).then(|| config.prompt.clone()),
            prompt_delay: Duration::from_millis(config.prompt_delay_ms),
            drain_timeout: Duration::from_millis(config.drain_timeout_ms),
            max_drain_batch: config.max_drain_batch.max(1),
            line_buffer: config.line_buffer.max(1),
            remote_mode: if vt_mode {
                LineMode::Partial
            } else {
                LineMode::Complete
            },
        }
    }
}

impl Default for MultiplexerOptions {
    fn default() -> Self {
        Self::from_config(&SessionConfig::default(), false)
    }
}

/// Where interrupts come from
pub enum Interrupts {
    /// Install a signal bridge on the process's SIGINT for the loop's lifetime
    Process,
    /// Externally produced signal events
    Channel(mpsc::UnboundedReceiver<SignalEvent>),
}

/// Session statistics for monitoring
#[derive(Debug, Clone)]
pub struct SessionStats {
    pub started_at: DateTime<Utc>,
    pub lines_sent: u64,
    pub stdout_lines: u64,
    pub stderr_lines: u64,
    pub interrupts_forwarded: u64,
    pub read_failures: u64,
    pub prompts_shown: u64,
}

impl Default for SessionStats {
    fn default() -> Self {
        Self {
            started_at: Utc::now(),
            lines_sent: 0,
            stdout_lines: 0,
            stderr_lines: 0,
            interrupts_forwarded: 0,
            read_failures: 0,
            prompts_shown: 0,
        }
    }
}

/// How a session that ended without a fatal error finished
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub stats: SessionStats,
    /// Local input reached end of file before the remote side closed
    pub local_eof: bool,
    /// The post-EOF drain gave up waiting for the remote side
    pub drain_expired: bool,
}

/// What woke the loop up
enum Step {
    Event(SessionEvent),
    Idle,
    DrainExpired,
    SignalsClosed,
    Exhausted,
}

const LINE_ORIGINS: [Origin; 3] = [Origin::RemoteOutput, Origin::RemoteError, Origin::LocalInput];

/// Receiving ends of every producer
struct Channels {
    local: mpsc::Receiver<LineEvent>,
    output: mpsc::Receiver<LineEvent>,
    error: mpsc::Receiver<LineEvent>,
    signals: mpsc::UnboundedReceiver<SignalEvent>,
    local_open: bool,
    output_open: bool,
    error_open: bool,
    signals_open: bool,
    /// Rotates the polling order so no origin is always first
    cursor: usize,
}

impl Channels {
    fn is_open(&self, origin: Origin) -> bool {
        match origin {
            Origin::LocalInput => self.local_open,
            Origin::RemoteOutput => self.output_open,
            Origin::RemoteError => self.error_open,
        }
    }

    fn mark_closed(&mut self, origin: Origin) {
        match origin {
            Origin::LocalInput => self.local_open = false,
            Origin::RemoteOutput => self.output_open = false,
            Origin::RemoteError => self.error_open = false,
        }
    }

    fn remote_open(&self) -> bool {
        self.output_open || self.error_open
    }

    fn receiver(&mut self, origin: Origin) -> &mut mpsc::Receiver<LineEvent> {
        match origin {
            Origin::LocalInput => &mut self.local,
            Origin::RemoteOutput => &mut self.output,
            Origin::RemoteError => &mut self.error,
        }
    }

    fn try_signal(&mut self) -> bool {
        if !self.signals_open {
            return false;
        }
        match self.signals.try_recv() {
            Ok(SignalEvent) => true,
            Err(TryRecvError::Empty) => false,
            Err(TryRecvError::Disconnected) => {
                self.signals_open = false;
                false
            }
        }
    }

    /// Non-blocking poll of one line origin
    fn try_line(&mut self, origin: Origin) -> Option<LineEvent> {
        if !self.is_open(origin) {
            return None;
        }
        match self.receiver(origin).try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) => None,
            // A reader that vanished without a marker counts as closed
            Err(TryRecvError::Disconnected) => Some(LineEvent::Closed(origin)),
        }
    }

    fn try_origins(&mut self, origins: &[Origin]) -> Option<LineEvent> {
        let start = self.cursor;
        for offset in 0..origins.len() {
            let origin = origins[(start + offset) % origins.len()];
            if let Some(event) = self.try_line(origin) {
                self.cursor = (start + offset + 1) % LINE_ORIGINS.len();
                return Some(event);
            }
        }
        None
    }

    /// Next already-available remote stdout/stderr event
    fn try_remote(&mut self) -> Option<LineEvent> {
        self.try_origins(&LINE_ORIGINS[..2])
    }

    /// Next already-available event of any kind; signals first
    fn try_next(&mut self) -> Option<SessionEvent> {
        if self.try_signal() {
            return Some(SessionEvent::Signal(SignalEvent));
        }
        self.try_origins(&LINE_ORIGINS).map(SessionEvent::Line)
    }

    /// Wait for the next event, the idle timer, or the drain deadline
    async fn next(&mut self, idle: Option<Duration>, deadline: Option<Instant>) -> Step {
        // Before polling: an endless stream of ready events must not hold
        // the drain open
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Step::DrainExpired;
        }
        if let Some(event) = self.try_next() {
            return Step::Event(event);
        }

        tokio::select! {
            signal = self.signals.recv(), if self.signals_open => match signal {
                Some(signal) => Step::Event(SessionEvent::Signal(signal)),
                None => Step::SignalsClosed,
            },
            event = self.output.recv(), if self.output_open => line_step(Origin::RemoteOutput, event),
            event = self.error.recv(), if self.error_open => line_step(Origin::RemoteError, event),
            event = self.local.recv(), if self.local_open => line_step(Origin::LocalInput, event),
            _ = tokio::time::sleep(idle.unwrap_or_default()), if idle.is_some() => Step::Idle,
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                Step::DrainExpired
            }
            else => Step::Exhausted,
        }
    }
}

/// A receive that yielded `None` means the reader is gone
fn line_step(origin: Origin, event: Option<LineEvent>) -> Step {
    Step::Event(SessionEvent::Line(
        event.unwrap_or(LineEvent::Closed(origin)),
    ))
}

/// Aborts the reader tasks when the loop exits
struct ReaderTasks(Vec<JoinHandle<()>>);

impl Drop for ReaderTasks {
    fn drop(&mut self) {
        for task in &self.0 {
            task.abort();
        }
    }
}

/// The session I/O multiplexer
pub struct Multiplexer<O, E> {
    options: MultiplexerOptions,
    console: Console<O, E>,
    state: MultiplexerState,
    prompt: PromptCoordinator,
    stats: SessionStats,
    local_eof: bool,
}

impl<O, E> Multiplexer<O, E>
where
    O: AsyncWrite + Unpin + Send,
    E: AsyncWrite + Unpin + Send,
{
    pub fn new(console: Console<O, E>, options: MultiplexerOptions) -> Self {
        Self {
            options,
            console,
            state: MultiplexerState::Starting,
            prompt: PromptCoordinator::new(),
            stats: SessionStats::default(),
            local_eof: false,
        }
    }

    pub fn state(&self) -> MultiplexerState {
        self.state
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn into_console(self) -> Console<O, E> {
        self.console
    }

    /// Relay `local` and `session` until the session ends
    ///
    /// Returns once both remote streams have closed, or local input has ended
    /// and the remote side has finished (or the drain timeout elapsed). The
    /// session is closed on every exit path. A pending read of `local` is
    /// abandoned rather than waited for.
    pub async fn run<L>(
        &mut self,
        session: RemoteSession,
        local: L,
        interrupts: Interrupts,
    ) -> Result<SessionSummary, SessionError>
    where
        L: AsyncBufRead + Unpin + Send + 'static,
    {
        info!("Starting session multiplexer");
        self.state = MultiplexerState::Starting;
        self.stats = SessionStats::default();

        let (input, output, error, mut handle) = session.into_parts();

        let (signals, _bridge) = match interrupts {
            Interrupts::Channel(signals) => (signals, None),
            Interrupts::Process => {
                let (tx, rx) = mpsc::unbounded_channel();
                match SignalBridge::install(tx) {
                    Ok(bridge) => (rx, Some(bridge)),
                    Err(e) => {
                        error!("Failed to install interrupt handler: {}", e);
                        self.console
                            .diagnostic(&format!("Interrupts will not be forwarded: {}", e))
                            .await;
                        (rx, None)
                    }
                }
            }
        };

        let buffer = self.options.line_buffer;
        let (local_tx, local_rx) = mpsc::channel(buffer);
        let (output_tx, output_rx) = mpsc::channel(buffer);
        let (error_tx, error_rx) = mpsc::channel(buffer);
        let mode = self.options.remote_mode;

        let readers = ReaderTasks(vec![
            LineSourceReader::new(Origin::LocalInput, local, LineMode::Complete, local_tx).spawn(),
            LineSourceReader::new(Origin::RemoteOutput, BufReader::new(output), mode, output_tx)
                .spawn(),
            LineSourceReader::new(Origin::RemoteError, BufReader::new(error), mode, error_tx)
                .spawn(),
        ]);

        let mut channels = Channels {
            local: local_rx,
            output: output_rx,
            error: error_rx,
            signals,
            local_open: true,
            output_open: true,
            error_open: true,
            signals_open: true,
            cursor: 0,
        };
        let mut input = Some(input);

        self.state = MultiplexerState::Running;
        self.request_prompt();

        let result = self
            .event_loop(&mut channels, &mut input, &mut handle)
            .await;

        // Readers first: the transport may be blocked writing to them
        drop(channels);
        drop(readers);

        self.state = MultiplexerState::Closed;
        if let Err(e) = handle.close().await {
            warn!("Failed to close session cleanly: {}", e);
        }

        let summary = match result {
            Ok(drain_expired) => {
                self.console
                    .finish()
                    .await
                    .map_err(SessionError::TerminalFailure)?;
                SessionSummary {
                    stats: self.stats.clone(),
                    local_eof: self.local_eof,
                    drain_expired,
                }
            }
            Err(e) => {
                error!("Session loop failed: {}", e);
                return Err(e);
            }
        };

        info!(
            "Session closed: {} lines sent, {} stdout lines, {} stderr lines, {} interrupts",
            summary.stats.lines_sent,
            summary.stats.stdout_lines,
            summary.stats.stderr_lines,
            summary.stats.interrupts_forwarded
        );

        Ok(summary)
    }

    /// Returns whether the drain deadline expired
    async fn event_loop(
        &mut self,
        channels: &mut Channels,
        input: &mut Option<RemoteInput>,
        handle: &mut SessionHandle,
    ) -> Result<bool, SessionError> {
        let mut drain_deadline: Option<Instant> = None;

        loop {
            if !channels.remote_open() {
                self.state = MultiplexerState::Draining;
                debug!("Remote output and error closed");
                return Ok(false);
            }

            let idle = (self.state == MultiplexerState::Running && self.prompt.is_pending())
                .then_some(self.options.prompt_delay);

            match channels.next(idle, drain_deadline).await {
                Step::Event(SessionEvent::Signal(_)) => self.forward_interrupt(handle).await?,
                Step::Event(SessionEvent::Line(event)) => match event {
                    LineEvent::Line(line) if line.origin.is_remote() => {
                        self.print_remote(&line).await?;
                        self.drain_remote(channels, input, handle, &mut drain_deadline)
                            .await?;
                        self.request_prompt();
                    }
                    LineEvent::Line(line) => self.send_local(line, input).await?,
                    other => {
                        self.stream_ended(other, channels, input, handle, &mut drain_deadline)
                            .await?;
                    }
                },
                Step::Idle => {
                    if self.prompt.consume() {
                        if let Some(prompt) = &self.options.prompt {
                            self.console
                                .print_prompt(prompt)
                                .await
                                .map_err(SessionError::TerminalFailure)?;
                            self.stats.prompts_shown += 1;
                        }
                    }
                }
                Step::DrainExpired => {
                    warn!("Remote side did not close within the drain timeout");
                    self.state = MultiplexerState::Draining;
                    return Ok(true);
                }
                Step::SignalsClosed => channels.signals_open = false,
                Step::Exhausted => {
                    self.state = MultiplexerState::Draining;
                    return Ok(false);
                }
            }
        }
    }

    /// Print every remote event that is already waiting, checking for
    /// interrupts between lines
    async fn drain_remote(
        &mut self,
        channels: &mut Channels,
        input: &mut Option<RemoteInput>,
        handle: &mut SessionHandle,
        drain_deadline: &mut Option<Instant>,
    ) -> Result<(), SessionError> {
        for _ in 0..self.options.max_drain_batch {
            if channels.try_signal() {
                self.forward_interrupt(handle).await?;
            }

            let Some(event) = channels.try_remote() else {
                break;
            };

            match event {
                LineEvent::Line(line) => self.print_remote(&line).await?,
                other => {
                    self.stream_ended(other, channels, input, handle, drain_deadline)
                        .await?
                }
            }
        }
        Ok(())
    }

    async fn print_remote(&mut self, line: &Line) -> Result<(), SessionError> {
        match line.origin {
            Origin::RemoteError => self.stats.stderr_lines += 1,
            _ => self.stats.stdout_lines += 1,
        }
        self.console
            .print_line(line)
            .await
            .map_err(SessionError::TerminalFailure)
    }

    /// Send one local line to the remote input with exactly one terminator
    async fn send_local(
        &mut self,
        line: Line,
        input: &mut Option<RemoteInput>,
    ) -> Result<(), SessionError> {
        let Some(sink) = input.as_mut() else {
            debug!("Dropping local line: remote input already closed");
            return Ok(());
        };

        let mut payload = line.text.into_bytes();
        payload.push(b'\n');

        let written = match sink.write_all(&payload).await {
            Ok(()) => sink.flush().await,
            Err(e) => Err(e),
        };

        if let Err(e) = written {
            error!("Write to remote input failed: {}", e);
            *input = None;
            return Err(SessionError::WriteFailure(e));
        }

        self.stats.lines_sent += 1;
        self.request_prompt();
        Ok(())
    }

    /// Handle a closed marker or read failure from any origin
    async fn stream_ended(
        &mut self,
        event: LineEvent,
        channels: &mut Channels,
        input: &mut Option<RemoteInput>,
        handle: &mut SessionHandle,
        drain_deadline: &mut Option<Instant>,
    ) -> Result<(), SessionError> {
        let origin = event.origin();
        channels.mark_closed(origin);

        let clean = match event {
            LineEvent::Failed { origin, message } => {
                self.stats.read_failures += 1;
                self.recover(Err(SessionError::ReadFailure { origin, message }))
                    .await?;
                false
            }
            _ => {
                debug!("{} closed", origin);
                true
            }
        };

        if origin == Origin::LocalInput {
            self.end_local_input(clean, input, handle, drain_deadline)
                .await?;
        }
        Ok(())
    }

    /// Local input is finished: let the remote side see EOF and start draining
    async fn end_local_input(
        &mut self,
        clean: bool,
        input: &mut Option<RemoteInput>,
        handle: &mut SessionHandle,
        drain_deadline: &mut Option<Instant>,
    ) -> Result<(), SessionError> {
        if let Some(mut sink) = input.take() {
            if let Err(e) = sink.shutdown().await {
                debug!("Remote input shutdown: {}", e);
            }
        }
        handle.begin_closing();
        self.prompt.cancel();
        self.local_eof = true;

        if clean {
            info!("Local input reached end of file");
            self.console
                .notice(END_OF_INPUT_NOTICE)
                .await
                .map_err(SessionError::TerminalFailure)?;
        }

        self.state = MultiplexerState::Draining;
        *drain_deadline = Some(Instant::now() + self.options.drain_timeout);
        Ok(())
    }

    async fn forward_interrupt(&mut self, handle: &mut SessionHandle) -> Result<(), SessionError> {
        let delivered = handle.interrupt().await;
        if delivered.is_ok() {
            self.stats.interrupts_forwarded += 1;
            debug!("Interrupt forwarded to remote session");
        }
        self.recover(delivered).await
    }

    /// Report a recoverable failure and carry on; fatal ones end the loop
    async fn recover(&mut self, result: Result<(), SessionError>) -> Result<(), SessionError> {
        match result {
            Err(e) if !e.is_fatal() => {
                warn!("{}", e);
                self.console.diagnostic(&e.to_string()).await;
                Ok(())
            }
            other => other,
        }
    }

    fn request_prompt(&mut self) {
        if self.state == MultiplexerState::Running && self.options.prompt.is_some() {
            self.prompt.request();
        }
    }
}
