//! Shared harness for driving the multiplexer against in-memory pipes

#![allow(dead_code)]

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, ready};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, BufReader, DuplexStream, ReadBuf, duplex};
use tokio::time::{Instant, Sleep};

use relaysh::remote::{RemoteSession, RemoteSignal, SessionControl};
use relaysh::session::{LineMode, MultiplexerOptions, SessionError};

pub const PIPE_CAPACITY: usize = 64 * 1024;

/// Shared in-memory terminal that records everything written to it
#[derive(Clone, Default)]
pub struct Transcript(Arc<Mutex<Vec<u8>>>);

impl Transcript {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }

    /// Printed lines with prompts removed
    pub fn lines_without(&self, prompt: &str) -> Vec<String> {
        self.text()
            .replace(prompt, "")
            .lines()
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect()
    }
}

impl AsyncWrite for Transcript {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Terminal that accepts at most `bytes_per_tick` bytes per `tick`
pub struct SlowTerminal {
    screen: Transcript,
    bytes_per_tick: usize,
    tick: Duration,
    delay: Pin<Box<Sleep>>,
}

impl SlowTerminal {
    pub fn new(screen: Transcript, bytes_per_tick: usize, tick: Duration) -> Self {
        Self {
            screen,
            bytes_per_tick,
            tick,
            delay: Box::pin(tokio::time::sleep(Duration::ZERO)),
        }
    }
}

impl AsyncWrite for SlowTerminal {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        ready!(self.delay.as_mut().poll(cx));

        let accepted = buf.len().min(self.bytes_per_tick);
        self.screen.0.lock().unwrap().extend_from_slice(&buf[..accepted]);
        let next = Instant::now() + self.tick;
        self.delay.as_mut().reset(next);
        Poll::Ready(Ok(accepted))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Calls made on the session control handle
#[derive(Debug, Default)]
pub struct ControlCalls {
    pub interrupts: usize,
    pub closes: usize,
}

#[derive(Clone, Default)]
pub struct ControlLog(Arc<Mutex<ControlCalls>>);

impl ControlLog {
    pub fn interrupts(&self) -> usize {
        self.0.lock().unwrap().interrupts
    }

    pub fn closes(&self) -> usize {
        self.0.lock().unwrap().closes
    }
}

pub struct MockControl {
    log: ControlLog,
    fail_signals: bool,
}

#[async_trait]
impl SessionControl for MockControl {
    async fn signal(&mut self, _signal: RemoteSignal) -> Result<(), SessionError> {
        if self.fail_signals {
            return Err(SessionError::SignalDeliveryFailure(
                "channel closed".to_string(),
            ));
        }
        self.log.0.lock().unwrap().interrupts += 1;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        self.log.0.lock().unwrap().closes += 1;
        Ok(())
    }
}

/// The remote shell's ends of the session pipes
pub struct RemoteEnd {
    /// Bytes the multiplexer sent to the remote stdin
    pub input: DuplexStream,
    /// Remote stdout
    pub output: DuplexStream,
    /// Remote stderr
    pub error: DuplexStream,
}

pub fn mock_control(fail_signals: bool) -> (Box<dyn SessionControl>, ControlLog) {
    let log = ControlLog::default();
    let control = MockControl {
        log: log.clone(),
        fail_signals,
    };
    (Box::new(control), log)
}

pub fn mock_session(fail_signals: bool) -> (RemoteSession, RemoteEnd, ControlLog) {
    let (input, input_remote) = duplex(PIPE_CAPACITY);
    let (output, output_remote) = duplex(PIPE_CAPACITY);
    let (error, error_remote) = duplex(PIPE_CAPACITY);
    let (control, log) = mock_control(fail_signals);

    let session = RemoteSession::new(Box::new(input), Box::new(output), Box::new(error), control);
    let remote = RemoteEnd {
        input: input_remote,
        output: output_remote,
        error: error_remote,
    };
    (session, remote, log)
}

/// A keyboard the test types into, and the local input the multiplexer reads
pub fn keyboard() -> (DuplexStream, BufReader<DuplexStream>) {
    let (keys, local) = duplex(PIPE_CAPACITY);
    (keys, BufReader::new(local))
}

/// Reader that yields `data` once and then fails
pub struct FailingReader {
    data: Option<Vec<u8>>,
}

impl FailingReader {
    pub fn new(data: &[u8]) -> Self {
        Self {
            data: Some(data.to_vec()),
        }
    }
}

impl AsyncRead for FailingReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.data.take() {
            Some(data) => {
                buf.put_slice(&data);
                Poll::Ready(Ok(()))
            }
            None => Poll::Ready(Err(io::Error::other("connection reset"))),
        }
    }
}

pub fn line_mode_options() -> MultiplexerOptions {
    MultiplexerOptions {
        prompt: Some("% ".to_string()),
        prompt_delay: Duration::from_millis(20),
        drain_timeout: Duration::from_secs(2),
        max_drain_batch: 256,
        line_buffer: 64,
        remote_mode: LineMode::Complete,
    }
}

pub fn vt_mode_options() -> MultiplexerOptions {
    MultiplexerOptions {
        prompt: None,
        remote_mode: LineMode::Partial,
        ..line_mode_options()
    }
}
