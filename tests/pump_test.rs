//! The channel pump keeps serving control requests while output backs up

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

use relaysh::remote::RemoteSignal;
use relaysh::remote::pump::{ChannelEvent, ShellChannel, spawn_session};
use relaysh::session::{Interrupts, Multiplexer, SessionError, SignalEvent};
use relaysh::ui::{Console, END_OF_INPUT_NOTICE};

use common::{SlowTerminal, Transcript, keyboard, line_mode_options};

const LINES_PER_CHUNK: u64 = 16;

#[derive(Debug, Default)]
struct ChannelCalls {
    signals: usize,
    closed: bool,
    input: Vec<u8>,
}

#[derive(Clone, Default)]
struct ChannelLog(Arc<Mutex<ChannelCalls>>);

impl ChannelLog {
    fn signals(&self) -> usize {
        self.0.lock().unwrap().signals
    }

    fn closed(&self) -> bool {
        self.0.lock().unwrap().closed
    }

    fn input(&self) -> Vec<u8> {
        self.0.lock().unwrap().input.clone()
    }
}

/// Remote shell that prints numbered lines as fast as it is read
struct FloodChannel {
    log: ChannelLog,
    /// Stop printing and close after the first interrupt
    stop_on_interrupt: bool,
    stopping: bool,
    eof_sent: bool,
    next_line: u64,
}

impl FloodChannel {
    fn new(log: ChannelLog, stop_on_interrupt: bool) -> Self {
        Self {
            log,
            stop_on_interrupt,
            stopping: false,
            eof_sent: false,
            next_line: 0,
        }
    }
}

#[async_trait]
impl ShellChannel for FloodChannel {
    async fn next_event(&mut self) -> ChannelEvent {
        if self.stopping {
            if !self.eof_sent {
                self.eof_sent = true;
                return ChannelEvent::Eof;
            }
            return ChannelEvent::Closed;
        }

        let mut chunk = String::new();
        for _ in 0..LINES_PER_CHUNK {
            chunk.push_str(&format!("flood-{}\n", self.next_line));
            self.next_line += 1;
        }
        ChannelEvent::Stdout(chunk.into_bytes())
    }

    async fn send_data(&mut self, data: &[u8]) -> Result<(), SessionError> {
        self.log.0.lock().unwrap().input.extend_from_slice(data);
        Ok(())
    }

    async fn send_eof(&mut self) -> Result<(), SessionError> {
        Ok(())
    }

    async fn send_signal(&mut self, _signal: RemoteSignal) -> Result<(), SessionError> {
        self.log.0.lock().unwrap().signals += 1;
        if self.stop_on_interrupt {
            self.stopping = true;
        }
        Ok(())
    }

    async fn close(&mut self) {
        self.log.0.lock().unwrap().closed = true;
    }
}

fn slow_console(screen: &Transcript) -> Console<SlowTerminal, Transcript> {
    Console::new(
        SlowTerminal::new(screen.clone(), 64, Duration::from_millis(1)),
        Transcript::default(),
    )
}

#[tokio::test(start_paused = true)]
async fn test_interrupt_is_delivered_while_output_is_backed_up() {
    let log = ChannelLog::default();
    let session = spawn_session(FloodChannel::new(log.clone(), true));
    let (_keys, local) = keyboard();
    let screen = Transcript::default();
    let mut mux = Multiplexer::new(slow_console(&screen), line_mode_options());
    let (signals_tx, signals) = mpsc::unbounded_channel();

    let interrupter = tokio::spawn(async move {
        sleep(Duration::from_millis(500)).await;
        signals_tx.send(SignalEvent).unwrap();
    });

    let summary = timeout(
        Duration::from_secs(60),
        mux.run(session, local, Interrupts::Channel(signals)),
    )
    .await
    .expect("session stalled behind its own output")
    .unwrap();
    interrupter.await.unwrap();

    assert_eq!(log.signals(), 1);
    assert_eq!(summary.stats.interrupts_forwarded, 1);
    assert!(log.closed());

    let lines = screen.lines_without("% ");
    assert!(lines.len() as u64 > LINES_PER_CHUNK);
    for (number, line) in lines.iter().enumerate() {
        assert_eq!(line, &format!("flood-{}", number));
    }
}

#[tokio::test(start_paused = true)]
async fn test_drain_deadline_holds_against_endless_output() {
    let log = ChannelLog::default();
    let session = spawn_session(FloodChannel::new(log.clone(), false));
    let (keys, local) = keyboard();
    drop(keys);
    let screen = Transcript::default();
    let mut mux = Multiplexer::new(slow_console(&screen), line_mode_options());
    let (_signals_tx, signals) = mpsc::unbounded_channel();

    let summary = timeout(
        Duration::from_secs(30),
        mux.run(session, local, Interrupts::Channel(signals)),
    )
    .await
    .expect("drain deadline was not honoured")
    .unwrap();

    assert!(summary.local_eof);
    assert!(summary.drain_expired);
    assert!(log.closed());
    assert_eq!(screen.text().matches(END_OF_INPUT_NOTICE).count(), 1);
}

#[tokio::test]
async fn test_local_input_reaches_the_channel() {
    let log = ChannelLog::default();
    let mut session = spawn_session(FloodChannel::new(log.clone(), true));

    session.input.write_all(b"uptime\n").await.unwrap();
    session.input.shutdown().await.unwrap();
    timeout(Duration::from_secs(5), async {
        while log.input().is_empty() {
            sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("input never reached the channel");

    let (_input, _output, _error, mut handle) = session.into_parts();
    handle.interrupt().await.unwrap();
    handle.close().await.unwrap();

    assert_eq!(log.input(), b"uptime\n");
    assert_eq!(log.signals(), 1);
    assert!(log.closed());
}
