//! Line source reader
//!
//! Turns a byte stream into [`LineEvent`]s delivered in read order, followed
//! by exactly one [`LineEvent::Closed`] or [`LineEvent::Failed`].

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::event::{Line, LineEvent, Origin};

/// How incomplete lines are handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineMode {
    /// Hold bytes back until a newline or end of stream
    Complete,
    /// Emit whatever is buffered after each read, even without a newline
    Partial,
}

/// Reads one stream and forwards its lines to the multiplexer
pub struct LineSourceReader<R> {
    origin: Origin,
    reader: R,
    mode: LineMode,
    sink: mpsc::Sender<LineEvent>,
}

impl<R> LineSourceReader<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    pub fn new(origin: Origin, reader: R, mode: LineMode, sink: mpsc::Sender<LineEvent>) -> Self {
        Self {
            origin,
            reader,
            mode,
            sink,
        }
    }

    /// Run the reader on its own task
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Read until end of stream, a read error, or the sink going away
    pub async fn run(self) {
        let LineSourceReader {
            origin,
            mut reader,
            mode,
            sink,
        } = self;
        let mut pending: Vec<u8> = Vec::new();

        let terminal = loop {
            let chunk = match reader.fill_buf().await {
                Ok(chunk) => chunk,
                Err(e) => {
                    warn!("Read from {} failed: {}", origin, e);
                    break LineEvent::Failed {
                        origin,
                        message: e.to_string(),
                    };
                }
            };

            if chunk.is_empty() {
                if !pending.is_empty() {
                    let line = Line::new(origin, decode(&pending));
                    pending.clear();
                    if !emit(&sink, LineEvent::Line(line)).await {
                        return;
                    }
                }
                debug!("{} reached end of stream", origin);
                break LineEvent::Closed(origin);
            }

            let mut ready = None;
            let consumed = match chunk.iter().position(|&b| b == b'\n') {
                Some(index) => {
                    pending.extend_from_slice(&chunk[..index]);
                    ready = Some(Line::new(origin, decode_terminated(&pending)));
                    pending.clear();
                    index + 1
                }
                None => {
                    pending.extend_from_slice(chunk);
                    chunk.len()
                }
            };
            reader.consume(consumed);

            if ready.is_none() && mode == LineMode::Partial {
                ready = Some(Line::partial(origin, decode(&pending)));
                pending.clear();
            }

            if let Some(line) = ready {
                if !emit(&sink, LineEvent::Line(line)).await {
                    return;
                }
            }
        };

        emit(&sink, terminal).await;
    }
}

async fn emit(sink: &mpsc::Sender<LineEvent>, event: LineEvent) -> bool {
    let origin = event.origin();
    if sink.send(event).await.is_err() {
        debug!("{} reader stopping: multiplexer is gone", origin);
        return false;
    }
    true
}

fn decode(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Decode text that ended at a newline; a `\r` right before it belongs to
/// the terminator
fn decode_terminated(bytes: &[u8]) -> String {
    decode(bytes.strip_suffix(b"\r").unwrap_or(bytes))
}
