//! Local terminal output
//!
//! The multiplexer is the only user of the console, which makes it the only
//! writer of the local terminal.

use std::io;

use tokio::io::{AsyncWrite, AsyncWriteExt, Stderr, Stdout};

use crate::session::event::{Line, Origin};

/// Notice printed once when local input reaches end of file
pub const END_OF_INPUT_NOTICE: &str = "[end of input]";

/// Normal output and diagnostic channels of the local terminal
pub struct Console<O, E> {
    out: O,
    err: E,
}

impl Console<Stdout, Stderr> {
    /// Console bound to the process's stdout and stderr
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdout(), tokio::io::stderr())
    }
}

impl<O, E> Console<O, E>
where
    O: AsyncWrite + Unpin + Send,
    E: AsyncWrite + Unpin + Send,
{
    pub fn new(out: O, err: E) -> Self {
        Self { out, err }
    }

    /// Print a remote line; stderr lines go to the diagnostic channel
    pub async fn print_line(&mut self, line: &Line) -> io::Result<()> {
        let writer: &mut (dyn AsyncWrite + Unpin + Send) = match line.origin {
            Origin::RemoteError => &mut self.err,
            _ => &mut self.out,
        };

        writer.write_all(line.text.as_bytes()).await?;
        if !line.partial {
            writer.write_all(b"\n").await?;
        }
        writer.flush().await
    }

    /// Print the prompt without a line terminator
    pub async fn print_prompt(&mut self, prompt: &str) -> io::Result<()> {
        self.out.write_all(prompt.as_bytes()).await?;
        self.out.flush().await
    }

    pub async fn notice(&mut self, text: &str) -> io::Result<()> {
        self.out.write_all(text.as_bytes()).await?;
        self.out.write_all(b"\n").await?;
        self.out.flush().await
    }

    /// Print a diagnostic; failures to do so are ignored
    pub async fn diagnostic(&mut self, text: &str) {
        let message = format!("{}\n", text);
        if self.err.write_all(message.as_bytes()).await.is_ok() {
            let _ = self.err.flush().await;
        }
    }

    /// Trailing newline on graceful session end
    pub async fn finish(&mut self) -> io::Result<()> {
        self.out.write_all(b"\n").await?;
        self.out.flush().await
    }

    pub fn into_inner(self) -> (O, E) {
        (self.out, self.err)
    }
}
