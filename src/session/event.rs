//! Events exchanged between the producers and the session multiplexer

use std::fmt;

/// Stream a line event came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// Lines typed on the local terminal
    LocalInput,
    /// Remote standard output
    RemoteOutput,
    /// Remote standard error
    RemoteError,
}

impl Origin {
    /// Whether this origin is one of the two remote streams
    pub fn is_remote(self) -> bool {
        !matches!(self, Origin::LocalInput)
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Origin::LocalInput => "local input",
            Origin::RemoteOutput => "remote stdout",
            Origin::RemoteError => "remote stderr",
        };
        f.write_str(name)
    }
}

/// One line of text read from a stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub origin: Origin,
    /// Text without its line terminator
    pub text: String,
    /// Set when the text is a fragment that has not been terminated yet
    pub partial: bool,
}

impl Line {
    pub fn new(origin: Origin, text: impl Into<String>) -> Self {
        Self {
            origin,
            text: text.into(),
            partial: false,
        }
    }

    pub fn partial(origin: Origin, text: impl Into<String>) -> Self {
        Self {
            origin,
            text: text.into(),
            partial: true,
        }
    }
}

/// Events emitted by a line source reader
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    /// A line (or partial line) was read
    Line(Line),
    /// The stream reached a clean end
    Closed(Origin),
    /// Reading the stream failed; no further events follow
    Failed { origin: Origin, message: String },
}

impl LineEvent {
    pub fn origin(&self) -> Origin {
        match self {
            LineEvent::Line(line) => line.origin,
            LineEvent::Closed(origin) => *origin,
            LineEvent::Failed { origin, .. } => *origin,
        }
    }
}

/// Interrupt requested by the local user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalEvent;

/// Everything the multiplexer can be woken up by
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Signal(SignalEvent),
    Line(LineEvent),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_origin() {
        assert_eq!(
            LineEvent::Line(Line::new(Origin::RemoteError, "x")).origin(),
            Origin::RemoteError
        );
        assert_eq!(LineEvent::Closed(Origin::LocalInput).origin(), Origin::LocalInput);
        assert!(Origin::RemoteOutput.is_remote());
        assert!(!Origin::LocalInput.is_remote());
    }
}
