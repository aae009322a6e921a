//! Interactive session module
//!
//! This module provides the session I/O multiplexer and its producers: line
//! source readers, the signal bridge and the prompt coordinator.

pub mod error;
pub mod event;
pub mod line_reader;
pub mod multiplexer;
pub mod prompt;
pub mod signal_bridge;

pub use error::SessionError;
pub use event::{Line, LineEvent, Origin, SessionEvent, SignalEvent};
pub use line_reader::{LineMode, LineSourceReader};
pub use multiplexer::{
    Interrupts, Multiplexer, MultiplexerOptions, MultiplexerState, SessionStats, SessionSummary,
};
pub use prompt::PromptCoordinator;
pub use signal_bridge::{InterruptSource, SignalBridge};
