//! User interface module
//!
//! Local terminal output and terminal queries.

pub mod console;

pub use console::{Console, END_OF_INPUT_NOTICE};

use crate::config::TerminalConfig;

/// Size of the local terminal as (columns, rows), or the configured
/// defaults when it cannot be determined (e.g. output is not a tty).
pub fn terminal_dimensions(config: &TerminalConfig) -> (u16, u16) {
    match crossterm::terminal::size() {
        Ok((cols, rows)) if cols > 0 && rows > 0 => (cols, rows),
        _ => (config.default_cols, config.default_rows),
    }
}
