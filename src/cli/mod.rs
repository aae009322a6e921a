//! Command Line Interface module
//!
//! Implements argument parsing for relaysh.

use clap::Parser;
use clap::error::ErrorKind;

/// Exit status used for usage errors.
pub const USAGE_EXIT_CODE: u8 = 1;

#[derive(Parser, Debug, Clone)]
#[command(name = "relaysh")]
#[command(about = "Interactive remote shell client")]
#[command(
    long_about = "Connects to a remote host over SSH, starts a shell and relays the local terminal to it line by line"
)]
#[command(version)]
pub struct Cli {
    /// Remote target in the form [user@]host[:port]
    #[arg(value_name = "[user@]host[:port]")]
    pub target: String,

    /// Enable VT100 mode: request a pseudo-terminal on the remote side
    #[arg(short = 't', long = "tty")]
    pub tty: bool,

    /// Configuration file path
    #[arg(long, default_value = "relaysh.toml")]
    pub config_file: String,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long)]
    pub log_level: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

/// Outcome of parsing the process arguments.
#[derive(Debug)]
pub enum ParseOutcome {
    /// Arguments are valid, continue with the session
    Run(Cli),
    /// Help or version output was requested; exit successfully after printing
    Informational(clap::Error),
    /// Arguments are invalid; print usage and exit with [`USAGE_EXIT_CODE`]
    Usage(clap::Error),
}

impl Cli {
    /// Parse command line arguments without exiting the process
    pub fn parse_args() -> ParseOutcome {
        Self::parse_from_iter(std::env::args_os())
    }

    /// Parse an explicit argument list
    pub fn parse_from_iter<I, T>(args: I) -> ParseOutcome
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        match Self::try_parse_from(args) {
            Ok(cli) => ParseOutcome::Run(cli),
            Err(err) => match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                    ParseOutcome::Informational(err)
                }
                _ => ParseOutcome::Usage(err),
            },
        }
    }

    /// Resolve the log level: verbose wins, then the flag, then the config value
    pub fn effective_log_level(&self, configured: &str) -> String {
        if self.verbose {
            "debug".to_string()
        } else {
            self.log_level
                .clone()
                .unwrap_or_else(|| configured.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> ParseOutcome {
        Cli::parse_from_iter(std::iter::once("relaysh").chain(args.iter().copied()))
    }

    #[test]
    fn test_parse_target_only() {
        let ParseOutcome::Run(cli) = parse(&["alice@example.org:2222"]) else {
            panic!("expected valid arguments");
        };
        assert_eq!(cli.target, "alice@example.org:2222");
        assert!(!cli.tty);
        assert_eq!(cli.config_file, "relaysh.toml");
    }

    #[test]
    fn test_parse_tty_flag() {
        let ParseOutcome::Run(cli) = parse(&["-t", "example.org"]) else {
            panic!("expected valid arguments");
        };
        assert!(cli.tty);
        assert_eq!(cli.target, "example.org");
    }

    #[test]
    fn test_missing_target_is_usage_error() {
        assert!(matches!(parse(&[]), ParseOutcome::Usage(_)));
    }

    #[test]
    fn test_extra_positional_is_usage_error() {
        assert!(matches!(parse(&["a", "b"]), ParseOutcome::Usage(_)));
    }

    #[test]
    fn test_help_is_informational() {
        assert!(matches!(parse(&["--help"]), ParseOutcome::Informational(_)));
    }

    #[test]
    fn test_effective_log_level() {
        let ParseOutcome::Run(mut cli) = parse(&["host"]) else {
            panic!("expected valid arguments");
        };
        assert_eq!(cli.effective_log_level("warn"), "warn");

        cli.log_level = Some("trace".to_string());
        assert_eq!(cli.effective_log_level("warn"), "trace");

        cli.verbose = true;
        assert_eq!(cli.effective_log_level("warn"), "debug");
    }
}
