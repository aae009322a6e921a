//! Configuration management module
//!
//! Connection defaults, terminal settings and session tuning for relaysh,
//! loaded from TOML with `RELAYSH_*` environment overrides.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

/// Identity used when neither the target, the config file nor the
/// environment names a user.
pub const FALLBACK_USER: &str = "glenda";

/// Standard SSH port
pub const DEFAULT_SSH_PORT: u16 = 22;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Logging level
    pub log_level: String,

    /// File-based logging configuration
    pub log: LogConfig,

    /// Connection defaults
    pub connection: ConnectionConfig,

    /// Pseudo-terminal settings used in VT mode
    pub terminal: TerminalConfig,

    /// Session multiplexer tuning
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// User for targets without `user@`; empty means "from the environment"
    pub default_user: String,

    /// Port for targets without `:port`
    pub default_port: u16,

    /// Connection and authentication timeout in seconds
    pub connect_timeout_secs: u64,

    /// Transport keepalive interval in seconds, 0 disables keepalives
    pub keepalive_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TerminalConfig {
    /// Terminal type announced to the remote side
    pub term: String,

    /// Columns used when the local terminal size is unknown
    pub default_cols: u16,

    /// Rows used when the local terminal size is unknown
    pub default_rows: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Prompt printed in line mode when the session is idle
    pub prompt: String,

    /// Quiet period before a due prompt is printed
    pub prompt_delay_ms: u64,

    /// How long to keep relaying remote output after local end of input
    pub drain_timeout_ms: u64,

    /// Upper bound on events printed in one output burst
    pub max_drain_batch: usize,

    /// Per-stream line buffer between readers and the multiplexer
    pub line_buffer: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// Absolute or relative path to the log file
    pub file_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log: LogConfig::default(),
            connection: ConnectionConfig::default(),
            terminal: TerminalConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            default_user: String::new(),
            default_port: DEFAULT_SSH_PORT,
            connect_timeout_secs: 15,
            keepalive_secs: 30,
        }
    }
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            term: "xterm".to_string(),
            default_cols: 80,
            default_rows: 24,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            prompt: "% ".to_string(),
            prompt_delay_ms: 20,
            drain_timeout_ms: 2000,
            max_drain_batch: 256,
            line_buffer: 64,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            file_path: "logs/relaysh.log".to_string(),
        }
    }
}

impl ConnectionConfig {
    /// Resolve the user for targets that do not name one
    pub fn resolve_default_user(&self) -> String {
        self.resolve_default_user_with(|key| env::var(key).ok())
    }

    fn resolve_default_user_with<F>(&self, lookup: F) -> String
    where
        F: Fn(&str) -> Option<String>,
    {
        if !self.default_user.trim().is_empty() {
            return self.default_user.trim().to_string();
        }

        ["USER", "USERNAME"]
            .iter()
            .filter_map(|key| lookup(*key))
            .map(|value| value.trim().to_string())
            .find(|value| !value.is_empty())
            .unwrap_or_else(|| FALLBACK_USER.to_string())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn keepalive(&self) -> Option<Duration> {
        (self.keepalive_secs > 0).then(|| Duration::from_secs(self.keepalive_secs))
    }
}

impl Config {
    /// Load `path` if it exists, otherwise start from defaults. Environment
    /// overrides and validation apply either way; any failure falls back to
    /// plain defaults and is returned for the caller to report.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> (Self, Option<anyhow::Error>) {
        Self::load_or_default_with(path, |key| env::var(key).ok())
    }

    fn load_or_default_with<P, F>(path: P, lookup: F) -> (Self, Option<anyhow::Error>)
    where
        P: AsRef<Path>,
        F: Fn(&str) -> Option<String>,
    {
        let loaded = if path.as_ref().exists() {
            Self::load_from_file_with(&path, &lookup)
        } else {
            let mut config = Config::default();
            config.apply_overrides_with(&lookup);
            config.validate().map(|()| config)
        };

        match loaded {
            Ok(config) => (config, None),
            Err(err) => (Config::default(), Some(err)),
        }
    }

    /// Load configuration from file with environment variable overrides
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::load_from_file_with(path, |key| env::var(key).ok())
    }

    fn load_from_file_with<P, F>(path: P, lookup: F) -> Result<Self>
    where
        P: AsRef<Path>,
        F: Fn(&str) -> Option<String>,
    {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        config.apply_overrides_with(lookup);
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_with(|key| env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup
    pub fn apply_overrides_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        // RELAYSH_LOG_LEVEL - logging level
        if let Some(log_level) = lookup("RELAYSH_LOG_LEVEL") {
            self.log_level = log_level;
        }

        // RELAYSH_LOG_FILE_PATH - logging destination file
        if let Some(file_path) = lookup("RELAYSH_LOG_FILE_PATH") {
            if !file_path.trim().is_empty() {
                self.log.file_path = file_path;
            }
        }

        // RELAYSH_DEFAULT_USER - user for targets without `user@`
        if let Some(user) = lookup("RELAYSH_DEFAULT_USER") {
            self.connection.default_user = user;
        }

        // RELAYSH_DEFAULT_PORT - port for targets without `:port`
        if let Some(port) = lookup("RELAYSH_DEFAULT_PORT") {
            if let Ok(value) = port.parse::<u16>() {
                self.connection.default_port = value;
            }
        }

        // RELAYSH_CONNECT_TIMEOUT_SECS - connection timeout
        if let Some(timeout) = lookup("RELAYSH_CONNECT_TIMEOUT_SECS") {
            if let Ok(value) = timeout.parse::<u64>() {
                self.connection.connect_timeout_secs = value;
            }
        }

        // RELAYSH_TERM - terminal type for VT mode
        if let Some(term) = lookup("RELAYSH_TERM") {
            if !term.trim().is_empty() {
                self.terminal.term = term;
            }
        }

        // RELAYSH_PROMPT - idle prompt in line mode
        if let Some(prompt) = lookup("RELAYSH_PROMPT") {
            self.session.prompt = prompt;
        }

        // RELAYSH_DRAIN_TIMEOUT_MS - output drain after end of input
        if let Some(timeout) = lookup("RELAYSH_DRAIN_TIMEOUT_MS") {
            if let Ok(value) = timeout.parse::<u64>() {
                self.session.drain_timeout_ms = value;
            }
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.connection.default_port == 0 {
            anyhow::bail!("connection.default_port must be greater than 0");
        }

        if self.connection.connect_timeout_secs == 0 {
            anyhow::bail!("Connect timeout must be greater than 0");
        }

        if self.terminal.term.trim().is_empty() {
            anyhow::bail!("terminal.term must not be empty");
        }

        if self.terminal.default_cols == 0 || self.terminal.default_rows == 0 {
            anyhow::bail!("Terminal dimensions must be greater than 0");
        }

        if self.session.max_drain_batch == 0 {
            anyhow::bail!("session.max_drain_batch must be greater than 0");
        }

        if self.session.line_buffer == 0 {
            anyhow::bail!("session.line_buffer must be greater than 0");
        }

        if self.log.file_path.trim().is_empty() {
            anyhow::bail!("Log file path must not be empty");
        }

        Ok(())
    }
}
