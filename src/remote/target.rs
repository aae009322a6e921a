//! Parsing of `[user@]host[:port]` targets

use std::fmt;

use crate::session::SessionError;

/// Where to connect and as whom
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub user: String,
    pub host: String,
    pub port: u16,
}

impl Target {
    /// Parse a target, filling in the user and port defaults
    pub fn parse(raw: &str, default_user: &str, default_port: u16) -> Result<Self, SessionError> {
        let raw = raw.trim();
        let invalid = |reason: &str| SessionError::InvalidTarget(format!("{}: {}", raw, reason));

        let (user, address) = match raw.rsplit_once('@') {
            Some((user, address)) => {
                if user.is_empty() {
                    return Err(invalid("empty user name"));
                }
                (user.to_string(), address)
            }
            None => (default_user.to_string(), raw),
        };

        let (host, port) = if let Some(rest) = address.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| invalid("missing closing bracket"))?;
            let port = match tail {
                "" => None,
                tail => Some(
                    tail.strip_prefix(':')
                        .ok_or_else(|| invalid("unexpected text after address"))?,
                ),
            };
            (host, port)
        } else {
            match address.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (address, None),
            }
        };

        if host.is_empty() {
            return Err(invalid("empty host"));
        }

        let port = match port {
            Some(port) => port
                .parse::<u16>()
                .ok()
                .filter(|port| *port != 0)
                .ok_or_else(|| invalid("port must be a number between 1 and 65535"))?,
            None => default_port,
        };

        Ok(Self {
            user,
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "{}@[{}]:{}", self.user, self.host, self.port)
        } else {
            write!(f, "{}@{}:{}", self.user, self.host, self.port)
        }
    }
}
