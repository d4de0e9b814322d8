//! WebSocket URL parsing
//!
//! Supports formats:
//! * ws://host[:port][/path][?query]
//! * wss://host[:port][/path][?query]

use crate::{Error, Result};

/// Parsed WebSocket endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsUrl {
    /// Whether the scheme was `wss` (TLS)
    pub secure: bool,
    /// Hostname or IP literal (IPv6 without brackets)
    pub host: String,
    /// Explicit or scheme-default port
    pub port: u16,
    /// Request path including query string, never empty
    pub path: String,
}

impl WsUrl {
    /// Parse a `ws://` or `wss://` URL.
    pub fn parse(s: &str) -> Result<Self> {
        let (secure, rest) = if let Some(rest) = s.strip_prefix("wss://") {
            (true, rest)
        } else if let Some(rest) = s.strip_prefix("ws://") {
            (false, rest)
        } else {
            return Err(Error::InvalidArgument(format!(
                "URL must start with ws:// or wss://: '{}'",
                s
            )));
        };

        let (host_port, path) = match rest.find('/') {
            Some(pos) => {
                let (hp, p) = rest.split_at(pos);
                (hp, p.to_string())
            }
            None => (rest, "/".to_string()),
        };

        let (host, port) = Self::split_host_port(host_port, secure)?;

        if host.is_empty() {
            return Err(Error::InvalidArgument(format!("URL has no host: '{}'", s)));
        }

        Ok(Self {
            secure,
            host,
            port,
            path,
        })
    }

    fn split_host_port(host_port: &str, secure: bool) -> Result<(String, u16)> {
        let default_port = if secure { 443 } else { 80 };

        // IPv6 literal: [::1]:9001
        if let Some(rest) = host_port.strip_prefix('[') {
            let end = rest.find(']').ok_or_else(|| {
                Error::InvalidArgument(format!("unterminated IPv6 literal: '{}'", host_port))
            })?;
            let host = rest[..end].to_string();
            let after = &rest[end + 1..];
            let port = match after.strip_prefix(':') {
                Some(p) => p
                    .parse()
                    .map_err(|_| Error::InvalidArgument(format!("invalid port: '{}'", p)))?,
                None if after.is_empty() => default_port,
                None => {
                    return Err(Error::InvalidArgument(format!(
                        "unexpected characters after IPv6 literal: '{}'",
                        host_port
                    )))
                }
            };
            return Ok((host, port));
        }

        match host_port.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse()
                    .map_err(|_| Error::InvalidArgument(format!("invalid port: '{}'", port)))?;
                Ok((host.to_string(), port))
            }
            None => Ok((host_port.to_string(), default_port)),
        }
    }

    /// Value for the `Host` header: omits the port when it is the scheme
    /// default, matching what browsers send.
    pub fn host_header(&self) -> String {
        let default_port = if self.secure { 443 } else { 80 };
        if self.port == default_port {
            self.host.clone()
        } else if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Request path for the upgrade request line.
    pub fn request_path(&self) -> &str {
        &self.path
    }
}

impl std::fmt::Display for WsUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let scheme = if self.secure { "wss" } else { "ws" };
        if self.host.contains(':') {
            write!(f, "{}://[{}]:{}{}", scheme, self.host, self.port, self.path)
        } else {
            write!(f, "{}://{}:{}{}", scheme, self.host, self.port, self.path)
        }
    }
}
