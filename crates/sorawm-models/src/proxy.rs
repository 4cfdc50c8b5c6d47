//! Proxy pool entries.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyParseError {
    #[error("Invalid proxy entry '{0}': expected host:port or host:port:user:pass")]
    InvalidEntry(String),
}

/// One endpoint from the static proxy pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Host and port, e.g. `gate.example.net:7000`.
    pub server: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ProxyConfig {
    /// Parse a pool entry of the form `host:port` or
    /// `host:port:user:pass`.
    pub fn parse(entry: &str) -> Result<Self, ProxyParseError> {
        let parts: Vec<&str> = entry.trim().split(':').collect();
        match parts.as_slice() {
            [host, port] if !host.is_empty() && !port.is_empty() => Ok(Self {
                server: format!("{host}:{port}"),
                username: None,
                password: None,
            }),
            [host, port, user, pass] if !host.is_empty() && !port.is_empty() => Ok(Self {
                server: format!("{host}:{port}"),
                username: Some((*user).to_string()),
                password: Some((*pass).to_string()),
            }),
            _ => Err(ProxyParseError::InvalidEntry(entry.to_string())),
        }
    }

    /// Parse a comma-separated pool list, skipping blank entries.
    pub fn parse_pool(list: &str) -> Result<Vec<Self>, ProxyParseError> {
        list.split(',')
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(Self::parse)
            .collect()
    }

    /// URL form consumed by reqwest's proxy support.
    pub fn http_url(&self) -> String {
        format!("http://{}", self.server)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_entry() {
        let proxy = ProxyConfig::parse("gate.example.net:7000").unwrap();
        assert_eq!(proxy.server, "gate.example.net:7000");
        assert!(proxy.username.is_none());
    }

    #[test]
    fn test_parse_authenticated_entry() {
        let proxy = ProxyConfig::parse("gate.example.net:7000:user1:pw").unwrap();
        assert_eq!(proxy.username.as_deref(), Some("user1"));
        assert_eq!(proxy.password.as_deref(), Some("pw"));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(ProxyConfig::parse("nonsense").is_err());
        assert!(ProxyConfig::parse(":7000").is_err());
    }

    #[test]
    fn test_parse_pool_skips_blank_entries() {
        let pool = ProxyConfig::parse_pool("a.net:1, ,b.net:2:u:p,").unwrap();
        assert_eq!(pool.len(), 2);
        assert_eq!(pool[1].server, "b.net:2");
    }
}
