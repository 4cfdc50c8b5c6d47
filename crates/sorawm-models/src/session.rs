//! Ephemeral browser session state.

use serde::{Deserialize, Serialize};

/// A cookie harvested from the browser context for one origin.
///
/// Never persisted; only used to synthesize a `cookie` header for the
/// direct API invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
}

impl SessionCookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Synthesize a `cookie` request header from harvested cookies.
pub fn cookie_header(cookies: &[SessionCookie]) -> String {
    cookies
        .iter()
        .map(|c| format!("{}={}", c.name, c.value))
        .collect::<Vec<_>>()
        .join("; ")
}
