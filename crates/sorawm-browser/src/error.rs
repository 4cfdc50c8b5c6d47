//! Browser session error types.

use thiserror::Error;

pub type BrowserResult<T> = Result<T, BrowserError>;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("Browser launch failed: {0}")]
    Launch(String),

    #[error("CDP error: {0}")]
    Cdp(#[from] chromiumoxide::error::CdpError),

    #[error("Timed out waiting for {0}")]
    Timeout(String),

    #[error("No visible element matched any of: {}", .selectors.join(", "))]
    NoVisibleElement { selectors: Vec<String> },

    #[error("No matching network response for {method} {path_fragment}")]
    NoMatchingResponse {
        method: String,
        path_fragment: String,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Session state error: {0}")]
    InvalidState(String),
}

impl BrowserError {
    pub fn launch(msg: impl Into<String>) -> Self {
        Self::Launch(msg.into())
    }

    pub fn timeout(what: impl Into<String>) -> Self {
        Self::Timeout(what.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }
}
