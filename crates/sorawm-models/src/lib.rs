//! Shared data models for the watermark-removal worker.
//!
//! This crate provides Serde-serializable types for:
//! - Tasks claimed from the remote queue
//! - Flow results and session cookies
//! - Proxy pool entries

pub mod proxy;
pub mod session;
pub mod task;

// Re-export common types
pub use proxy::{ProxyConfig, ProxyParseError};
pub use session::{cookie_header, SessionCookie};
pub use task::{RemovalResult, Task};
