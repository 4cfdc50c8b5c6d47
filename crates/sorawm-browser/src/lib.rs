//! Browser session management over the Chrome DevTools Protocol.
//!
//! A [`BrowserSession`] owns one headless Chromium instance bound to a
//! proxy and a randomized fingerprint, plus a single page. Sessions
//! are created by [`BrowserSession::launch`], reused for a bounded
//! number of tasks by the worker, and torn down with a best-effort
//! [`BrowserSession::close`]. No retry happens in here; launch
//! failures propagate to the caller.

pub mod error;
pub mod fingerprint;
pub mod session;

pub use error::{BrowserError, BrowserResult};
pub use session::{BrowserSession, LaunchOptions};
