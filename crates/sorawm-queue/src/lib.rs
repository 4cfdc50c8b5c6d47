//! HTTP client for the remote task queue.
//!
//! The queue owns all task state; this client only claims a task,
//! reports a terminal failure, resets a task for retry, or completes
//! it with a result URL. The claim call is the queue's concurrency
//! boundary; nothing here adds coordination on top of it.

pub mod client;
pub mod error;

pub use client::{QueueConfig, TaskClient};
pub use error::{QueueError, QueueResult};
