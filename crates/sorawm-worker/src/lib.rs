//! Watermark-removal worker.
//!
//! A single-task worker: claim one task from the remote queue, drive
//! a browser session through the third-party removal workflow,
//! download the result, report back, repeat. One task in flight per
//! process; horizontal scaling is more processes.

pub mod config;
pub mod download;
pub mod error;
pub mod flow;
pub mod proxy;
pub mod state;
pub mod worker;

pub use config::{FlowStrategy, WorkerConfig};
pub use error::{WorkerError, WorkerResult};
pub use state::{RestartBackoff, WorkerState};
pub use worker::{run_worker_once, TaskOutcome, Worker};
