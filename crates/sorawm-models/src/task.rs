//! Task and flow result types.

use serde::{Deserialize, Serialize};

/// One unit of work claimed from the remote queue.
///
/// The worker holds a read-only, single-use copy for the duration of
/// one iteration; the queue owns the authoritative status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Queue-assigned task ID.
    pub id: String,
    /// Source video share URL. Optional at the wire level so a
    /// malformed task can be observed and reported instead of
    /// failing to decode.
    #[serde(default)]
    pub video_url: Option<String>,
}

impl Task {
    /// Create a new task (used by tests and tooling).
    pub fn new(id: impl Into<String>, video_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            video_url: Some(video_url.into()),
        }
    }
}

/// The only successful outcome of the watermark-removal flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovalResult {
    /// URL of the watermark-free video asset.
    pub media_url: String,
}

impl RemovalResult {
    pub fn new(media_url: impl Into<String>) -> Self {
        Self {
            media_url: media_url.into(),
        }
    }
}
