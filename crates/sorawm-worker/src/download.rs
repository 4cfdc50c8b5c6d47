//! Result video download.
//!
//! The media URL returned by the flow points at a plain CDN asset, so
//! a streaming GET is all that is needed. Failures are logged and
//! collapse to `None`; the caller treats that as a retryable error
//! and resets the task.

use std::path::{Path, PathBuf};

use futures::StreamExt;
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{WorkerError, WorkerResult};

/// Download a video to `output_dir`, returning the written path or
/// `None` on any failure.
pub async fn download_video(client: &Client, url: &str, output_dir: &Path) -> Option<PathBuf> {
    match try_download(client, url, output_dir).await {
        Ok(path) => Some(path),
        Err(e) => {
            warn!(url = %url, "Video download failed: {e}");
            None
        }
    }
}

async fn try_download(client: &Client, url: &str, output_dir: &Path) -> WorkerResult<PathBuf> {
    tokio::fs::create_dir_all(output_dir).await?;

    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(WorkerError::download(format!(
            "request returned {status}"
        )));
    }

    let path = output_dir.join(format!("{}.mp4", Uuid::new_v4()));
    let mut file = tokio::fs::File::create(&path).await?;
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        written += chunk.len() as u64;
        file.write_all(&chunk).await?;
    }
    file.flush().await?;

    if written == 0 {
        tokio::fs::remove_file(&path).await.ok();
        return Err(WorkerError::download("downloaded file is empty"));
    }

    info!(
        path = ?path,
        size_mb = written as f64 / 1_048_576.0,
        "Downloaded watermark-free video"
    );
    Ok(path)
}
