//! Task queue client over the remote tool API.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Serialize;
use tracing::{debug, info};

use sorawm_models::Task;

use crate::error::{QueueError, QueueResult};

/// Queue client configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Base URL of the tool API, e.g. `https://media.example.com/api`.
    pub base_url: String,
    /// API key sent as `x-api-key` on every request.
    pub api_key: Option<String>,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api".to_string(),
            api_key: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        let base_url = std::env::var("TASK_API_URL")
            .map_err(|_| QueueError::config("TASK_API_URL not set"))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: std::env::var("TASK_API_KEY").ok(),
            request_timeout: Duration::from_secs(
                std::env::var("TASK_API_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
        })
    }
}

#[derive(Debug, Serialize)]
struct ClaimRequest<'a> {
    product_code: &'a str,
}

#[derive(Debug, Serialize)]
struct ReportRequest<'a> {
    reason: &'a str,
}

#[derive(Debug, Serialize)]
struct CompleteRequest<'a> {
    result_url: &'a str,
}

/// Thin HTTP client for claim/report/reset/complete.
pub struct TaskClient {
    client: Client,
    config: QueueConfig,
}

impl TaskClient {
    /// Create a new task client.
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env()?)
    }

    /// Claim one pending task for a product code.
    ///
    /// Returns `None` when the queue has no pending task (HTTP 204 or
    /// an empty body).
    pub async fn claim_task(&self, product_code: &str) -> QueueResult<Option<Task>> {
        let url = format!("{}/tasks/claim", self.config.base_url);
        let response = self
            .request(&url)
            .json(&ClaimRequest { product_code })
            .send()
            .await?;

        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let response = Self::check_status(response).await?;

        let body = response.text().await?;
        if body.trim().is_empty() || body.trim() == "null" {
            return Ok(None);
        }

        let task: Task = serde_json::from_str(&body)?;
        debug!(task_id = %task.id, "Claimed task");
        Ok(Some(task))
    }

    /// Report a terminal failure. The task will not be retried.
    pub async fn report_task(&self, task_id: &str, reason: &str) -> QueueResult<()> {
        let url = format!("{}/tasks/{}/report", self.config.base_url, task_id);
        let response = self
            .request(&url)
            .json(&ReportRequest { reason })
            .send()
            .await?;
        Self::check_status(response).await?;
        info!(task_id = %task_id, reason = %reason, "Reported task as failed");
        Ok(())
    }

    /// Return a task to the pool for another attempt.
    pub async fn reset_task(&self, task_id: &str) -> QueueResult<()> {
        let url = format!("{}/tasks/{}/reset", self.config.base_url, task_id);
        let response = self.request(&url).send().await?;
        Self::check_status(response).await?;
        info!(task_id = %task_id, "Reset task for retry");
        Ok(())
    }

    /// Complete a task with the watermark-free result URL.
    pub async fn complete_task(&self, task_id: &str, result_url: &str) -> QueueResult<()> {
        let url = format!("{}/tasks/{}/complete", self.config.base_url, task_id);
        let response = self
            .request(&url)
            .json(&CompleteRequest { result_url })
            .send()
            .await?;
        Self::check_status(response).await?;
        info!(task_id = %task_id, result_url = %result_url, "Completed task");
        Ok(())
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        let mut builder = self.client.post(url);
        if let Some(key) = &self.config.api_key {
            builder = builder.header("x-api-key", key);
        }
        builder
    }

    async fn check_status(response: reqwest::Response) -> QueueResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(QueueError::api(status.as_u16(), message))
    }
}
