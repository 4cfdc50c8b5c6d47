//! Direct invocation of the target site's removal endpoint.
//!
//! The browser session only exists to obtain valid cookies; the
//! actual removal call is a plain HTTP POST made with those cookies
//! and a realistic browser header set, through the same proxy the
//! session uses.

use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, COOKIE, ORIGIN, REFERER, USER_AGENT};
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};

use sorawm_models::{cookie_header, RemovalResult, SessionCookie};

use crate::error::{WorkerError, WorkerResult};

/// Where and how to call the endpoint.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Full endpoint URL.
    pub endpoint: String,
    /// Target site origin, sent as `origin`.
    pub origin: String,
    /// Workflow page URL, sent as `referer`.
    pub referer: String,
    /// User agent matching the live session's fingerprint.
    pub user_agent: String,
}

/// Outcome of one invocation attempt.
#[derive(Debug)]
pub enum InvokeOutcome {
    Success(RemovalResult),
    /// 401/403: the harvested cookies no longer authenticate.
    AuthExpired,
    /// Anything else; the message is for logs/notifications only.
    Failed(String),
}

/// POST the source URL to the removal endpoint with harvested
/// cookies. Never panics; network errors become `Failed`.
pub async fn invoke_removal(
    client: &Client,
    invocation: &Invocation,
    cookies: &[SessionCookie],
    source_url: &str,
) -> InvokeOutcome {
    let response = client
        .post(&invocation.endpoint)
        .header(COOKIE, cookie_header(cookies))
        .header(USER_AGENT, &invocation.user_agent)
        .header(ACCEPT, "application/json, text/plain, */*")
        .header(ACCEPT_LANGUAGE, "en-US,en;q=0.9")
        .header(ORIGIN, &invocation.origin)
        .header(REFERER, &invocation.referer)
        .header("sec-fetch-dest", "empty")
        .header("sec-fetch-mode", "cors")
        .header("sec-fetch-site", "same-origin")
        .json(&serde_json::json!({ "soraUrl": source_url }))
        .send()
        .await;

    let response = match response {
        Ok(response) => response,
        Err(e) => return InvokeOutcome::Failed(format!("request error: {e}")),
    };

    let status = response.status();
    if status.as_u16() == 401 || status.as_u16() == 403 {
        warn!(status = %status, "Removal endpoint rejected session cookies");
        return InvokeOutcome::AuthExpired;
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return InvokeOutcome::Failed(format!("endpoint returned {status}: {body}"));
    }

    let body: Value = match response.json().await {
        Ok(body) => body,
        Err(e) => return InvokeOutcome::Failed(format!("invalid JSON response: {e}")),
    };

    match interpret_response(&body) {
        Some(result) => {
            debug!(media_url = %result.media_url, "Removal endpoint succeeded");
            InvokeOutcome::Success(result)
        }
        None => InvokeOutcome::Failed(format!("unexpected response shape: {body}")),
    }
}

/// Invoke the endpoint, refreshing the session state at most once.
///
/// A 401/403 on the first call runs `refresh` to obtain fresh
/// cookies and retries exactly once; a second 401/403 is a hard
/// failure. Any other failure never triggers a refresh.
pub async fn invoke_with_retry<F, Fut>(
    client: &Client,
    invocation: &Invocation,
    cookies: &[SessionCookie],
    source_url: &str,
    refresh: F,
) -> WorkerResult<RemovalResult>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = WorkerResult<Vec<SessionCookie>>>,
{
    match invoke_removal(client, invocation, cookies, source_url).await {
        InvokeOutcome::Success(result) => return Ok(result),
        InvokeOutcome::Failed(message) => return Err(WorkerError::session(message)),
        InvokeOutcome::AuthExpired => {
            debug!("Session cookies expired, refreshing once");
        }
    }

    let cookies = refresh().await?;
    match invoke_removal(client, invocation, &cookies, source_url).await {
        InvokeOutcome::Success(result) => Ok(result),
        InvokeOutcome::AuthExpired => Err(WorkerError::session(
            "endpoint rejected freshly refreshed cookies",
        )),
        InvokeOutcome::Failed(message) => Err(WorkerError::session(message)),
    }
}

/// Match a 2xx body against the two accepted shapes.
///
/// Current: `{ "success": true, "videoUrl": "..." }`.
/// Legacy: `{ "errorCode": null, "mediaUrl": "..." }`, where a
/// missing `errorCode` also counts as null.
pub fn interpret_response(body: &Value) -> Option<RemovalResult> {
    if body.get("success").and_then(Value::as_bool) == Some(true) {
        if let Some(url) = body.get("videoUrl").and_then(Value::as_str) {
            return Some(RemovalResult::new(url));
        }
    }

    let error_code_clear = match body.get("errorCode") {
        None => true,
        Some(code) => code.is_null(),
    };
    if error_code_clear {
        if let Some(url) = body.get("mediaUrl").and_then(Value::as_str) {
            return Some(RemovalResult::new(url));
        }
    }

    None
}
