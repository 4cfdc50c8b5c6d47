//! Form-driven invocation.
//!
//! Instead of calling the internal endpoint directly, this strategy
//! fills the page's URL input and clicks the submit button, then
//! captures the JSON the page's own XHR receives. The site has
//! shuffled its markup before, so both the input and the button are
//! located through a candidate selector list tried in order.

use std::time::Duration;

use tracing::{info, warn};

use sorawm_browser::BrowserSession;
use sorawm_models::RemovalResult;

use super::invoke::interpret_response;

/// Candidates for the source URL input, most specific first.
const INPUT_SELECTORS: &[&str] = &[
    "#video-input",
    "input[name=\"url\"]",
    "input[name=\"videoUrl\"]",
    "input[placeholder*=\"Sora\"]",
    "input[placeholder*=\"Video URL\"]",
];

/// Candidates for the submit button.
const SUBMIT_SELECTORS: &[&str] = &["button.btn", "button[type=\"submit\"]"];

/// Timing knobs for the form interaction.
#[derive(Debug, Clone, Copy)]
pub struct DomTimings {
    pub element_timeout: Duration,
    pub response_timeout: Duration,
    pub typing_delay: Duration,
}

/// Drive the page's form for one source URL. Returns `None` on any
/// failure; the cause is logged here and the caller screenshots the
/// page for the notification.
pub async fn remove_via_dom(
    session: &BrowserSession,
    api_path: &str,
    source_url: &str,
    timings: DomTimings,
) -> Option<RemovalResult> {
    let input = match session
        .find_first_visible(INPUT_SELECTORS, timings.element_timeout)
        .await
    {
        Ok(input) => input,
        Err(e) => {
            warn!("No visible URL input on the page: {e}");
            return None;
        }
    };

    if let Err(e) = session
        .type_slowly(&input, source_url, timings.typing_delay)
        .await
    {
        warn!("Typing into the URL input failed: {e}");
        return None;
    }

    // The page sometimes rewrites the field while rendering; a value
    // mismatch here would submit the wrong URL.
    match session.input_value(&input).await {
        Ok(value) if value == source_url => {}
        Ok(value) => {
            warn!(expected = %source_url, got = %value, "Input round-trip mismatch");
            return None;
        }
        Err(e) => {
            warn!("Reading back the input value failed: {e}");
            return None;
        }
    }

    // Subscribe before clicking so the response cannot slip past.
    let watcher = match session.watch_response(api_path, "POST").await {
        Ok(watcher) => watcher,
        Err(e) => {
            warn!("Network watch setup failed: {e}");
            return None;
        }
    };

    match session
        .click_first_visible(SUBMIT_SELECTORS, timings.element_timeout)
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            warn!("No visible submit button on the page");
            return None;
        }
        Err(e) => {
            warn!("Clicking the submit button failed: {e}");
            return None;
        }
    }

    let body = match watcher.wait_json(timings.response_timeout).await {
        Ok(body) => body,
        Err(e) => {
            warn!(path = %api_path, "No matching response captured: {e}");
            return None;
        }
    };

    match interpret_response(&body) {
        Some(result) => {
            info!(media_url = %result.media_url, "Form submission succeeded");
            Some(result)
        }
        None => {
            warn!(body = %body, "Form submission returned an error payload");
            None
        }
    }
}
