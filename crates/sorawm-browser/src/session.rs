//! One live browser context/page pair.

use std::time::{Duration, Instant};

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventRequestWillBeSent, EventResponseReceived, GetCookiesParams,
    GetResponseBodyParams, RequestId,
};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::element::Element;
use chromiumoxide::listeners::EventStream;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use sorawm_models::{ProxyConfig, SessionCookie};

use crate::error::{BrowserError, BrowserResult};
use crate::fingerprint::{Fingerprint, STEALTH_SCRIPTS};

/// Polling interval for element visibility probes.
const VISIBILITY_POLL: Duration = Duration::from_millis(250);

/// Launch options shared by every session of a worker process.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub headless: bool,
    /// Explicit Chrome binary; `None` lets chromiumoxide autodetect.
    pub chrome_executable: Option<String>,
    pub extra_args: Vec<String>,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            headless: true,
            chrome_executable: None,
            extra_args: Vec::new(),
        }
    }
}

/// A live browser session: one Chromium process, one page, bound to
/// one proxy and one fingerprint for its whole lifetime.
pub struct BrowserSession {
    browser: Browser,
    page: Page,
    handler_task: JoinHandle<()>,
    fingerprint: Fingerprint,
    proxy: Option<ProxyConfig>,
}

impl BrowserSession {
    /// Launch a fresh session bound to `proxy` (when given) and a
    /// randomized fingerprint. Failures propagate; the caller decides
    /// whether they are fatal for the iteration.
    pub async fn launch(
        options: &LaunchOptions,
        proxy: Option<ProxyConfig>,
    ) -> BrowserResult<Self> {
        let fingerprint = Fingerprint::random();
        let (width, height) = fingerprint.viewport;

        let mut builder = BrowserConfig::builder()
            .window_size(width, height)
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-infobars")
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-background-networking");

        if !options.headless {
            builder = builder.with_head();
        }
        if let Some(exe) = &options.chrome_executable {
            builder = builder.chrome_executable(exe);
        }
        if let Some(proxy) = &proxy {
            builder = builder.arg(format!("--proxy-server={}", proxy.server));
        }
        for arg in &options.extra_args {
            builder = builder.arg(arg);
        }

        let config = builder.build().map_err(BrowserError::Launch)?;
        let (browser, mut handler) = Browser::launch(config).await?;

        // The handler drives the CDP websocket; it must be polled for
        // the session's whole lifetime.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("CDP handler error: {e}");
                }
            }
        });

        let page = browser.new_page("about:blank").await?;
        page.set_user_agent(fingerprint.user_agent).await?;

        for script in STEALTH_SCRIPTS {
            let params = AddScriptToEvaluateOnNewDocumentParams::builder()
                .source(*script)
                .build()
                .map_err(BrowserError::Launch)?;
            page.execute(params).await?;
        }

        // Network events are needed for response waiting.
        page.execute(EnableParams::default()).await?;

        info!(
            user_agent = %fingerprint.user_agent,
            proxy = ?proxy.as_ref().map(|p| p.server.as_str()),
            "Launched browser session"
        );

        Ok(Self {
            browser,
            page,
            handler_task,
            fingerprint,
            proxy,
        })
    }

    /// The proxy this session is bound to.
    pub fn proxy(&self) -> Option<&ProxyConfig> {
        self.proxy.as_ref()
    }

    /// The user agent this session presents.
    pub fn user_agent(&self) -> &str {
        self.fingerprint.user_agent
    }

    /// Current page URL, if any navigation has committed.
    pub async fn current_url(&self) -> BrowserResult<Option<String>> {
        Ok(self.page.url().await?.map(|u| u.to_string()))
    }

    /// Navigate the page, bounded by `nav_timeout`.
    pub async fn goto(&self, url: &str, nav_timeout: Duration) -> BrowserResult<()> {
        timeout(nav_timeout, self.page.goto(url))
            .await
            .map_err(|_| BrowserError::timeout(format!("navigation to {url}")))??;
        Ok(())
    }

    /// Reload the page, bounded by `reload_timeout`.
    pub async fn reload(&self, reload_timeout: Duration) -> BrowserResult<()> {
        timeout(reload_timeout, self.page.reload())
            .await
            .map_err(|_| BrowserError::timeout("page reload".to_string()))??;
        Ok(())
    }

    /// Best-effort Escape press to dismiss focus traps and overlays.
    pub async fn press_escape(&self) {
        if let Ok(body) = self.page.find_element("body").await {
            if let Err(e) = body.press_key("Escape").await {
                debug!("Escape press failed: {e}");
            }
        }
    }

    /// Try each candidate selector in order and return the first
    /// *visible* match. Order is candidate-list order, not DOM order.
    /// Keeps polling until `visibility_timeout` elapses; the error
    /// carries the attempted list for diagnostics.
    pub async fn find_first_visible(
        &self,
        selectors: &[&str],
        visibility_timeout: Duration,
    ) -> BrowserResult<Element> {
        let deadline = Instant::now() + visibility_timeout;
        loop {
            for selector in selectors {
                let elements = match self.page.find_elements(*selector).await {
                    Ok(elements) => elements,
                    Err(_) => continue,
                };
                for element in elements {
                    if Self::is_visible(&element).await {
                        return Ok(element);
                    }
                }
            }
            if Instant::now() >= deadline {
                return Err(BrowserError::NoVisibleElement {
                    selectors: selectors.iter().map(|s| s.to_string()).collect(),
                });
            }
            sleep(VISIBILITY_POLL).await;
        }
    }

    /// Find and click the first visible match, if any, within
    /// `visibility_timeout`. Returns whether a click happened.
    pub async fn click_first_visible(
        &self,
        selectors: &[&str],
        visibility_timeout: Duration,
    ) -> BrowserResult<bool> {
        match self.find_first_visible(selectors, visibility_timeout).await {
            Ok(element) => {
                element.click().await?;
                Ok(true)
            }
            Err(BrowserError::NoVisibleElement { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Clear an input and type `text` with a per-keystroke delay so
    /// client-side validation sees individual key events.
    pub async fn type_slowly(
        &self,
        element: &Element,
        text: &str,
        per_key_delay: Duration,
    ) -> BrowserResult<()> {
        element.click().await?;
        element.call_js_fn("function() { this.value = '' }", false).await?;
        let mut buf = [0u8; 4];
        for ch in text.chars() {
            element.type_str(ch.encode_utf8(&mut buf)).await?;
            sleep(per_key_delay).await;
        }
        Ok(())
    }

    /// Read back the current value of an input element.
    pub async fn input_value(&self, element: &Element) -> BrowserResult<String> {
        let returns = element
            .call_js_fn("function() { return this.value }", false)
            .await?;
        Ok(returns
            .result
            .value
            .as_ref()
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string())
    }

    /// Cookies currently issued for one origin. Never persisted.
    pub async fn cookies_for(&self, origin: &str) -> BrowserResult<Vec<SessionCookie>> {
        let params = GetCookiesParams::builder()
            .urls(vec![origin.to_string()])
            .build();
        let result = self.page.execute(params).await?;
        Ok(result
            .result
            .cookies
            .iter()
            .map(|c| SessionCookie::new(c.name.clone(), c.value.clone()))
            .collect())
    }

    /// Full-page PNG screenshot for failure diagnostics.
    pub async fn screenshot(&self) -> BrowserResult<Vec<u8>> {
        Ok(self
            .page
            .screenshot(ScreenshotParams::builder().full_page(true).build())
            .await?)
    }

    /// Subscribe to network traffic *before* triggering an action, so
    /// the response to that action cannot be missed.
    pub async fn watch_response(
        &self,
        path_fragment: &str,
        method: &str,
    ) -> BrowserResult<ResponseWatcher> {
        Ok(ResponseWatcher {
            requests: self.page.event_listener::<EventRequestWillBeSent>().await?,
            responses: self.page.event_listener::<EventResponseReceived>().await?,
            page: self.page.clone(),
            path_fragment: path_fragment.to_string(),
            method: method.to_string(),
        })
    }

    async fn is_visible(element: &Element) -> bool {
        match element
            .call_js_fn("function() { return this.offsetParent !== null }", false)
            .await
        {
            Ok(returns) => returns
                .result
                .value
                .as_ref()
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Tear the session down. Idempotent-best-effort: every close
    /// error is logged and swallowed so teardown can run on a session
    /// in any state.
    pub async fn close(self) {
        let Self {
            mut browser,
            page,
            handler_task,
            ..
        } = self;

        if let Err(e) = page.close().await {
            debug!("Page close failed: {e}");
        }
        if let Err(e) = browser.close().await {
            warn!("Browser close failed: {e}");
        }
        if let Err(e) = browser.wait().await {
            debug!("Browser process reap failed: {e}");
        }
        handler_task.abort();
    }
}

/// Pending wait for one network response matching a known endpoint.
///
/// Only responses whose *request* matched both the URL fragment and
/// the HTTP method are considered, so unrelated traffic to similar
/// paths is ignored.
pub struct ResponseWatcher {
    requests: EventStream<EventRequestWillBeSent>,
    responses: EventStream<EventResponseReceived>,
    page: Page,
    path_fragment: String,
    method: String,
}

impl ResponseWatcher {
    /// Wait up to `wait_timeout` for the matching response and parse
    /// its body as JSON.
    pub async fn wait_json(mut self, wait_timeout: Duration) -> BrowserResult<serde_json::Value> {
        let path_fragment = self.path_fragment.clone();
        let method = self.method.clone();

        let matched = async {
            let mut pending: Vec<RequestId> = Vec::new();
            loop {
                tokio::select! {
                    request = self.requests.next() => {
                        let Some(request) = request else {
                            return Err(BrowserError::NoMatchingResponse {
                                method: method.clone(),
                                path_fragment: path_fragment.clone(),
                            });
                        };
                        if request.request.method.eq_ignore_ascii_case(&method)
                            && request.request.url.contains(&path_fragment)
                        {
                            pending.push(request.request_id.clone());
                        }
                    }
                    response = self.responses.next() => {
                        let Some(response) = response else {
                            return Err(BrowserError::NoMatchingResponse {
                                method: method.clone(),
                                path_fragment: path_fragment.clone(),
                            });
                        };
                        if pending.contains(&response.request_id) {
                            return Ok(response.request_id.clone());
                        }
                    }
                }
            }
        };

        let request_id = timeout(wait_timeout, matched)
            .await
            .map_err(|_| BrowserError::timeout(format!("response from {method} {path_fragment}")))??;

        let params = GetResponseBodyParams::builder()
            .request_id(request_id)
            .build()
            .map_err(BrowserError::invalid_state)?;
        let body = self.page.execute(params).await?;
        if body.result.base64_encoded {
            return Err(BrowserError::invalid_state(
                "expected a JSON response body, got binary",
            ));
        }
        Ok(serde_json::from_str(&body.result.body)?)
    }
}
