//! The watermark-removal flow against the target site.
//!
//! [`BrowserRemover`] owns the live browser session and an HTTP
//! client routed through the same proxy. Its public entry point,
//! [`BrowserRemover::remove_watermark`], absorbs every internal
//! failure: the cause goes to logs and the notifier (with a page
//! screenshot when one can be taken) and the caller only sees
//! `Option<RemovalResult>`.

pub mod dom;
pub mod invoke;

use std::time::Duration;

use reqwest::Client;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use sorawm_browser::{BrowserSession, LaunchOptions};
use sorawm_models::{ProxyConfig, RemovalResult, SessionCookie};
use sorawm_notify::TelegramNotifier;

use crate::config::{FlowStrategy, WorkerConfig};
use crate::error::{WorkerError, WorkerResult};
use crate::proxy::select_random;

use dom::DomTimings;
use invoke::{invoke_with_retry, Invocation};

/// Promotional banner dismiss button.
const BANNER_CLOSE_SELECTORS: &[&str] = &["button[aria-label=\"Close modal\"]"];

/// Affordances that only render for a logged-out visitor.
const LOGIN_SELECTORS: &[&str] = &[
    "a[href*=\"/login\"]",
    "a[href*=\"sign-in\"]",
    "button[aria-label=\"Sign in\"]",
];

/// Federated sign-in options inside the login dialog.
const FEDERATED_SELECTORS: &[&str] = &[
    "button[data-provider=\"google\"]",
    "button[aria-label*=\"Google\"]",
    "#google-login",
];

/// Visibility wait for the quick auth/banner probes. These are
/// expected to be absent most of the time, so the wait stays short.
const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Wait after driving the sign-in flow before re-probing.
const SIGN_IN_WAIT: Duration = Duration::from_secs(5);

/// Browser-driven removal flow bound to one worker's configuration.
pub struct BrowserRemover {
    session: Option<BrowserSession>,
    http: Client,
    config: WorkerConfig,
    launch_options: LaunchOptions,
    notifier: TelegramNotifier,
}

impl BrowserRemover {
    /// Launch the first session and build the proxied HTTP client.
    pub async fn start(config: WorkerConfig, notifier: TelegramNotifier) -> WorkerResult<Self> {
        let launch_options = LaunchOptions {
            headless: config.headless,
            chrome_executable: config.chrome_executable.clone(),
            extra_args: Vec::new(),
        };
        let mut remover = Self {
            session: None,
            http: Client::new(),
            config,
            launch_options,
            notifier,
        };
        remover.launch_session().await?;
        Ok(remover)
    }

    /// Launch on a freshly selected proxy and land on the workflow
    /// page, so cookie issuance starts before the next task arrives.
    async fn launch_session(&mut self) -> WorkerResult<()> {
        let proxy = select_random(&self.config.proxy_pool);
        self.http = build_http_client(proxy.as_ref())?;
        let session = BrowserSession::launch(&self.launch_options, proxy).await?;
        session
            .goto(&self.config.target_url, self.config.nav_timeout)
            .await?;
        sleep(self.config.settle_delay).await;
        self.session = Some(session);
        Ok(())
    }

    fn session(&self) -> WorkerResult<&BrowserSession> {
        self.session
            .as_ref()
            .ok_or_else(|| WorkerError::session("no live browser session"))
    }

    /// Close the current session, wait out the cooldown, and launch a
    /// fresh one on a freshly selected proxy.
    pub async fn rotate_session(&mut self) -> WorkerResult<()> {
        info!("Rotating browser session");
        if let Some(session) = self.session.take() {
            session.close().await;
        }
        sleep(self.config.rotate_cooldown).await;
        self.launch_session().await
    }

    /// Force-close and relaunch after an iteration left the page in
    /// an unknown state. No cooldown; the caller already pays a poll
    /// interval before the next claim.
    pub async fn rebuild_session(&mut self) -> WorkerResult<()> {
        warn!("Rebuilding browser session after an iteration error");
        if let Some(session) = self.session.take() {
            session.close().await;
        }
        self.launch_session().await
    }

    /// Tear the session down for good.
    pub async fn shutdown(&mut self) {
        if let Some(session) = self.session.take() {
            session.close().await;
        }
    }

    /// Run the full removal workflow for one source URL.
    pub async fn remove_watermark(
        &mut self,
        source_url: &str,
        task_id: Option<&str>,
    ) -> Option<RemovalResult> {
        match self.try_remove(source_url).await {
            Ok(result) => Some(result),
            Err(e) => {
                warn!(task_id = ?task_id, "Removal flow failed: {e}");
                self.capture_failure(&e.to_string(), task_id).await;
                None
            }
        }
    }

    async fn try_remove(&mut self, source_url: &str) -> WorkerResult<RemovalResult> {
        self.prepare_page().await?;
        self.ensure_authenticated().await;

        match self.config.strategy {
            FlowStrategy::Api => self.invoke_with_recovery(source_url).await,
            FlowStrategy::Dom => {
                let timings = DomTimings {
                    element_timeout: self.config.element_timeout,
                    response_timeout: self.config.response_timeout,
                    typing_delay: self.config.typing_delay,
                };
                dom::remove_via_dom(self.session()?, &self.config.api_path, source_url, timings)
                    .await
                    .ok_or_else(|| WorkerError::session("form-driven removal failed"))
            }
        }
    }

    /// Bring the page to the workflow URL and let it settle. Reload
    /// when already there; the page misbehaves on repeated goto.
    async fn prepare_page(&mut self) -> WorkerResult<()> {
        let session = self.session()?;
        let at_target = session
            .current_url()
            .await?
            .map(|url| url.starts_with(&self.config.target_url))
            .unwrap_or(false);

        if at_target {
            debug!("Already on the workflow page, reloading");
            session.reload(self.config.reload_timeout).await?;
        } else {
            debug!(url = %self.config.target_url, "Navigating to the workflow page");
            session
                .goto(&self.config.target_url, self.config.nav_timeout)
                .await?;
        }

        // The page has no reliable ready signal; a fixed settle wait
        // covers client-side rendering and cookie issuance.
        sleep(self.config.settle_delay).await;
        session.press_escape().await;

        match session
            .click_first_visible(BANNER_CLOSE_SELECTORS, PROBE_TIMEOUT)
            .await
        {
            Ok(true) => {
                debug!("Dismissed promotional banner");
                sleep(Duration::from_millis(500)).await;
            }
            Ok(false) => {}
            Err(e) => debug!("Banner probe failed: {e}"),
        }
        Ok(())
    }

    /// Best-effort sign-in: probe for a logged-out affordance, drive
    /// the federated sign-in if one shows, then proceed regardless of
    /// the final state. The invocation itself is the real auth check.
    async fn ensure_authenticated(&mut self) {
        let Ok(session) = self.session() else { return };

        match session.click_first_visible(LOGIN_SELECTORS, PROBE_TIMEOUT).await {
            Ok(false) => return,
            Ok(true) => info!("Logged-out page detected, driving sign-in"),
            Err(e) => {
                debug!("Login probe failed: {e}");
                return;
            }
        }

        match session
            .click_first_visible(FEDERATED_SELECTORS, self.config.element_timeout)
            .await
        {
            Ok(true) => sleep(SIGN_IN_WAIT).await,
            Ok(false) => warn!("Login dialog showed no federated sign-in option"),
            Err(e) => warn!("Federated sign-in click failed: {e}"),
        }

        if let Ok(true) = session.click_first_visible(LOGIN_SELECTORS, PROBE_TIMEOUT).await {
            warn!("Page still looks logged out after sign-in attempt, proceeding anyway");
        }
    }

    /// Extracted cookies scoped to the target origin. Zero cookies
    /// means the session never authenticated; fail the attempt.
    async fn harvest_cookies(&mut self) -> WorkerResult<Vec<SessionCookie>> {
        let origin = self.config.target_origin()?;
        let cookies = self.session()?.cookies_for(&origin).await?;
        if cookies.is_empty() {
            return Err(WorkerError::session(format!(
                "no session cookies for {origin}"
            )));
        }
        debug!(count = cookies.len(), "Harvested session cookies");
        Ok(cookies)
    }

    fn invocation(&self) -> WorkerResult<Invocation> {
        let user_agent = self
            .session
            .as_ref()
            .map(|s| s.user_agent().to_string())
            .unwrap_or_default();
        Ok(Invocation {
            endpoint: self.config.endpoint_url()?,
            origin: self.config.target_origin()?,
            referer: self.config.target_url.clone(),
            user_agent,
        })
    }

    /// Call the internal endpoint with the retry-once auth recovery.
    async fn invoke_with_recovery(&mut self, source_url: &str) -> WorkerResult<RemovalResult> {
        let invocation = self.invocation()?;
        let client = self.http.clone();
        let cookies = self.harvest_cookies().await?;
        invoke_with_retry(&client, &invocation, &cookies, source_url, || {
            self.refresh_cookies()
        })
        .await
    }

    /// Auth-expiry recovery: reload, re-run the sign-in check, and
    /// re-extract cookies.
    async fn refresh_cookies(&mut self) -> WorkerResult<Vec<SessionCookie>> {
        info!("Refreshing session state after an auth rejection");
        self.session()?.reload(self.config.reload_timeout).await?;
        sleep(self.config.settle_delay).await;
        self.ensure_authenticated().await;
        self.harvest_cookies().await
    }

    /// Diagnostic capture: screenshot plus caption when possible,
    /// plain message otherwise. Never fails.
    async fn capture_failure(&self, message: &str, task_id: Option<&str>) {
        let caption = match task_id {
            Some(id) => format!("[task {id}] {message}"),
            None => message.to_string(),
        };
        let screenshot = match &self.session {
            Some(session) => session.screenshot().await.ok(),
            None => None,
        };
        match screenshot {
            Some(png) => self.notifier.send_photo(png, &caption).await,
            None => self.notifier.send_message(&caption).await,
        }
    }
}

fn build_http_client(proxy: Option<&ProxyConfig>) -> WorkerResult<Client> {
    let mut builder = Client::builder().timeout(Duration::from_secs(90));
    if let Some(proxy) = proxy {
        let mut p = reqwest::Proxy::all(proxy.http_url())?;
        if let (Some(user), Some(pass)) = (&proxy.username, &proxy.password) {
            p = p.basic_auth(user, pass);
        }
        builder = builder.proxy(p);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_client_builds_with_and_without_proxy() {
        assert!(build_http_client(None).is_ok());
        let proxy = ProxyConfig::parse("gate.example.net:7000:user1:pw").unwrap();
        assert!(build_http_client(Some(&proxy)).is_ok());
    }

    // Needs a local Chromium install.
    #[tokio::test]
    #[ignore]
    async fn test_fresh_sessions_land_on_the_workflow_page() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html><body></body></html>"))
            .mount(&server)
            .await;

        let config = WorkerConfig {
            target_url: format!("{}/en", server.uri()),
            settle_delay: Duration::from_millis(100),
            ..WorkerConfig::default()
        };
        let target_url = config.target_url.clone();
        let mut remover = BrowserRemover::start(config, TelegramNotifier::new(None, ""))
            .await
            .unwrap();
        let url = remover.session().unwrap().current_url().await.unwrap();
        assert!(url.unwrap_or_default().starts_with(&target_url));
        remover.shutdown().await;
    }
}
