//! Worker configuration.

use std::time::Duration;

use sorawm_models::ProxyConfig;
use url::Url;

use crate::error::{WorkerError, WorkerResult};

/// Which invocation strategy the flow uses against the target site.
///
/// `Api` extracts session cookies and calls the site's internal
/// endpoint directly. `Dom` drives the page's form instead; it is the
/// older interaction kept available for when the endpoint changes
/// shape again. The two are never chained automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowStrategy {
    #[default]
    Api,
    Dom,
}

impl FlowStrategy {
    fn from_env() -> Self {
        match std::env::var("FLOW_STRATEGY").as_deref() {
            Ok("dom") => Self::Dom,
            _ => Self::Api,
        }
    }
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Product code used when claiming tasks.
    pub product_code: String,
    /// Target workflow page, e.g. `https://www.removesorawatermark.pro/en`.
    pub target_url: String,
    /// Path of the site's internal removal endpoint.
    pub api_path: String,
    /// Invocation strategy.
    pub strategy: FlowStrategy,
    /// Directory downloaded videos are written to.
    pub output_dir: String,
    /// Wait between claim attempts when the queue is empty.
    pub poll_interval: Duration,
    /// Fixed wait after navigation for client-side rendering and
    /// cookie issuance; the page offers no reliable ready signal.
    pub settle_delay: Duration,
    /// Tasks per browser session before rotation.
    pub tasks_per_session: u32,
    /// Cooldown between closing a session and launching the next.
    pub rotate_cooldown: Duration,
    /// Consecutive failures before the loop stops itself.
    pub max_consecutive_failures: u32,
    /// Navigation timeout.
    pub nav_timeout: Duration,
    /// Reload timeout.
    pub reload_timeout: Duration,
    /// Network response wait timeout.
    pub response_timeout: Duration,
    /// Element visibility timeout for the main input/submit lookup.
    pub element_timeout: Duration,
    /// Per-keystroke delay when typing into the form.
    pub typing_delay: Duration,
    /// Initial supervisor restart delay.
    pub restart_delay_initial: Duration,
    /// Supervisor restart delay cap.
    pub restart_delay_max: Duration,
    /// Run the browser headless.
    pub headless: bool,
    /// Explicit Chrome binary path.
    pub chrome_executable: Option<String>,
    /// Static proxy pool; empty means direct connections.
    pub proxy_pool: Vec<ProxyConfig>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            product_code: "sora-remove-watermark".to_string(),
            target_url: "https://www.removesorawatermark.pro/en".to_string(),
            api_path: "/api/jobs/post-url".to_string(),
            strategy: FlowStrategy::Api,
            output_dir: "/tmp/sorawm".to_string(),
            poll_interval: Duration::from_secs(10),
            settle_delay: Duration::from_secs(5),
            tasks_per_session: 2,
            rotate_cooldown: Duration::from_secs(2),
            max_consecutive_failures: 3,
            nav_timeout: Duration::from_secs(60),
            reload_timeout: Duration::from_secs(30),
            response_timeout: Duration::from_secs(60),
            element_timeout: Duration::from_secs(15),
            typing_delay: Duration::from_millis(20),
            restart_delay_initial: Duration::from_secs(5),
            restart_delay_max: Duration::from_secs(60),
            headless: true,
            chrome_executable: None,
            proxy_pool: Vec::new(),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> WorkerResult<Self> {
        let defaults = Self::default();
        let proxy_pool = match std::env::var("PROXY_LIST") {
            Ok(list) => ProxyConfig::parse_pool(&list)
                .map_err(|e| WorkerError::config(e.to_string()))?,
            Err(_) => Vec::new(),
        };
        Ok(Self {
            product_code: env_or("PRODUCT_CODE", &defaults.product_code),
            target_url: env_or("TARGET_URL", &defaults.target_url),
            api_path: env_or("TARGET_API_PATH", &defaults.api_path),
            strategy: FlowStrategy::from_env(),
            output_dir: env_or("OUTPUT_DIR", &defaults.output_dir),
            poll_interval: env_secs("POLL_INTERVAL_SECS", defaults.poll_interval),
            settle_delay: env_secs("SETTLE_DELAY_SECS", defaults.settle_delay),
            tasks_per_session: env_parsed("TASKS_PER_SESSION", defaults.tasks_per_session),
            rotate_cooldown: env_secs("ROTATE_COOLDOWN_SECS", defaults.rotate_cooldown),
            max_consecutive_failures: env_parsed(
                "MAX_CONSECUTIVE_FAILURES",
                defaults.max_consecutive_failures,
            ),
            nav_timeout: env_secs("NAV_TIMEOUT_SECS", defaults.nav_timeout),
            reload_timeout: env_secs("RELOAD_TIMEOUT_SECS", defaults.reload_timeout),
            response_timeout: env_secs("RESPONSE_TIMEOUT_SECS", defaults.response_timeout),
            element_timeout: env_secs("ELEMENT_TIMEOUT_SECS", defaults.element_timeout),
            typing_delay: defaults.typing_delay,
            restart_delay_initial: env_secs("RESTART_DELAY_SECS", defaults.restart_delay_initial),
            restart_delay_max: env_secs("RESTART_DELAY_MAX_SECS", defaults.restart_delay_max),
            headless: std::env::var("HEADLESS")
                .map(|v| v.to_lowercase() != "false")
                .unwrap_or(true),
            chrome_executable: std::env::var("CHROME_EXECUTABLE").ok(),
            proxy_pool,
        })
    }

    /// Origin of the target site, e.g. `https://www.removesorawatermark.pro`.
    pub fn target_origin(&self) -> WorkerResult<String> {
        let url = Url::parse(&self.target_url)
            .map_err(|e| WorkerError::config(format!("invalid TARGET_URL: {e}")))?;
        Ok(url.origin().ascii_serialization())
    }

    /// Full URL of the internal removal endpoint.
    pub fn endpoint_url(&self) -> WorkerResult<String> {
        Ok(format!("{}{}", self.target_origin()?, self.api_path))
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
