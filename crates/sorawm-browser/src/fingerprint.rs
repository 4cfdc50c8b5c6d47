//! Fingerprint randomization for launched sessions.
//!
//! Each session gets a user agent and viewport drawn from small pools
//! of real-world values, plus a set of evasion scripts injected before
//! any page script runs. The goal is to avoid trivial automation
//! fingerprinting on the target site, not to defeat serious bot
//! detection.

use rand::prelude::IndexedRandom;

/// Real Chrome user agents, kept current-ish with stable releases.
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
];

/// Common desktop viewports.
const VIEWPORTS: &[(u32, u32)] = &[(1920, 1080), (1536, 864), (1440, 900), (1366, 768)];

/// Evasion scripts evaluated on every new document.
pub const STEALTH_SCRIPTS: &[&str] = &[
    // Remove webdriver property
    r#"
    Object.defineProperty(navigator, 'webdriver', {
        get: () => undefined,
        configurable: true
    });
    "#,
    // Fix chrome object
    r#"
    window.chrome = {
        runtime: {},
        loadTimes: function() {},
        csi: function() {},
        app: {}
    };
    "#,
    // Fix languages
    r#"
    Object.defineProperty(navigator, 'languages', {
        get: () => ['en-US', 'en'],
        configurable: true
    });
    "#,
    // Remove automation-related properties
    r#"
    delete window.cdc_adoQpoasnfa76pfcZLmcfl_Array;
    delete window.cdc_adoQpoasnfa76pfcZLmcfl_Promise;
    delete window.cdc_adoQpoasnfa76pfcZLmcfl_Symbol;
    "#,
];

/// A randomized session fingerprint.
#[derive(Debug, Clone)]
pub struct Fingerprint {
    pub user_agent: &'static str,
    pub viewport: (u32, u32),
}

impl Fingerprint {
    /// Draw a random fingerprint for a new session.
    pub fn random() -> Self {
        let mut rng = rand::rng();
        Self {
            user_agent: USER_AGENTS.choose(&mut rng).copied().unwrap_or(USER_AGENTS[0]),
            viewport: VIEWPORTS.choose(&mut rng).copied().unwrap_or(VIEWPORTS[0]),
        }
    }
}
