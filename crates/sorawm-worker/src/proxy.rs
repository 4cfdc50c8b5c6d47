//! Proxy selection from the static pool.

use rand::prelude::IndexedRandom;

use sorawm_models::ProxyConfig;

/// Pick one proxy at random, or `None` for an empty pool (direct
/// connection).
pub fn select_random(pool: &[ProxyConfig]) -> Option<ProxyConfig> {
    pool.choose(&mut rand::rng()).cloned()
}
