//! `[backend]` section configuration.
//!
//! Where remote template values come from and how long they are cached.

use super::defaults;
use educe::Educe;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// `[backend]` section in codebook.toml - value source settings.
///
/// # Example
/// ```toml
/// [backend]
/// url = "http://localhost:3000"
/// timeout = 10      # seconds
/// cache_ttl = 60    # seconds, 0 disables caching
/// ```
#[derive(Debug, Clone, Educe, Serialize, Deserialize)]
#[educe(Default)]
#[serde(deny_unknown_fields)]
pub struct BackendConfig {
    /// Base URL of the value backend.
    #[serde(default = "defaults::backend::url")]
    #[educe(Default = defaults::backend::url())]
    pub url: String,

    /// Request timeout in seconds.
    #[serde(default = "defaults::backend::timeout")]
    #[educe(Default = defaults::backend::timeout())]
    pub timeout: u64,

    /// How long resolved values stay cached, in seconds.
    #[serde(default = "defaults::backend::cache_ttl")]
    #[educe(Default = defaults::backend::cache_ttl())]
    pub cache_ttl: u64,
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl)
    }
}
