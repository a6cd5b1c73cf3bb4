//! `[explore]` section configuration.

use super::defaults;
use educe::Educe;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// `[explore]` section in codebook.toml - code-exploration service settings.
///
/// # Example
/// ```toml
/// [explore]
/// enable = true
/// url = "http://localhost:9999"
/// timeout = 30
/// ```
#[derive(Debug, Clone, Educe, Serialize, Deserialize)]
#[educe(Default)]
#[serde(deny_unknown_fields)]
pub struct ExploreConfig {
    /// Run `<query>` blocks during renders.
    #[serde(default = "defaults::r#false")]
    #[educe(Default = false)]
    pub enable: bool,

    /// Base URL of the exploration service.
    #[serde(default = "defaults::explore::url")]
    #[educe(Default = defaults::explore::url())]
    pub url: String,

    /// Request timeout in seconds.
    #[serde(default = "defaults::explore::timeout")]
    #[educe(Default = defaults::explore::timeout())]
    pub timeout: u64,
}

impl ExploreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}
