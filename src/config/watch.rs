//! `[watch]` section configuration.

use super::defaults;
use educe::Educe;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// `[watch]` section in codebook.toml - watch loop timing.
///
/// # Example
/// ```toml
/// [watch]
/// debounce_ms = 500     # quiet period before a changed file is rendered
/// cooldown_ms = 2000    # events for a just-rendered file are ignored this long
/// queue_capacity = 1024
/// ```
#[derive(Debug, Clone, Educe, Serialize, Deserialize)]
#[educe(Default)]
#[serde(deny_unknown_fields)]
pub struct WatchConfig {
    #[serde(default = "defaults::watch::debounce_ms")]
    #[educe(Default = defaults::watch::debounce_ms())]
    pub debounce_ms: u64,

    #[serde(default = "defaults::watch::cooldown_ms")]
    #[educe(Default = defaults::watch::cooldown_ms())]
    pub cooldown_ms: u64,

    /// Capacity of the bounded event queue between notify and the dispatcher.
    #[serde(default = "defaults::watch::queue_capacity")]
    #[educe(Default = defaults::watch::queue_capacity())]
    pub queue_capacity: usize,
}

impl WatchConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::super::BookConfig;
    use std::time::Duration;

    #[test]
    fn test_watch_config_defaults() {
        let config: BookConfig = toml::from_str("").unwrap();

        assert_eq!(config.watch.debounce(), Duration::from_millis(500));
        assert_eq!(config.watch.cooldown(), Duration::from_secs(2));
        assert_eq!(config.watch.queue_capacity, 1024);
    }

    #[test]
    fn test_watch_config() {
        let config = r#"
            [watch]
            debounce_ms = 100
            cooldown_ms = 0
        "#;
        let config: BookConfig = toml::from_str(config).unwrap();

        assert_eq!(config.watch.debounce_ms, 100);
        assert_eq!(config.watch.cooldown(), Duration::ZERO);
    }
}
