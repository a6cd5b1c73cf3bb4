//! `[exec]` section configuration.
//!
//! Interpreters used for executable blocks.

use super::defaults;
use educe::Educe;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, time::Duration};

/// `[exec]` section in codebook.toml - executable block settings.
///
/// # Example
/// ```toml
/// [exec]
/// enable = true
/// timeout = 30
///
/// [exec.languages]
/// python = ["python3", "-"]
/// sh = ["sh", "-s"]
/// ```
#[derive(Debug, Clone, Educe, Serialize, Deserialize)]
#[educe(Default)]
#[serde(deny_unknown_fields)]
pub struct ExecConfig {
    /// Run `<exec>` blocks during renders.
    #[serde(default = "defaults::r#false")]
    #[educe(Default = false)]
    pub enable: bool,

    /// Per-block timeout in seconds.
    #[serde(default = "defaults::exec::timeout")]
    #[educe(Default = defaults::exec::timeout())]
    pub timeout: u64,

    /// Interpreter command per language; the block's code is fed on stdin.
    #[serde(default = "defaults::exec::languages")]
    #[educe(Default = defaults::exec::languages())]
    pub languages: BTreeMap<String, Vec<String>>,
}

impl ExecConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}
