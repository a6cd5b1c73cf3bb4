//! `[render]` section configuration.

use super::defaults;
use educe::Educe;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// `[render]` section in codebook.toml - directory render settings.
///
/// # Example
/// ```toml
/// [render]
/// recursive = true
/// exclude = [".codebook/tasks", "drafts"]
/// ```
#[derive(Debug, Clone, Educe, Serialize, Deserialize)]
#[educe(Default)]
#[serde(deny_unknown_fields)]
pub struct RenderConfig {
    /// Descend into subdirectories when rendering a directory.
    #[serde(default = "defaults::r#true")]
    #[educe(Default = true)]
    pub recursive: bool,

    /// Paths skipped by directory renders and the watcher.
    /// Relative entries are resolved against the root.
    #[serde(default = "defaults::render::exclude")]
    #[educe(Default = defaults::render::exclude())]
    pub exclude: Vec<PathBuf>,
}

impl RenderConfig {
    /// Check whether `path` lies under any excluded path.
    ///
    /// Expects `exclude` to be normalized to absolute paths.
    pub fn is_excluded(&self, path: &Path) -> bool {
        self.exclude.iter().any(|ex| path.starts_with(ex))
    }
}
