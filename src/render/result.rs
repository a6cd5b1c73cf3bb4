//! Per-file render outcome.

use crate::backlink::BacklinkDelta;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to read {0}")]
    Read(PathBuf, #[source] std::io::Error),

    #[error("failed to write {0}")]
    Write(PathBuf, #[source] std::io::Error),

    #[error("{0} is not a directory")]
    NotADirectory(PathBuf),
}

#[derive(Debug, Default)]
pub struct RenderResult {
    pub path: PathBuf,
    pub templates_found: usize,
    pub templates_resolved: usize,
    /// Templates left alone because the backend could not be reached.
    pub templates_unreachable: usize,
    pub code_blocks_found: usize,
    pub code_blocks_executed: usize,
    pub queries_found: usize,
    pub queries_executed: usize,
    /// Distinct documents this one links to.
    pub backlinks_found: usize,
    pub backlinks: BacklinkDelta,
    /// The document text differs from what was on disk. In a dry run
    /// nothing is written.
    pub changed: bool,
    /// The document has a tag still being typed; nothing was done.
    pub deferred: bool,
    /// The document was edited while rendering, so nothing was written.
    pub stale: bool,
    /// Every file this render wrote.
    pub touched: Vec<PathBuf>,
    /// Fingerprint of the document as this render left it on disk.
    pub fingerprint: Option<u64>,
    pub error: Option<RenderError>,
}

impl RenderResult {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            ..Self::default()
        }
    }

    pub const fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// One-line summary for logs.
    pub fn summary(&self) -> String {
        if let Some(err) = &self.error {
            return format!("error: {err}");
        }
        if self.deferred {
            return "deferred (incomplete tag)".into();
        }
        if self.stale {
            return "stale (edited while rendering)".into();
        }

        let mut parts = vec![format!(
            "{}/{} templates",
            self.templates_resolved, self.templates_found
        )];
        if self.templates_unreachable > 0 {
            parts.push(format!("{} unreachable", self.templates_unreachable));
        }
        if self.code_blocks_found > 0 {
            parts.push(format!(
                "{}/{} code blocks",
                self.code_blocks_executed, self.code_blocks_found
            ));
        }
        if self.queries_found > 0 {
            parts.push(format!(
                "{}/{} queries",
                self.queries_executed, self.queries_found
            ));
        }
        let b = &self.backlinks;
        if !b.is_empty() {
            parts.push(format!(
                "backlinks +{} ~{} -{}",
                b.added, b.updated, b.removed
            ));
        }
        parts.push(if self.changed { "changed" } else { "unchanged" }.into());
        parts.join(", ")
    }
}
