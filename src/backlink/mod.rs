//! Backlink maintenance.
//!
//! After a document renders, every markdown link it holds to another
//! document gets exactly one entry in that document's trailing backlinks
//! section. Entries are keyed by the source path. Each sync also re-reads
//! the sources of existing entries and prunes those that no longer link back.

pub mod section;

use crate::{
    link::{self, LinkKind, frontmatter},
    utils::path::{decode_link_path, doc_name, normalize_path, relative_path, to_slash},
    log, vlog,
};
use section::{Document, Entry, Line};
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

/// Changes made to backlink sections.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BacklinkDelta {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
}

impl BacklinkDelta {
    pub const fn is_empty(&self) -> bool {
        self.added == 0 && self.updated == 0 && self.removed == 0
    }

    pub fn merge(&mut self, other: Self) {
        self.added += other.added;
        self.updated += other.updated;
        self.removed += other.removed;
    }
}

/// Resolve a link target as written in `from_doc`, percent escapes and all.
///
/// Targets starting with `/` are relative to `root`.
pub fn resolve_link(root: &Path, from_doc: &Path, target: &str) -> PathBuf {
    resolve_path(root, from_doc, &decode_link_path(target))
}

/// Resolve an already decoded path relative to `from_doc`.
fn resolve_path(root: &Path, from_doc: &Path, target: &str) -> PathBuf {
    let joined = match target.strip_prefix('/') {
        Some(rooted) => root.join(rooted),
        None => from_doc
            .parent()
            .unwrap_or_else(|| Path::new(""))
            .join(target),
    };
    normalize_path(&joined)
}

/// Distinct documents that `doc` links to, excluding itself.
pub fn linked_targets(root: &Path, doc: &Path, text: &str) -> Vec<PathBuf> {
    let mut targets: Vec<PathBuf> = Vec::new();
    for link in link::find_links(text) {
        if let LinkKind::Markdown { target, .. } = &link.kind {
            let path = resolve_link(root, doc, target);
            if path != doc && !targets.contains(&path) {
                targets.push(path);
            }
        }
    }
    targets
}

/// The entry `target` should hold for `source`.
pub fn canonical_entry(target: &Path, source: &Path) -> Entry {
    let dir = target.parent().unwrap_or_else(|| Path::new(""));
    Entry {
        label: doc_name(source),
        target: to_slash(&relative_path(dir, source)),
    }
}

/// Whether an entry's source is still linking to `target`.
enum Liveness {
    Live,
    Orphan,
    /// The source could not be read; leave the entry alone.
    Unknown,
}

fn liveness(root: &Path, source: &Path, target: &Path) -> Liveness {
    let text = match std::fs::read_to_string(source) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => return Liveness::Orphan,
        Err(e) => {
            log!("backlink"; "cannot read {}, keeping its entry: {e}", source.display());
            return Liveness::Unknown;
        }
    };
    if frontmatter::parse(&text).backlinks_disabled() {
        return Liveness::Orphan;
    }
    if linked_targets(root, source, &text).iter().any(|t| t == target) {
        Liveness::Live
    } else {
        Liveness::Orphan
    }
}

/// Bring the backlinks section of `target` up to date.
///
/// Prunes orphaned and duplicate entries and, when `ensure` is given, makes
/// sure that source has its canonical entry. `target` and `ensure` must be
/// normalized. Returns the new text, or `None` when nothing changes.
pub fn sync(
    root: &Path,
    target: &Path,
    text: &str,
    ensure: Option<&Path>,
) -> Option<(String, BacklinkDelta)> {
    if frontmatter::parse(text).backlinks_disabled() {
        vlog!("backlink"; "{} opted out of backlinks", target.display());
        return None;
    }

    let doc = Document::parse(text);
    let mut delta = BacklinkDelta::default();
    let mut lines: Vec<Line> = Vec::new();
    let mut seen: Vec<PathBuf> = Vec::new();
    let mut ensured = false;

    for line in doc.lines.iter().flatten() {
        let Line::Entry(entry) = line else {
            lines.push(line.clone());
            continue;
        };
        let source = resolve_path(root, target, &entry.target);
        if seen.contains(&source) {
            delta.removed += 1;
            continue;
        }
        seen.push(source.clone());

        if ensure == Some(source.as_path()) {
            let canonical = canonical_entry(target, &source);
            if &canonical != entry {
                delta.updated += 1;
            }
            lines.push(Line::Entry(canonical));
            ensured = true;
            continue;
        }

        match liveness(root, &source, target) {
            Liveness::Live | Liveness::Unknown => lines.push(line.clone()),
            Liveness::Orphan => {
                vlog!("backlink"; "pruning {} from {}", entry.target, target.display());
                delta.removed += 1;
            }
        }
    }

    if let Some(source) = ensure
        && !ensured
        && source != target
    {
        lines.push(Line::Entry(canonical_entry(target, source)));
        delta.added += 1;
    }

    if delta.is_empty() {
        return None;
    }
    Some((section::join(doc.body, &lines), delta))
}
