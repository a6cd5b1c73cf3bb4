//! Templates computed without the network.
//!
//! Names under the `codebook.` prefix are answered from local state:
//!
//! | Template           | Value                                      |
//! |--------------------|--------------------------------------------|
//! | `codebook.version` | `TAG (SHORT_SHA)`, `SHORT_SHA` or `dev`    |

use gix::ObjectId;
use std::path::{Path, PathBuf};

/// Reserved prefix for local templates.
pub const LOCAL_PREFIX: &str = "codebook.";

const SHORT_SHA_LEN: usize = 7;

#[derive(Debug, Clone)]
pub struct LocalTemplates {
    root: PathBuf,
}

impl LocalTemplates {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn is_local(name: &str) -> bool {
        name.starts_with(LOCAL_PREFIX)
    }

    /// Resolve a local template. Unknown local names are unresolved.
    pub fn resolve(&self, name: &str) -> Option<String> {
        match name.strip_prefix(LOCAL_PREFIX)? {
            "version" => Some(version_string(&self.root)),
            _ => None,
        }
    }
}

/// Current revision of the repository containing `root`.
pub fn version_string(root: &Path) -> String {
    let Ok(repo) = gix::discover(root) else {
        return "dev".into();
    };
    let Ok(head) = repo.head_id() else {
        return "dev".into();
    };

    let short = head.to_hex_with_len(SHORT_SHA_LEN).to_string();
    match tag_pointing_at(&repo, head.detach()) {
        Some(tag) => format!("{tag} ({short})"),
        None => short,
    }
}

/// First tag (by name) whose peeled target is `target`.
fn tag_pointing_at(repo: &gix::Repository, target: ObjectId) -> Option<String> {
    let refs = repo.references().ok()?;
    let mut names: Vec<String> = refs
        .tags()
        .ok()?
        .filter_map(Result::ok)
        .filter_map(|mut reference| {
            let id = reference.peel_to_id_in_place().ok()?;
            (id.detach() == target).then(|| reference.name().shorten().to_string())
        })
        .collect();
    names.sort();
    names.into_iter().next()
}
