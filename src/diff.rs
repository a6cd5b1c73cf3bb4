//! Unified diffs of rendered documents against a git revision.
//!
//! Shows what a render would change relative to what is committed, e.g.
//! which live values moved since `HEAD`.

use crate::{
    render::Engine,
    utils::path::{normalize_path, relative_path, to_slash},
};
use anyhow::{Context, Result};
use gix::diff::blob::{Algorithm, UnifiedDiffBuilder, diff, intern::InternedInput};
use std::path::{Path, PathBuf};

/// Diff of one document. Empty when the rendered content matches the revision.
pub struct FileDiff {
    pub path: PathBuf,
    pub diff: Result<String>,
}

/// Diff every document under `target` (or `target` itself) against `reference`.
///
/// Fails only when the repository or revision cannot be found; per-file
/// failures land in that file's [`FileDiff`].
pub fn diff_path(
    engine: &Engine,
    target: &Path,
    reference: &str,
    recursive: bool,
) -> Result<Vec<FileDiff>> {
    let target = normalize_path(target);
    let start = if target.is_dir() {
        target.as_path()
    } else {
        target.parent().unwrap_or(target.as_path())
    };
    let repo = gix::discover(start)
        .with_context(|| format!("{} is not in a git repository", start.display()))?;
    repo.rev_parse_single(reference)
        .with_context(|| format!("Unknown revision `{reference}`"))?;
    let workdir = normalize_path(repo.workdir().context("Repository has no working tree")?);

    let files = if target.is_dir() {
        engine.collect_documents(&target, recursive)
    } else {
        vec![target]
    };

    Ok(files
        .into_iter()
        .map(|path| {
            let diff = diff_file(engine, &repo, &workdir, reference, &path);
            FileDiff { path, diff }
        })
        .collect())
}

fn diff_file(
    engine: &Engine,
    repo: &gix::Repository,
    workdir: &Path,
    reference: &str,
    path: &Path,
) -> Result<String> {
    let rendered = engine.show(path)?;
    let rel = to_slash(&relative_path(workdir, path));
    let committed = blob_at(repo, reference, &rel)?.unwrap_or_default();
    Ok(unified_diff(&rel, &committed, &rendered))
}

/// Content of `rel` at `reference`, or `None` when the revision lacks it.
fn blob_at(repo: &gix::Repository, reference: &str, rel: &str) -> Result<Option<String>> {
    let spec = format!("{reference}:{rel}");
    let Ok(id) = repo.rev_parse_single(spec.as_str()) else {
        return Ok(None);
    };
    let object = id
        .object()
        .with_context(|| format!("Failed to read {spec}"))?;
    Ok(Some(String::from_utf8_lossy(&object.data).into_owned()))
}

/// `git diff` style unified diff, or an empty string when nothing differs.
pub fn unified_diff(rel: &str, before: &str, after: &str) -> String {
    let input = InternedInput::new(before, after);
    let hunks = diff(Algorithm::Histogram, &input, UnifiedDiffBuilder::new(&input));
    if hunks.is_empty() {
        return hunks;
    }
    format!("--- a/{rel}\n+++ b/{rel}\n{hunks}")
}
