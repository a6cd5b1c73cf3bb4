//! Document rendering.
//!
//! # Pipeline
//!
//! ```text
//! read ─▶ incomplete tag? ──yes──▶ deferred
//!          │ no
//!          ▼
//! find_links ─▶ resolve templates / run blocks ─▶ rewrite value spans
//!          │
//!          ▼
//! prune own backlinks section ─▶ atomic write if changed
//!          │   (document lock released)
//!          ▼
//! for each linked document: upsert backlink under that document's lock
//! ```
//!
//! Only value spans are rewritten, so rendering twice with the same values
//! leaves the file byte-identical.

mod result;

pub use result::{RenderError, RenderResult};

use crate::{
    backlink::{self, linked_targets},
    collab::{CommandExecutor, ExploreResponse, Executor, Explorer, HttpExplorer, extract},
    config::{BookConfig, RenderConfig},
    link::{self, Link, LinkKind, frontmatter},
    log,
    logger::ProgressBars,
    resolver::{Resolution, TemplateResolver},
    utils::{
        fs::{atomic_write, fingerprint, unchanged_on_disk},
        path::{is_markdown, is_temp_file, normalize_path, rel_path},
    },
    vlog,
};
use anyhow::{Result, anyhow};
use parking_lot::Mutex;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use std::{
    fs,
    io::ErrorKind,
    ops::Range,
    path::{Path, PathBuf},
    sync::Arc,
};
use walkdir::{DirEntry, WalkDir};

/// One lock per path. Every read-modify-write of a file holds its lock.
#[derive(Default)]
struct PathLocks {
    locks: Mutex<FxHashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl PathLocks {
    fn get(&self, path: &Path) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .entry(path.to_path_buf())
            .or_default()
            .clone()
    }
}

pub struct Engine {
    resolver: TemplateResolver,
    executor: Option<Box<dyn Executor>>,
    explorer: Option<Box<dyn Explorer>>,
    locks: PathLocks,
    root: PathBuf,
    render: RenderConfig,
}

impl Engine {
    pub fn new(resolver: TemplateResolver, root: &Path) -> Self {
        Self {
            resolver,
            executor: None,
            explorer: None,
            locks: PathLocks::default(),
            root: normalize_path(root),
            render: RenderConfig::default(),
        }
    }

    /// Engine wired to the configured backend and collaborators.
    pub fn from_config(config: &BookConfig) -> Result<Self> {
        let mut engine = Self::new(TemplateResolver::from_config(config)?, &config.root)
            .with_render_config(config.render.clone());
        if config.exec.enable {
            engine = engine.with_executor(Box::new(CommandExecutor::new(
                &config.exec,
                &config.root,
            )));
        }
        if config.explore.enable {
            let explorer = HttpExplorer::new(&config.explore.url, config.explore.timeout())
                .map_err(|e| anyhow!("explorer: {e}"))?;
            engine = engine.with_explorer(Box::new(explorer));
        }
        Ok(engine)
    }

    pub fn with_executor(mut self, executor: Box<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn with_explorer(mut self, explorer: Box<dyn Explorer>) -> Self {
        self.explorer = Some(explorer);
        self
    }

    pub fn with_render_config(mut self, render: RenderConfig) -> Self {
        self.render = render;
        self
    }

    pub const fn resolver(&self) -> &TemplateResolver {
        &self.resolver
    }

    pub fn explorer(&self) -> Option<&dyn Explorer> {
        self.explorer.as_deref()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_excluded(&self, path: &Path) -> bool {
        self.render.is_excluded(path)
    }

    // ========================================================================
    // Files
    // ========================================================================

    /// Render one document and maintain the backlinks it implies.
    ///
    /// Never fails as a whole: read and write errors land in the result.
    pub fn render_file(&self, path: &Path, dry_run: bool) -> RenderResult {
        let path = normalize_path(path);
        let mut result = RenderResult::new(&path);

        let targets = {
            let lock = self.locks.get(&path);
            let _guard = lock.lock();
            match self.render_locked(&path, dry_run, &mut result) {
                Ok(targets) => targets,
                Err(err) => {
                    log!("render"; "{}", error_chain(&err));
                    result.error = Some(err);
                    return result;
                }
            }
        };

        for target in targets {
            self.upsert_backlink(&target, &path, dry_run, &mut result);
        }
        result
    }

    /// Read-modify-write of the document itself. Returns the documents it
    /// links to.
    fn render_locked(
        &self,
        path: &Path,
        dry_run: bool,
        result: &mut RenderResult,
    ) -> Result<Vec<PathBuf>, RenderError> {
        let text =
            fs::read_to_string(path).map_err(|e| RenderError::Read(path.to_path_buf(), e))?;

        if link::has_incomplete_tags(&text) {
            vlog!("render"; "{} has an incomplete tag, deferring", self.display(path));
            result.deferred = true;
            return Ok(Vec::new());
        }

        let meta = frontmatter::parse(&text);
        let mut rendered = if meta.links_disabled() {
            vlog!("render"; "links disabled in {}", self.display(path));
            text.clone()
        } else {
            self.render_text(path, &text, result)
        };

        if let Some((pruned, delta)) = backlink::sync(&self.root, path, &rendered, None) {
            rendered = pruned;
            result.backlinks.merge(delta);
        }

        let mut on_disk = &text;
        if rendered != text {
            result.changed = true;
            if !dry_run {
                // A newer edit on disk wins over this render.
                if !unchanged_on_disk(path, &text) {
                    log!("render"; "{} changed while rendering, not writing", self.display(path));
                    result.stale = true;
                    return Ok(Vec::new());
                }
                atomic_write(path, &rendered)
                    .map_err(|e| RenderError::Write(path.to_path_buf(), e))?;
                result.touched.push(path.to_path_buf());
                on_disk = &rendered;
            }
        }
        result.fingerprint = Some(fingerprint(on_disk));

        if meta.backlinks_disabled() {
            return Ok(Vec::new());
        }
        let targets = linked_targets(&self.root, path, &rendered);
        result.backlinks_found = targets.len();
        Ok(targets)
    }

    /// Give `target` its entry for `source`, under the target's lock.
    fn upsert_backlink(&self, target: &Path, source: &Path, dry_run: bool, result: &mut RenderResult) {
        let lock = self.locks.get(target);
        let _guard = lock.lock();

        let text = match fs::read_to_string(target) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                vlog!("backlink"; "{} links to missing {}", self.display(source), self.display(target));
                return;
            }
            Err(e) => {
                log!("backlink"; "cannot read {}: {e}", self.display(target));
                return;
            }
        };

        let Some((updated, delta)) = backlink::sync(&self.root, target, &text, Some(source)) else {
            return;
        };
        result.backlinks.merge(delta);
        if dry_run {
            return;
        }
        match atomic_write(target, &updated) {
            Ok(()) => result.touched.push(target.to_path_buf()),
            Err(e) => log!("backlink"; "failed to write {}: {e}", self.display(target)),
        }
    }

    /// Rendered content of a document, without writing anything.
    pub fn show(&self, path: &Path) -> Result<String, RenderError> {
        let path = normalize_path(path);
        let text =
            fs::read_to_string(&path).map_err(|e| RenderError::Read(path.clone(), e))?;
        if link::has_incomplete_tags(&text) || frontmatter::parse(&text).links_disabled() {
            return Ok(text);
        }
        let mut result = RenderResult::new(&path);
        Ok(self.render_text(&path, &text, &mut result))
    }

    // ========================================================================
    // Value rewriting
    // ========================================================================

    /// Rewrite every value span whose new value differs.
    pub fn render_text(&self, path: &Path, text: &str, result: &mut RenderResult) -> String {
        let links = link::find_links(text);
        let templates = link::find_templates(&links);
        result.templates_found = templates.len();

        let resolved = if templates.is_empty() {
            FxHashMap::default()
        } else {
            self.resolver.resolve_batch(&templates)
        };
        result.templates_resolved = resolved.values().filter(|r| r.value().is_some()).count();
        result.templates_unreachable = resolved
            .values()
            .filter(|r| matches!(r, Resolution::TransportError(_)))
            .count();

        let session = path.to_string_lossy();
        if let Some(executor) = self.executor.as_deref()
            && links.iter().any(|l| matches!(l.kind, LinkKind::Exec { .. }))
        {
            executor.reset(&session);
        }
        let mut edits: Vec<(Range<usize>, String)> = Vec::new();

        for link in &links {
            let value = match &link.kind {
                LinkKind::Inline { template }
                | LinkKind::Url { template, .. }
                | LinkKind::Span { template }
                | LinkKind::Div { template } => resolved
                    .get(template)
                    .and_then(Resolution::value)
                    .map(str::to_owned),
                LinkKind::Exec { lang, code } => {
                    result.code_blocks_found += 1;
                    self.execute(&session, lang, code, result)
                }
                LinkKind::Query { endpoint, params } => {
                    result.queries_found += 1;
                    self.query(endpoint, params, result)
                }
                LinkKind::Markdown { .. } | LinkKind::Backlink { .. } => None,
            };
            let Some(value) = value else {
                continue;
            };
            if !value_fits(link, &value) {
                log!("render"; "value for {} in {} cannot be written in place, skipping",
                    describe(link), self.display(path));
                continue;
            }
            if let Some(edit) = edit_for(text, link, value) {
                edits.push(edit);
            }
        }

        let mut out = text.to_owned();
        for (range, value) in edits.into_iter().rev() {
            out.replace_range(range, &value);
        }
        out
    }

    fn execute(&self, session: &str, lang: &str, code: &str, result: &mut RenderResult) -> Option<String> {
        let executor = self.executor.as_deref()?;
        if !executor.supports(lang) {
            log!("exec"; "no interpreter for `{lang}`, skipping block");
            return None;
        }
        let outcome = executor.execute(session, lang, code);
        result.code_blocks_executed += 1;
        Some(outcome.render())
    }

    fn query(&self, endpoint: &str, params: &[(String, String)], result: &mut RenderResult) -> Option<String> {
        let explorer = self.explorer.as_deref()?;

        let mut path = None;
        let mut render = None;
        let mut lang = None;
        let mut forwarded = Vec::with_capacity(params.len());
        for (key, value) in params {
            match key.as_str() {
                "extract" | "jq" => path = Some(value.as_str()),
                "render" => render = Some(value.as_str()),
                "lang" => lang = Some(value.as_str()),
                _ => forwarded.push((key.clone(), value.clone())),
            }
        }

        result.queries_executed += 1;
        let content = explorer
            .query(endpoint, &forwarded)
            .and_then(|response| select(response, path));
        Some(match content {
            Ok(content) => wrap_code(content, render, lang),
            Err(e) => {
                log!("query"; "`{endpoint}` failed: {e}");
                format!("Error: {e}")
            }
        })
    }

    // ========================================================================
    // Directories
    // ========================================================================

    /// Markdown documents under `dir`, in path order.
    pub fn collect_documents(&self, dir: &Path, recursive: bool) -> Vec<PathBuf> {
        let dir = normalize_path(dir);
        let walker = WalkDir::new(&dir).sort_by_file_name();
        let walker = if recursive { walker } else { walker.max_depth(1) };

        walker
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !(is_hidden(e) || self.is_excluded(e.path())))
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .map(DirEntry::into_path)
            .filter(|p| is_markdown(p) && !is_temp_file(p))
            .collect()
    }

    /// Render every document under `dir` in parallel. Results are in path
    /// order; one failing file does not stop the others.
    pub fn render_directory(
        &self,
        dir: &Path,
        recursive: bool,
        dry_run: bool,
    ) -> Result<Vec<RenderResult>, RenderError> {
        if !dir.is_dir() {
            return Err(RenderError::NotADirectory(dir.to_path_buf()));
        }

        let files = self.collect_documents(dir, recursive);
        let progress = ProgressBars::new_filtered(&[("render", files.len())]);

        let results: Vec<RenderResult> = files
            .par_iter()
            .map(|path| {
                let result = self.render_file(path, dry_run);
                if let Some(p) = &progress {
                    p.inc_by_name("render");
                }
                result
            })
            .collect();

        if let Some(p) = &progress {
            p.finish();
        }
        Ok(results)
    }

    fn display(&self, path: &Path) -> String {
        rel_path(path, &self.root)
    }
}

/// Error message followed by its source.
fn error_chain(err: &RenderError) -> String {
    match std::error::Error::source(err) {
        Some(source) => format!("{err}: {source}"),
        None => err.to_string(),
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_str().is_some_and(|n| n.starts_with('.'))
}

fn describe(link: &Link) -> String {
    match &link.kind {
        LinkKind::Exec { lang, .. } => format!("<exec lang=\"{lang}\">"),
        LinkKind::Query { endpoint, .. } => format!("<query endpoint=\"{endpoint}\">"),
        _ => format!("`{}`", link.template().unwrap_or_default()),
    }
}

/// Whether `value` can replace the link's value without changing how the
/// document parses.
fn value_fits(link: &Link, value: &str) -> bool {
    match &link.kind {
        LinkKind::Inline { .. } => !value.contains(['`', ']', '\n']),
        LinkKind::Url { .. } => {
            !value.is_empty() && !value.contains(|c: char| c.is_whitespace() || c == ')' || c == '"')
        }
        LinkKind::Span { .. } => !value.contains("</span>"),
        LinkKind::Div { .. } => !value.contains("</div>"),
        LinkKind::Exec { .. } => !value.contains("</output>"),
        LinkKind::Query { .. } => !value.contains("</query>"),
        LinkKind::Markdown { .. } | LinkKind::Backlink { .. } => false,
    }
}

const fn is_block_value(kind: &LinkKind) -> bool {
    matches!(
        kind,
        LinkKind::Div { .. } | LinkKind::Exec { .. } | LinkKind::Query { .. }
    )
}

/// The edit that puts `value` in place, or `None` when it is already there.
///
/// Blocks without a leading newline get `\nVALUE\n`; blocks whose content
/// runs up to the closing tag get a trailing newline.
fn edit_for(text: &str, link: &Link, value: String) -> Option<(Range<usize>, String)> {
    if link.bare {
        return Some((link.value.clone(), format!("\n{value}\n")));
    }
    let open_end = is_block_value(&link.kind) && !text[link.value.end..].starts_with('\n');
    if open_end {
        return Some((link.value.clone(), format!("{value}\n")));
    }
    (link.value(text) != value).then(|| (link.value.clone(), value))
}

/// Text to embed for a query response.
fn select(response: ExploreResponse, path: Option<&str>) -> Result<String, String> {
    match (response, path) {
        (ExploreResponse::Json(value), Some(path)) => {
            extract::extract(&value, path).map(|v| extract::format_value(&v))
        }
        (ExploreResponse::Json(value), None) => Ok(extract::format_value(&value)),
        (ExploreResponse::Text(_), Some(path)) => {
            Err(format!("cannot extract `{path}` from a non-JSON response"))
        }
        (ExploreResponse::Text(text), None) => Ok(text),
    }
}

/// `render="code"` / `render="code[LANG]"` wraps the content in a fence.
fn wrap_code(content: String, render: Option<&str>, lang: Option<&str>) -> String {
    let Some(mode) = render.filter(|m| m.starts_with("code")) else {
        return content;
    };
    let fence_lang = mode
        .strip_prefix("code[")
        .and_then(|rest| rest.strip_suffix(']'))
        .or(lang)
        .unwrap_or_default();
    format!("```{fence_lang}\n{content}\n```")
}
