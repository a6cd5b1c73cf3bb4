//! Watch loop: re-render documents as they change.
//!
//! # Architecture
//!
//! ```text
//! notify ──▶ bounded queue ──▶ dispatcher ──▶ one thread per render
//!                                 │                   │
//!                                 ▼                   ▼
//!                            WatchState ◀──── finish(path, touched)
//!                  (cooldown, debounce deadlines, in-flight set)
//! ```
//!
//! An event for a path is dropped while that path is in cooldown: rendered
//! or written by a render within `cooldown_ms`. Otherwise it (re)sets the
//! path's debounce deadline. When a deadline passes the path is rendered
//! from what is on disk at that moment.
//!
//! An event for a path being rendered marks it dirty. When that render
//! finishes, the path is rendered again unless the file still holds exactly
//! what the render left, in which case the event was the render's own write.

use crate::{
    config::WatchConfig,
    log,
    logger::timestamp,
    render::{Engine, RenderResult},
    utils::{
        fs::fingerprint,
        path::{is_markdown, is_temp_file, normalize_path, rel_path},
    },
    vlog,
};
use anyhow::{Context, Result};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        Arc,
        mpsc::{Receiver, RecvTimeoutError, sync_channel},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

/// Wait used when no render is pending.
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

pub enum WatchMsg {
    Changed(Vec<PathBuf>),
    Shutdown,
}

/// What one render left behind.
#[derive(Debug, Default)]
pub struct Rendered {
    /// Files the render wrote.
    pub touched: Vec<PathBuf>,
    /// Fingerprint of the document as the render left it, if known.
    pub fingerprint: Option<u64>,
    /// The document changed under the render; it must be rendered again.
    pub stale: bool,
}

impl Rendered {
    /// Whether the file on disk is no longer what this render left.
    fn superseded(&self, path: &Path) -> bool {
        self.stale
            || self.fingerprint.is_none_or(|expected| {
                !fs::read_to_string(path).is_ok_and(|text| fingerprint(&text) == expected)
            })
    }
}

// =============================================================================
// State
// =============================================================================

/// Per-path timing shared by the dispatcher and render threads.
#[derive(Debug)]
pub struct WatchState {
    debounce: Duration,
    cooldown: Duration,
    last_render: FxHashMap<PathBuf, Instant>,
    /// Debounce deadline per path.
    pending: FxHashMap<PathBuf, Instant>,
    in_flight: FxHashSet<PathBuf>,
    /// In-flight paths that saw an event.
    dirty: FxHashSet<PathBuf>,
}

impl WatchState {
    pub fn new(debounce: Duration, cooldown: Duration) -> Self {
        Self {
            debounce,
            cooldown,
            last_render: FxHashMap::default(),
            pending: FxHashMap::default(),
            in_flight: FxHashSet::default(),
            dirty: FxHashSet::default(),
        }
    }

    pub fn from_config(config: &WatchConfig) -> Self {
        Self::new(config.debounce(), config.cooldown())
    }

    pub fn in_cooldown(&self, path: &Path, now: Instant) -> bool {
        self.last_render
            .get(path)
            .is_some_and(|t| now.saturating_duration_since(*t) < self.cooldown)
    }

    /// Record a change. Returns whether a render is now scheduled.
    ///
    /// A change to a path being rendered only marks it dirty.
    pub fn on_event(&mut self, path: PathBuf, now: Instant) -> bool {
        if self.in_flight.contains(&path) {
            self.dirty.insert(path);
            return false;
        }
        if self.in_cooldown(&path, now) {
            return false;
        }
        self.pending.insert(path, now + self.debounce);
        true
    }

    /// Schedule `path` again, ignoring cooldown.
    pub fn reschedule(&mut self, path: PathBuf, now: Instant) {
        self.pending.insert(path, now + self.debounce);
    }

    /// Paths whose deadline has passed, sorted. They leave the pending set.
    pub fn take_due(&mut self, now: Instant) -> Vec<PathBuf> {
        let mut due: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(path, deadline)| **deadline <= now && !self.in_flight.contains(*path))
            .map(|(path, _)| path.clone())
            .collect();
        due.sort();
        for path in &due {
            self.pending.remove(path);
        }
        due
    }

    pub fn begin(&mut self, path: &Path) {
        self.in_flight.insert(path.to_path_buf());
    }

    /// Mark a render finished. The path and every file it wrote enter
    /// cooldown. Returns whether the path saw an event while rendering.
    pub fn finish(&mut self, path: &Path, touched: &[PathBuf], now: Instant) -> bool {
        self.in_flight.remove(path);
        self.last_render.insert(path.to_path_buf(), now);
        for file in touched {
            self.last_render.insert(file.clone(), now);
        }
        let cooldown = self.cooldown;
        self.last_render
            .retain(|_, t| now.saturating_duration_since(*t) < cooldown);
        self.dirty.remove(path)
    }

    /// How long the dispatcher may sleep before the next deadline.
    ///
    /// While renders run it wakes every debounce period, since a finishing
    /// render may schedule its path again.
    pub fn next_timeout(&self, now: Instant) -> Duration {
        let timeout = self
            .pending
            .values()
            .min()
            .map_or(IDLE_TIMEOUT, |deadline| deadline.saturating_duration_since(now));
        if self.in_flight.is_empty() {
            timeout
        } else {
            timeout.min(self.debounce)
        }
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.in_flight.is_empty()
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Drive renders from `rx` until shutdown or until every sender is gone.
///
/// `render` is called on its own thread. A render that was superseded by an
/// edit is followed by another one. Running renders are joined before
/// returning.
pub fn dispatch<F>(rx: &Receiver<WatchMsg>, state: &Arc<Mutex<WatchState>>, render: F)
where
    F: Fn(&Path) -> Rendered + Send + Sync + 'static,
{
    let render = Arc::new(render);
    let mut handles: Vec<JoinHandle<()>> = Vec::new();

    loop {
        let timeout = state.lock().next_timeout(Instant::now());
        match rx.recv_timeout(timeout) {
            Ok(WatchMsg::Changed(paths)) => {
                let now = Instant::now();
                let mut state = state.lock();
                for path in paths {
                    if !state.on_event(path.clone(), now) {
                        vlog!("watch"; "holding back {} (cooldown or rendering)", path.display());
                    }
                }
            }
            Ok(WatchMsg::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        let due = {
            let mut state = state.lock();
            let due = state.take_due(Instant::now());
            for path in &due {
                state.begin(path);
            }
            due
        };

        for path in due {
            let render = Arc::clone(&render);
            let state = Arc::clone(state);
            handles.push(thread::spawn(move || {
                let rendered = render(&path);
                let dirty = state.lock().finish(&path, &rendered.touched, Instant::now());
                if (dirty || rendered.stale) && rendered.superseded(&path) {
                    vlog!("watch"; "{} changed while rendering, rendering again", path.display());
                    state.lock().reschedule(path, Instant::now());
                }
            }));
        }
        handles.retain(|h| !h.is_finished());
    }

    for handle in handles {
        if handle.join().is_err() {
            log!("watch"; "a render thread panicked");
        }
    }
}

// =============================================================================
// Public API
// =============================================================================

const fn is_relevant(event: &Event) -> bool {
    matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
}

fn log_result(result: &RenderResult, root: &Path) {
    let rel = rel_path(&result.path, root);
    if result.error.is_some() || result.changed || result.stale {
        log!("watch"; "{} {rel}: {}", timestamp(), result.summary());
    } else {
        vlog!("watch"; "{rel}: {}", result.summary());
    }
}

/// Render `dir`, then keep rendering documents as they change until Ctrl+C.
pub fn watch_directory(engine: Arc<Engine>, dir: &Path, recursive: bool, config: &WatchConfig) -> Result<()> {
    let dir = normalize_path(dir);
    let root = engine.root().to_path_buf();

    let results = engine
        .render_directory(&dir, recursive, false)
        .with_context(|| format!("Failed to render {}", dir.display()))?;
    let failed = results.iter().filter(|r| !r.is_ok()).count();
    for result in &results {
        log_result(result, &root);
    }
    log!("watch"; "rendered {} files ({failed} failed)", results.len());

    let (tx, rx) = sync_channel(config.queue_capacity);

    let events = tx.clone();
    let filter = Arc::clone(&engine);
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) if is_relevant(&event) => {
            let paths: Vec<PathBuf> = event
                .paths
                .iter()
                .filter(|p| is_markdown(p) && !is_temp_file(p) && !filter.is_excluded(p))
                .map(|p| normalize_path(p))
                .collect();
            if !paths.is_empty() {
                let _ = events.send(WatchMsg::Changed(paths));
            }
        }
        Ok(_) => {}
        Err(e) => log!("watch"; "error: {e}"),
    })
    .context("Failed to create file watcher")?;

    let mode = if recursive {
        RecursiveMode::Recursive
    } else {
        RecursiveMode::NonRecursive
    };
    watcher
        .watch(&dir, mode)
        .with_context(|| format!("Failed to watch {}", dir.display()))?;

    ctrlc::set_handler(move || {
        log!("watch"; "shutting down...");
        let _ = tx.send(WatchMsg::Shutdown);
    })
    .context("Failed to set Ctrl+C handler")?;

    log!("watch"; "watching {}", rel_path(&dir, &root));

    let state = Arc::new(Mutex::new(WatchState::from_config(config)));
    dispatch(&rx, &state, move |path| {
        let result = engine.render_file(path, false);
        log_result(&result, &root);
        engine.resolver().purge_expired();
        Rendered {
            touched: result.touched,
            fingerprint: result.fingerprint,
            stale: result.stale,
        }
    });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> WatchState {
        WatchState::new(Duration::from_millis(100), Duration::from_millis(1000))
    }

    fn p(name: &str) -> PathBuf {
        PathBuf::from(format!("/book/{name}"))
    }

    #[test]
    fn test_debounce_coalesces_events() {
        let mut s = state();
        let t0 = Instant::now();

        assert!(s.on_event(p("a.md"), t0));
        assert!(s.on_event(p("a.md"), t0 + Duration::from_millis(80)));
        // The second event pushed the deadline out.
        assert!(s.take_due(t0 + Duration::from_millis(120)).is_empty());
        assert_eq!(s.take_due(t0 + Duration::from_millis(180)), vec![p("a.md")]);
        assert!(s.take_due(t0 + Duration::from_millis(500)).is_empty());
    }

    #[test]
    fn test_paths_are_independent() {
        let mut s = state();
        let t0 = Instant::now();
        s.on_event(p("b.md"), t0);
        s.on_event(p("a.md"), t0 + Duration::from_millis(50));

        assert_eq!(s.take_due(t0 + Duration::from_millis(100)), vec![p("b.md")]);
        assert_eq!(s.take_due(t0 + Duration::from_millis(150)), vec![p("a.md")]);
    }

    #[test]
    fn test_cooldown_after_render() {
        let mut s = state();
        let t0 = Instant::now();
        s.on_event(p("a.md"), t0);
        let due = s.take_due(t0 + Duration::from_millis(100));
        s.begin(&due[0]);

        // Events while rendering are held back until the render finishes.
        assert!(!s.on_event(p("a.md"), t0 + Duration::from_millis(150)));

        let done = t0 + Duration::from_millis(200);
        assert!(s.finish(&p("a.md"), &[p("a.md"), p("b.md")], done));
        assert!(s.is_idle());

        assert!(!s.on_event(p("a.md"), done + Duration::from_millis(10)));
        assert!(!s.on_event(p("b.md"), done + Duration::from_millis(10)));
        assert!(s.on_event(p("a.md"), done + Duration::from_millis(1000)));
    }

    #[test]
    fn test_edit_during_render_is_rescheduled() {
        let mut s = state();
        let t0 = Instant::now();
        s.begin(&p("a.md"));
        assert!(!s.on_event(p("a.md"), t0));

        let done = t0 + Duration::from_millis(50);
        assert!(s.finish(&p("a.md"), &[p("a.md")], done));
        // A quiet render leaves nothing dirty behind.
        s.begin(&p("b.md"));
        assert!(!s.finish(&p("b.md"), &[], done));

        s.reschedule(p("a.md"), done);
        assert!(s.take_due(done).is_empty());
        assert_eq!(s.take_due(done + Duration::from_millis(100)), vec![p("a.md")]);
    }

    #[test]
    fn test_superseded() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("a.md");
        fs::write(&path, "rendered").unwrap();

        let rendered = Rendered {
            fingerprint: Some(fingerprint("rendered")),
            ..Rendered::default()
        };
        assert!(!rendered.superseded(&path));
        fs::write(&path, "user edit").unwrap();
        assert!(rendered.superseded(&path));

        assert!(Rendered::default().superseded(&path));
        let stale = Rendered {
            fingerprint: Some(fingerprint("user edit")),
            stale: true,
            ..Rendered::default()
        };
        assert!(stale.superseded(&path));
    }

    #[test]
    fn test_next_timeout() {
        let mut s = state();
        let t0 = Instant::now();
        assert_eq!(s.next_timeout(t0), IDLE_TIMEOUT);
        s.on_event(p("a.md"), t0);
        assert_eq!(s.next_timeout(t0 + Duration::from_millis(30)), Duration::from_millis(70));
        assert_eq!(s.next_timeout(t0 + Duration::from_millis(300)), Duration::ZERO);

        s.take_due(t0 + Duration::from_millis(300));
        s.begin(&p("a.md"));
        assert_eq!(s.next_timeout(t0), Duration::from_millis(100));
    }

    #[test]
    fn test_dispatch_suppresses_own_writes() {
        let state = Arc::new(Mutex::new(WatchState::new(
            Duration::from_millis(30),
            Duration::from_millis(400),
        )));
        let renders = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = sync_channel(16);

        let seen = Arc::clone(&renders);
        let dispatcher = {
            let state = Arc::clone(&state);
            thread::spawn(move || {
                dispatch(&rx, &state, move |path| {
                    seen.lock().push(path.to_path_buf());
                    Rendered {
                        touched: vec![path.to_path_buf()],
                        ..Rendered::default()
                    }
                });
            })
        };

        // A burst of edits renders once.
        for _ in 0..3 {
            tx.send(WatchMsg::Changed(vec![p("a.md")])).unwrap();
            thread::sleep(Duration::from_millis(5));
        }
        thread::sleep(Duration::from_millis(150));
        assert_eq!(renders.lock().len(), 1);

        // The render's own write event falls in the cooldown window.
        tx.send(WatchMsg::Changed(vec![p("a.md")])).unwrap();
        thread::sleep(Duration::from_millis(150));
        assert_eq!(renders.lock().len(), 1);

        // A later user edit renders again.
        thread::sleep(Duration::from_millis(400));
        tx.send(WatchMsg::Changed(vec![p("a.md")])).unwrap();
        thread::sleep(Duration::from_millis(200));
        assert_eq!(renders.lock().len(), 2);

        tx.send(WatchMsg::Shutdown).unwrap();
        dispatcher.join().unwrap();
        assert!(state.lock().is_idle());
    }

    /// Run a dispatcher whose render takes `slow` and leaves the file as is.
    /// During the first render `during` runs and a change event is sent.
    fn render_with_edit(during: impl Fn(&Path) + Send + 'static) -> usize {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("a.md");
        fs::write(&path, "v1").unwrap();

        let state = Arc::new(Mutex::new(WatchState::new(
            Duration::from_millis(20),
            Duration::from_millis(500),
        )));
        let renders = Arc::new(Mutex::new(0));
        let (tx, rx) = sync_channel(16);

        let count = Arc::clone(&renders);
        let dispatcher = {
            let state = Arc::clone(&state);
            thread::spawn(move || {
                dispatch(&rx, &state, move |path| {
                    let text = fs::read_to_string(path).unwrap();
                    *count.lock() += 1;
                    thread::sleep(Duration::from_millis(100));
                    Rendered {
                        fingerprint: Some(fingerprint(&text)),
                        ..Rendered::default()
                    }
                });
            })
        };

        tx.send(WatchMsg::Changed(vec![path.clone()])).unwrap();
        thread::sleep(Duration::from_millis(60));
        during(&path);
        tx.send(WatchMsg::Changed(vec![path.clone()])).unwrap();

        thread::sleep(Duration::from_millis(400));
        tx.send(WatchMsg::Shutdown).unwrap();
        dispatcher.join().unwrap();
        let count = *renders.lock();
        count
    }

    #[test]
    fn test_dispatch_renders_again_after_edit_during_render() {
        let count = render_with_edit(|path| fs::write(path, "v2").unwrap());
        assert_eq!(count, 2);
    }

    #[test]
    fn test_dispatch_ignores_own_write_during_render() {
        let count = render_with_edit(|_| {});
        assert_eq!(count, 1);
    }

    #[test]
    fn test_dispatch_stops_when_senders_drop() {
        let state = Arc::new(Mutex::new(state()));
        let (tx, rx) = sync_channel::<WatchMsg>(1);
        drop(tx);
        dispatch(&rx, &state, |_| Rendered::default());
        assert!(state.lock().is_idle());
    }
}
