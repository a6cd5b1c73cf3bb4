//! Code execution for `<exec>` blocks.
//!
//! Blocks of one document share a session: each block runs after the
//! session's earlier successful blocks are replayed, so names they define
//! stay visible. A boundary line printed between the replayed code and the
//! new block separates the block's own output.

use crate::config::ExecConfig;
use crate::utils::exec::{run_with_stdin, strip_ansi};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::Duration,
};

/// Environment variable carrying the session id into the interpreter.
pub const SESSION_ENV: &str = "CODEBOOK_SESSION";

const BOUNDARY: &str = "__codebook_block_boundary__";

/// Statement printing [`BOUNDARY`] on its own line, for languages that
/// support session replay.
fn boundary_statement(lang: &str) -> Option<String> {
    let stmt = match lang {
        "python" | "python3" => format!("print(\"{BOUNDARY}\")"),
        "sh" | "bash" | "zsh" => format!("echo '{BOUNDARY}'"),
        "ruby" => format!("puts \"{BOUNDARY}\""),
        "node" | "javascript" | "js" => format!("console.log(\"{BOUNDARY}\")"),
        _ => return None,
    };
    Some(stmt)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecOutcome {
    /// Captured standard output.
    Output(String),
    /// Error traceback, color sequences removed.
    Failed(String),
}

impl ExecOutcome {
    /// Text placed in the block's output region.
    pub fn render(&self) -> String {
        match self {
            Self::Output(text) => text.clone(),
            Self::Failed(traceback) => format!("Error: {traceback}"),
        }
    }
}

/// Runs code for a language within a named session.
pub trait Executor: Send + Sync {
    fn supports(&self, lang: &str) -> bool;

    /// Blocks of one document share `session`.
    fn execute(&self, session: &str, lang: &str, code: &str) -> ExecOutcome;

    /// Forget everything `session` has run. Called before a document's
    /// blocks are executed again.
    fn reset(&self, _session: &str) {}
}

/// Runs the configured interpreter per language with the code on stdin.
pub struct CommandExecutor {
    languages: BTreeMap<String, Vec<String>>,
    timeout: Duration,
    workdir: PathBuf,
    /// Code of successful blocks per (session, language).
    sessions: Mutex<FxHashMap<(String, String), Vec<String>>>,
}

impl CommandExecutor {
    pub fn new(config: &ExecConfig, workdir: &Path) -> Self {
        Self {
            languages: config.languages.clone(),
            timeout: config.timeout(),
            workdir: workdir.to_path_buf(),
            sessions: Mutex::default(),
        }
    }

    /// Interpreter input: earlier blocks, the boundary, then `code`.
    /// The flag tells whether anything was replayed.
    fn program(&self, session: &str, lang: &str, code: &str) -> (String, bool) {
        let sessions = self.sessions.lock();
        let history = sessions.get(&(session.to_owned(), lang.to_owned()));
        match (history, boundary_statement(lang)) {
            (Some(history), Some(boundary)) if !history.is_empty() => {
                let mut program = history.join("\n");
                program.push('\n');
                program.push_str(&boundary);
                program.push('\n');
                program.push_str(code);
                (program, true)
            }
            _ => (code.to_owned(), false),
        }
    }

    fn remember(&self, session: &str, lang: &str, code: &str) {
        if boundary_statement(lang).is_none() {
            return;
        }
        self.sessions
            .lock()
            .entry((session.to_owned(), lang.to_owned()))
            .or_default()
            .push(code.to_owned());
    }
}

/// Output after the last boundary line.
fn own_output(stdout: &str) -> &str {
    match stdout.rfind(BOUNDARY) {
        Some(pos) => stdout[pos + BOUNDARY.len()..]
            .strip_prefix('\n')
            .unwrap_or(&stdout[pos + BOUNDARY.len()..]),
        None => stdout,
    }
}

impl Executor for CommandExecutor {
    fn supports(&self, lang: &str) -> bool {
        self.languages.contains_key(lang)
    }

    fn execute(&self, session: &str, lang: &str, code: &str) -> ExecOutcome {
        let Some(command) = self.languages.get(lang) else {
            return ExecOutcome::Failed(format!("no interpreter configured for `{lang}`"));
        };

        let (program, replayed) = self.program(session, lang, code);
        match run_with_stdin(
            Some(&self.workdir),
            command,
            &program,
            &[(SESSION_ENV, session)],
            self.timeout,
        ) {
            Ok(captured) if captured.success() => {
                self.remember(session, lang, code);
                let stdout = if replayed {
                    own_output(&captured.stdout)
                } else {
                    &captured.stdout
                };
                ExecOutcome::Output(stdout.trim_end().to_owned())
            }
            Ok(captured) => {
                let stderr = strip_ansi(&captured.stderr);
                let traceback = stderr.trim_end();
                ExecOutcome::Failed(if traceback.is_empty() {
                    format!("process exited with {}", captured.status)
                } else {
                    traceback.to_owned()
                })
            }
            Err(e) => ExecOutcome::Failed(e.to_string()),
        }
    }

    fn reset(&self, session: &str) {
        self.sessions.lock().retain(|(s, _), _| s != session);
    }
}
