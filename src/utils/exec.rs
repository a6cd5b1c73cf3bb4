//! External command execution utilities.
//!
//! Runs interpreter processes for executable blocks: code goes in on stdin,
//! stdout and stderr are captured, and a wall-clock timeout kills runaways.

use anyhow::{Context, Result, bail};
use regex::Regex;
use std::{
    borrow::Cow,
    io::{Read, Write},
    path::Path,
    process::{Command, ExitStatus, Stdio},
    sync::OnceLock,
    thread,
    time::{Duration, Instant},
};

/// How often a running child is polled for exit.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Output of a finished process.
#[derive(Debug)]
pub struct Captured {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl Captured {
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

/// Run `cmd` with `input` on stdin and capture its output.
///
/// `envs` are exported to the child in addition to the inherited environment.
///
/// # Errors
/// Returns error if the command cannot be spawned or exceeds `timeout`.
/// A non-zero exit is not an error; check [`Captured::success`].
pub fn run_with_stdin(
    root: Option<&Path>,
    cmd: &[String],
    input: &str,
    envs: &[(&str, &str)],
    timeout: Duration,
) -> Result<Captured> {
    let (name, mut command) = prepare(root, cmd)?;

    command
        .envs(envs.iter().copied())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command
        .spawn()
        .with_context(|| format!("Failed to spawn `{name}`"))?;

    // Feed stdin and drain the pipes on their own threads so a chatty child
    // cannot block on a full pipe while we wait for it.
    let mut stdin = child.stdin.take().context("Failed to acquire stdin")?;
    let input = input.to_owned();
    let writer = thread::spawn(move || {
        let _ = stdin.write_all(input.as_bytes());
    });
    let stdout = child.stdout.take().context("Failed to acquire stdout")?;
    let stderr = child.stderr.take().context("Failed to acquire stderr")?;
    let stdout_reader = spawn_reader(stdout);
    let stderr_reader = spawn_reader(stderr);

    let started = Instant::now();
    let status = loop {
        if let Some(status) = child
            .try_wait()
            .with_context(|| format!("{name} process failed"))?
        {
            break status;
        }
        if started.elapsed() >= timeout {
            let _ = child.kill();
            let _ = child.wait();
            bail!("Command `{name}` timed out after {}s", timeout.as_secs());
        }
        thread::sleep(POLL_INTERVAL);
    };

    let _ = writer.join();
    let stdout = stdout_reader.join().unwrap_or_default();
    let stderr = stderr_reader.join().unwrap_or_default();

    Ok(Captured {
        status,
        stdout,
        stderr,
    })
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

/// Prepare a Command from components.
fn prepare(root: Option<&Path>, cmd: &[String]) -> Result<(String, Command)> {
    let name = cmd.first().context("Empty command")?.to_owned();

    let mut command = Command::new(&cmd[0]);
    command.args(&cmd[1..]);

    if let Some(dir) = root {
        command.current_dir(dir);
    }

    Ok((name, command))
}

/// Remove terminal color sequences from process output.
pub fn strip_ansi(s: &str) -> Cow<'_, str> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]").unwrap());
    re.replace_all(s, "")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".into(), "-c".into(), script.into()]
    }

    #[test]
    fn test_prepare_empty() {
        assert!(prepare(None, &[]).is_err());
    }

    #[test]
    fn test_prepare_valid() {
        let (name, _) = prepare(None, &["echo".to_string(), "hi".to_string()]).unwrap();
        assert_eq!(name, "echo");
    }

    #[cfg(unix)]
    #[test]
    fn test_run_with_stdin_echoes_input() {
        let out = run_with_stdin(
            None,
            &["cat".to_string()],
            "hello\n",
            &[],
            Duration::from_secs(5),
        )
        .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout, "hello\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_run_with_stdin_exports_env() {
        let out = run_with_stdin(
            None,
            &sh("printf %s \"$CODEBOOK_TEST_VAR\""),
            "",
            &[("CODEBOOK_TEST_VAR", "abc")],
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(out.stdout, "abc");
    }

    #[cfg(unix)]
    #[test]
    fn test_run_with_stdin_failure_captures_stderr() {
        let out = run_with_stdin(
            None,
            &sh("echo boom >&2; exit 3"),
            "",
            &[],
            Duration::from_secs(5),
        )
        .unwrap();
        assert!(!out.success());
        assert_eq!(out.stderr.trim(), "boom");
    }

    #[cfg(unix)]
    #[test]
    fn test_run_with_stdin_timeout() {
        let err = run_with_stdin(
            None,
            &sh("sleep 5"),
            "",
            &[],
            Duration::from_millis(100),
        )
        .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn test_run_missing_program() {
        let result = run_with_stdin(
            None,
            &["codebook-definitely-not-installed".to_string()],
            "",
            &[],
            Duration::from_secs(1),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_strip_ansi() {
        assert_eq!(strip_ansi("\x1b[31mRed\x1b[0m"), "Red");
        assert_eq!(strip_ansi("\x1b[1;32mGreen Bold\x1b[0m"), "Green Bold");
        assert_eq!(strip_ansi("Plain text"), "Plain text");
        assert_eq!(
            strip_ansi("Start \x1b[33mYellow\x1b[0m End"),
            "Start Yellow End"
        );
    }
}
