//! Configuration management for `codebook.toml`.
//!
//! # Sections
//!
//! | Section     | Purpose                                          |
//! |-------------|--------------------------------------------------|
//! | `[backend]` | Value backend URL, request timeout, cache TTL    |
//! | `[render]`  | Directory render recursion and excluded paths    |
//! | `[exec]`    | Executable blocks (interpreters, timeout)        |
//! | `[explore]` | Query blocks (exploration service URL, timeout)  |
//! | `[watch]`   | Debounce, cooldown and event queue size          |
//!
//! # Example
//!
//! ```toml
//! [backend]
//! url = "http://localhost:3000"
//! cache_ttl = 60
//!
//! [render]
//! exclude = [".codebook/tasks"]
//!
//! [exec]
//! enable = true
//!
//! [watch]
//! debounce_ms = 500
//! ```
//!
//! The file is optional: without one every section takes its defaults.

mod backend;
pub mod defaults;
mod error;
mod exec;
mod explore;
mod render;
mod watch;

pub use backend::BackendConfig;
pub use error::ConfigError;
pub use exec::ExecConfig;
pub use explore::ExploreConfig;
pub use render::RenderConfig;
pub use watch::WatchConfig;

use crate::cli::{Cli, Commands};
use crate::utils::path::normalize_path;
use anyhow::{Context, Result, bail};
use educe::Educe;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Default config file name.
pub const CONFIG_FILE: &str = "codebook.toml";

/// How many parent directories are searched for a config file.
const MAX_SEARCH_DEPTH: usize = 10;

// ============================================================================
// Root Configuration
// ============================================================================

/// Root configuration structure representing codebook.toml
#[derive(Debug, Clone, Educe, Serialize, Deserialize)]
#[educe(Default)]
#[serde(deny_unknown_fields)]
pub struct BookConfig {
    /// Absolute path to the config file, if one was loaded
    #[serde(skip)]
    pub config_path: Option<PathBuf>,

    /// Absolute render root; `/`-prefixed links resolve against it
    #[serde(skip)]
    #[educe(Default = PathBuf::from("."))]
    pub root: PathBuf,

    /// Value backend settings
    #[serde(default)]
    pub backend: BackendConfig,

    /// Directory render settings
    #[serde(default)]
    pub render: RenderConfig,

    /// Executable block settings
    #[serde(default)]
    pub exec: ExecConfig,

    /// Query block settings
    #[serde(default)]
    pub explore: ExploreConfig,

    /// Watch loop timing
    #[serde(default)]
    pub watch: WatchConfig,
}

impl BookConfig {
    /// Parse configuration from TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self> {
        let config: BookConfig = toml::from_str(content).map_err(ConfigError::Toml)?;
        Ok(config)
    }

    /// Load configuration from file path
    pub fn from_path(path: &Path) -> Result<Self> {
        let content =
            fs::read_to_string(path).map_err(|err| ConfigError::Io(path.to_path_buf(), err))?;
        Self::from_str(&content).with_context(|| format!("in {}", path.display()))
    }

    /// Search `start` and its parents for `codebook.toml`.
    pub fn find(start: &Path) -> Option<PathBuf> {
        start
            .ancestors()
            .take(MAX_SEARCH_DEPTH + 1)
            .map(|dir| dir.join(CONFIG_FILE))
            .find(|candidate| candidate.is_file())
    }

    /// Load configuration for a CLI invocation.
    ///
    /// An explicit `--config` must exist; otherwise the file is searched
    /// upward from the root and defaults apply when none is found.
    pub fn load(cli: &Cli) -> Result<Self> {
        let root = normalize_path(cli.root.as_deref().unwrap_or(Path::new(".")));

        let config_path = match &cli.config {
            Some(path) => {
                let path = root.join(path);
                if !path.is_file() {
                    bail!("Config file not found: {}", path.display());
                }
                Some(path)
            }
            None => Self::find(&root),
        };

        let mut config = match &config_path {
            Some(path) => Self::from_path(path)?,
            None => Self::default(),
        };
        config.config_path = config_path.as_deref().map(normalize_path);
        config.update_with_cli(cli, &root);

        Ok(config)
    }

    /// Update configuration with CLI arguments
    pub fn update_with_cli(&mut self, cli: &Cli, root: &Path) {
        self.root = normalize_path(root);

        Self::update_option(&mut self.backend.url, cli.backend_url.as_ref());
        Self::update_option(&mut self.backend.cache_ttl, cli.cache_ttl.as_ref());
        Self::update_option(&mut self.backend.timeout, cli.timeout.as_ref());

        match &cli.command {
            Commands::Diff { recursive, .. } => {
                Self::update_option(&mut self.render.recursive, recursive.as_ref());
            }
            Commands::Render {
                recursive, exec, ..
            } => {
                Self::update_option(&mut self.render.recursive, recursive.as_ref());
                Self::update_option(&mut self.exec.enable, exec.as_ref());
            }
            Commands::Watch {
                debounce_ms, exec, ..
            } => {
                Self::update_option(&mut self.watch.debounce_ms, debounce_ms.as_ref());
                Self::update_option(&mut self.exec.enable, exec.as_ref());
            }
            _ => {}
        }

        self.render.exclude = self
            .render
            .exclude
            .iter()
            .map(|path| normalize_path(&self.root.join(expand_tilde(path))))
            .collect();
    }

    /// Update config option if CLI value is provided
    fn update_option<T: Clone>(config_option: &mut T, cli_option: Option<&T>) {
        if let Some(option) = cli_option {
            *config_option = option.clone();
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !self.backend.url.starts_with("http") {
            bail!(ConfigError::Validation(
                "[backend.url] must start with http:// or https://".into()
            ));
        }

        if self.explore.enable && !self.explore.url.starts_with("http") {
            bail!(ConfigError::Validation(
                "[explore.url] must start with http:// or https://".into()
            ));
        }

        if self.watch.debounce_ms == 0 {
            bail!(ConfigError::Validation(
                "[watch.debounce_ms] must be greater than 0".into()
            ));
        }

        if self.watch.queue_capacity == 0 {
            bail!(ConfigError::Validation(
                "[watch.queue_capacity] must be greater than 0".into()
            ));
        }

        if self.exec.enable {
            for (lang, command) in &self.exec.languages {
                Self::check_command_installed(&format!("[exec.languages.{lang}]"), command)?;
            }
        }

        Ok(())
    }

    /// Check if a command is installed and available
    fn check_command_installed(field: &str, command: &[String]) -> Result<()> {
        if command.is_empty() {
            bail!(ConfigError::Validation(format!(
                "{field} must have at least one element"
            )));
        }

        let cmd = &command[0];
        which::which(cmd)
            .with_context(|| format!("`{cmd}` not found. Please install it first."))?;

        Ok(())
    }

    /// The default configuration as TOML, written by `codebook init`.
    pub fn default_toml() -> Result<String> {
        toml::to_string_pretty(&Self::default()).context("Failed to serialize default config")
    }
}

/// Expand a leading `~` to the home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    match path.to_str() {
        Some(text) => PathBuf::from(shellexpand::tilde(text).into_owned()),
        None => path.to_path_buf(),
    }
}

// ============================================================================
// Tests
// ============================================================================
