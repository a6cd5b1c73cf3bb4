//! codebook - keep live values, executable blocks and backlinks in markdown
//! documents up to date.

mod backlink;
mod cli;
mod collab;
mod config;
mod diff;
mod link;
mod logger;
mod render;
mod resolver;
#[cfg(test)]
mod testing;
mod utils;
mod watch;

use anyhow::{Context, Result, bail};
use clap::Parser;
use cli::{Cli, Commands};
use config::{BookConfig, CONFIG_FILE};
use render::{Engine, RenderResult};
use std::{fs, path::Path, sync::Arc};
use utils::path::rel_path;

fn main() -> Result<()> {
    let cli: &'static Cli = Box::leak(Box::new(Cli::parse()));
    logger::set_verbose(cli.verbose);
    let config: &'static BookConfig = Box::leak(Box::new(load_config(cli)?));

    match &cli.command {
        Commands::Init { output } => init_config(config, output.as_deref()),
        Commands::Render { path, dry_run, .. } => {
            let engine = Engine::from_config(config)?;
            let target = path.as_deref().map_or_else(|| config.root.clone(), |p| config.root.join(p));
            render(&engine, config, &target, *dry_run)
        }
        Commands::Watch { dir, .. } => {
            let engine = Arc::new(Engine::from_config(config)?);
            let dir = dir.as_deref().map_or_else(|| config.root.clone(), |d| config.root.join(d));
            watch::watch_directory(engine, &dir, config.render.recursive, &config.watch)
        }
        Commands::Show { file } => {
            let engine = Engine::from_config(config)?;
            let content = engine.show(&config.root.join(file))?;
            print!("{content}");
            Ok(())
        }
        Commands::Diff {
            path,
            reference,
            output,
            ..
        } => {
            let engine = Engine::from_config(config)?;
            let target = path.as_deref().map_or_else(|| config.root.clone(), |p| config.root.join(p));
            print_diff(&engine, config, &target, reference, output.as_deref())
        }
        Commands::Health => health(&Engine::from_config(config)?),
    }
}

/// Load and validate configuration from CLI arguments
fn load_config(cli: &'static Cli) -> Result<BookConfig> {
    if cli.is_init() {
        let mut config = BookConfig::default();
        let root = cli.root.as_deref().unwrap_or(Path::new("."));
        config.update_with_cli(cli, root);
        return Ok(config);
    }

    let config = BookConfig::load(cli)?;
    match &config.config_path {
        Some(path) => vlog!("config"; "using {}", path.display()),
        None => vlog!("config"; "no {CONFIG_FILE} found, using defaults"),
    }
    config.validate()?;
    Ok(config)
}

fn init_config(config: &BookConfig, output: Option<&Path>) -> Result<()> {
    let path = config.root.join(output.unwrap_or(Path::new(CONFIG_FILE)));
    if path.exists() {
        bail!(
            "Config file already exists: {}. Remove it manually or init in a different path.",
            path.display()
        );
    }
    let content = BookConfig::default_toml()?;
    fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))?;
    log!("init"; "wrote {}", rel_path(&path, &config.root));
    Ok(())
}

fn render(engine: &Engine, config: &BookConfig, target: &Path, dry_run: bool) -> Result<()> {
    let results = if target.is_dir() {
        engine.render_directory(target, config.render.recursive, dry_run)?
    } else {
        vec![engine.render_file(target, dry_run)]
    };

    report(&results, &config.root, dry_run);

    let failed = results.iter().filter(|r| !r.is_ok()).count();
    if failed > 0 {
        bail!("{failed} of {} files failed to render", results.len());
    }
    Ok(())
}

fn print_diff(
    engine: &Engine,
    config: &BookConfig,
    target: &Path,
    reference: &str,
    output: Option<&Path>,
) -> Result<()> {
    let diffs = diff::diff_path(engine, target, reference, config.render.recursive)?;

    let mut combined = String::new();
    let mut failed = 0;
    for file in &diffs {
        match &file.diff {
            Ok(text) => combined.push_str(text),
            Err(e) => {
                log!("diff"; "{}: {e:#}", rel_path(&file.path, &config.root));
                failed += 1;
            }
        }
    }

    match output {
        Some(path) => {
            let path = config.root.join(path);
            fs::write(&path, &combined)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            log!("diff"; "wrote {}", rel_path(&path, &config.root));
        }
        None => print!("{combined}"),
    }

    if failed > 0 {
        bail!("{failed} of {} files failed to diff", diffs.len());
    }
    Ok(())
}

fn report(results: &[RenderResult], root: &Path, dry_run: bool) {
    for result in results {
        let rel = rel_path(&result.path, root);
        if result.error.is_some() || result.changed || result.deferred || result.stale {
            log!("render"; "{rel}: {}", result.summary());
        } else {
            vlog!("render"; "{rel}: {}", result.summary());
        }
    }

    let changed = results.iter().filter(|r| r.changed).count();
    let verb = if dry_run { "would change" } else { "changed" };
    log!("render"; "{} files, {changed} {verb}", results.len());
}

fn health(engine: &Engine) -> Result<()> {
    let mut healthy = true;

    match engine.resolver().health() {
        Ok(()) => log!("health"; "backend {} ok", engine.resolver().backend_name()),
        Err(e) => {
            log!("health"; "backend {}: {e}", engine.resolver().backend_name());
            healthy = false;
        }
    }

    if let Some(explorer) = engine.explorer() {
        match explorer.health() {
            Ok(()) => log!("health"; "explorer ok"),
            Err(e) => {
                log!("health"; "explorer: {e}");
                healthy = false;
            }
        }
    }

    if !healthy {
        bail!("health check failed");
    }
    Ok(())
}
