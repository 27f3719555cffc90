//! OWS configuration maintenance tool.
//!
//! Checks a configuration against a datacube catalogue, prints the layer
//! tree and maintains the layer range store.

mod report;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ows_config::{MemoryIndex, MemoryRangeStore, ModuleRegistry, OwsConfig};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "ows-cfg")]
#[command(about = "Check OWS configuration and maintain layer ranges")]
struct Args {
    /// Configuration source: file path, module reference or inline JSON
    #[arg(short, long, env = "DATACUBE_OWS_CFG")]
    config: Option<String>,

    /// Datacube catalogue file (JSON or YAML)
    #[arg(long, env = "OWS_CATALOGUE")]
    catalogue: PathBuf,

    /// Range store file
    #[arg(long, env = "OWS_RANGES", default_value = "ows_ranges.json")]
    ranges: PathBuf,

    /// Log level, used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse the configuration and make it ready against the catalogue
    Check,
    /// Recompute the ranges of every layer and save the range store
    UpdateRanges,
    /// Print the layer tree with the state of each layer
    Show,
}

fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_tracing(&args.log_level, args.json)?;

    let index = MemoryIndex::load(&args.catalogue)
        .with_context(|| format!("loading catalogue {}", args.catalogue.display()))?;
    let store = load_store(&args.ranges)?;
    let mut cfg = OwsConfig::load(args.config.as_deref(), &ModuleRegistry::new())
        .context("loading OWS configuration")?;
    info!(title = %cfg.metadata.title, "Parsed configuration");

    match args.command {
        Command::Check => {
            cfg.make_ready(&index, &store)?;
            let problems = report::problems(&cfg);
            for problem in &problems {
                warn!(problem = %problem, "Configuration problem");
            }
            println!("{}", report::summary(&cfg));
            if !problems.is_empty() {
                bail!("{} configuration problem(s) found", problems.len());
            }
        }
        Command::UpdateRanges => {
            cfg.make_ready_with(&index, &store, true)?;
            let summary = cfg.update_ranges(&index, &store)?;
            store
                .save(&args.ranges)
                .with_context(|| format!("saving ranges to {}", args.ranges.display()))?;
            info!(
                updated = summary.updated.len(),
                empty = summary.empty.len(),
                failed = summary.failed.len(),
                path = %args.ranges.display(),
                "Range update complete"
            );
            if !summary.failed.is_empty() {
                bail!("ranges could not be computed for {} layer(s)", summary.failed.len());
            }
        }
        Command::Show => {
            cfg.make_ready(&index, &store)?;
            print!("{}", report::render_tree(&cfg));
        }
    }
    Ok(())
}

fn init_tracing(log_level: &str, json: bool) -> Result<()> {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let builder = fmt()
        .with_env_filter(log_filter(rust_log.as_deref(), log_level))
        .with_writer(std::io::stderr);
    if json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

/// `RUST_LOG` directives when set and valid, else `--log-level`.
fn log_filter(rust_log: Option<&str>, log_level: &str) -> EnvFilter {
    rust_log
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(log_level.to_lowercase()))
}

fn load_store(path: &Path) -> Result<MemoryRangeStore> {
    if !path.exists() {
        info!(path = %path.display(), "No range store yet - starting empty");
        return Ok(MemoryRangeStore::new());
    }
    MemoryRangeStore::load(path).with_context(|| format!("loading ranges {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::level_filters::LevelFilter;

    #[test]
    fn test_rust_log_overrides_log_level() {
        let filter = log_filter(Some("warn"), "debug");
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::WARN));
    }

    #[test]
    fn test_log_level_used_without_rust_log() {
        let filter = log_filter(None, "DEBUG");
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::DEBUG));
    }
}
