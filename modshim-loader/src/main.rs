//! # modshim-loader
//!
//! Checks a mods folder against the installed host's compatibility data and
//! loads every mod that can be loaded.
//!
//! For each mod folder the loader:
//! - Resolves dependencies and load order
//! - Scans the compiled binary for host symbol references
//! - Rewrites references to relocated symbols, through facades where needed
//! - Hands the result to the plugin host, or reports why it can't
//!
//! ## Configuration
//!
//! The loader reads configuration from `$XDG_CONFIG_HOME/modshim/config.toml`,
//! creating a documented default on first run.
//!
//! ## Running
//!
//! ```bash
//! # Check the configured mods folder
//! cargo run --bin modshim-loader
//!
//! # Check another folder and print the report as JSON
//! cargo run --bin modshim-loader -- /path/to/Mods --json
//!
//! # With debug logging
//! RUST_LOG=debug cargo run --bin modshim-loader
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use modshim_loader::config::Config;
use modshim_loader::host::LoggingHost;
use modshim_loader::pipeline::LoadPipeline;
use modshim_runtime::discover_mods;

#[derive(Parser, Debug)]
#[command(name = "modshim-loader", version)]
#[command(about = "Check a mods folder against the host's compatibility data and load it")]
struct Cli {
    /// Mods folder to load; defaults to the configured folder
    mods_dir: Option<PathBuf>,

    /// Print the load report as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load_default();

    // Initialize logging; RUST_LOG wins over the configured level
    let level = config
        .as_ref()
        .map(|c| c.loader.log_level.clone())
        .unwrap_or_else(|_| "info".to_string());
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_target(true)
        .init();

    info!("Starting modshim-loader v{}", env!("CARGO_PKG_VERSION"));

    let config = match config {
        Ok(cfg) => {
            info!("Loaded configuration from default path");
            cfg
        }
        Err(e) => {
            info!("Failed to load config, using defaults: {:#}", e);
            Config::default()
        }
    };

    let mods_dir = match cli.mods_dir {
        Some(dir) => dir,
        None => config.mods_dir()?,
    };
    info!("Scanning mods in: {}", mods_dir.display());

    let data = Arc::new(config.load_compat_data()?);
    let discovered = discover_mods(&mods_dir)
        .with_context(|| format!("Failed to read mods folder: {}", mods_dir.display()))?;

    let pipeline = LoadPipeline::new(
        data,
        Arc::new(LoggingHost::new()),
        config.pipeline_options(),
    );

    let cancel = pipeline.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Cancelling after the current mod...");
            cancel.cancel();
        }
    });

    let report = pipeline.run(discovered).await;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for line in report.lines() {
            println!("{}", line);
        }
    }

    Ok(())
}
