//! Configuration file loading and management
//!
//! This module handles loading and parsing the loader configuration from
//! `$XDG_CONFIG_HOME/modshim/config.toml`. If the configuration file doesn't
//! exist, a default configuration is created with documented comments.

use crate::pipeline::PipelineOptions;
use anyhow::{Context, Result};
use modshim_compat::CompatData;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable that overrides the mods directory.
pub const MODS_DIR_ENV: &str = "MODSHIM_MODS_DIR";

/// Main loader configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Loader-specific configuration
    #[serde(default)]
    pub loader: LoaderConfig,
    /// Compatibility data files
    #[serde(default)]
    pub compat: CompatConfig,
}

/// Loader configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoaderConfig {
    /// Folder holding one sub-folder per mod
    /// If None, uses XDG_DATA_HOME/modshim/mods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mods_dir: Option<PathBuf>,
    /// Log level (trace, debug, info, warn, error)
    /// Default: "info"
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Number of mods inspected at once; 0 means one per available core
    /// Default: 0
    #[serde(default)]
    pub workers: usize,
    /// Where rewritten binaries are written for inspection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rewrite_cache_dir: Option<PathBuf>,
}

/// Compatibility data file locations
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CompatConfig {
    /// Symbol rule table (`rules.toml`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules: Option<PathBuf>,
    /// Facade definitions (`facades.toml`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facades: Option<PathBuf>,
    /// Obsolete and broken mod records (`mods.toml`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mods: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            mods_dir: None,
            log_level: default_log_level(),
            workers: 0,
            rewrite_cache_dir: None,
        }
    }
}

impl Config {
    /// Load configuration from the specified path
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the default XDG config location
    ///
    /// If the configuration file doesn't exist, creates a default configuration
    /// file with documented comments.
    pub fn load_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if !config_path.exists() {
            Self::create_default_file(&config_path)?;
        }

        Self::load(&config_path)
    }

    /// Get the default configuration file path
    ///
    /// Returns `$XDG_CONFIG_HOME/modshim/config.toml`
    pub fn default_config_path() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("com", "raibid-labs", "modshim")
            .context("Failed to determine project directories")?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Create a default configuration file with documented comments
    pub fn create_default_file(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, Self::default_config_content())
            .with_context(|| format!("Failed to write default config file: {}", path.display()))?;

        tracing::info!("Created default configuration file at: {}", path.display());
        Ok(())
    }

    fn default_config_content() -> &'static str {
        r#"# modshim Loader Configuration
# This file configures how modshim-loader finds, checks and loads mods.

[loader]
# Folder holding one sub-folder per mod
# If not specified, defaults to $XDG_DATA_HOME/modshim/mods
# The MODSHIM_MODS_DIR environment variable overrides this setting
# mods_dir = "/path/to/mods"

# Log level: trace, debug, info, warn, error
# RUST_LOG takes precedence when set
# Default: "info"
log_level = "info"

# Number of mods inspected at once
# 0 uses one worker per available core
# Default: 0
workers = 0

# Write rewritten binaries here as <mod id>.mbc
# rewrite_cache_dir = "/path/to/rewritten"

[compat]
# Compatibility data for the installed host version.
# Missing entries mean an empty table: every symbol is allowed.

# Forbidden and relocated host symbols
# rules = "/path/to/rules.toml"

# Forwarding adapters for retired call shapes
# facades = "/path/to/facades.toml"

# Mods known to be obsolete or broken
# mods = "/path/to/mods.toml"
"#
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.loader.log_level.as_str()) {
            anyhow::bail!(
                "Invalid log_level: {}. Must be one of: {}",
                self.loader.log_level,
                valid_log_levels.join(", ")
            );
        }

        if let Some(dir) = &self.loader.mods_dir {
            if dir.as_os_str().is_empty() {
                anyhow::bail!("loader.mods_dir must not be empty");
            }
        }

        if let Some(dir) = &self.loader.rewrite_cache_dir {
            if dir.as_os_str().is_empty() {
                anyhow::bail!("loader.rewrite_cache_dir must not be empty");
            }
        }

        Ok(())
    }

    /// Get the mods directory
    ///
    /// `MODSHIM_MODS_DIR` wins over the configured path, which wins over the
    /// default XDG data directory path.
    pub fn mods_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = std::env::var_os(MODS_DIR_ENV).filter(|v| !v.is_empty()) {
            return Ok(PathBuf::from(dir));
        }
        if let Some(ref dir) = self.loader.mods_dir {
            return Ok(dir.clone());
        }

        modshim_runtime::discovery::default_mods_dir()
            .context("Failed to determine project directories")
    }

    /// Number of inspection workers to run
    pub fn worker_count(&self) -> usize {
        if self.loader.workers > 0 {
            return self.loader.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    /// Pipeline options derived from this configuration
    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            workers: self.worker_count(),
            rewrite_cache_dir: self.loader.rewrite_cache_dir.clone(),
        }
    }

    /// Load the compatibility data files named in `[compat]`
    pub fn load_compat_data(&self) -> Result<CompatData> {
        CompatData::load(
            self.compat.rules.as_deref(),
            self.compat.facades.as_deref(),
            self.compat.mods.as_deref(),
        )
        .context("Failed to load compatibility data")
    }
}
