//! Mod manifest parsing.
//!
//! Each mod folder has a `manifest.toml` file that describes its identity,
//! version, dependencies, and the mods it refuses to run alongside.

use crate::error::{RuntimeError, RuntimeResult};
use crate::version::Version;
use crate::warning::{ModWarning, WarningSet};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Default entry point file name inside a mod folder.
pub const DEFAULT_ENTRY_POINT: &str = "mod.mbc";

/// Mod manifest structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManifest {
    /// Mod identity and metadata.
    pub plugin: PluginMetadata,

    /// Ordered dependency constraints.
    #[serde(default, rename = "dependency")]
    pub dependencies: Vec<DependencyConstraint>,

    /// Ids of mods this mod declares itself incompatible with.
    #[serde(default)]
    pub incompatible_with: Vec<String>,
}

/// Mod metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginMetadata {
    /// Unique identifier for the mod, compared case-insensitively.
    pub id: String,

    /// Human-readable name.
    pub name: String,

    /// Declared version.
    pub version: Version,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub authors: Vec<String>,

    /// Binary file name inside the mod folder (defaults to `mod.mbc`).
    #[serde(default)]
    pub entry_point: Option<String>,

    /// Update-check keys, e.g. `Nexus:1915`.
    #[serde(default)]
    pub update_keys: Vec<String>,
}

/// A dependency on another mod.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyConstraint {
    /// The id of the mod depended on.
    pub id: String,

    /// Minimum acceptable version, if any.
    #[serde(default)]
    pub min_version: Option<Version>,

    /// Whether the dependency must be present.
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

impl DependencyConstraint {
    /// A required dependency.
    pub fn required(id: impl Into<String>, min_version: Option<Version>) -> Self {
        Self {
            id: id.into(),
            min_version,
            required: true,
        }
    }

    /// An optional dependency.
    pub fn optional(id: impl Into<String>, min_version: Option<Version>) -> Self {
        Self {
            id: id.into(),
            min_version,
            required: false,
        }
    }

    /// Normalized lookup key for the dependency id.
    pub fn key(&self) -> String {
        normalize_id(&self.id)
    }
}

/// Normalize a mod id for comparisons.
pub fn normalize_id(id: &str) -> String {
    id.trim().to_lowercase()
}

impl PluginManifest {
    /// Create a manifest with no dependencies.
    pub fn new(id: impl Into<String>, name: impl Into<String>, version: Version) -> Self {
        Self {
            plugin: PluginMetadata {
                id: id.into(),
                name: name.into(),
                version,
                description: None,
                authors: Vec::new(),
                entry_point: None,
                update_keys: Vec::new(),
            },
            dependencies: Vec::new(),
            incompatible_with: Vec::new(),
        }
    }

    /// Add a dependency constraint.
    pub fn with_dependency(mut self, dependency: DependencyConstraint) -> Self {
        self.dependencies.push(dependency);
        self
    }

    /// Declare another mod incompatible with this one.
    pub fn with_incompatibility(mut self, id: impl Into<String>) -> Self {
        self.incompatible_with.push(id.into());
        self
    }

    /// Load a manifest from a TOML file.
    pub fn from_file(path: &Path) -> RuntimeResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse a manifest from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> RuntimeResult<Self> {
        let manifest: PluginManifest = toml::from_str(content)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Validate the manifest.
    pub fn validate(&self) -> RuntimeResult<()> {
        let id = self.plugin.id.trim();
        if id.is_empty() {
            return Err(RuntimeError::InvalidManifest(
                "Mod ID cannot be empty".to_string(),
            ));
        }

        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        {
            return Err(RuntimeError::InvalidManifest(format!(
                "Mod ID '{}' contains invalid characters",
                id
            )));
        }

        if self.plugin.name.trim().is_empty() {
            return Err(RuntimeError::InvalidManifest(
                "Mod name cannot be empty".to_string(),
            ));
        }

        let own_key = self.key();
        let mut seen = HashSet::new();
        for dependency in &self.dependencies {
            let key = dependency.key();
            if key.is_empty() {
                return Err(RuntimeError::InvalidManifest(
                    "Dependency ID cannot be empty".to_string(),
                ));
            }
            if key == own_key {
                return Err(RuntimeError::InvalidManifest(format!(
                    "Mod '{}' cannot depend on itself",
                    id
                )));
            }
            if !seen.insert(key) {
                return Err(RuntimeError::InvalidManifest(format!(
                    "Dependency '{}' is listed more than once",
                    dependency.id
                )));
            }
        }

        if self
            .incompatible_with
            .iter()
            .any(|other| normalize_id(other) == own_key)
        {
            return Err(RuntimeError::InvalidManifest(format!(
                "Mod '{}' cannot be incompatible with itself",
                id
            )));
        }

        Ok(())
    }

    /// Get the mod ID.
    pub fn id(&self) -> &str {
        &self.plugin.id
    }

    /// Normalized lookup key for the mod id.
    pub fn key(&self) -> String {
        normalize_id(&self.plugin.id)
    }

    /// Get the declared version.
    pub fn version(&self) -> &Version {
        &self.plugin.version
    }

    /// Get the entry point file name.
    pub fn entry_point(&self) -> &str {
        self.plugin.entry_point.as_deref().unwrap_or(DEFAULT_ENTRY_POINT)
    }

    /// Warnings that can be read off the manifest alone.
    pub fn warnings(&self) -> WarningSet {
        let mut warnings = WarningSet::new();
        if self.plugin.update_keys.iter().all(|key| key.trim().is_empty()) {
            warnings.add(ModWarning::NoUpdateKeys);
        }
        warnings
    }
}
