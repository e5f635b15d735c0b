//! Mods known to be obsolete or broken, independent of code analysis.
//!
//! ```toml
//! [[mod]]
//! id = "Pathoschild.NoDebugMode"
//! status = "obsolete"
//! reason = "debug mode was removed from the host"
//!
//! [[mod]]
//! id = "Example.OldFarmExpansion"
//! status = "assume_broken"
//! up_to_version = "1.2.0"
//! reason = "corrupts saves"
//! ```

use crate::error::{CompatError, CompatResult};
use modshim_runtime::{normalize_id, FailReason, PluginManifest, Version};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// How a listed mod is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModStatus {
    /// The mod's functionality is now part of the host.
    Obsolete,
    /// The mod is known not to work.
    AssumeBroken,
}

impl ModStatus {
    /// The failure a mod with this status gets.
    pub fn fail_reason(self) -> FailReason {
        match self {
            ModStatus::Obsolete => FailReason::Obsolete,
            ModStatus::AssumeBroken => FailReason::Incompatible,
        }
    }
}

/// One mod data record.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ModDataRecord {
    pub id: String,
    pub status: ModStatus,
    /// The newest affected version; later versions aren't affected.
    #[serde(default)]
    pub up_to_version: Option<Version>,
    pub reason: String,
}

impl ModDataRecord {
    /// Whether the record applies to this manifest version.
    pub fn applies_to(&self, version: &Version) -> bool {
        match &self.up_to_version {
            Some(limit) => version <= limit,
            None => true,
        }
    }
}

/// Mod data records keyed by normalized id.
#[derive(Debug, Clone, Default)]
pub struct ModDataList {
    records: HashMap<String, ModDataRecord>,
}

#[derive(Debug, Deserialize)]
struct ModDataFile {
    #[serde(default, rename = "mod")]
    mods: Vec<ModDataRecord>,
}

impl ModDataList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load records from a TOML file.
    pub fn from_file(path: &Path) -> CompatResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse records from TOML.
    pub fn from_toml_str(content: &str) -> CompatResult<Self> {
        let file: ModDataFile = toml::from_str(content)?;
        let mut list = Self::new();
        for record in file.mods {
            list.insert(record)?;
        }
        Ok(list)
    }

    /// Add a record. Each id may be listed once.
    pub fn insert(&mut self, record: ModDataRecord) -> CompatResult<()> {
        let invalid = |reason: &str| CompatError::InvalidModData {
            id: record.id.clone(),
            reason: reason.to_string(),
        };
        if record.id.trim().is_empty() {
            return Err(invalid("id is empty"));
        }
        if record.reason.trim().is_empty() {
            return Err(invalid("reason is empty"));
        }
        let key = normalize_id(&record.id);
        if self.records.contains_key(&key) {
            return Err(invalid("listed more than once"));
        }
        self.records.insert(key, record);
        Ok(())
    }

    /// The record that applies to a manifest, if any.
    pub fn lookup(&self, manifest: &PluginManifest) -> Option<&ModDataRecord> {
        self.records
            .get(&manifest.key())
            .filter(|record| record.applies_to(manifest.version()))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
