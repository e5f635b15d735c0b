//! Why a mod could not be loaded.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Indicates why a mod could not be loaded. Every failed mod gets exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailReason {
    /// The mod folder name starts with a dot.
    DisabledByConvention,

    /// Multiple copies of the mod are installed.
    Duplicate,

    /// The folder is empty or contains only ignored files.
    EmptyOrIgnoredContent,

    /// The mod references fatally incompatible host symbols, or is marked broken.
    Incompatible,

    /// The mod's manifest is missing or invalid.
    InvalidManifest,

    /// The mod passed classification but rewriting or activation failed.
    LoadFailed,

    /// Required mods are missing, failed, too old, or form a dependency cycle.
    MissingDependencies,

    /// The mod is marked obsolete in the mod data list.
    Obsolete,

    /// The binary is unreadable, or the folder holds a format that can't be loaded.
    UnsupportedFormat,
}

impl FailReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailReason::DisabledByConvention => "disabled_by_convention",
            FailReason::Duplicate => "duplicate",
            FailReason::EmptyOrIgnoredContent => "empty_or_ignored_content",
            FailReason::Incompatible => "incompatible",
            FailReason::InvalidManifest => "invalid_manifest",
            FailReason::LoadFailed => "load_failed",
            FailReason::MissingDependencies => "missing_dependencies",
            FailReason::Obsolete => "obsolete",
            FailReason::UnsupportedFormat => "unsupported_format",
        }
    }
}

impl fmt::Display for FailReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
