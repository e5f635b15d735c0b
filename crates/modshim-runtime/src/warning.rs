//! Non-fatal issues detected while loading a mod.
//!
//! Warnings never stop a mod from loading. They are collected from the
//! manifest and from flagged host symbols, and reported alongside the outcome.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A detected non-error mod issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModWarning {
    /// The mod affects the save serializer in a way that may make saves unloadable without it.
    ChangesSaveSerializer,

    /// The mod patches the host in a way that may impact stability.
    PatchesGame,

    /// The mod references unvalidated update tick events.
    UsesUnvalidatedUpdateTick,

    /// The manifest has no update keys.
    NoUpdateKeys,

    /// The mod reads or writes the console directly.
    AccessesConsole,

    /// The mod accesses the filesystem directly.
    AccessesFilesystem,

    /// The mod starts shell processes.
    AccessesShell,
}

impl ModWarning {
    /// Parse a warning from its snake_case name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "changes_save_serializer" => Some(ModWarning::ChangesSaveSerializer),
            "patches_game" => Some(ModWarning::PatchesGame),
            "uses_unvalidated_update_tick" => Some(ModWarning::UsesUnvalidatedUpdateTick),
            "no_update_keys" => Some(ModWarning::NoUpdateKeys),
            "accesses_console" => Some(ModWarning::AccessesConsole),
            "accesses_filesystem" => Some(ModWarning::AccessesFilesystem),
            "accesses_shell" => Some(ModWarning::AccessesShell),
            _ => None,
        }
    }

    /// Convert the warning to its snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ModWarning::ChangesSaveSerializer => "changes_save_serializer",
            ModWarning::PatchesGame => "patches_game",
            ModWarning::UsesUnvalidatedUpdateTick => "uses_unvalidated_update_tick",
            ModWarning::NoUpdateKeys => "no_update_keys",
            ModWarning::AccessesConsole => "accesses_console",
            ModWarning::AccessesFilesystem => "accesses_filesystem",
            ModWarning::AccessesShell => "accesses_shell",
        }
    }
}

impl fmt::Display for ModWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A set of warnings, iterated in a stable order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarningSet {
    warnings: BTreeSet<ModWarning>,
}

impl WarningSet {
    /// Create an empty warning set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a warning to the set.
    pub fn add(&mut self, warning: ModWarning) {
        self.warnings.insert(warning);
    }

    /// Add every warning from another set.
    pub fn extend_from(&mut self, other: &WarningSet) {
        self.warnings.extend(other.warnings.iter().copied());
    }

    /// Check if the set contains a warning.
    pub fn has(&self, warning: ModWarning) -> bool {
        self.warnings.contains(&warning)
    }

    pub fn iter(&self) -> impl Iterator<Item = ModWarning> + '_ {
        self.warnings.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.warnings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty()
    }
}

impl FromIterator<ModWarning> for WarningSet {
    fn from_iter<T: IntoIterator<Item = ModWarning>>(iter: T) -> Self {
        Self {
            warnings: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for WarningSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.warnings.iter().map(|w| w.as_str()).collect();
        f.write_str(&names.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trip() {
        for warning in [
            ModWarning::ChangesSaveSerializer,
            ModWarning::PatchesGame,
            ModWarning::UsesUnvalidatedUpdateTick,
            ModWarning::NoUpdateKeys,
            ModWarning::AccessesConsole,
            ModWarning::AccessesFilesystem,
            ModWarning::AccessesShell,
        ] {
            assert_eq!(ModWarning::parse(warning.as_str()), Some(warning));
        }
        assert_eq!(ModWarning::parse("teleports"), None);
    }

    #[test]
    fn test_set_is_ordered_and_deduplicated() {
        let set: WarningSet = [
            ModWarning::AccessesShell,
            ModWarning::PatchesGame,
            ModWarning::AccessesShell,
        ]
        .into_iter()
        .collect();
        assert_eq!(set.len(), 2);
        assert_eq!(set.to_string(), "patches_game, accesses_shell");
    }
}
