//! Load outcomes and the per-run report.

use crate::state::StateTrail;
use chrono::{DateTime, Utc};
use modshim_runtime::{FailReason, PluginBinary, Version, WarningSet};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// A plugin that made it through the pipeline and was activated.
#[derive(Debug, Clone, Serialize)]
pub struct LoadedPlugin {
    pub id: String,
    pub name: String,
    pub version: Version,
    /// The final binary, rewritten when `rewritten` is set.
    #[serde(skip)]
    pub binary: Arc<PluginBinary>,
    pub rewritten: bool,
    /// Behaviour flags collected from the manifest and classification.
    pub warnings: WarningSet,
    /// Folder the plugin was discovered in, if it came from disk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
}

/// Final result for one plugin. Produced once and never changed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum LoadOutcome {
    Loaded(LoadedPlugin),
    Failed {
        reason: FailReason,
        detail: String,
        /// Offending host symbol for `Incompatible` failures.
        #[serde(skip_serializing_if = "Option::is_none")]
        symbol: Option<String>,
    },
}

impl LoadOutcome {
    pub fn failed(reason: FailReason, detail: impl Into<String>) -> Self {
        LoadOutcome::Failed {
            reason,
            detail: detail.into(),
            symbol: None,
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, LoadOutcome::Loaded(_))
    }

    pub fn fail_reason(&self) -> Option<FailReason> {
        match self {
            LoadOutcome::Loaded(_) => None,
            LoadOutcome::Failed { reason, .. } => Some(*reason),
        }
    }

    pub fn loaded(&self) -> Option<&LoadedPlugin> {
        match self {
            LoadOutcome::Loaded(plugin) => Some(plugin),
            LoadOutcome::Failed { .. } => None,
        }
    }
}

/// One plugin's outcome plus the states it passed through.
#[derive(Debug, Clone, Serialize)]
pub struct PluginReport {
    pub id: String,
    pub name: String,
    pub outcome: LoadOutcome,
    pub states: StateTrail,
}

impl fmt::Display for PluginReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            LoadOutcome::Loaded(plugin) => {
                write!(f, "Loaded {} {} ({})", plugin.name, plugin.version, plugin.id)?;
                if plugin.rewritten {
                    f.write_str(" [rewritten]")?;
                }
                if !plugin.warnings.is_empty() {
                    write!(f, " warnings: {}", plugin.warnings)?;
                }
                Ok(())
            }
            LoadOutcome::Failed {
                reason,
                detail,
                symbol,
            } => {
                write!(f, "Failed {} ({}): {}", self.name, self.id, reason)?;
                if let Some(symbol) = symbol {
                    write!(f, " [{}]", symbol)?;
                }
                if !detail.is_empty() {
                    write!(f, " - {}", detail)?;
                }
                Ok(())
            }
        }
    }
}

/// What a diagnostic line is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// A reference was rewritten.
    Rewrite,
    /// The plugin was excluded or failed.
    Exclusion,
}

/// One human-readable line for the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub plugin: String,
    pub kind: DiagnosticKind,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.plugin, self.message)
    }
}

/// Everything one pipeline run decided.
#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Resolved load order by plugin id.
    pub order: Vec<String>,
    /// Outcomes in processing order: rejected folders and exclusions first,
    /// then the resolved plugins in load order.
    pub plugins: Vec<PluginReport>,
    pub diagnostics: Vec<Diagnostic>,
    /// Plugins left unprocessed because the run was cancelled.
    pub skipped: Vec<String>,
    pub cancelled: bool,
}

impl LoadReport {
    pub fn get(&self, id: &str) -> Option<&PluginReport> {
        self.plugins
            .iter()
            .find(|p| p.id.eq_ignore_ascii_case(id))
    }

    pub fn loaded(&self) -> impl Iterator<Item = &LoadedPlugin> {
        self.plugins.iter().filter_map(|p| p.outcome.loaded())
    }

    pub fn failed(&self) -> impl Iterator<Item = &PluginReport> {
        self.plugins.iter().filter(|p| !p.outcome.is_loaded())
    }

    /// One line per plugin, then a summary.
    pub fn lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = self.plugins.iter().map(|p| p.to_string()).collect();
        lines.extend(self.skipped.iter().map(|id| format!("Skipped {} (cancelled)", id)));
        lines.push(self.summary());
        lines
    }

    pub fn summary(&self) -> String {
        let loaded = self.loaded().count();
        let failed = self.failed().count();
        let elapsed = self.finished_at - self.started_at;
        format!(
            "{} loaded, {} failed, {} skipped in {}ms{}",
            loaded,
            failed,
            self.skipped.len(),
            elapsed.num_milliseconds(),
            if self.cancelled { " (cancelled)" } else { "" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modshim_runtime::binary::BinaryMetadata;
    use modshim_runtime::ModWarning;

    fn empty_binary() -> PluginBinary {
        PluginBinary {
            version: 1,
            metadata: BinaryMetadata {
                plugin_id: "A".to_string(),
                plugin_version: "1.0.0".to_string(),
                host_version: None,
                compiler_version: None,
            },
            constants: Vec::new(),
            types: Vec::new(),
            functions: Vec::new(),
            entry_point: "main".to_string(),
        }
    }

    fn loaded(rewritten: bool) -> PluginReport {
        let mut warnings = WarningSet::new();
        warnings.add(ModWarning::AccessesFilesystem);
        PluginReport {
            id: "Pathos.Lookup".to_string(),
            name: "Lookup Anything".to_string(),
            outcome: LoadOutcome::Loaded(LoadedPlugin {
                id: "Pathos.Lookup".to_string(),
                name: "Lookup Anything".to_string(),
                version: Version::new(1, 2, 0),
                binary: Arc::new(empty_binary()),
                rewritten,
                warnings,
                source: None,
            }),
            states: StateTrail::new(),
        }
    }

    #[test]
    fn test_loaded_line() {
        let line = loaded(true).to_string();
        assert!(line.starts_with("Loaded Lookup Anything 1.2.0 (Pathos.Lookup)"));
        assert!(line.contains("[rewritten]"));
        assert!(line.contains("accesses_filesystem"));
    }

    #[test]
    fn test_incompatible_line_names_symbol() {
        let report = PluginReport {
            id: "Old.Mod".to_string(),
            name: "Old Mod".to_string(),
            outcome: LoadOutcome::Failed {
                reason: FailReason::Incompatible,
                detail: "removed_in_1_6".to_string(),
                symbol: Some("Host.Farmer::getToolPower() -> int".to_string()),
            },
            states: StateTrail::new(),
        };
        assert_eq!(
            report.to_string(),
            "Failed Old Mod (Old.Mod): incompatible [Host.Farmer::getToolPower() -> int] - removed_in_1_6"
        );
    }

    #[test]
    fn test_report_lookup_and_summary() {
        let now = Utc::now();
        let report = LoadReport {
            started_at: now,
            finished_at: now,
            order: vec!["Pathos.Lookup".to_string()],
            plugins: vec![
                loaded(false),
                PluginReport {
                    id: "B".to_string(),
                    name: "B".to_string(),
                    outcome: LoadOutcome::failed(FailReason::Duplicate, ""),
                    states: StateTrail::new(),
                },
            ],
            diagnostics: Vec::new(),
            skipped: vec!["C".to_string()],
            cancelled: true,
        };

        assert!(report.get("pathos.lookup").is_some());
        assert_eq!(report.loaded().count(), 1);
        assert_eq!(report.failed().count(), 1);

        let lines = report.lines();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[1], "Failed B (B): duplicate");
        assert_eq!(lines[2], "Skipped C (cancelled)");
        assert!(lines[3].starts_with("1 loaded, 1 failed, 1 skipped"));
        assert!(lines[3].ends_with("(cancelled)"));
    }

    #[test]
    fn test_outcome_serializes_without_binary() {
        let json = serde_json::to_value(&loaded(false).outcome).unwrap();
        assert_eq!(json["outcome"], "loaded");
        assert!(json.get("binary").is_none());
    }
}
