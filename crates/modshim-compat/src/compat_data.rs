//! The compatibility data snapshot used for one load run.

use crate::error::CompatResult;
use crate::facade::FacadeRegistry;
use crate::mod_data::ModDataList;
use crate::rules::SymbolRuleTable;
use std::path::Path;
use tracing::info;

/// Rule table, facade registry, and mod data, loaded once and shared read-only.
#[derive(Debug, Clone, Default)]
pub struct CompatData {
    pub rules: SymbolRuleTable,
    pub facades: FacadeRegistry,
    pub mod_data: ModDataList,
}

impl CompatData {
    /// Bundle already-built data.
    pub fn new(rules: SymbolRuleTable, facades: FacadeRegistry, mod_data: ModDataList) -> Self {
        Self {
            rules,
            facades,
            mod_data,
        }
    }

    /// Data that allows everything.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load whichever data files are given. Missing paths mean empty data.
    pub fn load(
        rules: Option<&Path>,
        facades: Option<&Path>,
        mod_data: Option<&Path>,
    ) -> CompatResult<Self> {
        let data = Self {
            rules: rules
                .map(SymbolRuleTable::from_file)
                .transpose()?
                .unwrap_or_default(),
            facades: facades
                .map(FacadeRegistry::from_file)
                .transpose()?
                .unwrap_or_default(),
            mod_data: mod_data
                .map(ModDataList::from_file)
                .transpose()?
                .unwrap_or_default(),
        };

        info!(
            "Loaded compatibility data: {} rule(s), {} facade(s), {} mod record(s)",
            data.rules.len(),
            data.facades.len(),
            data.mod_data.len()
        );
        Ok(data)
    }
}
