//! The plugin host seam.
//!
//! The pipeline hands every plugin that passed inspection to a [`PluginHost`].
//! Activation is the only step after rewriting that can still fail a plugin.

use crate::outcome::LoadedPlugin;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;

/// Activation failure reported by a host.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    #[error("Entry point failed: {0}")]
    EntryPoint(String),

    #[error("Host rejected plugin: {0}")]
    Rejected(String),
}

/// Receives plugins in load order.
#[async_trait]
pub trait PluginHost: Send + Sync {
    /// Activate one plugin. Its dependencies have already been activated.
    async fn activate(&self, plugin: &LoadedPlugin) -> Result<(), HostError>;
}

/// Host that only records and logs activations.
///
/// Used by the standalone loader binary, which checks a mods folder without
/// a running game to hand the plugins to.
#[derive(Debug, Default)]
pub struct LoggingHost {
    activated: RwLock<Vec<String>>,
}

impl LoggingHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids activated so far, in order.
    pub async fn activated(&self) -> Vec<String> {
        self.activated.read().await.clone()
    }
}

#[async_trait]
impl PluginHost for LoggingHost {
    async fn activate(&self, plugin: &LoadedPlugin) -> Result<(), HostError> {
        info!(
            "Activating {} {} (entry point '{}')",
            plugin.id, plugin.version, plugin.binary.entry_point
        );
        self.activated.write().await.push(plugin.id.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modshim_runtime::binary::BinaryMetadata;
    use modshim_runtime::{PluginBinary, Version, WarningSet};
    use std::sync::Arc;

    fn plugin(id: &str) -> LoadedPlugin {
        LoadedPlugin {
            id: id.to_string(),
            name: id.to_string(),
            version: Version::new(1, 0, 0),
            binary: Arc::new(PluginBinary {
                version: 1,
                metadata: BinaryMetadata {
                    plugin_id: id.to_string(),
                    plugin_version: "1.0.0".to_string(),
                    host_version: None,
                    compiler_version: None,
                },
                constants: Vec::new(),
                types: Vec::new(),
                functions: Vec::new(),
                entry_point: "main".to_string(),
            }),
            rewritten: false,
            warnings: WarningSet::new(),
            source: None,
        }
    }

    #[tokio::test]
    async fn test_logging_host_records_order() {
        let host = LoggingHost::new();
        host.activate(&plugin("B")).await.unwrap();
        host.activate(&plugin("A")).await.unwrap();
        assert_eq!(host.activated().await, vec!["B", "A"]);
    }

    #[test]
    fn test_host_error_display() {
        let err = HostError::EntryPoint("threw on init".to_string());
        assert_eq!(err.to_string(), "Entry point failed: threw on init");
    }
}
