//! # modshim-runtime
//!
//! The mod-side data model for modshim.
//!
//! This crate provides:
//! - Mod discovery from a mods folder
//! - Mod manifest parsing and semantic versions
//! - Host symbol identities
//! - The compiled mod binary format, loading, and structural validation
//! - The closed set of reasons a mod can fail to load
//!
//! ## Mod Structure
//!
//! Mods are directories containing:
//! - `manifest.toml` - Mod identity, version, dependencies
//! - `mod.mbc` - Compiled mod binary (or the file named by `entry_point`)

pub mod binary;
pub mod discovery;
pub mod error;
pub mod fail_reason;
pub mod manifest;
pub mod symbol;
pub mod version;
pub mod warning;

pub use binary::{BinaryLoader, Instruction, PluginBinary, SiteKind};
pub use discovery::{discover_mod, discover_mods, DiscoveredMod, ModFolder, RejectedFolder};
pub use error::{RuntimeError, RuntimeResult};
pub use fail_reason::FailReason;
pub use manifest::{normalize_id, DependencyConstraint, PluginManifest, PluginMetadata};
pub use symbol::{Member, Symbol, SymbolKind};
pub use version::Version;
pub use warning::{ModWarning, WarningSet};
