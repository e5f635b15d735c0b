//! # modshim-compat
//!
//! The mod compatibility engine.
//!
//! This crate provides:
//! - Dependency resolution and load ordering ([`resolve`])
//! - Scanning a mod binary for host symbol references ([`scan`])
//! - Classifying references against the symbol rule table ([`classify`])
//! - Rewriting relocated references, including facade call sites ([`rewrite`])
//!
//! ## Compatibility Data
//!
//! Nothing about a particular host version is built in. The engine reads:
//! - `rules.toml` - symbols that are forbidden or must be rewritten
//! - `facades.toml` - forwarding adapters for retired call shapes
//! - `mods.toml` - mods known to be obsolete or broken
//!
//! Scanning, classification, and rewriting keep no state between calls.

pub mod classifier;
pub mod compat_data;
pub mod error;
pub mod facade;
pub mod mod_data;
pub mod resolver;
pub mod rewriter;
pub mod rules;
pub mod scanner;

pub use classifier::{
    classify, AggregateVerdict, Classification, ClassifiedReference, FatalCause, Verdict,
};
pub use compat_data::CompatData;
pub use error::{CompatError, CompatResult, RewriteError};
pub use facade::{ArgSource, CallShape, FacadeDefinition, FacadeRegistry, FieldInit};
pub use mod_data::{ModDataList, ModDataRecord, ModStatus};
pub use resolver::{resolve, Exclusion, Resolution};
pub use rewriter::{rewrite, RewriteOutput, RewriteWarning};
pub use rules::{Disposition, RewriteTarget, SymbolRule, SymbolRuleTable};
pub use scanner::{scan, scan_bytes, Location, SymbolReference};
