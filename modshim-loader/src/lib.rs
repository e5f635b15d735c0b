//! modshim loader library
//!
//! The load pipeline and its supporting types, exported for the binary and
//! for integration tests.

pub mod config;
pub mod host;
pub mod outcome;
pub mod pipeline;
pub mod source;
pub mod state;

pub use config::Config;
pub use host::{HostError, LoggingHost, PluginHost};
pub use outcome::{Diagnostic, DiagnosticKind, LoadOutcome, LoadReport, LoadedPlugin, PluginReport};
pub use pipeline::{CancelHandle, LoadPipeline, PipelineOptions};
pub use source::{BinaryHandle, Candidate, FileBinary, MemoryBinary};
pub use state::{InvalidTransition, LoadState, StateTrail};
