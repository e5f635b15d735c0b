//! Error types for compatibility data and rewriting.

use crate::scanner::Location;
use modshim_runtime::{RuntimeError, Symbol};
use thiserror::Error;

/// Errors raised while loading compatibility data.
#[derive(Error, Debug)]
pub enum CompatError {
    /// A rule entry is malformed.
    #[error("Invalid rule for '{symbol}': {reason}")]
    InvalidRule { symbol: String, reason: String },

    /// The same symbol has more than one rule.
    #[error("Duplicate rule for '{0}'")]
    DuplicateRule(Symbol),

    /// A facade definition can't produce the shape it claims.
    #[error("Invalid facade '{id}': {reason}")]
    InvalidFacade { id: String, reason: String },

    /// Two facades share an id.
    #[error("Duplicate facade '{0}'")]
    DuplicateFacade(String),

    /// A mod data record is malformed.
    #[error("Invalid mod data record '{id}': {reason}")]
    InvalidModData { id: String, reason: String },

    /// Runtime-level error (symbols, versions).
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result type for compatibility data operations.
pub type CompatResult<T> = std::result::Result<T, CompatError>;

/// Reasons a binary could not be rewritten. Any of these fails the whole binary.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RewriteError {
    /// The binary has fatal references and must not be rewritten.
    #[error("binary has fatal references and can't be rewritten")]
    NotRewritable,

    /// A verdict names a facade the registry doesn't hold.
    #[error("facade '{0}' is not registered")]
    UnknownFacade(String),

    /// A verdict points outside the binary.
    #[error("location {0} is outside the binary")]
    LocationOutOfRange(Location),

    /// The symbol at a location isn't the one the verdict was made for.
    #[error("expected '{expected}' at {location}, found '{found}'")]
    SymbolMismatch {
        location: Location,
        expected: Symbol,
        found: String,
    },

    /// A replacement doesn't fit the call site.
    #[error("can't rewrite {location}: {reason}")]
    ShapeMismatch { location: Location, reason: String },

    /// The rewritten output failed structural validation.
    #[error("rewritten binary is invalid: {0}")]
    InvalidOutput(String),
}
