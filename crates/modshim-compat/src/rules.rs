//! The symbol rule table.
//!
//! The table is a deny/rewrite list keyed by exact host symbol. Symbols it
//! doesn't mention are assumed stable. Rules are data shipped per host
//! version in a `rules.toml` file:
//!
//! ```toml
//! [[rule]]
//! symbol = "StardewValley.Crop::newDay(int, int, int, int, StardewValley.GameLocation) -> void"
//! disposition = "rewrite"
//! facade = "crop-new-day"
//!
//! [[rule]]
//! symbol = "StardewValley.Farmer::getToolPower() -> int"
//! disposition = "forbidden"
//! reason = "removed_in_1_6"
//!
//! [[flag]]
//! owner_prefix = "System.IO"
//! warning = "accesses_filesystem"
//! ```

use crate::error::{CompatError, CompatResult};
use modshim_runtime::{ModWarning, Symbol, SymbolKind};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Where a rewrite sends a reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteTarget {
    /// A facade registered under this id.
    Facade(String),
    /// A direct replacement symbol of the same kind.
    Symbol(Symbol),
}

/// What to do with references to a symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Allowed,
    RewriteTo(RewriteTarget),
    Forbidden { reason: String },
}

/// One entry of the rule table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolRule {
    pub symbol: Symbol,
    pub disposition: Disposition,
    /// For type rules: also apply to members of the type that have no rule of their own.
    pub include_members: bool,
    /// Warnings raised whenever the symbol is referenced.
    pub warnings: Vec<ModWarning>,
}

impl SymbolRule {
    pub fn allowed(symbol: Symbol) -> Self {
        Self::with_disposition(symbol, Disposition::Allowed)
    }

    pub fn forbidden(symbol: Symbol, reason: impl Into<String>) -> Self {
        Self::with_disposition(
            symbol,
            Disposition::Forbidden {
                reason: reason.into(),
            },
        )
    }

    pub fn rewrite_to_facade(symbol: Symbol, facade: impl Into<String>) -> Self {
        Self::with_disposition(
            symbol,
            Disposition::RewriteTo(RewriteTarget::Facade(facade.into())),
        )
    }

    pub fn rewrite_to_symbol(symbol: Symbol, replacement: Symbol) -> Self {
        Self::with_disposition(
            symbol,
            Disposition::RewriteTo(RewriteTarget::Symbol(replacement)),
        )
    }

    fn with_disposition(symbol: Symbol, disposition: Disposition) -> Self {
        Self {
            symbol,
            disposition,
            include_members: false,
            warnings: Vec::new(),
        }
    }

    /// Apply this type rule to the type's members too.
    pub fn including_members(mut self) -> Self {
        self.include_members = true;
        self
    }

    /// Raise a warning whenever the symbol is referenced.
    pub fn with_warning(mut self, warning: ModWarning) -> Self {
        self.warnings.push(warning);
        self
    }
}

/// A warning raised for every reference whose owner starts with a prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixFlag {
    pub owner_prefix: String,
    pub warning: ModWarning,
}

impl PrefixFlag {
    fn matches(&self, owner: &str) -> bool {
        owner == self.owner_prefix
            || owner
                .strip_prefix(self.owner_prefix.as_str())
                .is_some_and(|rest| rest.starts_with('.'))
    }
}

/// Rules keyed by exact symbol, plus owner-prefix warning flags.
#[derive(Debug, Clone, Default)]
pub struct SymbolRuleTable {
    rules: HashMap<Symbol, SymbolRule>,
    flags: Vec<PrefixFlag>,
}

#[derive(Debug, Deserialize)]
struct RulesFile {
    #[serde(default, rename = "rule")]
    rules: Vec<RawRule>,
    #[serde(default, rename = "flag")]
    flags: Vec<RawFlag>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum RawDisposition {
    Allowed,
    Forbidden,
    Rewrite,
}

#[derive(Debug, Deserialize)]
struct RawRule {
    symbol: Symbol,
    disposition: RawDisposition,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    facade: Option<String>,
    #[serde(default)]
    replacement: Option<Symbol>,
    #[serde(default)]
    include_members: bool,
    #[serde(default)]
    warnings: Vec<ModWarning>,
}

#[derive(Debug, Deserialize)]
struct RawFlag {
    owner_prefix: String,
    warning: ModWarning,
}

impl RawRule {
    fn into_rule(self) -> CompatResult<SymbolRule> {
        let invalid = |reason: &str| CompatError::InvalidRule {
            symbol: self.symbol.to_string(),
            reason: reason.to_string(),
        };

        let disposition = match self.disposition {
            RawDisposition::Allowed => Disposition::Allowed,
            RawDisposition::Forbidden => match &self.reason {
                Some(reason) if !reason.trim().is_empty() => Disposition::Forbidden {
                    reason: reason.clone(),
                },
                _ => return Err(invalid("forbidden rules need a reason")),
            },
            RawDisposition::Rewrite => match (&self.facade, &self.replacement) {
                (Some(facade), None) => {
                    Disposition::RewriteTo(RewriteTarget::Facade(facade.clone()))
                }
                (None, Some(replacement)) => {
                    Disposition::RewriteTo(RewriteTarget::Symbol(replacement.clone()))
                }
                _ => {
                    return Err(invalid(
                        "rewrite rules need exactly one of 'facade' or 'replacement'",
                    ))
                }
            },
        };

        if self.include_members && self.symbol.kind() != SymbolKind::Type {
            return Err(invalid("include_members only applies to type rules"));
        }

        Ok(SymbolRule {
            symbol: self.symbol,
            disposition,
            include_members: self.include_members,
            warnings: self.warnings,
        })
    }
}

impl SymbolRuleTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a table from a TOML file.
    pub fn from_file(path: &Path) -> CompatResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse a table from TOML.
    pub fn from_toml_str(content: &str) -> CompatResult<Self> {
        let file: RulesFile = toml::from_str(content)?;
        let mut table = Self::new();
        for raw in file.rules {
            table.insert(raw.into_rule()?)?;
        }
        for flag in file.flags {
            table.add_flag(flag.owner_prefix, flag.warning);
        }
        Ok(table)
    }

    /// Add a rule. Each symbol may have at most one rule.
    pub fn insert(&mut self, rule: SymbolRule) -> CompatResult<()> {
        if self.rules.contains_key(&rule.symbol) {
            return Err(CompatError::DuplicateRule(rule.symbol));
        }
        self.rules.insert(rule.symbol.clone(), rule);
        Ok(())
    }

    /// Add an owner-prefix warning flag.
    pub fn add_flag(&mut self, owner_prefix: impl Into<String>, warning: ModWarning) {
        self.flags.push(PrefixFlag {
            owner_prefix: owner_prefix.into(),
            warning,
        });
    }

    /// The rule for exactly this symbol.
    pub fn get(&self, symbol: &Symbol) -> Option<&SymbolRule> {
        self.rules.get(symbol)
    }

    /// The type rule covering a member that has no rule of its own.
    pub fn owner_rule(&self, symbol: &Symbol) -> Option<&SymbolRule> {
        if symbol.kind() == SymbolKind::Type {
            return None;
        }
        self.rules
            .get(&symbol.owner_type())
            .filter(|rule| rule.include_members)
    }

    /// Warnings from prefix flags that apply to a symbol's owner.
    pub fn flags_for<'a>(&'a self, symbol: &'a Symbol) -> impl Iterator<Item = ModWarning> + 'a {
        self.flags
            .iter()
            .filter(move |flag| flag.matches(&symbol.owner))
            .map(|flag| flag.warning)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
