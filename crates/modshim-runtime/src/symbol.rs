//! Host symbol identities.
//!
//! A [`Symbol`] names a host type, method, or field by its owning type plus
//! member signature. The text form is used by the compatibility data files
//! and by diagnostics:
//!
//! ```text
//! StardewValley.Crop                                      type
//! StardewValley.Game1::currentLocation: GameLocation      field
//! StardewValley.Crop::newDay(int) -> void                 method
//! StardewValley.Crop::.ctor(string, int, int) -> StardewValley.Crop
//! ```

use crate::error::{RuntimeError, RuntimeResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Name used for constructors.
pub const CONSTRUCTOR: &str = ".ctor";

/// Return type used when a method signature omits one.
pub const VOID: &str = "void";

/// The member part of a symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Member {
    /// The symbol is the type itself.
    Type,
    /// A field and its declared type.
    Field { name: String, ty: String },
    /// A method with its parameter and return types.
    Method {
        name: String,
        params: Vec<String>,
        returns: String,
    },
}

/// Kind of a symbol, without its identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolKind {
    Type,
    Field,
    Method,
}

/// A fully-qualified host symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol {
    /// Fully-qualified owning type (or the type itself for type symbols).
    pub owner: String,
    /// Member signature.
    pub member: Member,
}

impl Symbol {
    /// A type symbol.
    pub fn type_named(name: impl Into<String>) -> Self {
        Self {
            owner: name.into(),
            member: Member::Type,
        }
    }

    /// A field symbol.
    pub fn field(owner: impl Into<String>, name: impl Into<String>, ty: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            member: Member::Field {
                name: name.into(),
                ty: ty.into(),
            },
        }
    }

    /// A method symbol.
    pub fn method<I, S>(
        owner: impl Into<String>,
        name: impl Into<String>,
        params: I,
        returns: impl Into<String>,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            owner: owner.into(),
            member: Member::Method {
                name: name.into(),
                params: params.into_iter().map(Into::into).collect(),
                returns: returns.into(),
            },
        }
    }

    /// Parse the text form of a symbol.
    pub fn parse(text: &str) -> RuntimeResult<Self> {
        let fail = |reason: &str| RuntimeError::InvalidSymbol {
            text: text.to_string(),
            reason: reason.to_string(),
        };
        let text_trimmed = text.trim();

        let Some((owner, rest)) = text_trimmed.split_once("::") else {
            if !is_type_name(text_trimmed) {
                return Err(fail("not a type name"));
            }
            return Ok(Self::type_named(text_trimmed));
        };

        let owner = owner.trim();
        if !is_type_name(owner) {
            return Err(fail("owner is not a type name"));
        }

        if let Some(open) = rest.find('(') {
            let name = rest[..open].trim();
            let close = rest.rfind(')').ok_or_else(|| fail("unclosed parameter list"))?;
            if close < open {
                return Err(fail("unclosed parameter list"));
            }
            if name.is_empty() {
                return Err(fail("missing method name"));
            }
            let params = split_params(&rest[open + 1..close])
                .into_iter()
                .map(|param| {
                    if is_type_name(&param) {
                        Ok(param)
                    } else {
                        Err(fail("parameter is not a type name"))
                    }
                })
                .collect::<RuntimeResult<Vec<_>>>()?;

            let tail = rest[close + 1..].trim();
            let returns = if tail.is_empty() {
                VOID.to_string()
            } else {
                let ret = tail
                    .strip_prefix("->")
                    .ok_or_else(|| fail("expected '->' before return type"))?
                    .trim();
                if !is_type_name(ret) {
                    return Err(fail("return is not a type name"));
                }
                ret.to_string()
            };

            return Ok(Self::method(owner, name, params, returns));
        }

        if let Some((name, ty)) = rest.split_once(':') {
            let (name, ty) = (name.trim(), ty.trim());
            if name.is_empty() || !is_type_name(ty) {
                return Err(fail("malformed field signature"));
            }
            return Ok(Self::field(owner, name, ty));
        }

        Err(fail("member has no signature"))
    }

    /// The kind of symbol.
    pub fn kind(&self) -> SymbolKind {
        match self.member {
            Member::Type => SymbolKind::Type,
            Member::Field { .. } => SymbolKind::Field,
            Member::Method { .. } => SymbolKind::Method,
        }
    }

    /// The symbol of the owning type.
    pub fn owner_type(&self) -> Symbol {
        Symbol::type_named(self.owner.clone())
    }

    /// The same member moved to another owning type.
    pub fn with_owner(&self, owner: impl Into<String>) -> Symbol {
        Symbol {
            owner: owner.into(),
            member: self.member.clone(),
        }
    }

    /// Declared parameter count, for methods.
    pub fn arity(&self) -> Option<usize> {
        match &self.member {
            Member::Method { params, .. } => Some(params.len()),
            _ => None,
        }
    }

    /// Whether this symbol names a constructor.
    pub fn is_constructor(&self) -> bool {
        matches!(&self.member, Member::Method { name, .. } if name == CONSTRUCTOR)
    }

    /// Whether this is a method returning `void`.
    pub fn returns_void(&self) -> bool {
        matches!(&self.member, Member::Method { returns, .. } if returns == VOID)
    }
}

/// Split a parameter list on top-level commas, keeping generic arguments intact.
fn split_params(list: &str) -> Vec<String> {
    let mut params = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for c in list.chars() {
        match c {
            '<' | '[' => {
                depth += 1;
                current.push(c);
            }
            '>' | ']' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if depth == 0 => {
                params.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() || !params.is_empty() {
        params.push(current.trim().to_string());
    }
    params
}

fn is_type_name(name: &str) -> bool {
    !name.is_empty()
        && !name.contains("::")
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '.' | '_' | '`' | '<' | '>' | '[' | ']' | ',' | ' ' | '/' | '+' | '&' | '*'))
        && !name.starts_with(' ')
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.member {
            Member::Type => write!(f, "{}", self.owner),
            Member::Field { name, ty } => write!(f, "{}::{}: {}", self.owner, name, ty),
            Member::Method {
                name,
                params,
                returns,
            } => write!(
                f,
                "{}::{}({}) -> {}",
                self.owner,
                name,
                params.join(", "),
                returns
            ),
        }
    }
}

impl FromStr for Symbol {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Symbol {
    type Error = RuntimeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Symbol> for String {
    fn from(value: Symbol) -> Self {
        value.to_string()
    }
}
