//! Instruction scanner.
//!
//! Walks a mod binary and lists every reference to a host symbol in source
//! order: base types first, then each function's signature followed by its
//! instructions. A member operand is followed by the host types named inside
//! it (owner, parameter, return and field types). Scanning never modifies the
//! binary.

use modshim_runtime::binary::{Function, PluginBinary};
use modshim_runtime::{BinaryLoader, Member, RuntimeResult, SiteKind, Symbol};
use std::fmt;

/// Type names that are part of the instruction set rather than the host API.
pub const BUILTIN_TYPES: &[&str] = &[
    "void", "bool", "int", "long", "float", "double", "string", "object",
];

/// Where in a binary a reference occurs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Location {
    /// The base type of one of the mod's own types.
    BaseType { type_index: usize },
    /// A parameter type of a mod function.
    Parameter { function: usize, index: usize },
    /// The return type of a mod function.
    ReturnType { function: usize },
    /// An instruction operand.
    Instruction { function: usize, index: usize },
    /// A type named inside the member operand of an instruction.
    MemberType { function: usize, index: usize },
}

impl Location {
    /// Whether the reference is in a declaration rather than code.
    pub fn is_declaration(&self) -> bool {
        !matches!(
            self,
            Location::Instruction { .. } | Location::MemberType { .. }
        )
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::BaseType { type_index } => write!(f, "base type of type #{}", type_index),
            Location::Parameter { function, index } => {
                write!(f, "parameter {} of function #{}", index, function)
            }
            Location::ReturnType { function } => write!(f, "return type of function #{}", function),
            Location::Instruction { function, index } => {
                write!(f, "instruction {} of function #{}", index, function)
            }
            Location::MemberType { function, index } => {
                write!(f, "operand signature of instruction {} of function #{}", index, function)
            }
        }
    }
}

/// A located use of a host symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolReference {
    pub location: Location,
    pub symbol: Symbol,
    /// How an instruction uses the symbol; `None` for declarations.
    pub site: Option<SiteKind>,
}

/// Strip array suffixes from a type name: `Host.Item[][]` becomes `Host.Item`.
pub fn element_type(name: &str) -> &str {
    let mut name = name.trim();
    while let Some(stripped) = name.strip_suffix("[]") {
        name = stripped.trim_end();
    }
    name
}

fn is_builtin(name: &str) -> bool {
    BUILTIN_TYPES.contains(&name)
}

/// Whether a symbol belongs to the host.
pub fn is_host_symbol(binary: &PluginBinary, symbol: &Symbol) -> bool {
    let owner = element_type(&symbol.owner);
    !is_builtin(owner) && !binary.defines_type(owner)
}

/// Type names a member symbol mentions, owner first, without duplicates.
pub fn member_types(symbol: &Symbol) -> Vec<&str> {
    let mut types = vec![element_type(&symbol.owner)];
    match &symbol.member {
        Member::Type => return Vec::new(),
        Member::Field { ty, .. } => types.push(element_type(ty)),
        Member::Method {
            params, returns, ..
        } => {
            types.extend(params.iter().map(|p| element_type(p)));
            types.push(element_type(returns));
        }
    }
    let mut seen = Vec::with_capacity(types.len());
    types.retain(|ty| {
        if seen.contains(ty) {
            return false;
        }
        seen.push(*ty);
        true
    });
    types
}

/// List every host symbol reference in source order.
pub fn scan(binary: &PluginBinary) -> Vec<SymbolReference> {
    let mut references = Vec::new();

    let push_type = |location: Location, type_name: &str, references: &mut Vec<_>| {
        let name = element_type(type_name);
        if name.is_empty() || is_builtin(name) || binary.defines_type(name) {
            return;
        }
        references.push(SymbolReference {
            location,
            symbol: Symbol::type_named(name),
            site: None,
        });
    };

    for (type_index, ty) in binary.types.iter().enumerate() {
        if let Some(base) = &ty.base {
            push_type(Location::BaseType { type_index }, base, &mut references);
        }
    }

    for (function_index, function) in binary.functions.iter().enumerate() {
        scan_signature(function_index, function, &mut |location, name| {
            push_type(location, name, &mut references)
        });

        for (index, instruction) in function.instructions.iter().enumerate() {
            let Some((symbol, site)) = instruction.symbol() else {
                continue;
            };
            if is_host_symbol(binary, symbol) {
                references.push(SymbolReference {
                    location: Location::Instruction {
                        function: function_index,
                        index,
                    },
                    symbol: symbol.clone(),
                    site: Some(site),
                });
            }
            // Plugin-owned members can still name host types.
            for ty in member_types(symbol) {
                push_type(
                    Location::MemberType {
                        function: function_index,
                        index,
                    },
                    ty,
                    &mut references,
                );
            }
        }
    }

    references
}

fn scan_signature(function_index: usize, function: &Function, visit: &mut dyn FnMut(Location, &str)) {
    for (index, param) in function.params.iter().enumerate() {
        visit(
            Location::Parameter {
                function: function_index,
                index,
            },
            param,
        );
    }
    visit(
        Location::ReturnType {
            function: function_index,
        },
        &function.returns,
    );
}

/// Parse a binary and scan it. Unparseable input is an `Unreadable` error.
pub fn scan_bytes(bytes: &[u8]) -> RuntimeResult<(PluginBinary, Vec<SymbolReference>)> {
    let binary = BinaryLoader::parse(bytes)?;
    let references = scan(&binary);
    Ok((binary, references))
}
