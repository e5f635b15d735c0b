//! Mod binary format and loader.
//!
//! A compiled mod (`.mbc`) is a stack-machine program that references host
//! types, methods, and fields by [`Symbol`].
//!
//! ## Format
//!
//! ```text
//! +----------------+
//! | Magic (4 bytes)|  "MBC\x01" (version 1)
//! +----------------+
//! | Header         |
//! +----------------+
//! | Constant Pool  |
//! +----------------+
//! | Types          |
//! +----------------+
//! | Functions      |
//! +----------------+
//! ```
//!
//! The body after the magic bytes is JSON. A body without the magic bytes is
//! accepted as the development form.

use crate::error::{RuntimeError, RuntimeResult};
use crate::symbol::{Symbol, VOID};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Magic bytes for mod binaries.
pub const MAGIC: &[u8; 4] = b"MBC\x01";

/// The only supported format version.
pub const FORMAT_VERSION: u8 = 1;

/// A compiled mod.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginBinary {
    /// Version of the binary format.
    pub version: u8,

    /// Metadata embedded in the binary.
    pub metadata: BinaryMetadata,

    /// Constant pool.
    #[serde(default)]
    pub constants: Vec<Constant>,

    /// Types defined by the mod itself.
    #[serde(default)]
    pub types: Vec<TypeDef>,

    /// Function definitions.
    pub functions: Vec<Function>,

    /// Entry point function name.
    pub entry_point: String,
}

/// Metadata embedded in a binary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryMetadata {
    /// Mod ID.
    pub plugin_id: String,

    /// Mod version.
    pub plugin_version: String,

    /// Host version the mod was compiled against.
    #[serde(default)]
    pub host_version: Option<String>,

    /// Compiler version.
    #[serde(default)]
    pub compiler_version: Option<String>,
}

/// A constant value in the constant pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Constant {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

/// A type defined by the mod.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDef {
    /// Fully-qualified type name.
    pub name: String,

    /// Base type, which may be a host type.
    #[serde(default)]
    pub base: Option<String>,
}

/// A function definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    /// Function name.
    pub name: String,

    /// Mod type declaring the function, if any.
    #[serde(default)]
    pub owner: Option<String>,

    /// Parameter types.
    #[serde(default)]
    pub params: Vec<String>,

    /// Return type.
    #[serde(default = "default_returns")]
    pub returns: String,

    /// Local variable count.
    #[serde(default)]
    pub local_count: usize,

    /// Instructions.
    pub instructions: Vec<Instruction>,
}

fn default_returns() -> String {
    VOID.to_string()
}

/// A stack-machine instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum Instruction {
    /// Load a constant from the pool.
    LoadConst { index: usize },

    /// Load a function argument.
    LoadArg { index: usize },

    /// Load a local variable.
    LoadLocal { index: usize },

    /// Store to a local variable.
    StoreLocal { index: usize },

    /// Call another function of the same mod.
    CallLocal { name: String, arg_count: usize },

    /// Call a static host method.
    Call { method: Symbol },

    /// Call an instance host method; the receiver is below the arguments.
    CallVirtual { method: Symbol },

    /// Construct a host object.
    NewObject { ctor: Symbol },

    /// Load an instance field.
    LoadField { field: Symbol },

    /// Store an instance field.
    StoreField { field: Symbol },

    /// Load a static field.
    LoadStatic { field: Symbol },

    /// Store a static field.
    StoreStatic { field: Symbol },

    /// Cast the top of stack to a type.
    Cast { ty: Symbol },

    /// Test whether the top of stack is an instance of a type.
    IsInstance { ty: Symbol },

    /// Create an array of a type.
    NewArray { ty: Symbol },

    /// Push a runtime handle for a type.
    LoadToken { ty: Symbol },

    /// Return from function.
    Return,

    /// Jump by an offset relative to this instruction.
    Jump { offset: i32 },

    /// Jump by an offset relative to this instruction if top of stack is false.
    JumpIfFalse { offset: i32 },

    Pop,
    Dup,
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Gt,
    Not,
    Nop,
}

/// How an instruction uses its symbol operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteKind {
    StaticCall,
    InstanceCall,
    Construct,
    FieldLoad,
    FieldStore,
    StaticLoad,
    StaticStore,
    TypeOperand,
}

impl Instruction {
    /// The host symbol this instruction references, with how it is used.
    pub fn symbol(&self) -> Option<(&Symbol, SiteKind)> {
        match self {
            Instruction::Call { method } => Some((method, SiteKind::StaticCall)),
            Instruction::CallVirtual { method } => Some((method, SiteKind::InstanceCall)),
            Instruction::NewObject { ctor } => Some((ctor, SiteKind::Construct)),
            Instruction::LoadField { field } => Some((field, SiteKind::FieldLoad)),
            Instruction::StoreField { field } => Some((field, SiteKind::FieldStore)),
            Instruction::LoadStatic { field } => Some((field, SiteKind::StaticLoad)),
            Instruction::StoreStatic { field } => Some((field, SiteKind::StaticStore)),
            Instruction::Cast { ty }
            | Instruction::IsInstance { ty }
            | Instruction::NewArray { ty }
            | Instruction::LoadToken { ty } => Some((ty, SiteKind::TypeOperand)),
            _ => None,
        }
    }

    /// Mutable access to the symbol operand.
    pub fn symbol_mut(&mut self) -> Option<&mut Symbol> {
        match self {
            Instruction::Call { method } | Instruction::CallVirtual { method } => Some(method),
            Instruction::NewObject { ctor } => Some(ctor),
            Instruction::LoadField { field }
            | Instruction::StoreField { field }
            | Instruction::LoadStatic { field }
            | Instruction::StoreStatic { field } => Some(field),
            Instruction::Cast { ty }
            | Instruction::IsInstance { ty }
            | Instruction::NewArray { ty }
            | Instruction::LoadToken { ty } => Some(ty),
            _ => None,
        }
    }

    /// The relative offset of a jump instruction.
    pub fn jump_offset(&self) -> Option<i32> {
        match self {
            Instruction::Jump { offset } | Instruction::JumpIfFalse { offset } => Some(*offset),
            _ => None,
        }
    }

    /// Replace the relative offset of a jump instruction.
    pub fn set_jump_offset(&mut self, new_offset: i32) {
        if let Instruction::Jump { offset } | Instruction::JumpIfFalse { offset } = self {
            *offset = new_offset;
        }
    }
}

impl PluginBinary {
    /// Whether the mod itself defines a type.
    pub fn defines_type(&self, name: &str) -> bool {
        self.types.iter().any(|t| t.name == name)
    }

    /// Whether a symbol belongs to the host rather than the mod.
    pub fn is_external(&self, symbol: &Symbol) -> bool {
        !self.defines_type(&symbol.owner)
    }

    /// Total instruction count across all functions.
    pub fn instruction_count(&self) -> usize {
        self.functions.iter().map(|f| f.instructions.len()).sum()
    }
}

/// Jump target index, or `None` if it would be negative or overflow.
pub fn jump_target(index: usize, offset: i32) -> Option<usize> {
    let target = i64::try_from(index).ok()? + i64::from(offset);
    usize::try_from(target).ok()
}

/// Binary loader.
pub struct BinaryLoader;

impl BinaryLoader {
    /// Load and validate a binary from a file.
    pub fn load(path: &Path) -> RuntimeResult<PluginBinary> {
        let content = std::fs::read(path)?;
        Self::parse(&content)
    }

    /// Parse and validate a binary from bytes.
    pub fn parse(bytes: &[u8]) -> RuntimeResult<PluginBinary> {
        if bytes.len() < 4 {
            return Err(RuntimeError::Unreadable(
                "File too small to be a valid binary".to_string(),
            ));
        }

        let body = if &bytes[0..4] == MAGIC {
            &bytes[4..]
        } else {
            bytes
        };

        let binary = Self::parse_json(body)?;
        Self::validate(&binary)?;
        Ok(binary)
    }

    fn parse_json(bytes: &[u8]) -> RuntimeResult<PluginBinary> {
        let content = std::str::from_utf8(bytes)
            .map_err(|e| RuntimeError::Unreadable(format!("Invalid UTF-8: {}", e)))?;

        serde_json::from_str(content)
            .map_err(|e| RuntimeError::Unreadable(format!("Invalid binary body: {}", e)))
    }

    /// Serialize a binary in its on-disk form.
    pub fn to_bytes(binary: &PluginBinary) -> RuntimeResult<Vec<u8>> {
        let mut bytes = MAGIC.to_vec();
        serde_json::to_writer(&mut bytes, binary)?;
        Ok(bytes)
    }

    /// Write a binary to a file.
    pub fn write(binary: &PluginBinary, path: &Path) -> RuntimeResult<()> {
        std::fs::write(path, Self::to_bytes(binary)?)?;
        Ok(())
    }

    /// Validate binary structure.
    pub fn validate(binary: &PluginBinary) -> RuntimeResult<()> {
        if binary.version != FORMAT_VERSION {
            return Err(RuntimeError::Unreadable(format!(
                "Unsupported binary version: {}",
                binary.version
            )));
        }

        let mut type_names = HashSet::new();
        for ty in &binary.types {
            if !type_names.insert(ty.name.as_str()) {
                return Err(RuntimeError::Unreadable(format!(
                    "Type '{}' is defined more than once",
                    ty.name
                )));
            }
        }

        if !binary.functions.iter().any(|f| f.name == binary.entry_point) {
            return Err(RuntimeError::Unreadable(format!(
                "Entry point function '{}' not found",
                binary.entry_point
            )));
        }

        for function in &binary.functions {
            Self::validate_function(binary, function)?;
        }

        Ok(())
    }

    fn validate_function(binary: &PluginBinary, function: &Function) -> RuntimeResult<()> {
        let len = function.instructions.len();
        let bad = |index: usize, what: &str| {
            RuntimeError::Unreadable(format!(
                "{} at {}[{}]",
                what, function.name, index
            ))
        };

        for (index, instruction) in function.instructions.iter().enumerate() {
            match instruction {
                Instruction::LoadConst { index: c } if *c >= binary.constants.len() => {
                    return Err(bad(index, "constant index out of range"));
                }
                Instruction::LoadArg { index: a } if *a >= function.params.len() => {
                    return Err(bad(index, "argument index out of range"));
                }
                Instruction::LoadLocal { index: l } | Instruction::StoreLocal { index: l }
                    if *l >= function.local_count =>
                {
                    return Err(bad(index, "local index out of range"));
                }
                Instruction::CallLocal { name, .. }
                    if !binary.functions.iter().any(|f| &f.name == name) =>
                {
                    return Err(bad(index, "call to undefined function"));
                }
                _ => {}
            }

            if let Some(offset) = instruction.jump_offset() {
                match jump_target(index, offset) {
                    Some(target) if target <= len => {}
                    _ => return Err(bad(index, "jump target out of range")),
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_binary() -> PluginBinary {
        PluginBinary {
            version: 1,
            metadata: BinaryMetadata {
                plugin_id: "test".to_string(),
                plugin_version: "0.1.0".to_string(),
                host_version: Some("1.5.6".to_string()),
                compiler_version: None,
            },
            constants: vec![Constant::String("Hello".to_string()), Constant::Int(42)],
            types: vec![TypeDef {
                name: "Test.ModEntry".to_string(),
                base: Some("Host.Mod".to_string()),
            }],
            functions: vec![Function {
                name: "main".to_string(),
                owner: Some("Test.ModEntry".to_string()),
                params: vec![],
                returns: VOID.to_string(),
                local_count: 1,
                instructions: vec![
                    Instruction::LoadConst { index: 0 },
                    Instruction::Call {
                        method: Symbol::method("Host.Log", "info", ["string"], VOID),
                    },
                    Instruction::LoadConst { index: 1 },
                    Instruction::StoreLocal { index: 0 },
                    Instruction::Return,
                ],
            }],
            entry_point: "main".to_string(),
        }
    }

    #[test]
    fn test_serialize_binary() {
        let binary = sample_binary();
        let json = serde_json::to_string_pretty(&binary).unwrap();
        assert!(json.contains("\"version\": 1"));
        assert!(json.contains("\"method\": \"Host.Log::info(string) -> void\""));
    }

    #[test]
    fn test_parse_with_and_without_magic() {
        let binary = sample_binary();
        let bytes = BinaryLoader::to_bytes(&binary).unwrap();
        assert_eq!(&bytes[0..4], MAGIC);
        assert_eq!(BinaryLoader::parse(&bytes).unwrap(), binary);

        let json = serde_json::to_vec(&binary).unwrap();
        assert_eq!(BinaryLoader::parse(&json).unwrap(), binary);
    }

    #[test]
    fn test_garbage_is_unreadable() {
        assert!(matches!(
            BinaryLoader::parse(b"MZ\x90\x00not json"),
            Err(RuntimeError::Unreadable(_))
        ));
        assert!(matches!(BinaryLoader::parse(b"{}"), Err(RuntimeError::Unreadable(_))));
    }

    #[test]
    fn test_validate_missing_entry_point() {
        let mut binary = sample_binary();
        binary.entry_point = "nonexistent".to_string();
        assert!(BinaryLoader::validate(&binary).is_err());
    }

    #[test]
    fn test_validate_jump_range() {
        let mut binary = sample_binary();
        binary.functions[0]
            .instructions
            .insert(0, Instruction::Jump { offset: 5 });
        // len is now 6, target 5 is in range
        assert!(BinaryLoader::validate(&binary).is_ok());

        binary.functions[0].instructions[0] = Instruction::Jump { offset: 7 };
        assert!(BinaryLoader::validate(&binary).is_err());

        binary.functions[0].instructions[0] = Instruction::JumpIfFalse { offset: -1 };
        assert!(BinaryLoader::validate(&binary).is_err());
    }

    #[test]
    fn test_validate_local_range() {
        let mut binary = sample_binary();
        binary.functions[0].local_count = 0;
        assert!(matches!(
            BinaryLoader::validate(&binary),
            Err(RuntimeError::Unreadable(_))
        ));
    }

    #[test]
    fn test_external_symbols() {
        let binary = sample_binary();
        assert!(binary.is_external(&Symbol::type_named("Host.Mod")));
        assert!(!binary.is_external(&Symbol::type_named("Test.ModEntry")));
    }
}
