//! Binary rewriter.
//!
//! Applies the `Rewritten` verdicts of a classification to a copy of the
//! binary. Direct replacements patch the symbol operand in place. Facades
//! replace the call instruction with a forwarding sequence:
//!
//! 1. the legacy call's stack values are spilled into scratch locals
//! 2. the facade's arguments are pushed from those locals, constants, static
//!    fields, or conversion calls
//! 3. the target is called, constructed objects get their field initializers,
//!    and the result is passed through `result_via`
//!
//! Types named inside a member operand are renamed in place. Jump offsets are
//! remapped around expanded sequences. Either every verdict
//! applies and the output validates, or the caller gets an error and no binary.

use crate::classifier::{
    retarget_symbol, retarget_type, site_accepts, AggregateVerdict, Classification, Verdict,
};
use crate::error::RewriteError;
use crate::facade::{ArgSource, CallShape, FacadeDefinition, FacadeRegistry};
use crate::scanner::{element_type, member_types, Location};
use modshim_runtime::binary::{jump_target, Constant, Function, Instruction, PluginBinary};
use modshim_runtime::{BinaryLoader, SiteKind, Symbol, SymbolKind};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// One applied rewrite, reported to the operator.
#[derive(Debug, Clone, PartialEq)]
pub struct RewriteWarning {
    pub location: Location,
    pub original: Symbol,
    pub replacement: Symbol,
    pub facade: Option<String>,
}

impl fmt::Display for RewriteWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rewrote '{}' at {} to '{}'",
            self.original, self.location, self.replacement
        )?;
        if let Some(facade) = &self.facade {
            write!(f, " via facade '{}'", facade)?;
        }
        Ok(())
    }
}

/// A rewritten binary and what was changed.
#[derive(Debug, Clone)]
pub struct RewriteOutput {
    pub binary: PluginBinary,
    pub warnings: Vec<RewriteWarning>,
}

/// Constant pool that reuses existing entries.
struct ConstantPool {
    constants: Vec<Constant>,
}

impl ConstantPool {
    fn intern(&mut self, constant: &Constant) -> usize {
        if let Some(index) = self.constants.iter().position(|c| c == constant) {
            return index;
        }
        self.constants.push(constant.clone());
        self.constants.len() - 1
    }
}

/// Replacement code for one instruction, and the scratch locals it needs.
struct Edit {
    code: Vec<Instruction>,
    scratch_locals: usize,
    /// Code that came from a facade definition and already targets the
    /// current API.
    from_facade: bool,
}

/// Rewrite a binary according to its classification.
pub fn rewrite(
    binary: &PluginBinary,
    classification: &Classification,
    facades: &FacadeRegistry,
) -> Result<RewriteOutput, RewriteError> {
    if classification.aggregate == AggregateVerdict::Incompatible {
        return Err(RewriteError::NotRewritable);
    }

    let mut output = binary.clone();
    let mut pool = ConstantPool {
        constants: std::mem::take(&mut output.constants),
    };
    let mut edits: BTreeMap<usize, BTreeMap<usize, Edit>> = BTreeMap::new();
    let mut renames: BTreeMap<(usize, usize), (Instruction, Vec<(String, String)>)> =
        BTreeMap::new();
    let mut warnings = Vec::new();

    for classified in classification.rewritten() {
        let Verdict::Rewritten {
            original,
            replacement,
            facade,
        } = &classified.verdict
        else {
            continue;
        };
        let location = classified.reference.location;

        match location {
            Location::Instruction { function, index } => {
                let instruction = binary
                    .functions
                    .get(function)
                    .and_then(|f| f.instructions.get(index))
                    .ok_or(RewriteError::LocationOutOfRange(location))?;
                let site = match instruction.symbol() {
                    Some((found, site)) if found == original => site,
                    Some((found, _)) => {
                        return Err(RewriteError::SymbolMismatch {
                            location,
                            expected: original.clone(),
                            found: found.to_string(),
                        })
                    }
                    None => {
                        return Err(RewriteError::SymbolMismatch {
                            location,
                            expected: original.clone(),
                            found: format!("{:?}", instruction),
                        })
                    }
                };

                let edit = match facade {
                    None => Edit {
                        code: vec![redirect(instruction, location, site, original, replacement)?],
                        scratch_locals: 0,
                        from_facade: false,
                    },
                    Some(id) => {
                        let facade = facades
                            .get(id)
                            .ok_or_else(|| RewriteError::UnknownFacade(id.clone()))?;
                        let base_local = binary.functions[function].local_count;
                        expand_facade(instruction, location, site, facade, base_local, &mut pool)?
                    }
                };

                if edits.entry(function).or_default().insert(index, edit).is_some() {
                    return Err(RewriteError::ShapeMismatch {
                        location,
                        reason: "location is rewritten more than once".to_string(),
                    });
                }
            }
            Location::MemberType { function, index } => {
                let instruction = binary
                    .functions
                    .get(function)
                    .and_then(|f| f.instructions.get(index))
                    .ok_or(RewriteError::LocationOutOfRange(location))?;
                check_type_replacement(location, original, replacement, facade.is_some())?;
                let Some((found, _)) = instruction.symbol() else {
                    return Err(RewriteError::SymbolMismatch {
                        location,
                        expected: original.clone(),
                        found: format!("{:?}", instruction),
                    });
                };
                if !member_types(found).contains(&original.owner.as_str()) {
                    return Err(RewriteError::SymbolMismatch {
                        location,
                        expected: original.clone(),
                        found: found.to_string(),
                    });
                }
                renames
                    .entry((function, index))
                    .or_insert_with(|| (instruction.clone(), Vec::new()))
                    .1
                    .push((original.owner.clone(), replacement.owner.clone()));
            }
            _ => rewrite_declaration(&mut output, location, original, replacement, facade.is_some())?,
        }

        debug!("{} -> {} at {}", original, replacement, location);
        warnings.push(RewriteWarning {
            location,
            original: original.clone(),
            replacement: replacement.clone(),
            facade: facade.clone(),
        });
    }

    // Operand types are renamed after the operand itself was replaced, so a
    // moved member keeps its new owner and facade code is left alone.
    for ((function, index), (instruction, pairs)) in renames {
        let edit = edits
            .entry(function)
            .or_default()
            .entry(index)
            .or_insert_with(|| Edit {
                code: vec![instruction],
                scratch_locals: 0,
                from_facade: false,
            });
        if edit.from_facade {
            continue;
        }
        if let Some(symbol) = edit.code.first_mut().and_then(Instruction::symbol_mut) {
            for (old, new) in &pairs {
                *symbol = retarget_symbol(symbol, old, new);
            }
        }
    }

    output.constants = pool.constants;
    for (function_index, function_edits) in edits {
        let Some(function) = output.functions.get_mut(function_index) else {
            continue;
        };
        let scratch = function_edits
            .values()
            .map(|edit| edit.scratch_locals)
            .max()
            .unwrap_or(0);
        splice(function, function_edits)?;
        function.local_count += scratch;
    }

    BinaryLoader::validate(&output).map_err(|e| RewriteError::InvalidOutput(e.to_string()))?;

    Ok(RewriteOutput {
        binary: output,
        warnings,
    })
}

/// Patch the symbol operand of an instruction in place.
fn redirect(
    instruction: &Instruction,
    location: Location,
    site: SiteKind,
    original: &Symbol,
    replacement: &Symbol,
) -> Result<Instruction, RewriteError> {
    let mismatch = |reason: &str| RewriteError::ShapeMismatch {
        location,
        reason: reason.to_string(),
    };
    if !site_accepts(site, replacement) {
        return Err(mismatch("replacement kind doesn't fit the instruction"));
    }
    if original.arity() != replacement.arity() {
        return Err(mismatch("replacement takes a different number of arguments"));
    }
    if original.returns_void() != replacement.returns_void() {
        return Err(mismatch("replacement changes whether the call returns a value"));
    }

    let mut redirected = instruction.clone();
    if let Some(symbol) = redirected.symbol_mut() {
        *symbol = replacement.clone();
    }
    Ok(redirected)
}

fn expand_facade(
    instruction: &Instruction,
    location: Location,
    site: SiteKind,
    facade: &FacadeDefinition,
    base_local: usize,
    pool: &mut ConstantPool,
) -> Result<Edit, RewriteError> {
    if CallShape::of_site(site) != Some(facade.call) {
        return Err(RewriteError::ShapeMismatch {
            location,
            reason: format!("facade '{}' expects a {:?} call", facade.id, facade.call),
        });
    }

    if facade.is_identity() {
        let mut redirected = instruction.clone();
        if let Some(symbol) = redirected.symbol_mut() {
            *symbol = facade.target.clone();
        }
        return Ok(Edit {
            code: vec![redirected],
            scratch_locals: 0,
            from_facade: true,
        });
    }

    let slots = facade.legacy_stack_arity();
    let param_base = base_local + usize::from(facade.call == CallShape::Instance);
    let mut code = Vec::new();

    // Stack top is the last parameter.
    for slot in (0..slots).rev() {
        code.push(Instruction::StoreLocal {
            index: base_local + slot,
        });
    }

    let mut push_arg = |code: &mut Vec<Instruction>, arg: &ArgSource| match arg {
        ArgSource::Receiver => code.push(Instruction::LoadLocal { index: base_local }),
        ArgSource::Param(param) => code.push(Instruction::LoadLocal {
            index: param_base + param,
        }),
        ArgSource::Constant(constant) => code.push(Instruction::LoadConst {
            index: pool.intern(constant),
        }),
        ArgSource::StaticField(field) => code.push(Instruction::LoadStatic {
            field: field.clone(),
        }),
        ArgSource::Converted { param, via } => {
            code.push(Instruction::LoadLocal {
                index: param_base + param,
            });
            code.push(Instruction::Call {
                method: via.clone(),
            });
        }
    };

    for arg in &facade.args {
        push_arg(&mut code, arg);
    }

    code.push(match facade.target_call {
        CallShape::Static => Instruction::Call {
            method: facade.target.clone(),
        },
        CallShape::Instance => Instruction::CallVirtual {
            method: facade.target.clone(),
        },
        CallShape::Construct => Instruction::NewObject {
            ctor: facade.target.clone(),
        },
    });

    for init in &facade.init {
        code.push(Instruction::Dup);
        push_arg(&mut code, &init.value);
        code.push(Instruction::StoreField {
            field: init.field.clone(),
        });
    }

    if let Some(via) = &facade.result_via {
        code.push(Instruction::Call {
            method: via.clone(),
        });
    }

    Ok(Edit {
        code,
        scratch_locals: slots,
        from_facade: true,
    })
}

/// Replace edited instructions and fix up jump offsets.
fn splice(function: &mut Function, mut edits: BTreeMap<usize, Edit>) -> Result<(), RewriteError> {
    let old = std::mem::take(&mut function.instructions);
    let mut positions = Vec::with_capacity(old.len() + 1);
    let mut jumps = Vec::new();
    let mut code = Vec::with_capacity(old.len());

    for (index, instruction) in old.into_iter().enumerate() {
        positions.push(code.len());
        if let Some(offset) = instruction.jump_offset() {
            jumps.push((index, offset));
        }
        match edits.remove(&index) {
            Some(edit) => code.extend(edit.code),
            None => code.push(instruction),
        }
    }
    positions.push(code.len());

    for (index, offset) in jumps {
        let bad_jump = || {
            RewriteError::InvalidOutput(format!(
                "jump at {}[{}] has no target",
                function.name, index
            ))
        };
        let target = jump_target(index, offset)
            .and_then(|target| positions.get(target))
            .ok_or_else(bad_jump)?;
        let from = positions[index];
        let new_offset = i32::try_from(*target as i64 - from as i64).map_err(|_| bad_jump())?;
        code[from].set_jump_offset(new_offset);
    }

    function.instructions = code;
    Ok(())
}

fn check_type_replacement(
    location: Location,
    original: &Symbol,
    replacement: &Symbol,
    via_facade: bool,
) -> Result<(), RewriteError> {
    if via_facade || original.kind() != SymbolKind::Type || replacement.kind() != SymbolKind::Type {
        return Err(RewriteError::ShapeMismatch {
            location,
            reason: "type positions only take direct type replacements".to_string(),
        });
    }
    Ok(())
}

/// Retarget a type named in a declaration.
fn rewrite_declaration(
    output: &mut PluginBinary,
    location: Location,
    original: &Symbol,
    replacement: &Symbol,
    via_facade: bool,
) -> Result<(), RewriteError> {
    check_type_replacement(location, original, replacement, via_facade)?;

    let slot = match location {
        Location::BaseType { type_index } => output
            .types
            .get_mut(type_index)
            .and_then(|ty| ty.base.as_mut()),
        Location::Parameter { function, index } => output
            .functions
            .get_mut(function)
            .and_then(|f| f.params.get_mut(index)),
        Location::ReturnType { function } => {
            output.functions.get_mut(function).map(|f| &mut f.returns)
        }
        Location::Instruction { .. } | Location::MemberType { .. } => None,
    }
    .ok_or(RewriteError::LocationOutOfRange(location))?;

    if element_type(slot) != original.owner {
        return Err(RewriteError::SymbolMismatch {
            location,
            expected: original.clone(),
            found: slot.clone(),
        });
    }
    *slot = retarget_type(slot, &original.owner, &replacement.owner);
    Ok(())
}
