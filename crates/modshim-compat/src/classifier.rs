//! Compatibility classifier.
//!
//! Gives every scanned reference a verdict from the rule table. Symbols
//! without a rule are allowed. Classification is a pure function of the
//! references, rules, and facades, so classifying twice gives the same result.

use crate::facade::{CallShape, FacadeRegistry};
use crate::rules::{Disposition, RewriteTarget, SymbolRule, SymbolRuleTable};
use crate::scanner::{element_type, SymbolReference};
use modshim_runtime::{FailReason, Member, ModWarning, SiteKind, Symbol, SymbolKind, WarningSet};
use std::fmt;

/// Why a reference can't be loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FatalCause {
    /// The symbol is forbidden; `reason` is the rule's reason code.
    Forbidden { reason: String },
    /// A rewrite rule names a target that can't be applied here.
    UnresolvedRewrite { target: String },
}

impl FatalCause {
    /// The failure a mod gets for this cause.
    pub fn fail_reason(&self) -> FailReason {
        match self {
            FatalCause::Forbidden { .. } => FailReason::Incompatible,
            FatalCause::UnresolvedRewrite { .. } => FailReason::LoadFailed,
        }
    }
}

impl fmt::Display for FatalCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FatalCause::Forbidden { reason } => write!(f, "forbidden ({})", reason),
            FatalCause::UnresolvedRewrite { target } => {
                write!(f, "rule declares a rewrite to '{}' that can't be resolved", target)
            }
        }
    }
}

/// The decision for one reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allowed,
    Rewritten {
        original: Symbol,
        replacement: Symbol,
        /// The facade applied at the call site, for facade rewrites.
        facade: Option<String>,
    },
    Fatal(FatalCause),
}

impl Verdict {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Verdict::Fatal(_))
    }

    pub fn is_rewritten(&self) -> bool {
        matches!(self, Verdict::Rewritten { .. })
    }
}

/// A reference with its verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedReference {
    pub reference: SymbolReference,
    pub verdict: Verdict,
}

/// The verdict for a whole binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateVerdict {
    Compatible,
    RewritableWithWarnings,
    Incompatible,
}

/// Result of classifying one binary.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    /// Verdicts in the order the references were given.
    pub references: Vec<ClassifiedReference>,
    pub aggregate: AggregateVerdict,
    /// Warnings raised by rules and prefix flags.
    pub warnings: WarningSet,
}

impl Classification {
    /// The reference that decides the failure reason, if any is fatal.
    ///
    /// A forbidden symbol outranks an unresolved rewrite; ties go to the
    /// first in source order.
    pub fn deciding_fatal(&self) -> Option<&ClassifiedReference> {
        let mut fatal = self.references.iter().filter(|r| r.verdict.is_fatal());
        let first = fatal.clone().next()?;
        Some(
            fatal
                .find(|r| matches!(r.verdict, Verdict::Fatal(FatalCause::Forbidden { .. })))
                .unwrap_or(first),
        )
    }

    /// The failure reason for an incompatible binary.
    pub fn fail_reason(&self) -> Option<FailReason> {
        match &self.deciding_fatal()?.verdict {
            Verdict::Fatal(cause) => Some(cause.fail_reason()),
            _ => None,
        }
    }

    /// References that will be rewritten.
    pub fn rewritten(&self) -> impl Iterator<Item = &ClassifiedReference> {
        self.references.iter().filter(|r| r.verdict.is_rewritten())
    }
}

/// Classify references against the rule table and facade registry.
pub fn classify(
    references: &[SymbolReference],
    rules: &SymbolRuleTable,
    facades: &FacadeRegistry,
) -> Classification {
    let mut warnings = WarningSet::new();
    let classified: Vec<ClassifiedReference> = references
        .iter()
        .map(|reference| {
            for warning in reference_warnings(reference, rules) {
                warnings.add(warning);
            }
            ClassifiedReference {
                reference: reference.clone(),
                verdict: classify_reference(reference, rules, facades),
            }
        })
        .collect();

    let aggregate = if classified.iter().any(|r| r.verdict.is_fatal()) {
        AggregateVerdict::Incompatible
    } else if classified.iter().any(|r| r.verdict.is_rewritten()) {
        AggregateVerdict::RewritableWithWarnings
    } else {
        AggregateVerdict::Compatible
    };

    Classification {
        references: classified,
        aggregate,
        warnings,
    }
}

fn reference_warnings<'a>(
    reference: &'a SymbolReference,
    rules: &'a SymbolRuleTable,
) -> impl Iterator<Item = ModWarning> + 'a {
    let rule_warnings = rules
        .get(&reference.symbol)
        .or_else(|| rules.owner_rule(&reference.symbol))
        .into_iter()
        .flat_map(|rule| rule.warnings.iter().copied());
    rule_warnings.chain(rules.flags_for(&reference.symbol))
}

/// Classify a single reference.
pub fn classify_reference(
    reference: &SymbolReference,
    rules: &SymbolRuleTable,
    facades: &FacadeRegistry,
) -> Verdict {
    let symbol = &reference.symbol;
    if let Some(rule) = rules.get(symbol) {
        return apply_rule(reference, rule, facades, false);
    }
    if let Some(rule) = rules.owner_rule(symbol) {
        return apply_rule(reference, rule, facades, true);
    }
    Verdict::Allowed
}

fn apply_rule(
    reference: &SymbolReference,
    rule: &SymbolRule,
    facades: &FacadeRegistry,
    via_owner: bool,
) -> Verdict {
    match &rule.disposition {
        Disposition::Allowed => Verdict::Allowed,
        Disposition::Forbidden { reason } => Verdict::Fatal(FatalCause::Forbidden {
            reason: reason.clone(),
        }),
        Disposition::RewriteTo(RewriteTarget::Facade(id)) => {
            resolve_facade(reference, id, facades)
        }
        Disposition::RewriteTo(RewriteTarget::Symbol(replacement)) => {
            let resolved = if via_owner {
                move_member(&reference.symbol, replacement)
            } else if fits_reference(reference, replacement) {
                Some(replacement.clone())
            } else {
                None
            };
            match resolved {
                Some(replacement) => Verdict::Rewritten {
                    original: reference.symbol.clone(),
                    replacement,
                    facade: None,
                },
                None => unresolved(replacement.to_string()),
            }
        }
    }
}

/// A facade resolves when it exists, was written for this symbol, and the
/// reference is a call of the shape it expects.
fn resolve_facade(reference: &SymbolReference, id: &str, facades: &FacadeRegistry) -> Verdict {
    let Some(facade) = facades.get(id) else {
        return unresolved(format!("facade '{}'", id));
    };
    let shape = reference.site.and_then(CallShape::of_site);
    if facade.legacy != reference.symbol || shape != Some(facade.call) {
        return unresolved(format!("facade '{}'", id));
    }
    Verdict::Rewritten {
        original: reference.symbol.clone(),
        replacement: facade.target.clone(),
        facade: Some(facade.id.clone()),
    }
}

/// Whether a direct replacement can stand in for the reference at its site
/// without changing what the instruction leaves on the stack.
fn fits_reference(reference: &SymbolReference, replacement: &Symbol) -> bool {
    let symbol = &reference.symbol;
    if replacement.kind() != symbol.kind() {
        return false;
    }
    match reference.site {
        Some(site) => {
            site_accepts(site, replacement)
                && symbol.arity() == replacement.arity()
                && symbol.returns_void() == replacement.returns_void()
        }
        None => true,
    }
}

fn unresolved(target: String) -> Verdict {
    Verdict::Fatal(FatalCause::UnresolvedRewrite { target })
}

/// Move a member of a relocated type to the replacement type, renaming the
/// old type wherever it appears in the member's signature.
fn move_member(symbol: &Symbol, replacement: &Symbol) -> Option<Symbol> {
    if replacement.kind() != SymbolKind::Type {
        return None;
    }
    if symbol.kind() == SymbolKind::Type {
        return Some(replacement.clone());
    }
    Some(retarget_symbol(symbol, &symbol.owner, &replacement.owner))
}

/// Rename a type everywhere it appears in a symbol: owner, field type,
/// parameters and return type.
pub(crate) fn retarget_symbol(symbol: &Symbol, old: &str, new: &str) -> Symbol {
    let rename = |ty: &str| retarget_type(ty, old, new);
    let member = match &symbol.member {
        Member::Type => Member::Type,
        Member::Field { name, ty } => Member::Field {
            name: name.clone(),
            ty: rename(ty),
        },
        Member::Method {
            name,
            params,
            returns,
        } => Member::Method {
            name: name.clone(),
            params: params.iter().map(|p| rename(p)).collect(),
            returns: rename(returns),
        },
    };
    Symbol {
        owner: rename(&symbol.owner),
        member,
    }
}

/// Rename a type, keeping array suffixes.
pub(crate) fn retarget_type(ty: &str, old: &str, new: &str) -> String {
    let element = element_type(ty);
    if element == old {
        format!("{}{}", new, &ty.trim()[element.len()..])
    } else {
        ty.to_string()
    }
}

/// Whether a site can be redirected to a replacement symbol of this shape.
pub(crate) fn site_accepts(site: SiteKind, replacement: &Symbol) -> bool {
    match site {
        SiteKind::StaticCall | SiteKind::InstanceCall => {
            replacement.kind() == SymbolKind::Method && !replacement.is_constructor()
        }
        SiteKind::Construct => replacement.is_constructor(),
        SiteKind::FieldLoad | SiteKind::FieldStore | SiteKind::StaticLoad | SiteKind::StaticStore => {
            replacement.kind() == SymbolKind::Field
        }
        SiteKind::TypeOperand => replacement.kind() == SymbolKind::Type,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facade::FacadeDefinition;
    use crate::rules::SymbolRule;
    use crate::scanner::Location;

    fn sym(text: &str) -> Symbol {
        Symbol::parse(text).unwrap()
    }

    fn reference(index: usize, symbol: &str, site: SiteKind) -> SymbolReference {
        SymbolReference {
            location: Location::Instruction { function: 0, index },
            symbol: sym(symbol),
            site: Some(site),
        }
    }

    fn data() -> (SymbolRuleTable, FacadeRegistry) {
        let mut rules = SymbolRuleTable::new();
        rules
            .insert(SymbolRule::forbidden(sym("Host.Farmer::getToolPower() -> int"), "removed"))
            .unwrap();
        rules
            .insert(SymbolRule::rewrite_to_facade(
                sym("Host.Crop::newDay(int, int) -> void"),
                "crop-new-day",
            ))
            .unwrap();
        rules
            .insert(SymbolRule::rewrite_to_facade(sym("Host.A::gone() -> void"), "missing"))
            .unwrap();
        rules
            .insert(
                SymbolRule::rewrite_to_symbol(sym("Host.Old.Fence"), sym("Host.Fence"))
                    .including_members(),
            )
            .unwrap();
        rules
            .insert(
                SymbolRule::allowed(sym("Host.Harmony::Patch(object) -> void"))
                    .with_warning(ModWarning::PatchesGame),
            )
            .unwrap();
        rules.add_flag("System.IO", ModWarning::AccessesFilesystem);

        let mut facades = FacadeRegistry::new();
        let mut facade = FacadeDefinition::forwarding(
            "crop-new-day",
            sym("Host.Crop::newDay(int, int) -> void"),
            CallShape::Instance,
            sym("Host.Crop::newDay(int) -> void"),
            CallShape::Instance,
        );
        facade.args.truncate(2);
        facades.register(facade).unwrap();
        (rules, facades)
    }

    #[test]
    fn test_unlisted_is_allowed() {
        let (rules, facades) = data();
        let refs: Vec<_> = (0..10)
            .map(|i| reference(i, "Host.Game::tick() -> void", SiteKind::StaticCall))
            .collect();
        let result = classify(&refs, &rules, &facades);
        assert_eq!(result.aggregate, AggregateVerdict::Compatible);
        assert!(result.references.iter().all(|r| r.verdict == Verdict::Allowed));
    }

    #[test]
    fn test_one_forbidden_makes_incompatible() {
        let (rules, facades) = data();
        let mut refs: Vec<_> = (0..9)
            .map(|i| reference(i, "Host.Game::tick() -> void", SiteKind::StaticCall))
            .collect();
        refs.push(reference(9, "Host.Farmer::getToolPower() -> int", SiteKind::InstanceCall));

        let result = classify(&refs, &rules, &facades);
        assert_eq!(result.aggregate, AggregateVerdict::Incompatible);
        assert_eq!(result.fail_reason(), Some(FailReason::Incompatible));
        assert_eq!(
            result.deciding_fatal().unwrap().reference.symbol,
            sym("Host.Farmer::getToolPower() -> int")
        );
    }

    #[test]
    fn test_facade_rewrite() {
        let (rules, facades) = data();
        let refs = vec![reference(0, "Host.Crop::newDay(int, int) -> void", SiteKind::InstanceCall)];
        let result = classify(&refs, &rules, &facades);
        assert_eq!(result.aggregate, AggregateVerdict::RewritableWithWarnings);
        assert_eq!(
            result.references[0].verdict,
            Verdict::Rewritten {
                original: sym("Host.Crop::newDay(int, int) -> void"),
                replacement: sym("Host.Crop::newDay(int) -> void"),
                facade: Some("crop-new-day".to_string()),
            }
        );
    }

    #[test]
    fn test_facade_on_wrong_shape_is_unresolved() {
        let (rules, facades) = data();
        let refs = vec![reference(0, "Host.Crop::newDay(int, int) -> void", SiteKind::StaticCall)];
        let result = classify(&refs, &rules, &facades);
        assert_eq!(result.fail_reason(), Some(FailReason::LoadFailed));
    }

    #[test]
    fn test_missing_facade_is_load_failed() {
        let (rules, facades) = data();
        let refs = vec![reference(0, "Host.A::gone() -> void", SiteKind::StaticCall)];
        let result = classify(&refs, &rules, &facades);
        assert_eq!(result.aggregate, AggregateVerdict::Incompatible);
        assert!(matches!(
            result.references[0].verdict,
            Verdict::Fatal(FatalCause::UnresolvedRewrite { .. })
        ));
        assert_eq!(result.fail_reason(), Some(FailReason::LoadFailed));
    }

    #[test]
    fn test_forbidden_outranks_unresolved() {
        let (rules, facades) = data();
        let refs = vec![
            reference(0, "Host.A::gone() -> void", SiteKind::StaticCall),
            reference(1, "Host.Farmer::getToolPower() -> int", SiteKind::InstanceCall),
        ];
        let result = classify(&refs, &rules, &facades);
        assert_eq!(result.fail_reason(), Some(FailReason::Incompatible));
    }

    #[test]
    fn test_member_of_relocated_type_moves() {
        let (rules, facades) = data();
        let refs = vec![reference(
            0,
            "Host.Old.Fence::repair(Host.Old.Fence[]) -> Host.Old.Fence",
            SiteKind::InstanceCall,
        )];
        let result = classify(&refs, &rules, &facades);
        match &result.references[0].verdict {
            Verdict::Rewritten { replacement, .. } => {
                assert_eq!(replacement, &sym("Host.Fence::repair(Host.Fence[]) -> Host.Fence"))
            }
            other => panic!("unexpected verdict {:?}", other),
        }
    }

    #[test]
    fn test_direct_rewrite_must_fit_site() {
        let (mut rules, facades) = data();
        rules
            .insert(SymbolRule::rewrite_to_symbol(
                sym("Host.Crop::grow() -> void"),
                sym("Host.Crop::.ctor() -> Host.Crop"),
            ))
            .unwrap();
        rules
            .insert(SymbolRule::rewrite_to_symbol(
                sym("Host.Crop::water(int) -> void"),
                sym("Host.Crop::water(int) -> bool"),
            ))
            .unwrap();
        rules
            .insert(SymbolRule::rewrite_to_symbol(
                sym("Host.Crop::harvest() -> int"),
                sym("Host.Crop::harvest(bool) -> int"),
            ))
            .unwrap();

        for (index, symbol) in [
            "Host.Crop::grow() -> void",
            "Host.Crop::water(int) -> void",
            "Host.Crop::harvest() -> int",
        ]
        .into_iter()
        .enumerate()
        {
            let refs = vec![reference(index, symbol, SiteKind::InstanceCall)];
            let result = classify(&refs, &rules, &facades);
            assert!(
                matches!(
                    result.references[0].verdict,
                    Verdict::Fatal(FatalCause::UnresolvedRewrite { .. })
                ),
                "{} should not resolve",
                symbol
            );
            assert_eq!(result.fail_reason(), Some(FailReason::LoadFailed));
        }
    }

    #[test]
    fn test_type_inside_member_operand() {
        let (rules, facades) = data();
        let refs = vec![SymbolReference {
            location: Location::MemberType { function: 0, index: 0 },
            symbol: sym("Host.Old.Fence"),
            site: None,
        }];
        let result = classify(&refs, &rules, &facades);
        assert_eq!(
            result.references[0].verdict,
            Verdict::Rewritten {
                original: sym("Host.Old.Fence"),
                replacement: sym("Host.Fence"),
                facade: None,
            }
        );
    }

    #[test]
    fn test_warnings_collected() {
        let (rules, facades) = data();
        let refs = vec![
            reference(0, "Host.Harmony::Patch(object) -> void", SiteKind::StaticCall),
            reference(1, "System.IO.File::Delete(string) -> void", SiteKind::StaticCall),
        ];
        let result = classify(&refs, &rules, &facades);
        assert!(result.warnings.has(ModWarning::PatchesGame));
        assert!(result.warnings.has(ModWarning::AccessesFilesystem));
        assert_eq!(result.aggregate, AggregateVerdict::Compatible);
    }

    #[test]
    fn test_classification_is_idempotent() {
        let (rules, facades) = data();
        let refs = vec![
            reference(0, "Host.Crop::newDay(int, int) -> void", SiteKind::InstanceCall),
            reference(1, "Host.Old.Fence", SiteKind::TypeOperand),
            reference(2, "Host.A::gone() -> void", SiteKind::StaticCall),
        ];
        assert_eq!(
            classify(&refs, &rules, &facades),
            classify(&refs, &rules, &facades)
        );
    }
}
