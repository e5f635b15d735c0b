//! Facade definitions and the facade registry.
//!
//! A facade is a forwarding adapter: it maps a call in a retired API shape
//! onto the current host API. It is plain data, applied at call sites by the
//! rewriter:
//!
//! ```toml
//! [[facade]]
//! id = "crop-ctor-seed"
//! legacy = "StardewValley.Crop::.ctor(int, int, int) -> StardewValley.Crop"
//! call = "construct"
//! target = "StardewValley.Crop::.ctor(string, int, int, StardewValley.GameLocation) -> StardewValley.Crop"
//! target_call = "construct"
//! args = [
//!     { param = 0, via = "System.Convert::ToString(int) -> string" },
//!     { param = 1 },
//!     { param = 2 },
//!     { static_field = "StardewValley.Game1::currentLocation: StardewValley.GameLocation" },
//! ]
//! ```

use crate::error::{CompatError, CompatResult};
use modshim_runtime::binary::Constant;
use modshim_runtime::{SiteKind, Symbol, SymbolKind};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// How a method is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallShape {
    /// Static call, no receiver.
    Static,
    /// Instance call, receiver below the arguments.
    Instance,
    /// Constructor call producing a new object.
    Construct,
}

impl CallShape {
    /// The call shape of an instruction site, if it is a call.
    pub fn of_site(site: SiteKind) -> Option<Self> {
        match site {
            SiteKind::StaticCall => Some(CallShape::Static),
            SiteKind::InstanceCall => Some(CallShape::Instance),
            SiteKind::Construct => Some(CallShape::Construct),
            _ => None,
        }
    }

    fn has_receiver(self) -> bool {
        self == CallShape::Instance
    }

    /// Whether a call of this shape to `method` leaves a value on the stack.
    /// Constructors always push the new object.
    pub fn pushes_result(self, method: &Symbol) -> bool {
        self == CallShape::Construct || !method.returns_void()
    }
}

/// Where one argument of the forwarded call comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgSource {
    /// The legacy call's receiver.
    Receiver,
    /// A legacy call parameter.
    Param(usize),
    /// A constant value.
    Constant(Constant),
    /// The current value of a host static field.
    StaticField(Symbol),
    /// A legacy parameter passed through a static host conversion method.
    Converted { param: usize, via: Symbol },
}

/// A field set on a newly constructed object.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldInit {
    pub field: Symbol,
    pub value: ArgSource,
}

/// A legacy call shape bound to its current-host translation.
#[derive(Debug, Clone, PartialEq)]
pub struct FacadeDefinition {
    pub id: String,
    /// The retired method as referenced by old mods.
    pub legacy: Symbol,
    pub call: CallShape,
    /// The current host method the call is forwarded to.
    pub target: Symbol,
    pub target_call: CallShape,
    /// Arguments for `target`, including the receiver first for instance targets.
    pub args: Vec<ArgSource>,
    /// Static method applied to the target's result.
    pub result_via: Option<Symbol>,
    /// Fields set after a constructor target.
    pub init: Vec<FieldInit>,
}

impl FacadeDefinition {
    /// A facade that forwards every argument unchanged.
    pub fn forwarding(
        id: impl Into<String>,
        legacy: Symbol,
        call: CallShape,
        target: Symbol,
        target_call: CallShape,
    ) -> Self {
        let arity = legacy.arity().unwrap_or(0);
        let mut args = Vec::with_capacity(arity + 1);
        if call.has_receiver() {
            args.push(ArgSource::Receiver);
        }
        args.extend((0..arity).map(ArgSource::Param));
        Self {
            id: id.into(),
            legacy,
            call,
            target,
            target_call,
            args,
            result_via: None,
            init: Vec::new(),
        }
    }

    /// Number of values the legacy call consumes from the stack.
    pub fn legacy_stack_arity(&self) -> usize {
        self.legacy.arity().unwrap_or(0) + usize::from(self.call.has_receiver())
    }

    /// Whether the facade is a pure rename that can be patched in place.
    pub fn is_identity(&self) -> bool {
        if self.call != self.target_call || self.result_via.is_some() || !self.init.is_empty() {
            return false;
        }
        if self.call.pushes_result(&self.legacy) != self.target_call.pushes_result(&self.target) {
            return false;
        }
        let mut expected = Vec::new();
        if self.call.has_receiver() {
            expected.push(ArgSource::Receiver);
        }
        expected.extend((0..self.legacy.arity().unwrap_or(0)).map(ArgSource::Param));
        self.args == expected
    }

    /// Check that the facade can actually produce the call shape it claims.
    pub fn validate(&self) -> CompatResult<()> {
        let invalid = |reason: String| CompatError::InvalidFacade {
            id: self.id.clone(),
            reason,
        };

        check_method(&self.legacy, self.call).map_err(|r| invalid(format!("legacy: {r}")))?;
        check_method(&self.target, self.target_call)
            .map_err(|r| invalid(format!("target: {r}")))?;

        let legacy_arity = self.legacy.arity().unwrap_or(0);
        let expected_args =
            self.target.arity().unwrap_or(0) + usize::from(self.target_call.has_receiver());
        if self.args.len() != expected_args {
            return Err(invalid(format!(
                "target takes {} stack argument(s) but {} are mapped",
                expected_args,
                self.args.len()
            )));
        }

        for arg in self.args.iter().chain(self.init.iter().map(|init| &init.value)) {
            self.check_arg(arg, legacy_arity).map_err(&invalid)?;
        }

        if let Some(via) = &self.result_via {
            check_converter(via).map_err(|r| invalid(format!("result_via: {r}")))?;
            if !self.target_call.pushes_result(&self.target) {
                return Err(invalid("result_via on a void target".to_string()));
            }
        }

        // result_via maps one value to one value, so only the target decides.
        let legacy_pushes = self.call.pushes_result(&self.legacy);
        if legacy_pushes != self.target_call.pushes_result(&self.target) {
            let reason = if legacy_pushes {
                "legacy call returns a value but the forwarded call doesn't"
            } else {
                "forwarded call returns a value but the legacy call doesn't"
            };
            return Err(invalid(reason.to_string()));
        }

        if !self.init.is_empty() && self.target_call != CallShape::Construct {
            return Err(invalid(
                "field initializers need a constructor target".to_string(),
            ));
        }
        for init in &self.init {
            if init.field.kind() != SymbolKind::Field {
                return Err(invalid(format!("'{}' is not a field", init.field)));
            }
            if init.value == ArgSource::Receiver {
                return Err(invalid("field initializer can't use the receiver".to_string()));
            }
        }

        Ok(())
    }

    fn check_arg(&self, arg: &ArgSource, legacy_arity: usize) -> Result<(), String> {
        match arg {
            ArgSource::Receiver if !self.call.has_receiver() => {
                Err("receiver used but the legacy call has none".to_string())
            }
            ArgSource::Param(index) | ArgSource::Converted { param: index, .. }
                if *index >= legacy_arity =>
            {
                Err(format!(
                    "parameter {} out of range for a legacy call with {} parameter(s)",
                    index, legacy_arity
                ))
            }
            ArgSource::StaticField(field) if field.kind() != SymbolKind::Field => {
                Err(format!("'{}' is not a field", field))
            }
            ArgSource::Converted { via, .. } => {
                check_converter(via).map_err(|r| format!("converter: {r}"))
            }
            _ => Ok(()),
        }
    }
}

fn check_method(symbol: &Symbol, shape: CallShape) -> Result<(), String> {
    if symbol.kind() != SymbolKind::Method {
        return Err(format!("'{}' is not a method", symbol));
    }
    if symbol.is_constructor() != (shape == CallShape::Construct) {
        return Err(format!("'{}' doesn't match call shape {:?}", symbol, shape));
    }
    Ok(())
}

fn check_converter(via: &Symbol) -> Result<(), String> {
    if via.arity() != Some(1) || via.is_constructor() || via.returns_void() {
        return Err(format!(
            "'{}' must be a static method taking one argument and returning a value",
            via
        ));
    }
    Ok(())
}

/// Facades by id.
#[derive(Debug, Clone, Default)]
pub struct FacadeRegistry {
    facades: HashMap<String, FacadeDefinition>,
}

#[derive(Debug, Deserialize)]
struct FacadesFile {
    #[serde(default, rename = "facade")]
    facades: Vec<RawFacade>,
}

#[derive(Debug, Deserialize)]
struct RawFacade {
    id: String,
    legacy: Symbol,
    call: CallShape,
    target: Symbol,
    target_call: CallShape,
    #[serde(default)]
    args: Option<Vec<RawArg>>,
    #[serde(default)]
    result_via: Option<Symbol>,
    #[serde(default)]
    init: Vec<RawInit>,
}

#[derive(Debug, Deserialize)]
struct RawArg {
    #[serde(default)]
    receiver: bool,
    #[serde(default)]
    param: Option<usize>,
    #[serde(default)]
    via: Option<Symbol>,
    #[serde(default)]
    constant: Option<Constant>,
    #[serde(default)]
    static_field: Option<Symbol>,
}

#[derive(Debug, Deserialize)]
struct RawInit {
    field: Symbol,
    value: RawArg,
}

impl RawArg {
    fn into_source(self, id: &str) -> CompatResult<ArgSource> {
        let source = match (
            self.receiver,
            self.param,
            self.via,
            self.constant,
            self.static_field,
        ) {
            (true, None, None, None, None) => ArgSource::Receiver,
            (false, Some(param), None, None, None) => ArgSource::Param(param),
            (false, Some(param), Some(via), None, None) => ArgSource::Converted { param, via },
            (false, None, None, Some(constant), None) => ArgSource::Constant(constant),
            (false, None, None, None, Some(field)) => ArgSource::StaticField(field),
            _ => {
                return Err(CompatError::InvalidFacade {
                    id: id.to_string(),
                    reason: "each argument needs exactly one source".to_string(),
                })
            }
        };
        Ok(source)
    }
}

impl RawFacade {
    fn into_definition(self) -> CompatResult<FacadeDefinition> {
        let id = self.id;
        let mut definition = FacadeDefinition::forwarding(
            id.clone(),
            self.legacy,
            self.call,
            self.target,
            self.target_call,
        );
        if let Some(args) = self.args {
            definition.args = args
                .into_iter()
                .map(|arg| arg.into_source(&id))
                .collect::<CompatResult<_>>()?;
        }
        definition.result_via = self.result_via;
        definition.init = self
            .init
            .into_iter()
            .map(|init| {
                Ok(FieldInit {
                    field: init.field,
                    value: init.value.into_source(&id)?,
                })
            })
            .collect::<CompatResult<_>>()?;
        Ok(definition)
    }
}

impl FacadeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a registry from a TOML file.
    pub fn from_file(path: &Path) -> CompatResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse a registry from TOML.
    pub fn from_toml_str(content: &str) -> CompatResult<Self> {
        let file: FacadesFile = toml::from_str(content)?;
        let mut registry = Self::new();
        for raw in file.facades {
            registry.register(raw.into_definition()?)?;
        }
        Ok(registry)
    }

    /// Validate and add a facade.
    pub fn register(&mut self, facade: FacadeDefinition) -> CompatResult<()> {
        facade.validate()?;
        if self.facades.contains_key(&facade.id) {
            return Err(CompatError::DuplicateFacade(facade.id));
        }
        self.facades.insert(facade.id.clone(), facade);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&FacadeDefinition> {
        self.facades.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.facades.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.facades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facades.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(text: &str) -> Symbol {
        Symbol::parse(text).unwrap()
    }

    #[test]
    fn test_parse_facades_file() {
        let toml = r#"
[[facade]]
id = "crop-ctor-seed"
legacy = "Host.Crop::.ctor(int, int, int) -> Host.Crop"
call = "construct"
target = "Host.Crop::.ctor(string, int, int, Host.Location) -> Host.Crop"
target_call = "construct"
args = [
    { param = 0, via = "System.Convert::ToString(int) -> string" },
    { param = 1 },
    { param = 2 },
    { static_field = "Host.Game::currentLocation: Host.Location" },
]
init = [{ field = "Host.Crop::dead: bool", value = { constant = { type = "Bool", value = false } } }]

[[facade]]
id = "crop-new-day"
legacy = "Host.Crop::newDay(int, int) -> void"
call = "instance"
target = "Host.Crop::newDay(int) -> void"
target_call = "instance"
args = [{ receiver = true }, { param = 0 }]
"#;

        let registry = FacadeRegistry::from_toml_str(toml).unwrap();
        assert_eq!(registry.len(), 2);

        let ctor = registry.get("crop-ctor-seed").unwrap();
        assert_eq!(ctor.args.len(), 4);
        assert_eq!(ctor.init.len(), 1);
        assert!(!ctor.is_identity());

        let new_day = registry.get("crop-new-day").unwrap();
        assert_eq!(new_day.legacy_stack_arity(), 3);
    }

    #[test]
    fn test_default_args_forward_unchanged() {
        let toml = r#"
[[facade]]
id = "rename"
legacy = "Host.A::old(int) -> int"
call = "static"
target = "Host.A::new_name(int) -> int"
target_call = "static"
"#;
        let registry = FacadeRegistry::from_toml_str(toml).unwrap();
        assert!(registry.get("rename").unwrap().is_identity());
    }

    #[test]
    fn test_arity_mismatch_rejected() {
        let facade = FacadeDefinition::forwarding(
            "bad",
            sym("Host.A::f(int, int) -> void"),
            CallShape::Static,
            sym("Host.A::g(int) -> void"),
            CallShape::Static,
        );
        assert!(matches!(
            facade.validate(),
            Err(CompatError::InvalidFacade { .. })
        ));
    }

    #[test]
    fn test_receiver_on_static_rejected() {
        let mut facade = FacadeDefinition::forwarding(
            "bad",
            sym("Host.A::f(int) -> void"),
            CallShape::Static,
            sym("Host.A::g(int) -> void"),
            CallShape::Instance,
        );
        facade.args = vec![ArgSource::Receiver, ArgSource::Param(0)];
        assert!(facade.validate().is_err());
    }

    #[test]
    fn test_param_out_of_range_rejected() {
        let mut facade = FacadeDefinition::forwarding(
            "bad",
            sym("Host.A::f(int) -> void"),
            CallShape::Static,
            sym("Host.A::g(int) -> void"),
            CallShape::Static,
        );
        facade.args = vec![ArgSource::Param(3)];
        assert!(facade.validate().is_err());
    }

    #[test]
    fn test_constructor_shape_must_match() {
        let facade = FacadeDefinition::forwarding(
            "bad",
            sym("Host.A::make(int) -> Host.A"),
            CallShape::Construct,
            sym("Host.A::.ctor(int) -> Host.A"),
            CallShape::Construct,
        );
        assert!(facade.validate().is_err());
    }

    #[test]
    fn test_result_parity_required() {
        let extra_result = FacadeDefinition::forwarding(
            "extra-result",
            sym("Host.A::old(int) -> void"),
            CallShape::Static,
            sym("Host.A::new(int) -> int"),
            CallShape::Static,
        );
        assert!(!extra_result.is_identity());
        assert!(matches!(
            FacadeRegistry::new().register(extra_result),
            Err(CompatError::InvalidFacade { .. })
        ));

        let missing_result = FacadeDefinition::forwarding(
            "missing-result",
            sym("Host.A::make(int) -> Host.A"),
            CallShape::Static,
            sym("Host.A::init(int) -> void"),
            CallShape::Static,
        );
        assert!(missing_result.validate().is_err());

        // A static factory may forward to a constructor; both push one value.
        let factory = FacadeDefinition::forwarding(
            "factory",
            sym("Host.A::make(int) -> Host.A"),
            CallShape::Static,
            sym("Host.A::.ctor(int) -> Host.A"),
            CallShape::Construct,
        );
        assert!(factory.validate().is_ok());
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let facade = FacadeDefinition::forwarding(
            "dup",
            sym("Host.A::f(int) -> void"),
            CallShape::Static,
            sym("Host.A::g(int) -> void"),
            CallShape::Static,
        );
        let mut registry = FacadeRegistry::new();
        registry.register(facade.clone()).unwrap();
        assert!(matches!(
            registry.register(facade),
            Err(CompatError::DuplicateFacade(_))
        ));
    }
}
