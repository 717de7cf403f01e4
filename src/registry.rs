//! C3 — Contract Registry.
//!
//! Maps a contract name to the minimal surface (required operation and
//! property names) the core relies on, plus an optional custom validator.
//! The registry is an explicit dependency passed to the [`crate::builder::Builder`]
//! rather than a process-wide singleton, per the design notes' "global
//! state" re-architecture guidance — tests can supply an alternate registry.

use std::borrow::Cow;
use std::collections::BTreeMap;

use crate::ctx::CtxValue;
use crate::error::{codes, KernelError};
use crate::facet::Facet;

/// A facet-level custom validator. Narrower than the original's
/// `(ctx, api, subsystem, facet)` signature: the builder and subsystem
/// handles aren't needed by any contract the core ships, so the validator
/// is given the resolved ctx and the facet directly.
pub type Validator = Box<dyn Fn(&CtxValue, &Facet) -> Result<(), KernelError> + Send + Sync>;

pub struct ContractSpec {
    name: Cow<'static, str>,
    required_methods: Vec<Cow<'static, str>>,
    required_properties: Vec<Cow<'static, str>>,
    validator: Option<Validator>,
}

impl ContractSpec {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self { name: name.into(), required_methods: Vec::new(), required_properties: Vec::new(), validator: None }
    }

    pub fn require_method(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.required_methods.push(name.into());
        self
    }

    pub fn require_property(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.required_properties.push(name.into());
        self
    }

    pub fn with_validator(
        mut self,
        validator: impl Fn(&CtxValue, &Facet) -> Result<(), KernelError> + Send + Sync + 'static,
    ) -> Self {
        self.validator = Some(Box::new(validator));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Explicit, non-singleton registry of contract specifications.
#[derive(Default)]
pub struct ContractRegistry {
    contracts: BTreeMap<Cow<'static, str>, ContractSpec>,
}

impl ContractRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The seven mandatory contracts every `MessageSystem`/subsystem build
    /// relies on. See `spec.md` §4.3 and §6.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry
            .register(
                ContractSpec::new("queue")
                    .require_method("enqueue")
                    .require_method("dequeue")
                    .require_method("peek_all")
                    .require_method("size")
                    .require_method("capacity"),
            )
            .expect("default contracts never collide");
        registry
            .register(
                ContractSpec::new("router")
                    .require_method("register_route")
                    .require_method("unregister_route")
                    .require_method("match_path")
                    .require_method("route")
                    .require_method("has_route")
                    .require_method("get_routes"),
            )
            .expect("default contracts never collide");
        registry
            .register(
                ContractSpec::new("processor")
                    .require_method("accept")
                    .require_method("process_message")
                    .require_method("process_immediately")
                    .require_method("process_tick"),
            )
            .expect("default contracts never collide");
        registry
            .register(
                ContractSpec::new("scheduler")
                    .require_method("process")
                    .require_method("set_strategy")
                    .require_method("pause_processing")
                    .require_method("resume_processing")
                    .require_method("is_paused"),
            )
            .expect("default contracts never collide");
        registry
            .register(ContractSpec::new("listeners").require_method("on").require_method("off").require_method("emit"))
            .expect("default contracts never collide");
        registry
            .register(
                ContractSpec::new("hierarchy")
                    .require_method("children")
                    .require_method("register_child")
                    .require_method("parent"),
            )
            .expect("default contracts never collide");
        registry
            .register(
                ContractSpec::new("server")
                    .require_method("start")
                    .require_method("stop")
                    .require_method("is_running"),
            )
            .expect("default contracts never collide");
        registry
    }

    pub fn register(&mut self, spec: ContractSpec) -> Result<(), KernelError> {
        if self.contracts.contains_key(spec.name()) {
            return Err(KernelError::dependency(
                codes::HOOK_DUPLICATE_CONTRACT,
                format!("contract '{}' already registered", spec.name()),
            ));
        }
        self.contracts.insert(Cow::Owned(spec.name().to_string()), spec);
        Ok(())
    }

    pub fn enforce(&self, name: &str, ctx: &CtxValue, facet: &Facet) -> Result<(), KernelError> {
        let spec = self
            .contracts
            .get(name)
            .ok_or_else(|| KernelError::dependency(codes::FACET_NO_CONTRACT, format!("unknown contract '{name}'")))?;

        for method in &spec.required_methods {
            if !facet.has_method(method) {
                return Err(KernelError::dependency(
                    codes::FACET_MISSING_METHODS,
                    format!("facet '{}' missing required method '{method}' for contract '{name}'", facet.kind()),
                ));
            }
        }
        for property in &spec.required_properties {
            if !facet.has_property(property) {
                return Err(KernelError::dependency(
                    codes::FACET_MISSING_PROPERTIES,
                    format!("facet '{}' missing required property '{property}' for contract '{name}'", facet.kind()),
                ));
            }
        }
        if let Some(validator) = &spec.validator {
            validator(ctx, facet).map_err(|cause| {
                KernelError::dependency(
                    codes::FACET_VALIDATION_FAILED,
                    format!("contract '{name}' custom validation failed: {cause}"),
                )
                .with_cause(cause)
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_covers_seven_mandatory_contracts() {
        let registry = ContractRegistry::with_defaults();
        for name in ["router", "queue", "processor", "scheduler", "listeners", "hierarchy", "server"] {
            assert!(registry.contracts.contains_key(name), "missing contract {name}");
        }
    }

    #[test]
    fn enforce_fails_on_unknown_contract() {
        let registry = ContractRegistry::new();
        let facet = Facet::new("queue", "test");
        let err = registry.enforce("queue", &CtxValue::map(), &facet).unwrap_err();
        assert_eq!(err.code(), codes::FACET_NO_CONTRACT);
    }

    #[test]
    fn enforce_fails_on_missing_method() {
        let registry = ContractRegistry::with_defaults();
        let facet = Facet::new("queue", "test").add_op("enqueue", Box::new(()));
        let err = registry.enforce("queue", &CtxValue::map(), &facet).unwrap_err();
        assert_eq!(err.code(), codes::FACET_MISSING_METHODS);
    }

    #[test]
    fn enforce_runs_custom_validator() {
        let mut registry = ContractRegistry::new();
        registry
            .register(ContractSpec::new("custom").with_validator(|_ctx, _facet| {
                Err(KernelError::dependency(codes::FACET_VALIDATION_FAILED, "always fails"))
            }))
            .unwrap();
        let facet = Facet::new("x", "test");
        let err = registry.enforce("custom", &CtxValue::map(), &facet).unwrap_err();
        assert_eq!(err.code(), codes::FACET_VALIDATION_FAILED);
    }
}
