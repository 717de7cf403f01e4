//! C2 — Facet + FacetManager.
//!
//! A facet is a contract-typed value bound to a kind: an append-only bag of
//! named operations plus the metadata the builder and resolver need
//! (overwrite flag, declared dependencies, optional contract). `FacetManager`
//! owns the live kind→facet map for one subsystem.
//!
//! Per the design notes' "runtime facet polymorphism" guidance, operations
//! are stored type-erased (`Box<dyn Any>`) and recovered by the caller's
//! known signature — there is no JS-style duck-typed dispatch in Rust, so
//! contract enforcement checks *presence* of named operations/properties
//! rather than dynamically invoking them.

use std::any::Any;
use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{codes, KernelError};

pub type Operation = Box<dyn Any + Send + Sync>;
type InitFn = Box<dyn Fn(&Facet) -> Result<(), KernelError> + Send + Sync>;
type DisposeFn = Box<dyn Fn() + Send + Sync>;

/// A contract-typed value bound to a kind.
pub struct Facet {
    kind: Cow<'static, str>,
    source: Cow<'static, str>,
    overwrite: bool,
    attach: bool,
    contract: Option<Cow<'static, str>>,
    dependencies: Vec<Cow<'static, str>>,
    ops: BTreeMap<Cow<'static, str>, Operation>,
    properties: BTreeSet<Cow<'static, str>>,
    init_fn: Option<InitFn>,
    dispose_fn: Option<DisposeFn>,
}

impl Facet {
    pub fn new(kind: impl Into<Cow<'static, str>>, source: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind: kind.into(),
            source: source.into(),
            overwrite: false,
            attach: false,
            contract: None,
            dependencies: Vec::new(),
            ops: BTreeMap::new(),
            properties: BTreeSet::new(),
            init_fn: None,
            dispose_fn: None,
        }
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn attach(mut self, attach: bool) -> Self {
        self.attach = attach;
        self
    }

    pub fn contract(mut self, contract: impl Into<Cow<'static, str>>) -> Self {
        self.contract = Some(contract.into());
        self
    }

    pub fn depends_on(mut self, kinds: impl IntoIterator<Item = Cow<'static, str>>) -> Self {
        self.dependencies.extend(kinds);
        self
    }

    /// Merges one named operation into the bag. Re-adding the same name
    /// replaces it, matching the "append-only builder" merge semantics.
    pub fn add_op(mut self, name: impl Into<Cow<'static, str>>, op: Operation) -> Self {
        self.ops.insert(name.into(), op);
        self
    }

    pub fn add_property(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.properties.insert(name.into());
        self
    }

    pub fn on_init(mut self, f: impl Fn(&Facet) -> Result<(), KernelError> + Send + Sync + 'static) -> Self {
        self.init_fn = Some(Box::new(f));
        self
    }

    pub fn on_dispose(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.dispose_fn = Some(Box::new(f));
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn should_overwrite(&self) -> bool {
        self.overwrite
    }

    pub fn is_attached(&self) -> bool {
        self.attach
    }

    pub fn contract_name(&self) -> Option<&str> {
        self.contract.as_deref()
    }

    pub fn dependencies(&self) -> &[Cow<'static, str>] {
        &self.dependencies
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.ops.contains_key(name)
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.properties.contains(name)
    }

    pub fn op<F: 'static>(&self, name: &str) -> Option<&F> {
        self.ops.get(name).and_then(|op| op.downcast_ref::<F>())
    }

    pub(crate) fn init(&self) -> Result<(), KernelError> {
        match &self.init_fn {
            Some(f) => f(self),
            None => Ok(()),
        }
    }

    pub(crate) fn dispose(&self) {
        if let Some(f) = &self.dispose_fn {
            f();
        }
    }
}

/// Options for a single `FacetManager::add_many` batch.
#[derive(Debug, Clone, Copy)]
pub struct AddManyOptions {
    pub init: bool,
    pub attach: bool,
}

impl Default for AddManyOptions {
    fn default() -> Self {
        Self { init: true, attach: true }
    }
}

/// Owns the live kind→facet map for one subsystem.
#[derive(Default)]
pub struct FacetManager {
    facets: BTreeMap<Cow<'static, str>, Facet>,
    attached: BTreeSet<Cow<'static, str>>,
}

impl FacetManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, kind: &str) -> Option<&Facet> {
        self.facets.get(kind)
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.facets.contains_key(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.facets.keys().map(|k| k.as_ref())
    }

    pub fn is_attached(&self, kind: &str) -> bool {
        self.attached.contains(kind)
    }

    /// Install a batch of facets in `kinds_in_order`, matching the builder's
    /// "exactly once per build, in kind order" contract. On failure, every
    /// facet touched by *this* call is rolled back to its pre-call state;
    /// facets installed by earlier calls are untouched (left for `dispose`).
    pub fn add_many(
        &mut self,
        kinds_in_order: &[Cow<'static, str>],
        mut facets_by_kind: BTreeMap<Cow<'static, str>, Facet>,
        options: AddManyOptions,
    ) -> Result<(), KernelError> {
        struct Backup {
            kind: Cow<'static, str>,
            previous: Option<Facet>,
            was_attached: bool,
        }

        let mut backups: Vec<Backup> = Vec::new();
        let mut installed: Vec<Cow<'static, str>> = Vec::new();

        let result: Result<(), KernelError> = (|| {
            for kind in kinds_in_order {
                let incoming = facets_by_kind.remove(kind).ok_or_else(|| {
                    KernelError::dependency(
                        codes::FACET_DUPLICATE,
                        format!("no facet produced for declared kind '{kind}'"),
                    )
                })?;

                if let Some(_existing) = self.facets.get(kind) {
                    if !incoming.should_overwrite() {
                        return Err(KernelError::dependency(
                            codes::FACET_DUPLICATE,
                            format!("duplicate facet for kind '{kind}' without overwrite"),
                        ));
                    }
                }

                let was_attached = self.attached.contains(kind);
                let previous = self.facets.remove(kind);
                backups.push(Backup { kind: kind.clone(), previous, was_attached });

                if options.attach && incoming.is_attached() {
                    self.attached.insert(kind.clone());
                }
                self.facets.insert(kind.clone(), incoming);
                installed.push(kind.clone());
            }

            if options.init {
                for kind in &installed {
                    let facet = self.facets.get(kind).expect("just installed");
                    facet.init()?;
                }
            }
            Ok(())
        })();

        if let Err(err) = result {
            for backup in backups.into_iter().rev() {
                match backup.previous {
                    Some(facet) => {
                        self.facets.insert(backup.kind.clone(), facet);
                    }
                    None => {
                        self.facets.remove(&backup.kind);
                    }
                }
                if backup.was_attached {
                    self.attached.insert(backup.kind);
                } else {
                    self.attached.remove(&backup.kind);
                }
            }
            return Err(err);
        }

        Ok(())
    }

    /// Calls `dispose` on every installed facet, in no particular order
    /// (disposal is not expected to depend on installation order).
    pub fn dispose_all(&mut self) {
        for facet in self.facets.values() {
            facet.dispose();
        }
        self.facets.clear();
        self.attached.clear();
    }
}
