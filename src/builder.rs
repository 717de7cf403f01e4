//! C5 — Builder: compiles a subsystem's hook list into a live facet set.
//!
//! Grounded on the teacher's `configuration::builder::LayeredConfiguration`
//! (ctx layering, version-gated recompute) generalized from "layers of
//! config" to "layers of hook-produced facets".

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::ctx::{CtxHash, CtxValue};
use crate::error::KernelError;
use crate::facet::{AddManyOptions, Facet, FacetManager};
use crate::hook::resolver;
use crate::hook::{FacetLookup, HookDescriptor, KindSignature, PlanCache, PlanCacheEntry, CachedResolverError};
use crate::registry::ContractRegistry;

/// A resolved, fully-executed build plan: every hook factory in
/// `ordered_kinds` has already run against `resolved_ctx`.
pub struct Plan {
    pub ctx_hash: CtxHash,
    pub resolved_ctx: CtxValue,
    pub ordered_kinds: Vec<Cow<'static, str>>,
    pub facets_by_kind: BTreeMap<Cow<'static, str>, Facet>,
}

/// View of facets produced earlier in the same plan pass, handed to hook
/// factories so an overwrite hook can wrap a base facet (`api.__facets` in
/// the design notes' terms).
struct BuilderApi<'a> {
    facets_so_far: &'a BTreeMap<Cow<'static, str>, Facet>,
}

impl<'a> FacetLookup for BuilderApi<'a> {
    fn previous(&self, kind: &str) -> Option<&Facet> {
        self.facets_so_far.get(kind)
    }
}

/// Compiles one subsystem's hook list into a live [`FacetManager`] state.
pub struct Builder {
    base_ctx: CtxValue,
    working_ctx: CtxValue,
    hooks: Vec<HookDescriptor>,
    contracts: Arc<ContractRegistry>,
    dependency_cache: Arc<Mutex<PlanCache>>,
    /// Marks the `(ctx hash, hook signature)` pair already installed by a
    /// prior `build()`, so a repeat build with nothing changed is a true
    /// no-op (no factory re-execution, no `FacetManager` churn).
    last_built: Option<(CtxHash, KindSignature)>,
}

impl Builder {
    pub fn new(base_ctx: CtxValue, contracts: Arc<ContractRegistry>, dependency_cache: Arc<Mutex<PlanCache>>) -> Self {
        Self { working_ctx: base_ctx.clone(), base_ctx, hooks: Vec::new(), contracts, dependency_cache, last_built: None }
    }

    pub fn use_hook(mut self, hook: HookDescriptor) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Deep-merges `partial` into the working ctx (nested maps merge, lists
    /// replace). Does not itself force recomputation: the next `plan()`
    /// naturally recomputes because the ctx hash changes.
    pub fn with_ctx(&mut self, partial: &CtxValue) -> &mut Self {
        self.working_ctx = self.working_ctx.merge(partial);
        self
    }

    /// Forces the next `build()` to recompute and reinstall, even if
    /// nothing about ctx or the hook list has actually changed.
    pub fn invalidate(&mut self) {
        self.last_built = None;
    }

    /// Resets ctx to the subsystem's base configuration and drops the
    /// cached build marker.
    pub fn clear_ctx(&mut self) {
        self.working_ctx = self.base_ctx.clone();
        self.last_built = None;
    }

    /// Resolves ctx, orders hooks (via the shared dependency-graph cache),
    /// and runs every hook factory, recording and contract-checking its
    /// facet. Always re-executes factories — the *per-subsystem* "reuse the
    /// plan unconditionally" shortcut lives in [`Builder::build`], which
    /// skips calling `plan()`'s expensive work entirely when nothing
    /// observable has changed since the last successful build.
    pub fn plan(&self) -> Result<Plan, KernelError> {
        let resolved_ctx = self.working_ctx.clone();
        let ctx_hash = resolved_ctx.hash();
        let signature = KindSignature::from_hooks(&self.hooks);

        let order = {
            let mut cache = self.dependency_cache.lock();
            match cache.get(&signature) {
                Some(PlanCacheEntry::Valid(kind_order)) => Ok(PlanCacheEntry::resolve_indices(&kind_order, &self.hooks)),
                Some(PlanCacheEntry::Invalid(cached_err)) => Err(cached_err.into_kernel_error()),
                None => {
                    let result = resolver::resolve(&self.hooks);
                    let cache_entry = match &result {
                        Ok(order) => {
                            PlanCacheEntry::Valid(order.iter().map(|&i| self.hooks[i].kind.clone()).collect())
                        }
                        Err(err) => PlanCacheEntry::Invalid(CachedResolverError { code: err.code(), message: err.message().to_string() }),
                    };
                    cache.put(signature, cache_entry);
                    result
                }
            }
        }?;

        let mut facets_by_kind: BTreeMap<Cow<'static, str>, Facet> = BTreeMap::new();
        let mut ordered_kinds = Vec::with_capacity(order.len());
        for index in order {
            let hook = &self.hooks[index];
            let facet = {
                let api = BuilderApi { facets_so_far: &facets_by_kind };
                hook.invoke(&resolved_ctx, &api)?
            };
            if let Some(contract_name) = hook.contract.as_deref().or_else(|| facet.contract_name()) {
                self.contracts.enforce(contract_name, &resolved_ctx, &facet)?;
            }
            ordered_kinds.push(hook.kind.clone());
            facets_by_kind.insert(hook.kind.clone(), facet);
        }

        Ok(Plan { ctx_hash, resolved_ctx, ordered_kinds, facets_by_kind })
    }

    /// Executes a plan into `facet_manager`. Checks the `(ctx hash, hook
    /// signature)` marker from the last successful build *before* calling
    /// `plan()` — an unchanged pair short-circuits to a true no-op without
    /// invoking a single hook factory, matching `plan()`'s own doc comment.
    /// Otherwise plans (re-running every factory) and, per kind: skips if
    /// already installed and not an overwrite (idempotent rebuild), else
    /// installs, with `init`/`attach` run exactly once per build via
    /// `FacetManager::add_many`.
    pub fn build(&mut self, facet_manager: &mut FacetManager) -> Result<(), KernelError> {
        let ctx_hash = self.working_ctx.hash();
        let signature = KindSignature::from_hooks(&self.hooks);
        if self.last_built.as_ref() == Some(&(ctx_hash, signature.clone())) {
            return Ok(());
        }

        let plan = self.plan()?;
        let Plan { ctx_hash, ordered_kinds, mut facets_by_kind, .. } = plan;
        let mut install_order = Vec::new();
        let mut install_batch = BTreeMap::new();

        for kind in ordered_kinds {
            let facet = facets_by_kind.remove(&kind).expect("plan produces a facet per ordered kind");
            let already_present = facet_manager.contains(&kind);
            if already_present && !facet.should_overwrite() {
                continue;
            }
            install_order.push(kind.clone());
            install_batch.insert(kind, facet);
        }

        tracing::debug!(kinds = ?install_order, ctx_hash = %ctx_hash, "subsystem.build");
        facet_manager.add_many(&install_order, install_batch, AddManyOptions::default())?;
        self.last_built = Some((ctx_hash, signature));
        Ok(())
    }
}
