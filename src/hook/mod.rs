//! C4 — Hook Dependency Resolver: [`HookDescriptor`], the resolver itself
//! ([`resolver`]), and the dependency-graph plan cache.

pub mod resolver;

use std::borrow::Cow;
use std::num::NonZeroUsize;

use lru::LruCache;

use crate::ctx::CtxValue;
use crate::error::KernelError;
use crate::facet::Facet;

/// Read access to facets installed earlier in the same build, used by an
/// overwrite hook factory to wrap a base facet. Implemented by the
/// builder's `BuilderApi` (kept as a trait here so `hook` doesn't depend on
/// `builder`).
pub trait FacetLookup {
    fn previous(&self, kind: &str) -> Option<&Facet>;
}

type Factory = Box<dyn Fn(&CtxValue, &dyn FacetLookup) -> Result<Facet, KernelError> + Send + Sync>;

/// Metadata + factory for one `.use(hook)` registration.
pub struct HookDescriptor {
    pub kind: Cow<'static, str>,
    pub required: Vec<Cow<'static, str>>,
    pub overwrite: bool,
    pub attach: bool,
    pub contract: Option<Cow<'static, str>>,
    pub source: Cow<'static, str>,
    factory: Factory,
}

impl HookDescriptor {
    pub fn new(
        kind: impl Into<Cow<'static, str>>,
        source: impl Into<Cow<'static, str>>,
        factory: impl Fn(&CtxValue, &dyn FacetLookup) -> Result<Facet, KernelError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind: kind.into(),
            required: Vec::new(),
            overwrite: false,
            attach: false,
            contract: None,
            source: source.into(),
            factory: Box::new(factory),
        }
    }

    pub fn require(mut self, kinds: impl IntoIterator<Item = Cow<'static, str>>) -> Self {
        self.required.extend(kinds);
        self
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

    pub fn invoke(&self, ctx: &CtxValue, facets: &dyn FacetLookup) -> Result<Facet, KernelError> {
        (self.factory)(ctx, facets)
    }
}

/// A sorted, order-independent signature of a hook list's kinds/overwrite
/// flags/required kinds, used to key the dependency-graph cache. Two hook
/// lists with the same signature always resolve to the same edges, so the
/// cache can be shared across subsystems registering structurally
/// identical hook stacks.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KindSignature(Vec<(String, bool, Vec<String>)>);

impl KindSignature {
    pub fn from_hooks(hooks: &[HookDescriptor]) -> Self {
        let mut entries: Vec<(String, bool, Vec<String>)> = hooks
            .iter()
            .map(|h| {
                let mut required: Vec<String> = h.required.iter().map(|r| r.to_string()).collect();
                required.sort();
                (h.kind.to_string(), h.overwrite, required)
            })
            .collect();
        entries.sort();
        KindSignature(entries)
    }
}

/// A cheaply clonable stand-in for a resolver failure, suitable for caching
/// (unlike [`KernelError`], which may box a non-`Clone` cause).
#[derive(Debug, Clone)]
pub struct CachedResolverError {
    pub code: &'static str,
    pub message: String,
}

impl CachedResolverError {
    pub fn into_kernel_error(self) -> KernelError {
        KernelError::dependency(self.code, self.message)
    }
}

/// A resolved order, recorded as the sequence of kinds rather than raw
/// indices. Two hook lists sharing a [`KindSignature`] carry the same
/// multiset of kinds but not necessarily the same registration order, so
/// indices computed against one list's `Vec<HookDescriptor>` would be
/// meaningless (or silently wrong) applied to another's; callers remap this
/// back to indices against their own hook list via [`PlanCacheEntry::resolve_indices`].
#[derive(Debug, Clone)]
pub enum PlanCacheEntry {
    Valid(Vec<Cow<'static, str>>),
    Invalid(CachedResolverError),
}

impl PlanCacheEntry {
    /// Remaps a cached kind order onto `hooks`'s own indices, consuming each
    /// kind's positions in `hooks` in original registration order. Safe
    /// whenever `hooks` shares a `KindSignature` with whatever produced
    /// `kind_order`, since the signature fixes the per-kind multiplicity.
    pub fn resolve_indices(kind_order: &[Cow<'static, str>], hooks: &[HookDescriptor]) -> Vec<usize> {
        let mut by_kind: std::collections::BTreeMap<&str, std::collections::VecDeque<usize>> =
            std::collections::BTreeMap::new();
        for (i, hook) in hooks.iter().enumerate() {
            by_kind.entry(hook.kind.as_ref()).or_default().push_back(i);
        }
        kind_order
            .iter()
            .map(|kind| {
                by_kind
                    .get_mut(kind.as_ref())
                    .and_then(|q| q.pop_front())
                    .expect("cached kind order must match the hook list's own kind multiset")
            })
            .collect()
    }
}

/// Fixed-capacity LRU cache from [`KindSignature`] to a resolved (or
/// rejected) execution order. See `spec.md` §4.5 step 3.
pub struct PlanCache {
    inner: LruCache<KindSignature, PlanCacheEntry>,
}

impl PlanCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap());
        Self { inner: LruCache::new(capacity) }
    }

    pub fn get(&mut self, signature: &KindSignature) -> Option<PlanCacheEntry> {
        self.inner.get(signature).cloned()
    }

    pub fn put(&mut self, signature: KindSignature, entry: PlanCacheEntry) {
        self.inner.put(signature, entry);
    }
}
