//! Integration coverage for the builder's plan cache (`spec.md` §4.5 step 3,
//! §8 property 7) and ctx-driven rebuilds.

use std::borrow::Cow;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use mycelia_kernel::{Builder, ContractRegistry, CtxValue, Facet, FacetManager, HookDescriptor, PlanCache};

fn registry() -> Arc<ContractRegistry> {
    Arc::new(ContractRegistry::new())
}

fn counting_hook(calls: Arc<AtomicUsize>) -> HookDescriptor {
    HookDescriptor::new("queue", "test", move |ctx, _facets| {
        calls.fetch_add(1, Ordering::SeqCst);
        let capacity = ctx.get_path("config.capacity").and_then(|v| v.as_i64()).unwrap_or(1);
        Ok(Facet::new("queue", "test").add_op("capacity", Box::new(capacity)))
    })
    .require([Cow::Borrowed("kernelServices")])
}

#[test]
fn two_builders_sharing_a_cache_resolve_to_the_same_order_without_recomputing() {
    let shared_cache = Arc::new(Mutex::new(PlanCache::new(8)));

    let calls_a = Arc::new(AtomicUsize::new(0));
    let mut builder_a = Builder::new(CtxValue::map(), registry(), shared_cache.clone()).use_hook(counting_hook(calls_a.clone()));
    let plan_a = builder_a.plan().unwrap();

    let calls_b = Arc::new(AtomicUsize::new(0));
    let builder_b = Builder::new(CtxValue::map(), registry(), shared_cache.clone()).use_hook(counting_hook(calls_b.clone()));
    let plan_b = builder_b.plan().unwrap();

    assert_eq!(plan_a.ordered_kinds, plan_b.ordered_kinds);
    assert_eq!(plan_a.ordered_kinds, vec![Cow::Borrowed("queue")]);
}

#[test]
fn changing_ctx_triggers_a_rebuild_with_a_fresh_facet_value() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut builder = Builder::new(CtxValue::map(), registry(), Arc::new(Mutex::new(PlanCache::new(8))))
        .use_hook(counting_hook(calls.clone()));
    let mut fm = FacetManager::new();

    builder.build(&mut fm).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(*fm.get("queue").unwrap().op::<i64>("capacity").unwrap(), 1);

    let mut overlay = CtxValue::map();
    overlay.set_path("config.capacity", CtxValue::I64(5));
    builder.with_ctx(&overlay);
    builder.build(&mut fm).unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(*fm.get("queue").unwrap().op::<i64>("capacity").unwrap(), 5);
}

#[test]
fn repeat_build_with_unchanged_ctx_is_a_true_no_op() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut builder = Builder::new(CtxValue::map(), registry(), Arc::new(Mutex::new(PlanCache::new(8))))
        .use_hook(counting_hook(calls.clone()));
    let mut fm = FacetManager::new();

    builder.build(&mut fm).unwrap();
    builder.build(&mut fm).unwrap();
    builder.build(&mut fm).unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
