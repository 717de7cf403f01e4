//! A registered message-handling unit: queue, scheduler, processor, router,
//! listeners, and hierarchy facets composed by a [`Builder`] from a fixed
//! default hook bundle. See `spec.md` §4.
//!
//! Grounded on the teacher's `host::Worker` composition root (one struct
//! tying a `LayeredConfiguration`, a dispatch loop, and lifecycle hooks
//! together), generalized from "one worker, one dispatch loop" to "one
//! subsystem, six interdependent facets".

pub mod hierarchy;
pub mod listeners;
pub mod processor;
pub mod queue_facet;
pub mod router;
pub mod scheduler;

use std::borrow::Cow;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::builder::Builder;
use crate::ctx::CtxValue;
use crate::error::KernelError;
use crate::facet::{Facet, FacetManager};
use crate::hook::{FacetLookup, HookDescriptor, PlanCache};
use crate::message::Message;
use crate::queue::{BoundedQueue, EvictionPolicy};
use crate::registry::ContractRegistry;
use crate::security::SendOptions;

use self::hierarchy::HierarchyNode;
use self::listeners::{ListenerId, Listeners};
use self::processor::{Processor, ProcessorStats};
use self::queue_facet::QueuedMessage;
use self::router::{RouteHandler, Router};
use self::scheduler::{Scheduler, SchedulerReport};

pub const DEFAULT_QUEUE_CAPACITY: usize = 256;
pub const DEFAULT_MAX_MESSAGES_PER_SLICE: usize = 32;

fn queue_capacity_from_config(ctx: &CtxValue) -> usize {
    ctx.get_path("config.queue.capacity")
        .and_then(|v| v.as_i64())
        .filter(|n| *n > 0)
        .map(|n| n as usize)
        .unwrap_or(DEFAULT_QUEUE_CAPACITY)
}

fn queue_policy_from_config(ctx: &CtxValue) -> EvictionPolicy {
    match ctx.get_path("config.queue.evictionPolicy").and_then(|v| v.as_str()) {
        Some("drop-oldest") => EvictionPolicy::DropOldest,
        Some("drop-newest") => EvictionPolicy::DropNewest,
        _ => EvictionPolicy::Reject,
    }
}

fn max_messages_per_slice_from_config(ctx: &CtxValue) -> usize {
    ctx.get_path("config.scheduler.maxMessagesPerSlice")
        .and_then(|v| v.as_i64())
        .filter(|n| *n > 0)
        .map(|n| n as usize)
        .unwrap_or(DEFAULT_MAX_MESSAGES_PER_SLICE)
}

/// One subsystem's live state: direct typed handles to each facet's real
/// implementation (used by this struct's own methods) plus the
/// `FacetManager` those same handles are mirrored into as marker +
/// `"instance"` ops (used by contract enforcement and cross-subsystem
/// introspection). See `facet.rs`'s module doc for why both exist.
pub struct Subsystem<B> {
    name: Cow<'static, str>,
    facets: Arc<Mutex<FacetManager>>,
    builder: Builder,
    queue: Arc<Mutex<BoundedQueue<QueuedMessage<B>>>>,
    router: Arc<Mutex<Router<B>>>,
    processor: Arc<Mutex<Processor<B>>>,
    scheduler: Arc<Mutex<Scheduler<B>>>,
    listeners: Arc<Listeners<B>>,
    hierarchy: Arc<HierarchyNode>,
    /// Subsystems attached via `register_child`, kept alongside the
    /// `hierarchy` facet's tree links so `Kernel::register_subsystem` has
    /// something concrete to walk when recursively wiring identity +
    /// routing for declared children (§4.9).
    children: Mutex<Vec<Arc<Subsystem<B>>>>,
}

fn marker_facet(kind: &'static str, source: &'static str, methods: &[&'static str]) -> Facet {
    methods.iter().fold(Facet::new(kind, source), |facet, name| facet.add_op(*name, Box::new(())))
}

impl<B: Clone + Send + Sync + 'static> Subsystem<B> {
    /// Builds a new subsystem's default facet set (queue, router, processor,
    /// scheduler, listeners, hierarchy) and runs it through `contracts`,
    /// failing the whole construction if any contract is violated (§4.2).
    pub fn new(
        name: impl Into<Cow<'static, str>>,
        base_ctx: CtxValue,
        contracts: Arc<ContractRegistry>,
        dependency_cache: Arc<Mutex<PlanCache>>,
    ) -> Result<Self, KernelError> {
        let name = name.into();
        let capacity = queue_capacity_from_config(&base_ctx);
        let policy = queue_policy_from_config(&base_ctx);
        let max_per_slice = max_messages_per_slice_from_config(&base_ctx);

        let queue = Arc::new(Mutex::new(BoundedQueue::new(capacity, policy)?));
        let facets: Arc<Mutex<FacetManager>> = Arc::new(Mutex::new(FacetManager::new()));
        let router: Arc<Mutex<Router<B>>> = Arc::new(Mutex::new(Router::new()));
        let processor = Arc::new(Mutex::new(Processor::new(queue.clone(), facets.clone())));
        let scheduler = Arc::new(Mutex::new(Scheduler::new(queue.clone(), facets.clone(), max_per_slice)));
        let listeners: Arc<Listeners<B>> = Arc::new(Listeners::new());
        let hierarchy = HierarchyNode::root(name.to_string());

        let hooks = vec![
            {
                let queue = queue.clone();
                HookDescriptor::new("queue", "subsystem::default", move |_ctx, _facets: &dyn FacetLookup| {
                    Ok(marker_facet("queue", "subsystem::default", &["enqueue", "dequeue", "peek_all", "size", "capacity"])
                        .contract("queue")
                        .add_op("instance", Box::new(queue.clone())))
                })
            },
            {
                let router = router.clone();
                HookDescriptor::new("router", "subsystem::default", move |_ctx, _facets: &dyn FacetLookup| {
                    Ok(marker_facet(
                        "router",
                        "subsystem::default",
                        &["register_route", "unregister_route", "match_path", "route", "has_route", "get_routes"],
                    )
                    .contract("router")
                    .add_op("instance", Box::new(router.clone())))
                })
            },
            {
                let processor = processor.clone();
                HookDescriptor::new("processor", "subsystem::default", move |_ctx, _facets: &dyn FacetLookup| {
                    Ok(marker_facet(
                        "processor",
                        "subsystem::default",
                        &["accept", "process_message", "process_immediately", "process_tick"],
                    )
                    .contract("processor")
                    .add_op("instance", Box::new(processor.clone())))
                })
                .require([Cow::Borrowed("queue"), Cow::Borrowed("router")])
            },
            {
                let scheduler = scheduler.clone();
                HookDescriptor::new("scheduler", "subsystem::default", move |_ctx, _facets: &dyn FacetLookup| {
                    Ok(marker_facet(
                        "scheduler",
                        "subsystem::default",
                        &["process", "set_strategy", "pause_processing", "resume_processing", "is_paused"],
                    )
                    .contract("scheduler")
                    .add_op("instance", Box::new(scheduler.clone())))
                })
                .require([Cow::Borrowed("queue"), Cow::Borrowed("processor")])
            },
            {
                let listeners = listeners.clone();
                HookDescriptor::new("listeners", "subsystem::default", move |_ctx, _facets: &dyn FacetLookup| {
                    Ok(marker_facet("listeners", "subsystem::default", &["on", "off", "emit"])
                        .contract("listeners")
                        .add_op("instance", Box::new(listeners.clone())))
                })
            },
            {
                let hierarchy = hierarchy.clone();
                HookDescriptor::new("hierarchy", "subsystem::default", move |_ctx, _facets: &dyn FacetLookup| {
                    Ok(marker_facet("hierarchy", "subsystem::default", &["children", "register_child", "parent"])
                        .contract("hierarchy")
                        .add_op("instance", Box::new(hierarchy.clone())))
                })
            },
        ];

        let mut builder = hooks.into_iter().fold(Builder::new(base_ctx, contracts, dependency_cache), Builder::use_hook);
        {
            let mut fm = facets.lock();
            builder.build(&mut fm)?;
        }

        Ok(Self { name, facets, builder, queue, router, processor, scheduler, listeners, hierarchy, children: Mutex::new(Vec::new()) })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn facets(&self) -> Arc<Mutex<FacetManager>> {
        self.facets.clone()
    }

    pub fn hierarchy(&self) -> &Arc<HierarchyNode> {
        &self.hierarchy
    }

    pub fn listeners(&self) -> &Arc<Listeners<B>> {
        &self.listeners
    }

    pub fn queue(&self) -> Arc<Mutex<BoundedQueue<QueuedMessage<B>>>> {
        self.queue.clone()
    }

    pub fn router(&self) -> Arc<Mutex<Router<B>>> {
        self.router.clone()
    }

    pub fn scheduler(&self) -> Arc<Mutex<Scheduler<B>>> {
        self.scheduler.clone()
    }

    pub fn processor(&self) -> Arc<Mutex<Processor<B>>> {
        self.processor.clone()
    }

    /// Merges `partial` into this subsystem's ctx and re-runs the hook
    /// chain; a no-op if nothing observable about ctx or hooks changed
    /// since the last build (`Builder::build`'s memoization).
    pub fn with_ctx(&mut self, partial: &CtxValue) -> Result<(), KernelError> {
        self.builder.with_ctx(partial);
        let mut fm = self.facets.lock();
        self.builder.build(&mut fm)
    }

    pub fn use_hook(mut self, hook: HookDescriptor) -> Result<Self, KernelError> {
        self.builder = self.builder.use_hook(hook);
        {
            let mut fm = self.facets.lock();
            self.builder.build(&mut fm)?;
        }
        Ok(self)
    }

    pub fn register_route(&self, pattern: &str, handler: RouteHandler<B>) -> Result<(), KernelError> {
        self.router.lock().register_route(pattern, handler, None)
    }

    pub fn unregister_route(&self, pattern: &str) -> bool {
        self.router.lock().unregister_route(pattern)
    }

    /// Enqueues `{msg, opts}` for later draining by `process`.
    pub fn accept(&self, msg: Message<B>, opts: SendOptions) -> bool {
        self.processor.lock().accept(msg, opts)
    }

    /// Bypasses the queue and runs synchronously, per §4.9/§9 Open Question 3.
    pub fn process_immediately(&self, msg: Message<B>, opts: SendOptions) -> Result<Option<B>, KernelError> {
        self.processor.lock().process_immediately(msg, opts)
    }

    pub fn process(&self, time_slice_ms: u64) -> SchedulerReport {
        self.scheduler.lock().process(time_slice_ms)
    }

    pub fn processor_stats(&self) -> ProcessorStats {
        self.processor.lock().stats()
    }

    pub fn on(&self, pattern: impl Into<String>, handler: Arc<dyn Fn(&Message<B>) + Send + Sync>) -> ListenerId {
        self.listeners.on(pattern, handler)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.listeners.off(id)
    }

    /// Attaches `child` under this subsystem in the parent/child tree
    /// (§4.5), re-parenting it if it already had a different parent, and
    /// records it as a declared child so a subsequent `Kernel::
    /// register_subsystem` on `self` recursively wires identity + routing
    /// for `child` too (§4.9).
    pub fn register_child(&self, child: Arc<Subsystem<B>>) {
        self.hierarchy.attach_child(&child.hierarchy);
        self.children.lock().push(child);
    }

    /// Subsystems attached via `register_child`, in registration order.
    pub fn declared_children(&self) -> Vec<Arc<Subsystem<B>>> {
        self.children.lock().clone()
    }
}
