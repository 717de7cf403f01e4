//! C7 — per-subsystem `Scheduler`: pluggable selection strategies over a
//! bounded queue, driven by a cooperative time slice.
//!
//! Grounded on the teacher's `pipeline::controller` orchestration loop
//! shape (accept → select → execute → re-check), generalized from a fixed
//! handler chain to a pluggable [`SchedulingStrategy`].

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::warn;

use crate::error::KernelError;
use crate::facet::FacetManager;
use crate::message::MessageId;
use crate::queue::BoundedQueue;
use crate::subsystem::processor::Processor;
use crate::subsystem::queue_facet::QueuedMessage;

/// Injectable message-complexity heuristic for the `load-based` strategy.
/// The default reads the sender-supplied `weight_hint` off each message's
/// options (falling back to a flat `1.0` when none was given) with a flat
/// penalty for atomic messages, matching §4.6's "body shape heuristics"
/// description — an application with a richer cost model (one that actually
/// inspects `item.msg`'s body) can supply its own.
pub trait ComplexityEstimator<B>: Send + Sync {
    fn estimate(&self, item: &QueuedMessage<B>) -> f64;
}

pub struct DefaultComplexityEstimator;

impl<B> ComplexityEstimator<B> for DefaultComplexityEstimator {
    fn estimate(&self, item: &QueuedMessage<B>) -> f64 {
        let base = if item.options.weight_hint > 0.0 { item.options.weight_hint } else { 1.0 };
        if item.options.atomic {
            base + 0.1
        } else {
            base
        }
    }
}

/// One of the four built-in selection rules, or an application-supplied
/// closure registered via [`Scheduler::register_strategy`].
#[derive(Clone)]
pub enum SchedulingStrategy<B> {
    Priority,
    Fifo,
    LoadBased,
    Adaptive,
    Custom(Arc<str>, Arc<dyn Fn(&[QueuedMessage<B>], &SelectionContext) -> Option<usize> + Send + Sync>),
}

impl<B> SchedulingStrategy<B> {
    pub fn name(&self) -> &str {
        match self {
            SchedulingStrategy::Priority => "priority",
            SchedulingStrategy::Fifo => "fifo",
            SchedulingStrategy::LoadBased => "load-based",
            SchedulingStrategy::Adaptive => "adaptive",
            SchedulingStrategy::Custom(name, _) => name,
        }
    }
}

/// Ambient inputs a strategy may consult besides the candidate slice
/// itself: queue utilization (for `adaptive`) and an injectable complexity
/// estimator (for `load-based`). Bundled so `select` stays a pure function
/// of `(candidates, context)`.
pub struct SelectionContext<'a> {
    pub utilization: f64,
    pub last_processed: &'a BTreeMap<MessageId, u64>,
}

/// Pure selection: returns the index into `candidates` the strategy would
/// run next, or `None` if `candidates` is empty.
pub fn select<B>(
    strategy: &SchedulingStrategy<B>,
    candidates: &[QueuedMessage<B>],
    ctx: &SelectionContext,
    estimator: &dyn ComplexityEstimator<B>,
) -> Option<usize> {
    if candidates.is_empty() {
        return None;
    }
    match strategy {
        SchedulingStrategy::Fifo => select_fifo(candidates),
        SchedulingStrategy::Priority => select_priority(candidates),
        SchedulingStrategy::LoadBased => select_load_based(candidates, estimator),
        SchedulingStrategy::Adaptive => {
            if ctx.utilization > 0.8 {
                select_load_based(candidates, estimator)
            } else if ctx.utilization > 0.4 {
                select_priority(candidates)
            } else {
                select_fifo(candidates)
            }
        }
        SchedulingStrategy::Custom(_, f) => f(candidates, ctx),
    }
}

fn select_fifo<B>(candidates: &[QueuedMessage<B>]) -> Option<usize> {
    candidates.iter().enumerate().min_by_key(|(_, c)| c.timestamp_ms()).map(|(i, _)| i)
}

/// Atomic messages first, then oldest timestamp first.
fn select_priority<B>(candidates: &[QueuedMessage<B>]) -> Option<usize> {
    candidates
        .iter()
        .enumerate()
        .min_by_key(|(_, c)| (!c.options.atomic, c.timestamp_ms()))
        .map(|(i, _)| i)
}

fn select_load_based<B>(candidates: &[QueuedMessage<B>], estimator: &dyn ComplexityEstimator<B>) -> Option<usize> {
    candidates
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            estimator.estimate(a).partial_cmp(&estimator.estimate(b)).unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|(i, _)| i)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SchedulerStatus {
    Ok,
    Paused,
}

#[derive(Debug, Clone)]
pub struct SchedulerReport {
    pub processed: usize,
    pub processing_time_ms: u64,
    pub errors: usize,
    pub status: SchedulerStatus,
}

/// Drains a shared bounded queue during a cooperative time slice,
/// dispatching each selected pair through the subsystem's `processor`
/// facet (resolved at call time, not cached, per §4.7/§4.9).
pub struct Scheduler<B> {
    queue: Arc<Mutex<BoundedQueue<QueuedMessage<B>>>>,
    facets: Arc<Mutex<FacetManager>>,
    strategy: Mutex<SchedulingStrategy<B>>,
    estimator: Arc<dyn ComplexityEstimator<B>>,
    max_messages_per_slice: usize,
    paused: AtomicBool,
    last_processed: Mutex<BTreeMap<MessageId, u64>>,
}

impl<B: Clone + Send + Sync + 'static> Scheduler<B> {
    pub fn new(
        queue: Arc<Mutex<BoundedQueue<QueuedMessage<B>>>>,
        facets: Arc<Mutex<FacetManager>>,
        max_messages_per_slice: usize,
    ) -> Self {
        Self {
            queue,
            facets,
            strategy: Mutex::new(SchedulingStrategy::Priority),
            estimator: Arc::new(DefaultComplexityEstimator),
            max_messages_per_slice,
            paused: AtomicBool::new(false),
            last_processed: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn with_estimator(mut self, estimator: Arc<dyn ComplexityEstimator<B>>) -> Self {
        self.estimator = estimator;
        self
    }

    /// Validates and installs a named built-in strategy. Unknown names fall
    /// back to `priority` with a warning, per §4.6.
    pub fn set_strategy_by_name(&self, name: &str) {
        let strategy = match name {
            "priority" => SchedulingStrategy::Priority,
            "fifo" => SchedulingStrategy::Fifo,
            "load-based" => SchedulingStrategy::LoadBased,
            "adaptive" => SchedulingStrategy::Adaptive,
            other => {
                warn!(strategy = other, "unknown scheduling strategy, falling back to priority");
                SchedulingStrategy::Priority
            }
        };
        *self.strategy.lock() = strategy;
    }

    /// Registers a custom strategy. `priority` is the one name this can
    /// never replace, per §4.6's `registerStrategy` contract.
    pub fn register_strategy(
        &self,
        name: impl Into<Arc<str>>,
        f: impl Fn(&[QueuedMessage<B>], &SelectionContext) -> Option<usize> + Send + Sync + 'static,
    ) -> Result<(), KernelError> {
        let name = name.into();
        if name.as_ref() == "priority" {
            return Err(KernelError::validation(
                crate::error::codes::ROUTING_NO_HANDLER,
                "cannot replace the built-in 'priority' strategy",
            ));
        }
        *self.strategy.lock() = SchedulingStrategy::Custom(name, Arc::new(f));
        Ok(())
    }

    pub fn pause_processing(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume_processing(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    fn resolve_processor(&self) -> Option<Arc<Mutex<Processor<B>>>> {
        let fm = self.facets.lock();
        fm.get("processor")?.op::<Arc<Mutex<Processor<B>>>>("instance").cloned()
    }

    /// Runs up to `max_messages_per_slice` selections within `time_slice_ms`.
    /// Each iteration re-reads the queue before removing the selected pair:
    /// the queue is the authoritative iterator (§9 Open Question 1), so a
    /// concurrent `drop-oldest` eviction can never select an already-gone
    /// item — a miss on `remove` just triggers a re-snapshot rather than
    /// silently skipping ahead.
    pub fn process(&self, time_slice_ms: u64) -> SchedulerReport {
        if self.is_paused() {
            return SchedulerReport { processed: 0, processing_time_ms: 0, errors: 0, status: SchedulerStatus::Paused };
        }

        let Some(processor) = self.resolve_processor() else {
            return SchedulerReport { processed: 0, processing_time_ms: 0, errors: 0, status: SchedulerStatus::Ok };
        };

        let started = Instant::now();
        let mut processed = 0usize;
        let mut errors = 0usize;

        while processed < self.max_messages_per_slice && (started.elapsed().as_millis() as u64) < time_slice_ms {
            let (snapshot, capacity) = {
                let q = self.queue.lock();
                (q.peek_all().cloned().collect::<Vec<_>>(), q.capacity())
            };
            if snapshot.is_empty() {
                break;
            }
            let utilization = snapshot.len() as f64 / capacity as f64;
            let last_processed = self.last_processed.lock();
            let selection_ctx = SelectionContext { utilization, last_processed: &last_processed };
            let strategy = self.strategy.lock().clone();
            let Some(idx) = select(&strategy, &snapshot, &selection_ctx, self.estimator.as_ref()) else {
                break;
            };
            drop(last_processed);
            let chosen = snapshot[idx].clone();

            let removed = self.queue.lock().remove(&chosen);
            if !removed {
                // Evicted between snapshot and removal; re-snapshot on the
                // next loop iteration rather than processing a stale item.
                continue;
            }

            self.last_processed.lock().insert(chosen.id().clone(), chosen.timestamp_ms());
            let result = processor.lock().process_message(chosen);
            processed += 1;
            if result.is_err() {
                errors += 1;
            }
        }

        let processing_time_ms = started.elapsed().as_millis() as u64;
        tracing::debug!(processed, errors, processing_time_ms, "scheduler.process");
        SchedulerReport { processed, processing_time_ms, errors, status: SchedulerStatus::Ok }
    }
}

pub fn strategy_name_from_config(ctx: &crate::ctx::CtxValue) -> Cow<'static, str> {
    ctx.get_path("config.scheduler.schedulingStrategy")
        .and_then(|v| v.as_str())
        .map(|s| Cow::Owned(s.to_string()))
        .unwrap_or(Cow::Borrowed("priority"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Message, Path, TraceId};
    use crate::queue::EvictionPolicy;
    use crate::security::SendOptions;

    fn queued(path: &str, atomic: bool) -> QueuedMessage<()> {
        let msg = Message::new(Path::parse(path).unwrap(), (), TraceId::generate());
        QueuedMessage::new(msg, SendOptions { atomic, ..Default::default() })
    }

    fn queued_with_weight(path: &str, weight_hint: f64) -> QueuedMessage<()> {
        let msg = Message::new(Path::parse(path).unwrap(), (), TraceId::generate());
        QueuedMessage::new(msg, SendOptions { weight_hint, ..Default::default() })
    }

    #[test]
    fn fifo_selects_oldest_timestamp() {
        let a = queued("a://x", false);
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = queued("a://y", false);
        let candidates = vec![a, b];
        let ctx = SelectionContext { utilization: 0.0, last_processed: &BTreeMap::new() };
        let idx = select(&SchedulingStrategy::Fifo, &candidates, &ctx, &DefaultComplexityEstimator);
        assert_eq!(idx, Some(0));
    }

    #[test]
    fn priority_prefers_atomic_over_older_non_atomic() {
        let non_atomic = queued("a://old", false);
        std::thread::sleep(std::time::Duration::from_millis(2));
        let atomic = queued("a://new", true);
        let candidates = vec![non_atomic, atomic];
        let ctx = SelectionContext { utilization: 0.0, last_processed: &BTreeMap::new() };
        let idx = select(&SchedulingStrategy::Priority, &candidates, &ctx, &DefaultComplexityEstimator);
        assert_eq!(idx, Some(1));
    }

    #[test]
    fn load_based_selects_the_lowest_weight_hint_regardless_of_arrival_order() {
        let heavy = queued_with_weight("a://heavy", 9.0);
        std::thread::sleep(std::time::Duration::from_millis(2));
        let light = queued_with_weight("a://light", 0.5);
        let candidates = vec![heavy, light];
        let ctx = SelectionContext { utilization: 0.0, last_processed: &BTreeMap::new() };
        let idx = select(&SchedulingStrategy::LoadBased, &candidates, &ctx, &DefaultComplexityEstimator);
        assert_eq!(idx, Some(1));
    }

    #[test]
    fn load_based_falls_back_to_an_equal_default_weight_when_no_hint_is_given() {
        let a = queued("a://x", false);
        let b = queued("a://y", false);
        let candidates = vec![a, b];
        let ctx = SelectionContext { utilization: 0.0, last_processed: &BTreeMap::new() };
        assert_eq!(DefaultComplexityEstimator.estimate(&candidates[0]), DefaultComplexityEstimator.estimate(&candidates[1]));
        // with no differentiating hint either index is a valid pick
        assert!(select(&SchedulingStrategy::LoadBased, &candidates, &ctx, &DefaultComplexityEstimator).is_some());
    }

    #[test]
    fn unknown_strategy_falls_back_to_priority() {
        let queue = Arc::new(Mutex::new(BoundedQueue::new(4, EvictionPolicy::Reject).unwrap()));
        let facets = Arc::new(Mutex::new(FacetManager::new()));
        let scheduler: Scheduler<()> = Scheduler::new(queue, facets, 4);
        scheduler.set_strategy_by_name("made-up-strategy");
        assert_eq!(scheduler.strategy.lock().name(), "priority");
    }

    #[test]
    fn register_strategy_rejects_replacing_priority() {
        let queue = Arc::new(Mutex::new(BoundedQueue::new(4, EvictionPolicy::Reject).unwrap()));
        let facets = Arc::new(Mutex::new(FacetManager::new()));
        let scheduler: Scheduler<()> = Scheduler::new(queue, facets, 4);
        let err = scheduler.register_strategy("priority", |_c, _ctx| None).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
    }
}
