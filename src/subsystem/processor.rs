//! C8 — `Processor`: accepts, routes, and records statistics for every
//! message delivered to a subsystem.
//!
//! Grounded on the teacher's `pipeline::controller` dispatch loop, narrowed
//! to the four operations §4.7 specifies (`accept`, `process_message`,
//! `process_immediately`, `process_tick`).

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::error::{ErrorKind, KernelError};
use crate::facet::FacetManager;
use crate::message::Message;
use crate::queue::BoundedQueue;
use crate::security::SendOptions;
use crate::subsystem::queue_facet::QueuedMessage;
use crate::subsystem::router::Router;

#[derive(Debug, Clone, Default)]
pub struct ProcessorStats {
    pub processed: u64,
    pub errors: u64,
    pub processing_time_ms: u64,
}

/// Invoked instead of propagating, whenever routing surfaces an
/// authentication failure — §4.7's "never throw auth failures out of the
/// processor" rule. The kernel wires this to emit
/// `kernel://error/record/auth_failed`.
pub type ErrorSink = Arc<dyn Fn(&KernelError) + Send + Sync>;

pub struct Processor<B> {
    queue: Arc<Mutex<BoundedQueue<QueuedMessage<B>>>>,
    facets: Arc<Mutex<FacetManager>>,
    stats: Mutex<ProcessorStats>,
    error_sink: Option<ErrorSink>,
}

impl<B> Processor<B> {
    pub fn new(queue: Arc<Mutex<BoundedQueue<QueuedMessage<B>>>>, facets: Arc<Mutex<FacetManager>>) -> Self {
        Self { queue, facets, stats: Mutex::new(ProcessorStats::default()), error_sink: None }
    }

    pub fn with_error_sink(mut self, sink: ErrorSink) -> Self {
        self.error_sink = Some(sink);
        self
    }

    /// Installs (or replaces) the error sink on an already-constructed
    /// processor. Used by `Kernel::register_subsystem` to wire a
    /// subsystem's auth-failure reporting after the subsystem itself has
    /// already been built, since a `Subsystem`'s processor lives behind a
    /// shared `Arc<Mutex<_>>` by the time the kernel sees it.
    pub fn set_error_sink(&mut self, sink: ErrorSink) {
        self.error_sink = Some(sink);
    }

    pub fn stats(&self) -> ProcessorStats {
        self.stats.lock().clone()
    }

    /// Enqueues `{msg, opts}`; returns `false` if the queue's eviction
    /// policy rejected it (capacity pressure, §5).
    pub fn accept(&self, msg: Message<B>, opts: SendOptions) -> bool {
        self.queue.lock().enqueue(QueuedMessage::new(msg, opts))
    }

    /// Re-resolves the `router` facet from the live `FacetManager` on every
    /// call — not cached at construction — so an overwrite router installed
    /// later in the hook chain is always the one invoked (§4.7, §4.9).
    fn resolve_router(&self) -> Option<Arc<Mutex<Router<B>>>> {
        let fm = self.facets.lock();
        fm.get("router")?.op::<Arc<Mutex<Router<B>>>>("instance").cloned()
    }

    /// Routes and executes one already-dequeued pair, sanitizing `opts`
    /// (stripping the internal caller marker) before the handler sees it.
    pub fn process_message(&self, pair: QueuedMessage<B>) -> Result<Option<B>, KernelError> {
        let QueuedMessage { msg, options } = pair;
        let sanitized = options.sanitized();

        let Some(router) = self.resolve_router() else {
            let err = KernelError::routing(crate::error::codes::ROUTING_NO_HANDLER, "no router facet installed");
            self.stats.lock().errors += 1;
            return Err(err);
        };

        let started = Instant::now();
        let result = router.lock().route(&msg, &sanitized);
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(_) => {
                let mut stats = self.stats.lock();
                stats.processed += 1;
                stats.processing_time_ms += elapsed_ms;
            }
            Err(err) if err.kind() == ErrorKind::Auth => {
                if let Some(sink) = &self.error_sink {
                    sink(err);
                }
                self.stats.lock().errors += 1;
                return Ok(None);
            }
            Err(_) => {
                self.stats.lock().errors += 1;
            }
        }
        result
    }

    /// Bypasses the queue entirely and runs synchronously (`kernel://`
    /// paths, or an explicit `opts.process_immediately`).
    pub fn process_immediately(&self, msg: Message<B>, opts: SendOptions) -> Result<Option<B>, KernelError> {
        self.process_message(QueuedMessage::new(msg, opts))
    }

    /// Dequeues and processes exactly one pair, if any is present.
    pub fn process_tick(&self) -> Option<Result<Option<B>, KernelError>> {
        let next = self.queue.lock().dequeue()?;
        Some(self.process_message(next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facet::Facet;
    use crate::message::{Path, TraceId};
    use crate::queue::EvictionPolicy;
    use std::borrow::Cow;

    fn install_router(facets: &Arc<Mutex<FacetManager>>, router: Router<&'static str>) {
        let mut order = Vec::new();
        let mut batch = std::collections::BTreeMap::new();
        let instance: Arc<Mutex<Router<&'static str>>> = Arc::new(Mutex::new(router));
        let facet = Facet::new("router", "test").add_op("instance", Box::new(instance));
        order.push(Cow::Borrowed("router"));
        batch.insert(Cow::Borrowed("router"), facet);
        facets.lock().add_many(&order, batch, Default::default()).unwrap();
    }

    #[test]
    fn accept_then_tick_invokes_matched_handler() {
        let queue = Arc::new(Mutex::new(BoundedQueue::new(4, EvictionPolicy::Reject).unwrap()));
        let facets = Arc::new(Mutex::new(FacetManager::new()));
        let mut router = Router::new();
        router.register_route("user://get", Arc::new(|_m, _p, _o| Ok("handled")), None).unwrap();
        install_router(&facets, router);

        let processor = Processor::new(queue, facets);
        let msg = Message::new(Path::parse("user://get").unwrap(), "get", TraceId::generate());
        assert!(processor.accept(msg, SendOptions::default()));

        let result = processor.process_tick().unwrap().unwrap();
        assert_eq!(result, Some("handled"));
        assert_eq!(processor.stats().processed, 1);
    }

    #[test]
    fn missing_router_facet_is_an_error() {
        let queue = Arc::new(Mutex::new(BoundedQueue::new(4, EvictionPolicy::Reject).unwrap()));
        let facets = Arc::new(Mutex::new(FacetManager::new()));
        let processor: Processor<()> = Processor::new(queue, facets);
        let msg = Message::new(Path::parse("user://get").unwrap(), (), TraceId::generate());
        assert!(processor.process_immediately(msg, SendOptions::default()).is_err());
    }

    #[test]
    fn auth_failure_is_swallowed_not_propagated() {
        let queue = Arc::new(Mutex::new(BoundedQueue::new(4, EvictionPolicy::Reject).unwrap()));
        let facets = Arc::new(Mutex::new(FacetManager::new()));
        let mut router = Router::new();
        router
            .register_route(
                "user://secure",
                Arc::new(|_m, _p, _o| Err(KernelError::auth(crate::error::codes::AUTH_PKR_MISMATCH, "nope"))),
                None,
            )
            .unwrap();
        install_router(&facets, router);

        let recorded = Arc::new(Mutex::new(Vec::new()));
        let recorded_clone = recorded.clone();
        let processor: Processor<&'static str> = Processor::new(queue, facets)
            .with_error_sink(Arc::new(move |err| recorded_clone.lock().push(err.code().to_string())));

        let msg = Message::new(Path::parse("user://secure").unwrap(), "secure", TraceId::generate());
        let result = processor.process_immediately(msg, SendOptions::default()).unwrap();
        assert_eq!(result, None);
        assert_eq!(recorded.lock().as_slice(), [crate::error::codes::AUTH_PKR_MISMATCH]);
    }
}
