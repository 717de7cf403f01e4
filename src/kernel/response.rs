//! C12 — `ResponseManager`: pending-response bookkeeping and timeout
//! enforcement for messages sent with `response_required`.
//!
//! Grounded on the teacher's `runtime::timer::TimeDriver`, generalized to
//! [`ResponseClock`] so tests can inject a virtual clock instead of
//! sleeping wall-clock time (`spec.md` §4.10, §9 Open Question 2).

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{codes, KernelError};
use crate::message::Message;

/// Priority-ordered list of places a correlation id may be found on an
/// inbound response message. `extract_correlation_id` walks this list in
/// order and returns the first hit — the public, documented resolution of
/// `spec.md` §9 Open Question 2.
const CORRELATION_ID_SOURCES: &[&str] =
    &["body.inReplyTo", "body.correlationId", "meta.inReplyTo", "meta.correlationId", "msg.inReplyTo", "msg.correlationId"];

/// Implemented by application body types that carry their own correlation
/// fields. The default no-op impl means a body type that doesn't carry
/// correlation data simply contributes nothing to the `body.*` sources —
/// the `meta.*`/`msg.*` sources still work for it.
pub trait CorrelationFields {
    fn in_reply_to(&self) -> Option<&str> {
        None
    }

    fn correlation_id(&self) -> Option<&str> {
        None
    }
}

/// Abstraction over "wait this long", generalizing the teacher's
/// `TimeDriver` so response timeouts can be driven by a real clock in
/// production and a virtual one (`tokio::time::pause`/`advance`) in tests.
#[async_trait::async_trait]
pub trait ResponseClock: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Drives timeouts with the real `tokio` clock.
pub struct TokioClock;

#[async_trait::async_trait]
impl ResponseClock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Resolves `msg`'s correlation id by walking [`CORRELATION_ID_SOURCES`] in
/// order. `meta.*` reads the mutable metadata map; `msg.*` reads the fixed
/// metadata map — the data model's two `BTreeMap<Cow<'static, str>,
/// CtxValue>` splits from `message.rs`.
pub fn extract_correlation_id<B: CorrelationFields>(msg: &Message<B>) -> Option<String> {
    if let Some(id) = msg.body().in_reply_to() {
        return Some(id.to_string());
    }
    if let Some(id) = msg.body().correlation_id() {
        return Some(id.to_string());
    }
    if let Some(id) = msg.meta().custom_mutable_field("inReplyTo").and_then(|v| v.as_str()) {
        return Some(id.to_string());
    }
    if let Some(id) = msg.meta().custom_mutable_field("correlationId").and_then(|v| v.as_str()) {
        return Some(id.to_string());
    }
    if let Some(id) = msg.meta().custom_field("inReplyTo").and_then(|v| v.as_str()) {
        return Some(id.to_string());
    }
    if let Some(id) = msg.meta().custom_field("correlationId").and_then(|v| v.as_str()) {
        return Some(id.to_string());
    }
    None
}

struct PendingEntry<B> {
    reply_to: Cow<'static, str>,
    sender: Option<oneshot::Sender<Result<Message<B>, KernelError>>>,
}

/// Pending-response table keyed by correlation id (the originating
/// message's id, by convention). A registered wait resolves exactly once,
/// either via [`ResponseManager::handle_response`] or via its own timeout.
pub struct ResponseManager<B> {
    pending: Arc<Mutex<BTreeMap<String, PendingEntry<B>>>>,
    clock: Arc<dyn ResponseClock>,
}

impl<B: Send + 'static> ResponseManager<B> {
    pub fn new(clock: Arc<dyn ResponseClock>) -> Self {
        Self { pending: Arc::new(Mutex::new(BTreeMap::new())), clock }
    }

    pub fn with_tokio_clock() -> Self {
        Self::new(Arc::new(TokioClock))
    }

    pub fn correlation_id_sources() -> &'static [&'static str] {
        CORRELATION_ID_SOURCES
    }

    /// Registers a pending response for `correlation_id`, bound to
    /// `reply_to` for diagnostics, and spawns a timeout task via the
    /// configured clock. Must be called from within a `tokio` runtime.
    /// Returns a receiver the caller awaits for either the real response or
    /// a synthetic `ErrorKind::Timeout` if none arrives in time.
    pub fn register_response_required_for(
        &self,
        correlation_id: impl Into<String>,
        reply_to: impl Into<Cow<'static, str>>,
        timeout_ms: u64,
    ) -> Result<oneshot::Receiver<Result<Message<B>, KernelError>>, KernelError> {
        let correlation_id = correlation_id.into();
        let (tx, rx) = oneshot::channel();

        {
            let mut pending = self.pending.lock();
            if pending.contains_key(&correlation_id) {
                return Err(KernelError::timeout(
                    codes::RESPONSE_ALREADY_REGISTERED,
                    format!("a pending response is already registered for '{correlation_id}'"),
                ));
            }
            pending.insert(correlation_id.clone(), PendingEntry { reply_to: reply_to.into(), sender: Some(tx) });
        }

        let pending = self.pending.clone();
        let clock = self.clock.clone();
        let timeout_id = correlation_id.clone();
        tokio::spawn(async move {
            clock.sleep(Duration::from_millis(timeout_ms)).await;
            let mut pending = pending.lock();
            if let Some(mut entry) = pending.remove(&timeout_id) {
                if let Some(sender) = entry.sender.take() {
                    tracing::warn!(correlation_id = %timeout_id, reply_to = %entry.reply_to, timeout_ms, "response.timeout");
                    let _ = sender.send(Err(KernelError::timeout(
                        codes::RESPONSE_UNKNOWN_CORRELATION,
                        format!("no response received for '{timeout_id}' within {timeout_ms}ms"),
                    )));
                }
            }
        });

        Ok(rx)
    }

    /// Resolves the pending response matching `msg`'s correlation id, per
    /// [`extract_correlation_id`]. Returns an error if nothing is pending
    /// under that id (an already-timed-out or never-registered wait) — the
    /// caller (kernel dispatch) is expected to swallow this, not propagate
    /// it as a hard failure.
    pub fn handle_response(&self, msg: Message<B>) -> Result<(), KernelError>
    where
        B: CorrelationFields,
    {
        let correlation_id = extract_correlation_id(&msg).ok_or_else(|| {
            KernelError::validation(codes::RESPONSE_UNKNOWN_CORRELATION, "response message carries no correlation id")
        })?;

        let mut entry = {
            let mut pending = self.pending.lock();
            pending.remove(&correlation_id)
        }
        .ok_or_else(|| {
            KernelError::timeout(
                codes::RESPONSE_UNKNOWN_CORRELATION,
                format!("no pending response registered for '{correlation_id}'"),
            )
        })?;

        if let Some(sender) = entry.sender.take() {
            let _ = sender.send(Ok(msg));
            Ok(())
        } else {
            Err(KernelError::timeout(codes::RESPONSE_ALREADY_RESOLVED, format!("'{correlation_id}' was already resolved")))
        }
    }

    /// Cancels a pending wait without resolving it (the receiver observes a
    /// dropped sender). Returns `false` if nothing was pending.
    pub fn cancel(&self, correlation_id: &str) -> bool {
        self.pending.lock().remove(correlation_id).is_some()
    }

    pub fn reply_to(&self, correlation_id: &str) -> Option<Cow<'static, str>> {
        self.pending.lock().get(correlation_id).map(|e| e.reply_to.clone())
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Drops every pending wait without resolving it, for kernel shutdown.
    pub fn dispose(&self) {
        self.pending.lock().clear();
    }
}
