//! The `listeners` contract: typed pub/sub over `(pattern, handler)` pairs
//! matched against message paths, glob-style. Per the design notes, this
//! models the original's "emitter" idiom as an observer interface rather
//! than an event-emitter object, so nothing here "leaks" as an ad hoc
//! `on`/`emit` pair with untyped payloads.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::message::Path;

pub type ListenerId = u64;

/// A single glob segment: `*` matches exactly one path segment, `**`
/// matches any number (including zero) of trailing segments.
fn glob_matches(pattern: &str, path: &Path) -> bool {
    let pattern_segments: Vec<&str> = pattern.split('/').collect();
    let path_segments: Vec<String> =
        std::iter::once(path.scheme().to_string()).chain(path.segments().iter().map(segment_str)).collect();

    fn segment_str(seg: &crate::message::PathSegment) -> String {
        match seg {
            crate::message::PathSegment::Literal(s) => s.clone(),
            crate::message::PathSegment::Param(s) => s.clone(),
        }
    }

    match_segments(&pattern_segments, &path_segments)
}

fn match_segments(pattern: &[&str], path: &[String]) -> bool {
    match (pattern.first(), path.first()) {
        (None, None) => true,
        (None, Some(_)) => false,
        (Some(&"**"), _) => {
            if pattern.len() == 1 {
                true
            } else {
                (0..=path.len()).any(|i| match_segments(&pattern[1..], &path[i..]))
            }
        }
        (Some(p), Some(s)) if *p == "*" || p == s => match_segments(&pattern[1..], &path[1..]),
        _ => false,
    }
}

struct Listener<B> {
    id: ListenerId,
    pattern: String,
    handler: Arc<dyn Fn(&crate::message::Message<B>) + Send + Sync>,
}

/// Typed pub/sub registry, one per subsystem. `on` subscribes a handler to
/// a glob pattern over message paths; `emit` invokes every matching
/// handler synchronously, in subscription order.
pub struct Listeners<B> {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<Listener<B>>>,
}

impl<B> Default for Listeners<B> {
    fn default() -> Self {
        Self { next_id: AtomicU64::new(1), subscribers: Mutex::new(Vec::new()) }
    }
}

impl<B> Listeners<B> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(
        &self,
        pattern: impl Into<String>,
        handler: Arc<dyn Fn(&crate::message::Message<B>) + Send + Sync>,
    ) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.subscribers.lock().push(Listener { id, pattern: pattern.into(), handler });
        id
    }

    pub fn off(&self, id: ListenerId) -> bool {
        let mut subs = self.subscribers.lock();
        if let Some(pos) = subs.iter().position(|l| l.id == id) {
            subs.remove(pos);
            true
        } else {
            false
        }
    }

    pub fn emit(&self, msg: &crate::message::Message<B>) {
        let matching: Vec<_> = self
            .subscribers
            .lock()
            .iter()
            .filter(|l| glob_matches(&l.pattern, msg.path()))
            .map(|l| l.handler.clone())
            .collect();
        for handler in matching {
            handler(msg);
        }
    }
}
