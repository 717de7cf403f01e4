//! C9 — per-subsystem `Router` facet: path → handler registry with
//! `{param}` extraction.
//!
//! Grounded on the teacher's `router::route::{RouteId, RoutePattern}`
//! segment model, narrowed to the flat `scheme://literal|{param}` grammar
//! `spec.md` §6 actually specifies (no `RouteKind`/wildcard dimension).
//! Route tables are insertion-ordered `Vec`s matched linearly — adequate at
//! the per-subsystem scale (`spec.md` §4.8 calls out "tens, not thousands"
//! of routes), so a trie is not worth the complexity.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::ctx::CtxValue;
use crate::error::{codes, KernelError};
use crate::message::{Message, Path, PathSegment};
use crate::security::SendOptions;

pub type RouteParams = BTreeMap<String, String>;

pub type RouteHandler<B> = Arc<dyn Fn(&Message<B>, &RouteParams, &SendOptions) -> Result<B, KernelError> + Send + Sync>;

/// One registered route: the parsed pattern, its handler, and bookkeeping
/// needed for the specificity tiebreak in `Router::match_path`.
pub struct RouteEntry<B> {
    raw_pattern: String,
    segments: Vec<PathSegment>,
    handler: RouteHandler<B>,
    metadata: CtxValue,
    insertion_index: usize,
}

impl<B> RouteEntry<B> {
    pub fn pattern(&self) -> &str {
        &self.raw_pattern
    }

    pub fn metadata(&self) -> &CtxValue {
        &self.metadata
    }

    fn param_count(&self) -> usize {
        self.segments.iter().filter(|s| matches!(s, PathSegment::Param(_))).count()
    }
}

/// Parse a route pattern's segments, reusing [`Path`]'s `{name}` grammar.
/// The pattern's own scheme is accepted but not otherwise meaningful here:
/// a subsystem's router only ever sees messages the `MessageSystemRouter`
/// already dispatched to it by scheme, so only `segments()` is compared.
fn parse_pattern(pattern: &str) -> Result<Vec<PathSegment>, KernelError> {
    Ok(Path::parse(pattern)?.segments().to_vec())
}

/// Path→handler registry for one subsystem. See `spec.md` §4.8.
pub struct Router<B> {
    routes: Vec<RouteEntry<B>>,
    next_index: usize,
}

impl<B> Default for Router<B> {
    fn default() -> Self {
        Self { routes: Vec::new(), next_index: 0 }
    }
}

impl<B> Router<B> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_route(
        &mut self,
        pattern: &str,
        handler: RouteHandler<B>,
        metadata: Option<CtxValue>,
    ) -> Result<(), KernelError> {
        let segments = parse_pattern(pattern)?;
        let entry = RouteEntry {
            raw_pattern: pattern.to_string(),
            segments,
            handler,
            metadata: metadata.unwrap_or_default(),
            insertion_index: self.next_index,
        };
        self.next_index += 1;
        self.routes.push(entry);
        Ok(())
    }

    /// Removes the first route registered under `pattern`. Leaves
    /// `get_routes()` bit-identical to the pre-registration snapshot, per
    /// `spec.md` §8's round-trip property.
    pub fn unregister_route(&mut self, pattern: &str) -> bool {
        if let Some(pos) = self.routes.iter().position(|r| r.raw_pattern == pattern) {
            self.routes.remove(pos);
            true
        } else {
            false
        }
    }

    pub fn has_route(&self, pattern: &str) -> bool {
        self.routes.iter().any(|r| r.raw_pattern == pattern)
    }

    pub fn get_routes(&self) -> &[RouteEntry<B>] {
        &self.routes
    }

    /// Matches `path`'s segments against every registered pattern and picks
    /// the most specific match: more literal segments first, then fewer
    /// parameters, then a longer pattern, with ties broken by insertion
    /// order (§4.8).
    pub fn match_path(&self, path: &Path) -> Option<(&RouteEntry<B>, RouteParams)> {
        let mut best: Option<(&RouteEntry<B>, RouteParams)> = None;
        let mut best_key: Option<(usize, std::cmp::Reverse<usize>, usize)> = None;

        for entry in &self.routes {
            if entry.segments.len() != path.segments().len() {
                continue;
            }
            let mut params = RouteParams::new();
            let mut matched = true;
            for (pattern_seg, path_seg) in entry.segments.iter().zip(path.segments()) {
                match (pattern_seg, path_seg) {
                    (PathSegment::Literal(a), PathSegment::Literal(b)) if a == b => {}
                    (PathSegment::Param(name), PathSegment::Literal(value)) => {
                        params.insert(name.clone(), value.clone());
                    }
                    (PathSegment::Param(name), PathSegment::Param(value)) => {
                        params.insert(name.clone(), value.clone());
                    }
                    _ => {
                        matched = false;
                        break;
                    }
                }
            }
            if !matched {
                continue;
            }
            let key = (entry.param_count(), std::cmp::Reverse(entry.segments.len()), entry.insertion_index);
            if best_key.is_none() || key < *best_key.as_ref().unwrap() {
                best_key = Some(key);
                best = Some((entry, params));
            }
        }
        best
    }

    /// Resolves the matching route and invokes its handler. `Ok(None)`
    /// means no route matched; `Err` propagates a handler failure up to
    /// the processor, which counts it and does not retry.
    pub fn route(&self, msg: &Message<B>, opts: &SendOptions) -> Result<Option<B>, KernelError> {
        match self.match_path(msg.path()) {
            Some((entry, params)) => match (entry.handler)(msg, &params, opts) {
                Ok(value) => Ok(Some(value)),
                Err(err) => Err(err),
            },
            None => Ok(None),
        }
    }
}

/// Constructs a `KernelError` for "no route matched and caller required
/// one", used by callers that treat an unmatched path as fatal (the
/// processor itself treats it as a non-error `None`).
pub fn no_handler_error(path: &str) -> KernelError {
    KernelError::routing(codes::ROUTING_NO_HANDLER, format!("no route registered matching '{path}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::TraceId;

    fn msg<B: Default>(path: &str) -> Message<B> {
        Message::new(Path::parse(path).unwrap(), B::default(), TraceId::generate())
    }

    #[test]
    fn registers_and_matches_literal_route() {
        let mut router: Router<&'static str> = Router::new();
        router.register_route("user://get", Arc::new(|_m, _p, _o| Ok("ok")), None).unwrap();
        let m = msg::<()>("user://get");
        let (entry, params) = router.match_path(m.path()).unwrap();
        assert_eq!(entry.pattern(), "user://get");
        assert!(params.is_empty());
    }

    #[test]
    fn extracts_param_from_matched_segment() {
        let mut router: Router<String> = Router::new();
        router
            .register_route(
                "user://get/{id}",
                Arc::new(|_m, params, _o| Ok(params.get("id").cloned().unwrap_or_default())),
                None,
            )
            .unwrap();
        let m = msg("user://get/42");
        let result = router.route(&m, &SendOptions::default()).unwrap();
        assert_eq!(result, Some("42".to_string()));
    }

    #[test]
    fn unmatched_path_returns_none_without_error() {
        let router: Router<()> = Router::new();
        let m = msg("user://missing");
        assert_eq!(router.route(&m, &SendOptions::default()).unwrap(), None);
    }

    #[test]
    fn more_literal_segments_win_over_param_segments() {
        let mut router: Router<&'static str> = Router::new();
        router.register_route("user://get/{id}", Arc::new(|_m, _p, _o| Ok("param")), None).unwrap();
        router.register_route("user://get/42", Arc::new(|_m, _p, _o| Ok("literal")), None).unwrap();
        let m = msg("user://get/42");
        assert_eq!(router.route(&m, &SendOptions::default()).unwrap(), Some("literal"));
    }

    #[test]
    fn unregister_then_get_routes_matches_pre_registration_snapshot() {
        let mut router: Router<()> = Router::new();
        let before: Vec<String> = router.get_routes().iter().map(|r| r.pattern().to_string()).collect();
        router.register_route("user://get", Arc::new(|_m, _p, _o| Ok(())), None).unwrap();
        assert!(router.unregister_route("user://get"));
        let after: Vec<String> = router.get_routes().iter().map(|r| r.pattern().to_string()).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn handler_error_propagates() {
        let mut router: Router<()> = Router::new();
        router
            .register_route(
                "user://fail",
                Arc::new(|_m, _p, _o| Err(KernelError::handler(codes::HANDLER_THREW, "boom"))),
                None,
            )
            .unwrap();
        let m = msg("user://fail");
        let err = router.route(&m, &SendOptions::default()).unwrap_err();
        assert_eq!(err.code(), codes::HANDLER_THREW);
    }
}
