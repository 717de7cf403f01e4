//! Message data model: identity, path grammar, and metadata.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

use crate::ctx::CtxValue;
use crate::error::{codes, ErrorKind, KernelError};

/// Stable message identity, also used as the response-correlation id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageId(Cow<'static, str>);

impl MessageId {
    pub fn generate() -> Self {
        MessageId(Cow::Owned(Uuid::new_v4().to_string()))
    }

    pub fn new(id: impl Into<Cow<'static, str>>) -> Self {
        MessageId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// End-to-end trace identifier, carried in metadata and inherited by child
/// messages so a caller can follow a request across subsystem boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TraceId(Cow<'static, str>);

impl TraceId {
    pub fn generate() -> Self {
        TraceId(Cow::Owned(Uuid::new_v4().to_string()))
    }

    /// Inherit a parent message's trace id, as required by the data model's
    /// "traceId present... unless inherited from a parent message" rule.
    pub fn inherit(parent: &TraceId) -> Self {
        parent.clone()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for TraceId {
    type Error = KernelError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        if value.is_empty() {
            return Err(KernelError::validation(
                codes::ROUTING_INVALID_PATH,
                "trace id must not be empty",
            ));
        }
        Ok(TraceId(Cow::Owned(value.to_string())))
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A single path segment: either a literal or a `{name}` capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Literal(String),
    Param(String),
}

/// A parsed `scheme://segment(/segment)*` path.
///
/// Grounded on the teacher's route-segment splitting approach
/// (`router::route::RouteSegment`), adapted to the flat `scheme + segments`
/// shape this kernel's paths use instead of a multi-kind route id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    scheme: String,
    segments: Vec<PathSegment>,
    raw: String,
}

impl Path {
    pub fn parse(raw: &str) -> Result<Self, KernelError> {
        let (scheme, rest) = raw.split_once("://").ok_or_else(|| {
            KernelError::routing(codes::ROUTING_INVALID_PATH, format!("missing '://' in path: {raw}"))
        })?;
        if scheme.is_empty() || !is_valid_scheme(scheme) {
            return Err(KernelError::routing(
                codes::ROUTING_INVALID_PATH,
                format!("invalid scheme in path: {raw}"),
            ));
        }
        let segments = if rest.is_empty() {
            Vec::new()
        } else {
            rest.split('/')
                .map(|s| {
                    if let Some(name) = s.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                        PathSegment::Param(name.to_string())
                    } else {
                        PathSegment::Literal(s.to_string())
                    }
                })
                .collect()
        };
        Ok(Path { scheme: scheme.to_string(), segments, raw: raw.to_string() })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn is_valid_scheme(scheme: &str) -> bool {
    let mut chars = scheme.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// Fixed (immutable after construction) and mutable metadata maps, plus the
/// two fields accessed on every hot path.
#[derive(Debug, Clone)]
pub struct MessageMetadata {
    trace_id: TraceId,
    timestamp_ms: u64,
    fixed: BTreeMap<Cow<'static, str>, CtxValue>,
    mutable: BTreeMap<Cow<'static, str>, CtxValue>,
}

impl MessageMetadata {
    pub fn new(trace_id: TraceId) -> Self {
        Self { trace_id, timestamp_ms: now_millis(), fixed: BTreeMap::new(), mutable: BTreeMap::new() }
    }

    pub fn trace_id(&self) -> &TraceId {
        &self.trace_id
    }

    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    pub fn with_fixed(mut self, key: impl Into<Cow<'static, str>>, value: CtxValue) -> Self {
        self.fixed.insert(key.into(), value);
        self
    }

    pub fn custom_field(&self, key: &str) -> Option<&CtxValue> {
        self.fixed.get(key)
    }

    pub fn custom_mutable_field(&self, key: &str) -> Option<&CtxValue> {
        self.mutable.get(key)
    }

    pub fn set_mutable_field(&mut self, key: impl Into<Cow<'static, str>>, value: CtxValue) {
        self.mutable.insert(key.into(), value);
    }

    pub fn mutable_fields(&self) -> &BTreeMap<Cow<'static, str>, CtxValue> {
        &self.mutable
    }
}

/// A dispatched message, generic over a body type chosen by the embedding
/// application. Kernel-internal traffic (`kernel://...`) uses that same body
/// type through the [`crate::kernel::KernelPayload`] trait.
#[derive(Debug, Clone)]
pub struct Message<B> {
    id: MessageId,
    path: Path,
    body: B,
    meta: MessageMetadata,
}

impl<B> Message<B> {
    pub fn new(path: Path, body: B, trace_id: TraceId) -> Self {
        Self { id: MessageId::generate(), path, body, meta: MessageMetadata::new(trace_id) }
    }

    /// Construct a child message inheriting the parent's trace id, per the
    /// data model's message-lifecycle rule.
    pub fn child(parent: &MessageMetadata, path: Path, body: B) -> Self {
        Self::new(path, body, TraceId::inherit(parent.trace_id()))
    }

    pub fn id(&self) -> &MessageId {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn body(&self) -> &B {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut B {
        &mut self.body
    }

    pub fn meta(&self) -> &MessageMetadata {
        &self.meta
    }

    pub fn meta_mut(&mut self) -> &mut MessageMetadata {
        &mut self.meta
    }
}

use std::fmt;

#[derive(Debug, Clone)]
pub enum ErrorQueryKind {
    Recent,
    ByType(String),
    Summary,
}

impl ErrorKind {
    /// Maps an error kind onto the stable `kernel://error/record/{type}`
    /// path segment used when the kernel records a classified error.
    pub fn record_segment(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Dependency => "dependency",
            ErrorKind::Routing => "routing",
            ErrorKind::Auth => "auth_failed",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Capacity => "capacity",
            ErrorKind::Handler => "handler",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scheme_and_literal_segments() {
        let p = Path::parse("user://get/42").unwrap();
        assert_eq!(p.scheme(), "user");
        assert_eq!(p.segments(), &[PathSegment::Literal("get".into()), PathSegment::Literal("42".into())]);
    }

    #[test]
    fn parses_param_segments() {
        let p = Path::parse("user://get/{id}").unwrap();
        assert_eq!(p.segments(), &[PathSegment::Literal("get".into()), PathSegment::Param("id".into())]);
    }

    #[test]
    fn rejects_missing_scheme_separator() {
        assert!(Path::parse("not-a-path").is_err());
    }

    #[test]
    fn rejects_invalid_scheme_chars() {
        assert!(Path::parse("User://get").is_err());
    }

    #[test]
    fn kernel_scheme_is_recognized() {
        let p = Path::parse("kernel://error/record/auth_failed").unwrap();
        assert_eq!(p.scheme(), "kernel");
    }

    #[test]
    fn child_message_inherits_trace_id() {
        let parent = MessageMetadata::new(TraceId::generate());
        let child: Message<()> = Message::child(&parent, Path::parse("a://b").unwrap(), ());
        assert_eq!(child.meta().trace_id(), parent.trace_id());
    }
}
