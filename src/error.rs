//! Crate-wide structured error type.

use std::fmt;

/// Coarse error taxonomy from the error handling design: the *kind* carries
/// propagation policy, the `code` carries a stable, machine-matchable string.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Dependency,
    Routing,
    Auth,
    Timeout,
    Capacity,
    Handler,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Dependency => "dependency",
            ErrorKind::Routing => "routing",
            ErrorKind::Auth => "auth",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Capacity => "capacity",
            ErrorKind::Handler => "handler",
        };
        f.write_str(s)
    }
}

/// The crate's sole error type. `code` is a stable string drawn from
/// [`codes`]; `message` is for humans; `cause` chains an underlying error
/// (e.g. a handler panic converted to an error, or a storage adapter
/// failure) without forcing callers to downcast.
pub struct KernelError {
    kind: ErrorKind,
    code: &'static str,
    message: String,
    cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl KernelError {
    pub fn new(kind: ErrorKind, code: &'static str, message: impl Into<String>) -> Self {
        Self { kind, code, message: message.into(), cause: None }
    }

    pub fn validation(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, code, message)
    }

    pub fn dependency(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Dependency, code, message)
    }

    pub fn routing(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Routing, code, message)
    }

    pub fn auth(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Auth, code, message)
    }

    pub fn timeout(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, code, message)
    }

    pub fn capacity(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Capacity, code, message)
    }

    pub fn handler(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Handler, code, message)
    }

    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Debug for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelError")
            .field("kind", &self.kind)
            .field("code", &self.code)
            .field("message", &self.message)
            .field("cause", &self.cause.as_ref().map(|c| c.to_string()))
            .finish()
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for KernelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_ref().map(|c| c.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Stable, namespaced error codes. Adapters match on these rather than on
/// `message`, which is free to change wording between releases.
pub mod codes {
    pub const QUEUE_INVALID_CAPACITY: &str = "capacity.invalid_capacity";
    pub const QUEUE_REJECTED: &str = "capacity.rejected";

    pub const FACET_DUPLICATE: &str = "dependency.duplicate_facet";
    pub const FACET_CONTRACT_VIOLATION: &str = "dependency.contract_violation";
    pub const FACET_NO_CONTRACT: &str = "dependency.no_contract";
    pub const FACET_MISSING_METHODS: &str = "dependency.missing_methods";
    pub const FACET_MISSING_PROPERTIES: &str = "dependency.missing_properties";
    pub const FACET_VALIDATION_FAILED: &str = "dependency.validation_failed";

    pub const HOOK_CYCLIC_DEPENDENCY: &str = "dependency.cyclic_dependency";
    pub const HOOK_MISSING_DEPENDENCY: &str = "dependency.missing_dependency";
    pub const HOOK_OVERWRITE_WITHOUT_BASE: &str = "dependency.overwrite_without_base";
    pub const HOOK_DUPLICATE_CONTRACT: &str = "dependency.duplicate_contract";

    pub const ROUTING_INVALID_PATH: &str = "routing.invalid_path";
    pub const ROUTING_UNKNOWN_SUBSYSTEM: &str = "routing.unknown_subsystem";
    pub const ROUTING_NO_HANDLER: &str = "routing.no_handler";
    pub const ROUTING_DUPLICATE_SUBSYSTEM: &str = "routing.duplicate_subsystem";

    pub const AUTH_PKR_MISMATCH: &str = "auth.pkr_mismatch";
    pub const AUTH_UNAUTHORIZED_SEND: &str = "auth.unauthorized_send";

    pub const RESPONSE_ALREADY_REGISTERED: &str = "timeout.already_registered";
    pub const RESPONSE_UNKNOWN_CORRELATION: &str = "timeout.unknown_correlation";
    pub const RESPONSE_ALREADY_RESOLVED: &str = "timeout.already_resolved";

    pub const HANDLER_THREW: &str = "handler.threw";
}
