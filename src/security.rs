//! C6 — Principal + PKR + Identity: the authenticated-sender abstraction
//! the kernel gate checks before dispatching a protected message.
//!
//! Grounded on the teacher's `security::{identity,credential,policy}`
//! module split (identity vs. credential vs. authorization policy), with
//! the policy surface narrowed to the r/rw/rwg lattice `spec.md`'s
//! Non-goals explicitly keep in scope (no hardened permission algebra).

use std::borrow::Cow;
use std::collections::BTreeMap;

use uuid::Uuid;

use crate::error::{codes, KernelError};
use crate::message::Message;

/// Public-key record uniquely identifying a principal. Non-goals exclude a
/// hardened crypto layer, so this is an opaque comparable identifier rather
/// than an actual asymmetric key — adapters that need real signing can wrap
/// one in a richer credential type without changing this shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pkr(Uuid);

impl Pkr {
    pub fn generate() -> Self {
        Pkr(Uuid::new_v4())
    }
}

impl fmt::Display for Pkr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pkr:{}", self.0)
    }
}

use std::fmt;

/// What kind of entity a [`Principal`] represents, mirroring the roles a
/// registered subsystem can hold in the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrincipalKind {
    Kernel,
    TopLevelSubsystem,
    Child,
    Friend,
    Resource,
}

/// An entity record: the kind of thing it is, its PKR, and the subsystem
/// instance it's bound to (if any).
#[derive(Debug, Clone)]
pub struct Principal {
    kind: PrincipalKind,
    pkr: Pkr,
    instance_binding: Option<Cow<'static, str>>,
}

impl Principal {
    pub fn new(kind: PrincipalKind, instance_binding: Option<Cow<'static, str>>) -> Self {
        Self { kind, pkr: Pkr::generate(), instance_binding }
    }

    pub fn kind(&self) -> PrincipalKind {
        self.kind
    }

    pub fn pkr(&self) -> Pkr {
        self.pkr
    }

    pub fn instance_binding(&self) -> Option<&str> {
        self.instance_binding.as_deref()
    }
}

/// A permission-checked sender bound to a principal's PKR. Each registered
/// subsystem has exactly one identity; rotating keys replaces the PKR but
/// reuses the identity object unless explicitly revoked.
#[derive(Debug, Clone)]
pub struct Identity {
    pkr: Pkr,
    revoked: bool,
}

impl Identity {
    pub fn new(pkr: Pkr) -> Self {
        Self { pkr, revoked: false }
    }

    pub fn pkr(&self) -> Pkr {
        self.pkr
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked
    }

    pub fn revoke(&mut self) {
        self.revoked = true;
    }

    /// Rotate this identity's key, replacing the PKR while keeping the
    /// identity object itself (per the data model's key-rotation
    /// invariant), unless it has been revoked.
    pub fn rotate(&mut self, new_pkr: Pkr) -> Result<(), KernelError> {
        if self.revoked {
            return Err(KernelError::auth(codes::AUTH_PKR_MISMATCH, "cannot rotate a revoked identity"));
        }
        self.pkr = new_pkr;
        Ok(())
    }

    /// Authenticated send, delegated to whatever implements the kernel's
    /// send gate. Kept here (rather than requiring callers to reach into
    /// the kernel directly) so call sites read as "identity sends a
    /// message", matching the data model's "identity exposes
    /// `sendProtected`" framing.
    pub fn send_protected<G: SendGate<B>, B>(
        &self,
        gate: &G,
        msg: Message<B>,
        opts: SendOptions,
    ) -> Result<SendOutcome<B>, KernelError> {
        if self.revoked {
            return Err(KernelError::auth(codes::AUTH_PKR_MISMATCH, "identity has been revoked"));
        }
        gate.send_protected(self.pkr, msg, opts)
    }
}

/// Options accompanying a message through its whole lifecycle: minted at
/// `sendProtected`, threaded through `MessageSystemRouter::route` and the
/// per-subsystem processor, read by handlers. Per `spec.md` §4.9/§4.7.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub response_required: Option<ResponseRequired>,
    pub is_response: bool,
    /// Bypass the subsystem queue and run synchronously in the caller's
    /// stack (`kernel://` paths always behave this way regardless of the
    /// flag — see `spec.md` §9 Open Question 3).
    pub process_immediately: bool,
    /// Hint consumed by the `priority`/`adaptive` scheduling strategies:
    /// atomic messages are scheduled ahead of non-atomic ones.
    pub atomic: bool,
    /// Sender-supplied relative cost hint (e.g. a byte size or a unit of
    /// processing weight) consumed by the `load-based`/`adaptive` scheduling
    /// strategies' complexity estimator; `0.0` means "no hint given".
    pub weight_hint: f64,
    /// Internal marker recording which layer set `response_required`/
    /// `is_response`; stripped by the processor before a handler sees it.
    pub(crate) caller_id_set_by: Option<Cow<'static, str>>,
}

impl SendOptions {
    /// Returns a copy with the internal caller marker cleared, per the
    /// processor's "sanitize opts before handing to a handler" contract.
    pub fn sanitized(&self) -> Self {
        Self { caller_id_set_by: None, ..self.clone() }
    }
}

#[derive(Debug, Clone)]
pub struct ResponseRequired {
    pub reply_to: Cow<'static, str>,
    pub timeout_ms: u64,
}

/// Result of a successful `sendProtected` call. `response` is populated only
/// when `opts.response_required` was set — awaiting it resolves to the
/// correlated reply, or to a synthetic `ErrorKind::Timeout` if none arrives
/// within the requested window (see `kernel::response::ResponseManager`).
pub struct SendOutcome<B> {
    pub message_id: crate::message::MessageId,
    pub response: Option<tokio::sync::oneshot::Receiver<Result<Message<B>, KernelError>>>,
}

/// The kernel-gate contract an [`Identity`] sends through. Declared here
/// (rather than depending on the `kernel` module directly) so `security`
/// has no dependency on `kernel`; `kernel::Kernel` implements it.
pub trait SendGate<B> {
    fn send_protected(&self, pkr: Pkr, msg: Message<B>, opts: SendOptions) -> Result<SendOutcome<B>, KernelError>;
}

/// Kernel child subsystem responsible for minting principals/PKRs/
/// identities during `registerSubsystem`, and for validating PKR ownership
/// on every protected send.
#[derive(Default)]
pub struct AccessControl {
    principals: BTreeMap<Pkr, Principal>,
}

impl AccessControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a Principal, PKR, and Identity for a newly registered
    /// subsystem and records the principal for later ownership checks.
    pub fn wire_subsystem(&mut self, kind: PrincipalKind, subsystem_name: impl Into<Cow<'static, str>>) -> Identity {
        let principal = Principal::new(kind, Some(subsystem_name.into()));
        let pkr = principal.pkr();
        self.principals.insert(pkr, principal);
        Identity::new(pkr)
    }

    pub fn principal(&self, pkr: Pkr) -> Option<&Principal> {
        self.principals.get(&pkr)
    }

    /// Validates that `pkr` is a known, registered principal — the check
    /// `sendProtected` performs before dispatching.
    pub fn validate_ownership(&self, pkr: Pkr) -> Result<(), KernelError> {
        if self.principals.contains_key(&pkr) {
            Ok(())
        } else {
            Err(KernelError::auth(codes::AUTH_PKR_MISMATCH, format!("unknown principal for {pkr}")))
        }
    }
}
