//! C11 — `Kernel` + `MessageSystem`: the subsystem registry, bootstrap
//! sequence, and kernel child subsystems (`access-control`,
//! `profile-registry`, `error-manager`, `response-manager`).
//!
//! Grounded on `spark-core/src/host/{lifecycle.rs,shutdown.rs}`'s
//! bootstrap/teardown ordering; the "chicken-and-egg" construction order
//! (build the live child state first, close over it in the `kernel://`
//! dispatch closure second) mirrors `subsystem::Subsystem::new`.

pub mod dispatch;
pub mod error_manager;
pub mod profile_registry;
pub mod response;

use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::ctx::CtxValue;
use crate::error::{codes, KernelError};
use crate::facet::{AddManyOptions, Facet, FacetManager};
use crate::message::{Message, Path, PathSegment};
use crate::registry::ContractRegistry;
use crate::security::{AccessControl, Identity, Pkr, PrincipalKind, SendGate, SendOptions, SendOutcome};
use crate::subsystem::hierarchy::HierarchyNode;
use crate::subsystem::Subsystem;

use self::dispatch::{KernelHandler, MessageSystemRouter, RouteOutcome};
use self::error_manager::{error_store_capacity_from_config, ErrorManager, ErrorRecord, ErrorSummary};
use self::profile_registry::ProfileRegistry;
use self::response::{CorrelationFields, ResponseClock, ResponseManager};

/// Lets an application body type round-trip through the kernel's own
/// `kernel://error/*` routes without the kernel needing to know the
/// concrete type. Every method defaults to "no representation" so a body
/// type that never touches kernel-internal traffic needs no impl at all —
/// the same optional-trait-method shape `response::CorrelationFields` uses.
pub trait KernelPayload: Sized {
    fn error_detail(&self) -> CtxValue {
        CtxValue::Null
    }

    fn from_error_query(_records: Vec<ErrorRecord>) -> Option<Self> {
        None
    }

    fn from_error_summary(_summary: ErrorSummary) -> Option<Self> {
        None
    }
}

fn path_literal_segments<'a>(path: &'a Path) -> Result<Vec<&'a str>, KernelError> {
    path.segments()
        .iter()
        .map(|segment| match segment {
            PathSegment::Literal(s) => Ok(s.as_str()),
            PathSegment::Param(_) => {
                Err(KernelError::routing(codes::ROUTING_INVALID_PATH, "kernel path must not contain a {param} segment"))
            }
        })
        .collect()
}

fn build_kernel_handler<B>(error_manager: Arc<Mutex<ErrorManager>>, response_manager: Arc<ResponseManager<B>>) -> KernelHandler<B>
where
    B: Clone + Send + Sync + CorrelationFields + KernelPayload + 'static,
{
    Arc::new(move |msg: &Message<B>, _opts: &SendOptions| -> Result<Option<B>, KernelError> {
        let segments = path_literal_segments(msg.path())?;

        match segments.as_slice() {
            ["error", "record", error_type] => {
                error_manager.lock().record_type(error_type.to_string(), msg.body().error_detail());
                Ok(None)
            }
            ["error", "query", "recent"] => {
                let records = error_manager.lock().query(&crate::message::ErrorQueryKind::Recent);
                Ok(B::from_error_query(records))
            }
            ["error", "query", "summary"] => {
                let summary = error_manager.lock().summary();
                Ok(B::from_error_summary(summary))
            }
            ["error", "query", error_type] => {
                let records = error_manager.lock().query(&crate::message::ErrorQueryKind::ByType((*error_type).to_string()));
                Ok(B::from_error_query(records))
            }
            ["response", "receive"] => {
                response_manager.handle_response(msg.clone())?;
                Ok(None)
            }
            _ => Err(KernelError::routing(
                codes::ROUTING_NO_HANDLER,
                format!("no kernel route matches '{}'", msg.path().as_str()),
            )),
        }
    })
}

fn server_facet() -> Facet {
    Facet::new("server", "kernel")
        .add_op("start", Box::new(()))
        .add_op("stop", Box::new(()))
        .add_op("is_running", Box::new(()))
}

/// Subsystem registry, bootstrap sequence, and kernel security gate.
/// Generic over the same application body type `B` every `Subsystem<B>`
/// registered with it uses.
pub struct Kernel<B> {
    name: Cow<'static, str>,
    facets: Mutex<FacetManager>,
    running: Arc<AtomicBool>,
    router: Arc<MessageSystemRouter<B>>,
    access_control: Arc<Mutex<AccessControl>>,
    profile_registry: Arc<Mutex<ProfileRegistry>>,
    error_manager: Arc<Mutex<ErrorManager>>,
    response_manager: Arc<ResponseManager<B>>,
    identities: Mutex<std::collections::BTreeMap<String, Identity>>,
    hierarchy: Arc<HierarchyNode>,
}

impl<B> Kernel<B>
where
    B: Clone + Send + Sync + CorrelationFields + KernelPayload + 'static,
{
    /// Bootstrap order (§4.9): size and construct the four kernel children
    /// (error-manager, access-control, profile-registry, response-manager),
    /// wire the `kernel://` dispatch closure over them, then assemble the
    /// `MessageSystemRouter` and the kernel's own `server` lifecycle facet.
    pub fn bootstrap(
        cfg: CtxValue,
        contracts: &ContractRegistry,
        clock: Arc<dyn ResponseClock>,
    ) -> Result<Arc<Self>, KernelError> {
        let error_manager = Arc::new(Mutex::new(ErrorManager::new(error_store_capacity_from_config(&cfg))));
        let access_control = Arc::new(Mutex::new(AccessControl::new()));
        let profile_registry = Arc::new(Mutex::new(ProfileRegistry::new()));
        let response_manager = Arc::new(ResponseManager::new(clock));

        let kernel_handler = build_kernel_handler(error_manager.clone(), response_manager.clone());
        let router = Arc::new(MessageSystemRouter::new(kernel_handler));

        let mut facets = FacetManager::new();
        let facet = server_facet();
        contracts.enforce("server", &cfg, &facet)?;
        let mut batch = std::collections::BTreeMap::new();
        batch.insert(Cow::Borrowed("server"), facet);
        facets.add_many(&[Cow::Borrowed("server")], batch, AddManyOptions::default())?;

        Ok(Arc::new(Self {
            name: Cow::Borrowed("kernel"),
            facets: Mutex::new(facets),
            running: Arc::new(AtomicBool::new(false)),
            router,
            access_control,
            profile_registry,
            error_manager,
            response_manager,
            identities: Mutex::new(std::collections::BTreeMap::new()),
            hierarchy: HierarchyNode::root("kernel"),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hierarchy(&self) -> &Arc<HierarchyNode> {
        &self.hierarchy
    }

    pub fn access_control(&self) -> Arc<Mutex<AccessControl>> {
        self.access_control.clone()
    }

    pub fn profile_registry(&self) -> Arc<Mutex<ProfileRegistry>> {
        self.profile_registry.clone()
    }

    pub fn error_manager(&self) -> Arc<Mutex<ErrorManager>> {
        self.error_manager.clone()
    }

    pub fn response_manager(&self) -> Arc<ResponseManager<B>> {
        self.response_manager.clone()
    }

    pub fn router(&self) -> Arc<MessageSystemRouter<B>> {
        self.router.clone()
    }

    /// `server` contract lifecycle: `start`/`stop`/`is_running`.
    pub fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.response_manager.dispose();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Registers a subsystem: wires its identity through `AccessControl`,
    /// adds it to the `MessageSystemRouter`'s scheme table, attaches its
    /// hierarchy node under the kernel's, and then recursively repeats the
    /// identity + routing wiring for every subsystem it already carries as
    /// a declared child (`Subsystem::register_child`), per §4.9's
    /// "recursively register declared children via hierarchy facet".
    /// Returns the minted `Identity` so the caller can attach it to the
    /// subsystem for later `sendProtected` calls.
    pub fn register_subsystem(
        &self,
        kind: PrincipalKind,
        scheme: impl Into<String>,
        subsystem: Arc<Subsystem<B>>,
    ) -> Result<Identity, KernelError> {
        self.hierarchy.attach_child(subsystem.hierarchy());
        let identity = self.wire_subsystem(kind, scheme.into(), &subsystem)?;
        self.register_declared_children(&subsystem)?;
        Ok(identity)
    }

    /// Identity + router wiring shared by a top-level `register_subsystem`
    /// call and the recursive declared-children walk below. Does not touch
    /// the hierarchy tree: the caller either already attached `subsystem`
    /// (top level) or it was attached earlier by `Subsystem::register_child`
    /// (declared children).
    fn wire_subsystem(&self, kind: PrincipalKind, scheme: String, subsystem: &Arc<Subsystem<B>>) -> Result<Identity, KernelError> {
        let identity = self.access_control.lock().wire_subsystem(kind, scheme.clone());
        self.router.register_subsystem(scheme.clone(), subsystem.clone())?;
        self.wire_error_sink(subsystem);
        self.identities.lock().insert(scheme, identity.clone());
        Ok(identity)
    }

    /// Recursively wires identity + routing for every subsystem declared as
    /// a child of `subsystem` (and, transitively, their own declared
    /// children), keyed by each child's own name.
    fn register_declared_children(&self, subsystem: &Arc<Subsystem<B>>) -> Result<(), KernelError> {
        for child in subsystem.declared_children() {
            let scheme = child.name().to_string();
            self.wire_subsystem(PrincipalKind::Child, scheme, &child)?;
            self.register_declared_children(&child)?;
        }
        Ok(())
    }

    /// Wires the newly registered subsystem's processor so an auth failure
    /// it hits while routing is recorded as a `kernel://error/record/auth_failed`
    /// entry, per §4.7's "never throw auth failures out of the processor"
    /// rule — recorded directly against the error manager rather than
    /// round-tripped through the router, since the kernel already holds
    /// both ends of that path.
    fn wire_error_sink(&self, subsystem: &Arc<Subsystem<B>>) {
        let error_manager = self.error_manager.clone();
        subsystem.processor().lock().set_error_sink(Arc::new(move |err: &KernelError| {
            error_manager.lock().record_type("auth_failed", CtxValue::Str(err.message().to_string().into()));
        }));
    }

    pub fn identity_for(&self, scheme: &str) -> Option<Identity> {
        self.identities.lock().get(scheme).cloned()
    }
}

impl<B> SendGate<B> for Kernel<B>
where
    B: Clone + Send + Sync + CorrelationFields + KernelPayload + 'static,
{
    /// The kernel security gate (§4.9): validate PKR ownership, register a
    /// pending response or correlate an inbound one per `opts`, then
    /// dispatch through the `MessageSystemRouter`. Routing failures surface
    /// as `Err`; they are never thrown past this boundary as panics.
    fn send_protected(&self, pkr: Pkr, msg: Message<B>, opts: SendOptions) -> Result<SendOutcome<B>, KernelError> {
        if let Err(err) = self.access_control.lock().validate_ownership(pkr) {
            tracing::warn!(pkr = %pkr, path = %msg.path(), "kernel.send_protected: unknown principal");
            return Err(err);
        }

        let message_id = msg.id().clone();
        let mut response = None;
        if let Some(required) = &opts.response_required {
            response = Some(self.response_manager.register_response_required_for(
                message_id.as_str().to_string(),
                required.reply_to.clone(),
                required.timeout_ms,
            )?);
        }

        if opts.is_response {
            let _ = self.response_manager.handle_response(msg.clone());
        }

        match self.router.route(msg, opts) {
            RouteOutcome::Delivered(_) | RouteOutcome::Queued => {
                tracing::debug!(message_id = %message_id, "kernel.send_protected: dispatched");
                Ok(SendOutcome { message_id, response })
            }
            RouteOutcome::NoSubsystem(scheme) => {
                tracing::warn!(scheme = %scheme, "kernel.send_protected: no subsystem registered for scheme");
                Err(KernelError::routing(
                    codes::ROUTING_UNKNOWN_SUBSYSTEM,
                    format!("no subsystem registered for scheme '{scheme}'"),
                ))
            }
            RouteOutcome::Error(err) => Err(err),
        }
    }
}
