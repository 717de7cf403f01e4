//! Mycelia Kernel — a message-oriented in-process runtime: subsystems
//! assembled from pluggable hooks contributing typed facets, dispatched
//! through a path-routed message system with authenticated send semantics.
//!
//! See `spec.md` for the full design; `DESIGN.md` for the grounding ledger
//! tying each module back to its source of imitation.

pub mod builder;
pub mod ctx;
pub mod error;
pub mod facet;
pub mod hook;
pub mod kernel;
pub mod message;
pub mod queue;
pub mod registry;
pub mod security;
pub mod subsystem;

pub use builder::{Builder, Plan};
pub use ctx::{CtxHash, CtxValue};
pub use error::{codes, ErrorKind, KernelError};
pub use facet::{AddManyOptions, Facet, FacetManager};
pub use hook::{FacetLookup, HookDescriptor, KindSignature, PlanCache};
pub use kernel::dispatch::{DispatchStats, MessageSystemRouter, RouteOutcome};
pub use kernel::response::{CorrelationFields, ResponseClock, ResponseManager, TokioClock};
pub use kernel::{Kernel, KernelPayload};
pub use message::{Message, MessageId, MessageMetadata, Path, PathSegment, TraceId};
pub use queue::{BoundedQueue, DropReason, EvictionPolicy};
pub use registry::{ContractRegistry, ContractSpec};
pub use security::{
    AccessControl, Identity, Pkr, Principal, PrincipalKind, ResponseRequired, SendGate, SendOptions, SendOutcome,
};
pub use subsystem::Subsystem;

/// The handful of types an embedding application needs to declare a
/// subsystem, re-exported together for a single `use mycelia_kernel::prelude::*;`.
pub mod prelude {
    pub use crate::error::KernelError;
    pub use crate::facet::Facet;
    pub use crate::hook::HookDescriptor as Hook;
    pub use crate::message::Message;
    pub use crate::subsystem::Subsystem;
}
