//! End-to-end dispatch coverage through the public `Kernel` gate: a
//! registered subsystem receiving a `{param}` route (`spec.md` §8 concrete
//! scenario 2) and an unknown scheme failing without a panic (scenario 6).

use std::sync::{Arc, Mutex as StdMutex};

use parking_lot::Mutex;

use mycelia_kernel::{
    CorrelationFields, ContractRegistry, CtxValue, Kernel, KernelPayload, Message, Path, PlanCache, PrincipalKind,
    SendGate, SendOptions, Subsystem, TokioClock, TraceId, codes,
};

#[derive(Debug, Clone, Default)]
struct Body {
    reply_to: Option<String>,
}

impl CorrelationFields for Body {
    fn in_reply_to(&self) -> Option<&str> {
        self.reply_to.as_deref()
    }
}

impl KernelPayload for Body {}

fn bootstrap() -> Arc<Kernel<Body>> {
    let contracts = ContractRegistry::with_defaults();
    Kernel::bootstrap(CtxValue::map(), &contracts, Arc::new(TokioClock)).unwrap()
}

fn subsystem(name: &'static str) -> Arc<Subsystem<Body>> {
    Arc::new(
        Subsystem::new(name, CtxValue::map(), Arc::new(ContractRegistry::with_defaults()), Arc::new(Mutex::new(PlanCache::new(16))))
            .unwrap(),
    )
}

#[test]
fn registered_route_receives_extracted_params_and_updates_stats() {
    let kernel = bootstrap();
    let sub = subsystem("user");
    let identity = kernel.register_subsystem(PrincipalKind::TopLevelSubsystem, "user", sub.clone()).unwrap();

    let seen: Arc<StdMutex<Option<String>>> = Arc::new(StdMutex::new(None));
    let seen_clone = seen.clone();
    sub.register_route(
        "user://get/{id}",
        Arc::new(move |_msg, params, _opts| {
            *seen_clone.lock().unwrap() = params.get("id").cloned();
            Ok(Body::default())
        }),
    )
    .unwrap();

    let msg = Message::new(Path::parse("user://get/42").unwrap(), Body::default(), TraceId::generate());
    kernel.send_protected(identity.pkr(), msg, SendOptions::default()).unwrap();

    let report = sub.process(50);
    assert_eq!(report.processed, 1);
    assert_eq!(seen.lock().unwrap().as_deref(), Some("42"));
    assert_eq!(sub.processor_stats().processed, 1);
}

#[test]
fn unknown_scheme_fails_cleanly_without_panicking() {
    let kernel = bootstrap();
    let identity = kernel.register_subsystem(PrincipalKind::TopLevelSubsystem, "user", subsystem("user")).unwrap();

    let msg = Message::new(Path::parse("xyz://foo").unwrap(), Body::default(), TraceId::generate());
    let err = kernel.send_protected(identity.pkr(), msg, SendOptions::default()).unwrap_err();
    assert_eq!(err.code(), codes::ROUTING_UNKNOWN_SUBSYSTEM);
}

#[test]
fn process_immediately_bypasses_the_subsystem_queue() {
    let kernel = bootstrap();
    let sub = subsystem("user");
    let identity = kernel.register_subsystem(PrincipalKind::TopLevelSubsystem, "user", sub.clone()).unwrap();
    sub.register_route("user://ping", Arc::new(|_m, _p, _o| Ok(Body::default()))).unwrap();

    let msg = Message::new(Path::parse("user://ping").unwrap(), Body::default(), TraceId::generate());
    let opts = SendOptions { process_immediately: true, ..Default::default() };
    kernel.send_protected(identity.pkr(), msg, opts).unwrap();

    assert_eq!(sub.processor_stats().processed, 1);
    assert_eq!(sub.queue().lock().size(), 0);
}
