use j1939_verifier::{
    VerifyError,
    bus::{BusResponse, simulation::SimulatedBus},
    dtc::DTC,
    finding::{FindingKind, FindingLog, Severity},
    lamp::{LampStatus, LampVector},
    layout::{LayoutCatalog, Pgn},
    pipeline::{
        CancelToken, Condition, DtcContainment, FnStep, LampConsistency, NoDtcs, NoResponsePolicy, Pipeline,
        RequestStep, RunSummary, StepContext, Targets, VerifierOptions,
    },
    repository::ModuleRepository,
};

fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Builds a lamp + DTC payload, padded to 8 bytes like a single frame
fn dm(mil: LampStatus, dtcs: &[DTC]) -> Vec<u8> {
    let mut data = LampVector::with_mil(mil).to_bytes().to_vec();
    for d in dtcs {
        data.extend_from_slice(&d.to_bytes());
    }
    if dtcs.is_empty() {
        data.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]);
    }
    while data.len() < 8 {
        data.push(0xFF);
    }
    data
}

struct Harness {
    repo: ModuleRepository,
    bus: SimulatedBus,
    log: FindingLog,
    catalog: LayoutCatalog,
    options: VerifierOptions,
}

impl Harness {
    fn new(candidates: &[u8]) -> Self {
        init_log();
        Self {
            repo: ModuleRepository::new(),
            bus: SimulatedBus::new(),
            log: FindingLog::new(),
            catalog: LayoutCatalog::builtin(),
            options: VerifierOptions {
                candidate_addresses: candidates.to_vec(),
            },
        }
    }

    fn run(&mut self, pipeline: &Pipeline, cancel: &CancelToken) -> Result<RunSummary, VerifyError> {
        let mut ctx = StepContext::new(&mut self.repo, &mut self.bus, &mut self.log, &self.catalog, &self.options);
        pipeline.run(&mut ctx, cancel)
    }
}

fn discover_dm1() -> RequestStep {
    RequestStep::new("6.1.1 DM1 discovery", Pgn::DM1).targets(Targets::Candidates)
}

#[test]
fn happy_path_two_modules() {
    let mut h = Harness::new(&[0, 1]);
    h.bus
        .add_data(Pgn::DM1, 0, &dm(LampStatus::On, &[]))
        .add_nack(Pgn::DM1, 1)
        .add_data(Pgn::DM12, 0, &dm(LampStatus::On, &[]))
        .add_nack(Pgn::DM12, 1);

    let pipeline = Pipeline::new().with_step(discover_dm1()).with_step(
        RequestStep::new("6.1.2 DM12", Pgn::DM12)
            .require_response("6.1.2.1.a", NoResponsePolicy::Record)
            .check(DtcContainment::new("6.1.2.2.a", Pgn::DM1))
            .check(LampConsistency::new("6.1.2.2.b", Pgn::DM1)),
    );
    let summary = h.run(&pipeline, &CancelToken::new()).unwrap();

    assert!(h.log.is_empty(), "{:?}", h.log.findings());
    assert!(summary.is_complete());
    assert_eq!(summary.findings(), 0);
    assert_eq!(h.repo.all_modules().collect::<Vec<_>>(), vec![0, 1]);
    assert!(h.repo.get(1, Pgn::DM1).is_none());
    assert!(h.repo.get(0, Pgn::DM12).unwrap().mil().unwrap().is_on());
}

#[test]
fn missing_dtc_is_reported_once() {
    let mut h = Harness::new(&[5]);
    h.bus
        .add_data(Pgn::DM1, 5, &dm(LampStatus::On, &[DTC::new(123, 12)]))
        .add_data(Pgn::DM12, 5, &dm(LampStatus::On, &[]));

    let pipeline = Pipeline::new()
        .with_step(discover_dm1())
        .with_step(RequestStep::new("6.1.2 DM12", Pgn::DM12).check(DtcContainment::new("6.1.2.2.a", Pgn::DM1)));
    h.run(&pipeline, &CancelToken::new()).unwrap();

    assert_eq!(h.log.len(), 1);
    let f = &h.log.findings()[0];
    assert_eq!(f.rule_id, "6.1.2.2.a");
    assert_eq!(f.address, Some(5));
    assert_eq!(f.kind, FindingKind::InconsistentState);
    assert!(f.message.contains("(5)"), "{}", f.message);
    assert!(f.message.contains("SPN 123 FMI 12"), "{}", f.message);
}

#[test]
fn lamp_mismatch_between_steps() {
    let mut h = Harness::new(&[0]);
    h.bus
        .add_data(Pgn::DM1, 0, &dm(LampStatus::On, &[]))
        .add_data(Pgn::DM1, 0, &dm(LampStatus::Off, &[]));

    let pipeline = Pipeline::new()
        .with_step(discover_dm1())
        .with_step(RequestStep::new("6.1.3 DM1 again", Pgn::DM1).check(LampConsistency::new("6.1.3.2.a", Pgn::DM1)));
    h.run(&pipeline, &CancelToken::new()).unwrap();

    assert_eq!(h.log.len(), 1);
    assert_eq!(h.log.findings()[0].severity, Severity::Fail);
    assert_eq!(
        h.log.findings()[0].message,
        "Engine #1 (0) reported MIL off in DM1, but on in DM1"
    );
}

#[test]
fn data_where_nack_required() {
    let mut h = Harness::new(&[0]);
    h.bus
        .add_data(Pgn::DM1, 0, &dm(LampStatus::On, &[]))
        .add_data(Pgn::DM6, 0, &dm(LampStatus::On, &[]));

    let pipeline = Pipeline::new().with_step(discover_dm1()).with_step(
        RequestStep::new("6.1.4 DM6", Pgn::DM6)
            .require_nack_when("6.1.4.1.b", Condition::mil_on_without_dtcs(Pgn::DM1)),
    );
    h.run(&pipeline, &CancelToken::new()).unwrap();

    assert_eq!(h.log.len(), 1);
    let f = &h.log.findings()[0];
    assert_eq!(f.rule_id, "6.1.4.1.b");
    assert_eq!(f.kind, FindingKind::UnexpectedResponse);
    assert!(f.message.contains("did not provide a NACK"), "{}", f.message);
    // the data is still decoded and stored
    assert!(h.repo.get(0, Pgn::DM6).is_some());
}

#[test]
fn silence_where_nack_required() {
    let mut h = Harness::new(&[0, 1]);
    h.bus
        .add_data(Pgn::DM1, 0, &dm(LampStatus::On, &[]))
        .add_data(Pgn::DM1, 1, &dm(LampStatus::Off, &[]))
        .add_nack(Pgn::DM6, 1);

    let pipeline = Pipeline::new().with_step(discover_dm1()).with_step(
        RequestStep::new("6.1.4 DM6", Pgn::DM6)
            .require_nack_when("6.1.4.1.b", Condition::mil_on_without_dtcs(Pgn::DM1))
            .require_response("6.1.4.1.a", NoResponsePolicy::Record),
    );
    h.run(&pipeline, &CancelToken::new()).unwrap();

    // module 0 is silent where a NACK was required: one finding under the NACK rule only
    assert_eq!(h.log.len(), 1);
    let f = &h.log.findings()[0];
    assert_eq!(f.rule_id, "6.1.4.1.b");
    assert_eq!(f.kind, FindingKind::MissingRequiredResponse);
    assert_eq!(f.address, Some(0));
}

#[test]
fn malformed_response_is_isolated() {
    let mut h = Harness::new(&[0, 1]);
    h.bus
        .add_data(Pgn::DM1, 0, &dm(LampStatus::On, &[]))
        .add_data(Pgn::DM1, 1, &dm(LampStatus::On, &[]))
        .add_data(Pgn::DM12, 0, &[0x00])
        .add_data(Pgn::DM12, 1, &dm(LampStatus::Off, &[]))
        .add_data(Pgn::DM23, 0, &dm(LampStatus::On, &[]))
        .add_data(Pgn::DM23, 1, &dm(LampStatus::On, &[]));

    let pipeline = Pipeline::new()
        .with_step(discover_dm1())
        .with_step(
            RequestStep::new("6.1.5 DM12", Pgn::DM12)
                .malformed_rule("6.1.5.1.a")
                .check(LampConsistency::new("6.1.5.2.a", Pgn::DM1)),
        )
        .with_step(RequestStep::new("6.1.6 DM23", Pgn::DM23).check(NoDtcs::new("6.1.6.2.a")));
    let summary = h.run(&pipeline, &CancelToken::new()).unwrap();

    let findings = h.log.findings();
    assert_eq!(findings.len(), 2, "{findings:?}");
    assert_eq!(findings[0].rule_id, "6.1.5.1.a");
    assert_eq!(findings[0].kind, FindingKind::MalformedPacket);
    assert_eq!(findings[0].address, Some(0));
    assert_eq!(findings[1].rule_id, "6.1.5.2.a");
    assert_eq!(findings[1].address, Some(1));
    assert!(summary.is_complete());
    assert!(h.repo.get(0, Pgn::DM12).is_none());
    assert!(h.repo.get(0, Pgn::DM23).is_some());
}

#[test]
fn transport_failure_ends_run() {
    let mut h = Harness::new(&[0]);
    h.bus
        .add_data(Pgn::DM1, 0, &dm(LampStatus::On, &[DTC::new(1, 1)]))
        .add_data(Pgn::DM23, 0, &dm(LampStatus::On, &[]))
        .fail_transport(Pgn::DM12);

    let pipeline = Pipeline::new()
        .with_step(RequestStep::new("6.1.1 DM1", Pgn::DM1).targets(Targets::Candidates).check(NoDtcs::new("6.1.1.2")))
        .with_step(RequestStep::new("6.1.2 DM12", Pgn::DM12))
        .with_step(RequestStep::new("6.1.3 DM23", Pgn::DM23));
    let result = h.run(&pipeline, &CancelToken::new());

    assert!(matches!(result, Err(VerifyError::Transport(_))));
    assert_eq!(h.log.len(), 1);
    assert!(!h.bus.requests().iter().any(|(pgn, _)| *pgn == Pgn::DM23));
}

#[test]
fn no_response_recorded_and_run_continues() {
    let mut h = Harness::new(&[0]);
    h.bus
        .add_data(Pgn::DM1, 0, &dm(LampStatus::Off, &[]))
        .add_data(Pgn::DM23, 0, &dm(LampStatus::Off, &[]));

    let pipeline = Pipeline::new()
        .with_step(discover_dm1())
        .with_step(RequestStep::new("6.1.2 DM12", Pgn::DM12).require_response("6.1.2.1.a", NoResponsePolicy::Record))
        .with_step(RequestStep::new("6.1.3 DM23", Pgn::DM23));
    let summary = h.run(&pipeline, &CancelToken::new()).unwrap();

    assert_eq!(h.log.len(), 1);
    assert_eq!(h.log.findings()[0].kind, FindingKind::MissingRequiredResponse);
    assert!(summary.is_complete());
    assert!(h.repo.get(0, Pgn::DM23).is_some());
}

#[test]
fn no_response_excludes_module() {
    let mut h = Harness::new(&[0, 1]);
    h.bus
        .add_data(Pgn::DM1, 0, &dm(LampStatus::Off, &[]))
        .add_data(Pgn::DM1, 1, &dm(LampStatus::Off, &[]))
        .add_data(Pgn::DM12, 1, &dm(LampStatus::Off, &[]))
        .add_data(Pgn::DM23, 0, &dm(LampStatus::Off, &[]))
        .add_data(Pgn::DM23, 1, &dm(LampStatus::Off, &[]));

    let pipeline = Pipeline::new()
        .with_step(discover_dm1())
        .with_step(
            RequestStep::new("6.1.2 DM12", Pgn::DM12).require_response("6.1.2.1.a", NoResponsePolicy::ExcludeModule),
        )
        .with_step(RequestStep::new("6.1.3 DM23", Pgn::DM23));
    let summary = h.run(&pipeline, &CancelToken::new()).unwrap();

    assert!(summary.is_complete());
    assert_eq!(h.log.len(), 1);
    assert!(h.repo.is_excluded(0));
    assert!(h.repo.get(0, Pgn::DM23).is_none());
    assert!(h.repo.get(1, Pgn::DM23).is_some());
    assert!(!h.bus.requests().contains(&(Pgn::DM23, 0)));
}

#[test]
fn no_response_aborts_run() {
    let mut h = Harness::new(&[0, 1]);
    h.bus
        .add_data(Pgn::DM1, 0, &dm(LampStatus::On, &[DTC::new(123, 12)]))
        .add_data(Pgn::DM1, 1, &dm(LampStatus::On, &[DTC::new(9, 1)]))
        .add_data(Pgn::DM12, 1, &dm(LampStatus::On, &[]))
        .add_data(Pgn::DM23, 0, &dm(LampStatus::Off, &[]));

    let pipeline = Pipeline::new()
        .with_step(discover_dm1())
        .with_step(
            RequestStep::new("6.1.2 DM12", Pgn::DM12)
                .require_response("6.1.2.1.a", NoResponsePolicy::AbortRun)
                .check(DtcContainment::new("6.1.2.2.a", Pgn::DM1)),
        )
        .with_step(RequestStep::new("6.1.3 DM23", Pgn::DM23));
    let result = h.run(&pipeline, &CancelToken::new());

    assert!(matches!(
        result,
        Err(VerifyError::RunAborted { address: 0, pgn }) if pgn == Pgn::DM12
    ));
    // the aborting step still finished its checks for module 1
    let rules: Vec<&str> = h.log.findings().iter().map(|f| f.rule_id.as_str()).collect();
    assert_eq!(rules, vec!["6.1.2.1.a", "6.1.2.2.a"]);
    assert!(!h.bus.requests().iter().any(|(pgn, _)| *pgn == Pgn::DM23));
}

#[test]
fn cancel_between_steps() {
    let mut h = Harness::new(&[0]);
    h.bus.add_data(Pgn::DM1, 0, &dm(LampStatus::Off, &[]));
    let cancel = CancelToken::new();
    let trigger = cancel.clone();

    let pipeline = Pipeline::new()
        .with_step(discover_dm1())
        .with_step(FnStep::new("operator stop", move |_ctx| {
            trigger.cancel();
            Ok(())
        }))
        .with_step(RequestStep::new("6.1.2 DM12", Pgn::DM12));
    let summary = h.run(&pipeline, &cancel).unwrap();

    assert!(summary.cancelled);
    assert!(!summary.is_complete());
    assert_eq!(summary.steps.len(), 2);
    assert_eq!(h.bus.requests(), &[(Pgn::DM1, 0)]);
}

#[test]
fn findings_follow_registration_order() {
    let mut h = Harness::new(&[3, 0]);
    h.bus
        .add_data(Pgn::DM1, 3, &dm(LampStatus::On, &[DTC::new(1, 1)]))
        .add_data(Pgn::DM1, 0, &dm(LampStatus::On, &[DTC::new(2, 2)]))
        .add_data(Pgn::DM12, 3, &dm(LampStatus::On, &[]))
        .add_data(Pgn::DM12, 0, &dm(LampStatus::On, &[]));

    let pipeline = Pipeline::new()
        .with_step(discover_dm1())
        .with_step(RequestStep::new("6.1.2 DM12", Pgn::DM12).check(DtcContainment::new("6.1.2.2.a", Pgn::DM1)));
    h.run(&pipeline, &CancelToken::new()).unwrap();

    let order: Vec<Option<u8>> = h.log.findings().iter().map(|f| f.address).collect();
    assert_eq!(order, vec![Some(3), Some(0)]);
}

#[test]
fn matching_targets() {
    let mut h = Harness::new(&[0, 1]);
    h.bus
        .add_data(Pgn::DM1, 0, &dm(LampStatus::On, &[DTC::new(5, 5)]))
        .add_data(Pgn::DM1, 1, &dm(LampStatus::Off, &[]))
        .add_response(Pgn::DM2, 0, BusResponse::Data(dm(LampStatus::On, &[])));

    let pipeline = Pipeline::new().with_step(discover_dm1()).with_step(
        RequestStep::new("6.1.7 DM2", Pgn::DM2).targets(Targets::Matching(Condition::reported_dtcs(Pgn::DM1))),
    );
    h.run(&pipeline, &CancelToken::new()).unwrap();

    assert_eq!(h.bus.requests(), &[(Pgn::DM1, 0), (Pgn::DM1, 1), (Pgn::DM2, 0)]);
    assert!(h.repo.get(0, Pgn::DM2).is_some());
}

#[test]
fn missing_layout_stops_run_before_any_request() {
    let mut h = Harness::new(&[0]);
    h.bus.add_data(Pgn::DM1, 0, &dm(LampStatus::On, &[]));

    let pipeline = Pipeline::new()
        .with_step(discover_dm1())
        .with_step(RequestStep::new("unknown", Pgn(61444)));
    assert_eq!(pipeline.missing_layout(&h.catalog), Some(Pgn(61444)));
    let result = h.run(&pipeline, &CancelToken::new());

    assert!(matches!(result, Err(VerifyError::MissingLayout(Pgn(61444)))));
    assert!(h.bus.requests().is_empty());
    assert!(h.repo.is_empty());
}

#[test]
fn nack_where_nack_required() {
    let mut h = Harness::new(&[0]);
    h.bus
        .add_data(Pgn::DM1, 0, &dm(LampStatus::On, &[]))
        .add_nack(Pgn::DM6, 0);

    let pipeline = Pipeline::new().with_step(discover_dm1()).with_step(
        RequestStep::new("6.1.4 DM6", Pgn::DM6)
            .require_nack_when("6.1.4.1.b", Condition::mil_on_without_dtcs(Pgn::DM1))
            .require_response("6.1.4.1.a", NoResponsePolicy::AbortRun),
    );
    let summary = h.run(&pipeline, &CancelToken::new()).unwrap();

    assert!(h.log.is_empty(), "{:?}", h.log.findings());
    assert!(summary.is_complete());
    assert!(h.repo.get(0, Pgn::DM6).is_none());
}

#[test]
fn silence_where_nack_required_still_aborts() {
    let mut h = Harness::new(&[0]);
    h.bus
        .add_data(Pgn::DM1, 0, &dm(LampStatus::On, &[]))
        .add_data(Pgn::DM12, 0, &dm(LampStatus::On, &[]));

    let pipeline = Pipeline::new()
        .with_step(discover_dm1())
        .with_step(
            RequestStep::new("6.1.4 DM6", Pgn::DM6)
                .require_nack_when("6.1.4.1.b", Condition::mil_on_without_dtcs(Pgn::DM1))
                .require_response("6.1.4.1.a", NoResponsePolicy::AbortRun),
        )
        .with_step(RequestStep::new("6.1.5 DM12", Pgn::DM12));
    let result = h.run(&pipeline, &CancelToken::new());

    assert!(matches!(
        result,
        Err(VerifyError::RunAborted { address: 0, pgn }) if pgn == Pgn::DM6
    ));
    let rules: Vec<&str> = h.log.findings().iter().map(|f| f.rule_id.as_str()).collect();
    assert_eq!(rules, vec!["6.1.4.1.b"]);
    assert!(!h.bus.requests().contains(&(Pgn::DM12, 0)));
}

#[test]
fn silence_where_nack_required_excludes_module() {
    let mut h = Harness::new(&[0]);
    h.bus
        .add_data(Pgn::DM1, 0, &dm(LampStatus::On, &[]))
        .add_data(Pgn::DM12, 0, &dm(LampStatus::On, &[]));

    let pipeline = Pipeline::new()
        .with_step(discover_dm1())
        .with_step(
            RequestStep::new("6.1.4 DM6", Pgn::DM6)
                .require_nack_when("6.1.4.1.b", Condition::mil_on_without_dtcs(Pgn::DM1))
                .require_response("6.1.4.1.a", NoResponsePolicy::ExcludeModule),
        )
        .with_step(RequestStep::new("6.1.5 DM12", Pgn::DM12));
    let summary = h.run(&pipeline, &CancelToken::new()).unwrap();

    assert!(summary.is_complete());
    assert_eq!(h.log.len(), 1);
    assert!(h.repo.is_excluded(0));
    assert!(!h.bus.requests().contains(&(Pgn::DM12, 0)));
}

#[test]
fn repeated_targets_are_requested_once() {
    let mut h = Harness::new(&[5, 5]);
    h.bus
        .add_data(Pgn::DM1, 5, &dm(LampStatus::On, &[DTC::new(123, 12)]))
        .add_data(Pgn::DM12, 5, &dm(LampStatus::On, &[]));

    let pipeline = Pipeline::new().with_step(discover_dm1()).with_step(
        RequestStep::new("6.1.2 DM12", Pgn::DM12)
            .targets(Targets::Addresses(vec![5, 5]))
            .check(DtcContainment::new("6.1.2.2.a", Pgn::DM1)),
    );
    h.run(&pipeline, &CancelToken::new()).unwrap();

    assert_eq!(h.bus.requests(), &[(Pgn::DM1, 5), (Pgn::DM12, 5)]);
    assert_eq!(h.log.len(), 1);
    assert_eq!(h.repo.all_modules().collect::<Vec<_>>(), vec![5]);
}

#[test]
fn active_technology_groups_are_stored() {
    let mut h = Harness::new(&[0]);
    let mut payload = vec![0x01, 0x10, 0x0E, 0x00, 0x00, 0x64, 0x00, 0x00, 0x00];
    payload.extend_from_slice(&[0x02, 0x20, 0x00, 0x00, 0x00, 0x05, 0x00, 0x00, 0x00]);
    payload.extend_from_slice(&[0xFF, 0xFF, 0xFF]);
    h.bus.add_data(Pgn::GHG_ACTIVE_TECH_LIFETIME, 0, &payload);

    let pipeline = Pipeline::new().with_step(
        RequestStep::new("6.1.8 GHG", Pgn::GHG_ACTIVE_TECH_LIFETIME).targets(Targets::Addresses(vec![0])),
    );
    h.run(&pipeline, &CancelToken::new()).unwrap();

    let packet = h.repo.get(0, Pgn::GHG_ACTIVE_TECH_LIFETIME).unwrap();
    assert_eq!(packet.groups().len(), 2);
    assert_eq!(packet.groups()[0].value("Active Technology Time"), Some(3600.0));
    assert_eq!(packet.groups()[0].value("Active Technology Vehicle Distance"), Some(100.0));
    assert_eq!(packet.groups()[1].value("Active Technology Time"), Some(32.0));
    assert!(h.log.is_empty());
}
