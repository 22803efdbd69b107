//! Measurement dispatcher behaviour across the three strategies.

use layered_attest_core::{
    Collaborators, Credentials, DispatchError, MeasurementCallbacks, MeasurementDispatcher,
    MeasurementInstruction, MeasurementSpec, Predicate, Scenario, SpecEvaluator,
};
use layered_attest_graph::{
    Address, BlobData, FileAddress, MarshalledData, MeasurementData, MeasurementGraph,
    MeasurementType, MeasurementVariable, TargetType, KERNEL_TARGET_TYPE, SYSTEM_TARGET_TYPE,
};
use uuid::Uuid;

use crate::support::{
    blob, places, registry, remote_variable, CountingRunner, MockChannel, MockUserspace,
    MockVerifier,
};

struct Fixture {
    runner: CountingRunner,
    channel: MockChannel,
    verifier: MockVerifier,
    userspace: MockUserspace,
}

impl Fixture {
    fn new(channel: MockChannel, verifier: MockVerifier) -> Self {
        Self {
            runner: CountingRunner::new(0),
            channel,
            verifier,
            userspace: MockUserspace::default(),
        }
    }

    fn happy() -> Self {
        Self::new(
            MockChannel::returning(vec![0x01, 0x02, 0x03]),
            MockVerifier::returning(vec![0xAA, 0xBB]),
        )
    }

    fn collaborators(&self) -> Collaborators<'_> {
        Collaborators {
            runner: &self.runner,
            channel: &self.channel,
            verifier: &self.verifier,
            userspace: &self.userspace,
        }
    }
}

fn scenario_with_contract(contract: Vec<u8>) -> Scenario {
    Scenario {
        nonce: Some("nonce-1".into()),
        contract,
        ..Scenario::default()
    }
}

fn dispatch(
    fixture: &Fixture,
    scenario: &mut Scenario,
    graph: &MeasurementGraph,
    variable: &MeasurementVariable,
    measurement_type: &MeasurementType,
) -> Result<(), DispatchError> {
    let registry = registry();
    let places = places();
    let credentials = Credentials::stage(scenario);
    let mut dispatcher = MeasurementDispatcher::new(
        &registry,
        &places,
        &credentials,
        scenario,
        fixture.collaborators(),
    );
    dispatcher.measure_variable(graph, variable, measurement_type)
}

#[test]
fn test_remote_measurement_end_to_end() {
    let fixture = Fixture::happy();
    let graph = MeasurementGraph::create(None).unwrap();
    let mut scenario = scenario_with_contract(vec![0x42; 5]);
    let variable = remote_variable("@_t", "app-list");

    dispatch(&fixture, &mut scenario, &graph, &variable, &blob()).unwrap();

    let nodes = graph.node_ids().unwrap();
    assert_eq!(nodes.len(), 1);
    let stored: BlobData = graph
        .get_data(nodes[0], &blob())
        .unwrap()
        .unwrap()
        .unmarshal()
        .unwrap();
    assert_eq!(stored.buffer, vec![0xAA, 0xBB]);

    // The channel was asked at the target place, the verifier saw the
    // received contract, and the scenario's own contract is back.
    let calls = fixture.channel.calls.borrow();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0.port, 9001);
    assert_eq!(calls[0].1, "app-list");
    assert_eq!(*fixture.verifier.seen.borrow(), vec![vec![0x01, 0x02, 0x03]]);
    assert_eq!(scenario.contract, vec![0x42; 5]);
}

#[test]
fn test_remote_dispatch_is_idempotent() {
    let fixture = Fixture::happy();
    let graph = MeasurementGraph::create(None).unwrap();
    let mut scenario = Scenario::default();
    let variable = remote_variable("@_0", "kernel-list");

    dispatch(&fixture, &mut scenario, &graph, &variable, &blob()).unwrap();
    dispatch(&fixture, &mut scenario, &graph, &variable, &blob()).unwrap();

    assert_eq!(fixture.channel.call_count(), 1);
    assert_eq!(fixture.verifier.seen.borrow().len(), 1);
    assert_eq!(graph.node_ids().unwrap().len(), 1);
}

#[test]
fn test_address_kind_mismatch_leaves_graph_unchanged() {
    let fixture = Fixture::happy();
    let graph = MeasurementGraph::create(None).unwrap();
    let mut scenario = Scenario::default();
    // A system target routes to the remote strategy, but the address is a file.
    let variable = MeasurementVariable::new(
        TargetType::new(SYSTEM_TARGET_TYPE),
        Address::File(FileAddress::from_path("/etc/machine-id")),
    );

    let err = dispatch(&fixture, &mut scenario, &graph, &variable, &blob()).unwrap_err();

    assert!(matches!(err, DispatchError::AddressKindMismatch { .. }));
    assert!(graph.node_ids().unwrap().is_empty());
    assert_eq!(graph.find_node(&variable).unwrap(), None);
    assert_eq!(fixture.channel.call_count(), 0);
}

#[test]
fn test_unknown_attester_never_calls_channel() {
    let fixture = Fixture::happy();
    let graph = MeasurementGraph::create(None).unwrap();
    let mut scenario = Scenario::default();

    for attester in ["@_1", "@_T", "", "127.0.0.1"] {
        let variable = remote_variable(attester, "app-list");
        let err = dispatch(&fixture, &mut scenario, &graph, &variable, &blob()).unwrap_err();
        assert!(matches!(err, DispatchError::UnknownAttester { .. }));
    }
    assert_eq!(fixture.channel.call_count(), 0);
}

#[test]
fn test_verification_failure_restores_contract() {
    let fixture = Fixture::new(
        MockChannel::returning(vec![0x01, 0x02, 0x03]),
        MockVerifier::failing(),
    );
    let graph = MeasurementGraph::create(None).unwrap();
    let mut scenario = scenario_with_contract(vec![0x10, 0x20]);
    let variable = remote_variable("@_t", "app-list");

    let err = dispatch(&fixture, &mut scenario, &graph, &variable, &blob()).unwrap_err();

    assert!(matches!(err, DispatchError::ContractVerificationFailed { .. }));
    assert_eq!(scenario.contract, vec![0x10, 0x20]);
    let node = graph.find_node(&variable).unwrap().unwrap();
    assert!(!graph.has_data(node, &blob()));
}

#[test]
fn test_channel_failure_skips_verification() {
    let fixture = Fixture::new(MockChannel::failing(), MockVerifier::returning(vec![1]));
    let graph = MeasurementGraph::create(None).unwrap();
    let mut scenario = scenario_with_contract(vec![0x10]);

    let err = dispatch(
        &fixture,
        &mut scenario,
        &graph,
        &remote_variable("@_t", "app-list"),
        &blob(),
    )
    .unwrap_err();

    assert!(matches!(err, DispatchError::ChannelError { .. }));
    assert!(fixture.verifier.seen.borrow().is_empty());
    assert_eq!(scenario.contract, vec![0x10]);
}

#[test]
fn test_kernel_measurement_runs_worker_with_graph_and_node() {
    let fixture = Fixture::happy();
    let graph = MeasurementGraph::create(None).unwrap();
    let mut scenario = Scenario::default();
    let variable = MeasurementVariable::new(TargetType::new(KERNEL_TARGET_TYPE), Address::Kernel);

    dispatch(&fixture, &mut scenario, &graph, &variable, &MeasurementType::kernel()).unwrap();

    let runs = fixture.runner.runs.borrow();
    assert_eq!(runs.len(), 1);
    let node = graph.find_node(&variable).unwrap().unwrap();
    assert_eq!(
        runs[0],
        vec![graph.path().to_string_lossy().into_owned(), node.to_string()]
    );
    assert_eq!(fixture.channel.call_count(), 0);
}

#[test]
fn test_kernel_status_returned_verbatim() {
    let mut fixture = Fixture::happy();
    fixture.runner = CountingRunner::new(3);
    let graph = MeasurementGraph::create(None).unwrap();
    let mut scenario = Scenario::default();
    let variable = MeasurementVariable::new(TargetType::new(KERNEL_TARGET_TYPE), Address::Kernel);

    let err = dispatch(&fixture, &mut scenario, &graph, &variable, &MeasurementType::kernel())
        .unwrap_err();
    assert!(matches!(err, DispatchError::WorkerFailed { status: 3, .. }));
}

#[test]
fn test_kernel_already_measured_skips_worker() {
    let fixture = Fixture::happy();
    let graph = MeasurementGraph::create(None).unwrap();
    let mut scenario = Scenario::default();
    let variable = MeasurementVariable::new(TargetType::new(KERNEL_TARGET_TYPE), Address::Kernel);
    let node = graph.add_node(&variable).unwrap().id();
    graph
        .add_data(
            node,
            &MarshalledData {
                measurement_type: MeasurementType::kernel(),
                payload: serde_json::json!({ "release": "6.1.0" }),
            },
        )
        .unwrap();

    dispatch(&fixture, &mut scenario, &graph, &variable, &MeasurementType::kernel()).unwrap();
    assert_eq!(fixture.runner.run_count(), 0);
}

#[test]
fn test_other_types_go_to_userspace() {
    let fixture = Fixture::happy();
    let graph = MeasurementGraph::create(None).unwrap();
    let mut scenario = Scenario::default();
    let variable = MeasurementVariable::new(
        TargetType::new("file"),
        Address::File(FileAddress::from_path("/usr/bin/ssh")),
    );

    dispatch(&fixture, &mut scenario, &graph, &variable, &MeasurementType::new("sha256")).unwrap();

    assert_eq!(fixture.userspace.calls.get(), 1);
    assert_eq!(fixture.runner.run_count(), 0);
    assert_eq!(fixture.channel.call_count(), 0);
}

#[test]
fn test_no_capable_asp() {
    let fixture = Fixture::happy();
    let graph = MeasurementGraph::create(None).unwrap();
    let mut scenario = Scenario::default();

    let err = dispatch(
        &fixture,
        &mut scenario,
        &graph,
        &remote_variable("@_t", "app-list"),
        &MeasurementType::new("netstat_raw6"),
    )
    .unwrap_err();
    assert!(matches!(err, DispatchError::NoCapableAsp { .. }));
    assert!(graph.node_ids().unwrap().is_empty());
}

#[test]
fn test_evaluation_continues_past_failures() {
    let fixture = Fixture::happy();
    let graph = MeasurementGraph::create(None).unwrap();
    let mut scenario = Scenario::default();
    let spec = MeasurementSpec {
        id: Uuid::nil(),
        name: "layered".into(),
        description: String::new(),
        instructions: vec![MeasurementInstruction {
            measurement_type: blob(),
            variables: vec![
                remote_variable("@_x", "bogus"),
                remote_variable("@_0", "kernel-list"),
                remote_variable("@_t", "app-list"),
            ],
            predicate: Predicate::Always,
            related: Vec::new(),
        }],
    };

    let registry = registry();
    let places = places();
    let credentials = Credentials::stage(&scenario);
    let mut dispatcher = MeasurementDispatcher::new(
        &registry,
        &places,
        &credentials,
        &mut scenario,
        fixture.collaborators(),
    );
    let summary = SpecEvaluator::default().evaluate(&spec, &graph, &mut dispatcher);

    assert_eq!(summary.measured, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(dispatcher.counter().total(), 3);
    assert_eq!(fixture.channel.call_count(), 2);

    let stored = graph
        .node_ids()
        .unwrap()
        .into_iter()
        .filter(|node| graph.has_data(*node, &BlobData::measurement_type()))
        .count();
    assert_eq!(stored, 2);
}
