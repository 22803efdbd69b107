//! Full APB runs: place handling, measurement and the pipeline together.

use std::fs::{self, File};
use std::path::Path;
use std::process::Stdio;

use layered_attest_core::asp::{SEND_ASP, SEND_EXECUTE_TCP_ASP, SERIALIZE_GRAPH_ASP};
use layered_attest_core::error::EXIT_USAGE;
use layered_attest_core::{
    ApbError, AspInfo, AspRegistry, AspUserspaceMeasurer, Collaborators, KeyValue, LayeredAttestationApb,
    MeasurementInstruction, MeasurementSpec, PipelineError, Predicate, ProcessRunner, Scenario,
};
use layered_attest_graph::{BLOB_MEASUREMENT_TYPE, SYSTEM_TARGET_TYPE};
use uuid::Uuid;

use crate::pipeline::{framing_registry, sh_asp};
use crate::support::{
    blob, remote_variable, MemorySpecStore, MockChannel, MockVerifier, RecordingDirectory,
};

const SPEC_ID: u128 = 0x5eed_0000_0000_0000_0000_0000_0000_0001;

fn spec() -> MeasurementSpec {
    MeasurementSpec {
        id: Uuid::from_u128(SPEC_ID),
        name: "layered-app-list".into(),
        description: "Ask the target for its application list".into(),
        instructions: vec![MeasurementInstruction {
            measurement_type: blob(),
            variables: vec![remote_variable("@_t", "app-list")],
            predicate: Predicate::Always,
            related: Vec::new(),
        }],
    }
}

/// Pipeline workers from the pipeline tests, a serializer that emits the
/// stored blob records, and the remote ASP entry used for selection only.
fn registry() -> AspRegistry {
    let mut asps = framing_registry();
    for asp in &mut asps {
        if asp.name == SERIALIZE_GRAPH_ASP {
            *asp = sh_asp(SERIALIZE_GRAPH_ASP, r#"cat "$1"/nodes/*/data/blob.json"#);
        }
    }
    asps.push(
        sh_asp(SEND_EXECUTE_TCP_ASP, "exit 1")
            .with_capability(BLOB_MEASUREMENT_TYPE, SYSTEM_TARGET_TYPE),
    );
    AspRegistry::from_asps(asps)
}

fn with_worker(replacement: AspInfo) -> AspRegistry {
    AspRegistry::from_asps(registry().iter().map(|asp| {
        if asp.name == replacement.name {
            replacement.clone()
        } else {
            asp.clone()
        }
    }))
}

fn directory() -> RecordingDirectory {
    RecordingDirectory::new(&[
        ("dom0", "127.0.0.1", 9000),
        ("dom0-alt", "10.0.0.9", 9100),
        ("tgt", "127.0.0.1", 9001),
    ])
}

fn args(pairs: &[(&str, &str)]) -> Vec<KeyValue> {
    pairs.iter().map(|(k, v)| KeyValue::new(*k, *v)).collect()
}

fn scenario(workdir: &Path) -> Scenario {
    Scenario {
        workdir: Some(workdir.to_string_lossy().into_owned()),
        nonce: Some("run-nonce".into()),
        contract: vec![0xC0, 0xFF, 0xEE],
        ..Scenario::default()
    }
}

struct Run {
    result: Result<(), ApbError>,
    sent: Vec<u8>,
    scenario: Scenario,
}

fn execute(
    registry: &AspRegistry,
    directory: &RecordingDirectory,
    specs: &MemorySpecStore,
    channel: &MockChannel,
    verifier: &MockVerifier,
    args: &[KeyValue],
    workdir: &Path,
) -> Run {
    let runner = ProcessRunner::new();
    let userspace = AspUserspaceMeasurer::new(&runner);
    let collaborators = Collaborators {
        runner: &runner,
        channel,
        verifier,
        userspace: &userspace,
    };
    let graphs = workdir.join("graphs");
    fs::create_dir_all(&graphs).unwrap();
    let peer_path = workdir.join("peer.out");
    let peer = File::create(&peer_path).unwrap();
    let mut scenario = scenario(workdir);

    let result = LayeredAttestationApb::new(registry, directory, specs, collaborators)
        .with_graph_parent(Some(graphs.clone()))
        .execute(&mut scenario, Uuid::from_u128(SPEC_ID), args, Stdio::from(peer));

    // The run's graph is gone whatever the outcome.
    assert_eq!(fs::read_dir(&graphs).unwrap().count(), 0);
    Run {
        result,
        sent: fs::read(&peer_path).unwrap(),
        scenario,
    }
}

#[test]
fn test_full_run_sends_remote_evidence() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry();
    let directory = directory();
    let specs = MemorySpecStore::new(spec());
    let channel = MockChannel::returning(vec![0x01, 0x02, 0x03]);
    let verifier = MockVerifier::returning(vec![0xAA, 0xBB]);

    let run = execute(
        &registry,
        &directory,
        &specs,
        &channel,
        &verifier,
        &args(&[("@_0", "dom0"), ("@_t", "tgt")]),
        dir.path(),
    );

    run.result.unwrap();
    let sent = String::from_utf8(run.sent).unwrap();
    assert!(sent.starts_with("S(C("), "unexpected contract: {sent}");
    // Base64 of the verified payload 0xAA 0xBB.
    assert!(sent.contains("qrs="), "unexpected contract: {sent}");
    assert_eq!(run.scenario.contract, vec![0xC0, 0xFF, 0xEE]);
    assert_eq!(fs::read_to_string(dir.path().join("encrypted")).unwrap(), "0");
}

#[test]
fn test_duplicate_place_keeps_first() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry();
    let directory = directory();
    let specs = MemorySpecStore::new(spec());
    let channel = MockChannel::returning(vec![0x01, 0x02, 0x03]);
    let verifier = MockVerifier::returning(vec![0xAA, 0xBB]);

    let run = execute(
        &registry,
        &directory,
        &specs,
        &channel,
        &verifier,
        &args(&[("@_0", "dom0"), ("@_0", "dom0-alt"), ("@_t", "tgt")]),
        dir.path(),
    );

    run.result.unwrap();
    assert_eq!(*directory.lookups.borrow(), vec!["dom0".to_string(), "tgt".to_string()]);
}

#[test]
fn test_missing_place_fails_before_work() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry();
    let directory = directory();
    let specs = MemorySpecStore::new(spec());
    let channel = MockChannel::returning(vec![0x01]);
    let verifier = MockVerifier::returning(vec![0x01]);

    let run = execute(
        &registry,
        &directory,
        &specs,
        &channel,
        &verifier,
        &args(&[("@_t", "tgt"), ("@_x", "other")]),
        dir.path(),
    );

    let err = run.result.unwrap_err();
    assert!(matches!(err, ApbError::IncompletePlaces { .. }));
    assert_eq!(err.exit_code(), EXIT_USAGE);
    assert!(directory.lookups.borrow().is_empty());
    assert_eq!(specs.loads.get(), 0);
    assert_eq!(channel.call_count(), 0);
    assert!(run.sent.is_empty());
}

#[test]
fn test_unknown_spec_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry();
    let directory = directory();
    let mut other = spec();
    other.id = Uuid::from_u128(1);
    let specs = MemorySpecStore::new(other);
    let channel = MockChannel::returning(vec![0x01]);
    let verifier = MockVerifier::returning(vec![0x01]);

    let run = execute(
        &registry,
        &directory,
        &specs,
        &channel,
        &verifier,
        &args(&[("@_0", "dom0"), ("@_t", "tgt")]),
        dir.path(),
    );

    assert!(matches!(run.result, Err(ApbError::SpecLoad { .. })));
    assert_eq!(channel.call_count(), 0);
    assert!(run.sent.is_empty());
}

#[test]
fn test_measurement_failure_still_sends() {
    let dir = tempfile::tempdir().unwrap();
    // No blob record is stored, so the serializer emits a fixed marker.
    let registry = with_worker(sh_asp(SERIALIZE_GRAPH_ASP, "printf empty"));
    let directory = directory();
    let specs = MemorySpecStore::new(spec());
    let channel = MockChannel::returning(vec![0x01, 0x02, 0x03]);
    let verifier = MockVerifier::failing();

    let run = execute(
        &registry,
        &directory,
        &specs,
        &channel,
        &verifier,
        &args(&[("@_0", "dom0"), ("@_t", "tgt")]),
        dir.path(),
    );

    run.result.unwrap();
    assert_eq!(run.sent, b"S(C(empty))");
    assert_eq!(run.scenario.contract, vec![0xC0, 0xFF, 0xEE]);
}

#[test]
fn test_pipeline_failure_fails_run() {
    let dir = tempfile::tempdir().unwrap();
    let registry = with_worker(sh_asp(SEND_ASP, "cat > /dev/null; exit 2"));
    let directory = directory();
    let specs = MemorySpecStore::new(spec());
    let channel = MockChannel::returning(vec![0x01, 0x02, 0x03]);
    let verifier = MockVerifier::returning(vec![0xAA, 0xBB]);

    let run = execute(
        &registry,
        &directory,
        &specs,
        &channel,
        &verifier,
        &args(&[("@_0", "dom0"), ("@_t", "tgt")]),
        dir.path(),
    );

    match run.result.unwrap_err() {
        ApbError::Pipeline(PipelineError::StageFailed { stage, status }) => {
            assert_eq!(stage, SEND_ASP);
            assert_eq!(status, 2);
        },
        other => panic!("unexpected error: {other}"),
    }
}
