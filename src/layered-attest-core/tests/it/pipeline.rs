//! Sign-send pipeline against shell-script workers.

use std::fs::{self, File};
use std::path::Path;
use std::process::Stdio;

use layered_attest_core::asp::{
    COMPRESS_ASP, CREATE_CONTRACT_ASP, ENCRYPT_ASP, SEND_ASP, SERIALIZE_GRAPH_ASP,
};
use layered_attest_core::{
    run_pipeline, AspInfo, AspRegistry, Credentials, PipelineError, ProcessRunner, Scenario,
};
use layered_attest_graph::MeasurementGraph;

/// Run `script` with `/bin/sh -c`; per-call arguments become `$1`, `$2`, ...
pub fn sh_asp(name: &str, script: &str) -> AspInfo {
    AspInfo::new(name, "/bin/sh").with_args(["-c", script, name])
}

/// Workers that frame their input so the peer output shows the stage order.
/// The signing stage records its encryption flag in the workdir.
pub fn framing_registry() -> Vec<AspInfo> {
    vec![
        sh_asp(SERIALIZE_GRAPH_ASP, r#"[ -f "$1/graph.json" ] || exit 7; printf abc"#),
        sh_asp(COMPRESS_ASP, "printf 'C('; cat; printf ')'"),
        sh_asp(ENCRYPT_ASP, r#"[ -f "$1" ] || exit 8; printf 'E('; cat; printf ')'"#),
        sh_asp(
            CREATE_CONTRACT_ASP,
            r#"printf '%s' "${10}" > "$1/encrypted"; printf 'S('; cat; printf ')'"#,
        ),
        sh_asp(SEND_ASP, "cat"),
    ]
}

fn replace(asps: Vec<AspInfo>, replacement: AspInfo) -> AspRegistry {
    AspRegistry::from_asps(asps.into_iter().map(|asp| {
        if asp.name == replacement.name {
            replacement.clone()
        } else {
            asp
        }
    }))
}

fn scenario(workdir: &Path) -> Scenario {
    Scenario {
        workdir: Some(workdir.to_string_lossy().into_owned()),
        certfile: Some("apb.pem".into()),
        keyfile: Some("apb.key".into()),
        ..Scenario::default()
    }
}

fn run(registry: &AspRegistry, scenario: &Scenario, workdir: &Path) -> (Result<(), PipelineError>, Vec<u8>) {
    let graph = MeasurementGraph::create(Some(workdir)).unwrap();
    let peer_path = workdir.join("peer.out");
    let peer = File::create(&peer_path).unwrap();

    let result = run_pipeline(
        registry,
        &graph,
        scenario,
        &Credentials::stage(scenario),
        &ProcessRunner::new(),
        Stdio::from(peer),
    );
    (result, fs::read(&peer_path).unwrap())
}

#[test]
fn test_unencrypted_pipeline_sends_signed_compressed_graph() {
    let dir = tempfile::tempdir().unwrap();
    let registry = AspRegistry::from_asps(framing_registry());

    let (result, sent) = run(&registry, &scenario(dir.path()), dir.path());

    result.unwrap();
    assert_eq!(sent, b"S(C(abc))");
    assert_eq!(fs::read_to_string(dir.path().join("encrypted")).unwrap(), "0");
}

#[test]
fn test_encrypted_pipeline_with_partner_cert() {
    let dir = tempfile::tempdir().unwrap();
    let cert = dir.path().join("appraiser.pem");
    fs::write(&cert, "-----BEGIN CERTIFICATE-----").unwrap();
    let registry = AspRegistry::from_asps(framing_registry());
    let scenario = Scenario {
        partner_cert: Some(cert.to_string_lossy().into_owned()),
        ..scenario(dir.path())
    };

    let (result, sent) = run(&registry, &scenario, dir.path());

    result.unwrap();
    assert_eq!(sent, b"S(E(C(abc)))");
    assert_eq!(fs::read_to_string(dir.path().join("encrypted")).unwrap(), "1");
}

#[test]
fn test_failed_stage_sends_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let registry = replace(
        framing_registry(),
        sh_asp(CREATE_CONTRACT_ASP, "cat > /dev/null; exit 4"),
    );

    let (result, sent) = run(&registry, &scenario(dir.path()), dir.path());

    match result.unwrap_err() {
        PipelineError::StageFailed { stage, status } => {
            assert_eq!(stage, CREATE_CONTRACT_ASP);
            assert_eq!(status, 4);
        },
        other => panic!("unexpected error: {other}"),
    }
    assert!(sent.is_empty());
}

#[test]
fn test_spawn_failure_halts_chain() {
    let dir = tempfile::tempdir().unwrap();
    let registry = replace(
        framing_registry(),
        AspInfo::new(COMPRESS_ASP, dir.path().join("missing_compress_asp")),
    );

    let (result, sent) = run(&registry, &scenario(dir.path()), dir.path());

    let err = result.unwrap_err();
    assert!(matches!(err, PipelineError::StageSpawnFailed { ref stage, .. } if stage == COMPRESS_ASP));
    assert_eq!(err.status(), -2);
    assert!(sent.is_empty());
    assert!(!dir.path().join("encrypted").exists());
}

#[test]
fn test_send_failure_fails_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let registry = replace(framing_registry(), sh_asp(SEND_ASP, "cat > /dev/null; exit 1"));

    let (result, _) = run(&registry, &scenario(dir.path()), dir.path());

    let err = result.unwrap_err();
    assert!(matches!(err, PipelineError::StageFailed { ref stage, status: 1 } if stage == SEND_ASP));
    assert_eq!(err.status(), -1);
}

#[test]
fn test_missing_worker_spawns_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let registry = AspRegistry::from_asps(
        framing_registry()
            .into_iter()
            .filter(|asp| asp.name != SEND_ASP),
    );

    let (result, sent) = run(&registry, &scenario(dir.path()), dir.path());

    assert!(matches!(result, Err(PipelineError::WorkerNotFound { .. })));
    assert!(sent.is_empty());
    assert!(!dir.path().join("encrypted").exists());
}
