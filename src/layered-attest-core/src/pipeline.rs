//! Sign-send pipeline.
//!
//! serialize → compress → [encrypt] → create contract → send
//!
//! Every stage is a worker process. Stages are not connected by live pipes:
//! each stage runs to completion and its whole stdout is held in memory
//! before it is written to the next stage's stdin, so memory use grows with
//! the serialized graph. A stage that exits non-zero stops the chain, so the
//! send stage only ever sees a complete signed contract. The send stage
//! writes to the peer and its exit status is the pipeline result.

use std::path::Path;
use std::process::Stdio;

use layered_attest_graph::MeasurementGraph;
use tracing::{debug, info, instrument, warn};

use crate::asp::{
    exchange, exit_code, AspInfo, AspRegistry, AspRunner, COMPRESS_ASP, CREATE_CONTRACT_ASP,
    ENCRYPT_ASP, SEND_ASP, SERIALIZE_GRAPH_ASP,
};
use crate::error::PipelineError;
use crate::scenario::{Credentials, Scenario};

/// One stage before send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineStage<'r> {
    /// Worker run by this stage.
    pub asp: &'r AspInfo,
    /// Per-call arguments.
    pub args: Vec<String>,
}

impl PipelineStage<'_> {
    /// Worker name.
    pub fn name(&self) -> &str {
        &self.asp.name
    }
}

/// The stages of one pipeline run, decided before anything is spawned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelinePlan<'r> {
    /// Stages feeding the send stage, in order.
    pub stages: Vec<PipelineStage<'r>>,
    /// Final stage, writing to the peer.
    pub send: &'r AspInfo,
    /// Whether an encryption stage is included.
    pub encrypted: bool,
}

impl<'r> PipelinePlan<'r> {
    /// Resolve the workers and build the stage list.
    ///
    /// Fails before any process exists if a worker is missing, the graph
    /// path is unusable, or the scenario has no working directory.
    pub fn build(
        registry: &'r AspRegistry,
        graph_path: &Path,
        scenario: &Scenario,
        credentials: &Credentials,
    ) -> Result<Self, PipelineError> {
        let require = |name: &str| {
            registry
                .find(name)
                .ok_or_else(|| PipelineError::WorkerNotFound {
                    name: name.to_string(),
                })
        };
        let serialize = require(SERIALIZE_GRAPH_ASP)?;
        let compress = require(COMPRESS_ASP)?;
        let encrypt = require(ENCRYPT_ASP)?;
        let create_contract = require(CREATE_CONTRACT_ASP)?;
        let send = require(SEND_ASP)?;

        if !graph_path.is_dir() {
            return Err(PipelineError::GraphPathUnavailable {
                reason: format!("{} is not a directory", graph_path.display()),
            });
        }
        let workdir = scenario
            .workdir
            .as_deref()
            .filter(|dir| !dir.is_empty())
            .ok_or(PipelineError::MissingWorkdir)?;

        let mut stages = vec![
            PipelineStage {
                asp: serialize,
                args: vec![graph_path.to_string_lossy().into_owned()],
            },
            PipelineStage {
                asp: compress,
                args: Vec::new(),
            },
        ];

        let partner_cert = partner_certificate(scenario);
        if let Some(cert) = partner_cert {
            stages.push(PipelineStage {
                asp: encrypt,
                args: vec![cert.to_string()],
            });
        }
        let encrypted = partner_cert.is_some();

        stages.push(PipelineStage {
            asp: create_contract,
            args: vec![
                workdir.to_string(),
                credentials.certfile.clone(),
                credentials.keyfile.clone(),
                credentials.keypass.clone(),
                credentials.tpmpass.clone(),
                credentials.akctx.clone(),
                credentials.sign_tpm.clone(),
                // Serialized and compressed.
                "1".to_string(),
                "1".to_string(),
                if encrypted { "1" } else { "0" }.to_string(),
            ],
        });

        Ok(Self {
            stages,
            send,
            encrypted,
        })
    }

    /// Names of all stages including send, in execution order.
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages
            .iter()
            .map(PipelineStage::name)
            .chain(std::iter::once(self.send.name.as_str()))
            .collect()
    }

    /// Run the stages in order, then send to `peer`.
    #[instrument(skip_all, fields(stages = self.stages.len() + 1, encrypted = self.encrypted))]
    pub fn execute(&self, runner: &dyn AspRunner, peer: Stdio) -> Result<(), PipelineError> {
        let mut carried: Option<Vec<u8>> = None;
        for stage in &self.stages {
            let stdin = if carried.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            };
            let output = run_stage(
                runner,
                stage.asp,
                &stage.args,
                stdin,
                Stdio::piped(),
                carried.as_deref(),
            )?;
            debug!(stage = %stage.name(), bytes = output.len(), "Stage complete");
            carried = Some(output);
        }

        run_stage(runner, self.send, &[], Stdio::piped(), peer, carried.as_deref())?;
        info!(stage = %self.send.name, "Contract sent");
        Ok(())
    }
}

/// Build and run the pipeline for a completed graph.
pub fn run_pipeline(
    registry: &AspRegistry,
    graph: &MeasurementGraph,
    scenario: &Scenario,
    credentials: &Credentials,
    runner: &dyn AspRunner,
    peer: Stdio,
) -> Result<(), PipelineError> {
    let plan = PipelinePlan::build(registry, graph.path(), scenario, credentials)?;
    debug!(stages = ?plan.stage_names(), "Pipeline planned");
    plan.execute(runner, peer)
}

/// Partner certificate to encrypt for, if one is configured and present.
fn partner_certificate(scenario: &Scenario) -> Option<&str> {
    match scenario.partner_cert.as_deref() {
        None | Some("") => {
            debug!("No partner certificate, contract will not be encrypted");
            None
        },
        Some(cert) if !Path::new(cert).is_file() => {
            warn!(cert = %cert, "Partner certificate not found, contract will not be encrypted");
            None
        },
        Some(cert) => Some(cert),
    }
}

fn run_stage(
    runner: &dyn AspRunner,
    asp: &AspInfo,
    args: &[String],
    stdin: Stdio,
    stdout: Stdio,
    input: Option<&[u8]>,
) -> Result<Vec<u8>, PipelineError> {
    let mut child = runner
        .spawn(asp, args, stdin, stdout)
        .map_err(|source| PipelineError::StageSpawnFailed {
            stage: asp.name.clone(),
            source,
        })?;

    let (status, output) = match exchange(&mut child, input, None) {
        Ok(Some(finished)) => finished,
        // Without a timeout the wait always completes.
        Ok(None) => {
            return Err(PipelineError::StageFailed {
                stage: asp.name.clone(),
                status: -1,
            })
        },
        Err(source) => {
            return Err(PipelineError::StageIo {
                stage: asp.name.clone(),
                source,
            })
        },
    };

    if !status.success() {
        let status = exit_code(status);
        warn!(stage = %asp.name, status, "Pipeline stage failed");
        return Err(PipelineError::StageFailed {
            stage: asp.name.clone(),
            status,
        });
    }
    Ok(output)
}
