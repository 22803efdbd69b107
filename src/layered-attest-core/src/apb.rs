//! Layered attestation APB entry point.
//!
//! One run: parse place arguments, resolve both places, load the spec,
//! create the graph, stage credentials, measure, then sign and send.
//! Everything acquired along the way is owned by a local of
//! [`LayeredAttestationApb::execute`] and released when it goes out of
//! scope, in reverse order of acquisition.

use std::path::PathBuf;
use std::process::Stdio;

use layered_attest_graph::MeasurementGraph;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::asp::AspRegistry;
use crate::dispatcher::{Collaborators, MeasurementDispatcher};
use crate::error::ApbError;
use crate::pipeline::run_pipeline;
use crate::places::{KeyValue, PlaceArgs, PlaceDirectory, ResolvedPlaces};
use crate::scenario::{Credentials, Scenario};
use crate::spec::{EvaluationSummary, MeasurementSpec, SpecEvaluator, SpecStore};

/// Phases of a run, logged as it progresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Validating place arguments.
    ParsingArgs,
    /// Looking up both places.
    ResolvingPlaces,
    /// Loading the measurement spec.
    LoadingSpec,
    /// Evaluating the spec into the graph.
    Measuring,
    /// Running the sign-send pipeline.
    Pipelining,
    /// Run finished.
    Terminal {
        /// Whether the run succeeded.
        success: bool,
    },
}

/// The layered attestation APB.
pub struct LayeredAttestationApb<'a> {
    registry: &'a AspRegistry,
    directory: &'a dyn PlaceDirectory,
    specs: &'a dyn SpecStore,
    collaborators: Collaborators<'a>,
    evaluator: SpecEvaluator,
    graph_parent: Option<PathBuf>,
}

impl<'a> LayeredAttestationApb<'a> {
    /// Create an APB over its collaborators.
    pub fn new(
        registry: &'a AspRegistry,
        directory: &'a dyn PlaceDirectory,
        specs: &'a dyn SpecStore,
        collaborators: Collaborators<'a>,
    ) -> Self {
        Self {
            registry,
            directory,
            specs,
            collaborators,
            evaluator: SpecEvaluator::default(),
            graph_parent: None,
        }
    }

    /// Create measurement graphs under `parent` instead of the temp dir.
    #[must_use]
    pub fn with_graph_parent(mut self, parent: Option<PathBuf>) -> Self {
        self.graph_parent = parent;
        self
    }

    /// Run one attestation and send the signed contract to `peer`.
    ///
    /// Measurement failures are logged and do not stop the run; a pipeline
    /// failure fails it.
    #[instrument(skip_all, fields(spec = %spec_id))]
    pub fn execute(
        &self,
        scenario: &mut Scenario,
        spec_id: Uuid,
        args: &[KeyValue],
        peer: Stdio,
    ) -> Result<(), ApbError> {
        let result = self.run(scenario, spec_id, args, peer);
        enter(Phase::Terminal {
            success: result.is_ok(),
        });
        if let Err(err) = &result {
            error!(error = %err, "Layered attestation failed");
        }
        result
    }

    fn run(
        &self,
        scenario: &mut Scenario,
        spec_id: Uuid,
        args: &[KeyValue],
        peer: Stdio,
    ) -> Result<(), ApbError> {
        let places = self.resolve_places(args)?;

        enter(Phase::LoadingSpec);
        let spec = self.specs.load(spec_id)?;

        let graph = MeasurementGraph::create(self.graph_parent.as_deref())?;
        let credentials = Credentials::stage(scenario);

        let summary = self.measure(&graph, &spec, &places, &credentials, scenario);
        if !summary.is_complete() {
            // Partial evidence is still sent.
            warn!(
                measured = summary.measured,
                failed = summary.failed,
                "Measurement incomplete, continuing"
            );
        }

        enter(Phase::Pipelining);
        run_pipeline(
            self.registry,
            &graph,
            scenario,
            &credentials,
            self.collaborators.runner,
            peer,
        )?;

        info!(measured = summary.measured, "Layered attestation complete");
        Ok(())
    }

    /// Parse place arguments and resolve both places.
    pub fn resolve_places(&self, args: &[KeyValue]) -> Result<ResolvedPlaces, ApbError> {
        enter(Phase::ParsingArgs);
        let place_args = PlaceArgs::parse(args)?;

        enter(Phase::ResolvingPlaces);
        ResolvedPlaces::resolve(self.directory, &place_args)
    }

    /// Evaluate `spec` into `graph` with the measurement dispatcher.
    pub fn measure(
        &self,
        graph: &MeasurementGraph,
        spec: &MeasurementSpec,
        places: &ResolvedPlaces,
        credentials: &Credentials,
        scenario: &mut Scenario,
    ) -> EvaluationSummary {
        enter(Phase::Measuring);
        let mut dispatcher = MeasurementDispatcher::new(
            self.registry,
            places,
            credentials,
            scenario,
            self.collaborators,
        );
        let summary = self.evaluator.evaluate(spec, graph, &mut dispatcher);
        debug!(
            selections = dispatcher.counter().total(),
            measured = summary.measured,
            failed = summary.failed,
            "Measurement pass finished"
        );
        summary
    }
}

fn enter(phase: Phase) {
    debug!(phase = ?phase, "APB phase");
}
