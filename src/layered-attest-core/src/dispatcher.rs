//! Measurement dispatcher.
//!
//! The `measure_variable` callback handed to the evaluation engine. Each
//! (variable, type) pair is routed by the ASP the selector picks:
//!
//! - the kernel measurement ASP is run directly against the graph,
//! - the remote execute ASP makes the variable a remote-layered measurement,
//!   answered by another attester with a signed contract,
//! - anything else goes to the userspace measurer.

use layered_attest_graph::{
    BlobData, MeasurementData, MeasurementGraph, MeasurementType, MeasurementVariable,
};
use tracing::{debug, info, instrument, warn};

use crate::asp::{AspInfo, AspRegistry, AspRunner, KERNEL_MSMT_ASP, SEND_EXECUTE_TCP_ASP};
use crate::contract::{ContractSwap, ContractVerifier};
use crate::error::DispatchError;
use crate::places::ResolvedPlaces;
use crate::remote::RemoteChannel;
use crate::resolver::resolve_request_address;
use crate::scenario::{Credentials, Scenario};
use crate::selector::{select_asp, SelectionCounter};
use crate::spec::MeasurementCallbacks;
use crate::userspace::UserspaceMeasurer;

/// External collaborators used by the dispatcher.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    /// Worker invocation.
    pub runner: &'a dyn AspRunner,
    /// Remote attester channel.
    pub channel: &'a dyn RemoteChannel,
    /// Contract verification.
    pub verifier: &'a dyn ContractVerifier,
    /// Default userspace measurement.
    pub userspace: &'a dyn UserspaceMeasurer,
}

/// Measurement strategy for a selected ASP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Run the kernel measurement ASP on the node.
    KernelDirect,
    /// Ask a remote attester and store its verified payload.
    RemoteLayered,
    /// Delegate to the userspace measurer.
    Userspace,
}

impl Strategy {
    /// Strategy implied by the selected ASP.
    pub fn for_asp(asp: &AspInfo) -> Self {
        match asp.name.as_str() {
            KERNEL_MSMT_ASP => Self::KernelDirect,
            SEND_EXECUTE_TCP_ASP => Self::RemoteLayered,
            _ => Self::Userspace,
        }
    }
}

/// Routes measurement callbacks to the three strategies.
pub struct MeasurementDispatcher<'a> {
    registry: &'a AspRegistry,
    places: &'a ResolvedPlaces,
    credentials: &'a Credentials,
    scenario: &'a mut Scenario,
    collaborators: Collaborators<'a>,
    counter: SelectionCounter,
}

impl<'a> MeasurementDispatcher<'a> {
    /// Create a dispatcher for one run.
    pub fn new(
        registry: &'a AspRegistry,
        places: &'a ResolvedPlaces,
        credentials: &'a Credentials,
        scenario: &'a mut Scenario,
        collaborators: Collaborators<'a>,
    ) -> Self {
        Self {
            registry,
            places,
            credentials,
            scenario,
            collaborators,
            counter: SelectionCounter::new(),
        }
    }

    /// Selections made so far.
    pub fn counter(&self) -> &SelectionCounter {
        &self.counter
    }

    fn measure_kernel(
        &self,
        graph: &MeasurementGraph,
        variable: &MeasurementVariable,
        measurement_type: &MeasurementType,
        asp: &AspInfo,
    ) -> Result<(), DispatchError> {
        let node = graph
            .add_node(variable)
            .map_err(DispatchError::graph_write)?
            .id();
        if graph.has_data(node, measurement_type) {
            debug!(node = %node, "Kernel already measured");
            return Ok(());
        }

        let args = vec![graph.path().to_string_lossy().into_owned(), node.to_string()];
        let status = self.collaborators.runner.run(asp, &args).map_err(|e| {
            warn!(asp = %asp.name, error = %e, "Failed to run kernel measurement ASP");
            DispatchError::WorkerFailed {
                asp: asp.name.clone(),
                status: e.status(),
            }
        })?;

        if status != 0 {
            return Err(DispatchError::WorkerFailed {
                asp: asp.name.clone(),
                status,
            });
        }
        Ok(())
    }

    fn measure_remote(
        &mut self,
        graph: &MeasurementGraph,
        variable: &MeasurementVariable,
        measurement_type: &MeasurementType,
    ) -> Result<(), DispatchError> {
        let outcome = graph.add_node(variable).map_err(DispatchError::graph_write)?;
        let node = outcome.id();
        if graph.has_data(node, measurement_type) {
            debug!(node = %node, "Remote measurement already present");
            return Ok(());
        }

        let request = match resolve_request_address(graph, node) {
            Ok(request) => request,
            Err(err) => {
                // A node added just for this request must not outlive it.
                if outcome.is_new() {
                    if let Err(e) = graph.remove_node(node) {
                        warn!(node = %node, error = %e, "Failed to roll back node");
                    }
                }
                return Err(err);
            },
        };

        let place = self.places.resolve_attester(&request.attester)?;
        let received = self
            .collaborators
            .channel
            .execute(place, &request.resource, self.credentials)?;

        let payload = {
            let swap = ContractSwap::new(&mut *self.scenario, received);
            self.collaborators.verifier.process_contract(swap.scenario())
        }?;

        let data = BlobData::new(payload)
            .marshal()
            .map_err(|e| DispatchError::serialization(e.to_string()))?;
        graph
            .add_data(node, &data)
            .map_err(DispatchError::graph_write)?;

        info!(
            node = %node,
            attester = %request.attester,
            resource = %request.resource,
            "Stored remote measurement"
        );
        Ok(())
    }
}

impl MeasurementCallbacks for MeasurementDispatcher<'_> {
    #[instrument(skip_all, fields(variable = %variable, measurement_type = %measurement_type))]
    fn measure_variable(
        &mut self,
        graph: &MeasurementGraph,
        variable: &MeasurementVariable,
        measurement_type: &MeasurementType,
    ) -> Result<(), DispatchError> {
        let asp = select_asp(self.registry, measurement_type, variable, &mut self.counter)?;
        let strategy = Strategy::for_asp(asp);
        debug!(asp = %asp.name, strategy = ?strategy, "Dispatching measurement");

        match strategy {
            Strategy::KernelDirect => self.measure_kernel(graph, variable, measurement_type, asp),
            Strategy::RemoteLayered => self.measure_remote(graph, variable, measurement_type),
            Strategy::Userspace => self.collaborators.userspace.measure(
                graph,
                variable,
                measurement_type,
                asp,
                self.credentials,
            ),
        }
    }
}
