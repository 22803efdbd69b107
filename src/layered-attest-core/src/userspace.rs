//! Standard userspace measurement through a selected ASP.

use layered_attest_graph::{MeasurementGraph, MeasurementType, MeasurementVariable};
use tracing::{debug, warn};

use crate::asp::{AspInfo, AspRunner};
use crate::error::DispatchError;
use crate::scenario::Credentials;

/// Performs ordinary (non-kernel, non-remote) measurements.
pub trait UserspaceMeasurer {
    /// Measure `variable` with `asp`, recording the result in `graph`.
    fn measure(
        &self,
        graph: &MeasurementGraph,
        variable: &MeasurementVariable,
        measurement_type: &MeasurementType,
        asp: &AspInfo,
        credentials: &Credentials,
    ) -> Result<(), DispatchError>;
}

/// Runs the ASP with `[graph path, node id, certfile, keyfile]`; the ASP
/// maps the graph and attaches its own data.
pub struct AspUserspaceMeasurer<'a> {
    runner: &'a dyn AspRunner,
}

impl<'a> AspUserspaceMeasurer<'a> {
    /// Create a measurer.
    pub fn new(runner: &'a dyn AspRunner) -> Self {
        Self { runner }
    }
}

impl UserspaceMeasurer for AspUserspaceMeasurer<'_> {
    fn measure(
        &self,
        graph: &MeasurementGraph,
        variable: &MeasurementVariable,
        measurement_type: &MeasurementType,
        asp: &AspInfo,
        credentials: &Credentials,
    ) -> Result<(), DispatchError> {
        let node = graph
            .add_node(variable)
            .map_err(DispatchError::graph_write)?
            .id();
        if graph.has_data(node, measurement_type) {
            debug!(node = %node, "Node already measured");
            return Ok(());
        }

        let args = vec![
            graph.path().to_string_lossy().into_owned(),
            node.to_string(),
            credentials.certfile.clone(),
            credentials.keyfile.clone(),
        ];
        let status = self.runner.run(asp, &args).map_err(|e| {
            warn!(asp = %asp.name, error = %e, "Failed to run measurement ASP");
            DispatchError::WorkerFailed {
                asp: asp.name.clone(),
                status: e.status(),
            }
        })?;

        match status {
            0 => Ok(()),
            status => Err(DispatchError::WorkerFailed {
                asp: asp.name.clone(),
                status,
            }),
        }
    }
}
