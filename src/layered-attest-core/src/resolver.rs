//! Address resolution for remote measurement requests.

use layered_attest_graph::{Address, DynamicMeasurementRequestAddress, MeasurementGraph, NodeId};

use crate::error::DispatchError;

/// Read the address recorded for a node.
pub fn node_address(graph: &MeasurementGraph, node: NodeId) -> Result<Address, DispatchError> {
    graph
        .variable(node)
        .map(|variable| variable.address)
        .map_err(|_| DispatchError::AddressUnavailable {
            node: node.to_string(),
        })
}

/// View an address as a measurement request, rejecting every other kind.
pub fn request_address(
    address: &Address,
    node: NodeId,
) -> Result<&DynamicMeasurementRequestAddress, DispatchError> {
    address
        .as_measurement_request()
        .ok_or_else(|| DispatchError::AddressKindMismatch {
            node: node.to_string(),
            found: address.space().to_string(),
        })
}

/// Resolve a node straight to its request descriptor.
pub fn resolve_request_address(
    graph: &MeasurementGraph,
    node: NodeId,
) -> Result<DynamicMeasurementRequestAddress, DispatchError> {
    let address = node_address(graph, node)?;
    request_address(&address, node).cloned()
}
