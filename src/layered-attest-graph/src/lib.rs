//! # layered-attest-graph
//!
//! The evidence store for one layered attestation run.
//!
//! A measurement graph is a directory on disk. The APB creates it, hands its
//! path to measurement ASPs (separate processes), and those ASPs map the same
//! directory to attach their results to the node they were asked to measure.
//!
//! ```text
//! <graph>/
//!   graph.json              marker + format version
//!   next_id                 node id allocator
//!   index/<sha256(var)>     variable -> node id
//!   nodes/<id>/variable.json
//!   nodes/<id>/data/<type>.json
//! ```
//!
//! Nodes are keyed by [`NodeId`]; each associates a [`MeasurementVariable`]
//! (what is measured) with zero or more [`MarshalledData`] payloads, at most
//! one per [`MeasurementType`].

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)] // Allow Type in module::Type
#![allow(clippy::must_use_candidate)] // Not all functions need must_use

mod address;
mod data;
mod error;
mod graph;
mod variable;

pub use address::{Address, DynamicMeasurementRequestAddress, FileAddress, PidAddress};
pub use data::{
    base64_bytes, BlobData, MarshalledData, MeasurementData, NetstatRaw6Data, NetstatRaw6Line,
};
pub use error::GraphError;
pub use graph::{AddOutcome, MeasurementGraph, NodeId};
pub use variable::{
    MeasurementType, MeasurementVariable, TargetType, BLOB_MEASUREMENT_TYPE, FILE_TARGET_TYPE,
    KERNEL_MEASUREMENT_TYPE, KERNEL_TARGET_TYPE, NETSTAT_RAW6_MEASUREMENT_TYPE,
    PROCESS_TARGET_TYPE, SYSTEM_TARGET_TYPE,
};
