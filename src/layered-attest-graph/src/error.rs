//! Error types for graph operations.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors that can occur while reading or writing a measurement graph.
#[derive(Debug, Error)]
pub enum GraphError {
    /// Filesystem access to the graph failed.
    #[error("Graph I/O error at {}: {source}", path.display())]
    Io {
        /// Path that was being accessed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A variable or data record could not be (de)serialized.
    #[error("Serialization error: {reason}")]
    Serialization {
        /// Reason for the failure.
        reason: String,
    },

    /// No node with this id exists in the graph.
    #[error("Node not found: {id}")]
    NodeNotFound {
        /// The node id that was looked up.
        id: String,
    },

    /// The directory does not contain a measurement graph.
    #[error("Not a measurement graph: {}", path.display())]
    NotAGraph {
        /// Directory that was mapped.
        path: PathBuf,
    },

    /// A node id string could not be parsed.
    #[error("Invalid node id: {value}")]
    InvalidNodeId {
        /// The rejected input.
        value: String,
    },

    /// A measurement type name cannot be used as a record name.
    #[error("Invalid measurement type name: {name}")]
    InvalidTypeName {
        /// The rejected type name.
        name: String,
    },
}

impl GraphError {
    /// Create an I/O error for a path.
    #[must_use]
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Create a serialization error from a reason.
    #[must_use]
    pub fn serialization(reason: impl Into<String>) -> Self {
        Self::Serialization {
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for GraphError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}
