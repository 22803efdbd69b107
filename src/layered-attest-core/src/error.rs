//! Error types for the layered attestation APB.

use layered_attest_graph::GraphError;
use thiserror::Error;

/// EINVAL, the exit code for invocation errors.
pub const EXIT_USAGE: u8 = 22;
/// Exit code when a pipeline stage could not be started.
pub const EXIT_SPAWN_FAILED: u8 = 3;

/// Errors from invoking an ASP worker.
#[derive(Debug, Error)]
pub enum AspError {
    /// No worker with this name in the registry.
    #[error("ASP not found: {name}")]
    NotFound {
        /// Worker name.
        name: String,
    },

    /// The worker process could not be started.
    #[error("Failed to spawn ASP {name}: {source}")]
    Spawn {
        /// Worker name.
        name: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The worker did not finish within the timeout and was killed.
    #[error("ASP {name} timed out after {secs}s")]
    Timeout {
        /// Worker name.
        name: String,
        /// Timeout that elapsed.
        secs: u64,
    },

    /// The worker exited with a non-zero status.
    #[error("ASP {name} exited with status {status}")]
    Exited {
        /// Worker name.
        name: String,
        /// Exit status, `-1` if killed by a signal.
        status: i32,
    },

    /// Reading from or writing to the worker failed.
    #[error("I/O error talking to ASP {name}: {source}")]
    Io {
        /// Worker name.
        name: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl AspError {
    /// Status code equivalent of this error: the exit status for
    /// [`AspError::Exited`], `-2` for spawn failures and `-1` otherwise.
    #[must_use]
    pub fn status(&self) -> i32 {
        match self {
            Self::Exited { status, .. } => *status,
            Self::Spawn { .. } => -2,
            _ => -1,
        }
    }
}

/// Per-variable measurement failures reported to the evaluation engine.
///
/// None of these abort the run; the variable is simply left without evidence.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No registered ASP can take this (type, target) pair.
    #[error("No capable ASP for {measurement_type} on {target_type}")]
    NoCapableAsp {
        /// Requested measurement type.
        measurement_type: String,
        /// Target type of the variable.
        target_type: String,
    },

    /// The node has no readable address.
    #[error("Address unavailable for node {node}")]
    AddressUnavailable {
        /// Node id.
        node: String,
    },

    /// The node's address is not a measurement request.
    #[error("Node {node} has a {found} address, expected a measurement request")]
    AddressKindMismatch {
        /// Node id.
        node: String,
        /// Address space actually found.
        found: String,
    },

    /// The attester is not one of the two configured places.
    #[error("Unknown attester: {attester}")]
    UnknownAttester {
        /// Symbolic place name.
        attester: String,
    },

    /// The remote channel failed or timed out.
    #[error("Channel error: {message}")]
    ChannelError {
        /// Error message.
        message: String,
    },

    /// The returned contract did not verify.
    #[error("Contract verification failed: {reason}")]
    ContractVerificationFailed {
        /// Reason for failure.
        reason: String,
    },

    /// Measurement data could not be marshalled.
    #[error("Serialization failed: {reason}")]
    SerializationFailed {
        /// Reason for failure.
        reason: String,
    },

    /// Updating the measurement graph failed.
    #[error("Graph write failed: {reason}")]
    GraphWriteFailed {
        /// Reason for failure.
        reason: String,
    },

    /// A measurement worker exited non-zero or could not be run.
    #[error("ASP {asp} failed with status {status}")]
    WorkerFailed {
        /// Worker name.
        asp: String,
        /// Exit status as reported by the worker.
        status: i32,
    },
}

impl DispatchError {
    /// Create a channel error.
    #[must_use]
    pub fn channel(message: impl Into<String>) -> Self {
        Self::ChannelError {
            message: message.into(),
        }
    }

    /// Create a verification error.
    #[must_use]
    pub fn verification(reason: impl Into<String>) -> Self {
        Self::ContractVerificationFailed {
            reason: reason.into(),
        }
    }

    /// Create a serialization error.
    #[must_use]
    pub fn serialization(reason: impl Into<String>) -> Self {
        Self::SerializationFailed {
            reason: reason.into(),
        }
    }

    /// Create a graph write error from a graph failure.
    #[must_use]
    pub fn graph_write(err: GraphError) -> Self {
        Self::GraphWriteFailed {
            reason: err.to_string(),
        }
    }

    /// Check if this error points at a misconfigured spec, registry or
    /// place set rather than a transport or verification failure.
    #[must_use]
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::NoCapableAsp { .. }
                | Self::AddressUnavailable { .. }
                | Self::AddressKindMismatch { .. }
                | Self::UnknownAttester { .. }
        )
    }
}

/// Errors from the sign-send pipeline. Any of these fails the run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A pipeline worker is missing from the registry.
    #[error("Pipeline worker not found: {name}")]
    WorkerNotFound {
        /// Worker name.
        name: String,
    },

    /// The graph has no usable on-disk path.
    #[error("Graph path unavailable: {reason}")]
    GraphPathUnavailable {
        /// Reason the path cannot be used.
        reason: String,
    },

    /// The scenario has no working directory for the signing stage.
    #[error("Scenario has no working directory")]
    MissingWorkdir,

    /// A stage could not be started.
    #[error("Failed to spawn pipeline stage {stage}: {source}")]
    StageSpawnFailed {
        /// Stage worker name.
        stage: String,
        /// Spawn failure.
        #[source]
        source: AspError,
    },

    /// A stage exited non-zero.
    #[error("Pipeline stage {stage} failed with status {status}")]
    StageFailed {
        /// Stage worker name.
        stage: String,
        /// Exit status.
        status: i32,
    },

    /// Moving data into or out of a stage failed.
    #[error("I/O error in pipeline stage {stage}: {source}")]
    StageIo {
        /// Stage worker name.
        stage: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    /// Pipeline result code: `-2` when a stage could not be spawned, `-1`
    /// for every other failure.
    #[must_use]
    pub fn status(&self) -> i32 {
        match self {
            Self::StageSpawnFailed { .. } => -2,
            _ => -1,
        }
    }
}

/// Run-level failures of the APB.
#[derive(Debug, Error)]
pub enum ApbError {
    /// Invalid invocation arguments.
    #[error("Usage error: {message}")]
    Usage {
        /// Error message.
        message: String,
    },

    /// A place key could not be resolved.
    #[error("Failed to resolve place {place}: {reason}")]
    PlaceLookup {
        /// Place lookup key.
        place: String,
        /// Reason for failure.
        reason: String,
    },

    /// One or both required places were not supplied.
    #[error("Missing place argument(s): {missing}")]
    IncompletePlaces {
        /// Names of the missing places.
        missing: String,
    },

    /// The measurement specification could not be loaded.
    #[error("Failed to load measurement spec {spec}: {reason}")]
    SpecLoad {
        /// Spec identifier.
        spec: String,
        /// Reason for failure.
        reason: String,
    },

    /// Graph creation or access failed.
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// The sign-send pipeline failed.
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Configuration could not be loaded.
    #[error("Configuration error: {message}")]
    Config {
        /// Error message.
        message: String,
    },
}

impl ApbError {
    /// Create a configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Process exit code for this failure.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Usage { .. } | Self::IncompletePlaces { .. } => EXIT_USAGE,
            Self::Pipeline(PipelineError::StageSpawnFailed { .. }) => EXIT_SPAWN_FAILED,
            _ => 1,
        }
    }
}
