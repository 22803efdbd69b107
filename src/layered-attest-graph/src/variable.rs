//! Measurement variables and the type names that qualify them.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::address::Address;

/// Measurement type produced by the kernel measurement ASP.
pub const KERNEL_MEASUREMENT_TYPE: &str = "kernel_measurement";
/// Opaque byte buffer, used for evidence extracted from remote contracts.
pub const BLOB_MEASUREMENT_TYPE: &str = "blob";
/// Parsed `/proc/net/raw6` table.
pub const NETSTAT_RAW6_MEASUREMENT_TYPE: &str = "netstat_raw6";

/// Target type for files.
pub const FILE_TARGET_TYPE: &str = "file";
/// Target type for running processes.
pub const PROCESS_TARGET_TYPE: &str = "process";
/// Target type for the running kernel.
pub const KERNEL_TARGET_TYPE: &str = "kernel";
/// Target type for whole-system evidence gathered by another attester.
pub const SYSTEM_TARGET_TYPE: &str = "system";

/// Name of a kind of measurement data (e.g. `blob`, `kernel_measurement`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MeasurementType(String);

impl MeasurementType {
    /// Create a measurement type from its name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The kernel measurement type.
    pub fn kernel() -> Self {
        Self::new(KERNEL_MEASUREMENT_TYPE)
    }

    /// The blob measurement type.
    pub fn blob() -> Self {
        Self::new(BLOB_MEASUREMENT_TYPE)
    }

    /// Type name.
    pub fn name(&self) -> &str {
        &self.0
    }

    /// Whether this is the kernel measurement type.
    pub fn is_kernel(&self) -> bool {
        self.0 == KERNEL_MEASUREMENT_TYPE
    }
}

impl fmt::Display for MeasurementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name of the kind of object a variable refers to (e.g. `file`, `system`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetType(String);

impl TargetType {
    /// Create a target type from its name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Type name.
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What is measured: a target type paired with an address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MeasurementVariable {
    /// Kind of target.
    pub target_type: TargetType,
    /// Where the target lives.
    pub address: Address,
}

impl MeasurementVariable {
    /// Create a new measurement variable.
    pub fn new(target_type: TargetType, address: Address) -> Self {
        Self {
            target_type,
            address,
        }
    }
}

impl fmt::Display for MeasurementVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.target_type, self.address)
    }
}
