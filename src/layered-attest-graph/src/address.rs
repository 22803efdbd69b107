//! Address spaces for measurement variables.
//!
//! Every address carries its space as the serde tag, so a node's recorded
//! address can be matched back to the concrete variant instead of being
//! reinterpreted.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Location of a measurement target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "space", rename_all = "snake_case")]
pub enum Address {
    /// A file identified by path and inode.
    File(FileAddress),
    /// A process identified by pid.
    Pid(PidAddress),
    /// The running kernel.
    Kernel,
    /// Evidence that must be produced by a named remote attester.
    MeasurementRequest(DynamicMeasurementRequestAddress),
}

impl Address {
    /// Name of the address space.
    pub fn space(&self) -> &'static str {
        match self {
            Self::File(_) => "file",
            Self::Pid(_) => "pid",
            Self::Kernel => "kernel",
            Self::MeasurementRequest(_) => "measurement_request",
        }
    }

    /// Borrow the request descriptor if this is a dynamic measurement request.
    pub fn as_measurement_request(&self) -> Option<&DynamicMeasurementRequestAddress> {
        match self {
            Self::MeasurementRequest(request) => Some(request),
            _ => None,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(file) => write!(f, "file:{}", file.path.display()),
            Self::Pid(pid) => write!(f, "pid:{}", pid.pid),
            Self::Kernel => f.write_str("kernel"),
            Self::MeasurementRequest(request) => {
                write!(f, "request:{}@{}", request.resource, request.attester)
            },
        }
    }
}

/// File address as recorded by file-oriented ASPs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileAddress {
    /// Absolute path of the file.
    pub path: PathBuf,
    /// Device major number.
    #[serde(default)]
    pub device_major: u64,
    /// Device minor number.
    #[serde(default)]
    pub device_minor: u64,
    /// Inode number.
    #[serde(default)]
    pub inode: u64,
    /// File size in bytes at the time the address was taken.
    #[serde(default)]
    pub size: u64,
}

impl FileAddress {
    /// Address a file by path only.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            device_major: 0,
            device_minor: 0,
            inode: 0,
            size: 0,
        }
    }
}

/// Process address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PidAddress {
    /// Process id.
    pub pid: u32,
}

/// "Measure this by asking `attester` to execute `resource`."
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DynamicMeasurementRequestAddress {
    /// Symbolic place name of the attester (`@_0`, `@_t`).
    pub attester: String,
    /// Resource the attester should execute.
    pub resource: String,
}

impl DynamicMeasurementRequestAddress {
    /// Create a request address.
    pub fn new(attester: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            attester: attester.into(),
            resource: resource.into(),
        }
    }
}
