//! Typed measurement data and its marshalled form.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::GraphError;
use crate::variable::{MeasurementType, BLOB_MEASUREMENT_TYPE, NETSTAT_RAW6_MEASUREMENT_TYPE};

/// Data that can be stored on a graph node.
pub trait MeasurementData: Serialize + DeserializeOwned {
    /// Measurement type name this data is stored under.
    const TYPE: &'static str;

    /// The measurement type of this data.
    fn measurement_type() -> MeasurementType {
        MeasurementType::new(Self::TYPE)
    }

    /// Serialize into the graph-storable form.
    fn marshal(&self) -> Result<MarshalledData, GraphError> {
        Ok(MarshalledData {
            measurement_type: Self::measurement_type(),
            payload: serde_json::to_value(self)?,
        })
    }
}

/// Measurement data in the form it is stored on a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarshalledData {
    /// Type tag.
    pub measurement_type: MeasurementType,
    /// Type-specific payload.
    pub payload: serde_json::Value,
}

impl MarshalledData {
    /// Decode the payload as `T`, checking the type tag first.
    pub fn unmarshal<T: MeasurementData>(&self) -> Result<T, GraphError> {
        if self.measurement_type.name() != T::TYPE {
            return Err(GraphError::serialization(format!(
                "expected {} data, found {}",
                T::TYPE,
                self.measurement_type
            )));
        }
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// Opaque byte buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobData {
    /// Raw bytes, base64 on disk.
    #[serde(with = "base64_bytes")]
    pub buffer: Vec<u8>,
}

impl BlobData {
    /// Wrap a buffer.
    pub fn new(buffer: Vec<u8>) -> Self {
        Self { buffer }
    }
}

impl MeasurementData for BlobData {
    const TYPE: &'static str = BLOB_MEASUREMENT_TYPE;
}

/// One socket entry from `/proc/net/raw6`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetstatRaw6Line {
    /// `[addr]:port` of the local end.
    pub local_addr: String,
    /// `[addr]:port` of the remote end.
    pub rem_addr: String,
    /// Socket state as printed by the kernel (hex).
    pub state: String,
    /// Owning uid.
    pub uid: u32,
    /// Socket inode.
    pub inode: u64,
}

/// Parsed `/proc/net/raw6` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetstatRaw6Data {
    /// Socket entries in file order.
    pub lines: Vec<NetstatRaw6Line>,
}

impl MeasurementData for NetstatRaw6Data {
    const TYPE: &'static str = NETSTAT_RAW6_MEASUREMENT_TYPE;
}

/// Serde adapter storing `Vec<u8>` as standard base64.
pub mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize bytes as a base64 string.
    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    /// Deserialize bytes from a base64 string.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
