//! File-backed measurement graph.
//!
//! The APB owns the graph it creates; ASPs [`map`](MeasurementGraph::map) the
//! same directory by path. Node allocation assumes a single writer at a time,
//! which holds because the APB blocks on every ASP it launches.

use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::TempDir;
use tracing::debug;

use crate::data::MarshalledData;
use crate::error::GraphError;
use crate::variable::{MeasurementType, MeasurementVariable};

const GRAPH_PREFIX: &str = "msmt-graph-";
const GRAPH_FORMAT_VERSION: u32 = 1;
const MARKER_FILE: &str = "graph.json";
const NEXT_ID_FILE: &str = "next_id";
const NODES_DIR: &str = "nodes";
const INDEX_DIR: &str = "index";
const DATA_DIR: &str = "data";
const VARIABLE_FILE: &str = "variable.json";

/// Opaque node identifier, rendered as 16 lowercase hex digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u64);

impl NodeId {
    /// Raw value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for NodeId {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let invalid = || GraphError::InvalidNodeId {
            value: s.to_string(),
        };
        if trimmed.is_empty() || trimmed.len() > 16 {
            return Err(invalid());
        }
        u64::from_str_radix(trimmed, 16)
            .map(NodeId)
            .map_err(|_| invalid())
    }
}

/// Result of [`MeasurementGraph::add_node`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// A new node was created.
    Added(NodeId),
    /// A node for this variable already existed.
    Existing(NodeId),
}

impl AddOutcome {
    /// The node id, new or existing.
    pub fn id(self) -> NodeId {
        match self {
            Self::Added(id) | Self::Existing(id) => id,
        }
    }

    /// Whether this call created the node.
    pub fn is_new(self) -> bool {
        matches!(self, Self::Added(_))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct GraphMarker {
    version: u32,
}

/// Handle to a measurement graph directory.
#[derive(Debug)]
pub struct MeasurementGraph {
    root: PathBuf,
    /// Set when this handle created the graph; dropping it removes the directory.
    owner: Option<TempDir>,
}

impl MeasurementGraph {
    /// Create a new, empty graph in a fresh directory under `parent`
    /// (the system temp directory if `None`).
    pub fn create(parent: Option<&Path>) -> Result<Self, GraphError> {
        let created = match parent {
            Some(parent) => tempfile::Builder::new()
                .prefix(GRAPH_PREFIX)
                .tempdir_in(parent),
            None => tempfile::Builder::new().prefix(GRAPH_PREFIX).tempdir(),
        };
        let dir = created.map_err(|source| GraphError::Io {
            path: parent
                .map(Path::to_path_buf)
                .unwrap_or_else(std::env::temp_dir),
            source,
        })?;

        let graph = Self {
            root: dir.path().to_path_buf(),
            owner: Some(dir),
        };
        graph.init_layout()?;

        debug!(path = %graph.root.display(), "Created measurement graph");
        Ok(graph)
    }

    /// Map an existing graph by path. The returned handle does not own the
    /// directory.
    pub fn map(path: &Path) -> Result<Self, GraphError> {
        let marker_path = path.join(MARKER_FILE);
        let raw = fs::read(&marker_path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => GraphError::NotAGraph {
                path: path.to_path_buf(),
            },
            _ => GraphError::io(&marker_path, e),
        })?;

        let marker: GraphMarker =
            serde_json::from_slice(&raw).map_err(|_| GraphError::NotAGraph {
                path: path.to_path_buf(),
            })?;
        if marker.version != GRAPH_FORMAT_VERSION {
            return Err(GraphError::NotAGraph {
                path: path.to_path_buf(),
            });
        }

        Ok(Self {
            root: path.to_path_buf(),
            owner: None,
        })
    }

    /// Canonical on-disk location, handed to ASPs as their graph argument.
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Remove an owned graph, reporting any error. Mapped handles are
    /// simply released.
    pub fn destroy(mut self) -> Result<(), GraphError> {
        match self.owner.take() {
            Some(dir) => dir.close().map_err(|e| GraphError::io(&self.root, e)),
            None => Ok(()),
        }
    }

    /// Add a node for `variable`, or return the existing one.
    pub fn add_node(&self, variable: &MeasurementVariable) -> Result<AddOutcome, GraphError> {
        let index_path = self.index_path(variable)?;
        if let Some(id) = read_index(&index_path)? {
            return Ok(AddOutcome::Existing(id));
        }

        let id = self.allocate_id()?;
        let node_dir = self.node_dir(id);
        let data_dir = node_dir.join(DATA_DIR);
        fs::create_dir_all(&data_dir).map_err(|e| GraphError::io(&data_dir, e))?;

        write_atomic(
            &node_dir.join(VARIABLE_FILE),
            &serde_json::to_vec_pretty(variable)?,
        )?;
        write_atomic(&index_path, id.to_string().as_bytes())?;

        debug!(node = %id, variable = %variable, "Added graph node");
        Ok(AddOutcome::Added(id))
    }

    /// Look up the node for `variable` without adding it.
    pub fn find_node(&self, variable: &MeasurementVariable) -> Result<Option<NodeId>, GraphError> {
        read_index(&self.index_path(variable)?)
    }

    /// Remove a node and everything attached to it.
    pub fn remove_node(&self, id: NodeId) -> Result<(), GraphError> {
        let variable = self.variable(id)?;
        let index_path = self.index_path(&variable)?;
        match fs::remove_file(&index_path) {
            Ok(()) => {},
            Err(e) if e.kind() == ErrorKind::NotFound => {},
            Err(e) => return Err(GraphError::io(&index_path, e)),
        }

        let node_dir = self.node_dir(id);
        fs::remove_dir_all(&node_dir).map_err(|e| GraphError::io(&node_dir, e))?;

        debug!(node = %id, "Removed graph node");
        Ok(())
    }

    /// The variable recorded for a node.
    pub fn variable(&self, id: NodeId) -> Result<MeasurementVariable, GraphError> {
        let path = self.node_dir(id).join(VARIABLE_FILE);
        let raw = fs::read(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => GraphError::NodeNotFound { id: id.to_string() },
            _ => GraphError::io(&path, e),
        })?;
        Ok(serde_json::from_slice(&raw)?)
    }

    /// Whether the node already carries data of `measurement_type`.
    pub fn has_data(&self, id: NodeId, measurement_type: &MeasurementType) -> bool {
        self.data_path(id, measurement_type)
            .map(|path| path.is_file())
            .unwrap_or(false)
    }

    /// Attach data to a node. Returns `false` without writing if the node
    /// already has data of the same type.
    pub fn add_data(&self, id: NodeId, data: &MarshalledData) -> Result<bool, GraphError> {
        self.ensure_node(id)?;

        let path = self.data_path(id, &data.measurement_type)?;
        if path.is_file() {
            debug!(
                node = %id,
                measurement_type = %data.measurement_type,
                "Data already present, not re-measuring"
            );
            return Ok(false);
        }

        write_atomic(&path, &serde_json::to_vec(data)?)?;
        debug!(node = %id, measurement_type = %data.measurement_type, "Added node data");
        Ok(true)
    }

    /// Read the node's data of `measurement_type`, if any.
    pub fn get_data(
        &self,
        id: NodeId,
        measurement_type: &MeasurementType,
    ) -> Result<Option<MarshalledData>, GraphError> {
        self.ensure_node(id)?;

        let path = self.data_path(id, measurement_type)?;
        match fs::read(&path) {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(GraphError::io(&path, e)),
        }
    }

    /// All node ids, in allocation order.
    pub fn node_ids(&self) -> Result<Vec<NodeId>, GraphError> {
        let nodes_dir = self.root.join(NODES_DIR);
        let entries = fs::read_dir(&nodes_dir).map_err(|e| GraphError::io(&nodes_dir, e))?;

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| GraphError::io(&nodes_dir, e))?;
            if let Some(name) = entry.file_name().to_str() {
                if let Ok(id) = name.parse::<NodeId>() {
                    ids.push(id);
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn init_layout(&self) -> Result<(), GraphError> {
        for dir in [NODES_DIR, INDEX_DIR] {
            let path = self.root.join(dir);
            fs::create_dir(&path).map_err(|e| GraphError::io(&path, e))?;
        }
        write_atomic(&self.root.join(NEXT_ID_FILE), b"0")?;
        write_atomic(
            &self.root.join(MARKER_FILE),
            &serde_json::to_vec(&GraphMarker {
                version: GRAPH_FORMAT_VERSION,
            })?,
        )
    }

    fn allocate_id(&self) -> Result<NodeId, GraphError> {
        let path = self.root.join(NEXT_ID_FILE);
        let current = fs::read_to_string(&path).map_err(|e| GraphError::io(&path, e))?;
        let next: u64 = current
            .trim()
            .parse()
            .map_err(|_| GraphError::serialization(format!("corrupt node counter: {current:?}")))?;
        write_atomic(&path, (next + 1).to_string().as_bytes())?;
        Ok(NodeId(next))
    }

    fn ensure_node(&self, id: NodeId) -> Result<(), GraphError> {
        if self.node_dir(id).join(VARIABLE_FILE).is_file() {
            Ok(())
        } else {
            Err(GraphError::NodeNotFound { id: id.to_string() })
        }
    }

    fn node_dir(&self, id: NodeId) -> PathBuf {
        self.root.join(NODES_DIR).join(id.to_string())
    }

    fn index_path(&self, variable: &MeasurementVariable) -> Result<PathBuf, GraphError> {
        let encoded = serde_json::to_vec(variable)?;
        let digest = Sha256::digest(&encoded);
        Ok(self.root.join(INDEX_DIR).join(hex::encode(digest)))
    }

    fn data_path(
        &self,
        id: NodeId,
        measurement_type: &MeasurementType,
    ) -> Result<PathBuf, GraphError> {
        let name = measurement_type.name();
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(GraphError::InvalidTypeName {
                name: name.to_string(),
            });
        }
        Ok(self
            .node_dir(id)
            .join(DATA_DIR)
            .join(format!("{name}.json")))
    }
}

fn read_index(path: &Path) -> Result<Option<NodeId>, GraphError> {
    match fs::read_to_string(path) {
        Ok(contents) => contents.parse().map(Some),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(GraphError::io(path, e)),
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), GraphError> {
    let staging = path.with_extension("tmp");
    fs::write(&staging, bytes).map_err(|e| GraphError::io(&staging, e))?;
    fs::rename(&staging, path).map_err(|e| GraphError::io(path, e))
}
