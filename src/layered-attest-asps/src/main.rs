//! netstat_raw6_asp - record the IPv6 raw socket table into a graph node.
//!
//! ## Usage
//!
//! ```bash
//! netstat_raw6_asp <graph path> <node id>
//! netstat_raw6_asp --source fixtures/raw6 /tmp/msmt-graph-abc 000000000000002a
//! ```
//!
//! Exit status is 0 on success, 22 on usage errors and 1 when the graph or
//! the source table cannot be read or written.

#![warn(clippy::all)]

mod netstat;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use layered_attest_graph::{
    FileAddress, GraphError, MeasurementData, MeasurementGraph, NodeId,
};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::netstat::{parse_raw6, ParseError};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default source table.
const RAW6_PATH: &str = "/proc/net/raw6";

/// Exit status for invalid invocations (`EINVAL`).
const EXIT_USAGE: u8 = 22;

/// IPv6 raw socket collector.
///
/// Parses the kernel's raw6 socket table and attaches it to an existing
/// node of a mapped measurement graph.
#[derive(Parser)]
#[command(name = "netstat_raw6_asp")]
#[command(version = VERSION)]
#[command(about = "Record /proc/net/raw6 into a measurement graph node")]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Table to read
    #[arg(long, default_value = RAW6_PATH)]
    source: PathBuf,

    /// Measurement graph directory
    graph: PathBuf,

    /// Node to attach the data to (hex id)
    node: String,
}

/// Collector failure.
#[derive(Debug, Error)]
enum CollectError {
    #[error("Invalid arguments: {message}")]
    Usage { message: String },

    #[error("Cannot read {}: {source}", path.display())]
    Source {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed raw6 table: {0}")]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

impl CollectError {
    fn exit_code(&self) -> u8 {
        match self {
            Self::Usage { .. } => EXIT_USAGE,
            _ => 1,
        }
    }
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let usage = err.use_stderr();
            let _ = err.print();
            return if usage {
                ExitCode::from(EXIT_USAGE)
            } else {
                ExitCode::SUCCESS
            };
        },
    };

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match collect(&cli.graph, &cli.node, &cli.source) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::from(err.exit_code())
        },
    }
}

/// Parse `source` and add it to `node` of the graph at `graph_path`.
fn collect(graph_path: &Path, node: &str, source: &Path) -> Result<(), CollectError> {
    let node: NodeId = node.parse().map_err(|e: GraphError| CollectError::Usage {
        message: e.to_string(),
    })?;
    let graph = MeasurementGraph::map(graph_path)?;

    let address = file_address(source)?;
    debug!(address = ?address, "Reading raw6 table");
    let text = fs::read_to_string(source).map_err(|e| CollectError::Source {
        path: source.to_path_buf(),
        source: e,
    })?;
    let data = parse_raw6(&text)?;

    let added = graph.add_data(node, &data.marshal()?)?;
    info!(
        node = %node,
        sockets = data.lines.len(),
        added,
        "Recorded raw6 socket table"
    );
    Ok(())
}

fn file_address(path: &Path) -> Result<FileAddress, CollectError> {
    let metadata = fs::metadata(path).map_err(|e| CollectError::Source {
        path: path.to_path_buf(),
        source: e,
    })?;
    let mut address = FileAddress::from_path(path);
    address.size = metadata.len();
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        let dev = metadata.dev();
        address.device_major = ((dev >> 8) & 0xfff) | ((dev >> 32) & !0xfff);
        address.device_minor = (dev & 0xff) | ((dev >> 12) & !0xff);
        address.inode = metadata.ino();
    }
    Ok(address)
}
