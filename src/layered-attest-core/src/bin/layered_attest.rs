//! layered-attest - run the layered attestation APB once.
//!
//! Loads the APB configuration and a scenario, resolves the two places
//! given as `--place @_0=<key> --place @_t=<key>`, measures according to the
//! spec and sends the signed contract to the peer.

use std::fs::File;
use std::net::TcpStream;
use std::path::PathBuf;
use std::process::{ExitCode, Stdio};

use anyhow::{bail, Context};
use clap::Parser;
use layered_attest_core::config::DEFAULT_CONFIG_PATH;
use layered_attest_core::{
    ApbConfig, ApbError, AspExecuteClient, AspRegistry, AspUserspaceMeasurer, Collaborators,
    DirSpecStore, FilePlaceDirectory, KeyValue, LayeredAttestationApb, ProcessRunner, Scenario,
    WorkerContractVerifier,
};
use tracing::error;
use uuid::Uuid;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Layered attestation APB.
///
/// Delegates measurements of lower trust domains to remote attesters,
/// verifies their contracts, and sends the combined evidence to the
/// appraiser as a signed (optionally encrypted) contract.
#[derive(Parser)]
#[command(name = "layered-attest")]
#[command(version = VERSION)]
#[command(about = "Layered attestation APB")]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// APB configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Scenario JSON (credentials, nonce, workdir, partner certificate)
    #[arg(long)]
    scenario: PathBuf,

    /// Measurement spec id
    #[arg(long)]
    spec: Uuid,

    /// Place argument, PLACE=KEY (repeat for @_0 and @_t)
    #[arg(long = "place", value_name = "PLACE=KEY")]
    places: Vec<KeyValue>,

    /// Appraiser address to send the contract to (host:port)
    #[arg(long, conflicts_with = "peer_out")]
    peer_addr: Option<String>,

    /// Write the contract to a file instead of a socket
    #[arg(long)]
    peer_out: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            match err.downcast_ref::<ApbError>() {
                Some(apb_error) => ExitCode::from(apb_error.exit_code()),
                None => ExitCode::FAILURE,
            }
        },
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let config = ApbConfig::load(&cli.config)?;
    let registry = AspRegistry::load(&config.asp_registry)?;
    let directory = FilePlaceDirectory::load(&config.place_directory)?;
    let specs = DirSpecStore::new(&config.spec_dir);
    let mut scenario = Scenario::load(&cli.scenario)?;
    let peer = open_peer(cli)?;

    let runner = ProcessRunner::new();
    let channel = AspExecuteClient::new(&registry, &runner, config.remote_timeout());
    let verifier = WorkerContractVerifier::new(&registry, &runner, config.remote_timeout());
    let userspace = AspUserspaceMeasurer::new(&runner);
    let collaborators = Collaborators {
        runner: &runner,
        channel: &channel,
        verifier: &verifier,
        userspace: &userspace,
    };

    LayeredAttestationApb::new(&registry, &directory, &specs, collaborators)
        .with_graph_parent(config.graph_dir.clone())
        .execute(&mut scenario, cli.spec, &cli.places, peer)?;
    Ok(())
}

fn open_peer(cli: &Cli) -> anyhow::Result<Stdio> {
    if let Some(path) = &cli.peer_out {
        let file = File::create(path)
            .with_context(|| format!("cannot create peer output {}", path.display()))?;
        return Ok(Stdio::from(file));
    }
    let Some(addr) = &cli.peer_addr else {
        bail!("one of --peer-addr or --peer-out is required");
    };
    let stream =
        TcpStream::connect(addr).with_context(|| format!("cannot connect to peer {addr}"))?;
    socket_stdio(stream)
}

#[cfg(unix)]
fn socket_stdio(stream: TcpStream) -> anyhow::Result<Stdio> {
    use std::os::fd::OwnedFd;
    Ok(Stdio::from(OwnedFd::from(stream)))
}

#[cfg(not(unix))]
fn socket_stdio(_stream: TcpStream) -> anyhow::Result<Stdio> {
    bail!("--peer-addr is only supported on unix; use --peer-out")
}
