//! ASP registry and worker invocation.
//!
//! Workers are external executables. An [`AspInfo`] names one and carries its
//! leading command line; per-call arguments are appended after it.

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use layered_attest_graph::{MeasurementType, TargetType};
use serde::{Deserialize, Serialize};
use tracing::debug;
use wait_timeout::ChildExt;

use crate::config::load_json;
use crate::error::{ApbError, AspError};

/// Kernel measurement worker; always used for kernel measurements.
pub const KERNEL_MSMT_ASP: &str = "kernel_msmt_asp";
/// Remote execute worker; selecting it routes a variable to the remote path.
pub const SEND_EXECUTE_TCP_ASP: &str = "send_execute_tcp_asp";
/// Contract verification worker.
pub const VERIFY_CONTRACT_ASP: &str = "verify_contract_asp";
/// Graph serializer stage.
pub const SERIALIZE_GRAPH_ASP: &str = "serialize_graph_asp";
/// Compression stage.
pub const COMPRESS_ASP: &str = "compress_asp";
/// Encryption stage.
pub const ENCRYPT_ASP: &str = "encrypt_asp";
/// Contract signing stage.
pub const CREATE_CONTRACT_ASP: &str = "create_measurement_contract_asp";
/// Final send stage.
pub const SEND_ASP: &str = "send_asp";

/// A (measurement type, target type) pair an ASP can measure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    /// Measurement type produced.
    pub measurement_type: MeasurementType,
    /// Target type accepted.
    pub target_type: TargetType,
}

/// A registered worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AspInfo {
    /// Worker name.
    pub name: String,
    /// Executable to run.
    pub command: PathBuf,
    /// Leading arguments placed before per-call arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// What this worker can measure.
    #[serde(default)]
    pub capabilities: Vec<Capability>,
}

impl AspInfo {
    /// Create a worker entry with no leading arguments or capabilities.
    pub fn new(name: impl Into<String>, command: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            capabilities: Vec::new(),
        }
    }

    /// Set the leading arguments.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Add a capability.
    #[must_use]
    pub fn with_capability(mut self, measurement_type: &str, target_type: &str) -> Self {
        self.capabilities.push(Capability {
            measurement_type: MeasurementType::new(measurement_type),
            target_type: TargetType::new(target_type),
        });
        self
    }

    /// Whether this worker declares the given capability.
    pub fn can_measure(&self, measurement_type: &MeasurementType, target_type: &TargetType) -> bool {
        self.capabilities
            .iter()
            .any(|c| &c.measurement_type == measurement_type && &c.target_type == target_type)
    }
}

/// The fixed set of workers available to a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AspRegistry {
    asps: Vec<AspInfo>,
}

impl AspRegistry {
    /// Load the registry from a JSON list.
    pub fn load(path: &Path) -> Result<Self, ApbError> {
        let registry: Self = load_json(path)?;
        debug!(path = %path.display(), asps = registry.asps.len(), "Loaded ASP registry");
        Ok(registry)
    }

    /// Build a registry from entries.
    pub fn from_asps(asps: impl IntoIterator<Item = AspInfo>) -> Self {
        Self {
            asps: asps.into_iter().collect(),
        }
    }

    /// Look up a worker by name.
    pub fn find(&self, name: &str) -> Option<&AspInfo> {
        self.asps.iter().find(|asp| asp.name == name)
    }

    /// Look up a worker by name, failing if absent.
    pub fn require(&self, name: &str) -> Result<&AspInfo, AspError> {
        self.find(name).ok_or_else(|| AspError::NotFound {
            name: name.to_string(),
        })
    }

    /// Registered workers in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &AspInfo> {
        self.asps.iter()
    }
}

/// Worker invocation.
pub trait AspRunner {
    /// Run a short-lived worker to completion and return its exit status.
    fn run(&self, asp: &AspInfo, args: &[String]) -> Result<i32, AspError>;

    /// Run a worker with an optional stdin buffer and return its stdout.
    /// A non-zero exit is an error; the worker is killed after `timeout`.
    fn run_buffers(
        &self,
        asp: &AspInfo,
        args: &[String],
        input: Option<&[u8]>,
        timeout: Duration,
    ) -> Result<Vec<u8>, AspError>;

    /// Start a worker with caller-chosen stdin and stdout.
    fn spawn(
        &self,
        asp: &AspInfo,
        args: &[String],
        stdin: Stdio,
        stdout: Stdio,
    ) -> Result<Child, AspError>;
}

/// Runs workers as child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    /// Create a runner.
    pub fn new() -> Self {
        Self
    }

    fn command(asp: &AspInfo, args: &[String]) -> Command {
        let mut command = Command::new(&asp.command);
        command.args(&asp.args).args(args);
        command
    }
}

impl AspRunner for ProcessRunner {
    fn run(&self, asp: &AspInfo, args: &[String]) -> Result<i32, AspError> {
        debug!(asp = %asp.name, argc = args.len(), "Running ASP");
        let status = Self::command(asp, args)
            .stdin(Stdio::null())
            .status()
            .map_err(|source| AspError::Spawn {
                name: asp.name.clone(),
                source,
            })?;
        Ok(exit_code(status))
    }

    fn run_buffers(
        &self,
        asp: &AspInfo,
        args: &[String],
        input: Option<&[u8]>,
        timeout: Duration,
    ) -> Result<Vec<u8>, AspError> {
        debug!(
            asp = %asp.name,
            argc = args.len(),
            input_len = input.map_or(0, <[u8]>::len),
            "Running ASP with buffers"
        );
        let stdin = if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        };
        let mut command = Self::command(asp, args);
        command.stdin(stdin).stdout(Stdio::piped());
        // Own process group, so a timeout can take down the worker's children.
        #[cfg(unix)]
        std::os::unix::process::CommandExt::process_group(&mut command, 0);
        let mut child = command
            .spawn()
            .map_err(|source| AspError::Spawn {
                name: asp.name.clone(),
                source,
            })?;

        match exchange(&mut child, input, Some(timeout)) {
            Ok(Some((status, output))) if status.success() => Ok(output),
            Ok(Some((status, _))) => Err(AspError::Exited {
                name: asp.name.clone(),
                status: exit_code(status),
            }),
            Ok(None) => Err(AspError::Timeout {
                name: asp.name.clone(),
                secs: timeout.as_secs(),
            }),
            Err(source) => Err(AspError::Io {
                name: asp.name.clone(),
                source,
            }),
        }
    }

    fn spawn(
        &self,
        asp: &AspInfo,
        args: &[String],
        stdin: Stdio,
        stdout: Stdio,
    ) -> Result<Child, AspError> {
        debug!(asp = %asp.name, argc = args.len(), "Spawning ASP");
        Self::command(asp, args)
            .stdin(stdin)
            .stdout(stdout)
            .spawn()
            .map_err(|source| AspError::Spawn {
                name: asp.name.clone(),
                source,
            })
    }
}

/// Exit status as an integer, `-1` if the process was killed by a signal.
pub(crate) fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

/// Feed `input` to the child's stdin (if piped), collect its stdout (if
/// piped) and wait for it to exit.
///
/// Returns `None` if `timeout` elapsed; the child's process group has then
/// been killed and the child reaped. The pipe threads are not joined after a
/// timeout, since a descendant outside the group may still hold stdout open.
pub(crate) fn exchange(
    child: &mut Child,
    input: Option<&[u8]>,
    timeout: Option<Duration>,
) -> io::Result<Option<(ExitStatus, Vec<u8>)>> {
    let stdin = child.stdin.take();
    let stdout = child.stdout.take();
    let input = input.map(<[u8]>::to_vec);

    let writer = thread::spawn(move || write_input(stdin, input.as_deref()));
    let reader = thread::spawn(move || read_output(stdout));

    let waited = match timeout {
        Some(limit) => child.wait_timeout(limit),
        None => child.wait().map(Some),
    };
    match waited {
        Ok(Some(status)) => {
            join(writer)?;
            let output = join(reader)?;
            Ok(Some((status, output)))
        },
        Ok(None) => {
            kill_and_reap(child);
            Ok(None)
        },
        Err(err) => {
            kill_and_reap(child);
            Err(err)
        },
    }
}

fn write_input(stdin: Option<ChildStdin>, input: Option<&[u8]>) -> io::Result<()> {
    let (Some(mut pipe), Some(data)) = (stdin, input) else {
        return Ok(());
    };
    match pipe.write_all(data) {
        // The worker may exit without draining its input.
        Err(err) if err.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        other => other,
    }
}

fn read_output(stdout: Option<ChildStdout>) -> io::Result<Vec<u8>> {
    let mut output = Vec::new();
    if let Some(mut pipe) = stdout {
        pipe.read_to_end(&mut output)?;
    }
    Ok(output)
}

fn join<T>(handle: thread::JoinHandle<io::Result<T>>) -> io::Result<T> {
    handle
        .join()
        .map_err(|_| io::Error::new(io::ErrorKind::Other, "pipe thread panicked"))?
}

fn kill_and_reap(child: &mut Child) {
    #[cfg(unix)]
    kill_group(child);
    // Either call fails only if the child is already gone.
    let _ = child.kill();
    let _ = child.wait();
}

/// SIGKILL the process group led by `child`. A no-op unless the child was
/// started as a group leader.
#[cfg(unix)]
fn kill_group(child: &Child) {
    let Ok(pgid) = libc::pid_t::try_from(child.id()) else {
        return;
    };
    // SAFETY: kill(2) takes plain integers and touches no memory of ours.
    unsafe {
        libc::kill(-pgid, libc::SIGKILL);
    }
}
