//! Remote measurement client.
//!
//! Asks another attester to execute a resource and returns its signed
//! contract as raw bytes. The contract may be binary or encrypted, so it is
//! never treated as text.

use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::asp::{AspRegistry, AspRunner, SEND_EXECUTE_TCP_ASP};
use crate::error::DispatchError;
use crate::places::PlaceInfo;
use crate::scenario::Credentials;

/// Request/response channel to a remote attester.
pub trait RemoteChannel {
    /// Issue one execute request for `resource` at `place`. No retries.
    fn execute(
        &self,
        place: &PlaceInfo,
        resource: &str,
        credentials: &Credentials,
    ) -> Result<Vec<u8>, DispatchError>;
}

/// Remote channel that runs the TCP execute worker.
pub struct AspExecuteClient<'a> {
    registry: &'a AspRegistry,
    runner: &'a dyn AspRunner,
    timeout: Duration,
}

impl<'a> AspExecuteClient<'a> {
    /// Create a client; each request is bounded by `timeout`.
    pub fn new(registry: &'a AspRegistry, runner: &'a dyn AspRunner, timeout: Duration) -> Self {
        Self {
            registry,
            runner,
            timeout,
        }
    }
}

/// Worker arguments for an execute request, in the order the worker reads them.
pub fn execute_args(place: &PlaceInfo, resource: &str, credentials: &Credentials) -> Vec<String> {
    vec![
        place.addr.clone(),
        place.port.to_string(),
        resource.to_string(),
        credentials.certfile.clone(),
        credentials.keyfile.clone(),
        credentials.keypass.clone(),
        credentials.nonce.clone(),
        credentials.tpmpass.clone(),
        credentials.akctx.clone(),
        credentials.sign_tpm.clone(),
    ]
}

impl RemoteChannel for AspExecuteClient<'_> {
    #[instrument(skip(self, place, credentials), fields(place = %place))]
    fn execute(
        &self,
        place: &PlaceInfo,
        resource: &str,
        credentials: &Credentials,
    ) -> Result<Vec<u8>, DispatchError> {
        let asp = self
            .registry
            .require(SEND_EXECUTE_TCP_ASP)
            .map_err(|e| DispatchError::channel(e.to_string()))?;

        let args = execute_args(place, resource, credentials);
        let contract = self
            .runner
            .run_buffers(asp, &args, None, self.timeout)
            .map_err(|e| {
                warn!(error = %e, "Remote execute failed");
                DispatchError::channel(e.to_string())
            })?;

        if contract.is_empty() {
            return Err(DispatchError::channel("empty response from remote attester"));
        }

        debug!(bytes = contract.len(), "Received remote contract");
        Ok(contract)
    }
}
