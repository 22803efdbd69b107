//! Contract verification boundary.

use std::mem;
use std::time::Duration;

use tracing::{debug, warn};

use crate::asp::{AspRegistry, AspRunner, VERIFY_CONTRACT_ASP};
use crate::error::DispatchError;
use crate::scenario::Scenario;

/// Verifies a contract and extracts its measurement payload.
pub trait ContractVerifier {
    /// Verify `scenario.contract` and return the embedded measurement.
    fn process_contract(&self, scenario: &Scenario) -> Result<Vec<u8>, DispatchError>;
}

/// Verifier that hands the contract to the verification worker on stdin.
///
/// The worker gets `[workdir, cacert, nonce]` and prints the extracted
/// measurement on stdout.
pub struct WorkerContractVerifier<'a> {
    registry: &'a AspRegistry,
    runner: &'a dyn AspRunner,
    timeout: Duration,
}

impl<'a> WorkerContractVerifier<'a> {
    /// Create a verifier.
    pub fn new(registry: &'a AspRegistry, runner: &'a dyn AspRunner, timeout: Duration) -> Self {
        Self {
            registry,
            runner,
            timeout,
        }
    }
}

impl ContractVerifier for WorkerContractVerifier<'_> {
    fn process_contract(&self, scenario: &Scenario) -> Result<Vec<u8>, DispatchError> {
        let asp = self
            .registry
            .require(VERIFY_CONTRACT_ASP)
            .map_err(|e| DispatchError::verification(e.to_string()))?;

        let args = vec![
            scenario.workdir.clone().unwrap_or_default(),
            scenario.cacert.clone().unwrap_or_default(),
            scenario.nonce.clone().unwrap_or_default(),
        ];
        let payload = self
            .runner
            .run_buffers(asp, &args, Some(&scenario.contract), self.timeout)
            .map_err(|e| {
                warn!(error = %e, "Contract verification worker failed");
                DispatchError::verification(e.to_string())
            })?;

        if payload.is_empty() {
            return Err(DispatchError::verification("contract carried no measurement"));
        }
        debug!(
            contract_len = scenario.contract.len(),
            payload_len = payload.len(),
            "Verified contract"
        );
        Ok(payload)
    }
}

/// Temporarily installs a received contract in the scenario.
///
/// The scenario's own contract is put back when the guard drops, on every
/// exit path.
pub struct ContractSwap<'s> {
    scenario: &'s mut Scenario,
    saved: Vec<u8>,
}

impl<'s> ContractSwap<'s> {
    /// Replace `scenario.contract` with `received` until the guard drops.
    pub fn new(scenario: &'s mut Scenario, received: Vec<u8>) -> Self {
        let saved = mem::replace(&mut scenario.contract, received);
        Self { scenario, saved }
    }

    /// The scenario with the received contract installed.
    pub fn scenario(&self) -> &Scenario {
        &*self.scenario
    }
}

impl Drop for ContractSwap<'_> {
    fn drop(&mut self) {
        self.scenario.contract = mem::take(&mut self.saved);
    }
}
