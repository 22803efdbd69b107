//! Run scenario and the credential set staged from it.

use std::fmt;
use std::path::Path;

use layered_attest_graph::base64_bytes;
use serde::{Deserialize, Serialize};

use crate::config::load_json;
use crate::error::ApbError;

const REDACTED: &str = "<redacted>";

/// Configuration bundle for one attestation run.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Scenario {
    /// Certificate used to sign contracts.
    pub certfile: Option<String>,
    /// Private key matching `certfile`.
    pub keyfile: Option<String>,
    /// Passphrase for `keyfile`.
    pub keypass: Option<String>,
    /// Nonce binding evidence to this run.
    pub nonce: Option<String>,
    /// TPM owner passphrase.
    pub tpmpass: Option<String>,
    /// Attestation key context file.
    pub akctx: Option<String>,
    /// Sign with the TPM instead of `keyfile`.
    pub sign_tpm: bool,
    /// Appraiser certificate; enables encryption of the outgoing contract.
    pub partner_cert: Option<String>,
    /// CA certificate used to verify contracts from remote attesters.
    pub cacert: Option<String>,
    /// Working directory for contract creation.
    pub workdir: Option<String>,
    /// Current contract buffer.
    #[serde(with = "base64_bytes")]
    pub contract: Vec<u8>,
}

impl Scenario {
    /// Load a scenario from a JSON file.
    pub fn load(path: &Path) -> Result<Self, ApbError> {
        load_json(path)
    }
}

impl fmt::Debug for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scenario")
            .field("certfile", &self.certfile)
            .field("keyfile", &self.keyfile)
            .field("keypass", &self.keypass.as_ref().map(|_| REDACTED))
            .field("nonce", &self.nonce)
            .field("tpmpass", &self.tpmpass.as_ref().map(|_| REDACTED))
            .field("akctx", &self.akctx)
            .field("sign_tpm", &self.sign_tpm)
            .field("partner_cert", &self.partner_cert)
            .field("cacert", &self.cacert)
            .field("workdir", &self.workdir)
            .field("contract_len", &self.contract.len())
            .finish()
    }
}

/// Credential strings staged once per run and passed to workers as
/// arguments. Unset fields are empty strings.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Certificate path.
    pub certfile: String,
    /// Key path.
    pub keyfile: String,
    /// Key passphrase.
    pub keypass: String,
    /// Run nonce.
    pub nonce: String,
    /// TPM passphrase.
    pub tpmpass: String,
    /// Attestation key context.
    pub akctx: String,
    /// `"1"` to sign with the TPM, `"0"` otherwise.
    pub sign_tpm: String,
}

impl Credentials {
    /// Copy the credential fields out of a scenario.
    pub fn stage(scenario: &Scenario) -> Self {
        let text = |value: &Option<String>| value.clone().unwrap_or_default();
        Self {
            certfile: text(&scenario.certfile),
            keyfile: text(&scenario.keyfile),
            keypass: text(&scenario.keypass),
            nonce: text(&scenario.nonce),
            tpmpass: text(&scenario.tpmpass),
            akctx: text(&scenario.akctx),
            sign_tpm: if scenario.sign_tpm { "1" } else { "0" }.to_string(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("certfile", &self.certfile)
            .field("keyfile", &self.keyfile)
            .field("keypass", &REDACTED)
            .field("nonce", &self.nonce)
            .field("tpmpass", &REDACTED)
            .field("akctx", &self.akctx)
            .field("sign_tpm", &self.sign_tpm)
            .finish()
    }
}
