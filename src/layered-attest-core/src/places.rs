//! Place arguments, the place directory, and the two resolved places of a run.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::load_json;
use crate::error::{ApbError, DispatchError};

/// Symbolic name of the domain-zero place.
pub const DOMAIN_ZERO_PLACE: &str = "@_0";
/// Symbolic name of the target place.
pub const TARGET_PLACE: &str = "@_t";

/// Connection info for a place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceInfo {
    /// Host address.
    pub addr: String,
    /// TCP port.
    pub port: u16,
}

impl PlaceInfo {
    /// Create place info.
    pub fn new(addr: impl Into<String>, port: u16) -> Self {
        Self {
            addr: addr.into(),
            port,
        }
    }
}

impl fmt::Display for PlaceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.addr, self.port)
    }
}

/// A `key=value` invocation argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    /// Argument key.
    pub key: String,
    /// Argument value.
    pub value: String,
}

impl KeyValue {
    /// Create an argument.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl FromStr for KeyValue {
    type Err = ApbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok(Self::new(key, value)),
            _ => Err(ApbError::Usage {
                message: format!("expected KEY=VALUE, got {s:?}"),
            }),
        }
    }
}

/// Place directory lookup keys for the two places of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceArgs {
    /// Lookup key for `@_0`.
    pub domain_zero: String,
    /// Lookup key for `@_t`.
    pub target: String,
}

impl PlaceArgs {
    /// Extract the two place keys from invocation arguments.
    ///
    /// At least two arguments are required. Unknown keys and repeats of an
    /// already seen place are logged and ignored; the first occurrence wins.
    pub fn parse(args: &[KeyValue]) -> Result<Self, ApbError> {
        if args.len() < 2 {
            return Err(ApbError::Usage {
                message: format!("expected two place arguments, got {}", args.len()),
            });
        }

        let mut domain_zero: Option<&str> = None;
        let mut target: Option<&str> = None;
        for arg in args {
            let slot = match arg.key.as_str() {
                DOMAIN_ZERO_PLACE => &mut domain_zero,
                TARGET_PLACE => &mut target,
                other => {
                    warn!(key = %other, "Unexpected place argument, ignoring");
                    continue;
                },
            };
            if let Some(first) = *slot {
                warn!(
                    place = %arg.key,
                    kept = %first,
                    ignored = %arg.value,
                    "Duplicate place argument, keeping first"
                );
            } else {
                *slot = Some(arg.value.as_str());
            }
        }

        match (domain_zero, target) {
            (Some(domain_zero), Some(target)) => Ok(Self {
                domain_zero: domain_zero.to_string(),
                target: target.to_string(),
            }),
            (domain_zero, target) => {
                let missing: Vec<&str> = [
                    (domain_zero.is_none(), DOMAIN_ZERO_PLACE),
                    (target.is_none(), TARGET_PLACE),
                ]
                .into_iter()
                .filter_map(|(absent, name)| absent.then_some(name))
                .collect();
                Err(ApbError::IncompletePlaces {
                    missing: missing.join(", "),
                })
            },
        }
    }
}

/// Resolves place lookup keys to connection info.
pub trait PlaceDirectory {
    /// Look up a place. Absence is an error.
    fn lookup(&self, key: &str) -> Result<PlaceInfo, ApbError>;
}

/// Place directory backed by a JSON map of key to `{ addr, port }`.
#[derive(Debug, Clone, Default)]
pub struct FilePlaceDirectory {
    entries: BTreeMap<String, PlaceInfo>,
}

impl FilePlaceDirectory {
    /// Load the directory from a JSON file.
    pub fn load(path: &Path) -> Result<Self, ApbError> {
        Ok(Self {
            entries: load_json(path)?,
        })
    }

    /// Build a directory from entries.
    pub fn from_entries(entries: impl IntoIterator<Item = (String, PlaceInfo)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }
}

impl PlaceDirectory for FilePlaceDirectory {
    fn lookup(&self, key: &str) -> Result<PlaceInfo, ApbError> {
        self.entries
            .get(key)
            .cloned()
            .ok_or_else(|| ApbError::PlaceLookup {
                place: key.to_string(),
                reason: "no such place in directory".into(),
            })
    }
}

/// The two places of a run, resolved before measurement starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPlaces {
    /// Domain-zero place.
    pub domain_zero: PlaceInfo,
    /// Target place.
    pub target: PlaceInfo,
}

impl ResolvedPlaces {
    /// Resolve both place keys through a directory.
    pub fn resolve(directory: &dyn PlaceDirectory, args: &PlaceArgs) -> Result<Self, ApbError> {
        let domain_zero = directory.lookup(&args.domain_zero)?;
        let target = directory.lookup(&args.target)?;
        debug!(domain_zero = %domain_zero, target = %target, "Resolved places");
        Ok(Self {
            domain_zero,
            target,
        })
    }

    /// Connection info for an attester named in a measurement request.
    pub fn resolve_attester(&self, attester: &str) -> Result<&PlaceInfo, DispatchError> {
        match attester {
            DOMAIN_ZERO_PLACE => Ok(&self.domain_zero),
            TARGET_PLACE => Ok(&self.target),
            _ => Err(DispatchError::UnknownAttester {
                attester: attester.to_string(),
            }),
        }
    }
}
