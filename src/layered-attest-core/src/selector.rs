//! ASP selection for a (measurement type, variable) pair.

use std::collections::BTreeMap;

use layered_attest_graph::{MeasurementType, MeasurementVariable};
use tracing::debug;

use crate::asp::{AspInfo, AspRegistry, KERNEL_MSMT_ASP};
use crate::error::DispatchError;

/// How often generic selection picked each ASP during a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionCounter {
    total: u64,
    per_asp: BTreeMap<String, u64>,
}

impl SelectionCounter {
    /// Create an empty counter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total selections.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Selections of one ASP.
    pub fn count(&self, asp: &str) -> u64 {
        self.per_asp.get(asp).copied().unwrap_or(0)
    }

    fn record(&mut self, asp: &str) {
        self.total += 1;
        *self.per_asp.entry(asp.to_string()).or_insert(0) += 1;
    }
}

/// Choose the ASP that should measure `variable` for `measurement_type`.
///
/// Kernel measurements always go to the kernel measurement ASP. Everything
/// else uses capability matching over the registry.
pub fn select_asp<'r>(
    registry: &'r AspRegistry,
    measurement_type: &MeasurementType,
    variable: &MeasurementVariable,
    counter: &mut SelectionCounter,
) -> Result<&'r AspInfo, DispatchError> {
    if measurement_type.is_kernel() {
        return registry
            .find(KERNEL_MSMT_ASP)
            .ok_or_else(|| no_capable_asp(measurement_type, variable));
    }
    select_by_capability(registry, measurement_type, variable, counter)
}

/// Generic selection: the first registered ASP declaring the capability.
pub fn select_by_capability<'r>(
    registry: &'r AspRegistry,
    measurement_type: &MeasurementType,
    variable: &MeasurementVariable,
    counter: &mut SelectionCounter,
) -> Result<&'r AspInfo, DispatchError> {
    let asp = registry
        .iter()
        .find(|asp| asp.can_measure(measurement_type, &variable.target_type))
        .ok_or_else(|| no_capable_asp(measurement_type, variable))?;

    counter.record(&asp.name);
    debug!(
        asp = %asp.name,
        selections = counter.count(&asp.name),
        "Selected ASP by capability"
    );
    Ok(asp)
}

fn no_capable_asp(measurement_type: &MeasurementType, variable: &MeasurementVariable) -> DispatchError {
    DispatchError::NoCapableAsp {
        measurement_type: measurement_type.to_string(),
        target_type: variable.target_type.to_string(),
    }
}
