//! Measurement specifications and the generic evaluation engine.
//!
//! A spec is a list of instructions, each naming a measurement type and the
//! variables to measure with it. The engine walks the spec and calls back
//! into a [`MeasurementCallbacks`] table for every step, so the APB only has
//! to supply `measure_variable`.

use std::path::PathBuf;

use layered_attest_graph::{MeasurementGraph, MeasurementType, MeasurementVariable};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::error::{ApbError, DispatchError};

/// Default bound on related-instruction nesting.
pub const DEFAULT_MAX_DEPTH: usize = 8;

/// A measurement specification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasurementSpec {
    /// Spec identifier.
    pub id: Uuid,
    /// Human-readable name.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Top-level instructions.
    #[serde(default)]
    pub instructions: Vec<MeasurementInstruction>,
}

/// One step of a spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasurementInstruction {
    /// Measurement type to take of each variable.
    pub measurement_type: MeasurementType,
    /// Variables to measure.
    #[serde(default)]
    pub variables: Vec<MeasurementVariable>,
    /// Gate for following `related` after a variable is measured.
    #[serde(default)]
    pub predicate: Predicate,
    /// Follow-up instructions evaluated when the predicate holds.
    #[serde(default)]
    pub related: Vec<MeasurementInstruction>,
}

/// Condition checked on a measured variable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Predicate {
    /// Always holds.
    #[default]
    Always,
    /// Holds if the variable's node carries data of this type.
    HasData {
        /// Required data type.
        measurement_type: MeasurementType,
    },
}

/// Source of measurement specs.
pub trait SpecStore {
    /// Load a spec by id.
    fn load(&self, id: Uuid) -> Result<MeasurementSpec, ApbError>;
}

/// Specs stored as `<dir>/<uuid>.json`.
#[derive(Debug, Clone)]
pub struct DirSpecStore {
    dir: PathBuf,
}

impl DirSpecStore {
    /// Create a store over a directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl SpecStore for DirSpecStore {
    fn load(&self, id: Uuid) -> Result<MeasurementSpec, ApbError> {
        let path = self.dir.join(format!("{id}.json"));
        let load_error = |reason: String| ApbError::SpecLoad {
            spec: id.to_string(),
            reason,
        };

        let raw = std::fs::read(&path)
            .map_err(|e| load_error(format!("cannot read {}: {e}", path.display())))?;
        let spec: MeasurementSpec =
            serde_json::from_slice(&raw).map_err(|e| load_error(e.to_string()))?;
        if spec.id != id {
            return Err(load_error(format!("file declares id {}", spec.id)));
        }

        debug!(spec = %spec.name, instructions = spec.instructions.len(), "Loaded measurement spec");
        Ok(spec)
    }
}

/// Callback table driven by [`SpecEvaluator`].
///
/// Only `measure_variable` has no default.
pub trait MeasurementCallbacks {
    /// Variables an instruction applies to.
    fn enumerate_variables(
        &mut self,
        _graph: &MeasurementGraph,
        instruction: &MeasurementInstruction,
    ) -> Vec<MeasurementVariable> {
        instruction.variables.clone()
    }

    /// Measure one variable for one type.
    fn measure_variable(
        &mut self,
        graph: &MeasurementGraph,
        variable: &MeasurementVariable,
        measurement_type: &MeasurementType,
    ) -> Result<(), DispatchError>;

    /// Instructions to follow after `variable` was measured.
    fn get_related_variables<'i>(
        &mut self,
        _graph: &MeasurementGraph,
        instruction: &'i MeasurementInstruction,
        _variable: &MeasurementVariable,
    ) -> &'i [MeasurementInstruction] {
        &instruction.related
    }

    /// Evaluate a predicate against a measured variable.
    fn check_predicate(
        &mut self,
        graph: &MeasurementGraph,
        predicate: &Predicate,
        variable: &MeasurementVariable,
    ) -> bool {
        match predicate {
            Predicate::Always => true,
            Predicate::HasData { measurement_type } => graph
                .find_node(variable)
                .ok()
                .flatten()
                .is_some_and(|node| graph.has_data(node, measurement_type)),
        }
    }
}

/// Outcome of one evaluation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvaluationSummary {
    /// Variables measured successfully.
    pub measured: usize,
    /// Variables whose measurement failed.
    pub failed: usize,
}

impl EvaluationSummary {
    /// Whether every attempted measurement succeeded.
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }
}

/// Generic spec evaluation engine.
#[derive(Debug, Clone, Copy)]
pub struct SpecEvaluator {
    max_depth: usize,
}

impl Default for SpecEvaluator {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl SpecEvaluator {
    /// Create an evaluator with a custom nesting bound.
    pub fn with_max_depth(max_depth: usize) -> Self {
        Self { max_depth }
    }

    /// Evaluate every instruction of `spec` in order. Measurement failures
    /// are logged and counted; evaluation always runs to the end.
    pub fn evaluate(
        &self,
        spec: &MeasurementSpec,
        graph: &MeasurementGraph,
        callbacks: &mut dyn MeasurementCallbacks,
    ) -> EvaluationSummary {
        let mut summary = EvaluationSummary::default();
        for instruction in &spec.instructions {
            self.evaluate_instruction(instruction, graph, callbacks, 0, &mut summary);
        }
        summary
    }

    fn evaluate_instruction(
        &self,
        instruction: &MeasurementInstruction,
        graph: &MeasurementGraph,
        callbacks: &mut dyn MeasurementCallbacks,
        depth: usize,
        summary: &mut EvaluationSummary,
    ) {
        if depth > self.max_depth {
            warn!(
                measurement_type = %instruction.measurement_type,
                max_depth = self.max_depth,
                "Related instructions nested too deeply, skipping"
            );
            return;
        }

        for variable in callbacks.enumerate_variables(graph, instruction) {
            let measurement_type = &instruction.measurement_type;
            if let Err(err) = callbacks.measure_variable(graph, &variable, measurement_type) {
                summary.failed += 1;
                if err.is_configuration_error() {
                    error!(
                        variable = %variable,
                        measurement_type = %measurement_type,
                        error = %err,
                        "Measurement failed"
                    );
                } else {
                    warn!(
                        variable = %variable,
                        measurement_type = %measurement_type,
                        error = %err,
                        "Measurement failed"
                    );
                }
                continue;
            }
            summary.measured += 1;

            if callbacks.check_predicate(graph, &instruction.predicate, &variable) {
                for related in callbacks.get_related_variables(graph, instruction, &variable) {
                    self.evaluate_instruction(related, graph, callbacks, depth + 1, summary);
                }
            }
        }
    }
}
