//! Typed schema of a model description.
//!
//! The XML reader lives outside this crate; it hands over the already
//! parsed schema below. The driver only consumes it: variable lookup by
//! name, state/derivative reference lists for the Jacobian, and the default
//! experiment for initialization.

use std::collections::HashMap;

use tracing::warn;

use super::ValueRef;

/// Scalar type of a model variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarType {
    Real,
    Integer,
    Boolean,
    String,
}

/// Causality of a model variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Causality {
    Input,
    Output,
    Parameter,
    Internal,
}

/// Variability of a model variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variability {
    Constant,
    Fixed,
    Discrete,
    Continuous,
}

/// Optional start value of a variable.
#[derive(Debug, Clone, PartialEq)]
pub enum StartValue {
    Real(f64),
    Integer(i32),
    Boolean(bool),
    String(String),
}

/// One row of the variable table.
#[derive(Debug, Clone)]
pub struct ScalarVariable {
    pub name: String,
    pub value_reference: ValueRef,
    pub var_type: VarType,
    pub causality: Causality,
    pub variability: Variability,
    pub start: Option<StartValue>,
}

/// Default experiment announced by the model, each field optional.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultExperiment {
    pub start_time: Option<f64>,
    pub stop_time: Option<f64>,
    pub tolerance: Option<f64>,
    pub step_size: Option<f64>,
}

/// Parsed model description.
#[derive(Debug, Clone)]
pub struct ModelDescription {
    pub model_name: String,
    pub guid: String,
    pub n_continuous_states: usize,
    pub n_event_indicators: usize,
    pub provides_directional_derivative: bool,
    pub default_experiment: Option<DefaultExperiment>,
    pub variables: Vec<ScalarVariable>,
    /// Value references of the continuous states, in declaration order.
    pub state_refs: Vec<ValueRef>,
    /// Value references of the state derivatives, paired with `state_refs`.
    pub derivative_refs: Vec<ValueRef>,
}

impl ModelDescription {
    /// Build the name lookup table. The first row wins on duplicated
    /// names, matching [`value_ref`](Self::value_ref); use
    /// [`validate`](Self::validate) to detect such tables.
    pub fn variable_map(&self) -> HashMap<String, ValueRef> {
        let mut map = HashMap::with_capacity(self.variables.len());
        for var in &self.variables {
            map.entry(var.name.clone()).or_insert(var.value_reference);
        }
        map
    }

    /// Check the variable table for duplicate names and duplicate value
    /// references. Each duplicate is logged as a warning; the number of
    /// duplicate definitions is returned so the driver can surface a
    /// warning status without refusing the model.
    pub fn validate(&self) -> usize {
        let mut duplicates = 0;
        let mut seen_names = HashMap::with_capacity(self.variables.len());
        let mut seen_refs = HashMap::with_capacity(self.variables.len());
        for var in &self.variables {
            if seen_names.insert(var.name.as_str(), var.value_reference).is_some() {
                warn!(name = %var.name, "multiple definitions of variable name found");
                duplicates += 1;
            }
            if let Some(prev) = seen_refs.insert(var.value_reference, &var.name) {
                warn!(
                    value_reference = var.value_reference,
                    first = %prev,
                    second = %var.name,
                    "multiple definitions of value reference found"
                );
                duplicates += 1;
            }
        }
        duplicates
    }

    /// Look up a variable row by name.
    pub fn variable(&self, name: &str) -> Option<&ScalarVariable> {
        self.variables.iter().find(|v| v.name == name)
    }

    /// Value reference of a named variable.
    pub fn value_ref(&self, name: &str) -> Option<ValueRef> {
        self.variable(name).map(|v| v.value_reference)
    }

    /// Scalar type of a named variable.
    pub fn var_type(&self, name: &str) -> Option<VarType> {
        self.variable(name).map(|v| v.var_type)
    }

    pub fn n_value_refs(&self) -> usize {
        self.variables.len()
    }
}
