//! Recorded simulation states for the rollback and lookahead layers.

use nalgebra::DVector;

/// One recorded `(time, state, outputs)` sample.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub time: f64,
    pub state: DVector<f64>,
    pub real_values: Vec<f64>,
    pub int_values: Vec<i32>,
    pub bool_values: Vec<bool>,
    pub string_values: Vec<String>,
}

impl HistoryEntry {
    pub fn new(time: f64, n_states: usize) -> Self {
        Self {
            time,
            state: DVector::zeros(n_states),
            real_values: Vec::new(),
            int_values: Vec::new(),
            bool_values: Vec::new(),
            string_values: Vec::new(),
        }
    }

    /// Linear interpolation between two samples at `time`. Continuous
    /// quantities (state and real outputs) are interpolated per component;
    /// discrete outputs take the left value.
    pub fn interpolate(time: f64, left: &HistoryEntry, right: &HistoryEntry) -> HistoryEntry {
        let span = right.time - left.time;
        if span <= 0.0 {
            return left.clone();
        }
        let lambda = (time - left.time) / span;

        let mut entry = left.clone();
        entry.time = time;
        entry.state = (1.0 - lambda) * &left.state + lambda * &right.state;
        for (value, (&l, &r)) in entry
            .real_values
            .iter_mut()
            .zip(left.real_values.iter().zip(right.real_values.iter()))
        {
            *value = l + lambda * (r - l);
        }
        entry
    }
}
