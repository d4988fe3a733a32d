//! Incremental lookahead extension.
//!
//! [`IncrementalModelExchange`] pre-computes future states in fixed
//! lookahead chunks and stores them in a prediction ring. An event-driven
//! host consumes the ring: `update_state` commits a (possibly
//! interpolated) past prediction as the new current state, `predict_state`
//! rebuilds the ring from there, and `sync` combines the two. The wrapped
//! driver runs in stop-before-event mode, so a predicted trajectory always
//! ends exactly at the first event and the discrete update happens only
//! once the host commits to crossing it.

use std::collections::VecDeque;

use tracing::debug;

use super::history::HistoryEntry;
use super::{DriverConfig, ModelExchange};
use crate::model::ValueRef;
use crate::solvers::StepperKind;
use crate::status::{ModelError, ModelResult, Status};

/// User hooks consulted while the prediction ring is filled.
pub trait LookaheadHooks: Send {
    /// Inspect the newest prediction; returning true truncates the ring at
    /// this entry and stops the prediction. The default reports the
    /// driver's event flag.
    fn check_for_event(&mut self, fmu: &ModelExchange, newest: &HistoryEntry) -> bool {
        let _ = newest;
        fmu.event_flag()
    }

    /// Called after `check_for_event` returned true.
    fn handle_event(&mut self, fmu: &mut ModelExchange) {
        let _ = fmu;
    }
}

/// Hooks that only watch the driver's own event detection.
#[derive(Debug, Default)]
pub struct DefaultHooks;

impl LookaheadHooks for DefaultHooks {}

/// Driver with an incremental lookahead ring.
pub struct IncrementalModelExchange {
    fmu: ModelExchange,
    hooks: Box<dyn LookaheadHooks>,
    /// Predicted states, strictly increasing in time.
    predictions: VecDeque<HistoryEntry>,
    current: HistoryEntry,

    real_input_refs: Vec<ValueRef>,
    integer_input_refs: Vec<ValueRef>,
    boolean_input_refs: Vec<ValueRef>,
    string_input_refs: Vec<ValueRef>,
    real_output_refs: Vec<ValueRef>,
    integer_output_refs: Vec<ValueRef>,
    boolean_output_refs: Vec<ValueRef>,
    string_output_refs: Vec<ValueRef>,

    /// Inputs re-applied whenever the driver is re-seeded.
    real_inputs: Vec<f64>,
    integer_inputs: Vec<i32>,
    boolean_inputs: Vec<bool>,
    string_inputs: Vec<String>,

    lookahead_horizon: f64,
    lookahead_step: f64,
    integrator_step: f64,
    time_diff_resolution: f64,
    last_event_time: Option<f64>,
}

impl IncrementalModelExchange {
    /// Build over a registered model. The driver runs in stop-before-event
    /// mode with `time_diff_resolution` as the event search precision.
    pub fn new(
        model_name: &str,
        time_diff_resolution: f64,
        stepper: StepperKind,
    ) -> ModelResult<Self> {
        let fmu = ModelExchange::from_registry(
            model_name,
            DriverConfig {
                stepper,
                stop_before_event: true,
                event_search_precision: time_diff_resolution,
            },
        )?;
        let n = fmu.n_states();
        Ok(Self {
            fmu,
            hooks: Box::new(DefaultHooks),
            predictions: VecDeque::new(),
            current: HistoryEntry::new(0.0, n),
            real_input_refs: Vec::new(),
            integer_input_refs: Vec::new(),
            boolean_input_refs: Vec::new(),
            string_input_refs: Vec::new(),
            real_output_refs: Vec::new(),
            integer_output_refs: Vec::new(),
            boolean_output_refs: Vec::new(),
            string_output_refs: Vec::new(),
            real_inputs: Vec::new(),
            integer_inputs: Vec::new(),
            boolean_inputs: Vec::new(),
            string_inputs: Vec::new(),
            lookahead_horizon: 0.0,
            lookahead_step: 0.0,
            integrator_step: 0.0,
            time_diff_resolution,
            last_event_time: None,
        })
    }

    /// Replace the event hooks.
    pub fn set_hooks(&mut self, hooks: Box<dyn LookaheadHooks>) {
        self.hooks = hooks;
    }

    /// Instantiate and initialize the model, set initial real values and
    /// the lookahead parameters, and seed the current state.
    pub fn init(
        &mut self,
        instance_name: &str,
        initial_reals: &[(&str, f64)],
        start_time: f64,
        lookahead_horizon: f64,
        lookahead_step: f64,
        integrator_step: f64,
    ) -> ModelResult<()> {
        if lookahead_horizon <= 0.0 {
            return Err(ModelError::RangeViolation {
                what: "lookahead_horizon",
                value: lookahead_horizon,
            });
        }
        if lookahead_step <= 0.0 || lookahead_step > lookahead_horizon {
            return Err(ModelError::RangeViolation {
                what: "lookahead_step",
                value: lookahead_step,
            });
        }
        if integrator_step <= 0.0 || integrator_step > lookahead_step {
            return Err(ModelError::RangeViolation {
                what: "integrator_step",
                value: integrator_step,
            });
        }

        self.fmu.instantiate(instance_name)?;
        for (name, value) in initial_reals {
            self.fmu.set_real(name, *value)?;
        }
        self.fmu.initialize()?;
        self.fmu.set_time(start_time)?;
        self.fmu.save_event_indicators()?;

        self.lookahead_horizon = lookahead_horizon;
        self.lookahead_step = lookahead_step;
        self.integrator_step = integrator_step;

        // seed the re-applied input buffers with the model's current values
        if !self.real_input_refs.is_empty() {
            self.fmu
                .get_reals(&self.real_input_refs, &mut self.real_inputs)?;
        }
        if !self.integer_input_refs.is_empty() {
            self.fmu
                .get_integers(&self.integer_input_refs, &mut self.integer_inputs)?;
        }
        if !self.boolean_input_refs.is_empty() {
            self.fmu
                .get_booleans(&self.boolean_input_refs, &mut self.boolean_inputs)?;
        }
        if !self.string_input_refs.is_empty() {
            self.fmu
                .get_strings(&self.string_input_refs, &mut self.string_inputs)?;
        }

        self.current = self.retrieve_state()?;
        self.predictions.clear();
        Ok(())
    }

    // ------------------------------------------------------------------
    // input/output definition

    fn resolve(&self, names: &[&str]) -> ModelResult<Vec<ValueRef>> {
        names
            .iter()
            .map(|name| {
                self.fmu
                    .value_ref(name)
                    .ok_or_else(|| ModelError::UnknownName((*name).to_string()))
            })
            .collect()
    }

    pub fn define_real_inputs(&mut self, names: &[&str]) -> ModelResult<()> {
        self.real_input_refs = self.resolve(names)?;
        self.real_inputs = vec![0.0; names.len()];
        Ok(())
    }

    pub fn define_integer_inputs(&mut self, names: &[&str]) -> ModelResult<()> {
        self.integer_input_refs = self.resolve(names)?;
        self.integer_inputs = vec![0; names.len()];
        Ok(())
    }

    pub fn define_boolean_inputs(&mut self, names: &[&str]) -> ModelResult<()> {
        self.boolean_input_refs = self.resolve(names)?;
        self.boolean_inputs = vec![false; names.len()];
        Ok(())
    }

    pub fn define_string_inputs(&mut self, names: &[&str]) -> ModelResult<()> {
        self.string_input_refs = self.resolve(names)?;
        self.string_inputs = vec![String::new(); names.len()];
        Ok(())
    }

    pub fn define_real_outputs(&mut self, names: &[&str]) -> ModelResult<()> {
        self.real_output_refs = self.resolve(names)?;
        Ok(())
    }

    pub fn define_integer_outputs(&mut self, names: &[&str]) -> ModelResult<()> {
        self.integer_output_refs = self.resolve(names)?;
        Ok(())
    }

    pub fn define_boolean_outputs(&mut self, names: &[&str]) -> ModelResult<()> {
        self.boolean_output_refs = self.resolve(names)?;
        Ok(())
    }

    pub fn define_string_outputs(&mut self, names: &[&str]) -> ModelResult<()> {
        self.string_output_refs = self.resolve(names)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // prediction protocol

    fn newest_time(&self) -> f64 {
        self.predictions
            .back()
            .map_or(self.current.time, |entry| entry.time)
    }

    /// Fill the prediction ring from the current state towards `t1`,
    /// bounded by the lookahead horizon. Stops early at the first detected
    /// event; returns the time of the newest prediction.
    pub fn predict_state(&mut self, t1: f64) -> ModelResult<f64> {
        if t1 < self.current.time - self.time_diff_resolution {
            return Err(ModelError::RangeViolation {
                what: "prediction target before current state",
                value: t1,
            });
        }
        let horizon_end = self.current.time + self.lookahead_horizon;
        let target_end = t1.min(horizon_end);

        self.apply_current_state()?;
        self.predictions.clear();
        self.predictions.push_back(self.current.clone());

        while self.newest_time() + self.time_diff_resolution < target_end {
            let target = (self.newest_time() + self.lookahead_step).min(target_end);
            let reached = self.fmu.integrate(target, self.integrator_step)?;

            let entry = self.retrieve_state()?;
            if entry.time <= self.newest_time() {
                // no forward progress (event located at the ring end)
                break;
            }
            self.predictions.push_back(entry);

            let newest = self.predictions.back().expect("ring is non-empty");
            if self.hooks.check_for_event(&self.fmu, newest) {
                self.last_event_time = Some(reached);
                debug!(time = reached, "prediction truncated at event");
                self.hooks.handle_event(&mut self.fmu);
                return Ok(reached);
            }
        }
        Ok(self.newest_time())
    }

    /// Commit the predicted state at `t1` (limit from the left at
    /// discontinuities) as the new current state, dropping older ring
    /// entries.
    pub fn update_state(&mut self, t1: f64) -> ModelResult<f64> {
        let entry = self.state_at(t1)?;
        self.current = entry;
        self.drop_predictions_before(t1);
        Ok(self.current.time)
    }

    /// Commit the predicted state at `t1`, preferring the limit from the
    /// right at discontinuities. May advance the committed time by up to
    /// the time resolution.
    pub fn update_state_from_the_right(&mut self, t1: f64) -> ModelResult<f64> {
        let mut matched: Option<HistoryEntry> = None;
        for entry in &self.predictions {
            if (entry.time - t1).abs() <= self.time_diff_resolution {
                matched = Some(entry.clone());
            } else if entry.time > t1 {
                break;
            }
        }
        self.current = match matched {
            Some(entry) => entry,
            None => self.state_at(t1)?,
        };
        self.drop_predictions_before(t1);
        Ok(self.current.time)
    }

    /// Commit `update_state(t1)` and push new inputs to the model.
    pub fn sync_state(
        &mut self,
        t1: f64,
        real_inputs: Option<&[f64]>,
        integer_inputs: Option<&[i32]>,
        boolean_inputs: Option<&[bool]>,
        string_inputs: Option<&[String]>,
    ) -> ModelResult<f64> {
        let time = self.update_state(t1)?;
        self.set_inputs(real_inputs, integer_inputs, boolean_inputs, string_inputs)?;
        Ok(time)
    }

    /// Update to `t0`, then predict up to `t1`. Returns the time of the
    /// newest prediction (the next event, if one was found).
    pub fn sync(&mut self, t0: f64, t1: f64) -> ModelResult<f64> {
        self.update_state(t0)?;
        self.predict_state(t1)
    }

    /// `sync` with new inputs applied at `t0`.
    #[allow(clippy::too_many_arguments)]
    pub fn sync_with_inputs(
        &mut self,
        t0: f64,
        t1: f64,
        real_inputs: Option<&[f64]>,
        integer_inputs: Option<&[i32]>,
        boolean_inputs: Option<&[bool]>,
        string_inputs: Option<&[String]>,
    ) -> ModelResult<f64> {
        self.sync_state(t0, real_inputs, integer_inputs, boolean_inputs, string_inputs)?;
        self.predict_state(t1)
    }

    // ------------------------------------------------------------------
    // accessors

    pub fn current_time(&self) -> f64 {
        self.current.time
    }

    pub fn current_state(&self) -> &nalgebra::DVector<f64> {
        &self.current.state
    }

    pub fn real_outputs(&self) -> &[f64] {
        &self.current.real_values
    }

    pub fn integer_outputs(&self) -> &[i32] {
        &self.current.int_values
    }

    pub fn boolean_outputs(&self) -> &[bool] {
        &self.current.bool_values
    }

    pub fn string_outputs(&self) -> &[String] {
        &self.current.string_values
    }

    pub fn predictions(&self) -> &VecDeque<HistoryEntry> {
        &self.predictions
    }

    pub fn last_event_time(&self) -> Option<f64> {
        self.last_event_time
    }

    pub fn last_status(&self) -> Status {
        self.fmu.last_status()
    }

    /// Access to the wrapped driver.
    pub fn fmu(&mut self) -> &mut ModelExchange {
        &mut self.fmu
    }

    // ------------------------------------------------------------------
    // internals

    /// Read `(time, state, outputs)` from the driver.
    fn retrieve_state(&mut self) -> ModelResult<HistoryEntry> {
        let mut entry = HistoryEntry::new(self.fmu.time(), self.fmu.n_states());
        if self.fmu.n_states() > 0 {
            self.fmu.get_continuous_states(&mut entry.state)?;
        }
        if !self.real_output_refs.is_empty() {
            entry.real_values = vec![0.0; self.real_output_refs.len()];
            self.fmu
                .get_reals(&self.real_output_refs, &mut entry.real_values)?;
        }
        if !self.integer_output_refs.is_empty() {
            entry.int_values = vec![0; self.integer_output_refs.len()];
            self.fmu
                .get_integers(&self.integer_output_refs, &mut entry.int_values)?;
        }
        if !self.boolean_output_refs.is_empty() {
            entry.bool_values = vec![false; self.boolean_output_refs.len()];
            self.fmu
                .get_booleans(&self.boolean_output_refs, &mut entry.bool_values)?;
        }
        if !self.string_output_refs.is_empty() {
            entry.string_values = vec![String::new(); self.string_output_refs.len()];
            self.fmu
                .get_strings(&self.string_output_refs, &mut entry.string_values)?;
        }
        Ok(entry)
    }

    /// Seed the driver with the current state and inputs before a
    /// prediction run.
    fn apply_current_state(&mut self) -> ModelResult<()> {
        let time = self.current.time;
        self.fmu.clear_stale_pending(time, self.time_diff_resolution);
        self.fmu.set_time(time)?;
        if self.fmu.n_states() > 0 {
            self.fmu.set_continuous_states(&self.current.state)?;
        }
        if !self.real_input_refs.is_empty() {
            self.fmu.set_reals(&self.real_input_refs, &self.real_inputs)?;
        }
        if !self.integer_input_refs.is_empty() {
            self.fmu
                .set_integers(&self.integer_input_refs, &self.integer_inputs)?;
        }
        if !self.boolean_input_refs.is_empty() {
            self.fmu
                .set_booleans(&self.boolean_input_refs, &self.boolean_inputs)?;
        }
        if !self.string_input_refs.is_empty() {
            self.fmu
                .set_strings(&self.string_input_refs, &self.string_inputs)?;
        }
        self.fmu.reset_stepper();
        self.fmu.save_event_indicators()?;
        self.fmu.set_event_flag(false);
        Ok(())
    }

    fn set_inputs(
        &mut self,
        real_inputs: Option<&[f64]>,
        integer_inputs: Option<&[i32]>,
        boolean_inputs: Option<&[bool]>,
        string_inputs: Option<&[String]>,
    ) -> ModelResult<()> {
        if let Some(values) = real_inputs {
            if values.len() != self.real_input_refs.len() {
                return Err(ModelError::RangeViolation {
                    what: "real input count",
                    value: values.len() as f64,
                });
            }
            self.real_inputs.copy_from_slice(values);
            self.fmu.set_reals(&self.real_input_refs, values)?;
        }
        if let Some(values) = integer_inputs {
            if values.len() != self.integer_input_refs.len() {
                return Err(ModelError::RangeViolation {
                    what: "integer input count",
                    value: values.len() as f64,
                });
            }
            self.integer_inputs.copy_from_slice(values);
            self.fmu.set_integers(&self.integer_input_refs, values)?;
        }
        if let Some(values) = boolean_inputs {
            if values.len() != self.boolean_input_refs.len() {
                return Err(ModelError::RangeViolation {
                    what: "boolean input count",
                    value: values.len() as f64,
                });
            }
            self.boolean_inputs.copy_from_slice(values);
            self.fmu.set_booleans(&self.boolean_input_refs, values)?;
        }
        if let Some(values) = string_inputs {
            if values.len() != self.string_input_refs.len() {
                return Err(ModelError::RangeViolation {
                    what: "string input count",
                    value: values.len() as f64,
                });
            }
            self.string_inputs.clone_from_slice(values);
            self.fmu.set_strings(&self.string_input_refs, values)?;
        }
        Ok(())
    }

    /// Predicted state at `t1`: an existing entry when one lies within the
    /// time resolution (the left-most such entry), otherwise linear
    /// interpolation between the bracketing pair.
    fn state_at(&self, t1: f64) -> ModelResult<HistoryEntry> {
        let resolution = self.time_diff_resolution;
        let front = self.predictions.front().ok_or_else(|| {
            ModelError::Discarded("no predictions available; call predict_state first".into())
        })?;
        if t1 < front.time - resolution {
            return Err(ModelError::Discarded(format!(
                "state at t = {t1} predates the prediction ring (starts at {})",
                front.time
            )));
        }

        for (i, entry) in self.predictions.iter().enumerate() {
            if (entry.time - t1).abs() <= resolution {
                return Ok(entry.clone());
            }
            if entry.time > t1 {
                return Ok(HistoryEntry::interpolate(
                    t1,
                    &self.predictions[i - 1],
                    entry,
                ));
            }
        }
        Err(ModelError::Discarded(format!(
            "state at t = {t1} is past the prediction ring (ends at {})",
            self.newest_time()
        )))
    }

    fn drop_predictions_before(&mut self, t1: f64) {
        while self
            .predictions
            .front()
            .is_some_and(|entry| entry.time < t1 - self.time_diff_resolution)
        {
            self.predictions.pop_front();
        }
    }
}
