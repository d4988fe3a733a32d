//! Model-exchange driver.
//!
//! [`ModelExchange`] is the public facade: it owns the model handle and the
//! integration engine, keeps the event bookkeeping (time events, located
//! state-event horizons, the pending-event latch) and implements the
//! central `integrate` operation with its two modes. With
//! `stop_before_event` the driver suspends immediately before a located
//! event and performs the discrete update at the start of the next call;
//! otherwise it steps over the event in place with one explicit Euler step
//! across the event horizon.

pub mod history;
pub mod incremental;
pub mod rollback;

pub use history::HistoryEntry;
pub use incremental::{IncrementalModelExchange, LookaheadHooks};
pub use rollback::RollbackModelExchange;

use std::collections::HashMap;
use std::sync::Arc;

use nalgebra::{DMatrix, DVector};
use tracing::{debug, warn};

use crate::integrator::Integrator;
use crate::model::{ModelBlueprint, ModelHandle, ModelRegistry, ValueRef, VarType};
use crate::solvers::{StepperKind, StepperProps};
use crate::status::{ModelError, ModelResult, Status};

/// Maximum number of `new_discrete_states` rounds per event handshake.
pub const MAX_EVENT_ITERATIONS: usize = 5;

/// Driver construction options.
#[derive(Debug, Clone, Copy)]
pub struct DriverConfig {
    /// Stepper used by the integration engine.
    pub stepper: StepperKind,
    /// Stop immediately before events instead of stepping over them.
    pub stop_before_event: bool,
    /// Numerical search precision for event location.
    pub event_search_precision: f64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            stepper: StepperKind::default(),
            stop_before_event: false,
            event_search_precision: 1e-4,
        }
    }
}

/// Deferred event work carried between `integrate` calls in
/// stop-before-event mode.
#[derive(Debug, Clone, Copy, PartialEq)]
enum PendingEvent {
    /// Only the discrete update is outstanding (no continuous states).
    Handshake,
    /// Step over the cached event horizon, then handshake.
    StepOver { t_lower: f64, t_upper: f64 },
}

/// Saved driver state used by the rollback layer.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub entry: HistoryEntry,
    prev_indicators: DVector<f64>,
    next_event_time: Option<f64>,
}

/// Public facade over one model instance.
pub struct ModelExchange {
    blueprint: Arc<ModelBlueprint>,
    handle: Option<ModelHandle>,
    integrator: Integrator,
    instance_name: String,
    /// Name lookup cached at `instantiate`.
    var_map: HashMap<String, ValueRef>,

    stop_before_event: bool,
    event_search_precision: f64,

    time: f64,
    /// Upper limit of the current event horizon.
    t_upper_event: f64,
    next_event_time: Option<f64>,
    last_event_time: Option<f64>,
    pending: Option<PendingEvent>,

    state_event: bool,
    time_event: bool,
    /// Step-event request from the last `completed_integrator_step`.
    enter_event_mode: bool,
    /// Latched: the engine located a state event at some point.
    int_event: bool,
    event_flag: bool,
    raised_event: bool,

    states_buf: DVector<f64>,
    derivatives_buf: DVector<f64>,
    last_status: Status,
}

impl ModelExchange {
    /// Create a driver over a registered blueprint. The default-experiment
    /// tolerance, when present, is imposed on the stepper.
    pub fn new(blueprint: Arc<ModelBlueprint>, config: DriverConfig) -> Self {
        let n = blueprint.description.n_continuous_states;
        let mut integrator = Integrator::new(config.stepper, n);
        let mut time = 0.0;
        if let Some(experiment) = blueprint.description.default_experiment {
            if let Some(tolerance) = experiment.tolerance {
                let mut props = integrator.properties();
                props.abstol = Some(tolerance);
                props.reltol = Some(tolerance);
                integrator.set_properties(props);
            }
            if let Some(start) = experiment.start_time {
                time = start;
            }
        }
        Self {
            blueprint,
            handle: None,
            integrator,
            instance_name: String::new(),
            var_map: HashMap::new(),
            stop_before_event: config.stop_before_event,
            event_search_precision: config.event_search_precision,
            time,
            t_upper_event: time,
            next_event_time: None,
            last_event_time: None,
            pending: None,
            state_event: false,
            time_event: false,
            enter_event_mode: false,
            int_event: false,
            event_flag: false,
            raised_event: false,
            states_buf: DVector::zeros(n),
            derivatives_buf: DVector::zeros(n),
            last_status: Status::Ok,
        }
    }

    /// Look up `model_name` in the process-wide registry and build a driver
    /// for it. A missing registration is fatal.
    pub fn from_registry(model_name: &str, config: DriverConfig) -> ModelResult<Self> {
        let blueprint = ModelRegistry::blueprint(model_name)?;
        Ok(Self::new(blueprint, config))
    }

    /// Create the model instance and the indicator/state buffers.
    pub fn instantiate(&mut self, instance_name: &str) -> ModelResult<()> {
        self.with_status(|me| me.instantiate_inner(instance_name))
    }

    fn instantiate_inner(&mut self, instance_name: &str) -> ModelResult<()> {
        if self.handle.is_some() {
            return Err(ModelError::Discarded(format!(
                "instance `{}` already exists",
                self.instance_name
            )));
        }
        self.instance_name = instance_name.to_string();

        // check the variable table and cache the name lookup; duplicate
        // definitions are non-fatal but leave a warning status
        if self.blueprint.description.validate() > 0 {
            self.last_status = self.last_status.worst(Status::Warning);
        }
        self.var_map = self.blueprint.description.variable_map();

        let model = self.blueprint.instantiate();
        let handle = ModelHandle::new(model, self.blueprint.description.clone());
        self.handle = Some(handle);
        self.time = 0.0;
        self.next_event_time = None;
        debug!(instance = instance_name, "model instantiated");
        Ok(())
    }

    /// Run the initialization handshake: experiment setup, initialization
    /// mode, the first discrete-states round and the switch to
    /// continuous-time mode.
    pub fn initialize(&mut self) -> ModelResult<()> {
        self.with_status(|me| me.initialize_inner())
    }

    fn initialize_inner(&mut self) -> ModelResult<()> {
        let experiment = self.blueprint.description.default_experiment.unwrap_or_default();
        if let Some(start) = experiment.start_time {
            self.time = start;
        }
        let time = self.time;

        let handle = self.handle.as_mut().ok_or(ModelError::NotInstantiated)?;
        handle.setup_experiment(experiment.tolerance, time, experiment.stop_time)?;
        handle.enter_initialization_mode()?;
        handle.exit_initialization_mode()?;

        let update = handle.new_discrete_states()?;
        self.next_event_time = update.next_event_time;

        handle.enter_continuous_time_mode()?;
        handle.set_time(time)?;
        handle.save_event_indicators()?;
        Ok(())
    }

    fn record<T>(&mut self, result: &ModelResult<T>) {
        if let Err(error) = result {
            self.last_status = self.last_status.worst(error.status());
        }
    }

    /// Run one public operation with a fresh status, folding any failure
    /// into `last_status`.
    fn with_status<T>(
        &mut self,
        operation: impl FnOnce(&mut Self) -> ModelResult<T>,
    ) -> ModelResult<T> {
        self.last_status = Status::Ok;
        let result = operation(self);
        self.record(&result);
        result
    }

    // ------------------------------------------------------------------
    // integration

    /// Integrate up to `t_end` with initial step hint `dt`. Returns the
    /// reached time, which is `t_end` unless an event stopped the
    /// integration earlier.
    pub fn integrate(&mut self, t_end: f64, dt: f64) -> ModelResult<f64> {
        self.last_status = Status::Ok;
        let result = self.integrate_inner(t_end, dt);
        self.record(&result);
        result
    }

    /// Integrate up to `t_end` in `n_steps` equal step hints.
    pub fn integrate_n(&mut self, t_end: f64, n_steps: u32) -> ModelResult<f64> {
        if n_steps == 0 {
            let error = ModelError::RangeViolation {
                what: "n_steps",
                value: 0.0,
            };
            self.last_status = self.last_status.worst(error.status());
            return Err(error);
        }
        let dt = (t_end - self.time) / f64::from(n_steps);
        self.integrate(t_end, dt)
    }

    fn integrate_inner(&mut self, mut t_end: f64, dt: f64) -> ModelResult<f64> {
        if self.n_states() == 0 {
            return self.integrate_no_states(t_end);
        }

        // an event latched by the previous call is triggered and handled
        // before integration continues
        if self.stop_before_event {
            if let Some(PendingEvent::StepOver { t_lower, t_upper }) = self.pending {
                self.time = t_lower;
                self.t_upper_event = t_upper;
                self.step_over_event()?;
            }
        }

        // clamp the window when a time event is scheduled inside it
        self.time_event = false;
        if let Some(te) = self.next_event_time {
            if te <= t_end {
                self.time_event = true;
                t_end = te - self.event_search_precision / 2.0;
            }
        }

        let precision = self.event_search_precision;
        let span = t_end - self.time;
        let handle = self.handle.as_mut().ok_or(ModelError::NotInstantiated)?;
        handle.save_event_indicators()?;

        let info = self.integrator.integrate(handle, span, dt, precision)?;
        self.time = handle.time();

        self.state_event = info.state_event;
        self.int_event |= info.state_event;

        if info.step_event {
            self.handle_events()?;
        } else if self.state_event {
            let (t_lower, t_upper) = self.integrator.event_horizon();
            self.time = t_lower;
            self.t_upper_event = t_upper;
            if !self.stop_before_event {
                self.step_over_event()?;
            } else {
                self.pending = Some(PendingEvent::StepOver { t_lower, t_upper });
            }
        } else if self.time_event {
            self.t_upper_event = self.time + self.event_search_precision;
            if !self.stop_before_event {
                self.step_over_event()?;
            } else {
                self.pending = Some(PendingEvent::StepOver {
                    t_lower: self.time,
                    t_upper: self.t_upper_event,
                });
            }
        }

        self.event_flag =
            self.time_event || self.state_event || self.pending.is_some() || info.step_event;
        Ok(self.time)
    }

    /// Degenerate path for models without continuous states: no numerical
    /// integration, only time bookkeeping and event handling.
    fn integrate_no_states(&mut self, mut t_end: f64) -> ModelResult<f64> {
        if self.stop_before_event {
            // completed_integrator_step runs at the beginning of the call,
            // as does the event handling latched by the previous call
            self.completed_integrator_step()?;
            if self.pending.is_some() {
                self.handle_events()?;
                self.pending = None;
            }
        }

        self.time_event = matches!(self.next_event_time, Some(te) if te <= t_end);
        if self.time_event {
            t_end = self.next_event_time.unwrap_or(t_end);
        }
        self.set_time(t_end)?;
        self.state_event = self.check_state_event()?;

        if !self.stop_before_event {
            self.completed_integrator_step()?;
            if self.time_event || self.enter_event_mode || self.state_event {
                self.handle_events()?;
            }
        } else if self.time_event || self.enter_event_mode || self.state_event {
            self.pending = Some(PendingEvent::Handshake);
        }

        self.event_flag = self.time_event
            || self.state_event
            || self.enter_event_mode
            || self.pending.is_some();
        Ok(t_end)
    }

    /// Trigger a located event: one explicit Euler step across the event
    /// horizon `[time, t_upper_event]`, then the discrete update.
    pub fn step_over_event(&mut self) -> ModelResult<bool> {
        if !self.state_event && !self.time_event {
            return Ok(false);
        }
        let dt = self.t_upper_event - self.time;
        let t_upper = self.t_upper_event;

        let handle = self.handle.as_mut().ok_or(ModelError::NotInstantiated)?;
        handle.get_continuous_states(&mut self.states_buf)?;
        handle.get_derivatives(&mut self.derivatives_buf)?;
        self.states_buf.axpy(dt, &self.derivatives_buf, 1.0);

        handle.set_time(t_upper)?;
        handle.set_continuous_states(&self.states_buf)?;
        self.time = t_upper;

        self.completed_integrator_step()?;
        self.handle_events()?;
        self.pending = None;
        Ok(true)
    }

    /// Discrete-update handshake: `enter_event_mode`, a bounded
    /// `new_discrete_states` loop, then back to continuous-time mode. The
    /// indicator baseline is refreshed at the committed post-event state.
    pub fn handle_events(&mut self) -> ModelResult<()> {
        let time = self.time;
        let handle = self.handle.as_mut().ok_or(ModelError::NotInstantiated)?;
        handle.enter_event_mode()?;

        let mut needed = true;
        let mut terminate = false;
        let mut iterations = 0usize;
        while needed && !terminate && iterations < MAX_EVENT_ITERATIONS {
            let update = handle.new_discrete_states()?;
            needed = update.new_discrete_states_needed;
            terminate = update.terminate_simulation;
            self.next_event_time = update.next_event_time;
            iterations += 1;
        }
        if needed && !terminate {
            warn!(
                iterations,
                time, "event handshake did not settle; continuing"
            );
            self.last_status = self.last_status.worst(Status::Warning);
        }

        let handle = self.handle.as_mut().ok_or(ModelError::NotInstantiated)?;
        handle.enter_continuous_time_mode()?;
        handle.save_event_indicators()?;
        self.last_event_time = Some(time);
        Ok(())
    }

    /// Notify the model about an accepted step and latch its step-event
    /// request.
    pub fn completed_integrator_step(&mut self) -> ModelResult<()> {
        let handle = self.handle.as_mut().ok_or(ModelError::NotInstantiated)?;
        let completion = handle.completed_integrator_step()?;
        self.enter_event_mode = completion.enter_event_mode;
        Ok(())
    }

    // ------------------------------------------------------------------
    // time and state access

    pub fn time(&self) -> f64 {
        self.time
    }

    /// Push a new simulation time into the model.
    pub fn set_time(&mut self, t: f64) -> ModelResult<()> {
        self.time = t;
        let handle = self.handle.as_mut().ok_or(ModelError::NotInstantiated)?;
        handle.set_time(t)
    }

    /// Decrement the simulation time without replaying dynamics.
    pub fn rewind_time(&mut self, delta: f64) -> ModelResult<()> {
        let t = self.time - delta;
        self.set_time(t)
    }

    pub fn get_continuous_states(&mut self, states: &mut DVector<f64>) -> ModelResult<()> {
        let handle = self.handle.as_mut().ok_or(ModelError::NotInstantiated)?;
        handle.get_continuous_states(states)
    }

    pub fn set_continuous_states(&mut self, states: &DVector<f64>) -> ModelResult<()> {
        let handle = self.handle.as_mut().ok_or(ModelError::NotInstantiated)?;
        handle.set_continuous_states(states)
    }

    pub fn get_derivatives(&mut self, derivatives: &mut DVector<f64>) -> ModelResult<()> {
        let handle = self.handle.as_mut().ok_or(ModelError::NotInstantiated)?;
        handle.get_derivatives(derivatives)
    }

    pub fn get_event_indicators(&mut self, indicators: &mut DVector<f64>) -> ModelResult<()> {
        let handle = self.handle.as_mut().ok_or(ModelError::NotInstantiated)?;
        handle.get_event_indicators(indicators)
    }

    /// Dense Jacobian of the derivatives with respect to the states,
    /// column-major.
    pub fn jacobian(&mut self, jac: &mut DMatrix<f64>) -> ModelResult<()> {
        let handle = self.handle.as_mut().ok_or(ModelError::NotInstantiated)?;
        handle.jacobian(jac)
    }

    /// Finite-difference Jacobian plus time derivative at `(t, x)`.
    pub fn numerical_jacobian(
        &mut self,
        jac: &mut DMatrix<f64>,
        x: &DVector<f64>,
        dfdt: &mut DVector<f64>,
        t: f64,
    ) -> ModelResult<()> {
        let handle = self.handle.as_mut().ok_or(ModelError::NotInstantiated)?;
        handle.numerical_jacobian(jac, x, dfdt, t)
    }

    // ------------------------------------------------------------------
    // value access

    fn lookup(&mut self, name: &str) -> ModelResult<ValueRef> {
        // the cached map is filled at instantiate; fall back to the
        // description so lookups before that keep their error kind
        let vr = self
            .var_map
            .get(name)
            .copied()
            .or_else(|| self.blueprint.description.value_ref(name));
        match vr {
            Some(vr) => Ok(vr),
            None => {
                warn!(name, "variable does not exist");
                let error = ModelError::UnknownName(name.to_string());
                self.last_status = self.last_status.worst(error.status());
                Err(error)
            }
        }
    }

    pub fn get_real(&mut self, name: &str) -> ModelResult<f64> {
        self.with_status(|me| {
            let vr = me.lookup(name)?;
            let handle = me.handle.as_mut().ok_or(ModelError::NotInstantiated)?;
            let mut out = [f64::NAN];
            handle.get_real(&[vr], &mut out)?;
            Ok(out[0])
        })
    }

    pub fn set_real(&mut self, name: &str, value: f64) -> ModelResult<()> {
        self.with_status(|me| {
            let vr = me.lookup(name)?;
            let handle = me.handle.as_mut().ok_or(ModelError::NotInstantiated)?;
            handle.set_real(&[vr], &[value])
        })
    }

    pub fn get_integer(&mut self, name: &str) -> ModelResult<i32> {
        self.with_status(|me| {
            let vr = me.lookup(name)?;
            let handle = me.handle.as_mut().ok_or(ModelError::NotInstantiated)?;
            let mut out = [0i32];
            handle.get_integer(&[vr], &mut out)?;
            Ok(out[0])
        })
    }

    pub fn set_integer(&mut self, name: &str, value: i32) -> ModelResult<()> {
        self.with_status(|me| {
            let vr = me.lookup(name)?;
            let handle = me.handle.as_mut().ok_or(ModelError::NotInstantiated)?;
            handle.set_integer(&[vr], &[value])
        })
    }

    pub fn get_boolean(&mut self, name: &str) -> ModelResult<bool> {
        self.with_status(|me| {
            let vr = me.lookup(name)?;
            let handle = me.handle.as_mut().ok_or(ModelError::NotInstantiated)?;
            let mut out = [false];
            handle.get_boolean(&[vr], &mut out)?;
            Ok(out[0])
        })
    }

    pub fn set_boolean(&mut self, name: &str, value: bool) -> ModelResult<()> {
        self.with_status(|me| {
            let vr = me.lookup(name)?;
            let handle = me.handle.as_mut().ok_or(ModelError::NotInstantiated)?;
            handle.set_boolean(&[vr], &[value])
        })
    }

    pub fn get_string(&mut self, name: &str) -> ModelResult<String> {
        self.with_status(|me| {
            let vr = me.lookup(name)?;
            let handle = me.handle.as_mut().ok_or(ModelError::NotInstantiated)?;
            let mut out = [String::new()];
            handle.get_string(&[vr], &mut out)?;
            Ok(out.into_iter().next().unwrap_or_default())
        })
    }

    pub fn set_string(&mut self, name: &str, value: &str) -> ModelResult<()> {
        self.with_status(|me| {
            let vr = me.lookup(name)?;
            let handle = me.handle.as_mut().ok_or(ModelError::NotInstantiated)?;
            handle.set_string(&[vr], &[value.to_string()])
        })
    }

    /// Bulk access by value reference, used by the lookahead layer.
    pub fn get_reals(&mut self, refs: &[ValueRef], values: &mut [f64]) -> ModelResult<()> {
        let handle = self.handle.as_mut().ok_or(ModelError::NotInstantiated)?;
        handle.get_real(refs, values)
    }

    pub fn set_reals(&mut self, refs: &[ValueRef], values: &[f64]) -> ModelResult<()> {
        let handle = self.handle.as_mut().ok_or(ModelError::NotInstantiated)?;
        handle.set_real(refs, values)
    }

    pub fn get_integers(&mut self, refs: &[ValueRef], values: &mut [i32]) -> ModelResult<()> {
        let handle = self.handle.as_mut().ok_or(ModelError::NotInstantiated)?;
        handle.get_integer(refs, values)
    }

    pub fn set_integers(&mut self, refs: &[ValueRef], values: &[i32]) -> ModelResult<()> {
        let handle = self.handle.as_mut().ok_or(ModelError::NotInstantiated)?;
        handle.set_integer(refs, values)
    }

    pub fn get_booleans(&mut self, refs: &[ValueRef], values: &mut [bool]) -> ModelResult<()> {
        let handle = self.handle.as_mut().ok_or(ModelError::NotInstantiated)?;
        handle.get_boolean(refs, values)
    }

    pub fn set_booleans(&mut self, refs: &[ValueRef], values: &[bool]) -> ModelResult<()> {
        let handle = self.handle.as_mut().ok_or(ModelError::NotInstantiated)?;
        handle.set_boolean(refs, values)
    }

    pub fn get_strings(&mut self, refs: &[ValueRef], values: &mut [String]) -> ModelResult<()> {
        let handle = self.handle.as_mut().ok_or(ModelError::NotInstantiated)?;
        handle.get_string(refs, values)
    }

    pub fn set_strings(&mut self, refs: &[ValueRef], values: &[String]) -> ModelResult<()> {
        let handle = self.handle.as_mut().ok_or(ModelError::NotInstantiated)?;
        handle.set_string(refs, values)
    }

    // ------------------------------------------------------------------
    // queries and event bookkeeping

    pub fn n_states(&self) -> usize {
        self.blueprint.description.n_continuous_states
    }

    pub fn n_event_indicators(&self) -> usize {
        self.blueprint.description.n_event_indicators
    }

    pub fn n_value_refs(&self) -> usize {
        self.blueprint.description.n_value_refs()
    }

    pub fn value_ref(&self, name: &str) -> Option<ValueRef> {
        self.blueprint.description.value_ref(name)
    }

    /// Scalar type of a named variable; unknown names are logged and
    /// reported as a discard.
    pub fn var_type(&mut self, name: &str) -> Option<VarType> {
        let var_type = self.blueprint.description.var_type(name);
        if var_type.is_none() {
            warn!(name, "variable does not exist");
            self.last_status = self.last_status.worst(Status::Discard);
        }
        var_type
    }

    pub fn provides_jacobian(&self) -> bool {
        self.blueprint.description.provides_directional_derivative
    }

    pub fn last_status(&self) -> Status {
        self.last_status
    }

    pub fn event_search_precision(&self) -> f64 {
        self.event_search_precision
    }

    /// Bracket of the last located state event.
    pub fn last_event_horizon(&self) -> (f64, f64) {
        self.integrator.event_horizon()
    }

    /// Time of the last handled event.
    pub fn last_event_time(&self) -> Option<f64> {
        self.last_event_time
    }

    /// Any event observed by the last `integrate` call, including a latched
    /// upcoming event.
    pub fn event_flag(&self) -> bool {
        self.event_flag
    }

    pub fn set_event_flag(&mut self, flag: bool) {
        self.event_flag = flag;
    }

    /// Latched flag: the engine located a state event at some point.
    pub fn int_event(&self) -> bool {
        self.int_event
    }

    /// Next scheduled time event, if any.
    pub fn time_event(&self) -> Option<f64> {
        self.next_event_time
    }

    /// Mark that an event may have occurred outside the driver's view.
    pub fn raise_event(&mut self) {
        self.raised_event = true;
    }

    pub fn raised_event(&self) -> bool {
        self.raised_event
    }

    /// Name given at `instantiate`.
    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }

    pub fn reset_event_flags(&mut self) {
        self.event_flag = false;
        self.int_event = false;
        self.time_event = false;
        self.state_event = false;
        self.raised_event = false;
        self.pending = None;
    }

    /// Refresh the indicator sign-change baseline.
    pub fn save_event_indicators(&mut self) -> ModelResult<()> {
        let handle = self.handle.as_mut().ok_or(ModelError::NotInstantiated)?;
        handle.save_event_indicators()
    }

    /// Compare fresh indicators against the baseline; latches the event
    /// flags on a sign change.
    pub fn check_state_event(&mut self) -> ModelResult<bool> {
        let handle = self.handle.as_mut().ok_or(ModelError::NotInstantiated)?;
        let event = handle.check_state_event()?;
        self.int_event |= event;
        self.event_flag |= event;
        Ok(event)
    }

    /// True when the model has a time event scheduled.
    pub fn check_time_event(&mut self) -> bool {
        self.next_event_time.is_some()
    }

    /// Notify the model of an accepted step and report whether it requests
    /// a discrete update.
    pub fn check_step_event(&mut self) -> ModelResult<bool> {
        self.completed_integrator_step()?;
        Ok(self.enter_event_mode)
    }

    /// True once the model has asked for termination; the request is
    /// logged and integration continues.
    pub fn terminate_requested(&self) -> bool {
        self.handle
            .as_ref()
            .map(ModelHandle::terminate_requested)
            .unwrap_or(false)
    }

    // ------------------------------------------------------------------
    // stepper control

    /// Swap the stepper, keeping the configured tolerances.
    pub fn set_stepper(&mut self, kind: StepperKind) {
        self.integrator.set_kind(kind);
    }

    /// Replace the stepper properties (sanitized by the factory).
    pub fn set_stepper_properties(&mut self, props: StepperProps) {
        self.integrator.set_properties(props);
    }

    pub fn stepper_properties(&self) -> StepperProps {
        self.integrator.properties()
    }

    /// Drop stepper history after an externally imposed state change.
    pub fn reset_stepper(&mut self) {
        self.integrator.reset_stepper();
    }

    /// True when an event latched in stop-before-event mode is still
    /// waiting to be triggered.
    pub fn has_pending_event(&self) -> bool {
        self.pending.is_some()
    }

    /// Drop a latched event whose horizon no longer matches the committed
    /// time `t` (the lookahead layer re-seeds the driver state and must not
    /// step over an event located on an abandoned trajectory).
    pub(crate) fn clear_stale_pending(&mut self, t: f64, tol: f64) {
        if let Some(PendingEvent::StepOver { t_lower, .. }) = self.pending {
            if (t_lower - t).abs() > tol {
                self.pending = None;
                self.state_event = false;
                self.time_event = false;
            }
        }
    }

    // ------------------------------------------------------------------
    // snapshots (rollback support)

    /// Capture the committed `(time, state)` plus the event bookkeeping.
    pub fn capture_snapshot(&mut self) -> ModelResult<Snapshot> {
        let time = self.time;
        let next_event_time = self.next_event_time;
        let n = self.n_states();
        let handle = self.handle.as_mut().ok_or(ModelError::NotInstantiated)?;
        let mut entry = HistoryEntry::new(time, n);
        handle.get_continuous_states(&mut entry.state)?;
        Ok(Snapshot {
            entry,
            prev_indicators: handle.indicator_snapshot(),
            next_event_time,
        })
    }

    /// Restore a captured snapshot: model time and state, the indicator
    /// baseline and the time-event bookkeeping. Stepper history is
    /// dropped; event flags are cleared.
    pub fn restore_snapshot(&mut self, snapshot: &Snapshot) -> ModelResult<()> {
        let handle = self.handle.as_mut().ok_or(ModelError::NotInstantiated)?;
        handle.set_time(snapshot.entry.time)?;
        handle.set_continuous_states(&snapshot.entry.state)?;
        handle.restore_indicator_snapshot(&snapshot.prev_indicators);

        self.time = snapshot.entry.time;
        self.t_upper_event = snapshot.entry.time;
        self.next_event_time = snapshot.next_event_time;
        self.reset_event_flags();
        self.integrator.reset_stepper();
        Ok(())
    }
}

impl Drop for ModelExchange {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.as_mut() {
            let _ = handle.terminate();
        }
    }
}
