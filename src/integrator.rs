//! Integration engine.
//!
//! [`Integrator`] drives a stepper over one integration window and refines
//! any state event the stepper reports down to the configured search
//! precision with a binary search on the event bracket. The search never
//! integrates across the event: each probe is an exact-size step from the
//! last safe point, rolled back whenever it lands past the crossing.

use nalgebra::DVector;
use tracing::debug;

use crate::model::ModelHandle;
use crate::solvers::{create_stepper, Stepper, StepperKind, StepperProps};
use crate::status::ModelResult;

/// Event classification reported per integration window.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EventInfo {
    /// An event indicator changed sign inside the window.
    pub state_event: bool,
    /// The model requested a discrete update at a step boundary.
    pub step_event: bool,
    /// Last time known to lie before the event.
    pub t_lower: f64,
    /// First time known to lie after the event.
    pub t_upper: f64,
}

impl EventInfo {
    /// Width of the event bracket.
    pub fn horizon(&self) -> (f64, f64) {
        (self.t_lower, self.t_upper)
    }
}

/// Drives a stepper and locates state events by bisection.
pub struct Integrator {
    stepper: Box<dyn Stepper>,
    props: StepperProps,
    states: DVector<f64>,
    time: f64,
    event_info: EventInfo,
}

impl Integrator {
    /// Create an engine for a model with `n_states` continuous states.
    pub fn new(kind: StepperKind, n_states: usize) -> Self {
        let mut props = StepperProps::new(kind);
        let stepper = create_stepper(&mut props, n_states);
        Self {
            stepper,
            props,
            states: DVector::zeros(n_states),
            time: 0.0,
            event_info: EventInfo::default(),
        }
    }

    /// Replace the stepper, keeping the configured tolerances.
    pub fn set_kind(&mut self, kind: StepperKind) {
        let mut props = self.props;
        props.kind = kind;
        self.set_properties(props);
    }

    /// Replace the stepper with freshly sanitized properties.
    pub fn set_properties(&mut self, mut props: StepperProps) {
        self.stepper = create_stepper(&mut props, self.states.len());
        self.props = props;
    }

    pub fn properties(&self) -> StepperProps {
        self.props
    }

    /// Drop stepper history (multistep buffers); used after a rollback or
    /// an externally imposed state change.
    pub fn reset_stepper(&mut self) {
        self.stepper.reset();
    }

    /// Bracket of the last located state event.
    pub fn event_horizon(&self) -> (f64, f64) {
        self.event_info.horizon()
    }

    /// Time of the state committed to the handle (equals `t_lower` after a
    /// located event).
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Integrate over `[handle.time(), handle.time() + span]` with initial
    /// step hint `dt`, locating any state event to within `precision`.
    ///
    /// On return without a state event the handle holds the state at the
    /// window end. With a state event the handle holds the state at
    /// `t_lower`, strictly before the crossing, and
    /// `t_upper - t_lower <= 3/4 * precision`.
    pub fn integrate(
        &mut self,
        handle: &mut ModelHandle,
        span: f64,
        dt: f64,
        precision: f64,
    ) -> ModelResult<EventInfo> {
        self.time = handle.time();
        handle.get_continuous_states(&mut self.states)?;

        let mut info = self
            .stepper
            .invoke(handle, &mut self.states, self.time, span, dt)?;

        if !info.state_event {
            self.event_info = info;
            return Ok(info);
        }

        // The stepper may have adapted its step past the window end; only
        // search for an event within the integration limits.
        if info.t_upper > self.time + span {
            let states_bak = self.states.clone();
            let mut t = handle.time();
            let rest = self.time + span - t;
            self.stepper
                .step_exact(handle, &mut self.states, &mut t, rest)?;
            handle.set_continuous_states(&self.states)?;
            handle.set_time(self.time + span)?;
            if !handle.check_state_event()? {
                info.state_event = false;
                self.time += span;
                self.event_info = info;
                return Ok(info);
            }
            info.t_upper = self.time + span;

            // re-establish the state at t_lower for the search below
            self.states = states_bak;
            handle.set_continuous_states(&self.states)?;
            handle.set_time(info.t_lower)?;
        }

        // Binary search on [t_lower, t_upper]. `self.states` always holds
        // the state at t_lower.
        while info.t_upper - info.t_lower > precision / 2.0 {
            let states_bak = self.states.clone();

            let dt_half = (info.t_upper - info.t_lower) / 2.0;
            let mut t = info.t_lower;
            self.stepper
                .step_exact(handle, &mut self.states, &mut t, dt_half)?;

            handle.set_continuous_states(&self.states)?;
            handle.set_time(t)?;

            if handle.check_state_event()? {
                // the probe crossed the event: back to the safe point
                handle.set_continuous_states(&states_bak)?;
                handle.set_time(info.t_lower)?;
                self.states = states_bak;
                self.stepper.reset();

                info.t_upper = (info.t_upper + info.t_lower) / 2.0;
            } else {
                info.t_lower = (info.t_upper + info.t_lower) / 2.0;
            }
        }

        // place the upper bound strictly past the event
        info.t_upper += precision / 8.0;
        self.time = info.t_lower;
        self.event_info = info;
        debug!(
            t_lower = info.t_lower,
            t_upper = info.t_upper,
            "state event located"
        );
        Ok(info)
    }
}
