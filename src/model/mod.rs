//! Model capability layer.
//!
//! A dynamical model enters the crate as a capability object: an
//! implementation of the [`Model`] trait (the moral equivalent of a loaded
//! function table) paired with a [`ModelDescription`] describing its
//! variables. The driver never touches a model directly; everything goes
//! through the [`ModelHandle`] adapter.

pub mod description;
pub mod handle;
pub mod manager;

pub use description::{
    Causality, DefaultExperiment, ModelDescription, ScalarVariable, VarType, Variability,
};
pub use handle::ModelHandle;
pub use manager::{ModelBlueprint, ModelRegistry};

use crate::status::ModelResult;

/// Value reference identifying a scalar variable inside a model.
pub type ValueRef = u32;

/// Outcome of one `new_discrete_states` round of the event handshake.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscreteUpdate {
    /// The model wants another handshake round.
    pub new_discrete_states_needed: bool,
    /// The model asks the environment to stop the simulation.
    pub terminate_simulation: bool,
    /// Next scheduled time event, if the model announced one.
    pub next_event_time: Option<f64>,
}

/// Outcome of notifying the model about an accepted integrator step.
#[derive(Debug, Clone, Copy, Default)]
pub struct StepCompletion {
    /// The model requests a discrete update at this step boundary.
    pub enter_event_mode: bool,
    /// The model asks the environment to stop the simulation.
    pub terminate_simulation: bool,
}

/// Capability contract of an instantiated dynamical model.
///
/// Implementations hold the mutable model state; the driver owns the
/// instance exclusively. After a successful `set_time` or
/// `set_continuous_states`, subsequent evaluations reflect that state (no
/// implicit caching).
///
/// Only the continuous-dynamics core is required; value access, the event
/// handshake and the directional derivatives have refusing or trivial
/// defaults for models without the corresponding capability.
pub trait Model: Send {
    /// Push the simulation time into the model.
    fn set_time(&mut self, t: f64) -> ModelResult<()>;

    /// Write the continuous state vector. `x.len()` equals the declared
    /// number of continuous states.
    fn set_continuous_states(&mut self, x: &[f64]) -> ModelResult<()>;

    /// Read the continuous state vector.
    fn get_continuous_states(&self, x: &mut [f64]) -> ModelResult<()>;

    /// Evaluate the state derivatives at the current `(t, state)`.
    fn get_derivatives(&mut self, dx: &mut [f64]) -> ModelResult<()>;

    /// Evaluate the event indicators at the current `(t, state)`.
    fn get_event_indicators(&mut self, g: &mut [f64]) -> ModelResult<()> {
        let _ = g;
        Ok(())
    }

    fn get_real(&mut self, refs: &[ValueRef], values: &mut [f64]) -> ModelResult<()> {
        let _ = values;
        Err(unknown_ref(refs))
    }

    fn set_real(&mut self, refs: &[ValueRef], values: &[f64]) -> ModelResult<()> {
        let _ = values;
        Err(unknown_ref(refs))
    }

    fn get_integer(&mut self, refs: &[ValueRef], values: &mut [i32]) -> ModelResult<()> {
        let _ = values;
        Err(unknown_ref(refs))
    }

    fn set_integer(&mut self, refs: &[ValueRef], values: &[i32]) -> ModelResult<()> {
        let _ = values;
        Err(unknown_ref(refs))
    }

    fn get_boolean(&mut self, refs: &[ValueRef], values: &mut [bool]) -> ModelResult<()> {
        let _ = values;
        Err(unknown_ref(refs))
    }

    fn set_boolean(&mut self, refs: &[ValueRef], values: &[bool]) -> ModelResult<()> {
        let _ = values;
        Err(unknown_ref(refs))
    }

    fn get_string(&mut self, refs: &[ValueRef], values: &mut [String]) -> ModelResult<()> {
        let _ = values;
        Err(unknown_ref(refs))
    }

    fn set_string(&mut self, refs: &[ValueRef], values: &[String]) -> ModelResult<()> {
        let _ = values;
        Err(unknown_ref(refs))
    }

    /// Communicate experiment bounds before initialization.
    fn setup_experiment(
        &mut self,
        tolerance: Option<f64>,
        start_time: f64,
        stop_time: Option<f64>,
    ) -> ModelResult<()> {
        let _ = (tolerance, start_time, stop_time);
        Ok(())
    }

    fn enter_initialization_mode(&mut self) -> ModelResult<()> {
        Ok(())
    }

    fn exit_initialization_mode(&mut self) -> ModelResult<()> {
        Ok(())
    }

    /// Switch the model into event mode. Required before
    /// `new_discrete_states`.
    fn enter_event_mode(&mut self) -> ModelResult<()> {
        Ok(())
    }

    /// One round of the discrete-update handshake.
    fn new_discrete_states(&mut self) -> ModelResult<DiscreteUpdate> {
        Ok(DiscreteUpdate::default())
    }

    /// Switch back into continuous-time mode after the handshake.
    fn enter_continuous_time_mode(&mut self) -> ModelResult<()> {
        Ok(())
    }

    /// Notify the model that an integrator step was accepted.
    fn completed_integrator_step(&mut self) -> ModelResult<StepCompletion> {
        Ok(StepCompletion::default())
    }

    /// Directional derivative of `unknowns` with respect to `knowns`,
    /// seeded with `seed`. Only called when the description advertises the
    /// capability; the default refuses.
    fn directional_derivative(
        &mut self,
        unknowns: &[ValueRef],
        knowns: &[ValueRef],
        seed: &[f64],
        out: &mut [f64],
    ) -> ModelResult<()> {
        let _ = (unknowns, knowns, seed, out);
        Err(crate::status::ModelError::Discarded(
            "model does not provide directional derivatives".into(),
        ))
    }

    /// Final notification before the instance is dropped.
    fn terminate(&mut self) -> ModelResult<()> {
        Ok(())
    }
}

fn unknown_ref(refs: &[ValueRef]) -> crate::status::ModelError {
    crate::status::ModelError::UnknownValueReference(refs.first().copied().unwrap_or(0))
}
