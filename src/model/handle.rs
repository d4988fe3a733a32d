//! Thin adapter around an instantiated model.
//!
//! [`ModelHandle`] mirrors the current simulation time, keeps the two
//! event-indicator snapshots used for sign-change detection, and provides
//! the Jacobian either from the model's directional derivatives or from a
//! 6th-order finite-difference fallback.

use std::sync::Arc;

use nalgebra::{DMatrix, DVector};
use tracing::{debug, warn};

use super::{DiscreteUpdate, Model, ModelDescription, StepCompletion, ValueRef};
use crate::status::{ModelError, ModelResult};

/// Weights of the 6th-order centered difference at offsets -3h .. 3h.
const FD_WEIGHTS: [(i32, f64); 6] = [
    (-3, -1.0 / 60.0),
    (-2, 3.0 / 20.0),
    (-1, -3.0 / 4.0),
    (1, 3.0 / 4.0),
    (2, -3.0 / 20.0),
    (3, 1.0 / 60.0),
];

/// Adapter owning the model instance for the lifetime of a driver.
pub struct ModelHandle {
    model: Box<dyn Model>,
    description: Arc<ModelDescription>,
    time: f64,
    /// Current event indicators, refreshed by `check_state_event`.
    indicators: DVector<f64>,
    /// Indicator snapshot from the last accepted step or event.
    prev_indicators: DVector<f64>,
    /// Set when the model asked for termination; integration continues.
    terminate_requested: bool,
}

impl ModelHandle {
    pub fn new(model: Box<dyn Model>, description: Arc<ModelDescription>) -> Self {
        let m = description.n_event_indicators;
        Self {
            model,
            description,
            time: 0.0,
            indicators: DVector::zeros(m),
            prev_indicators: DVector::zeros(m),
            terminate_requested: false,
        }
    }

    pub fn description(&self) -> &Arc<ModelDescription> {
        &self.description
    }

    pub fn n_states(&self) -> usize {
        self.description.n_continuous_states
    }

    pub fn n_event_indicators(&self) -> usize {
        self.description.n_event_indicators
    }

    pub fn provides_jacobian(&self) -> bool {
        self.description.provides_directional_derivative
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    /// True once the model has asked for termination during a step
    /// completion or the event handshake.
    pub fn terminate_requested(&self) -> bool {
        self.terminate_requested
    }

    pub fn set_time(&mut self, t: f64) -> ModelResult<()> {
        self.time = t;
        self.model.set_time(t)
    }

    pub fn set_continuous_states(&mut self, x: &DVector<f64>) -> ModelResult<()> {
        self.model.set_continuous_states(x.as_slice())
    }

    pub fn get_continuous_states(&self, x: &mut DVector<f64>) -> ModelResult<()> {
        self.model.get_continuous_states(x.as_mut_slice())
    }

    pub fn get_derivatives(&mut self, dx: &mut DVector<f64>) -> ModelResult<()> {
        self.model.get_derivatives(dx.as_mut_slice())
    }

    /// Evaluate the right-hand side at `(t, x)`: pushes time and state into
    /// the model, then reads the derivatives.
    pub fn derivatives_at(
        &mut self,
        t: f64,
        x: &DVector<f64>,
        dx: &mut DVector<f64>,
    ) -> ModelResult<()> {
        self.set_time(t)?;
        self.set_continuous_states(x)?;
        self.get_derivatives(dx)
    }

    pub fn get_event_indicators(&mut self, g: &mut DVector<f64>) -> ModelResult<()> {
        self.model.get_event_indicators(g.as_mut_slice())
    }

    /// Refresh the current indicators and compare against the previous
    /// snapshot. A state event is a strict sign change on any index; an
    /// exact zero on either side does not count.
    pub fn check_state_event(&mut self) -> ModelResult<bool> {
        if self.description.n_event_indicators == 0 {
            return Ok(false);
        }
        self.model
            .get_event_indicators(self.indicators.as_mut_slice())?;
        Ok(self
            .indicators
            .iter()
            .zip(self.prev_indicators.iter())
            .any(|(&now, &prev)| now * prev < 0.0))
    }

    /// Copy of the indicator snapshot used as the sign-change baseline.
    pub fn indicator_snapshot(&self) -> DVector<f64> {
        self.prev_indicators.clone()
    }

    /// Restore a previously captured indicator snapshot (rollback path).
    pub fn restore_indicator_snapshot(&mut self, snapshot: &DVector<f64>) {
        self.prev_indicators.copy_from(snapshot);
    }

    /// Take a fresh indicator snapshot as the new comparison baseline.
    pub fn save_event_indicators(&mut self) -> ModelResult<()> {
        if self.description.n_event_indicators == 0 {
            return Ok(());
        }
        self.model
            .get_event_indicators(self.prev_indicators.as_mut_slice())
    }

    /// Notify the model about an accepted integrator step.
    pub fn completed_integrator_step(&mut self) -> ModelResult<StepCompletion> {
        let completion = self.model.completed_integrator_step()?;
        if completion.terminate_simulation && !self.terminate_requested {
            self.terminate_requested = true;
            warn!(
                time = self.time,
                "model requested termination after an integrator step; continuing"
            );
        }
        Ok(completion)
    }

    pub fn enter_event_mode(&mut self) -> ModelResult<()> {
        self.model.enter_event_mode()
    }

    pub fn new_discrete_states(&mut self) -> ModelResult<DiscreteUpdate> {
        let update = self.model.new_discrete_states()?;
        if update.terminate_simulation && !self.terminate_requested {
            self.terminate_requested = true;
            warn!(
                time = self.time,
                "model requested termination during the event handshake; continuing"
            );
        }
        Ok(update)
    }

    pub fn enter_continuous_time_mode(&mut self) -> ModelResult<()> {
        self.model.enter_continuous_time_mode()
    }

    pub fn setup_experiment(
        &mut self,
        tolerance: Option<f64>,
        start_time: f64,
        stop_time: Option<f64>,
    ) -> ModelResult<()> {
        self.model.setup_experiment(tolerance, start_time, stop_time)
    }

    pub fn enter_initialization_mode(&mut self) -> ModelResult<()> {
        self.model.enter_initialization_mode()
    }

    pub fn exit_initialization_mode(&mut self) -> ModelResult<()> {
        self.model.exit_initialization_mode()
    }

    pub fn get_real(&mut self, refs: &[ValueRef], values: &mut [f64]) -> ModelResult<()> {
        self.model.get_real(refs, values)
    }

    pub fn set_real(&mut self, refs: &[ValueRef], values: &[f64]) -> ModelResult<()> {
        self.model.set_real(refs, values)
    }

    pub fn get_integer(&mut self, refs: &[ValueRef], values: &mut [i32]) -> ModelResult<()> {
        self.model.get_integer(refs, values)
    }

    pub fn set_integer(&mut self, refs: &[ValueRef], values: &[i32]) -> ModelResult<()> {
        self.model.set_integer(refs, values)
    }

    pub fn get_boolean(&mut self, refs: &[ValueRef], values: &mut [bool]) -> ModelResult<()> {
        self.model.get_boolean(refs, values)
    }

    pub fn set_boolean(&mut self, refs: &[ValueRef], values: &[bool]) -> ModelResult<()> {
        self.model.set_boolean(refs, values)
    }

    pub fn get_string(&mut self, refs: &[ValueRef], values: &mut [String]) -> ModelResult<()> {
        self.model.get_string(refs, values)
    }

    pub fn set_string(&mut self, refs: &[ValueRef], values: &[String]) -> ModelResult<()> {
        self.model.set_string(refs, values)
    }

    /// Dense Jacobian of the derivatives with respect to the states,
    /// column-major. Uses the model's directional derivatives when
    /// advertised, otherwise the finite-difference fallback. Continuous
    /// states must already be set.
    pub fn jacobian(&mut self, jac: &mut DMatrix<f64>) -> ModelResult<()> {
        let n = self.n_states();
        if jac.nrows() != n || jac.ncols() != n {
            return Err(ModelError::RangeViolation {
                what: "jacobian dimension",
                value: jac.nrows() as f64,
            });
        }
        if !self.provides_jacobian() {
            let t = self.time;
            let mut x = DVector::zeros(n);
            self.get_continuous_states(&mut x)?;
            let mut dfdt = DVector::zeros(n);
            return self.numerical_jacobian(jac, &x, &mut dfdt, t);
        }

        let seed = [1.0];
        let mut column = DVector::zeros(n);
        for i in 0..n {
            self.model.directional_derivative(
                &self.description.derivative_refs,
                &self.description.state_refs[i..i + 1],
                &seed,
                column.as_mut_slice(),
            )?;
            jac.set_column(i, &column);
        }
        Ok(())
    }

    /// 6th-order centered finite-difference Jacobian at `(t, x)`, plus the
    /// partial time derivative of the right-hand side. Restores the model
    /// to `(t, x)` before returning.
    pub fn numerical_jacobian(
        &mut self,
        jac: &mut DMatrix<f64>,
        x: &DVector<f64>,
        dfdt: &mut DVector<f64>,
        t: f64,
    ) -> ModelResult<()> {
        let n = self.n_states();
        debug!(time = t, n_states = n, "computing numerical jacobian");

        let mut perturbed = x.clone();
        let mut slope = DVector::zeros(n);

        for j in 0..n {
            let h = f64::EPSILON.powf(1.0 / 7.0) * (1.0 + x[j].abs());
            let mut column = DVector::zeros(n);
            for (offset, weight) in FD_WEIGHTS {
                perturbed[j] = x[j] + offset as f64 * h;
                self.derivatives_at(t, &perturbed, &mut slope)?;
                column.axpy(weight / h, &slope, 1.0);
            }
            perturbed[j] = x[j];
            jac.set_column(j, &column);
        }

        dfdt.fill(0.0);
        let ht = f64::EPSILON.powf(1.0 / 7.0) * (1.0 + t.abs());
        for (offset, weight) in FD_WEIGHTS {
            self.derivatives_at(t + offset as f64 * ht, x, &mut slope)?;
            dfdt.axpy(weight / ht, &slope, 1.0);
        }

        // leave the model where the caller had it
        self.derivatives_at(t, x, &mut slope)?;
        Ok(())
    }

    pub fn terminate(&mut self) -> ModelResult<()> {
        self.model.terminate()
    }
}
