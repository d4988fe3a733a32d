//! Classic 4th order Runge-Kutta method with constant step size.

use nalgebra::DVector;

use super::SubdividingStepper;
use crate::model::ModelHandle;
use crate::status::ModelResult;

/// Classic Runge-Kutta stepper.
///
/// # Characteristics
/// - Order: 4
/// - Stages: 4
/// - Explicit, fixed timestep
#[derive(Debug)]
pub struct RK4 {
    slopes: [DVector<f64>; 4],
    scratch: DVector<f64>,
}

impl RK4 {
    pub fn new(n_states: usize) -> Self {
        Self {
            slopes: std::array::from_fn(|_| DVector::zeros(n_states)),
            scratch: DVector::zeros(n_states),
        }
    }
}

impl SubdividingStepper for RK4 {
    fn do_step(
        &mut self,
        handle: &mut ModelHandle,
        state: &mut DVector<f64>,
        t: &mut f64,
        dt: &mut f64,
    ) -> ModelResult<()> {
        let dt = *dt;
        self.do_step_const(handle, state, t, dt)
    }

    fn do_step_const(
        &mut self,
        handle: &mut ModelHandle,
        state: &mut DVector<f64>,
        t: &mut f64,
        dt: f64,
    ) -> ModelResult<()> {
        let t0 = *t;

        let mut k1 = std::mem::take(&mut self.slopes[0]);
        handle.derivatives_at(t0, state, &mut k1)?;

        self.scratch.copy_from(state);
        self.scratch.axpy(dt / 2.0, &k1, 1.0);
        let mut k2 = std::mem::take(&mut self.slopes[1]);
        handle.derivatives_at(t0 + dt / 2.0, &self.scratch, &mut k2)?;

        self.scratch.copy_from(state);
        self.scratch.axpy(dt / 2.0, &k2, 1.0);
        let mut k3 = std::mem::take(&mut self.slopes[2]);
        handle.derivatives_at(t0 + dt / 2.0, &self.scratch, &mut k3)?;

        self.scratch.copy_from(state);
        self.scratch.axpy(dt, &k3, 1.0);
        let mut k4 = std::mem::take(&mut self.slopes[3]);
        handle.derivatives_at(t0 + dt, &self.scratch, &mut k4)?;

        state.axpy(dt / 6.0, &k1, 1.0);
        state.axpy(dt / 3.0, &k2, 1.0);
        state.axpy(dt / 3.0, &k3, 1.0);
        state.axpy(dt / 6.0, &k4, 1.0);
        *t += dt;

        self.slopes = [k1, k2, k3, k4];
        Ok(())
    }
}
