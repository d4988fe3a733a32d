//! Forward Euler method with constant step size.

use nalgebra::DVector;

use super::SubdividingStepper;
use crate::model::ModelHandle;
use crate::status::ModelResult;

/// Forward Euler stepper.
///
/// # Characteristics
/// - Order: 1
/// - Stages: 1
/// - Explicit, fixed timestep
#[derive(Debug)]
pub struct Euler {
    slope: DVector<f64>,
}

impl Euler {
    pub fn new(n_states: usize) -> Self {
        Self {
            slope: DVector::zeros(n_states),
        }
    }
}

impl SubdividingStepper for Euler {
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
        handle.derivatives_at(*t, state, &mut self.slope)?;
        state.axpy(dt, &self.slope, 1.0);
        *t += dt;
        Ok(())
    }
}
