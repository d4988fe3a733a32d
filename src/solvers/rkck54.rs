//! Cash-Karp 5(4) adaptive stepper.

use nalgebra::DVector;

use super::{error_norm, timestep_scale, SubdividingStepper, SOL_STEP_MIN};
use crate::model::ModelHandle;
use crate::status::{ModelError, ModelResult};

/// Butcher nodes.
const C: [f64; 6] = [0.0, 1.0 / 5.0, 3.0 / 10.0, 3.0 / 5.0, 1.0, 7.0 / 8.0];

/// Stage coefficients; `A[i]` feeds the state for stage `i + 1`, the last
/// row is the 5th order combination.
#[rustfmt::skip]
const A: [&[f64]; 6] = [
    &[1.0/5.0],
    &[3.0/40.0, 9.0/40.0],
    &[3.0/10.0, -9.0/10.0, 6.0/5.0],
    &[-11.0/54.0, 5.0/2.0, -70.0/27.0, 35.0/27.0],
    &[1631.0/55296.0, 175.0/512.0, 575.0/13824.0, 44275.0/110592.0, 253.0/4096.0],
    &[37.0/378.0, 0.0, 250.0/621.0, 125.0/594.0, 0.0, 512.0/1771.0],
];

/// Local truncation error combination (5th minus embedded 4th order).
#[rustfmt::skip]
const TR: [f64; 6] = [
    -277.0/64512.0, 0.0, 6925.0/370944.0, -6925.0/202752.0, -277.0/14336.0, 277.0/7084.0,
];

/// Cash-Karp 5(4) pair adaptive stepper.
///
/// Six stages, 5th order with embedded 4th order error estimate. Comparable
/// to Dormand-Prince in cost and accuracy but without dense output.
///
/// # References
/// - Cash, J. R., & Karp, A. H. (1990). "A variable order Runge-Kutta
///   method for initial value problems with rapidly varying right-hand
///   sides". ACM Transactions on Mathematical Software, 16(3), 201-222.
#[derive(Debug)]
pub struct RKCK54 {
    slopes: Vec<DVector<f64>>,
    scratch: DVector<f64>,
    candidate: DVector<f64>,
    error: DVector<f64>,
    abstol: f64,
    reltol: f64,
}

impl RKCK54 {
    pub fn new(n_states: usize, abstol: f64, reltol: f64) -> Self {
        Self {
            slopes: vec![DVector::zeros(n_states); 6],
            scratch: DVector::zeros(n_states),
            candidate: DVector::zeros(n_states),
            error: DVector::zeros(n_states),
            abstol,
            reltol,
        }
    }

    /// Evaluate all six stages from `(t, state)` with step `dt`; fills
    /// `self.candidate` with the 5th order result and returns the scaled
    /// error norm.
    fn attempt(
        &mut self,
        handle: &mut ModelHandle,
        state: &DVector<f64>,
        t: f64,
        dt: f64,
    ) -> ModelResult<f64> {
        handle.derivatives_at(t, state, &mut self.slopes[0])?;
        for stage in 1..6 {
            self.scratch.copy_from(state);
            for (i, &coef) in A[stage - 1].iter().enumerate() {
                self.scratch.axpy(dt * coef, &self.slopes[i], 1.0);
            }
            handle.derivatives_at(t + C[stage] * dt, &self.scratch, &mut self.slopes[stage])?;
        }

        self.candidate.copy_from(state);
        self.error.fill(0.0);
        for (i, (&b, &e)) in A[5].iter().zip(TR.iter()).enumerate() {
            self.candidate.axpy(dt * b, &self.slopes[i], 1.0);
            self.error.axpy(dt * e, &self.slopes[i], 1.0);
        }
        Ok(error_norm(state, &self.error, self.abstol, self.reltol))
    }
}

impl SubdividingStepper for RKCK54 {
    fn do_step(
        &mut self,
        handle: &mut ModelHandle,
        state: &mut DVector<f64>,
        t: &mut f64,
        dt: &mut f64,
    ) -> ModelResult<()> {
        // retry with shrinking steps until the error controller accepts
        loop {
            let norm = self.attempt(handle, state, *t, *dt)?;
            let scale = timestep_scale(norm, 4);
            if norm <= 1.0 {
                state.copy_from(&self.candidate);
                *t += *dt;
                *dt *= scale;
                return Ok(());
            }
            *dt *= scale;
            if *dt < SOL_STEP_MIN {
                return Err(ModelError::ModelFailure(
                    "step size underflow in Cash-Karp error control".into(),
                ));
            }
        }
    }

    fn do_step_const(
        &mut self,
        handle: &mut ModelHandle,
        state: &mut DVector<f64>,
        t: &mut f64,
        dt: f64,
    ) -> ModelResult<()> {
        self.attempt(handle, state, *t, dt)?;
        state.copy_from(&self.candidate);
        *t += dt;
        Ok(())
    }
}
