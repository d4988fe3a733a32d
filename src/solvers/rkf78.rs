//! Runge-Kutta-Fehlberg 7(8) adaptive stepper.

use nalgebra::DVector;

use super::{error_norm, timestep_scale, SubdividingStepper, SOL_STEP_MIN};
use crate::model::ModelHandle;
use crate::status::{ModelError, ModelResult};

/// Butcher nodes.
#[rustfmt::skip]
const C: [f64; 13] = [
    0.0, 2.0/27.0, 1.0/9.0, 1.0/6.0, 5.0/12.0, 1.0/2.0, 5.0/6.0,
    1.0/6.0, 2.0/3.0, 1.0/3.0, 1.0, 0.0, 1.0,
];

/// Stage coefficients; `A[i]` feeds the state for stage `i + 1`, the last
/// row is the 7th order combination.
#[rustfmt::skip]
const A: [&[f64]; 13] = [
    &[2.0/27.0],
    &[1.0/36.0, 1.0/12.0],
    &[1.0/24.0, 0.0, 1.0/8.0],
    &[5.0/12.0, 0.0, -25.0/16.0, 25.0/16.0],
    &[1.0/20.0, 0.0, 0.0, 1.0/4.0, 1.0/5.0],
    &[-25.0/108.0, 0.0, 0.0, 125.0/108.0, -65.0/27.0, 125.0/54.0],
    &[31.0/300.0, 0.0, 0.0, 0.0, 61.0/225.0, -2.0/9.0, 13.0/900.0],
    &[2.0, 0.0, 0.0, -53.0/6.0, 704.0/45.0, -107.0/9.0, 67.0/90.0, 3.0],
    &[-91.0/108.0, 0.0, 0.0, 23.0/108.0, -976.0/135.0, 311.0/54.0, -19.0/60.0, 17.0/6.0, -1.0/12.0],
    &[2383.0/4100.0, 0.0, 0.0, -341.0/164.0, 4496.0/1025.0, -301.0/82.0, 2133.0/4100.0, 45.0/82.0, 45.0/164.0, 18.0/41.0],
    &[3.0/205.0, 0.0, 0.0, 0.0, 0.0, -6.0/41.0, -3.0/205.0, -3.0/41.0, 3.0/41.0, 6.0/41.0, 0.0],
    &[-1777.0/4100.0, 0.0, 0.0, -341.0/164.0, 4496.0/1025.0, -289.0/82.0, 2193.0/4100.0, 51.0/82.0, 33.0/164.0, 12.0/41.0, 0.0, 1.0],
    &[41.0/840.0, 0.0, 0.0, 0.0, 0.0, 34.0/105.0, 9.0/35.0, 9.0/35.0, 9.0/280.0, 9.0/280.0, 41.0/840.0],
];

/// Local truncation error combination (7th minus 8th order).
#[rustfmt::skip]
const TR: [f64; 13] = [
    41.0/840.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0,
    41.0/840.0, -41.0/840.0, -41.0/840.0,
];

/// Runge-Kutta-Fehlberg 7(8) pair adaptive stepper.
///
/// Thirteen stages, 7th order propagation with 8th order error estimate.
/// Recommended for smooth problems integrated to tight tolerances.
///
/// # References
/// - Fehlberg, E. (1968). "Classical fifth-, sixth-, seventh-, and
///   eighth-order Runge-Kutta formulas with stepsize control". NASA
///   Technical Report TR R-287.
#[derive(Debug)]
pub struct RKF78 {
    slopes: Vec<DVector<f64>>,
    scratch: DVector<f64>,
    candidate: DVector<f64>,
    error: DVector<f64>,
    abstol: f64,
    reltol: f64,
}

impl RKF78 {
    pub fn new(n_states: usize, abstol: f64, reltol: f64) -> Self {
        Self {
            slopes: vec![DVector::zeros(n_states); 13],
            scratch: DVector::zeros(n_states),
            candidate: DVector::zeros(n_states),
            error: DVector::zeros(n_states),
            abstol,
            reltol,
        }
    }

    fn attempt(
        &mut self,
        handle: &mut ModelHandle,
        state: &DVector<f64>,
        t: f64,
        dt: f64,
    ) -> ModelResult<f64> {
        handle.derivatives_at(t, state, &mut self.slopes[0])?;
        for stage in 1..13 {
            self.scratch.copy_from(state);
            for (i, &coef) in A[stage - 1].iter().enumerate() {
                self.scratch.axpy(dt * coef, &self.slopes[i], 1.0);
            }
            handle.derivatives_at(t + C[stage] * dt, &self.scratch, &mut self.slopes[stage])?;
        }

        self.candidate.copy_from(state);
        for (i, &b) in A[12].iter().enumerate() {
            self.candidate.axpy(dt * b, &self.slopes[i], 1.0);
        }
        self.error.fill(0.0);
        for (i, &e) in TR.iter().enumerate() {
            self.error.axpy(dt * e, &self.slopes[i], 1.0);
        }
        Ok(error_norm(state, &self.error, self.abstol, self.reltol))
    }
}

impl SubdividingStepper for RKF78 {
    fn do_step(
        &mut self,
        handle: &mut ModelHandle,
        state: &mut DVector<f64>,
        t: &mut f64,
        dt: &mut f64,
    ) -> ModelResult<()> {
        loop {
            let norm = self.attempt(handle, state, *t, *dt)?;
            let scale = timestep_scale(norm, 7);
            if norm <= 1.0 {
                state.copy_from(&self.candidate);
                *t += *dt;
                *dt *= scale;
                return Ok(());
            }
            *dt *= scale;
            if *dt < SOL_STEP_MIN {
                return Err(ModelError::ModelFailure(
                    "step size underflow in Fehlberg error control".into(),
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
