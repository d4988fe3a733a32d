//! Adams-Bashforth-Moulton multistep stepper, fixed order 5.

use std::collections::VecDeque;

use nalgebra::DVector;

use super::{rk4::RK4, SubdividingStepper};
use crate::model::ModelHandle;
use crate::status::ModelResult;

/// Adams-Bashforth 5 predictor weights (over f_n .. f_{n-4}), times 1/720.
const AB: [f64; 5] = [1901.0, -2774.0, 2616.0, -1274.0, 251.0];

/// Adams-Moulton corrector weights (f_{n+1}, f_n .. f_{n-3}), times 1/720.
const AM: [f64; 5] = [251.0, 646.0, -264.0, 106.0, -19.0];

/// Adams-Bashforth-Moulton stepper, fixed order 5 (PECE).
///
/// Multistep collocation with constant step size; one predictor and one
/// corrector evaluation per step, so much cheaper per step than the
/// one-step methods when the right-hand side is expensive. The slope
/// history is rebuilt with Runge-Kutta startup steps whenever the step
/// size changes or the stepper is reset.
#[derive(Debug)]
pub struct ABM5 {
    /// Slopes at the most recent grid points, newest first.
    history: VecDeque<DVector<f64>>,
    startup: RK4,
    predicted: DVector<f64>,
    slope: DVector<f64>,
    dt: f64,
}

impl ABM5 {
    pub fn new(n_states: usize) -> Self {
        Self {
            history: VecDeque::with_capacity(5),
            startup: RK4::new(n_states),
            predicted: DVector::zeros(n_states),
            slope: DVector::zeros(n_states),
            dt: 0.0,
        }
    }
}

impl SubdividingStepper for ABM5 {
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
        // the multistep history is only valid on a uniform grid
        if self.dt != dt {
            self.history.clear();
            self.dt = dt;
        }

        handle.derivatives_at(*t, state, &mut self.slope)?;
        self.history.push_front(self.slope.clone());
        if self.history.len() > 5 {
            self.history.pop_back();
        }

        if self.history.len() < 5 {
            // startup phase until the slope buffer is filled
            return self.startup.do_step_const(handle, state, t, dt);
        }

        // predict with Adams-Bashforth 5
        self.predicted.copy_from(state);
        for (i, &w) in AB.iter().enumerate() {
            self.predicted.axpy(dt * w / 720.0, &self.history[i], 1.0);
        }

        // evaluate-correct with Adams-Moulton
        handle.derivatives_at(*t + dt, &self.predicted, &mut self.slope)?;
        state.axpy(dt * AM[0] / 720.0, &self.slope, 1.0);
        for (i, &w) in AM.iter().enumerate().skip(1) {
            state.axpy(dt * w / 720.0, &self.history[i - 1], 1.0);
        }
        *t += dt;
        Ok(())
    }

    fn clear(&mut self) {
        self.history.clear();
    }
}
