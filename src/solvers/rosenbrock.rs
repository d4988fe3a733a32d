//! Implicit 4th order Rosenbrock stepper.

use nalgebra::{DMatrix, DVector};

use super::{
    error_norm, hermite_interp, timestep_scale, Stepper, MAX_SUBSTEPS, SOL_STEP_MIN,
};
use crate::integrator::EventInfo;
use crate::model::ModelHandle;
use crate::status::{ModelError, ModelResult};

// Kaps-Rentrop parameter set (Shampine's choice).
const GAM: f64 = 0.5;
const A21: f64 = 2.0;
const A31: f64 = 48.0 / 25.0;
const A32: f64 = 6.0 / 25.0;
const C21: f64 = -8.0;
const C31: f64 = 372.0 / 25.0;
const C32: f64 = 12.0 / 5.0;
const C41: f64 = -112.0 / 125.0;
const C42: f64 = -54.0 / 125.0;
const C43: f64 = -2.0 / 5.0;
const B: [f64; 4] = [19.0 / 9.0, 1.0 / 2.0, 25.0 / 108.0, 125.0 / 108.0];
const E: [f64; 4] = [17.0 / 54.0, 7.0 / 36.0, 0.0, 125.0 / 108.0];
const C1X: f64 = 1.0 / 2.0;
const C2X: f64 = -3.0 / 2.0;
const C3X: f64 = 121.0 / 50.0;
const C4X: f64 = 29.0 / 250.0;
const A2X: f64 = 1.0;
const A3X: f64 = 3.0 / 5.0;

/// Rosenbrock 4 stepper (Kaps-Rentrop).
///
/// Four linearly-implicit stages sharing one LU decomposition of
/// `I/(gamma*h) - J` per step. Suited for stiff systems; the Jacobian comes
/// from the model's directional derivatives when advertised and from the
/// finite-difference fallback otherwise. Dense output over the last
/// accepted step is served by cubic Hermite interpolation.
///
/// # References
/// - Kaps, P., & Rentrop, P. (1979). "Generalized Runge-Kutta methods of
///   order four with stepsize control for stiff ordinary differential
///   equations". Numerische Mathematik, 33(1), 55-68.
#[derive(Debug)]
pub struct Rosenbrock4 {
    abstol: f64,
    reltol: f64,
    jac: DMatrix<f64>,
    dfdt: DVector<f64>,
    stages: [DVector<f64>; 4],
    rhs: DVector<f64>,
    scratch: DVector<f64>,
    candidate: DVector<f64>,
    error: DVector<f64>,
    /// Dense-output data of the last accepted step.
    t_old: f64,
    h_last: f64,
    y_old: DVector<f64>,
    f_old: DVector<f64>,
    y_new: DVector<f64>,
    f_new: DVector<f64>,
    fresh: bool,
}

impl Rosenbrock4 {
    pub fn new(n_states: usize, abstol: f64, reltol: f64) -> Self {
        Self {
            abstol,
            reltol,
            jac: DMatrix::zeros(n_states, n_states),
            dfdt: DVector::zeros(n_states),
            stages: std::array::from_fn(|_| DVector::zeros(n_states)),
            rhs: DVector::zeros(n_states),
            scratch: DVector::zeros(n_states),
            candidate: DVector::zeros(n_states),
            error: DVector::zeros(n_states),
            t_old: 0.0,
            h_last: 0.0,
            y_old: DVector::zeros(n_states),
            f_old: DVector::zeros(n_states),
            y_new: DVector::zeros(n_states),
            f_new: DVector::zeros(n_states),
            fresh: false,
        }
    }

    /// One Rosenbrock attempt from `(t, y)` with step `h`; fills
    /// `self.candidate` and `self.f_old` and returns the scaled error norm.
    fn attempt(
        &mut self,
        handle: &mut ModelHandle,
        y: &DVector<f64>,
        t: f64,
        h: f64,
    ) -> ModelResult<f64> {
        let n = y.len();

        // Jacobian and time derivative at the step base
        if handle.provides_jacobian() {
            handle.set_time(t)?;
            handle.set_continuous_states(y)?;
            self.dfdt.fill(0.0);
            handle.jacobian(&mut self.jac)?;
        } else {
            handle.numerical_jacobian(&mut self.jac, y, &mut self.dfdt, t)?;
        }

        handle.derivatives_at(t, y, &mut self.f_old)?;

        let mut lhs = DMatrix::identity(n, n) / (GAM * h);
        lhs -= &self.jac;
        let lu = lhs.lu();
        let solve = |rhs: &DVector<f64>| -> ModelResult<DVector<f64>> {
            lu.solve(rhs).ok_or_else(|| {
                ModelError::ModelFailure("singular Rosenbrock stage matrix".into())
            })
        };

        self.rhs.copy_from(&self.f_old);
        self.rhs.axpy(h * C1X, &self.dfdt, 1.0);
        self.stages[0] = solve(&self.rhs)?;

        self.scratch.copy_from(y);
        self.scratch.axpy(A21, &self.stages[0], 1.0);
        handle.derivatives_at(t + A2X * h, &self.scratch, &mut self.rhs)?;
        self.rhs.axpy(h * C2X, &self.dfdt, 1.0);
        self.rhs.axpy(C21 / h, &self.stages[0], 1.0);
        self.stages[1] = solve(&self.rhs)?;

        self.scratch.copy_from(y);
        self.scratch.axpy(A31, &self.stages[0], 1.0);
        self.scratch.axpy(A32, &self.stages[1], 1.0);
        handle.derivatives_at(t + A3X * h, &self.scratch, &mut self.rhs)?;
        // stage four reuses the stage-three evaluation point
        let f3 = self.rhs.clone();
        self.rhs.axpy(h * C3X, &self.dfdt, 1.0);
        self.rhs.axpy(C31 / h, &self.stages[0], 1.0);
        self.rhs.axpy(C32 / h, &self.stages[1], 1.0);
        self.stages[2] = solve(&self.rhs)?;

        self.rhs.copy_from(&f3);
        self.rhs.axpy(h * C4X, &self.dfdt, 1.0);
        self.rhs.axpy(C41 / h, &self.stages[0], 1.0);
        self.rhs.axpy(C42 / h, &self.stages[1], 1.0);
        self.rhs.axpy(C43 / h, &self.stages[2], 1.0);
        self.stages[3] = solve(&self.rhs)?;

        self.candidate.copy_from(y);
        self.error.fill(0.0);
        for i in 0..4 {
            self.candidate.axpy(B[i], &self.stages[i], 1.0);
            self.error.axpy(E[i], &self.stages[i], 1.0);
        }
        Ok(error_norm(y, &self.error, self.abstol, self.reltol))
    }

    /// One adaptive step from `(t, y)`; advances `t`, adjusts `h`, stores
    /// dense-output data.
    fn do_adaptive_step(
        &mut self,
        handle: &mut ModelHandle,
        y: &mut DVector<f64>,
        t: &mut f64,
        h: &mut f64,
    ) -> ModelResult<()> {
        loop {
            let norm = self.attempt(handle, y, *t, *h)?;
            let scale = timestep_scale(norm, 3);
            if norm <= 1.0 {
                self.y_old.copy_from(y);
                self.t_old = *t;
                self.h_last = *h;

                y.copy_from(&self.candidate);
                *t += *h;
                handle.derivatives_at(*t, y, &mut self.f_new)?;
                self.y_new.copy_from(y);
                self.fresh = true;

                *h *= scale;
                return Ok(());
            }
            *h *= scale;
            if *h < SOL_STEP_MIN {
                return Err(ModelError::ModelFailure(
                    "step size underflow in Rosenbrock error control".into(),
                ));
            }
        }
    }

    fn interpolate(&self, time: f64, out: &mut DVector<f64>) {
        let theta = (time - self.t_old) / self.h_last;
        hermite_interp(
            theta,
            self.h_last,
            &self.y_old,
            &self.f_old,
            &self.y_new,
            &self.f_new,
            out,
        );
    }
}

impl Stepper for Rosenbrock4 {
    fn invoke(
        &mut self,
        handle: &mut ModelHandle,
        state: &mut DVector<f64>,
        t: f64,
        span: f64,
        dt: f64,
    ) -> ModelResult<EventInfo> {
        let mut info = EventInfo::default();
        if span <= 0.0 {
            return Ok(info);
        }
        let t_end = t + span;
        let mut h = if dt.is_finite() && dt > 0.0 { dt } else { span };
        let mut t_cur = t;
        let mut y_cur = state.clone();
        let mut substeps = 0usize;

        loop {
            substeps += 1;
            if substeps > MAX_SUBSTEPS {
                return Err(ModelError::ModelFailure(format!(
                    "more than {MAX_SUBSTEPS} substeps in one integration window"
                )));
            }

            self.do_adaptive_step(handle, &mut y_cur, &mut t_cur, &mut h)?;

            handle.set_time(t_cur)?;
            handle.set_continuous_states(&y_cur)?;

            if handle.check_state_event()? {
                state.copy_from(&self.y_old);
                handle.set_time(self.t_old)?;
                handle.set_continuous_states(state)?;

                info.state_event = true;
                info.step_event = false;
                info.t_lower = self.t_old;
                info.t_upper = t_cur;
                return Ok(info);
            }

            if t_cur >= t_end {
                break;
            }

            if handle.completed_integrator_step()?.enter_event_mode {
                *state = y_cur;
                info.step_event = true;
                info.state_event = false;
                return Ok(info);
            }
        }

        // interpolated finish inside the last accepted step
        self.interpolate(t_end, state);
        handle.set_time(t_end)?;
        handle.set_continuous_states(state)?;

        if handle.completed_integrator_step()?.enter_event_mode {
            info.step_event = true;
        }
        info.state_event = false;
        Ok(info)
    }

    fn step_exact(
        &mut self,
        handle: &mut ModelHandle,
        state: &mut DVector<f64>,
        t: &mut f64,
        dt: f64,
    ) -> ModelResult<()> {
        if !self.fresh {
            return Err(ModelError::ModelFailure(
                "dense output requested before the first accepted step".into(),
            ));
        }
        self.interpolate(*t + dt, state);
        *t += dt;
        handle.set_time(*t)?;
        handle.set_continuous_states(state)?;
        Ok(())
    }

    fn reset(&mut self) {
        // dense-output data survives a reset, see the bisection contract
    }
}
