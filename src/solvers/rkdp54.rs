//! Dormand-Prince 5(4) adaptive stepper with dense output.

use nalgebra::DVector;

use super::{error_norm, timestep_scale, Stepper, MAX_SUBSTEPS, SOL_STEP_MIN};
use crate::integrator::EventInfo;
use crate::model::ModelHandle;
use crate::status::{ModelError, ModelResult};

/// Butcher nodes.
const C: [f64; 7] = [0.0, 1.0 / 5.0, 3.0 / 10.0, 4.0 / 5.0, 8.0 / 9.0, 1.0, 1.0];

/// Stage coefficients; `A[5]` doubles as the 5th order combination (FSAL).
#[rustfmt::skip]
const A: [&[f64]; 6] = [
    &[1.0/5.0],
    &[3.0/40.0, 9.0/40.0],
    &[44.0/45.0, -56.0/15.0, 32.0/9.0],
    &[19372.0/6561.0, -25360.0/2187.0, 64448.0/6561.0, -212.0/729.0],
    &[9017.0/3168.0, -355.0/33.0, 46732.0/5247.0, 49.0/176.0, -5103.0/18656.0],
    &[35.0/384.0, 0.0, 500.0/1113.0, 125.0/192.0, -2187.0/6784.0, 11.0/84.0],
];

/// Local truncation error combination (5th minus embedded 4th order).
#[rustfmt::skip]
const TR: [f64; 7] = [
    71.0/57600.0, 0.0, -71.0/16695.0, 71.0/1920.0, -17253.0/339200.0, 22.0/525.0, -1.0/40.0,
];

/// Coefficients of the 4th order continuous extension.
#[rustfmt::skip]
const D: [f64; 7] = [
    -12715105075.0/11282082432.0,
    0.0,
    87487479700.0/32700410799.0,
    -10690763975.0/1880347072.0,
    701980252875.0/199316789632.0,
    -1453857185.0/822651844.0,
    69997945.0/29380423.0,
];

/// Dormand-Prince 5(4) adaptive stepper (DOPRI5).
///
/// Seven stages, 5th order with embedded 4th order error estimate and a 4th
/// order continuous extension. The dense output lets the driver stop
/// exactly at the end of the integration window by interpolation instead of
/// an extra step, and serves the event bisection without re-integrating.
///
/// # References
/// - Dormand, J. R., & Prince, P. J. (1980). "A family of embedded
///   Runge-Kutta formulae". Journal of Computational and Applied
///   Mathematics, 6(1), 19-26.
/// - Hairer, E., Norsett, S. P., & Wanner, G. (1993). "Solving Ordinary
///   Differential Equations I: Nonstiff Problems". Springer.
#[derive(Debug)]
pub struct RKDP54 {
    slopes: Vec<DVector<f64>>,
    scratch: DVector<f64>,
    candidate: DVector<f64>,
    error: DVector<f64>,
    abstol: f64,
    reltol: f64,
    /// Dense-output data of the last accepted step.
    t_old: f64,
    h_last: f64,
    y_old: DVector<f64>,
    cont: [DVector<f64>; 5],
    fresh: bool,
}

impl RKDP54 {
    pub fn new(n_states: usize, abstol: f64, reltol: f64) -> Self {
        Self {
            slopes: vec![DVector::zeros(n_states); 7],
            scratch: DVector::zeros(n_states),
            candidate: DVector::zeros(n_states),
            error: DVector::zeros(n_states),
            abstol,
            reltol,
            t_old: 0.0,
            h_last: 0.0,
            y_old: DVector::zeros(n_states),
            cont: std::array::from_fn(|_| DVector::zeros(n_states)),
            fresh: false,
        }
    }

    /// Evaluate all seven stages from `(t, y)` with step `dt`; fills
    /// `self.candidate` and returns the scaled error norm.
    fn attempt(
        &mut self,
        handle: &mut ModelHandle,
        y: &DVector<f64>,
        t: f64,
        dt: f64,
    ) -> ModelResult<f64> {
        handle.derivatives_at(t, y, &mut self.slopes[0])?;
        for stage in 1..6 {
            self.scratch.copy_from(y);
            for (i, &coef) in A[stage - 1].iter().enumerate() {
                self.scratch.axpy(dt * coef, &self.slopes[i], 1.0);
            }
            handle.derivatives_at(t + C[stage] * dt, &self.scratch, &mut self.slopes[stage])?;
        }

        self.candidate.copy_from(y);
        for (i, &b) in A[5].iter().enumerate() {
            self.candidate.axpy(dt * b, &self.slopes[i], 1.0);
        }
        handle.derivatives_at(t + dt, &self.candidate, &mut self.slopes[6])?;

        self.error.fill(0.0);
        for (i, &e) in TR.iter().enumerate() {
            self.error.axpy(dt * e, &self.slopes[i], 1.0);
        }
        Ok(error_norm(y, &self.error, self.abstol, self.reltol))
    }

    /// Prepare the continuous extension over `[t, t + dt]` from the slopes
    /// of the step just accepted.
    fn prepare_dense(&mut self, y: &DVector<f64>, t: f64, dt: f64) {
        let ydiff = &self.candidate - y;
        let bspl = dt * &self.slopes[0] - &ydiff;

        self.cont[0].copy_from(y);
        self.cont[1].copy_from(&ydiff);
        self.cont[2].copy_from(&bspl);
        self.cont[3] = ydiff - dt * &self.slopes[6] - &bspl;
        self.cont[4].fill(0.0);
        for (i, &d) in D.iter().enumerate() {
            self.cont[4].axpy(dt * d, &self.slopes[i], 1.0);
        }

        self.y_old.copy_from(y);
        self.t_old = t;
        self.h_last = dt;
        self.fresh = true;
    }

    /// Evaluate the continuous extension at `time`.
    fn interpolate(&self, time: f64, out: &mut DVector<f64>) {
        let theta = (time - self.t_old) / self.h_last;
        let theta1 = 1.0 - theta;

        out.copy_from(&self.cont[4]);
        *out *= theta1;
        *out += &self.cont[3];
        *out *= theta;
        *out += &self.cont[2];
        *out *= theta1;
        *out += &self.cont[1];
        *out *= theta;
        *out += &self.cont[0];
    }
}

impl Stepper for RKDP54 {
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

            // adaptive step from (t_cur, y_cur); may overshoot t_end, the
            // final value is recovered by interpolation below
            loop {
                let norm = self.attempt(handle, &y_cur, t_cur, h)?;
                let scale = timestep_scale(norm, 4);
                if norm <= 1.0 {
                    self.prepare_dense(&y_cur, t_cur, h);
                    y_cur.copy_from(&self.candidate);
                    t_cur += h;
                    h *= scale;
                    break;
                }
                h *= scale;
                if h < SOL_STEP_MIN {
                    return Err(ModelError::ModelFailure(
                        "step size underflow in Dormand-Prince error control".into(),
                    ));
                }
            }

            handle.set_time(t_cur)?;
            handle.set_continuous_states(&y_cur)?;

            if handle.check_state_event()? {
                // rewind to the accepted point before the event
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

        // interpolated finish: no extra step past the window
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
        // dense-output data is kept: the bisection interpolates inside the
        // last accepted step after a rewind
    }
}
