//! Bulirsch-Stoer extrapolation stepper with dense output.

use nalgebra::DVector;

use super::{
    error_norm, hermite_interp, Stepper, MAX_SUBSTEPS, SOL_BETA, SOL_SCALE_MAX, SOL_SCALE_MIN,
    SOL_STEP_MIN,
};
use crate::integrator::EventInfo;
use crate::model::ModelHandle;
use crate::status::{ModelError, ModelResult};

/// Maximum number of extrapolation rows.
const K_MAX: usize = 8;

/// Bulirsch-Stoer stepper.
///
/// Modified-midpoint integration with Richardson extrapolation in the
/// squared substep size. The order is variable: extrapolation rows are
/// added until the embedded error estimate passes, up to `K_MAX` rows.
/// Dense output over the last accepted step is served by cubic Hermite
/// interpolation from the endpoint states and slopes.
///
/// # References
/// - Hairer, E., Norsett, S. P., & Wanner, G. (1993). "Solving Ordinary
///   Differential Equations I: Nonstiff Problems". Springer. (Sect. II.9)
#[derive(Debug)]
pub struct BulirschStoer {
    abstol: f64,
    reltol: f64,
    /// Extrapolation diagonal, one entry per completed row.
    table: Vec<DVector<f64>>,
    mid_y0: DVector<f64>,
    mid_y1: DVector<f64>,
    slope: DVector<f64>,
    candidate: DVector<f64>,
    /// Dense-output data of the last accepted step.
    t_old: f64,
    h_last: f64,
    y_old: DVector<f64>,
    f_old: DVector<f64>,
    y_new: DVector<f64>,
    f_new: DVector<f64>,
    fresh: bool,
}

impl BulirschStoer {
    pub fn new(n_states: usize, abstol: f64, reltol: f64) -> Self {
        Self {
            abstol,
            reltol,
            table: vec![DVector::zeros(n_states); K_MAX],
            mid_y0: DVector::zeros(n_states),
            mid_y1: DVector::zeros(n_states),
            slope: DVector::zeros(n_states),
            candidate: DVector::zeros(n_states),
            t_old: 0.0,
            h_last: 0.0,
            y_old: DVector::zeros(n_states),
            f_old: DVector::zeros(n_states),
            y_new: DVector::zeros(n_states),
            f_new: DVector::zeros(n_states),
            fresh: false,
        }
    }

    /// Modified midpoint: integrate from `(t, y)` over `big_h` with `n`
    /// substeps, result into `self.candidate`.
    fn midpoint(
        &mut self,
        handle: &mut ModelHandle,
        y: &DVector<f64>,
        t: f64,
        big_h: f64,
        n: usize,
    ) -> ModelResult<()> {
        let h = big_h / n as f64;

        self.mid_y0.copy_from(y);
        handle.derivatives_at(t, y, &mut self.slope)?;
        self.mid_y1.copy_from(y);
        self.mid_y1.axpy(h, &self.slope, 1.0);

        for i in 1..n {
            handle.derivatives_at(t + i as f64 * h, &self.mid_y1, &mut self.slope)?;
            self.mid_y0.axpy(2.0 * h, &self.slope, 1.0);
            std::mem::swap(&mut self.mid_y0, &mut self.mid_y1);
        }

        handle.derivatives_at(t + big_h, &self.mid_y1, &mut self.slope)?;
        self.candidate.copy_from(&self.mid_y0);
        self.candidate += &self.mid_y1;
        self.candidate.axpy(h, &self.slope, 1.0);
        self.candidate *= 0.5;
        Ok(())
    }

    /// One extrapolation attempt over `big_h`. Returns `(error_norm, rows)`
    /// with the accepted value in `self.candidate`; the error norm exceeds
    /// one if no row converged.
    fn attempt(
        &mut self,
        handle: &mut ModelHandle,
        y: &DVector<f64>,
        t: f64,
        big_h: f64,
    ) -> ModelResult<(f64, usize)> {
        let mut norm = f64::MAX;

        for k in 0..K_MAX {
            let n_k = 2 * (k + 1);
            self.midpoint(handle, y, t, big_h, n_k)?;

            // Neville extrapolation in the squared substep size; table[j]
            // holds the previous row's column j entries
            let mut value = self.candidate.clone();
            let mut correction = DVector::zeros(y.len());
            for j in 1..=k {
                let n_prev = 2 * (k - j + 1);
                let factor = (n_k as f64 / n_prev as f64).powi(2) - 1.0;
                correction = (&value - &self.table[j - 1]) / factor;
                self.table[j - 1].copy_from(&value);
                value += &correction;
            }

            if k > 0 {
                norm = error_norm(y, &correction, self.abstol, self.reltol);
            }
            self.table[k].copy_from(&value);
            self.candidate.copy_from(&value);
            if k > 0 && norm <= 1.0 {
                return Ok((norm, k));
            }
        }
        Ok((norm, K_MAX - 1))
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
            let (norm, rows) = self.attempt(handle, y, *t, *h)?;
            if norm <= 1.0 {
                handle.derivatives_at(*t, y, &mut self.f_old)?;
                self.y_old.copy_from(y);
                self.t_old = *t;
                self.h_last = *h;

                y.copy_from(&self.candidate);
                *t += *h;
                handle.derivatives_at(*t, y, &mut self.f_new)?;
                self.y_new.copy_from(y);
                self.fresh = true;

                let order = 2 * rows + 1;
                let scale = (SOL_BETA / norm.powf(1.0 / (order as f64 + 1.0)))
                    .clamp(SOL_SCALE_MIN, SOL_SCALE_MAX);
                *h *= scale;
                return Ok(());
            }
            *h *= 0.5;
            if *h < SOL_STEP_MIN {
                return Err(ModelError::ModelFailure(
                    "step size underflow in Bulirsch-Stoer extrapolation".into(),
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

impl Stepper for BulirschStoer {
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
        // dense-output data survives a reset so the bisection can keep
        // interpolating inside the last accepted step
    }
}
