//! Numerical integration steppers.
//!
//! Every stepper implements one uniform contract, [`Stepper`]: advance from
//! `(t, state)` by up to `span`, stop *before* any detected event, and
//! report the event bracket. Steppers that subdivide the interval into
//! committed substeps share the event-detection loop through
//! [`SubdividingStepper`]; dense-output steppers ([`RKDP54`],
//! [`BulirschStoer`], [`Rosenbrock4`]) implement [`Stepper`] directly and
//! finish by interpolation inside the last accepted step.
//!
//! Catalogue:
//! - `Eu` forward Euler, order 1, fixed step
//! - `Rk` classic Runge-Kutta, order 4, fixed step
//! - `Ck` Cash-Karp 5(4), adaptive
//! - `Dp` Dormand-Prince 5(4), adaptive, dense output
//! - `Fe` Fehlberg 7(8), adaptive
//! - `Bs` Bulirsch-Stoer, adaptive, dense output
//! - `Abm` Adams-Bashforth-Moulton, order 5, fixed step
//! - `Ro` Rosenbrock 4, adaptive, implicit (uses the Jacobian), dense output

mod abm;
mod bulirsch_stoer;
mod euler;
mod rk4;
mod rkck54;
mod rkdp54;
mod rkf78;
mod rosenbrock;

pub use abm::ABM5;
pub use bulirsch_stoer::BulirschStoer;
pub use euler::Euler;
pub use rk4::RK4;
pub use rkck54::RKCK54;
pub use rkdp54::RKDP54;
pub use rkf78::RKF78;
pub use rosenbrock::Rosenbrock4;

use nalgebra::DVector;

use crate::integrator::EventInfo;
use crate::model::ModelHandle;
use crate::status::{ModelError, ModelResult};

/// Safety factor for adaptive error control.
pub(crate) const SOL_BETA: f64 = 0.9;

/// Clamp range for step-size rescaling.
pub(crate) const SOL_SCALE_MIN: f64 = 0.1;
pub(crate) const SOL_SCALE_MAX: f64 = 10.0;

/// Default tolerances for adaptive steppers.
pub(crate) const SOL_TOLERANCE_DEFAULT: f64 = 1e-6;

/// Smallest step size an adaptive stepper may shrink to.
pub(crate) const SOL_STEP_MIN: f64 = 1e-14;

/// Cap on committed substeps per `invoke` call.
pub(crate) const MAX_SUBSTEPS: usize = 100_000;

/// Stepper selection tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StepperKind {
    /// Forward Euler, fixed step.
    Eu,
    /// Classic 4th order Runge-Kutta, fixed step.
    Rk,
    /// Cash-Karp 5(4), adaptive.
    Ck,
    /// Dormand-Prince 5(4), adaptive with dense output (default).
    #[default]
    Dp,
    /// Fehlberg 7(8), adaptive.
    Fe,
    /// Bulirsch-Stoer, adaptive with dense output.
    Bs,
    /// Adams-Bashforth-Moulton, fixed order 5 multistep.
    Abm,
    /// Rosenbrock 4, implicit, adaptive with dense output.
    Ro,
}

/// Properties of the configured stepper.
///
/// `name` and `order` are read-only outputs of the factory; the tolerances
/// are inputs that default to 1e-6 for adaptive steppers. Fixed-step
/// steppers ignore tolerance inputs and report infinity.
#[derive(Debug, Clone, Copy)]
pub struct StepperProps {
    pub kind: StepperKind,
    pub name: &'static str,
    pub order: usize,
    pub abstol: Option<f64>,
    pub reltol: Option<f64>,
}

impl StepperProps {
    pub fn new(kind: StepperKind) -> Self {
        Self {
            kind,
            name: "",
            order: 0,
            abstol: None,
            reltol: None,
        }
    }

    /// Drop ill-formed tolerance inputs (non-finite or non-positive).
    pub(crate) fn sanitize(&mut self) {
        for tol in [&mut self.abstol, &mut self.reltol] {
            if let Some(value) = *tol {
                if !value.is_finite() || value <= 0.0 {
                    *tol = None;
                }
            }
        }
    }

    /// Fill missing tolerances with `default` and return the pair.
    pub(crate) fn tolerances_or(&mut self, default: f64) -> (f64, f64) {
        let abstol = *self.abstol.get_or_insert(default);
        let reltol = *self.reltol.get_or_insert(default);
        (abstol, reltol)
    }

    /// Mark the stepper as tolerance-free.
    pub(crate) fn fixed_step(&mut self) {
        self.abstol = Some(f64::INFINITY);
        self.reltol = Some(f64::INFINITY);
    }
}

impl Default for StepperProps {
    fn default() -> Self {
        Self::new(StepperKind::default())
    }
}

/// Uniform integrate-until contract.
pub trait Stepper: Send {
    /// Starting from `(t, state)`, advance up to `t + span` or until a
    /// state or step event is detected. On a state event the handle and
    /// `state` are rewound to the last committed point before the event
    /// and the bracket is reported; the event is never crossed.
    fn invoke(
        &mut self,
        handle: &mut ModelHandle,
        state: &mut DVector<f64>,
        t: f64,
        span: f64,
        dt: f64,
    ) -> ModelResult<EventInfo>;

    /// Advance by exactly `dt` without adaptive subdivision. Used by the
    /// bisection search; dense-output steppers serve this by interpolation
    /// inside the last accepted step.
    fn step_exact(
        &mut self,
        handle: &mut ModelHandle,
        state: &mut DVector<f64>,
        t: &mut f64,
        dt: f64,
    ) -> ModelResult<()>;

    /// Discard internal stepper history (multistep buffers, dense-output
    /// initialization).
    fn reset(&mut self);
}

/// Steppers that advance through committed substeps and leave event
/// detection to the shared loop below.
pub trait SubdividingStepper: Send {
    /// Make one (possibly adaptive) step; advances `t` and may adjust `dt`
    /// for the next attempt.
    fn do_step(
        &mut self,
        handle: &mut ModelHandle,
        state: &mut DVector<f64>,
        t: &mut f64,
        dt: &mut f64,
    ) -> ModelResult<()>;

    /// Make one step of exactly `dt`.
    fn do_step_const(
        &mut self,
        handle: &mut ModelHandle,
        state: &mut DVector<f64>,
        t: &mut f64,
        dt: f64,
    ) -> ModelResult<()>;

    /// Drop internal history, if any.
    fn clear(&mut self) {}
}

impl<T: SubdividingStepper> Stepper for T {
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
        let mut current = t;
        let mut dt = if dt.is_finite() && dt > 0.0 { dt } else { span };
        let mut stop = false;
        let mut substeps = 0usize;

        while current < t + span && !stop {
            substeps += 1;
            if substeps > MAX_SUBSTEPS {
                return Err(ModelError::ModelFailure(format!(
                    "more than {MAX_SUBSTEPS} substeps in one integration window"
                )));
            }

            // backup to rewind to if this substep crosses an event
            let time_bak = current;
            let states_bak = state.clone();

            if current + dt >= t + span {
                // force the step size for the last piece
                let last = t + span - current;
                self.do_step_const(handle, state, &mut current, last)?;
                self.clear();
                stop = true;
            } else {
                self.do_step(handle, state, &mut current, &mut dt)?;
            }

            handle.set_time(current)?;
            handle.set_continuous_states(state)?;

            if handle.check_state_event()? {
                *state = states_bak;
                handle.set_time(time_bak)?;
                handle.set_continuous_states(state)?;

                info.state_event = true;
                info.step_event = false;
                info.t_lower = time_bak;
                info.t_upper = current;
                return Ok(info);
            }

            if handle.completed_integrator_step()?.enter_event_mode {
                // no rewind for step events
                info.step_event = true;
                info.state_event = false;
                return Ok(info);
            }
        }
        Ok(info)
    }

    fn step_exact(
        &mut self,
        handle: &mut ModelHandle,
        state: &mut DVector<f64>,
        t: &mut f64,
        dt: f64,
    ) -> ModelResult<()> {
        self.do_step_const(handle, state, t, dt)
    }

    fn reset(&mut self) {
        self.clear();
    }
}

/// Scaled max-norm of an error estimate: `max_i |err_i| / (abstol +
/// reltol * |x_i|)`, bounded away from zero.
pub(crate) fn error_norm(state: &DVector<f64>, error: &DVector<f64>, abstol: f64, reltol: f64) -> f64 {
    state
        .iter()
        .zip(error.iter())
        .map(|(&x, &e)| (e / (abstol + reltol * x.abs())).abs())
        .fold(0.0_f64, f64::max)
        .max(1e-16)
}

/// Step-size rescale factor from an error norm and method order.
pub(crate) fn timestep_scale(norm: f64, order: usize) -> f64 {
    (SOL_BETA / norm.powf(1.0 / (order as f64 + 1.0))).clamp(SOL_SCALE_MIN, SOL_SCALE_MAX)
}

/// Cubic Hermite interpolation over one accepted step `[t0, t0 + h]` with
/// endpoint states `y0`, `y1` and slopes `f0`, `f1`, evaluated at
/// `theta = (t - t0) / h`.
#[allow(clippy::too_many_arguments)]
pub(crate) fn hermite_interp(
    theta: f64,
    h: f64,
    y0: &DVector<f64>,
    f0: &DVector<f64>,
    y1: &DVector<f64>,
    f1: &DVector<f64>,
    out: &mut DVector<f64>,
) {
    let h00 = (1.0 + 2.0 * theta) * (1.0 - theta) * (1.0 - theta);
    let h10 = theta * (1.0 - theta) * (1.0 - theta);
    let h01 = theta * theta * (3.0 - 2.0 * theta);
    let h11 = theta * theta * (theta - 1.0);

    out.fill(0.0);
    out.axpy(h00, y0, 1.0);
    out.axpy(h10 * h, f0, 1.0);
    out.axpy(h01, y1, 1.0);
    out.axpy(h11 * h, f1, 1.0);
}

/// Build the stepper selected by `props.kind`, filling in the read-only
/// property fields and default tolerances.
pub fn create_stepper(props: &mut StepperProps, n_states: usize) -> Box<dyn Stepper> {
    props.sanitize();
    match props.kind {
        StepperKind::Eu => {
            props.name = "Euler";
            props.order = 1;
            props.fixed_step();
            Box::new(Euler::new(n_states))
        }
        StepperKind::Rk => {
            props.name = "Runge Kutta";
            props.order = 4;
            props.fixed_step();
            Box::new(RK4::new(n_states))
        }
        StepperKind::Ck => {
            props.name = "Cash Karp";
            props.order = 5;
            let (abstol, reltol) = props.tolerances_or(SOL_TOLERANCE_DEFAULT);
            Box::new(RKCK54::new(n_states, abstol, reltol))
        }
        StepperKind::Dp => {
            props.name = "Dormand Prince";
            props.order = 5;
            let (abstol, reltol) = props.tolerances_or(SOL_TOLERANCE_DEFAULT);
            Box::new(RKDP54::new(n_states, abstol, reltol))
        }
        StepperKind::Fe => {
            props.name = "Fehlberg";
            props.order = 8;
            let (abstol, reltol) = props.tolerances_or(SOL_TOLERANCE_DEFAULT);
            Box::new(RKF78::new(n_states, abstol, reltol))
        }
        StepperKind::Bs => {
            props.name = "Bulirsch Stoer";
            props.order = 0;
            let (abstol, reltol) = props.tolerances_or(SOL_TOLERANCE_DEFAULT);
            Box::new(BulirschStoer::new(n_states, abstol, reltol))
        }
        StepperKind::Abm => {
            props.name = "ABM";
            props.order = 5;
            props.fixed_step();
            Box::new(ABM5::new(n_states))
        }
        StepperKind::Ro => {
            props.name = "Rosenbrock";
            props.order = 4;
            let (abstol, reltol) = props.tolerances_or(SOL_TOLERANCE_DEFAULT);
            Box::new(Rosenbrock4::new(n_states, abstol, reltol))
        }
    }
}
