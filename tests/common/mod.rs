//! In-memory test models shared by the integration tests.
//!
//! Each fixture registers a description plus an instance factory in the
//! process-wide registry, mimicking what the external model loader does
//! for real model libraries.

#![allow(dead_code)]

use std::sync::Once;

use mexsim::model::{
    Causality, DefaultExperiment, DiscreteUpdate, Model, ModelBlueprint, ModelDescription,
    ModelRegistry, ScalarVariable, VarType, Variability,
};
use mexsim::status::{ModelError, ModelResult};

pub const GRAVITY: f64 = 9.81;

fn real_var(name: &str, vr: u32, causality: Causality) -> ScalarVariable {
    ScalarVariable {
        name: name.into(),
        value_reference: vr,
        var_type: VarType::Real,
        causality,
        variability: Variability::Continuous,
        start: None,
    }
}

fn int_var(name: &str, vr: u32, causality: Causality) -> ScalarVariable {
    ScalarVariable {
        name: name.into(),
        value_reference: vr,
        var_type: VarType::Integer,
        causality,
        variability: Variability::Discrete,
        start: None,
    }
}

fn read_one(refs: &[u32], values: &mut [f64], get: impl Fn(u32) -> Option<f64>) -> ModelResult<()> {
    for (vr, value) in refs.iter().zip(values.iter_mut()) {
        *value = get(*vr).ok_or(ModelError::UnknownValueReference(*vr))?;
    }
    Ok(())
}

/// Register every fixture exactly once per test binary.
pub fn register_models() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        register_zigzag();
        register_stiff2();
        register_van_der_pol();
        register_robertson();
        register_bouncing_ball();
        register_sampler();
        register_greedy();
        register_dupvars();
    });
}

// ----------------------------------------------------------------------
// zigzag: dx/dt = k, indicator 1 - x, event sets k to -1

#[derive(Debug)]
struct Zigzag {
    t: f64,
    x: f64,
    k: f64,
}

impl Default for Zigzag {
    fn default() -> Self {
        Self {
            t: 0.0,
            x: 0.0,
            k: 1.0,
        }
    }
}

impl Model for Zigzag {
    fn set_time(&mut self, t: f64) -> ModelResult<()> {
        self.t = t;
        Ok(())
    }

    fn set_continuous_states(&mut self, x: &[f64]) -> ModelResult<()> {
        self.x = x[0];
        Ok(())
    }

    fn get_continuous_states(&self, x: &mut [f64]) -> ModelResult<()> {
        x[0] = self.x;
        Ok(())
    }

    fn get_derivatives(&mut self, dx: &mut [f64]) -> ModelResult<()> {
        dx[0] = self.k;
        Ok(())
    }

    fn get_event_indicators(&mut self, g: &mut [f64]) -> ModelResult<()> {
        // distance to the bound the trajectory is heading for
        g[0] = if self.k > 0.0 {
            1.0 - self.x
        } else {
            self.x + 1.0
        };
        Ok(())
    }

    fn get_real(&mut self, refs: &[u32], values: &mut [f64]) -> ModelResult<()> {
        read_one(refs, values, |vr| match vr {
            0 => Some(self.x),
            1 => Some(self.k),
            2 => Some(self.k),
            _ => None,
        })
    }

    fn set_real(&mut self, refs: &[u32], values: &[f64]) -> ModelResult<()> {
        for (vr, value) in refs.iter().zip(values.iter()) {
            match vr {
                0 => self.x = *value,
                2 => self.k = *value,
                _ => return Err(ModelError::UnknownValueReference(*vr)),
            }
        }
        Ok(())
    }

    fn new_discrete_states(&mut self) -> ModelResult<DiscreteUpdate> {
        if self.x >= 1.0 {
            self.k = -1.0;
        } else if self.x <= -1.0 {
            self.k = 1.0;
        }
        Ok(DiscreteUpdate::default())
    }
}

fn register_zigzag() {
    let description = ModelDescription {
        model_name: "zigzag".into(),
        guid: "{zigzag-1}".into(),
        n_continuous_states: 1,
        n_event_indicators: 1,
        provides_directional_derivative: false,
        default_experiment: None,
        variables: vec![
            real_var("x", 0, Causality::Output),
            real_var("der(x)", 1, Causality::Internal),
            real_var("k", 2, Causality::Parameter),
        ],
        state_refs: vec![0],
        derivative_refs: vec![1],
    };
    ModelRegistry::register(
        "zigzag",
        ModelBlueprint::new(description, || Box::new(Zigzag::default())),
    )
    .expect("zigzag registration");
}

/// The zigzag dynamics behind a sloppy variable table: "x" is declared
/// twice and its value reference is reused.
fn register_dupvars() {
    let description = ModelDescription {
        model_name: "dupvars".into(),
        guid: "{dupvars-1}".into(),
        n_continuous_states: 1,
        n_event_indicators: 1,
        provides_directional_derivative: false,
        default_experiment: None,
        variables: vec![
            real_var("x", 0, Causality::Output),
            real_var("der(x)", 1, Causality::Internal),
            real_var("k", 2, Causality::Parameter),
            real_var("x", 0, Causality::Output),
        ],
        state_refs: vec![0],
        derivative_refs: vec![1],
    };
    ModelRegistry::register(
        "dupvars",
        ModelBlueprint::new(description, || Box::new(Zigzag::default())),
    )
    .expect("dupvars registration");
}

// ----------------------------------------------------------------------
// stiff2: dx/dt = k*x*(1-x) with a time event at ts flipping the sign of k

#[derive(Debug)]
struct Stiff2 {
    t: f64,
    x: f64,
    x0: f64,
    ts: f64,
    k: f64,
    switched: bool,
}

impl Default for Stiff2 {
    fn default() -> Self {
        Self {
            t: 0.0,
            x: 1e-4,
            x0: 1e-4,
            ts: 1.0,
            k: 100.0,
            switched: false,
        }
    }
}

impl Model for Stiff2 {
    fn set_time(&mut self, t: f64) -> ModelResult<()> {
        self.t = t;
        Ok(())
    }

    fn set_continuous_states(&mut self, x: &[f64]) -> ModelResult<()> {
        self.x = x[0];
        Ok(())
    }

    fn get_continuous_states(&self, x: &mut [f64]) -> ModelResult<()> {
        x[0] = self.x;
        Ok(())
    }

    fn get_derivatives(&mut self, dx: &mut [f64]) -> ModelResult<()> {
        dx[0] = self.k * self.x * (1.0 - self.x);
        Ok(())
    }

    fn get_real(&mut self, refs: &[u32], values: &mut [f64]) -> ModelResult<()> {
        read_one(refs, values, |vr| match vr {
            0 => Some(self.x),
            1 => Some(self.k * self.x * (1.0 - self.x)),
            2 => Some(self.x0),
            3 => Some(self.ts),
            4 => Some(self.k),
            _ => None,
        })
    }

    fn set_real(&mut self, refs: &[u32], values: &[f64]) -> ModelResult<()> {
        for (vr, value) in refs.iter().zip(values.iter()) {
            match vr {
                0 => self.x = *value,
                2 => {
                    self.x0 = *value;
                    self.x = *value;
                }
                3 => self.ts = *value,
                4 => self.k = *value,
                _ => return Err(ModelError::UnknownValueReference(*vr)),
            }
        }
        Ok(())
    }

    fn new_discrete_states(&mut self) -> ModelResult<DiscreteUpdate> {
        let mut update = DiscreteUpdate::default();
        if !self.switched && self.t >= self.ts - 1e-12 {
            self.k = -self.k;
            self.switched = true;
        }
        update.next_event_time = (!self.switched).then_some(self.ts);
        Ok(update)
    }
}

fn register_stiff2() {
    let description = ModelDescription {
        model_name: "stiff2".into(),
        guid: "{stiff2-1}".into(),
        n_continuous_states: 1,
        n_event_indicators: 0,
        provides_directional_derivative: false,
        default_experiment: Some(DefaultExperiment {
            start_time: Some(0.0),
            stop_time: Some(2.0),
            tolerance: None,
            step_size: None,
        }),
        variables: vec![
            real_var("x", 0, Causality::Output),
            real_var("der(x)", 1, Causality::Internal),
            real_var("x0", 2, Causality::Parameter),
            real_var("ts", 3, Causality::Parameter),
            real_var("k", 4, Causality::Parameter),
        ],
        state_refs: vec![0],
        derivative_refs: vec![1],
    };
    ModelRegistry::register(
        "stiff2",
        ModelBlueprint::new(description, || Box::new(Stiff2::default())),
    )
    .expect("stiff2 registration");
}

// ----------------------------------------------------------------------
// van der pol oscillator, mu = 1, initial state (2, 0)

#[derive(Debug)]
struct VanDerPol {
    t: f64,
    x0: f64,
    x1: f64,
    mu: f64,
}

impl Default for VanDerPol {
    fn default() -> Self {
        Self {
            t: 0.0,
            x0: 2.0,
            x1: 0.0,
            mu: 1.0,
        }
    }
}

impl Model for VanDerPol {
    fn set_time(&mut self, t: f64) -> ModelResult<()> {
        self.t = t;
        Ok(())
    }

    fn set_continuous_states(&mut self, x: &[f64]) -> ModelResult<()> {
        self.x0 = x[0];
        self.x1 = x[1];
        Ok(())
    }

    fn get_continuous_states(&self, x: &mut [f64]) -> ModelResult<()> {
        x[0] = self.x0;
        x[1] = self.x1;
        Ok(())
    }

    fn get_derivatives(&mut self, dx: &mut [f64]) -> ModelResult<()> {
        dx[0] = self.x1;
        dx[1] = self.mu * (1.0 - self.x0 * self.x0) * self.x1 - self.x0;
        Ok(())
    }

    fn get_real(&mut self, refs: &[u32], values: &mut [f64]) -> ModelResult<()> {
        read_one(refs, values, |vr| match vr {
            0 => Some(self.x0),
            1 => Some(self.x1),
            2 => Some(self.x1),
            3 => Some(self.mu * (1.0 - self.x0 * self.x0) * self.x1 - self.x0),
            4 => Some(self.mu),
            _ => None,
        })
    }

    fn set_real(&mut self, refs: &[u32], values: &[f64]) -> ModelResult<()> {
        for (vr, value) in refs.iter().zip(values.iter()) {
            match vr {
                0 => self.x0 = *value,
                2 => self.x1 = *value,
                4 => self.mu = *value,
                _ => return Err(ModelError::UnknownValueReference(*vr)),
            }
        }
        Ok(())
    }
}

fn register_van_der_pol() {
    let description = ModelDescription {
        model_name: "vanDerPol".into(),
        guid: "{vdp-1}".into(),
        n_continuous_states: 2,
        n_event_indicators: 0,
        provides_directional_derivative: false,
        default_experiment: None,
        variables: vec![
            real_var("x0", 0, Causality::Output),
            real_var("der(x0)", 1, Causality::Internal),
            real_var("x1", 2, Causality::Output),
            real_var("der(x1)", 3, Causality::Internal),
            real_var("mu", 4, Causality::Parameter),
        ],
        state_refs: vec![0, 2],
        derivative_refs: vec![1, 3],
    };
    ModelRegistry::register(
        "vanDerPol",
        ModelBlueprint::new(description, || Box::new(VanDerPol::default())),
    )
    .expect("vanDerPol registration");
}

// ----------------------------------------------------------------------
// robertson stiff reaction system with analytical directional derivatives

#[derive(Debug)]
struct Robertson {
    t: f64,
    y: [f64; 3],
}

impl Default for Robertson {
    fn default() -> Self {
        Self {
            t: 0.0,
            y: [1.0, 0.0, 0.0],
        }
    }
}

impl Model for Robertson {
    fn set_time(&mut self, t: f64) -> ModelResult<()> {
        self.t = t;
        Ok(())
    }

    fn set_continuous_states(&mut self, x: &[f64]) -> ModelResult<()> {
        self.y.copy_from_slice(x);
        Ok(())
    }

    fn get_continuous_states(&self, x: &mut [f64]) -> ModelResult<()> {
        x.copy_from_slice(&self.y);
        Ok(())
    }

    fn get_derivatives(&mut self, dx: &mut [f64]) -> ModelResult<()> {
        let [y1, y2, y3] = self.y;
        dx[0] = -0.04 * y1 + 1.0e4 * y2 * y3;
        dx[1] = 0.04 * y1 - 1.0e4 * y2 * y3 - 3.0e7 * y2 * y2;
        dx[2] = 3.0e7 * y2 * y2;
        Ok(())
    }

    fn get_real(&mut self, refs: &[u32], values: &mut [f64]) -> ModelResult<()> {
        read_one(refs, values, |vr| match vr {
            0..=2 => Some(self.y[vr as usize]),
            _ => None,
        })
    }

    fn set_real(&mut self, refs: &[u32], values: &[f64]) -> ModelResult<()> {
        for (vr, value) in refs.iter().zip(values.iter()) {
            match vr {
                0..=2 => self.y[*vr as usize] = *value,
                _ => return Err(ModelError::UnknownValueReference(*vr)),
            }
        }
        Ok(())
    }

    fn directional_derivative(
        &mut self,
        unknowns: &[u32],
        knowns: &[u32],
        seed: &[f64],
        out: &mut [f64],
    ) -> ModelResult<()> {
        if unknowns != [3, 4, 5].as_slice() || knowns.len() != 1 {
            return Err(ModelError::Discarded(
                "unsupported directional derivative request".into(),
            ));
        }
        let [_, y2, y3] = self.y;
        let column = match knowns[0] {
            0 => [-0.04, 0.04, 0.0],
            1 => [1.0e4 * y3, -1.0e4 * y3 - 6.0e7 * y2, 6.0e7 * y2],
            2 => [1.0e4 * y2, -1.0e4 * y2, 0.0],
            vr => return Err(ModelError::UnknownValueReference(vr)),
        };
        for (o, c) in out.iter_mut().zip(column.iter()) {
            *o = seed[0] * c;
        }
        Ok(())
    }
}

fn register_robertson() {
    let description = ModelDescription {
        model_name: "robertson".into(),
        guid: "{robertson-1}".into(),
        n_continuous_states: 3,
        n_event_indicators: 0,
        provides_directional_derivative: true,
        default_experiment: None,
        variables: vec![
            real_var("y1", 0, Causality::Output),
            real_var("y2", 1, Causality::Output),
            real_var("y3", 2, Causality::Output),
            real_var("der(y1)", 3, Causality::Internal),
            real_var("der(y2)", 4, Causality::Internal),
            real_var("der(y3)", 5, Causality::Internal),
        ],
        state_refs: vec![0, 1, 2],
        derivative_refs: vec![3, 4, 5],
    };
    ModelRegistry::register(
        "robertson",
        ModelBlueprint::new(description, || Box::new(Robertson::default())),
    )
    .expect("robertson registration");
}

// ----------------------------------------------------------------------
// bouncing ball: indicator h, collision reflects the velocity

#[derive(Debug)]
struct BouncingBall {
    t: f64,
    h: f64,
    v: f64,
    e: f64,
    bounces: i32,
}

impl Default for BouncingBall {
    fn default() -> Self {
        Self {
            t: 0.0,
            h: 1.0,
            v: 0.0,
            e: 0.7,
            bounces: 0,
        }
    }
}

impl Model for BouncingBall {
    fn set_time(&mut self, t: f64) -> ModelResult<()> {
        self.t = t;
        Ok(())
    }

    fn set_continuous_states(&mut self, x: &[f64]) -> ModelResult<()> {
        self.h = x[0];
        self.v = x[1];
        Ok(())
    }

    fn get_continuous_states(&self, x: &mut [f64]) -> ModelResult<()> {
        x[0] = self.h;
        x[1] = self.v;
        Ok(())
    }

    fn get_derivatives(&mut self, dx: &mut [f64]) -> ModelResult<()> {
        dx[0] = self.v;
        dx[1] = -GRAVITY;
        Ok(())
    }

    fn get_event_indicators(&mut self, g: &mut [f64]) -> ModelResult<()> {
        g[0] = self.h;
        Ok(())
    }

    fn get_real(&mut self, refs: &[u32], values: &mut [f64]) -> ModelResult<()> {
        read_one(refs, values, |vr| match vr {
            0 => Some(self.h),
            1 => Some(self.v),
            2 => Some(self.v),
            3 => Some(-GRAVITY),
            4 => Some(self.e),
            _ => None,
        })
    }

    fn set_real(&mut self, refs: &[u32], values: &[f64]) -> ModelResult<()> {
        for (vr, value) in refs.iter().zip(values.iter()) {
            match vr {
                0 => self.h = *value,
                2 => self.v = *value,
                4 => self.e = *value,
                _ => return Err(ModelError::UnknownValueReference(*vr)),
            }
        }
        Ok(())
    }

    fn get_integer(&mut self, refs: &[u32], values: &mut [i32]) -> ModelResult<()> {
        for (vr, value) in refs.iter().zip(values.iter_mut()) {
            match vr {
                10 => *value = self.bounces,
                _ => return Err(ModelError::UnknownValueReference(*vr)),
            }
        }
        Ok(())
    }

    fn new_discrete_states(&mut self) -> ModelResult<DiscreteUpdate> {
        if self.h <= 0.0 && self.v < 0.0 {
            self.h = self.h.abs();
            self.v = -self.e * self.v;
            self.bounces += 1;
        }
        Ok(DiscreteUpdate::default())
    }
}

fn register_bouncing_ball() {
    let description = ModelDescription {
        model_name: "bouncingBall".into(),
        guid: "{ball-1}".into(),
        n_continuous_states: 2,
        n_event_indicators: 1,
        provides_directional_derivative: false,
        default_experiment: None,
        variables: vec![
            real_var("h", 0, Causality::Output),
            real_var("der(h)", 1, Causality::Internal),
            real_var("v", 2, Causality::Output),
            real_var("der(v)", 3, Causality::Internal),
            real_var("e", 4, Causality::Parameter),
            int_var("bounces", 10, Causality::Output),
        ],
        state_refs: vec![0, 2],
        derivative_refs: vec![1, 3],
    };
    ModelRegistry::register(
        "bouncingBall",
        ModelBlueprint::new(description, || Box::new(BouncingBall::default())),
    )
    .expect("bouncingBall registration");
}

// ----------------------------------------------------------------------
// sampler: no continuous states, a periodic time event increments a counter

#[derive(Debug)]
struct Sampler {
    t: f64,
    period: f64,
    count: i32,
}

impl Default for Sampler {
    fn default() -> Self {
        Self {
            t: 0.0,
            period: 0.1,
            count: 0,
        }
    }
}

impl Model for Sampler {
    fn set_time(&mut self, t: f64) -> ModelResult<()> {
        self.t = t;
        Ok(())
    }

    fn set_continuous_states(&mut self, _x: &[f64]) -> ModelResult<()> {
        Ok(())
    }

    fn get_continuous_states(&self, _x: &mut [f64]) -> ModelResult<()> {
        Ok(())
    }

    fn get_derivatives(&mut self, _dx: &mut [f64]) -> ModelResult<()> {
        Ok(())
    }

    fn get_integer(&mut self, refs: &[u32], values: &mut [i32]) -> ModelResult<()> {
        for (vr, value) in refs.iter().zip(values.iter_mut()) {
            match vr {
                0 => *value = self.count,
                _ => return Err(ModelError::UnknownValueReference(*vr)),
            }
        }
        Ok(())
    }

    fn get_real(&mut self, refs: &[u32], values: &mut [f64]) -> ModelResult<()> {
        read_one(refs, values, |vr| match vr {
            1 => Some(self.period),
            _ => None,
        })
    }

    fn set_real(&mut self, refs: &[u32], values: &[f64]) -> ModelResult<()> {
        for (vr, value) in refs.iter().zip(values.iter()) {
            match vr {
                1 => self.period = *value,
                _ => return Err(ModelError::UnknownValueReference(*vr)),
            }
        }
        Ok(())
    }

    fn new_discrete_states(&mut self) -> ModelResult<DiscreteUpdate> {
        let mut update = DiscreteUpdate::default();
        let next = f64::from(self.count + 1) * self.period;
        if self.t >= next - 1e-9 {
            self.count += 1;
        }
        update.next_event_time = Some(f64::from(self.count + 1) * self.period);
        Ok(update)
    }
}

fn register_sampler() {
    let description = ModelDescription {
        model_name: "sampler".into(),
        guid: "{sampler-1}".into(),
        n_continuous_states: 0,
        n_event_indicators: 0,
        provides_directional_derivative: false,
        default_experiment: None,
        variables: vec![
            int_var("count", 0, Causality::Output),
            real_var("period", 1, Causality::Parameter),
        ],
        state_refs: vec![],
        derivative_refs: vec![],
    };
    ModelRegistry::register(
        "sampler",
        ModelBlueprint::new(description, || Box::new(Sampler::default())),
    )
    .expect("sampler registration");
}

// ----------------------------------------------------------------------
// greedy: the discrete-states handshake never converges

#[derive(Debug, Default)]
struct Greedy {
    t: f64,
    calls: i32,
}

impl Model for Greedy {
    fn set_time(&mut self, t: f64) -> ModelResult<()> {
        self.t = t;
        Ok(())
    }

    fn set_continuous_states(&mut self, _x: &[f64]) -> ModelResult<()> {
        Ok(())
    }

    fn get_continuous_states(&self, _x: &mut [f64]) -> ModelResult<()> {
        Ok(())
    }

    fn get_derivatives(&mut self, _dx: &mut [f64]) -> ModelResult<()> {
        Ok(())
    }

    fn get_integer(&mut self, refs: &[u32], values: &mut [i32]) -> ModelResult<()> {
        for (vr, value) in refs.iter().zip(values.iter_mut()) {
            match vr {
                0 => *value = self.calls,
                _ => return Err(ModelError::UnknownValueReference(*vr)),
            }
        }
        Ok(())
    }

    fn new_discrete_states(&mut self) -> ModelResult<DiscreteUpdate> {
        self.calls += 1;
        Ok(DiscreteUpdate {
            new_discrete_states_needed: true,
            terminate_simulation: false,
            next_event_time: Some(0.1),
        })
    }
}

fn register_greedy() {
    let description = ModelDescription {
        model_name: "greedy".into(),
        guid: "{greedy-1}".into(),
        n_continuous_states: 0,
        n_event_indicators: 0,
        provides_directional_derivative: false,
        default_experiment: None,
        variables: vec![int_var("calls", 0, Causality::Output)],
        state_refs: vec![],
        derivative_refs: vec![],
    };
    ModelRegistry::register(
        "greedy",
        ModelBlueprint::new(description, || Box::new(Greedy::default())),
    )
    .expect("greedy registration");
}
