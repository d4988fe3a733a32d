//! Stepper benchmarks
//!
//! Compares the stepper catalogue on a smooth decay problem driven through
//! the full driver stack (model handle, engine, event bookkeeping).

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use mexsim::model::{Causality, Model, ModelBlueprint, ModelDescription, ScalarVariable};
use mexsim::model::{VarType, Variability};
use mexsim::prelude::*;
use mexsim::status::ModelResult;

/// dx_i/dt = -k x_i, uncoupled decay in `n` dimensions.
struct Decay {
    x: Vec<f64>,
    k: f64,
}

impl Model for Decay {
    fn set_time(&mut self, _t: f64) -> ModelResult<()> {
        Ok(())
    }

    fn set_continuous_states(&mut self, x: &[f64]) -> ModelResult<()> {
        self.x.copy_from_slice(x);
        Ok(())
    }

    fn get_continuous_states(&self, x: &mut [f64]) -> ModelResult<()> {
        x.copy_from_slice(&self.x);
        Ok(())
    }

    fn get_derivatives(&mut self, dx: &mut [f64]) -> ModelResult<()> {
        for (d, x) in dx.iter_mut().zip(self.x.iter()) {
            *d = -self.k * x;
        }
        Ok(())
    }
}

fn register_decay(size: usize) -> String {
    let name = format!("decay{size}");
    if ModelRegistry::contains(&name) {
        return name;
    }
    let variables = (0..size)
        .map(|i| ScalarVariable {
            name: format!("x{i}"),
            value_reference: i as u32,
            var_type: VarType::Real,
            causality: Causality::Output,
            variability: Variability::Continuous,
            start: None,
        })
        .collect();
    let description = ModelDescription {
        model_name: name.clone(),
        guid: format!("{{decay-{size}}}"),
        n_continuous_states: size,
        n_event_indicators: 0,
        provides_directional_derivative: false,
        default_experiment: None,
        variables,
        state_refs: (0..size as u32).collect(),
        derivative_refs: (size as u32..2 * size as u32).collect(),
    };
    ModelRegistry::register(
        &name,
        ModelBlueprint::new(description, move || {
            Box::new(Decay {
                x: vec![1.0; size],
                k: 0.5,
            })
        }),
    )
    .expect("decay registration");
    name
}

fn bench_stepper_kinds(c: &mut Criterion) {
    let model = register_decay(10);
    let kinds = [
        StepperKind::Eu,
        StepperKind::Rk,
        StepperKind::Ck,
        StepperKind::Dp,
        StepperKind::Fe,
        StepperKind::Bs,
        StepperKind::Abm,
        StepperKind::Ro,
    ];

    let mut group = c.benchmark_group("integrate 1s");
    for kind in kinds {
        group.bench_with_input(
            BenchmarkId::new("stepper", format!("{kind:?}")),
            &kind,
            |b, &kind| {
                b.iter(|| {
                    let config = DriverConfig {
                        stepper: kind,
                        ..DriverConfig::default()
                    };
                    let mut fmu = ModelExchange::from_registry(&model, config).unwrap();
                    fmu.instantiate("bench").unwrap();
                    fmu.initialize().unwrap();
                    fmu.integrate(1.0, 0.01).unwrap()
                });
            },
        );
    }
    group.finish();
}

fn bench_state_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("RK4 state size");
    for size in [1usize, 10, 50] {
        let model = register_decay(size);
        group.bench_with_input(BenchmarkId::new("states", size), &size, |b, _| {
            b.iter(|| {
                let config = DriverConfig {
                    stepper: StepperKind::Rk,
                    ..DriverConfig::default()
                };
                let mut fmu = ModelExchange::from_registry(&model, config).unwrap();
                fmu.instantiate("bench").unwrap();
                fmu.initialize().unwrap();
                fmu.integrate(1.0, 0.01).unwrap()
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_stepper_kinds, bench_state_size);
criterion_main!(benches);
