//! Right-hand-side and Jacobian evaluation.
//!
//! stiff2 exercises the finite-difference fallback on a scalar model, Van
//! der Pol checks the fallback against hand-computed partials, and the
//! Robertson system goes through the directional-derivative path.

mod common;

use approx::{assert_abs_diff_eq, assert_relative_eq};
use mexsim::prelude::*;
use nalgebra::{DMatrix, DVector};

#[test]
fn test_stiff2_rhs() {
    common::register_models();
    let mut fmu = ModelExchange::from_registry("stiff2", DriverConfig::default()).unwrap();
    fmu.instantiate("stiff21").unwrap();
    fmu.initialize().unwrap();

    let mut dx = DVector::zeros(1);
    fmu.get_derivatives(&mut dx).unwrap();
    assert!(dx[0].is_finite());

    fmu.set_real("x", 0.5).unwrap();
    fmu.get_derivatives(&mut dx).unwrap();
    assert_eq!(dx[0], 25.0);
}

#[test]
fn test_stiff2_jacobian() {
    common::register_models();
    let mut fmu = ModelExchange::from_registry("stiff2", DriverConfig::default()).unwrap();
    fmu.instantiate("stiff21").unwrap();
    fmu.initialize().unwrap();

    // d/dx [k x (1 - x)] = k (1 - 2x)
    let mut jac = DMatrix::zeros(1, 1);
    fmu.set_real("x", 0.5).unwrap();
    fmu.jacobian(&mut jac).unwrap();
    assert!(jac[(0, 0)].is_finite());
    assert_abs_diff_eq!(jac[(0, 0)], 0.0, epsilon = 1e-9);

    fmu.set_real("x", 0.1).unwrap();
    fmu.jacobian(&mut jac).unwrap();
    assert_relative_eq!(jac[(0, 0)], 80.0, max_relative = 1e-7);
}

#[test]
fn test_van_der_pol_numerical_jacobian_initial() {
    common::register_models();
    let mut fmu = ModelExchange::from_registry("vanDerPol", DriverConfig::default()).unwrap();
    fmu.instantiate("vdp1").unwrap();
    fmu.initialize().unwrap();
    assert!(!fmu.provides_jacobian());

    // at the initial state (2, 0) the Jacobian is [[0, 1], [-1, -3]]
    let x = DVector::from_vec(vec![2.0, 0.0]);
    let mut jac = DMatrix::zeros(2, 2);
    let mut dfdt = DVector::zeros(2);
    fmu.numerical_jacobian(&mut jac, &x, &mut dfdt, 0.0).unwrap();

    assert_abs_diff_eq!(jac[(0, 0)], 0.0, epsilon = 1e-9);
    assert_relative_eq!(jac[(1, 0)], -1.0, max_relative = 1e-9);
    assert_relative_eq!(jac[(0, 1)], 1.0, max_relative = 1e-9);
    assert_relative_eq!(jac[(1, 1)], -3.0, max_relative = 1e-9);

    // the right-hand side has no explicit time dependence
    assert_abs_diff_eq!(dfdt[0], 0.0, epsilon = 1e-9);
    assert_abs_diff_eq!(dfdt[1], 0.0, epsilon = 1e-9);
}

#[test]
fn test_van_der_pol_numerical_jacobian_generic_point() {
    common::register_models();
    let mut fmu = ModelExchange::from_registry("vanDerPol", DriverConfig::default()).unwrap();
    fmu.instantiate("vdp1").unwrap();
    fmu.initialize().unwrap();

    let (x0, x1) = (13.23, 23.14);
    let x = DVector::from_vec(vec![x0, x1]);
    let mut jac = DMatrix::zeros(2, 2);
    let mut dfdt = DVector::zeros(2);
    fmu.numerical_jacobian(&mut jac, &x, &mut dfdt, 0.0).unwrap();

    assert_abs_diff_eq!(jac[(0, 0)], 0.0, epsilon = 1e-7);
    assert_relative_eq!(jac[(1, 0)], -2.0 * x0 * x1 - 1.0, max_relative = 1e-7);
    assert_relative_eq!(jac[(0, 1)], 1.0, max_relative = 1e-7);
    assert_relative_eq!(jac[(1, 1)], 1.0 - x0 * x0, max_relative = 1e-7);
}

#[test]
fn test_robertson_analytical_jacobian() {
    common::register_models();
    let mut fmu = ModelExchange::from_registry("robertson", DriverConfig::default()).unwrap();
    fmu.instantiate("robertson1").unwrap();
    fmu.initialize().unwrap();
    assert!(fmu.provides_jacobian());

    let x = DVector::from_vec(vec![2.0, 3.0, 4.0]);
    fmu.set_continuous_states(&x).unwrap();

    let mut jac = DMatrix::zeros(3, 3);
    fmu.jacobian(&mut jac).unwrap();

    // column-major layout: column j holds the partials w.r.t. state j
    let expected = [
        [-0.04, 0.04, 0.0],
        [4.0e4, -1.8004e8, 1.8e8],
        [3.0e4, -3.0e4, 0.0],
    ];
    for (j, column) in expected.iter().enumerate() {
        for (i, &value) in column.iter().enumerate() {
            if value == 0.0 {
                assert_abs_diff_eq!(jac[(i, j)], 0.0, epsilon = 1e-12);
            } else {
                assert_relative_eq!(jac[(i, j)], value, max_relative = 1e-9);
            }
        }
    }
}

#[test]
fn test_robertson_numerical_matches_analytical() {
    common::register_models();
    let mut fmu = ModelExchange::from_registry("robertson", DriverConfig::default()).unwrap();
    fmu.instantiate("robertson1").unwrap();
    fmu.initialize().unwrap();

    let x = DVector::from_vec(vec![2.0, 3.0, 4.0]);
    fmu.set_continuous_states(&x).unwrap();
    let mut analytical = DMatrix::zeros(3, 3);
    fmu.jacobian(&mut analytical).unwrap();

    let mut numerical = DMatrix::zeros(3, 3);
    let mut dfdt = DVector::zeros(3);
    fmu.numerical_jacobian(&mut numerical, &x, &mut dfdt, 0.0)
        .unwrap();

    for i in 0..3 {
        for j in 0..3 {
            assert_abs_diff_eq!(
                numerical[(i, j)],
                analytical[(i, j)],
                epsilon = 1e-4 * (1.0 + analytical[(i, j)].abs())
            );
        }
    }
}
