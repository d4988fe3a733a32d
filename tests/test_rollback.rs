//! Rollback round-trips.

mod common;

use approx::assert_relative_eq;
use mexsim::prelude::*;
use nalgebra::DVector;

fn smooth_fmu() -> RollbackModelExchange {
    common::register_models();
    let mut fmu = ModelExchange::from_registry("stiff2", DriverConfig::default()).unwrap();
    fmu.instantiate("rollback1").unwrap();
    fmu.set_real("ts", 10.0).unwrap();
    fmu.set_real("k", 2.0).unwrap();
    fmu.set_real("x0", 0.1).unwrap();
    fmu.initialize().unwrap();
    RollbackModelExchange::new(fmu)
}

#[test]
fn test_rollback_round_trip_exact() {
    let mut fmu = smooth_fmu();
    fmu.integrate(0.5, 0.01).unwrap();

    fmu.save_current_state_for_rollback().unwrap();
    let mut saved = DVector::zeros(1);
    fmu.fmu().get_continuous_states(&mut saved).unwrap();

    fmu.integrate(0.9, 0.01).unwrap();
    assert_relative_eq!(fmu.fmu().time(), 0.9, epsilon = 1e-12);

    // back to the save point: the state is restored bit for bit
    let reached = fmu.integrate(0.5, 0.01).unwrap();
    assert_eq!(reached, 0.5);
    let mut restored = DVector::zeros(1);
    fmu.fmu().get_continuous_states(&mut restored).unwrap();
    assert_eq!(restored, saved);
}

#[test]
fn test_rollback_to_intermediate_time() {
    let mut fmu = smooth_fmu();
    fmu.integrate(0.3, 0.01).unwrap();

    // reference value at t = 0.45 on the forward trajectory
    fmu.save_current_state_for_rollback().unwrap();
    fmu.integrate(0.45, 0.01).unwrap();
    let reference = fmu.fmu().get_real("x").unwrap();

    fmu.integrate(0.6, 0.01).unwrap();

    // rollback replays forward from the snapshot at 0.3
    let reached = fmu.integrate(0.45, 0.01).unwrap();
    assert_relative_eq!(reached, 0.45, epsilon = 1e-12);
    let replayed = fmu.fmu().get_real("x").unwrap();
    assert_relative_eq!(replayed, reference, epsilon = 1e-9);
}

#[test]
fn test_rollback_without_coverage_is_discarded() {
    let mut fmu = smooth_fmu();
    fmu.integrate(0.5, 0.01).unwrap();
    fmu.save_current_state_for_rollback().unwrap();
    fmu.integrate(0.9, 0.01).unwrap();

    // before the snapshot: recoverable rejection
    let result = fmu.integrate(0.2, 0.01);
    assert!(matches!(result, Err(ModelError::Discarded(_))));
    assert_relative_eq!(fmu.fmu().time(), 0.9, epsilon = 1e-12);
}

#[test]
fn test_implicit_snapshot_reaches_previous_update() {
    let mut fmu = smooth_fmu();
    fmu.integrate(0.3, 0.01).unwrap();
    fmu.integrate(0.6, 0.01).unwrap();

    // the slot holds the state at the previous update (t = 0.3)
    let reached = fmu.integrate(0.4, 0.01).unwrap();
    assert_relative_eq!(reached, 0.4, epsilon = 1e-12);

    // but two updates back is out of reach
    fmu.integrate(0.8, 0.01).unwrap();
    assert!(fmu.integrate(0.1, 0.01).is_err());
}

#[test]
fn test_locked_snapshot_survives_updates() {
    let mut fmu = smooth_fmu();
    fmu.integrate(0.5, 0.01).unwrap();
    fmu.save_current_state_for_rollback().unwrap();

    fmu.integrate(0.7, 0.01).unwrap();
    fmu.integrate(0.9, 0.01).unwrap();

    // still reachable: the explicit save is locked
    let reached = fmu.integrate(0.55, 0.01).unwrap();
    assert_relative_eq!(reached, 0.55, epsilon = 1e-12);

    // after release the slot follows the updates again
    fmu.release_rollback_state();
    fmu.integrate(0.9, 0.01).unwrap();
    fmu.integrate(1.0, 0.01).unwrap();
    assert!(fmu.integrate(0.55, 0.01).is_err());
}
