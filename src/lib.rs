//! mexsim - model-exchange co-simulation core
//!
//! Advances an opaque dynamical model (continuous states + event indicators
//! + time events) through simulated time with a family of ODE steppers,
//! locating state, step and time events to a configurable precision, and
//! layering rollback and lookahead prediction on top for event-driven
//! hosts.
//!
//! # Architecture
//!
//! - [`model`] — the capability contract a loaded model fulfils, the typed
//!   model-description schema and the process-wide registry.
//! - [`solvers`] — the stepper catalogue (fixed, embedded adaptive,
//!   extrapolation, multistep and linearly-implicit methods), all behind
//!   one integrate-until contract.
//! - [`integrator`] — the engine that drives a stepper over a window and
//!   refines event brackets by bisection.
//! - [`driver`] — the public facade: lifecycle, two event-handling modes
//!   (stop-at-event / step-over-event), plus the rollback and incremental
//!   lookahead extensions.
//!
//! # Example
//!
//! ```rust,ignore
//! use mexsim::prelude::*;
//!
//! let blueprint = ModelRegistry::blueprint("bouncing_ball")?;
//! let mut fmu = ModelExchange::new(blueprint, DriverConfig::default());
//! fmu.instantiate("ball1")?;
//! fmu.initialize()?;
//!
//! let mut t = 0.0;
//! while t < 10.0 {
//!     t = fmu.integrate(t + 0.1, 1e-3)?;
//!     if fmu.event_flag() {
//!         println!("event at t = {t}");
//!         fmu.reset_event_flags();
//!     }
//! }
//! ```

pub mod driver;
pub mod integrator;
pub mod model;
pub mod solvers;
pub mod status;

pub use driver::{DriverConfig, IncrementalModelExchange, ModelExchange, RollbackModelExchange};
pub use integrator::{EventInfo, Integrator};
pub use model::{Model, ModelBlueprint, ModelDescription, ModelHandle, ModelRegistry};
pub use solvers::{StepperKind, StepperProps};
pub use status::{ModelError, ModelResult, Status};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::driver::{
        DriverConfig, HistoryEntry, IncrementalModelExchange, LookaheadHooks, ModelExchange,
        RollbackModelExchange,
    };
    pub use crate::integrator::EventInfo;
    pub use crate::model::{
        Causality, DefaultExperiment, Model, ModelBlueprint, ModelDescription, ModelRegistry,
        ScalarVariable, VarType, Variability,
    };
    pub use crate::solvers::{StepperKind, StepperProps};
    pub use crate::status::{ModelError, ModelResult, Status};
}
