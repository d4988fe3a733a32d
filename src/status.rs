//! Status codes and the error taxonomy shared by the driver stack.
//!
//! Internally every fallible operation returns `Result<T, ModelError>`.
//! At the public boundary the driver folds errors into the five-valued
//! [`Status`] and keeps the worst status observed per call.

use thiserror::Error;

/// Five-valued status reported at the driver boundary.
///
/// Ordered by severity: `Ok < Warning < Discard < Error < Fatal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Status {
    /// Operation completed as requested.
    #[default]
    Ok,
    /// Non-fatal data issue; results are still usable.
    Warning,
    /// Recoverable rejection (bad value reference, rejected step). The
    /// caller may retry, typically with different arguments.
    Discard,
    /// Programming error or model failure; the operation had no effect.
    Error,
    /// Unrecoverable failure; no further operations are valid.
    Fatal,
}

impl Status {
    /// Fold two statuses, keeping the more severe one.
    pub fn worst(self, other: Status) -> Status {
        self.max(other)
    }

    /// True for `Ok` and `Warning`.
    pub fn is_usable(self) -> bool {
        self <= Status::Warning
    }
}

/// Errors surfaced by the model, the steppers and the driver.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("variable `{0}` does not exist")]
    UnknownName(String),

    #[error("value reference {0} is not known to the model")]
    UnknownValueReference(u32),

    #[error("{what} out of range: {value}")]
    RangeViolation { what: &'static str, value: f64 },

    /// The model rejected the operation but remains usable.
    #[error("operation discarded: {0}")]
    Discarded(String),

    /// Repeated step failure, non-convergence or a rejected evaluation.
    #[error("model evaluation failed: {0}")]
    ModelFailure(String),

    /// Event iteration did not converge within the iteration cap.
    #[error("event handshake did not settle after {0} iterations")]
    HandshakeTimeout(usize),

    /// The model asked to terminate the simulation.
    #[error("model requested termination at t = {0}")]
    TerminateRequest(f64),

    /// Operation requires an instantiated model instance.
    #[error("model instance has not been instantiated")]
    NotInstantiated,

    #[error("fatal: {0}")]
    Fatal(String),
}

impl ModelError {
    /// Map the error kind onto the five-valued status.
    pub fn status(&self) -> Status {
        match self {
            ModelError::UnknownName(_) => Status::Discard,
            ModelError::UnknownValueReference(_) => Status::Discard,
            ModelError::RangeViolation { .. } => Status::Discard,
            ModelError::Discarded(_) => Status::Discard,
            ModelError::ModelFailure(_) => Status::Discard,
            ModelError::HandshakeTimeout(_) => Status::Warning,
            ModelError::TerminateRequest(_) => Status::Fatal,
            ModelError::NotInstantiated => Status::Error,
            ModelError::Fatal(_) => Status::Fatal,
        }
    }
}

/// Convenience alias used throughout the crate.
pub type ModelResult<T> = Result<T, ModelError>;
