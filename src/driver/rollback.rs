//! Rollback extension.
//!
//! [`RollbackModelExchange`] keeps one snapshot slot alongside the driver.
//! By default the slot is refreshed with the pre-call state on every
//! `integrate`, so a rollback can always reach back to the previous
//! update; an explicit [`save_current_state_for_rollback`] write-locks the
//! slot until it is released again.
//!
//! [`save_current_state_for_rollback`]: RollbackModelExchange::save_current_state_for_rollback

use tracing::debug;

use super::{ModelExchange, Snapshot};
use crate::status::{ModelError, ModelResult};

/// Driver with single-slot rollback.
pub struct RollbackModelExchange {
    fmu: ModelExchange,
    snapshot: Option<Snapshot>,
    /// The snapshot was taken explicitly and must not be overwritten.
    locked: bool,
}

impl RollbackModelExchange {
    pub fn new(fmu: ModelExchange) -> Self {
        Self {
            fmu,
            snapshot: None,
            locked: false,
        }
    }

    /// Access to the wrapped driver.
    pub fn fmu(&mut self) -> &mut ModelExchange {
        &mut self.fmu
    }

    /// Integrate up to `t_end`. A target before the current time triggers a
    /// rollback to the snapshot followed by a forward replay.
    pub fn integrate(&mut self, t_end: f64, dt: f64) -> ModelResult<f64> {
        if t_end < self.fmu.time() {
            self.rollback(t_end, dt)?;
            return Ok(self.fmu.time());
        }
        // keep the pre-call state reachable unless a saved state is locked
        if !self.locked {
            self.snapshot = Some(self.fmu.capture_snapshot()?);
        }
        self.fmu.integrate(t_end, dt)
    }

    /// Save the current state as the rollback target. The slot stays
    /// write-locked until [`release_rollback_state`] is called.
    ///
    /// [`release_rollback_state`]: Self::release_rollback_state
    pub fn save_current_state_for_rollback(&mut self) -> ModelResult<()> {
        self.snapshot = Some(self.fmu.capture_snapshot()?);
        self.locked = true;
        debug!(time = self.fmu.time(), "rollback state saved");
        Ok(())
    }

    /// Release an explicitly saved rollback state.
    pub fn release_rollback_state(&mut self) {
        self.locked = false;
    }

    /// Restore the snapshot and replay forward to `time`.
    fn rollback(&mut self, time: f64, dt: f64) -> ModelResult<f64> {
        let snapshot = self.snapshot.as_ref().ok_or_else(|| {
            ModelError::Discarded(format!("no rollback state covers t = {time}"))
        })?;
        if time < snapshot.entry.time {
            return Err(ModelError::Discarded(format!(
                "rollback state starts at t = {}, cannot reach t = {time}",
                snapshot.entry.time
            )));
        }

        let snapshot = snapshot.clone();
        self.fmu.restore_snapshot(&snapshot)?;
        debug!(from = snapshot.entry.time, to = time, "rolled back");

        if time > snapshot.entry.time {
            self.fmu.integrate(time, dt)?;
        }
        Ok(self.fmu.time())
    }
}
