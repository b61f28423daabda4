//! Stage trait and run context.
//!
//! RULE: Every step of a batch run implements GovStage.
//! The engine calls run() on each registered stage in registration
//! order, once per run. Execution order is fixed and documented in engine.rs.

use crate::{
    clock::{BatchClock, CancelToken},
    config::EngineConfig,
    error::{GovError, GovResult},
    event::GovEvent,
    store::GovStore,
    types::ScoreDate,
};

/// Everything a stage may touch during one run. There is no global state:
/// configuration, storage, time and cancellation all arrive here.
pub struct StageContext<'a> {
    pub run_id: &'a str,
    pub date:   ScoreDate,
    pub config: &'a EngineConfig,
    pub store:  &'a GovStore,
    pub clock:  &'a dyn BatchClock,
    pub cancel: &'a CancelToken,
}

impl StageContext<'_> {
    /// Bail out with `Cancelled` if the run was aborted.
    pub fn checkpoint(&self, stage: &'static str) -> GovResult<()> {
        if self.cancel.is_cancelled() {
            return Err(GovError::Cancelled { run_id: self.run_id.to_string(), stage });
        }
        Ok(())
    }
}

/// The contract every stage must fulfill.
pub trait GovStage: Send {
    /// Unique stable name for this stage.
    fn name(&self) -> &'static str;

    /// Called once per run by the engine.
    ///
    /// - `ctx`:       run id, date, config, store, clock and cancel flag
    /// - `events_in`: events emitted by earlier stages this run
    ///
    /// Returns the new events to add to the run's event log.
    fn run(&mut self, ctx: &StageContext<'_>, events_in: &[GovEvent]) -> GovResult<Vec<GovEvent>>;
}
