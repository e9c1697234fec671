//! When to refocus during an imaging sequence

use crate::runner::RunState;
use chrono::{DateTime, Duration, Local};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutofocusTrigger {
    /// Refocus when the last run is older than this many minutes
    AfterMinutes(u32),
    /// Refocus every this many exposures
    AfterExposures(u32),
}

/// What the sequencer knows when asking the trigger
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriggerContext {
    /// Triggers only fire in front of an exposure
    pub next_is_exposure: bool,
    pub exposures_taken: usize,
    pub now: DateTime<Local>,
}

impl AutofocusTrigger {
    pub fn should_trigger(&self, state: &RunState, ctx: &TriggerContext) -> bool {
        if state.running || !ctx.next_is_exposure {
            return false;
        }

        match *self {
            AutofocusTrigger::AfterMinutes(minutes) => match state.last_run_at {
                Some(last) => ctx.now - last > Duration::minutes(minutes as i64),
                None => true,
            },
            AutofocusTrigger::AfterExposures(0) => false,
            AutofocusTrigger::AfterExposures(every) => {
                ctx.exposures_taken > 0 && ctx.exposures_taken % every as usize == 0
            }
        }
    }
}
