//! Testing utilities for lensaf
//!
//! Scripted collaborators for driving the search loop without hardware, and a
//! simulated lens whose star field blurs with distance from a focus point.

pub mod fakes;
pub mod simulated_lens;
pub mod synthetic_stars;

pub use fakes::{MemorySink, RecordingDriver, ScriptedSampler};
pub use simulated_lens::{OpticsModel, SimulatedLens, SimulatedSampler};
pub use synthetic_stars::{synthetic_star_frame, StarFieldSpec};
