//! Simulated lens and camera
//!
//! [`SimulatedLens`] implements [`LensBackend`] over a bounded motor position
//! and [`SimulatedSampler`] renders the star field that position would
//! produce, so the whole drive and metric stack can run without a camera.

use super::synthetic_stars::{synthetic_star_frame, StarFieldSpec};
use crate::focus::{DriveError, FrameSampler, Measurement, SampleError, SearchConfiguration};
use crate::lens::{LensBackend, LensCommand};
use crate::metrics::{measure, DEFAULT_SENSITIVITY};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Motor units moved by one command of each level
pub const FINE_UNITS: i64 = 1;
pub const COARSE_UNITS: i64 = 8;
pub const MAXIMAL_UNITS: i64 = 80;

/// Lens motor with end stops at 0 (far) and `travel` (near).
///
/// Clones share the motor position.
#[derive(Debug, Clone)]
pub struct SimulatedLens {
    position: Arc<AtomicI64>,
    travel: i64,
    commands: Arc<AtomicUsize>,
    fail_every: Option<usize>,
}

impl Default for SimulatedLens {
    fn default() -> Self {
        Self::new(300)
    }
}

impl SimulatedLens {
    /// New lens parked at the near end stop
    pub fn new(travel: i64) -> Self {
        Self {
            position: Arc::new(AtomicI64::new(travel)),
            travel,
            commands: Arc::new(AtomicUsize::new(0)),
            fail_every: None,
        }
    }

    /// Reject every `n`th command
    pub fn with_fail_every(mut self, n: usize) -> Self {
        self.fail_every = Some(n.max(1));
        self
    }

    pub fn position(&self) -> i64 {
        self.position.load(Ordering::SeqCst)
    }

    pub fn set_position(&self, position: i64) {
        self.position
            .store(position.clamp(0, self.travel), Ordering::SeqCst);
    }

    pub fn travel(&self) -> i64 {
        self.travel
    }

    /// Commands received, rejected ones included
    pub fn command_count(&self) -> usize {
        self.commands.load(Ordering::SeqCst)
    }
}

impl LensBackend for SimulatedLens {
    fn send(&mut self, command: LensCommand) -> Result<(), DriveError> {
        let count = self.commands.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(n) = self.fail_every {
            if count % n == 0 {
                return Err(DriveError::Rejected(format!("simulated failure on command {}", count)));
            }
        }

        let units = match command.level() {
            1 => FINE_UNITS,
            2 => COARSE_UNITS,
            _ => MAXIMAL_UNITS,
        };
        self.set_position(self.position() + units * command.direction().sign());
        Ok(())
    }
}

/// Star size as a function of motor position: a V around the focus point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OpticsModel {
    pub focus_position: i64,
    pub min_hfr: f64,
    /// HFR growth per motor unit away from focus
    pub slope: f64,
}

impl Default for OpticsModel {
    fn default() -> Self {
        Self {
            focus_position: 40,
            min_hfr: 1.5,
            slope: 0.08,
        }
    }
}

impl OpticsModel {
    pub fn hfr_at(&self, position: i64) -> f64 {
        self.min_hfr + self.slope * (position - self.focus_position).abs() as f64
    }
}

/// Renders the current lens position as a star field and measures it
#[derive(Debug, Clone)]
pub struct SimulatedSampler {
    lens: SimulatedLens,
    optics: OpticsModel,
    field: StarFieldSpec,
    sensitivity: f64,
    frames: u64,
}

impl SimulatedSampler {
    pub fn new(lens: SimulatedLens, optics: OpticsModel) -> Self {
        Self {
            lens,
            optics,
            field: StarFieldSpec::default(),
            sensitivity: DEFAULT_SENSITIVITY,
            frames: 0,
        }
    }

    pub fn with_field(mut self, field: StarFieldSpec) -> Self {
        self.field = field;
        self
    }

    pub fn with_sensitivity(mut self, sensitivity: f64) -> Self {
        self.sensitivity = sensitivity;
        self
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl FrameSampler for SimulatedSampler {
    fn next_sample(&mut self, config: &SearchConfiguration) -> Result<Measurement, SampleError> {
        let hfr = self.optics.hfr_at(self.lens.position());
        let frame = synthetic_star_frame(&self.field, hfr, self.frames);
        self.frames += 1;
        Ok(measure(&frame, config.metric, self.sensitivity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::focus::FocusDirection;

    #[test]
    fn test_lens_clamps_at_end_stops() {
        let mut lens = SimulatedLens::new(100);
        assert_eq!(lens.position(), 100);

        lens.send(LensCommand::Near3).unwrap();
        assert_eq!(lens.position(), 100);

        for _ in 0..2 {
            lens.send(LensCommand::maximal(FocusDirection::Far)).unwrap();
        }
        assert_eq!(lens.position(), 0);

        lens.send(LensCommand::Near2).unwrap();
        lens.send(LensCommand::Near1).unwrap();
        assert_eq!(lens.position(), 9);
        assert_eq!(lens.command_count(), 5);
    }

    #[test]
    fn test_clones_share_position() {
        let lens = SimulatedLens::new(50);
        let mut handle = lens.clone();
        handle.send(LensCommand::Far2).unwrap();
        assert_eq!(lens.position(), 42);
    }

    #[test]
    fn test_fail_every() {
        let mut lens = SimulatedLens::new(50).with_fail_every(2);
        assert!(lens.send(LensCommand::Far1).is_ok());
        assert!(lens.send(LensCommand::Far1).is_err());
        assert_eq!(lens.position(), 49);
    }

    #[test]
    fn test_sampler_reports_sharpest_at_focus() {
        let lens = SimulatedLens::new(300);
        let mut sampler = SimulatedSampler::new(lens.clone(), OpticsModel::default());
        let config = SearchConfiguration::default();

        lens.set_position(40);
        let focused = sampler.next_sample(&config).unwrap();
        lens.set_position(80);
        let blurred = sampler.next_sample(&config).unwrap();

        assert_eq!(focused.star_count, Some(9));
        assert!(focused.metric < blurred.metric);
        assert_eq!(sampler.frames(), 2);
    }
}
