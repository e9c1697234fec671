//! Scripted collaborators
//!
//! These record what the controller asked for and answer from a fixed script,
//! so a test can assert on exact drive sequences.

use crate::errors::LensAfError;
use crate::focus::{
    CancellationToken, DriveError, FocusDirection, FrameSampler, Measurement, ResultSink,
    SampleError, SearchConfiguration, SearchResult, StepDriver, StepSize,
};
use std::collections::VecDeque;

/// Step driver that only records
#[derive(Debug, Clone, Default)]
pub struct RecordingDriver {
    moves: Vec<(FocusDirection, StepSize)>,
    calibrations: usize,
    offset: i64,
    failing_moves: Vec<usize>,
}

impl RecordingDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the moves at these indices (0-based over all `drive` calls)
    pub fn failing_on(failing_moves: Vec<usize>) -> Self {
        Self {
            failing_moves,
            ..Self::default()
        }
    }

    pub fn moves(&self) -> &[(FocusDirection, StepSize)] {
        &self.moves
    }

    pub fn calibrations(&self) -> usize {
        self.calibrations
    }

    /// Accepted steps toward near since the last calibration
    pub fn net_offset(&self) -> i64 {
        self.offset
    }
}

impl StepDriver for RecordingDriver {
    fn drive(&mut self, direction: FocusDirection, step: StepSize) -> Result<(), DriveError> {
        let index = self.moves.len();
        self.moves.push((direction, step));
        if self.failing_moves.contains(&index) {
            return Err(DriveError::Rejected(format!("scripted failure on move {}", index)));
        }
        self.offset += direction.sign();
        Ok(())
    }

    fn drive_to_end(&mut self, _direction: FocusDirection) -> Result<(), DriveError> {
        self.calibrations += 1;
        self.offset = 0;
        Ok(())
    }
}

/// Sampler answering from a fixed script
#[derive(Debug, Clone, Default)]
pub struct ScriptedSampler {
    script: VecDeque<Result<Measurement, SampleError>>,
    calls: usize,
    cancel_on: Option<(usize, CancellationToken)>,
}

impl ScriptedSampler {
    pub fn from_results(results: Vec<Result<Measurement, SampleError>>) -> Self {
        Self {
            script: results.into(),
            ..Self::default()
        }
    }

    /// HFR readings with a constant star count
    pub fn hfr(values: &[f64]) -> Self {
        Self::from_results(values.iter().map(|&v| Ok(Measurement::hfr(v, 25))).collect())
    }

    pub fn contrast(values: &[f64]) -> Self {
        Self::from_results(
            values
                .iter()
                .map(|&v| Ok(Measurement::contrast(v)))
                .collect(),
        )
    }

    /// Cancel `token` while serving call number `call` (0-based). The
    /// measurement for that call is still returned.
    pub fn cancel_on_call(mut self, call: usize, token: CancellationToken) -> Self {
        self.cancel_on = Some((call, token));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls
    }
}

impl FrameSampler for ScriptedSampler {
    fn next_sample(&mut self, _config: &SearchConfiguration) -> Result<Measurement, SampleError> {
        if let Some((call, token)) = &self.cancel_on {
            if *call == self.calls {
                token.cancel();
            }
        }
        self.calls += 1;
        self.script
            .pop_front()
            .unwrap_or_else(|| Err(SampleError::Detector("script exhausted".to_string())))
    }
}

/// Sink keeping every result in memory
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    writes: Vec<(SearchConfiguration, SearchResult)>,
    fail: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the write, then reports failure
    pub fn failing() -> Self {
        Self {
            writes: Vec::new(),
            fail: true,
        }
    }

    pub fn writes(&self) -> &[(SearchConfiguration, SearchResult)] {
        &self.writes
    }
}

impl ResultSink for MemorySink {
    fn write(
        &mut self,
        config: &SearchConfiguration,
        result: &SearchResult,
    ) -> Result<(), LensAfError> {
        self.writes.push((config.clone(), result.clone()));
        if self.fail {
            return Err(LensAfError::Report("sink unavailable".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_driver_tracks_offset() {
        let mut driver = RecordingDriver::failing_on(vec![1]);
        let step = StepSize::from_signed(0, 1);
        driver.drive(FocusDirection::Near, step).unwrap();
        assert!(driver.drive(FocusDirection::Near, step).is_err());
        driver.drive(FocusDirection::Near, step).unwrap();
        assert_eq!(driver.moves().len(), 3);
        assert_eq!(driver.net_offset(), 2);

        driver.drive_to_end(FocusDirection::Far).unwrap();
        assert_eq!(driver.net_offset(), 0);
        assert_eq!(driver.calibrations(), 1);
    }

    #[test]
    fn test_scripted_sampler_exhausts() {
        let config = SearchConfiguration::default();
        let mut sampler = ScriptedSampler::hfr(&[2.0]);
        assert_eq!(sampler.next_sample(&config).unwrap().metric, 2.0);
        assert!(matches!(
            sampler.next_sample(&config),
            Err(SampleError::Detector(_))
        ));
        assert_eq!(sampler.calls(), 2);
    }

    #[test]
    fn test_cancel_on_call() {
        let token = CancellationToken::new();
        let config = SearchConfiguration::default();
        let mut sampler = ScriptedSampler::contrast(&[0.1, 0.2]).cancel_on_call(1, token.clone());

        sampler.next_sample(&config).unwrap();
        assert!(!token.is_cancelled());
        assert_eq!(sampler.next_sample(&config).unwrap().metric, 0.2);
        assert!(token.is_cancelled());
    }
}
