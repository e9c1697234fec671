//! Focus search
//!
//! Drives a lens in discrete steps from a calibrated edge, samples a
//! focus-quality metric (star HFR or frame contrast) after every step and
//! leaves the lens at the best sampled position:
//! 1. Calibrate against the far (infinity) end stop
//! 2. Step toward near, sampling once per step
//! 3. Decide where the optimum was (bracket on degradation, or best of N)
//! 4. Drive back to it and hand the result to a report sink
pub mod collaborators;
pub mod controller;
pub mod step;

pub use collaborators::{
    CancellationToken, DriveError, FrameSampler, Measurement, ResultSink, SampleError,
    StepDriver,
};
pub use controller::{backtrack_steps, best_sample_index, run_search};
pub use step::{
    select_step_size, CustomProfiles, FineSign, StepSize, MAX_STEP_COMMANDS, PRESET_STEP_SIZES,
};

use crate::errors::LensAfError;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Direction of a lens drive command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FocusDirection {
    Near,
    Far,
}

impl FocusDirection {
    pub fn opposite(self) -> Self {
        match self {
            FocusDirection::Near => FocusDirection::Far,
            FocusDirection::Far => FocusDirection::Near,
        }
    }

    /// Offset change for one step in this direction (near is positive)
    pub fn sign(self) -> i64 {
        match self {
            FocusDirection::Near => 1,
            FocusDirection::Far => -1,
        }
    }
}

/// Focus-quality metric sampled on every frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Half-flux radius, lower is sharper
    #[default]
    Hfr,
    /// Frame contrast, higher is sharper
    Contrast,
}

impl MetricKind {
    /// Strictly better. NaN never compares better.
    pub fn is_better(self, candidate: f64, reference: f64) -> bool {
        match self {
            MetricKind::Hfr => candidate < reference,
            MetricKind::Contrast => candidate > reference,
        }
    }

    /// Strictly worse. NaN never compares worse.
    pub fn is_worse(self, candidate: f64, reference: f64) -> bool {
        match self {
            MetricKind::Hfr => candidate > reference,
            MetricKind::Contrast => candidate < reference,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            MetricKind::Hfr => "HFR",
            MetricKind::Contrast => "contrast",
        }
    }
}

/// Search policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStrategy {
    /// Step until the metric degrades, then return to the earliest best sample.
    #[default]
    CalibrateThenBracket,
    /// Take a fixed number of samples, then return to the best one.
    CalibrateThenSampleAllThenBacktrack,
}

/// What to do with the lens when a run fails after it has started moving
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Leave the lens wherever the last drive put it
    #[default]
    LeaveInPlace,
    /// Drive back to the best valid sample taken so far
    ReturnToBest,
}

/// One measurement taken at a lens position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FocusSample {
    /// 0-based position in the run
    pub iteration: usize,
    /// Lens position in steps from the calibration edge, positive toward near
    pub offset: i64,
    /// HFR or contrast, depending on the run's metric
    pub metric: f64,
    /// Stars found by the detector (HFR runs only)
    pub star_count: Option<u32>,
}

/// Immutable parameters for one search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfiguration {
    /// Exposure time in seconds, forwarded to the sampler
    pub exposure_time: f64,
    pub stretch_factor: f64,
    pub black_clipping: f64,
    /// Safety cap for the bracket strategy, sample budget for the backtrack strategy
    pub max_iterations: u32,
    pub metric: MetricKind,
    pub strategy: SearchStrategy,
    pub step: StepSize,
    /// Steps driven toward near after calibration, before the first sample
    pub initial_offset: u32,
    /// Decide the bracket direction from the first two samples
    pub probe_direction: bool,
    pub failure_policy: FailurePolicy,
    /// Transient sampler failures retried per iteration without re-driving
    pub max_sample_retries: u32,
}

impl Default for SearchConfiguration {
    fn default() -> Self {
        Self {
            exposure_time: 5.0,
            stretch_factor: 0.15,
            black_clipping: -2.8,
            max_iterations: 20,
            metric: MetricKind::Hfr,
            strategy: SearchStrategy::CalibrateThenBracket,
            step: PRESET_STEP_SIZES[0],
            initial_offset: 0,
            probe_direction: false,
            failure_policy: FailurePolicy::LeaveInPlace,
            max_sample_retries: 2,
        }
    }
}

impl SearchConfiguration {
    /// Reject configurations that must never reach the hardware
    pub fn validate(&self) -> Result<(), LensAfError> {
        self.step.validate()?;

        if self.max_iterations == 0 {
            return Err(LensAfError::InvalidConfig(
                "max_iterations must be positive".to_string(),
            ));
        }
        if !self.exposure_time.is_finite() || self.exposure_time <= 0.0 {
            return Err(LensAfError::InvalidConfig(format!(
                "exposure_time must be a positive number of seconds, got {}",
                self.exposure_time
            )));
        }
        if !self.stretch_factor.is_finite() || !self.black_clipping.is_finite() {
            return Err(LensAfError::InvalidConfig(
                "stretch_factor and black_clipping must be finite".to_string(),
            ));
        }

        Ok(())
    }
}

/// Outcome of one search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub succeeded: bool,
    /// In iteration order, one per analyzed frame
    pub samples: Vec<FocusSample>,
    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
    pub finished_at: DateTime<Local>,
    pub step_size_description: String,
    /// Iteration the lens was left at, when the search succeeded
    pub best_iteration: Option<usize>,
    /// Lens offset after the final drive
    pub final_offset: i64,
}

impl SearchResult {
    pub fn best_sample(&self) -> Option<&FocusSample> {
        self.best_iteration.and_then(|i| self.samples.get(i))
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom("elapsed must be a non-negative number"));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_ordering() {
        assert!(MetricKind::Hfr.is_better(1.5, 2.0));
        assert!(MetricKind::Hfr.is_worse(2.5, 2.0));
        assert!(MetricKind::Contrast.is_better(0.8, 0.5));
        assert!(MetricKind::Contrast.is_worse(0.2, 0.5));

        // Equal values are neither better nor worse
        assert!(!MetricKind::Hfr.is_better(2.0, 2.0));
        assert!(!MetricKind::Hfr.is_worse(2.0, 2.0));

        assert!(!MetricKind::Hfr.is_worse(f64::NAN, 2.0));
        assert!(!MetricKind::Contrast.is_better(f64::NAN, 2.0));
    }

    #[test]
    fn test_direction() {
        assert_eq!(FocusDirection::Near.opposite(), FocusDirection::Far);
        assert_eq!(FocusDirection::Near.sign() + FocusDirection::Far.sign(), 0);
    }

    #[test]
    fn test_default_configuration_is_valid() {
        assert!(SearchConfiguration::default().validate().is_ok());
    }

    #[test]
    fn test_configuration_validation() {
        let zero_step = SearchConfiguration {
            step: StepSize::new(0, 0, FineSign::Positive),
            ..Default::default()
        };
        assert!(matches!(
            zero_step.validate(),
            Err(LensAfError::InvalidConfig(_))
        ));

        let no_iterations = SearchConfiguration {
            max_iterations: 0,
            ..Default::default()
        };
        assert!(no_iterations.validate().is_err());

        let bad_exposure = SearchConfiguration {
            exposure_time: -1.0,
            ..Default::default()
        };
        assert!(bad_exposure.validate().is_err());
    }

    #[test]
    fn test_result_serializes_elapsed_as_seconds() {
        let result = SearchResult {
            succeeded: true,
            samples: vec![],
            elapsed: Duration::from_millis(1500),
            finished_at: Local::now(),
            step_size_description: "0 coarse, 1 fine".to_string(),
            best_iteration: None,
            final_offset: 0,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["elapsed"], 1.5);

        let back: SearchResult = serde_json::from_value(json).unwrap();
        assert_eq!(back.elapsed, Duration::from_millis(1500));
    }
}
