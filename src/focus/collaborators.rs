//! Contracts between the search loop and the outside world
//!
//! The controller never talks to a camera SDK directly. The host supplies a
//! [`StepDriver`] for lens motion, a [`FrameSampler`] that turns one live-view
//! frame into a metric value, and a [`ResultSink`] that persists the outcome.

use super::{FocusDirection, SearchConfiguration, SearchResult, StepSize};
use crate::errors::LensAfError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Cooperative cancellation flag, settable from any thread
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriveError {
    #[error("lens not connected")]
    NotConnected,
    #[error("lens command rejected: {0}")]
    Rejected(String),
    #[error("lens drive cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SampleError {
    /// The frame stream was cancelled underneath the sampler
    #[error("sampling cancelled")]
    Cancelled,
    /// Capture failed but the next attempt may succeed
    #[error("transient capture failure: {0}")]
    Transient(String),
    /// Image preparation or detection failed
    #[error("detector failure: {0}")]
    Detector(String),
}

/// Metric extracted from one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub metric: f64,
    pub star_count: Option<u32>,
}

impl Measurement {
    pub fn hfr(hfr: f64, star_count: u32) -> Self {
        Self {
            metric: hfr,
            star_count: Some(star_count),
        }
    }

    pub fn contrast(contrast: f64) -> Self {
        Self {
            metric: contrast,
            star_count: None,
        }
    }
}

/// Lens motion. Both calls block until the motor is presumed settled.
pub trait StepDriver {
    fn drive(&mut self, direction: FocusDirection, step: StepSize) -> Result<(), DriveError>;

    /// Run the lens into its mechanical end stop
    fn drive_to_end(&mut self, direction: FocusDirection) -> Result<(), DriveError>;
}

/// Blocks until one frame has been captured and reduced to a metric
pub trait FrameSampler {
    fn next_sample(&mut self, config: &SearchConfiguration) -> Result<Measurement, SampleError>;
}

/// Receives every finished search exactly once
pub trait ResultSink {
    fn write(
        &mut self,
        config: &SearchConfiguration,
        result: &SearchResult,
    ) -> Result<(), LensAfError>;
}

impl<T: StepDriver + ?Sized> StepDriver for Box<T> {
    fn drive(&mut self, direction: FocusDirection, step: StepSize) -> Result<(), DriveError> {
        (**self).drive(direction, step)
    }

    fn drive_to_end(&mut self, direction: FocusDirection) -> Result<(), DriveError> {
        (**self).drive_to_end(direction)
    }
}

impl<T: FrameSampler + ?Sized> FrameSampler for Box<T> {
    fn next_sample(&mut self, config: &SearchConfiguration) -> Result<Measurement, SampleError> {
        (**self).next_sample(config)
    }
}

impl<T: ResultSink + ?Sized> ResultSink for Box<T> {
    fn write(
        &mut self,
        config: &SearchConfiguration,
        result: &SearchResult,
    ) -> Result<(), LensAfError> {
        (**self).write(config, result)
    }
}
