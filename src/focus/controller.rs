//! Focus search controller
//!
//! One call to [`run_search`] owns the sample history and walks a small
//! per-run state machine:
//!
//! ```text
//! Idle -> Calibrating -> Stepping -> Finalizing -> Done
//! ```
//!
//! The controller keeps no state between calls. Guarding against two runs on
//! the same lens is the caller's job (see `runner::AutofocusRunner`).

use super::collaborators::{CancellationToken, FrameSampler, ResultSink, SampleError, StepDriver};
use super::{
    FailurePolicy, FocusDirection, FocusSample, MetricKind, SearchConfiguration, SearchResult,
    SearchStrategy,
};
use crate::errors::LensAfError;
use chrono::Local;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SearchPhase {
    Idle,
    Calibrating,
    Stepping,
    Finalizing,
    Done,
}

#[derive(Debug, Clone, PartialEq)]
enum Outcome {
    Focused { rest_at: usize },
    NotFocused,
    Cancelled,
    Faulted(String),
}

/// Run one focus search.
///
/// Only configuration errors are returned as `Err`, and those are raised
/// before the lens moves. Every other ending (success, cancellation, stuck
/// metric, detector fault) produces a [`SearchResult`] that has already been
/// handed to `sink`.
pub fn run_search<D, S, R>(
    config: &SearchConfiguration,
    cancel: &CancellationToken,
    driver: &mut D,
    sampler: &mut S,
    sink: &mut R,
) -> Result<SearchResult, LensAfError>
where
    D: StepDriver + ?Sized,
    S: FrameSampler + ?Sized,
    R: ResultSink + ?Sized,
{
    config.validate()?;

    log::info!(
        "Starting autofocus: {:?} on {}, step {}, {} iterations",
        config.strategy,
        config.metric.label(),
        config.step,
        config.max_iterations
    );

    let started = Instant::now();
    let mut run = SearchRun {
        config,
        cancel,
        driver,
        sampler,
        samples: Vec::new(),
        offset: 0,
        phase: SearchPhase::Idle,
    };

    let outcome = run.execute();
    let best_iteration = match &outcome {
        Outcome::Focused { rest_at } => Some(*rest_at),
        Outcome::Faulted(reason) => {
            log::error!("Autofocus aborted: {}", reason);
            run.recover();
            None
        }
        Outcome::NotFocused => {
            log::warn!(
                "Autofocus did not find a focus point after {} samples",
                run.samples.len()
            );
            run.recover();
            None
        }
        Outcome::Cancelled => {
            log::info!("Autofocus cancelled after {} samples", run.samples.len());
            None
        }
    };
    run.enter(SearchPhase::Done);

    let result = SearchResult {
        succeeded: best_iteration.is_some(),
        samples: run.samples,
        elapsed: started.elapsed(),
        finished_at: Local::now(),
        step_size_description: config.step.to_string(),
        best_iteration,
        final_offset: run.offset,
    };

    if let Some(best) = result.best_sample() {
        log::info!(
            "Autofocus finished at iteration {} ({} {:.3}) in {:.1}s",
            best.iteration,
            config.metric.label(),
            best.metric,
            result.elapsed.as_secs_f64()
        );
    }

    if let Err(e) = sink.write(config, &result) {
        log::error!("Failed to write autofocus report: {}", e);
    }

    Ok(result)
}

/// Zero means the detector found nothing to measure
fn is_usable(metric: f64) -> bool {
    metric != 0.0 && metric.is_finite()
}

/// Index of the best usable sample. Earliest wins ties; readings of exactly
/// zero and non-finite readings are skipped as detector failures.
pub fn best_sample_index(metric: MetricKind, samples: &[FocusSample]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, sample) in samples.iter().enumerate() {
        if !is_usable(sample.metric) {
            continue;
        }
        match best {
            Some(b) if !metric.is_better(sample.metric, samples[b].metric) => {}
            _ => best = Some(i),
        }
    }
    best
}

/// Steps taken after the best sample of a full sweep, i.e. how far to drive
/// back toward the far end to return to it.
pub fn backtrack_steps(metric: MetricKind, samples: &[FocusSample]) -> Option<usize> {
    best_sample_index(metric, samples).map(|best| samples.len() - 1 - best)
}

struct SearchRun<'a, D: ?Sized, S: ?Sized> {
    config: &'a SearchConfiguration,
    cancel: &'a CancellationToken,
    driver: &'a mut D,
    sampler: &'a mut S,
    samples: Vec<FocusSample>,
    offset: i64,
    phase: SearchPhase,
}

impl<D, S> SearchRun<'_, D, S>
where
    D: StepDriver + ?Sized,
    S: FrameSampler + ?Sized,
{
    fn enter(&mut self, phase: SearchPhase) {
        log::trace!("Autofocus phase {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    fn execute(&mut self) -> Outcome {
        if self.cancel.is_cancelled() {
            return Outcome::Cancelled;
        }

        self.enter(SearchPhase::Calibrating);
        if let Err(e) = self.driver.drive_to_end(FocusDirection::Far) {
            log::warn!("Calibration drive failed, continuing: {}", e);
        }
        self.offset = 0;

        for _ in 0..self.config.initial_offset {
            if self.cancel.is_cancelled() {
                return Outcome::Cancelled;
            }
            self.drive(FocusDirection::Near);
        }

        self.enter(SearchPhase::Stepping);
        match self.config.strategy {
            SearchStrategy::CalibrateThenBracket => self.bracket(),
            SearchStrategy::CalibrateThenSampleAllThenBacktrack => self.sample_all(),
        }
    }

    fn bracket(&mut self) -> Outcome {
        let metric = self.config.metric;
        let mut direction = FocusDirection::Near;

        for iteration in 0..=self.config.max_iterations as usize {
            if self.cancel.is_cancelled() {
                return Outcome::Cancelled;
            }

            self.drive(direction);
            if let Err(outcome) = self.sample() {
                return outcome;
            }

            let newest = self.samples[iteration].metric;
            if !is_usable(newest) {
                log::debug!("Iteration {} has no usable reading, continuing", iteration);
                continue;
            }
            let previous = match self.last_usable_before(iteration) {
                Some(previous) => previous,
                None => continue,
            };

            if self.config.probe_direction && iteration == 1 {
                if metric.is_worse(newest, previous) {
                    log::debug!("Second sample is worse, lens is too close; reversing");
                    direction = direction.opposite();
                } else {
                    log::debug!("Second sample is not worse, lens is too far; continuing");
                }
                continue;
            }

            if metric.is_worse(newest, previous) {
                log::debug!(
                    "{} degraded at iteration {} ({:.3} -> {:.3})",
                    metric.label(),
                    iteration,
                    previous,
                    newest
                );
                self.enter(SearchPhase::Finalizing);
                // Earliest best so far, so a flat top rests where it began
                let rest_at = best_sample_index(metric, &self.samples[..iteration])
                    .unwrap_or(iteration - 1);
                self.return_to(self.samples[rest_at].offset);
                return Outcome::Focused { rest_at };
            }
        }

        Outcome::NotFocused
    }

    fn sample_all(&mut self) -> Outcome {
        for _ in 0..self.config.max_iterations {
            if self.cancel.is_cancelled() {
                return Outcome::Cancelled;
            }

            self.drive(FocusDirection::Near);
            if let Err(outcome) = self.sample() {
                return outcome;
            }
        }

        self.enter(SearchPhase::Finalizing);
        match best_sample_index(self.config.metric, &self.samples) {
            Some(best) => {
                log::debug!(
                    "Best of {} samples is iteration {}, driving back {} steps",
                    self.samples.len(),
                    best,
                    self.samples.len() - 1 - best
                );
                self.return_to(self.samples[best].offset);
                Outcome::Focused { rest_at: best }
            }
            None => Outcome::NotFocused,
        }
    }

    /// Apply the configured failure policy after a run that did not focus
    fn recover(&mut self) {
        if self.config.failure_policy != FailurePolicy::ReturnToBest {
            return;
        }
        self.enter(SearchPhase::Finalizing);
        if let Some(best) = best_sample_index(self.config.metric, &self.samples) {
            log::info!("Returning lens to best sample (iteration {})", best);
            self.return_to(self.samples[best].offset);
        }
    }

    /// Newest usable reading among the first `end` samples
    fn last_usable_before(&self, end: usize) -> Option<f64> {
        self.samples[..end]
            .iter()
            .rev()
            .map(|s| s.metric)
            .find(|&m| is_usable(m))
    }

    fn drive(&mut self, direction: FocusDirection) {
        // The offset tracks the commanded position; a failed drive shows up
        // as an unimproved metric on the next sample.
        self.offset += direction.sign();
        if let Err(e) = self.driver.drive(direction, self.config.step) {
            log::warn!("Drive {:?} failed, continuing: {}", direction, e);
        }
        log::trace!("Moved focus {:?}, offset {}", direction, self.offset);
    }

    fn return_to(&mut self, target: i64) {
        let direction = if target < self.offset {
            FocusDirection::Far
        } else {
            FocusDirection::Near
        };
        while self.offset != target {
            self.drive(direction);
        }
    }

    fn sample(&mut self) -> Result<(), Outcome> {
        let mut retries = 0;
        loop {
            match self.sampler.next_sample(self.config) {
                Ok(measurement) => {
                    let sample = FocusSample {
                        iteration: self.samples.len(),
                        offset: self.offset,
                        metric: measurement.metric,
                        star_count: match self.config.metric {
                            MetricKind::Hfr => measurement.star_count,
                            MetricKind::Contrast => None,
                        },
                    };
                    log::debug!(
                        "Iteration {}: {} {:.3} at offset {}",
                        sample.iteration,
                        self.config.metric.label(),
                        sample.metric,
                        sample.offset
                    );
                    self.samples.push(sample);
                    return Ok(());
                }
                Err(SampleError::Cancelled) => return Err(Outcome::Cancelled),
                Err(SampleError::Transient(msg)) if retries < self.config.max_sample_retries => {
                    retries += 1;
                    log::warn!("Frame capture failed ({}), retry {}", msg, retries);
                    if self.cancel.is_cancelled() {
                        return Err(Outcome::Cancelled);
                    }
                }
                Err(SampleError::Transient(msg)) => {
                    return Err(Outcome::Faulted(format!(
                        "frame capture failed {} times: {}",
                        retries + 1,
                        msg
                    )))
                }
                Err(SampleError::Detector(msg)) => return Err(Outcome::Faulted(msg)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::focus::StepSize;
    use crate::testing::{MemorySink, RecordingDriver, ScriptedSampler};

    fn hfr_samples(values: &[f64]) -> Vec<FocusSample> {
        values
            .iter()
            .enumerate()
            .map(|(i, &metric)| FocusSample {
                iteration: i,
                offset: i as i64 + 1,
                metric,
                star_count: Some(10),
            })
            .collect()
    }

    #[test]
    fn test_final_focus_point_of_known_sweep() {
        let samples = hfr_samples(&[
            8.345345345,
            1.72384,
            2.2342344,
            3.5345345,
            5.345345345,
            6.345345345,
            8.345345345,
        ]);
        assert_eq!(best_sample_index(MetricKind::Hfr, &samples), Some(1));
        assert_eq!(backtrack_steps(MetricKind::Hfr, &samples), Some(5));
    }

    #[test]
    fn test_best_index_skips_zero_and_prefers_earliest() {
        let samples = hfr_samples(&[0.0, 3.0, 2.0, 0.0, 2.0, 4.0]);
        assert_eq!(best_sample_index(MetricKind::Hfr, &samples), Some(2));

        let samples = hfr_samples(&[0.0, 0.0]);
        assert_eq!(best_sample_index(MetricKind::Hfr, &samples), None);

        let samples = hfr_samples(&[0.2, 0.9, 0.9, 0.1]);
        assert_eq!(best_sample_index(MetricKind::Contrast, &samples), Some(1));
    }

    #[test]
    fn test_phase_ends_done() {
        let config = SearchConfiguration {
            max_iterations: 3,
            ..Default::default()
        };
        let mut driver = RecordingDriver::new();
        let mut sampler = ScriptedSampler::hfr(&[5.0, 4.0, 6.0]);
        let mut sink = MemorySink::new();

        let result = run_search(
            &config,
            &CancellationToken::new(),
            &mut driver,
            &mut sampler,
            &mut sink,
        )
        .unwrap();

        assert!(result.succeeded);
        assert_eq!(result.best_iteration, Some(1));
        assert_eq!(result.final_offset, 2);
        assert_eq!(driver.net_offset(), 2);
        assert_eq!(result.step_size_description, StepSize::from_signed(0, 1).to_string());
    }

    #[test]
    fn test_invalid_configuration_never_touches_hardware() {
        let config = SearchConfiguration {
            step: StepSize::from_signed(0, 0),
            ..Default::default()
        };
        let mut driver = RecordingDriver::new();
        let mut sampler = ScriptedSampler::hfr(&[1.0]);
        let mut sink = MemorySink::new();

        let result = run_search(
            &config,
            &CancellationToken::new(),
            &mut driver,
            &mut sampler,
            &mut sink,
        );

        assert!(matches!(result, Err(LensAfError::InvalidConfig(_))));
        assert!(driver.moves().is_empty());
        assert_eq!(driver.calibrations(), 0);
        assert_eq!(sampler.calls(), 0);
        assert!(sink.writes().is_empty());
    }
}
