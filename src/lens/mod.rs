//! Lens drive layer
//!
//! Camera bodies expose manual focus as relative EVF drive commands in three
//! strengths per direction and give no position feedback. This module turns
//! those commands into the [`StepDriver`] the search loop consumes, and into a
//! position-tracking focuser for direct moves.
//!
//! The SDK itself sits behind [`LensBackend`]; commands return before the
//! motor has finished, so every drive here ends with a settle delay.

pub mod catalog;

use crate::focus::{CancellationToken, DriveError, FineSign, FocusDirection, StepDriver, StepSize};
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::Duration;

pub use catalog::{FocalLengthPosition, LensCatalog, LensFocusProfile};

/// EVF drive command, level 1 = fine, 2 = coarse, 3 = maximal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LensCommand {
    Near1,
    Near2,
    Near3,
    Far1,
    Far2,
    Far3,
}

impl LensCommand {
    pub fn fine(direction: FocusDirection) -> Self {
        match direction {
            FocusDirection::Near => LensCommand::Near1,
            FocusDirection::Far => LensCommand::Far1,
        }
    }

    pub fn coarse(direction: FocusDirection) -> Self {
        match direction {
            FocusDirection::Near => LensCommand::Near2,
            FocusDirection::Far => LensCommand::Far2,
        }
    }

    pub fn maximal(direction: FocusDirection) -> Self {
        match direction {
            FocusDirection::Near => LensCommand::Near3,
            FocusDirection::Far => LensCommand::Far3,
        }
    }

    pub fn direction(self) -> FocusDirection {
        match self {
            LensCommand::Near1 | LensCommand::Near2 | LensCommand::Near3 => FocusDirection::Near,
            LensCommand::Far1 | LensCommand::Far2 | LensCommand::Far3 => FocusDirection::Far,
        }
    }

    pub fn level(self) -> u8 {
        match self {
            LensCommand::Near1 | LensCommand::Far1 => 1,
            LensCommand::Near2 | LensCommand::Far2 => 2,
            LensCommand::Near3 | LensCommand::Far3 => 3,
        }
    }
}

/// Vendor SDK seam: send one drive command, return immediately
pub trait LensBackend {
    fn send(&mut self, command: LensCommand) -> Result<(), DriveError>;
}

impl<T: LensBackend + ?Sized> LensBackend for Box<T> {
    fn send(&mut self, command: LensCommand) -> Result<(), DriveError> {
        (**self).send(command)
    }
}

/// Delays and calibration travel for a lens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriveTiming {
    /// Wait after each search step
    pub settle_delay: Duration,
    /// Maximal commands issued to reach the end stop
    pub calibration_moves: u32,
    /// Wait after each calibration command
    pub calibration_settle: Duration,
    /// Wait after each single command of a direct move
    pub command_delay: Duration,
}

impl Default for DriveTiming {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(500),
            calibration_moves: 5,
            calibration_settle: Duration::from_millis(750),
            command_delay: Duration::from_millis(100),
        }
    }
}

impl DriveTiming {
    /// No waiting at all, for simulated lenses
    pub fn immediate() -> Self {
        Self {
            settle_delay: Duration::ZERO,
            calibration_moves: 5,
            calibration_settle: Duration::ZERO,
            command_delay: Duration::ZERO,
        }
    }
}

fn pause(delay: Duration) {
    if !delay.is_zero() {
        thread::sleep(delay);
    }
}

/// Expand a step into the command sequence for one drive
pub fn step_commands(direction: FocusDirection, step: StepSize) -> Vec<LensCommand> {
    let fine_direction = match step.fine_sign {
        FineSign::Positive => direction,
        FineSign::Negative => direction.opposite(),
    };
    let mut commands = Vec::with_capacity(step.coarse as usize + step.fine as usize);
    commands.extend((0..step.coarse).map(|_| LensCommand::coarse(direction)));
    commands.extend((0..step.fine).map(|_| LensCommand::fine(fine_direction)));
    commands
}

/// [`StepDriver`] over raw EVF commands
pub struct EvfStepDriver<B> {
    backend: B,
    timing: DriveTiming,
}

impl<B: LensBackend> EvfStepDriver<B> {
    pub fn new(backend: B, timing: DriveTiming) -> Self {
        Self { backend, timing }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn into_backend(self) -> B {
        self.backend
    }
}

impl<B: LensBackend> StepDriver for EvfStepDriver<B> {
    fn drive(&mut self, direction: FocusDirection, step: StepSize) -> Result<(), DriveError> {
        let mut outcome = Ok(());
        for command in step_commands(direction, step) {
            if let Err(e) = self.backend.send(command) {
                outcome = Err(e);
                break;
            }
        }
        // Earlier commands may still be moving the motor
        pause(self.timing.settle_delay);
        outcome
    }

    fn drive_to_end(&mut self, direction: FocusDirection) -> Result<(), DriveError> {
        log::debug!(
            "Calibrating lens: {} x {:?}",
            self.timing.calibration_moves,
            LensCommand::maximal(direction)
        );
        for _ in 0..self.timing.calibration_moves {
            self.backend.send(LensCommand::maximal(direction))?;
            pause(self.timing.calibration_settle);
        }
        Ok(())
    }
}

/// Absolute-position focuser built from single fine commands.
///
/// Position counts fine steps and grows toward far, so moving to a smaller
/// position drives near. It is only meaningful after [`ManualFocuser::calibrate`].
pub struct ManualFocuser<B> {
    backend: B,
    timing: DriveTiming,
    position: i64,
    stop_position: i64,
    moving: bool,
}

impl<B: LensBackend> ManualFocuser<B> {
    pub fn new(backend: B, timing: DriveTiming, stop_position: i64) -> Self {
        Self {
            backend,
            timing,
            position: stop_position,
            stop_position,
            moving: false,
        }
    }

    pub fn position(&self) -> i64 {
        self.position
    }

    pub fn is_moving(&self) -> bool {
        self.moving
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn send(&mut self, command: LensCommand, delay: Duration) -> Result<(), DriveError> {
        let result = self.backend.send(command);
        pause(delay);
        result
    }

    /// Move to `target` one fine step at a time. Stops at the first rejected
    /// command and leaves the position where the lens was last driven.
    pub fn move_to(&mut self, target: i64, cancel: &CancellationToken) -> Result<(), DriveError> {
        self.moving = true;
        let result = self.step_towards(target, cancel);
        self.moving = false;
        result
    }

    fn step_towards(&mut self, target: i64, cancel: &CancellationToken) -> Result<(), DriveError> {
        let (command, delta) = if self.position > target {
            (LensCommand::Near1, -1)
        } else {
            (LensCommand::Far1, 1)
        };

        while self.position != target {
            if cancel.is_cancelled() {
                return Err(DriveError::Cancelled);
            }
            if let Err(e) = self.send(command, self.timing.command_delay) {
                log::debug!("Focus move stopped at {}: {}", self.position, e);
                return Err(e);
            }
            self.position += delta;
        }
        Ok(())
    }

    /// Run into the far end stop, back off one coarse step, then move to the
    /// stored position for the mounted lens if there is one.
    pub fn calibrate(
        &mut self,
        stored_position: Option<i64>,
        cancel: &CancellationToken,
    ) -> Result<(), DriveError> {
        self.moving = true;
        let result = self.run_calibration(cancel);
        self.moving = false;
        result?;

        match stored_position {
            Some(target) if target > 0 => {
                log::info!("Moving lens to stored focus position {}", target);
                self.move_to(target, cancel)
            }
            _ => Ok(()),
        }
    }

    fn run_calibration(&mut self, cancel: &CancellationToken) -> Result<(), DriveError> {
        for _ in 0..self.timing.calibration_moves {
            self.send(LensCommand::Far3, self.timing.calibration_settle)?;
            if cancel.is_cancelled() {
                return Err(DriveError::Cancelled);
            }
        }
        self.send(LensCommand::Near2, self.timing.calibration_settle)?;
        if cancel.is_cancelled() {
            return Err(DriveError::Cancelled);
        }
        self.position = self.stop_position;
        log::info!("Lens calibrated, position reset to {}", self.position);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct LogBackend {
        sent: Vec<LensCommand>,
        reject_after: Option<usize>,
    }

    impl LensBackend for LogBackend {
        fn send(&mut self, command: LensCommand) -> Result<(), DriveError> {
            if let Some(limit) = self.reject_after {
                if self.sent.len() >= limit {
                    return Err(DriveError::Rejected("busy".to_string()));
                }
            }
            self.sent.push(command);
            Ok(())
        }
    }

    #[test]
    fn test_step_commands_mixed() {
        let commands = step_commands(FocusDirection::Near, StepSize::from_signed(1, -2));
        assert_eq!(
            commands,
            vec![LensCommand::Near2, LensCommand::Far1, LensCommand::Far1]
        );

        let commands = step_commands(FocusDirection::Far, StepSize::from_signed(0, 3));
        assert_eq!(commands, vec![LensCommand::Far1; 3]);
    }

    #[test]
    fn test_step_commands_at_command_limit() {
        let step = StepSize::from_signed(700, -300);
        assert!(step.validate().is_ok());

        let commands = step_commands(FocusDirection::Near, step);
        assert_eq!(commands.len() as u64, crate::focus::MAX_STEP_COMMANDS);
        assert_eq!(commands[699], LensCommand::Near2);
        assert_eq!(commands[700], LensCommand::Far1);
    }

    #[test]
    fn test_command_levels() {
        assert_eq!(LensCommand::maximal(FocusDirection::Far), LensCommand::Far3);
        assert_eq!(LensCommand::Near2.level(), 2);
        assert_eq!(LensCommand::Far1.direction(), FocusDirection::Far);
    }

    #[test]
    fn test_evf_driver_calibration() {
        let mut driver = EvfStepDriver::new(LogBackend::default(), DriveTiming::immediate());
        driver.drive_to_end(FocusDirection::Far).unwrap();
        assert_eq!(driver.backend().sent, vec![LensCommand::Far3; 5]);
    }

    #[test]
    fn test_evf_driver_reports_rejection() {
        let backend = LogBackend {
            sent: vec![],
            reject_after: Some(1),
        };
        let mut driver = EvfStepDriver::new(backend, DriveTiming::immediate());
        let result = driver.drive(FocusDirection::Near, StepSize::from_signed(1, 3));
        assert!(matches!(result, Err(DriveError::Rejected(_))));
        assert_eq!(driver.backend().sent, vec![LensCommand::Near2]);
    }

    #[test]
    fn test_manual_focuser_moves() {
        let mut focuser = ManualFocuser::new(LogBackend::default(), DriveTiming::immediate(), 100);
        let cancel = CancellationToken::new();

        focuser.move_to(97, &cancel).unwrap();
        assert_eq!(focuser.position(), 97);
        assert_eq!(focuser.backend().sent, vec![LensCommand::Near1; 3]);

        focuser.move_to(99, &cancel).unwrap();
        assert_eq!(focuser.position(), 99);
        assert!(!focuser.is_moving());
    }

    #[test]
    fn test_manual_focuser_cancel() {
        let mut focuser = ManualFocuser::new(LogBackend::default(), DriveTiming::immediate(), 0);
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(focuser.move_to(10, &cancel), Err(DriveError::Cancelled));
        assert_eq!(focuser.position(), 0);
    }

    #[test]
    fn test_manual_focuser_calibrates_then_moves_to_stored_position() {
        let mut focuser = ManualFocuser::new(LogBackend::default(), DriveTiming::immediate(), 50);
        let cancel = CancellationToken::new();
        focuser.move_to(40, &cancel).unwrap();

        focuser.calibrate(Some(45), &cancel).unwrap();
        assert_eq!(focuser.position(), 45);

        let sent = &focuser.backend().sent;
        let calibration_start = 10;
        assert_eq!(sent[calibration_start..calibration_start + 5], [LensCommand::Far3; 5]);
        assert_eq!(sent[calibration_start + 5], LensCommand::Near2);
        assert_eq!(sent.len(), calibration_start + 6 + 5);
    }
}
