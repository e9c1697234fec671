//! Step sizes
//!
//! A step is a bundle of coarse and fine EVF drive commands issued together.
//! Fine commands may run against the drive direction, which lets a profile
//! express "one coarse step minus five fine steps".

use crate::errors::LensAfError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of the fine commands relative to the drive direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FineSign {
    Positive,
    Negative,
}

/// Upper bound on coarse plus fine commands in one step
pub const MAX_STEP_COMMANDS: u64 = 1000;

/// How far one drive moves the lens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepSize {
    pub coarse: u32,
    pub fine: u32,
    pub fine_sign: FineSign,
}

impl StepSize {
    pub const fn new(coarse: u32, fine: u32, fine_sign: FineSign) -> Self {
        Self {
            coarse,
            fine,
            fine_sign,
        }
    }

    /// Build from a signed fine count; negative runs the fine steps backwards
    pub const fn from_signed(coarse: u32, fine: i32) -> Self {
        let fine_sign = if fine < 0 {
            FineSign::Negative
        } else {
            FineSign::Positive
        };
        Self::new(coarse, fine.unsigned_abs(), fine_sign)
    }

    pub fn signed_fine(&self) -> i64 {
        match self.fine_sign {
            FineSign::Positive => self.fine as i64,
            FineSign::Negative => -(self.fine as i64),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.coarse == 0 && self.fine == 0
    }

    /// Commands one drive of this step sends
    pub fn command_count(&self) -> u64 {
        self.coarse as u64 + self.fine as u64
    }

    pub fn validate(&self) -> Result<(), LensAfError> {
        if self.is_zero() {
            return Err(LensAfError::InvalidConfig(
                "step size must move the lens (coarse and fine are both zero)".to_string(),
            ));
        }
        if self.command_count() > MAX_STEP_COMMANDS {
            return Err(LensAfError::InvalidConfig(format!(
                "step size {} sends more than {} commands per drive",
                self, MAX_STEP_COMMANDS
            )));
        }
        Ok(())
    }
}

impl fmt::Display for StepSize {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} coarse, {} fine", self.coarse, self.signed_fine())
    }
}

/// Built-in profiles, indices 0..=7
pub const PRESET_STEP_SIZES: [StepSize; 8] = [
    StepSize::from_signed(0, 1),
    StepSize::from_signed(0, 3),
    StepSize::from_signed(0, 5),
    StepSize::from_signed(1, -5),
    StepSize::from_signed(1, -3),
    StepSize::from_signed(1, 0),
    StepSize::from_signed(1, 3),
    StepSize::from_signed(1, 5),
];

/// Index of the first user-editable profile
pub const FIRST_CUSTOM_INDEX: u32 = PRESET_STEP_SIZES.len() as u32;

/// The two user-editable profiles behind indices 8 and 9
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomProfiles {
    pub first: StepSize,
    pub second: StepSize,
}

impl Default for CustomProfiles {
    fn default() -> Self {
        Self {
            first: StepSize::from_signed(0, 2),
            second: StepSize::from_signed(1, 0),
        }
    }
}

impl CustomProfiles {
    /// Replace the profile behind a custom index
    pub fn update(&mut self, index: u32, step: StepSize) -> Result<(), LensAfError> {
        step.validate()?;
        match index.checked_sub(FIRST_CUSTOM_INDEX) {
            Some(0) => self.first = step,
            Some(1) => self.second = step,
            _ => {
                return Err(LensAfError::InvalidConfig(format!(
                    "step profile {} is not a custom profile",
                    index
                )))
            }
        }
        log::debug!("Custom step profile {} set to {}", index, step);
        Ok(())
    }
}

/// Resolve a user-facing profile index to a step size
pub fn select_step_size(index: u32, custom: &CustomProfiles) -> Result<StepSize, LensAfError> {
    if let Some(step) = PRESET_STEP_SIZES.get(index as usize) {
        return Ok(*step);
    }
    match index - FIRST_CUSTOM_INDEX {
        0 => Ok(custom.first),
        1 => Ok(custom.second),
        _ => Err(LensAfError::InvalidConfig(format!(
            "unknown step profile {} (expected 0-{})",
            index,
            FIRST_CUSTOM_INDEX + 1
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_are_valid() {
        for step in PRESET_STEP_SIZES {
            assert!(step.validate().is_ok(), "{} should be valid", step);
        }
    }

    #[test]
    fn test_preset_table() {
        let custom = CustomProfiles::default();
        let step = select_step_size(3, &custom).unwrap();
        assert_eq!(step.coarse, 1);
        assert_eq!(step.fine, 5);
        assert_eq!(step.fine_sign, FineSign::Negative);

        let step = select_step_size(5, &custom).unwrap();
        assert_eq!(step, StepSize::new(1, 0, FineSign::Positive));
    }

    #[test]
    fn test_custom_profiles() {
        let mut custom = CustomProfiles::default();
        assert_eq!(select_step_size(8, &custom).unwrap(), StepSize::from_signed(0, 2));
        assert_eq!(select_step_size(9, &custom).unwrap(), StepSize::from_signed(1, 0));

        custom.update(9, StepSize::from_signed(2, -1)).unwrap();
        assert_eq!(select_step_size(9, &custom).unwrap().signed_fine(), -1);

        assert!(custom.update(4, StepSize::from_signed(0, 1)).is_err());
        assert!(select_step_size(10, &custom).is_err());
    }

    #[test]
    fn test_zero_step_rejected() {
        let step = StepSize::new(0, 0, FineSign::Negative);
        assert!(step.is_zero());
        assert!(step.validate().is_err());
    }

    #[test]
    fn test_oversized_step_rejected() {
        let step = StepSize::new(u32::MAX, u32::MAX, FineSign::Positive);
        assert_eq!(step.command_count(), 2 * u32::MAX as u64);
        assert!(step.validate().is_err());

        assert!(StepSize::new(600, 400, FineSign::Negative).validate().is_ok());
        assert!(StepSize::new(600, 401, FineSign::Negative).validate().is_err());

        let mut custom = CustomProfiles::default();
        assert!(custom.update(8, step).is_err());
        assert!(custom.update(8, StepSize::new(0, 0, FineSign::Positive)).is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(StepSize::from_signed(1, -3).to_string(), "1 coarse, -3 fine");
        assert_eq!(StepSize::from_signed(0, 5).to_string(), "0 coarse, 5 fine");
    }
}
