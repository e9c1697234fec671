//! Stored focus positions per lens and focal length

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FocalLengthPosition {
    pub focal_length: f64,
    pub focus_position: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LensFocusProfile {
    pub lens_name: String,
    #[serde(default)]
    pub positions: Vec<FocalLengthPosition>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LensCatalog {
    pub lenses: Vec<LensFocusProfile>,
}

impl LensCatalog {
    pub fn new(lenses: Vec<LensFocusProfile>) -> Self {
        Self { lenses }
    }

    pub fn lens(&self, lens_name: &str) -> Option<&LensFocusProfile> {
        self.lenses.iter().find(|l| l.lens_name == lens_name)
    }

    /// Register a lens with no stored positions. Returns true if it was new.
    pub fn add_lens_if_missing(&mut self, lens_name: &str) -> bool {
        if self.lens(lens_name).is_some() {
            return false;
        }
        log::info!("Adding lens {} to focus catalog", lens_name);
        self.lenses.push(LensFocusProfile {
            lens_name: lens_name.to_string(),
            positions: Vec::new(),
        });
        true
    }

    /// Store the focus position for a focal length, replacing any previous one
    pub fn set_position(&mut self, lens_name: &str, focal_length: f64, focus_position: i64) {
        self.add_lens_if_missing(lens_name);
        let Some(lens) = self.lenses.iter_mut().find(|l| l.lens_name == lens_name) else {
            return;
        };
        match lens
            .positions
            .iter_mut()
            .find(|p| p.focal_length == focal_length)
        {
            Some(existing) => existing.focus_position = focus_position,
            None => lens.positions.push(FocalLengthPosition {
                focal_length,
                focus_position,
            }),
        }
    }

    /// Position stored for the nearest focal length. Zoom lenses rarely
    /// report the exact value a position was saved at.
    pub fn focus_position(&self, lens_name: &str, focal_length: f64) -> Option<i64> {
        self.lens(lens_name)?
            .positions
            .iter()
            .filter(|p| p.focus_position > 0)
            .min_by(|a, b| {
                (a.focal_length - focal_length)
                    .abs()
                    .total_cmp(&(b.focal_length - focal_length).abs())
            })
            .map(|p| p.focus_position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_lens_once() {
        let mut catalog = LensCatalog::default();
        assert!(catalog.add_lens_if_missing("EF 135mm f/2L"));
        assert!(!catalog.add_lens_if_missing("EF 135mm f/2L"));
        assert_eq!(catalog.lenses.len(), 1);
    }

    #[test]
    fn test_nearest_focal_length() {
        let mut catalog = LensCatalog::default();
        catalog.set_position("EF 70-200mm", 70.0, 812);
        catalog.set_position("EF 70-200mm", 200.0, 640);
        catalog.set_position("EF 70-200mm", 200.0, 655);

        assert_eq!(catalog.focus_position("EF 70-200mm", 85.0), Some(812));
        assert_eq!(catalog.focus_position("EF 70-200mm", 190.0), Some(655));
        assert_eq!(catalog.focus_position("EF 50mm", 50.0), None);
    }

    #[test]
    fn test_unset_positions_ignored() {
        let mut catalog = LensCatalog::default();
        catalog.set_position("Samyang 14mm", 14.0, 0);
        assert_eq!(catalog.focus_position("Samyang 14mm", 14.0), None);
    }
}
