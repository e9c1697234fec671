//! Synthetic star fields
//!
//! Renders a regular grid of Gaussian stars on a flat sky with optional
//! seeded Gaussian noise, close enough to a defocused live-view frame for the
//! metrics to behave as they do on real data.

use crate::metrics::Frame;
use image::{ImageBuffer, Luma};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

/// Gaussian sigma per unit of half-flux radius
const HFR_TO_SIGMA: f64 = 1.0 / 1.1774;

/// Star field layout
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StarFieldSpec {
    pub width: u32,
    pub height: u32,
    /// Distance between star centers; the first star sits half a cell in
    pub grid_spacing: u32,
    pub background: f64,
    pub peak: f64,
    /// Noise sigma in ADU, 0 for clean frames
    pub noise: f64,
    /// Stars are never rendered wider than this HFR so neighbours stay apart
    pub max_hfr: f64,
}

impl Default for StarFieldSpec {
    fn default() -> Self {
        Self {
            width: 192,
            height: 192,
            grid_spacing: 64,
            background: 1000.0,
            peak: 20000.0,
            noise: 0.0,
            max_hfr: 6.0,
        }
    }
}

impl StarFieldSpec {
    pub fn star_count(&self) -> u32 {
        (self.width / self.grid_spacing) * (self.height / self.grid_spacing)
    }
}

/// Render one frame with every star at half-flux radius `hfr`.
///
/// `seed` selects the noise pattern; equal seeds give identical frames.
pub fn synthetic_star_frame(spec: &StarFieldSpec, hfr: f64, seed: u64) -> Frame {
    let sigma = hfr.clamp(0.5, spec.max_hfr) * HFR_TO_SIGMA;
    let two_sigma_sq = 2.0 * sigma * sigma;
    let spacing = spec.grid_spacing.max(1);
    let half = spacing as f64 / 2.0;
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = if spec.noise > 0.0 {
        Normal::new(0.0, spec.noise).ok()
    } else {
        None
    };

    ImageBuffer::from_fn(spec.width, spec.height, |x, y| {
        // Nearest star only; the grid keeps the others far away
        let cx = (x / spacing) as f64 * spacing as f64 + half;
        let cy = (y / spacing) as f64 * spacing as f64 + half;
        let r2 = (x as f64 - cx).powi(2) + (y as f64 - cy).powi(2);

        let mut value = spec.background + spec.peak * (-r2 / two_sigma_sq).exp();
        if let Some(noise) = &noise {
            value += noise.sample(&mut rng);
        }
        Luma([value.round().clamp(0.0, u16::MAX as f64) as u16])
    })
}
