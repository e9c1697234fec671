//! Focus-quality metrics
//!
//! Star half-flux radius and frame contrast over 16-bit grayscale live-view
//! frames. These are what a [`FrameSampler`](crate::focus::FrameSampler)
//! reduces each frame to.

use crate::focus::{Measurement, MetricKind};
use image::{ImageBuffer, Luma};

/// 16-bit grayscale frame
pub type Frame = ImageBuffer<Luma<u16>, Vec<u16>>;

/// Blobs below this many pixels are treated as hot pixels, not stars
pub const MIN_STAR_PIXELS: usize = 3;

/// Default detection threshold in noise sigmas above background
pub const DEFAULT_SENSITIVITY: f64 = 5.0;

const MAD_TO_SIGMA: f64 = 1.4826;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StarAnalysis {
    /// Mean HFR over detected stars in pixels, 0 when nothing was found
    pub hfr: f64,
    pub star_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackgroundStats {
    pub median: f64,
    pub sigma: f64,
}

/// Median background and MAD-derived noise
pub fn background(frame: &Frame) -> BackgroundStats {
    let mut values: Vec<f64> = frame.pixels().map(|p| p.0[0] as f64).collect();
    if values.is_empty() {
        return BackgroundStats {
            median: 0.0,
            sigma: 0.0,
        };
    }
    let median = median_in_place(&mut values);
    for v in values.iter_mut() {
        *v = (*v - median).abs();
    }
    let mad = median_in_place(&mut values);
    BackgroundStats {
        median,
        sigma: mad * MAD_TO_SIGMA,
    }
}

fn median_in_place(values: &mut [f64]) -> f64 {
    let mid = values.len() / 2;
    let (_, m, _) = values.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
    *m
}

/// Detect stars and measure their mean half-flux radius.
///
/// Pixels above `background + sensitivity * sigma` are grouped into
/// 8-connected blobs. Blobs touching the border or smaller than
/// [`MIN_STAR_PIXELS`] are dropped. Each star's HFR is the flux-weighted mean
/// distance from its centroid inside an aperture scaled to the blob size.
pub fn estimate_hfr(frame: &Frame, sensitivity: f64) -> StarAnalysis {
    let (width, height) = frame.dimensions();
    let stats = background(frame);
    // Flat synthetic frames have zero MAD; keep one count of headroom
    let threshold = stats.median + sensitivity * stats.sigma.max(1.0);

    let mut visited = vec![false; (width as usize) * (height as usize)];
    let mut hfr_sum = 0.0;
    let mut star_count = 0u32;

    for y in 0..height {
        for x in 0..width {
            let idx = (y * width + x) as usize;
            if visited[idx] || (frame.get_pixel(x, y).0[0] as f64) <= threshold {
                continue;
            }

            let blob = flood_blob(frame, x, y, threshold, &mut visited);
            if blob.pixels < MIN_STAR_PIXELS || blob.touches_border {
                continue;
            }

            if let Some(hfr) = star_hfr(frame, &blob, stats.median) {
                hfr_sum += hfr;
                star_count += 1;
            }
        }
    }

    log::trace!(
        "Detected {} stars above {:.1} (background {:.1})",
        star_count,
        threshold,
        stats.median
    );

    if star_count == 0 {
        return StarAnalysis {
            hfr: 0.0,
            star_count: 0,
        };
    }

    StarAnalysis {
        hfr: hfr_sum / star_count as f64,
        star_count,
    }
}

struct Blob {
    pixels: usize,
    touches_border: bool,
    centroid_x: f64,
    centroid_y: f64,
}

fn flood_blob(frame: &Frame, x0: u32, y0: u32, threshold: f64, visited: &mut [bool]) -> Blob {
    let (width, height) = frame.dimensions();
    let mut stack = vec![(x0, y0)];
    visited[(y0 * width + x0) as usize] = true;

    let mut pixels = 0usize;
    let mut touches_border = false;
    let mut flux = 0.0;
    let mut sum_x = 0.0;
    let mut sum_y = 0.0;

    while let Some((x, y)) = stack.pop() {
        let value = frame.get_pixel(x, y).0[0] as f64 - threshold;
        pixels += 1;
        flux += value;
        sum_x += value * x as f64;
        sum_y += value * y as f64;
        if x == 0 || y == 0 || x + 1 == width || y + 1 == height {
            touches_border = true;
        }

        for dy in -1i64..=1 {
            for dx in -1i64..=1 {
                let nx = x as i64 + dx;
                let ny = y as i64 + dy;
                if nx < 0 || ny < 0 || nx >= width as i64 || ny >= height as i64 {
                    continue;
                }
                let (nx, ny) = (nx as u32, ny as u32);
                let nidx = (ny * width + nx) as usize;
                if !visited[nidx] && frame.get_pixel(nx, ny).0[0] as f64 > threshold {
                    visited[nidx] = true;
                    stack.push((nx, ny));
                }
            }
        }
    }

    let (centroid_x, centroid_y) = if flux > 0.0 {
        (sum_x / flux, sum_y / flux)
    } else {
        (x0 as f64, y0 as f64)
    };

    Blob {
        pixels,
        touches_border,
        centroid_x,
        centroid_y,
    }
}

fn star_hfr(frame: &Frame, blob: &Blob, background: f64) -> Option<f64> {
    let (width, height) = frame.dimensions();
    let blob_radius = (blob.pixels as f64 / std::f64::consts::PI).sqrt();
    let aperture = (1.5 * blob_radius).max(3.0);

    let x_min = (blob.centroid_x - aperture).floor().max(0.0) as u32;
    let y_min = (blob.centroid_y - aperture).floor().max(0.0) as u32;
    let x_max = ((blob.centroid_x + aperture).ceil() as u32).min(width - 1);
    let y_max = ((blob.centroid_y + aperture).ceil() as u32).min(height - 1);

    let mut flux = 0.0;
    let mut weighted = 0.0;
    for y in y_min..=y_max {
        for x in x_min..=x_max {
            let dx = x as f64 - blob.centroid_x;
            let dy = y as f64 - blob.centroid_y;
            let r = (dx * dx + dy * dy).sqrt();
            if r > aperture {
                continue;
            }
            let value = (frame.get_pixel(x, y).0[0] as f64 - background).max(0.0);
            flux += value;
            weighted += value * r;
        }
    }

    if flux > 0.0 {
        Some(weighted / flux)
    } else {
        None
    }
}

/// Mean absolute Laplacian normalised by the mean frame level.
/// Higher is sharper; a flat or black frame scores 0.
pub fn contrast(frame: &Frame) -> f64 {
    let (width, height) = frame.dimensions();
    if width < 3 || height < 3 {
        return 0.0;
    }

    let mean = frame.pixels().map(|p| p.0[0] as f64).sum::<f64>() / (width * height) as f64;
    if mean <= 0.0 {
        return 0.0;
    }

    let at = |x: u32, y: u32| frame.get_pixel(x, y).0[0] as f64;
    let mut total = 0.0;
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let lap = 4.0 * at(x, y) - at(x - 1, y) - at(x + 1, y) - at(x, y - 1) - at(x, y + 1);
            total += lap.abs();
        }
    }

    total / ((width - 2) * (height - 2)) as f64 / mean
}

/// Reduce a frame to the metric a search runs on
pub fn measure(frame: &Frame, metric: MetricKind, sensitivity: f64) -> Measurement {
    match metric {
        MetricKind::Hfr => {
            let analysis = estimate_hfr(frame, sensitivity);
            Measurement::hfr(analysis.hfr, analysis.star_count)
        }
        MetricKind::Contrast => Measurement::contrast(contrast(frame)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gaussian_frame(sigma: f64) -> Frame {
        let centers = [(20.0, 20.0), (44.0, 20.0), (20.0, 44.0), (44.0, 44.0)];
        ImageBuffer::from_fn(64, 64, |x, y| {
            let mut value = 500.0;
            for (cx, cy) in centers {
                let r2 = (x as f64 - cx).powi(2) + (y as f64 - cy).powi(2);
                value += 20000.0 * (-r2 / (2.0 * sigma * sigma)).exp();
            }
            Luma([value.min(u16::MAX as f64) as u16])
        })
    }

    #[test]
    fn test_background_of_flat_frame() {
        let frame: Frame = ImageBuffer::from_pixel(16, 16, Luma([1200]));
        let stats = background(&frame);
        assert_eq!(stats.median, 1200.0);
        assert_eq!(stats.sigma, 0.0);
    }

    #[test]
    fn test_empty_sky_has_no_stars() {
        let frame: Frame = ImageBuffer::from_pixel(32, 32, Luma([800]));
        let analysis = estimate_hfr(&frame, DEFAULT_SENSITIVITY);
        assert_eq!(analysis.star_count, 0);
        assert_eq!(analysis.hfr, 0.0);
    }

    #[test]
    fn test_hfr_grows_with_blur() {
        let sharp = estimate_hfr(&gaussian_frame(1.2), DEFAULT_SENSITIVITY);
        let soft = estimate_hfr(&gaussian_frame(2.5), DEFAULT_SENSITIVITY);
        assert_eq!(sharp.star_count, 4);
        assert_eq!(soft.star_count, 4);
        assert!(soft.hfr > sharp.hfr, "{} should exceed {}", soft.hfr, sharp.hfr);
    }

    #[test]
    fn test_border_stars_rejected() {
        let frame: Frame = ImageBuffer::from_fn(32, 32, |x, y| {
            let r2 = (x as f64).powi(2) + (y as f64 - 16.0).powi(2);
            Luma([(500.0 + 20000.0 * (-r2 / 4.0).exp()) as u16])
        });
        assert_eq!(estimate_hfr(&frame, DEFAULT_SENSITIVITY).star_count, 0);
    }

    #[test]
    fn test_contrast_prefers_sharp_frames() {
        let sharp = contrast(&gaussian_frame(1.2));
        let soft = contrast(&gaussian_frame(2.5));
        assert!(sharp > soft);

        let black: Frame = ImageBuffer::from_pixel(8, 8, Luma([0]));
        assert_eq!(contrast(&black), 0.0);
    }

    #[test]
    fn test_measure_dispatches_on_metric() {
        let frame = gaussian_frame(1.5);
        let hfr = measure(&frame, MetricKind::Hfr, DEFAULT_SENSITIVITY);
        assert_eq!(hfr.star_count, Some(4));
        let c = measure(&frame, MetricKind::Contrast, DEFAULT_SENSITIVITY);
        assert_eq!(c.star_count, None);
        assert!(c.metric > 0.0);
    }
}
