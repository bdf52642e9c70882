//! Pixel-count estimation for tier selection

use crate::config::ExportConfig;
use crate::errors::{ExportError, Result};
use crate::provider::RasterHandle;
use tracing::debug;

/// How a [`SizeEstimate`] was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstimateMethod {
    /// Sum of the real band dimensions
    Exact,
    /// Footprint area divided by the nominal pixel area
    Approximate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeEstimate {
    pub pixel_count: u64,
    pub method: EstimateMethod,
}

/// Decides whether a raster is small enough for a direct transfer
#[derive(Debug, Clone, Copy)]
pub struct SizeEstimator {
    max_pixels: u64,
    nominal_pixel_area_km2: f64,
}

impl SizeEstimator {
    #[must_use]
    pub const fn new(max_pixels: u64, nominal_pixel_area_km2: f64) -> Self {
        Self {
            max_pixels,
            nominal_pixel_area_km2,
        }
    }

    #[must_use]
    pub fn from_config(config: &ExportConfig) -> Self {
        Self::new(config.max_pixels_direct, config.nominal_pixel_area_km2())
    }

    /// Estimate the pixel count of `raster`
    ///
    /// Exact when the handle reports band dimensions, otherwise approximated
    /// from the footprint area.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::SizeEstimationFailed`] when neither method works.
    pub fn estimate(&self, raster: &dyn RasterHandle) -> Result<SizeEstimate> {
        let exact_error = match raster.band_dimensions() {
            Ok(bands) if !bands.is_empty() => {
                let pixel_count = bands
                    .iter()
                    .fold(0u64, |acc, &(w, h)| acc.saturating_add(w.saturating_mul(h)));
                debug!(pixel_count, bands = bands.len(), "Exact size estimate");
                return Ok(SizeEstimate {
                    pixel_count,
                    method: EstimateMethod::Exact,
                });
            }
            Ok(_) => "raster reports no bands".to_string(),
            Err(e) => e.to_string(),
        };

        let area = raster.area_km2().map_err(|e| {
            ExportError::SizeEstimationFailed(format!(
                "band dimensions unavailable ({exact_error}); area unavailable ({e})"
            ))
        })?;
        if !(area.is_finite() && area >= 0.0 && self.nominal_pixel_area_km2 > 0.0) {
            return Err(ExportError::SizeEstimationFailed(format!(
                "band dimensions unavailable ({exact_error}); unusable area {area} km²"
            )));
        }
        let pixel_count = (area / self.nominal_pixel_area_km2).round() as u64;
        debug!(pixel_count, area_km2 = area, "Approximate size estimate");
        Ok(SizeEstimate {
            pixel_count,
            method: EstimateMethod::Approximate,
        })
    }

    #[must_use]
    pub const fn is_oversized(&self, estimate: &SizeEstimate) -> bool {
        estimate.pixel_count > self.max_pixels
    }

    /// Oversized decision where a failed estimate counts as oversized
    pub fn assess(&self, raster: &dyn RasterHandle) -> (bool, Result<SizeEstimate>) {
        let estimate = self.estimate(raster);
        let oversized = estimate.as_ref().map_or(true, |e| self.is_oversized(e));
        (oversized, estimate)
    }

    #[must_use]
    pub const fn max_pixels(&self) -> u64 {
        self.max_pixels
    }
}
