//! Local raster grids and GeoTIFF files

mod geotiff;
mod grid;

pub use geotiff::{read_geotiff, write_geotiff};
pub use grid::{GeoTransform, RasterGrid, DEFAULT_NODATA};

use crate::errors::Result;
use crate::geometry::Bounds;
use crate::provider::RasterHandle;
use std::path::Path;
use tracing::debug;

/// A [`RasterHandle`] backed by an in-memory grid
///
/// Transfers clip the grid to the requested region and write it at native
/// resolution; the requested scale and CRS are recorded in the log only.
#[derive(Debug, Clone)]
pub struct MemoryRaster {
    grid: RasterGrid,
}

impl MemoryRaster {
    pub fn new(grid: RasterGrid) -> Self {
        Self { grid }
    }

    #[must_use]
    pub fn grid(&self) -> &RasterGrid {
        &self.grid
    }
}

impl RasterHandle for MemoryRaster {
    fn band_dimensions(&self) -> Result<Vec<(u64, u64)>> {
        Ok(vec![(self.grid.width() as u64, self.grid.height() as u64)])
    }

    fn bounds(&self) -> Result<Bounds> {
        Ok(self.grid.bounds())
    }

    fn download(&self, region: &Bounds, scale: f64, crs: &str, dest: &Path) -> Result<()> {
        let clipped = self.grid.clip(region)?;
        debug!(
            region = %region,
            scale,
            crs,
            width = clipped.width(),
            height = clipped.height(),
            dest = %dest.display(),
            "Writing in-memory raster region"
        );
        write_geotiff(dest, &clipped)
    }
}
