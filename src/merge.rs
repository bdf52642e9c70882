//! Re-assembly of tiles and year files
//!
//! Two merges are supported:
//!
//! - **Spatial mosaic**: GeoTIFF tiles on a common pixel size are placed on
//!   the grid of their union extent. Later tiles win where they overlap, but
//!   only with valid pixels, so a tile's nodata border never erases data.
//! - **Time-axis concatenation**: single-year NetCDF grids are stacked into
//!   one `(year, lat, lon)` file sorted by year. Files that cannot be opened
//!   or that sit on a different grid are dropped with a warning.
//!
//! Both merges overwrite their destination, so running them twice on the
//! same inputs yields the same file.

use crate::errors::{ExportError, Result};
use crate::geometry::Bounds;
use crate::netcdf_io::{read_year_grid, write_year_stack, GriddedMetadata, YearGrid};
use crate::raster::{read_geotiff, write_geotiff, GeoTransform, RasterGrid};
use ndarray::{s, Array2, Array3, Zip};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Relative tolerance when comparing pixel sizes
const PIXEL_SIZE_TOLERANCE: f64 = 1e-6;

/// Result of a spatial mosaic
#[derive(Debug, Clone, PartialEq)]
pub struct MosaicSummary {
    pub tiles_merged: usize,
    pub width: usize,
    pub height: usize,
    pub bounds: Bounds,
}

/// Result of a time-axis concatenation
#[derive(Debug, Clone, PartialEq)]
pub struct ConcatSummary {
    /// Years present in the output, ascending
    pub years: Vec<i32>,
    /// Years left out, with the reason
    pub dropped: Vec<(i32, String)>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RasterMerger;

impl RasterMerger {
    pub const fn new() -> Self {
        Self
    }

    /// Mosaic every existing file in `tiles` into `dest`
    ///
    /// # Errors
    ///
    /// - [`ExportError::NoTilesAvailable`] when none of `tiles` exists
    /// - [`ExportError::MergeFailed`] when a tile cannot be read or the
    ///   pixel sizes disagree
    pub fn mosaic(&self, tiles: &[PathBuf], dest: &Path) -> Result<MosaicSummary> {
        let present: Vec<&PathBuf> = tiles.iter().filter(|p| p.is_file()).collect();
        if present.is_empty() {
            return Err(ExportError::NoTilesAvailable);
        }

        let grids = present
            .iter()
            .map(|path| {
                read_geotiff(path).map_err(|e| {
                    ExportError::MergeFailed(format!("cannot read tile {}: {e}", path.display()))
                })
            })
            .collect::<Result<Vec<RasterGrid>>>()?;

        let reference = *grids[0].transform();
        for (grid, path) in grids.iter().zip(&present).skip(1) {
            let t = grid.transform();
            if !same_size(t.pixel_width, reference.pixel_width)
                || !same_size(t.pixel_height, reference.pixel_height)
            {
                return Err(ExportError::MergeFailed(format!(
                    "tile {} has pixel size {} x {}, expected {} x {}",
                    path.display(),
                    t.pixel_width,
                    t.pixel_height,
                    reference.pixel_width,
                    reference.pixel_height
                )));
            }
        }

        let union = grids
            .iter()
            .skip(1)
            .fold(grids[0].bounds(), |acc, g| acc.union(&g.bounds()));
        let width = (union.width() / reference.pixel_width).round().max(1.0) as usize;
        let height = (union.height() / reference.pixel_height).round().max(1.0) as usize;
        let nodata = grids[0].nodata();

        let mut data = Array2::from_elem((height, width), nodata);
        for grid in &grids {
            let t = grid.transform();
            let col0 = ((t.origin_x - union.min_x) / reference.pixel_width).round() as usize;
            let row0 = ((union.max_y - t.origin_y) / reference.pixel_height).round() as usize;
            let rows = grid.height().min(height.saturating_sub(row0));
            let cols = grid.width().min(width.saturating_sub(col0));
            let target = data.slice_mut(s![row0..row0 + rows, col0..col0 + cols]);
            let source = grid.data().slice(s![..rows, ..cols]);
            let tile_nodata = grid.nodata();
            Zip::from(target)
                .and(source)
                .for_each(|out, &value| {
                    if value.is_finite() && value != tile_nodata {
                        *out = value;
                    }
                });
        }

        let transform = GeoTransform {
            origin_x: union.min_x,
            origin_y: union.max_y,
            pixel_width: reference.pixel_width,
            pixel_height: reference.pixel_height,
        };
        let merged = RasterGrid::new(data, transform, nodata)?;
        write_geotiff(dest, &merged)
            .map_err(|e| ExportError::MergeFailed(format!("cannot write mosaic: {e}")))?;

        info!(
            tiles = grids.len(),
            width,
            height,
            dest = %dest.display(),
            "Merged tiles"
        );
        Ok(MosaicSummary {
            tiles_merged: grids.len(),
            width,
            height,
            bounds: merged.bounds(),
        })
    }

    /// Stack single-year NetCDF files into one file with a leading `year` axis
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::MergeFailed`] when no file could be used, or
    /// any error writing `dest`.
    pub fn concat_years(
        &self,
        year_files: &[(i32, PathBuf)],
        dest: &Path,
        metadata: &GriddedMetadata,
    ) -> Result<ConcatSummary> {
        let mut ordered: Vec<&(i32, PathBuf)> = year_files.iter().collect();
        ordered.sort_by_key(|(year, _)| *year);

        let mut accepted: Vec<(i32, YearGrid)> = Vec::with_capacity(ordered.len());
        let mut dropped = Vec::new();
        for (year, path) in ordered {
            if accepted.iter().any(|(y, _)| y == year) {
                warn!(year, path = %path.display(), "Duplicate year file skipped");
                dropped.push((*year, "duplicate year".to_string()));
                continue;
            }
            match read_year_grid(path) {
                Ok(grid) => {
                    if let Some((_, first)) = accepted.first() {
                        if !first.same_grid(&grid) {
                            warn!(year, path = %path.display(), "Year file grid differs, skipped");
                            dropped.push((*year, "grid differs from first year".to_string()));
                            continue;
                        }
                    }
                    debug!(year, path = %path.display(), "Opened year file");
                    accepted.push((*year, grid));
                }
                Err(e) => {
                    warn!(year, path = %path.display(), error = %e, "Cannot open year file, skipped");
                    dropped.push((*year, e.to_string()));
                }
            }
        }

        let Some((_, first)) = accepted.first() else {
            return Err(ExportError::MergeFailed(
                "no year file could be opened".to_string(),
            ));
        };
        let (lat, lon, nodata) = (first.lat.clone(), first.lon.clone(), first.nodata);

        let mut stack = Array3::from_elem((accepted.len(), lat.len(), lon.len()), nodata);
        for (i, (_, grid)) in accepted.iter().enumerate() {
            stack.slice_mut(s![i, .., ..]).assign(&grid.data);
        }
        let years: Vec<i32> = accepted.iter().map(|(year, _)| *year).collect();

        write_year_stack(dest, &years, &lat, &lon, &stack, nodata, metadata)?;
        info!(
            years = years.len(),
            dropped = dropped.len(),
            dest = %dest.display(),
            "Concatenated year files"
        );
        Ok(ConcatSummary { years, dropped })
    }
}

fn same_size(a: f64, b: f64) -> bool {
    (a - b).abs() <= PIXEL_SIZE_TOLERANCE * a.abs().max(b.abs())
}
