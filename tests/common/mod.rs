//! Common test doubles for climate_export tests
//!
//! Provides:
//! - A fast-polling configuration rooted in a temporary directory
//! - [`ScriptedRaster`], an in-memory raster whose reported size and
//!   transfer failures are scripted per test
//! - [`RecordingRemote`], a remote exporter that remembers every submission

#![allow(dead_code)]

use climate_export::config::ExportConfig;
use climate_export::errors::{ExportError, Result};
use climate_export::geometry::Bounds;
use climate_export::provider::{
    DeferredQuery, JobHandle, RasterHandle, RemoteExportTask, RemoteExporter, RemoteSource,
};
use climate_export::raster::{write_geotiff, MemoryRaster, RasterGrid, DEFAULT_NODATA};
use ndarray::Array2;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Default configuration with short waits, rooted at `root`
pub fn test_config(root: &Path) -> ExportConfig {
    ExportConfig {
        file_wait_timeout_ms: 200,
        file_poll_interval_ms: 10,
        ..ExportConfig::with_root(root)
    }
}

/// `width × height` grid over `bounds` with values `row * width + col`
pub fn sample_grid(width: usize, height: usize, bounds: Bounds) -> RasterGrid {
    let data = Array2::from_shape_fn((height, width), |(r, c)| (r * width + c) as f32);
    RasterGrid::covering(&bounds, data, DEFAULT_NODATA).expect("valid sample grid")
}

/// 8 × 8 grid over lon 0..8, lat 40..48
pub fn small_grid() -> RasterGrid {
    sample_grid(8, 8, Bounds::new(0.0, 40.0, 8.0, 48.0).expect("valid bounds"))
}

/// In-memory raster with scripted size reporting and failures
#[derive(Debug)]
pub struct ScriptedRaster {
    inner: MemoryRaster,
    declared_dims: Option<Vec<(u64, u64)>>,
    dims_unavailable: bool,
    bounds_unavailable: bool,
    fail_whole: bool,
    fail_all: bool,
    fail_regions: Vec<Bounds>,
    write_nothing: bool,
    write_garbage: bool,
    resampled_regions: Vec<Bounds>,
    downloads: Mutex<Vec<Bounds>>,
}

impl ScriptedRaster {
    pub fn new(grid: RasterGrid) -> Self {
        Self {
            inner: MemoryRaster::new(grid),
            declared_dims: None,
            dims_unavailable: false,
            bounds_unavailable: false,
            fail_whole: false,
            fail_all: false,
            fail_regions: Vec::new(),
            write_nothing: false,
            write_garbage: false,
            resampled_regions: Vec::new(),
            downloads: Mutex::new(Vec::new()),
        }
    }

    /// Report these band dimensions instead of the real ones
    pub fn declaring(mut self, width: u64, height: u64) -> Self {
        self.declared_dims = Some(vec![(width, height)]);
        self
    }

    pub fn without_dimensions(mut self) -> Self {
        self.dims_unavailable = true;
        self
    }

    pub fn without_bounds(mut self) -> Self {
        self.bounds_unavailable = true;
        self
    }

    /// Reject transfers of the whole raster
    pub fn failing_whole(mut self) -> Self {
        self.fail_whole = true;
        self
    }

    /// Reject every transfer
    pub fn failing_all(mut self) -> Self {
        self.fail_all = true;
        self
    }

    /// Reject transfers of exactly `region`
    pub fn failing_region(mut self, region: Bounds) -> Self {
        self.fail_regions.push(region);
        self
    }

    /// Accept transfers but never produce a file
    pub fn writing_nothing(mut self) -> Self {
        self.write_nothing = true;
        self
    }

    /// Accept transfers but write bytes no GeoTIFF reader accepts
    pub fn writing_garbage(mut self) -> Self {
        self.write_garbage = true;
        self
    }

    /// Write `region` at half the pixel size of the rest of the raster
    pub fn resampling_region(mut self, region: Bounds) -> Self {
        self.resampled_regions.push(region);
        self
    }

    pub fn downloads(&self) -> Vec<Bounds> {
        self.downloads.lock().expect("downloads lock").clone()
    }

    pub fn full_bounds(&self) -> Bounds {
        self.inner.grid().bounds()
    }
}

impl RasterHandle for ScriptedRaster {
    fn band_dimensions(&self) -> Result<Vec<(u64, u64)>> {
        if self.dims_unavailable {
            return Err(ExportError::Generic("band dimensions unavailable".to_string()));
        }
        match &self.declared_dims {
            Some(dims) => Ok(dims.clone()),
            None => self.inner.band_dimensions(),
        }
    }

    fn bounds(&self) -> Result<Bounds> {
        if self.bounds_unavailable {
            return Err(ExportError::Generic("footprint unavailable".to_string()));
        }
        self.inner.bounds()
    }

    fn download(&self, region: &Bounds, scale: f64, crs: &str, dest: &Path) -> Result<()> {
        self.downloads.lock().expect("downloads lock").push(*region);
        let whole = region.approx_eq(&self.full_bounds(), 1e-9);
        if self.fail_all || (self.fail_whole && whole) {
            return Err(ExportError::TransferFailed("transfer rejected".to_string()));
        }
        if self.fail_regions.iter().any(|r| r.approx_eq(region, 1e-9)) {
            return Err(ExportError::TransferFailed("chunk rejected".to_string()));
        }
        if self.write_nothing {
            return Ok(());
        }
        if self.write_garbage {
            fs::write(dest, b"not a GeoTIFF")?;
            return Ok(());
        }
        if self.resampled_regions.iter().any(|r| r.approx_eq(region, 1e-9)) {
            let clipped = self.inner.grid().clip(region)?;
            let (rows, cols) = clipped.data().dim();
            let fine = Array2::from_shape_fn((rows * 2, cols * 2), |(r, c)| {
                clipped.data()[[r / 2, c / 2]]
            });
            let grid = RasterGrid::covering(&clipped.bounds(), fine, clipped.nodata())?;
            return write_geotiff(dest, &grid);
        }
        self.inner.download(region, scale, crs, dest)
    }
}

/// What a remote submission carried
#[derive(Debug, Clone, PartialEq)]
pub enum Submitted {
    Raster,
    Deferred(DeferredQuery),
}

/// Remote exporter that records submissions
#[derive(Debug, Default)]
pub struct RecordingRemote {
    fail: bool,
    submissions: Mutex<Vec<(Submitted, RemoteExportTask)>>,
}

impl RecordingRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Self::default()
        })
    }

    pub fn submissions(&self) -> Vec<(Submitted, RemoteExportTask)> {
        self.submissions.lock().expect("submissions lock").clone()
    }
}

impl RemoteExporter for RecordingRemote {
    fn submit(&self, source: RemoteSource, task: &RemoteExportTask) -> Result<JobHandle> {
        if self.fail {
            return Err(ExportError::RemoteSubmissionFailed(
                "remote service unavailable".to_string(),
            ));
        }
        let submitted = match source {
            RemoteSource::Raster(_) => Submitted::Raster,
            RemoteSource::Deferred(query) => Submitted::Deferred(query),
        };
        let mut submissions = self.submissions.lock().expect("submissions lock");
        submissions.push((submitted, task.clone()));
        Ok(JobHandle {
            id: format!("job-{}", submissions.len()),
        })
    }
}
