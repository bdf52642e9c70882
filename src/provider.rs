//! Interfaces to the external collaborators
//!
//! The pipeline never computes raster values itself. It consumes:
//!
//! - [`RasterHandle`]: a lazily evaluated raster that can report its size and
//!   transfer any sub-region of itself to a local file
//! - [`AnalysisProvider`]: computes rasters and spatial means for a region
//! - [`YearlyRasterProvider`]: yields the raster for one year of a batch
//! - [`RemoteExporter`]: queues fire-and-forget remote export jobs

use crate::errors::Result;
use crate::geometry::{Bounds, Geometry};
use crate::request::TableRow;
use crate::status::{ProgressEvent, Severity, StatusReporter};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Handle to a raster held by the analysis provider
pub trait RasterHandle: Send + Sync + fmt::Debug {
    /// Pixel `(width, height)` of every band
    ///
    /// # Errors
    ///
    /// Returns an error when the provider cannot report band dimensions.
    fn band_dimensions(&self) -> Result<Vec<(u64, u64)>>;

    /// Bounding rectangle of the raster footprint
    ///
    /// # Errors
    ///
    /// Returns an error when the footprint cannot be computed.
    fn bounds(&self) -> Result<Bounds>;

    /// Ground area of the bounding rectangle in km²
    ///
    /// # Errors
    ///
    /// Returns an error when the footprint cannot be computed.
    fn area_km2(&self) -> Result<f64> {
        Ok(self.bounds()?.geodesic_area_km2())
    }

    /// Native coordinate reference system
    ///
    /// # Errors
    ///
    /// Returns an error when the projection cannot be queried.
    fn crs(&self) -> Result<String> {
        Ok("EPSG:4326".to_string())
    }

    /// Transfer the part of the raster inside `region` to `dest` as GeoTIFF
    ///
    /// The file may appear asynchronously after this returns; callers wait
    /// for it with a bounded poll.
    ///
    /// # Errors
    ///
    /// Returns an error when the transfer is rejected or fails.
    fn download(&self, region: &Bounds, scale: f64, crs: &str, dest: &Path) -> Result<()>;
}

/// Computes index rasters and their spatial means
pub trait AnalysisProvider: Send + Sync {
    /// Compute `index` from `dataset` over `geometry` for `[start, end]`
    ///
    /// # Errors
    ///
    /// Returns [`crate::ExportError::NoDataAvailable`] when the dataset has no
    /// matching data, or any provider error.
    fn compute_raster(
        &self,
        geometry: &Geometry,
        dataset: &str,
        index: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Arc<dyn RasterHandle>>;

    /// Spatial mean of `raster` over `geometry`
    ///
    /// # Errors
    ///
    /// Returns any provider error.
    fn compute_scalar(&self, raster: &dyn RasterHandle, geometry: &Geometry) -> Result<f64>;
}

/// Yields the raster for one year of a multi-year export
pub trait YearlyRasterProvider: Send + Sync {
    /// `None` means nothing is available for `year`
    fn raster_for_year(&self, year: i32) -> Option<Arc<dyn RasterHandle>>;
}

impl<F> YearlyRasterProvider for F
where
    F: Fn(i32) -> Option<Arc<dyn RasterHandle>> + Send + Sync,
{
    fn raster_for_year(&self, year: i32) -> Option<Arc<dyn RasterHandle>> {
        self(year)
    }
}

/// Calendar-year date range `YYYY-01-01 ..= YYYY-12-31`
#[must_use]
pub fn year_date_range(year: i32) -> Option<(NaiveDate, NaiveDate)> {
    Some((
        NaiveDate::from_ymd_opt(year, 1, 1)?,
        NaiveDate::from_ymd_opt(year, 12, 31)?,
    ))
}

/// Per-year rasters computed on demand by an [`AnalysisProvider`]
pub struct AnalysisYearlySource {
    provider: Arc<dyn AnalysisProvider>,
    geometry: Geometry,
    dataset: String,
    index: String,
}

impl AnalysisYearlySource {
    pub fn new(
        provider: Arc<dyn AnalysisProvider>,
        geometry: Geometry,
        dataset: impl Into<String>,
        index: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            geometry,
            dataset: dataset.into(),
            index: index.into(),
        }
    }
}

impl YearlyRasterProvider for AnalysisYearlySource {
    fn raster_for_year(&self, year: i32) -> Option<Arc<dyn RasterHandle>> {
        let (start, end) = year_date_range(year)?;
        match self
            .provider
            .compute_raster(&self.geometry, &self.dataset, &self.index, start, end)
        {
            Ok(raster) => Some(raster),
            Err(e) => {
                warn!(year, dataset = %self.dataset, index = %self.index, error = %e, "No raster for year");
                None
            }
        }
    }
}

/// Build `{year, value}` rows by averaging each year's raster over `geometry`
///
/// Years that fail are skipped with a warning event.
pub fn collect_temporal_rows(
    provider: &dyn AnalysisProvider,
    geometry: &Geometry,
    dataset: &str,
    index: &str,
    start_year: i32,
    end_year: i32,
    status: &dyn StatusReporter,
) -> Vec<TableRow> {
    let mut rows = Vec::new();
    for year in start_year..=end_year {
        let Some((start, end)) = year_date_range(year) else {
            continue;
        };
        let value = provider
            .compute_raster(geometry, dataset, index, start, end)
            .and_then(|raster| provider.compute_scalar(raster.as_ref(), geometry));
        match value {
            Ok(value) if value.is_finite() => {
                debug!(year, value, "Computed temporal value");
                rows.push(TableRow { year, value });
            }
            Ok(_) => status.report(&ProgressEvent::with_severity(
                format!("Warning: year {year} produced a non-finite mean and was skipped"),
                Severity::Warning,
            )),
            Err(e) => status.report(&ProgressEvent::with_severity(
                format!("Warning: error processing year {year}: {e}"),
                Severity::Warning,
            )),
        }
    }
    rows
}

/// File format requested from a remote job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteFileFormat {
    GeoTIFF,
    NetCDF,
}

/// Computation a remote job should run when no raster handle exists locally
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredQuery {
    pub dataset: String,
    pub index: String,
    pub year: i32,
}

/// What a remote job exports
#[derive(Debug, Clone)]
pub enum RemoteSource {
    /// An already computed raster
    Raster(Arc<dyn RasterHandle>),
    /// A raster the remote side computes itself
    Deferred(DeferredQuery),
}

/// Parameters of one remote export job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteExportTask {
    pub description: String,
    pub folder: String,
    pub name_prefix: String,
    pub crs: String,
    pub scale: f64,
    pub max_pixels: u64,
    pub file_format: RemoteFileFormat,
}

/// Identifier of a submitted remote job
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobHandle {
    pub id: String,
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// Queues remote export jobs; completion is never polled
pub trait RemoteExporter: Send + Sync {
    /// Submit one job and return immediately
    ///
    /// # Errors
    ///
    /// Returns [`crate::ExportError::RemoteSubmissionFailed`] or any transport
    /// error if the job could not be queued.
    fn submit(&self, source: RemoteSource, task: &RemoteExportTask) -> Result<JobHandle>;
}
