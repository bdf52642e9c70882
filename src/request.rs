//! Export requests and their terminal outcomes

use crate::batch::BatchProgress;
use crate::provider::{JobHandle, RasterHandle, RemoteFileFormat, YearlyRasterProvider};
use crate::status::Severity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Kind of artifact an export produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExportFormat {
    /// GeoTIFF raster
    Raster,
    /// CSV time series
    Table,
    /// NetCDF grid or year stack
    GriddedTimeSeries,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 3] = [Self::Raster, Self::Table, Self::GriddedTimeSeries];

    /// Top-level directory under the export root
    #[must_use]
    pub const fn dir_name(self) -> &'static str {
        match self {
            Self::Raster => "GeoTIFF",
            Self::Table => "CSV",
            Self::GriddedTimeSeries => "NetCDF",
        }
    }

    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Raster => "tif",
            Self::Table => "csv",
            Self::GriddedTimeSeries => "nc",
        }
    }

    /// Category used when none is given or it is "unknown"
    #[must_use]
    pub const fn default_category(self) -> &'static str {
        match self {
            Self::Raster => "raster_data",
            Self::Table => "tabular_data",
            Self::GriddedTimeSeries => "climate_data",
        }
    }

    /// Format requested from remote jobs
    #[must_use]
    pub const fn remote_file_format(self) -> RemoteFileFormat {
        match self {
            Self::GriddedTimeSeries => RemoteFileFormat::NetCDF,
            Self::Raster | Self::Table => RemoteFileFormat::GeoTIFF,
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Temporal extent of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportScope {
    Single { year: i32 },
    AllYears { start_year: i32, end_year: i32 },
}

/// One `{year, value}` row of a scalar time series
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TableRow {
    pub year: i32,
    pub value: f64,
}

impl TableRow {
    pub const fn new(year: i32, value: f64) -> Self {
        Self { year, value }
    }
}

/// What a request exports
#[derive(Clone)]
pub enum ExportSource {
    Raster(Arc<dyn RasterHandle>),
    Yearly(Arc<dyn YearlyRasterProvider>),
    Table(Vec<TableRow>),
}

impl fmt::Debug for ExportSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raster(raster) => f.debug_tuple("Raster").field(raster).finish(),
            Self::Yearly(_) => f.write_str("Yearly(..)"),
            Self::Table(rows) => write!(f, "Table({} rows)", rows.len()),
        }
    }
}

/// An immutable description of one export
#[derive(Debug, Clone)]
pub struct ExportRequest {
    format: ExportFormat,
    scope: ExportScope,
    dataset: String,
    index: String,
    source: ExportSource,
    parameter: Option<String>,
    units: Option<String>,
    name: Option<String>,
}

impl ExportRequest {
    /// Export one raster for one year
    pub fn single_raster(
        format: ExportFormat,
        dataset: impl Into<String>,
        index: impl Into<String>,
        year: i32,
        raster: Arc<dyn RasterHandle>,
    ) -> Self {
        Self::new(
            format,
            ExportScope::Single { year },
            dataset,
            index,
            ExportSource::Raster(raster),
        )
    }

    /// Export every year in `start_year..=end_year`
    pub fn all_years(
        format: ExportFormat,
        dataset: impl Into<String>,
        index: impl Into<String>,
        start_year: i32,
        end_year: i32,
        provider: Arc<dyn YearlyRasterProvider>,
    ) -> Self {
        Self::new(
            format,
            ExportScope::AllYears {
                start_year,
                end_year,
            },
            dataset,
            index,
            ExportSource::Yearly(provider),
        )
    }

    /// Export a scalar time series as CSV
    pub fn table(
        scope: ExportScope,
        dataset: impl Into<String>,
        index: impl Into<String>,
        rows: Vec<TableRow>,
    ) -> Self {
        Self::new(
            ExportFormat::Table,
            scope,
            dataset,
            index,
            ExportSource::Table(rows),
        )
    }

    fn new(
        format: ExportFormat,
        scope: ExportScope,
        dataset: impl Into<String>,
        index: impl Into<String>,
        source: ExportSource,
    ) -> Self {
        Self {
            format,
            scope,
            dataset: dataset.into(),
            index: index.into(),
            source,
            parameter: None,
            units: None,
            name: None,
        }
    }

    /// Use `name` instead of a generated one
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Human-readable parameter, e.g. "Precipitation"
    #[must_use]
    pub fn with_parameter(mut self, parameter: impl Into<String>) -> Self {
        self.parameter = Some(parameter.into());
        self
    }

    #[must_use]
    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = Some(units.into());
        self
    }

    pub fn format(&self) -> ExportFormat {
        self.format
    }

    pub fn scope(&self) -> ExportScope {
        self.scope
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    pub fn source(&self) -> &ExportSource {
        &self.source
    }

    pub fn parameter(&self) -> Option<&str> {
        self.parameter.as_deref()
    }

    pub fn units(&self) -> Option<&str> {
        self.units.as_deref()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// `<dataset>/<index>`, the folder handed to the path resolver
    pub fn logical_folder(&self) -> String {
        format!("{}/{}", self.dataset, self.index)
    }

    /// The explicit name, or one generated from the request and `now`
    pub fn export_name(&self, now: DateTime<Utc>) -> String {
        if let Some(name) = self.name.as_deref().filter(|n| !n.trim().is_empty()) {
            return name.to_string();
        }
        let timestamp = now.format("%Y%m%d_%H%M%S");
        match self.scope {
            ExportScope::Single { year } => {
                format!("{}_{}_{}_{}", self.dataset, self.index, year, timestamp)
            }
            ExportScope::AllYears {
                start_year,
                end_year,
            } => format!(
                "{}_{}_{}_{}_{}",
                self.dataset, self.index, start_year, end_year, timestamp
            ),
        }
    }
}

/// Delivery tier that produced an outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Tier {
    Direct,
    Chunked,
    Remote,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Direct => "direct",
            Self::Chunked => "chunked",
            Self::Remote => "remote",
        })
    }
}

/// How many chunks of a chunked export produced tiles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkAccounting {
    pub succeeded: usize,
    pub total: usize,
}

impl fmt::Display for ChunkAccounting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of {} chunks", self.succeeded, self.total)
    }
}

/// Terminal result of an export request
///
/// Built once by the component that finished the request; the consuming
/// `with_*` methods are only used while assembling it.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportOutcome {
    succeeded: bool,
    partial: bool,
    artifacts: Vec<PathBuf>,
    size_bytes: u64,
    message: String,
    tier: Option<Tier>,
    attempted: Vec<Tier>,
    chunks: Option<ChunkAccounting>,
    remote_jobs: Vec<JobHandle>,
    warnings: Vec<String>,
    batch: Option<BatchProgress>,
}

impl ExportOutcome {
    /// Successful outcome reached at `tier`
    pub fn success(tier: Option<Tier>, message: impl Into<String>) -> Self {
        Self {
            succeeded: true,
            partial: false,
            artifacts: Vec::new(),
            size_bytes: 0,
            message: message.into(),
            tier,
            attempted: Vec::new(),
            chunks: None,
            remote_jobs: Vec::new(),
            warnings: Vec::new(),
            batch: None,
        }
    }

    /// Failed outcome
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            ..Self::success(None, message)
        }
    }

    /// Attach artifact paths; their on-disk sizes are summed
    #[must_use]
    pub fn with_artifacts(mut self, artifacts: Vec<PathBuf>) -> Self {
        self.size_bytes = artifacts.iter().map(|p| file_size(p)).sum();
        self.artifacts = artifacts;
        self
    }

    #[must_use]
    pub fn with_attempted(mut self, attempted: Vec<Tier>) -> Self {
        self.attempted = attempted;
        self
    }

    #[must_use]
    pub fn with_chunks(mut self, chunks: ChunkAccounting) -> Self {
        self.chunks = Some(chunks);
        self
    }

    #[must_use]
    pub fn with_remote_jobs(mut self, jobs: Vec<JobHandle>) -> Self {
        self.remote_jobs = jobs;
        self
    }

    #[must_use]
    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }

    #[must_use]
    pub fn with_batch(mut self, batch: BatchProgress) -> Self {
        self.batch = Some(batch);
        self
    }

    /// Mark a successful outcome as only partially complete
    #[must_use]
    pub fn partial(mut self) -> Self {
        self.partial = true;
        self
    }

    pub fn succeeded(&self) -> bool {
        self.succeeded
    }

    pub fn is_partial(&self) -> bool {
        self.partial
    }

    pub fn artifacts(&self) -> &[PathBuf] {
        &self.artifacts
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn tier(&self) -> Option<Tier> {
        self.tier
    }

    /// Tiers entered, in order
    pub fn attempted_tiers(&self) -> &[Tier] {
        &self.attempted
    }

    pub fn chunks(&self) -> Option<ChunkAccounting> {
        self.chunks
    }

    pub fn remote_jobs(&self) -> &[JobHandle] {
        &self.remote_jobs
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn batch(&self) -> Option<&BatchProgress> {
        self.batch.as_ref()
    }

    /// Severity a reporter should use for the final message
    pub fn severity(&self) -> Severity {
        if !self.succeeded {
            Severity::Error
        } else if self.partial || !self.warnings.is_empty() {
            Severity::Warning
        } else {
            Severity::Success
        }
    }
}

impl fmt::Display for ExportOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

fn file_size(path: &Path) -> u64 {
    fs::metadata(path)
        .map(|m| if m.is_file() { m.len() } else { 0 })
        .unwrap_or(0)
}
