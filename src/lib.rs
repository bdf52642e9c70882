//! climate_export: tiered delivery of geospatial analysis artifacts
//!
//! A Rust library for exporting climate analysis results (single rasters,
//! per-year raster series and scalar time series) to durable local storage.
//! Exports escalate through delivery strategies as artifacts grow and fall
//! back to a queued remote job when local delivery is not possible.
//!
//! ## Key Features
//!
//! - **Tiered Delivery**: direct transfer, spatial chunking with mosaicking,
//!   then a remote job, each attempted at most once
//! - **Multi-Year Batches**: bounded parallel per-year exports on a Rayon pool
//!   with partial-failure bookkeeping
//! - **Time Series Containers**: per-year NetCDF files concatenated along a
//!   `year` axis
//! - **Large Tables**: CSV splitting into ordered parts with an index file
//! - **Deterministic Layout**: one place decides where every artifact lands
//!
//! ## Module Organization
//!
//! - [`exporter`]: public entry points
//! - [`tiered`]: Direct → Chunked → Remote state machine
//! - [`batch`]: multi-year orchestration
//! - [`estimate`], [`chunking`], [`merge`]: sizing, tiling and re-assembly
//! - [`tabular`]: CSV export
//! - [`paths`]: on-disk layout
//! - [`raster`], [`netcdf_io`]: GeoTIFF and NetCDF I/O
//! - [`provider`]: interfaces to the analysis provider and remote exporter
//! - [`status`]: progress reporting
//! - [`config`], [`logging`], [`errors`]: ambient setup
//!
//! ## Usage
//!
//! ```rust,no_run
//! use climate_export::prelude::*;
//! use std::sync::Arc;
//!
//! # fn run(raster: Arc<dyn RasterHandle>, remote: Arc<dyn RemoteExporter>) -> Result<()> {
//! let config = ExportConfig::from_toml_file("export.toml")?;
//! let exporter = Exporter::new(config, remote)?;
//!
//! let request = ExportRequest::single_raster(ExportFormat::Raster, "ERA5", "Temperature", 2020, raster);
//! let outcome = exporter.export_single(&request, Some(&TracingReporter));
//! println!("{outcome}");
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod chunking;
pub mod config;
pub mod errors;
pub mod estimate;
pub mod exporter;
pub mod geometry;
pub mod logging;
pub mod merge;
pub mod netcdf_io;
pub mod parallel;
pub mod paths;
pub mod provider;
pub mod raster;
pub mod request;
pub mod status;
pub mod tabular;
pub mod tiered;

pub use errors::{ExportError, Result};
pub use exporter::Exporter;

pub mod prelude {
    //! Commonly used imports for convenience
    pub use crate::batch::{BatchProgress, ExecutionMode};
    pub use crate::config::ExportConfig;
    pub use crate::errors::{ExportError, Result};
    pub use crate::exporter::Exporter;
    pub use crate::geometry::{Bounds, Geometry};
    pub use crate::provider::{
        AnalysisProvider, JobHandle, RasterHandle, RemoteExportTask, RemoteExporter, RemoteSource,
        YearlyRasterProvider,
    };
    pub use crate::raster::{MemoryRaster, RasterGrid};
    pub use crate::request::{
        ExportFormat, ExportOutcome, ExportRequest, ExportScope, TableRow, Tier,
    };
    pub use crate::status::{ProgressEvent, Severity, StatusReporter, TracingReporter};
}
