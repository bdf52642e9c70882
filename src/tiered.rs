//! Tiered delivery of a single raster artifact
//!
//! An export walks an explicit state machine and enters each tier at most
//! once:
//!
//! ```text
//! Estimate ──small──▶ DirectLocal ──ok──────────────▶ Done(Direct)
//!    │                    │ transfer error
//!    └──oversized──▶ ChunkedLocal ──merged──────────▶ Done(Chunked)
//!                         │ no tiles      └─merge error─▶ Done(partial)
//!                         ▼
//!                   RemoteFallback ──submitted──────▶ Done(Remote)
//! ```
//!
//! Gridded exports produce a GeoTIFF first and convert it to NetCDF once a
//! local tier has succeeded. A failed conversion keeps the GeoTIFF and
//! reports a warning instead of escalating.

use crate::chunking::SpatialChunker;
use crate::config::ExportConfig;
use crate::errors::{ExportError, Result};
use crate::estimate::{EstimateMethod, SizeEstimator};
use crate::geometry::Bounds;
use crate::merge::RasterMerger;
use crate::netcdf_io::{convert_geotiff_to_netcdf, GriddedMetadata};
use crate::paths::PathResolver;
use crate::provider::{RasterHandle, RemoteExportTask, RemoteExporter, RemoteSource};
use crate::request::{ChunkAccounting, ExportFormat, ExportOutcome, Tier};
use crate::status::{ProgressEvent, Severity, StatusReporter};
use std::fs;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Where and how one raster artifact is written
#[derive(Debug, Clone)]
pub struct RasterTarget {
    pub format: ExportFormat,
    /// `<dataset>/<index>` as given by the request
    pub logical_folder: String,
    pub name: String,
    /// Attributes for the NetCDF container of gridded exports
    pub metadata: GriddedMetadata,
}

enum TierState {
    Estimate,
    DirectLocal,
    ChunkedLocal,
    /// A local tier produced the GeoTIFF at the intermediate path
    LocalComplete(Tier),
    RemoteFallback,
    Done(ExportOutcome),
}

enum ChunkedResult {
    Merged(ChunkAccounting),
    NoTiles,
    MergeFailed {
        chunks: ChunkAccounting,
        tiles: Vec<PathBuf>,
        scratch: PathBuf,
        error: ExportError,
    },
}

/// Bookkeeping carried through one run of the state machine
#[derive(Default)]
struct RunLog {
    attempted: Vec<Tier>,
    warnings: Vec<String>,
    chunks: Option<ChunkAccounting>,
}

impl RunLog {
    fn enter(&mut self, tier: Tier) {
        debug_assert!(!self.attempted.contains(&tier));
        self.attempted.push(tier);
    }
}

/// Drives one raster artifact through Direct → Chunked → Remote
pub struct TieredExportStrategy<'a> {
    config: &'a ExportConfig,
    resolver: PathResolver,
    estimator: SizeEstimator,
    chunker: SpatialChunker,
    merger: RasterMerger,
    remote: &'a dyn RemoteExporter,
    status: &'a dyn StatusReporter,
}

impl<'a> TieredExportStrategy<'a> {
    /// # Errors
    ///
    /// Returns [`ExportError::Configuration`] if the chunk grid is invalid.
    pub fn new(
        config: &'a ExportConfig,
        remote: &'a dyn RemoteExporter,
        status: &'a dyn StatusReporter,
    ) -> Result<Self> {
        Ok(Self {
            config,
            resolver: PathResolver::new(config),
            estimator: SizeEstimator::from_config(config),
            chunker: SpatialChunker::new(config.chunk_rows, config.chunk_cols)?,
            merger: RasterMerger::new(),
            remote,
            status,
        })
    }

    /// Export `raster` to the location described by `target`
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::RemoteSubmissionFailed`] when every local tier
    /// failed and the remote job could not be submitted, or an I/O error if
    /// the destination directory cannot be created.
    pub fn export(
        &self,
        raster: &Arc<dyn RasterHandle>,
        target: &RasterTarget,
    ) -> Result<ExportOutcome> {
        let final_path = self.resolver.resolve(
            target.format,
            &target.logical_folder,
            &target.name,
            target.format.extension(),
        )?;
        let tif_path = final_path.with_extension(ExportFormat::Raster.extension());

        let mut log = RunLog::default();
        let mut state = TierState::Estimate;
        loop {
            state = match state {
                TierState::Estimate => self.estimate(raster.as_ref()),
                TierState::DirectLocal => {
                    log.enter(Tier::Direct);
                    self.direct(raster.as_ref(), &tif_path, &mut log)
                }
                TierState::ChunkedLocal => {
                    log.enter(Tier::Chunked);
                    self.chunked(raster.as_ref(), target, &tif_path, &mut log)
                }
                TierState::LocalComplete(tier) => {
                    TierState::Done(self.finish_local(
                        tier,
                        target,
                        &tif_path,
                        &final_path,
                        mem::take(&mut log),
                    ))
                }
                TierState::RemoteFallback => {
                    log.enter(Tier::Remote);
                    TierState::Done(self.remote(raster, target, mem::take(&mut log))?)
                }
                TierState::Done(outcome) => {
                    self.status.report(&ProgressEvent::with_severity(
                        outcome.message(),
                        outcome.severity(),
                    ));
                    return Ok(outcome);
                }
            };
        }
    }

    /// Direct-only transfer of the whole raster to `dest`
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::TransferFailed`] if the transfer is rejected or
    /// the file does not appear in time.
    pub fn transfer_whole(&self, raster: &dyn RasterHandle, dest: &Path) -> Result<()> {
        let region = raster
            .bounds()
            .map_err(|e| ExportError::TransferFailed(format!("raster bounds unavailable: {e}")))?;
        self.transfer(raster, &region, dest)
    }

    fn estimate(&self, raster: &dyn RasterHandle) -> TierState {
        match raster.crs() {
            Ok(native) if native != self.config.crs => {
                info!(native = %native, target = %self.config.crs, "Raster will be reprojected on export");
            }
            Ok(_) => {}
            Err(e) => debug!(error = %e, "Native CRS unavailable"),
        }
        let (oversized, estimate) = self.estimator.assess(raster);
        match &estimate {
            Ok(e) => {
                let method = match e.method {
                    EstimateMethod::Exact => "exact",
                    EstimateMethod::Approximate => "approximate",
                };
                info!(pixels = e.pixel_count, method, oversized, "Estimated export size");
                self.report(format!(
                    "Estimated {} pixels ({method}); limit for direct export is {}",
                    e.pixel_count,
                    self.estimator.max_pixels()
                ));
            }
            Err(e) => {
                warn!(error = %e, "Size estimation failed, treating raster as oversized");
                self.report_with(
                    format!("Warning: {e}; treating the raster as oversized"),
                    Severity::Warning,
                );
            }
        }
        if oversized {
            self.report("Large export detected; switching to chunked export");
            TierState::ChunkedLocal
        } else {
            TierState::DirectLocal
        }
    }

    fn direct(&self, raster: &dyn RasterHandle, tif_path: &Path, log: &mut RunLog) -> TierState {
        self.report(format!("Exporting directly to {}", tif_path.display()));
        match self.transfer_whole(raster, tif_path) {
            Ok(()) => TierState::LocalComplete(Tier::Direct),
            Err(e) => {
                warn!(error = %e, "Direct export failed, trying chunked export");
                let message = format!("Warning: direct export failed ({e}); trying chunked export");
                self.report_with(message.clone(), Severity::Warning);
                log.warnings.push(message);
                TierState::ChunkedLocal
            }
        }
    }

    fn chunked(
        &self,
        raster: &dyn RasterHandle,
        target: &RasterTarget,
        tif_path: &Path,
        log: &mut RunLog,
    ) -> TierState {
        match self.export_chunks(raster, target, tif_path, log) {
            ChunkedResult::Merged(chunks) => {
                log.chunks = Some(chunks);
                TierState::LocalComplete(Tier::Chunked)
            }
            ChunkedResult::NoTiles => {
                self.report_with(
                    "Warning: no chunk could be exported locally; submitting a remote export",
                    Severity::Warning,
                );
                TierState::RemoteFallback
            }
            ChunkedResult::MergeFailed {
                chunks,
                tiles,
                scratch,
                error,
            } => {
                log.chunks = Some(chunks);
                let message = format!(
                    "Partial export: {chunks} exported but merging failed ({error}); tiles kept in {}",
                    scratch.display()
                );
                log.warnings.push(message.clone());
                TierState::Done(
                    ExportOutcome::success(Some(Tier::Chunked), message)
                        .partial()
                        .with_artifacts(tiles)
                        .with_attempted(log.attempted.clone())
                        .with_chunks(chunks)
                        .with_warnings(log.warnings.clone()),
                )
            }
        }
    }

    fn export_chunks(
        &self,
        raster: &dyn RasterHandle,
        target: &RasterTarget,
        tif_path: &Path,
        log: &mut RunLog,
    ) -> ChunkedResult {
        let region = match raster.bounds() {
            Ok(region) => region,
            Err(e) => {
                warn!(error = %e, "Raster bounds unavailable, cannot chunk");
                log.warnings.push(format!("Cannot partition raster: {e}"));
                return ChunkedResult::NoTiles;
            }
        };
        let chunks = match self.chunker.partition(&region) {
            Ok(chunks) => chunks,
            Err(e) => {
                warn!(error = %e, "Cannot partition raster");
                log.warnings.push(format!("Cannot partition raster: {e}"));
                return ChunkedResult::NoTiles;
            }
        };

        let scratch = tif_path
            .parent()
            .map_or_else(|| PathBuf::from(&target.name), |dir| dir.join(&target.name));
        if let Err(e) = fs::create_dir_all(&scratch) {
            warn!(error = %e, dir = %scratch.display(), "Cannot create chunk directory");
            log.warnings.push(format!("Cannot create chunk directory: {e}"));
            return ChunkedResult::NoTiles;
        }

        let total = chunks.len();
        let mut tiles = Vec::with_capacity(total);
        for (i, chunk) in chunks.iter().enumerate() {
            self.status.report(
                &ProgressEvent::new(format!("Exporting chunk {} of {total}", i + 1))
                    .percent(100.0 * i as f32 / total as f32),
            );
            let tile = scratch.join(format!(
                "{}.{}",
                chunk.tile_name(&target.name),
                ExportFormat::Raster.extension()
            ));
            match self.transfer(raster, &chunk.bounds, &tile) {
                Ok(()) => {
                    debug!(row = chunk.grid_row, col = chunk.grid_col, "Chunk exported");
                    tiles.push(tile);
                }
                Err(e) => {
                    let error = ExportError::ChunkExportFailed {
                        row: chunk.grid_row,
                        col: chunk.grid_col,
                        message: e.to_string(),
                    };
                    warn!(error = %error, "Chunk export failed");
                    let message = format!("Warning: {error}");
                    self.report_with(message.clone(), Severity::Warning);
                    log.warnings.push(message);
                }
            }
        }

        let accounting = ChunkAccounting {
            succeeded: tiles.len(),
            total,
        };
        if tiles.is_empty() {
            remove_scratch(&scratch);
            return ChunkedResult::NoTiles;
        }

        self.report(format!("Merging {accounting}"));
        match self.merger.mosaic(&tiles, tif_path) {
            Ok(summary) => {
                debug!(width = summary.width, height = summary.height, "Mosaic written");
                remove_scratch(&scratch);
                ChunkedResult::Merged(accounting)
            }
            Err(ExportError::NoTilesAvailable) => ChunkedResult::NoTiles,
            Err(error) => {
                warn!(error = %error, "Merging chunks failed, keeping tiles");
                ChunkedResult::MergeFailed {
                    chunks: accounting,
                    tiles,
                    scratch,
                    error,
                }
            }
        }
    }

    fn finish_local(
        &self,
        tier: Tier,
        target: &RasterTarget,
        tif_path: &Path,
        final_path: &Path,
        mut log: RunLog,
    ) -> ExportOutcome {
        let via = match log.chunks {
            Some(chunks) => format!("from {chunks}"),
            None => format!("via {tier} export"),
        };

        let (artifact, partial) = if target.format == ExportFormat::GriddedTimeSeries {
            self.report("Converting GeoTIFF to NetCDF");
            match convert_geotiff_to_netcdf(tif_path, final_path, &target.metadata) {
                Ok(()) => {
                    if let Err(e) = fs::remove_file(tif_path) {
                        debug!(error = %e, "Could not remove intermediate GeoTIFF");
                    }
                    (final_path.to_path_buf(), false)
                }
                Err(e) => {
                    warn!(error = %e, "NetCDF conversion failed, keeping GeoTIFF");
                    let message = format!(
                        "Warning: NetCDF conversion failed ({e}); GeoTIFF kept at {}",
                        tif_path.display()
                    );
                    self.report_with(message.clone(), Severity::Warning);
                    log.warnings.push(message);
                    (tif_path.to_path_buf(), true)
                }
            }
        } else {
            (tif_path.to_path_buf(), false)
        };

        let message = if partial {
            format!("Partial export: saved {} {via} without NetCDF conversion", artifact.display())
        } else {
            format!("Export complete: saved {} {via}", artifact.display())
        };
        let mut outcome = ExportOutcome::success(Some(tier), message)
            .with_artifacts(vec![artifact])
            .with_attempted(log.attempted)
            .with_warnings(log.warnings);
        if let Some(chunks) = log.chunks {
            outcome = outcome.with_chunks(chunks);
        }
        if partial {
            outcome = outcome.partial();
        }
        outcome
    }

    fn remote(
        &self,
        raster: &Arc<dyn RasterHandle>,
        target: &RasterTarget,
        log: RunLog,
    ) -> Result<ExportOutcome> {
        let task = self.remote_task(target.format, &target.logical_folder, &target.name);
        self.report(format!("Submitting remote export to {}", task.folder));
        let job = self
            .remote
            .submit(RemoteSource::Raster(Arc::clone(raster)), &task)
            .map_err(|e| match e {
                ExportError::RemoteSubmissionFailed(_) => e,
                other => ExportError::RemoteSubmissionFailed(other.to_string()),
            })?;
        info!(job = %job, folder = %task.folder, "Remote export submitted");

        let mut outcome = ExportOutcome::success(
            Some(Tier::Remote),
            format!(
                "Remote export {job} submitted; the file will appear in {}",
                task.folder
            ),
        )
        .with_attempted(log.attempted)
        .with_remote_jobs(vec![job])
        .with_warnings(log.warnings);
        if let Some(chunks) = log.chunks {
            outcome = outcome.with_chunks(chunks);
        }
        Ok(outcome)
    }

    /// Remote job parameters for an artifact
    #[must_use]
    pub fn remote_task(
        &self,
        format: ExportFormat,
        logical_folder: &str,
        name: &str,
    ) -> RemoteExportTask {
        RemoteExportTask {
            description: name.to_string(),
            folder: self.resolver.remote_folder(format, logical_folder),
            name_prefix: name.to_string(),
            crs: self.config.crs.clone(),
            scale: self.config.export_scale_m,
            max_pixels: self.config.remote_max_pixels,
            file_format: format.remote_file_format(),
        }
    }

    fn transfer(&self, raster: &dyn RasterHandle, region: &Bounds, dest: &Path) -> Result<()> {
        if dest.exists() {
            fs::remove_file(dest)?;
        }
        raster
            .download(region, self.config.export_scale_m, &self.config.crs, dest)
            .map_err(|e| match e {
                ExportError::TransferFailed(_) => e,
                other => ExportError::TransferFailed(other.to_string()),
            })?;
        if wait_for_file(
            dest,
            self.config.file_wait_timeout(),
            self.config.file_poll_interval(),
        ) {
            Ok(())
        } else {
            Err(ExportError::TransferFailed(format!(
                "{} did not appear within {:?}",
                dest.display(),
                self.config.file_wait_timeout()
            )))
        }
    }

    fn report(&self, message: impl Into<String>) {
        self.status.report(&ProgressEvent::new(message));
    }

    fn report_with(&self, message: impl Into<String>, severity: Severity) {
        self.status
            .report(&ProgressEvent::with_severity(message, severity));
    }
}

/// Poll until `path` is a non-empty file or `timeout` elapses
#[must_use]
pub fn wait_for_file(path: &Path, timeout: Duration, interval: Duration) -> bool {
    let start = Instant::now();
    loop {
        if fs::metadata(path).map_or(false, |m| m.is_file() && m.len() > 0) {
            return true;
        }
        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return false;
        }
        thread::sleep(interval.min(timeout - elapsed));
    }
}

fn remove_scratch(dir: &Path) {
    if let Err(e) = fs::remove_dir_all(dir) {
        debug!(error = %e, dir = %dir.display(), "Could not remove chunk directory");
    }
}
