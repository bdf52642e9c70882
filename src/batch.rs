//! Multi-year raster exports
//!
//! [`BatchOrchestrator::run_all`] exports one raster per year of a range.
//! Years are dispatched in fixed-size batches to a [`BatchExecutor`]; each
//! batch blocks until every year in it has finished. The executor is a
//! private Rayon pool when one can be built and a sequential loop otherwise,
//! with identical bookkeeping on both paths.
//!
//! Per-year exports are direct transfers only. When no year succeeds, one
//! remote job per year is submitted instead: years whose raster was computed
//! ship the handle, the rest ship a deferred query for the remote side to
//! evaluate.

use crate::config::ExportConfig;
use crate::errors::{panic_message, ExportError, Result};
use crate::merge::RasterMerger;
use crate::netcdf_io::convert_geotiff_to_netcdf;
use crate::parallel::ParallelConfig;
use crate::paths::PathResolver;
use crate::provider::{
    DeferredQuery, JobHandle, RasterHandle, RemoteExporter, RemoteSource, YearlyRasterProvider,
};
use crate::request::{ExportFormat, ExportOutcome, Tier};
use crate::status::{ProgressEvent, Severity, StatusReporter};
use crate::tiered::{RasterTarget, TieredExportStrategy};
use rayon::prelude::*;
use rayon::ThreadPool;
use std::collections::BTreeMap;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Running tally of a multi-year export
///
/// `completed + failed <= total` always holds, with equality once every
/// year has been recorded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchProgress {
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
    pub per_year: BTreeMap<i32, bool>,
}

impl BatchProgress {
    #[must_use]
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    /// Record the result for `year`; a year is only counted once
    pub fn record(&mut self, year: i32, succeeded: bool) {
        if self.per_year.contains_key(&year) || self.completed + self.failed >= self.total {
            warn!(year, "Ignoring repeated result for year");
            return;
        }
        self.per_year.insert(year, succeeded);
        if succeeded {
            self.completed += 1;
        } else {
            self.failed += 1;
        }
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.completed + self.failed == self.total
    }

    #[must_use]
    pub fn failed_years(&self) -> Vec<i32> {
        self.per_year
            .iter()
            .filter(|(_, ok)| !**ok)
            .map(|(year, _)| *year)
            .collect()
    }
}

/// What happened to one year
#[derive(Debug, Clone, PartialEq)]
pub enum YearOutcome {
    /// File written at the given path
    Exported(PathBuf),
    /// The provider had nothing for the year; no export was attempted
    NoRaster,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct YearResult {
    pub year: i32,
    pub outcome: YearOutcome,
}

impl YearResult {
    #[must_use]
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, YearOutcome::Exported(_))
    }
}

/// Per-year export function handed to an executor
pub type YearJob<'a> = dyn Fn(i32) -> YearResult + Sync + 'a;

/// Runs one batch of years to completion
pub trait BatchExecutor: Send + Sync {
    fn run_batch(&self, years: &[i32], job: &YearJob<'_>) -> Vec<YearResult>;

    fn describe(&self) -> String;
}

/// Years of a batch run concurrently on a private pool
pub struct BoundedParallel {
    pool: ThreadPool,
    threads: usize,
}

impl BoundedParallel {
    /// # Errors
    ///
    /// Returns [`ExportError::ThreadPoolError`] if the pool cannot be built.
    pub fn new(config: ParallelConfig) -> Result<Self> {
        Ok(Self {
            pool: config.build_pool()?,
            threads: config.num_threads,
        })
    }
}

impl BatchExecutor for BoundedParallel {
    fn run_batch(&self, years: &[i32], job: &YearJob<'_>) -> Vec<YearResult> {
        self.pool
            .install(|| years.par_iter().map(|&year| run_guarded(job, year)).collect())
    }

    fn describe(&self) -> String {
        format!("parallel ({} workers)", self.threads)
    }
}

/// Years run one after another on the calling thread
#[derive(Debug, Default, Clone, Copy)]
pub struct Sequential;

impl BatchExecutor for Sequential {
    fn run_batch(&self, years: &[i32], job: &YearJob<'_>) -> Vec<YearResult> {
        years.iter().map(|&year| run_guarded(job, year)).collect()
    }

    fn describe(&self) -> String {
        "sequential".to_string()
    }
}

/// A panicking year is recorded as failed instead of tearing down the batch
fn run_guarded(job: &YearJob<'_>, year: i32) -> YearResult {
    panic::catch_unwind(AssertUnwindSafe(|| job(year))).unwrap_or_else(|payload| {
        let reason = panic_message(payload.as_ref());
        warn!(year, reason = %reason, "Year export panicked");
        YearResult {
            year,
            outcome: YearOutcome::Failed(format!("panicked: {reason}")),
        }
    })
}

/// How years are dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Bounded pool, falling back to sequential if it cannot be built
    #[default]
    Auto,
    Sequential,
}

/// Executor for `mode`
///
/// `Auto` uses the pool returned by `build_pool` and falls back to
/// [`Sequential`] with a warning event when the pool cannot be built.
pub fn select_executor<F>(
    mode: ExecutionMode,
    build_pool: F,
    status: &dyn StatusReporter,
) -> Box<dyn BatchExecutor>
where
    F: FnOnce() -> Result<BoundedParallel>,
{
    if mode == ExecutionMode::Sequential {
        return Box::new(Sequential);
    }
    match build_pool() {
        Ok(executor) => Box::new(executor),
        Err(e) => {
            warn!(error = %e, "Falling back to sequential batch processing");
            status.report(&ProgressEvent::with_severity(
                format!("Warning: {e}; processing years sequentially"),
                Severity::Warning,
            ));
            Box::new(Sequential)
        }
    }
}

/// One multi-year raster export
#[derive(Debug, Clone)]
pub struct BatchJob {
    pub target: RasterTarget,
    pub dataset: String,
    pub index: String,
    pub start_year: i32,
    pub end_year: i32,
}

/// Everything a batch run produced
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub progress: BatchProgress,
    pub format: ExportFormat,
    pub years_dir: PathBuf,
    /// Per-year files, ascending by year
    pub year_files: Vec<(i32, PathBuf)>,
    /// `<name>_all_years.nc` for gridded exports that concatenated
    pub combined: Option<PathBuf>,
    pub remote_jobs: Vec<JobHandle>,
    pub warnings: Vec<String>,
}

impl BatchReport {
    /// Fold the report into the request outcome
    #[must_use]
    pub fn into_outcome(self) -> ExportOutcome {
        let BatchReport {
            progress,
            format,
            years_dir,
            year_files,
            combined,
            remote_jobs,
            warnings,
        } = self;

        if !remote_jobs.is_empty() {
            return ExportOutcome::success(
                Some(Tier::Remote),
                format!(
                    "No year could be exported locally; {} remote jobs submitted for {} years",
                    remote_jobs.len(),
                    progress.total
                ),
            )
            .with_attempted(vec![Tier::Direct, Tier::Remote])
            .with_remote_jobs(remote_jobs)
            .with_warnings(warnings)
            .with_batch(progress);
        }

        let concat_failed =
            format == ExportFormat::GriddedTimeSeries && combined.is_none();
        let mut artifacts: Vec<PathBuf> = combined.iter().cloned().collect();
        artifacts.extend(year_files.into_iter().map(|(_, path)| path));

        let summary = format!(
            "{} of {} years exported to {}",
            progress.completed,
            progress.total,
            years_dir.display()
        );
        let partial = progress.failed > 0 || concat_failed;
        let message = match (&combined, partial) {
            (Some(path), false) => {
                format!("Export complete: {summary}; combined file {}", path.display())
            }
            (None, false) => format!("Export complete: {summary}"),
            (_, true) => format!("Partial export: {summary}"),
        };

        let mut outcome = ExportOutcome::success(Some(Tier::Direct), message)
            .with_artifacts(artifacts)
            .with_attempted(vec![Tier::Direct])
            .with_warnings(warnings)
            .with_batch(progress);
        if partial {
            outcome = outcome.partial();
        }
        outcome
    }
}

/// Drives a multi-year export
pub struct BatchOrchestrator<'a> {
    config: &'a ExportConfig,
    remote: &'a dyn RemoteExporter,
    status: &'a dyn StatusReporter,
    mode: ExecutionMode,
}

impl<'a> BatchOrchestrator<'a> {
    pub fn new(
        config: &'a ExportConfig,
        remote: &'a dyn RemoteExporter,
        status: &'a dyn StatusReporter,
    ) -> Self {
        Self {
            config,
            remote,
            status,
            mode: ExecutionMode::Auto,
        }
    }

    #[must_use]
    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    fn executor(&self) -> Box<dyn BatchExecutor> {
        let max_workers = self.config.max_workers;
        select_executor(
            self.mode,
            || BoundedParallel::new(ParallelConfig::for_batch(max_workers)),
            self.status,
        )
    }

    /// Export every year of `job` using rasters from `provider`
    ///
    /// # Errors
    ///
    /// - [`ExportError::Configuration`] for an inverted year range or a
    ///   non-raster format
    /// - [`ExportError::RemoteSubmissionFailed`] when no year could be
    ///   exported locally and no remote job could be submitted
    pub fn run_all(
        &self,
        job: &BatchJob,
        provider: &dyn YearlyRasterProvider,
    ) -> Result<BatchReport> {
        let format = job.target.format;
        if format == ExportFormat::Table {
            return Err(ExportError::Configuration(
                "tables are exported with the tabular exporter".to_string(),
            ));
        }
        if job.start_year > job.end_year {
            return Err(ExportError::Configuration(format!(
                "start year {} is after end year {}",
                job.start_year, job.end_year
            )));
        }

        let years: Vec<i32> = (job.start_year..=job.end_year).collect();
        let mut progress = BatchProgress::new(years.len());
        let strategy = TieredExportStrategy::new(self.config, self.remote, self.status)?;
        let resolver = PathResolver::new(self.config);
        let name = job.target.name.as_str();
        let dir = resolver.resolve_dir(format, &job.target.logical_folder)?;
        let years_dir = dir.join(format!("{name}_years"));
        fs::create_dir_all(&years_dir)?;

        let handles: Mutex<BTreeMap<i32, Arc<dyn RasterHandle>>> = Mutex::new(BTreeMap::new());
        let export_year = |year: i32| -> YearResult {
            let Some(raster) = provider.raster_for_year(year) else {
                debug!(year, "No raster for year");
                return YearResult {
                    year,
                    outcome: YearOutcome::NoRaster,
                };
            };
            if let Ok(mut cache) = handles.lock() {
                cache.insert(year, Arc::clone(&raster));
            }

            let tif = years_dir.join(format!("{name}_{year}.{}", ExportFormat::Raster.extension()));
            if let Err(e) = strategy.transfer_whole(raster.as_ref(), &tif) {
                return YearResult {
                    year,
                    outcome: YearOutcome::Failed(e.to_string()),
                };
            }
            if format != ExportFormat::GriddedTimeSeries {
                return YearResult {
                    year,
                    outcome: YearOutcome::Exported(tif),
                };
            }

            let nc = tif.with_extension(ExportFormat::GriddedTimeSeries.extension());
            let metadata = job.target.metadata.clone().for_year(year);
            match convert_geotiff_to_netcdf(&tif, &nc, &metadata) {
                Ok(()) => {
                    if let Err(e) = fs::remove_file(&tif) {
                        debug!(year, error = %e, "Could not remove intermediate GeoTIFF");
                    }
                    YearResult {
                        year,
                        outcome: YearOutcome::Exported(nc),
                    }
                }
                Err(e) => YearResult {
                    year,
                    outcome: YearOutcome::Failed(e.to_string()),
                },
            }
        };

        let executor = self.executor();
        info!(
            years = years.len(),
            batch_size = self.config.batch_size,
            executor = %executor.describe(),
            "Starting multi-year export"
        );

        let mut year_files = Vec::new();
        let mut warnings = Vec::new();
        let batches = years.chunks(self.config.batch_size.max(1));
        let batch_count = batches.len();
        for (i, batch) in batches.enumerate() {
            let mut results = executor.run_batch(batch, &export_year);
            results.sort_by_key(|r| r.year);
            for result in results {
                progress.record(result.year, result.succeeded());
                match result.outcome {
                    YearOutcome::Exported(path) => year_files.push((result.year, path)),
                    YearOutcome::NoRaster => {
                        let message = format!("No data available for year {}", result.year);
                        self.status.report(&ProgressEvent::with_severity(
                            format!("Warning: {message}"),
                            Severity::Warning,
                        ));
                        warnings.push(message);
                    }
                    YearOutcome::Failed(reason) => {
                        let message = format!("Year {} failed: {reason}", result.year);
                        warn!(year = result.year, reason = %reason, "Year export failed");
                        self.status.report(&ProgressEvent::with_severity(
                            format!("Warning: {message}"),
                            Severity::Warning,
                        ));
                        warnings.push(message);
                    }
                }
            }
            let severity = if progress.failed == 0 {
                Severity::Info
            } else {
                Severity::Warning
            };
            self.status.report(
                &ProgressEvent::with_severity(
                    format!(
                        "Processed batch {} of {batch_count}: {} years exported, {} unsuccessful",
                        i + 1,
                        progress.completed,
                        progress.failed
                    ),
                    severity,
                )
                .percent(100.0 * (progress.completed + progress.failed) as f32 / progress.total as f32),
            );
        }
        debug_assert!(progress.is_complete());

        let mut report = BatchReport {
            progress,
            format,
            years_dir,
            year_files,
            combined: None,
            remote_jobs: Vec::new(),
            warnings,
        };

        if report.progress.completed == 0 {
            let cached = handles.into_inner().unwrap_or_default();
            self.submit_remote(job, &strategy, &resolver, cached, &mut report)?;
            return Ok(report);
        }

        if format == ExportFormat::GriddedTimeSeries {
            let combined = dir.join(format!("{name}_all_years.nc"));
            self.status
                .report(&ProgressEvent::new("Combining year files into one NetCDF file"));
            match RasterMerger::new().concat_years(&report.year_files, &combined, &job.target.metadata) {
                Ok(summary) => {
                    for (year, reason) in summary.dropped {
                        let message = format!("Year {year} left out of combined file: {reason}");
                        self.status.report(&ProgressEvent::with_severity(
                            format!("Warning: {message}"),
                            Severity::Warning,
                        ));
                        report.warnings.push(message);
                    }
                    report.combined = Some(combined);
                }
                Err(e) => {
                    warn!(error = %e, "Combining year files failed");
                    let message = format!(
                        "Warning: could not combine year files ({e}); individual files kept in {}",
                        report.years_dir.display()
                    );
                    self.status
                        .report(&ProgressEvent::with_severity(message.clone(), Severity::Warning));
                    report.warnings.push(message);
                }
            }
        }

        Ok(report)
    }

    fn submit_remote(
        &self,
        job: &BatchJob,
        strategy: &TieredExportStrategy<'_>,
        resolver: &PathResolver,
        cached: BTreeMap<i32, Arc<dyn RasterHandle>>,
        report: &mut BatchReport,
    ) -> Result<()> {
        let format = job.target.format;
        let name = &job.target.name;
        let folder = format!(
            "{}/{name}",
            resolver.remote_folder(format, &job.target.logical_folder)
        );
        self.status.report(&ProgressEvent::with_severity(
            format!(
                "Warning: no year could be exported locally; submitting {} remote jobs",
                report.progress.total
            ),
            Severity::Warning,
        ));

        for year in job.start_year..=job.end_year {
            let source = match cached.get(&year) {
                Some(raster) => RemoteSource::Raster(Arc::clone(raster)),
                None => RemoteSource::Deferred(DeferredQuery {
                    dataset: job.dataset.clone(),
                    index: job.index.clone(),
                    year,
                }),
            };
            let mut task =
                strategy.remote_task(format, &job.target.logical_folder, &format!("{name}_{year}"));
            task.folder = folder.clone();
            match self.remote.submit(source, &task) {
                Ok(handle) => {
                    debug!(year, job = %handle, "Remote job submitted");
                    report.remote_jobs.push(handle);
                }
                Err(e) => {
                    warn!(year, error = %e, "Remote submission failed");
                    report
                        .warnings
                        .push(format!("Remote export for year {year} could not be submitted: {e}"));
                }
            }
        }

        if report.remote_jobs.is_empty() {
            return Err(ExportError::RemoteSubmissionFailed(format!(
                "none of the {} remote jobs could be submitted",
                report.progress.total
            )));
        }
        info!(jobs = report.remote_jobs.len(), folder = %folder, "Remote batch submitted");
        Ok(())
    }
}
