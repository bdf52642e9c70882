//! Public entry points
//!
//! [`Exporter`] routes a request to the right component:
//!
//! | format / scope            | Single                  | AllYears                    |
//! |---------------------------|-------------------------|-----------------------------|
//! | Raster, GriddedTimeSeries | [`TieredExportStrategy`] | [`BatchOrchestrator`]      |
//! | Table                     | [`TabularExporter`]     | [`TabularExporter`] + metadata |
//!
//! Neither entry point returns an error or lets a panic escape; both are
//! folded into an error-severity [`ExportOutcome`] that is also reported.

use crate::batch::{BatchJob, BatchOrchestrator, ExecutionMode};
use crate::config::ExportConfig;
use crate::errors::{panic_message, ExportError, Result};
use crate::netcdf_io::GriddedMetadata;
use crate::paths::PathResolver;
use crate::provider::RemoteExporter;
use crate::request::{ExportFormat, ExportOutcome, ExportRequest, ExportScope, ExportSource};
use crate::status::{ProgressEvent, Severity, StatusReporter, TracingReporter};
use crate::tabular::{TableMetadata, TabularExporter};
use crate::tiered::{RasterTarget, TieredExportStrategy};
use chrono::Utc;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{error, info};

pub struct Exporter {
    config: ExportConfig,
    remote: Arc<dyn RemoteExporter>,
    mode: ExecutionMode,
}

impl Exporter {
    /// Validate `config` and create the standard folder layout under its root
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::Configuration`] if `config` does not validate,
    /// or an I/O error if the layout cannot be created.
    pub fn new(config: ExportConfig, remote: Arc<dyn RemoteExporter>) -> Result<Self> {
        config.validate()?;
        PathResolver::new(&config).prepare_layout()?;
        Ok(Self {
            config,
            remote,
            mode: ExecutionMode::Auto,
        })
    }

    /// Choose how multi-year exports dispatch years
    #[must_use]
    pub fn with_execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    /// Export one raster or one table
    pub fn export_single(
        &self,
        request: &ExportRequest,
        reporter: Option<&dyn StatusReporter>,
    ) -> ExportOutcome {
        let status = reporter.unwrap_or(&TracingReporter);
        guarded(status, || self.try_export_single(request, status))
    }

    /// Export every year of the request's range
    pub fn export_all_years(
        &self,
        request: &ExportRequest,
        reporter: Option<&dyn StatusReporter>,
    ) -> ExportOutcome {
        let status = reporter.unwrap_or(&TracingReporter);
        guarded(status, || self.try_export_all_years(request, status))
    }

    fn try_export_single(
        &self,
        request: &ExportRequest,
        status: &dyn StatusReporter,
    ) -> Result<ExportOutcome> {
        let ExportScope::Single { year } = request.scope() else {
            return Err(ExportError::Configuration(
                "multi-year requests go through export_all_years".to_string(),
            ));
        };
        let name = request.export_name(Utc::now());
        info!(
            dataset = request.dataset(),
            index = request.index(),
            year,
            format = %request.format(),
            name = %name,
            "Starting export"
        );

        match (request.format(), request.source()) {
            (ExportFormat::Table, ExportSource::Table(rows)) => {
                let path = PathResolver::new(&self.config).resolve(
                    ExportFormat::Table,
                    &request.logical_folder(),
                    &name,
                    ExportFormat::Table.extension(),
                )?;
                let outcome = TabularExporter::new(self.config.max_rows_csv).export(rows, None, &path)?;
                report_outcome(status, &outcome);
                Ok(outcome)
            }
            (ExportFormat::Raster | ExportFormat::GriddedTimeSeries, ExportSource::Raster(raster)) => {
                let strategy = TieredExportStrategy::new(&self.config, self.remote.as_ref(), status)?;
                strategy.export(raster, &self.raster_target(request, name))
            }
            (format, source) => Err(mismatch(format, source)),
        }
    }

    fn try_export_all_years(
        &self,
        request: &ExportRequest,
        status: &dyn StatusReporter,
    ) -> Result<ExportOutcome> {
        let ExportScope::AllYears {
            start_year,
            end_year,
        } = request.scope()
        else {
            return Err(ExportError::Configuration(
                "single-year requests go through export_single".to_string(),
            ));
        };
        if start_year > end_year {
            return Err(ExportError::Configuration(format!(
                "start year {start_year} is after end year {end_year}"
            )));
        }
        let name = request.export_name(Utc::now());
        info!(
            dataset = request.dataset(),
            index = request.index(),
            start_year,
            end_year,
            format = %request.format(),
            name = %name,
            "Starting multi-year export"
        );

        match (request.format(), request.source()) {
            (ExportFormat::Table, ExportSource::Table(rows)) => {
                let path = PathResolver::new(&self.config).resolve(
                    ExportFormat::Table,
                    &request.logical_folder(),
                    &format!("{name}_temporal"),
                    ExportFormat::Table.extension(),
                )?;
                let metadata = TableMetadata {
                    dataset: request.dataset().to_string(),
                    parameter: request.parameter().unwrap_or(request.index()).to_string(),
                    index: request.index().to_string(),
                };
                let outcome = TabularExporter::new(self.config.max_rows_csv).export(
                    rows,
                    Some(&metadata),
                    &path,
                )?;
                report_outcome(status, &outcome);
                Ok(outcome)
            }
            (ExportFormat::Raster | ExportFormat::GriddedTimeSeries, ExportSource::Yearly(provider)) => {
                let job = BatchJob {
                    target: self.raster_target(request, name),
                    dataset: request.dataset().to_string(),
                    index: request.index().to_string(),
                    start_year,
                    end_year,
                };
                let outcome = BatchOrchestrator::new(&self.config, self.remote.as_ref(), status)
                    .with_mode(self.mode)
                    .run_all(&job, provider.as_ref())?
                    .into_outcome();
                report_outcome(status, &outcome);
                Ok(outcome)
            }
            (format, source) => Err(mismatch(format, source)),
        }
    }

    fn raster_target(&self, request: &ExportRequest, name: String) -> RasterTarget {
        let mut metadata = GriddedMetadata::new(request.dataset(), request.index())
            .with_units(request.units().unwrap_or_default());
        if let Some(parameter) = request.parameter() {
            metadata.long_name = parameter.to_string();
        }
        RasterTarget {
            format: request.format(),
            logical_folder: request.logical_folder(),
            name,
            metadata,
        }
    }
}

fn mismatch(format: ExportFormat, source: &ExportSource) -> ExportError {
    ExportError::Configuration(format!(
        "a {format} export cannot be built from {source:?}"
    ))
}

fn report_outcome(status: &dyn StatusReporter, outcome: &ExportOutcome) {
    status.report(&ProgressEvent::with_severity(
        outcome.message(),
        outcome.severity(),
    ));
}

/// Run `f`, turning errors and panics into a reported failure outcome
fn guarded<F>(status: &dyn StatusReporter, f: F) -> ExportOutcome
where
    F: FnOnce() -> Result<ExportOutcome>,
{
    let message = match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(outcome)) => return outcome,
        Ok(Err(e)) => format!("Export failed: {e}"),
        Err(payload) => format!(
            "Export failed: unexpected error: {}",
            panic_message(payload.as_ref())
        ),
    };
    error!(message = %message, "Export failed");
    status.report(&ProgressEvent::with_severity(message.clone(), Severity::Error));
    ExportOutcome::failure(message)
}
