//! Unit tests for the climate_export building blocks
//!
//! These cover the pure pieces of the pipeline (normalization, partitioning,
//! estimation, planning, bookkeeping) plus small GeoTIFF and NetCDF writes.

mod common;

use chrono::{TimeZone, Utc};
use climate_export::batch::{
    select_executor, BatchProgress, BoundedParallel, ExecutionMode, YearOutcome, YearResult,
};
use climate_export::chunking::SpatialChunker;
use climate_export::config::ExportConfig;
use climate_export::errors::{ExportError, Result};
use climate_export::estimate::{EstimateMethod, SizeEstimator};
use climate_export::geometry::{Bounds, Geometry};
use climate_export::logging::parse_log_level;
use climate_export::netcdf_io::{read_year_grid, write_grid_netcdf, GriddedMetadata};
use climate_export::parallel::{batch_worker_count, ParallelConfig};
use climate_export::paths::{normalize_folder, PathResolver};
use climate_export::provider::RasterHandle;
use climate_export::raster::{read_geotiff, write_geotiff, MemoryRaster};
use climate_export::request::{
    ChunkAccounting, ExportFormat, ExportOutcome, ExportRequest, ExportScope, TableRow, Tier,
};
use climate_export::status::{CollectingReporter, ProgressEvent, Severity, StatusReporter};
use climate_export::tabular::{index_path, part_path, plan_parts};
use common::{small_grid, ScriptedRaster};
use proptest::prelude::*;
use std::path::Path;
use tempfile::tempdir;

#[test]
fn test_error_display() {
    let err = ExportError::ChunkExportFailed {
        row: 1,
        col: 0,
        message: "timeout".to_string(),
    };
    assert_eq!(err.to_string(), "Export of chunk 1_0 failed: timeout");

    assert_eq!(ExportError::NoTilesAvailable.to_string(), "No tiles available to merge");
    assert!(ExportError::NoDataAvailable("empty".into()).is_no_data());
    assert!(!ExportError::MergeFailed("x".into()).is_no_data());

    let generic: ExportError = "plain message".into();
    assert_eq!(generic.to_string(), "plain message");
}

#[test]
fn test_severity_classification() {
    assert_eq!(Severity::classify("Export failed: disk full"), Severity::Error);
    assert_eq!(Severity::classify("Could not open file"), Severity::Error);
    assert_eq!(Severity::classify("Partial export: 2 of 3 years"), Severity::Warning);
    assert_eq!(Severity::classify("Export complete"), Severity::Success);
    assert_eq!(Severity::classify("File saved to /tmp/x.tif"), Severity::Success);
    assert_eq!(Severity::classify("Merging 3 of 4 chunks"), Severity::Info);
    // Error keywords take precedence
    assert_eq!(Severity::classify("Warning: chunk failed"), Severity::Error);
}

#[test]
fn test_progress_event_percent_is_clamped() {
    let event = ProgressEvent::new("Exporting chunk 1 of 4").percent(140.0);
    assert_eq!(event.percent_complete, Some(100.0));
    assert_eq!(event.severity, Severity::Info);

    let reporter = CollectingReporter::new();
    reporter.report(&event);
    reporter.report(&ProgressEvent::with_severity("careful", Severity::Warning));
    assert_eq!(reporter.events().len(), 2);
    assert_eq!(reporter.with_severity(Severity::Warning).len(), 1);
}

#[test]
fn test_config_defaults_and_toml() -> Result<()> {
    let defaults = ExportConfig::default();
    assert_eq!(defaults.max_pixels_direct, 5_000_000);
    assert_eq!(defaults.max_rows_csv, 1_000_000);
    assert_eq!((defaults.chunk_rows, defaults.chunk_cols), (2, 2));
    assert_eq!(defaults.batch_size, 5);
    assert_eq!(defaults.crs, "EPSG:4326");
    assert!((defaults.nominal_pixel_area_km2() - 0.25).abs() < 1e-12);
    defaults.validate()?;

    let config = ExportConfig::from_toml_str(
        r#"
        export_root = "/data/exports"
        chunk_rows = 3
        max_rows_csv = 10
        "#,
    )?;
    assert_eq!(config.export_root, Path::new("/data/exports"));
    assert_eq!(config.chunk_rows, 3);
    assert_eq!(config.chunk_cols, 2);
    assert_eq!(config.max_rows_csv, 10);
    Ok(())
}

#[test]
fn test_config_validation_rejects_bad_values() {
    let zero_grid = ExportConfig {
        chunk_cols: 0,
        ..ExportConfig::default()
    };
    assert!(matches!(zero_grid.validate(), Err(ExportError::Configuration(_))));

    let zero_batch = ExportConfig {
        batch_size: 0,
        ..ExportConfig::default()
    };
    assert!(zero_batch.validate().is_err());

    assert!(ExportConfig::from_toml_str("chunk_rows = \"two\"").is_err());
}

#[test]
fn test_config_from_file() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("export.toml");
    std::fs::write(&path, "batch_size = 3\nmax_workers = 2\n")?;
    let config = ExportConfig::from_toml_file(&path)?;
    assert_eq!(config.batch_size, 3);
    assert_eq!(config.max_workers, 2);

    assert!(ExportConfig::from_toml_file(dir.path().join("missing.toml")).is_err());
    Ok(())
}

#[test]
fn test_log_level_parsing() {
    assert_eq!(parse_log_level("INFO").ok(), Some(tracing::Level::INFO));
    assert_eq!(parse_log_level("warning").ok(), Some(tracing::Level::WARN));
    assert!(parse_log_level("loud").is_err());
}

#[test]
fn test_bounds_and_geometry() -> Result<()> {
    let bounds = Bounds::new(-10.0, 30.0, 10.0, 50.0)?;
    assert_eq!(bounds.width(), 20.0);
    assert_eq!(bounds.height(), 20.0);
    assert!(Bounds::new(1.0, 0.0, 1.0, 5.0).is_err());
    assert!(Bounds::new(f64::NAN, 0.0, 1.0, 5.0).is_err());

    let geometry = Geometry::from_ring(vec![[0.0, 0.0], [2.0, 0.0], [2.0, 1.0]])?;
    assert_eq!(geometry.exterior().len(), 4, "ring is closed");
    assert_eq!(geometry.bounds()?, Bounds::new(0.0, 0.0, 2.0, 1.0)?);
    assert_eq!(geometry.to_geojson()["type"], "Polygon");

    assert!(Geometry::from_ring(vec![[0.0, 0.0], [1.0, 1.0]]).is_err());
    Ok(())
}

#[test]
fn test_size_estimate_exact() -> Result<()> {
    let estimator = SizeEstimator::from_config(&ExportConfig::default());
    let raster = ScriptedRaster::new(small_grid());
    let estimate = estimator.estimate(&raster)?;
    assert_eq!(estimate.pixel_count, 64);
    assert_eq!(estimate.method, EstimateMethod::Exact);
    assert!(!estimator.is_oversized(&estimate));

    let large = ScriptedRaster::new(small_grid()).declaring(4000, 2000);
    let estimate = estimator.estimate(&large)?;
    assert_eq!(estimate.pixel_count, 8_000_000);
    assert!(estimator.is_oversized(&estimate));
    Ok(())
}

#[test]
fn test_size_estimate_threshold_is_exclusive() {
    let estimator = SizeEstimator::new(5_000_000, 0.25);
    let at_limit = ScriptedRaster::new(small_grid()).declaring(5_000_000, 1);
    let (oversized, _) = estimator.assess(&at_limit);
    assert!(!oversized);

    let above = ScriptedRaster::new(small_grid()).declaring(5_000_001, 1);
    let (oversized, _) = estimator.assess(&above);
    assert!(oversized);
}

#[test]
fn test_size_estimate_approximate_and_failure() -> Result<()> {
    let estimator = SizeEstimator::new(5_000_000, 0.25);
    let raster = ScriptedRaster::new(small_grid()).without_dimensions();
    let estimate = estimator.estimate(&raster)?;
    assert_eq!(estimate.method, EstimateMethod::Approximate);
    let expected = (raster.full_bounds().geodesic_area_km2() / 0.25).round() as u64;
    assert_eq!(estimate.pixel_count, expected);

    let opaque = ScriptedRaster::new(small_grid())
        .without_dimensions()
        .without_bounds();
    assert!(matches!(
        estimator.estimate(&opaque),
        Err(ExportError::SizeEstimationFailed(_))
    ));
    let (oversized, estimate) = estimator.assess(&opaque);
    assert!(oversized, "failed estimates are treated as oversized");
    assert!(estimate.is_err());
    Ok(())
}

#[test]
fn test_normalize_folder_defaults() {
    assert_eq!(
        normalize_folder(ExportFormat::Table, "Unknown/UNKNOWN").as_folder(),
        "general/tabular_data"
    );
    assert_eq!(
        normalize_folder(ExportFormat::Raster, "unknown").as_folder(),
        "general/raster_data"
    );
    assert_eq!(
        normalize_folder(ExportFormat::GriddedTimeSeries, "").as_folder(),
        "general/climate_data"
    );
}

#[test]
fn test_normalize_folder_sources() {
    let recognized = normalize_folder(ExportFormat::Raster, "era5/Temperature");
    assert_eq!(recognized.as_folder(), "ERA5/Temperature");
    assert!(!recognized.custom);

    let custom = normalize_folder(ExportFormat::GriddedTimeSeries, "MODIS");
    assert_eq!(custom.as_folder(), "Custom/MODIS/climate_data");
    assert!(custom.custom);

    let traversal = normalize_folder(ExportFormat::Raster, "../PRISM/./ppt/extra");
    assert_eq!(traversal.as_folder(), "PRISM/ppt_extra");
}

#[test]
fn test_path_resolver_layout() -> Result<()> {
    let dir = tempdir()?;
    let resolver = PathResolver::new(&ExportConfig::with_root(dir.path()));

    let path = resolver.resolve(ExportFormat::Raster, "ERA5/Temperature", "t2m_2020", "tif")?;
    assert_eq!(path, dir.path().join("GeoTIFF/ERA5/Temperature/t2m_2020.tif"));
    assert!(path.parent().is_some_and(Path::is_dir));

    let custom = resolver.resolve(ExportFormat::Table, "Local/unknown", "series", ".csv")?;
    assert_eq!(custom, dir.path().join("CSV/Custom/Local/tabular_data/series.csv"));

    // Same inputs, same place
    let again = resolver.resolve(ExportFormat::Raster, "ERA5/Temperature", "t2m_2020", "tif")?;
    assert_eq!(path, again);

    assert_eq!(
        resolver.remote_folder(ExportFormat::GriddedTimeSeries, "daymet/prcp"),
        "Climate_Exports/DAYMET/prcp"
    );

    resolver.prepare_layout()?;
    for format in ["GeoTIFF", "CSV", "NetCDF"] {
        for source in ["ERA5", "PRISM", "DAYMET", "Custom"] {
            assert!(dir.path().join(format).join(source).is_dir());
        }
    }
    Ok(())
}

#[test]
fn test_partition_default_grid() -> Result<()> {
    let chunker = SpatialChunker::new(2, 2)?;
    let bounds = Bounds::new(0.0, 40.0, 8.0, 48.0)?;
    let chunks = chunker.partition(&bounds)?;
    assert_eq!(chunks.len(), 4);

    // Row-major, row 0 on the northern edge
    assert_eq!((chunks[0].grid_row, chunks[0].grid_col), (0, 0));
    assert_eq!(chunks[0].bounds, Bounds::new(0.0, 44.0, 4.0, 48.0)?);
    assert_eq!((chunks[1].grid_row, chunks[1].grid_col), (0, 1));
    assert_eq!(chunks[3].bounds, Bounds::new(4.0, 40.0, 8.0, 44.0)?);
    assert_eq!(chunks[2].tile_name("export"), "export_chunk_1_0");

    assert!(SpatialChunker::new(0, 2).is_err());
    Ok(())
}

#[test]
fn test_plan_parts() {
    assert_eq!(
        plan_parts(2_500_000, 1_000_000),
        vec![1_000_000, 1_000_000, 500_000]
    );
    assert_eq!(plan_parts(1_000_000, 1_000_000), vec![1_000_000]);
    assert_eq!(plan_parts(3, 1_000_000), vec![3]);
    assert_eq!(plan_parts(2_000_000, 1_000_000), vec![1_000_000, 1_000_000]);

    let path = Path::new("/exports/CSV/ERA5/t2m/series.csv");
    assert_eq!(
        part_path(path, 1, 3),
        Path::new("/exports/CSV/ERA5/t2m/series_part_1_of_3.csv")
    );
    assert_eq!(
        index_path(path),
        Path::new("/exports/CSV/ERA5/t2m/series_index.csv")
    );
}

#[test]
fn test_batch_worker_count() {
    assert_eq!(batch_worker_count(16, 4), 4);
    assert_eq!(batch_worker_count(3, 4), 2);
    assert_eq!(batch_worker_count(1, 4), 1);
    assert_eq!(batch_worker_count(0, 4), 1);

    let config = ParallelConfig::for_batch(4);
    assert!((1..=4).contains(&config.num_threads));
    assert_eq!(ParallelConfig::with_threads(0).num_threads, 1);
}

#[test]
fn test_batch_progress_bookkeeping() {
    let mut progress = BatchProgress::new(3);
    progress.record(2018, true);
    progress.record(2019, false);
    assert!(!progress.is_complete());
    assert!(progress.completed + progress.failed <= progress.total);

    // A year is only counted once
    progress.record(2019, true);
    assert_eq!((progress.completed, progress.failed), (1, 1));

    progress.record(2020, true);
    assert!(progress.is_complete());
    assert_eq!(progress.failed_years(), vec![2019]);

    // Nothing beyond the total is recorded
    progress.record(2021, true);
    assert_eq!(progress.completed + progress.failed, 3);
}

fn skipped_year(year: i32) -> YearResult {
    YearResult {
        year,
        outcome: YearOutcome::NoRaster,
    }
}

#[test]
fn test_executor_falls_back_to_sequential() {
    let status = CollectingReporter::new();
    let executor = select_executor(
        ExecutionMode::Auto,
        || Err(ExportError::ThreadPoolError("no threads".to_string())),
        &status,
    );
    assert_eq!(executor.describe(), "sequential");

    let warnings = status.with_severity(Severity::Warning);
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].message.contains("no threads"));
    assert!(warnings[0].message.contains("sequentially"));

    // The fallback still runs every year of a batch
    let results = executor.run_batch(&[2018, 2019, 2020], &skipped_year);
    let years: Vec<i32> = results.iter().map(|r| r.year).collect();
    assert_eq!(years, vec![2018, 2019, 2020]);
}

#[test]
fn test_executor_selection() {
    let status = CollectingReporter::new();

    let sequential = select_executor(
        ExecutionMode::Sequential,
        || panic!("no pool is built in sequential mode"),
        &status,
    );
    assert_eq!(sequential.describe(), "sequential");

    let parallel = select_executor(
        ExecutionMode::Auto,
        || BoundedParallel::new(ParallelConfig::with_threads(2)),
        &status,
    );
    assert_eq!(parallel.describe(), "parallel (2 workers)");
    let mut results = parallel.run_batch(&[2020, 2018], &skipped_year);
    results.sort_by_key(|r| r.year);
    assert_eq!(results, vec![skipped_year(2018), skipped_year(2020)]);

    assert!(status.events().is_empty());
}

#[test]
fn test_memory_raster_reports_geographic_crs() -> Result<()> {
    let raster = MemoryRaster::new(small_grid());
    assert_eq!(raster.crs()?, "EPSG:4326");
    Ok(())
}

#[test]
fn test_export_names() {
    let now = Utc.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap();
    let raster = std::sync::Arc::new(ScriptedRaster::new(small_grid()));
    let single = ExportRequest::single_raster(ExportFormat::Raster, "ERA5", "Temperature", 2020, raster);
    assert_eq!(single.export_name(now), "ERA5_Temperature_2020_20240305_140709");
    assert_eq!(single.logical_folder(), "ERA5/Temperature");

    let table = ExportRequest::table(
        ExportScope::AllYears {
            start_year: 2001,
            end_year: 2010,
        },
        "PRISM",
        "ppt",
        vec![TableRow::new(2001, 1.0)],
    );
    assert_eq!(table.export_name(now), "PRISM_ppt_2001_2010_20240305_140709");
    assert_eq!(table.with_name("custom").export_name(now), "custom");
}

#[test]
fn test_outcome_reporting() {
    let chunks = ChunkAccounting {
        succeeded: 3,
        total: 4,
    };
    assert_eq!(chunks.to_string(), "3 of 4 chunks");

    let outcome = ExportOutcome::success(Some(Tier::Chunked), "Export complete").with_chunks(chunks);
    assert_eq!(outcome.to_string(), "Export complete");
    assert_eq!(outcome.severity(), Severity::Success);
    assert_eq!(outcome.partial().severity(), Severity::Warning);
    assert_eq!(ExportOutcome::failure("Export failed").severity(), Severity::Error);
}

#[test]
fn test_grid_clip_is_half_open() -> Result<()> {
    let grid = small_grid();
    let north_west = grid.clip(&Bounds::new(0.0, 44.0, 4.0, 48.0)?)?;
    assert_eq!((north_west.width(), north_west.height()), (4, 4));
    assert_eq!(north_west.bounds(), Bounds::new(0.0, 44.0, 4.0, 48.0)?);
    assert_eq!(north_west.data()[[0, 0]], 0.0);

    let south_east = grid.clip(&Bounds::new(4.0, 40.0, 8.0, 44.0)?)?;
    assert_eq!(south_east.data()[[0, 0]], (4 * 8 + 4) as f32);

    let outside = grid.clip(&Bounds::new(20.0, 0.0, 30.0, 10.0)?);
    assert!(matches!(outside, Err(ExportError::NoDataAvailable(_))));
    Ok(())
}

#[test]
fn test_geotiff_keeps_georeferencing() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("grid.tif");
    let grid = small_grid();
    write_geotiff(&path, &grid)?;

    let read = read_geotiff(&path)?;
    assert_eq!(read.transform(), grid.transform());
    assert_eq!(read.nodata(), grid.nodata());
    assert_eq!(read.data(), grid.data());
    Ok(())
}

#[test]
fn test_netcdf_grid_attributes() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("grid.nc");
    let metadata = GriddedMetadata::new("ERA5", "Temperature")
        .with_units("K")
        .for_year(2020);
    write_grid_netcdf(&path, &small_grid(), &metadata)?;

    let grid = read_year_grid(&path)?;
    assert_eq!(grid.year, Some(2020));
    assert_eq!(grid.lat.len(), 8);
    assert!((grid.lat[0] - 47.5).abs() < 1e-9, "latitudes are pixel centres, north first");
    assert!((grid.lon[0] - 0.5).abs() < 1e-9);

    let file = netcdf::open(&path)?;
    let var = file.variable("data").expect("data variable");
    assert!(var.attribute("missing_value").is_some());
    assert!(file.attribute("title").is_some());
    assert!(file.attribute("creation_date").is_some());
    Ok(())
}

proptest! {
    #[test]
    fn prop_chunks_tile_bounds_exactly(
        min_x in -180.0f64..170.0,
        min_y in -80.0f64..70.0,
        width in 0.01f64..10.0,
        height in 0.01f64..10.0,
        rows in 1usize..7,
        cols in 1usize..7,
    ) {
        let bounds = Bounds::new(min_x, min_y, min_x + width, min_y + height).unwrap();
        let chunks = SpatialChunker::new(rows, cols).unwrap().partition(&bounds).unwrap();
        prop_assert_eq!(chunks.len(), rows * cols);

        let at = |r: usize, c: usize| &chunks[r * cols + c];
        prop_assert_eq!(at(0, 0).bounds.max_y, bounds.max_y);
        prop_assert_eq!(at(0, 0).bounds.min_x, bounds.min_x);
        prop_assert_eq!(at(rows - 1, cols - 1).bounds.min_y, bounds.min_y);
        prop_assert_eq!(at(rows - 1, cols - 1).bounds.max_x, bounds.max_x);

        for r in 0..rows {
            for c in 0..cols {
                let chunk = at(r, c);
                prop_assert_eq!((chunk.grid_row, chunk.grid_col), (r, c));
                prop_assert!(chunk.bounds.width() > 0.0 && chunk.bounds.height() > 0.0);
                if c + 1 < cols {
                    prop_assert_eq!(chunk.bounds.max_x, at(r, c + 1).bounds.min_x);
                    prop_assert_eq!(chunk.bounds.min_y, at(r, c + 1).bounds.min_y);
                }
                if r + 1 < rows {
                    prop_assert_eq!(chunk.bounds.min_y, at(r + 1, c).bounds.max_y);
                }
            }
        }

        let total: f64 = chunks.iter().map(|c| c.bounds.area()).sum();
        prop_assert!((total - bounds.area()).abs() <= 1e-9 * bounds.area());
        for (i, a) in chunks.iter().enumerate() {
            for b in &chunks[i + 1..] {
                prop_assert_eq!(a.bounds.overlap_area(&b.bounds), 0.0);
            }
        }
    }

    #[test]
    fn prop_normalized_folders_are_total_and_clean(
        segments in prop::collection::vec(
            prop::sample::select(vec![
                "unknown", "UNKNOWN", "Unknown", "..", ".", "", " ", "era5", "PRISM",
                "daymet", "general", "Custom", "MODIS", "Temperature", "a:b", "ppt",
            ]),
            0..5,
        ),
        format in prop::sample::select(ExportFormat::ALL.to_vec()),
    ) {
        let logical = segments.join("/");
        let folder = normalize_folder(format, &logical);
        prop_assert_eq!(&folder, &normalize_folder(format, &logical));

        let parts = folder.segments();
        prop_assert!(parts.len() == 2 || (parts.len() == 3 && parts[0] == "Custom" && folder.custom));
        for part in parts {
            prop_assert!(!part.eq_ignore_ascii_case("unknown"));
            prop_assert!(!part.is_empty() && part != "." && part != "..");
            prop_assert!(!part.contains('/') && !part.contains('\\') && !part.contains(':'));
        }
    }
}
