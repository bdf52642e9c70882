//! NetCDF containers for gridded exports
//!
//! Two layouts are written:
//!
//! - a single grid: dimensions `(lat, lon)`, coordinate variables at pixel
//!   centres and one `data` variable
//! - a year stack: dimensions `(year, lat, lon)` with an integer `year`
//!   coordinate leading the `data` variable
//!
//! Both carry the same variable and global attributes so that GIS and
//! analysis tools see a consistent schema across single-year and multi-year
//! exports.

use crate::errors::{ExportError, Result};
use crate::raster::{read_geotiff, RasterGrid};
use chrono::Utc;
use ndarray::{Array2, Array3};
use netcdf::AttributeValue;
use std::{fs, path::Path};
use tracing::debug;

/// Name of the gridded value variable
pub const DATA_VARIABLE: &str = "data";

/// Descriptive attributes written alongside the grid
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GriddedMetadata {
    pub title: String,
    pub source: String,
    pub long_name: String,
    pub units: String,
    /// Set for single-year files so the year survives without a `year` axis
    pub year: Option<i32>,
}

impl GriddedMetadata {
    pub fn new(dataset: &str, index: &str) -> Self {
        Self {
            title: format!("{index} from {dataset}"),
            source: dataset.to_string(),
            long_name: index.to_string(),
            units: String::new(),
            year: None,
        }
    }

    #[must_use]
    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = units.into();
        self
    }

    #[must_use]
    pub fn for_year(mut self, year: i32) -> Self {
        self.year = Some(year);
        self
    }
}

/// One `(lat, lon)` grid read back from a NetCDF file
#[derive(Debug, Clone, PartialEq)]
pub struct YearGrid {
    pub lat: Vec<f64>,
    pub lon: Vec<f64>,
    pub data: Array2<f32>,
    pub nodata: f32,
    pub year: Option<i32>,
}

impl YearGrid {
    /// Whether `other` sits on exactly the same coordinates
    #[must_use]
    pub fn same_grid(&self, other: &YearGrid) -> bool {
        let close = |a: &[f64], b: &[f64]| {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() <= 1e-9)
        };
        close(&self.lat, &other.lat) && close(&self.lon, &other.lon)
    }
}

/// Convert a GeoTIFF into a single-grid NetCDF file
///
/// # Errors
///
/// Returns [`ExportError::ConversionFailed`] wrapping whatever went wrong
/// reading the GeoTIFF or writing the NetCDF file.
pub fn convert_geotiff_to_netcdf(
    tif_path: &Path,
    nc_path: &Path,
    metadata: &GriddedMetadata,
) -> Result<()> {
    let grid = read_geotiff(tif_path).map_err(|e| {
        ExportError::ConversionFailed(format!("cannot read {}: {e}", tif_path.display()))
    })?;
    write_grid_netcdf(nc_path, &grid, metadata).map_err(|e| {
        ExportError::ConversionFailed(format!("cannot write {}: {e}", nc_path.display()))
    })?;
    debug!(
        from = %tif_path.display(),
        to = %nc_path.display(),
        width = grid.width(),
        height = grid.height(),
        "Converted GeoTIFF to NetCDF"
    );
    Ok(())
}

/// Write `grid` as a `(lat, lon)` NetCDF file, replacing any existing file
///
/// # Errors
///
/// Returns an error if the file cannot be created or written.
pub fn write_grid_netcdf(path: &Path, grid: &RasterGrid, metadata: &GriddedMetadata) -> Result<()> {
    prepare_output(path)?;
    let lat = grid.y_coordinates();
    let lon = grid.x_coordinates();

    let mut file = netcdf::create(path)?;
    file.add_dimension("lat", lat.len())?;
    file.add_dimension("lon", lon.len())?;
    write_coordinates(&mut file, &lat, &lon)?;

    {
        let mut var = file.add_variable::<f32>(DATA_VARIABLE, &["lat", "lon"])?;
        var.put_attribute("_FillValue", grid.nodata())?;
        var.put_attribute("missing_value", grid.nodata())?;
        var.put_attribute("long_name", metadata.long_name.clone())?;
        var.put_attribute("units", metadata.units.clone())?;
        var.put(grid.data().view(), ..)?;
    }

    write_global_attributes(&mut file, metadata)?;
    Ok(())
}

/// Write a `(year, lat, lon)` stack, replacing any existing file
///
/// # Errors
///
/// Returns [`ExportError::MergeFailed`] if the stack shape disagrees with
/// the coordinates, or any NetCDF error.
pub fn write_year_stack(
    path: &Path,
    years: &[i32],
    lat: &[f64],
    lon: &[f64],
    stack: &Array3<f32>,
    nodata: f32,
    metadata: &GriddedMetadata,
) -> Result<()> {
    if stack.dim() != (years.len(), lat.len(), lon.len()) {
        return Err(ExportError::MergeFailed(format!(
            "stack shape {:?} does not match {} years x {} lat x {} lon",
            stack.dim(),
            years.len(),
            lat.len(),
            lon.len()
        )));
    }
    prepare_output(path)?;

    let mut file = netcdf::create(path)?;
    file.add_dimension("year", years.len())?;
    file.add_dimension("lat", lat.len())?;
    file.add_dimension("lon", lon.len())?;

    {
        let mut var = file.add_variable::<i32>("year", &["year"])?;
        var.put_attribute("long_name", "year")?;
        var.put_values(years, ..)?;
    }
    write_coordinates(&mut file, lat, lon)?;

    {
        let mut var = file.add_variable::<f32>(DATA_VARIABLE, &["year", "lat", "lon"])?;
        var.put_attribute("_FillValue", nodata)?;
        var.put_attribute("missing_value", nodata)?;
        var.put_attribute("long_name", metadata.long_name.clone())?;
        var.put_attribute("units", metadata.units.clone())?;
        var.put(stack.view(), ..)?;
    }

    let stack_metadata = GriddedMetadata {
        year: None,
        ..metadata.clone()
    };
    write_global_attributes(&mut file, &stack_metadata)?;
    Ok(())
}

/// Read the grid from a single-year file
///
/// Accepts both `(lat, lon)` data and a `(year, lat, lon)` variable with a
/// single year. The year comes from the `year` coordinate when present,
/// otherwise from the global `year` attribute.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or does not contain a
/// usable `data` variable.
pub fn read_year_grid(path: &Path) -> Result<YearGrid> {
    let file = netcdf::open(path)?;
    let lat = read_f64_variable(&file, "lat")?;
    let lon = read_f64_variable(&file, "lon")?;

    let var = file.variable(DATA_VARIABLE).ok_or_else(|| {
        ExportError::Generic(format!("{} has no '{DATA_VARIABLE}' variable", path.display()))
    })?;
    let shape: Vec<usize> = var.dimensions().iter().map(|d| d.len()).collect();
    let rows_cols = match shape.as_slice() {
        [rows, cols] => (*rows, *cols),
        [1, rows, cols] => (*rows, *cols),
        other => {
            return Err(ExportError::Generic(format!(
                "{} has unsupported data shape {:?}",
                path.display(),
                other
            )))
        }
    };
    if rows_cols != (lat.len(), lon.len()) {
        return Err(ExportError::Generic(format!(
            "{} data shape {:?} does not match coordinates",
            path.display(),
            rows_cols
        )));
    }

    let values: Vec<f32> = var.get_values::<f32, _>(..)?;
    let data = Array2::from_shape_vec(rows_cols, values)?;
    let nodata = var
        .attribute("_FillValue")
        .and_then(|attr| attribute_as_f64(attr.value().ok()?))
        .map_or(crate::raster::DEFAULT_NODATA, |v| v as f32);

    let year = match file.variable("year") {
        Some(year_var) => year_var.get_values::<i32, _>(..)?.first().copied(),
        None => file
            .attribute("year")
            .and_then(|attr| attribute_as_f64(attr.value().ok()?))
            .map(|v| v as i32),
    };

    Ok(YearGrid {
        lat,
        lon,
        data,
        nodata,
        year,
    })
}

/// Values of the `year` coordinate of a stacked file
///
/// # Errors
///
/// Returns an error if the file or its `year` variable is missing.
pub fn read_year_axis(path: &Path) -> Result<Vec<i32>> {
    let file = netcdf::open(path)?;
    let var = file.variable("year").ok_or_else(|| {
        ExportError::Generic(format!("{} has no 'year' coordinate", path.display()))
    })?;
    Ok(var.get_values::<i32, _>(..)?)
}

/// Shape of the `data` variable
///
/// # Errors
///
/// Returns an error if the file or its `data` variable is missing.
pub fn data_shape(path: &Path) -> Result<Vec<usize>> {
    let file = netcdf::open(path)?;
    let var = file.variable(DATA_VARIABLE).ok_or_else(|| {
        ExportError::Generic(format!("{} has no '{DATA_VARIABLE}' variable", path.display()))
    })?;
    Ok(var.dimensions().iter().map(|d| d.len()).collect())
}

fn prepare_output(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_file(path)?;
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn write_coordinates(file: &mut netcdf::FileMut, lat: &[f64], lon: &[f64]) -> Result<()> {
    {
        let mut var = file.add_variable::<f64>("lat", &["lat"])?;
        var.put_attribute("units", "degrees_north")?;
        var.put_attribute("standard_name", "latitude")?;
        var.put_values(lat, ..)?;
    }
    {
        let mut var = file.add_variable::<f64>("lon", &["lon"])?;
        var.put_attribute("units", "degrees_east")?;
        var.put_attribute("standard_name", "longitude")?;
        var.put_values(lon, ..)?;
    }
    Ok(())
}

fn write_global_attributes(file: &mut netcdf::FileMut, metadata: &GriddedMetadata) -> Result<()> {
    file.add_attribute("title", metadata.title.clone())?;
    file.add_attribute("source", metadata.source.clone())?;
    file.add_attribute("creation_date", Utc::now().format("%Y-%m-%d").to_string())?;
    if let Some(year) = metadata.year {
        file.add_attribute("year", year)?;
    }
    file.add_attribute(
        "history",
        format!("Created by climate_export on {}", Utc::now().to_rfc3339()),
    )?;
    Ok(())
}

fn read_f64_variable(file: &netcdf::File, name: &str) -> Result<Vec<f64>> {
    let var = file
        .variable(name)
        .ok_or_else(|| ExportError::Generic(format!("missing '{name}' coordinate")))?;
    Ok(var.get_values::<f64, _>(..)?)
}

fn attribute_as_f64(value: AttributeValue) -> Option<f64> {
    match value {
        AttributeValue::Float(v) => Some(f64::from(v)),
        AttributeValue::Double(v) => Some(v),
        AttributeValue::Int(v) => Some(f64::from(v)),
        AttributeValue::Short(v) => Some(f64::from(v)),
        _ => None,
    }
}

