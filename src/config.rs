//! Export configuration
//!
//! [`ExportConfig`] is the single immutable description of where artifacts
//! land and of every size threshold the pipeline escalates on. It is built
//! once (defaults, a TOML file, environment overrides) and then shared by
//! reference with the path resolver, the tiered strategy and the batch
//! orchestrator.

use crate::errors::{ExportError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding [`ExportConfig::export_root`]
pub const ENV_EXPORT_ROOT: &str = "CLIMATE_EXPORT_ROOT";

/// Environment variable overriding [`ExportConfig::remote_root`]
pub const ENV_REMOTE_ROOT: &str = "CLIMATE_EXPORT_REMOTE_ROOT";

/// Configuration for the export pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Local directory under which every format directory is created
    pub export_root: PathBuf,
    /// Top-level folder used for remote job destinations
    pub remote_root: String,
    /// Estimated pixel count above which a raster is treated as oversized
    pub max_pixels_direct: u64,
    /// Side length in metres of one nominal pixel for approximate estimates
    pub nominal_pixel_size_m: f64,
    /// Rows of the spatial chunk grid
    pub chunk_rows: usize,
    /// Columns of the spatial chunk grid
    pub chunk_cols: usize,
    /// Maximum rows per CSV file before the table is split into parts
    pub max_rows_csv: usize,
    /// Years dispatched together in one parallel batch
    pub batch_size: usize,
    /// Upper bound on batch worker threads
    pub max_workers: usize,
    /// Export resolution in metres
    pub export_scale_m: f64,
    /// Output coordinate reference system
    pub crs: String,
    /// Pixel limit passed to remote export jobs
    pub remote_max_pixels: u64,
    /// Upper bound on waiting for a transferred file to appear
    pub file_wait_timeout_ms: u64,
    /// Poll interval while waiting for a transferred file
    pub file_poll_interval_ms: u64,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            export_root: default_export_root(),
            remote_root: "Climate_Exports".to_string(),
            max_pixels_direct: 5_000_000,
            nominal_pixel_size_m: 500.0,
            chunk_rows: 2,
            chunk_cols: 2,
            max_rows_csv: 1_000_000,
            batch_size: 5,
            max_workers: 4,
            export_scale_m: 500.0,
            crs: "EPSG:4326".to_string(),
            remote_max_pixels: 1_000_000_000,
            file_wait_timeout_ms: 60_000,
            file_poll_interval_ms: 250,
        }
    }
}

fn default_export_root() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("climate_tool_exports")
}

impl ExportConfig {
    /// Create a default configuration rooted at `export_root`
    pub fn with_root(export_root: impl Into<PathBuf>) -> Self {
        Self {
            export_root: export_root.into(),
            ..Self::default()
        }
    }

    /// Loads configuration from a TOML file
    ///
    /// Missing keys take their defaults. Environment overrides are applied
    /// after parsing and the result is validated.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::Configuration`] if the file cannot be read,
    /// does not parse, or fails validation.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| {
            ExportError::Configuration(format!(
                "Failed to read configuration file {}: {}",
                path.display(),
                e
            ))
        })?;
        let mut config = Self::from_toml_str(&contents)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parses configuration from TOML text without touching the environment
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::Configuration`] on malformed TOML.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| ExportError::Configuration(format!("Invalid TOML: {}", e)))
    }

    /// Applies `CLIMATE_EXPORT_*` environment overrides
    pub fn apply_env_overrides(&mut self) {
        if let Some(root) = std::env::var_os(ENV_EXPORT_ROOT) {
            if !root.is_empty() {
                self.export_root = PathBuf::from(root);
            }
        }
        if let Ok(remote) = std::env::var(ENV_REMOTE_ROOT) {
            if !remote.trim().is_empty() {
                self.remote_root = remote.trim().to_string();
            }
        }
    }

    /// Checks that every threshold is usable
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::Configuration`] naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        let invalid = |field: &str, detail: &str| {
            Err(ExportError::Configuration(format!("{field} {detail}")))
        };

        if self.chunk_rows == 0 || self.chunk_cols == 0 {
            return invalid("chunk grid", "must have at least one row and one column");
        }
        if self.max_rows_csv == 0 {
            return invalid("max_rows_csv", "must be greater than zero");
        }
        if self.batch_size == 0 {
            return invalid("batch_size", "must be greater than zero");
        }
        if self.max_workers == 0 {
            return invalid("max_workers", "must be greater than zero");
        }
        if !(self.nominal_pixel_size_m.is_finite() && self.nominal_pixel_size_m > 0.0) {
            return invalid("nominal_pixel_size_m", "must be a positive number");
        }
        if !(self.export_scale_m.is_finite() && self.export_scale_m > 0.0) {
            return invalid("export_scale_m", "must be a positive number");
        }
        if self.crs.trim().is_empty() {
            return invalid("crs", "must not be empty");
        }
        if self.file_poll_interval_ms == 0 {
            return invalid("file_poll_interval_ms", "must be greater than zero");
        }
        Ok(())
    }

    /// Area in square kilometres covered by one nominal pixel
    #[must_use]
    pub fn nominal_pixel_area_km2(&self) -> f64 {
        let side_km = self.nominal_pixel_size_m / 1000.0;
        side_km * side_km
    }

    /// Bounded wait applied to externally created files
    #[must_use]
    pub const fn file_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.file_wait_timeout_ms)
    }

    /// Poll interval while waiting for externally created files
    #[must_use]
    pub const fn file_poll_interval(&self) -> Duration {
        Duration::from_millis(self.file_poll_interval_ms)
    }
}
