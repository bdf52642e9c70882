//! Centralized error handling for the export pipeline
//!
//! Every fallible operation in the crate returns [`Result`], whose error type
//! [`ExportError`] separates the recoverable pipeline conditions (a missing
//! tile, a failed transfer, a conversion problem) from infrastructure errors
//! raised by the NetCDF, TIFF and CSV libraries.

use thiserror::Error;

/// Main error type for export operations
#[derive(Debug, Error)]
pub enum ExportError {
    /// The analysis provider found nothing for the region or date range
    #[error("No data available: {0}")]
    NoDataAvailable(String),

    /// Neither exact nor approximate size estimation succeeded
    #[error("Size estimation failed: {0}")]
    SizeEstimationFailed(String),

    /// A whole-region transfer to local storage failed
    #[error("Transfer failed: {0}")]
    TransferFailed(String),

    /// A single spatial chunk could not be exported
    #[error("Export of chunk {row}_{col} failed: {message}")]
    ChunkExportFailed {
        row: usize,
        col: usize,
        message: String,
    },

    /// The mosaic step found no tile files on disk
    #[error("No tiles available to merge")]
    NoTilesAvailable,

    /// Tiles or year files exist but could not be combined
    #[error("Merge failed: {0}")]
    MergeFailed(String),

    /// A raster was exported but converting it to a gridded container failed
    #[error("Conversion failed: {0}")]
    ConversionFailed(String),

    /// The remote job could not be submitted; no further fallback exists
    #[error("Remote submission failed: {0}")]
    RemoteSubmissionFailed(String),

    /// Bounds or boundary rings that cannot describe a region
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Worker pool could not be created
    #[error("Thread pool error: {0}")]
    ThreadPoolError(String),

    /// NetCDF file operation errors
    #[error("NetCDF error: {0}")]
    NetCDFError(#[from] netcdf::Error),

    /// GeoTIFF encoding or decoding errors
    #[error("GeoTIFF error: {0}")]
    TiffError(#[from] tiff::TiffError),

    /// Delimited table writing errors
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    /// I/O operation errors
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Array shape or dimension error
    #[error("Array error: {0}")]
    ArrayError(#[from] ndarray::ShapeError),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Anything else
    #[error("{0}")]
    Generic(String),
}

impl ExportError {
    /// Whether the error means the source had nothing to export
    #[must_use]
    pub const fn is_no_data(&self) -> bool {
        matches!(self, Self::NoDataAvailable(_))
    }
}

impl From<String> for ExportError {
    fn from(error: String) -> Self {
        ExportError::Generic(error)
    }
}

impl From<&str> for ExportError {
    fn from(error: &str) -> Self {
        ExportError::Generic(error.to_string())
    }
}

/// Text of a caught panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Result type alias for export operations
pub type Result<T> = std::result::Result<T, ExportError>;
