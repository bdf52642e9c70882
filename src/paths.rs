//! On-disk layout of exported artifacts
//!
//! Every artifact path is decided here:
//!
//! ```text
//! <export_root>/<FormatDir>/<source>/<category>/<name>.<ext>
//! <export_root>/<FormatDir>/Custom/<source>/<category>/<name>.<ext>
//! ```
//!
//! `FormatDir` is `GeoTIFF`, `CSV` or `NetCDF`. The logical folder a request
//! carries (`<dataset>/<index>`) is normalized by [`normalize_folder`], a
//! pure function, so the same inputs always map to the same place.

use crate::config::ExportConfig;
use crate::errors::Result;
use crate::request::ExportFormat;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Sources that get their own top-level folder
pub const RECOGNIZED_SOURCES: [&str; 5] = ["ERA5", "PRISM", "DAYMET", "general", "Custom"];

/// Folder that unrecognized sources are nested under
pub const CUSTOM_SEGMENT: &str = "Custom";

const DEFAULT_SOURCE: &str = "general";
const UNKNOWN: &str = "unknown";

/// A logical folder reduced to a source and a category
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NormalizedFolder {
    /// Source is not recognized and lives under `Custom/`
    pub custom: bool,
    pub source: String,
    pub category: String,
}

impl NormalizedFolder {
    /// Path segments below the format directory
    #[must_use]
    pub fn segments(&self) -> Vec<&str> {
        let mut segments = Vec::with_capacity(3);
        if self.custom {
            segments.push(CUSTOM_SEGMENT);
        }
        segments.push(self.source.as_str());
        segments.push(self.category.as_str());
        segments
    }

    /// Segments joined with `/`
    #[must_use]
    pub fn as_folder(&self) -> String {
        self.segments().join("/")
    }
}

/// Normalize `logical_folder` into a source and a category
///
/// - "unknown" (any case) becomes the format default
/// - sources are matched case-insensitively against
///   [`RECOGNIZED_SOURCES`]; anything else is nested under `Custom`
/// - a missing category takes the format default; extra segments are
///   folded into the category with `_`
/// - empty, `.` and `..` segments are dropped
#[must_use]
pub fn normalize_folder(format: ExportFormat, logical_folder: &str) -> NormalizedFolder {
    let segments: Vec<String> = logical_folder
        .split(['/', '\\'])
        .map(sanitize_segment)
        .filter(|s| !s.is_empty() && s != "." && s != "..")
        .collect();

    let (raw_source, rest) = match segments.split_first() {
        Some((first, rest)) => (first.as_str(), rest),
        None => (DEFAULT_SOURCE, &[][..]),
    };

    let (source, custom) = if raw_source.eq_ignore_ascii_case(UNKNOWN) {
        (DEFAULT_SOURCE.to_string(), false)
    } else if let Some(known) = RECOGNIZED_SOURCES
        .iter()
        .find(|known| known.eq_ignore_ascii_case(raw_source))
    {
        ((*known).to_string(), false)
    } else {
        (raw_source.to_string(), true)
    };

    let category = rest
        .iter()
        .filter(|s| !s.eq_ignore_ascii_case(UNKNOWN))
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join("_");
    let category = if category.is_empty() {
        format.default_category().to_string()
    } else {
        category
    };

    NormalizedFolder {
        custom,
        source,
        category,
    }
}

fn sanitize_segment(segment: &str) -> String {
    segment
        .trim()
        .chars()
        .map(|c| match c {
            ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "export".to_string(),
        _ => cleaned,
    }
}

/// Maps logical folders and names onto the export root
#[derive(Debug, Clone)]
pub struct PathResolver {
    export_root: PathBuf,
    remote_root: String,
}

impl PathResolver {
    pub fn new(config: &ExportConfig) -> Self {
        Self {
            export_root: config.export_root.clone(),
            remote_root: config.remote_root.clone(),
        }
    }

    #[must_use]
    pub fn export_root(&self) -> &Path {
        &self.export_root
    }

    /// Directory for `logical_folder` without creating it
    #[must_use]
    pub fn folder_path(&self, format: ExportFormat, logical_folder: &str) -> PathBuf {
        let folder = normalize_folder(format, logical_folder);
        let mut dir = self.export_root.join(format.dir_name());
        for segment in folder.segments() {
            dir.push(segment);
        }
        dir
    }

    /// Create and return the directory for `logical_folder`
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory cannot be created.
    pub fn resolve_dir(&self, format: ExportFormat, logical_folder: &str) -> Result<PathBuf> {
        let dir = self.folder_path(format, logical_folder);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Full artifact path; intermediate directories are created
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory cannot be created.
    pub fn resolve(
        &self,
        format: ExportFormat,
        logical_folder: &str,
        name: &str,
        extension: &str,
    ) -> Result<PathBuf> {
        let dir = self.resolve_dir(format, logical_folder)?;
        let extension = extension.trim_start_matches('.');
        let path = dir.join(format!("{}.{}", sanitize_name(name), extension));
        debug!(path = %path.display(), format = %format, "Resolved export path");
        Ok(path)
    }

    /// `<remote_root>/<source>/<category>` folder for remote jobs
    #[must_use]
    pub fn remote_folder(&self, format: ExportFormat, logical_folder: &str) -> String {
        let folder = normalize_folder(format, logical_folder);
        format!("{}/{}", self.remote_root, folder.as_folder())
    }

    /// Pre-create `<FormatDir>/{ERA5,PRISM,DAYMET,Custom}` for every format
    ///
    /// # Errors
    ///
    /// Returns an I/O error if a directory cannot be created.
    pub fn prepare_layout(&self) -> Result<()> {
        for format in ExportFormat::ALL {
            for source in ["ERA5", "PRISM", "DAYMET", CUSTOM_SEGMENT] {
                fs::create_dir_all(self.export_root.join(format.dir_name()).join(source))?;
            }
        }
        Ok(())
    }
}

