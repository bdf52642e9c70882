//! CSV export of scalar time series
//!
//! Tables up to the configured row limit are written as one file. Larger
//! tables are split into ordered parts beside the requested path, with an
//! index file listing each part and its row count:
//!
//! ```text
//! <name>_part_1_of_3.csv
//! <name>_part_2_of_3.csv
//! <name>_part_3_of_3.csv
//! <name>_index.csv
//! ```

use crate::errors::{ExportError, Result};
use crate::request::{ExportOutcome, TableRow, Tier};
use csv::{QuoteStyle, WriterBuilder};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Constant columns written before `year` and `value`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMetadata {
    pub dataset: String,
    pub parameter: String,
    pub index: String,
}

impl TableMetadata {
    const HEADERS: [&'static str; 3] = ["dataset", "parameter", "index"];

    fn values(&self) -> [&str; 3] {
        [&self.dataset, &self.parameter, &self.index]
    }
}

/// Row counts of each part for `total` rows with at most `max_rows` per part
///
/// A single entry means no split is needed.
#[must_use]
pub fn plan_parts(total: usize, max_rows: usize) -> Vec<usize> {
    let max_rows = max_rows.max(1);
    if total <= max_rows {
        return vec![total];
    }
    let parts = total.div_ceil(max_rows);
    (0..parts)
        .map(|i| max_rows.min(total - i * max_rows))
        .collect()
}

/// `<stem>_part_{i}_of_{n}.<ext>` beside `path`, 1-based
#[must_use]
pub fn part_path(path: &Path, part: usize, parts: usize) -> PathBuf {
    sibling(path, &format!("_part_{part}_of_{parts}"))
}

/// `<stem>_index.<ext>` beside `path`
#[must_use]
pub fn index_path(path: &Path) -> PathBuf {
    sibling(path, "_index")
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}{suffix}.{}", ext.to_string_lossy()),
        None => format!("{stem}{suffix}"),
    };
    path.with_file_name(name)
}

/// Writes `{year, value}` rows, splitting oversized tables
#[derive(Debug, Clone, Copy)]
pub struct TabularExporter {
    max_rows: usize,
}

impl TabularExporter {
    #[must_use]
    pub const fn new(max_rows: usize) -> Self {
        Self { max_rows }
    }

    /// Write `rows` to `path`, or to parts beside it when over the limit
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::NoDataAvailable`] for an empty table, or any
    /// CSV / I/O error.
    pub fn export(
        &self,
        rows: &[TableRow],
        metadata: Option<&TableMetadata>,
        path: &Path,
    ) -> Result<ExportOutcome> {
        if rows.is_empty() {
            return Err(ExportError::NoDataAvailable(
                "the time series has no rows".to_string(),
            ));
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let plan = plan_parts(rows.len(), self.max_rows);
        if plan.len() == 1 {
            write_table(path, rows, metadata)?;
            info!(rows = rows.len(), path = %path.display(), "Table written");
            return Ok(ExportOutcome::success(
                Some(Tier::Direct),
                format!("Export complete: saved {} rows to {}", rows.len(), path.display()),
            )
            .with_artifacts(vec![path.to_path_buf()]));
        }

        let parts = plan.len();
        let mut artifacts = Vec::with_capacity(parts + 1);
        let mut index_rows = Vec::with_capacity(parts);
        let mut start = 0;
        for (i, &count) in plan.iter().enumerate() {
            let part = part_path(path, i + 1, parts);
            write_table(&part, &rows[start..start + count], metadata)?;
            debug!(part = i + 1, parts, rows = count, "Table part written");
            index_rows.push((file_name(&part), count));
            artifacts.push(part);
            start += count;
        }

        let index = index_path(path);
        let mut wtr = WriterBuilder::new()
            .quote_style(QuoteStyle::Necessary)
            .from_writer(BufWriter::new(File::create(&index)?));
        wtr.write_record(["part_name", "row_count"])?;
        for (name, count) in &index_rows {
            let count = count.to_string();
            wtr.write_record([name.as_str(), count.as_str()])?;
        }
        wtr.flush()?;
        artifacts.push(index.clone());

        info!(rows = rows.len(), parts, index = %index.display(), "Table split into parts");
        Ok(ExportOutcome::success(
            Some(Tier::Direct),
            format!(
                "Export complete: saved {} rows in {parts} parts, index {}",
                rows.len(),
                index.display()
            ),
        )
        .with_artifacts(artifacts))
    }
}

fn write_table(path: &Path, rows: &[TableRow], metadata: Option<&TableMetadata>) -> Result<()> {
    let mut wtr = WriterBuilder::new()
        .quote_style(QuoteStyle::Necessary)
        .from_writer(BufWriter::new(File::create(path)?));

    let mut header: Vec<&str> = Vec::with_capacity(5);
    if metadata.is_some() {
        header.extend(TableMetadata::HEADERS);
    }
    header.extend(["year", "value"]);
    wtr.write_record(&header)?;

    for row in rows {
        let year = row.year.to_string();
        let value = row.value.to_string();
        let mut record: Vec<&str> = Vec::with_capacity(header.len());
        if let Some(meta) = metadata {
            record.extend(meta.values());
        }
        record.push(&year);
        record.push(&value);
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
