//! Spatial decomposition of oversized exports

use crate::errors::{ExportError, Result};
use crate::geometry::Bounds;
use std::fmt;

/// One cell of a chunk grid; row 0 is the northern edge
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpatialChunk {
    pub grid_row: usize,
    pub grid_col: usize,
    pub bounds: Bounds,
}

impl SpatialChunk {
    /// `<base>_chunk_<row>_<col>`
    #[must_use]
    pub fn tile_name(&self, base: &str) -> String {
        format!("{}_chunk_{}_{}", base, self.grid_row, self.grid_col)
    }
}

impl fmt::Display for SpatialChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chunk {}_{} {}", self.grid_row, self.grid_col, self.bounds)
    }
}

/// Splits a rectangle into a `rows × cols` grid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpatialChunker {
    rows: usize,
    cols: usize,
}

impl SpatialChunker {
    /// # Errors
    ///
    /// Returns [`ExportError::Configuration`] for a zero-sized grid.
    pub fn new(rows: usize, cols: usize) -> Result<Self> {
        if rows == 0 || cols == 0 {
            return Err(ExportError::Configuration(format!(
                "chunk grid must be at least 1x1, got {rows}x{cols}"
            )));
        }
        Ok(Self { rows, cols })
    }

    #[must_use]
    pub const fn rows(&self) -> usize {
        self.rows
    }

    #[must_use]
    pub const fn cols(&self) -> usize {
        self.cols
    }

    #[must_use]
    pub const fn chunk_count(&self) -> usize {
        self.rows * self.cols
    }

    /// Partition `bounds` into chunks, row-major from the north-west
    ///
    /// Edges are computed once and shared by neighbouring chunks, and the
    /// outer edges are exactly those of `bounds`, so the chunks tile the
    /// rectangle with no gap and no overlap.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::InvalidGeometry`] for degenerate bounds.
    pub fn partition(&self, bounds: &Bounds) -> Result<Vec<SpatialChunk>> {
        let bounds = Bounds::new(bounds.min_x, bounds.min_y, bounds.max_x, bounds.max_y)?;
        let x_edges = edges(bounds.min_x, bounds.max_x, self.cols);
        // North to south so that row 0 is the top row
        let y_edges = edges(bounds.max_y, bounds.min_y, self.rows);

        let mut chunks = Vec::with_capacity(self.chunk_count());
        for row in 0..self.rows {
            for col in 0..self.cols {
                chunks.push(SpatialChunk {
                    grid_row: row,
                    grid_col: col,
                    bounds: Bounds {
                        min_x: x_edges[col],
                        min_y: y_edges[row + 1],
                        max_x: x_edges[col + 1],
                        max_y: y_edges[row],
                    },
                });
            }
        }
        Ok(chunks)
    }
}

fn edges(start: f64, end: f64, parts: usize) -> Vec<f64> {
    let step = (end - start) / parts as f64;
    (0..=parts)
        .map(|i| match i {
            0 => start,
            i if i == parts => end,
            i => start + step * i as f64,
        })
        .collect()
}
