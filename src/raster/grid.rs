//! Georeferenced single-band grids
//!
//! Row 0 is the northern edge; pixels are square or rectangular cells of
//! `pixel_width × pixel_height` coordinate units starting at the
//! `(origin_x, origin_y)` north-west corner.

use crate::errors::{ExportError, Result};
use crate::geometry::Bounds;
use ndarray::{s, Array2};

/// Default nodata marker for exported grids
pub const DEFAULT_NODATA: f32 = -9999.0;

/// Affine mapping from pixel indices to coordinates (north-up, no rotation)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    pub origin_x: f64,
    pub origin_y: f64,
    pub pixel_width: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// Transform for a `width × height` grid exactly covering `bounds`
    #[must_use]
    pub fn covering(bounds: &Bounds, width: usize, height: usize) -> Self {
        Self {
            origin_x: bounds.min_x,
            origin_y: bounds.max_y,
            pixel_width: bounds.width() / width as f64,
            pixel_height: bounds.height() / height as f64,
        }
    }

    /// X coordinate of the centre of column `col`
    #[must_use]
    pub fn column_center(&self, col: usize) -> f64 {
        self.origin_x + (col as f64 + 0.5) * self.pixel_width
    }

    /// Y coordinate of the centre of row `row`
    #[must_use]
    pub fn row_center(&self, row: usize) -> f64 {
        self.origin_y - (row as f64 + 0.5) * self.pixel_height
    }
}

/// In-memory raster band with its georeferencing
#[derive(Debug, Clone, PartialEq)]
pub struct RasterGrid {
    data: Array2<f32>,
    transform: GeoTransform,
    nodata: f32,
}

impl RasterGrid {
    /// Wrap `data` (rows × cols) with a transform
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::InvalidGeometry`] for an empty grid or a
    /// non-positive pixel size.
    pub fn new(data: Array2<f32>, transform: GeoTransform, nodata: f32) -> Result<Self> {
        if data.is_empty() {
            return Err(ExportError::InvalidGeometry("raster grid is empty".to_string()));
        }
        if !(transform.pixel_width > 0.0 && transform.pixel_height > 0.0) {
            return Err(ExportError::InvalidGeometry(format!(
                "pixel size must be positive, got {} x {}",
                transform.pixel_width, transform.pixel_height
            )));
        }
        Ok(Self {
            data,
            transform,
            nodata,
        })
    }

    /// Grid of `height × width` pixels exactly covering `bounds`
    ///
    /// # Errors
    ///
    /// Returns an error if the shape of `data` is empty.
    pub fn covering(bounds: &Bounds, data: Array2<f32>, nodata: f32) -> Result<Self> {
        let (height, width) = data.dim();
        let transform = GeoTransform::covering(bounds, width.max(1), height.max(1));
        Self::new(data, transform, nodata)
    }

    #[must_use]
    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    #[must_use]
    pub fn height(&self) -> usize {
        self.data.nrows()
    }

    #[must_use]
    pub fn data(&self) -> &Array2<f32> {
        &self.data
    }

    #[must_use]
    pub const fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    #[must_use]
    pub const fn nodata(&self) -> f32 {
        self.nodata
    }

    /// Extent covered by the grid
    #[must_use]
    pub fn bounds(&self) -> Bounds {
        let t = &self.transform;
        Bounds {
            min_x: t.origin_x,
            min_y: t.origin_y - self.height() as f64 * t.pixel_height,
            max_x: t.origin_x + self.width() as f64 * t.pixel_width,
            max_y: t.origin_y,
        }
    }

    /// Pixel-centre longitudes, west to east
    #[must_use]
    pub fn x_coordinates(&self) -> Vec<f64> {
        (0..self.width())
            .map(|c| self.transform.column_center(c))
            .collect()
    }

    /// Pixel-centre latitudes, north to south
    #[must_use]
    pub fn y_coordinates(&self) -> Vec<f64> {
        (0..self.height())
            .map(|r| self.transform.row_center(r))
            .collect()
    }

    /// Sub-grid of the pixels whose centres fall inside `region`
    ///
    /// Membership is half-open (`min_x <= x < max_x`, `min_y < y <= max_y`)
    /// so adjacent regions sharing an edge never select the same pixel.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::NoDataAvailable`] when no pixel centre lies
    /// inside `region`.
    pub fn clip(&self, region: &Bounds) -> Result<RasterGrid> {
        let cols: Vec<usize> = (0..self.width())
            .filter(|&c| {
                let x = self.transform.column_center(c);
                x >= region.min_x && x < region.max_x
            })
            .collect();
        let rows: Vec<usize> = (0..self.height())
            .filter(|&r| {
                let y = self.transform.row_center(r);
                y > region.min_y && y <= region.max_y
            })
            .collect();

        let (Some(&c0), Some(&c1), Some(&r0), Some(&r1)) =
            (cols.first(), cols.last(), rows.first(), rows.last())
        else {
            return Err(ExportError::NoDataAvailable(format!(
                "region {} does not intersect raster {}",
                region,
                self.bounds()
            )));
        };

        let data = self.data.slice(s![r0..=r1, c0..=c1]).to_owned();
        let transform = GeoTransform {
            origin_x: self.transform.origin_x + c0 as f64 * self.transform.pixel_width,
            origin_y: self.transform.origin_y - r0 as f64 * self.transform.pixel_height,
            ..self.transform
        };
        RasterGrid::new(data, transform, self.nodata)
    }
}
