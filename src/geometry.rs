//! Region-of-interest geometry
//!
//! The pipeline only needs two things from a region: its axis-aligned
//! [`Bounds`] and a serializable boundary to hand to remote jobs.

use crate::errors::{ExportError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

/// Kilometres per degree of latitude
const KM_PER_DEGREE: f64 = 111.32;

/// Axis-aligned bounding rectangle `(min_x, min_y, max_x, max_y)`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Bounds {
    /// Create bounds, rejecting empty or non-finite rectangles
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::InvalidGeometry`] when a coordinate is not
    /// finite or the rectangle has no area.
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Result<Self> {
        let bounds = Self {
            min_x,
            min_y,
            max_x,
            max_y,
        };
        if ![min_x, min_y, max_x, max_y].iter().all(|v| v.is_finite()) {
            return Err(ExportError::InvalidGeometry(format!(
                "non-finite bounds {bounds}"
            )));
        }
        if max_x <= min_x || max_y <= min_y {
            return Err(ExportError::InvalidGeometry(format!(
                "bounds {bounds} have no area"
            )));
        }
        Ok(bounds)
    }

    #[must_use]
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    #[must_use]
    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Planar area in coordinate units squared
    #[must_use]
    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    /// Approximate ground area in km², treating coordinates as degrees
    #[must_use]
    pub fn geodesic_area_km2(&self) -> f64 {
        let mid_lat = ((self.min_y + self.max_y) / 2.0).to_radians();
        let width_km = self.width() * KM_PER_DEGREE * mid_lat.cos().abs();
        let height_km = self.height() * KM_PER_DEGREE;
        width_km * height_km
    }

    /// Smallest rectangle containing both
    #[must_use]
    pub fn union(&self, other: &Bounds) -> Bounds {
        Bounds {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    /// Area shared with `other`; zero when they only touch along an edge
    #[must_use]
    pub fn overlap_area(&self, other: &Bounds) -> f64 {
        let w = self.max_x.min(other.max_x) - self.min_x.max(other.min_x);
        let h = self.max_y.min(other.max_y) - self.min_y.max(other.min_y);
        if w > 0.0 && h > 0.0 {
            w * h
        } else {
            0.0
        }
    }

    /// Coordinate-wise comparison within `tolerance`
    #[must_use]
    pub fn approx_eq(&self, other: &Bounds, tolerance: f64) -> bool {
        (self.min_x - other.min_x).abs() <= tolerance
            && (self.min_y - other.min_y).abs() <= tolerance
            && (self.max_x - other.max_x).abs() <= tolerance
            && (self.max_y - other.max_y).abs() <= tolerance
    }

    /// Closed exterior ring, counter-clockwise from the south-west corner
    #[must_use]
    pub fn ring(&self) -> Vec<[f64; 2]> {
        vec![
            [self.min_x, self.min_y],
            [self.max_x, self.min_y],
            [self.max_x, self.max_y],
            [self.min_x, self.max_y],
            [self.min_x, self.min_y],
        ]
    }
}

impl std::fmt::Display for Bounds {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "({}, {}, {}, {})",
            self.min_x, self.min_y, self.max_x, self.max_y
        )
    }
}

/// Polygonal region of interest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    exterior: Vec<[f64; 2]>,
}

impl Geometry {
    /// Build a geometry from an exterior ring; the ring is closed if needed
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::InvalidGeometry`] for fewer than three distinct
    /// vertices or non-finite coordinates.
    pub fn from_ring(mut exterior: Vec<[f64; 2]>) -> Result<Self> {
        if exterior.iter().flatten().any(|v| !v.is_finite()) {
            return Err(ExportError::InvalidGeometry(
                "ring contains non-finite coordinates".to_string(),
            ));
        }
        if exterior.first() != exterior.last() {
            if let Some(&first) = exterior.first() {
                exterior.push(first);
            }
        }
        if exterior.len() < 4 {
            return Err(ExportError::InvalidGeometry(format!(
                "ring needs at least 3 vertices, got {}",
                exterior.len().saturating_sub(1)
            )));
        }
        let geometry = Self { exterior };
        geometry.bounds()?;
        Ok(geometry)
    }

    /// Rectangle geometry
    #[must_use]
    pub fn from_bounds(bounds: Bounds) -> Self {
        Self {
            exterior: bounds.ring(),
        }
    }

    /// Bounding rectangle of the exterior ring
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::InvalidGeometry`] if the ring is degenerate.
    pub fn bounds(&self) -> Result<Bounds> {
        let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
        let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
        for &[x, y] in &self.exterior {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
        Bounds::new(min_x, min_y, max_x, max_y)
    }

    #[must_use]
    pub fn exterior(&self) -> &[[f64; 2]] {
        &self.exterior
    }

    /// GeoJSON `Polygon` for the boundary
    #[must_use]
    pub fn to_geojson(&self) -> JsonValue {
        json!({
            "type": "Polygon",
            "coordinates": [self.exterior],
        })
    }
}
