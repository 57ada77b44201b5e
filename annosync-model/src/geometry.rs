//! GeoJSON-style geometries.

use serde::{Deserialize, Serialize};

/// A 2D position in image pixel coordinates.
pub type Position = [f64; 2];

/// The spatial shape of an object.
///
/// Serialized in GeoJSON form: `{"type": "Polygon", "coordinates": [...]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Geometry {
    Point { coordinates: Position },
    MultiPoint { coordinates: Vec<Position> },
    LineString { coordinates: Vec<Position> },
    Polygon { coordinates: Vec<Vec<Position>> },
    MultiPolygon { coordinates: Vec<Vec<Vec<Position>>> },
}

impl Geometry {
    /// A single point.
    #[must_use]
    pub fn point(x: f64, y: f64) -> Self {
        Self::Point { coordinates: [x, y] }
    }

    /// An axis-aligned rectangle as a closed polygon ring.
    #[must_use]
    pub fn rectangle(x: f64, y: f64, width: f64, height: f64) -> Self {
        let ring = vec![
            [x, y],
            [x + width, y],
            [x + width, y + height],
            [x, y + height],
            [x, y],
        ];
        Self::Polygon {
            coordinates: vec![ring],
        }
    }

    /// The GeoJSON type name.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Point { .. } => "Point",
            Self::MultiPoint { .. } => "MultiPoint",
            Self::LineString { .. } => "LineString",
            Self::Polygon { .. } => "Polygon",
            Self::MultiPolygon { .. } => "MultiPolygon",
        }
    }

    /// Axis-aligned bounds as `(min_x, min_y, max_x, max_y)`, or `None` if empty.
    #[must_use]
    pub fn bounds(&self) -> Option<(f64, f64, f64, f64)> {
        let points: Vec<&Position> = match self {
            Self::Point { coordinates } => vec![coordinates],
            Self::MultiPoint { coordinates } | Self::LineString { coordinates } => {
                coordinates.iter().collect()
            }
            Self::Polygon { coordinates } => coordinates.iter().flatten().collect(),
            Self::MultiPolygon { coordinates } => {
                coordinates.iter().flatten().flatten().collect()
            }
        };

        points.into_iter().fold(None, |acc, [x, y]| {
            Some(match acc {
                None => (*x, *y, *x, *y),
                Some((min_x, min_y, max_x, max_y)) => {
                    (min_x.min(*x), min_y.min(*y), max_x.max(*x), max_y.max(*y))
                }
            })
        })
    }
}
