//! Bounding box types and operations.

use serde::{Deserialize, Serialize};

/// A geographic or projected bounding box.
///
/// For geographic CRS (EPSG:4326), coordinates are in degrees.
/// For projected CRS (EPSG:3857, etc.), coordinates are in CRS units.
/// Serialized with OWS edge names (`left`, `bottom`, `right`, `top`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    #[serde(rename = "left")]
    pub min_x: f64,
    #[serde(rename = "bottom")]
    pub min_y: f64,
    #[serde(rename = "right")]
    pub max_x: f64,
    #[serde(rename = "top")]
    pub max_y: f64,
}

impl BoundingBox {
    /// Create a new bounding box from corner coordinates.
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Width of the bounding box in coordinate units.
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    /// Height of the bounding box in coordinate units.
    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Centre x coordinate (longitude for geographic boxes).
    pub fn centre_x(&self) -> f64 {
        (self.min_x + self.max_x) / 2.0
    }

    /// True when every edge is finite and min <= max on both axes.
    pub fn is_valid(&self) -> bool {
        [self.min_x, self.min_y, self.max_x, self.max_y]
            .iter()
            .all(|v| v.is_finite())
            && self.min_x <= self.max_x
            && self.min_y <= self.max_y
    }

    /// Smallest box containing both.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    /// Check if a point is contained within this bbox.
    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_union() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(5.0, -5.0, 15.0, 8.0);
        let u = a.union(&b);
        assert_eq!(u, BoundingBox::new(0.0, -5.0, 15.0, 10.0));
        assert!(u.contains_point(14.0, -4.0));
    }

    #[test]
    fn test_validity() {
        assert!(BoundingBox::new(-180.0, -90.0, 180.0, 90.0).is_valid());
        assert!(!BoundingBox::new(10.0, 10.0, 5.0, 5.0).is_valid());
        assert!(!BoundingBox::new(f64::NAN, 0.0, 1.0, 1.0).is_valid());
    }

    #[test]
    fn test_serde_edge_names() {
        let bbox = BoundingBox::new(1.0, 2.0, 3.0, 4.0);
        let value = serde_json::to_value(bbox).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"left": 1.0, "bottom": 2.0, "right": 3.0, "top": 4.0})
        );
        let back: BoundingBox = serde_json::from_value(value).unwrap();
        assert_eq!(back, bbox);
        assert_eq!(back.width(), 2.0);
        assert_eq!(back.height(), 2.0);
    }
}
