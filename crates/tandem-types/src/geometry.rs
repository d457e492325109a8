//! Planar positions and geobroadcast dissemination areas.
//!
//! A [`GeoArea`] is attached to a broadcast message at issue time and
//! never mutated afterwards. Containment is the single geometric
//! primitive the tracker needs: a station is a candidate recipient of a
//! message exactly when its position is inside the message's area.
//! Points on the boundary count as inside for every shape.
//!
//! Areas are validated once, when a message is issued; degenerate
//! geometry (zero radius, inverted bounds, concave vertex order) is
//! rejected there and never reaches the active message set.

use serde::{Deserialize, Serialize};

/// A point in the shared planar coordinate system of both simulators.
///
/// Units are meters; the origin is whatever the traffic scenario
/// defines. Both simulators must agree on the frame, which is why the
/// controller only ever copies positions through, never transforms them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// East-west coordinate in meters.
    pub x: f64,
    /// North-south coordinate in meters.
    pub y: f64,
}

impl Position {
    /// Create a position from raw coordinates.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Squared euclidean distance to `other`.
    ///
    /// Kept squared so circle containment never takes a square root.
    #[must_use]
    pub fn distance_sq(self, other: Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx.mul_add(dx, dy * dy)
    }

    /// Whether both coordinates are finite numbers.
    #[must_use]
    pub const fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Reasons an area is rejected at message-issue time.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AreaError {
    /// Circle radius was zero or negative.
    #[error("circle radius must be positive, got {radius}")]
    NonPositiveRadius {
        /// The offending radius value.
        radius: f64,
    },

    /// Rectangle min corner was not strictly below max on both axes.
    #[error("rectangle bounds are degenerate: min must lie strictly below max on both axes")]
    DegenerateRectangle,

    /// One or both ellipse semi-axes were zero or negative.
    #[error("ellipse semi-axes must be positive, got {semi_x} x {semi_y}")]
    NonPositiveAxes {
        /// Semi-axis along x.
        semi_x: f64,
        /// Semi-axis along y.
        semi_y: f64,
    },

    /// Polygon had fewer than three vertices.
    #[error("polygon needs at least three vertices, got {count}")]
    TooFewVertices {
        /// Number of vertices supplied.
        count: usize,
    },

    /// Polygon vertices mix turn directions (not convex in order).
    #[error("polygon vertices are not in convex order")]
    NotConvex,

    /// All polygon vertices are collinear.
    #[error("polygon has zero area")]
    ZeroArea,

    /// A coordinate or parameter was NaN or infinite.
    #[error("area contains a non-finite value")]
    NonFinite,
}

/// Geometric dissemination area of a geobroadcast message.
///
/// One containment test per variant; no trait objects, no virtual
/// dispatch. Shapes are immutable once attached to a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GeoArea {
    /// All points within `radius` meters of `center`.
    Circle {
        /// Center of the disc.
        center: Position,
        /// Radius in meters, strictly positive.
        radius: f64,
    },

    /// Axis-aligned rectangle spanned by two corners.
    Rectangle {
        /// Corner with the smallest coordinates.
        min: Position,
        /// Corner with the largest coordinates.
        max: Position,
    },

    /// Axis-aligned ellipse given by center and semi-axes.
    Ellipse {
        /// Center of the ellipse.
        center: Position,
        /// Semi-axis along x, strictly positive.
        semi_x: f64,
        /// Semi-axis along y, strictly positive.
        semi_y: f64,
    },

    /// Convex polygon given by vertices in consistent winding order.
    ConvexPolygon {
        /// Ordered vertices; first and last are implicitly joined.
        vertices: Vec<Position>,
    },
}

impl GeoArea {
    /// Test whether `point` lies inside the area (boundary inclusive).
    #[must_use]
    pub fn contains(&self, point: Position) -> bool {
        match self {
            Self::Circle { center, radius } => {
                point.distance_sq(*center) <= radius * radius
            }
            Self::Rectangle { min, max } => {
                point.x >= min.x && point.x <= max.x && point.y >= min.y && point.y <= max.y
            }
            Self::Ellipse {
                center,
                semi_x,
                semi_y,
            } => {
                let nx = (point.x - center.x) / semi_x;
                let ny = (point.y - center.y) / semi_y;
                nx.mul_add(nx, ny * ny) <= 1.0
            }
            Self::ConvexPolygon { vertices } => polygon_contains(vertices, point),
        }
    }

    /// Validate the shape parameters.
    ///
    /// Called once at message-issue time; an `Err` here means the
    /// message is rejected synchronously and never tracked.
    pub fn validate(&self) -> Result<(), AreaError> {
        match self {
            Self::Circle { center, radius } => {
                if !center.is_finite() || !radius.is_finite() {
                    return Err(AreaError::NonFinite);
                }
                if *radius <= 0.0 {
                    return Err(AreaError::NonPositiveRadius { radius: *radius });
                }
                Ok(())
            }
            Self::Rectangle { min, max } => {
                if !min.is_finite() || !max.is_finite() {
                    return Err(AreaError::NonFinite);
                }
                if min.x >= max.x || min.y >= max.y {
                    return Err(AreaError::DegenerateRectangle);
                }
                Ok(())
            }
            Self::Ellipse {
                center,
                semi_x,
                semi_y,
            } => {
                if !center.is_finite() || !semi_x.is_finite() || !semi_y.is_finite() {
                    return Err(AreaError::NonFinite);
                }
                if *semi_x <= 0.0 || *semi_y <= 0.0 {
                    return Err(AreaError::NonPositiveAxes {
                        semi_x: *semi_x,
                        semi_y: *semi_y,
                    });
                }
                Ok(())
            }
            Self::ConvexPolygon { vertices } => validate_polygon(vertices),
        }
    }

    /// Short shape name for log fields.
    #[must_use]
    pub const fn shape_name(&self) -> &'static str {
        match self {
            Self::Circle { .. } => "circle",
            Self::Rectangle { .. } => "rectangle",
            Self::Ellipse { .. } => "ellipse",
            Self::ConvexPolygon { .. } => "convex_polygon",
        }
    }
}

/// Cross product of edge `a -> b` with the vector `a -> p`.
///
/// Positive when `p` is left of the edge, negative when right, zero
/// when collinear.
fn edge_cross(a: Position, b: Position, p: Position) -> f64 {
    (b.x - a.x).mul_add(p.y - a.y, -((b.y - a.y) * (p.x - a.x)))
}

/// Point-in-convex-polygon via consistent cross-product sign.
///
/// The point is inside (or on the boundary) exactly when its edge
/// crosses never mix strict signs over the ordered vertex cycle.
fn polygon_contains(vertices: &[Position], point: Position) -> bool {
    if vertices.len() < 3 {
        return false;
    }
    let mut has_left = false;
    let mut has_right = false;
    for (a, b) in vertices.iter().zip(vertices.iter().cycle().skip(1)) {
        let cross = edge_cross(*a, *b, point);
        if cross > 0.0 {
            has_left = true;
        }
        if cross < 0.0 {
            has_right = true;
        }
    }
    !(has_left && has_right)
}

/// Reject polygons that are too small, non-finite, collinear, or
/// concave. Collinear runs within an otherwise convex outline are
/// tolerated; a fully flat vertex set is not.
fn validate_polygon(vertices: &[Position]) -> Result<(), AreaError> {
    if vertices.len() < 3 {
        return Err(AreaError::TooFewVertices {
            count: vertices.len(),
        });
    }
    if vertices.iter().any(|v| !v.is_finite()) {
        return Err(AreaError::NonFinite);
    }
    let mut has_left = false;
    let mut has_right = false;
    let seconds = vertices.iter().cycle().skip(1);
    let thirds = vertices.iter().cycle().skip(2);
    for ((a, b), c) in vertices.iter().zip(seconds).zip(thirds) {
        let cross = edge_cross(*a, *b, *c);
        if cross > 0.0 {
            has_left = true;
        }
        if cross < 0.0 {
            has_right = true;
        }
    }
    if has_left && has_right {
        return Err(AreaError::NotConvex);
    }
    if !has_left && !has_right {
        return Err(AreaError::ZeroArea);
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn circle(cx: f64, cy: f64, r: f64) -> GeoArea {
        GeoArea::Circle {
            center: Position::new(cx, cy),
            radius: r,
        }
    }

    fn unit_square() -> GeoArea {
        GeoArea::ConvexPolygon {
            vertices: vec![
                Position::new(0.0, 0.0),
                Position::new(1.0, 0.0),
                Position::new(1.0, 1.0),
                Position::new(0.0, 1.0),
            ],
        }
    }

    #[test]
    fn circle_containment_table() {
        let area = circle(0.0, 0.0, 10.0);
        assert!(area.contains(Position::new(5.0, 0.0)));
        assert!(!area.contains(Position::new(11.0, 0.0)));
        // Boundary counts as inside.
        assert!(area.contains(Position::new(10.0, 0.0)));
        assert!(area.contains(Position::new(0.0, -10.0)));
        assert!(!area.contains(Position::new(7.1, 7.1)));
    }

    #[test]
    fn rectangle_containment_table() {
        let area = GeoArea::Rectangle {
            min: Position::new(-2.0, -1.0),
            max: Position::new(4.0, 3.0),
        };
        assert!(area.contains(Position::new(0.0, 0.0)));
        assert!(area.contains(Position::new(-2.0, -1.0)));
        assert!(area.contains(Position::new(4.0, 3.0)));
        assert!(area.contains(Position::new(4.0, 0.0)));
        assert!(!area.contains(Position::new(4.1, 0.0)));
        assert!(!area.contains(Position::new(0.0, -1.5)));
    }

    #[test]
    fn ellipse_containment_table() {
        let area = GeoArea::Ellipse {
            center: Position::new(0.0, 0.0),
            semi_x: 4.0,
            semi_y: 2.0,
        };
        assert!(area.contains(Position::new(2.0, 1.0)));
        // Axis endpoints are boundary points.
        assert!(area.contains(Position::new(4.0, 0.0)));
        assert!(area.contains(Position::new(0.0, -2.0)));
        assert!(!area.contains(Position::new(4.0, 0.5)));
        assert!(!area.contains(Position::new(3.0, 1.4)));
    }

    #[test]
    fn polygon_containment_both_windings() {
        let ccw = unit_square();
        let cw = GeoArea::ConvexPolygon {
            vertices: vec![
                Position::new(0.0, 0.0),
                Position::new(0.0, 1.0),
                Position::new(1.0, 1.0),
                Position::new(1.0, 0.0),
            ],
        };
        for area in [&ccw, &cw] {
            assert!(area.contains(Position::new(0.5, 0.5)));
            // Edge and vertex points are inside.
            assert!(area.contains(Position::new(0.5, 0.0)));
            assert!(area.contains(Position::new(1.0, 1.0)));
            assert!(!area.contains(Position::new(1.5, 0.5)));
            assert!(!area.contains(Position::new(-0.1, 0.5)));
        }
    }

    #[test]
    fn validate_accepts_proper_shapes() {
        assert_eq!(circle(0.0, 0.0, 10.0).validate(), Ok(()));
        assert_eq!(unit_square().validate(), Ok(()));
        let ellipse = GeoArea::Ellipse {
            center: Position::new(1.0, 1.0),
            semi_x: 3.0,
            semi_y: 0.5,
        };
        assert_eq!(ellipse.validate(), Ok(()));
    }

    #[test]
    fn validate_rejects_degenerate_circle() {
        assert_eq!(
            circle(0.0, 0.0, 0.0).validate(),
            Err(AreaError::NonPositiveRadius { radius: 0.0 })
        );
        assert_eq!(
            circle(0.0, 0.0, -3.0).validate(),
            Err(AreaError::NonPositiveRadius { radius: -3.0 })
        );
        assert_eq!(
            circle(f64::NAN, 0.0, 1.0).validate(),
            Err(AreaError::NonFinite)
        );
    }

    #[test]
    fn validate_rejects_inverted_rectangle() {
        let area = GeoArea::Rectangle {
            min: Position::new(4.0, 0.0),
            max: Position::new(0.0, 4.0),
        };
        assert_eq!(area.validate(), Err(AreaError::DegenerateRectangle));
        let flat = GeoArea::Rectangle {
            min: Position::new(0.0, 2.0),
            max: Position::new(4.0, 2.0),
        };
        assert_eq!(flat.validate(), Err(AreaError::DegenerateRectangle));
    }

    #[test]
    fn validate_rejects_bad_polygons() {
        let two = GeoArea::ConvexPolygon {
            vertices: vec![Position::new(0.0, 0.0), Position::new(1.0, 0.0)],
        };
        assert_eq!(two.validate(), Err(AreaError::TooFewVertices { count: 2 }));

        let flat = GeoArea::ConvexPolygon {
            vertices: vec![
                Position::new(0.0, 0.0),
                Position::new(1.0, 0.0),
                Position::new(2.0, 0.0),
            ],
        };
        assert_eq!(flat.validate(), Err(AreaError::ZeroArea));

        let concave = GeoArea::ConvexPolygon {
            vertices: vec![
                Position::new(0.0, 0.0),
                Position::new(4.0, 0.0),
                Position::new(4.0, 4.0),
                Position::new(2.0, 1.0),
                Position::new(0.0, 4.0),
            ],
        };
        assert_eq!(concave.validate(), Err(AreaError::NotConvex));
    }

    #[test]
    fn distance_sq_is_squared_euclidean() {
        let a = Position::new(0.0, 0.0);
        let b = Position::new(3.0, 4.0);
        assert!((a.distance_sq(b) - 25.0).abs() < f64::EPSILON);
    }
}
