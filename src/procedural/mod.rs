//! Procedural generators evaluated per pixel.
//!
//! Each generator follows the same shape: a constructor turns a parameter
//! block into an immutable frame (line equations, animated endpoints, an
//! inverted transform), and [`PixelKernel::process`](crate::PixelKernel::process)
//! evaluates one pixel from that frame alone.
//!
//! - [`beam`] - a tapering, animated soft line segment
//! - [`lines`] - soft polylines with dashes, caps and progressive reveal
//! - [`voronoi`] - 3D cellular noise coloured by cell id
//!
//! Pixel `(x, y)` is evaluated at the integer point `(x, y)`.

pub mod beam;
pub mod lines;
pub mod voronoi;

use glam::Vec2;

/// How a 2D segment meets the perpendicular through a point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum SegmentLine {
    /// `direction.y == 0`
    Horizontal,
    /// `direction.x == 0`
    Vertical,
    /// `y = slope * x + intercept`, with the perpendicular slope cached.
    Sloped {
        slope: f32,
        intercept: f32,
        perpendicular: f32,
    },
}

impl SegmentLine {
    /// Classify the infinite line through `from` and `to`.
    pub(crate) fn through(from: Vec2, to: Vec2) -> Self {
        let direction = to - from;
        if direction.y == 0.0 {
            Self::Horizontal
        } else if direction.x == 0.0 {
            Self::Vertical
        } else {
            let slope = direction.y / direction.x;
            Self::Sloped {
                slope,
                intercept: to.y - slope * to.x,
                perpendicular: -(1.0 / slope),
            }
        }
    }

    /// Foot of the perpendicular from `point` onto the line through `origin`.
    pub(crate) fn intersect(&self, origin: Vec2, point: Vec2) -> Vec2 {
        match *self {
            Self::Vertical => Vec2::new(origin.x, point.y),
            Self::Horizontal => Vec2::new(point.x, origin.y),
            Self::Sloped {
                slope,
                intercept,
                perpendicular,
            } => {
                let x = (point.y - intercept - perpendicular * point.x) / (slope - perpendicular);
                Vec2::new(x, x * slope + intercept)
            }
        }
    }
}

/// True if `point` lies inside the bounding box of `a` and `b`.
pub(crate) fn within_box(point: Vec2, a: Vec2, b: Vec2) -> bool {
    let min = a.min(b);
    let max = a.max(b);
    point.x >= min.x && point.x <= max.x && point.y >= min.y && point.y <= max.y
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intersections() {
        let origin = Vec2::new(0.0, 0.0);
        let flat = SegmentLine::through(origin, Vec2::new(10.0, 0.0));
        assert_eq!(flat, SegmentLine::Horizontal);
        assert_eq!(flat.intersect(origin, Vec2::new(3.0, 4.0)), Vec2::new(3.0, 0.0));

        let upright = SegmentLine::through(origin, Vec2::new(0.0, 10.0));
        assert_eq!(upright.intersect(origin, Vec2::new(3.0, 4.0)), Vec2::new(0.0, 4.0));

        let diagonal = SegmentLine::through(origin, Vec2::new(10.0, 10.0));
        let foot = diagonal.intersect(origin, Vec2::new(0.0, 4.0));
        assert!((foot - Vec2::new(2.0, 2.0)).length() < 1e-5);
    }

    #[test]
    fn test_within_box_is_inclusive() {
        let a = Vec2::new(4.0, 0.0);
        let b = Vec2::new(0.0, 2.0);
        assert!(within_box(Vec2::new(0.0, 2.0), a, b));
        assert!(within_box(Vec2::new(2.0, 1.0), a, b));
        assert!(!within_box(Vec2::new(2.0, 2.5), a, b));
    }
}
