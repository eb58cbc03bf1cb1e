//! Animated tapering beam.
//!
//! A soft line segment from `start` to `end` whose width tapers linearly from
//! `start_width` to `end_width`. A lit window of `length` (as a fraction of
//! the full segment) travels along it as `time` goes from 0 to 1, entering at
//! `start` and leaving past `end`.
//!
//! With `persp` enabled the window positions are remapped so that travel
//! slows towards the wide end, as if the beam receded into the distance.
//!
//! # Example
//!
//! ```ignore
//! use kernelfx::procedural::beam::{Beam, BeamParams};
//!
//! let beam = Beam::new(&BeamParams { time: 0.25, ..Default::default() });
//! let frame = kernelfx::render(&beam, Extent::new(200, 200));
//! ```

use glam::{IVec2, Vec2, Vec4};
use serde::{Deserialize, Serialize};

use super::{within_box, SegmentLine};
use crate::kernel::PixelKernel;
use crate::KernelParams;

const BISECTION_TOLERANCE: f32 = 0.00001;
const MAX_BISECTIONS: i32 = 64;

/// Beam parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, KernelParams)]
#[serde(default)]
pub struct BeamParams {
    #[param(label = "Start", default = Vec2::new(0.0, 0.0))]
    pub start: Vec2,
    #[param(label = "End", default = Vec2::new(100.0, 100.0))]
    pub end: Vec2,
    #[param(label = "Start Width", default = 5.0)]
    pub start_width: f32,
    #[param(label = "End Width", default = 40.0)]
    pub end_width: f32,
    /// Animation time, clamped to `[0, 1]`.
    #[param(label = "Time", default = 0.5)]
    pub time: f32,
    /// Lit window length as a fraction of the segment.
    #[param(label = "Length", default = 0.25)]
    pub length: f32,
    /// Edge falloff as a fraction of the local width.
    #[param(label = "Softness", default = 0.5)]
    pub softness: f32,
    #[param(label = "3D Perspective", default = true)]
    pub persp: bool,
}

impl BeamParams {
    /// Remap a linear fraction along the beam to a perspective fraction.
    ///
    /// Bisects `[0, 1]` until a bound lies within tolerance of `linear`; the
    /// bisection depth sets the weights of a trapezoid midpoint split between
    /// the narrow and wide ends. Fixes 0 and 1 and is monotonic for positive
    /// widths. Degenerate widths fall back to the linear value.
    pub fn linear_to_perspective(&self, linear: f32) -> f32 {
        let mut depth = -1;
        let mut low = 0.0f32;
        let mut high = 1.0f32;
        let mut to_high = (high - linear).abs();
        let mut to_low = (low - linear).abs();

        while to_high > BISECTION_TOLERANCE && to_low > BISECTION_TOLERANCE && depth < MAX_BISECTIONS {
            depth += 1;
            let half = (high - low) / 2.0;
            if to_high < to_low {
                low += half;
            } else {
                high -= half;
            }
            to_high = (high - linear).abs();
            to_low = (low - linear).abs();
        }

        let options = 2.0f32.powi(depth);
        let factor = options * linear;
        let min_mult = factor * 2.0;
        let max_mult = (options - factor) * 2.0;

        let min_width = self.start_width.min(self.end_width);
        let max_width = self.start_width.max(self.end_width);

        let perspective = if self.start_width < self.end_width {
            let denom = min_mult * min_width + max_mult * max_width;
            (denom != 0.0).then(|| min_mult * min_width / denom)
        } else {
            let denom = max_mult * min_width + min_mult * max_width;
            (denom != 0.0).then(|| 1.0 - max_mult * min_width / denom)
        };
        perspective.filter(|p| p.is_finite()).unwrap_or(linear)
    }
}

/// Evaluation frame for one beam.
#[derive(Debug, Clone)]
pub struct Beam {
    start: Vec2,
    direction: Vec2,
    line: Option<SegmentLine>,
    anim_start: Vec2,
    anim_end: Vec2,
    start_width: f32,
    end_width: f32,
    softness: f32,
}

impl Beam {
    /// Resolve the animated window and line equation.
    pub fn new(params: &BeamParams) -> Self {
        let direction = params.end - params.start;
        let degenerate = direction == Vec2::ZERO;

        let range = params.time.clamp(0.0, 1.0) * (1.0 + params.length);
        let mut start_dist = (range - params.length).clamp(0.0, 1.0);
        let mut end_dist = range.clamp(0.0, 1.0);
        if params.persp {
            start_dist = params.linear_to_perspective(start_dist);
            end_dist = params.linear_to_perspective(end_dist);
        }

        log::trace!("beam window {:.4}..{:.4}", start_dist, end_dist);

        Self {
            start: params.start,
            direction,
            line: (!degenerate).then(|| SegmentLine::through(params.start, params.end)),
            anim_start: params.start + direction * start_dist,
            anim_end: params.start + direction * end_dist,
            start_width: params.start_width,
            end_width: params.end_width,
            softness: params.softness,
        }
    }

    /// Animated window endpoints.
    pub fn window(&self) -> (Vec2, Vec2) {
        (self.anim_start, self.anim_end)
    }

    /// Beam coverage at a point.
    pub fn coverage(&self, point: Vec2) -> f32 {
        // A zero-length beam is a disc of the start width.
        let Some(line) = self.line else {
            return soft_edge(point.distance(self.start), self.start_width, self.softness);
        };

        let foot = line.intersect(self.start, point);
        let distance = if within_box(foot, self.anim_start, self.anim_end) {
            point.distance(foot)
        } else {
            point.distance(self.anim_start).min(point.distance(self.anim_end))
        };

        let along = match line {
            SegmentLine::Vertical => (foot.y - self.start.y) / self.direction.y,
            _ => (foot.x - self.start.x) / self.direction.x,
        };
        let extra = along * (self.start_width - self.end_width).abs();
        let width = if self.start_width < self.end_width {
            self.start_width + extra
        } else {
            self.start_width - extra
        };

        soft_edge(distance, width, self.softness)
    }
}

fn soft_edge(distance: f32, width: f32, softness: f32) -> f32 {
    if !(distance <= width) {
        return 0.0;
    }
    let fade = width * softness;
    if fade > 0.0 {
        ((width - distance) / fade).min(1.0)
    } else {
        1.0
    }
}

impl PixelKernel for Beam {
    fn process(&self, pos: IVec2) -> Vec4 {
        Vec4::splat(self.coverage(pos.as_vec2()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perspective_fixes_endpoints() {
        let params = BeamParams::default();
        assert_eq!(params.linear_to_perspective(0.0), 0.0);
        assert!((params.linear_to_perspective(1.0) - 1.0).abs() < 1e-6);

        let narrowing = BeamParams {
            start_width: 40.0,
            end_width: 5.0,
            ..Default::default()
        };
        assert!(narrowing.linear_to_perspective(0.0).abs() < 1e-6);
        assert!((narrowing.linear_to_perspective(1.0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_perspective_is_monotonic() {
        for params in [
            BeamParams::default(),
            BeamParams {
                start_width: 30.0,
                end_width: 2.0,
                ..Default::default()
            },
        ] {
            let mut last = params.linear_to_perspective(0.0);
            for i in 1..=200 {
                let value = params.linear_to_perspective(i as f32 / 200.0);
                assert!(value >= last - 1e-6, "{} < {}", value, last);
                last = value;
            }
        }
    }

    #[test]
    fn test_perspective_compresses_towards_wide_end() {
        // Widening beam: half way in linear terms is less than half in depth
        let params = BeamParams::default();
        assert!(params.linear_to_perspective(0.5) < 0.5);
    }

    #[test]
    fn test_zero_widths_fall_back_to_linear() {
        let params = BeamParams {
            start_width: 0.0,
            end_width: 0.0,
            ..Default::default()
        };
        assert_eq!(params.linear_to_perspective(0.3), 0.3);
    }

    #[test]
    fn test_full_beam_is_lit_on_axis() {
        let beam = Beam::new(&BeamParams {
            start: Vec2::new(0.0, 50.0),
            end: Vec2::new(100.0, 50.0),
            start_width: 10.0,
            end_width: 10.0,
            time: 0.5,
            length: 1.0,
            softness: 0.5,
            persp: false,
        });
        let (from, to) = beam.window();
        assert_eq!((from, to), (Vec2::new(0.0, 50.0), Vec2::new(100.0, 50.0)));

        assert_eq!(beam.process(IVec2::new(50, 50)), Vec4::ONE);
        // 4 px from the axis: (10 - 4) / 5 > 1
        assert_eq!(beam.coverage(Vec2::new(50.0, 54.0)), 1.0);
        // 8 px: (10 - 8) / 5
        assert!((beam.coverage(Vec2::new(50.0, 58.0)) - 0.4).abs() < 1e-6);
        assert_eq!(beam.coverage(Vec2::new(50.0, 70.0)), 0.0);
    }

    #[test]
    fn test_taper_widens_along_vertical_beam() {
        let beam = Beam::new(&BeamParams {
            start: Vec2::new(0.0, 0.0),
            end: Vec2::new(0.0, 100.0),
            start_width: 0.0,
            end_width: 20.0,
            time: 0.5,
            length: 1.0,
            softness: 0.0,
            persp: false,
        });
        // Width 2 at y = 10, width 16 at y = 80
        assert_eq!(beam.coverage(Vec2::new(5.0, 10.0)), 0.0);
        assert_eq!(beam.coverage(Vec2::new(5.0, 80.0)), 1.0);
    }

    #[test]
    fn test_window_travels_with_time() {
        let at = |time| {
            Beam::new(&BeamParams {
                time,
                persp: false,
                ..Default::default()
            })
            .window()
        };
        // Before the start the window is collapsed at the origin
        let (s, e) = at(0.0);
        assert_eq!((s, e), (Vec2::ZERO, Vec2::ZERO));
        // At the end it is collapsed at the far point
        let (s, e) = at(1.0);
        assert_eq!((s, e), (Vec2::new(100.0, 100.0), Vec2::new(100.0, 100.0)));
    }

    #[test]
    fn test_zero_length_beam_is_a_disc() {
        let beam = Beam::new(&BeamParams {
            start: Vec2::new(10.0, 10.0),
            end: Vec2::new(10.0, 10.0),
            start_width: 4.0,
            softness: 0.0,
            ..Default::default()
        });
        assert_eq!(beam.coverage(Vec2::new(12.0, 10.0)), 1.0);
        assert_eq!(beam.coverage(Vec2::new(15.0, 10.0)), 0.0);
    }
}
