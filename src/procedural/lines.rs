//! Soft polylines with dashes, end caps and progressive reveal.
//!
//! Each segment contributes a coverage value from its perpendicular distance;
//! the pixel takes the maximum over all segments, multiplied by `colour`.
//! Segment lengths are accumulated so that `anim_time` can reveal the path
//! from its first point and dashes stay continuous around corners.

use glam::{IVec2, Vec2, Vec4};
use serde::{Deserialize, Serialize};

use super::{within_box, SegmentLine};
use crate::error::{KernelError, Result};
use crate::kernel::PixelKernel;
use crate::KernelParams;

/// Upper bound on polyline points.
pub const MAX_POLYLINE_POINTS: usize = 16;

/// Polyline parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, KernelParams)]
#[serde(default)]
pub struct LinesParams {
    /// Number of leading points used.
    #[param(label = "Max PTS", default = 2)]
    pub max_points: usize,
    /// Join the last point back to the first.
    #[param(label = "Close end", default = false)]
    pub close: bool,
    #[param(label = "Round ends", default = false)]
    pub round_ends: bool,
    #[param(label = "Colour", default = Vec4::ONE)]
    pub colour: Vec4,
    /// Solid half-width in pixels.
    #[param(label = "Width", default = 5.0)]
    pub width: f32,
    /// Falloff beyond `width` in pixels.
    #[param(label = "Softness", default = 1.0)]
    pub softness: f32,
    #[param(label = "Dashed", default = false)]
    pub dashed: bool,
    /// Dash and gap length in pixels.
    #[param(label = "Spacing", default = 30.0)]
    pub spacing: f32,
    /// Dash phase, in multiples of `spacing`.
    #[param(label = "Dash Offset", default = 0.0)]
    pub offset: f32,
    /// Fraction of the path revealed, clamped to `[0, 1]`.
    #[param(label = "Time", default = 1.0)]
    pub anim_time: f32,
    #[param(
        label = "Points",
        default = vec![
            Vec2::new(100.0, 100.0),
            Vec2::new(540.0, 100.0),
            Vec2::new(540.0, 380.0),
            Vec2::new(100.0, 380.0),
        ]
    )]
    pub points: Vec<Vec2>,
}

#[derive(Debug, Clone, Copy)]
struct Segment {
    from: Vec2,
    to: Vec2,
    line: SegmentLine,
    /// Path length at the end of this segment.
    cumulative: f32,
}

/// Evaluation frame for a polyline.
#[derive(Debug, Clone)]
pub struct Lines {
    segments: Vec<Segment>,
    point_count: usize,
    close: bool,
    round_ends: bool,
    colour: Vec4,
    width: f32,
    softness: f32,
    dashed: bool,
    spacing: f32,
    offset: f32,
    animated_end: f32,
}

impl Lines {
    /// Build segment equations and cumulative lengths.
    ///
    /// # Errors
    ///
    /// [`KernelError::TooManyPoints`] if more than [`MAX_POLYLINE_POINTS`]
    /// points are supplied.
    pub fn new(params: &LinesParams) -> Result<Self> {
        if params.points.len() > MAX_POLYLINE_POINTS {
            return Err(KernelError::TooManyPoints {
                count: params.points.len(),
                max: MAX_POLYLINE_POINTS,
            });
        }

        let point_count = params.max_points.min(params.points.len());
        let line_count = if params.close {
            point_count
        } else {
            point_count.saturating_sub(1)
        };

        let mut total = 0.0;
        let segments: Vec<Segment> = (0..line_count)
            .map(|i| {
                let from = params.points[i];
                let to = params.points[(i + 1) % point_count];
                total += from.distance(to);
                Segment {
                    from,
                    to,
                    line: SegmentLine::through(from, to),
                    cumulative: total,
                }
            })
            .collect();

        log::trace!("lines: {} segments, path length {:.2}", segments.len(), total);

        Ok(Self {
            segments,
            point_count,
            close: params.close,
            round_ends: params.round_ends,
            colour: params.colour,
            width: params.width,
            softness: params.softness,
            dashed: params.dashed,
            spacing: params.spacing,
            offset: params.offset,
            animated_end: params.anim_time.clamp(0.0, 1.0) * total,
        })
    }

    /// Total path length.
    pub fn path_length(&self) -> f32 {
        self.segments.last().map_or(0.0, |s| s.cumulative)
    }

    /// Solid core out to `width`, then a linear ramp over `softness`.
    fn distance_to_value(&self, distance: f32) -> f32 {
        if distance <= self.width {
            1.0
        } else if distance <= self.width + self.softness {
            1.0 - (distance - self.width) / self.softness
        } else {
            0.0
        }
    }

    fn segment_value(&self, index: usize, point: Vec2) -> f32 {
        let segment = &self.segments[index];
        let foot = segment.line.intersect(segment.from, point);
        let distance = point.distance(foot);
        let mut along = if index > 0 {
            self.segments[index - 1].cumulative
        } else {
            0.0
        };

        let mut edge = false;
        let mut value = 0.0;

        if within_box(foot, segment.from, segment.to) {
            value = self.distance_to_value(distance);
            along += foot.distance(segment.from);
        } else {
            edge = true;
            let to_start = point.distance(segment.from);
            let to_end = point.distance(segment.to);
            let closest = to_start.min(to_end);
            if closest == to_end {
                along = segment.cumulative;
            }

            let open_end = index == 0 || index + 2 == self.point_count;
            if !self.close && !self.round_ends && open_end {
                // Flat cap: fade only along the segment axis.
                let past_end = if to_start < to_end {
                    foot.distance(segment.from)
                } else {
                    foot.distance(segment.to)
                };
                if past_end <= self.softness {
                    value = self.distance_to_value(past_end + self.width)
                        * self.distance_to_value(distance);
                }
            } else {
                value = self.distance_to_value(closest);
            }
        }

        if along > self.animated_end {
            return 0.0;
        }
        if self.dashed && value > 0.0 {
            value = self.dash(value, along, edge);
        }
        value
    }

    /// Attenuate a value in the gaps of the dash pattern.
    fn dash(&self, value: f32, along: f32, edge: bool) -> f32 {
        if !(self.spacing > 0.0) {
            return value;
        }
        let phase = along + self.spacing * self.offset;
        let distance = if phase < 0.0 {
            (phase - self.spacing).abs()
        } else {
            phase
        };

        let segment = distance / self.spacing;
        if (segment as i32) % 2 != 1 {
            return value;
        }

        let into_gap = (segment - segment.floor()) * self.spacing;
        if into_gap < self.softness && !edge {
            value * (1.0 - into_gap / self.softness)
        } else if self.spacing - into_gap < self.softness && !edge {
            value * (1.0 - (self.spacing - into_gap) / self.softness)
        } else {
            0.0
        }
    }

    /// Coverage at a point, before colouring.
    pub fn coverage(&self, point: Vec2) -> f32 {
        (0..self.segments.len())
            .map(|i| self.segment_value(i, point))
            .fold(0.0, f32::max)
    }
}

impl PixelKernel for Lines {
    fn process(&self, pos: IVec2) -> Vec4 {
        self.colour * self.coverage(pos.as_vec2())
    }
}
