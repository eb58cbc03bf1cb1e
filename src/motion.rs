//! Particle motion helpers: per-frame drift with box wrapping, and bounds.
//!
//! [`ParticleMove`] offsets every particle by `movement * frame`, optionally
//! wrapping positions into a looping box so a drifting cloud never empties.
//! [`ParticleBounds`] measures a cloud so that box can be fitted to it and the
//! cloud re-centred on the origin.

use glam::{IVec2, Mat4, Vec3, Vec4};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::buffer::Image;
use crate::camera::checked_inverse;
use crate::error::Result;
use crate::kernel::{render, PixelKernel};
use crate::KernelParams;

/// Axis-aligned bounds of a particle cloud.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ParticleBounds {
    pub min: Vec3,
    pub max: Vec3,
}

impl ParticleBounds {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Bounds of every particle with non-zero alpha, or `None` if there are
    /// none.
    pub fn of(particles: &Image) -> Option<Self> {
        particles
            .pixels()
            .par_iter()
            .filter(|p| p.w != 0.0 && p.truncate().is_finite())
            .map(|p| (p.truncate(), p.truncate()))
            .reduce_with(|a, b| (a.0.min(b.0), a.1.max(b.1)))
            .map(|(min, max)| Self { min, max })
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    pub fn centre(&self) -> Vec3 {
        self.min + self.size() / 2.0
    }

    /// The same box moved to sit on the origin.
    pub fn centred(&self) -> Self {
        let centre = self.centre();
        Self {
            min: self.min - centre,
            max: self.max - centre,
        }
    }

    /// Translation that moves the cloud's centre to the origin.
    pub fn centring_offset(&self) -> Vec3 {
        -self.centre()
    }

    /// Wrap each axis of `point` that lies outside `[min, max)` back inside it.
    ///
    /// Axes with a non-positive extent are left alone.
    pub fn wrap(&self, point: Vec3) -> Vec3 {
        let size = self.size();
        let mut wrapped = point;
        for axis in 0..3 {
            let (lo, hi, extent) = (self.min[axis], self.max[axis], size[axis]);
            if !(extent > 0.0) {
                continue;
            }
            let value = point[axis];
            if value < lo || value >= hi {
                wrapped[axis] = lo + (value - lo).rem_euclid(extent);
            }
        }
        wrapped
    }
}

/// Particle move parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, KernelParams)]
#[serde(default)]
pub struct MoveParams {
    /// Offset per frame; `w` drifts the size channel.
    #[param(label = "Movement", default = Vec4::ZERO)]
    pub movement: Vec4,
    /// Rotate `movement` into the box's frame.
    #[param(label = "World Space Move", default = false)]
    pub world_space: bool,
    #[param(label = "Loop", default = true)]
    pub loop_bbox: bool,
    #[param(label = "Frame", default = 0)]
    pub frame: i32,
    #[param(label = "Bounding Box", default = ParticleBounds::default())]
    pub bbox: ParticleBounds,
    #[param(label = "Bounding Box Matrix", default = Mat4::IDENTITY)]
    pub bbox_transform: Mat4,
}

/// Kernel moving each particle slot.
pub struct ParticleMove<'a> {
    positions: &'a Image,
    offset: Vec4,
    wrap: Option<ParticleBounds>,
}

impl<'a> ParticleMove<'a> {
    /// Resolve the per-frame offset.
    ///
    /// # Errors
    ///
    /// [`KernelError::SingularMatrix`](crate::KernelError::SingularMatrix) if
    /// the box transform has no inverse.
    pub fn new(params: &MoveParams, positions: &'a Image) -> Result<Self> {
        let inverse = checked_inverse(&params.bbox_transform, "bounding box")?;
        let direction = if params.world_space {
            inverse
                .transform_vector3(params.movement.truncate())
                .extend(params.movement.w)
        } else {
            params.movement
        };
        Ok(Self {
            positions,
            offset: direction * params.frame as f32,
            wrap: params.loop_bbox.then_some(params.bbox),
        })
    }
}

impl PixelKernel for ParticleMove<'_> {
    fn process(&self, pos: IVec2) -> Vec4 {
        let start = self.positions.at(pos);
        if start.w <= 0.0 {
            return Vec4::ZERO;
        }
        let moved = start + self.offset;
        match self.wrap {
            Some(bounds) => bounds.wrap(moved.truncate()).extend(moved.w),
            None => moved,
        }
    }
}

/// Move every particle slot of `positions`.
pub fn run(params: &MoveParams, positions: &Image) -> Result<Image> {
    let kernel = ParticleMove::new(params, positions)?;
    Ok(render(&kernel, positions.extent()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds_skip_invalid_particles() {
        let particles = Image::row(vec![
            Vec4::new(-2.0, 0.0, 1.0, 1.0),
            Vec4::new(100.0, 100.0, 100.0, 0.0),
            Vec4::new(4.0, 2.0, -1.0, 0.5),
        ]);
        let bounds = ParticleBounds::of(&particles).unwrap();
        assert_eq!(bounds.min, Vec3::new(-2.0, 0.0, -1.0));
        assert_eq!(bounds.max, Vec3::new(4.0, 2.0, 1.0));
        assert_eq!(bounds.centre(), Vec3::new(1.0, 1.0, 0.0));
        assert_eq!(bounds.centring_offset(), Vec3::new(-1.0, -1.0, 0.0));
        assert_eq!(bounds.centred().min, Vec3::new(-3.0, -1.0, -1.0));

        assert!(ParticleBounds::of(&Image::row(vec![Vec4::ZERO])).is_none());
    }

    #[test]
    fn test_wrap_into_box() {
        let bounds = ParticleBounds::new(Vec3::splat(-1.0), Vec3::new(1.0, 1.0, -1.0));
        let wrapped = bounds.wrap(Vec3::new(1.5, -3.5, 7.0));
        assert!((wrapped.x - -0.5).abs() < 1e-6);
        assert!((wrapped.y - 0.5).abs() < 1e-6);
        // Flat z axis is untouched
        assert_eq!(wrapped.z, 7.0);
    }

    #[test]
    fn test_wrap_range_is_half_open() {
        let bounds = ParticleBounds::new(Vec3::ZERO, Vec3::splat(2.0));
        assert_eq!(bounds.wrap(Vec3::new(2.0, 0.0, 1.0)), Vec3::new(0.0, 0.0, 1.0));
        assert_eq!(bounds.wrap(Vec3::new(1.5, 2.0, 0.0)), Vec3::new(1.5, 0.0, 0.0));
    }

    #[test]
    fn test_move_scales_by_frame_and_skips_dead() {
        let positions = Image::row(vec![Vec4::new(0.0, 0.0, 0.0, 1.0), Vec4::new(5.0, 5.0, 5.0, 0.0)]);
        let params = MoveParams {
            movement: Vec4::new(0.5, 0.0, 0.0, 0.0),
            frame: 4,
            loop_bbox: false,
            ..Default::default()
        };
        let moved = run(&params, &positions).unwrap();
        assert_eq!(moved.at(IVec2::new(0, 0)), Vec4::new(2.0, 0.0, 0.0, 1.0));
        assert_eq!(moved.at(IVec2::new(1, 0)), Vec4::ZERO);
    }

    #[test]
    fn test_world_space_move_rotates_direction() {
        let positions = Image::row(vec![Vec4::new(0.0, 0.0, 0.0, 1.0)]);
        let params = MoveParams {
            movement: Vec4::new(1.0, 0.0, 0.0, 0.0),
            frame: 1,
            world_space: true,
            loop_bbox: false,
            bbox_transform: Mat4::from_rotation_z(std::f32::consts::FRAC_PI_2)
                * Mat4::from_translation(Vec3::new(10.0, 0.0, 0.0)),
            ..Default::default()
        };
        let moved = run(&params, &positions).unwrap().at(IVec2::ZERO);
        // Inverse of a +90 degree turn maps +X to -Y; translation is ignored
        assert!((moved.truncate() - Vec3::new(0.0, -1.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn test_looping_keeps_particles_inside() {
        let positions = Image::row(vec![Vec4::new(0.0, 0.0, 0.0, 1.0)]);
        let params = MoveParams {
            movement: Vec4::new(0.3, 0.0, 0.0, 0.0),
            frame: 10,
            bbox: ParticleBounds::new(Vec3::splat(-1.0), Vec3::splat(1.0)),
            ..Default::default()
        };
        let moved = run(&params, &positions).unwrap().at(IVec2::ZERO);
        // 3.0 wraps to -1 + (4 mod 2) = -1
        assert!((moved.x - -1.0).abs() < 1e-5);
    }

    #[test]
    fn test_singular_box_is_rejected() {
        let positions = Image::row(vec![Vec4::ONE]);
        let params = MoveParams {
            bbox_transform: Mat4::ZERO,
            ..Default::default()
        };
        assert!(run(&params, &positions).is_err());
    }
}
