//! Camera and projection setup shared by every particle pass.
//!
//! [`CameraParams`] describes a physical camera (film back, focal length, clip
//! planes, output format and transforms). [`ProjectionContext::new`] derives
//! the world-to-camera and perspective matrices once per frame; the context is
//! immutable afterwards and is passed by reference to each pass so all passes
//! agree on projected coordinates.
//!
//! # Conventions
//!
//! - Matrices act on column vectors (`M * p`), as glam does.
//! - The camera looks down its local `-Z` axis; points with local `z > 0` are
//!   behind it.
//! - Screen coordinates are pixels with the origin at the bottom-left corner of
//!   the render format, offset by the overscan margin.

use glam::{Mat4, Vec2, Vec3};
use serde::{Deserialize, Serialize};

use crate::error::{KernelError, Result};
use crate::KernelParams;

/// Camera lens, format and transform parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, KernelParams)]
#[serde(default)]
pub struct CameraParams {
    /// Render format width in pixels.
    #[param(label = "Width", default = 1440)]
    pub width: u32,
    /// Render format height in pixels.
    #[param(label = "Height", default = 810)]
    pub height: u32,
    /// Margin added to screen coordinates on both axes.
    #[param(label = "Overscan", default = 0.0)]
    pub overscan: f32,
    /// Horizontal film aperture, in the same units as `focal`.
    #[param(label = "Horizontal Aperture", default = 24.576)]
    pub haperture: f32,
    /// Focal length.
    #[param(label = "Focal Length", default = 50.0)]
    pub focal: f32,
    /// Near clipping plane distance.
    #[param(label = "Near Clipping", default = 0.1)]
    pub znear: f32,
    /// Far clipping plane distance.
    #[param(label = "Far Clipping", default = 10000.0)]
    pub zfar: f32,
    /// Camera-to-world transform.
    #[param(label = "Camera Matrix", default = Mat4::IDENTITY)]
    pub cam_to_world: Mat4,
    /// Transform applied to particle positions before viewing.
    #[param(label = "Particle Matrix", default = Mat4::IDENTITY)]
    pub particle_transform: Mat4,
}

impl CameraParams {
    /// Point the camera from `eye` at `target` with `+Y` up.
    pub fn looking_at(mut self, eye: Vec3, target: Vec3) -> Self {
        self.cam_to_world = Mat4::look_at_rh(eye, target, Vec3::Y).inverse();
        self
    }

    /// Set the render format.
    pub fn with_format(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Width over height of the render format.
    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height as f32
    }

    /// Right edge of the view frustum on the near plane.
    ///
    /// The frustum is symmetric: `left = -right`, `top = right / aspect`,
    /// `bottom = -top`.
    pub fn frustum_right(&self) -> f32 {
        (0.5 * self.haperture / self.focal) * self.znear
    }

    fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(KernelError::invalid(
                "width",
                format!("format {}x{} has no pixels", self.width, self.height),
            ));
        }
        if !(self.focal > 0.0) {
            return Err(KernelError::invalid("focal", "focal length must be positive"));
        }
        if !(self.haperture > 0.0) {
            return Err(KernelError::invalid("haperture", "aperture must be positive"));
        }
        if !(self.znear > 0.0) {
            return Err(KernelError::invalid("znear", "near plane must be positive"));
        }
        if !(self.zfar > self.znear) {
            return Err(KernelError::invalid("zfar", "far plane must lie beyond the near plane"));
        }
        Ok(())
    }

    /// Perspective matrix fitting camera space to clip space.
    pub fn perspective(&self) -> Mat4 {
        let right = self.frustum_right();
        let left = -right;
        let top = right / self.aspect();
        let bottom = -top;
        let (near, far) = (self.znear, self.zfar);

        let sx = (2.0 * near) / (right - left);
        let sy = (2.0 * near) / (top - bottom);
        let cx = (right + left) / (right - left);
        let cy = (top + bottom) / (top - bottom);
        let sz = -((far + near) / (far - near));
        let tz = -((2.0 * far * near) / (far - near));

        Mat4::from_cols_array_2d(&[
            [sx, 0.0, 0.0, 0.0],
            [0.0, sy, 0.0, 0.0],
            [cx, cy, sz, -1.0],
            [0.0, 0.0, tz, 0.0],
        ])
    }
}

/// Invert a matrix, failing instead of producing non-finite values.
pub(crate) fn checked_inverse(matrix: &Mat4, what: &'static str) -> Result<Mat4> {
    let det = matrix.determinant();
    if det == 0.0 || !det.is_finite() {
        return Err(KernelError::SingularMatrix { what });
    }
    let inverse = matrix.inverse();
    if !inverse.is_finite() {
        return Err(KernelError::SingularMatrix { what });
    }
    Ok(inverse)
}

/// A particle position carried through every projection stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projected {
    /// Camera-local position.
    pub local: Vec3,
    /// Normalised device coordinates (`z` in `[-1, 1]` between the clip planes).
    pub ndc: Vec3,
    /// Screen position in pixels.
    pub screen: Vec2,
}

/// Immutable per-frame projection state.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionContext {
    world_to_camera: Mat4,
    perspective: Mat4,
    particle_transform: Mat4,
    format: Vec2,
    overscan: f32,
}

impl ProjectionContext {
    /// Derive the projection state for one frame.
    ///
    /// # Errors
    ///
    /// - [`KernelError::SingularMatrix`] if the camera matrix has no inverse
    /// - [`KernelError::InvalidParameter`] if the lens or format cannot form a
    ///   frustum
    pub fn new(params: &CameraParams) -> Result<Self> {
        params.validate()?;
        let world_to_camera = checked_inverse(&params.cam_to_world, "camera")?;
        log::trace!(
            "projection: {}x{} focal {} aperture {} clip {}..{}",
            params.width,
            params.height,
            params.focal,
            params.haperture,
            params.znear,
            params.zfar
        );
        Ok(Self {
            world_to_camera,
            perspective: params.perspective(),
            particle_transform: params.particle_transform,
            format: Vec2::new(params.width as f32, params.height as f32),
            overscan: params.overscan,
        })
    }

    /// World-to-camera matrix.
    pub fn world_to_camera(&self) -> Mat4 {
        self.world_to_camera
    }

    /// Camera-to-clip perspective matrix.
    pub fn perspective(&self) -> Mat4 {
        self.perspective
    }

    /// Particle position to camera-local space (particle matrix, then view).
    pub fn to_camera(&self, position: Vec3) -> Vec3 {
        let placed = self.particle_transform.project_point3(position);
        self.world_to_camera.project_point3(placed)
    }

    /// Camera-local point to normalised device coordinates.
    pub fn to_ndc(&self, local: Vec3) -> Vec3 {
        self.perspective.project_point3(local)
    }

    /// Normalised device coordinates to screen pixels.
    pub fn ndc_to_screen(&self, ndc: Vec3) -> Vec2 {
        (ndc.truncate() + Vec2::ONE) * 0.5 * self.format + Vec2::splat(self.overscan)
    }

    /// Camera-local point straight to screen pixels.
    pub fn local_to_screen(&self, local: Vec3) -> Vec2 {
        self.ndc_to_screen(self.to_ndc(local))
    }

    /// Run a particle position through every stage.
    pub fn project(&self, position: Vec3) -> Projected {
        let local = self.to_camera(position);
        let ndc = self.to_ndc(local);
        Projected {
            local,
            ndc,
            screen: self.ndc_to_screen(ndc),
        }
    }
}
