//! # kernelfx
//!
//! Per-pixel compositing kernels on the CPU: a multi-pass particle
//! rasterizer and a set of procedural generators.
//!
//! Every kernel works the way a node in a compositing host does: parameters
//! are resolved once into an immutable evaluation context, then each output
//! pixel is computed independently. Pixels run in parallel with `rayon`.
//!
//! ## Quick Start
//!
//! ```ignore
//! use kernelfx::prelude::*;
//!
//! let camera = CameraParams::default()
//!     .with_format(640, 360)
//!     .looking_at(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO);
//! let ctx = ProjectionContext::new(&camera)?;
//!
//! let cloud = CloudConfig::default().generate();
//! let params = RasterParams { size: 0.02, use_pcolour: true, ..Default::default() };
//! let frame = render_frame(&ctx, &params, &cloud.inputs(), Extent::new(640, 360))?;
//!
//! frame.colour.save("particles.exr")?;
//! frame.zbuffer.to_image().save("zbuffer.exr")?;
//! ```
//!
//! ## Core Concepts
//!
//! ### Images
//!
//! [`Image`] is an RGBA `f32` buffer with the origin at the bottom-left.
//! Particles are stored one per pixel ("slot"): position in RGB, size or
//! validity in alpha.
//!
//! ### Particle Passes
//!
//! - [`raster::zbuffer`] - nearest particle depth and motion per pixel
//! - [`raster::composite`] - depth-aware alpha compositing of footprints
//! - [`raster::single_pixel`] - one id sample per particle
//! - [`raster::id_colour`] - ids back to colours
//! - [`raster::velocity_match`] - samples carried across frames by id
//!
//! ### Procedural Kernels
//!
//! - [`procedural::beam`] - animated tapering beam
//! - [`procedural::lines`] - soft, dashed, animated polylines
//! - [`procedural::voronoi`] - 3D cellular noise
//!
//! ### Parameters
//!
//! Parameter blocks derive [`KernelParams`], which generates their defaults
//! and a display-label table:
//!
//! ```ignore
//! #[derive(KernelParams, Clone)]
//! struct Glow {
//!     #[param(label = "Radius", default = 4.0)]
//!     radius: f32,
//! }
//! ```

extern crate self as kernelfx;

pub mod buffer;
pub mod camera;
pub mod config;
pub mod error;
pub mod kernel;
pub mod motion;
pub mod params;
pub mod procedural;
pub mod raster;

pub use buffer::{Extent, Image};
pub use camera::{CameraParams, Projected, ProjectionContext};
pub use config::{CloudConfig, ParticleCloud, SceneConfig};
pub use error::{KernelError, Result};
pub use glam::{IVec2, Mat4, Vec2, Vec3, Vec4};
pub use kernel::{render, PixelKernel};
pub use kernelfx_derive::KernelParams;
pub use params::{KernelParams, ParamInfo};
pub use raster::{render_frame, Footprint, ParticleFrame, ParticleInputs, RasterParams};

/// Common imports.
///
/// ```ignore
/// use kernelfx::prelude::*;
/// ```
pub mod prelude {
    pub use crate::buffer::{Extent, Image};
    pub use crate::camera::{CameraParams, ProjectionContext};
    pub use crate::config::{CloudConfig, ParticleCloud, SceneConfig};
    pub use crate::error::{KernelError, Result};
    pub use crate::kernel::{render, PixelKernel};
    pub use crate::motion::{MoveParams, ParticleBounds, ParticleMove};
    pub use crate::params::{KernelParams, ParamInfo};
    pub use crate::procedural::beam::{Beam, BeamParams};
    pub use crate::procedural::lines::{Lines, LinesParams};
    pub use crate::procedural::voronoi::{Voronoi, VoronoiParams};
    pub use crate::raster::id_colour::{IdColourParams, IdToColour};
    pub use crate::raster::velocity_match::{MatchStrategy, VelocityMatchParams};
    pub use crate::raster::{
        composite, render_frame, single_pixel, zbuffer, ParticleFrame, ParticleInputs, RasterParams,
    };
    pub use crate::{IVec2, Mat4, Vec2, Vec3, Vec4};
    pub use kernelfx_derive::KernelParams;
}
