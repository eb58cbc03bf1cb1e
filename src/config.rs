//! JSON scene configuration and synthetic particle clouds.
//!
//! A [`SceneConfig`] bundles every kernel's parameter block. All blocks use
//! `#[serde(default)]`, so a preset only needs the values it changes:
//!
//! ```json
//! {
//!     "camera": { "width": 640, "height": 360 },
//!     "raster": { "size": 0.02, "use_pcolour": true },
//!     "cloud": { "count": 20000, "radius": 3.0 }
//! }
//! ```

use std::f32::consts::TAU;
use std::path::Path;

use glam::Vec3;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::buffer::{Extent, Image};
use crate::camera::CameraParams;
use crate::error::Result;
use crate::motion::MoveParams;
use crate::procedural::beam::BeamParams;
use crate::procedural::lines::LinesParams;
use crate::procedural::voronoi::VoronoiParams;
use crate::raster::id_colour::IdColourParams;
use crate::raster::velocity_match::VelocityMatchParams;
use crate::raster::{ParticleInputs, RasterParams};
use crate::KernelParams;

/// Every parameter block for one render.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    pub camera: CameraParams,
    pub raster: RasterParams,
    pub id_colour: IdColourParams,
    pub velocity_match: VelocityMatchParams,
    pub motion: MoveParams,
    pub beam: BeamParams,
    pub lines: LinesParams,
    pub voronoi: VoronoiParams,
    pub cloud: CloudConfig,
}

impl SceneConfig {
    /// Load a JSON preset.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_json(&text)?;
        log::debug!("loaded scene config from {}", path.as_ref().display());
        Ok(config)
    }

    /// Parse a JSON preset.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Serialise to pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Destination extent: the render format plus overscan on every side.
    pub fn destination(&self) -> Extent {
        let margin = (self.camera.overscan.max(0.0) * 2.0).round() as u32;
        Extent::new(
            self.camera.width.saturating_add(margin),
            self.camera.height.saturating_add(margin),
        )
    }
}

/// A seeded spherical particle cloud swirling about the Y axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, KernelParams)]
#[serde(default)]
pub struct CloudConfig {
    #[param(label = "Count", default = 4096)]
    pub count: u32,
    #[param(label = "Radius", default = 2.0)]
    pub radius: f32,
    #[param(label = "Centre", default = Vec3::new(0.0, 0.0, -10.0))]
    pub centre: Vec3,
    /// Tangential speed per frame at unit distance from the axis.
    #[param(label = "Swirl", default = 0.05)]
    pub swirl: f32,
    /// Particle alpha (size) varies in `[1 - jitter, 1]`.
    #[param(label = "Size Jitter", default = 0.5)]
    pub size_jitter: f32,
    #[param(label = "Seed", default = 7)]
    pub seed: u64,
}

/// Slot images describing a particle cloud.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticleCloud {
    pub positions: Image,
    pub colours: Image,
    pub velocity: Image,
    pub velocity_next: Image,
}

impl ParticleCloud {
    /// Bind every image as raster inputs.
    pub fn inputs(&self) -> ParticleInputs<'_> {
        ParticleInputs::new(&self.positions)
            .with_colour(&self.colours)
            .with_velocity(&self.velocity, &self.velocity_next)
    }
}

impl CloudConfig {
    /// Slot extent holding `count` particles in a near-square layout.
    pub fn slots(&self) -> Extent {
        let width = (self.count as f64).sqrt().ceil().max(1.0) as u32;
        Extent::new(width, self.count.div_ceil(width))
    }

    /// Generate the cloud. Slots past `count` stay zero (invalid).
    pub fn generate(&self) -> ParticleCloud {
        let extent = self.slots();
        let mut rng = SmallRng::seed_from_u64(self.seed);
        let mut cloud = ParticleCloud {
            positions: Image::new(extent),
            colours: Image::new(extent),
            velocity: Image::new(extent),
            velocity_next: Image::new(extent),
        };

        for index in 0..self.count as usize {
            let offset = random_in_sphere(&mut rng, self.radius);
            let size = 1.0 - self.size_jitter.clamp(0.0, 1.0) * rng.gen::<f32>();
            let hue = rng.gen::<f32>();
            let swirl = Vec3::new(-offset.z, 0.0, offset.x) * self.swirl;

            let slot = extent.position(index);
            cloud.positions.set(slot, (self.centre + offset).extend(size));
            cloud.colours.set(slot, hsv_to_rgb(hue, 0.6, 1.0).extend(1.0));
            cloud.velocity.set(slot, swirl.extend(0.0));
            cloud.velocity_next.set(slot, swirl.extend(0.0));
        }

        log::debug!("generated {} particles in {}x{} slots", self.count, extent.width, extent.height);
        cloud
    }
}

/// Uniform point inside a sphere.
fn random_in_sphere(rng: &mut SmallRng, radius: f32) -> Vec3 {
    let theta = rng.gen_range(0.0..TAU);
    let cos_phi = rng.gen_range(-1.0f32..1.0);
    let sin_phi = (1.0 - cos_phi * cos_phi).sqrt();
    let r = radius * rng.gen::<f32>().cbrt();
    Vec3::new(r * sin_phi * theta.cos(), r * sin_phi * theta.sin(), r * cos_phi)
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Vec3 {
    let c = v * s;
    let x = c * (1.0 - ((h * 6.0) % 2.0 - 1.0).abs());
    let m = v - c;

    let (r, g, b) = match (h * 6.0) as u32 % 6 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };

    Vec3::new(r + m, g + m, b + m)
}
