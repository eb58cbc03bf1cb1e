//! Z-buffer pass: nearest particle per pixel.
//!
//! Every particle footprint is splatted into a depth buffer; each destination
//! pixel keeps the depth and screen-space velocity of the nearest particle
//! covering it. The pass also marks which particle slots survived culling so
//! the compositing pass renders the same set.
//!
//! # Example
//!
//! ```ignore
//! use kernelfx::prelude::*;
//!
//! let ctx = ProjectionContext::new(&camera)?;
//! let inputs = ParticleInputs::new(&positions);
//! let zbuffer = zbuffer::run(&ctx, &RasterParams::default(), &inputs, Extent::new(1440, 810))?;
//! let depth = zbuffer.front_depth(IVec2::new(720, 405));
//! ```

use glam::{IVec2, Vec2, Vec4};
use rayon::prelude::*;

use super::depth::DepthCells;
use super::{Footprint, ParticleInputs, PassSetup, RasterParams};
use crate::buffer::{Extent, Image};
use crate::camera::ProjectionContext;
use crate::error::Result;

/// Depth and motion of the nearest particle at one pixel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthSample {
    /// Screen-space velocity in pixels.
    pub velocity: Vec2,
    /// Normalised depth (1 at the camera).
    pub depth: f32,
    /// Slot index of the winning particle.
    pub slot: u32,
}

/// Output of the Z-buffer pass.
///
/// The activity flags are indexed by particle slot; depth samples are indexed
/// by destination pixel.
#[derive(Debug, Clone, PartialEq)]
pub struct ZBuffer {
    slots: Extent,
    active: Vec<bool>,
    extent: Extent,
    samples: Vec<Option<DepthSample>>,
}

impl ZBuffer {
    /// Destination extent.
    pub fn extent(&self) -> Extent {
        self.extent
    }

    /// True if the particle in slot `pos` passed culling.
    pub fn is_active(&self, pos: IVec2) -> bool {
        self.slots.index(pos).is_some_and(|i| self.active[i])
    }

    /// Number of particles that passed culling.
    pub fn active_count(&self) -> usize {
        self.active.iter().filter(|&&a| a).count()
    }

    /// Nearest sample at a destination pixel.
    pub fn sample(&self, pos: IVec2) -> Option<DepthSample> {
        self.extent.index(pos).and_then(|i| self.samples[i])
    }

    /// Depth of the nearest particle at a pixel, 0 where nothing landed.
    pub fn front_depth(&self, pos: IVec2) -> f32 {
        self.sample(pos).map_or(0.0, |s| s.depth)
    }

    /// Pack into the host layout: `(active, velocity.x, velocity.y, depth)`.
    ///
    /// Channel 0 is addressed by slot coordinate, channels 1-3 by destination
    /// pixel; slots outside the destination extent are dropped.
    pub fn to_image(&self) -> Image {
        let mut image = Image::from_fn(self.extent, |pos| match self.sample(pos) {
            Some(s) => Vec4::new(0.0, s.velocity.x, s.velocity.y, s.depth),
            None => Vec4::ZERO,
        });
        for (index, _) in self.active.iter().enumerate().filter(|(_, active)| **active) {
            let pos = self.slots.position(index);
            if let Some(pixel) = image.get(pos) {
                image.set(pos, Vec4::new(1.0, pixel.y, pixel.z, pixel.w));
            }
        }
        image
    }
}

/// A particle that survived culling.
struct Splat {
    slot: u32,
    depth: f32,
    velocity: Vec2,
    footprint: Footprint,
}

impl PassSetup<'_> {
    fn zbuffer_splat(&self, slot: usize) -> Option<Splat> {
        let pos = self.slot_position(slot);

        if let Some(active) = self.active {
            if active.at(pos).x != 1.0 {
                return None;
            }
        }
        if let Some(colour) = self.colour {
            if colour.at(pos).w == 0.0 {
                return None;
            }
        }
        if self.reduced_away(slot) {
            return None;
        }

        let particle = self.particles.at(pos);
        let projected = self.ctx.project(particle.truncate());
        if self.clipped(&projected) {
            return None;
        }
        self.dst.pixel_at(projected.screen)?;

        let depth = self.params.zdepth(projected.local.z);
        if depth.is_nan() || self.depth_masked(&projected, depth) {
            return None;
        }

        let footprint = self.footprint(particle, projected.local)?;
        let velocity = self.screen_velocity(pos, particle, projected.screen);

        Some(Splat {
            slot: slot as u32,
            depth,
            velocity,
            footprint,
        })
    }
}

/// Run the Z-buffer pass into a destination of `dst` pixels.
///
/// # Errors
///
/// - [`KernelError::MissingInput`](crate::KernelError::MissingInput) if a flag
///   needs an unbound image
/// - [`KernelError::InvalidParameter`](crate::KernelError::InvalidParameter)
///   for a zero reduction stride
/// - [`KernelError::TooManyParticles`](crate::KernelError::TooManyParticles) if
///   slots cannot be numbered
pub fn run(
    ctx: &ProjectionContext,
    params: &RasterParams,
    inputs: &ParticleInputs<'_>,
    dst: Extent,
) -> Result<ZBuffer> {
    let setup = PassSetup::new(ctx, params, inputs, dst)?;
    let slots = inputs.particles.extent();

    let splats: Vec<Splat> = (0..setup.slot_count())
        .into_par_iter()
        .filter_map(|slot| setup.zbuffer_splat(slot))
        .collect();

    let clamped = splats.iter().filter(|s| s.footprint.clamped).count();
    if clamped > 0 {
        log::debug!("zbuffer: {} footprints clamped to {} px", clamped, params.safety_limit);
    }

    let cells = DepthCells::new(dst);
    splats.par_iter().for_each(|splat| {
        let footprint = &splat.footprint;
        for (local, out) in footprint.pixels(dst) {
            if let Some(filter) = &setup.filter {
                if filter.sample(local, footprint.range).w <= 0.0 {
                    continue;
                }
            }
            cells.offer(out, splat.depth, splat.slot);
        }
    });

    let mut active = vec![false; slots.len()];
    let mut velocities = vec![Vec2::ZERO; slots.len()];
    for splat in &splats {
        active[splat.slot as usize] = true;
        velocities[splat.slot as usize] = splat.velocity;
    }

    let samples = cells
        .resolve()
        .into_iter()
        .map(|claim| {
            claim.map(|c| DepthSample {
                velocity: velocities[c.slot as usize],
                depth: c.depth,
                slot: c.slot,
            })
        })
        .collect();

    log::debug!(
        "zbuffer: {} of {} particles active into {}x{}",
        splats.len(),
        slots.len(),
        dst.width,
        dst.height
    );

    Ok(ZBuffer {
        slots,
        active,
        extent: dst,
        samples,
    })
}
