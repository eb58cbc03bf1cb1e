//! Single-pixel pass: one sample per particle, no footprint.
//!
//! Each particle writes `(slot + 1, velocity.x, velocity.y, depth)` into the
//! destination pixel containing its projected centre. Where several particles
//! land on one pixel the nearest wins, ties going to the lowest slot. The
//! `+1` bias keeps 0 free for "no particle", which [`id_colour`] relies on.
//!
//! [`id_colour`]: super::id_colour

use glam::{IVec2, Vec2, Vec4};
use rayon::prelude::*;

use super::depth::DepthCells;
use super::{ParticleInputs, PassSetup, RasterParams};
use crate::buffer::{Extent, Image};
use crate::camera::ProjectionContext;
use crate::error::Result;

/// One particle sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IdSample {
    /// Slot index of the particle (the encoded id minus one).
    pub slot: u32,
    /// Screen-space velocity in pixels.
    pub velocity: Vec2,
    /// Normalised depth.
    pub depth: f32,
}

/// Output of the single-pixel pass.
#[derive(Debug, Clone, PartialEq)]
pub struct IdBuffer {
    extent: Extent,
    samples: Vec<Option<IdSample>>,
}

impl IdBuffer {
    /// Destination extent.
    pub fn extent(&self) -> Extent {
        self.extent
    }

    /// Sample at a destination pixel.
    pub fn sample(&self, pos: IVec2) -> Option<IdSample> {
        self.extent.index(pos).and_then(|i| self.samples[i])
    }

    /// Number of pixels holding a particle.
    pub fn len(&self) -> usize {
        self.samples.iter().flatten().count()
    }

    /// True if no particle landed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pack as `(slot + 1, velocity.x, velocity.y, depth)`, zero where empty.
    pub fn to_image(&self) -> Image {
        Image::from_fn(self.extent, |pos| match self.sample(pos) {
            Some(s) => Vec4::new((s.slot + 1) as f32, s.velocity.x, s.velocity.y, s.depth),
            None => Vec4::ZERO,
        })
    }
}

impl PassSetup<'_> {
    fn single_sample(&self, slot: usize) -> Option<(IVec2, IdSample)> {
        if self.reduced_away(slot) {
            return None;
        }
        let pos = self.slot_position(slot);
        let particle = self.particles.at(pos);
        if particle.w == 0.0 {
            return None;
        }

        let projected = self.ctx.project(particle.truncate());
        if self.clipped(&projected) {
            return None;
        }
        let pixel = self.dst.pixel_at(projected.screen)?;

        let depth = self.params.zdepth(projected.local.z);
        if self.depth_masked(&projected, depth) {
            return None;
        }

        Some((
            pixel,
            IdSample {
                slot: slot as u32,
                velocity: self.screen_velocity(pos, particle, projected.screen),
                depth,
            },
        ))
    }
}

/// Run the single-pixel pass.
///
/// Footprint parameters (`size`, filter, safety) are ignored.
pub fn run(
    ctx: &ProjectionContext,
    params: &RasterParams,
    inputs: &ParticleInputs<'_>,
    dst: Extent,
) -> Result<IdBuffer> {
    let setup = PassSetup::new(ctx, params, inputs, dst)?;

    let landed: Vec<(IVec2, IdSample)> = (0..setup.slot_count())
        .into_par_iter()
        .filter_map(|slot| setup.single_sample(slot))
        .collect();

    let cells = DepthCells::new(dst);
    landed
        .par_iter()
        .for_each(|(pixel, sample)| cells.offer(*pixel, sample.depth, sample.slot));

    // Winners are looked up by slot; `landed` is in slot order.
    let samples = cells
        .resolve()
        .into_iter()
        .map(|claim| {
            claim.and_then(|c| {
                landed
                    .binary_search_by_key(&c.slot, |(_, s)| s.slot)
                    .ok()
                    .map(|i| landed[i].1)
            })
        })
        .collect();

    log::debug!("single pixel: {} particles landed", landed.len());

    Ok(IdBuffer {
        extent: dst,
        samples,
    })
}
