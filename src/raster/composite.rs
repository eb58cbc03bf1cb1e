//! Main pass: depth-aware alpha compositing of particle footprints.
//!
//! Particles are composited in slot order into a premultiplied RGBA
//! accumulator. Each pixel tracks its remaining alpha budget `1 - alpha`:
//!
//! - The particle that owns the pixel in the [`ZBuffer`] always lands. If the
//!   budget is short, earlier contributions are scaled down to make room.
//! - Any other particle adds only what fits in the remaining budget.
//!
//! Accumulated alpha therefore never exceeds 1 and never decreases.
//!
//! # Parallelism
//!
//! The destination is split into bands of rows. Each band is owned by one
//! worker, which replays every footprint in slot order but only touches its own
//! rows, so the output is identical to a sequential run.

use glam::{IVec2, Vec4};
use rayon::prelude::*;

use super::zbuffer::ZBuffer;
use super::{Footprint, ParticleInputs, PassSetup, RasterParams};
use crate::buffer::{Extent, Image};
use crate::camera::ProjectionContext;
use crate::error::Result;

/// Rows per parallel work unit.
const BAND_ROWS: usize = 16;

/// Colour written on the border of clamped footprints.
pub const EDGE_COLOUR: Vec4 = Vec4::new(1.0, 0.0, 0.0, 0.0);

struct Splat {
    depth: f32,
    colour: Vec4,
    footprint: Footprint,
    edging: bool,
}

impl PassSetup<'_> {
    fn composite_splat(&self, slot: usize, zbuffer: &ZBuffer) -> Option<Splat> {
        let pos = self.slot_position(slot);
        if !zbuffer.is_active(pos) {
            return None;
        }

        let particle = self.particles.at(pos);
        let projected = self.ctx.project(particle.truncate());
        let depth = self.params.zdepth(projected.local.z);
        let footprint = self.footprint(particle, projected.local)?;
        let edging = footprint.clamped && !self.params.edge_disable;

        Some(Splat {
            depth,
            colour: self.base_colour(pos, depth),
            footprint,
            edging,
        })
    }

    fn composite_band(&self, splats: &[Splat], zbuffer: &ZBuffer, band: &mut [Vec4], first_row: i32) {
        let width = self.dst.width as usize;
        let rows = first_row..first_row + (band.len() / width) as i32;

        for splat in splats {
            let footprint = &splat.footprint;
            for (local, out) in footprint.pixels_in(self.dst, rows.clone()) {
                let index = (out.y - first_row) as usize * width + out.x as usize;
                let pixel = &mut band[index];

                if splat.edging && footprint.is_border(local) {
                    *pixel = EDGE_COLOUR;
                    continue;
                }

                let Some(contribution) = self.contribution(splat, local, out) else {
                    continue;
                };
                *pixel = blend(*pixel, contribution, splat.depth == zbuffer.front_depth(out));
            }
        }
    }

    /// Premultiplied colour a particle offers to one output pixel.
    fn contribution(&self, splat: &Splat, local: IVec2, out: IVec2) -> Option<Vec4> {
        let mut result = splat.colour * splat.footprint.coverage(out);
        if let Some(filter) = &self.filter {
            let shape = filter.sample(local, splat.footprint.range);
            if shape.w <= 0.0 {
                return None;
            }
            result *= shape;
        }

        if result.w.is_nan() {
            return None;
        }
        for channel in 0..3 {
            if result[channel].is_nan() {
                result[channel] = 0.0;
            }
        }
        result.w = result.w.clamp(0.0, 1.0);
        Some(result)
    }
}

/// Merge one contribution into an accumulated pixel.
///
/// `front` is true when the contributing particle owns the pixel in the depth
/// buffer.
fn blend(existing: Vec4, mut result: Vec4, front: bool) -> Vec4 {
    let remaining = 1.0 - existing.w;

    if front {
        let mut merged = if remaining >= result.w {
            existing + result
        } else {
            // existing.w > 1 - result.w >= 0 here
            result + existing * ((1.0 - result.w) / existing.w)
        };
        merged.w = merged.w.min(1.0);
        return merged;
    }

    if remaining <= 0.0 {
        return existing;
    }
    if result.w > remaining {
        result *= remaining / result.w;
        result.w = remaining;
    }
    let mut merged = existing + result;
    merged.w = merged.w.min(1.0);
    merged
}

/// Run the compositing pass using a resolved Z-buffer.
///
/// Only particles marked active in `zbuffer` are drawn, so `zbuffer` must come
/// from [`zbuffer::run`](super::zbuffer::run) over the same inputs.
pub fn run(
    ctx: &ProjectionContext,
    params: &RasterParams,
    inputs: &ParticleInputs<'_>,
    zbuffer: &ZBuffer,
    dst: Extent,
) -> Result<Image> {
    let setup = PassSetup::new(ctx, params, inputs, dst)?;
    let mut output = Image::new(dst);
    if dst.is_empty() {
        return Ok(output);
    }

    let splats: Vec<Splat> = (0..setup.slot_count())
        .into_par_iter()
        .filter_map(|slot| setup.composite_splat(slot, zbuffer))
        .collect();

    let edged = splats.iter().filter(|s| s.edging).count();
    if edged > 0 {
        log::warn!("{} particle footprints exceeded the safety limit", edged);
    }

    let width = dst.width as usize;
    output
        .pixels_mut()
        .par_chunks_mut(width * BAND_ROWS)
        .enumerate()
        .for_each(|(band, pixels)| {
            setup.composite_band(&splats, zbuffer, pixels, (band * BAND_ROWS) as i32)
        });

    log::debug!("composite: {} particles into {}x{}", splats.len(), dst.width, dst.height);
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraParams;
    use crate::raster::zbuffer;
    use glam::Vec3;
    use proptest::prelude::*;

    #[test]
    fn test_blend_front_fills_budget() {
        let merged = blend(Vec4::new(0.2, 0.2, 0.2, 0.4), Vec4::new(0.3, 0.3, 0.3, 0.5), true);
        assert!((merged.w - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_blend_front_rescales_existing() {
        let existing = Vec4::new(0.8, 0.0, 0.0, 0.8);
        let merged = blend(existing, Vec4::new(0.0, 0.5, 0.0, 0.5), true);
        // existing scaled by (1 - 0.5) / 0.8
        assert!((merged.x - 0.5).abs() < 1e-6);
        assert!((merged.y - 0.5).abs() < 1e-6);
        assert!((merged.w - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_blend_behind_takes_remaining() {
        let merged = blend(Vec4::new(0.0, 0.0, 0.0, 0.75), Vec4::new(1.0, 1.0, 1.0, 1.0), false);
        assert!((merged.x - 0.25).abs() < 1e-6);
        assert!((merged.w - 1.0).abs() < 1e-6);

        let full = Vec4::new(0.5, 0.5, 0.5, 1.0);
        assert_eq!(blend(full, Vec4::ONE, false), full);
    }

    fn scene() -> (ProjectionContext, RasterParams) {
        let camera = CameraParams::default()
            .with_format(48, 40)
            .looking_at(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO);
        let params = RasterParams {
            depth_max: 20.0,
            size: 0.2,
            add_velocity: false,
            ..Default::default()
        };
        (ProjectionContext::new(&camera).unwrap(), params)
    }

    fn render(ctx: &ProjectionContext, params: &RasterParams, particles: &Image) -> Image {
        let inputs = ParticleInputs::new(particles);
        let dst = Extent::new(48, 40);
        let zbuffer = zbuffer::run(ctx, params, &inputs, dst).unwrap();
        run(ctx, params, &inputs, &zbuffer, dst).unwrap()
    }

    #[test]
    fn test_single_particle_is_opaque_at_centre() {
        let (ctx, params) = scene();
        let particles = Image::row(vec![Vec4::new(0.0, 0.0, 0.0, 1.0)]);
        let output = render(&ctx, &params, &particles);
        let centre = output.at(IVec2::new(24, 20));
        assert!((centre.w - 1.0).abs() < 1e-5);
        assert!((centre.x - 0.5).abs() < 1e-4);
        assert_eq!(output.at(IVec2::new(0, 0)), Vec4::ZERO);
    }

    #[test]
    fn test_particle_colour_tints_output() {
        let (ctx, mut params) = scene();
        params.use_pcolour = true;
        let particles = Image::row(vec![Vec4::new(0.0, 0.0, 0.0, 1.0)]);
        let colours = Image::row(vec![Vec4::new(1.0, 0.0, 0.5, 0.5)]);
        let inputs = ParticleInputs::new(&particles).with_colour(&colours);
        let dst = Extent::new(48, 40);
        let zbuffer = zbuffer::run(&ctx, &params, &inputs, dst).unwrap();
        let output = run(&ctx, &params, &inputs, &zbuffer, dst).unwrap();
        let centre = output.at(IVec2::new(24, 20));
        assert!((centre.x - 0.5).abs() < 1e-4);
        assert_eq!(centre.y, 0.0);
        assert!((centre.z - 0.25).abs() < 1e-4);
        assert!((centre.w - 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_clamped_footprint_gets_red_border() {
        let (ctx, mut params) = scene();
        params.size = 5.0;
        params.safety_limit = 6;
        let particles = Image::row(vec![Vec4::new(0.0, 0.0, 0.0, 1.0)]);
        let output = render(&ctx, &params, &particles);
        assert!(output.pixels().iter().any(|p| *p == EDGE_COLOUR));

        params.edge_disable = true;
        let output = render(&ctx, &params, &particles);
        assert!(output.pixels().iter().all(|p| *p != EDGE_COLOUR));
    }

    #[test]
    fn test_alpha_stays_bounded_with_overlap() {
        let (ctx, params) = scene();
        let particles = Image::row(
            (0..12)
                .map(|i| Vec4::new(0.01 * i as f32, 0.0, -0.3 * i as f32, 1.0))
                .collect(),
        );
        let output = render(&ctx, &params, &particles);
        assert!(output.pixels().iter().all(|p| p.w <= 1.0 && p.w >= 0.0));
    }


    fn render_with(ctx: &ProjectionContext, params: &RasterParams, inputs: &ParticleInputs<'_>) -> Image {
        let dst = Extent::new(48, 40);
        let zbuffer = zbuffer::run(ctx, params, inputs, dst).unwrap();
        run(ctx, params, inputs, &zbuffer, dst).unwrap()
    }

    #[test]
    fn test_filter_shapes_footprint() {
        let (ctx, mut params) = scene();
        params.use_filter = true;
        let particles = Image::row(vec![Vec4::new(0.0, 0.0, 0.0, 1.0)]);
        // Transparent left texel, opaque right texel
        let filter = Image::row(vec![Vec4::new(1.0, 1.0, 1.0, 0.0), Vec4::ONE]);
        let inputs = ParticleInputs::new(&particles).with_filter(&filter);
        let output = render_with(&ctx, &params, &inputs);

        // Footprint spans columns 22..=25; the first samples zero alpha
        assert_eq!(output.at(IVec2::new(22, 20)), Vec4::ZERO);
        let ramp: Vec<f32> = (23..=25).map(|x| output.at(IVec2::new(x, 20)).w).collect();
        assert!(ramp[0] > 0.1 && ramp[0] < 0.25);
        assert!(ramp[0] < ramp[1] && ramp[1] < ramp[2]);

        // A 2:1 sprite halves the footprint height
        assert_eq!(output.at(IVec2::new(24, 18)), Vec4::ZERO);
        assert_eq!(output.at(IVec2::new(24, 21)), Vec4::ZERO);
        assert!(output.at(IVec2::new(24, 19)).w > 0.5);
    }

    #[test]
    fn test_transparent_filter_draws_nothing() {
        let (ctx, mut params) = scene();
        params.use_filter = true;
        let particles = Image::row(vec![Vec4::new(0.0, 0.0, 0.0, 1.0)]);
        let filter = Image::filled(Extent::new(4, 4), Vec4::ZERO);
        let inputs = ParticleInputs::new(&particles).with_filter(&filter);
        let output = render_with(&ctx, &params, &inputs);
        assert!(output.pixels().iter().all(|p| *p == Vec4::ZERO));
    }

    #[test]
    fn test_nan_colour_channel_is_zeroed() {
        let (ctx, mut params) = scene();
        params.use_pcolour = true;
        let particles = Image::row(vec![Vec4::new(0.0, 0.0, 0.0, 1.0)]);
        let colours = Image::row(vec![Vec4::new(f32::NAN, 0.5, 0.5, 1.0)]);
        let inputs = ParticleInputs::new(&particles).with_colour(&colours);
        let output = render_with(&ctx, &params, &inputs);

        let centre = output.at(IVec2::new(24, 20));
        assert_eq!(centre.x, 0.0);
        assert!((centre.y - 0.25).abs() < 1e-4);
        assert!((centre.w - 1.0).abs() < 1e-5);
        assert!(output.pixels().iter().all(|p| p.is_finite()));
    }

    #[test]
    fn test_nan_alpha_is_skipped() {
        let (ctx, mut params) = scene();
        params.use_pcolour = true;
        let particles = Image::row(vec![Vec4::new(0.0, 0.0, 0.0, 1.0)]);
        let colours = Image::row(vec![Vec4::new(1.0, 1.0, 1.0, f32::NAN)]);
        let inputs = ParticleInputs::new(&particles).with_colour(&colours);
        let output = render_with(&ctx, &params, &inputs);
        assert!(output.pixels().iter().all(|p| *p == Vec4::ZERO));
    }

    fn layer() -> impl Strategy<Value = (Vec4, bool)> {
        (0.0f32..=1.0, 0.0f32..=1.0, any::<bool>())
            .prop_map(|(value, alpha, front)| (Vec4::new(value, value, value, 1.0) * alpha, front))
    }

    proptest! {
        #[test]
        fn test_blended_alpha_never_decreases(layers in prop::collection::vec(layer(), 1..32)) {
            let mut pixel = Vec4::ZERO;
            for (result, front) in layers {
                let merged = blend(pixel, result, front);
                prop_assert!(merged.is_finite());
                prop_assert!(merged.w >= pixel.w - 1e-6);
                prop_assert!(merged.w <= 1.0);
                pixel = merged;
            }
        }
    }
}
