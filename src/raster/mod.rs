//! Multi-pass particle rasterizer.
//!
//! Particles arrive as images: one particle per input pixel ("slot"), with the
//! position in RGB and a size/validity value in alpha. The passes run in this
//! order, each an independent evaluator over the same particle stream:
//!
//! 1. [`zbuffer`] - resolve the nearest particle per output pixel and record
//!    its depth and screen-space velocity
//! 2. [`single_pixel`] - one id/velocity/depth sample per particle, no splat
//! 3. [`composite`] - depth-aware front-to-back alpha compositing of every
//!    particle's footprint
//! 4. [`id_colour`] - map encoded ids back to swatch colours
//! 5. [`velocity_match`] - carry samples across frames by particle id
//!
//! # Depth
//!
//! Depth is normalised as `zdepth = 1 + camera_z / depth_max`: 1.0 at the
//! camera, 0.0 at `depth_max`. Larger values are nearer.
//!
//! # Footprints
//!
//! A particle covers the screen rectangle spanned by its camera-space quad
//! (`size` in each direction, optionally scaled by the particle's alpha). With
//! `safety` enabled the pixel range is clamped to `safety_limit` per axis,
//! shrinking symmetrically about the original range.

pub mod composite;
mod depth;
pub mod id_colour;
pub mod single_pixel;
pub mod velocity_match;
pub mod zbuffer;

use glam::{IVec2, Vec2, Vec3, Vec4};
use serde::{Deserialize, Serialize};

use crate::buffer::{Extent, Image};
use crate::camera::{Projected, ProjectionContext};
use crate::error::{KernelError, Result};
use crate::KernelParams;

/// Parameters shared by the particle passes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, KernelParams)]
#[serde(default)]
pub struct RasterParams {
    /// Shape each particle by the filter sprite.
    #[param(label = "Use Filter Image", default = false)]
    pub use_filter: bool,
    /// Tint particles by the particle colour image.
    #[param(label = "Use Particle Colour", default = false)]
    pub use_pcolour: bool,
    /// Drop particles outside the near/far clip planes.
    #[param(label = "Use Depth Clipping", default = true)]
    pub use_zclip: bool,
    /// Drop particles behind the depth mask.
    #[param(label = "Use Depth Mask", default = false)]
    pub use_depth: bool,
    /// Scale `size` by each particle's alpha.
    #[param(label = "Use Particle Size", default = false)]
    pub use_psize: bool,
    /// Clamp footprints to `safety_limit` pixels per axis.
    #[param(label = "Safety", default = true)]
    pub safety: bool,
    /// Compute screen-space motion vectors.
    #[param(label = "Add Velocity", default = true)]
    pub add_velocity: bool,
    /// Skip the warning border on clamped particles.
    #[param(label = "Edge Disable", default = false)]
    pub edge_disable: bool,
    /// Only every `reduce`th particle slot is rendered.
    #[param(label = "Reduction", default = 1)]
    pub reduce: u32,
    /// Maximum footprint extent per axis, in pixels.
    #[param(label = "Safety Limit", default = 150)]
    pub safety_limit: i32,
    /// Camera distance mapped to depth 0.
    #[param(label = "Depth Range", default = 1000.0)]
    pub depth_max: f32,
    /// Half-size of each particle quad in camera units.
    #[param(label = "Particle Size", default = 5.0)]
    pub size: f32,
}

impl RasterParams {
    /// Normalised depth of a camera-local `z`.
    pub fn zdepth(&self, camera_z: f32) -> f32 {
        1.0 + camera_z / self.depth_max
    }

    fn validate(&self) -> Result<()> {
        if self.reduce == 0 {
            return Err(KernelError::invalid("reduce", "reduction stride must be at least 1"));
        }
        if self.safety && self.safety_limit < 0 {
            return Err(KernelError::invalid("safety_limit", "limit must not be negative"));
        }
        Ok(())
    }
}

/// Images bound to a particle pass.
///
/// `particles` and the per-slot inputs (`active`, `colour`, `velocity`,
/// `velocity_next`) are read at the particle's slot. `filter` and `depth_mask`
/// are randomly accessed.
#[derive(Debug, Clone, Copy)]
pub struct ParticleInputs<'a> {
    /// Positions in RGB, size/validity in alpha.
    pub particles: &'a Image,
    /// Slot is rendered only if channel 0 equals 1.
    pub active: Option<&'a Image>,
    /// Per-particle RGBA colour.
    pub colour: Option<&'a Image>,
    /// Position delta from the previous frame.
    pub velocity: Option<&'a Image>,
    /// Position delta to the next frame.
    pub velocity_next: Option<&'a Image>,
    /// Sprite shaping each particle footprint.
    pub filter: Option<&'a Image>,
    /// Depth mask; channel 0 holds normalised depth.
    pub depth_mask: Option<&'a Image>,
}

impl<'a> ParticleInputs<'a> {
    /// Bind a particle position image.
    pub fn new(particles: &'a Image) -> Self {
        Self {
            particles,
            active: None,
            colour: None,
            velocity: None,
            velocity_next: None,
            filter: None,
            depth_mask: None,
        }
    }

    /// Bind an activity image.
    pub fn with_active(mut self, active: &'a Image) -> Self {
        self.active = Some(active);
        self
    }

    /// Bind a particle colour image.
    pub fn with_colour(mut self, colour: &'a Image) -> Self {
        self.colour = Some(colour);
        self
    }

    /// Bind previous and next frame position deltas.
    pub fn with_velocity(mut self, previous: &'a Image, next: &'a Image) -> Self {
        self.velocity = Some(previous);
        self.velocity_next = Some(next);
        self
    }

    /// Bind a filter sprite.
    pub fn with_filter(mut self, filter: &'a Image) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Bind a depth mask.
    pub fn with_depth_mask(mut self, mask: &'a Image) -> Self {
        self.depth_mask = Some(mask);
        self
    }
}

/// Filter sprite remapped onto particle footprints.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FilterSprite<'a> {
    image: &'a Image,
    size: Vec2,
}

impl<'a> FilterSprite<'a> {
    fn new(image: &'a Image) -> Self {
        Self {
            image,
            size: Vec2::new(image.width() as f32, image.height() as f32),
        }
    }

    /// Quad scale keeping the sprite's aspect ratio, never above 1.
    fn aspect(&self) -> Vec2 {
        Vec2::new(
            (self.size.x / self.size.y).min(1.0),
            (self.size.y / self.size.x).min(1.0),
        )
    }

    /// Sample at footprint-local pixel `local` of a footprint spanning `range`.
    pub(crate) fn sample(&self, local: IVec2, range: IVec2) -> Vec4 {
        let fit = |offset: i32, span: i32| if span > 0 { offset as f32 / span as f32 } else { 0.0 };
        let x = fit(local.x, range.x) * self.size.x;
        let y = fit(local.y, range.y) * self.size.y;
        self.image.bilinear(x, y)
    }
}

/// Rectangular pixel range a particle may affect.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Footprint {
    /// Bottom-left corner in screen pixels.
    pub min: Vec2,
    /// Top-right corner in screen pixels.
    pub max: Vec2,
    /// First pixel of the range.
    pub start: IVec2,
    /// Pixel offset of the last pixel from `start` (inclusive).
    pub range: IVec2,
    /// Whether the range was truncated by the safety limit.
    pub clamped: bool,
}

impl Footprint {
    /// Footprint of the screen rectangle `[min, max]`.
    ///
    /// Pixel bounds are limited to `+-2^24` so integer offsets cannot
    /// overflow; coverage still uses the exact corners.
    pub fn new(min: Vec2, max: Vec2) -> Self {
        const REACH: f32 = 16_777_216.0;
        let start = min.clamp(Vec2::splat(-REACH), Vec2::splat(REACH)).floor().as_ivec2();
        let end = max.clamp(Vec2::splat(-REACH), Vec2::splat(REACH)).floor().as_ivec2();
        Self {
            min,
            max,
            start,
            range: end - start,
            clamped: false,
        }
    }

    /// Clamp the range to `limit` pixels per axis, keeping it centred.
    ///
    /// Returns true if the footprint was truncated.
    pub fn clamp_to(&mut self, limit: i32) -> bool {
        if self.range.x <= limit && self.range.y <= limit {
            return false;
        }
        let excess = (self.range - IVec2::splat(limit)).max(IVec2::ZERO);
        self.start += excess / 2;
        self.range = self.range.min(IVec2::splat(limit));
        self.clamped = true;
        true
    }

    /// True if the footprint-local pixel lies on the range's outer border.
    pub fn is_border(&self, local: IVec2) -> bool {
        local.x == 0 || local.y == 0 || local.x == self.range.x || local.y == self.range.y
    }

    /// Fraction of output pixel `out` covered by the particle rectangle.
    ///
    /// Each side contributes `min(distance from that edge, 1)`; the product
    /// anti-aliases the rectangle's silhouette.
    pub fn coverage(&self, out: IVec2) -> f32 {
        let p = out.as_vec2();
        let left = (p.x + 1.0 - self.min.x).min(1.0);
        let bottom = (p.y + 1.0 - self.min.y).min(1.0);
        let right = (self.max.x - p.x).min(1.0);
        let top = (self.max.y - p.y).min(1.0);
        left * bottom * right * top
    }

    /// Footprint-local offsets visible inside `rows` of an image `extent`,
    /// paired with their output pixel.
    ///
    /// Pixels outside the destination never receive writes, so they are not
    /// visited at all.
    pub fn pixels_in(
        &self,
        extent: Extent,
        rows: std::ops::Range<i32>,
    ) -> impl Iterator<Item = (IVec2, IVec2)> + '_ {
        let lo_y = (-self.start.y).max(rows.start - self.start.y).max(0);
        let hi_y = self
            .range
            .y
            .min(extent.height as i32 - 1 - self.start.y)
            .min(rows.end - 1 - self.start.y);
        let lo_x = (-self.start.x).max(0);
        let hi_x = if lo_y > hi_y {
            lo_x - 1
        } else {
            self.range.x.min(extent.width as i32 - 1 - self.start.x)
        };
        (lo_x..=hi_x).flat_map(move |x| {
            (lo_y..=hi_y).map(move |y| {
                let local = IVec2::new(x, y);
                (local, self.start + local)
            })
        })
    }

    /// Footprint-local offsets visible inside `extent`, with output pixels.
    pub fn pixels(&self, extent: Extent) -> impl Iterator<Item = (IVec2, IVec2)> + '_ {
        self.pixels_in(extent, 0..extent.height as i32)
    }
}

/// Per-pass view of the bound inputs, validated against the parameters.
pub(crate) struct PassSetup<'a> {
    pub(crate) ctx: &'a ProjectionContext,
    pub(crate) params: &'a RasterParams,
    pub(crate) particles: &'a Image,
    pub(crate) active: Option<&'a Image>,
    pub(crate) colour: Option<&'a Image>,
    pub(crate) filter: Option<FilterSprite<'a>>,
    depth_mask: Option<&'a Image>,
    velocity: Option<(&'a Image, &'a Image)>,
    pub(crate) dst: Extent,
}

impl<'a> PassSetup<'a> {
    pub(crate) fn new(
        ctx: &'a ProjectionContext,
        params: &'a RasterParams,
        inputs: &ParticleInputs<'a>,
        dst: Extent,
    ) -> Result<Self> {
        params.validate()?;

        if inputs.particles.extent().len() >= u32::MAX as usize {
            return Err(KernelError::TooManyParticles {
                count: inputs.particles.extent().len(),
            });
        }

        let colour = match (params.use_pcolour, inputs.colour) {
            (true, None) => return Err(KernelError::MissingInput("colour")),
            (true, Some(image)) => Some(image),
            (false, _) => None,
        };
        let filter = match (params.use_filter, inputs.filter) {
            (true, None) => return Err(KernelError::MissingInput("filter")),
            (true, Some(image)) if image.extent().is_empty() => {
                return Err(KernelError::invalid("filter", "filter image has no pixels"))
            }
            (true, Some(image)) => Some(FilterSprite::new(image)),
            (false, _) => None,
        };
        let depth_mask = match (params.use_depth, inputs.depth_mask) {
            (true, None) => return Err(KernelError::MissingInput("depth")),
            (true, Some(image)) => Some(image),
            (false, _) => None,
        };
        let velocity = match (params.add_velocity, inputs.velocity, inputs.velocity_next) {
            (true, Some(prev), Some(next)) => Some((prev, next)),
            (true, _, _) => {
                log::warn!("velocity requested but no velocity images bound, motion vectors are zero");
                None
            }
            (false, _, _) => None,
        };

        Ok(Self {
            ctx,
            params,
            particles: inputs.particles,
            active: inputs.active,
            colour,
            filter,
            depth_mask,
            velocity,
            dst,
        })
    }

    /// Number of particle slots.
    pub(crate) fn slot_count(&self) -> usize {
        self.particles.extent().len()
    }

    /// Slot index to slot coordinate.
    pub(crate) fn slot_position(&self, slot: usize) -> IVec2 {
        self.particles.extent().position(slot)
    }

    /// True if this slot is skipped by the reduction stride.
    pub(crate) fn reduced_away(&self, slot: usize) -> bool {
        slot % self.params.reduce as usize != 0
    }

    /// True if the projected particle lies behind the camera or, with depth
    /// clipping, outside the clip planes.
    pub(crate) fn clipped(&self, projected: &Projected) -> bool {
        if projected.local.z > 0.0 {
            return true;
        }
        self.params.use_zclip && (projected.ndc.z < -1.0 || 1.0 < projected.ndc.z)
    }

    /// True if the depth mask hides a particle at `zdepth`.
    pub(crate) fn depth_masked(&self, projected: &Projected, zdepth: f32) -> bool {
        let Some(mask) = self.depth_mask else {
            return false;
        };
        if self.params.depth_max == 0.0 {
            return false;
        }
        let size = Vec2::new(mask.width() as f32, mask.height() as f32);
        let at = ((projected.ndc.truncate() + Vec2::ONE) * 0.5 * size).floor().as_ivec2();
        mask.get(at).is_some_and(|value| zdepth < value.x)
    }

    /// Screen footprint of a particle, clamped by the safety limit.
    pub(crate) fn footprint(&self, particle: Vec4, local: Vec3) -> Option<Footprint> {
        let size = if self.params.use_psize {
            self.params.size * particle.w
        } else {
            self.params.size
        };
        let aspect = self.filter.map_or(Vec2::ONE, |filter| filter.aspect());
        let half = (aspect * size).extend(0.0);

        let min = self.ctx.local_to_screen(local - half);
        let max = self.ctx.local_to_screen(local + half);
        if !min.is_finite() || !max.is_finite() {
            return None;
        }

        let mut footprint = Footprint::new(min, max);
        if self.params.safety {
            footprint.clamp_to(self.params.safety_limit);
        }
        Some(footprint)
    }

    /// Screen-space motion vector of the particle in slot `pos`.
    ///
    /// The smoothed direction `(p - v_prev) - (p + v_next)` is rescaled to the
    /// previous-frame speed, re-projected, and measured from the particle's
    /// projected centre.
    pub(crate) fn screen_velocity(&self, pos: IVec2, particle: Vec4, centre: Vec2) -> Vec2 {
        let Some((previous, next)) = self.velocity else {
            return Vec2::ZERO;
        };
        let position = particle.truncate();
        let velocity = previous.at(pos).truncate();
        let prev = position - velocity;
        let upcoming = position + next.at(pos).truncate();

        let direction = (prev - upcoming).normalize_or_zero() * velocity.length();
        let last = self.ctx.project(position + direction).screen;
        centre - last
    }

    /// Particle colour before coverage, premultiplied by normalised depth.
    pub(crate) fn base_colour(&self, pos: IVec2, zdepth: f32) -> Vec4 {
        match self.colour {
            Some(colour) => {
                let tint = colour.at(pos);
                (tint.truncate() * zdepth).extend(tint.w)
            }
            None => Vec4::new(zdepth, zdepth, zdepth, 1.0),
        }
    }
}

/// Every per-frame output of the particle passes.
#[derive(Debug, Clone)]
pub struct ParticleFrame {
    /// Nearest-particle depth and motion.
    pub zbuffer: zbuffer::ZBuffer,
    /// One id sample per particle.
    pub ids: single_pixel::IdBuffer,
    /// Composited colour.
    pub colour: Image,
}

/// Run the Z-buffer, compositing and single-pixel passes for one frame.
pub fn render_frame(
    ctx: &ProjectionContext,
    params: &RasterParams,
    inputs: &ParticleInputs<'_>,
    dst: Extent,
) -> Result<ParticleFrame> {
    let zbuffer = zbuffer::run(ctx, params, inputs, dst)?;
    let colour = composite::run(ctx, params, inputs, &zbuffer, dst)?;
    let ids = single_pixel::run(ctx, params, inputs, dst)?;
    Ok(ParticleFrame { zbuffer, ids, colour })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraParams;

    #[test]
    fn test_clamp_centres_wide_range() {
        let mut footprint = Footprint::new(Vec2::new(10.2, 20.5), Vec2::new(410.7, 25.1));
        assert_eq!(footprint.start, IVec2::new(10, 20));
        assert_eq!(footprint.range, IVec2::new(400, 5));

        assert!(footprint.clamp_to(150));
        assert!(footprint.clamped);
        assert_eq!(footprint.range, IVec2::new(150, 5));
        // Shifted by (400 - 150) / 2 horizontally, untouched vertically
        assert_eq!(footprint.start, IVec2::new(10 + 125, 20));
    }

    #[test]
    fn test_clamp_leaves_small_range() {
        let mut footprint = Footprint::new(Vec2::new(0.0, 0.0), Vec2::new(10.0, 10.0));
        assert!(!footprint.clamp_to(150));
        assert_eq!(footprint.range, IVec2::new(10, 10));
    }

    #[test]
    fn test_coverage_interior_and_edges() {
        let footprint = Footprint::new(Vec2::new(1.5, 1.0), Vec2::new(4.0, 3.25));
        assert_eq!(footprint.coverage(IVec2::new(2, 1)), 1.0);
        assert!((footprint.coverage(IVec2::new(1, 1)) - 0.5).abs() < 1e-6);
        assert!((footprint.coverage(IVec2::new(2, 3)) - 0.25).abs() < 1e-6);
        assert!((footprint.coverage(IVec2::new(1, 3)) - 0.125).abs() < 1e-6);
    }

    #[test]
    fn test_pixels_skip_outside_destination() {
        let footprint = Footprint::new(Vec2::new(-2.0, -2.0), Vec2::new(1.5, 1.5));
        let extent = Extent::new(4, 4);
        let visited: Vec<_> = footprint.pixels(extent).collect();
        // Only (0,0), (0,1), (1,0), (1,1) are inside
        assert_eq!(visited.len(), 4);
        assert!(visited.contains(&(IVec2::new(2, 2), IVec2::new(0, 0))));
        assert!(visited.iter().all(|(_, out)| extent.contains(*out)));
    }

    #[test]
    fn test_pixels_in_row_band() {
        let footprint = Footprint::new(Vec2::new(0.0, 0.0), Vec2::new(2.0, 9.0));
        let extent = Extent::new(8, 16);
        let band: Vec<_> = footprint.pixels_in(extent, 4..8).collect();
        assert_eq!(band.len(), 3 * 4);
        assert!(band.iter().all(|(_, out)| (4..8).contains(&out.y)));
    }

    #[test]
    fn test_border_detection() {
        let footprint = Footprint::new(Vec2::ZERO, Vec2::new(3.0, 3.0));
        assert!(footprint.is_border(IVec2::new(0, 2)));
        assert!(footprint.is_border(IVec2::new(3, 1)));
        assert!(!footprint.is_border(IVec2::new(1, 2)));
    }

    #[test]
    fn test_filter_aspect() {
        let wide = Image::new(Extent::new(20, 10));
        let sprite = FilterSprite::new(&wide);
        assert_eq!(sprite.aspect(), Vec2::new(1.0, 0.5));
    }

    #[test]
    fn test_setup_requires_flagged_inputs() {
        let ctx = ProjectionContext::new(&CameraParams::default()).unwrap();
        let particles = Image::new(Extent::new(2, 2));
        let inputs = ParticleInputs::new(&particles);
        let extent = Extent::new(8, 8);

        let params = RasterParams {
            use_filter: true,
            ..Default::default()
        };
        assert!(matches!(
            PassSetup::new(&ctx, &params, &inputs, extent),
            Err(KernelError::MissingInput("filter"))
        ));

        let params = RasterParams {
            reduce: 0,
            ..Default::default()
        };
        assert!(PassSetup::new(&ctx, &params, &inputs, extent).is_err());

        // Missing velocity images only disable motion vectors
        assert!(PassSetup::new(&ctx, &RasterParams::default(), &inputs, extent).is_ok());
    }

    #[test]
    fn test_footprint_follows_filter_aspect() {
        let camera = CameraParams::default()
            .with_format(64, 64)
            .looking_at(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO);
        let ctx = ProjectionContext::new(&camera).unwrap();
        let particles = Image::row(vec![Vec4::new(0.0, 0.0, 0.0, 1.0)]);
        let local = ctx.project(Vec3::ZERO).local;
        let extent = Extent::new(64, 64);
        let params = RasterParams {
            size: 0.5,
            ..Default::default()
        };
        let square = PassSetup::new(&ctx, &params, &ParticleInputs::new(&particles), extent)
            .unwrap()
            .footprint(particles.at(IVec2::ZERO), local)
            .unwrap();

        let wide = Image::new(Extent::new(20, 10));
        let params = RasterParams {
            use_filter: true,
            ..params
        };
        let inputs = ParticleInputs::new(&particles).with_filter(&wide);
        let shaped = PassSetup::new(&ctx, &params, &inputs, extent)
            .unwrap()
            .footprint(particles.at(IVec2::ZERO), local)
            .unwrap();

        let (square, shaped) = (square.max - square.min, shaped.max - shaped.min);
        assert!((shaped.x - square.x).abs() < 1e-3);
        assert!((shaped.y - square.y * 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_zdepth_normalisation() {
        let params = RasterParams {
            depth_max: 10.0,
            ..Default::default()
        };
        assert_eq!(params.zdepth(0.0), 1.0);
        assert_eq!(params.zdepth(-10.0), 0.0);
        assert!(params.zdepth(-20.0) < 0.0);
    }
}
