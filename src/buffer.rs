//! Four-channel floating point images.
//!
//! [`Image`] is the currency of every kernel: particle positions, colours,
//! velocities, filter sprites and outputs are all RGBA `f32` buffers. Channels
//! are addressed 0-3 and reused for non-colour payloads (id, velocity, depth).
//!
//! # Coordinates
//!
//! Pixel `(0, 0)` is the bottom-left pixel, matching the compositing host.
//! [`Image::to_rgba32f`] and [`Image::from_rgba32f`] flip rows so files on disk
//! read top-down as usual.
//!
//! # Access Patterns
//!
//! - [`Image::get`] - checked point access, `None` outside the extent
//! - [`Image::at`] - random access, zero outside the extent
//! - [`Image::clamped`] - random access clamped to the nearest edge pixel
//! - [`Image::bilinear`] - edge-clamped bilinear filtering

use std::path::Path;

use glam::{IVec2, Vec2, Vec4};
use serde::{Deserialize, Serialize};

use crate::error::{KernelError, Result};

/// Width and height of an image, with bounds checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Extent {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Extent {
    /// Create an extent.
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Number of pixels.
    pub fn len(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// True if the extent holds no pixels.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// True if the integer pixel lies inside.
    pub fn contains(&self, pos: IVec2) -> bool {
        pos.x >= 0 && pos.y >= 0 && (pos.x as u32) < self.width && (pos.y as u32) < self.height
    }

    /// Pixel containing a continuous coordinate, if it lies inside.
    pub fn pixel_at(&self, point: Vec2) -> Option<IVec2> {
        if !point.is_finite() {
            return None;
        }
        let pos = point.floor().as_ivec2();
        self.contains(pos).then_some(pos)
    }

    /// Row-major index of a pixel.
    pub fn index(&self, pos: IVec2) -> Option<usize> {
        self.contains(pos)
            .then(|| pos.y as usize * self.width as usize + pos.x as usize)
    }

    /// Pixel coordinate of a row-major index.
    pub fn position(&self, index: usize) -> IVec2 {
        let width = self.width.max(1) as usize;
        IVec2::new((index % width) as i32, (index / width) as i32)
    }
}

/// RGBA `f32` image stored row-major, bottom row first.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    extent: Extent,
    pixels: Vec<Vec4>,
}

impl Image {
    /// Create a zero-filled image.
    pub fn new(extent: Extent) -> Self {
        Self::filled(extent, Vec4::ZERO)
    }

    /// Create an image with every pixel set to `value`.
    pub fn filled(extent: Extent, value: Vec4) -> Self {
        Self {
            extent,
            pixels: vec![value; extent.len()],
        }
    }

    /// Create an image by evaluating `f` at every pixel.
    pub fn from_fn(extent: Extent, mut f: impl FnMut(IVec2) -> Vec4) -> Self {
        let pixels = (0..extent.len()).map(|i| f(extent.position(i))).collect();
        Self { extent, pixels }
    }

    /// Wrap existing pixel data.
    pub fn from_pixels(extent: Extent, pixels: Vec<Vec4>) -> Result<Self> {
        if pixels.len() != extent.len() {
            return Err(KernelError::invalid(
                "pixels",
                format!(
                    "expected {} pixels for {}x{}, got {}",
                    extent.len(),
                    extent.width,
                    extent.height,
                    pixels.len()
                ),
            ));
        }
        Ok(Self { extent, pixels })
    }

    /// Single-row image, the layout used for flattened id buffers.
    pub fn row(pixels: Vec<Vec4>) -> Self {
        Self {
            extent: Extent::new(pixels.len() as u32, 1),
            pixels,
        }
    }

    /// Image extent.
    pub fn extent(&self) -> Extent {
        self.extent
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.extent.width
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.extent.height
    }

    /// All pixels, row-major.
    pub fn pixels(&self) -> &[Vec4] {
        &self.pixels
    }

    /// All pixels, row-major, mutable.
    pub fn pixels_mut(&mut self) -> &mut [Vec4] {
        &mut self.pixels
    }

    /// Consume the image, returning its pixels.
    pub fn into_pixels(self) -> Vec<Vec4> {
        self.pixels
    }

    /// Checked point access.
    pub fn get(&self, pos: IVec2) -> Option<Vec4> {
        self.extent.index(pos).map(|i| self.pixels[i])
    }

    /// Checked point access that reports the offending pixel.
    pub fn try_get(&self, pos: IVec2) -> Result<Vec4> {
        self.get(pos).ok_or(KernelError::OutOfBounds {
            x: pos.x,
            y: pos.y,
            width: self.extent.width,
            height: self.extent.height,
        })
    }

    /// Random access; zero outside the extent.
    pub fn at(&self, pos: IVec2) -> Vec4 {
        self.get(pos).unwrap_or(Vec4::ZERO)
    }

    /// Random access clamped to the nearest edge pixel.
    pub fn clamped(&self, pos: IVec2) -> Vec4 {
        if self.extent.is_empty() {
            return Vec4::ZERO;
        }
        let max = IVec2::new(self.extent.width as i32 - 1, self.extent.height as i32 - 1);
        self.at(pos.clamp(IVec2::ZERO, max))
    }

    /// Overwrite a pixel. Returns false if `pos` is outside the extent.
    pub fn set(&mut self, pos: IVec2, value: Vec4) -> bool {
        match self.extent.index(pos) {
            Some(i) => {
                self.pixels[i] = value;
                true
            }
            None => false,
        }
    }

    /// Edge-clamped bilinear sample.
    ///
    /// Pixel `(i, j)` covers `[i, i + 1) x [j, j + 1)` and its value sits at the
    /// centre `(i + 0.5, j + 0.5)`, so `(0, 0)` and `(width, height)` address
    /// the outer edges of the image.
    pub fn bilinear(&self, x: f32, y: f32) -> Vec4 {
        if self.extent.is_empty() || !x.is_finite() || !y.is_finite() {
            return Vec4::ZERO;
        }
        let sx = x - 0.5;
        let sy = y - 0.5;
        let x0 = sx.floor();
        let y0 = sy.floor();
        let tx = sx - x0;
        let ty = sy - y0;
        let (x0, y0) = (x0 as i32, y0 as i32);

        let bottom = self
            .clamped(IVec2::new(x0, y0))
            .lerp(self.clamped(IVec2::new(x0 + 1, y0)), tx);
        let top = self
            .clamped(IVec2::new(x0, y0 + 1))
            .lerp(self.clamped(IVec2::new(x0 + 1, y0 + 1)), tx);
        bottom.lerp(top, ty)
    }

    /// Convert to an `image` buffer, flipping rows to top-down order.
    pub fn to_rgba32f(&self) -> image::Rgba32FImage {
        let raw: Vec<f32> = bytemuck::cast_slice(&self.pixels).to_vec();
        let buffer = image::Rgba32FImage::from_raw(self.width(), self.height(), raw)
            .unwrap_or_else(|| image::Rgba32FImage::new(self.width(), self.height()));
        image::imageops::flip_vertical(&buffer)
    }

    /// Convert from an `image` buffer stored top-down.
    pub fn from_rgba32f(buffer: &image::Rgba32FImage) -> Self {
        let flipped = image::imageops::flip_vertical(buffer);
        let extent = Extent::new(flipped.width(), flipped.height());
        let pixels = flipped
            .as_raw()
            .chunks_exact(4)
            .map(Vec4::from_slice)
            .collect();
        Self { extent, pixels }
    }

    /// Load any image format supported by the `image` crate.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let decoded = image::open(path.as_ref())?.into_rgba32f();
        Ok(Self::from_rgba32f(&decoded))
    }

    /// Save the image. `.exr` keeps full float precision; other formats are
    /// quantised to 8 bits per channel.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let float = image::DynamicImage::ImageRgba32F(self.to_rgba32f());
        let is_exr = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("exr"));
        if is_exr {
            float.save(path)?;
        } else {
            float.to_rgba8().save(path)?;
        }
        log::debug!("wrote {}x{} image to {}", self.width(), self.height(), path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extent_contains() {
        let extent = Extent::new(4, 3);
        assert!(extent.contains(IVec2::new(0, 0)));
        assert!(extent.contains(IVec2::new(3, 2)));
        assert!(!extent.contains(IVec2::new(4, 0)));
        assert!(!extent.contains(IVec2::new(0, -1)));
    }

    #[test]
    fn test_pixel_at_floors() {
        let extent = Extent::new(4, 4);
        assert_eq!(extent.pixel_at(Vec2::new(1.9, 0.1)), Some(IVec2::new(1, 0)));
        assert_eq!(extent.pixel_at(Vec2::new(-0.1, 0.0)), None);
        assert_eq!(extent.pixel_at(Vec2::new(f32::NAN, 0.0)), None);
    }

    #[test]
    fn test_random_access_outside_is_zero() {
        let image = Image::filled(Extent::new(2, 2), Vec4::ONE);
        assert_eq!(image.at(IVec2::new(5, 5)), Vec4::ZERO);
        assert_eq!(image.clamped(IVec2::new(5, 5)), Vec4::ONE);
        assert!(matches!(
            image.try_get(IVec2::new(2, 0)),
            Err(KernelError::OutOfBounds { x: 2, y: 0, width: 2, height: 2 })
        ));
    }

    #[test]
    fn test_bilinear_centres_and_edges() {
        let image = Image::from_fn(Extent::new(2, 1), |p| Vec4::splat(p.x as f32));
        // Pixel centres return exact values
        assert_eq!(image.bilinear(0.5, 0.5).x, 0.0);
        assert_eq!(image.bilinear(1.5, 0.5).x, 1.0);
        // Halfway between centres
        assert!((image.bilinear(1.0, 0.5).x - 0.5).abs() < 1e-6);
        // Clamped beyond the edges
        assert_eq!(image.bilinear(2.0, 0.5).x, 1.0);
        assert_eq!(image.bilinear(-3.0, 0.5).x, 0.0);
    }

    #[test]
    fn test_from_pixels_rejects_wrong_length() {
        assert!(Image::from_pixels(Extent::new(2, 2), vec![Vec4::ZERO; 3]).is_err());
    }

    #[test]
    fn test_rgba32f_conversion_flips_rows() {
        let image = Image::from_fn(Extent::new(1, 2), |p| Vec4::splat(p.y as f32));
        let buffer = image.to_rgba32f();
        // Bottom row (y = 0) is the last row on disk
        assert_eq!(buffer.get_pixel(0, 1).0, [0.0; 4]);
        assert_eq!(buffer.get_pixel(0, 0).0, [1.0; 4]);
        assert_eq!(Image::from_rgba32f(&buffer), image);
    }
}
