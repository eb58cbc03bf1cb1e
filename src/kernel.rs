//! Per-pixel kernel evaluation.
//!
//! A kernel is split the same way the compositing host splits it: everything
//! that depends only on parameters is computed once into an immutable
//! evaluation context (the host's `init`), and [`PixelKernel::process`] is a
//! pure function of that context and one output pixel (the host's `process`).
//! Because contexts are immutable, [`render`] can evaluate pixels in any order
//! and on any number of threads.

use glam::{IVec2, Vec4};
use rayon::prelude::*;

use crate::buffer::{Extent, Image};

/// A kernel that produces one output pixel per call.
pub trait PixelKernel: Sync {
    /// Evaluate the kernel at one output pixel.
    fn process(&self, pos: IVec2) -> Vec4;
}

/// Evaluate `kernel` at every pixel of `extent` in parallel.
pub fn render<K: PixelKernel + ?Sized>(kernel: &K, extent: Extent) -> Image {
    let pixels: Vec<Vec4> = (0..extent.len())
        .into_par_iter()
        .map(|i| kernel.process(extent.position(i)))
        .collect();
    log::trace!("evaluated {} pixels", pixels.len());
    Image::from_pixels(extent, pixels).unwrap_or_else(|_| Image::new(extent))
}
