//! Map single-pixel id buffers back to particle colours.

use glam::{IVec2, Vec4};
use serde::{Deserialize, Serialize};

use crate::buffer::Image;
use crate::error::{KernelError, Result};
use crate::kernel::{render, PixelKernel};
use crate::KernelParams;

/// ID-to-colour parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, KernelParams)]
#[serde(default)]
pub struct IdColourParams {
    /// Look colours up in the swatch image instead of writing white.
    #[param(label = "Use Particle Colour", default = false)]
    pub use_pcol: bool,
}

/// Kernel decoding `id + 1` in channel 0 into a colour.
///
/// Id `n` reads swatch pixel `(n % width, n / width)`, the slot layout of the
/// particle images.
pub struct IdToColour<'a> {
    ids: &'a Image,
    swatches: Option<&'a Image>,
}

impl<'a> IdToColour<'a> {
    /// Bind inputs. `swatches` is required when `use_pcol` is set.
    pub fn new(params: &IdColourParams, ids: &'a Image, swatches: Option<&'a Image>) -> Result<Self> {
        let swatches = match (params.use_pcol, swatches) {
            (true, None) => return Err(KernelError::MissingInput("colour")),
            (true, Some(image)) => Some(image),
            (false, _) => None,
        };
        Ok(Self { ids, swatches })
    }
}

impl PixelKernel for IdToColour<'_> {
    fn process(&self, pos: IVec2) -> Vec4 {
        // Encoded ids below 1 (and NaN) mean no particle.
        let encoded = self.ids.at(pos).x;
        if !(encoded >= 1.0) {
            return Vec4::ZERO;
        }
        let id = (encoded - 1.0) as u32;
        let Some(swatches) = self.swatches else {
            return Vec4::ONE;
        };
        let width = swatches.width();
        if width == 0 {
            return Vec4::ZERO;
        }
        match (i32::try_from(id % width), i32::try_from(id / width)) {
            (Ok(x), Ok(y)) => swatches.at(IVec2::new(x, y)),
            _ => Vec4::ZERO,
        }
    }
}

/// Colour every pixel of an id buffer.
pub fn run(params: &IdColourParams, ids: &Image, swatches: Option<&Image>) -> Result<Image> {
    let kernel = IdToColour::new(params, ids, swatches)?;
    Ok(render(&kernel, ids.extent()))
}
