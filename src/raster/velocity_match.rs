//! Match samples across frames by particle id.
//!
//! Each current-frame pixel carries an id in alpha. The match is the
//! next-frame sample in row 0 with the same id, searched from the pixel's own
//! row-major index down to 0; the first hit wins. Pixels with id 0 (or NaN)
//! have no particle and output zero.
//!
//! Two equivalent kernels are provided:
//!
//! - [`ScanMatch`] - the direct backwards scan, `O(width)` per pixel
//! - [`IndexedMatch`] - a hash index from id to sorted positions, built once

use std::collections::HashMap;

use glam::{IVec2, Vec4};
use serde::{Deserialize, Serialize};

use crate::buffer::Image;
use crate::kernel::{render, PixelKernel};
use crate::KernelParams;

/// Search strategy for [`run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    /// Linear backwards scan.
    Scan,
    /// Hash index over the next frame.
    #[default]
    Indexed,
}

/// Velocity match parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, KernelParams)]
#[serde(default)]
pub struct VelocityMatchParams {
    #[param(label = "Strategy", default = MatchStrategy::Indexed)]
    pub strategy: MatchStrategy,
}

fn current_id(current: &Image, pos: IVec2) -> Option<(f32, usize)> {
    let id = current.at(pos).w;
    if id == 0.0 || id.is_nan() {
        return None;
    }
    current.extent().index(pos).map(|index| (id, index))
}

/// Backwards scan over the next frame's first row.
pub struct ScanMatch<'a> {
    current: &'a Image,
    next: &'a Image,
}

impl<'a> ScanMatch<'a> {
    pub fn new(current: &'a Image, next: &'a Image) -> Self {
        Self { current, next }
    }
}

impl PixelKernel for ScanMatch<'_> {
    fn process(&self, pos: IVec2) -> Vec4 {
        let Some((id, index)) = current_id(self.current, pos) else {
            return Vec4::ZERO;
        };
        let Some(last) = (self.next.width() as usize).checked_sub(1) else {
            return Vec4::ZERO;
        };
        (0..=index.min(last))
            .rev()
            .map(|x| self.next.at(IVec2::new(x as i32, 0)))
            .find(|sample| sample.w == id)
            .unwrap_or(Vec4::ZERO)
    }
}

/// Id-to-positions index over a next-frame image's first row.
#[derive(Debug, Clone, Default)]
pub struct NextFrameIndex {
    positions: HashMap<u32, Vec<u32>>,
}

impl NextFrameIndex {
    /// Index every non-zero id in row 0 of `next`.
    pub fn build(next: &Image) -> Self {
        let mut positions: HashMap<u32, Vec<u32>> = HashMap::new();
        for x in 0..next.width() {
            let id = next.at(IVec2::new(x as i32, 0)).w;
            if id == 0.0 || id.is_nan() {
                continue;
            }
            positions.entry(id.to_bits()).or_default().push(x);
        }
        log::trace!("indexed {} distinct ids", positions.len());
        Self { positions }
    }

    /// Largest column `<= limit` holding `id`.
    pub fn find(&self, id: f32, limit: usize) -> Option<u32> {
        let columns = self.positions.get(&(id + 0.0).to_bits())?;
        let end = columns.partition_point(|&x| x as usize <= limit);
        end.checked_sub(1).map(|i| columns[i])
    }
}

/// Hash-indexed match.
pub struct IndexedMatch<'a> {
    current: &'a Image,
    next: &'a Image,
    index: NextFrameIndex,
}

impl<'a> IndexedMatch<'a> {
    pub fn new(current: &'a Image, next: &'a Image) -> Self {
        Self {
            current,
            next,
            index: NextFrameIndex::build(next),
        }
    }
}

impl PixelKernel for IndexedMatch<'_> {
    fn process(&self, pos: IVec2) -> Vec4 {
        current_id(self.current, pos)
            .and_then(|(id, index)| self.index.find(id, index))
            .map_or(Vec4::ZERO, |x| self.next.at(IVec2::new(x as i32, 0)))
    }
}

/// Match every pixel of `current` against `next`.
pub fn run(params: &VelocityMatchParams, current: &Image, next: &Image) -> Image {
    match params.strategy {
        MatchStrategy::Scan => render(&ScanMatch::new(current, next), current.extent()),
        MatchStrategy::Indexed => render(&IndexedMatch::new(current, next), current.extent()),
    }
}
