//! Lock-free nearest-particle resolution.
//!
//! Each destination pixel holds one `AtomicU64` key packing the depth and the
//! particle slot:
//!
//! ```text
//! bits 63..32  depth, remapped so unsigned order matches float order
//! bits 31..0   u32::MAX - slot
//! ```
//!
//! Claiming a pixel is a single `fetch_max`, so the result is the nearest
//! particle regardless of thread scheduling, and equal depths resolve to the
//! lowest slot. The empty key encodes depth 0 with no owner; a particle must
//! reach at least depth 0 to claim a pixel.

use std::sync::atomic::{AtomicU64, Ordering};

use glam::IVec2;

use crate::buffer::Extent;

/// Remap float bits so that unsigned comparison matches float comparison.
fn ordered_bits(value: f32) -> u32 {
    // Fold -0.0 into +0.0
    let bits = (value + 0.0).to_bits();
    if bits & 0x8000_0000 != 0 {
        !bits
    } else {
        bits | 0x8000_0000
    }
}

fn from_ordered_bits(bits: u32) -> f32 {
    if bits & 0x8000_0000 != 0 {
        f32::from_bits(bits & 0x7fff_ffff)
    } else {
        f32::from_bits(!bits)
    }
}

fn pack(depth: f32, slot: u32) -> u64 {
    (u64::from(ordered_bits(depth)) << 32) | u64::from(u32::MAX - slot)
}

/// The particle that won a pixel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Claim {
    pub(crate) depth: f32,
    pub(crate) slot: u32,
}

/// Shared per-pixel depth keys.
pub(crate) struct DepthCells {
    extent: Extent,
    cells: Vec<AtomicU64>,
}

impl DepthCells {
    pub(crate) fn new(extent: Extent) -> Self {
        let empty = u64::from(ordered_bits(0.0)) << 32;
        Self {
            extent,
            cells: (0..extent.len()).map(|_| AtomicU64::new(empty)).collect(),
        }
    }

    /// Offer `(depth, slot)` for a pixel. Depths below 0 or NaN never claim.
    pub(crate) fn offer(&self, pos: IVec2, depth: f32, slot: u32) {
        if depth.is_nan() || depth < 0.0 {
            return;
        }
        if let Some(index) = self.extent.index(pos) {
            self.cells[index].fetch_max(pack(depth, slot), Ordering::Relaxed);
        }
    }

    /// Collapse the keys into per-pixel winners, row-major.
    pub(crate) fn resolve(self) -> Vec<Option<Claim>> {
        self.cells
            .into_iter()
            .map(|cell| {
                let key = cell.into_inner();
                let owner = key as u32;
                (owner != 0).then(|| Claim {
                    depth: from_ordered_bits((key >> 32) as u32),
                    slot: u32::MAX - owner,
                })
            })
            .collect()
    }
}
