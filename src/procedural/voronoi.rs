//! 3D cellular (Voronoi) noise.
//!
//! Space is divided into unit cubes. Each cube hashes to a seed which decides
//! how many feature points it holds (a Poisson table) and where they lie (a
//! Lehmer generator). A pixel is transformed into noise space, the feature
//! points of the 27 surrounding cubes are ranked by distance, and the owner of
//! the `range`-th nearest point picks the colour.
//!
//! Output is fully deterministic: the same parameters always give the same
//! image, on any thread count.

use glam::{IVec2, IVec3, Mat4, Vec3, Vec4};
use serde::{Deserialize, Serialize};

use crate::camera::checked_inverse;
use crate::error::Result;
use crate::kernel::PixelKernel;
use crate::KernelParams;

/// Number of nearest feature points kept per pixel.
pub const MAX_RANKED: usize = 12;

const LCG_MULTIPLIER: u32 = 48271;
const LCG_MODULUS: u32 = 2_147_483_647;

const FNV_OFFSET_BASIS: u32 = 2_166_136_261;
const FNV_PRIME: u32 = 16_777_619;

/// Upper bounds of the cumulative Poisson table for 1..=8 points.
const POISSON_THRESHOLDS: [u32; 8] = [
    393_325_350,
    1_022_645_910,
    1_861_739_990,
    2_700_834_071,
    3_372_109_335,
    3_819_626_178,
    4_075_350_088,
    4_203_212_043,
];

const UNRANKED_DISTANCE: f32 = 6666.0;

/// Lehmer step: `seed * 48271 mod (2^31 - 1)` in wrapping 32-bit arithmetic.
pub fn lcg(seed: u32) -> u32 {
    seed.wrapping_mul(LCG_MULTIPLIER) % LCG_MODULUS
}

/// 32-bit FNV-1 style hash of a cube coordinate.
pub fn hash_cell(cell: IVec3) -> u32 {
    let mut h = FNV_OFFSET_BASIS;
    for component in [cell.x, cell.y, cell.z] {
        h = (h ^ component as u32).wrapping_mul(FNV_PRIME);
    }
    h
}

/// Number of feature points for a cube seed.
pub fn feature_count(seed: u32) -> usize {
    POISSON_THRESHOLDS
        .iter()
        .position(|&bound| seed < bound)
        .map_or(POISSON_THRESHOLDS.len() + 1, |i| i + 1)
}

fn unit(value: u32) -> f32 {
    value as f32 / LCG_MODULUS as f32
}

/// Noise parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, KernelParams)]
#[serde(default)]
pub struct VoronoiParams {
    /// Rank of the feature point that picks the colour, clamped to `[0, 10]`.
    #[param(label = "Range", default = 3.0)]
    pub range: f32,
    #[param(label = "Gain", default = 1.0)]
    pub gain: f32,
    #[param(label = "Gamma", default = 1.0)]
    pub gamma: f32,
    /// Noise-space placement. Pixels are mapped through its inverse.
    #[param(label = "Transform", default = Mat4::IDENTITY)]
    pub transform: Mat4,
}

/// Nearest feature points seen so far, ascending by distance.
#[derive(Debug, Clone, Copy)]
struct Ranking {
    distances: [f32; MAX_RANKED],
    owners: [u32; MAX_RANKED],
}

impl Ranking {
    fn new() -> Self {
        Self {
            distances: [UNRANKED_DISTANCE; MAX_RANKED],
            owners: [0; MAX_RANKED],
        }
    }

    /// Sink `distance` in from the far end. Ties land ahead of earlier
    /// entries.
    fn insert(&mut self, distance: f32, owner: u32) {
        for i in (0..MAX_RANKED).rev() {
            if distance > self.distances[i] {
                break;
            }
            let displaced = (self.distances[i], self.owners[i]);
            self.distances[i] = distance;
            self.owners[i] = owner;
            if i + 1 < MAX_RANKED {
                self.distances[i + 1] = displaced.0;
                self.owners[i + 1] = displaced.1;
            }
        }
    }
}

/// Evaluation frame for cellular noise.
#[derive(Debug, Clone)]
pub struct Voronoi {
    rank: usize,
    gain: f32,
    gamma: f32,
    inverse: Mat4,
    depth: f32,
}

impl Voronoi {
    /// Invert the placement transform.
    ///
    /// # Errors
    ///
    /// [`KernelError::SingularMatrix`](crate::KernelError::SingularMatrix) if
    /// `transform` has no inverse.
    pub fn new(params: &VoronoiParams) -> Result<Self> {
        let inverse = checked_inverse(&params.transform, "voronoi transform")?;
        Ok(Self {
            rank: params.range.clamp(0.0, (MAX_RANKED - 2) as f32) as usize,
            gain: params.gain,
            gamma: params.gamma,
            inverse,
            // The image plane sits at the inverse transform's z translation.
            depth: inverse.w_axis.z,
        })
    }

    /// Seed of the cube owning the `rank`-th nearest feature point.
    pub fn cell_seed(&self, point: Vec3) -> u32 {
        let base = point.floor().as_ivec3();
        let mut ranking = Ranking::new();

        for i in -1..=1 {
            for j in -1..=1 {
                for k in -1..=1 {
                    let cell = base.wrapping_add(IVec3::new(i, j, k));
                    let seed = lcg(hash_cell(cell));
                    let origin = cell.as_vec3();
                    for _ in 0..feature_count(seed) {
                        let x = lcg(seed);
                        let y = lcg(x);
                        let z = lcg(y);
                        let feature = origin + Vec3::new(unit(x), unit(y), unit(z));
                        ranking.insert(point.distance(feature), seed);
                    }
                }
            }
        }
        ranking.owners[self.rank]
    }
}

impl PixelKernel for Voronoi {
    fn process(&self, pos: IVec2) -> Vec4 {
        let input = Vec3::new(pos.x as f32, pos.y as f32, self.depth);
        let point = self.inverse.transform_point3(input);

        let seed = self.cell_seed(point);
        let g = lcg(seed);
        let b = lcg(g);
        let colour = Vec3::new(unit(seed), unit(g), unit(b));
        (colour * self.gain).powf(self.gamma).extend(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Extent;
    use crate::kernel::render;

    #[test]
    fn test_lcg_matches_reference_values() {
        assert_eq!(lcg(1), 48271);
        assert_eq!(lcg(48271), 182_605_794);
        // Products wrap at 32 bits before the modulus
        assert_eq!(lcg(u32::MAX), u32::MAX.wrapping_mul(48271) % LCG_MODULUS);
    }

    #[test]
    fn test_hash_cell_is_fnv() {
        let expected = ((((FNV_OFFSET_BASIS ^ 1).wrapping_mul(FNV_PRIME)) ^ 2).wrapping_mul(FNV_PRIME)
            ^ (-3i32) as u32)
            .wrapping_mul(FNV_PRIME);
        assert_eq!(hash_cell(IVec3::new(1, 2, -3)), expected);
    }

    #[test]
    fn test_feature_count_table() {
        assert_eq!(feature_count(0), 1);
        assert_eq!(feature_count(393_325_350), 2);
        assert_eq!(feature_count(2_700_834_070), 4);
        assert_eq!(feature_count(4_203_212_043), 9);
    }

    #[test]
    fn test_ranking_orders_and_puts_ties_first() {
        let mut ranking = Ranking::new();
        ranking.insert(3.0, 1);
        ranking.insert(1.0, 2);
        ranking.insert(3.0, 3);
        assert_eq!(&ranking.distances[..3], &[1.0, 3.0, 3.0]);
        assert_eq!(&ranking.owners[..3], &[2, 3, 1]);
        assert_eq!(ranking.distances[3], UNRANKED_DISTANCE);
    }

    #[test]
    fn test_deterministic_output() {
        let noise = Voronoi::new(&VoronoiParams::default()).unwrap();
        let a = render(&noise, Extent::new(16, 16));
        let b = render(&noise, Extent::new(16, 16));
        assert_eq!(a, b);
        assert!(a.pixels().iter().all(|p| p.w == 1.0));
        assert!(a.pixels().iter().all(|p| p.x >= 0.0 && p.x <= 1.0));
    }

    #[test]
    fn test_scaled_transform_groups_pixels() {
        let noise = Voronoi::new(&VoronoiParams {
            transform: Mat4::from_scale(Vec3::splat(50.0)),
            range: 0.0,
            ..Default::default()
        })
        .unwrap();
        // Neighbouring pixels at 1/50 noise units almost always share a cell
        let image = render(&noise, Extent::new(8, 8));
        let distinct: std::collections::HashSet<u32> =
            image.pixels().iter().map(|p| p.x.to_bits()).collect();
        assert!(distinct.len() <= 4);
    }

    #[test]
    fn test_far_translation_wraps_cell_coordinates() {
        let noise = Voronoi::new(&VoronoiParams {
            transform: Mat4::from_translation(Vec3::new(-3.0e9, 0.0, 0.0)),
            ..Default::default()
        })
        .unwrap();
        let image = render(&noise, Extent::new(2, 2));
        assert!(image.pixels().iter().all(|p| p.w == 1.0 && p.is_finite()));

        // Neighbours of the largest cell wrap like 32-bit integers
        let edge = Vec3::new(i32::MAX as f32, 0.0, 0.0);
        assert_eq!(noise.cell_seed(edge), noise.cell_seed(edge));
    }

    #[test]
    fn test_singular_transform_is_rejected() {
        let params = VoronoiParams {
            transform: Mat4::ZERO,
            ..Default::default()
        };
        assert!(Voronoi::new(&params).is_err());
    }
}
