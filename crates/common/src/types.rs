use std::fmt;

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Integer coordinate of a terrain chunk on the XZ plane.
///
/// Ordered by `(x, z)` so maps keyed by it iterate deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkKey {
    pub x: i32,
    pub z: i32,
}

impl ChunkKey {
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// The chunk containing a world position. The Y component is ignored.
    pub fn containing(position: Vec3, chunk_size: f32) -> Self {
        Self {
            x: (position.x / chunk_size).floor() as i32,
            z: (position.z / chunk_size).floor() as i32,
        }
    }

    /// Chebyshev distance in chunk units: `max(|dx|, |dz|)`.
    pub fn chebyshev(self, other: ChunkKey) -> u32 {
        let dx = self.x.abs_diff(other.x);
        let dz = self.z.abs_diff(other.z);
        dx.max(dz)
    }

    /// Both coordinates packed into one integer, x in the high half.
    pub fn packed(self) -> u64 {
        ((self.x as u32 as u64) << 32) | self.z as u32 as u64
    }

    /// Inverse of [`ChunkKey::packed`].
    pub fn from_packed(packed: u64) -> Self {
        Self {
            x: (packed >> 32) as u32 as i32,
            z: packed as u32 as i32,
        }
    }

    /// World-space position of the chunk's minimum corner.
    pub fn origin(self, chunk_size: f32) -> (f64, f64) {
        (
            self.x as f64 * chunk_size as f64,
            self.z as f64 * chunk_size as f64,
        )
    }

    /// Every key within a square radius of `self`, row by row.
    ///
    /// Keys that would fall outside the `i32` grid are skipped, so a block
    /// centred on the world edge is truncated rather than wrapped.
    pub fn square(self, radius: u32) -> impl Iterator<Item = ChunkKey> {
        let r = i64::from(radius);
        let axis = move |c: i32| {
            let lo = (i64::from(c) - r).max(i64::from(i32::MIN)) as i32;
            let hi = (i64::from(c) + r).min(i64::from(i32::MAX)) as i32;
            lo..=hi
        };
        let xs = axis(self.x);
        axis(self.z).flat_map(move |z| xs.clone().map(move |x| ChunkKey::new(x, z)))
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.x, self.z)
    }
}

/// An intent to (re)generate one chunk at a specific level of detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRequest {
    pub key: ChunkKey,
    /// Grid subdivisions per axis.
    pub lod: u32,
    /// Chebyshev distance from the focus chunk when the request was last refreshed.
    pub distance: u32,
}

impl ChunkRequest {
    pub fn new(key: ChunkKey, lod: u32, distance: u32) -> Self {
        Self { key, lod, distance }
    }
}
