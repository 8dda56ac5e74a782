use std::collections::BTreeMap;

use glam::Vec3;
use landscape_common::ChunkKey;

use crate::config::LodPolicy;

/// Where a chunk sits relative to the focus: its ring and the LOD that ring demands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ring {
    pub distance: u32,
    pub lod: u32,
}

/// Every chunk within Chebyshev `radius` of `center`, with its required LOD.
pub fn desired_chunks(center: ChunkKey, radius: u32, policy: &LodPolicy) -> BTreeMap<ChunkKey, Ring> {
    center
        .square(radius)
        .map(|key| {
            let distance = key.chebyshev(center);
            (
                key,
                Ring {
                    distance,
                    lod: policy.lod_for_distance(distance),
                },
            )
        })
        .collect()
}

/// World-space centre of a chunk at height zero.
pub fn chunk_center(key: ChunkKey, chunk_size: f32) -> Vec3 {
    Vec3::new(
        (key.x as f32 + 0.5) * chunk_size,
        0.0,
        (key.z as f32 + 0.5) * chunk_size,
    )
}
