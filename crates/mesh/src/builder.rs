use glam::DVec3;
use landscape_common::ChunkRequest;
use landscape_terrain::TerrainField;

use crate::geometry::{Geometry, TerrainVertex};

/// Offset, in world units, of the central differences used for normals.
pub const NORMAL_EPSILON: f64 = 0.5;

/// Errors from mesh building.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MeshError {
    #[error("lod must be at least 1 subdivision")]
    ZeroLod,
    #[error("chunk size must be positive and finite, got {0}")]
    InvalidChunkSize(f32),
    #[error("lod {0} exceeds the u32 index range")]
    TooManyVertices(u32),
}

/// Builds chunk geometry by sampling the terrain field on a regular grid.
#[derive(Debug, Clone, Copy)]
pub struct MeshBuilder {
    normal_epsilon: f64,
}

impl Default for MeshBuilder {
    fn default() -> Self {
        Self {
            normal_epsilon: NORMAL_EPSILON,
        }
    }
}

impl MeshBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different finite-difference offset for normals.
    pub fn with_normal_epsilon(normal_epsilon: f64) -> Self {
        Self { normal_epsilon }
    }

    /// Build a `(lod+1) x (lod+1)` vertex grid over the request's footprint.
    pub fn build(
        &self,
        request: &ChunkRequest,
        field: &TerrainField,
        chunk_size: f32,
    ) -> Result<Geometry, MeshError> {
        let lod = request.lod;
        if lod == 0 {
            return Err(MeshError::ZeroLod);
        }
        if !(chunk_size.is_finite() && chunk_size > 0.0) {
            return Err(MeshError::InvalidChunkSize(chunk_size));
        }
        let side = lod as u64 + 1;
        if side * side > u32::MAX as u64 {
            return Err(MeshError::TooManyVertices(lod));
        }
        let side = side as usize;

        let (ox, oz) = request.key.origin(chunk_size);
        let size = chunk_size as f64;
        let mut vertices = Vec::with_capacity(side * side);
        for j in 0..side {
            // size * j / lod lands exactly on the shared edge at j == lod.
            let z = oz + size * j as f64 / lod as f64;
            for i in 0..side {
                let x = ox + size * i as f64 / lod as f64;
                let sample = field.sample(x, z);
                let normal = self.normal_at(field, x, z);
                vertices.push(TerrainVertex {
                    position: [x as f32, sample.height as f32, z as f32],
                    normal: normal.as_vec3().to_array(),
                    humidity: sample.humidity as f32,
                    temperature: sample.temperature as f32,
                });
            }
        }

        let indices = grid_indices(lod);
        tracing::trace!(
            key = %request.key,
            lod,
            vertices = vertices.len(),
            indices = indices.len(),
            "chunk mesh built"
        );
        Ok(Geometry { vertices, indices })
    }

    fn normal_at(&self, field: &TerrainField, x: f64, z: f64) -> DVec3 {
        let e = self.normal_epsilon;
        let h_left = field.sample_height(x - e, z);
        let h_right = field.sample_height(x + e, z);
        let h_down = field.sample_height(x, z - e);
        let h_up = field.sample_height(x, z + e);
        DVec3::new(h_left - h_right, 2.0 * e, h_down - h_up).normalize()
    }
}

/// Two triangles per grid cell, counter-clockwise seen from +Y.
fn grid_indices(lod: u32) -> Vec<u32> {
    let side = lod + 1;
    let mut indices = Vec::with_capacity(lod as usize * lod as usize * 6);
    for j in 0..lod {
        for i in 0..lod {
            let a = j * side + i;
            let b = a + 1;
            let c = a + side;
            let d = c + 1;
            indices.extend_from_slice(&[a, c, b, b, c, d]);
        }
    }
    indices
}
