use landscape_common::ChunkRequest;
use landscape_mesh::{Geometry, MeshBuilder, MeshError};
use landscape_terrain::TerrainField;

/// Why a chunk build did not produce geometry.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BuildError {
    #[error("mesh error: {0}")]
    Mesh(#[from] MeshError),
    #[error("resource error: {0}")]
    Resource(String),
    #[error("build panicked: {0}")]
    Panicked(String),
    #[error("build worker pool is gone")]
    WorkerLost,
}

/// Turns a chunk request into geometry.
///
/// Implementations must be pure with respect to their inputs so that a
/// build can run on any thread.
pub trait ChunkBuilder: Send + Sync {
    fn build(
        &self,
        request: &ChunkRequest,
        field: &TerrainField,
        chunk_size: f32,
    ) -> Result<Geometry, BuildError>;
}

impl ChunkBuilder for MeshBuilder {
    fn build(
        &self,
        request: &ChunkRequest,
        field: &TerrainField,
        chunk_size: f32,
    ) -> Result<Geometry, BuildError> {
        Ok(MeshBuilder::build(self, request, field, chunk_size)?)
    }
}
