use bytemuck::{Pod, Zeroable};

/// Interleaved vertex: position.xyz, normal.xyz, humidity, temperature.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct TerrainVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub humidity: f32,
    pub temperature: f32,
}

/// Number of `f32`s per interleaved vertex.
pub const FLOATS_PER_VERTEX: usize = 8;

const _: () = assert!(std::mem::size_of::<TerrainVertex>() == FLOATS_PER_VERTEX * 4);

/// CPU-side vertex and index buffers for one chunk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Geometry {
    pub vertices: Vec<TerrainVertex>,
    pub indices: Vec<u32>,
}

impl Geometry {
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Lowest and highest vertex height, or `None` for empty geometry.
    pub fn height_range(&self) -> Option<(f32, f32)> {
        let mut heights = self.vertices.iter().map(|v| v.position[1]);
        let first = heights.next()?;
        Some(heights.fold((first, first), |(lo, hi), h| (lo.min(h), hi.max(h))))
    }

    /// Vertex buffer as raw bytes, ready for upload.
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    /// Index buffer as raw bytes, ready for upload.
    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }

    /// Vertex buffer as a flat float array.
    pub fn interleaved(&self) -> &[f32] {
        bytemuck::cast_slice(&self.vertices)
    }
}
