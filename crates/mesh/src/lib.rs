//! Mesh building for terrain chunks.
//!
//! Output is plain vertex and index arrays; nothing here touches a graphics
//! API. Uploading is the presentation layer's job.
//!
//! # Invariants
//! - Building is deterministic for a given (request, field, chunk size).
//! - LOD only changes grid resolution, never which noise octaves are sampled.
//! - Triangles wind counter-clockwise seen from +Y.

mod builder;
mod geometry;

pub use builder::{MeshBuilder, MeshError, NORMAL_EPSILON};
pub use geometry::{FLOATS_PER_VERTEX, Geometry, TerrainVertex};
