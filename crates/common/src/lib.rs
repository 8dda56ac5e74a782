//! Shared types: chunk keys and generation requests.
//!
//! # Invariants
//! - A `ChunkKey` identifies exactly one square tile of world space.
//! - Distances between keys are Chebyshev distances, so streaming rings are square.

pub mod types;

pub use types::{ChunkKey, ChunkRequest};
