//! Terrain field: pure samplers of height, humidity and temperature.
//!
//! # Invariants
//! - Identical (seed, x, z) always yields bit-identical samples.
//! - Each aspect draws from its own noise field seeded `"<seed>:<role>"`.
//! - Humidity and temperature lie in [0, 1].

mod biome;
mod field;

pub use biome::{BEACH_HEIGHT, Biome, SEA_LEVEL};
pub use field::{TerrainField, TerrainSample};
