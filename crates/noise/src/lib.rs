//! Deterministic seeded gradient noise.
//!
//! # Invariants
//! - The same seed string always produces the same permutation table.
//! - `noise2d` and `fractal2d` stay within [-1, 1] for every input.

mod hash;
mod simplex;

pub use hash::fnv1a_64;
pub use simplex::NoiseField;
