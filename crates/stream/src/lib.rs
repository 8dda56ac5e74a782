//! Chunk streaming: distance-ring LOD, a budgeted generation queue, eviction.
//!
//! # Invariants
//! - After `sync`, every resident chunk lies within the streaming radius at
//!   the LOD its ring demands.
//! - A key is never resident twice and never queued twice.
//! - A drained queue leaves the resident set equal to the desired set.
//! - Unaffected chunks keep their geometry across moves; nothing is rebuilt
//!   unless its ring LOD changed.

mod budget;
mod builder;
mod config;
mod grid;
mod queue;
mod streamer;
pub mod worker;

pub use budget::{BuildTimer, StreamStats};
pub use builder::{BuildError, ChunkBuilder};
pub use config::{ConfigError, LandscapeConfig, LodPolicy, LodRing, MAX_CHUNK_RADIUS, StreamConfig};
pub use grid::{Ring, chunk_center, desired_chunks};
pub use queue::{Admission, PendingQueue};
pub use streamer::{Chunk, ChunkStreamer, EvictReason, IMMEDIATE_RADIUS, StreamEvent};

/// Errors from constructing a streamer.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to spawn build workers: {0}")]
    Spawn(#[from] std::io::Error),
}

pub fn crate_info() -> &'static str {
    "landscape-stream v0.1.0"
}
