//! Presentation contract: a mesh registry fed by stream events and a
//! renderer-agnostic interface.
//!
//! # Invariants
//! - Every resident chunk has exactly one live mesh once events are applied.
//! - Renderers read meshes and the terrain field; they never drive streaming.
//!
//! A GPU backend would implement [`Renderer`] over its own buffers. The debug
//! text renderer stands in for it here.

mod registry;
mod renderer;

pub use registry::{ApplyError, ApplyStats, MeshHandle, MeshRecord, MeshRegistry, RenderError};
pub use renderer::{DebugTextRenderer, RenderView, Renderer};

pub fn crate_info() -> &'static str {
    "landscape-render v0.1.0"
}
