use glam::Vec3;
use landscape_common::ChunkKey;
use landscape_terrain::TerrainField;

use crate::registry::MeshRegistry;

/// Viewer configuration for a frame.
#[derive(Debug, Clone, Copy)]
pub struct RenderView {
    /// Focus point the terrain streams around.
    pub focus: Vec3,
    /// Chunk footprint in world units.
    pub chunk_size: f32,
}

impl Default for RenderView {
    fn default() -> Self {
        Self {
            focus: Vec3::ZERO,
            chunk_size: 96.0,
        }
    }
}

/// Renderer-agnostic interface. All renderers implement this trait.
///
/// A renderer reads the uploaded mesh set and the terrain field. It never
/// touches the streamer; residency is decided upstream.
pub trait Renderer {
    /// The output type produced by this renderer.
    type Output;

    /// Render one frame of the live mesh set.
    fn render(&self, meshes: &MeshRegistry, field: &TerrainField, view: &RenderView) -> Self::Output;
}

/// Text renderer for the CLI, logs and tests.
///
/// Lists per-LOD mesh counts, then every live chunk with the biome found
/// at its centre.
#[derive(Debug, Default)]
pub struct DebugTextRenderer {
    /// Emit only the summary lines.
    pub summary_only: bool,
}

impl DebugTextRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn summary() -> Self {
        Self { summary_only: true }
    }
}

impl Renderer for DebugTextRenderer {
    type Output = String;

    fn render(&self, meshes: &MeshRegistry, field: &TerrainField, view: &RenderView) -> String {
        let mut out = String::new();
        let focus_chunk = ChunkKey::containing(view.focus, view.chunk_size);
        out.push_str(&format!(
            "=== Terrain (seed={}, focus=({:.1}, {:.1}), chunk={}) ===\n",
            field.seed(),
            view.focus.x,
            view.focus.z,
            focus_chunk
        ));
        out.push_str(&format!(
            "Meshes: {} ({} vertices)\n",
            meshes.len(),
            meshes.total_vertices()
        ));
        for (lod, count) in meshes.lod_histogram().iter().rev() {
            out.push_str(&format!("  lod {lod:>3}: {count}\n"));
        }
        if self.summary_only {
            return out;
        }

        for (key, record) in meshes.iter() {
            let (ox, oz) = key.origin(view.chunk_size);
            let half = view.chunk_size as f64 * 0.5;
            let biome = field.biome_at(ox + half, oz + half);
            let heights = match record.height_range {
                Some((lo, hi)) => format!("h=[{lo:.1}, {hi:.1}]"),
                None => "h=[-]".to_owned(),
            };
            out.push_str(&format!(
                "  [{key:>9}] lod={:<3} {} {heights} {biome}\n",
                record.lod, record.handle
            ));
        }
        out
    }
}
