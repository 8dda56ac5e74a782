use std::collections::BTreeMap;

use landscape_common::ChunkKey;
use landscape_mesh::Geometry;
use landscape_stream::{ChunkStreamer, StreamEvent};

/// Errors raised when stream events disagree with what has been uploaded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("chunk {key} already has live mesh {handle}")]
    AlreadyUploaded { key: ChunkKey, handle: MeshHandle },
    #[error("chunk {0} has no uploaded mesh")]
    NotUploaded(ChunkKey),
}

/// Events rejected by [`MeshRegistry::apply`]. The rest of the batch was applied.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{} stream event(s) rejected, first: {}", .errors.len(), .errors[0])]
pub struct ApplyError {
    pub stats: ApplyStats,
    pub errors: Vec<RenderError>,
}

/// Opaque handle to an uploaded mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshHandle(pub u64);

impl std::fmt::Display for MeshHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "mesh#{}", self.0)
    }
}

/// What the registry knows about one uploaded chunk mesh.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshRecord {
    pub handle: MeshHandle,
    pub lod: u32,
    pub build_id: u64,
    pub vertex_count: usize,
    pub index_count: usize,
    pub height_range: Option<(f32, f32)>,
}

/// Counts from one [`MeshRegistry::apply`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyStats {
    pub uploaded: usize,
    pub released: usize,
    pub failures: usize,
}

/// Stand-in for GPU-side mesh storage, kept in step with a streamer's events.
#[derive(Debug, Default)]
pub struct MeshRegistry {
    meshes: BTreeMap<ChunkKey, MeshRecord>,
    next_handle: u64,
    total_uploads: u64,
    total_releases: u64,
}

impl MeshRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register geometry for `key`. Fails if `key` already has a live mesh.
    pub fn upload(
        &mut self,
        key: ChunkKey,
        lod: u32,
        build_id: u64,
        geometry: Option<&Geometry>,
    ) -> Result<MeshHandle, RenderError> {
        if let Some(live) = self.meshes.get(&key) {
            return Err(RenderError::AlreadyUploaded {
                key,
                handle: live.handle,
            });
        }
        let handle = MeshHandle(self.next_handle);
        self.next_handle += 1;
        self.total_uploads += 1;
        let record = MeshRecord {
            handle,
            lod,
            build_id,
            vertex_count: geometry.map_or(0, Geometry::vertex_count),
            index_count: geometry.map_or(0, Geometry::index_count),
            height_range: geometry.and_then(Geometry::height_range),
        };
        tracing::trace!(%key, %handle, lod, vertices = record.vertex_count, "mesh uploaded");
        self.meshes.insert(key, record);
        Ok(handle)
    }

    /// Drop the mesh for `key`.
    pub fn release(&mut self, key: ChunkKey) -> Result<MeshRecord, RenderError> {
        let record = self
            .meshes
            .remove(&key)
            .ok_or(RenderError::NotUploaded(key))?;
        self.total_releases += 1;
        tracing::trace!(%key, handle = %record.handle, "mesh released");
        Ok(record)
    }

    /// Apply events in order. Geometry for `Loaded` is read from `streamer`
    /// when the chunk is still resident under the same build.
    ///
    /// A rejected event does not stop the batch; every later event is still
    /// applied and the rejections are returned together.
    pub fn apply(
        &mut self,
        events: &[StreamEvent],
        streamer: &ChunkStreamer,
    ) -> Result<ApplyStats, ApplyError> {
        let mut stats = ApplyStats::default();
        let mut errors = Vec::new();
        for event in events {
            let applied = match event {
                StreamEvent::Loaded { key, lod, build_id } => {
                    let geometry = streamer
                        .chunk(*key)
                        .filter(|chunk| chunk.build_id() == *build_id)
                        .map(|chunk| chunk.geometry());
                    self.upload(*key, *lod, *build_id, geometry)
                        .map(|_| stats.uploaded += 1)
                }
                StreamEvent::Evicted { key, .. } => self.release(*key).map(|_| stats.released += 1),
                StreamEvent::BuildFailed { key, lod, error } => {
                    tracing::debug!(%key, lod, %error, "no mesh for failed build");
                    stats.failures += 1;
                    Ok(())
                }
            };
            if let Err(error) = applied {
                tracing::warn!(%error, "stream event rejected");
                errors.push(error);
            }
        }
        if errors.is_empty() {
            Ok(stats)
        } else {
            Err(ApplyError { stats, errors })
        }
    }

    /// Drain the streamer's events and apply them.
    pub fn sync_with(&mut self, streamer: &mut ChunkStreamer) -> Result<ApplyStats, ApplyError> {
        let events = streamer.drain_events();
        self.apply(&events, streamer)
    }

    pub fn get(&self, key: ChunkKey) -> Option<&MeshRecord> {
        self.meshes.get(&key)
    }

    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }

    /// Live meshes in key order.
    pub fn iter(&self) -> impl Iterator<Item = (ChunkKey, &MeshRecord)> {
        self.meshes.iter().map(|(key, record)| (*key, record))
    }

    pub fn total_vertices(&self) -> usize {
        self.meshes.values().map(|r| r.vertex_count).sum()
    }

    /// Number of live meshes per LOD.
    pub fn lod_histogram(&self) -> BTreeMap<u32, usize> {
        let mut counts = BTreeMap::new();
        for record in self.meshes.values() {
            *counts.entry(record.lod).or_insert(0) += 1;
        }
        counts
    }

    pub fn total_uploads(&self) -> u64 {
        self.total_uploads
    }

    pub fn total_releases(&self) -> u64 {
        self.total_releases
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use landscape_stream::{EvictReason, StreamConfig};

    fn small_streamer() -> ChunkStreamer {
        let mut config = StreamConfig::default();
        config.lod.rings[0].lod = 4;
        config.lod.rings[1].lod = 3;
        config.lod.far_lod = 2;
        ChunkStreamer::new("registry", config).unwrap()
    }

    #[test]
    fn double_upload_is_rejected() {
        let mut registry = MeshRegistry::new();
        let key = ChunkKey::new(1, 1);
        let handle = registry.upload(key, 4, 0, None).unwrap();
        assert_eq!(
            registry.upload(key, 4, 1, None),
            Err(RenderError::AlreadyUploaded { key, handle })
        );
    }

    #[test]
    fn releasing_unknown_key_is_an_error() {
        let mut registry = MeshRegistry::new();
        assert_eq!(
            registry.release(ChunkKey::new(0, 0)),
            Err(RenderError::NotUploaded(ChunkKey::new(0, 0)))
        );
    }

    #[test]
    fn rejected_event_does_not_drop_the_rest_of_the_batch() {
        let streamer = small_streamer();
        let mut registry = MeshRegistry::new();
        let events = [
            StreamEvent::Evicted {
                key: ChunkKey::new(9, 9),
                lod: 4,
                reason: EvictReason::OutOfRange,
            },
            StreamEvent::Loaded {
                key: ChunkKey::new(0, 0),
                lod: 4,
                build_id: 0,
            },
            StreamEvent::Loaded {
                key: ChunkKey::new(1, 0),
                lod: 4,
                build_id: 1,
            },
        ];

        let err = registry.apply(&events, &streamer).unwrap_err();
        assert_eq!(err.errors, vec![RenderError::NotUploaded(ChunkKey::new(9, 9))]);
        assert_eq!(err.stats.uploaded, 2);
        assert_eq!(registry.len(), 2);
        assert!(registry.get(ChunkKey::new(1, 0)).is_some());
    }

    #[test]
    fn handles_are_never_reused() {
        let mut registry = MeshRegistry::new();
        let key = ChunkKey::new(0, 0);
        let a = registry.upload(key, 2, 0, None).unwrap();
        registry.release(key).unwrap();
        let b = registry.upload(key, 2, 1, None).unwrap();
        assert_ne!(a, b);
        assert_eq!(registry.total_uploads(), 2);
        assert_eq!(registry.total_releases(), 1);
    }

    #[test]
    fn tracks_streamer_through_moves() {
        let mut streamer = small_streamer();
        let mut registry = MeshRegistry::new();

        streamer.sync(Vec3::ZERO, true);
        streamer.finish_pending();
        let stats = registry.sync_with(&mut streamer).unwrap();
        assert_eq!(stats.uploaded, 49);
        assert_eq!(registry.len(), streamer.resident_count());

        for step in 1..6 {
            streamer.update(Vec3::new(step as f32 * 150.0, 0.0, 0.0));
            registry.sync_with(&mut streamer).unwrap();
        }
        streamer.finish_pending();
        registry.sync_with(&mut streamer).unwrap();

        assert_eq!(registry.len(), streamer.resident_count());
        for chunk in streamer.chunks() {
            let record = registry.get(chunk.key()).unwrap();
            assert_eq!(record.build_id, chunk.build_id());
            assert_eq!(record.lod, chunk.lod());
            assert_eq!(record.vertex_count, chunk.geometry().vertex_count());
        }
    }

    #[test]
    fn histogram_counts_rings() {
        let mut streamer = small_streamer();
        let mut registry = MeshRegistry::new();
        streamer.sync(Vec3::ZERO, true);
        streamer.finish_pending();
        registry.sync_with(&mut streamer).unwrap();

        let histogram = registry.lod_histogram();
        assert_eq!(histogram.get(&4), Some(&9));
        assert_eq!(histogram.get(&3), Some(&16));
        assert_eq!(histogram.get(&2), Some(&24));
        assert_eq!(registry.total_vertices(), 9 * 25 + 16 * 16 + 24 * 9);
    }

    #[test]
    fn reset_releases_everything_then_reloads() {
        let mut streamer = small_streamer();
        let mut registry = MeshRegistry::new();
        streamer.sync(Vec3::ZERO, true);
        streamer.finish_pending();
        registry.sync_with(&mut streamer).unwrap();

        streamer.set_seed("another");
        let stats = registry.sync_with(&mut streamer).unwrap();
        assert_eq!(stats.released, 49);
        assert_eq!(stats.uploaded, 9);
        assert_eq!(registry.len(), 9);
    }
}
