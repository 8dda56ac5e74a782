use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use glam::Vec3;
use landscape_common::{ChunkKey, ChunkRequest};
use landscape_mesh::{Geometry, MeshBuilder};
use landscape_terrain::TerrainField;

use crate::budget::{BuildTimer, StreamStats};
use crate::builder::{BuildError, ChunkBuilder};
use crate::config::{LandscapeConfig, StreamConfig};
use crate::grid::{Ring, desired_chunks};
use crate::queue::{Admission, PendingQueue};
use crate::worker::{BuildJob, BuildPool, BuildResult};
use crate::StreamError;

/// Chunks this close to the focus are built synchronously during an
/// immediate sync, so the first frame is never empty around the viewer.
pub const IMMEDIATE_RADIUS: u32 = 1;

/// How long `finish_pending` waits on the pool before checking again.
const POOL_WAIT: Duration = Duration::from_millis(250);

/// A resident terrain chunk.
#[derive(Debug, Clone)]
pub struct Chunk {
    key: ChunkKey,
    lod: u32,
    geometry: Geometry,
    build_id: u64,
}

impl Chunk {
    pub fn key(&self) -> ChunkKey {
        self.key
    }

    pub fn lod(&self) -> u32 {
        self.lod
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// Unique per build; unchanged while the same chunk object stays resident.
    pub fn build_id(&self) -> u64 {
        self.build_id
    }
}

/// Why a resident chunk was torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictReason {
    /// The chunk left the streaming radius.
    OutOfRange,
    /// The chunk's ring now demands a different LOD.
    LodChanged,
    /// Every chunk was dropped by a reset or seed change.
    Reset,
}

/// Notifications for the presentation layer, drained once per frame.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A chunk became resident; upload its geometry.
    Loaded { key: ChunkKey, lod: u32, build_id: u64 },
    /// A chunk was torn down; release whatever was uploaded for it.
    Evicted {
        key: ChunkKey,
        lod: u32,
        reason: EvictReason,
    },
    /// A build failed; the tile will be requested again on the next sync.
    BuildFailed {
        key: ChunkKey,
        lod: u32,
        error: BuildError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Discard {
    OutOfRange,
    LodChanged,
    AlreadyResident,
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    ticket: u64,
    lod: u32,
}

/// Keeps the set of resident chunks around a moving focus point.
///
/// `sync` decides what should exist and diffs it against what does;
/// `process_queue` performs a bounded amount of building per frame.
pub struct ChunkStreamer {
    config: StreamConfig,
    field: Arc<TerrainField>,
    builder: Arc<dyn ChunkBuilder>,
    resident: BTreeMap<ChunkKey, Chunk>,
    pending: PendingQueue,
    in_flight: HashMap<ChunkKey, InFlight>,
    pool: Option<BuildPool>,
    focus: Option<Vec3>,
    focus_chunk: Option<ChunkKey>,
    /// Set when a build fails so the next sync re-admits the tile.
    retry_owed: bool,
    next_build_id: u64,
    next_ticket: u64,
    events: Vec<StreamEvent>,
    stats: StreamStats,
    timer: BuildTimer,
}

impl std::fmt::Debug for ChunkStreamer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkStreamer")
            .field("seed", &self.field.seed())
            .field("focus_chunk", &self.focus_chunk)
            .field("resident", &self.resident.len())
            .field("pending", &self.pending.len())
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}

impl ChunkStreamer {
    /// Streamer building meshes with [`MeshBuilder`].
    pub fn new(seed: &str, config: StreamConfig) -> Result<Self, StreamError> {
        Self::with_builder(seed, config, Arc::new(MeshBuilder::new()))
    }

    pub fn from_config(config: &LandscapeConfig) -> Result<Self, StreamError> {
        Self::new(&config.seed, config.stream.clone())
    }

    /// Streamer using a custom builder, e.g. one that also uploads to a GPU.
    pub fn with_builder(
        seed: &str,
        config: StreamConfig,
        builder: Arc<dyn ChunkBuilder>,
    ) -> Result<Self, StreamError> {
        config.validate()?;
        let pool = match config.workers {
            0 => None,
            n => Some(BuildPool::new(n).map_err(StreamError::Spawn)?),
        };
        tracing::info!(
            seed,
            chunk_size = config.chunk_size,
            radius = config.chunk_radius,
            workers = config.workers,
            "chunk streamer created"
        );
        Ok(Self {
            config,
            field: Arc::new(TerrainField::new(seed)),
            builder,
            resident: BTreeMap::new(),
            pending: PendingQueue::new(),
            in_flight: HashMap::new(),
            pool,
            focus: None,
            focus_chunk: None,
            retry_owed: false,
            next_build_id: 0,
            next_ticket: 0,
            events: Vec::new(),
            stats: StreamStats::default(),
            timer: BuildTimer::default(),
        })
    }

    /// Move building onto `workers` background threads, or back inline with zero.
    pub fn with_workers(mut self, workers: usize) -> Result<Self, StreamError> {
        self.pool = match workers {
            0 => None,
            n => Some(BuildPool::new(n)?),
        };
        // Results of the old pool are gone; re-admit those keys on the next sync.
        if !self.in_flight.is_empty() {
            self.in_flight.clear();
            self.retry_owed = true;
        }
        self.config.workers = workers;
        Ok(self)
    }

    /// Recompute the desired chunk set around `focus`, evict what no longer
    /// belongs and queue what is missing.
    ///
    /// A call whose focus stays in the same chunk is a no-op unless
    /// `immediate` is set or a failed build is owed a retry. With `immediate`,
    /// chunks within [`IMMEDIATE_RADIUS`] are built before returning.
    pub fn sync(&mut self, focus: Vec3, immediate: bool) -> StreamStats {
        let _span = tracing::info_span!("stream_sync", immediate).entered();
        let started = Instant::now();
        let center = ChunkKey::containing(focus, self.config.chunk_size);
        self.focus = Some(focus);

        let mut stats = StreamStats::default();
        if !immediate && !self.retry_owed && self.focus_chunk == Some(center) {
            return self.finish(stats, started);
        }
        self.focus_chunk = Some(center);
        self.retry_owed = false;

        let desired = desired_chunks(center, self.config.chunk_radius, &self.config.lod);

        let stale: Vec<(ChunkKey, EvictReason)> = self
            .resident
            .iter()
            .filter_map(|(key, chunk)| match desired.get(key) {
                None => Some((*key, EvictReason::OutOfRange)),
                Some(ring) if ring.lod != chunk.lod => Some((*key, EvictReason::LodChanged)),
                Some(_) => None,
            })
            .collect();
        for (key, reason) in stale {
            self.evict(key, reason);
            stats.evicted += 1;
        }

        for (&key, ring) in &desired {
            if self.resident.contains_key(&key) {
                continue;
            }
            let request = ChunkRequest::new(key, ring.lod, ring.distance);
            if immediate && ring.distance <= IMMEDIATE_RADIUS {
                if self.build_inline(request) {
                    stats.built += 1;
                } else {
                    stats.failed += 1;
                }
                continue;
            }
            if self
                .in_flight
                .get(&key)
                .is_some_and(|job| job.lod == ring.lod)
            {
                continue;
            }
            match self.pending.upsert(request) {
                Admission::Enqueued => {
                    tracing::debug!(%key, lod = ring.lod, distance = ring.distance, "chunk queued");
                    stats.enqueued += 1;
                }
                Admission::Updated => {
                    tracing::debug!(%key, lod = ring.lod, "queued chunk retargeted");
                }
                Admission::Unchanged => {}
            }
        }

        self.pending.retarget(center);
        self.pending.sort();
        self.check_invariants(&desired);

        tracing::trace!(
            center = %center,
            evicted = stats.evicted,
            enqueued = stats.enqueued,
            built = stats.built,
            "sync complete"
        );
        self.finish(stats, started)
    }

    /// Pop up to `max_per_frame` requests, nearest first, and build (or
    /// dispatch) those still relevant to the current focus.
    ///
    /// With a worker pool, finished results are integrated first.
    pub fn process_queue(&mut self, max_per_frame: usize) -> StreamStats {
        let _span = tracing::info_span!("stream_process_queue", max_per_frame).entered();
        let started = Instant::now();
        let mut stats = StreamStats::default();

        if self.pool.is_some() {
            while let Some(done) = self.pool.as_ref().and_then(BuildPool::try_recv) {
                self.integrate(done, &mut stats);
            }
        }

        for _ in 0..max_per_frame {
            let Some(request) = self.pending.pop_front() else {
                break;
            };
            if let Some(why) = self.stale(&request) {
                tracing::debug!(key = %request.key, lod = request.lod, ?why, "queued chunk discarded");
                stats.discarded += 1;
                continue;
            }
            if self.pool.is_some() {
                self.dispatch(request, &mut stats);
            } else if self.build_inline(request) {
                stats.built += 1;
            } else {
                stats.failed += 1;
            }
        }

        self.finish(stats, started)
    }

    /// One frame: sync to `focus`, then spend the configured budget.
    pub fn update(&mut self, focus: Vec3) -> StreamStats {
        let mut stats = self.sync(focus, false);
        let drained = self.process_queue(self.config.max_per_frame);
        stats.merge(&drained);
        self.stats = stats.clone();
        stats
    }

    /// Drive `process_queue` until nothing is queued or in flight.
    pub fn finish_pending(&mut self) -> StreamStats {
        let mut total = StreamStats::default();
        loop {
            let frame = self.process_queue(self.config.max_per_frame);
            total.merge(&frame);
            if self.is_idle() {
                break;
            }
            if self.pending.is_empty() {
                self.wait_for_workers(&mut total);
            }
        }
        self.stats = total.clone();
        total
    }

    /// Tear everything down and rebuild around the last focus as if starting fresh.
    pub fn reset_chunks(&mut self) -> StreamStats {
        let _span = tracing::info_span!("stream_reset").entered();
        let started = Instant::now();
        let mut stats = StreamStats::default();

        let keys: Vec<ChunkKey> = self.resident.keys().copied().collect();
        for key in keys {
            self.evict(key, EvictReason::Reset);
            stats.evicted += 1;
        }
        self.pending.clear();
        self.in_flight.clear();
        if let Some(pool) = &self.pool {
            let epoch = pool.advance_epoch();
            tracing::debug!(epoch, "build pool epoch advanced");
        }
        self.focus_chunk = None;
        self.retry_owed = false;

        match self.focus {
            Some(focus) => {
                let synced = self.sync(focus, true);
                stats.merge(&synced);
                stats.elapsed = started.elapsed();
                self.stats = stats.clone();
                stats
            }
            None => self.finish(stats, started),
        }
    }

    /// Replace the terrain field and reset. Returns false if the seed is unchanged.
    pub fn set_seed(&mut self, seed: &str) -> bool {
        if self.field.seed() == seed {
            return false;
        }
        tracing::info!(from = self.field.seed(), to = seed, "seed changed");
        self.field = Arc::new(TerrainField::new(seed));
        self.reset_chunks();
        true
    }

    /// Take every event recorded since the last drain.
    pub fn drain_events(&mut self) -> Vec<StreamEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn events(&self) -> &[StreamEvent] {
        &self.events
    }

    pub fn chunk(&self, key: ChunkKey) -> Option<&Chunk> {
        self.resident.get(&key)
    }

    /// Resident chunks in key order.
    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.resident.values()
    }

    pub fn resident_count(&self) -> usize {
        self.resident.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_pending(&self, key: ChunkKey) -> bool {
        self.pending.contains(key)
    }

    /// Queued requests, nearest first.
    pub fn pending_requests(&self) -> impl Iterator<Item = &ChunkRequest> {
        self.pending.iter()
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.in_flight.is_empty()
    }

    pub fn focus_chunk(&self) -> Option<ChunkKey> {
        self.focus_chunk
    }

    /// The chunks that should be resident for the current focus.
    pub fn desired(&self) -> BTreeMap<ChunkKey, Ring> {
        match self.focus_chunk {
            Some(center) => desired_chunks(center, self.config.chunk_radius, &self.config.lod),
            None => BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn field(&self) -> &Arc<TerrainField> {
        &self.field
    }

    pub fn seed(&self) -> &str {
        self.field.seed()
    }

    /// Stats of the last operation.
    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }

    pub fn build_timer(&self) -> &BuildTimer {
        &self.timer
    }

    fn build_inline(&mut self, request: ChunkRequest) -> bool {
        let started = Instant::now();
        match self
            .builder
            .build(&request, &self.field, self.config.chunk_size)
        {
            Ok(geometry) => {
                self.timer.record(started.elapsed());
                self.admit(request, geometry);
                true
            }
            Err(error) => {
                self.build_failed(request, error);
                false
            }
        }
    }

    fn dispatch(&mut self, request: ChunkRequest, stats: &mut StreamStats) {
        let Some(pool) = &self.pool else {
            return;
        };
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        let job = BuildJob {
            ticket,
            epoch: pool.epoch(),
            request,
            chunk_size: self.config.chunk_size,
            field: Arc::clone(&self.field),
            builder: Arc::clone(&self.builder),
        };
        match pool.submit(job) {
            Ok(()) => {
                self.in_flight.insert(
                    request.key,
                    InFlight {
                        ticket,
                        lod: request.lod,
                    },
                );
                stats.dispatched += 1;
            }
            Err(_) => {
                self.build_failed(request, BuildError::WorkerLost);
                stats.failed += 1;
            }
        }
    }

    fn integrate(&mut self, done: BuildResult, stats: &mut StreamStats) {
        let key = done.request.key;
        match self.in_flight.get(&key) {
            Some(job) if job.ticket == done.ticket => {
                self.in_flight.remove(&key);
            }
            _ => {
                tracing::debug!(%key, ticket = done.ticket, "superseded build result dropped");
                stats.discarded += 1;
                return;
            }
        }
        match done.result {
            Err(error) => {
                self.build_failed(done.request, error);
                stats.failed += 1;
            }
            Ok(geometry) => {
                if let Some(why) = self.stale(&done.request) {
                    tracing::debug!(%key, lod = done.request.lod, ?why, "finished chunk discarded");
                    stats.discarded += 1;
                } else {
                    self.timer.record(done.elapsed);
                    self.admit(done.request, geometry);
                    stats.built += 1;
                }
            }
        }
    }

    fn wait_for_workers(&mut self, stats: &mut StreamStats) {
        let Some(pool) = &self.pool else {
            return;
        };
        match pool.wait(POOL_WAIT) {
            Ok(Some(done)) => self.integrate(done, stats),
            Ok(None) => {}
            Err(_) => {
                tracing::error!(in_flight = self.in_flight.len(), "build pool disconnected");
                let lost: Vec<(ChunkKey, InFlight)> = self.in_flight.drain().collect();
                for (key, job) in lost {
                    let request = ChunkRequest::new(key, job.lod, 0);
                    self.build_failed(request, BuildError::WorkerLost);
                    stats.failed += 1;
                }
            }
        }
    }

    /// Why a request no longer matches the current focus, if it doesn't.
    fn stale(&self, request: &ChunkRequest) -> Option<Discard> {
        let Some(center) = self.focus_chunk else {
            return Some(Discard::OutOfRange);
        };
        let distance = request.key.chebyshev(center);
        if distance > self.config.chunk_radius {
            Some(Discard::OutOfRange)
        } else if self.config.lod.lod_for_distance(distance) != request.lod {
            Some(Discard::LodChanged)
        } else if self.resident.contains_key(&request.key) {
            Some(Discard::AlreadyResident)
        } else {
            None
        }
    }

    fn admit(&mut self, request: ChunkRequest, geometry: Geometry) {
        let build_id = self.next_build_id;
        self.next_build_id += 1;
        let key = request.key;
        let previous = self.resident.insert(
            key,
            Chunk {
                key,
                lod: request.lod,
                geometry,
                build_id,
            },
        );
        debug_assert!(previous.is_none(), "chunk {key} was already resident");
        tracing::debug!(%key, lod = request.lod, build_id, "chunk loaded");
        self.events.push(StreamEvent::Loaded {
            key,
            lod: request.lod,
            build_id,
        });
    }

    fn evict(&mut self, key: ChunkKey, reason: EvictReason) {
        if let Some(chunk) = self.resident.remove(&key) {
            tracing::debug!(%key, lod = chunk.lod, ?reason, "chunk evicted");
            self.events.push(StreamEvent::Evicted {
                key,
                lod: chunk.lod,
                reason,
            });
        }
    }

    fn build_failed(&mut self, request: ChunkRequest, error: BuildError) {
        tracing::warn!(key = %request.key, lod = request.lod, %error, "chunk build failed");
        self.retry_owed = true;
        self.events.push(StreamEvent::BuildFailed {
            key: request.key,
            lod: request.lod,
            error,
        });
    }

    fn check_invariants(&self, desired: &BTreeMap<ChunkKey, Ring>) {
        if cfg!(debug_assertions) {
            for (key, chunk) in &self.resident {
                let ring = desired.get(key);
                debug_assert!(
                    ring.is_some_and(|r| r.lod == chunk.lod),
                    "resident chunk {key} has lod {} but ring wants {:?}",
                    chunk.lod,
                    ring.map(|r| r.lod)
                );
            }
        }
    }

    fn finish(&mut self, mut stats: StreamStats, started: Instant) -> StreamStats {
        stats.resident = self.resident.len();
        stats.pending = self.pending.len();
        stats.in_flight = self.in_flight.len();
        stats.elapsed = started.elapsed();
        self.stats = stats.clone();
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::{Condvar, Mutex};

    const SIZE: f32 = 96.0;

    fn demo() -> ChunkStreamer {
        ChunkStreamer::new("demo", StreamConfig::default()).unwrap()
    }

    /// Small LODs keep the tests fast without changing any scheduling logic.
    fn light_config() -> StreamConfig {
        let mut config = StreamConfig::default();
        config.lod.rings[0].lod = 6;
        config.lod.rings[1].lod = 4;
        config.lod.far_lod = 2;
        config
    }

    fn at_chunk(x: i32, z: i32) -> Vec3 {
        Vec3::new((x as f32 + 0.5) * SIZE, 0.0, (z as f32 + 0.5) * SIZE)
    }

    fn resident_lods(s: &ChunkStreamer) -> BTreeMap<ChunkKey, u32> {
        s.chunks().map(|c| (c.key(), c.lod())).collect()
    }

    fn desired_lods(s: &ChunkStreamer) -> BTreeMap<ChunkKey, u32> {
        s.desired().into_iter().map(|(k, r)| (k, r.lod)).collect()
    }

    /// Fails every build of the listed keys while `armed` is set.
    struct Flaky {
        keys: Vec<ChunkKey>,
        armed: Mutex<bool>,
    }

    impl Flaky {
        fn new(keys: Vec<ChunkKey>) -> Self {
            Self {
                keys,
                armed: Mutex::new(true),
            }
        }

        fn disarm(&self) {
            *self.armed.lock().unwrap() = false;
        }
    }

    impl ChunkBuilder for Flaky {
        fn build(
            &self,
            request: &ChunkRequest,
            field: &TerrainField,
            chunk_size: f32,
        ) -> Result<Geometry, BuildError> {
            if *self.armed.lock().unwrap() && self.keys.contains(&request.key) {
                return Err(BuildError::Resource("out of buffer memory".into()));
            }
            Ok(MeshBuilder::new().build(request, field, chunk_size)?)
        }
    }

    /// Holds every build until `open` is called.
    struct Gate {
        open: Mutex<bool>,
        changed: Condvar,
    }

    impl Gate {
        fn new() -> Self {
            Self {
                open: Mutex::new(false),
                changed: Condvar::new(),
            }
        }

        fn open(&self) {
            *self.open.lock().unwrap() = true;
            self.changed.notify_all();
        }
    }

    impl ChunkBuilder for Gate {
        fn build(
            &self,
            request: &ChunkRequest,
            field: &TerrainField,
            chunk_size: f32,
        ) -> Result<Geometry, BuildError> {
            let mut open = self.open.lock().unwrap();
            while !*open {
                open = self.changed.wait(open).unwrap();
            }
            drop(open);
            Ok(MeshBuilder::new().build(request, field, chunk_size)?)
        }
    }

    struct Slow(Duration);

    impl ChunkBuilder for Slow {
        fn build(
            &self,
            request: &ChunkRequest,
            field: &TerrainField,
            chunk_size: f32,
        ) -> Result<Geometry, BuildError> {
            std::thread::sleep(self.0);
            Ok(MeshBuilder::new().build(request, field, chunk_size)?)
        }
    }

    #[test]
    fn demo_scenario_immediate_then_drained() {
        let mut s = demo();
        let stats = s.sync(Vec3::ZERO, true);

        assert_eq!(stats.built, 9);
        assert_eq!(s.resident_count(), 9);
        for chunk in s.chunks() {
            assert!(chunk.key().chebyshev(ChunkKey::new(0, 0)) <= 1);
            assert_eq!(chunk.lod(), 52);
        }
        assert_eq!(s.pending_count(), 40);

        s.finish_pending();
        assert_eq!(s.resident_count(), 49);
        for chunk in s.chunks() {
            let expected = match chunk.key().chebyshev(ChunkKey::new(0, 0)) {
                0 | 1 => 52,
                2 => 30,
                3 => 18,
                d => panic!("chunk at distance {d} is resident"),
            };
            assert_eq!(chunk.lod(), expected, "chunk {}", chunk.key());
            let side = chunk.lod() as usize + 1;
            assert_eq!(chunk.geometry().vertex_count(), side * side);
        }
    }

    #[test]
    fn drained_resident_set_equals_desired_set() {
        let mut s = ChunkStreamer::new("converge", light_config()).unwrap();
        s.sync(Vec3::new(-1000.0, 0.0, 2500.0), true);
        s.finish_pending();
        assert_eq!(resident_lods(&s), desired_lods(&s));
        assert_eq!(s.resident_count(), 49);
        assert!(s.is_idle());
    }

    #[test]
    fn same_chunk_sync_is_coalesced() {
        let mut s = ChunkStreamer::new("demo", light_config()).unwrap();
        s.sync(at_chunk(0, 0), true);
        s.finish_pending();
        s.drain_events();

        let stats = s.sync(at_chunk(0, 0) + Vec3::new(20.0, 0.0, -20.0), false);
        assert_eq!(stats.evicted, 0);
        assert_eq!(stats.enqueued, 0);
        assert_eq!(stats.built, 0);
        assert!(s.drain_events().is_empty());
    }

    #[test]
    fn queue_is_sorted_nearest_first() {
        let mut s = ChunkStreamer::new("demo", light_config()).unwrap();
        s.sync(at_chunk(4, 4), false);
        assert_eq!(s.resident_count(), 0);
        assert_eq!(s.pending_count(), 49);
        let distances: Vec<u32> = s.pending_requests().map(|r| r.distance).collect();
        let mut sorted = distances.clone();
        sorted.sort_unstable();
        assert_eq!(distances, sorted);

        s.process_queue(1);
        assert_eq!(s.resident_count(), 1);
        assert!(s.chunk(ChunkKey::new(4, 4)).is_some());
    }

    #[test]
    fn process_queue_respects_budget() {
        let mut s = ChunkStreamer::new("demo", light_config()).unwrap();
        s.sync(at_chunk(0, 0), true);
        let before = s.pending_count();

        let stats = s.process_queue(3);
        assert_eq!(stats.built, 3);
        assert_eq!(s.pending_count(), before - 3);
        assert_eq!(s.resident_count(), 12);
    }

    #[test]
    fn moving_one_chunk_keeps_unaffected_tiles() {
        let mut s = demo();
        s.sync(at_chunk(0, 0), true);
        s.finish_pending();
        let before: BTreeMap<ChunkKey, (u32, u64)> = s
            .chunks()
            .map(|c| (c.key(), (c.lod(), c.build_id())))
            .collect();
        s.drain_events();

        let stats = s.sync(at_chunk(0, 0) + Vec3::new(SIZE, 0.0, 0.0), false);
        let events = s.drain_events();

        let out_of_range: HashSet<ChunkKey> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Evicted {
                    key,
                    reason: EvictReason::OutOfRange,
                    ..
                } => Some(*key),
                _ => None,
            })
            .collect();
        let trailing: HashSet<ChunkKey> = (-3..=3).map(|z| ChunkKey::new(-3, z)).collect();
        assert_eq!(out_of_range, trailing);

        let queued: HashSet<ChunkKey> = s.pending_requests().map(|r| r.key).collect();
        for z in -3..=3 {
            assert!(queued.contains(&ChunkKey::new(4, z)), "leading column z={z} not queued");
        }

        let desired = s.desired();
        let mut kept = 0;
        for (key, (lod, build_id)) in &before {
            match desired.get(key) {
                Some(ring) if ring.lod == *lod => {
                    let chunk = s.chunk(*key).expect("unaffected chunk stays resident");
                    assert_eq!(chunk.build_id(), *build_id, "chunk {key} was rebuilt");
                    kept += 1;
                }
                _ => assert!(s.chunk(*key).is_none(), "chunk {key} should be evicted"),
            }
        }
        assert!(kept > 0);
        assert_eq!(stats.evicted, before.len() - kept);

        s.finish_pending();
        assert_eq!(resident_lods(&s), desired_lods(&s));
    }

    #[test]
    fn lod_change_is_evicted_eagerly() {
        let mut s = ChunkStreamer::new("demo", light_config()).unwrap();
        s.sync(at_chunk(0, 0), true);
        s.finish_pending();
        s.drain_events();

        s.sync(at_chunk(1, 0), false);
        // (-1, 0) moved from ring 1 to ring 2.
        assert!(s.chunk(ChunkKey::new(-1, 0)).is_none());
        assert!(s.drain_events().contains(&StreamEvent::Evicted {
            key: ChunkKey::new(-1, 0),
            lod: 6,
            reason: EvictReason::LodChanged,
        }));
        for chunk in s.chunks() {
            assert_eq!(chunk.lod(), s.desired()[&chunk.key()].lod);
        }
    }

    #[test]
    fn queued_requests_follow_the_focus() {
        let mut s = ChunkStreamer::new("demo", light_config()).unwrap();
        s.sync(at_chunk(0, 0), false);
        s.sync(at_chunk(1, 0), false);
        assert_eq!(s.pending_count(), 49 + 7);

        let keys: Vec<ChunkKey> = s.pending_requests().map(|r| r.key).collect();
        let unique: HashSet<ChunkKey> = keys.iter().copied().collect();
        assert_eq!(keys.len(), unique.len());

        let retargeted = s
            .pending_requests()
            .find(|r| r.key == ChunkKey::new(-1, 0))
            .unwrap();
        assert_eq!((retargeted.distance, retargeted.lod), (2, 4));

        let stats = s.finish_pending();
        assert_eq!(stats.discarded, 7);
        assert_eq!(resident_lods(&s), desired_lods(&s));
    }

    #[test]
    fn stale_requests_are_discarded_after_a_teleport() {
        let mut s = ChunkStreamer::new("demo", light_config()).unwrap();
        s.sync(at_chunk(0, 0), false);
        s.sync(at_chunk(100, 0), false);
        let first = s.pending_requests().next().unwrap();
        assert_eq!(first.key, ChunkKey::new(100, 0));

        let stats = s.finish_pending();
        assert_eq!(stats.discarded, 49);
        assert_eq!(stats.built, 49);
        assert!(s.chunks().all(|c| c.key().chebyshev(ChunkKey::new(100, 0)) <= 3));
    }

    #[test]
    fn no_key_is_pending_twice() {
        let mut s = ChunkStreamer::new("demo", light_config()).unwrap();
        for x in [0, 1, 2, 1, 0, -1] {
            s.sync(at_chunk(x, 0), false);
            s.process_queue(5);
            let keys: Vec<ChunkKey> = s.pending_requests().map(|r| r.key).collect();
            let unique: HashSet<ChunkKey> = keys.iter().copied().collect();
            assert_eq!(keys.len(), unique.len());
            assert!(keys.iter().all(|k| s.is_pending(*k)));
        }
    }

    #[test]
    fn immediate_sync_builds_over_queued_requests() {
        let mut s = ChunkStreamer::new("demo", light_config()).unwrap();
        s.sync(at_chunk(0, 0), false);
        assert!(s.is_pending(ChunkKey::new(0, 0)));

        s.sync(at_chunk(0, 0), true);
        assert!(s.chunk(ChunkKey::new(0, 0)).is_some());
        assert_eq!(s.resident_count(), 9);

        let stats = s.finish_pending();
        assert_eq!(stats.discarded, 9);
        assert_eq!(s.resident_count(), 49);
    }

    #[test]
    fn failed_build_releases_key_and_retries() {
        let flaky = Arc::new(Flaky::new(vec![ChunkKey::new(2, 2)]));
        let mut s = ChunkStreamer::with_builder("demo", light_config(), flaky.clone()).unwrap();
        s.sync(at_chunk(0, 0), true);
        let stats = s.finish_pending();

        assert_eq!(stats.failed, 1);
        assert_eq!(s.resident_count(), 48);
        assert!(!s.is_pending(ChunkKey::new(2, 2)));
        assert!(s.drain_events().iter().any(|e| matches!(
            e,
            StreamEvent::BuildFailed { key, .. } if *key == ChunkKey::new(2, 2)
        )));

        flaky.disarm();
        let stats = s.sync(at_chunk(0, 0), false);
        assert_eq!(stats.enqueued, 1);
        s.finish_pending();
        assert_eq!(resident_lods(&s), desired_lods(&s));
    }

    #[test]
    fn failed_immediate_build_is_requeued_next_sync() {
        let flaky = Arc::new(Flaky::new(vec![ChunkKey::new(0, 0)]));
        let mut s = ChunkStreamer::with_builder("demo", light_config(), flaky.clone()).unwrap();
        let stats = s.sync(at_chunk(0, 0), true);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.built, 8);
        assert!(s.chunk(ChunkKey::new(0, 0)).is_none());
        assert!(!s.is_pending(ChunkKey::new(0, 0)));

        flaky.disarm();
        s.sync(at_chunk(0, 0), false);
        assert_eq!(s.pending_requests().next().unwrap().key, ChunkKey::new(0, 0));
    }

    #[test]
    fn reset_is_idempotent() {
        let mut s = ChunkStreamer::new("demo", light_config()).unwrap();
        s.sync(at_chunk(3, -2), true);
        s.finish_pending();

        s.reset_chunks();
        s.finish_pending();
        let once = resident_lods(&s);

        s.reset_chunks();
        s.finish_pending();
        assert_eq!(resident_lods(&s), once);
        assert_eq!(once, desired_lods(&s));
    }

    #[test]
    fn reset_rebuilds_core_immediately() {
        let mut s = ChunkStreamer::new("demo", light_config()).unwrap();
        s.sync(at_chunk(0, 0), true);
        s.finish_pending();
        s.drain_events();

        let stats = s.reset_chunks();
        assert_eq!(stats.evicted, 49);
        assert_eq!(stats.built, 9);
        assert_eq!(s.resident_count(), 9);
        assert_eq!(s.pending_count(), 40);
        let resets = s
            .drain_events()
            .iter()
            .filter(|e| matches!(e, StreamEvent::Evicted { reason: EvictReason::Reset, .. }))
            .count();
        assert_eq!(resets, 49);
    }

    #[test]
    fn reset_before_first_sync_is_harmless() {
        let mut s = ChunkStreamer::new("demo", light_config()).unwrap();
        let stats = s.reset_chunks();
        assert_eq!(stats.evicted, 0);
        assert_eq!(s.resident_count(), 0);
        assert!(s.is_idle());
    }

    #[test]
    fn seed_change_replaces_terrain() {
        let mut s = ChunkStreamer::new("demo", light_config()).unwrap();
        s.sync(at_chunk(0, 0), true);
        s.finish_pending();
        let old = s.chunk(ChunkKey::new(0, 0)).unwrap().geometry().clone();

        assert!(!s.set_seed("demo"));
        assert!(s.set_seed("other"));
        assert_eq!(s.seed(), "other");
        s.finish_pending();

        let new = s.chunk(ChunkKey::new(0, 0)).unwrap().geometry();
        assert_ne!(&old, new);
        assert_eq!(resident_lods(&s), desired_lods(&s));
    }

    #[test]
    fn events_pair_loads_with_evictions() {
        let mut s = ChunkStreamer::new("demo", light_config()).unwrap();
        s.sync(at_chunk(0, 0), true);
        s.finish_pending();
        s.sync(at_chunk(2, 1), false);
        s.finish_pending();

        let mut live: HashSet<ChunkKey> = HashSet::new();
        for event in s.drain_events() {
            match event {
                StreamEvent::Loaded { key, .. } => assert!(live.insert(key), "double load of {key}"),
                StreamEvent::Evicted { key, .. } => assert!(live.remove(&key), "evicted unknown {key}"),
                StreamEvent::BuildFailed { .. } => panic!("unexpected failure"),
            }
        }
        let resident: HashSet<ChunkKey> = s.chunks().map(|c| c.key()).collect();
        assert_eq!(live, resident);
    }

    #[test]
    fn update_syncs_and_spends_budget() {
        let mut s = ChunkStreamer::new("demo", light_config()).unwrap();
        let stats = s.update(at_chunk(0, 0));
        assert_eq!(stats.enqueued, 49);
        assert_eq!(stats.built, 4);
        assert_eq!(s.stats(), &stats);
    }

    #[test]
    fn focus_at_world_edge_streams_without_wrapping() {
        let mut s = ChunkStreamer::new("demo", light_config()).unwrap();
        let far = Vec3::new(1.0e12, 0.0, 0.0);
        s.sync(far, false);
        let center = s.focus_chunk().unwrap();
        assert_eq!(center.x, i32::MAX);
        assert_eq!(s.pending_count(), 4 * 7);
        assert!(s.pending_requests().all(|r| r.key.chebyshev(center) <= 3));

        s.finish_pending();
        assert_eq!(resident_lods(&s), desired_lods(&s));
        s.sync(-far, true);
        assert!(s.chunks().all(|c| c.key().x < -1000));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = StreamConfig {
            max_per_frame: 0,
            ..StreamConfig::default()
        };
        assert!(matches!(
            ChunkStreamer::new("demo", config),
            Err(StreamError::Config(_))
        ));
    }

    #[test]
    fn independent_streamers_do_not_interact() {
        let mut a = ChunkStreamer::new("demo", light_config()).unwrap();
        let mut b = ChunkStreamer::new("demo", light_config()).unwrap();
        a.sync(at_chunk(0, 0), true);
        b.sync(at_chunk(50, 50), false);
        assert_eq!(a.resident_count(), 9);
        assert_eq!(b.resident_count(), 0);
        assert_eq!(b.pending_count(), 49);
    }

    #[test]
    fn worker_pool_converges_to_desired_set() {
        let config = StreamConfig {
            workers: 2,
            ..light_config()
        };
        let mut s = ChunkStreamer::new("demo", config).unwrap();
        s.sync(at_chunk(0, 0), true);
        assert_eq!(s.resident_count(), 9);

        s.finish_pending();
        assert!(s.is_idle());
        assert_eq!(resident_lods(&s), desired_lods(&s));

        s.sync(at_chunk(1, 1), false);
        s.finish_pending();
        assert_eq!(resident_lods(&s), desired_lods(&s));
    }

    #[test]
    fn worker_pool_matches_inline_geometry() {
        let mut inline = ChunkStreamer::new("demo", light_config()).unwrap();
        let mut pooled = ChunkStreamer::new(
            "demo",
            StreamConfig {
                workers: 3,
                ..light_config()
            },
        )
        .unwrap();
        for s in [&mut inline, &mut pooled] {
            s.sync(at_chunk(-2, 5), false);
            s.finish_pending();
        }
        for chunk in inline.chunks() {
            let other = pooled.chunk(chunk.key()).unwrap();
            assert_eq!(other.geometry(), chunk.geometry());
        }
    }

    #[test]
    fn worker_pool_reset_drops_in_flight_work() {
        let config = StreamConfig {
            workers: 1,
            max_per_frame: 49,
            ..light_config()
        };
        let mut s = ChunkStreamer::new("demo", config).unwrap();
        s.sync(at_chunk(0, 0), false);
        let stats = s.process_queue(49);
        assert_eq!(stats.dispatched + stats.built, 49);

        s.set_seed("other");
        assert_eq!(s.in_flight_count(), 0);
        s.finish_pending();
        assert_eq!(resident_lods(&s), desired_lods(&s));
        assert_eq!(s.seed(), "other");
    }

    #[test]
    fn with_workers_switches_build_mode() {
        let s = ChunkStreamer::new("demo", light_config()).unwrap();
        let mut s = s.with_workers(2).unwrap();
        assert_eq!(s.config().workers, 2);
        s.sync(at_chunk(0, 0), false);
        let stats = s.process_queue(4);
        assert_eq!(stats.dispatched, 4);
        assert_eq!(stats.built, 0);

        let mut s = s.with_workers(0).unwrap();
        assert_eq!(s.in_flight_count(), 0);
        s.sync(at_chunk(0, 0), false);
        s.finish_pending();
        assert_eq!(resident_lods(&s), desired_lods(&s));
    }

    #[test]
    fn worker_pool_failures_release_keys() {
        let flaky = Arc::new(Flaky::new(vec![ChunkKey::new(-1, -1)]));
        let config = StreamConfig {
            workers: 2,
            ..light_config()
        };
        let mut s = ChunkStreamer::with_builder("demo", config, flaky.clone()).unwrap();
        s.sync(at_chunk(0, 0), false);
        let stats = s.finish_pending();
        assert_eq!(stats.failed, 1);
        assert!(s.chunk(ChunkKey::new(-1, -1)).is_none());
        assert!(s.is_idle());

        flaky.disarm();
        s.sync(at_chunk(0, 0), false);
        s.finish_pending();
        assert_eq!(resident_lods(&s), desired_lods(&s));
    }

    #[test]
    fn lod_change_while_in_flight_supersedes_the_build() {
        let gate = Arc::new(Gate::new());
        let config = StreamConfig {
            workers: 1,
            ..light_config()
        };
        let mut s = ChunkStreamer::with_builder("demo", config, gate.clone()).unwrap();
        let key = ChunkKey::new(0, 0);

        s.sync(at_chunk(0, 0), false);
        assert_eq!(s.process_queue(1).dispatched, 1);
        assert_eq!(s.in_flight_count(), 1);

        // Same ring LOD: the running build still counts.
        s.sync(at_chunk(1, 0), false);
        assert!(!s.is_pending(key));

        // Ring LOD drops from 6 to 4 while the lod 6 build is still running.
        s.sync(at_chunk(2, 0), false);
        let queued = s.pending_requests().find(|r| r.key == key).unwrap();
        assert_eq!(queued.lod, 4);
        s.process_queue(1000);
        assert_eq!(s.pending_count(), 0);
        s.drain_events();

        gate.open();
        let stats = s.finish_pending();
        assert_eq!(stats.discarded, 1);
        assert_eq!(s.chunk(key).unwrap().lod(), 4);
        let loads: Vec<_> = s
            .drain_events()
            .into_iter()
            .filter(|e| matches!(e, StreamEvent::Loaded { key: k, .. } if *k == key))
            .collect();
        assert_eq!(loads.len(), 1);
        assert!(matches!(loads[0], StreamEvent::Loaded { lod: 4, .. }));
        assert_eq!(resident_lods(&s), desired_lods(&s));
    }

    #[test]
    fn switching_workers_does_not_wait_for_backlog() {
        let config = StreamConfig {
            workers: 1,
            ..light_config()
        };
        let slow = Arc::new(Slow(Duration::from_millis(100)));
        let mut s = ChunkStreamer::with_builder("demo", config, slow).unwrap();
        s.sync(at_chunk(0, 0), false);
        assert_eq!(s.process_queue(30).dispatched, 30);

        let started = Instant::now();
        let mut s = s.with_workers(0).unwrap();
        assert!(started.elapsed() < Duration::from_secs(1), "took {:?}", started.elapsed());

        s.sync(at_chunk(0, 0), false);
        assert_eq!(s.pending_count(), 49);
    }
}
