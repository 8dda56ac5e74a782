use std::collections::{HashMap, VecDeque};

use landscape_common::{ChunkKey, ChunkRequest};

/// What [`PendingQueue::upsert`] did with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The key was not queued; the request was appended.
    Enqueued,
    /// The key was queued for another LOD; that request was rewritten in place.
    Updated,
    /// The key was already queued for this LOD.
    Unchanged,
}

/// Generation requests awaiting a build, nearest first.
///
/// Holds at most one request per key. The key index maps each queued key to
/// the LOD it is queued for.
#[derive(Debug, Default)]
pub struct PendingQueue {
    requests: VecDeque<ChunkRequest>,
    keys: HashMap<ChunkKey, u32>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `request`, or retarget the existing request for its key.
    pub fn upsert(&mut self, request: ChunkRequest) -> Admission {
        match self.keys.get_mut(&request.key) {
            Some(lod) if *lod == request.lod => Admission::Unchanged,
            Some(lod) => {
                *lod = request.lod;
                if let Some(queued) = self.requests.iter_mut().find(|r| r.key == request.key) {
                    *queued = request;
                }
                Admission::Updated
            }
            None => {
                self.keys.insert(request.key, request.lod);
                self.requests.push_back(request);
                Admission::Enqueued
            }
        }
    }

    /// Recompute every queued distance against a new focus chunk.
    pub fn retarget(&mut self, center: ChunkKey) {
        for request in &mut self.requests {
            request.distance = request.key.chebyshev(center);
        }
    }

    /// Stable sort ascending by distance; equal distances keep enqueue order.
    pub fn sort(&mut self) {
        self.requests
            .make_contiguous()
            .sort_by_key(|request| request.distance);
    }

    /// Remove the nearest request, releasing its key.
    pub fn pop_front(&mut self) -> Option<ChunkRequest> {
        let request = self.requests.pop_front()?;
        self.keys.remove(&request.key);
        Some(request)
    }

    pub fn contains(&self, key: ChunkKey) -> bool {
        self.keys.contains_key(&key)
    }

    /// LOD the key is currently queued for.
    pub fn queued_lod(&self, key: ChunkKey) -> Option<u32> {
        self.keys.get(&key).copied()
    }

    pub fn len(&self) -> usize {
        debug_assert_eq!(self.requests.len(), self.keys.len());
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn clear(&mut self) {
        self.requests.clear();
        self.keys.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChunkRequest> {
        self.requests.iter()
    }
}
