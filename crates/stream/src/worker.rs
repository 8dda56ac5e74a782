//! Background chunk building on a small thread pool.
//!
//! Workers only compute geometry. All streamer bookkeeping stays on the
//! owning thread, which submits jobs and drains results through channels.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use landscape_common::ChunkRequest;
use landscape_mesh::Geometry;
use landscape_terrain::TerrainField;

use crate::builder::{BuildError, ChunkBuilder};

/// One unit of work for the pool.
pub struct BuildJob {
    /// Identifies this dispatch; the streamer keeps only the latest ticket per key.
    pub ticket: u64,
    /// Pool epoch at submission. Jobs from an older epoch are skipped unbuilt.
    pub epoch: u64,
    pub request: ChunkRequest,
    pub chunk_size: f32,
    pub field: Arc<TerrainField>,
    pub builder: Arc<dyn ChunkBuilder>,
}

/// A finished job.
#[derive(Debug)]
pub struct BuildResult {
    pub ticket: u64,
    pub request: ChunkRequest,
    pub result: Result<Geometry, BuildError>,
    pub elapsed: Duration,
}

/// The result channel closed: every worker has exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("all build workers have exited")]
pub struct PoolDisconnected;

/// Fixed-size pool of build threads.
pub struct BuildPool {
    jobs: Option<Sender<BuildJob>>,
    results: Receiver<BuildResult>,
    epoch: Arc<AtomicU64>,
    workers: Vec<JoinHandle<()>>,
}

impl BuildPool {
    /// Spawn `threads` workers (at least one).
    pub fn new(threads: usize) -> std::io::Result<Self> {
        let (job_tx, job_rx) = unbounded::<BuildJob>();
        let (result_tx, result_rx) = unbounded::<BuildResult>();
        let epoch = Arc::new(AtomicU64::new(0));

        let mut workers = Vec::with_capacity(threads.max(1));
        for i in 0..threads.max(1) {
            let jobs = job_rx.clone();
            let results = result_tx.clone();
            let epoch = Arc::clone(&epoch);
            let handle = std::thread::Builder::new()
                .name(format!("chunk-build-{i}"))
                .spawn(move || worker_loop(jobs, results, epoch))?;
            workers.push(handle);
        }
        tracing::debug!(threads = workers.len(), "build pool started");

        Ok(Self {
            jobs: Some(job_tx),
            results: result_rx,
            epoch,
            workers,
        })
    }

    pub fn thread_count(&self) -> usize {
        self.workers.len()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Invalidate every job submitted so far. Returns the new epoch.
    pub fn advance_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Queue a job. Hands it back if the pool can no longer accept work.
    #[allow(clippy::result_large_err)]
    pub fn submit(&self, job: BuildJob) -> Result<(), BuildJob> {
        match &self.jobs {
            Some(tx) => tx.send(job).map_err(|e| e.into_inner()),
            None => Err(job),
        }
    }

    /// A finished result, if one is ready.
    pub fn try_recv(&self) -> Option<BuildResult> {
        self.results.try_recv().ok()
    }

    /// Block up to `timeout` for a result.
    pub fn wait(&self, timeout: Duration) -> Result<Option<BuildResult>, PoolDisconnected> {
        match self.results.recv_timeout(timeout) {
            Ok(result) => Ok(Some(result)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(PoolDisconnected),
        }
    }
}

impl Drop for BuildPool {
    fn drop(&mut self) {
        // Queued jobs stay deliverable after the sender closes; stale them
        // first so workers drain the backlog without building it.
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.jobs.take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::warn!("build worker exited by panic");
            }
        }
    }
}

fn worker_loop(jobs: Receiver<BuildJob>, results: Sender<BuildResult>, epoch: Arc<AtomicU64>) {
    while let Ok(job) = jobs.recv() {
        if job.epoch < epoch.load(Ordering::Acquire) {
            tracing::trace!(key = %job.request.key, "skipping job from an older epoch");
            continue;
        }
        let started = Instant::now();
        let result = catch_unwind(AssertUnwindSafe(|| {
            job.builder.build(&job.request, &job.field, job.chunk_size)
        }))
        .unwrap_or_else(|payload| Err(BuildError::Panicked(panic_message(payload.as_ref()))));

        let done = BuildResult {
            ticket: job.ticket,
            request: job.request,
            result,
            elapsed: started.elapsed(),
        };
        if results.send(done).is_err() {
            break;
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}
