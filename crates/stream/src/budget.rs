use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

/// Counters from one `sync` / `process_queue` call, plus queue gauges
/// sampled at the end of it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamStats {
    /// Requests added to the pending queue.
    pub enqueued: usize,
    /// Chunks built and made resident.
    pub built: usize,
    /// Requests handed to the worker pool.
    pub dispatched: usize,
    /// Requests or results dropped as stale.
    pub discarded: usize,
    /// Builds that returned an error.
    pub failed: usize,
    /// Resident chunks torn down.
    pub evicted: usize,
    pub resident: usize,
    pub pending: usize,
    pub in_flight: usize,
    pub elapsed: Duration,
}

impl StreamStats {
    /// Add `other`'s counters and elapsed time; take its gauges.
    pub fn merge(&mut self, other: &StreamStats) {
        self.enqueued += other.enqueued;
        self.built += other.built;
        self.dispatched += other.dispatched;
        self.discarded += other.discarded;
        self.failed += other.failed;
        self.evicted += other.evicted;
        self.resident = other.resident;
        self.pending = other.pending;
        self.in_flight = other.in_flight;
        self.elapsed += other.elapsed;
    }
}

impl fmt::Display for StreamStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "built={} dispatched={} enqueued={} discarded={} failed={} evicted={} resident={} pending={} in_flight={} elapsed={:?}",
            self.built,
            self.dispatched,
            self.enqueued,
            self.discarded,
            self.failed,
            self.evicted,
            self.resident,
            self.pending,
            self.in_flight,
            self.elapsed
        )
    }
}

/// Rolling window of per-chunk build durations.
#[derive(Debug, Clone)]
pub struct BuildTimer {
    window: VecDeque<Duration>,
    capacity: usize,
    total_builds: u64,
}

impl BuildTimer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
            total_builds: 0,
        }
    }

    pub fn record(&mut self, dt: Duration) {
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(dt);
        self.total_builds += 1;
    }

    pub fn average(&self) -> Duration {
        if self.window.is_empty() {
            return Duration::ZERO;
        }
        self.window.iter().sum::<Duration>() / self.window.len() as u32
    }

    pub fn max(&self) -> Duration {
        self.window.iter().copied().max().unwrap_or(Duration::ZERO)
    }

    pub fn min(&self) -> Duration {
        self.window.iter().copied().min().unwrap_or(Duration::ZERO)
    }

    /// Samples currently in the window.
    pub fn count(&self) -> usize {
        self.window.len()
    }

    /// Builds recorded since creation, including those aged out of the window.
    pub fn total_builds(&self) -> u64 {
        self.total_builds
    }
}

impl Default for BuildTimer {
    fn default() -> Self {
        Self::new(128)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_sums_counters_and_keeps_latest_gauges() {
        let mut total = StreamStats {
            built: 2,
            resident: 10,
            elapsed: Duration::from_millis(1),
            ..StreamStats::default()
        };
        total.merge(&StreamStats {
            built: 3,
            discarded: 1,
            resident: 12,
            pending: 4,
            elapsed: Duration::from_millis(2),
            ..StreamStats::default()
        });
        assert_eq!(total.built, 5);
        assert_eq!(total.discarded, 1);
        assert_eq!(total.resident, 12);
        assert_eq!(total.pending, 4);
        assert_eq!(total.elapsed, Duration::from_millis(3));
    }

    #[test]
    fn stats_display_lists_counters() {
        let s = StreamStats {
            built: 4,
            ..StreamStats::default()
        }
        .to_string();
        assert!(s.contains("built=4"));
        assert!(s.contains("resident=0"));
    }

    #[test]
    fn timer_tracks_window() {
        let mut timer = BuildTimer::new(3);
        timer.record(Duration::from_millis(10));
        timer.record(Duration::from_millis(20));
        timer.record(Duration::from_millis(30));

        assert_eq!(timer.count(), 3);
        assert_eq!(timer.average(), Duration::from_millis(20));
        assert_eq!(timer.max(), Duration::from_millis(30));
        assert_eq!(timer.min(), Duration::from_millis(10));
    }

    #[test]
    fn timer_drops_oldest_sample() {
        let mut timer = BuildTimer::new(2);
        timer.record(Duration::from_millis(10));
        timer.record(Duration::from_millis(20));
        timer.record(Duration::from_millis(30));

        assert_eq!(timer.count(), 2);
        assert_eq!(timer.total_builds(), 3);
        assert_eq!(timer.average(), Duration::from_millis(25));
    }

    #[test]
    fn empty_timer_reports_zero() {
        let timer = BuildTimer::default();
        assert_eq!(timer.average(), Duration::ZERO);
        assert_eq!(timer.max(), Duration::ZERO);
    }
}
