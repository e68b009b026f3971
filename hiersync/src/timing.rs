use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Accumulates time spent in gradient reductions.
///
/// A reduction calls [`start`](Self::start) when it is issued and
/// [`finish`](Self::finish) from its final continuation. Concurrent
/// reductions add their spans independently, so overlapping reductions are
/// each counted in full.
#[derive(Debug, Default)]
pub struct CommTimer {
    total_ns: AtomicU64,
    completed: AtomicU64,
}

/// Issue timestamp of one timed reduction.
#[derive(Debug, Clone, Copy)]
#[must_use = "pass the start to CommTimer::finish to record the span"]
pub struct TimerStart(Instant);

impl CommTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self) -> TimerStart {
        TimerStart(Instant::now())
    }

    /// Record the span since `start` and count one completed reduction.
    /// Returns the recorded span.
    pub fn finish(&self, start: TimerStart) -> Duration {
        let elapsed = start.0.elapsed();
        let ns = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.total_ns.fetch_add(ns, Ordering::Relaxed);
        self.completed.fetch_add(1, Ordering::Relaxed);
        elapsed
    }

    pub fn cumulative(&self) -> Duration {
        Duration::from_nanos(self.total_ns.load(Ordering::Relaxed))
    }

    pub fn cumulative_comm_time_seconds(&self) -> f64 {
        self.cumulative().as_secs_f64()
    }

    /// Number of reductions recorded so far.
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }
}
