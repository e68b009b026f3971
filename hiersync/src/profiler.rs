use std::future::Future;
use std::time::{Duration, Instant};

use tracing::Instrument;
use tracing::instrument::Instrumented;

/// What a profiled region traces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Cpu,
    Accelerator,
}

impl Activity {
    pub const fn name(self) -> &'static str {
        match self {
            Activity::Cpu => "cpu",
            Activity::Accelerator => "accelerator",
        }
    }
}

struct ActiveScope {
    span: tracing::Span,
    activities: Vec<Activity>,
    started: Instant,
}

/// Guard around a profiled region.
///
/// Obtained from [`ProcessContext::profiler`](crate::ProcessContext::profiler).
/// Inactive guards do nothing. An active guard opens a `profile` span named
/// after the region and reports the elapsed time when dropped.
///
/// The guard does not enter its span, since it may be held across `.await`.
/// Run the region's work through [`in_scope`](Self::in_scope) or
/// [`instrument`](Self::instrument) to attribute its events to the region.
pub struct ProfileScope {
    active: Option<ActiveScope>,
}

impl ProfileScope {
    pub fn disabled() -> Self {
        Self { active: None }
    }

    pub fn start(region: &str, activities: Vec<Activity>) -> Self {
        let names: Vec<&str> = activities.iter().map(|a| a.name()).collect();
        let span = tracing::info_span!("profile", region, activities = ?names);
        span.in_scope(|| tracing::debug!("profiling started"));
        Self {
            active: Some(ActiveScope {
                span,
                activities,
                started: Instant::now(),
            }),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Activities traced by this scope; empty when inactive.
    pub fn activities(&self) -> &[Activity] {
        self.active
            .as_ref()
            .map(|a| a.activities.as_slice())
            .unwrap_or_default()
    }

    /// The span events inside the region should be recorded under.
    /// Disabled scopes return a disabled span.
    pub fn span(&self) -> tracing::Span {
        self.active
            .as_ref()
            .map_or_else(tracing::Span::none, |a| a.span.clone())
    }

    /// Run synchronous work inside the region's span.
    pub fn in_scope<R>(&self, f: impl FnOnce() -> R) -> R {
        self.span().in_scope(f)
    }

    /// Attach the region's span to a future, entering it on every poll.
    pub fn instrument<F: Future>(&self, fut: F) -> Instrumented<F> {
        fut.instrument(self.span())
    }

    pub fn elapsed(&self) -> Option<Duration> {
        self.active.as_ref().map(|a| a.started.elapsed())
    }
}

impl Drop for ProfileScope {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            let elapsed_ms = active.started.elapsed().as_secs_f64() * 1e3;
            active
                .span
                .in_scope(|| tracing::info!(elapsed_ms, "profiling finished"));
        }
    }
}
