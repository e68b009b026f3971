use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use super::event::LogEvent;

/// Destination of structured log records.
pub trait EventSink: Send + Sync {
    fn record(&self, event: &LogEvent);
}

/// Writes each record as an `:::MLLOG` line on the `mllog` tracing target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&self, event: &LogEvent) {
        match event.to_line() {
            Ok(line) => tracing::info!(target: "mllog", "{line}"),
            Err(e) => tracing::warn!(key = %event.key, "failed to render log event: {e}"),
        }
    }
}

/// Keeps records in memory together with the instant they were recorded.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(Instant, LogEvent)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(Instant, LogEvent)>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn events(&self) -> Vec<LogEvent> {
        self.lock().iter().map(|(_, e)| e.clone()).collect()
    }

    /// Records with the instant each was received.
    pub fn timed_events(&self) -> Vec<(Instant, LogEvent)> {
        self.lock().clone()
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock().iter().map(|(_, e)| e.key.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl EventSink for RecordingSink {
    fn record(&self, event: &LogEvent) {
        self.lock().push((Instant::now(), event.clone()));
    }
}
