//! MLPerf-style structured run log, emitted from rank 0.

pub mod keys;

mod event;
mod logger;
mod sink;

pub use event::{EventType, LINE_PREFIX, LogEvent};
pub use logger::{RunLogger, Workload, on_rank_zero};
pub use sink::{EventSink, RecordingSink, TracingSink};
