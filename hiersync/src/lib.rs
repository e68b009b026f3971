//! Hierarchical gradient synchronization.
//!
//! Averages gradient buffers across a two-tier cluster: ranks reduce to
//! their node leader, leaders all-reduce among themselves, and each leader
//! broadcasts the result back to its node. Every stage is a non-blocking
//! collective chained onto the previous one through [`AsyncHandle`].
//!
//! A [`ProcessContext`] resolves the topology from the launch environment,
//! opens the world group and forms the node and leader groups. A
//! [`RunLogger`] reports run events from rank 0.

pub mod bootstrap;
mod collective;
pub mod config;
pub mod context;
pub mod error;
pub mod group;
pub mod handle;
pub mod launch;
pub mod logging;
pub mod mllog;
pub mod pipeline;
pub mod profiler;
mod reduce;
pub mod timing;
pub mod topology;
pub mod transport;
pub mod types;

pub use bootstrap::{Hierarchy, bootstrap_local, form_hierarchy};
pub use config::{RunConfig, SyncConfig};
pub use context::ProcessContext;
pub use error::{HierSyncError, Result};
pub use group::{Collectives, ProcessGroup};
pub use handle::{AsyncHandle, HandleGroup};
pub use launch::{LaunchEnv, LaunchScheme, resolve_topology};
pub use logging::init_tracing;
pub use mllog::{EventSink, LogEvent, RecordingSink, RunLogger, TracingSink, Workload};
pub use pipeline::{CommHook, FlatAllReduce, HierarchicalAllReduce};
pub use profiler::{Activity, ProfileScope};
pub use timing::CommTimer;
pub use topology::{HierarchyLayout, Topology};
pub use transport::{LocalTransport, MessageKey, PeerTransport, TcpTransport};
pub use types::{Backend, Device, GradientBuffer, Rank, ReduceOp, ReductionStage};
