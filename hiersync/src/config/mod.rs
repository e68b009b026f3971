//! Run configuration (YAML document) and runtime tuning (environment).

mod run;
mod sync;

pub use run::{DataConfig, LrScheduleConfig, OptimizerConfig, RunConfig, TrainingConfig};
pub use sync::SyncConfig;
