use std::path::Path;

use serde::Deserialize;

use crate::error::{HierSyncError, Result};
use crate::types::Device;

/// Training run configuration, loaded once at startup.
///
/// Sections the synchronization layer does not know about (model, dataset
/// paths, ...) are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    pub device: Device,
    pub opt: OptimizerConfig,
    pub lr_schedule: LrScheduleConfig,
    pub data: DataConfig,
    #[serde(default)]
    pub training: TrainingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OptimizerConfig {
    pub name: String,
    #[serde(default)]
    pub betas: Option<[f64; 2]>,
    #[serde(default)]
    pub momentum: Option<f64>,
    #[serde(default)]
    pub weight_decay: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LrScheduleConfig {
    pub base_lr: f64,
    #[serde(default)]
    pub end_lr: Option<f64>,
    #[serde(default)]
    pub poly_power: Option<f64>,
    #[serde(default)]
    pub decay_steps: Option<u64>,
    #[serde(default)]
    pub total_steps: Option<u64>,
    #[serde(default)]
    pub lr_warmup_steps: Option<u64>,
    #[serde(default)]
    pub start_warmup_step: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataConfig {
    pub global_batch_size: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrainingConfig {
    /// Enables the rank-0 profiling scope.
    #[serde(default)]
    pub benchmark: bool,
}

impl RunConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let cfg: RunConfig = serde_yaml::from_str(yaml)
            .map_err(|e| HierSyncError::configuration(format!("invalid run config: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read, parse and validate a YAML file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        tracing::info!(path = %path.display(), "loading run config");
        let text = std::fs::read_to_string(path).map_err(|e| {
            HierSyncError::configuration(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_yaml_str(&text)
    }

    fn validate(&self) -> Result<()> {
        if self.opt.name.trim().is_empty() {
            return Err(HierSyncError::configuration("opt.name must not be empty"));
        }
        if self.data.global_batch_size == 0 {
            return Err(HierSyncError::configuration(
                "data.global_batch_size must be positive",
            ));
        }
        if !self.lr_schedule.base_lr.is_finite() || self.lr_schedule.base_lr < 0.0 {
            return Err(HierSyncError::configuration(format!(
                "lr_schedule.base_lr must be a non-negative number, got {}",
                self.lr_schedule.base_lr
            )));
        }
        Ok(())
    }
}
