use std::fmt::Display;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::{Value, json};

use super::event::{EventType, LogEvent};
use super::keys;
use super::sink::{EventSink, TracingSink};
use crate::config::RunConfig;
use crate::context::ProcessContext;
use crate::error::{HierSyncError, Result};

/// Benchmark whose hyperparameters [`RunLogger::log_workload`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Workload {
    Bert,
    ResNet,
}

impl Workload {
    pub const fn key(self) -> &'static str {
        match self {
            Workload::Bert => keys::BERT,
            Workload::ResNet => keys::RESNET,
        }
    }
}

/// Run `f` on rank 0 only.
///
/// With `sync`, every rank first waits on the world group barrier, so rank 0
/// runs `f` only after all ranks reached the call. Returns `None` on other
/// ranks, and an error on every rank whose topology cannot be resolved.
pub async fn on_rank_zero<T>(ctx: &ProcessContext, sync: bool, f: impl FnOnce() -> T) -> Result<Option<T>> {
    let rank = ctx.rank()?;
    if sync {
        ctx.barrier().await?;
    }
    Ok((rank == 0).then(f))
}

/// Rank-0 structured run log.
///
/// Every method takes `sync`; see [`on_rank_zero`]. On ranks other than 0
/// the methods only take part in the barrier.
pub struct RunLogger {
    ctx: Arc<ProcessContext>,
    sink: Arc<dyn EventSink>,
    namespace: Mutex<String>,
}

impl RunLogger {
    pub fn new(ctx: Arc<ProcessContext>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            ctx,
            sink,
            namespace: Mutex::new(String::new()),
        }
    }

    /// Logger writing `:::MLLOG` lines through `tracing`.
    pub fn with_tracing(ctx: Arc<ProcessContext>) -> Self {
        Self::new(ctx, Arc::new(TracingSink))
    }

    pub fn namespace(&self) -> String {
        self.namespace.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn set_namespace(&self, ns: &str) {
        *self.namespace.lock().unwrap_or_else(PoisonError::into_inner) = ns.to_string();
    }

    fn emit(&self, event_type: EventType, key: &str, value: Value, metadata: Option<Value>) {
        let event = LogEvent::now(&self.namespace(), event_type, key, value, metadata);
        self.sink.record(&event);
    }

    async fn gated(&self, sync: bool, event_type: EventType, key: &str, value: Value, metadata: Option<Value>) -> Result<()> {
        on_rank_zero(&self.ctx, sync, || self.emit(event_type, key, value, metadata)).await?;
        Ok(())
    }

    pub async fn start_init(&self, sync: bool) -> Result<()> {
        self.gated(sync, EventType::IntervalStart, keys::INIT_START, Value::Null, None).await
    }

    pub async fn stop_init(&self, sync: bool) -> Result<()> {
        self.gated(sync, EventType::IntervalEnd, keys::INIT_STOP, Value::Null, None).await
    }

    pub async fn start_run(&self, sync: bool) -> Result<()> {
        self.gated(sync, EventType::IntervalStart, keys::RUN_START, Value::Null, None).await
    }

    /// End of the run. Metadata defaults to `{"status": "success"}`.
    pub async fn stop_run(&self, metadata: Option<Value>, sync: bool) -> Result<()> {
        let metadata = metadata.unwrap_or_else(|| json!({"status": "success"}));
        self.gated(sync, EventType::IntervalEnd, keys::RUN_STOP, Value::Null, Some(metadata))
            .await
    }

    pub async fn start_epoch(&self, metadata: Value, sync: bool) -> Result<()> {
        self.gated(sync, EventType::IntervalStart, keys::EPOCH_START, Value::Null, Some(metadata))
            .await
    }

    pub async fn stop_epoch(&self, metadata: Value, sync: bool) -> Result<()> {
        self.gated(sync, EventType::IntervalEnd, keys::EPOCH_STOP, Value::Null, Some(metadata))
            .await
    }

    pub async fn start_eval(&self, metadata: Value, sync: bool) -> Result<()> {
        self.gated(sync, EventType::IntervalStart, keys::EVAL_START, Value::Null, Some(metadata))
            .await
    }

    pub async fn stop_eval(&self, metadata: Value, sync: bool) -> Result<()> {
        self.gated(sync, EventType::IntervalEnd, keys::EVAL_STOP, Value::Null, Some(metadata))
            .await
    }

    pub async fn log_seed(&self, seed: u64, sync: bool) -> Result<()> {
        self.gated(sync, EventType::PointInTime, keys::SEED, json!(seed), None).await
    }

    /// Arbitrary point-in-time event.
    pub async fn log_event(&self, key: &str, value: Value, metadata: Option<Value>, sync: bool) -> Result<()> {
        self.gated(sync, EventType::PointInTime, key, value, metadata).await
    }

    /// Report the workload and its hyperparameters, then the cluster shape.
    /// Switches the namespace to the workload's.
    ///
    /// Fails on every rank, before any barrier, if the run config lacks a
    /// field the workload reports.
    pub async fn log_workload(&self, workload: Workload, sync: bool) -> Result<()> {
        let mut events = vec![(workload.key(), Value::Null)];
        events.extend(workload_hyperparameters(workload, self.ctx.config())?);
        events.extend(self.cluster_info()?);
        on_rank_zero(&self.ctx, sync, || {
            self.set_namespace(workload.key());
            for (key, value) in events {
                self.emit(EventType::PointInTime, key, value, None);
            }
        })
        .await?;
        Ok(())
    }

    /// Report rank count, node count and accelerators per node (0 on CPU).
    pub async fn log_cluster_info(&self, sync: bool) -> Result<()> {
        let events = self.cluster_info()?;
        on_rank_zero(&self.ctx, sync, || {
            for (key, value) in events {
                self.emit(EventType::PointInTime, key, value, None);
            }
        })
        .await?;
        Ok(())
    }

    fn cluster_info(&self) -> Result<Vec<(&'static str, Value)>> {
        let topo = self.ctx.topology()?;
        let accelerators = if self.ctx.device().is_accelerator() {
            topo.local_world_size()
        } else {
            0
        };
        Ok(vec![
            (keys::NUMBER_OF_RANKS, json!(topo.world_size())),
            (keys::NUMBER_OF_NODES, json!(topo.num_nodes())),
            (keys::ACCELERATORS_PER_NODE, json!(accelerators)),
        ])
    }

    /// Report this rank's cumulative reduction time in seconds.
    ///
    /// Only rank 0's own total is reported.
    pub async fn log_comm_time(&self, sync: bool) -> Result<()> {
        let timer = self.ctx.comm_timer();
        let seconds = timer.cumulative_comm_time_seconds();
        let reductions = timer.completed();
        self.gated(
            sync,
            EventType::PointInTime,
            keys::COMM_TIME_S,
            json!(seconds),
            Some(json!({"reductions": reductions})),
        )
        .await
    }

    /// Plain message from rank 0 through `tracing`.
    pub async fn print_rank_zero(&self, message: impl Display, sync: bool) -> Result<()> {
        on_rank_zero(&self.ctx, sync, || tracing::info!("{message}")).await?;
        Ok(())
    }
}

fn required<T>(value: Option<T>, workload: Workload, field: &str) -> Result<T> {
    value.ok_or_else(|| {
        HierSyncError::configuration(format!(
            "{} logging needs {field} in the run config",
            workload.key()
        ))
    })
}

fn workload_hyperparameters(workload: Workload, cfg: &RunConfig) -> Result<Vec<(&'static str, Value)>> {
    let opt = &cfg.opt;
    let lr = &cfg.lr_schedule;
    let events = match workload {
        Workload::Bert => {
            let warmup = required(lr.lr_warmup_steps, workload, "lr_schedule.lr_warmup_steps")?;
            let betas = required(opt.betas, workload, "opt.betas")?;
            vec![
                (keys::OPT_NAME, json!(opt.name)),
                (keys::GLOBAL_BATCH_SIZE, json!(cfg.data.global_batch_size)),
                (keys::OPT_BASE_LR, json!(lr.base_lr)),
                (keys::OPT_LAMB_EPSILON, json!(1.0e-6)),
                (
                    keys::OPT_LR_TRAINING_STEPS,
                    json!(required(lr.total_steps, workload, "lr_schedule.total_steps")?),
                ),
                (keys::OPT_LR_WARMUP_STEPS, json!(warmup)),
                (keys::NUM_WARMUP_STEPS, json!(warmup)),
                (
                    keys::START_WARMUP_STEP,
                    json!(required(lr.start_warmup_step, workload, "lr_schedule.start_warmup_step")?),
                ),
                (keys::OPT_LAMB_BETA_1, json!(betas[0])),
                (keys::OPT_LAMB_BETA_2, json!(betas[1])),
                (
                    keys::OPT_WEIGHT_DECAY,
                    json!(required(opt.weight_decay, workload, "opt.weight_decay")?),
                ),
            ]
        }
        Workload::ResNet => {
            let name = opt.name.to_uppercase();
            let mut events = vec![(keys::OPT_NAME, json!(name))];
            if name == "LARS" {
                events.push((keys::LARS_EPSILON, json!(1.0e-6)));
            }
            events.extend([
                (keys::GLOBAL_BATCH_SIZE, json!(cfg.data.global_batch_size)),
                (keys::OPT_BASE_LR, json!(lr.base_lr)),
                (keys::OPT_END_LR, json!(required(lr.end_lr, workload, "lr_schedule.end_lr")?)),
                (
                    keys::LARS_OPT_LR_DECAY_POLY_POWER,
                    json!(required(lr.poly_power, workload, "lr_schedule.poly_power")?),
                ),
                (
                    keys::OPT_LR_DECAY_STEPS,
                    json!(required(lr.decay_steps, workload, "lr_schedule.decay_steps")?),
                ),
                (keys::LARS_OPT_MOMENTUM, json!(required(opt.momentum, workload, "opt.momentum")?)),
                (
                    keys::OPT_WEIGHT_DECAY,
                    json!(required(opt.weight_decay, workload, "opt.weight_decay")?),
                ),
            ]);
            events
        }
    };
    Ok(events)
}
