//! Hierarchical gradient averaging across 2 nodes of 4 ranks, in one process.
//!
//! Every rank contributes a buffer filled with its rank. Both hooks average
//! it to 3.5 on every rank; rank 0 then logs the run and its reduction time.
//!
//! ```bash
//! RUST_LOG=info cargo run --example hierarchical_allreduce
//! ```

use std::sync::Arc;

use hiersync::{CommHook, ProcessContext, RunConfig, RunLogger, bootstrap_local, init_tracing};
use serde_json::json;

const CONFIG: &str = "
device: cpu
opt: {name: lamb, betas: [0.9, 0.999], weight_decay: 0.01}
lr_schedule: {base_lr: 0.0004, total_steps: 1000, lr_warmup_steps: 100, start_warmup_step: 0}
data: {global_batch_size: 256}
";

#[tokio::main]
async fn main() -> hiersync::Result<()> {
    init_tracing();

    let config = RunConfig::from_yaml_str(CONFIG)?;
    let contexts: Vec<Arc<ProcessContext>> = bootstrap_local(2, 4, &config)?
        .into_iter()
        .map(Arc::new)
        .collect();

    let count = 8usize;
    let mut handles = Vec::new();
    for ctx in &contexts {
        let ctx = Arc::clone(ctx);
        handles.push(tokio::spawn(async move {
            let logger = RunLogger::with_tracing(Arc::clone(&ctx));
            logger.start_run(true).await?;

            let rank = ctx.rank()?;
            let hier = ctx.hierarchical_hook()?;
            let flat = ctx.flat_hook()?;
            let averaged = hier.reduce(vec![rank as f32; count]).wait().await?;
            let reference = flat.reduce(vec![rank as f32; count]).wait().await?;

            logger.log_comm_time(true).await?;
            logger.stop_run(Some(json!({"status": "success"})), true).await?;
            hiersync::Result::Ok((rank, averaged, reference))
        }));
    }

    for h in handles {
        let (rank, averaged, reference) = h
            .await
            .map_err(|e| hiersync::HierSyncError::transport(format!("rank task failed: {e}")))??;
        println!("rank {rank}: hierarchical {averaged:?} flat {reference:?}");
    }
    // Output (all ranks identical):
    // rank 0: hierarchical [3.5, 3.5, ...] flat [3.5, 3.5, ...]

    Ok(())
}
