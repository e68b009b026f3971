//! Launch environment detection and topology resolution.
//!
//! Two launch schemes are recognized:
//! - orchestrated (elastic launcher): `RANK`, `WORLD_SIZE`, `LOCAL_RANK`,
//!   `LOCAL_WORLD_SIZE`, detected by `TORCHELASTIC_RUN_ID` or by the local
//!   variables being present;
//! - job scheduler: `SLURM_NTASKS`, `SLURM_NNODES`, `SLURM_PROCID`, with
//!   tasks spread evenly across nodes.

use std::collections::HashMap;

use crate::error::{HierSyncError, Result};
use crate::topology::Topology;

const ELASTIC_RUN_ID: &str = "TORCHELASTIC_RUN_ID";
const RANK: &str = "RANK";
const WORLD_SIZE: &str = "WORLD_SIZE";
const LOCAL_RANK: &str = "LOCAL_RANK";
const LOCAL_WORLD_SIZE: &str = "LOCAL_WORLD_SIZE";
const SLURM_NTASKS: &str = "SLURM_NTASKS";
const SLURM_NNODES: &str = "SLURM_NNODES";
const SLURM_PROCID: &str = "SLURM_PROCID";

const KEYS: [&str; 8] = [
    ELASTIC_RUN_ID,
    RANK,
    WORLD_SIZE,
    LOCAL_RANK,
    LOCAL_WORLD_SIZE,
    SLURM_NTASKS,
    SLURM_NNODES,
    SLURM_PROCID,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchScheme {
    Orchestrated,
    JobScheduler,
}

/// Snapshot of the launch variables this process was started with.
#[derive(Debug, Clone, Default)]
pub struct LaunchEnv {
    vars: HashMap<String, String>,
}

impl LaunchEnv {
    /// Capture the launch variables from the process environment.
    pub fn from_env() -> Self {
        Self::from_pairs(
            KEYS.iter()
                .filter_map(|&k| std::env::var(k).ok().map(|v| (k, v))),
        )
    }

    /// Build from explicit key/value pairs. Unrelated keys are dropped.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(k, _)| KEYS.contains(&k.as_str()))
            .collect();
        Self { vars }
    }

    /// Launch variables for one rank of an orchestrated launch with
    /// node-contiguous placement.
    pub fn orchestrated(rank: u32, world_size: u32, local_world_size: u32) -> Self {
        Self::from_pairs([
            (RANK, rank.to_string()),
            (WORLD_SIZE, world_size.to_string()),
            (LOCAL_RANK, (rank % local_world_size.max(1)).to_string()),
            (LOCAL_WORLD_SIZE, local_world_size.to_string()),
        ])
    }

    pub fn is_orchestrated(&self) -> bool {
        self.vars.contains_key(ELASTIC_RUN_ID)
            || (self.vars.contains_key(LOCAL_RANK) && self.vars.contains_key(LOCAL_WORLD_SIZE))
    }

    /// Detect which launch scheme is active.
    pub fn scheme(&self) -> Result<LaunchScheme> {
        if self.is_orchestrated() {
            Ok(LaunchScheme::Orchestrated)
        } else if self.vars.contains_key(SLURM_NTASKS) {
            Ok(LaunchScheme::JobScheduler)
        } else {
            Err(HierSyncError::configuration(
                "no launch environment detected: expected LOCAL_RANK/LOCAL_WORLD_SIZE \
                 (orchestrated launch) or SLURM_NTASKS (job scheduler)",
            ))
        }
    }

    fn get_u32(&self, key: &str) -> Result<u32> {
        let raw = self
            .vars
            .get(key)
            .ok_or_else(|| HierSyncError::configuration(format!("missing launch variable {key}")))?;
        raw.trim().parse().map_err(|_| {
            HierSyncError::configuration(format!("launch variable {key}={raw:?} is not an integer"))
        })
    }
}

/// Resolve this process's topology from its launch environment.
pub fn resolve_topology(env: &LaunchEnv) -> Result<Topology> {
    let topo = match env.scheme()? {
        LaunchScheme::Orchestrated => Topology::new(
            env.get_u32(RANK)?,
            env.get_u32(WORLD_SIZE)?,
            env.get_u32(LOCAL_RANK)?,
            env.get_u32(LOCAL_WORLD_SIZE)?,
        )?,
        LaunchScheme::JobScheduler => {
            let total_tasks = env.get_u32(SLURM_NTASKS)?;
            let num_nodes = env.get_u32(SLURM_NNODES)?;
            let proc_id = env.get_u32(SLURM_PROCID)?;
            if num_nodes == 0 || total_tasks % num_nodes != 0 {
                return Err(HierSyncError::configuration(format!(
                    "{total_tasks} tasks cannot be spread evenly over {num_nodes} nodes"
                )));
            }
            let tasks_per_node = total_tasks / num_nodes;
            Topology::new(proc_id, total_tasks, proc_id % tasks_per_node, tasks_per_node)?
        }
    };
    tracing::debug!(
        rank = topo.rank(),
        world_size = topo.world_size(),
        local_rank = topo.local_rank(),
        local_world_size = topo.local_world_size(),
        "resolved topology"
    );
    Ok(topo)
}
