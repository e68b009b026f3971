use std::str::FromStr;

use crate::error::{HierSyncError, Result};

/// Rank of a participant in a process group (0-indexed).
pub type Rank = u32;

/// Flat gradient buffer handed to a communication hook.
pub type GradientBuffer = Vec<f32>;

/// Reduction operations for collective communication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReduceOp {
    /// Element-wise sum across ranks.
    Sum,
    /// Element-wise product across ranks.
    Prod,
    /// Element-wise minimum across ranks.
    Min,
    /// Element-wise maximum across ranks.
    Max,
}

impl ReduceOp {
    #[inline]
    pub fn apply(self, a: f32, b: f32) -> f32 {
        match self {
            ReduceOp::Sum => a + b,
            ReduceOp::Prod => a * b,
            ReduceOp::Min => a.min(b),
            ReduceOp::Max => a.max(b),
        }
    }
}

impl std::fmt::Display for ReduceOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReduceOp::Sum => f.write_str("sum"),
            ReduceOp::Prod => f.write_str("prod"),
            ReduceOp::Min => f.write_str("min"),
            ReduceOp::Max => f.write_str("max"),
        }
    }
}

/// Compute device a run trains on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Deserialize)]
#[serde(try_from = "String")]
pub enum Device {
    Cpu,
    /// Accelerator. Configuration spells it `gpu` or `cuda`.
    Cuda,
}

impl Device {
    pub const fn name(self) -> &'static str {
        match self {
            Device::Cpu => "cpu",
            Device::Cuda => "cuda",
        }
    }

    pub const fn is_accelerator(self) -> bool {
        matches!(self, Device::Cuda)
    }
}

impl FromStr for Device {
    type Err = HierSyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(Device::Cpu),
            "gpu" | "cuda" => Ok(Device::Cuda),
            other => Err(HierSyncError::configuration(format!(
                "unknown device {other:?} (expected cpu or gpu)"
            ))),
        }
    }
}

impl TryFrom<String> for Device {
    type Error = HierSyncError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Communication backend chosen at distributed init.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// Message-passing library launched by the job scheduler.
    Mpi,
    /// Accelerator-native collectives.
    Nccl,
    /// Generic CPU backend (TCP mesh).
    Gloo,
}

impl Backend {
    /// Backend selection policy.
    ///
    /// MPI wins when it is available and the job was not started by an
    /// orchestrating launcher; otherwise the device decides.
    pub fn select(mpi_available: bool, orchestrated: bool, device: Device) -> Self {
        if mpi_available && !orchestrated {
            Backend::Mpi
        } else if device.is_accelerator() {
            Backend::Nccl
        } else {
            Backend::Gloo
        }
    }

    /// Whether MPI bindings are compiled into this build.
    pub const fn mpi_available() -> bool {
        false
    }

    pub const fn name(self) -> &'static str {
        match self {
            Backend::Mpi => "mpi",
            Backend::Nccl => "nccl",
            Backend::Gloo => "gloo",
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Stage of the hierarchical reduction a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReductionStage {
    LocalReduce,
    LeaderAllreduce,
    Broadcast,
}

impl ReductionStage {
    pub const fn name(self) -> &'static str {
        match self {
            ReductionStage::LocalReduce => "local_reduce",
            ReductionStage::LeaderAllreduce => "leader_allreduce",
            ReductionStage::Broadcast => "broadcast",
        }
    }
}

impl std::fmt::Display for ReductionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
