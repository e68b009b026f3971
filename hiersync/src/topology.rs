use std::ops::Range;

use crate::error::{HierSyncError, Result};
use crate::types::Rank;

/// Placement of this process in the cluster.
///
/// Ranks are laid out node-contiguously: node `n` holds global ranks
/// `n * local_world_size .. (n + 1) * local_world_size`, and its lead is the
/// process with local rank 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Topology {
    rank: Rank,
    world_size: u32,
    local_rank: u32,
    local_world_size: u32,
}

impl Topology {
    pub fn new(rank: Rank, world_size: u32, local_rank: u32, local_world_size: u32) -> Result<Self> {
        HierarchyLayout::new(world_size, local_world_size)?;
        if rank >= world_size {
            return Err(HierSyncError::topology(format!(
                "rank {rank} out of range for world size {world_size}"
            )));
        }
        if local_rank >= local_world_size {
            return Err(HierSyncError::topology(format!(
                "local rank {local_rank} out of range for local world size {local_world_size}"
            )));
        }
        if rank % local_world_size != local_rank {
            return Err(HierSyncError::topology(format!(
                "rank {rank} has local rank {local_rank}, but a node-contiguous layout with \
                 {local_world_size} ranks per node implies local rank {}",
                rank % local_world_size
            )));
        }
        Ok(Self {
            rank,
            world_size,
            local_rank,
            local_world_size,
        })
    }

    /// Global rank of this process.
    pub fn rank(&self) -> Rank {
        self.rank
    }

    pub fn world_size(&self) -> u32 {
        self.world_size
    }

    /// This rank's index on its node.
    pub fn local_rank(&self) -> u32 {
        self.local_rank
    }

    /// Number of processes on each node.
    pub fn local_world_size(&self) -> u32 {
        self.local_world_size
    }

    /// This node's index among all nodes.
    pub fn node_index(&self) -> u32 {
        self.rank / self.local_world_size
    }

    pub fn num_nodes(&self) -> u32 {
        self.world_size / self.local_world_size
    }

    /// True if this rank is the lead for its node.
    pub fn is_lead(&self) -> bool {
        self.local_rank == 0
    }

    /// True if the entire cluster is a single node.
    pub fn is_single_node(&self) -> bool {
        self.num_nodes() == 1
    }

    /// Global rank of this node's lead.
    pub fn lead_rank(&self) -> Rank {
        self.node_index() * self.local_world_size
    }

    /// All global ranks on this node.
    pub fn local_ranks(&self) -> Range<Rank> {
        let lead = self.lead_rank();
        lead..lead + self.local_world_size
    }

    pub fn layout(&self) -> HierarchyLayout {
        HierarchyLayout {
            world_size: self.world_size,
            local_world_size: self.local_world_size,
        }
    }
}

/// Partition of global ranks into per-node groups and the leader group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HierarchyLayout {
    world_size: u32,
    local_world_size: u32,
}

impl HierarchyLayout {
    pub fn new(world_size: u32, local_world_size: u32) -> Result<Self> {
        if world_size == 0 || local_world_size == 0 {
            return Err(HierSyncError::topology(format!(
                "world size ({world_size}) and local world size ({local_world_size}) must be positive"
            )));
        }
        if world_size % local_world_size != 0 {
            return Err(HierSyncError::topology(format!(
                "world size {world_size} is not divisible by local world size {local_world_size}"
            )));
        }
        Ok(Self {
            world_size,
            local_world_size,
        })
    }

    pub fn world_size(&self) -> u32 {
        self.world_size
    }

    pub fn local_world_size(&self) -> u32 {
        self.local_world_size
    }

    pub fn num_nodes(&self) -> u32 {
        self.world_size / self.local_world_size
    }

    /// Node that hosts `rank`.
    pub fn node_of(&self, rank: Rank) -> u32 {
        rank / self.local_world_size
    }

    /// Global ranks of node `node`, ascending.
    pub fn local_group(&self, node: u32) -> Vec<Rank> {
        let start = node * self.local_world_size;
        (start..start + self.local_world_size).collect()
    }

    /// One group per node, ordered by node index.
    pub fn local_groups(&self) -> Vec<Vec<Rank>> {
        (0..self.num_nodes()).map(|n| self.local_group(n)).collect()
    }

    /// One lead rank per node, ordered by node index.
    pub fn leaders(&self) -> Vec<Rank> {
        (0..self.num_nodes())
            .map(|n| n * self.local_world_size)
            .collect()
    }
}
