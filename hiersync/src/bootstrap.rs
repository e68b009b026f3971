use std::sync::Arc;

use crate::config::{RunConfig, SyncConfig};
use crate::context::ProcessContext;
use crate::error::{HierSyncError, Result};
use crate::group::ProcessGroup;
use crate::launch::LaunchEnv;
use crate::topology::{HierarchyLayout, Topology};
use crate::transport::{LocalTransport, PeerTransport};

/// The two groups the reduction pipeline runs over.
#[derive(Debug, Clone)]
pub struct Hierarchy {
    pub layout: HierarchyLayout,
    /// Every rank on this node, ordered by local rank.
    pub local: ProcessGroup,
    /// Local rank 0 of every node, ordered by node index. `None` on
    /// non-leaders.
    pub leaders: Option<ProcessGroup>,
}

/// Form the node-local groups and the leader group from the world group.
///
/// All ranks must call this collectively. Groups are created in the same
/// order everywhere (each node's local group, then the leader group), so
/// every rank derives the same group ids.
pub fn form_hierarchy(world: &ProcessGroup, topology: &Topology) -> Result<Hierarchy> {
    if world.size() != topology.world_size() || world.global_rank() != topology.rank() {
        return Err(HierSyncError::topology(format!(
            "world group has rank {} of {}, topology expects rank {} of {}",
            world.global_rank(),
            world.size(),
            topology.rank(),
            topology.world_size()
        )));
    }
    let layout = topology.layout();

    let mut local = None;
    for members in layout.local_groups() {
        if let Some(group) = world.new_group(&members)? {
            local = Some(group);
        }
    }
    let local = local.ok_or_else(|| {
        HierSyncError::topology(format!("rank {} is in no local group", topology.rank()))
    })?;
    let leaders = world.new_group(&layout.leaders())?;

    tracing::info!(
        rank = topology.rank(),
        node = topology.node_index(),
        num_nodes = layout.num_nodes(),
        local_world_size = layout.local_world_size(),
        lead = leaders.is_some(),
        "formed process hierarchy"
    );
    Ok(Hierarchy {
        layout,
        local,
        leaders,
    })
}

/// Contexts for an in-process run of `num_nodes` nodes with `per_node`
/// ranks each, connected by a [`LocalTransport`] mesh and already
/// initialized. Indexed by global rank.
pub fn bootstrap_local(num_nodes: u32, per_node: u32, config: &RunConfig) -> Result<Vec<ProcessContext>> {
    let layout = HierarchyLayout::new(num_nodes * per_node, per_node)?;
    let world_size = layout.world_size();
    LocalTransport::mesh(world_size)
        .into_iter()
        .enumerate()
        .map(|(rank, transport)| {
            let launch = LaunchEnv::orchestrated(rank as u32, world_size, per_node);
            let ctx = ProcessContext::new(config.clone(), launch, SyncConfig::default());
            ctx.init_distributed_with(transport as Arc<dyn PeerTransport>)?;
            Ok(ctx)
        })
        .collect()
}
