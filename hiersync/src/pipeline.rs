//! Gradient-averaging communication hooks.
//!
//! [`HierarchicalAllReduce`] averages a buffer in three chained stages:
//! reduce to the node leader, all-reduce among leaders, broadcast back
//! within the node. [`FlatAllReduce`] does the same with one all-reduce over
//! the world group. Both divide by the world size and record their time in
//! the shared [`CommTimer`].

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::bootstrap::Hierarchy;
use crate::error::{HierSyncError, Result};
use crate::group::Collectives;
use crate::handle::AsyncHandle;
use crate::reduce::scale_down;
use crate::timing::CommTimer;
use crate::topology::Topology;
use crate::types::{GradientBuffer, Rank, ReduceOp, ReductionStage};

/// A gradient-averaging strategy a training loop can plug in.
pub trait CommHook: Send + Sync {
    fn name(&self) -> &'static str;

    /// Issue the averaging of `buf` and return a handle to the averaged
    /// buffer. Buffers must be issued in the same order on every rank.
    fn reduce(&self, buf: GradientBuffer) -> AsyncHandle<GradientBuffer>;

    /// Average a borrowed buffer in place and wait for the result.
    fn reduce_in_place<'a>(&'a self, buf: &'a mut [f32]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let out = self.reduce(buf.to_vec()).wait().await?;
            if out.len() != buf.len() {
                return Err(HierSyncError::BufferSizeMismatch {
                    expected: buf.len() * size_of::<f32>(),
                    actual: out.len() * size_of::<f32>(),
                });
            }
            buf.copy_from_slice(&out);
            Ok(())
        })
    }
}

/// Two-level reduction over the node-local group and the leader group.
pub struct HierarchicalAllReduce {
    topology: Topology,
    local: Arc<dyn Collectives>,
    leaders: Option<Arc<dyn Collectives>>,
    timer: Arc<CommTimer>,
}

impl HierarchicalAllReduce {
    /// Build from explicit groups.
    ///
    /// `local` must be this rank's node group, ordered by local rank.
    /// `leaders` is required on node leaders of a multi-node run and must be
    /// absent elsewhere.
    pub fn new(
        topology: Topology,
        local: Arc<dyn Collectives>,
        leaders: Option<Arc<dyn Collectives>>,
        timer: Arc<CommTimer>,
    ) -> Result<Self> {
        if local.size() != topology.local_world_size() || local.rank() != topology.local_rank() {
            return Err(HierSyncError::topology(format!(
                "local group has rank {} of {}, topology expects local rank {} of {}",
                local.rank(),
                local.size(),
                topology.local_rank(),
                topology.local_world_size()
            )));
        }
        let needs_leaders = topology.is_lead() && !topology.is_single_node();
        match &leaders {
            Some(_) if !needs_leaders => {
                return Err(HierSyncError::topology(format!(
                    "rank {} is given a leader group but does not lead a node of a multi-node run",
                    topology.rank()
                )));
            }
            Some(g) if g.size() != topology.num_nodes() || g.rank() != topology.node_index() => {
                return Err(HierSyncError::topology(format!(
                    "leader group has rank {} of {}, topology expects node {} of {}",
                    g.rank(),
                    g.size(),
                    topology.node_index(),
                    topology.num_nodes()
                )));
            }
            None if needs_leaders => {
                return Err(HierSyncError::topology(format!(
                    "node leader {} has no leader group",
                    topology.rank()
                )));
            }
            _ => {}
        }
        Ok(Self {
            topology,
            local,
            leaders,
            timer,
        })
    }

    /// Build from the groups formed by [`form_hierarchy`](crate::bootstrap::form_hierarchy).
    pub fn from_hierarchy(topology: Topology, hierarchy: &Hierarchy, timer: Arc<CommTimer>) -> Result<Self> {
        let leaders = if topology.is_single_node() {
            None
        } else {
            hierarchy
                .leaders
                .clone()
                .map(|g| Arc::new(g) as Arc<dyn Collectives>)
        };
        Self::new(topology, Arc::new(hierarchy.local.clone()), leaders, timer)
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }
}

/// Wrap a collective failure with the stage and this rank's placement.
fn stage_failed(
    stage: ReductionStage,
    topology: Topology,
    group: Vec<Rank>,
) -> impl FnOnce(HierSyncError) -> HierSyncError + Send + 'static {
    let rank = topology.rank();
    let node_index = topology.node_index();
    move |e| {
        tracing::warn!(rank, node = node_index, %stage, "reduction stage failed: {e}");
        HierSyncError::Reduction {
            stage,
            rank,
            node_index,
            group,
            reason: e.to_string(),
        }
    }
}

impl CommHook for HierarchicalAllReduce {
    fn name(&self) -> &'static str {
        "hierarchical_allreduce"
    }

    fn reduce(&self, buf: GradientBuffer) -> AsyncHandle<GradientBuffer> {
        let topo = self.topology;
        let start = self.timer.start();
        let intra_node = topo.local_world_size() > 1;

        // Tags are taken now, in issue order, so that buffers in flight
        // concurrently pair up across ranks whatever order their stages
        // complete in.
        let local_tags = intra_node.then(|| {
            let reduce = self.local.next_tag();
            let bcast = self.local.next_tag();
            (reduce, bcast)
        });
        let leader_tag = match &self.leaders {
            Some(g) => Some((Arc::clone(g), g.next_tag())),
            None => None,
        };
        tracing::trace!(rank = topo.rank(), len = buf.len(), "issuing hierarchical reduction");

        let mut handle = AsyncHandle::ready(buf);

        if let Some((tag, _)) = local_tags {
            let local = Arc::clone(&self.local);
            let on_err = stage_failed(ReductionStage::LocalReduce, topo, local.members().to_vec());
            handle = handle.and_then(move |b| local.reduce_tagged(tag, b, 0, ReduceOp::Sum).map_err(on_err));
        }

        if let Some((leaders, tag)) = leader_tag {
            let on_err = stage_failed(ReductionStage::LeaderAllreduce, topo, leaders.members().to_vec());
            handle = handle.and_then(move |b| leaders.all_reduce_tagged(tag, b, ReduceOp::Sum).map_err(on_err));
        }

        if let Some((_, tag)) = local_tags {
            let local = Arc::clone(&self.local);
            let on_err = stage_failed(ReductionStage::Broadcast, topo, local.members().to_vec());
            handle = handle.and_then(move |b| local.broadcast_tagged(tag, b, 0).map_err(on_err));
        }

        let timer = Arc::clone(&self.timer);
        let world = topo.world_size();
        handle.then(move |result| {
            let mut buf = result?;
            scale_down(&mut buf, world);
            timer.finish(start);
            Ok(buf)
        })
    }
}

/// Single all-reduce over the world group.
pub struct FlatAllReduce {
    world: Arc<dyn Collectives>,
    timer: Arc<CommTimer>,
}

impl FlatAllReduce {
    pub fn new(world: Arc<dyn Collectives>, timer: Arc<CommTimer>) -> Self {
        Self { world, timer }
    }
}

impl CommHook for FlatAllReduce {
    fn name(&self) -> &'static str {
        "flat_allreduce"
    }

    fn reduce(&self, buf: GradientBuffer) -> AsyncHandle<GradientBuffer> {
        let start = self.timer.start();
        let timer = Arc::clone(&self.timer);
        let world = self.world.size();
        self.world
            .all_reduce_tagged(self.world.next_tag(), buf, ReduceOp::Sum)
            .then(move |result| {
                let mut buf = result?;
                scale_down(&mut buf, world);
                timer.finish(start);
                Ok(buf)
            })
    }
}
