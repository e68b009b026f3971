use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::collective::{self, OpContext};
use crate::config::SyncConfig;
use crate::error::{HierSyncError, Result};
use crate::handle::AsyncHandle;
use crate::transport::{MessageKey, PeerTransport};
use crate::types::{Rank, ReduceOp};

/// The collectives the reduction pipeline issues, scoped to one group.
///
/// Every operation is non-blocking: it is issued when called and completes
/// through the returned handle. `tag` comes from [`next_tag`] and must be
/// reserved by every member in the same order.
///
/// [`next_tag`]: Collectives::next_tag
pub trait Collectives: Send + Sync {
    /// Rank of this process within the group.
    fn rank(&self) -> Rank;

    /// Number of ranks in the group.
    fn size(&self) -> u32;

    /// Global ranks of the members, indexed by group rank.
    fn members(&self) -> &[Rank];

    /// Reserve the tag of the next operation on this group.
    fn next_tag(&self) -> u64;

    /// Reduce into group rank `root`. Other members' buffers come back with
    /// unspecified contents.
    fn reduce_tagged(&self, tag: u64, buf: Vec<f32>, root: Rank, op: ReduceOp) -> AsyncHandle<Vec<f32>>;

    /// Reduce across the group; every member gets the result.
    fn all_reduce_tagged(&self, tag: u64, buf: Vec<f32>, op: ReduceOp) -> AsyncHandle<Vec<f32>>;

    /// Copy group rank `root`'s buffer to every member.
    fn broadcast_tagged(&self, tag: u64, buf: Vec<f32>, root: Rank) -> AsyncHandle<Vec<f32>>;
}

struct GroupState {
    id: u32,
    members: Arc<[Rank]>,
    rank: Rank,
    transport: Arc<dyn PeerTransport>,
    next_tag: AtomicU64,
    subgroups: AtomicU64,
    collective_timeout: Duration,
    barrier_timeout: Duration,
}

/// A set of global ranks that run collectives together.
///
/// Cheap to clone; clones share the operation counter.
#[derive(Clone)]
pub struct ProcessGroup {
    state: Arc<GroupState>,
}

impl std::fmt::Debug for ProcessGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessGroup")
            .field("id", &self.state.id)
            .field("rank", &self.state.rank)
            .field("members", &self.state.members)
            .finish()
    }
}

impl ProcessGroup {
    /// The group of every rank the transport connects.
    pub fn world(transport: Arc<dyn PeerTransport>, cfg: &SyncConfig) -> Self {
        let members: Arc<[Rank]> = (0..transport.world_size()).collect();
        Self::from_parts(0, members, transport.rank(), transport, cfg.collective_timeout, cfg.barrier_timeout)
    }

    fn from_parts(
        id: u32,
        members: Arc<[Rank]>,
        rank: Rank,
        transport: Arc<dyn PeerTransport>,
        collective_timeout: Duration,
        barrier_timeout: Duration,
    ) -> Self {
        Self {
            state: Arc::new(GroupState {
                id,
                members,
                rank,
                transport,
                next_tag: AtomicU64::new(0),
                subgroups: AtomicU64::new(0),
                collective_timeout,
                barrier_timeout,
            }),
        }
    }

    /// Create a subgroup from global `ranks`, in that order.
    ///
    /// Every member of this group must call `new_group` for the same
    /// sequence of rank lists, including ranks that are not in the new
    /// group; those get `Ok(None)`. The group id is derived from this
    /// group's id, the creation index and the member list, so all callers
    /// agree on it without communicating.
    pub fn new_group(&self, ranks: &[Rank]) -> Result<Option<ProcessGroup>> {
        if ranks.is_empty() {
            return Err(HierSyncError::configuration("process group must have at least one rank"));
        }
        for (i, r) in ranks.iter().enumerate() {
            if !self.contains(*r) {
                return Err(HierSyncError::InvalidRank {
                    rank: *r,
                    size: self.size(),
                });
            }
            if ranks[..i].contains(r) {
                return Err(HierSyncError::configuration(format!(
                    "rank {r} listed twice in process group {ranks:?}"
                )));
            }
        }

        let index = self.state.subgroups.fetch_add(1, Ordering::Relaxed);
        let id = group_id(self.state.id, index, ranks);
        let me = self.state.transport.rank();
        let Some(position) = ranks.iter().position(|&r| r == me) else {
            return Ok(None);
        };
        tracing::debug!(group = id, parent = self.state.id, rank = me, members = ?ranks, "created process group");
        Ok(Some(Self::from_parts(
            id,
            ranks.into(),
            position as Rank,
            Arc::clone(&self.state.transport),
            self.state.collective_timeout,
            self.state.barrier_timeout,
        )))
    }

    pub fn id(&self) -> u32 {
        self.state.id
    }

    /// Rank of this process within the group.
    pub fn rank(&self) -> Rank {
        self.state.rank
    }

    pub fn size(&self) -> u32 {
        self.state.members.len() as u32
    }

    /// Global ranks of the members, indexed by group rank.
    pub fn members(&self) -> &[Rank] {
        &self.state.members
    }

    /// Global rank of this process.
    pub fn global_rank(&self) -> Rank {
        self.state.transport.rank()
    }

    /// Whether global rank `rank` is a member.
    pub fn contains(&self, rank: Rank) -> bool {
        self.state.members.contains(&rank)
    }

    fn next_op(&self, tag: u64, timeout: Duration) -> OpContext {
        OpContext {
            transport: Arc::clone(&self.state.transport),
            members: Arc::clone(&self.state.members),
            rank: self.state.rank,
            key: MessageKey {
                group: self.state.id,
                tag,
            },
            timeout,
        }
    }

    fn reserve(&self) -> u64 {
        self.state.next_tag.fetch_add(1, Ordering::Relaxed)
    }

    /// Non-blocking reduce to group rank `root`.
    pub fn reduce(&self, buf: Vec<f32>, root: Rank, op: ReduceOp) -> AsyncHandle<Vec<f32>> {
        self.reduce_with_tag(self.reserve(), buf, root, op)
    }

    /// Non-blocking all-reduce.
    pub fn all_reduce(&self, buf: Vec<f32>, op: ReduceOp) -> AsyncHandle<Vec<f32>> {
        self.all_reduce_with_tag(self.reserve(), buf, op)
    }

    /// Non-blocking broadcast from group rank `root`.
    pub fn broadcast(&self, buf: Vec<f32>, root: Rank) -> AsyncHandle<Vec<f32>> {
        self.broadcast_with_tag(self.reserve(), buf, root)
    }

    /// Non-blocking barrier over the group's members.
    pub fn barrier(&self) -> AsyncHandle<()> {
        let ctx = self.next_op(self.reserve(), self.state.barrier_timeout);
        tracing::trace!(group = ctx.key.group, tag = ctx.key.tag, "barrier");
        AsyncHandle::spawn(async move { collective::dissemination_barrier(&ctx).await })
    }

    fn reduce_with_tag(&self, tag: u64, mut buf: Vec<f32>, root: Rank, op: ReduceOp) -> AsyncHandle<Vec<f32>> {
        let ctx = self.next_op(tag, self.state.collective_timeout);
        tracing::trace!(group = ctx.key.group, tag, root, len = buf.len(), "reduce");
        AsyncHandle::spawn(async move {
            collective::tree_reduce(&ctx, &mut buf, op, root).await?;
            Ok(buf)
        })
    }

    fn all_reduce_with_tag(&self, tag: u64, mut buf: Vec<f32>, op: ReduceOp) -> AsyncHandle<Vec<f32>> {
        let ctx = self.next_op(tag, self.state.collective_timeout);
        tracing::trace!(group = ctx.key.group, tag, len = buf.len(), "all_reduce");
        AsyncHandle::spawn(async move {
            collective::ring_allreduce(&ctx, &mut buf, op).await?;
            Ok(buf)
        })
    }

    fn broadcast_with_tag(&self, tag: u64, mut buf: Vec<f32>, root: Rank) -> AsyncHandle<Vec<f32>> {
        let ctx = self.next_op(tag, self.state.collective_timeout);
        tracing::trace!(group = ctx.key.group, tag, root, len = buf.len(), "broadcast");
        AsyncHandle::spawn(async move {
            collective::tree_broadcast(&ctx, &mut buf, root).await?;
            Ok(buf)
        })
    }
}

impl Collectives for ProcessGroup {
    fn rank(&self) -> Rank {
        ProcessGroup::rank(self)
    }

    fn size(&self) -> u32 {
        ProcessGroup::size(self)
    }

    fn members(&self) -> &[Rank] {
        ProcessGroup::members(self)
    }

    fn next_tag(&self) -> u64 {
        self.reserve()
    }

    fn reduce_tagged(&self, tag: u64, buf: Vec<f32>, root: Rank, op: ReduceOp) -> AsyncHandle<Vec<f32>> {
        self.reduce_with_tag(tag, buf, root, op)
    }

    fn all_reduce_tagged(&self, tag: u64, buf: Vec<f32>, op: ReduceOp) -> AsyncHandle<Vec<f32>> {
        self.all_reduce_with_tag(tag, buf, op)
    }

    fn broadcast_tagged(&self, tag: u64, buf: Vec<f32>, root: Rank) -> AsyncHandle<Vec<f32>> {
        self.broadcast_with_tag(tag, buf, root)
    }
}

/// FNV-1a over (parent, index, members), folded to a non-zero `u32`.
/// Zero is reserved for the world group.
fn group_id(parent: u32, index: u64, members: &[Rank]) -> u32 {
    let mut h: u64 = 0xcbf29ce484222325;
    let mut feed = |bytes: &[u8]| {
        for &b in bytes {
            h ^= b as u64;
            h = h.wrapping_mul(0x100000001b3);
        }
    };
    feed(&parent.to_le_bytes());
    feed(&index.to_le_bytes());
    for r in members {
        feed(&r.to_le_bytes());
    }
    let folded = (h ^ (h >> 32)) as u32;
    if folded == 0 { 1 } else { folded }
}
