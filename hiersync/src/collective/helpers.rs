use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{HierSyncError, Result};
use crate::reduce::{decode_into, reduce_into};
use crate::transport::{MessageKey, PeerTransport};
use crate::types::{Rank, ReduceOp};

/// Integer ceiling of log2(n). Returns 0 for n <= 1.
pub(crate) fn ceil_log2(n: u32) -> u32 {
    if n <= 1 {
        return 0;
    }
    u32::BITS - (n - 1).leading_zeros()
}

/// One issued collective: the group it runs in, this rank's position in it,
/// and the key its messages travel under.
///
/// Peers are addressed by group rank; `members` maps them to global ranks.
#[derive(Clone)]
pub(crate) struct OpContext {
    pub transport: Arc<dyn PeerTransport>,
    pub members: Arc<[Rank]>,
    pub rank: Rank,
    pub key: MessageKey,
    pub timeout: Duration,
}

impl OpContext {
    pub fn size(&self) -> u32 {
        self.members.len() as u32
    }

    fn global(&self, group_rank: Rank) -> Result<Rank> {
        self.members
            .get(group_rank as usize)
            .copied()
            .ok_or(HierSyncError::InvalidRank {
                rank: group_rank,
                size: self.size(),
            })
    }

    /// Send to a group peer with timeout, wrapping errors as `CollectiveFailed`.
    pub async fn send(&self, dest: Rank, data: Vec<u8>, operation: &'static str) -> Result<()> {
        let peer = self.global(dest)?;
        match tokio::time::timeout(self.timeout, self.transport.send(peer, self.key, data)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(HierSyncError::CollectiveFailed {
                operation,
                rank: peer,
                reason: e.to_string(),
            }),
            Err(_) => Err(HierSyncError::CollectiveFailed {
                operation,
                rank: peer,
                reason: format!("send timed out after {}s", self.timeout.as_secs_f64()),
            }),
        }
    }

    /// Receive from a group peer with timeout, wrapping errors as `CollectiveFailed`.
    pub async fn recv(&self, src: Rank, operation: &'static str) -> Result<Vec<u8>> {
        let peer = self.global(src)?;
        match tokio::time::timeout(self.timeout, self.transport.recv(peer, self.key)).await {
            Ok(Ok(buf)) => Ok(buf),
            Ok(Err(e)) => Err(HierSyncError::CollectiveFailed {
                operation,
                rank: peer,
                reason: e.to_string(),
            }),
            Err(_) => Err(HierSyncError::CollectiveFailed {
                operation,
                rank: peer,
                reason: format!("recv timed out after {}s", self.timeout.as_secs_f64()),
            }),
        }
    }

    /// Receive from `src` and fold it into `dst` with `op`.
    pub async fn recv_reduce(
        &self,
        src: Rank,
        dst: &mut [f32],
        op: ReduceOp,
        operation: &'static str,
    ) -> Result<()> {
        let received = self.recv(src, operation).await?;
        reduce_into(dst, &received, op)
    }

    /// Receive from `src` and overwrite `dst` with it.
    pub async fn recv_into(&self, src: Rank, dst: &mut [f32], operation: &'static str) -> Result<()> {
        let received = self.recv(src, operation).await?;
        decode_into(dst, &received)
    }
}

/// Split of `count` elements into `parts` contiguous chunks whose sizes
/// differ by at most one (the first `count % parts` chunks get the extra).
pub(crate) struct ChunkLayout {
    offsets: Vec<usize>,
}

impl ChunkLayout {
    pub fn new(count: usize, parts: usize) -> Self {
        let parts = parts.max(1);
        let base = count / parts;
        let extra = count % parts;
        let mut offsets = Vec::with_capacity(parts + 1);
        let mut off = 0;
        for i in 0..parts {
            offsets.push(off);
            off += base + usize::from(i < extra);
        }
        offsets.push(off);
        Self { offsets }
    }

    pub fn range(&self, idx: usize) -> Range<usize> {
        self.offsets[idx]..self.offsets[idx + 1]
    }
}
