use std::sync::Arc;

use futures::future::BoxFuture;

use super::mailbox::Inbox;
use super::{MessageKey, PeerTransport};
use crate::error::{HierSyncError, Result};
use crate::types::Rank;

/// In-process transport: every rank is a task in the same process and
/// messages move through shared inboxes.
///
/// Used to simulate a multi-node run on one machine and by tests.
pub struct LocalTransport {
    rank: Rank,
    inboxes: Arc<Vec<Inbox>>,
}

impl LocalTransport {
    /// Build a fully connected mesh of `world_size` endpoints, indexed by rank.
    pub fn mesh(world_size: u32) -> Vec<Arc<LocalTransport>> {
        let inboxes: Arc<Vec<Inbox>> =
            Arc::new((0..world_size).map(|_| Inbox::default()).collect());
        (0..world_size)
            .map(|rank| {
                Arc::new(LocalTransport {
                    rank,
                    inboxes: Arc::clone(&inboxes),
                })
            })
            .collect()
    }

    fn inbox(&self, rank: Rank) -> Result<&Inbox> {
        self.inboxes
            .get(rank as usize)
            .ok_or(HierSyncError::InvalidRank {
                rank,
                size: self.world_size(),
            })
    }
}

impl PeerTransport for LocalTransport {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn world_size(&self) -> u32 {
        self.inboxes.len() as u32
    }

    fn send<'a>(&'a self, dest: Rank, key: MessageKey, payload: Vec<u8>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.inbox(dest)?.deliver(self.rank, key, payload);
            Ok(())
        })
    }

    fn recv<'a>(&'a self, src: Rank, key: MessageKey) -> BoxFuture<'a, Result<Vec<u8>>> {
        Box::pin(async move {
            if src >= self.world_size() {
                return Err(HierSyncError::InvalidRank {
                    rank: src,
                    size: self.world_size(),
                });
            }
            self.inbox(self.rank)?.take(src, key).await
        })
    }
}

impl Drop for LocalTransport {
    fn drop(&mut self) {
        // Wake anyone still waiting on this rank so they fail instead of hanging.
        if let Some(inbox) = self.inboxes.get(self.rank as usize) {
            inbox.close();
        }
    }
}
