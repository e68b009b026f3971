//! Point-to-point message transports the collectives are built on.

mod local;
mod mailbox;
mod rendezvous;
mod tcp;

pub use local::LocalTransport;
pub use tcp::TcpTransport;

use futures::future::BoxFuture;

use crate::error::Result;
use crate::types::Rank;

/// Demultiplexing key carried by every message.
///
/// `group` identifies the process group, `tag` the operation within that
/// group. Messages between the same pair of ranks with the same key are
/// delivered in send order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageKey {
    pub group: u32,
    pub tag: u64,
}

/// Reliable, ordered byte transport between the ranks of one run.
///
/// Ranks are global. A transport for rank `r` must accept `send` to itself.
pub trait PeerTransport: Send + Sync {
    /// Global rank of this endpoint.
    fn rank(&self) -> Rank;

    /// Number of ranks in the run.
    fn world_size(&self) -> u32;

    /// Send a payload to `dest`.
    fn send<'a>(&'a self, dest: Rank, key: MessageKey, payload: Vec<u8>) -> BoxFuture<'a, Result<()>>;

    /// Receive the next payload sent by `src` under `key`.
    fn recv<'a>(&'a self, src: Rank, key: MessageKey) -> BoxFuture<'a, Result<Vec<u8>>>;
}
