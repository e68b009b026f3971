use std::collections::HashMap;
use std::sync::Arc;

use futures::future::{BoxFuture, try_join_all};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::mailbox::Inbox;
use super::rendezvous::{self, PeerAddr};
use super::{MessageKey, PeerTransport};
use crate::config::SyncConfig;
use crate::error::{HierSyncError, Result};
use crate::types::Rank;

/// Largest payload a frame may carry. Larger sends are rejected; a larger
/// incoming length means the stream is corrupt and closes the connection.
const MAX_FRAME_BYTES: u64 = 1 << 30;

/// Frames queued per peer before senders wait.
const WRITE_QUEUE: usize = 64;

const HEADER_BYTES: usize = 20;

/// An encoded frame and where to report the write result.
struct Outgoing {
    frame: Vec<u8>,
    done: oneshot::Sender<Result<()>>,
}

/// Full-mesh transport over plain TCP.
///
/// Frames are `[group: u32 LE][tag: u64 LE][len: u64 LE][payload]`. Per
/// peer, one background task reads frames into this rank's inbox and one
/// writes queued frames to the socket. A frame is always written whole, even
/// when the send that queued it is cancelled.
pub struct TcpTransport {
    rank: Rank,
    world_size: u32,
    writers: HashMap<Rank, mpsc::Sender<Outgoing>>,
    inbox: Arc<Inbox>,
    recv_tasks: Vec<JoinHandle<()>>,
}

impl TcpTransport {
    /// Form the mesh: rendezvous through rank 0 at
    /// `cfg.master_addr:cfg.master_port`, then connect every pair of ranks.
    ///
    /// All ranks must call this collectively.
    pub async fn connect(rank: Rank, world_size: u32, cfg: &SyncConfig) -> Result<Self> {
        if rank >= world_size {
            return Err(HierSyncError::InvalidRank {
                rank,
                size: world_size,
            });
        }
        let inbox = Arc::new(Inbox::default());
        if world_size == 1 {
            return Ok(Self {
                rank,
                world_size,
                writers: HashMap::new(),
                inbox,
                recv_tasks: Vec::new(),
            });
        }

        let mesh_listener = TcpListener::bind(("0.0.0.0", 0)).await?;
        let me = PeerAddr {
            rank,
            host: cfg.advertise_host(),
            port: mesh_listener.local_addr()?.port(),
        };

        let master = format!("{}:{}", cfg.master_addr, cfg.master_port);
        let table = if rank == 0 {
            let listener = TcpListener::bind(("0.0.0.0", cfg.master_port)).await?;
            tracing::info!(%master, world_size, "waiting for ranks to join");
            rendezvous::serve(listener, me, world_size, cfg.rendezvous_timeout).await?
        } else {
            rendezvous::join(&master, me, cfg.rendezvous_timeout).await?
        };

        // Lower rank dials higher rank; each dial opens with the dialer's rank.
        let dials = table
            .iter()
            .filter(|p| p.rank > rank)
            .map(|p| dial(p, rank));
        let accepts = (0..rank).map(|_| accept(&mesh_listener));
        let (dialed, accepted) = tokio::try_join!(try_join_all(dials), try_join_all(accepts))?;

        let mut writers = HashMap::new();
        let mut recv_tasks = Vec::new();
        for (peer, stream) in dialed.into_iter().chain(accepted) {
            stream.set_nodelay(true)?;
            let (reader, writer) = stream.into_split();
            let (tx, rx) = mpsc::channel(WRITE_QUEUE);
            tokio::spawn(send_loop(peer, writer, rx));
            writers.insert(peer, tx);
            let inbox = Arc::clone(&inbox);
            recv_tasks.push(tokio::spawn(recv_loop(peer, reader, inbox)));
        }
        if writers.len() + 1 != world_size as usize {
            return Err(HierSyncError::transport(format!(
                "mesh incomplete: connected to {} of {} peers",
                writers.len(),
                world_size - 1
            )));
        }
        tracing::info!(rank, world_size, "tcp mesh established");

        Ok(Self {
            rank,
            world_size,
            writers,
            inbox,
            recv_tasks,
        })
    }

    async fn write_frame(&self, dest: Rank, key: MessageKey, payload: &[u8]) -> Result<()> {
        let writer = self.writers.get(&dest).ok_or(HierSyncError::InvalidRank {
            rank: dest,
            size: self.world_size,
        })?;
        let frame = encode_frame(key, payload)?;
        let (done, result) = oneshot::channel();
        let closed = || HierSyncError::transport(format!("connection to rank {dest} is closed"));
        writer
            .send(Outgoing { frame, done })
            .await
            .map_err(|_| closed())?;
        result.await.map_err(|_| closed())?
    }
}

fn encode_frame(key: MessageKey, payload: &[u8]) -> Result<Vec<u8>> {
    let len = payload.len() as u64;
    if len > MAX_FRAME_BYTES {
        return Err(HierSyncError::transport(format!(
            "payload of {len} bytes exceeds the {MAX_FRAME_BYTES}-byte frame limit"
        )));
    }
    let mut frame = Vec::with_capacity(HEADER_BYTES + payload.len());
    frame.extend_from_slice(&key.group.to_le_bytes());
    frame.extend_from_slice(&key.tag.to_le_bytes());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Write queued frames to `peer` until the transport drops its sender or the
/// socket fails. After a failure every queued and later send fails.
async fn send_loop(peer: Rank, mut writer: OwnedWriteHalf, mut queue: mpsc::Receiver<Outgoing>) {
    while let Some(Outgoing { frame, done }) = queue.recv().await {
        let written = async {
            writer.write_all(&frame).await?;
            writer.flush().await
        }
        .await;
        match written {
            Ok(()) => {
                let _ = done.send(Ok(()));
            }
            Err(e) => {
                tracing::warn!(peer, "tcp send loop ended: {e}");
                let _ = done.send(Err(HierSyncError::transport_with_source(
                    format!("write to rank {peer}"),
                    e,
                )));
                break;
            }
        }
    }
}

async fn dial(peer: &PeerAddr, my_rank: Rank) -> Result<(Rank, TcpStream)> {
    let mut stream = TcpStream::connect((peer.host.as_str(), peer.port))
        .await
        .map_err(|e| {
            HierSyncError::transport_with_source(
                format!("connect to rank {} at {}:{}", peer.rank, peer.host, peer.port),
                e,
            )
        })?;
    stream.write_all(&my_rank.to_le_bytes()).await?;
    Ok((peer.rank, stream))
}

async fn accept(listener: &TcpListener) -> Result<(Rank, TcpStream)> {
    let (mut stream, _) = listener.accept().await?;
    let mut rank = [0u8; 4];
    stream.read_exact(&mut rank).await?;
    Ok((Rank::from_le_bytes(rank), stream))
}

async fn recv_loop(peer: Rank, mut reader: OwnedReadHalf, inbox: Arc<Inbox>) {
    let mut header = [0u8; HEADER_BYTES];
    loop {
        if let Err(e) = reader.read_exact(&mut header).await {
            tracing::debug!(peer, "tcp recv loop ended: {e}");
            break;
        }
        let group = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let mut tag = [0u8; 8];
        tag.copy_from_slice(&header[4..12]);
        let mut len = [0u8; 8];
        len.copy_from_slice(&header[12..]);
        let len = u64::from_le_bytes(len);
        if len > MAX_FRAME_BYTES {
            tracing::warn!(peer, len, "tcp frame too large, closing connection");
            break;
        }
        let mut payload = vec![0u8; len as usize];
        if let Err(e) = reader.read_exact(&mut payload).await {
            tracing::warn!(peer, "tcp recv loop ended reading payload: {e}");
            break;
        }
        let key = MessageKey {
            group,
            tag: u64::from_le_bytes(tag),
        };
        inbox.deliver(peer, key, payload);
    }
    // Peer is gone: fail its receivers instead of leaving them to time out.
    inbox.disconnect(peer);
}

impl PeerTransport for TcpTransport {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn world_size(&self) -> u32 {
        self.world_size
    }

    fn send<'a>(&'a self, dest: Rank, key: MessageKey, payload: Vec<u8>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if dest == self.rank {
                self.inbox.deliver(self.rank, key, payload);
                return Ok(());
            }
            self.write_frame(dest, key, &payload).await
        })
    }

    fn recv<'a>(&'a self, src: Rank, key: MessageKey) -> BoxFuture<'a, Result<Vec<u8>>> {
        Box::pin(async move {
            if src >= self.world_size {
                return Err(HierSyncError::InvalidRank {
                    rank: src,
                    size: self.world_size,
                });
            }
            self.inbox.take(src, key).await
        })
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        for task in &self.recv_tasks {
            task.abort();
        }
    }
}
