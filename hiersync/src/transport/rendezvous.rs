//! Rank-0 rendezvous: every rank announces the address of its mesh listener
//! to rank 0, which answers with the full address table once all ranks
//! have joined.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::error::{HierSyncError, Result};
use crate::types::Rank;

/// Largest rendezvous frame accepted (the address table of a large run).
const MAX_FRAME: u32 = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct PeerAddr {
    pub rank: Rank,
    pub host: String,
    pub port: u16,
}

async fn write_json<T: Serialize>(stream: &mut TcpStream, value: &T) -> Result<()> {
    let body = serde_json::to_vec(value)?;
    stream.write_all(&(body.len() as u32).to_le_bytes()).await?;
    stream.write_all(&body).await?;
    stream.flush().await?;
    Ok(())
}

async fn read_json<T: for<'de> Deserialize<'de>>(stream: &mut TcpStream) -> Result<T> {
    let mut len = [0u8; 4];
    stream.read_exact(&mut len).await?;
    let len = u32::from_le_bytes(len);
    if len > MAX_FRAME {
        return Err(HierSyncError::transport(format!(
            "rendezvous frame of {len} bytes exceeds limit"
        )));
    }
    let mut body = vec![0u8; len as usize];
    stream.read_exact(&mut body).await?;
    Ok(serde_json::from_slice(&body)?)
}

/// Rank 0 side: collect one announcement per rank, then reply to all.
pub(crate) async fn serve(
    listener: TcpListener,
    me: PeerAddr,
    world_size: u32,
    timeout: Duration,
) -> Result<Vec<PeerAddr>> {
    let mut table: Vec<Option<PeerAddr>> = vec![None; world_size as usize];
    table[0] = Some(me);
    let mut joined = Vec::with_capacity(world_size as usize - 1);

    let deadline = tokio::time::Instant::now() + timeout;
    while joined.len() + 1 < world_size as usize {
        let (mut stream, from) = tokio::select! {
            accepted = listener.accept() => accepted?,
            _ = tokio::time::sleep_until(deadline) => {
                return Err(HierSyncError::transport(format!(
                    "rendezvous timed out: {}/{world_size} ranks joined",
                    joined.len() + 1
                )));
            }
        };
        let addr: PeerAddr = read_json(&mut stream).await?;
        let slot = table
            .get_mut(addr.rank as usize)
            .ok_or(HierSyncError::InvalidRank {
                rank: addr.rank,
                size: world_size,
            })?;
        if slot.is_some() {
            return Err(HierSyncError::configuration(format!(
                "rank {} joined the rendezvous twice (second time from {from})",
                addr.rank
            )));
        }
        tracing::debug!(rank = addr.rank, host = %addr.host, port = addr.port, "rank joined rendezvous");
        *slot = Some(addr);
        joined.push(stream);
    }

    let table: Vec<PeerAddr> = table.into_iter().flatten().collect();
    for stream in &mut joined {
        write_json(stream, &table).await?;
    }
    Ok(table)
}

/// Non-zero rank side: announce ourselves to rank 0 (retrying until it is
/// up) and wait for the address table.
pub(crate) async fn join(master: &str, me: PeerAddr, timeout: Duration) -> Result<Vec<PeerAddr>> {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut stream = loop {
        match TcpStream::connect(master).await {
            Ok(s) => break s,
            Err(e) if tokio::time::Instant::now() < deadline => {
                tracing::debug!(master, "rendezvous not reachable yet: {e}");
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
            Err(e) => {
                return Err(HierSyncError::transport_with_source(
                    format!("could not reach rendezvous at {master}"),
                    e,
                ));
            }
        }
    };
    write_json(&mut stream, &me).await?;
    let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
    match tokio::time::timeout(remaining, read_json(&mut stream)).await {
        Ok(table) => table,
        Err(_) => Err(HierSyncError::transport(
            "timed out waiting for the rendezvous address table",
        )),
    }
}
