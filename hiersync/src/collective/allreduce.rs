use crate::collective::helpers::{ChunkLayout, OpContext};
use crate::error::Result;
use crate::reduce::{decode_into, encode, reduce_into};
use crate::types::ReduceOp;

/// Ring all-reduce: in-place reduce across all group members.
///
/// 1. Scatter-reduce: N-1 rounds. Each rank sends one chunk to the next rank
///    and receives one chunk from the previous rank, reducing in place.
/// 2. Allgather: N-1 rounds circulating the fully reduced chunks.
pub(crate) async fn ring_allreduce(ctx: &OpContext, buf: &mut [f32], op: ReduceOp) -> Result<()> {
    let world = ctx.size() as usize;
    if world <= 1 {
        return Ok(());
    }
    let rank = ctx.rank as usize;
    let layout = ChunkLayout::new(buf.len(), world);
    let next = ((rank + 1) % world) as u32;
    let prev = ((rank + world - 1) % world) as u32;

    for step in 0..world - 1 {
        let send_idx = (rank + world - step) % world;
        let recv_idx = (rank + world - step - 1) % world;
        let outgoing = encode(&buf[layout.range(send_idx)]);
        let (_, received) = tokio::try_join!(
            ctx.send(next, outgoing, "allreduce"),
            ctx.recv(prev, "allreduce"),
        )?;
        reduce_into(&mut buf[layout.range(recv_idx)], &received, op)?;
    }

    for step in 0..world - 1 {
        let send_idx = (rank + world + 1 - step) % world;
        let recv_idx = (rank + world - step) % world;
        let outgoing = encode(&buf[layout.range(send_idx)]);
        let (_, received) = tokio::try_join!(
            ctx.send(next, outgoing, "allreduce"),
            ctx.recv(prev, "allreduce"),
        )?;
        decode_into(&mut buf[layout.range(recv_idx)], &received)?;
    }

    Ok(())
}
