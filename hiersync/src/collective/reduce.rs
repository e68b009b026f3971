use crate::collective::helpers::OpContext;
use crate::error::{HierSyncError, Result};
use crate::reduce::encode;
use crate::types::{Rank, ReduceOp};

/// Tree reduce: reduce `buf` from every group member into `root`.
///
/// Uses a binomial tree with O(log N) steps. Non-power-of-2 group sizes are
/// handled by first folding the excess ranks into the lower power-of-2 set.
/// Only `root`'s buffer holds the result afterwards; the others hold partial
/// sums.
pub(crate) async fn tree_reduce(
    ctx: &OpContext,
    buf: &mut [f32],
    op: ReduceOp,
    root: Rank,
) -> Result<()> {
    let world = ctx.size() as usize;
    if root as usize >= world {
        return Err(HierSyncError::InvalidRank {
            rank: root,
            size: ctx.size(),
        });
    }
    if world <= 1 {
        return Ok(());
    }

    let rank = ctx.rank as usize;
    let root = root as usize;
    let vrank = (rank + world - root) % world;
    let physical = |v: usize| ((v + root) % world) as Rank;

    let p2 = if world.is_power_of_two() {
        world
    } else {
        world.next_power_of_two() >> 1
    };
    let excess = world - p2;

    if vrank < excess {
        ctx.recv_reduce(physical(vrank + p2), buf, op, "reduce").await?;
    } else if vrank >= p2 {
        return ctx.send(physical(vrank - p2), encode(buf), "reduce").await;
    }

    for round in 0..p2.trailing_zeros() {
        let mask = 1usize << round;
        let partner = physical(vrank ^ mask);
        if vrank & mask != 0 {
            ctx.send(partner, encode(buf), "reduce").await?;
            break;
        }
        ctx.recv_reduce(partner, buf, op, "reduce").await?;
    }

    Ok(())
}
