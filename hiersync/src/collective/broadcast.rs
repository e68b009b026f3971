use futures::future::try_join_all;

use crate::collective::helpers::OpContext;
use crate::error::{HierSyncError, Result};
use crate::reduce::encode;
use crate::types::Rank;

/// Below this group size the root sends to everyone directly.
const TREE_BROADCAST_THRESHOLD: u32 = 4;

/// Broadcast `buf` from `root` to every group member.
///
/// Small groups use a flat fan-out from the root; larger groups a binary
/// tree rooted at `root`.
pub(crate) async fn tree_broadcast(ctx: &OpContext, buf: &mut [f32], root: Rank) -> Result<()> {
    let world = ctx.size();
    if root >= world {
        return Err(HierSyncError::InvalidRank { rank: root, size: world });
    }
    if world <= 1 {
        return Ok(());
    }
    if world < TREE_BROADCAST_THRESHOLD {
        return flat_broadcast(ctx, buf, root).await;
    }

    // Remap ranks so root becomes logical rank 0.
    let logical = (ctx.rank + world - root) % world;
    let physical = |l: Rank| (l + root) % world;

    if logical != 0 {
        let parent = physical((logical - 1) / 2);
        ctx.recv_into(parent, buf, "broadcast").await?;
    }

    let payload = encode(buf);
    let sends = [2 * logical + 1, 2 * logical + 2]
        .into_iter()
        .filter(|&child| child < world)
        .map(|child| ctx.send(physical(child), payload.clone(), "broadcast"));
    try_join_all(sends).await?;
    Ok(())
}

async fn flat_broadcast(ctx: &OpContext, buf: &mut [f32], root: Rank) -> Result<()> {
    if ctx.rank == root {
        let payload = encode(buf);
        let sends = (0..ctx.size())
            .filter(|&r| r != root)
            .map(|r| ctx.send(r, payload.clone(), "broadcast"));
        try_join_all(sends).await?;
    } else {
        ctx.recv_into(root, buf, "broadcast").await?;
    }
    Ok(())
}
