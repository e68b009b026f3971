use crate::collective::helpers::{OpContext, ceil_log2};
use crate::error::Result;

/// Dissemination barrier: in round `k` every rank signals `rank + 2^k` and
/// waits for `rank - 2^k`. Completes in ceil(log2 N) rounds.
pub(crate) async fn dissemination_barrier(ctx: &OpContext) -> Result<()> {
    let n = ctx.size();
    if n <= 1 {
        return Ok(());
    }
    for round in 0..ceil_log2(n) {
        let dist = 1u32 << round;
        let to = (ctx.rank + dist) % n;
        let from = (ctx.rank + n - dist) % n;
        tokio::try_join!(
            ctx.send(to, vec![round as u8], "barrier"),
            ctx.recv(from, "barrier"),
        )?;
    }
    Ok(())
}
