use std::sync::Arc;

use hiersync::{CommHook, HandleGroup, ProcessContext};

use super::helpers::run_ranks;

fn assert_close(got: &[f32], want: &[f32]) {
    assert_eq!(got.len(), want.len());
    for (i, (g, w)) in got.iter().zip(want).enumerate() {
        assert!((g - w).abs() <= 1e-6, "element {i}: got {g}, want {w}");
    }
}

async fn hierarchical(ctx: Arc<ProcessContext>, buf: Vec<f32>) -> Vec<f32> {
    ctx.hierarchical_hook().unwrap().reduce(buf).wait().await.unwrap()
}

#[tokio::test]
async fn test_two_nodes_of_four_average_rank_values() {
    let results = run_ranks(2, 4, |ctx| async move {
        let rank = ctx.rank().unwrap();
        hierarchical(ctx, vec![rank as f32; 16]).await
    })
    .await;
    for out in results {
        assert_close(&out, &[3.5; 16]);
    }
}

#[tokio::test]
async fn test_fractional_values_match_mean() {
    let world = 6u32;
    let value = |rank: u32, i: usize| ((rank as f32 + 1.0) * 0.37 - i as f32 * 0.011).sin();
    let results = run_ranks(3, 2, move |ctx| async move {
        let rank = ctx.rank().unwrap();
        let buf: Vec<f32> = (0..37).map(|i| value(rank, i)).collect();
        hierarchical(ctx, buf).await
    })
    .await;
    let expected: Vec<f32> = (0..37)
        .map(|i| (0..world).map(|r| value(r, i)).sum::<f32>() / world as f32)
        .collect();
    for out in &results {
        assert_close(out, &expected);
    }
}

#[tokio::test]
async fn test_every_rank_gets_identical_result() {
    let results = run_ranks(2, 3, |ctx| async move {
        let rank = ctx.rank().unwrap();
        let buf: Vec<f32> = (0..11).map(|i| (rank * 7 + i) as f32 / 3.0).collect();
        hierarchical(ctx, buf).await
    })
    .await;
    for out in &results[1..] {
        assert_eq!(out, &results[0]);
    }
}

#[tokio::test]
async fn test_single_rank_per_node_matches_flat() {
    let results = run_ranks(4, 1, |ctx| async move {
        let rank = ctx.rank().unwrap() as f32;
        let buf = vec![rank, rank * 2.0, -rank];
        let hier = hierarchical(Arc::clone(&ctx), buf.clone()).await;
        let flat = ctx.flat_hook().unwrap().reduce(buf).wait().await.unwrap();
        (hier, flat)
    })
    .await;
    for (hier, flat) in results {
        assert_close(&hier, &flat);
        assert_close(&hier, &[1.5, 3.0, -1.5]);
    }
}

#[tokio::test]
async fn test_single_node_matches_flat() {
    let results = run_ranks(1, 4, |ctx| async move {
        let lead = ctx.topology().unwrap().is_lead();
        assert_eq!(ctx.build_hierarchy().unwrap().leaders.is_some(), lead);
        let rank = ctx.rank().unwrap() as f32;
        let buf = vec![rank + 0.25; 5];
        let hier = hierarchical(Arc::clone(&ctx), buf.clone()).await;
        let flat = ctx.flat_hook().unwrap().reduce(buf).wait().await.unwrap();
        (hier, flat)
    })
    .await;
    for (hier, flat) in results {
        assert_close(&hier, &flat);
        assert_close(&hier, &[1.75; 5]);
    }
}

#[tokio::test]
async fn test_concurrent_buffers() {
    let results = run_ranks(2, 2, |ctx| async move {
        let rank = ctx.rank().unwrap() as f32;
        let hook = ctx.hierarchical_hook().unwrap();
        let mut pending = HandleGroup::new();
        for b in 0..6 {
            let len = 3 + b * 5;
            pending.push(hook.reduce(vec![rank * (b as f32 + 1.0); len]));
        }
        pending.wait_all().await.unwrap()
    })
    .await;
    for outs in results {
        assert_eq!(outs.len(), 6);
        for (b, out) in outs.iter().enumerate() {
            // Mean of rank * (b + 1) over ranks 0..4.
            assert_close(out, &vec![1.5 * (b as f32 + 1.0); 3 + b * 5]);
        }
    }
}

#[tokio::test]
async fn test_empty_buffer() {
    let results = run_ranks(2, 2, |ctx| async move { hierarchical(ctx, Vec::new()).await }).await;
    assert!(results.iter().all(Vec::is_empty));
}

#[tokio::test]
async fn test_reduce_in_place_updates_borrowed_buffer() {
    let results = run_ranks(2, 2, |ctx| async move {
        let hook = ctx.hierarchical_hook().unwrap();
        let mut grads = [ctx.rank().unwrap() as f32; 4];
        hook.reduce_in_place(&mut grads).await.unwrap();
        grads
    })
    .await;
    for grads in results {
        assert_eq!(grads, [1.5; 4]);
    }
}
