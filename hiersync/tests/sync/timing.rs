use std::sync::Arc;
use std::time::{Duration, Instant};

use hiersync::CommHook;

use super::helpers::{Recorder, instrumented_hook, run_ranks};

#[tokio::test]
async fn test_counter_is_non_decreasing() {
    let results = run_ranks(2, 2, |ctx| async move {
        let hook = ctx.hierarchical_hook().unwrap();
        let mut readings = vec![ctx.cumulative_comm_time_seconds()];
        for step in 0..5 {
            hook.reduce(vec![step as f32; 64]).wait().await.unwrap();
            readings.push(ctx.cumulative_comm_time_seconds());
        }
        (readings, ctx.comm_timer().completed())
    })
    .await;
    for (readings, completed) in results {
        assert_eq!(readings[0], 0.0);
        assert!(readings.windows(2).all(|w| w[0] <= w[1]), "{readings:?}");
        assert_eq!(completed, 5);
    }
}

#[tokio::test]
async fn test_increment_covers_pipeline_span() {
    let delay = Duration::from_millis(20);
    let results = run_ranks(2, 2, move |ctx| async move {
        let recorder = Arc::new(Recorder::default());
        let hook = instrumented_hook(&ctx, &recorder, |g| g.delay = Some(("reduce", delay)));
        let before = ctx.comm_timer().cumulative();
        let issued = Instant::now();
        hook.reduce(vec![1.0; 32]).wait().await.unwrap();
        let awaited = issued.elapsed();
        (ctx.comm_timer().cumulative() - before, awaited)
    })
    .await;
    for (increment, awaited) in results {
        assert!(increment >= delay, "{increment:?}");
        assert!(increment <= awaited, "{increment:?} > {awaited:?}");
    }
}

#[tokio::test]
async fn test_concurrent_reductions_each_counted() {
    let results = run_ranks(1, 2, |ctx| async move {
        let hook = ctx.hierarchical_hook().unwrap();
        let a = hook.reduce(vec![1.0; 8]);
        let b = hook.reduce(vec![2.0; 8]);
        a.wait().await.unwrap();
        b.wait().await.unwrap();
        ctx.comm_timer().completed()
    })
    .await;
    assert_eq!(results, vec![2, 2]);
}

#[tokio::test]
async fn test_flat_and_hierarchical_share_counter() {
    let results = run_ranks(2, 1, |ctx| async move {
        ctx.hierarchical_hook().unwrap().reduce(vec![1.0]).wait().await.unwrap();
        let after_hier = ctx.cumulative_comm_time_seconds();
        ctx.flat_hook().unwrap().reduce(vec![1.0]).wait().await.unwrap();
        (after_hier, ctx.cumulative_comm_time_seconds(), ctx.comm_timer().completed())
    })
    .await;
    for (after_hier, after_flat, completed) in results {
        assert!(after_hier <= after_flat);
        assert_eq!(completed, 2);
    }
}
