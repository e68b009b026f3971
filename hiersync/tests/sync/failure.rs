use std::sync::Arc;
use std::time::Duration;

use hiersync::{CommHook, HierSyncError, ReductionStage, SyncConfig};

use super::helpers::{Recorder, instrumented_hook, run_ranks, run_ranks_with};

#[tokio::test]
async fn test_local_reduce_failure_skips_later_stages() {
    let recorder = Arc::new(Recorder::default());
    let rec = Arc::clone(&recorder);
    let results = run_ranks(1, 2, move |ctx| {
        let rec = Arc::clone(&rec);
        async move {
            let hook = instrumented_hook(&ctx, &rec, |g| g.fail = Some("reduce"));
            let out = hook.reduce(vec![1.0; 8]).wait().await;
            (out, ctx.comm_timer().completed())
        }
    })
    .await;

    for (rank, (out, completed)) in results.into_iter().enumerate() {
        let err = out.unwrap_err();
        assert_eq!(err.stage(), Some(ReductionStage::LocalReduce));
        match err {
            HierSyncError::Reduction {
                rank: r,
                node_index,
                group,
                reason,
                ..
            } => {
                assert_eq!(r, rank as u32);
                assert_eq!(node_index, 0);
                assert_eq!(group, vec![0, 1]);
                assert!(reason.contains("injected reduce failure"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(completed, 0);
    }
    assert!(recorder.records().iter().all(|r| r.op == "reduce"));
}

#[tokio::test]
async fn test_leader_failure_reaches_every_rank() {
    let sync = SyncConfig {
        collective_timeout: Duration::from_millis(300),
        ..SyncConfig::default()
    };
    let recorder = Arc::new(Recorder::default());
    let rec = Arc::clone(&recorder);
    let results = run_ranks_with(2, 2, sync, move |ctx| {
        let rec = Arc::clone(&rec);
        async move {
            let lead = ctx.topology().unwrap().is_lead();
            let hook = instrumented_hook(&ctx, &rec, |g| {
                if lead {
                    g.fail = Some("all_reduce");
                }
            });
            hook.reduce(vec![1.0; 8]).wait().await
        }
    })
    .await;

    for (rank, out) in results.into_iter().enumerate() {
        let err = out.unwrap_err();
        if rank % 2 == 0 {
            assert_eq!(err.stage(), Some(ReductionStage::LeaderAllreduce), "rank {rank}");
            match err {
                HierSyncError::Reduction { node_index, group, .. } => {
                    assert_eq!(node_index, rank as u32 / 2);
                    assert_eq!(group, vec![0, 2]);
                }
                other => panic!("unexpected error: {other}"),
            }
        } else {
            // Members never hear from their leader and time out.
            assert_eq!(err.stage(), Some(ReductionStage::Broadcast), "rank {rank}");
        }
    }
    let records = recorder.records();
    assert!(
        !records
            .iter()
            .any(|r| r.op == "broadcast" && (r.rank == 0 || r.rank == 2))
    );
}

#[tokio::test]
async fn test_failure_on_one_buffer_leaves_next_intact() {
    let results = run_ranks(2, 2, |ctx| async move {
        let recorder = Arc::new(Recorder::default());
        let failing = instrumented_hook(&ctx, &recorder, |g| g.fail = Some("reduce"));
        assert!(failing.reduce(vec![1.0; 4]).wait().await.is_err());

        let hook = ctx.hierarchical_hook().unwrap();
        hook.reduce(vec![ctx.rank().unwrap() as f32; 4]).wait().await.unwrap()
    })
    .await;
    for out in results {
        assert_eq!(out, vec![1.5; 4]);
    }
}
