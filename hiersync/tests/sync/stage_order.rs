use std::sync::Arc;
use std::time::Duration;

use hiersync::CommHook;

use super::helpers::{Phase, Recorder, instrumented_hook, run_ranks};

const LEN: usize = 12;

#[tokio::test]
async fn test_stages_run_in_order() {
    let recorder = Arc::new(Recorder::default());
    let rec = Arc::clone(&recorder);
    let results = run_ranks(2, 2, move |ctx| {
        let rec = Arc::clone(&rec);
        async move {
            let hook = instrumented_hook(&ctx, &rec, |_| {});
            let rank = ctx.rank().unwrap() as f32;
            hook.reduce(vec![rank; LEN]).wait().await.unwrap()
        }
    })
    .await;
    for out in results {
        assert_eq!(out, vec![1.5; LEN]);
    }

    let at = |rank, op, phase| recorder.find(rank, LEN, op, phase).unwrap();
    for leader in [0, 2] {
        assert!(at(leader, "reduce", Phase::Finish) <= at(leader, "all_reduce", Phase::Start));
        assert!(at(leader, "all_reduce", Phase::Start) <= at(leader, "all_reduce", Phase::Finish));
        assert!(at(leader, "all_reduce", Phase::Finish) <= at(leader, "broadcast", Phase::Start));
    }
    for (member, leader) in [(1, 0), (3, 2)] {
        assert!(recorder.find(member, LEN, "all_reduce", Phase::Start).is_none());
        assert!(at(member, "reduce", Phase::Finish) <= at(member, "broadcast", Phase::Start));
        // A member's broadcast can only complete once its leader has the
        // cross-node sum.
        assert!(at(leader, "all_reduce", Phase::Finish) <= at(member, "broadcast", Phase::Finish));
    }
}

#[tokio::test]
async fn test_members_wait_for_slow_leader_stage() {
    let recorder = Arc::new(Recorder::default());
    let rec = Arc::clone(&recorder);
    run_ranks(2, 2, move |ctx| {
        let rec = Arc::clone(&rec);
        async move {
            let hook = instrumented_hook(&ctx, &rec, |g| {
                g.delay = Some(("all_reduce", Duration::from_millis(40)));
            });
            hook.reduce(vec![1.0; LEN]).wait().await.unwrap()
        }
    })
    .await;

    for (member, leader) in [(1, 0), (3, 2)] {
        let leader_started = recorder.find(leader, LEN, "all_reduce", Phase::Start).unwrap();
        let member_done = recorder.find(member, LEN, "broadcast", Phase::Finish).unwrap();
        assert!(member_done.duration_since(leader_started) >= Duration::from_millis(40));
    }
}

#[tokio::test]
async fn test_single_node_skips_leader_stage() {
    let recorder = Arc::new(Recorder::default());
    let rec = Arc::clone(&recorder);
    run_ranks(1, 3, move |ctx| {
        let rec = Arc::clone(&rec);
        async move {
            let hook = instrumented_hook(&ctx, &rec, |_| {});
            hook.reduce(vec![2.0; LEN]).wait().await.unwrap()
        }
    })
    .await;
    let records = recorder.records();
    assert!(records.iter().all(|r| r.op != "all_reduce"));
    assert_eq!(records.iter().filter(|r| r.op == "broadcast").count(), 6);
}

#[tokio::test]
async fn test_single_rank_nodes_skip_local_stages() {
    let recorder = Arc::new(Recorder::default());
    let rec = Arc::clone(&recorder);
    run_ranks(3, 1, move |ctx| {
        let rec = Arc::clone(&rec);
        async move {
            let hook = instrumented_hook(&ctx, &rec, |_| {});
            hook.reduce(vec![2.0; LEN]).wait().await.unwrap()
        }
    })
    .await;
    let records = recorder.records();
    assert!(records.iter().all(|r| r.op == "all_reduce"));
    assert_eq!(records.len(), 6);
}
