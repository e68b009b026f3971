use hiersync::{Backend, CommHook, HierSyncError, LocalTransport, bootstrap_local};

use super::helpers::{config, run_ranks};

#[test]
fn test_bootstrap_local_layout() {
    let contexts = bootstrap_local(2, 3, &config()).unwrap();
    assert_eq!(contexts.len(), 6);
    for (rank, ctx) in contexts.iter().enumerate() {
        let topo = ctx.topology().unwrap();
        assert_eq!(topo.rank(), rank as u32);
        assert_eq!(topo.local_rank(), rank as u32 % 3);
        assert_eq!(topo.node_index(), rank as u32 / 3);
        assert!(ctx.is_initialized());
        assert_eq!(ctx.backend(), Backend::Gloo);
        assert_eq!(ctx.is_rank_zero(), rank == 0);
    }
}

#[test]
fn test_bootstrap_local_rejects_empty_layout() {
    assert!(bootstrap_local(0, 4, &config()).is_err());
    assert!(bootstrap_local(2, 0, &config()).is_err());
}

#[tokio::test]
async fn test_hierarchy_groups_per_rank() {
    let results = run_ranks(2, 2, |ctx| async move {
        let h = ctx.build_hierarchy().unwrap();
        (
            h.local.members().to_vec(),
            h.leaders.as_ref().map(|g| g.members().to_vec()),
        )
    })
    .await;
    assert_eq!(
        results,
        vec![
            (vec![0, 1], Some(vec![0, 2])),
            (vec![0, 1], None),
            (vec![2, 3], Some(vec![0, 2])),
            (vec![2, 3], None),
        ]
    );
}

#[tokio::test]
async fn test_hook_builds_hierarchy_once() {
    run_ranks(2, 2, |ctx| async move {
        let first = ctx.hierarchical_hook().unwrap();
        let local_id = ctx.hierarchy().unwrap().local.id();
        let second = ctx.hierarchical_hook().unwrap();
        assert_eq!(ctx.hierarchy().unwrap().local.id(), local_id);
        assert_eq!(first.topology(), second.topology());
        second.reduce(vec![1.0; 3]).wait().await.unwrap();
    })
    .await;
}

#[tokio::test]
async fn test_barrier_across_ranks() {
    let results = run_ranks(2, 2, |ctx| async move {
        ctx.barrier().await.unwrap();
        ctx.barrier().await.is_ok()
    })
    .await;
    assert!(results.into_iter().all(|ok| ok));
}

#[tokio::test]
async fn test_reload_keeps_comm_time() {
    let mut ctx = bootstrap_local(1, 1, &config()).unwrap().remove(0);
    ctx.hierarchical_hook().unwrap().reduce(vec![1.0]).wait().await.unwrap();
    let before = ctx.cumulative_comm_time_seconds();

    ctx.reload(config());
    assert!(!ctx.is_initialized());
    assert!(matches!(ctx.hierarchical_hook(), Err(HierSyncError::Configuration { .. })));
    assert_eq!(ctx.cumulative_comm_time_seconds(), before);

    ctx.init_distributed_with(LocalTransport::mesh(1).remove(0)).unwrap();
    let out = ctx.hierarchical_hook().unwrap().reduce(vec![5.0]).wait().await.unwrap();
    assert_eq!(out, vec![5.0]);
    assert_eq!(ctx.comm_timer().completed(), 2);
}
