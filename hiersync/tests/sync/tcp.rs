use std::sync::Arc;
use std::time::Duration;

use hiersync::{Backend, CommHook, LaunchEnv, ProcessContext, SyncConfig};

use super::helpers::config;

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_hierarchical_reduce_over_tcp_mesh() {
    let sync = SyncConfig {
        master_addr: "127.0.0.1".into(),
        master_port: free_port(),
        advertise_host: Some("127.0.0.1".into()),
        rendezvous_timeout: Duration::from_secs(10),
        collective_timeout: Duration::from_secs(10),
        ..SyncConfig::default()
    };
    let world = 4u32;
    let mut tasks = Vec::new();
    for rank in 0..world {
        let sync = sync.clone();
        tasks.push(tokio::spawn(async move {
            let ctx = Arc::new(ProcessContext::new(
                config(),
                LaunchEnv::orchestrated(rank, world, 2),
                sync,
            ));
            assert_eq!(ctx.backend(), Backend::Gloo);
            ctx.init_distributed().await.unwrap();

            let hook = ctx.hierarchical_hook().unwrap();
            let buf: Vec<f32> = (0..10).map(|i| (rank * 10 + i) as f32).collect();
            let out = hook.reduce(buf).wait().await.unwrap();
            // Keep the mesh up until every rank is done reading.
            ctx.barrier().await.unwrap();
            (out, ctx)
        }));
    }

    let mut contexts = Vec::new();
    for task in tasks {
        let (out, ctx) = task.await.unwrap();
        // Mean over ranks of rank * 10 + i.
        let expected: Vec<f32> = (0..10).map(|i| 15.0 + i as f32).collect();
        assert_eq!(out, expected);
        assert_eq!(ctx.comm_timer().completed(), 1);
        contexts.push(ctx);
    }
    assert_eq!(contexts.len(), 4);
}
