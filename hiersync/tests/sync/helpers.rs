use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use hiersync::{
    AsyncHandle, Collectives, HierSyncError, HierarchicalAllReduce, LaunchEnv, LocalTransport, ProcessContext,
    ProcessGroup, Rank, ReduceOp, RunConfig, SyncConfig, bootstrap_local,
};

pub const CONFIG_YAML: &str = "
device: cpu
opt: {name: lamb, betas: [0.9, 0.999], weight_decay: 0.01}
lr_schedule: {base_lr: 0.0004, total_steps: 1000, lr_warmup_steps: 100, start_warmup_step: 0}
data: {global_batch_size: 256}
training: {benchmark: false}
";

pub fn config() -> RunConfig {
    RunConfig::from_yaml_str(CONFIG_YAML).unwrap()
}

/// Run `f` once per rank of an in-process `num_nodes` x `per_node` cluster
/// and return the results indexed by global rank. Keeps every context alive
/// until all tasks complete.
pub async fn run_ranks<F, Fut, T>(num_nodes: u32, per_node: u32, f: F) -> Vec<T>
where
    F: Fn(Arc<ProcessContext>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let contexts = bootstrap_local(num_nodes, per_node, &config()).unwrap();
    spawn_all(contexts, f).await
}

/// Like [`run_ranks`] with explicit sync tuning, e.g. a short collective
/// timeout for tests where a peer never answers.
pub async fn run_ranks_with<F, Fut, T>(num_nodes: u32, per_node: u32, sync: SyncConfig, f: F) -> Vec<T>
where
    F: Fn(Arc<ProcessContext>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let world_size = num_nodes * per_node;
    let contexts = LocalTransport::mesh(world_size)
        .into_iter()
        .enumerate()
        .map(|(rank, transport)| {
            let launch = LaunchEnv::orchestrated(rank as u32, world_size, per_node);
            let ctx = ProcessContext::new(config(), launch, sync.clone());
            ctx.init_distributed_with(transport).unwrap();
            ctx
        })
        .collect();
    spawn_all(contexts, f).await
}

async fn spawn_all<F, Fut, T>(contexts: Vec<ProcessContext>, f: F) -> Vec<T>
where
    F: Fn(Arc<ProcessContext>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let contexts: Vec<Arc<ProcessContext>> = contexts.into_iter().map(Arc::new).collect();
    let f = Arc::new(f);
    let mut handles = Vec::new();
    for ctx in &contexts {
        let ctx = Arc::clone(ctx);
        let f = Arc::clone(&f);
        handles.push(tokio::spawn(async move { f(ctx).await }));
    }
    let mut out = Vec::with_capacity(handles.len());
    for h in handles {
        out.push(h.await.unwrap());
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Start,
    Finish,
}

#[derive(Debug, Clone)]
pub struct OpRecord {
    /// Global rank that issued the operation.
    pub rank: Rank,
    /// Buffer length; tests give every buffer a distinct length.
    pub len: usize,
    pub op: &'static str,
    pub phase: Phase,
    pub at: Instant,
}

#[derive(Default)]
pub struct Recorder {
    records: Mutex<Vec<OpRecord>>,
}

impl Recorder {
    fn push(&self, rank: Rank, len: usize, op: &'static str, phase: Phase) {
        self.records.lock().unwrap().push(OpRecord {
            rank,
            len,
            op,
            phase,
            at: Instant::now(),
        });
    }

    pub fn records(&self) -> Vec<OpRecord> {
        self.records.lock().unwrap().clone()
    }

    /// Instant of `op`/`phase` for `rank` on the buffer of length `len`.
    pub fn find(&self, rank: Rank, len: usize, op: &str, phase: Phase) -> Option<Instant> {
        self.records()
            .into_iter()
            .find(|r| r.rank == rank && r.len == len && r.op == op && r.phase == phase)
            .map(|r| r.at)
    }
}

/// Wraps a real group, recording when each operation is issued and when it
/// completes. Can inject failures and delays per operation name.
pub struct Instrumented {
    pub inner: ProcessGroup,
    pub recorder: Arc<Recorder>,
    pub fail: Option<&'static str>,
    pub delay: Option<(&'static str, Duration)>,
}

impl Instrumented {
    pub fn new(inner: ProcessGroup, recorder: Arc<Recorder>) -> Self {
        Self {
            inner,
            recorder,
            fail: None,
            delay: None,
        }
    }

    fn wrap(
        &self,
        op: &'static str,
        len: usize,
        issue: impl FnOnce() -> AsyncHandle<Vec<f32>>,
    ) -> AsyncHandle<Vec<f32>> {
        let rank = self.inner.global_rank();
        self.recorder.push(rank, len, op, Phase::Start);
        if self.fail == Some(op) {
            return AsyncHandle::failed(HierSyncError::transport(format!("injected {op} failure")));
        }
        let recorder = Arc::clone(&self.recorder);
        let mut handle = issue();
        if let Some((delayed, by)) = self.delay
            && delayed == op
        {
            handle = handle.and_then(move |buf| {
                AsyncHandle::spawn(async move {
                    tokio::time::sleep(by).await;
                    Ok(buf)
                })
            });
        }
        handle.then(move |r| {
            recorder.push(rank, len, op, Phase::Finish);
            r
        })
    }
}

impl Collectives for Instrumented {
    fn rank(&self) -> Rank {
        self.inner.rank()
    }

    fn size(&self) -> u32 {
        self.inner.size()
    }

    fn members(&self) -> &[Rank] {
        self.inner.members()
    }

    fn next_tag(&self) -> u64 {
        Collectives::next_tag(&self.inner)
    }

    fn reduce_tagged(&self, tag: u64, buf: Vec<f32>, root: Rank, op: ReduceOp) -> AsyncHandle<Vec<f32>> {
        let len = buf.len();
        self.wrap("reduce", len, || self.inner.reduce_tagged(tag, buf, root, op))
    }

    fn all_reduce_tagged(&self, tag: u64, buf: Vec<f32>, op: ReduceOp) -> AsyncHandle<Vec<f32>> {
        let len = buf.len();
        self.wrap("all_reduce", len, || self.inner.all_reduce_tagged(tag, buf, op))
    }

    fn broadcast_tagged(&self, tag: u64, buf: Vec<f32>, root: Rank) -> AsyncHandle<Vec<f32>> {
        let len = buf.len();
        self.wrap("broadcast", len, || self.inner.broadcast_tagged(tag, buf, root))
    }
}

/// Hierarchical hook over `ctx`'s hierarchy with every group wrapped in an
/// [`Instrumented`] reporting to `recorder`. `tweak` configures each wrapper.
pub fn instrumented_hook(
    ctx: &ProcessContext,
    recorder: &Arc<Recorder>,
    tweak: impl Fn(&mut Instrumented),
) -> HierarchicalAllReduce {
    let topo = ctx.topology().unwrap();
    let hierarchy = ctx.build_hierarchy().unwrap();
    let wrap = |group: ProcessGroup| {
        let mut g = Instrumented::new(group, Arc::clone(recorder));
        tweak(&mut g);
        Arc::new(g)
    };
    let local: Arc<dyn Collectives> = wrap(hierarchy.local.clone());
    let leaders = if topo.is_single_node() {
        None
    } else {
        hierarchy
            .leaders
            .clone()
            .map(|g| wrap(g) as Arc<dyn Collectives>)
    };
    HierarchicalAllReduce::new(topo, local, leaders, Arc::clone(ctx.comm_timer())).unwrap()
}
