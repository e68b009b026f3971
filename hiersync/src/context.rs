use std::sync::{Arc, OnceLock};

use crate::bootstrap::{Hierarchy, form_hierarchy};
use crate::config::{RunConfig, SyncConfig};
use crate::error::{HierSyncError, Result};
use crate::group::ProcessGroup;
use crate::launch::{LaunchEnv, resolve_topology};
use crate::pipeline::{FlatAllReduce, HierarchicalAllReduce};
use crate::profiler::{Activity, ProfileScope};
use crate::timing::CommTimer;
use crate::topology::Topology;
use crate::transport::{PeerTransport, TcpTransport};
use crate::types::{Backend, Device, Rank};

/// Per-process state of a distributed run.
///
/// Created once at startup and shared by `Arc`. Topology, backend, the world
/// group and the hierarchy are computed on first use and cached; the caches
/// are filled during single-threaded setup and only read afterwards.
pub struct ProcessContext {
    config: RunConfig,
    launch: LaunchEnv,
    sync: SyncConfig,
    topology: OnceLock<Topology>,
    backend: OnceLock<Backend>,
    world: OnceLock<ProcessGroup>,
    hierarchy: OnceLock<Hierarchy>,
    timer: Arc<CommTimer>,
}

impl ProcessContext {
    pub fn new(config: RunConfig, launch: LaunchEnv, sync: SyncConfig) -> Self {
        Self {
            config,
            launch,
            sync,
            topology: OnceLock::new(),
            backend: OnceLock::new(),
            world: OnceLock::new(),
            hierarchy: OnceLock::new(),
            timer: Arc::new(CommTimer::new()),
        }
    }

    /// Context for this process, with launch facts and sync tuning read from
    /// the environment.
    pub fn from_env(config: RunConfig) -> Self {
        Self::new(config, LaunchEnv::from_env(), SyncConfig::from_env())
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn sync_config(&self) -> &SyncConfig {
        &self.sync
    }

    pub fn topology(&self) -> Result<Topology> {
        if let Some(topo) = self.topology.get() {
            return Ok(*topo);
        }
        let topo = resolve_topology(&self.launch)?;
        Ok(*self.topology.get_or_init(|| topo))
    }

    pub fn rank(&self) -> Result<Rank> {
        Ok(self.topology()?.rank())
    }

    pub fn world_size(&self) -> Result<u32> {
        Ok(self.topology()?.world_size())
    }

    pub fn local_rank(&self) -> Result<u32> {
        Ok(self.topology()?.local_rank())
    }

    pub fn local_world_size(&self) -> Result<u32> {
        Ok(self.topology()?.local_world_size())
    }

    pub fn node_index(&self) -> Result<u32> {
        Ok(self.topology()?.node_index())
    }

    pub fn num_nodes(&self) -> Result<u32> {
        Ok(self.topology()?.num_nodes())
    }

    /// Whether this process is global rank 0. False when the topology
    /// cannot be resolved.
    pub fn is_rank_zero(&self) -> bool {
        matches!(self.rank(), Ok(0))
    }

    pub fn device(&self) -> Device {
        self.config.device
    }

    /// Backend chosen for this run; see [`Backend::select`].
    pub fn backend(&self) -> Backend {
        *self.backend.get_or_init(|| {
            Backend::select(
                Backend::mpi_available(),
                self.launch.is_orchestrated(),
                self.device(),
            )
        })
    }

    /// Open the world group with the selected backend.
    ///
    /// All ranks must call this collectively. A second call is a no-op.
    pub async fn init_distributed(&self) -> Result<()> {
        if self.is_initialized() {
            return Ok(());
        }
        let topo = self.topology()?;
        let backend = self.backend();
        if backend != Backend::Gloo {
            return Err(HierSyncError::configuration(format!(
                "backend {backend} is not available in this build"
            )));
        }
        tracing::info!(
            rank = topo.rank(),
            world_size = topo.world_size(),
            %backend,
            "initializing distributed backend"
        );
        let transport = TcpTransport::connect(topo.rank(), topo.world_size(), &self.sync).await?;
        self.init_distributed_with(Arc::new(transport))
    }

    /// Open the world group over an already connected transport.
    ///
    /// The transport must agree with the resolved topology. A second call is
    /// a no-op.
    pub fn init_distributed_with(&self, transport: Arc<dyn PeerTransport>) -> Result<()> {
        if self.is_initialized() {
            return Ok(());
        }
        let topo = self.topology()?;
        if transport.rank() != topo.rank() || transport.world_size() != topo.world_size() {
            return Err(HierSyncError::topology(format!(
                "transport is rank {} of {}, launch environment says rank {} of {}",
                transport.rank(),
                transport.world_size(),
                topo.rank(),
                topo.world_size()
            )));
        }
        let world = ProcessGroup::world(transport, &self.sync);
        if self.world.set(world).is_ok() {
            tracing::debug!(rank = topo.rank(), "world group ready");
        }
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.world.get().is_some()
    }

    /// The world group, once distributed init has run.
    pub fn world(&self) -> Result<&ProcessGroup> {
        self.world
            .get()
            .ok_or_else(|| HierSyncError::configuration("distributed init has not run"))
    }

    /// Form the local and leader groups. Only the first call creates groups;
    /// later calls return the cached hierarchy.
    pub fn build_hierarchy(&self) -> Result<&Hierarchy> {
        if let Some(h) = self.hierarchy.get() {
            return Ok(h);
        }
        let hierarchy = form_hierarchy(self.world()?, &self.topology()?)?;
        Ok(self.hierarchy.get_or_init(|| hierarchy))
    }

    pub fn hierarchy(&self) -> Option<&Hierarchy> {
        self.hierarchy.get()
    }

    /// Install a new configuration, dropping every cached fact and group.
    ///
    /// Distributed init and the hierarchy must be redone afterwards. The
    /// communication timer keeps its totals.
    pub fn reload(&mut self, config: RunConfig) {
        self.topology = OnceLock::new();
        self.backend = OnceLock::new();
        self.hierarchy = OnceLock::new();
        self.world = OnceLock::new();
        self.config = config;
        tracing::debug!("process context reloaded");
    }

    /// Wait until every rank of the world group reaches this point.
    pub async fn barrier(&self) -> Result<()> {
        self.world()?.barrier().wait().await
    }

    pub fn comm_timer(&self) -> &Arc<CommTimer> {
        &self.timer
    }

    pub fn cumulative_comm_time_seconds(&self) -> f64 {
        self.timer.cumulative_comm_time_seconds()
    }

    /// Two-level reduction hook over this context's hierarchy, forming the
    /// hierarchy first if needed.
    pub fn hierarchical_hook(&self) -> Result<HierarchicalAllReduce> {
        let topo = self.topology()?;
        let hierarchy = self.build_hierarchy()?;
        HierarchicalAllReduce::from_hierarchy(topo, hierarchy, Arc::clone(&self.timer))
    }

    /// Flat all-reduce hook over the world group.
    pub fn flat_hook(&self) -> Result<FlatAllReduce> {
        let world = self.world()?.clone();
        Ok(FlatAllReduce::new(Arc::new(world), Arc::clone(&self.timer)))
    }

    /// Profile a region. Active only on rank 0 when the run config enables
    /// benchmarking.
    pub fn profiler(&self, region: &str) -> ProfileScope {
        if !(self.config.training.benchmark && self.is_rank_zero()) {
            return ProfileScope::disabled();
        }
        let mut activities = vec![Activity::Cpu];
        if self.device().is_accelerator() {
            activities.push(Activity::Accelerator);
        }
        ProfileScope::start(region, activities)
    }
}
