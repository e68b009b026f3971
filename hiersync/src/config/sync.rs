use std::time::Duration;

/// Runtime tuning for collectives and rendezvous.
///
/// All values have defaults. Override via environment variables (prefixed
/// `HIERSYNC_`, plus the conventional `MASTER_ADDR` / `MASTER_PORT`) or by
/// constructing a custom `SyncConfig`.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Timeout for individual send/recv operations within collectives.
    pub collective_timeout: Duration,

    /// Timeout for each step of a barrier.
    pub barrier_timeout: Duration,

    /// How long rank 0 waits for every rank to join, and how long other
    /// ranks keep retrying to reach rank 0.
    pub rendezvous_timeout: Duration,

    /// Host of the rank-0 rendezvous listener.
    pub master_addr: String,

    /// Port of the rank-0 rendezvous listener.
    pub master_port: u16,

    /// Host other ranks should dial to reach this one. Defaults to the
    /// machine hostname.
    pub advertise_host: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            collective_timeout: Duration::from_secs(30),
            barrier_timeout: Duration::from_secs(30),
            rendezvous_timeout: Duration::from_secs(120),
            master_addr: "127.0.0.1".to_string(),
            master_port: 29500,
            advertise_host: None,
        }
    }
}

impl SyncConfig {
    /// Load config from environment variables, falling back to defaults.
    ///
    /// Recognized variables:
    /// - `HIERSYNC_COLLECTIVE_TIMEOUT_SECS`
    /// - `HIERSYNC_BARRIER_TIMEOUT_SECS`
    /// - `HIERSYNC_RENDEZVOUS_TIMEOUT_SECS`
    /// - `HIERSYNC_ADVERTISE_HOST`
    /// - `MASTER_ADDR`
    /// - `MASTER_PORT`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();

        if let Some(s) = lookup("HIERSYNC_COLLECTIVE_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            cfg.collective_timeout = Duration::from_secs(s);
        }
        if let Some(s) = lookup("HIERSYNC_BARRIER_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            cfg.barrier_timeout = Duration::from_secs(s);
        }
        if let Some(s) = lookup("HIERSYNC_RENDEZVOUS_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            cfg.rendezvous_timeout = Duration::from_secs(s);
        }
        if let Some(host) = lookup("HIERSYNC_ADVERTISE_HOST") {
            cfg.advertise_host = Some(host);
        }
        if let Some(addr) = lookup("MASTER_ADDR") {
            cfg.master_addr = addr;
        }
        if let Some(port) = lookup("MASTER_PORT").and_then(|v| v.parse().ok()) {
            cfg.master_port = port;
        }

        cfg
    }

    /// Host advertised to peers during rendezvous.
    pub fn advertise_host(&self) -> String {
        self.advertise_host
            .clone()
            .unwrap_or_else(|| gethostname::gethostname().to_string_lossy().into_owned())
    }
}
