//! Hub connection pool
//!
//! Shares hubs between callers with identical enabled-server sets.
//!
//! The pool key is a fingerprint: `sha256(canonical JSON of the enabled
//! servers' name, transport and endpoint)`, with servers sorted by name so the
//! same settings always produce the same key. Environment, timeout and
//! auto-approve lists are not part of it.
//!
//! Entries carry a reference count and a last-access time. `release` only
//! decrements; hubs are closed by the idle sweep once unreferenced for longer
//! than [`PoolConfig::idle_timeout`], by `force_close`, or at shutdown. A
//! cached hub that fails its health check is discarded and rebuilt on the
//! next `acquire`.
//!
//! Hubs are never closed or health-checked while the pool lock is held.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use mcphub_core::{Settings, TransportConfig};
use ring::digest::{Context, SHA256};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{HubError, HubResult};
use crate::hub::{HubBuilder, McpHub, ServerLookup};
use crate::tool::InvokeOptions;
use crate::transport::{ConnectionFactory, TransportFactory};

/// Fingerprint of settings with no enabled servers.
pub const EMPTY_FINGERPRINT: &str = "empty";

/// Default idle timeout (5 minutes)
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Compute the pool key for a settings value.
pub fn fingerprint(settings: &Settings) -> String {
    let enabled = settings.enabled();
    if enabled.is_empty() {
        return EMPTY_FINGERPRINT.to_string();
    }

    let identities: Vec<Value> = enabled
        .iter()
        .map(|(name, spec)| match &spec.transport {
            TransportConfig::Stdio { command, args, .. } => json!([name, "stdio", command, args]),
            TransportConfig::Sse { url } => json!([name, "sse", url]),
        })
        .collect();

    sha256_hex(&Value::Array(identities).to_string())
}

/// Compute SHA256 hash of a string and return as hex
fn sha256_hex(input: &str) -> String {
    let mut context = Context::new(&SHA256);
    context.update(input.as_bytes());
    let digest = context.finish();
    hex::encode(digest.as_ref())
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Unreferenced hubs idle longer than this are closed by the sweep.
    pub idle_timeout: Duration,
    pub sweep_interval: Duration,
    /// Bound on the health check run before a cached hub is handed out.
    pub health_timeout: Duration,
    /// Passed to every hub the pool builds.
    pub invoke: InvokeOptions,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            health_timeout: DEFAULT_HEALTH_TIMEOUT,
            invoke: InvokeOptions::default(),
        }
    }
}

impl PoolConfig {
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_sweep_interval(mut self, sweep_interval: Duration) -> Self {
        self.sweep_interval = sweep_interval;
        self
    }

    pub fn with_health_timeout(mut self, health_timeout: Duration) -> Self {
        self.health_timeout = health_timeout;
        self
    }

    pub fn with_invoke_options(mut self, invoke: InvokeOptions) -> Self {
        self.invoke = invoke;
        self
    }
}

/// Point-in-time view of the pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub entries: usize,
    /// Entries with a positive reference count
    pub in_use: usize,
    pub idle: usize,
    pub indexed_servers: usize,
}

struct PoolEntry {
    hub: Arc<McpHub>,
    ref_count: usize,
    last_access: Instant,
    server_names: Vec<String>,
}

#[derive(Default)]
struct PoolState {
    entries: HashMap<String, PoolEntry>,
    /// server name -> fingerprint of the entry serving it
    name_index: HashMap<String, String>,
}

impl PoolState {
    /// Remove an entry and the index rows that still point at it.
    fn remove(&mut self, fingerprint: &str) -> Option<PoolEntry> {
        let entry = self.entries.remove(fingerprint)?;
        for name in &entry.server_names {
            if self.name_index.get(name).is_some_and(|fp| fp == fingerprint) {
                self.name_index.remove(name);
            }
        }
        Some(entry)
    }
}

struct PoolShared {
    state: RwLock<PoolState>,
    factory: Arc<dyn ConnectionFactory>,
    config: PoolConfig,
    shutdown: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for PoolShared {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Reference-counted cache of hubs keyed by settings fingerprint.
///
/// Cloning is cheap and shares the same pool.
#[derive(Clone)]
pub struct ConnectionPool {
    shared: Arc<PoolShared>,
}

static GLOBAL_POOL: OnceLock<ConnectionPool> = OnceLock::new();

impl ConnectionPool {
    /// Create a pool using the rmcp transports.
    pub fn new(config: PoolConfig) -> Self {
        Self::with_factory(config, Arc::new(TransportFactory::new()))
    }

    /// Create a pool with a custom connection factory.
    ///
    /// The idle sweep starts here when called inside a Tokio runtime, otherwise
    /// on the first `acquire`. `acquire` also restarts it if the runtime it
    /// ran on has shut down.
    pub fn with_factory(config: PoolConfig, factory: Arc<dyn ConnectionFactory>) -> Self {
        let pool = Self {
            shared: Arc::new(PoolShared {
                state: RwLock::new(PoolState::default()),
                factory,
                config,
                shutdown: CancellationToken::new(),
                sweeper: Mutex::new(None),
            }),
        };
        pool.ensure_sweeper();
        pool
    }

    /// The process-wide pool, created on first use. Its sweep starts with the
    /// first `acquire` if it was created outside a runtime.
    pub fn global() -> &'static ConnectionPool {
        GLOBAL_POOL.get_or_init(|| ConnectionPool::new(PoolConfig::default()))
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Start the idle sweep unless one is already running or the pool is shut down.
    fn ensure_sweeper(&self) {
        if self.shared.shutdown.is_cancelled() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("No Tokio runtime yet; idle sweep starts on first acquire");
            return;
        };

        let mut sweeper = self
            .shared
            .sweeper
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if sweeper.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        if sweeper.is_some() {
            warn!("Idle sweep stopped with its runtime, restarting");
        }

        let weak: Weak<PoolShared> = Arc::downgrade(&self.shared);
        let token = self.shared.shutdown.clone();
        let period = self.shared.config.sweep_interval;

        *sweeper = Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(shared) = weak.upgrade() else { break };
                        let evicted = ConnectionPool { shared }.evict_idle().await;
                        if evicted > 0 {
                            debug!(evicted, "Idle sweep closed hubs");
                        }
                    }
                }
            }
            debug!("Idle sweep stopped");
        }));
    }

    /// Borrow a hub for `settings`, reusing a healthy cached one when possible.
    pub async fn acquire(&self, settings: &Settings) -> HubResult<Arc<McpHub>> {
        settings.validate()?;
        self.ensure_sweeper();
        let fp = fingerprint(settings);

        let cached = {
            let state = self.shared.state.read().await;
            state.entries.get(&fp).map(|e| e.hub.clone())
        };

        if let Some(hub) = cached {
            match hub.health_check(self.shared.config.health_timeout).await {
                Ok(()) => {
                    let mut state = self.shared.state.write().await;
                    if let Some(entry) = state.entries.get_mut(&fp) {
                        if Arc::ptr_eq(&entry.hub, &hub) {
                            entry.ref_count += 1;
                            entry.last_access = Instant::now();
                            debug!(fingerprint = %fp, ref_count = entry.ref_count, "Reusing pooled hub");
                            return Ok(hub);
                        }
                    }
                }
                Err(e) => {
                    warn!(fingerprint = %fp, error = %e, "Pooled hub failed health check, reconnecting");
                    self.discard(&fp, &hub).await;
                }
            }
        }

        info!(fingerprint = %fp, "Creating new pooled hub");
        let lookup: Arc<dyn ServerLookup> = Arc::new(self.clone());
        let hub = Arc::new(
            HubBuilder::new(self.shared.factory.clone())
                .with_lookup(lookup)
                .with_options(self.shared.config.invoke.clone())
                .initialize(settings)
                .await?,
        );

        let winner = {
            let mut state = self.shared.state.write().await;
            match state.entries.get_mut(&fp) {
                Some(entry) => {
                    entry.ref_count += 1;
                    entry.last_access = Instant::now();
                    Some(entry.hub.clone())
                }
                None => {
                    let server_names: Vec<String> = settings
                        .enabled()
                        .into_iter()
                        .map(|(name, _)| name.to_string())
                        .collect();
                    // Keep rows that point at a live lender so its eviction
                    // drops them; a borrower never serves as a lender.
                    for name in &server_names {
                        let live = state
                            .name_index
                            .get(name)
                            .is_some_and(|owner| state.entries.contains_key(owner));
                        if !live {
                            state.name_index.insert(name.clone(), fp.clone());
                        }
                    }
                    state.entries.insert(
                        fp.clone(),
                        PoolEntry {
                            hub: hub.clone(),
                            ref_count: 1,
                            last_access: Instant::now(),
                            server_names,
                        },
                    );
                    None
                }
            }
        };

        match winner {
            Some(existing) => {
                debug!(fingerprint = %fp, "Lost construction race, closing duplicate hub");
                if let Err(e) = hub.close().await {
                    warn!(fingerprint = %fp, error = %e, "Failed to close duplicate hub");
                }
                Ok(existing)
            }
            None => Ok(hub),
        }
    }

    /// The hub currently serving `name`.
    pub async fn acquire_by_server_name(&self, name: &str) -> HubResult<Arc<McpHub>> {
        let state = self.shared.state.read().await;
        state
            .name_index
            .get(name)
            .and_then(|fp| state.entries.get(fp))
            .map(|entry| entry.hub.clone())
            .ok_or_else(|| HubError::ServerNotFound {
                server: name.to_string(),
            })
    }

    /// Return a borrowed hub. The count never drops below zero and the hub
    /// stays cached for the idle sweep.
    pub async fn release(&self, settings: &Settings) {
        let fp = fingerprint(settings);
        let mut state = self.shared.state.write().await;
        match state.entries.get_mut(&fp) {
            Some(entry) => {
                entry.ref_count = entry.ref_count.saturating_sub(1);
                entry.last_access = Instant::now();
                debug!(fingerprint = %fp, ref_count = entry.ref_count, "Released pooled hub");
            }
            None => debug!(fingerprint = %fp, "Release for unknown fingerprint"),
        }
    }

    /// Close and remove the entry for `settings` regardless of its reference count.
    pub async fn force_close(&self, settings: &Settings) -> HubResult<()> {
        let fp = fingerprint(settings);
        let removed = self.shared.state.write().await.remove(&fp);
        match removed {
            Some(entry) => {
                info!(fingerprint = %fp, ref_count = entry.ref_count, "Force closing pooled hub");
                entry.hub.close().await
            }
            None => Ok(()),
        }
    }

    /// Close every cached hub, collecting all errors.
    pub async fn close_all(&self) -> Vec<HubError> {
        let entries: Vec<(String, PoolEntry)> = {
            let mut state = self.shared.state.write().await;
            state.name_index.clear();
            state.entries.drain().collect()
        };

        let mut errors = Vec::new();
        for (fp, entry) in entries {
            if let Err(e) = entry.hub.close().await {
                warn!(fingerprint = %fp, error = %e, "Failed to close pooled hub");
                errors.push(e);
            }
        }
        errors
    }

    /// Stop the idle sweep and close every hub.
    pub async fn shutdown(&self) -> Vec<HubError> {
        self.shared.shutdown.cancel();
        let errors = self.close_all().await;
        info!(errors = errors.len(), "Connection pool shut down");
        errors
    }

    /// Close unreferenced hubs idle past the threshold. Returns how many were closed.
    pub async fn evict_idle(&self) -> usize {
        let idle_timeout = self.shared.config.idle_timeout;
        let evicted: Vec<(String, PoolEntry)> = {
            let mut state = self.shared.state.write().await;
            let now = Instant::now();
            let expired: Vec<String> = state
                .entries
                .iter()
                .filter(|(_, e)| e.ref_count == 0 && now.duration_since(e.last_access) > idle_timeout)
                .map(|(fp, _)| fp.clone())
                .collect();
            expired
                .into_iter()
                .filter_map(|fp| state.remove(&fp).map(|entry| (fp, entry)))
                .collect()
        };

        for (fp, entry) in &evicted {
            info!(fingerprint = %fp, "Closing idle pooled hub");
            if let Err(e) = entry.hub.close().await {
                warn!(fingerprint = %fp, error = %e, "Failed to close idle hub");
            }
        }
        evicted.len()
    }

    /// Current reference count for `settings`, if cached.
    pub async fn ref_count(&self, settings: &Settings) -> Option<usize> {
        let fp = fingerprint(settings);
        self.shared
            .state
            .read()
            .await
            .entries
            .get(&fp)
            .map(|e| e.ref_count)
    }

    pub async fn stats(&self) -> PoolStats {
        let state = self.shared.state.read().await;
        let in_use = state.entries.values().filter(|e| e.ref_count > 0).count();
        PoolStats {
            entries: state.entries.len(),
            in_use,
            idle: state.entries.len() - in_use,
            indexed_servers: state.name_index.len(),
        }
    }

    /// Remove `hub` if it is still the entry for `fingerprint`, then close it.
    async fn discard(&self, fingerprint: &str, hub: &Arc<McpHub>) {
        let removed = {
            let mut state = self.shared.state.write().await;
            let same = state
                .entries
                .get(fingerprint)
                .is_some_and(|e| Arc::ptr_eq(&e.hub, hub));
            if same {
                state.remove(fingerprint)
            } else {
                None
            }
        };

        if let Some(entry) = removed {
            if let Err(e) = entry.hub.close().await {
                warn!(fingerprint = %fingerprint, error = %e, "Failed to close unhealthy hub");
            }
        }
    }
}

#[async_trait]
impl ServerLookup for ConnectionPool {
    async fn acquire_by_server_name(&self, name: &str) -> HubResult<Arc<McpHub>> {
        ConnectionPool::acquire_by_server_name(self, name).await
    }
}
