// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cluster-wide pooling and routing.
//!
//! [`ClusterPool::connect`] discovers slot ownership from the bootstrap host
//! with `CLUSTER SLOTS` and keeps one [`NodePool`] per node, each with its own
//! utilization sampler. A bootstrap server without cluster support is treated
//! as a single node owning every slot.
//!
//! Refreshes after construction report through [`TopologyHealth`]: a failed
//! refresh marks the topology degraded until the next successful one.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use redis::{ConnectionAddr, ConnectionInfo, IntoConnectionInfo, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::node_pool::{spawn_stats_sampler, NodeSettings, NodePool, PoolStats};
use super::slots::{key_slot, SlotMap};
use crate::config::RecencyStoreConfig;
use crate::metrics::MetricsSink;
use crate::storage::traits::StoreError;

/// Whether the last topology refresh succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyHealth {
    Healthy,
    Degraded { reason: String },
}

struct NodeEntry {
    pool: Arc<NodePool>,
    sampler: CancellationToken,
}

pub struct ClusterPool {
    bootstrap_addr: String,
    base_info: ConnectionInfo,
    settings: NodeSettings,
    command_timeout: Duration,
    stats_interval: Duration,
    metric_prefix: String,
    sink: Arc<dyn MetricsSink>,
    slots: RwLock<SlotMap>,
    nodes: RwLock<HashMap<String, NodeEntry>>,
    samplers: Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
    health: watch::Sender<TopologyHealth>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for ClusterPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterPool")
            .field("bootstrap", &self.bootstrap_addr)
            .field("nodes", &self.nodes())
            .field("health", &self.health())
            .finish()
    }
}

impl ClusterPool {
    /// Validate `config`, then load the slot map from the bootstrap host.
    /// Any failure here is returned; nothing is retried.
    pub async fn connect(config: &RecencyStoreConfig, sink: Arc<dyn MetricsSink>) -> Result<Self, StoreError> {
        config.validate()?;
        let url = config
            .bootstrap_url()
            .ok_or_else(|| StoreError::Config("bootstrap_host must be set".into()))?;
        let base_info = url
            .as_str()
            .into_connection_info()
            .map_err(|e| StoreError::Config(format!("invalid bootstrap_host '{}': {}", url, e)))?;
        let bootstrap_addr = match &base_info.addr {
            ConnectionAddr::Tcp(host, port) => format!("{}:{}", host, port),
            ConnectionAddr::TcpTls { host, port, .. } => format!("{}:{}", host, port),
            other => {
                return Err(StoreError::Config(format!(
                    "bootstrap_host must be a TCP address, got {:?}",
                    other
                )))
            }
        };

        let (health, _) = watch::channel(TopologyHealth::Healthy);
        let pool = Self {
            bootstrap_addr,
            base_info,
            settings: NodeSettings::from(config),
            command_timeout: config.command_timeout(),
            stats_interval: config.stats_interval(),
            metric_prefix: config.metric_prefix.clone(),
            sink,
            slots: RwLock::new(SlotMap::default()),
            nodes: RwLock::new(HashMap::new()),
            samplers: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
            health,
            refresh_lock: tokio::sync::Mutex::new(()),
        };

        info!(bootstrap = %pool.bootstrap_addr, "Initializing Redis cluster state for slot -> node mapping");
        let bootstrap = pool.bootstrap_addr.clone();
        match pool.load_slots(&bootstrap).await {
            Ok(map) => pool.install(map)?,
            Err(e) => {
                error!(bootstrap = %bootstrap, error = %e, "Refresh failed. Unable to get cluster slot mapping");
                pool.shutdown().await;
                return Err(match e {
                    StoreError::Topology(_) | StoreError::Config(_) => e,
                    other => StoreError::Topology(format!("initial refresh via {} failed: {}", bootstrap, other)),
                });
            }
        }
        Ok(pool)
    }

    /// Reload the slot map from any known node, falling back to the bootstrap
    /// host. Updates [`TopologyHealth`] either way.
    pub async fn refresh(&self) -> Result<(), StoreError> {
        let _guard = self.refresh_lock.lock().await;

        let mut candidates: Vec<String> = self.slots.read().nodes().into_iter().collect();
        if !candidates.contains(&self.bootstrap_addr) {
            candidates.push(self.bootstrap_addr.clone());
        }

        let mut last_error = None;
        for addr in candidates {
            match self.load_slots(&addr).await {
                Ok(map) => {
                    self.install(map)?;
                    info!(via = %addr, nodes = self.nodes().len(), "Cluster topology refreshed");
                    return Ok(());
                }
                Err(e) => {
                    warn!(via = %addr, error = %e, "Topology refresh attempt failed");
                    last_error = Some(e);
                }
            }
        }

        let reason = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no nodes to query".to_string());
        warn!(reason = %reason, "Cluster topology degraded");
        self.health.send_replace(TopologyHealth::Degraded { reason: reason.clone() });
        Err(StoreError::Topology(reason))
    }

    async fn load_slots(&self, addr: &str) -> Result<SlotMap, StoreError> {
        let pool = self.pool_for_addr(addr)?;
        let mut conn = pool.borrow().await?;
        let reply = self
            .timed("CLUSTER SLOTS", redis::cmd("CLUSTER").arg("SLOTS").query_async::<Value>(&mut *conn))
            .await;

        match reply {
            Ok(value) => SlotMap::from_cluster_slots(&value, host_of(addr)),
            Err(StoreError::Command(e)) if is_cluster_disabled(&e) => {
                info!(host = %addr, "Cluster support disabled, routing every slot to this node");
                Ok(SlotMap::single(addr))
            }
            Err(e) => {
                if e.poisons_connection() {
                    conn.mark_broken();
                }
                Err(e)
            }
        }
    }

    /// Make `map` current. Nodes it no longer names lose their pool and
    /// sampler; a later redirect to one of them creates a fresh pool.
    fn install(&self, map: SlotMap) -> Result<(), StoreError> {
        let live = map.nodes();
        for addr in &live {
            self.pool_for_addr(addr)?;
        }

        let retired: Vec<(String, NodeEntry)> = {
            let mut nodes = self.nodes.write();
            let stale: Vec<String> = nodes.keys().filter(|addr| !live.contains(*addr)).cloned().collect();
            stale.into_iter().filter_map(|addr| nodes.remove_entry(&addr)).collect()
        };
        *self.slots.write() = map;

        if !retired.is_empty() {
            for (addr, entry) in &retired {
                info!(host = %addr, "Node left the slot map, closing its pool");
                entry.sampler.cancel();
                entry.pool.close();
            }
            self.samplers.lock().retain(|handle| !handle.is_finished());
        }
        self.health.send_replace(TopologyHealth::Healthy);
        Ok(())
    }

    /// Address of the node currently owning `key`'s slot.
    pub fn node_for_key(&self, key: &str) -> Option<String> {
        self.slots.read().node_for_key(key.as_bytes()).map(str::to_string)
    }

    pub(crate) fn pool_for_key(&self, key: &str) -> Result<Arc<NodePool>, StoreError> {
        let addr = self.node_for_key(key).ok_or_else(|| {
            StoreError::Topology(format!("no node owns slot {} (key '{}')", key_slot(key.as_bytes()), key))
        })?;
        self.pool_for_addr(&addr)
    }

    /// The pool for `addr`, created (with its sampler) on first use.
    pub(crate) fn pool_for_addr(&self, addr: &str) -> Result<Arc<NodePool>, StoreError> {
        if self.cancel.is_cancelled() {
            return Err(StoreError::Closed);
        }
        if let Some(entry) = self.nodes.read().get(addr) {
            return Ok(entry.pool.clone());
        }

        let mut nodes = self.nodes.write();
        if let Some(entry) = nodes.get(addr) {
            return Ok(entry.pool.clone());
        }
        let info = node_connection_info(&self.base_info, addr)?;
        let pool = NodePool::new(addr, info, self.settings.clone())?;
        let sampler = self.cancel.child_token();
        let handle = spawn_stats_sampler(
            pool.clone(),
            self.sink.clone(),
            &self.metric_prefix,
            self.stats_interval,
            sampler.clone(),
        );
        self.samplers.lock().push(handle);
        nodes.insert(
            addr.to_string(),
            NodeEntry {
                pool: pool.clone(),
                sampler,
            },
        );
        Ok(pool)
    }

    pub(crate) async fn timed<T, F>(&self, command: &str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.command_timeout, fut).await {
            Ok(result) => result.map_err(StoreError::from),
            Err(_) => Err(StoreError::Timeout {
                command: command.to_string(),
                timeout: self.command_timeout,
            }),
        }
    }

    pub fn bootstrap_addr(&self) -> &str {
        &self.bootstrap_addr
    }

    /// Addresses of every node with a pool, sorted.
    pub fn nodes(&self) -> Vec<String> {
        let mut addrs: Vec<String> = self.nodes.read().keys().cloned().collect();
        addrs.sort();
        addrs
    }

    /// Utilization of every node pool.
    pub fn stats(&self) -> BTreeMap<String, PoolStats> {
        self.nodes
            .read()
            .iter()
            .map(|(addr, entry)| (addr.clone(), entry.pool.stats()))
            .collect()
    }

    pub fn health(&self) -> TopologyHealth {
        self.health.borrow().clone()
    }

    pub fn subscribe_health(&self) -> watch::Receiver<TopologyHealth> {
        self.health.subscribe()
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop the samplers, close every node pool and wait for the samplers to
    /// exit. Borrows fail with [`StoreError::Closed`] afterwards.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        for entry in self.nodes.read().values() {
            entry.pool.close();
        }
        let samplers = std::mem::take(&mut *self.samplers.lock());
        for handle in samplers {
            let _ = handle.await;
        }
    }
}

impl Drop for ClusterPool {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn is_cluster_disabled(e: &redis::RedisError) -> bool {
    e.to_string().contains("cluster support disabled")
}

fn host_of(addr: &str) -> &str {
    addr.rsplit_once(':').map(|(host, _)| host).unwrap_or(addr)
}

/// `base` with its address swapped for `addr`; credentials, db and TLS carry over.
fn node_connection_info(base: &ConnectionInfo, addr: &str) -> Result<ConnectionInfo, StoreError> {
    let (host, port) = addr
        .rsplit_once(':')
        .and_then(|(h, p)| p.parse::<u16>().ok().map(|p| (h.to_string(), p)))
        .ok_or_else(|| StoreError::Topology(format!("invalid node address '{}'", addr)))?;

    let mut info = base.clone();
    info.addr = match &base.addr {
        ConnectionAddr::TcpTls { .. } => {
            let mut tls = base.addr.clone();
            if let ConnectionAddr::TcpTls { host: h, port: p, .. } = &mut tls {
                *h = host;
                *p = port;
            }
            tls
        }
        _ => ConnectionAddr::Tcp(host, port),
    };
    Ok(info)
}
