// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Connection pool for a single cluster node.
//!
//! - At most `max_active` connections exist at once (borrowed plus idle);
//!   a semaphore permit is held for every borrowed connection.
//! - Released connections go back on the idle list while it holds fewer than
//!   `max_idle`; the rest are closed.
//! - Idle connections older than `idle_timeout` are closed at borrow time.
//! - A reused connection must answer `PING` within `command_timeout` before
//!   it is handed out.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use redis::aio::MultiplexedConnection;
use redis::{Client, ConnectionInfo};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::RecencyStoreConfig;
use crate::metrics::MetricsSink;
use crate::storage::traits::StoreError;

/// Per-node pool limits.
#[derive(Debug, Clone)]
pub struct NodeSettings {
    pub max_active: usize,
    pub max_idle: usize,
    pub idle_timeout: Duration,
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
    pub borrow_timeout: Option<Duration>,
}

impl From<&RecencyStoreConfig> for NodeSettings {
    fn from(config: &RecencyStoreConfig) -> Self {
        Self {
            max_active: config.max_active_connections,
            max_idle: config.min_idle_connections,
            idle_timeout: config.idle_timeout(),
            connect_timeout: config.connect_timeout(),
            command_timeout: config.command_timeout(),
            borrow_timeout: config.borrow_timeout(),
        }
    }
}

/// Point-in-time utilization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections currently lent out.
    pub in_use: usize,
    /// Connections waiting on the idle list.
    pub idle: usize,
}

impl PoolStats {
    /// Open connections, borrowed or idle.
    pub fn active(&self) -> usize {
        self.in_use + self.idle
    }
}

struct IdleConnection {
    conn: MultiplexedConnection,
    since: Instant,
}

pub struct NodePool {
    addr: String,
    client: Client,
    settings: NodeSettings,
    permits: Arc<Semaphore>,
    idle: Mutex<VecDeque<IdleConnection>>,
}

impl std::fmt::Debug for NodePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodePool")
            .field("addr", &self.addr)
            .field("stats", &self.stats())
            .finish()
    }
}

impl NodePool {
    /// Create a pool for `addr`. No connection is made until the first borrow.
    pub fn new(addr: impl Into<String>, info: ConnectionInfo, settings: NodeSettings) -> Result<Arc<Self>, StoreError> {
        let addr = addr.into();
        let client = Client::open(info).map_err(|e| StoreError::Connect {
            addr: addr.clone(),
            reason: e.to_string(),
        })?;
        info!(host = %addr, max_active = settings.max_active, max_idle = settings.max_idle, "Creating a pool for address");
        Ok(Arc::new(Self {
            addr,
            client,
            permits: Arc::new(Semaphore::new(settings.max_active)),
            settings,
            idle: Mutex::new(VecDeque::new()),
        }))
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn stats(&self) -> PoolStats {
        let idle = self.idle.lock().len();
        // permits are held only by borrowed connections
        let free = self.permits.available_permits();
        PoolStats {
            in_use: self.settings.max_active.saturating_sub(free),
            idle,
        }
    }

    /// Stop lending connections. Pending and future borrows fail with
    /// [`StoreError::Closed`]; idle connections are closed.
    pub fn close(&self) {
        self.permits.close();
        self.idle.lock().clear();
    }

    pub fn is_closed(&self) -> bool {
        self.permits.is_closed()
    }

    /// Borrow a connection, waiting for capacity if every slot is in use.
    pub async fn borrow(self: &Arc<Self>) -> Result<PooledConnection, StoreError> {
        let permit = self.acquire_permit().await?;

        loop {
            let candidate = {
                let mut idle = self.idle.lock();
                self.evict_expired(&mut idle);
                idle.pop_back()
            };
            let Some(IdleConnection { mut conn, .. }) = candidate else { break };

            let ping_cmd = redis::cmd("PING");
            let ping = ping_cmd.query_async::<String>(&mut conn);
            match tokio::time::timeout(self.settings.command_timeout, ping).await {
                Ok(Ok(_)) => return Ok(PooledConnection::new(self.clone(), conn, permit)),
                Ok(Err(e)) => {
                    debug!(host = %self.addr, error = %e, "Idle connection failed PING, discarding");
                }
                Err(_) => {
                    debug!(
                        host = %self.addr,
                        timeout = ?self.settings.command_timeout,
                        "Idle connection did not answer PING in time, discarding"
                    );
                }
            }
        }

        let conn = self.dial().await?;
        Ok(PooledConnection::new(self.clone(), conn, permit))
    }

    async fn acquire_permit(&self) -> Result<OwnedSemaphorePermit, StoreError> {
        let acquire = self.permits.clone().acquire_owned();
        let acquired = match self.settings.borrow_timeout {
            Some(waited) => tokio::time::timeout(waited, acquire)
                .await
                .map_err(|_| StoreError::PoolExhausted {
                    addr: self.addr.clone(),
                    waited,
                })?,
            None => acquire.await,
        };
        let permit = acquired.map_err(|_| StoreError::Closed)?;

        // an idle connection also holds a slot; make room by closing the oldest
        let mut idle = self.idle.lock();
        while self.permits.available_permits() < idle.len() {
            idle.pop_front();
        }
        Ok(permit)
    }

    fn evict_expired(&self, idle: &mut VecDeque<IdleConnection>) {
        let timeout = self.settings.idle_timeout;
        if timeout.is_zero() {
            return;
        }
        let before = idle.len();
        idle.retain(|c| c.since.elapsed() < timeout);
        if idle.len() < before {
            debug!(host = %self.addr, closed = before - idle.len(), "Closed expired idle connections");
        }
    }

    async fn dial(&self) -> Result<MultiplexedConnection, StoreError> {
        info!(host = %self.addr, "Connecting to Redis");
        match tokio::time::timeout(self.settings.connect_timeout, self.client.get_multiplexed_async_connection()).await {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(e)) => Err(StoreError::Connect {
                addr: self.addr.clone(),
                reason: e.to_string(),
            }),
            Err(_) => Err(StoreError::Connect {
                addr: self.addr.clone(),
                reason: format!("connect timed out after {:?}", self.settings.connect_timeout),
            }),
        }
    }

    fn release(&self, conn: MultiplexedConnection) {
        if self.is_closed() {
            return;
        }
        let mut idle = self.idle.lock();
        if idle.len() < self.settings.max_idle {
            idle.push_back(IdleConnection {
                conn,
                since: Instant::now(),
            });
        }
    }
}

/// A borrowed connection. Dropping it returns the connection to its pool
/// unless it was marked broken.
pub struct PooledConnection {
    conn: Option<MultiplexedConnection>,
    pool: Arc<NodePool>,
    broken: bool,
    _permit: OwnedSemaphorePermit,
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("broken", &self.broken)
            .finish_non_exhaustive()
    }
}

impl PooledConnection {
    fn new(pool: Arc<NodePool>, conn: MultiplexedConnection, permit: OwnedSemaphorePermit) -> Self {
        Self {
            conn: Some(conn),
            pool,
            broken: false,
            _permit: permit,
        }
    }

    pub fn addr(&self) -> &str {
        &self.pool.addr
    }

    /// Close this connection on drop instead of returning it.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }
}

impl Deref for PooledConnection {
    type Target = MultiplexedConnection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("connection present until drop")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if !self.broken {
                self.pool.release(conn);
            }
        }
    }
}

/// Report `{prefix}.redis.{addr}.active` and `.idle` gauges every `interval`
/// until `cancel` fires.
pub fn spawn_stats_sampler(
    pool: Arc<NodePool>,
    sink: Arc<dyn MetricsSink>,
    prefix: &str,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let active_name = format!("{}.redis.{}.active", prefix, pool.addr());
    let idle_name = format!("{}.redis.{}.idle", prefix, pool.addr());

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(host = %pool.addr(), "Pool stats sampler stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let stats = pool.stats();
                    sink.put_gauge(&active_name, stats.active() as f64);
                    sink.put_gauge(&idle_name, stats.idle as f64);
                }
            }
        }
    })
}
