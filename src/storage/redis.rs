// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Redis Cluster backend.
//!
//! A [`ClusterSession`] is the per-call "cluster connection": it routes each
//! command by its key's slot, borrows at most one connection per node on first
//! use, and returns all of them when dropped.
//!
//! Redirects are followed once:
//! - `MOVED` refreshes the slot map, then re-issues against the named node.
//! - `ASK` re-issues against the named node, preceded by `ASKING`.
//!
//! Any other error is returned as-is. A connection that timed out or hit an
//! I/O error is discarded instead of going back to its pool.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use redis::{Cmd, ErrorKind, FromRedisValue, RedisError};
use tracing::{debug, warn};

use super::traits::{SortedSetBackend, SortedSetSession, StoreError};
use crate::cluster::{ClusterPool, NodePool, PooledConnection};

#[async_trait]
impl SortedSetBackend for ClusterPool {
    async fn session<'a>(&'a self) -> Result<Box<dyn SortedSetSession + 'a>, StoreError> {
        if self.is_shut_down() {
            return Err(StoreError::Closed);
        }
        Ok(Box::new(ClusterSession::new(self)))
    }
}

pub struct ClusterSession<'a> {
    cluster: &'a ClusterPool,
    conns: HashMap<String, PooledConnection>,
}

impl<'a> ClusterSession<'a> {
    pub fn new(cluster: &'a ClusterPool) -> Self {
        Self {
            cluster,
            conns: HashMap::new(),
        }
    }

    /// Nodes this session currently holds a connection to.
    pub fn borrowed_nodes(&self) -> usize {
        self.conns.len()
    }

    /// Run `cmd` on the node owning `key`, following one redirect.
    pub async fn execute<T>(&mut self, key: &str, cmd: &Cmd, name: &str) -> Result<T, StoreError>
    where
        T: FromRedisValue + Send,
    {
        let pool = self.cluster.pool_for_key(key)?;
        match self.run(pool, cmd, name, false).await {
            Err(StoreError::Command(e)) if e.kind() == ErrorKind::Moved => {
                let Some(target) = redirect_target(&e) else {
                    return Err(e.into());
                };
                debug!(key, target = %target, "Slot moved, refreshing topology");
                // refresh borrows from the same pools; hand ours back first
                self.conns.clear();
                if let Err(refresh_err) = self.cluster.refresh().await {
                    warn!(key, error = %refresh_err, "Topology refresh after MOVED failed");
                }
                let pool = self.cluster.pool_for_addr(&target)?;
                self.run(pool, cmd, name, false).await
            }
            Err(StoreError::Command(e)) if e.kind() == ErrorKind::Ask => {
                let Some(target) = redirect_target(&e) else {
                    return Err(e.into());
                };
                debug!(key, target = %target, "Slot migrating, asking target node");
                let pool = self.cluster.pool_for_addr(&target)?;
                self.run(pool, cmd, name, true).await
            }
            other => other,
        }
    }

    async fn run<T>(&mut self, pool: Arc<NodePool>, cmd: &Cmd, name: &str, asking: bool) -> Result<T, StoreError>
    where
        T: FromRedisValue + Send,
    {
        let cluster = self.cluster;
        let conn = match self.conns.entry(pool.addr().to_string()) {
            Entry::Occupied(slot) => slot.into_mut(),
            Entry::Vacant(slot) => slot.insert(pool.borrow().await?),
        };

        let result = cluster
            .timed(name, async {
                if asking {
                    redis::cmd("ASKING").query_async::<()>(&mut **conn).await?;
                }
                cmd.query_async::<T>(&mut **conn).await
            })
            .await;

        if let Err(e) = &result {
            if e.poisons_connection() {
                if let Some(mut broken) = self.conns.remove(pool.addr()) {
                    broken.mark_broken();
                }
            }
        }
        result
    }
}

/// `host:port` from a `MOVED <slot> <host:port>` / `ASK ...` error.
fn redirect_target(e: &RedisError) -> Option<String> {
    e.detail()?.split_whitespace().nth(1).map(str::to_string)
}

#[async_trait]
impl SortedSetSession for ClusterSession<'_> {
    async fn zadd(&mut self, key: &str, score: i64, member: &str) -> Result<(), StoreError> {
        let mut cmd = redis::cmd("ZADD");
        cmd.arg(key).arg(score).arg(member);
        self.execute::<()>(key, &cmd, "ZADD").await
    }

    async fn zrem(&mut self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut cmd = redis::cmd("ZREM");
        cmd.arg(key).arg(member);
        self.execute::<()>(key, &cmd, "ZREM").await
    }

    async fn zremrangebyrank(&mut self, key: &str, start: isize, stop: isize) -> Result<u64, StoreError> {
        let mut cmd = redis::cmd("ZREMRANGEBYRANK");
        cmd.arg(key).arg(start).arg(stop);
        self.execute::<u64>(key, &cmd, "ZREMRANGEBYRANK").await
    }

    async fn zrange(&mut self, key: &str, start: isize, stop: isize) -> Result<Vec<String>, StoreError> {
        let mut cmd = redis::cmd("ZRANGE");
        cmd.arg(key).arg(start).arg(stop);
        self.execute::<Vec<String>>(key, &cmd, "ZRANGE").await
    }
}
