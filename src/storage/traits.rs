// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Cluster topology error: {0}")]
    Topology(String),
    #[error("Failed to connect to {addr}: {reason}")]
    Connect { addr: String, reason: String },
    #[error("No connection to {addr} became available within {waited:?}")]
    PoolExhausted { addr: String, waited: Duration },
    #[error("{command} timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },
    #[error("Store command failed: {0}")]
    Command(#[from] redis::RedisError),
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Connection pool is shut down")]
    Closed,
}

impl StoreError {
    /// Whether the connection that produced this error should be discarded
    /// rather than returned to its pool.
    pub fn poisons_connection(&self) -> bool {
        match self {
            StoreError::Timeout { .. } => true,
            StoreError::Command(e) => e.is_io_error() || e.is_connection_dropped(),
            _ => false,
        }
    }
}

/// A source of per-call sessions against a sorted-set store.
///
/// One session is opened per `put`/`get` call and dropped at the end of it;
/// dropping releases whatever connections the session borrowed.
#[async_trait]
pub trait SortedSetBackend: Send + Sync {
    async fn session<'a>(&'a self) -> Result<Box<dyn SortedSetSession + 'a>, StoreError>;
}

/// The sorted-set commands the recency algorithm needs.
///
/// Rank arguments follow Redis conventions: inclusive bounds, negative values
/// count from the end (`-1` is the last member).
#[async_trait]
pub trait SortedSetSession: Send {
    /// `ZADD key score member`
    async fn zadd(&mut self, key: &str, score: i64, member: &str) -> Result<(), StoreError>;

    /// `ZREM key member`
    async fn zrem(&mut self, key: &str, member: &str) -> Result<(), StoreError>;

    /// `ZREMRANGEBYRANK key start stop`, returning how many members were removed.
    async fn zremrangebyrank(&mut self, key: &str, start: isize, stop: isize) -> Result<u64, StoreError>;

    /// `ZRANGE key start stop`
    async fn zrange(&mut self, key: &str, start: isize, stop: isize) -> Result<Vec<String>, StoreError>;
}
