// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the recency store and its cluster pool.
//!
//! # Example
//!
//! ```
//! use recency_store::RecencyStoreConfig;
//!
//! // Defaults, but a bootstrap host is still required
//! let config = RecencyStoreConfig::default();
//! assert_eq!(config.max_active_connections, 100);
//! assert!(config.validate().is_err());
//!
//! let config = RecencyStoreConfig {
//!     bootstrap_host: Some("10.0.0.12:6379".into()),
//!     max_set_size: 250,
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::storage::traits::StoreError;

/// Configuration for [`RecencyStore`](crate::RecencyStore) backed by a
/// [`ClusterPool`](crate::ClusterPool).
///
/// Everything except `bootstrap_host` has a default. Call
/// [`validate`](Self::validate) (constructors do) to reject unusable values.
#[derive(Debug, Clone, Deserialize)]
pub struct RecencyStoreConfig {
    /// Seed node used to discover the cluster topology.
    /// Either `host:port` or a full `redis://` URL.
    #[serde(default)]
    pub bootstrap_host: Option<String>,

    /// Max connections (borrowed + idle) per node (default: 100)
    #[serde(default = "default_max_active_connections")]
    pub max_active_connections: usize,

    /// Idle connections retained per node (default: 50)
    #[serde(default = "default_min_idle_connections")]
    pub min_idle_connections: usize,

    /// Idle connections older than this are closed on next borrow (default: 60s)
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Dial timeout for new connections (default: 5s)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Per-command deadline (default: 5s). Must be non-zero.
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,

    /// How long a borrow waits for a free connection.
    /// `None` waits until one is released.
    #[serde(default)]
    pub borrow_timeout_ms: Option<u64>,

    /// Members kept per (owner, list) after each put (default: 100)
    #[serde(default = "default_max_set_size")]
    pub max_set_size: usize,

    /// Pool utilization sampling period (default: 5s)
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,

    /// Prefix for every emitted metric name (default: "recency")
    #[serde(default = "default_metric_prefix")]
    pub metric_prefix: String,
}

fn default_max_active_connections() -> usize { 100 }
fn default_min_idle_connections() -> usize { 50 }
fn default_idle_timeout_secs() -> u64 { 60 }
fn default_connect_timeout_ms() -> u64 { 5_000 }
fn default_command_timeout_ms() -> u64 { 5_000 }
fn default_max_set_size() -> usize { 100 }
fn default_stats_interval_secs() -> u64 { 5 }
fn default_metric_prefix() -> String { "recency".to_string() }

impl Default for RecencyStoreConfig {
    fn default() -> Self {
        Self {
            bootstrap_host: None,
            max_active_connections: default_max_active_connections(),
            min_idle_connections: default_min_idle_connections(),
            idle_timeout_secs: default_idle_timeout_secs(),
            connect_timeout_ms: default_connect_timeout_ms(),
            command_timeout_ms: default_command_timeout_ms(),
            borrow_timeout_ms: None,
            max_set_size: default_max_set_size(),
            stats_interval_secs: default_stats_interval_secs(),
            metric_prefix: default_metric_prefix(),
        }
    }
}

impl RecencyStoreConfig {
    /// Check required fields and value ranges.
    pub fn validate(&self) -> Result<(), StoreError> {
        match self.bootstrap_host.as_deref().map(str::trim) {
            None | Some("") => {
                return Err(StoreError::Config(
                    "bootstrap_host must be set to a cluster node address".into(),
                ))
            }
            Some(_) => {}
        }
        if self.max_active_connections == 0 {
            return Err(StoreError::Config("max_active_connections must be at least 1".into()));
        }
        if self.min_idle_connections > self.max_active_connections {
            return Err(StoreError::Config(format!(
                "min_idle_connections ({}) exceeds max_active_connections ({})",
                self.min_idle_connections, self.max_active_connections
            )));
        }
        if self.max_set_size == 0 {
            return Err(StoreError::Config("max_set_size must be at least 1".into()));
        }
        if isize::try_from(self.max_set_size).is_err() {
            return Err(StoreError::Config(format!(
                "max_set_size ({}) exceeds the largest sorted-set rank",
                self.max_set_size
            )));
        }
        if self.command_timeout_ms == 0 {
            return Err(StoreError::Config("command_timeout_ms must be non-zero".into()));
        }
        if self.stats_interval_secs == 0 {
            return Err(StoreError::Config("stats_interval_secs must be non-zero".into()));
        }
        Ok(())
    }

    /// The bootstrap host as a connection URL.
    pub(crate) fn bootstrap_url(&self) -> Option<String> {
        let host = self.bootstrap_host.as_deref()?.trim();
        if host.contains("://") {
            Some(host.to_string())
        } else {
            Some(format!("redis://{}", host))
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn borrow_timeout(&self) -> Option<Duration> {
        self.borrow_timeout_ms.map(Duration::from_millis)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }
}
