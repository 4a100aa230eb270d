// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Recency Store
//!
//! Bounded, most-recent-first member lists kept in Redis Cluster sorted sets.
//!
//! Each (owner, list) pair maps to one sorted set. A member's score is
//! `2^53 - updated_at` (epoch seconds), so ascending rank order is newest
//! first and trimming to `max_set_size` is a single `ZREMRANGEBYRANK`.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      BatchBuilder                           │
//! │  • Collects updates and deletes, build() consumes it        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      RecencyStore                           │
//! │  • put: ZADD all updates, ZREM all deletes, trim per key    │
//! │  • get: ZRANGE key 0 max_size-1                             │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                   (SortedSetBackend seam)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      ClusterPool                            │
//! │  • Slot map from CLUSTER SLOTS, standalone fallback         │
//! │  • One bounded connection pool per node                     │
//! │  • MOVED / ASK redirects, health signal, stats sampler      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use recency_store::{BatchBuilder, RecencyStore, RecencyStoreConfig};
//! use std::time::SystemTime;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), recency_store::StoreError> {
//!     let config = RecencyStoreConfig {
//!         bootstrap_host: Some("localhost:7000".into()),
//!         ..Default::default()
//!     };
//!     let store = RecencyStore::connect(config).await?;
//!
//!     let mut batch = BatchBuilder::new();
//!     batch
//!         .add_update("owner-1", "list-1", "member-9", SystemTime::now())
//!         .add_delete("owner-1", "list-1", "member-2");
//!     store.put(batch.build()).await?;
//!
//!     let recent = store.get("owner-1", "list-1", 10).await?;
//!     println!("{:?}", recent);
//!
//!     store.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`store`]: [`RecencyStore`] and the [`RecencyDal`] trait
//! - [`batch`]: mutation batches
//! - [`cluster`]: slot routing and per-node connection pools
//! - [`storage`]: the sorted-set backend seam (Redis Cluster, in-memory)
//! - [`metrics`]: latency and pool gauges
//! - [`staging`]: JSON file staging for bulk replay

pub mod batch;
pub mod cluster;
pub mod config;
pub mod key;
pub mod metrics;
pub mod staging;
pub mod storage;
pub mod store;

pub use batch::{Batch, BatchBuilder, Delete, MemberRef, Mutation, Update};
pub use cluster::{ClusterPool, TopologyHealth};
pub use config::RecencyStoreConfig;
pub use key::{score_for, OwnerKey, MAX_SAFE_SCORE};
pub use metrics::{FacadeMetrics, LatencyTimer, MetricsSink, TracingMetrics};
pub use storage::memory::InMemorySortedSets;
pub use storage::traits::{SortedSetBackend, SortedSetSession, StoreError};
pub use store::{RecencyDal, RecencyStore};
