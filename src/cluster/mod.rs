// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Redis Cluster connection management.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  pool.rs       - ClusterPool: bootstrap, refresh, routing    │
//! │  └─ TopologyHealth: watch channel for refresh outcomes       │
//! ├──────────────────────────────────────────────────────────────┤
//! │  node_pool.rs  - NodePool: per-node connections              │
//! │  └─ PooledConnection: returned to the pool on drop           │
//! │  └─ spawn_stats_sampler: active/idle gauges                  │
//! ├──────────────────────────────────────────────────────────────┤
//! │  slots.rs      - key_slot (CRC16), SlotMap, CLUSTER SLOTS    │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod node_pool;
pub mod pool;
pub mod slots;
#[cfg(test)]
pub(crate) mod test_node;

pub use node_pool::{spawn_stats_sampler, NodePool, NodeSettings, PoolStats, PooledConnection};
pub use pool::{ClusterPool, TopologyHealth};
pub use slots::{key_slot, SlotMap, SLOT_COUNT};
