// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The recency store: bounded, most-recent-first member lists.
//!
//! # Put
//!
//! A put runs three phases over one session, in this order:
//!
//! 1. `ZADD key score member` for every update, where the score is
//!    [`MAX_SAFE_SCORE`](crate::key::MAX_SAFE_SCORE) minus the update time,
//!    so rank 0 is the most recent member.
//! 2. `ZREM key member` for every delete. Deletes run after all updates, so
//!    a delete wins over an update of the same member in the same batch.
//! 3. `ZREMRANGEBYRANK key max_set_size -1` once per touched key. With
//!    inverted scores this keeps the newest `max_set_size` members without
//!    first counting them.
//!
//! The first failing command aborts the put. Commands already applied stay
//! applied; replaying the whole batch is safe because updates only rewrite
//! scores.
//!
//! # Get
//!
//! `ZRANGE key 0 max_size-1`: at most `max_size` members, newest first.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, instrument};

use crate::batch::Batch;
use crate::cluster::ClusterPool;
use crate::config::RecencyStoreConfig;
use crate::key::{epoch_seconds, OwnerKey};
use crate::metrics::{LatencyTimer, MetricsSink, TracingMetrics};
use crate::storage::traits::{SortedSetBackend, StoreError};

/// Storage operations for recency lists.
#[async_trait]
pub trait RecencyDal: Send + Sync {
    /// Apply `batch`, then trim every touched list to the configured size.
    async fn put(&self, batch: Batch) -> Result<(), StoreError>;

    /// Up to `max_size` most recent members of (owner, list), newest first.
    async fn get(&self, owner_id: &str, list_id: &str, max_size: usize) -> Result<Vec<String>, StoreError>;
}

pub struct RecencyStore<B = ClusterPool> {
    backend: B,
    max_set_size: usize,
    sink: Arc<dyn MetricsSink>,
    put_metric: String,
    get_metric: String,
}

impl RecencyStore<ClusterPool> {
    /// Connect to the cluster described by `config`, reporting metrics as
    /// structured log events.
    pub async fn connect(config: RecencyStoreConfig) -> Result<Self, StoreError> {
        Self::connect_with_metrics(config, Arc::new(TracingMetrics)).await
    }

    pub async fn connect_with_metrics(
        config: RecencyStoreConfig,
        sink: Arc<dyn MetricsSink>,
    ) -> Result<Self, StoreError> {
        let cluster = ClusterPool::connect(&config, sink.clone()).await?;
        Ok(Self::build(cluster, config.max_set_size, sink, &config.metric_prefix))
    }

    /// Stop background sampling and close every connection pool.
    pub async fn shutdown(&self) {
        self.backend.shutdown().await;
    }
}

impl<B: SortedSetBackend> RecencyStore<B> {
    /// A store over any sorted-set backend, with the default metric prefix.
    pub fn with_backend(backend: B, max_set_size: usize, sink: Arc<dyn MetricsSink>) -> Result<Self, StoreError> {
        if max_set_size == 0 {
            return Err(StoreError::Config("max_set_size must be at least 1".into()));
        }
        if isize::try_from(max_set_size).is_err() {
            return Err(StoreError::Config(format!(
                "max_set_size ({}) exceeds the largest sorted-set rank",
                max_set_size
            )));
        }
        Ok(Self::build(backend, max_set_size, sink, "recency"))
    }

    fn build(backend: B, max_set_size: usize, sink: Arc<dyn MetricsSink>, prefix: &str) -> Self {
        Self {
            backend,
            max_set_size,
            sink,
            put_metric: format!("{}.put.latency", prefix),
            get_metric: format!("{}.get.latency", prefix),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn max_set_size(&self) -> usize {
        self.max_set_size
    }

    #[instrument(skip_all, fields(updates = batch.updates().len(), deletes = batch.deletes().len()))]
    pub async fn put(&self, batch: Batch) -> Result<(), StoreError> {
        let _timer = LatencyTimer::new(self.sink.clone(), self.put_metric.clone());
        if batch.is_empty() {
            return Ok(());
        }

        // first rank to drop when trimming
        let keep = isize::try_from(self.max_set_size)
            .map_err(|_| StoreError::Config(format!("max_set_size ({}) out of range", self.max_set_size)))?;
        let touched = batch.touched_keys();
        let (updates, deletes) = batch.into_parts();
        let mut session = self.backend.session().await?;

        for update in &updates {
            let key = update.target.key();
            let insert_score = update.score();
            match session.zadd(key.as_str(), insert_score, &update.target.member_id).await {
                Ok(()) => debug!(
                    key = %key,
                    member_id = %update.target.member_id,
                    list_id = %update.target.list_id,
                    updated_at = epoch_seconds(update.updated_at),
                    insert_score,
                    "Entry written"
                ),
                Err(e) => {
                    error!(
                        key = %key,
                        member_id = %update.target.member_id,
                        list_id = %update.target.list_id,
                        updated_at = epoch_seconds(update.updated_at),
                        insert_score,
                        error = %e,
                        "Unable to write entry"
                    );
                    return Err(e);
                }
            }
        }

        for delete in &deletes {
            let key = delete.target.key();
            match session.zrem(key.as_str(), &delete.target.member_id).await {
                Ok(()) => debug!(
                    key = %key,
                    member_id = %delete.target.member_id,
                    list_id = %delete.target.list_id,
                    "Entry deleted"
                ),
                Err(e) => {
                    error!(
                        key = %key,
                        member_id = %delete.target.member_id,
                        list_id = %delete.target.list_id,
                        error = %e,
                        "Unable to remove entry"
                    );
                    return Err(e);
                }
            }
        }

        for key in &touched {
            match session.zremrangebyrank(key.as_str(), keep, -1).await {
                Ok(removed) => debug!(key = %key, max_size = self.max_set_size, removed, "Entries truncated"),
                Err(e) => {
                    error!(key = %key, max_size = self.max_set_size, error = %e, "Unable to truncate entries to size");
                    return Err(e);
                }
            }
        }

        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn get(&self, owner_id: &str, list_id: &str, max_size: usize) -> Result<Vec<String>, StoreError> {
        let _timer = LatencyTimer::new(self.sink.clone(), self.get_metric.clone());
        if max_size == 0 {
            return Ok(Vec::new());
        }

        let key = OwnerKey::new(owner_id, list_id);
        let stop = isize::try_from(max_size - 1).unwrap_or(isize::MAX);
        let mut session = self.backend.session().await?;
        session.zrange(key.as_str(), 0, stop).await.map_err(|e| {
            error!(key = %key, max_size, error = %e, "Unable to read entries");
            e
        })
    }
}

#[async_trait]
impl<B: SortedSetBackend> RecencyDal for RecencyStore<B> {
    async fn put(&self, batch: Batch) -> Result<(), StoreError> {
        RecencyStore::put(self, batch).await
    }

    async fn get(&self, owner_id: &str, list_id: &str, max_size: usize) -> Result<Vec<String>, StoreError> {
        RecencyStore::get(self, owner_id, list_id, max_size).await
    }
}
