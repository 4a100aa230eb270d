//! Chaos Testing for Recency Store
//!
//! This module tests failure scenarios using:
//! 1. **FailingBackend wrapper** - precise error injection at specific command counts
//! 2. **Container killing** - abrupt Redis death mid-operation
//! 3. **Data corruption** - keys of the wrong type in Redis
//!
//! # Running Chaos Tests
//! ```bash
//! cargo test --test chaos -- --ignored --nocapture
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

use recency_store::metrics::RecordingMetrics;
use recency_store::storage::traits::{SortedSetBackend, SortedSetSession, StoreError};
use recency_store::{Batch, BatchBuilder, InMemorySortedSets, RecencyStore, RecencyStoreConfig};

use testcontainers::{clients::Cli, core::WaitFor, Container, GenericImage};

// =============================================================================
// Failing Backend Wrapper - Precise Error Injection
// =============================================================================

/// Wraps a backend and fails the listed command numbers (1-indexed, counted
/// across every session).
pub struct FailingBackend<B: SortedSetBackend> {
    inner: B,
    calls: AtomicU64,
    fail_on_calls: Vec<u64>,
}

impl<B: SortedSetBackend> FailingBackend<B> {
    pub fn new(inner: B, fail_on_calls: Vec<u64>) -> Self {
        Self {
            inner,
            calls: AtomicU64::new(0),
            fail_on_calls,
        }
    }

    fn maybe_fail(&self) -> Result<(), StoreError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_on_calls.contains(&n) {
            Err(StoreError::Backend(format!("injected failure on call {}", n)))
        } else {
            Ok(())
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

struct FailingSession<'a, B: SortedSetBackend> {
    owner: &'a FailingBackend<B>,
    inner: Box<dyn SortedSetSession + 'a>,
}

#[async_trait]
impl<B: SortedSetBackend> SortedSetBackend for FailingBackend<B> {
    async fn session<'a>(&'a self) -> Result<Box<dyn SortedSetSession + 'a>, StoreError> {
        let inner = self.inner.session().await?;
        Ok(Box::new(FailingSession { owner: self, inner }))
    }
}

#[async_trait]
impl<B: SortedSetBackend> SortedSetSession for FailingSession<'_, B> {
    async fn zadd(&mut self, key: &str, score: i64, member: &str) -> Result<(), StoreError> {
        self.owner.maybe_fail()?;
        self.inner.zadd(key, score, member).await
    }

    async fn zrem(&mut self, key: &str, member: &str) -> Result<(), StoreError> {
        self.owner.maybe_fail()?;
        self.inner.zrem(key, member).await
    }

    async fn zremrangebyrank(&mut self, key: &str, start: isize, stop: isize) -> Result<u64, StoreError> {
        self.owner.maybe_fail()?;
        self.inner.zremrangebyrank(key, start, stop).await
    }

    async fn zrange(&mut self, key: &str, start: isize, stop: isize) -> Result<Vec<String>, StoreError> {
        self.owner.maybe_fail()?;
        self.inner.zrange(key, start, stop).await
    }
}

fn at(secs: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(1_700_000_000 + secs)
}

/// 3 updates, 1 delete, 2 touched keys: 6 commands.
fn mixed_batch() -> Batch {
    let mut b = BatchBuilder::new();
    b.add_update("u", "a", "m1", at(1))
        .add_update("u", "a", "m2", at(2))
        .add_update("u", "b", "m3", at(3))
        .add_delete("u", "a", "m1");
    b.build()
}

// =============================================================================
// Chaos Tests - Injected Command Failures
// =============================================================================

#[tokio::test]
async fn chaos_failure_at_every_command_then_replay_converges() {
    let clean = RecencyStore::with_backend(InMemorySortedSets::new(), 2, RecordingMetrics::new()).unwrap();
    clean.put(mixed_batch()).await.unwrap();
    let expected_a = clean.get("u", "a", 10).await.unwrap();
    let expected_b = clean.get("u", "b", 10).await.unwrap();

    for fail_at in 1..=6u64 {
        let backend = FailingBackend::new(InMemorySortedSets::new(), vec![fail_at]);
        let store = RecencyStore::with_backend(backend, 2, RecordingMetrics::new()).unwrap();

        let err = store.put(mixed_batch()).await.unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)), "call {}: {:?}", fail_at, err);
        // aborted on the failing command
        assert_eq!(store.backend().calls(), fail_at);

        store.put(mixed_batch()).await.unwrap();
        assert_eq!(store.get("u", "a", 10).await.unwrap(), expected_a, "call {}", fail_at);
        assert_eq!(store.get("u", "b", 10).await.unwrap(), expected_b, "call {}", fail_at);
    }
}

#[tokio::test]
async fn chaos_get_failure_is_returned_not_empty() {
    let backend = FailingBackend::new(InMemorySortedSets::new(), vec![4]);
    let store = RecencyStore::with_backend(backend, 10, RecordingMetrics::new()).unwrap();

    let mut b = BatchBuilder::new();
    b.add_update("u", "l", "m", at(1));
    store.put(b.build()).await.unwrap(); // calls 1..=2

    assert_eq!(store.get("u", "l", 5).await.unwrap(), vec!["m"]); // call 3
    assert!(store.get("u", "l", 5).await.is_err()); // call 4
    assert_eq!(store.get("u", "l", 5).await.unwrap(), vec!["m"]);
}

#[tokio::test]
async fn chaos_concurrent_puts_with_sporadic_failures() {
    let backend = FailingBackend::new(InMemorySortedSets::new(), (1..=200).filter(|n| n % 7 == 0).collect());
    let store = Arc::new(RecencyStore::with_backend(backend, 5, RecordingMetrics::new()).unwrap());

    let mut handles = Vec::new();
    for w in 0..10u64 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let mut failures = 0usize;
            for round in 0..5u64 {
                let mut b = BatchBuilder::new();
                b.add_update("u", "shared", format!("w{}r{}", w, round), at(w * 10 + round));
                if store.put(b.build()).await.is_err() {
                    failures += 1;
                }
            }
            failures
        }));
    }
    let mut failures = 0usize;
    for h in handles {
        failures += h.await.unwrap();
    }

    assert!(failures > 0);
    assert!(store.backend().inner.cardinality("u_shared") <= 5 + failures);
}

// =============================================================================
// Container Helpers
// =============================================================================

fn redis_container(docker: &Cli) -> Container<'_, GenericImage> {
    let image = GenericImage::new("redis", "7-alpine")
        .with_exposed_port(6379)
        .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"));
    docker.run(image)
}

fn config_for(port: u16) -> RecencyStoreConfig {
    RecencyStoreConfig {
        bootstrap_host: Some(format!("127.0.0.1:{}", port)),
        max_active_connections: 4,
        min_idle_connections: 2,
        connect_timeout_ms: 500,
        command_timeout_ms: 500,
        borrow_timeout_ms: Some(1000),
        ..Default::default()
    }
}

// =============================================================================
// Chaos Tests - Container Killing (Abrupt Death)
// =============================================================================

#[tokio::test]
#[ignore] // Requires Docker
async fn chaos_redis_killed_during_puts() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let port = redis.get_host_port_ipv4(6379);

    let store = Arc::new(RecencyStore::connect(config_for(port)).await.unwrap());

    let mut handles = Vec::new();
    for w in 0..8u64 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let mut outcomes = Vec::new();
            for round in 0..20u64 {
                let mut b = BatchBuilder::new();
                b.add_update(format!("owner{}", w), "l", format!("m{}", round), SystemTime::now());
                outcomes.push(store.put(b.build()).await.is_ok());
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            outcomes
        }));
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
    redis.stop();

    // every caller returns; nothing hangs past the configured timeouts
    let joined = tokio::time::timeout(Duration::from_secs(30), async {
        let mut all = Vec::new();
        for h in handles {
            all.extend(h.await.unwrap());
        }
        all
    })
    .await
    .expect("callers hung after redis death");

    assert!(joined.iter().any(|ok| !ok), "no call observed the outage");
    let stats = store.backend().stats();
    assert!(stats.values().all(|s| s.in_use == 0));

    store.shutdown().await;
}

#[tokio::test]
#[ignore] // Requires Docker
async fn chaos_redis_unreachable_at_startup() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let port = redis.get_host_port_ipv4(6379);
    redis.stop();

    let err = RecencyStore::connect(config_for(port)).await.err().unwrap();
    assert!(matches!(err, StoreError::Topology(_)), "{:?}", err);
}

// =============================================================================
// Chaos Tests - Data Corruption Scenarios
// =============================================================================

#[tokio::test]
#[ignore] // Requires Docker
async fn chaos_wrong_type_key_aborts_put() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let port = redis.get_host_port_ipv4(6379);

    let client = redis::Client::open(format!("redis://127.0.0.1:{}", port)).unwrap();
    let mut raw = client.get_multiplexed_async_connection().await.unwrap();
    redis::cmd("SET")
        .arg("u_corrupt")
        .arg("not a sorted set")
        .query_async::<()>(&mut raw)
        .await
        .unwrap();

    let store = RecencyStore::connect(config_for(port)).await.unwrap();
    let mut b = BatchBuilder::new();
    b.add_update("u", "fine", "m1", SystemTime::now())
        .add_update("u", "corrupt", "m2", SystemTime::now())
        .add_update("u", "later", "m3", SystemTime::now());
    let err = store.put(b.build()).await.unwrap_err();
    assert!(matches!(err, StoreError::Command(_)), "{:?}", err);

    // applied before the failure, skipped after it
    assert_eq!(store.get("u", "fine", 10).await.unwrap(), vec!["m1"]);
    assert!(store.get("u", "later", 10).await.unwrap().is_empty());
    assert!(store.get("u", "corrupt", 10).await.is_err());

    // a server error leaves the connection usable
    assert_eq!(store.backend().stats().values().map(|s| s.idle).sum::<usize>(), 1);

    store.shutdown().await;
}

// =============================================================================
// Chaos Tests - Lifecycle Edge Cases
// =============================================================================

#[tokio::test]
#[ignore] // Requires Docker
async fn chaos_rapid_connect_shutdown_cycles() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let port = redis.get_host_port_ipv4(6379);

    for i in 0..10 {
        let store = RecencyStore::connect(config_for(port)).await.unwrap();
        let mut b = BatchBuilder::new();
        b.add_update("cycle", "l", format!("m{}", i), SystemTime::now());
        store.put(b.build()).await.unwrap();
        store.shutdown().await;
        store.shutdown().await; // idempotent
    }

    let store = RecencyStore::connect(config_for(port)).await.unwrap();
    assert_eq!(store.get("cycle", "l", 100).await.unwrap().len(), 10);
    store.shutdown().await;
}
