// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic recency-store usage example.
//!
//! Demonstrates:
//! 1. Connecting to a Redis Cluster (or a standalone Redis)
//! 2. Touching members of a list with a batch
//! 3. Reading the list back, newest first
//! 4. Deleting a member and watching the list trim itself
//! 5. Displaying pool gauges and latency histograms
//! 6. Clean shutdown
//!
//! # Run
//!
//! ```bash
//! docker run --rm -p 6379:6379 redis:7-alpine
//! RECENCY_BOOTSTRAP=localhost:6379 cargo run --example basic_usage
//! ```

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use recency_store::{BatchBuilder, FacadeMetrics, RecencyStore, RecencyStoreConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║           recency-store: Basic Usage Example                  ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Connect
    // ─────────────────────────────────────────────────────────────────────────
    let bootstrap = std::env::var("RECENCY_BOOTSTRAP").unwrap_or_else(|_| "localhost:6379".into());
    println!("📦 Connecting via {}...", bootstrap);

    let config = RecencyStoreConfig {
        bootstrap_host: Some(bootstrap),
        max_set_size: 3,
        stats_interval_secs: 1,
        ..Default::default()
    };
    let store = RecencyStore::connect_with_metrics(config, Arc::new(FacadeMetrics)).await?;
    println!("   ✅ Nodes: {:?}", store.backend().nodes());

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Touch five members, one second apart
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📝 Touching 5 members (list keeps the newest 3)...");
    let now = SystemTime::now();
    let mut batch = BatchBuilder::new();
    for i in 0..5u64 {
        let member = format!("member-{}", i);
        batch.add_update("demo-owner", "recent", member.as_str(), now - Duration::from_secs(10 - i));
        println!("   └─ {}", member);
    }
    store.put(batch.build()).await?;

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Read back
    // ─────────────────────────────────────────────────────────────────────────
    let recent = store.get("demo-owner", "recent", 10).await?;
    println!("\n📖 Newest first: {:?}", recent);

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Delete wins over an update in the same batch
    // ─────────────────────────────────────────────────────────────────────────
    let mut batch = BatchBuilder::new();
    batch
        .add_update("demo-owner", "recent", "member-4", SystemTime::now())
        .add_delete("demo-owner", "recent", "member-4");
    store.put(batch.build()).await?;
    let recent = store.get("demo-owner", "recent", 10).await?;
    println!("🗑️  After update+delete of member-4: {:?}", recent);

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Metrics
    // ─────────────────────────────────────────────────────────────────────────
    tokio::time::sleep(Duration::from_millis(1100)).await;
    println!("\n📊 Pools:");
    for (addr, stats) in store.backend().stats() {
        println!("   └─ {}: in_use={} idle={}", addr, stats.in_use, stats.idle);
    }
    println!("\n📈 Raw Metrics:");
    dump_metrics(&snapshotter);

    // ─────────────────────────────────────────────────────────────────────────
    // 6. Shutdown
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🛑 Shutting down...");
    store.shutdown().await;
    println!("   ✅ Health at exit: {:?}", store.backend().health());

    println!("\n💡 Inspect with: redis-cli ZRANGE demo-owner_recent 0 -1 WITHSCORES");
    Ok(())
}

fn dump_metrics(snapshotter: &Snapshotter) {
    let mut gauges = vec![];
    let mut histograms = vec![];

    for (composite_key, _, _, value) in snapshotter.snapshot().into_vec() {
        let (_, key) = composite_key.into_parts();
        let name = key.name().to_string();
        match value {
            DebugValue::Gauge(v) => gauges.push((name, v.into_inner())),
            DebugValue::Histogram(samples) => {
                let count = samples.len();
                let max = samples.iter().map(|v| v.into_inner()).fold(0.0, f64::max);
                histograms.push((name, count, max));
            }
            DebugValue::Counter(_) => {}
        }
    }
    gauges.sort_by(|a, b| a.0.cmp(&b.0));
    histograms.sort_by(|a, b| a.0.cmp(&b.0));

    for (name, value) in &gauges {
        println!("   ├─ {} = {:.0}", name, value);
    }
    for (name, count, max) in &histograms {
        println!("   └─ {} count={} max={:.6}", name, count, max);
    }
    if gauges.is_empty() && histograms.is_empty() {
        println!("   └─ (no metrics recorded)");
    }
}
