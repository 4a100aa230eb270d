// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replay staged member files into the store.
//!
//! Every members file without a `DONE` trailer becomes one batch. A file is
//! marked done only after its batch was applied, so an interrupted run can
//! simply be restarted.
//!
//! # Run
//!
//! ```bash
//! RECENCY_BOOTSTRAP=localhost:6379 cargo run --example replay -- ./staging
//! ```
//!
//! With `--seed N` the example first stages `N` synthetic records.

use std::time::{SystemTime, UNIX_EPOCH};

use recency_store::staging::{MemberRecord, RecordKind, StagedRecords, StagingDir};
use recency_store::{Batch, RecencyStore, RecencyStoreConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    let root = args.next().unwrap_or_else(|| "./staging".into());
    let seed = match (args.next().as_deref(), args.next()) {
        (Some("--seed"), Some(n)) => n.parse::<usize>()?,
        _ => 0,
    };

    let staging = StagingDir::open(&root)?;
    if seed > 0 {
        let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs() as i64;
        let records = (0..seed)
            .map(|i| MemberRecord {
                owner_id: format!("owner-{}", i % 10),
                list_id: "replayed".into(),
                member_id: format!("member-{}", i),
                updated_at: now - i as i64,
            })
            .collect();
        let files = staging.write_batches(100, &StagedRecords::Members(records))?;
        info!(files = files.len(), records = seed, "Seeded staging directory");
    }

    let config = RecencyStoreConfig {
        bootstrap_host: Some(std::env::var("RECENCY_BOOTSTRAP").unwrap_or_else(|_| "localhost:6379".into())),
        ..Default::default()
    };
    let store = RecencyStore::connect(config).await?;

    let pending = staging.pending(RecordKind::Members)?;
    info!(root = %root, files = pending.len(), "Replaying staged members");

    let mut applied = 0usize;
    for path in &pending {
        let records: Vec<MemberRecord> = staging.read(path)?;
        let count = records.len();
        let batch: Batch = records.into_iter().map(MemberRecord::into_mutation).collect();
        if let Err(e) = store.put(batch).await {
            warn!(path = %path.display(), error = %e, "Replay stopped, file left pending");
            break;
        }
        staging.mark_done(path)?;
        applied += count;
        info!(path = %path.display(), records = count, "File applied");
    }

    info!(applied, "Replay finished");
    store.shutdown().await;
    Ok(())
}
