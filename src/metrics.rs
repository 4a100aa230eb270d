// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics emission for the recency store.
//!
//! Components never reach for a global recorder directly; they receive an
//! `Arc<dyn MetricsSink>` at construction.
//!
//! - [`TracingMetrics`] (default) writes each metric as a structured
//!   `tracing` event on target `recency_store::metrics`.
//! - [`FacadeMetrics`] forwards to the `metrics` crate. The host process
//!   picks the exporter (Prometheus, OTEL, ...).
//! - [`RecordingMetrics`] keeps everything in memory for assertions.
//!
//! # Metric Names
//! - `{prefix}.put.latency`, `{prefix}.get.latency` (timings, one per call)
//! - `{prefix}.redis.{addr}.active`, `{prefix}.redis.{addr}.idle` (gauges,
//!   one per node per sampling interval)

use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};
use parking_lot::Mutex;
use tracing::info;

/// Destination for timings, counters and gauges.
pub trait MetricsSink: Send + Sync {
    /// Record the time between `start` and `end`.
    fn put_timing(&self, name: &str, start: Instant, end: Instant);

    fn put_count(&self, name: &str, value: u64);

    fn put_gauge(&self, name: &str, value: f64);
}

/// Structured-log metrics.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn put_timing(&self, name: &str, start: Instant, end: Instant) {
        let elapsed = end.saturating_duration_since(start);
        info!(target: "recency_store::metrics", metric = name, time_ms = elapsed.as_secs_f64() * 1000.0);
    }

    fn put_count(&self, name: &str, value: u64) {
        info!(target: "recency_store::metrics", metric = name, incr = value);
    }

    fn put_gauge(&self, name: &str, value: f64) {
        info!(target: "recency_store::metrics", metric = name, gauge = value);
    }
}

/// Forwards to the `metrics` facade: timings become histograms in seconds.
#[derive(Debug, Default, Clone, Copy)]
pub struct FacadeMetrics;

impl MetricsSink for FacadeMetrics {
    fn put_timing(&self, name: &str, start: Instant, end: Instant) {
        histogram!(name.to_string()).record(end.saturating_duration_since(start).as_secs_f64());
    }

    fn put_count(&self, name: &str, value: u64) {
        counter!(name.to_string()).increment(value);
    }

    fn put_gauge(&self, name: &str, value: f64) {
        gauge!(name.to_string()).set(value);
    }
}

/// One captured metric.
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    Timing { name: String, elapsed: Duration },
    Count { name: String, value: u64 },
    Gauge { name: String, value: f64 },
}

impl Recorded {
    pub fn name(&self) -> &str {
        match self {
            Recorded::Timing { name, .. } | Recorded::Count { name, .. } | Recorded::Gauge { name, .. } => name,
        }
    }
}

/// In-memory sink for tests.
#[derive(Debug, Default)]
pub struct RecordingMetrics {
    entries: Mutex<Vec<Recorded>>,
}

impl RecordingMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Snapshot of everything recorded so far.
    pub fn entries(&self) -> Vec<Recorded> {
        self.entries.lock().clone()
    }

    /// How many entries carry `name`.
    pub fn count_named(&self, name: &str) -> usize {
        self.entries.lock().iter().filter(|r| r.name() == name).count()
    }

    /// Most recent gauge value for `name`.
    pub fn last_gauge(&self, name: &str) -> Option<f64> {
        self.entries.lock().iter().rev().find_map(|r| match r {
            Recorded::Gauge { name: n, value } if n == name => Some(*value),
            _ => None,
        })
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl MetricsSink for RecordingMetrics {
    fn put_timing(&self, name: &str, start: Instant, end: Instant) {
        self.entries.lock().push(Recorded::Timing {
            name: name.to_string(),
            elapsed: end.saturating_duration_since(start),
        });
    }

    fn put_count(&self, name: &str, value: u64) {
        self.entries.lock().push(Recorded::Count { name: name.to_string(), value });
    }

    fn put_gauge(&self, name: &str, value: f64) {
        self.entries.lock().push(Recorded::Gauge { name: name.to_string(), value });
    }
}

/// A timing guard that records latency on drop
pub struct LatencyTimer {
    sink: Arc<dyn MetricsSink>,
    name: String,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(sink: Arc<dyn MetricsSink>, name: String) -> Self {
        Self {
            sink,
            name,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        self.sink.put_timing(&self.name, self.start, Instant::now());
    }
}
