// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the dosing catalog.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The embedding service is responsible for choosing the exporter.
//!
//! # Metric Naming Convention
//! - `dose_catalog_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `backend`: sql, memory
//! - `operation`: put_bulk, delete_bulk, compound_names, ...
//! - `status`: success, error
//! - `cache`: compound_names, blend_names, frequency_names, variants

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record a store operation outcome
pub fn record_store_operation(backend: &str, operation: &str, status: &str) {
    counter!(
        "dose_catalog_store_operations_total",
        "backend" => backend.to_string(),
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record operation latency
pub fn record_latency(backend: &str, operation: &str, duration: Duration) {
    histogram!(
        "dose_catalog_operation_seconds",
        "backend" => backend.to_string(),
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a cache lookup (`result` is hit or miss)
pub fn record_cache_request(cache: &str, hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!(
        "dose_catalog_cache_requests_total",
        "cache" => cache.to_string(),
        "result" => result
    )
    .increment(1);
}

/// Record a loader invocation
pub fn record_cache_load(cache: &str) {
    counter!(
        "dose_catalog_cache_loads_total",
        "cache" => cache.to_string()
    )
    .increment(1);
}

/// Record an appended revision and move the head gauge
pub fn record_revision(object_type: &str, revision: u64) {
    counter!(
        "dose_catalog_revisions_total",
        "object_type" => object_type.to_string()
    )
    .increment(1);
    set_revision_head(object_type, revision);
}

pub fn set_revision_head(object_type: &str, revision: u64) {
    gauge!(
        "dose_catalog_revision_head",
        "object_type" => object_type.to_string()
    )
    .set(revision as f64);
}

/// Record startup duration by phase
pub fn record_startup_phase(phase: &str, duration: Duration) {
    histogram!(
        "dose_catalog_startup_seconds",
        "phase" => phase.to_string()
    )
    .record(duration.as_secs_f64());
}

/// A timing guard that records latency on drop
pub struct LatencyTimer {
    backend: &'static str,
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(backend: &'static str, operation: &'static str) -> Self {
        Self {
            backend,
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.backend, self.operation, self.start.elapsed());
    }
}
