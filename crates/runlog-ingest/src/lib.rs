#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

//! Turns streams of decoded events into queryable, bounded-memory,
//! reservoir-sampled time series: per-tag reservoirs, the legacy-summary
//! compatibility layer, per-run readers and accumulators, and the top-level
//! logdir loader.

use runlog_observe::metrics::{Counter, DurationAgg, Gauge};

pub mod compat;
pub mod logdir;
pub mod reservoir;
pub mod run;

/// Ingestion counters shared by one logdir loader and all of its runs.
#[derive(Debug, Default)]
pub struct LoadMetrics {
    pub datums_ingested: Counter,
    pub datums_skipped: Counter,
    pub ingest_errors: Counter,
    pub runs_active: Gauge,
    pub reload_passes: Counter,
    pub reload_duration: DurationAgg,
}
