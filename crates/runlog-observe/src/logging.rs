use tracing_subscriber::EnvFilter;

/// Initializes a `tracing_subscriber` using `RUNLOG_LOG` first, then
/// `RUST_LOG`, then a default.
///
/// Log field contract for runlog daemons:
/// - Include `run` on any per-run event (discovery, removal, ingestion skips).
/// - Include `file` on any per-event-file event (retirement, bad records).
/// - Include `tag` when a specific time series is involved.
pub fn init_tracing() {
    let filter = env_filter();
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env("RUNLOG_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}
