#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tonic::transport::Server;
use tracing::info;

use runlog_fs::OsFilesystem;
use runlog_ingest::logdir::LogdirLoader;
use runlog_proto::v1::data_provider_server::DataProviderServer;
use runlog_server::DataProviderService;

#[derive(Debug, Parser)]
#[command(name = "runlogd", about = "Serves training event logs over gRPC.")]
struct Args {
    /// Root log directory to watch and serve.
    #[arg(long, env = "RUNLOG_LOGDIR")]
    logdir: PathBuf,

    /// Address to bind the gRPC server.
    #[arg(long, env = "RUNLOG_BIND_ADDR", default_value = "[::]:6806")]
    addr: SocketAddr,

    /// Delay between logdir reload passes.
    #[arg(long, env = "RUNLOG_RELOAD_INTERVAL_MS", default_value_t = 5000)]
    reload_interval_ms: u64,

    /// Per-file read buffer size in bytes; 0 selects a default.
    #[arg(long, env = "RUNLOG_READ_BUF_BYTES", default_value_t = 0)]
    read_buf_bytes: usize,

    /// If nonzero, log an ingestion metrics snapshot this often.
    #[arg(long, env = "RUNLOG_METRICS_SNAPSHOT_INTERVAL_MS", default_value_t = 0)]
    metrics_snapshot_interval_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    runlog_observe::logging::init_tracing();
    let args = Args::parse();

    let loader = Arc::new(
        LogdirLoader::new(Arc::new(OsFilesystem), args.logdir.clone())
            .with_read_buf_bytes(args.read_buf_bytes),
    );

    loader.reload().await;
    info!(logdir = %args.logdir.display(), "logdir loaded; now polling");

    {
        let loader = loader.clone();
        let interval = Duration::from_millis(args.reload_interval_ms.max(1));
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                loader.reload().await;
            }
        });
    }

    if args.metrics_snapshot_interval_ms > 0 {
        let metrics = loader.metrics();
        let interval = Duration::from_millis(args.metrics_snapshot_interval_ms);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                info!(
                    target: "runlog_metrics",
                    runs_active = metrics.runs_active.get(),
                    datums_ingested = metrics.datums_ingested.get(),
                    datums_skipped = metrics.datums_skipped.get(),
                    ingest_errors = metrics.ingest_errors.get(),
                    reload_passes = metrics.reload_passes.get(),
                    reload_avg_ns = metrics.reload_duration.snapshot().avg_ns(),
                    "ingestion snapshot"
                );
            }
        });
    }

    let service = DataProviderService::new(loader.clone());
    info!(addr = %args.addr, "serving DataProvider");
    Server::builder()
        .add_service(DataProviderServer::new(service))
        .serve_with_shutdown(args.addr, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    info!("shutting down");
    loader.close().await;
    Ok(())
}
