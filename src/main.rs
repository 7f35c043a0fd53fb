mod api;
mod config;
mod db;
mod error;
mod fetcher;
mod parser;
mod pipeline;
mod scheduler;
mod session;
mod stats;
mod types;

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::api::routes::{router, ApiState};
use crate::config::Config;
use crate::error::Result;
use crate::pipeline::Pipeline;
use crate::stats::IngestStats;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let pool =
        sqlx::SqlitePool::connect(&format!("sqlite:{}?mode=rwc", cfg.db_path)).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database ready at {}", cfg.db_path);

    // --- Shared ingest counters ---
    let stats = IngestStats::new();

    // --- Pipeline + cron calendar ---
    let pipeline = Arc::new(Pipeline::new(&cfg, pool.clone(), Arc::clone(&stats))?);
    let mut sched = scheduler::start(pipeline).await?;

    // --- Ops API ---
    let api_state = ApiState { pool: pool.clone(), stats };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Ops API listening on {bind_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received, draining");
        })
        .await?;

    // In-flight cycles finish on the runtime; stop issuing new triggers.
    sched.shutdown().await?;
    pool.close().await;

    Ok(())
}
