//! Trading-calendar cron wiring. Every market class runs on the same four
//! trigger windows; each trigger dispatches an independent pipeline cycle.

use std::sync::Arc;

use chrono::Local;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::info;

use crate::config::{FINAL_CALL_CRON, FIRST_SESSION_CRON, LAST_SESSION_CRON, MID_SESSION_CRON};
use crate::error::Result;
use crate::pipeline::Pipeline;
use crate::types::{MarketClass, ALL_CLASSES};

const SESSION_CRONS: &[&str] = &[
    FIRST_SESSION_CRON,
    MID_SESSION_CRON,
    LAST_SESSION_CRON,
    FINAL_CALL_CRON,
];

/// Build and start the scheduler with all market-class triggers registered.
/// The returned handle is used for shutdown on process exit.
pub async fn start(pipeline: Arc<Pipeline>) -> Result<JobScheduler> {
    let sched = JobScheduler::new().await?;

    for &class in ALL_CLASSES {
        for cron in SESSION_CRONS {
            sched.add(cycle_job(Arc::clone(&pipeline), class, cron)?).await?;
        }
    }

    sched.start().await?;
    info!(
        classes = ALL_CLASSES.len(),
        triggers = SESSION_CRONS.len(),
        "scheduler started",
    );
    Ok(sched)
}

fn cycle_job(pipeline: Arc<Pipeline>, class: MarketClass, cron: &str) -> Result<Job> {
    let job = Job::new_async(cron, move |_uuid, _lock| {
        let pipeline = Arc::clone(&pipeline);
        Box::pin(async move {
            // Fire time is captured at dispatch; derived rows are stamped
            // with it rather than with whenever persistence happens.
            let fire_time = Local::now();
            pipeline.run_cycle(class, fire_time).await;
        })
    })?;
    Ok(job)
}
