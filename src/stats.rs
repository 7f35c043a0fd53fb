//! Per-class ingest counters, the observable failure signal for a pipeline
//! that otherwise never surfaces errors to the scheduler. Updated by
//! concurrently running cycles, read by the ops API.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;

#[derive(Default)]
pub struct ClassStats {
    /// Cycles started.
    pub cycles: AtomicU64,
    /// Cycles that fetched successfully and committed their snapshot.
    pub persisted: AtomicU64,
    /// Failed attempts across all cycles (retries actually taken).
    pub retried_attempts: AtomicU64,
    /// Cycles that burned all four attempts with no snapshot.
    pub exhausted: AtomicU64,
    /// Cycles whose transaction rolled back.
    pub persist_failures: AtomicU64,
    /// Unix seconds of the last committed cycle (0 = never).
    pub last_persist_unix: AtomicI64,
}

pub struct IngestStats {
    classes: DashMap<&'static str, Arc<ClassStats>>,
}

impl IngestStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { classes: DashMap::new() })
    }

    fn class(&self, name: &'static str) -> Arc<ClassStats> {
        self.classes.entry(name).or_default().clone()
    }

    pub fn record_cycle(&self, name: &'static str) {
        self.class(name).cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fetch_success(&self, name: &'static str, failed_attempts: u32) {
        self.class(name)
            .retried_attempts
            .fetch_add(u64::from(failed_attempts), Ordering::Relaxed);
    }

    pub fn record_exhausted(&self, name: &'static str) {
        let stats = self.class(name);
        stats
            .retried_attempts
            .fetch_add(u64::from(crate::config::MAX_RETRIES), Ordering::Relaxed);
        stats.exhausted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_persist_ok(&self, name: &'static str) {
        let stats = self.class(name);
        stats.persisted.fetch_add(1, Ordering::Relaxed);
        stats
            .last_persist_unix
            .store(chrono::Local::now().timestamp(), Ordering::Relaxed);
    }

    pub fn record_persist_failure(&self, name: &'static str) {
        self.class(name).persist_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> Vec<ClassStatsView> {
        let mut views: Vec<ClassStatsView> = self
            .classes
            .iter()
            .map(|entry| {
                let s = entry.value();
                ClassStatsView {
                    class: entry.key(),
                    cycles: s.cycles.load(Ordering::Relaxed),
                    persisted: s.persisted.load(Ordering::Relaxed),
                    retried_attempts: s.retried_attempts.load(Ordering::Relaxed),
                    exhausted: s.exhausted.load(Ordering::Relaxed),
                    persist_failures: s.persist_failures.load(Ordering::Relaxed),
                    last_persist_unix: s.last_persist_unix.load(Ordering::Relaxed),
                }
            })
            .collect();
        views.sort_by_key(|v| v.class);
        views
    }
}

#[derive(Debug, Serialize)]
pub struct ClassStatsView {
    pub class: &'static str,
    pub cycles: u64,
    pub persisted: u64,
    pub retried_attempts: u64,
    pub exhausted: u64,
    pub persist_failures: u64,
    pub last_persist_unix: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_per_class() {
        let stats = IngestStats::new();
        stats.record_cycle("nifty");
        stats.record_fetch_success("nifty", 2);
        stats.record_persist_ok("nifty");
        stats.record_cycle("stocks");
        stats.record_exhausted("stocks");

        let views = stats.snapshot();
        let nifty = views.iter().find(|v| v.class == "nifty").unwrap();
        assert_eq!(nifty.cycles, 1);
        assert_eq!(nifty.persisted, 1);
        assert_eq!(nifty.retried_attempts, 2);
        assert!(nifty.last_persist_unix > 0);

        let stocks = views.iter().find(|v| v.class == "stocks").unwrap();
        assert_eq!(stocks.exhausted, 1);
        assert_eq!(stocks.persisted, 0);
    }
}
