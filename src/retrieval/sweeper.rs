//! TTL sweep of session collections

use super::collection::SESSION_PREFIX;
use super::store::{VectorStore, VectorStoreError};
use crate::observability::metrics::metrics;
use crate::sweep_span;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn, Instrument};

/// Sweep settings
#[derive(Debug, Clone, Copy)]
pub struct SweepConfig {
    pub interval: Duration,
    pub ttl: ChronoDuration,
    /// Scroll page size; every page is read when looking for the oldest timestamp
    pub scroll_limit: usize,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            ttl: ChronoDuration::hours(24),
            scroll_limit: 1000,
        }
    }
}

/// Outcome of one sweep pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub deleted: Vec<String>,
    pub skipped: Vec<String>,
}

/// Why a collection was removed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Keep,
    Empty,
    Expired,
}

/// Periodic deletion of stale or empty session collections
pub struct TtlSweeper {
    store: Arc<dyn VectorStore>,
    config: SweepConfig,
}

impl TtlSweeper {
    pub fn new(store: Arc<dyn VectorStore>, config: SweepConfig) -> Self {
        Self { store, config }
    }

    /// One pass over every `session_` collection. Per-collection failures
    /// are logged and skipped; only a failed listing aborts the pass.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<SweepReport, VectorStoreError> {
        let collections = self.store.list_collections().await?;
        let mut report = SweepReport::default();

        for name in collections
            .into_iter()
            .filter(|n| n.starts_with(SESSION_PREFIX))
        {
            report.scanned += 1;
            match self.inspect(&name, now).await {
                Ok(Verdict::Keep) => {}
                Ok(verdict) => match self.store.delete_collection(&name).await {
                    Ok(()) => {
                        info!(collection = %name, reason = ?verdict, "Swept collection");
                        report.deleted.push(name);
                    }
                    Err(e) => {
                        warn!(collection = %name, error = %e, "Failed to delete collection");
                        report.skipped.push(name);
                    }
                },
                Err(e) => {
                    warn!(collection = %name, error = %e, "Failed to inspect collection");
                    report.skipped.push(name);
                }
            }
        }

        metrics().sweep_completed(report.deleted.len() as u64, report.skipped.len() as u64);
        Ok(report)
    }

    async fn inspect(&self, name: &str, now: DateTime<Utc>) -> Result<Verdict, VectorStoreError> {
        let payloads = self.store.scroll(name, self.config.scroll_limit).await?;
        if payloads.is_empty() {
            return Ok(Verdict::Empty);
        }

        let Some(oldest) = payloads.iter().filter_map(|p| p.timestamp).min() else {
            debug!(collection = name, "No timestamped points, keeping");
            return Ok(Verdict::Keep);
        };

        let age = now.timestamp() - oldest;
        if age > self.config.ttl.num_seconds() {
            Ok(Verdict::Expired)
        } else {
            Ok(Verdict::Keep)
        }
    }

    /// Sweep on a fixed interval until `shutdown` flips to `true`
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        info!(
            interval_secs = self.config.interval.as_secs(),
            ttl_hours = self.config.ttl.num_hours(),
            "TTL sweeper started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let pass = self.sweep_once(Utc::now()).instrument(sweep_span!());
                    match pass.await {
                        Ok(report) => debug!(
                            scanned = report.scanned,
                            deleted = report.deleted.len(),
                            "Sweep pass finished"
                        ),
                        Err(e) => error!(error = %e, "Sweep pass failed to list collections"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("TTL sweeper stopped");
    }
}
