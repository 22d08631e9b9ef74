//! Sync orchestration.
//!
//! Drives one job run end to end: claim the job, pull the connector's
//! content stream item by item, commit each item through the version
//! store, and report statistics as counts accumulate. Side effects are
//! strictly ordered — an item is durably committed before its count is
//! reported — so observed progress never overstates durable state.
//!
//! The orchestrator never retries internally. A failed run routes the job
//! back to `pending` (or to `dead_letter`) in the ledger, and a later
//! trigger re-claims it.

use serde_json::json;
use sqlx::SqlitePool;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::chunk::ParagraphSegmenter;
use crate::config::Config;
use crate::connector::{ConnectorRegistry, ContentStream};
use crate::error::SyncError;
use crate::ledger;
use crate::models::{ConnectorKind, JobStatus};
use crate::store;
use crate::store::NewSource;

/// What a sync invocation did, for callers that render a summary.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub job_id: String,
    pub run_id: Option<String>,
    /// True when the claim was rejected because the scope was already
    /// running — a duplicate trigger, reported as success.
    pub no_op: bool,
    pub job_status: JobStatus,
    pub fetched: i64,
    pub upserted: i64,
    pub chunks_created: i64,
    pub error: Option<String>,
}

/// Run one sync for a scope.
///
/// Claims the newest pending job (enqueueing one when none is waiting),
/// then drives it to `completed` or `failed`. `AlreadyRunning` anywhere in
/// the claim path returns a no-op outcome.
pub async fn run_sync(
    pool: &SqlitePool,
    config: &Config,
    registry: &ConnectorRegistry,
    scope_id: &str,
) -> anyhow::Result<SyncOutcome> {
    let scope_cfg = config.scope(scope_id)?;
    let kind = scope_cfg.connector_kind()?;

    let job = match ledger::latest_pending_for_scope(pool, scope_id).await? {
        Some(job) => job,
        None => match ledger::enqueue(pool, &scope_cfg.workspace, scope_id, kind).await {
            Ok(job) => job,
            Err(SyncError::AlreadyRunning { .. }) => {
                return Ok(no_op_outcome());
            }
            Err(e) => return Err(e.into()),
        },
    };

    let run = match ledger::claim(pool, &job.id).await {
        Ok(run) => run,
        Err(SyncError::AlreadyRunning { .. }) => {
            info!(scope = scope_id, job = %job.id, "scope already running; duplicate trigger ignored");
            return Ok(no_op_outcome());
        }
        Err(e) => return Err(e.into()),
    };

    info!(scope = scope_id, job = %job.id, run = %run.id, attempt = run.attempt, "run claimed");

    let mut counters = RunCounters::default();
    let result = execute_run(pool, config, registry, scope_id, kind, &run.id, &mut counters).await;

    match result {
        Ok(()) => {
            let final_stats = counters.to_patch("done", None);
            ledger::complete(pool, &run.id, &final_stats).await?;
            info!(
                scope = scope_id,
                run = %run.id,
                upserted = counters.upserted,
                chunks = counters.chunks_created,
                "run completed"
            );
            Ok(SyncOutcome {
                job_id: job.id,
                run_id: Some(run.id),
                no_op: false,
                job_status: JobStatus::Completed,
                fetched: counters.fetched,
                upserted: counters.upserted,
                chunks_created: counters.chunks_created,
                error: None,
            })
        }
        Err(e) => {
            let message = e.run_message();
            warn!(scope = scope_id, run = %run.id, error = %message, "run failed");
            let next = ledger::fail(pool, &run.id, &message, config.sync.max_attempts).await?;
            Ok(SyncOutcome {
                job_id: job.id,
                run_id: Some(run.id),
                no_op: false,
                job_status: next,
                fetched: counters.fetched,
                upserted: counters.upserted,
                chunks_created: counters.chunks_created,
                error: Some(message),
            })
        }
    }
}

async fn execute_run(
    pool: &SqlitePool,
    config: &Config,
    registry: &ConnectorRegistry,
    scope_id: &str,
    kind: ConnectorKind,
    run_id: &str,
    counters: &mut RunCounters,
) -> Result<(), SyncError> {
    let scope_cfg = config
        .scope(scope_id)
        .map_err(|e| SyncError::Connector(e.to_string()))?;
    let connector = registry.find(scope_id).ok_or_else(|| {
        SyncError::Connector(format!("no connector registered for scope '{}'", scope_id))
    })?;

    ledger::record_stats(pool, run_id, &json!({ "phase": "listing" })).await?;

    let mut stream: Box<dyn ContentStream> = connector.open().await?;
    counters.discovered = stream.size_hint().map(|n| n as i64);
    ledger::record_stats(pool, run_id, &counters.to_patch("fetching", None)).await?;

    let segmenter = ParagraphSegmenter::new(config.chunking.max_tokens);
    let mut eta = EtaEstimator::new(config.sync.eta_alpha);
    let mut last_item = Instant::now();
    let stats_every = config.sync.stats_every.max(1);

    while let Some(item) = stream.next_item().await? {
        let hash = store::content_hash(&item.body);

        let mut metadata = item.metadata.clone();
        if let Some(map) = metadata.as_object_mut() {
            map.insert("scope_id".to_string(), json!(scope_id));
            map.insert("account".to_string(), json!(scope_cfg.account));
        } else {
            metadata = json!({
                "scope_id": scope_id,
                "account": scope_cfg.account,
                "connector": metadata,
            });
        }

        let source = store::upsert_source(
            pool,
            NewSource {
                workspace_id: &scope_cfg.workspace,
                scope_id,
                owner_id: scope_cfg.owner.as_deref(),
                connector_kind: kind,
                external_id: &item.external_id,
                title: item.title.as_deref(),
                metadata,
            },
        )
        .await?;

        let committed = store::commit_version(pool, &source, &hash, &item.body, &segmenter).await?;

        // Durably committed; only now may the counts move.
        counters.fetched += 1;
        if committed.created {
            counters.upserted += 1;
            counters.chunks_created += committed.chunks_written;
        }

        eta.observe(last_item.elapsed());
        last_item = Instant::now();
        let remaining = counters
            .discovered
            .map(|total| (total - counters.fetched).max(0));
        let eta_seconds = remaining.and_then(|r| eta.estimate(r));

        let is_last = counters
            .discovered
            .is_some_and(|total| counters.fetched >= total);
        if is_last || counters.fetched as u64 % stats_every == 0 {
            ledger::record_stats(pool, run_id, &counters.to_patch("upserting", eta_seconds))
                .await?;
        }
    }

    // Streams without a size hint never hit the is_last fast path; make
    // sure the final counts land before completion.
    ledger::record_stats(pool, run_id, &counters.to_patch("upserting", None)).await?;

    Ok(())
}

fn no_op_outcome() -> SyncOutcome {
    SyncOutcome {
        job_id: String::new(),
        run_id: None,
        no_op: true,
        job_status: JobStatus::Running,
        fetched: 0,
        upserted: 0,
        chunks_created: 0,
        error: None,
    }
}

/// Accumulated per-run counts, patched into the run's stats document.
#[derive(Debug, Default, Clone)]
struct RunCounters {
    discovered: Option<i64>,
    fetched: i64,
    upserted: i64,
    chunks_created: i64,
}

impl RunCounters {
    fn to_patch(&self, phase: &str, eta_seconds: Option<i64>) -> serde_json::Value {
        let mut patch = json!({
            "phase": phase,
            "fetched": self.fetched,
            "upserted": self.upserted,
            "chunks_created": self.chunks_created,
        });
        let map = patch.as_object_mut().expect("patch is an object");
        if let Some(discovered) = self.discovered {
            map.insert("discovered".to_string(), json!(discovered));
        }
        if let Some(eta) = eta_seconds {
            map.insert("eta_seconds".to_string(), json!(eta));
        }
        patch
    }
}

/// Exponential moving average of items/second.
///
/// Seeded with the first observed rate, then blended per item with factor
/// `alpha`. This is the single authoritative ETA formula; the aggregator
/// only reports what this wrote.
pub struct EtaEstimator {
    alpha: f64,
    rate: Option<f64>,
}

impl EtaEstimator {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(0.01, 1.0),
            rate: None,
        }
    }

    /// Record that one item took `dt`. Zero durations are ignored.
    pub fn observe(&mut self, dt: Duration) {
        let secs = dt.as_secs_f64();
        if secs <= 0.0 {
            return;
        }
        let instant_rate = 1.0 / secs;
        self.rate = Some(match self.rate {
            None => instant_rate,
            Some(prev) => self.alpha * instant_rate + (1.0 - self.alpha) * prev,
        });
    }

    /// Whole seconds until `remaining` items are done, when a rate is
    /// known and positive.
    pub fn estimate(&self, remaining: i64) -> Option<i64> {
        if remaining <= 0 {
            return Some(0);
        }
        let rate = self.rate.filter(|r| *r > 0.0)?;
        Some((remaining as f64 / rate).ceil() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eta_seeds_with_first_observation() {
        let mut eta = EtaEstimator::new(0.3);
        assert_eq!(eta.estimate(10), None);

        eta.observe(Duration::from_secs(2)); // 0.5 items/sec
        assert_eq!(eta.estimate(10), Some(20));
    }

    #[test]
    fn eta_smooths_toward_recent_rate() {
        let mut eta = EtaEstimator::new(0.5);
        eta.observe(Duration::from_secs(1)); // 1.0/s
        eta.observe(Duration::from_millis(250)); // instant 4.0/s -> ema 2.5/s
        assert_eq!(eta.estimate(10), Some(4)); // 10 / 2.5
    }

    #[test]
    fn eta_zero_remaining_is_zero() {
        let mut eta = EtaEstimator::new(0.3);
        eta.observe(Duration::from_secs(1));
        assert_eq!(eta.estimate(0), Some(0));
        assert_eq!(eta.estimate(-3), Some(0));
    }

    #[test]
    fn zero_duration_observations_are_ignored() {
        let mut eta = EtaEstimator::new(0.3);
        eta.observe(Duration::ZERO);
        assert_eq!(eta.estimate(5), None);
    }
}
