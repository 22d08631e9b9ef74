//! Read boundary: joined status for one scope.
//!
//! Builds the `{job, latest_run, progress, counts}` document the UI polls
//! and the `ksync status` command renders. Strictly read-only; safe to call
//! while an orchestrator is mid-run.

use anyhow::Result;
use serde::Serialize;
use sqlx::SqlitePool;

use crate::ledger;
use crate::models::{Job, JobRun};
use crate::progress::{aggregate, ProgressView};
use crate::store::{self, ScopeCounts};

/// Joined view over the ledger, aggregator, and version store.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub scope_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job: Option<Job>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_run: Option<JobRun>,
    pub progress: ProgressView,
    pub counts: ScopeCounts,
}

pub async fn scope_status(pool: &SqlitePool, scope_id: &str) -> Result<StatusReport> {
    let latest = ledger::latest_for_scope(pool, scope_id).await?;
    let (job, run) = match latest {
        Some((job, run)) => (Some(job), run),
        None => (None, None),
    };

    let progress = aggregate(job.as_ref(), run.as_ref());
    let counts = store::counts_for_scope(pool, scope_id).await?;

    Ok(StatusReport {
        scope_id: scope_id.to_string(),
        job,
        latest_run: run,
        progress,
        counts,
    })
}

impl StatusReport {
    /// Human rendering for the CLI. One scope per call, aligned with what
    /// the JSON document carries.
    pub fn render_human(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("scope {}\n", self.scope_id));

        match &self.job {
            Some(job) => {
                out.push_str(&format!(
                    "  job:        {} ({}, attempt {})\n",
                    job.id,
                    job.status.as_str(),
                    job.attempts
                ));
            }
            None => out.push_str("  job:        none\n"),
        }

        out.push_str(&format!("  phase:      {}", self.progress.phase));
        if let Some(raw) = &self.progress.raw_phase {
            out.push_str(&format!(" ({})", raw));
        }
        out.push('\n');

        match self.progress.total_sources {
            Some(total) => out.push_str(&format!(
                "  progress:   {} / {} sources",
                self.progress.processed_sources, total
            )),
            None => out.push_str(&format!(
                "  progress:   {} sources",
                self.progress.processed_sources
            )),
        }
        if let Some(percent) = self.progress.percent {
            out.push_str(&format!(" ({}%)", percent));
        }
        out.push('\n');

        if let Some(eta) = self.progress.eta_seconds {
            out.push_str(&format!("  eta:        {}s\n", eta));
        }
        if let Some(error) = &self.progress.error {
            out.push_str(&format!("  error:      {}\n", error));
        }

        out.push_str(&format!(
            "  indexed:    {} sources, {} active chunks\n",
            self.counts.sources, self.counts.chunks
        ));

        out
    }
}
