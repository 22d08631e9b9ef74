//! Progress aggregation for the status read path.
//!
//! [`aggregate`] is a pure function from a job's status and its latest
//! run's statistics to the display-ready view the UI polls. It never
//! touches the database and never fails: unrecognized phase strings pass
//! through for display under a generic "processing" label, and malformed
//! numbers simply leave the corresponding field empty.
//!
//! ETA is reported verbatim from the run's stats. Rate estimation belongs
//! to the orchestrator that wrote the stats, not to this view.

use serde::Serialize;

use crate::models::{Job, JobRun, JobStatus, SyncStats};

/// Fixed, ordered phase vocabulary of a sync run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncPhase {
    Queued,
    Listing,
    Fetching,
    Chunking,
    Embedding,
    Upserting,
    Done,
    Error,
    /// A phase string this binary does not know. Kept for display;
    /// labelled generically.
    Other(String),
}

impl SyncPhase {
    pub fn parse(s: &str) -> Self {
        match s {
            "queued" => SyncPhase::Queued,
            "listing" => SyncPhase::Listing,
            "fetching" => SyncPhase::Fetching,
            "chunking" => SyncPhase::Chunking,
            "embedding" => SyncPhase::Embedding,
            "upserting" | "persisting" => SyncPhase::Upserting,
            "done" => SyncPhase::Done,
            "error" => SyncPhase::Error,
            other => SyncPhase::Other(other.to_string()),
        }
    }

    /// Display label. Unknown phases degrade to "processing" — never an
    /// error.
    pub fn label(&self) -> &str {
        match self {
            SyncPhase::Queued => "queued",
            SyncPhase::Listing => "listing",
            SyncPhase::Fetching => "fetching",
            SyncPhase::Chunking => "chunking",
            SyncPhase::Embedding => "embedding",
            SyncPhase::Upserting => "upserting",
            SyncPhase::Done => "done",
            SyncPhase::Error => "error",
            SyncPhase::Other(_) => "processing",
        }
    }

    /// The raw phase string as the producer wrote it.
    pub fn raw(&self) -> &str {
        match self {
            SyncPhase::Other(s) => s.as_str(),
            known => known.label(),
        }
    }
}

/// Normalized progress view for one scope.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressView {
    /// Display label from [`SyncPhase::label`].
    pub phase: String,
    /// Producer's raw phase string when it differs from the label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_phase: Option<String>,
    pub processed_sources: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_sources: Option<i64>,
    pub processed_chunks: i64,
    /// `round(processed / total * 100)` clamped to 0..=100; absent when the
    /// total is unknown or zero.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_seconds: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Derive the progress view for a job and its latest run.
///
/// With no run (or empty stats) the phase falls back to the job status:
/// pending → queued, completed → done, failed/dead_letter → error.
pub fn aggregate(job: Option<&Job>, run: Option<&JobRun>) -> ProgressView {
    let stats = run.map(JobRun::stats).unwrap_or_default();

    let phase = resolve_phase(job, run, &stats);
    let raw_phase = match &phase {
        SyncPhase::Other(_) => Some(phase.raw().to_string()),
        _ => None,
    };

    // Fetched counts every item the run worked through; upserted only the
    // ones that produced a new version. An idempotent re-run still shows
    // forward progress.
    let processed_sources = stats.fetched.or(stats.upserted).unwrap_or(0).max(0);
    let total_sources = stats.discovered.filter(|n| *n > 0);
    let processed_chunks = stats.chunks_created.unwrap_or(0).max(0);

    let percent = total_sources.map(|total| {
        let ratio = processed_sources as f64 / total as f64;
        (ratio * 100.0).round().clamp(0.0, 100.0) as u8
    });

    let eta_seconds = stats.eta_seconds.filter(|eta| *eta >= 0);

    let error = run
        .and_then(|r| r.error.clone())
        .or_else(|| stats.error.clone());

    ProgressView {
        phase: phase.label().to_string(),
        raw_phase,
        processed_sources,
        total_sources,
        processed_chunks,
        percent,
        eta_seconds,
        started_at: run.map(|r| r.started_at),
        error,
    }
}

fn resolve_phase(job: Option<&Job>, run: Option<&JobRun>, stats: &SyncStats) -> SyncPhase {
    if let Some(raw) = &stats.phase {
        return SyncPhase::parse(raw);
    }
    if run.and_then(|r| r.error.as_deref()).is_some() {
        return SyncPhase::Error;
    }
    match job.map(|j| j.status) {
        Some(JobStatus::Pending) => SyncPhase::Queued,
        Some(JobStatus::Running) => SyncPhase::Fetching,
        Some(JobStatus::Completed) => SyncPhase::Done,
        Some(JobStatus::Failed) | Some(JobStatus::DeadLetter) => SyncPhase::Error,
        None => SyncPhase::Queued,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConnectorKind, RunStatus};

    fn job(status: JobStatus) -> Job {
        Job {
            id: "j1".to_string(),
            workspace_id: "default".to_string(),
            scope_id: "docs".to_string(),
            job_type: "sync".to_string(),
            connector_kind: ConnectorKind::Upload,
            status,
            attempts: 1,
            created_at: 100,
            updated_at: 100,
        }
    }

    fn run_with_stats(stats_json: &str) -> JobRun {
        JobRun {
            id: "r1".to_string(),
            job_id: "j1".to_string(),
            attempt: 1,
            status: RunStatus::Running,
            stats_json: stats_json.to_string(),
            started_at: 100,
            updated_at: 100,
            completed_at: None,
            error: None,
        }
    }

    #[test]
    fn percent_is_clamped_and_rounded() {
        let run = run_with_stats(r#"{"phase":"upserting","upserted":2,"discovered":3}"#);
        let view = aggregate(Some(&job(JobStatus::Running)), Some(&run));
        assert_eq!(view.percent, Some(67));

        // Counts can briefly run past a stale total; percent must cap.
        let run = run_with_stats(r#"{"upserted":10,"discovered":3}"#);
        let view = aggregate(Some(&job(JobStatus::Running)), Some(&run));
        assert_eq!(view.percent, Some(100));
    }

    #[test]
    fn percent_absent_without_total() {
        let run = run_with_stats(r#"{"upserted":5}"#);
        let view = aggregate(Some(&job(JobStatus::Running)), Some(&run));
        assert_eq!(view.percent, None);

        let run = run_with_stats(r#"{"upserted":5,"discovered":0}"#);
        let view = aggregate(Some(&job(JobStatus::Running)), Some(&run));
        assert_eq!(view.percent, None);
        assert_eq!(view.total_sources, None);
    }

    #[test]
    fn unknown_phase_passes_through_with_generic_label() {
        let run = run_with_stats(r#"{"phase":"reticulating"}"#);
        let view = aggregate(Some(&job(JobStatus::Running)), Some(&run));
        assert_eq!(view.phase, "processing");
        assert_eq!(view.raw_phase.as_deref(), Some("reticulating"));
    }

    #[test]
    fn negative_eta_is_dropped() {
        let run = run_with_stats(r#"{"eta_seconds":-4}"#);
        let view = aggregate(Some(&job(JobStatus::Running)), Some(&run));
        assert_eq!(view.eta_seconds, None);

        let run = run_with_stats(r#"{"eta_seconds":42}"#);
        let view = aggregate(Some(&job(JobStatus::Running)), Some(&run));
        assert_eq!(view.eta_seconds, Some(42));
    }

    #[test]
    fn job_status_drives_phase_when_stats_are_empty() {
        let view = aggregate(Some(&job(JobStatus::Pending)), None);
        assert_eq!(view.phase, "queued");

        let view = aggregate(Some(&job(JobStatus::Completed)), None);
        assert_eq!(view.phase, "done");

        let view = aggregate(Some(&job(JobStatus::DeadLetter)), None);
        assert_eq!(view.phase, "error");

        let view = aggregate(None, None);
        assert_eq!(view.phase, "queued");
        assert_eq!(view.processed_sources, 0);
    }

    #[test]
    fn persisting_is_an_alias_for_upserting() {
        let run = run_with_stats(r#"{"phase":"persisting"}"#);
        let view = aggregate(Some(&job(JobStatus::Running)), Some(&run));
        assert_eq!(view.phase, "upserting");
        assert_eq!(view.raw_phase, None);
    }

    #[test]
    fn run_error_surfaces_in_view() {
        let mut run = run_with_stats("{}");
        run.error = Some("drive listing timed out".to_string());
        let view = aggregate(Some(&job(JobStatus::Pending)), Some(&run));
        assert_eq!(view.phase, "error");
        assert_eq!(view.error.as_deref(), Some("drive listing timed out"));
    }
}
