//! Core data models used throughout Knowledge Sync.
//!
//! These types represent the sources, versions, chunks, jobs, and runs that
//! flow through the ingestion pipeline, plus the typed view over a run's
//! open statistics document.
//!
//! Timestamps are unix seconds (`i64`), ids are UUIDv4 strings, and enums
//! are stored in SQLite as their lowercase string form.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of external system a source or job belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorKind {
    Upload,
    Drive,
    Confluence,
    Jira,
    Slack,
}

impl ConnectorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectorKind::Upload => "upload",
            ConnectorKind::Drive => "drive",
            ConnectorKind::Confluence => "confluence",
            ConnectorKind::Jira => "jira",
            ConnectorKind::Slack => "slack",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "upload" => Some(ConnectorKind::Upload),
            "drive" => Some(ConnectorKind::Drive),
            "confluence" => Some(ConnectorKind::Confluence),
            "jira" => Some(ConnectorKind::Jira),
            "slack" => Some(ConnectorKind::Slack),
            _ => None,
        }
    }
}

impl std::fmt::Display for ConnectorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a [`Job`].
///
/// `completed` and `dead_letter` are terminal; nothing transitions back
/// into them. `failed` exists for operator-marked jobs only — the ledger's
/// own failure path routes to `pending` (retry) or `dead_letter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    DeadLetter,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::DeadLetter => "dead_letter",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "dead_letter" => Some(JobStatus::DeadLetter),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::DeadLetter)
    }
}

/// Lifecycle state of a [`JobRun`]. A strict subset of [`JobStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(RunStatus::Running),
            "completed" => Some(RunStatus::Completed),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

/// A logical external document or item, stable across content updates.
///
/// Identity is (workspace, connector kind, external id) — never content.
/// The current content hash is denormalized here from the active version.
#[derive(Debug, Clone, Serialize)]
pub struct Source {
    pub id: String,
    pub workspace_id: String,
    pub owner_id: Option<String>,
    pub scope_id: String,
    pub connector_kind: ConnectorKind,
    pub external_id: String,
    pub title: Option<String>,
    pub content_hash: String,
    pub metadata_json: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// An immutable snapshot of a source's content at a point in time.
///
/// Exactly one version per source carries `is_active = true`; the flip to a
/// new version happens atomically with the new version's chunk writes.
#[derive(Debug, Clone, Serialize)]
pub struct SourceVersion {
    pub id: String,
    pub source_id: String,
    pub version_number: i64,
    pub content_hash: String,
    pub is_active: bool,
    pub char_count: i64,
    pub ingested_at: i64,
}

/// A unit of segmented text owned by exactly one [`SourceVersion`].
#[derive(Debug, Clone, Serialize)]
pub struct Chunk {
    pub id: String,
    pub version_id: String,
    pub chunk_index: i64,
    pub text: String,
}

/// A unit of work scoped to one sync scope. `sync` is the only job type
/// today; the column exists so future maintenance work shares the ledger.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: String,
    pub workspace_id: String,
    pub scope_id: String,
    pub job_type: String,
    pub connector_kind: ConnectorKind,
    pub status: JobStatus,
    /// Number of runs opened so far (equals the highest attempt number).
    pub attempts: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// One execution attempt of a [`Job`].
#[derive(Debug, Clone, Serialize)]
pub struct JobRun {
    pub id: String,
    pub job_id: String,
    /// 1-based, gap-free, strictly increasing per job.
    pub attempt: i64,
    pub status: RunStatus,
    /// Open key/value statistics document. Unknown keys are preserved
    /// across merges so the schema can evolve without migration.
    pub stats_json: String,
    pub started_at: i64,
    /// Refreshed on every stats write; drives stale-run detection.
    pub updated_at: i64,
    pub completed_at: Option<i64>,
    pub error: Option<String>,
}

impl JobRun {
    /// Typed view over the raw stats document. Unknown keys are ignored on
    /// read; they remain in `stats_json` untouched.
    pub fn stats(&self) -> SyncStats {
        serde_json::from_str(&self.stats_json).unwrap_or_default()
    }
}

/// Typed statistics over a run's open stats document.
///
/// Every field is optional: producers patch in what they know, and readers
/// treat absence as "not reported yet". Counter fields only ever grow (see
/// [`merge_stats_patch`]).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncStats {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discovered: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fetched: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upserted: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunks_created: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_seconds: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Stats fields that are monotonic counters. Patches can only raise them.
const COUNTER_KEYS: &[&str] = &["discovered", "fetched", "upserted", "chunks_created"];

/// Merge a stats patch into an existing stats document.
///
/// Counter keys merge by `max` so a late or out-of-order patch can never
/// make an observer see progress go backwards. All other keys in the patch
/// are last-write-wins. Keys present in `current` but absent from the patch
/// — including keys this binary does not know about — are left untouched.
pub fn merge_stats_patch(current: &str, patch: &Value) -> String {
    let mut doc: Value = serde_json::from_str(current).unwrap_or(Value::Object(Default::default()));
    if !doc.is_object() {
        doc = Value::Object(Default::default());
    }
    let map = doc.as_object_mut().expect("stats doc is an object");

    if let Some(patch_map) = patch.as_object() {
        for (key, incoming) in patch_map {
            if incoming.is_null() {
                continue;
            }
            if COUNTER_KEYS.contains(&key.as_str()) {
                let existing = map.get(key).and_then(Value::as_i64).unwrap_or(0);
                let proposed = incoming.as_i64().unwrap_or(existing);
                map.insert(key.clone(), Value::from(existing.max(proposed)));
            } else {
                map.insert(key.clone(), incoming.clone());
            }
        }
    }

    serde_json::to_string(&doc).unwrap_or_else(|_| current.to_string())
}
