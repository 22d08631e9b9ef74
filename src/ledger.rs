//! Job ledger.
//!
//! Owns job and job-run records and every transition between their states:
//!
//! ```text
//! pending --claim--> running --complete--> completed
//!                    running --fail, attempts left--> pending
//!                    running --fail, attempts exhausted--> dead_letter
//! ```
//!
//! The "one running job per scope" invariant is a transactional
//! precondition on `claim` — a single compare-and-swap UPDATE whose WHERE
//! clause requires the job to still be pending and the scope to be free.
//! There is no application-level check-then-act window.

use serde_json::Value;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::error::SyncError;
use crate::models::{merge_stats_patch, ConnectorKind, Job, JobRun, JobStatus, RunStatus};

/// Create a pending job for a scope.
///
/// Signals [`SyncError::AlreadyRunning`] while another job holds the scope.
/// Multiple pending jobs may queue; the claim CAS is the actual mutual
/// exclusion, this check is the caller-facing courtesy signal.
pub async fn enqueue(
    pool: &SqlitePool,
    workspace_id: &str,
    scope_id: &str,
    kind: ConnectorKind,
) -> Result<Job, SyncError> {
    let mut tx = pool.begin().await?;

    let running: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE scope_id = ? AND status = 'running'")
            .bind(scope_id)
            .fetch_one(&mut *tx)
            .await?;
    if running > 0 {
        tx.rollback().await?;
        return Err(SyncError::AlreadyRunning {
            scope: scope_id.to_string(),
        });
    }

    let now = chrono::Utc::now().timestamp();
    let id = Uuid::new_v4().to_string();
    sqlx::query(
        r#"
        INSERT INTO jobs (id, workspace_id, scope_id, job_type, connector_kind, status, attempts,
                          created_at, updated_at)
        VALUES (?, ?, ?, 'sync', ?, 'pending', 0, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(workspace_id)
    .bind(scope_id)
    .bind(kind.as_str())
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(Job {
        id,
        workspace_id: workspace_id.to_string(),
        scope_id: scope_id.to_string(),
        job_type: "sync".to_string(),
        connector_kind: kind,
        status: JobStatus::Pending,
        attempts: 0,
        created_at: now,
        updated_at: now,
    })
}

/// Claim a pending job: transition it to running and open its next run.
///
/// The transition is a CAS — it succeeds only if the job is still pending
/// and no other job in the scope is running. A lost race maps to
/// [`SyncError::AlreadyRunning`]; claiming a terminal job, or a job whose
/// prior run is unexpectedly still open (missed stale-run recovery), maps
/// to [`SyncError::InvalidTransition`].
pub async fn claim(pool: &SqlitePool, job_id: &str) -> Result<JobRun, SyncError> {
    let mut tx = pool.begin().await?;

    let now = chrono::Utc::now().timestamp();
    let updated = sqlx::query(
        r#"
        UPDATE jobs
        SET status = 'running', attempts = attempts + 1, updated_at = ?
        WHERE id = ?
          AND status = 'pending'
          AND NOT EXISTS (
              SELECT 1 FROM jobs other
              WHERE other.scope_id = jobs.scope_id
                AND other.status = 'running'
                AND other.id != jobs.id
          )
        "#,
    )
    .bind(now)
    .bind(job_id)
    .execute(&mut *tx)
    .await?;

    if updated.rows_affected() == 0 {
        // Classify the refusal before giving the lock back.
        let job = fetch_job_tx(&mut tx, job_id).await?;
        tx.rollback().await?;
        let job = job.ok_or_else(|| SyncError::InvalidTransition {
            entity: "job",
            id: job_id.to_string(),
            detail: "job not found".to_string(),
        })?;
        return match job.status {
            // Still pending means another job in the scope holds the lock;
            // running means this job was claimed first. Both are the
            // duplicate-trigger case.
            JobStatus::Running | JobStatus::Pending => Err(SyncError::AlreadyRunning {
                scope: job.scope_id,
            }),
            other => Err(SyncError::InvalidTransition {
                entity: "job",
                id: job_id.to_string(),
                detail: format!("cannot claim a job in status '{}'", other.as_str()),
            }),
        };
    }

    // Recovery guard: a pending job must not still own an open run. Seeing
    // one means a crashed worker was never swept; surface it instead of
    // silently stacking a second open attempt.
    let open_runs: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM job_runs WHERE job_id = ? AND status = 'running'",
    )
    .bind(job_id)
    .fetch_one(&mut *tx)
    .await?;
    if open_runs > 0 {
        tx.rollback().await?;
        return Err(SyncError::InvalidTransition {
            entity: "job",
            id: job_id.to_string(),
            detail: "a prior run is still open; sweep stale runs first".to_string(),
        });
    }

    let attempt: i64 = sqlx::query_scalar("SELECT attempts FROM jobs WHERE id = ?")
        .bind(job_id)
        .fetch_one(&mut *tx)
        .await?;

    let run_id = Uuid::new_v4().to_string();
    sqlx::query(
        r#"
        INSERT INTO job_runs (id, job_id, attempt, status, stats_json, started_at, updated_at)
        VALUES (?, ?, ?, 'running', '{}', ?, ?)
        "#,
    )
    .bind(&run_id)
    .bind(job_id)
    .bind(attempt)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(JobRun {
        id: run_id,
        job_id: job_id.to_string(),
        attempt,
        status: RunStatus::Running,
        stats_json: "{}".to_string(),
        started_at: now,
        updated_at: now,
        completed_at: None,
        error: None,
    })
}

/// Merge a stats patch into a run's stats document.
///
/// Observational: not transactional with content writes, and callable many
/// times per run. Counter fields never regress (see
/// [`merge_stats_patch`]); the run's `updated_at` refresh is what the
/// staleness sweep watches.
pub async fn record_stats(
    pool: &SqlitePool,
    run_id: &str,
    patch: &Value,
) -> Result<(), SyncError> {
    let mut tx = pool.begin().await?;

    let current: Option<String> = sqlx::query_scalar("SELECT stats_json FROM job_runs WHERE id = ?")
        .bind(run_id)
        .fetch_optional(&mut *tx)
        .await?;
    let current = current.ok_or_else(|| SyncError::InvalidTransition {
        entity: "run",
        id: run_id.to_string(),
        detail: "run not found".to_string(),
    })?;

    let merged = merge_stats_patch(&current, patch);
    let now = chrono::Utc::now().timestamp();
    sqlx::query("UPDATE job_runs SET stats_json = ?, updated_at = ? WHERE id = ?")
        .bind(&merged)
        .bind(now)
        .bind(run_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

/// Finish a run successfully: run and job both become `completed`.
pub async fn complete(pool: &SqlitePool, run_id: &str, final_stats: &Value) -> Result<(), SyncError> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query("SELECT job_id, stats_json FROM job_runs WHERE id = ? AND status = 'running'")
        .bind(run_id)
        .fetch_optional(&mut *tx)
        .await?;
    let Some(row) = row else {
        tx.rollback().await?;
        return Err(SyncError::InvalidTransition {
            entity: "run",
            id: run_id.to_string(),
            detail: "run is not open".to_string(),
        });
    };
    let job_id: String = row.get("job_id");
    let current: String = row.get("stats_json");

    let now = chrono::Utc::now().timestamp();
    let merged = merge_stats_patch(&current, final_stats);
    sqlx::query(
        r#"
        UPDATE job_runs
        SET status = 'completed', stats_json = ?, updated_at = ?, completed_at = ?
        WHERE id = ? AND status = 'running'
        "#,
    )
    .bind(&merged)
    .bind(now)
    .bind(now)
    .bind(run_id)
    .execute(&mut *tx)
    .await?;

    let updated = sqlx::query(
        "UPDATE jobs SET status = 'completed', updated_at = ? WHERE id = ? AND status = 'running'",
    )
    .bind(now)
    .bind(&job_id)
    .execute(&mut *tx)
    .await?;
    if updated.rows_affected() == 0 {
        tx.rollback().await?;
        return Err(SyncError::InvalidTransition {
            entity: "job",
            id: job_id,
            detail: "job was not running at completion".to_string(),
        });
    }

    tx.commit().await?;
    Ok(())
}

/// Finish a run as failed, routing the job to `pending` (retry) or
/// `dead_letter` (attempts exhausted).
pub async fn fail(
    pool: &SqlitePool,
    run_id: &str,
    error_message: &str,
    max_attempts: i64,
) -> Result<JobStatus, SyncError> {
    let mut tx = pool.begin().await?;
    let status = fail_run_in_tx(&mut tx, run_id, error_message, max_attempts).await?;
    tx.commit().await?;
    Ok(status)
}

/// Administrative sweep: fail every running run whose last stats update is
/// older than `stale_after_secs`.
///
/// Distinct from [`fail`] because the orchestrator that owned the run may
/// be dead; an external supervisor (or `ksync sweep`) calls this on a
/// schedule. Returns the swept run ids.
pub async fn expire_stale(
    pool: &SqlitePool,
    stale_after_secs: i64,
    max_attempts: i64,
) -> Result<Vec<String>, SyncError> {
    let cutoff = chrono::Utc::now().timestamp() - stale_after_secs;
    let rows = sqlx::query("SELECT id FROM job_runs WHERE status = 'running' AND updated_at < ?")
        .bind(cutoff)
        .fetch_all(pool)
        .await?;

    let message = format!("stale: no progress for {}s", stale_after_secs);
    let mut swept = Vec::new();
    for row in rows {
        let run_id: String = row.get("id");
        let mut tx = pool.begin().await?;
        // Re-check under the lock; the orchestrator may have finished the
        // run between the scan and this transaction.
        let still_stale: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM job_runs WHERE id = ? AND status = 'running' AND updated_at < ?",
        )
        .bind(&run_id)
        .bind(cutoff)
        .fetch_one(&mut *tx)
        .await?;
        if still_stale == 0 {
            tx.rollback().await?;
            continue;
        }
        fail_run_in_tx(&mut tx, &run_id, &message, max_attempts).await?;
        tx.commit().await?;
        swept.push(run_id);
    }

    Ok(swept)
}

async fn fail_run_in_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    run_id: &str,
    error_message: &str,
    max_attempts: i64,
) -> Result<JobStatus, SyncError> {
    let row = sqlx::query(
        "SELECT job_id, attempt FROM job_runs WHERE id = ? AND status = 'running'",
    )
    .bind(run_id)
    .fetch_optional(&mut **tx)
    .await?;
    let Some(row) = row else {
        return Err(SyncError::InvalidTransition {
            entity: "run",
            id: run_id.to_string(),
            detail: "run is not open".to_string(),
        });
    };
    let job_id: String = row.get("job_id");
    let attempt: i64 = row.get("attempt");

    // Mirror the failure into the stats document so the progress view's
    // phase resolution lands on "error" without consulting the job.
    let current: String = sqlx::query_scalar("SELECT stats_json FROM job_runs WHERE id = ?")
        .bind(run_id)
        .fetch_one(&mut **tx)
        .await?;
    let merged = merge_stats_patch(
        &current,
        &serde_json::json!({ "phase": "error", "error": error_message }),
    );

    let now = chrono::Utc::now().timestamp();
    sqlx::query(
        r#"
        UPDATE job_runs
        SET status = 'failed', error = ?, stats_json = ?, updated_at = ?, completed_at = ?
        WHERE id = ? AND status = 'running'
        "#,
    )
    .bind(error_message)
    .bind(&merged)
    .bind(now)
    .bind(now)
    .bind(run_id)
    .execute(&mut **tx)
    .await?;

    // The final allowed failure lands in dead_letter, never back in
    // pending.
    let next_status = if attempt < max_attempts {
        JobStatus::Pending
    } else {
        JobStatus::DeadLetter
    };
    let updated = sqlx::query(
        "UPDATE jobs SET status = ?, updated_at = ? WHERE id = ? AND status = 'running'",
    )
    .bind(next_status.as_str())
    .bind(now)
    .bind(&job_id)
    .execute(&mut **tx)
    .await?;
    if updated.rows_affected() == 0 {
        return Err(SyncError::InvalidTransition {
            entity: "job",
            id: job_id,
            detail: "job was not running at failure".to_string(),
        });
    }

    Ok(next_status)
}

/// Most recently created job for a scope and its highest-attempt run.
/// Side-effect-free; this is the read path behind the status boundary.
pub async fn latest_for_scope(
    pool: &SqlitePool,
    scope_id: &str,
) -> Result<Option<(Job, Option<JobRun>)>, SyncError> {
    let row = sqlx::query(
        r#"
        SELECT id, workspace_id, scope_id, job_type, connector_kind, status, attempts, created_at, updated_at
        FROM jobs
        WHERE scope_id = ?
        ORDER BY created_at DESC, rowid DESC
        LIMIT 1
        "#,
    )
    .bind(scope_id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };
    let job = job_from_row(&row);

    let run = sqlx::query(
        r#"
        SELECT id, job_id, attempt, status, stats_json, started_at, updated_at, completed_at, error
        FROM job_runs
        WHERE job_id = ?
        ORDER BY attempt DESC
        LIMIT 1
        "#,
    )
    .bind(&job.id)
    .fetch_optional(pool)
    .await?
    .map(|r| run_from_row(&r));

    Ok(Some((job, run)))
}

/// Newest pending job for a scope, if any. Used by the sync command to pick
/// up work enqueued by the trigger boundary.
pub async fn latest_pending_for_scope(
    pool: &SqlitePool,
    scope_id: &str,
) -> Result<Option<Job>, SyncError> {
    let row = sqlx::query(
        r#"
        SELECT id, workspace_id, scope_id, job_type, connector_kind, status, attempts, created_at, updated_at
        FROM jobs
        WHERE scope_id = ? AND status = 'pending'
        ORDER BY created_at DESC, rowid DESC
        LIMIT 1
        "#,
    )
    .bind(scope_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| job_from_row(&r)))
}

pub async fn get_job(pool: &SqlitePool, job_id: &str) -> Result<Option<Job>, SyncError> {
    let row = sqlx::query(
        r#"
        SELECT id, workspace_id, scope_id, job_type, connector_kind, status, attempts, created_at, updated_at
        FROM jobs WHERE id = ?
        "#,
    )
    .bind(job_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|r| job_from_row(&r)))
}

pub async fn get_run(pool: &SqlitePool, run_id: &str) -> Result<Option<JobRun>, SyncError> {
    let row = sqlx::query(
        r#"
        SELECT id, job_id, attempt, status, stats_json, started_at, updated_at, completed_at, error
        FROM job_runs WHERE id = ?
        "#,
    )
    .bind(run_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|r| run_from_row(&r)))
}

/// All runs for a job, in attempt order. Used by tests and diagnostics.
pub async fn runs_for_job(pool: &SqlitePool, job_id: &str) -> Result<Vec<JobRun>, SyncError> {
    let rows = sqlx::query(
        r#"
        SELECT id, job_id, attempt, status, stats_json, started_at, updated_at, completed_at, error
        FROM job_runs
        WHERE job_id = ?
        ORDER BY attempt ASC
        "#,
    )
    .bind(job_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(run_from_row).collect())
}

async fn fetch_job_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    job_id: &str,
) -> Result<Option<Job>, SyncError> {
    let row = sqlx::query(
        r#"
        SELECT id, workspace_id, scope_id, job_type, connector_kind, status, attempts, created_at, updated_at
        FROM jobs WHERE id = ?
        "#,
    )
    .bind(job_id)
    .fetch_optional(&mut **tx)
    .await?;
    Ok(row.map(|r| job_from_row(&r)))
}

fn job_from_row(row: &sqlx::sqlite::SqliteRow) -> Job {
    let kind: String = row.get("connector_kind");
    let status: String = row.get("status");
    Job {
        id: row.get("id"),
        workspace_id: row.get("workspace_id"),
        scope_id: row.get("scope_id"),
        job_type: row.get("job_type"),
        connector_kind: ConnectorKind::parse(&kind).unwrap_or(ConnectorKind::Upload),
        status: JobStatus::parse(&status).unwrap_or(JobStatus::Failed),
        attempts: row.get("attempts"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn run_from_row(row: &sqlx::sqlite::SqliteRow) -> JobRun {
    let status: String = row.get("status");
    JobRun {
        id: row.get("id"),
        job_id: row.get("job_id"),
        attempt: row.get("attempt"),
        status: RunStatus::parse(&status).unwrap_or(RunStatus::Failed),
        stats_json: row.get("stats_json"),
        started_at: row.get("started_at"),
        updated_at: row.get("updated_at"),
        completed_at: row.get("completed_at"),
        error: row.get("error"),
    }
}
