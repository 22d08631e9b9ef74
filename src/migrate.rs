//! Schema migrations.
//!
//! All statements are idempotent (`IF NOT EXISTS`) so `ksync init` can run
//! repeatedly. The partial unique index on `source_versions` enforces at
//! the storage layer that a source never carries two active versions, no
//! matter how a writer crashes.

use anyhow::Result;
use sqlx::SqlitePool;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Logical external documents/items, keyed by connector identity.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sources (
            id TEXT PRIMARY KEY,
            workspace_id TEXT NOT NULL,
            owner_id TEXT,
            scope_id TEXT NOT NULL,
            connector_kind TEXT NOT NULL,
            external_id TEXT NOT NULL,
            title TEXT,
            content_hash TEXT NOT NULL DEFAULT '',
            metadata_json TEXT NOT NULL DEFAULT '{}',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(workspace_id, connector_kind, external_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Immutable content snapshots, one active per source.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS source_versions (
            id TEXT PRIMARY KEY,
            source_id TEXT NOT NULL,
            version_number INTEGER NOT NULL,
            content_hash TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 0,
            char_count INTEGER NOT NULL DEFAULT 0,
            ingested_at INTEGER NOT NULL,
            UNIQUE(source_id, version_number),
            FOREIGN KEY (source_id) REFERENCES sources(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_versions_one_active
            ON source_versions(source_id) WHERE is_active = 1
        "#,
    )
    .execute(pool)
    .await?;

    // Segmented text, owned by a version. Kept when the version is
    // superseded; active queries join through is_active.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            version_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            UNIQUE(version_id, chunk_index),
            FOREIGN KEY (version_id) REFERENCES source_versions(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Sync jobs, one running per scope at most.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY,
            workspace_id TEXT NOT NULL,
            scope_id TEXT NOT NULL,
            job_type TEXT NOT NULL DEFAULT 'sync',
            connector_kind TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            attempts INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Execution attempts. stats_json is an open key/value document.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_runs (
            id TEXT PRIMARY KEY,
            job_id TEXT NOT NULL,
            attempt INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'running',
            stats_json TEXT NOT NULL DEFAULT '{}',
            started_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            completed_at INTEGER,
            error TEXT,
            UNIQUE(job_id, attempt),
            FOREIGN KEY (job_id) REFERENCES jobs(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sources_scope ON sources(scope_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_versions_source ON source_versions(source_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_version ON chunks(version_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_scope_status ON jobs(scope_id, status)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_scope_created ON jobs(scope_id, created_at DESC)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_runs_job_attempt ON job_runs(job_id, attempt DESC)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_runs_status_updated ON job_runs(status, updated_at)")
        .execute(pool)
        .await?;

    Ok(())
}
