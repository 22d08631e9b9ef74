//! Content version store.
//!
//! Owns the source → version → chunk data model. Sources are keyed by
//! connector identity (workspace + connector kind + external id), never by
//! content; content changes become new [`SourceVersion`]s. Committing a
//! version writes its full chunk set and flips the active flag in one
//! transaction, so readers never observe a half-written active version and
//! a crash can never leave two versions active.

use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::chunk::Segmenter;
use crate::error::SyncError;
use crate::models::{Chunk, ConnectorKind, Source, SourceVersion};

/// Deterministic digest of a source item's content, used to detect change.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Identity and ownership attributes for [`upsert_source`].
pub struct NewSource<'a> {
    pub workspace_id: &'a str,
    pub scope_id: &'a str,
    pub owner_id: Option<&'a str>,
    pub connector_kind: ConnectorKind,
    pub external_id: &'a str,
    pub title: Option<&'a str>,
    /// Must carry the originating scope/account reference.
    pub metadata: serde_json::Value,
}

/// Find-or-create a source by connector identity.
///
/// Idempotent by identity, not content: when the source already exists it
/// is returned unchanged — title and metadata updates ride on version
/// commits, not on re-discovery.
pub async fn upsert_source(pool: &SqlitePool, new: NewSource<'_>) -> Result<Source, SyncError> {
    if let Some(existing) = find_source(
        pool,
        new.workspace_id,
        new.connector_kind,
        new.external_id,
    )
    .await?
    {
        return Ok(existing);
    }

    let now = chrono::Utc::now().timestamp();
    let id = Uuid::new_v4().to_string();
    let metadata_json = new.metadata.to_string();

    // Another worker may have inserted the same identity between our read
    // and this write; the unique constraint makes the insert a no-op and
    // the re-read below returns the winner.
    sqlx::query(
        r#"
        INSERT INTO sources (id, workspace_id, owner_id, scope_id, connector_kind, external_id,
                             title, content_hash, metadata_json, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, '', ?, ?, ?)
        ON CONFLICT(workspace_id, connector_kind, external_id) DO NOTHING
        "#,
    )
    .bind(&id)
    .bind(new.workspace_id)
    .bind(new.owner_id)
    .bind(new.scope_id)
    .bind(new.connector_kind.as_str())
    .bind(new.external_id)
    .bind(new.title)
    .bind(&metadata_json)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    let source = find_source(
        pool,
        new.workspace_id,
        new.connector_kind,
        new.external_id,
    )
    .await?
    .ok_or(SyncError::Persistence(sqlx::Error::RowNotFound))?;

    Ok(source)
}

/// Outcome of [`commit_version`].
pub struct CommittedVersion {
    pub version: SourceVersion,
    /// False when the content hash matched the active version and nothing
    /// was written.
    pub created: bool,
    /// Chunks written for a newly created version; 0 on the no-op path.
    pub chunks_written: i64,
}

/// Commit a content snapshot for a source.
///
/// When `new_hash` equals the active version's hash this is a no-op
/// returning the existing version. Otherwise the next version, its full
/// chunk set, the active-flag flip, and the source's denormalized hash are
/// written in a single transaction — the flip is ordered after the chunk
/// writes so an interrupted commit leaves the prior version active with
/// its complete chunk set.
pub async fn commit_version(
    pool: &SqlitePool,
    source: &Source,
    new_hash: &str,
    text: &str,
    segmenter: &dyn Segmenter,
) -> Result<CommittedVersion, SyncError> {
    let mut tx = pool.begin().await?;

    let active = fetch_active_version(&mut tx, &source.id).await?;
    if let Some(active) = &active {
        if active.content_hash == new_hash {
            tx.rollback().await?;
            return Ok(CommittedVersion {
                version: active.clone(),
                created: false,
                chunks_written: 0,
            });
        }
    }

    let now = chrono::Utc::now().timestamp();
    let next_number = active.as_ref().map(|v| v.version_number).unwrap_or(0) + 1;
    let version_id = Uuid::new_v4().to_string();
    let char_count = text.chars().count() as i64;

    sqlx::query(
        r#"
        INSERT INTO source_versions (id, source_id, version_number, content_hash, is_active,
                                     char_count, ingested_at)
        VALUES (?, ?, ?, ?, 0, ?, ?)
        "#,
    )
    .bind(&version_id)
    .bind(&source.id)
    .bind(next_number)
    .bind(new_hash)
    .bind(char_count)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    let pieces = segmenter.segment(text);
    let chunks_written = pieces.len() as i64;
    for (index, piece) in pieces.into_iter().enumerate() {
        sqlx::query("INSERT INTO chunks (id, version_id, chunk_index, text) VALUES (?, ?, ?, ?)")
            .bind(Uuid::new_v4().to_string())
            .bind(&version_id)
            .bind(index as i64)
            .bind(piece)
            .execute(&mut *tx)
            .await?;
    }

    // Activation flip: only after the full chunk set is in.
    sqlx::query("UPDATE source_versions SET is_active = 0 WHERE source_id = ? AND is_active = 1")
        .bind(&source.id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("UPDATE source_versions SET is_active = 1 WHERE id = ?")
        .bind(&version_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("UPDATE sources SET content_hash = ?, updated_at = ? WHERE id = ?")
        .bind(new_hash)
        .bind(now)
        .bind(&source.id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok(CommittedVersion {
        version: SourceVersion {
            id: version_id,
            source_id: source.id.clone(),
            version_number: next_number,
            content_hash: new_hash.to_string(),
            is_active: true,
            char_count,
            ingested_at: now,
        },
        created: true,
        chunks_written,
    })
}

/// Aggregate counts for one scope, joining chunks through active versions
/// only. Superseded chunk sets stay on disk but never show up here.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ScopeCounts {
    pub sources: i64,
    pub chunks: i64,
}

pub async fn counts_for_scope(pool: &SqlitePool, scope_id: &str) -> Result<ScopeCounts, SyncError> {
    let sources: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sources WHERE scope_id = ?")
        .bind(scope_id)
        .fetch_one(pool)
        .await?;

    let chunks: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM chunks c
        JOIN source_versions v ON v.id = c.version_id AND v.is_active = 1
        JOIN sources s ON s.id = v.source_id
        WHERE s.scope_id = ?
        "#,
    )
    .bind(scope_id)
    .fetch_one(pool)
    .await?;

    Ok(ScopeCounts { sources, chunks })
}

pub async fn find_source(
    pool: &SqlitePool,
    workspace_id: &str,
    kind: ConnectorKind,
    external_id: &str,
) -> Result<Option<Source>, SyncError> {
    let row = sqlx::query(
        r#"
        SELECT id, workspace_id, owner_id, scope_id, connector_kind, external_id, title,
               content_hash, metadata_json, created_at, updated_at
        FROM sources
        WHERE workspace_id = ? AND connector_kind = ? AND external_id = ?
        "#,
    )
    .bind(workspace_id)
    .bind(kind.as_str())
    .bind(external_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| source_from_row(&r)))
}

/// All versions for a source, oldest first.
pub async fn versions_for_source(
    pool: &SqlitePool,
    source_id: &str,
) -> Result<Vec<SourceVersion>, SyncError> {
    let rows = sqlx::query(
        r#"
        SELECT id, source_id, version_number, content_hash, is_active, char_count, ingested_at
        FROM source_versions
        WHERE source_id = ?
        ORDER BY version_number ASC
        "#,
    )
    .bind(source_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(version_from_row).collect())
}

/// Chunks of the source's active version, in index order.
pub async fn active_chunks(pool: &SqlitePool, source_id: &str) -> Result<Vec<Chunk>, SyncError> {
    let rows = sqlx::query(
        r#"
        SELECT c.id, c.version_id, c.chunk_index, c.text
        FROM chunks c
        JOIN source_versions v ON v.id = c.version_id
        WHERE v.source_id = ? AND v.is_active = 1
        ORDER BY c.chunk_index ASC
        "#,
    )
    .bind(source_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|r| Chunk {
            id: r.get("id"),
            version_id: r.get("version_id"),
            chunk_index: r.get("chunk_index"),
            text: r.get("text"),
        })
        .collect())
}

async fn fetch_active_version(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    source_id: &str,
) -> Result<Option<SourceVersion>, SyncError> {
    let row = sqlx::query(
        r#"
        SELECT id, source_id, version_number, content_hash, is_active, char_count, ingested_at
        FROM source_versions
        WHERE source_id = ? AND is_active = 1
        "#,
    )
    .bind(source_id)
    .fetch_optional(&mut **tx)
    .await?;

    Ok(row.as_ref().map(version_from_row))
}

fn source_from_row(row: &sqlx::sqlite::SqliteRow) -> Source {
    let kind: String = row.get("connector_kind");
    Source {
        id: row.get("id"),
        workspace_id: row.get("workspace_id"),
        owner_id: row.get("owner_id"),
        scope_id: row.get("scope_id"),
        connector_kind: ConnectorKind::parse(&kind).unwrap_or(ConnectorKind::Upload),
        external_id: row.get("external_id"),
        title: row.get("title"),
        content_hash: row.get("content_hash"),
        metadata_json: row.get("metadata_json"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn version_from_row(row: &sqlx::sqlite::SqliteRow) -> SourceVersion {
    SourceVersion {
        id: row.get("id"),
        source_id: row.get("source_id"),
        version_number: row.get("version_number"),
        content_hash: row.get("content_hash"),
        is_active: row.get::<i64, _>("is_active") != 0,
        char_count: row.get("char_count"),
        ingested_at: row.get("ingested_at"),
    }
}
