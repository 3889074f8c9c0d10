//! SQLite-backed [`TransferStore`]
//!
//! Timestamps are stored as integer milliseconds since the Unix epoch. A partial unique
//! index over `(workspace_id, hash, direction)` restricted to `queued`/`running` rows
//! backs the one-active-transfer-per-key rule at the storage level.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use driftbox_core::{
    FileBlob, FileKind, FileMeta, FileTransfer, TransferDirection, TransferState,
};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::str::FromStr;
use std::time::Duration;

use crate::store::{StoreError, StoreResult, TransferStore};

const MAX_CONNECTIONS: u32 = 5;
const ACQUIRE_TIMEOUT_SECS: u64 = 30;
const BUSY_TIMEOUT_SECS: u64 = 5;

const TRANSFER_COLUMNS: &str = "id, workspace_id, hash, direction, bytes_total, bytes_done, \
     state, attempts, last_error, error_code, created_at, updated_at";

const META_COLUMNS: &str = "hash, name, mime_type, kind, size_bytes, width, height, page_count, \
     storage_id, storage_provider_id, ref_count, deleted, clock, created_at, updated_at";

#[derive(Clone)]
pub struct SqliteTransferStore {
    pool: SqlitePool,
}

impl SqliteTransferStore {
    /// Open (creating if needed) a file database in WAL mode and apply the schema.
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        if database_url.contains(":memory:") || database_url.contains("mode=memory") {
            return Self::in_memory().await;
        }

        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(BUSY_TIMEOUT_SECS));

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(Duration::from_secs(ACQUIRE_TIMEOUT_SECS))
            .connect_with(options)
            .await?;

        tracing::info!(database_url = %database_url, "Transfer store opened");

        Self::from_pool(pool).await
    }

    /// A private in-memory database. The pool pins a single connection so every query
    /// sees the same database.
    pub async fn in_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> StoreResult<Self> {
        Self::init_schema(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the pool. Later calls fail with [`StoreError::Closed`].
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn init_schema(pool: &SqlitePool) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS file_meta (
                hash TEXT PRIMARY KEY NOT NULL,
                name TEXT NOT NULL,
                mime_type TEXT NOT NULL,
                kind TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                width INTEGER,
                height INTEGER,
                page_count INTEGER,
                storage_id TEXT,
                storage_provider_id TEXT,
                ref_count INTEGER NOT NULL DEFAULT 0,
                deleted INTEGER NOT NULL DEFAULT 0,
                clock INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS file_blobs (
                hash TEXT PRIMARY KEY NOT NULL,
                data BLOB NOT NULL,
                size_bytes INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS file_transfers (
                id TEXT PRIMARY KEY NOT NULL,
                workspace_id TEXT NOT NULL,
                hash TEXT NOT NULL,
                direction TEXT NOT NULL CHECK (direction IN ('upload', 'download')),
                bytes_total INTEGER NOT NULL DEFAULT 0,
                bytes_done INTEGER NOT NULL DEFAULT 0,
                state TEXT NOT NULL CHECK (state IN ('queued', 'running', 'done', 'failed')),
                attempts INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                error_code TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_file_transfers_state_created ON file_transfers(state, created_at)",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_file_transfers_selection ON file_transfers(workspace_id, state, created_at)",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_file_transfers_active_key
            ON file_transfers(workspace_id, hash, direction)
            WHERE state IN ('queued', 'running')
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }
}

fn millis_to_datetime(ms: i64) -> StoreResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| StoreError::Decode(format!("timestamp out of range: {}", ms)))
}

fn transfer_from_row(row: &SqliteRow) -> StoreResult<FileTransfer> {
    let direction: String = row.try_get("direction")?;
    let state: String = row.try_get("state")?;
    Ok(FileTransfer {
        id: row.try_get("id")?,
        workspace_id: row.try_get("workspace_id")?,
        hash: row.try_get("hash")?,
        direction: TransferDirection::from_str(&direction)
            .map_err(|e| StoreError::Decode(e.to_string()))?,
        bytes_total: row.try_get::<i64, _>("bytes_total")?.max(0) as u64,
        bytes_done: row.try_get::<i64, _>("bytes_done")?.max(0) as u64,
        state: TransferState::from_str(&state).map_err(|e| StoreError::Decode(e.to_string()))?,
        attempts: row.try_get::<i64, _>("attempts")?.max(0) as u32,
        last_error: row.try_get("last_error")?,
        error_code: row.try_get("error_code")?,
        created_at: millis_to_datetime(row.try_get("created_at")?)?,
        updated_at: millis_to_datetime(row.try_get("updated_at")?)?,
    })
}

fn meta_from_row(row: &SqliteRow) -> StoreResult<FileMeta> {
    let kind: String = row.try_get("kind")?;
    let dimension = |column: &str| -> StoreResult<Option<u32>> {
        Ok(row
            .try_get::<Option<i64>, _>(column)?
            .map(|v| v.clamp(0, u32::MAX as i64) as u32))
    };
    Ok(FileMeta {
        hash: row.try_get("hash")?,
        name: row.try_get("name")?,
        mime_type: row.try_get("mime_type")?,
        kind: FileKind::from(kind.as_str()),
        size_bytes: row.try_get::<i64, _>("size_bytes")?.max(0) as u64,
        width: dimension("width")?,
        height: dimension("height")?,
        page_count: dimension("page_count")?,
        storage_id: row.try_get("storage_id")?,
        storage_provider_id: row.try_get("storage_provider_id")?,
        ref_count: row.try_get("ref_count")?,
        deleted: row.try_get("deleted")?,
        clock: row.try_get("clock")?,
        created_at: millis_to_datetime(row.try_get("created_at")?)?,
        updated_at: millis_to_datetime(row.try_get("updated_at")?)?,
    })
}

#[async_trait]
impl TransferStore for SqliteTransferStore {
    #[tracing::instrument(
        level = "debug",
        skip(self, transfer),
        fields(transfer.id = %transfer.id, hash = %transfer.hash)
    )]
    async fn insert_transfer(&self, transfer: &FileTransfer) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO file_transfers (
                id, workspace_id, hash, direction, bytes_total, bytes_done,
                state, attempts, last_error, error_code, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&transfer.id)
        .bind(&transfer.workspace_id)
        .bind(&transfer.hash)
        .bind(transfer.direction.as_str())
        .bind(transfer.bytes_total as i64)
        .bind(transfer.bytes_done as i64)
        .bind(transfer.state.as_str())
        .bind(transfer.attempts as i64)
        .bind(&transfer.last_error)
        .bind(&transfer.error_code)
        .bind(transfer.created_at.timestamp_millis())
        .bind(transfer.updated_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_transfer(&self, id: &str) -> StoreResult<Option<FileTransfer>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM file_transfers WHERE id = ?",
            TRANSFER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(transfer_from_row).transpose()
    }

    async fn find_active_transfer(
        &self,
        workspace_id: &str,
        hash: &str,
        direction: TransferDirection,
    ) -> StoreResult<Option<FileTransfer>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {} FROM file_transfers
            WHERE workspace_id = ? AND hash = ? AND direction = ?
              AND state IN ('queued', 'running')
            ORDER BY created_at ASC, rowid ASC
            LIMIT 1
            "#,
            TRANSFER_COLUMNS
        ))
        .bind(workspace_id)
        .bind(hash)
        .bind(direction.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(transfer_from_row).transpose()
    }

    async fn list_queued(
        &self,
        workspace_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<FileTransfer>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM file_transfers
            WHERE workspace_id = ? AND state = 'queued'
            ORDER BY created_at ASC, rowid ASC
            LIMIT ?
            "#,
            TRANSFER_COLUMNS
        ))
        .bind(workspace_id)
        .bind(limit.min(i64::MAX as usize) as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(transfer_from_row).collect()
    }

    #[tracing::instrument(
        level = "debug",
        skip(self, transfer),
        fields(transfer.id = %transfer.id, state = %transfer.state)
    )]
    async fn update_transfer(&self, transfer: &FileTransfer) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE file_transfers
            SET bytes_total = ?, bytes_done = ?, state = ?, attempts = ?,
                last_error = ?, error_code = ?, updated_at = ?
            WHERE id = ? AND state NOT IN ('done', 'failed')
            "#,
        )
        .bind(transfer.bytes_total as i64)
        .bind(transfer.bytes_done as i64)
        .bind(transfer.state.as_str())
        .bind(transfer.attempts as i64)
        .bind(&transfer.last_error)
        .bind(&transfer.error_code)
        .bind(transfer.updated_at.timestamp_millis())
        .bind(&transfer.id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_progress(
        &self,
        id: &str,
        bytes_done: u64,
        bytes_total: u64,
    ) -> StoreResult<()> {
        let bytes_done = if bytes_total > 0 {
            bytes_done.min(bytes_total)
        } else {
            bytes_done
        };
        sqlx::query(
            r#"
            UPDATE file_transfers
            SET bytes_done = ?, bytes_total = ?, updated_at = ?
            WHERE id = ? AND state = 'running'
            "#,
        )
        .bind(bytes_done as i64)
        .bind(bytes_total as i64)
        .bind(Utc::now().timestamp_millis())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn requeue_running(
        &self,
        workspace_id: &str,
        exclude_ids: &[String],
    ) -> StoreResult<u64> {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("UPDATE file_transfers SET state = 'queued', updated_at = ");
        builder.push_bind(Utc::now().timestamp_millis());
        builder.push(" WHERE workspace_id = ");
        builder.push_bind(workspace_id);
        builder.push(" AND state = 'running'");
        if !exclude_ids.is_empty() {
            builder.push(" AND id NOT IN (");
            let mut separated = builder.separated(", ");
            for id in exclude_ids {
                separated.push_bind(id);
            }
            separated.push_unseparated(")");
        }

        let result = builder.build().execute(&self.pool).await?;
        let requeued = result.rows_affected();
        if requeued > 0 {
            tracing::info!(
                workspace_id = %workspace_id,
                requeued = requeued,
                "Requeued interrupted transfers"
            );
        }
        Ok(requeued)
    }

    async fn delete_finished_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM file_transfers
            WHERE state IN ('done', 'failed') AND created_at < ?
            "#,
        )
        .bind(cutoff.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn get_file_meta(&self, hash: &str) -> StoreResult<Option<FileMeta>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM file_meta WHERE hash = ?",
            META_COLUMNS
        ))
        .bind(hash)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(meta_from_row).transpose()
    }

    async fn put_file_meta(&self, meta: &FileMeta) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO file_meta (
                hash, name, mime_type, kind, size_bytes, width, height, page_count,
                storage_id, storage_provider_id, ref_count, deleted, clock,
                created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(hash) DO UPDATE SET
                name = excluded.name,
                mime_type = excluded.mime_type,
                kind = excluded.kind,
                size_bytes = excluded.size_bytes,
                width = excluded.width,
                height = excluded.height,
                page_count = excluded.page_count,
                storage_id = excluded.storage_id,
                storage_provider_id = excluded.storage_provider_id,
                ref_count = excluded.ref_count,
                deleted = excluded.deleted,
                clock = excluded.clock,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&meta.hash)
        .bind(&meta.name)
        .bind(&meta.mime_type)
        .bind(meta.kind.as_str())
        .bind(meta.size_bytes as i64)
        .bind(meta.width.map(i64::from))
        .bind(meta.height.map(i64::from))
        .bind(meta.page_count.map(i64::from))
        .bind(&meta.storage_id)
        .bind(&meta.storage_provider_id)
        .bind(meta.ref_count)
        .bind(meta.deleted)
        .bind(meta.clock)
        .bind(meta.created_at.timestamp_millis())
        .bind(meta.updated_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn commit_storage_location(
        &self,
        hash: &str,
        storage_id: &str,
        storage_provider_id: Option<&str>,
    ) -> StoreResult<FileMeta> {
        let mut tx = self.pool.begin().await?;

        let exists = sqlx::query("SELECT hash FROM file_meta WHERE hash = ?")
            .bind(hash)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            tx.rollback().await?;
            return Err(StoreError::NotFound(format!("file meta {}", hash)));
        }

        sqlx::query(
            r#"
            UPDATE file_meta
            SET storage_id = ?, storage_provider_id = ?, clock = clock + 1, updated_at = ?
            WHERE hash = ?
            "#,
        )
        .bind(storage_id)
        .bind(storage_provider_id)
        .bind(Utc::now().timestamp_millis())
        .bind(hash)
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query(&format!(
            "SELECT {} FROM file_meta WHERE hash = ?",
            META_COLUMNS
        ))
        .bind(hash)
        .fetch_one(&mut *tx)
        .await?;
        let meta = meta_from_row(&row)?;

        tx.commit().await?;
        Ok(meta)
    }

    async fn get_blob(&self, hash: &str) -> StoreResult<Option<FileBlob>> {
        let row = sqlx::query("SELECT hash, data, created_at FROM file_blobs WHERE hash = ?")
            .bind(hash)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let data: Vec<u8> = row.try_get("data")?;
                Ok(Some(FileBlob {
                    hash: row.try_get("hash")?,
                    data: data.into(),
                    created_at: millis_to_datetime(row.try_get("created_at")?)?,
                }))
            }
            None => Ok(None),
        }
    }

    async fn put_blob(&self, blob: &FileBlob) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO file_blobs (hash, data, size_bytes, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(hash) DO NOTHING
            "#,
        )
        .bind(&blob.hash)
        .bind(blob.data.as_ref())
        .bind(blob.size_bytes() as i64)
        .bind(blob.created_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
