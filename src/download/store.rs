//! Persistence for download records.
//!
//! [`DownloadRepository`] is the seam the orchestrator depends on;
//! [`SqliteDownloadStore`] is the production implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::instrument;

use super::{Download, DownloadStatus, NewDownload, StoreError};
use crate::db::Database;
use crate::indexer::MediaType;

type Result<T> = std::result::Result<T, StoreError>;

const COLUMNS: &str = "id, client_id, external_id, media_item_id, media_type, title, source, \
    source_locator, category, size_bytes, downloaded_bytes, progress, status, user_paused, \
    output_path, error_message, created_at, updated_at, completed_at";

/// Data-access contract for download records.
#[async_trait]
pub trait DownloadRepository: Send + Sync {
    /// Inserts a record; returns `None` when `(client_id, external_id)` is already tracked.
    async fn insert(&self, new: &NewDownload) -> Result<Option<Download>>;

    /// Loads one record.
    async fn get(&self, id: i64) -> Result<Option<Download>>;

    /// Loads the record a client job maps to.
    async fn find_by_external_id(
        &self,
        client_id: i64,
        external_id: &str,
    ) -> Result<Option<Download>>;

    /// Returns every record in one of `statuses`, oldest first.
    async fn list_by_status(&self, statuses: &[DownloadStatus]) -> Result<Vec<Download>>;

    /// Returns every record, oldest first.
    async fn list_all(&self) -> Result<Vec<Download>>;

    /// Returns the records acquiring one media item.
    async fn list_for_media_item(&self, media_item_id: i64) -> Result<Vec<Download>>;

    /// Writes the client-observed state of `download` (progress, sizes, status,
    /// output path, error, timestamps) if the stored status is still `expected`.
    ///
    /// Never touches `user_paused` or `category`. Returns whether a row moved.
    async fn update_state(&self, download: &Download, expected: DownloadStatus) -> Result<bool>;

    /// Sets the user-paused mark; returns whether the record exists.
    async fn set_user_paused(&self, id: i64, paused: bool) -> Result<bool>;

    /// Deletes a record; returns whether it existed.
    async fn delete(&self, id: i64) -> Result<bool>;

    /// Moves `id` from `expected` to `new` atomically; returns whether it moved.
    async fn compare_and_set_status(
        &self,
        id: i64,
        expected: DownloadStatus,
        new: DownloadStatus,
    ) -> Result<bool>;
}

/// `SQLite`-backed download store.
#[derive(Debug, Clone)]
pub struct SqliteDownloadStore {
    pool: SqlitePool,
}

impl SqliteDownloadStore {
    /// Creates a store over an open database.
    #[must_use]
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }
}

fn to_db_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_db_int(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn decode_error(column: &str, reason: String) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: reason.into(),
    }
}

impl<'r> FromRow<'r, SqliteRow> for Download {
    fn from_row(row: &'r SqliteRow) -> std::result::Result<Self, sqlx::Error> {
        let status: String = row.try_get("status")?;
        let media_type: String = row.try_get("media_type")?;

        Ok(Self {
            id: row.try_get("id")?,
            client_id: row.try_get("client_id")?,
            external_id: row.try_get("external_id")?,
            media_item_id: row.try_get("media_item_id")?,
            media_type: media_type
                .parse::<MediaType>()
                .map_err(|e| decode_error("media_type", e))?,
            title: row.try_get("title")?,
            source: row.try_get("source")?,
            source_locator: row.try_get("source_locator")?,
            category: row.try_get("category")?,
            size_bytes: from_db_int(row.try_get("size_bytes")?),
            downloaded_bytes: from_db_int(row.try_get("downloaded_bytes")?),
            progress: row.try_get("progress")?,
            status: status
                .parse::<DownloadStatus>()
                .map_err(|e| decode_error("status", e))?,
            user_paused: row.try_get("user_paused")?,
            output_path: row.try_get("output_path")?,
            error_message: row.try_get("error_message")?,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
            updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
            completed_at: row.try_get::<Option<DateTime<Utc>>, _>("completed_at")?,
        })
    }
}

#[async_trait]
impl DownloadRepository for SqliteDownloadStore {
    #[instrument(
        skip(self, new),
        fields(client_id = new.client_id, external_id = %new.external_id)
    )]
    async fn insert(&self, new: &NewDownload) -> Result<Option<Download>> {
        let now = Utc::now();
        let sql = format!(
            "INSERT INTO downloads (client_id, external_id, media_item_id, media_type, title, \
             source, source_locator, category, size_bytes, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(client_id, external_id) DO NOTHING \
             RETURNING {COLUMNS}"
        );
        let inserted = sqlx::query_as::<_, Download>(&sql)
            .bind(new.client_id)
            .bind(&new.external_id)
            .bind(new.media_item_id)
            .bind(new.media_type.as_str())
            .bind(&new.title)
            .bind(&new.source)
            .bind(&new.source_locator)
            .bind(&new.category)
            .bind(to_db_int(new.size_bytes))
            .bind(now)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;
        Ok(inserted)
    }

    async fn get(&self, id: i64) -> Result<Option<Download>> {
        let sql = format!("SELECT {COLUMNS} FROM downloads WHERE id = ?");
        Ok(sqlx::query_as::<_, Download>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_by_external_id(
        &self,
        client_id: i64,
        external_id: &str,
    ) -> Result<Option<Download>> {
        let sql =
            format!("SELECT {COLUMNS} FROM downloads WHERE client_id = ? AND external_id = ?");
        Ok(sqlx::query_as::<_, Download>(&sql)
            .bind(client_id)
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list_by_status(&self, statuses: &[DownloadStatus]) -> Result<Vec<Download>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let mut builder: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new(format!("SELECT {COLUMNS} FROM downloads WHERE status IN ("));
        let mut separated = builder.separated(", ");
        for status in statuses {
            separated.push_bind(status.as_str());
        }
        separated.push_unseparated(") ORDER BY id ASC");

        Ok(builder
            .build_query_as::<Download>()
            .fetch_all(&self.pool)
            .await?)
    }

    async fn list_all(&self) -> Result<Vec<Download>> {
        let sql = format!("SELECT {COLUMNS} FROM downloads ORDER BY id ASC");
        Ok(sqlx::query_as::<_, Download>(&sql)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn list_for_media_item(&self, media_item_id: i64) -> Result<Vec<Download>> {
        let sql =
            format!("SELECT {COLUMNS} FROM downloads WHERE media_item_id = ? ORDER BY id ASC");
        Ok(sqlx::query_as::<_, Download>(&sql)
            .bind(media_item_id)
            .fetch_all(&self.pool)
            .await?)
    }

    #[instrument(
        skip(self, download),
        fields(id = download.id, expected = %expected, status = %download.status)
    )]
    async fn update_state(&self, download: &Download, expected: DownloadStatus) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE downloads SET size_bytes = ?, downloaded_bytes = ?, progress = ?, \
             status = ?, output_path = ?, error_message = ?, updated_at = ?, completed_at = ? \
             WHERE id = ? AND status = ?",
        )
        .bind(to_db_int(download.size_bytes))
        .bind(to_db_int(download.downloaded_bytes))
        .bind(download.progress.clamp(0.0, 1.0))
        .bind(download.status.as_str())
        .bind(&download.output_path)
        .bind(&download.error_message)
        .bind(download.updated_at)
        .bind(download.completed_at)
        .bind(download.id)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self))]
    async fn set_user_paused(&self, id: i64, paused: bool) -> Result<bool> {
        let result =
            sqlx::query("UPDATE downloads SET user_paused = ?, updated_at = ? WHERE id = ?")
                .bind(paused)
                .bind(Utc::now())
                .bind(id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM downloads WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn compare_and_set_status(
        &self,
        id: i64,
        expected: DownloadStatus,
        new: DownloadStatus,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE downloads SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(new.as_str())
        .bind(Utc::now())
        .bind(id)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
