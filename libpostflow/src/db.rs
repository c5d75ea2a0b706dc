//! Database operations for Postflow
//!
//! [`Store`] is the persistence seam the workflow and dispatcher depend on.
//! [`Database`] implements it on SQLite. All state changes that other workers
//! could race on are conditional updates (`... WHERE status = ?`) and report
//! whether they won.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use std::collections::BTreeSet;
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{DbError, PostflowError, Result};
use crate::types::{
    ApprovalRecord, ContentItem, ContentStatus, PlatformAccount, PlatformPostRef, PublishingLog,
    PublishingStatus, RefreshedToken,
};

/// Optional filters for the publishing history view
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub status: Option<PublishingStatus>,
    pub content_id: Option<Uuid>,
}

/// Generic persistence interface over content, approvals, accounts and logs
#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_content(&self, content: &ContentItem) -> Result<()>;

    async fn get_content(&self, id: Uuid) -> Result<Option<ContentItem>>;

    /// Persist a transition and its audit record atomically.
    ///
    /// Returns `false` without writing anything when the stored status is no
    /// longer `expected_from`.
    async fn apply_transition(
        &self,
        content: &ContentItem,
        expected_from: ContentStatus,
        record: &ApprovalRecord,
    ) -> Result<bool>;

    /// Set `published`, stamping `published_at` only if it is still unset
    async fn mark_content_published(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;

    /// Approval history, newest first
    async fn list_approvals(&self, content_id: Uuid) -> Result<Vec<ApprovalRecord>>;

    async fn insert_account(&self, account: &PlatformAccount) -> Result<()>;

    async fn get_account(&self, id: Uuid) -> Result<Option<PlatformAccount>>;

    /// Connected accounts whose token expires before `threshold`
    async fn accounts_expiring_before(
        &self,
        threshold: DateTime<Utc>,
    ) -> Result<Vec<PlatformAccount>>;

    async fn update_account_token(&self, id: Uuid, token: &RefreshedToken) -> Result<()>;

    /// Insert all logs or none
    async fn insert_logs(&self, logs: &[PublishingLog]) -> Result<()>;

    async fn get_log(&self, id: Uuid) -> Result<Option<PublishingLog>>;

    async fn logs_for_content(&self, content_id: Uuid) -> Result<Vec<PublishingLog>>;

    /// Pending logs whose `scheduled_at` is at or before `now`
    async fn due_logs(&self, now: DateTime<Utc>) -> Result<Vec<PublishingLog>>;

    /// Atomic `pending -> publishing`
    async fn claim_log(&self, id: Uuid) -> Result<bool>;

    /// Atomic `failed -> publishing`, bumping `retry_count` and clearing the error
    async fn claim_retry(&self, id: Uuid) -> Result<bool>;

    /// Undo a retry claim that never reached a worker: `publishing -> failed`,
    /// giving back the retry it counted
    async fn release_retry(&self, id: Uuid, error: &str) -> Result<bool>;

    /// `publishing -> success`
    async fn complete_log_success(
        &self,
        id: Uuid,
        post: &PlatformPostRef,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    /// `publishing -> failed`, adding `retries_used` to `retry_count`
    async fn complete_log_failure(&self, id: Uuid, error: &str, retries_used: u32) -> Result<bool>;

    /// Atomic `pending -> cancelled`
    async fn cancel_log(&self, id: Uuid) -> Result<bool>;

    /// Pending and publishing logs, soonest first, with the total count
    async fn publishing_queue(&self, page: u32, per_page: u32)
        -> Result<(Vec<PublishingLog>, u64)>;

    /// All logs matching the filter, newest first, with the total count
    async fn publishing_history(
        &self,
        filter: &HistoryFilter,
        page: u32,
        per_page: u32,
    ) -> Result<(Vec<PublishingLog>, u64)>;
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection and run migrations
    pub async fn new(db_path: &str) -> Result<Self> {
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
        }

        // Forward slashes work on both Windows and Unix; mode=rwc creates the file
        let db_url = format!("sqlite://{}?mode=rwc", expanded_path.replace('\\', "/"));

        let pool = SqlitePool::connect(&db_url)
            .await
            .map_err(DbError::SqlxError)?;

        Self::from_pool(pool).await
    }

    /// Wrap an existing pool, running migrations on it
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl Store for Database {
    async fn insert_content(&self, content: &ContentItem) -> Result<()> {
        let platforms = serde_json::to_string(&content.target_platforms).map_err(|e| {
            DbError::CorruptRow {
                table: "contents",
                reason: format!("unserializable target platforms: {}", e),
            }
        })?;

        sqlx::query(
            r#"
            INSERT INTO contents (
                id, client_id, title, body, content_type, status, target_platforms,
                scheduled_at, published_at, approved_at, approved_by, created_by, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(content.id.to_string())
        .bind(content.client_id.to_string())
        .bind(&content.title)
        .bind(&content.body)
        .bind(content.content_type.as_str())
        .bind(content.status.as_str())
        .bind(platforms)
        .bind(opt_ts(content.scheduled_at)?)
        .bind(opt_ts(content.published_at)?)
        .bind(opt_ts(content.approved_at)?)
        .bind(content.approved_by.map(|id| id.to_string()))
        .bind(content.created_by.to_string())
        .bind(to_ts(content.created_at)?)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    async fn get_content(&self, id: Uuid) -> Result<Option<ContentItem>> {
        let row = sqlx::query(
            r#"
            SELECT id, client_id, title, body, content_type, status, target_platforms,
                   scheduled_at, published_at, approved_at, approved_by, created_by, created_at
            FROM contents WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.as_ref().map(content_from_row).transpose()
    }

    async fn apply_transition(
        &self,
        content: &ContentItem,
        expected_from: ContentStatus,
        record: &ApprovalRecord,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(DbError::SqlxError)?;

        let updated = sqlx::query(
            r#"
            UPDATE contents
            SET status = ?, approved_at = ?, approved_by = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(content.status.as_str())
        .bind(opt_ts(content.approved_at)?)
        .bind(content.approved_by.map(|id| id.to_string()))
        .bind(content.id.to_string())
        .bind(expected_from.as_str())
        .execute(&mut *tx)
        .await
        .map_err(DbError::SqlxError)?;

        if updated.rows_affected() == 0 {
            tx.rollback().await.map_err(DbError::SqlxError)?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO content_approvals (
                id, content_id, from_status, to_status, reviewer_id, comment, is_urgent, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.content_id.to_string())
        .bind(record.from_status.as_str())
        .bind(record.to_status.as_str())
        .bind(record.reviewer_id.to_string())
        .bind(&record.comment)
        .bind(record.is_urgent)
        .bind(to_ts(record.created_at)?)
        .execute(&mut *tx)
        .await
        .map_err(DbError::SqlxError)?;

        tx.commit().await.map_err(DbError::SqlxError)?;
        Ok(true)
    }

    async fn mark_content_published(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE contents
            SET status = 'published', published_at = COALESCE(published_at, ?)
            WHERE id = ?
            "#,
        )
        .bind(to_ts(at)?)
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    async fn list_approvals(&self, content_id: Uuid) -> Result<Vec<ApprovalRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, content_id, from_status, to_status, reviewer_id, comment, is_urgent, created_at
            FROM content_approvals
            WHERE content_id = ?
            ORDER BY created_at DESC, rowid DESC
            "#,
        )
        .bind(content_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(approval_from_row).collect()
    }

    async fn insert_account(&self, account: &PlatformAccount) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO platform_accounts (
                id, client_id, platform, account_name, access_token, refresh_token,
                token_expires_at, is_connected
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(account.id.to_string())
        .bind(account.client_id.to_string())
        .bind(&account.platform)
        .bind(&account.account_name)
        .bind(&account.access_token)
        .bind(&account.refresh_token)
        .bind(opt_ts(account.token_expires_at)?)
        .bind(account.is_connected)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    async fn get_account(&self, id: Uuid) -> Result<Option<PlatformAccount>> {
        let row = sqlx::query(
            r#"
            SELECT id, client_id, platform, account_name, access_token, refresh_token,
                   token_expires_at, is_connected
            FROM platform_accounts WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.as_ref().map(account_from_row).transpose()
    }

    async fn accounts_expiring_before(
        &self,
        threshold: DateTime<Utc>,
    ) -> Result<Vec<PlatformAccount>> {
        let rows = sqlx::query(
            r#"
            SELECT id, client_id, platform, account_name, access_token, refresh_token,
                   token_expires_at, is_connected
            FROM platform_accounts
            WHERE is_connected = 1
              AND token_expires_at IS NOT NULL
              AND token_expires_at < ?
            ORDER BY token_expires_at ASC
            "#,
        )
        .bind(to_ts(threshold)?)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(account_from_row).collect()
    }

    async fn update_account_token(&self, id: Uuid, token: &RefreshedToken) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE platform_accounts
            SET access_token = ?,
                refresh_token = COALESCE(?, refresh_token),
                token_expires_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&token.access_token)
        .bind(&token.refresh_token)
        .bind(opt_ts(token.expires_at)?)
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    async fn insert_logs(&self, logs: &[PublishingLog]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(DbError::SqlxError)?;

        for log in logs {
            sqlx::query(
                r#"
                INSERT INTO publishing_logs (
                    id, content_id, platform_account_id, status, platform_post_id,
                    platform_post_url, error_message, retry_count, scheduled_at,
                    published_at, created_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(log.id.to_string())
            .bind(log.content_id.to_string())
            .bind(log.platform_account_id.to_string())
            .bind(log.status.as_str())
            .bind(&log.platform_post_id)
            .bind(&log.platform_post_url)
            .bind(&log.error_message)
            .bind(i64::from(log.retry_count))
            .bind(opt_ts(log.scheduled_at)?)
            .bind(opt_ts(log.published_at)?)
            .bind(to_ts(log.created_at)?)
            .execute(&mut *tx)
            .await
            .map_err(DbError::SqlxError)?;
        }

        tx.commit().await.map_err(DbError::SqlxError)?;
        Ok(())
    }

    async fn get_log(&self, id: Uuid) -> Result<Option<PublishingLog>> {
        let query = format!("SELECT {} FROM publishing_logs WHERE id = ?", LOG_COLUMNS);
        let row = sqlx::query(&query)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        row.as_ref().map(log_from_row).transpose()
    }

    async fn logs_for_content(&self, content_id: Uuid) -> Result<Vec<PublishingLog>> {
        let query = format!(
            "SELECT {} FROM publishing_logs WHERE content_id = ? ORDER BY created_at DESC, rowid DESC",
            LOG_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(content_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        rows.iter().map(log_from_row).collect()
    }

    async fn due_logs(&self, now: DateTime<Utc>) -> Result<Vec<PublishingLog>> {
        let query = format!(
            r#"
            SELECT {} FROM publishing_logs
            WHERE status = 'pending' AND scheduled_at IS NOT NULL AND scheduled_at <= ?
            ORDER BY scheduled_at ASC, rowid ASC
            "#,
            LOG_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(to_ts(now)?)
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        rows.iter().map(log_from_row).collect()
    }

    async fn claim_log(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE publishing_logs SET status = 'publishing'
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    async fn claim_retry(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE publishing_logs
            SET status = 'publishing', retry_count = retry_count + 1, error_message = NULL
            WHERE id = ? AND status = 'failed'
            "#,
        )
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    async fn release_retry(&self, id: Uuid, error: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE publishing_logs
            SET status = 'failed', error_message = ?, retry_count = MAX(retry_count - 1, 0)
            WHERE id = ? AND status = 'publishing'
            "#,
        )
        .bind(error)
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    async fn complete_log_success(
        &self,
        id: Uuid,
        post: &PlatformPostRef,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE publishing_logs
            SET status = 'success', platform_post_id = ?, platform_post_url = ?,
                published_at = ?, error_message = NULL
            WHERE id = ? AND status = 'publishing'
            "#,
        )
        .bind(&post.post_id)
        .bind(&post.post_url)
        .bind(to_ts(at)?)
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    async fn complete_log_failure(&self, id: Uuid, error: &str, retries_used: u32) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE publishing_logs
            SET status = 'failed', error_message = ?, retry_count = retry_count + ?
            WHERE id = ? AND status = 'publishing'
            "#,
        )
        .bind(error)
        .bind(i64::from(retries_used))
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    async fn cancel_log(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE publishing_logs SET status = 'cancelled'
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    async fn publishing_queue(
        &self,
        page: u32,
        per_page: u32,
    ) -> Result<(Vec<PublishingLog>, u64)> {
        let (total,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM publishing_logs WHERE status IN ('pending', 'publishing')",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        // SQLite sorts NULL first in ascending order, so unscheduled logs lead
        let query = format!(
            r#"
            SELECT {} FROM publishing_logs
            WHERE status IN ('pending', 'publishing')
            ORDER BY scheduled_at ASC, created_at ASC
            LIMIT ? OFFSET ?
            "#,
            LOG_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(i64::from(per_page))
            .bind(offset(page, per_page))
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        let logs = rows.iter().map(log_from_row).collect::<Result<Vec<_>>>()?;
        Ok((logs, total as u64))
    }

    async fn publishing_history(
        &self,
        filter: &HistoryFilter,
        page: u32,
        per_page: u32,
    ) -> Result<(Vec<PublishingLog>, u64)> {
        let mut where_clauses = vec!["1=1"];
        if filter.status.is_some() {
            where_clauses.push("status = ?");
        }
        if filter.content_id.is_some() {
            where_clauses.push("content_id = ?");
        }
        let where_clause = where_clauses.join(" AND ");

        let count_str = format!("SELECT COUNT(*) FROM publishing_logs WHERE {}", where_clause);
        let mut count_query = sqlx::query_as::<_, (i64,)>(&count_str);
        if let Some(status) = filter.status {
            count_query = count_query.bind(status.as_str());
        }
        if let Some(content_id) = filter.content_id {
            count_query = count_query.bind(content_id.to_string());
        }
        let (total,) = count_query
            .fetch_one(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        let query_str = format!(
            r#"
            SELECT {} FROM publishing_logs
            WHERE {}
            ORDER BY created_at DESC, rowid DESC
            LIMIT ? OFFSET ?
            "#,
            LOG_COLUMNS, where_clause
        );
        let mut query = sqlx::query(&query_str);
        if let Some(status) = filter.status {
            query = query.bind(status.as_str());
        }
        if let Some(content_id) = filter.content_id {
            query = query.bind(content_id.to_string());
        }
        query = query.bind(i64::from(per_page)).bind(offset(page, per_page));

        let rows = query.fetch_all(&self.pool).await.map_err(DbError::SqlxError)?;
        let logs = rows.iter().map(log_from_row).collect::<Result<Vec<_>>>()?;
        Ok((logs, total as u64))
    }
}

const NANOS_PER_SEC: i64 = 1_000_000_000;

const LOG_COLUMNS: &str = "id, content_id, platform_account_id, status, platform_post_id, \
     platform_post_url, error_message, retry_count, scheduled_at, published_at, created_at";

fn offset(page: u32, per_page: u32) -> i64 {
    i64::from(page.max(1) - 1) * i64::from(per_page)
}

/// Timestamps are stored as nanoseconds since the Unix epoch so they read
/// back exactly as written
fn to_ts(at: DateTime<Utc>) -> Result<i64> {
    at.timestamp_nanos_opt().ok_or_else(|| {
        PostflowError::InvalidInput(format!("timestamp {} is outside the storable range", at))
    })
}

fn opt_ts(at: Option<DateTime<Utc>>) -> Result<Option<i64>> {
    at.map(to_ts).transpose()
}

fn from_ts(table: &'static str, ts: i64) -> Result<DateTime<Utc>> {
    let secs = ts.div_euclid(NANOS_PER_SEC);
    let nanos = ts.rem_euclid(NANOS_PER_SEC) as u32;
    DateTime::from_timestamp(secs, nanos).ok_or_else(|| {
        DbError::CorruptRow {
            table,
            reason: format!("timestamp out of range: {}", ts),
        }
        .into()
    })
}

fn from_opt_ts(table: &'static str, ts: Option<i64>) -> Result<Option<DateTime<Utc>>> {
    ts.map(|ts| from_ts(table, ts)).transpose()
}

fn parse_uuid(table: &'static str, value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| {
        DbError::CorruptRow {
            table,
            reason: format!("invalid id '{}': {}", value, e),
        }
        .into()
    })
}

fn parse_enum<T>(table: &'static str, value: &str) -> Result<T>
where
    T: FromStr<Err = String>,
{
    value
        .parse()
        .map_err(|reason| DbError::CorruptRow { table, reason }.into())
}

fn col<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(name).map_err(|e| DbError::SqlxError(e).into())
}

fn content_from_row(row: &SqliteRow) -> Result<ContentItem> {
    const TABLE: &str = "contents";

    let platforms: String = col(row, "target_platforms")?;
    let target_platforms: BTreeSet<String> =
        serde_json::from_str(&platforms).map_err(|e| DbError::CorruptRow {
            table: TABLE,
            reason: format!("invalid target_platforms: {}", e),
        })?;
    let approved_by: Option<String> = col(row, "approved_by")?;

    Ok(ContentItem {
        id: parse_uuid(TABLE, &col::<String>(row, "id")?)?,
        client_id: parse_uuid(TABLE, &col::<String>(row, "client_id")?)?,
        title: col(row, "title")?,
        body: col(row, "body")?,
        content_type: parse_enum(TABLE, &col::<String>(row, "content_type")?)?,
        status: parse_enum(TABLE, &col::<String>(row, "status")?)?,
        target_platforms,
        scheduled_at: from_opt_ts(TABLE, col(row, "scheduled_at")?)?,
        published_at: from_opt_ts(TABLE, col(row, "published_at")?)?,
        approved_at: from_opt_ts(TABLE, col(row, "approved_at")?)?,
        approved_by: approved_by.map(|id| parse_uuid(TABLE, &id)).transpose()?,
        created_by: parse_uuid(TABLE, &col::<String>(row, "created_by")?)?,
        created_at: from_ts(TABLE, col(row, "created_at")?)?,
    })
}

fn approval_from_row(row: &SqliteRow) -> Result<ApprovalRecord> {
    const TABLE: &str = "content_approvals";

    Ok(ApprovalRecord {
        id: parse_uuid(TABLE, &col::<String>(row, "id")?)?,
        content_id: parse_uuid(TABLE, &col::<String>(row, "content_id")?)?,
        from_status: parse_enum(TABLE, &col::<String>(row, "from_status")?)?,
        to_status: parse_enum(TABLE, &col::<String>(row, "to_status")?)?,
        reviewer_id: parse_uuid(TABLE, &col::<String>(row, "reviewer_id")?)?,
        comment: col(row, "comment")?,
        is_urgent: col(row, "is_urgent")?,
        created_at: from_ts(TABLE, col(row, "created_at")?)?,
    })
}

fn account_from_row(row: &SqliteRow) -> Result<PlatformAccount> {
    const TABLE: &str = "platform_accounts";

    Ok(PlatformAccount {
        id: parse_uuid(TABLE, &col::<String>(row, "id")?)?,
        client_id: parse_uuid(TABLE, &col::<String>(row, "client_id")?)?,
        platform: col(row, "platform")?,
        account_name: col(row, "account_name")?,
        access_token: col(row, "access_token")?,
        refresh_token: col(row, "refresh_token")?,
        token_expires_at: from_opt_ts(TABLE, col(row, "token_expires_at")?)?,
        is_connected: col(row, "is_connected")?,
    })
}

fn log_from_row(row: &SqliteRow) -> Result<PublishingLog> {
    const TABLE: &str = "publishing_logs";

    let retry_count: i64 = col(row, "retry_count")?;

    Ok(PublishingLog {
        id: parse_uuid(TABLE, &col::<String>(row, "id")?)?,
        content_id: parse_uuid(TABLE, &col::<String>(row, "content_id")?)?,
        platform_account_id: parse_uuid(TABLE, &col::<String>(row, "platform_account_id")?)?,
        status: parse_enum(TABLE, &col::<String>(row, "status")?)?,
        platform_post_id: col(row, "platform_post_id")?,
        platform_post_url: col(row, "platform_post_url")?,
        error_message: col(row, "error_message")?,
        retry_count: u32::try_from(retry_count).map_err(|_| DbError::CorruptRow {
            table: TABLE,
            reason: format!("negative retry_count: {}", retry_count),
        })?,
        scheduled_at: from_opt_ts(TABLE, col(row, "scheduled_at")?)?,
        published_at: from_opt_ts(TABLE, col(row, "published_at")?)?,
        created_at: from_ts(TABLE, col(row, "created_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PostflowError;
    use crate::types::{ContentType, NewContent};
    use chrono::Duration;
    use tempfile::TempDir;

    async fn setup_test_db() -> (TempDir, Database) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db = Database::new(db_path.to_str().unwrap()).await.unwrap();
        (temp_dir, db)
    }

    fn create_test_content() -> ContentItem {
        ContentItem::new_draft(
            NewContent {
                client_id: Uuid::new_v4(),
                title: "Spring campaign".to_string(),
                body: Some("New arrivals this week".to_string()),
                content_type: ContentType::Feed,
                target_platforms: ["instagram".to_string(), "facebook".to_string()]
                    .into_iter()
                    .collect(),
                scheduled_at: None,
            },
            Uuid::new_v4(),
        )
    }

    fn create_test_account(platform: &str) -> PlatformAccount {
        PlatformAccount {
            id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            platform: platform.to_string(),
            account_name: format!("brand_{}", platform),
            access_token: "token".to_string(),
            refresh_token: Some("refresh".to_string()),
            token_expires_at: None,
            is_connected: true,
        }
    }

    #[tokio::test]
    async fn test_database_initialization_with_invalid_path() {
        #[cfg(unix)]
        let invalid_path = "/tmp/test\0invalid.db";

        #[cfg(windows)]
        let invalid_path = "C:\\invalid<>path\\test.db";

        let result = Database::new(invalid_path).await;
        assert!(matches!(result, Err(PostflowError::Database(_))));
    }

    #[tokio::test]
    async fn test_content_round_trip() {
        let (_temp, db) = setup_test_db().await;
        let content = create_test_content();
        db.insert_content(&content).await.unwrap();

        // Reads back exactly, sub-second precision included
        let loaded = db.get_content(content.id).await.unwrap().unwrap();
        assert_eq!(loaded, content);
        assert_eq!(loaded.status, ContentStatus::Draft);

        assert!(db.get_content(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_apply_transition_writes_status_and_record() {
        let (_temp, db) = setup_test_db().await;
        let mut content = create_test_content();
        db.insert_content(&content).await.unwrap();

        content.status = ContentStatus::Review;
        let record = ApprovalRecord {
            id: Uuid::new_v4(),
            content_id: content.id,
            from_status: ContentStatus::Draft,
            to_status: ContentStatus::Review,
            reviewer_id: Uuid::new_v4(),
            comment: Some("ready".to_string()),
            is_urgent: false,
            created_at: Utc::now(),
        };

        let applied = db
            .apply_transition(&content, ContentStatus::Draft, &record)
            .await
            .unwrap();
        assert!(applied);

        let loaded = db.get_content(content.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ContentStatus::Review);

        let approvals = db.list_approvals(content.id).await.unwrap();
        assert_eq!(approvals.len(), 1);
        assert_eq!(approvals[0].comment.as_deref(), Some("ready"));
    }

    #[tokio::test]
    async fn test_apply_transition_with_stale_status_writes_nothing() {
        let (_temp, db) = setup_test_db().await;
        let mut content = create_test_content();
        db.insert_content(&content).await.unwrap();

        content.status = ContentStatus::ClientReview;
        let record = ApprovalRecord {
            id: Uuid::new_v4(),
            content_id: content.id,
            from_status: ContentStatus::Review,
            to_status: ContentStatus::ClientReview,
            reviewer_id: Uuid::new_v4(),
            comment: None,
            is_urgent: false,
            created_at: Utc::now(),
        };

        // Stored status is still draft
        let applied = db
            .apply_transition(&content, ContentStatus::Review, &record)
            .await
            .unwrap();
        assert!(!applied);
        assert!(db.list_approvals(content.id).await.unwrap().is_empty());
        assert_eq!(
            db.get_content(content.id).await.unwrap().unwrap().status,
            ContentStatus::Draft
        );
    }

    #[tokio::test]
    async fn test_published_requires_timestamp_constraint() {
        let (_temp, db) = setup_test_db().await;
        let mut content = create_test_content();
        content.status = ContentStatus::Published;

        let result = db.insert_content(&content).await;
        assert!(result.is_err(), "published content without published_at must be rejected");
    }

    #[tokio::test]
    async fn test_mark_content_published_keeps_first_timestamp() {
        let (_temp, db) = setup_test_db().await;
        let content = create_test_content();
        db.insert_content(&content).await.unwrap();

        let first = Utc::now() - Duration::minutes(5);
        db.mark_content_published(content.id, first).await.unwrap();
        db.mark_content_published(content.id, Utc::now()).await.unwrap();

        let loaded = db.get_content(content.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ContentStatus::Published);
        assert_eq!(loaded.published_at, Some(first));
    }

    #[tokio::test]
    async fn test_log_timestamps_round_trip_exactly() {
        let (_temp, db) = setup_test_db().await;
        let scheduled = Utc::now() + Duration::milliseconds(1500);
        let log = PublishingLog::pending(Uuid::new_v4(), Uuid::new_v4(), Some(scheduled));
        db.insert_logs(std::slice::from_ref(&log)).await.unwrap();

        let loaded = db.get_log(log.id).await.unwrap().unwrap();
        assert_eq!(loaded, log);

        // Half a second before the due time the log is not yet due
        let early = scheduled - Duration::milliseconds(500);
        assert!(db.due_logs(early).await.unwrap().is_empty());
        assert_eq!(db.due_logs(scheduled).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_claim_log_only_once() {
        let (_temp, db) = setup_test_db().await;
        let log = PublishingLog::pending(Uuid::new_v4(), Uuid::new_v4(), Some(Utc::now()));
        db.insert_logs(std::slice::from_ref(&log)).await.unwrap();

        assert!(db.claim_log(log.id).await.unwrap());
        assert!(!db.claim_log(log.id).await.unwrap());

        let loaded = db.get_log(log.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, PublishingStatus::Publishing);
    }

    #[tokio::test]
    async fn test_concurrent_claims_have_single_winner() {
        let (_temp, db) = setup_test_db().await;
        let log = PublishingLog::pending(Uuid::new_v4(), Uuid::new_v4(), Some(Utc::now()));
        db.insert_logs(std::slice::from_ref(&log)).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let db = db.clone();
            let id = log.id;
            handles.push(tokio::spawn(async move { db.claim_log(id).await.unwrap() }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_failure_and_retry_bookkeeping() {
        let (_temp, db) = setup_test_db().await;
        let log = PublishingLog::pending(Uuid::new_v4(), Uuid::new_v4(), None);
        db.insert_logs(std::slice::from_ref(&log)).await.unwrap();

        // Completion requires the publishing claim
        assert!(!db.complete_log_failure(log.id, "boom", 0).await.unwrap());

        assert!(db.claim_log(log.id).await.unwrap());
        assert!(db.complete_log_failure(log.id, "HTTP 503", 3).await.unwrap());

        let failed = db.get_log(log.id).await.unwrap().unwrap();
        assert_eq!(failed.status, PublishingStatus::Failed);
        assert_eq!(failed.retry_count, 3);
        assert_eq!(failed.error_message.as_deref(), Some("HTTP 503"));

        assert!(db.claim_retry(log.id).await.unwrap());
        let retried = db.get_log(log.id).await.unwrap().unwrap();
        assert_eq!(retried.status, PublishingStatus::Publishing);
        assert_eq!(retried.retry_count, 4);
        assert!(retried.error_message.is_none());

        assert!(!db.claim_retry(log.id).await.unwrap());

        // An undispatched retry goes back to failed with its count restored
        assert!(db.release_retry(log.id, "queue closed").await.unwrap());
        let released = db.get_log(log.id).await.unwrap().unwrap();
        assert_eq!(released.status, PublishingStatus::Failed);
        assert_eq!(released.retry_count, 3);
        assert_eq!(released.error_message.as_deref(), Some("queue closed"));
        assert!(!db.release_retry(log.id, "queue closed").await.unwrap());
    }

    #[tokio::test]
    async fn test_success_requires_post_id() {
        let (_temp, db) = setup_test_db().await;
        let log = PublishingLog::pending(Uuid::new_v4(), Uuid::new_v4(), None);
        db.insert_logs(std::slice::from_ref(&log)).await.unwrap();
        db.claim_log(log.id).await.unwrap();

        let post = PlatformPostRef {
            post_id: "17890012".to_string(),
            post_url: Some("https://instagram.com/p/17890012".to_string()),
        };
        assert!(db.complete_log_success(log.id, &post, Utc::now()).await.unwrap());

        let loaded = db.get_log(log.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, PublishingStatus::Success);
        assert_eq!(loaded.platform_post_id.as_deref(), Some("17890012"));
        assert!(loaded.published_at.is_some());
    }

    #[tokio::test]
    async fn test_cancel_only_pending() {
        let (_temp, db) = setup_test_db().await;
        let pending = PublishingLog::pending(Uuid::new_v4(), Uuid::new_v4(), None);
        let claimed = PublishingLog::pending(Uuid::new_v4(), Uuid::new_v4(), None);
        db.insert_logs(&[pending.clone(), claimed.clone()]).await.unwrap();
        db.claim_log(claimed.id).await.unwrap();

        assert!(db.cancel_log(pending.id).await.unwrap());
        assert!(!db.cancel_log(pending.id).await.unwrap());
        assert!(!db.cancel_log(claimed.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_due_logs_respects_schedule_and_status() {
        let (_temp, db) = setup_test_db().await;
        let now = Utc::now();
        let due = PublishingLog::pending(Uuid::new_v4(), Uuid::new_v4(), Some(now - Duration::minutes(1)));
        let future = PublishingLog::pending(Uuid::new_v4(), Uuid::new_v4(), Some(now + Duration::hours(1)));
        let claimed = PublishingLog::pending(Uuid::new_v4(), Uuid::new_v4(), Some(now - Duration::minutes(2)));
        let unscheduled = PublishingLog::pending(Uuid::new_v4(), Uuid::new_v4(), None);
        db.insert_logs(&[due.clone(), future, claimed.clone(), unscheduled])
            .await
            .unwrap();
        db.claim_log(claimed.id).await.unwrap();

        let due_logs = db.due_logs(now).await.unwrap();
        assert_eq!(due_logs.len(), 1);
        assert_eq!(due_logs[0].id, due.id);
    }

    #[tokio::test]
    async fn test_insert_logs_is_all_or_nothing() {
        let (_temp, db) = setup_test_db().await;
        let log = PublishingLog::pending(Uuid::new_v4(), Uuid::new_v4(), None);
        let duplicate = log.clone();

        let result = db.insert_logs(&[log.clone(), duplicate]).await;
        assert!(result.is_err());
        assert!(db.get_log(log.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_publishing_queue_and_history_pagination() {
        let (_temp, db) = setup_test_db().await;
        let content_id = Uuid::new_v4();
        let now = Utc::now();

        let logs: Vec<PublishingLog> = (0..5)
            .map(|i| {
                PublishingLog::pending(content_id, Uuid::new_v4(), Some(now + Duration::minutes(i)))
            })
            .collect();
        db.insert_logs(&logs).await.unwrap();
        db.cancel_log(logs[4].id).await.unwrap();

        let (page1, total) = db.publishing_queue(1, 2).await.unwrap();
        assert_eq!(total, 4);
        assert_eq!(page1.len(), 2);
        assert_eq!(page1[0].id, logs[0].id);
        assert_eq!(page1[1].id, logs[1].id);

        let (page2, _) = db.publishing_queue(2, 2).await.unwrap();
        assert_eq!(page2[0].id, logs[2].id);

        let filter = HistoryFilter {
            status: Some(PublishingStatus::Cancelled),
            content_id: None,
        };
        let (cancelled, total) = db.publishing_history(&filter, 1, 20).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(cancelled[0].id, logs[4].id);

        let filter = HistoryFilter {
            status: None,
            content_id: Some(content_id),
        };
        let (all, total) = db.publishing_history(&filter, 1, 20).await.unwrap();
        assert_eq!(total, 5);
        assert_eq!(all.len(), 5);
    }

    #[tokio::test]
    async fn test_expiring_accounts_and_token_update() {
        let (_temp, db) = setup_test_db().await;
        let now = Utc::now();

        let mut expiring = create_test_account("instagram");
        expiring.token_expires_at = Some(now + Duration::hours(2));
        let mut later = create_test_account("youtube");
        later.token_expires_at = Some(now + Duration::days(10));
        let mut disconnected = create_test_account("facebook");
        disconnected.token_expires_at = Some(now + Duration::hours(1));
        disconnected.is_connected = false;

        for account in [&expiring, &later, &disconnected] {
            db.insert_account(account).await.unwrap();
        }

        let found = db
            .accounts_expiring_before(now + Duration::hours(24))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, expiring.id);

        let token = RefreshedToken {
            access_token: "fresh".to_string(),
            refresh_token: None,
            expires_at: Some(now + Duration::days(60)),
        };
        db.update_account_token(expiring.id, &token).await.unwrap();

        let loaded = db.get_account(expiring.id).await.unwrap().unwrap();
        assert_eq!(loaded.access_token, "fresh");
        assert_eq!(loaded.refresh_token.as_deref(), Some("refresh"));
        assert!(db
            .accounts_expiring_before(now + Duration::hours(24))
            .await
            .unwrap()
            .is_empty());
    }
}
