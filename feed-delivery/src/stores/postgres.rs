use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use interfaces::{
    ArticleDeliveryState, ArticleFieldContext, ArticleFieldStore, DeliveryCountFilter, DeliveryErrorCode,
    DeliveryLog, DeliveryLogQuery, DeliveryRecord, DeliveryRecordContext, DeliveryRecordStore, DeliveryStatus,
    DeliveryStatusUpdate, Partition, StoreError, StoreResult,
};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::collections::HashSet;
use tracing::{debug, info};

use crate::stores::{field_rows, window_start, FieldRow, ID_FIELD};
use crate::types::{Article, Result};

/// Creates the tables both PostgreSQL stores rely on.
pub async fn setup_schema(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS article_field_values (
            feed_id TEXT NOT NULL,
            field_name TEXT NOT NULL,
            field_hash TEXT NOT NULL,
            created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
            PRIMARY KEY (feed_id, field_name, field_hash)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS article_comparison_names (
            feed_id TEXT NOT NULL,
            field_name TEXT NOT NULL,
            created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
            PRIMARY KEY (feed_id, field_name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS delivery_records (
            id TEXT PRIMARY KEY,
            feed_id TEXT NOT NULL,
            medium_id TEXT NOT NULL,
            created_at TIMESTAMP WITH TIME ZONE NOT NULL,
            status TEXT NOT NULL,
            parent_id TEXT,
            internal_message TEXT,
            error_code TEXT,
            external_detail TEXT,
            article_id TEXT,
            article_id_hash TEXT,
            article_title TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS delivery_records_feed_created ON delivery_records (feed_id, created_at DESC)",
    )
    .execute(pool)
    .await?;

    info!("Delivery pipeline schema is ready");
    Ok(())
}

pub struct PgArticleFieldStore {
    pool: PgPool,
    hot_partition_age: Duration,
}

impl PgArticleFieldStore {
    pub fn new(pool: PgPool, hot_partition_age: Duration) -> Self {
        Self { pool, hot_partition_age }
    }
}

#[async_trait]
impl ArticleFieldStore for PgArticleFieldStore {
    fn start_context(&self) -> Box<dyn ArticleFieldContext> {
        Box::new(PgArticleFieldContext {
            pool: self.pool.clone(),
            pending_rows: Vec::new(),
            pending_names: Vec::new(),
        })
    }

    async fn has_prior_articles_stored(&self, feed_id: &str) -> StoreResult<bool> {
        let row = sqlx::query(
            "SELECT EXISTS (SELECT 1 FROM article_field_values WHERE feed_id = $1 AND field_name = $2) AS found",
        )
        .bind(feed_id)
        .bind(ID_FIELD)
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::backend)?;
        Ok(row.get::<bool, _>("found"))
    }

    async fn find_stored_article_ids(
        &self,
        feed_id: &str,
        id_hashes: &[String],
        partition: Partition,
    ) -> StoreResult<HashSet<String>> {
        if id_hashes.is_empty() {
            return Ok(HashSet::new());
        }

        let cutoff = Utc::now() - self.hot_partition_age;
        let sql = match partition {
            Partition::Hot => {
                "SELECT field_hash FROM article_field_values \
                 WHERE feed_id = $1 AND field_name = $2 AND field_hash = ANY($3) AND created_at >= $4"
            }
            Partition::Cold => {
                "SELECT field_hash FROM article_field_values \
                 WHERE feed_id = $1 AND field_name = $2 AND field_hash = ANY($3) AND created_at < $4"
            }
        };

        let rows = sqlx::query(sql)
            .bind(feed_id)
            .bind(ID_FIELD)
            .bind(id_hashes.to_vec())
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::backend)?;

        Ok(rows.into_iter().map(|row| row.get("field_hash")).collect())
    }

    async fn some_fields_exist(&self, feed_id: &str, fields: &[(String, String)]) -> StoreResult<bool> {
        if fields.is_empty() {
            return Ok(false);
        }
        let names: Vec<String> = fields.iter().map(|(name, _)| name.clone()).collect();
        let hashes: Vec<String> = fields.iter().map(|(_, hash)| hash.clone()).collect();

        let row = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM article_field_values v
                JOIN UNNEST($2::text[], $3::text[]) AS f(field_name, field_hash)
                  ON v.field_name = f.field_name AND v.field_hash = f.field_hash
                WHERE v.feed_id = $1
            ) AS found
            "#,
        )
        .bind(feed_id)
        .bind(names)
        .bind(hashes)
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::backend)?;
        Ok(row.get::<bool, _>("found"))
    }

    async fn get_stored_comparison_names(&self, feed_id: &str) -> StoreResult<HashSet<String>> {
        let rows = sqlx::query("SELECT field_name FROM article_comparison_names WHERE feed_id = $1")
            .bind(feed_id)
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        Ok(rows.into_iter().map(|row| row.get("field_name")).collect())
    }

    async fn clear(&self, feed_id: &str) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(StoreError::backend)?;
        sqlx::query("DELETE FROM article_field_values WHERE feed_id = $1")
            .bind(feed_id)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::backend)?;
        sqlx::query("DELETE FROM article_comparison_names WHERE feed_id = $1")
            .bind(feed_id)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::backend)?;
        tx.commit().await.map_err(StoreError::backend)?;
        Ok(())
    }
}

pub struct PgArticleFieldContext {
    pool: PgPool,
    pending_rows: Vec<FieldRow>,
    pending_names: Vec<(String, String)>,
}

#[async_trait]
impl ArticleFieldContext for PgArticleFieldContext {
    async fn store_articles(&mut self, feed_id: &str, articles: &[Article], field_names: &[String]) -> StoreResult<()> {
        self.pending_rows.extend(field_rows(feed_id, articles, field_names, true));
        Ok(())
    }

    async fn store_article_fields(
        &mut self,
        feed_id: &str,
        articles: &[Article],
        field_names: &[String],
    ) -> StoreResult<()> {
        self.pending_rows.extend(field_rows(feed_id, articles, field_names, false));
        Ok(())
    }

    async fn store_comparison_names(&mut self, feed_id: &str, names: &[String]) -> StoreResult<()> {
        self.pending_names
            .extend(names.iter().map(|name| (feed_id.to_string(), name.clone())));
        Ok(())
    }

    async fn flush_pending_inserts(&mut self) -> StoreResult<u64> {
        if self.pending_rows.is_empty() && self.pending_names.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await.map_err(StoreError::backend)?;
        let mut affected = 0;

        for row in &self.pending_rows {
            let result = sqlx::query(
                r#"
                INSERT INTO article_field_values (feed_id, field_name, field_hash, created_at)
                VALUES ($1, $2, $3, NOW())
                ON CONFLICT (feed_id, field_name, field_hash)
                DO UPDATE SET created_at = NOW()
                "#,
            )
            .bind(&row.feed_id)
            .bind(&row.field_name)
            .bind(&row.value_hash)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::backend)?;
            affected += result.rows_affected();
        }

        for (feed_id, name) in &self.pending_names {
            let result = sqlx::query(
                r#"
                INSERT INTO article_comparison_names (feed_id, field_name)
                VALUES ($1, $2)
                ON CONFLICT (feed_id, field_name) DO NOTHING
                "#,
            )
            .bind(feed_id)
            .bind(name)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::backend)?;
            affected += result.rows_affected();
        }

        tx.commit().await.map_err(StoreError::backend)?;
        self.pending_rows.clear();
        self.pending_names.clear();

        debug!("Flushed {} article field rows", affected);
        Ok(affected)
    }
}

pub struct PgDeliveryRecordStore {
    pool: PgPool,
}

impl PgDeliveryRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn record_from_row(row: &PgRow) -> StoreResult<DeliveryRecord> {
    let status: String = row.get("status");
    let status = DeliveryStatus::parse(&status)
        .ok_or_else(|| StoreError::General(format!("Unknown delivery status {}", status)))?;
    let error_code: Option<String> = row.get("error_code");

    Ok(DeliveryRecord {
        id: row.get("id"),
        feed_id: row.get("feed_id"),
        medium_id: row.get("medium_id"),
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
        status,
        parent_id: row.get("parent_id"),
        internal_message: row.get("internal_message"),
        error_code: error_code.as_deref().and_then(DeliveryErrorCode::parse),
        external_detail: row.get("external_detail"),
        article_id: row.get("article_id"),
        article_id_hash: row.get("article_id_hash"),
        article_title: row.get("article_title"),
    })
}

#[async_trait]
impl DeliveryRecordStore for PgDeliveryRecordStore {
    fn start_context(&self) -> Box<dyn DeliveryRecordContext> {
        Box::new(PgDeliveryRecordContext { pool: self.pool.clone(), pending: Vec::new() })
    }

    async fn update_delivery_status(&self, id: &str, update: DeliveryStatusUpdate) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE delivery_records
            SET status = $2, error_code = $3, internal_message = $4, external_detail = $5
            WHERE id = $1 AND status = $6
            "#,
        )
        .bind(id)
        .bind(update.status.as_str())
        .bind(update.error_code.map(|code| code.as_str()))
        .bind(update.internal_message)
        .bind(update.external_detail)
        .bind(DeliveryStatus::PendingDelivery.as_str())
        .execute(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        let existing = sqlx::query("SELECT status FROM delivery_records WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::backend)?;

        match existing {
            None => Err(StoreError::RecordNotFound { id: id.to_string() }),
            Some(row) => {
                let status: String = row.get("status");
                Err(StoreError::InvalidStatusTransition {
                    id: id.to_string(),
                    status: DeliveryStatus::parse(&status).unwrap_or(DeliveryStatus::Failed),
                })
            }
        }
    }

    async fn count_deliveries_in_past_timeframe(
        &self,
        filter: &DeliveryCountFilter,
        seconds: u64,
    ) -> StoreResult<u64> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS count FROM delivery_records
            WHERE created_at >= $1
              AND parent_id IS NULL
              AND status = ANY($2)
              AND ($3::text IS NULL OR feed_id = $3)
              AND ($4::text IS NULL OR medium_id = $4)
            "#,
        )
        .bind(window_start(seconds))
        .bind(vec![
            DeliveryStatus::Sent.as_str().to_string(),
            DeliveryStatus::PendingDelivery.as_str().to_string(),
        ])
        .bind(filter.feed_id.as_deref())
        .bind(filter.medium_id.as_deref())
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        Ok(row.get::<i64, _>("count").max(0) as u64)
    }

    async fn get_delivery_logs(&self, query: &DeliveryLogQuery) -> StoreResult<Vec<DeliveryLog>> {
        let parent_rows = sqlx::query(
            r#"
            SELECT * FROM delivery_records
            WHERE feed_id = $1 AND parent_id IS NULL
            ORDER BY created_at DESC
            OFFSET $2 LIMIT $3
            "#,
        )
        .bind(&query.feed_id)
        .bind(query.skip as i64)
        .bind(query.limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        let parents = parent_rows.iter().map(record_from_row).collect::<StoreResult<Vec<_>>>()?;
        if parents.is_empty() {
            return Ok(Vec::new());
        }

        let parent_ids: Vec<String> = parents.iter().map(|parent| parent.id.clone()).collect();
        let child_rows = sqlx::query("SELECT * FROM delivery_records WHERE parent_id = ANY($1)")
            .bind(parent_ids)
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        let children = child_rows.iter().map(record_from_row).collect::<StoreResult<Vec<_>>>()?;

        Ok(parents
            .iter()
            .map(|parent| {
                let own: Vec<&DeliveryRecord> = children
                    .iter()
                    .filter(|child| child.parent_id.as_deref() == Some(parent.id.as_str()))
                    .collect();
                DeliveryLog::summarize(parent, &own)
            })
            .collect())
    }
}

pub struct PgDeliveryRecordContext {
    pool: PgPool,
    pending: Vec<DeliveryRecord>,
}

#[async_trait]
impl DeliveryRecordContext for PgDeliveryRecordContext {
    async fn store(
        &mut self,
        feed_id: &str,
        states: &[ArticleDeliveryState],
        flush: bool,
    ) -> StoreResult<Option<u64>> {
        let now = Utc::now();
        self.pending
            .extend(states.iter().map(|state| DeliveryRecord::from_state(feed_id, state, now)));

        if flush {
            return self.flush_pending_inserts().await.map(Some);
        }
        Ok(None)
    }

    async fn flush_pending_inserts(&mut self) -> StoreResult<u64> {
        if self.pending.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await.map_err(StoreError::backend)?;
        let mut affected = 0;

        for record in &self.pending {
            let result = sqlx::query(
                r#"
                INSERT INTO delivery_records (
                    id, feed_id, medium_id, created_at, status, parent_id, internal_message,
                    error_code, external_detail, article_id, article_id_hash, article_title
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                "#,
            )
            .bind(&record.id)
            .bind(&record.feed_id)
            .bind(&record.medium_id)
            .bind(record.created_at)
            .bind(record.status.as_str())
            .bind(&record.parent_id)
            .bind(&record.internal_message)
            .bind(record.error_code.map(|code| code.as_str()))
            .bind(&record.external_detail)
            .bind(&record.article_id)
            .bind(&record.article_id_hash)
            .bind(&record.article_title)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::backend)?;
            affected += result.rows_affected();
        }

        tx.commit().await.map_err(StoreError::backend)?;
        self.pending.clear();

        debug!("Flushed {} delivery records", affected);
        Ok(affected)
    }
}
