use crate::defs::{
    Article, ArticleDeliveryState, DeliveryCountFilter, DeliveryLog, DeliveryLogQuery, DeliveryStatus,
    DeliveryStatusUpdate,
};
use async_trait::async_trait;
use std::collections::HashSet;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Delivery record not found: {id}")]
    RecordNotFound { id: String },

    #[error("Delivery record {id} already has terminal status {status:?}")]
    InvalidStatusTransition { id: String, status: DeliveryStatus },

    #[error("Store error: {0}")]
    General(String),
}

impl StoreError {
    pub fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        StoreError::Backend(Box::new(err))
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Which dedup storage tier a lookup targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partition {
    /// Rows refreshed within the hot window.
    Hot,
    /// Everything older than the hot window.
    Cold,
}

/// Dedup state for feeds: hashed field values per (feed, field name).
#[async_trait]
pub trait ArticleFieldStore: Send + Sync {
    /// Opens a batch scope. Writes are buffered until `flush_pending_inserts`.
    fn start_context(&self) -> Box<dyn ArticleFieldContext>;

    async fn has_prior_articles_stored(&self, feed_id: &str) -> StoreResult<bool>;

    /// Returns the subset of `id_hashes` whose ids are stored in `partition`.
    async fn find_stored_article_ids(
        &self,
        feed_id: &str,
        id_hashes: &[String],
        partition: Partition,
    ) -> StoreResult<HashSet<String>>;

    /// True if any of the `(field name, value hash)` pairs is stored for the feed.
    async fn some_fields_exist(&self, feed_id: &str, fields: &[(String, String)]) -> StoreResult<bool>;

    async fn get_stored_comparison_names(&self, feed_id: &str) -> StoreResult<HashSet<String>>;

    async fn clear(&self, feed_id: &str) -> StoreResult<()>;
}

#[async_trait]
pub trait ArticleFieldContext: Send {
    /// Buffers the article ids plus the values of `field_names`.
    async fn store_articles(
        &mut self,
        feed_id: &str,
        articles: &[Article],
        field_names: &[String],
    ) -> StoreResult<()>;

    /// Buffers only the values of `field_names`, leaving ids untouched.
    async fn store_article_fields(
        &mut self,
        feed_id: &str,
        articles: &[Article],
        field_names: &[String],
    ) -> StoreResult<()>;

    async fn store_comparison_names(&mut self, feed_id: &str, names: &[String]) -> StoreResult<()>;

    /// Writes every buffered row and returns how many were written.
    async fn flush_pending_inserts(&mut self) -> StoreResult<u64>;
}

#[async_trait]
pub trait DeliveryRecordStore: Send + Sync {
    fn start_context(&self) -> Box<dyn DeliveryRecordContext>;

    /// Applies terminal details to a pending record.
    async fn update_delivery_status(&self, id: &str, update: DeliveryStatusUpdate) -> StoreResult<()>;

    async fn count_deliveries_in_past_timeframe(
        &self,
        filter: &DeliveryCountFilter,
        seconds: u64,
    ) -> StoreResult<u64>;

    async fn get_delivery_logs(&self, query: &DeliveryLogQuery) -> StoreResult<Vec<DeliveryLog>>;
}

#[async_trait]
pub trait DeliveryRecordContext: Send {
    /// Buffers the states. With `flush` set, writes them out and returns the row count.
    async fn store(
        &mut self,
        feed_id: &str,
        states: &[ArticleDeliveryState],
        flush: bool,
    ) -> StoreResult<Option<u64>>;

    async fn flush_pending_inserts(&mut self) -> StoreResult<u64>;
}
