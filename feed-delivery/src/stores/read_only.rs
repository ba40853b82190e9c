//! Decorators that keep reads real and drop every write.

use async_trait::async_trait;
use interfaces::{
    ArticleDeliveryState, ArticleFieldContext, ArticleFieldStore, DeliveryCountFilter, DeliveryLog,
    DeliveryLogQuery, DeliveryRecordContext, DeliveryRecordStore, DeliveryStatusUpdate, Partition,
    StoreResult,
};
use std::collections::HashSet;

use crate::types::Article;

pub struct ReadOnlyArticleFieldStore<'a> {
    inner: &'a dyn ArticleFieldStore,
}

impl<'a> ReadOnlyArticleFieldStore<'a> {
    pub fn new(inner: &'a dyn ArticleFieldStore) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<'a> ArticleFieldStore for ReadOnlyArticleFieldStore<'a> {
    fn start_context(&self) -> Box<dyn ArticleFieldContext> {
        Box::new(DiscardingArticleFieldContext)
    }

    async fn has_prior_articles_stored(&self, feed_id: &str) -> StoreResult<bool> {
        self.inner.has_prior_articles_stored(feed_id).await
    }

    async fn find_stored_article_ids(
        &self,
        feed_id: &str,
        id_hashes: &[String],
        partition: Partition,
    ) -> StoreResult<HashSet<String>> {
        self.inner.find_stored_article_ids(feed_id, id_hashes, partition).await
    }

    async fn some_fields_exist(&self, feed_id: &str, fields: &[(String, String)]) -> StoreResult<bool> {
        self.inner.some_fields_exist(feed_id, fields).await
    }

    async fn get_stored_comparison_names(&self, feed_id: &str) -> StoreResult<HashSet<String>> {
        self.inner.get_stored_comparison_names(feed_id).await
    }

    async fn clear(&self, _feed_id: &str) -> StoreResult<()> {
        Ok(())
    }
}

/// Batch scope whose buffered writes go nowhere.
pub struct DiscardingArticleFieldContext;

#[async_trait]
impl ArticleFieldContext for DiscardingArticleFieldContext {
    async fn store_articles(&mut self, _feed_id: &str, _articles: &[Article], _field_names: &[String]) -> StoreResult<()> {
        Ok(())
    }

    async fn store_article_fields(
        &mut self,
        _feed_id: &str,
        _articles: &[Article],
        _field_names: &[String],
    ) -> StoreResult<()> {
        Ok(())
    }

    async fn store_comparison_names(&mut self, _feed_id: &str, _names: &[String]) -> StoreResult<()> {
        Ok(())
    }

    async fn flush_pending_inserts(&mut self) -> StoreResult<u64> {
        Ok(0)
    }
}

pub struct ReadOnlyDeliveryRecordStore<'a> {
    inner: &'a dyn DeliveryRecordStore,
}

impl<'a> ReadOnlyDeliveryRecordStore<'a> {
    pub fn new(inner: &'a dyn DeliveryRecordStore) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<'a> DeliveryRecordStore for ReadOnlyDeliveryRecordStore<'a> {
    fn start_context(&self) -> Box<dyn DeliveryRecordContext> {
        Box::new(DiscardingDeliveryRecordContext)
    }

    async fn update_delivery_status(&self, _id: &str, _update: DeliveryStatusUpdate) -> StoreResult<()> {
        Ok(())
    }

    async fn count_deliveries_in_past_timeframe(
        &self,
        filter: &DeliveryCountFilter,
        seconds: u64,
    ) -> StoreResult<u64> {
        self.inner.count_deliveries_in_past_timeframe(filter, seconds).await
    }

    async fn get_delivery_logs(&self, query: &DeliveryLogQuery) -> StoreResult<Vec<DeliveryLog>> {
        self.inner.get_delivery_logs(query).await
    }
}

pub struct DiscardingDeliveryRecordContext;

#[async_trait]
impl DeliveryRecordContext for DiscardingDeliveryRecordContext {
    async fn store(
        &mut self,
        _feed_id: &str,
        _states: &[ArticleDeliveryState],
        flush: bool,
    ) -> StoreResult<Option<u64>> {
        Ok(flush.then_some(0))
    }

    async fn flush_pending_inserts(&mut self) -> StoreResult<u64> {
        Ok(0)
    }
}
