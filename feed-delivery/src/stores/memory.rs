use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use interfaces::{
    ArticleDeliveryState, ArticleFieldContext, ArticleFieldStore, DeliveryCountFilter, DeliveryLog,
    DeliveryLogQuery, DeliveryRecord, DeliveryRecordContext, DeliveryRecordStore, DeliveryStatusUpdate,
    Partition, StoreError, StoreResult,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::stores::{field_rows, window_start, FieldRow, ID_FIELD};
use crate::types::Article;

#[derive(Default)]
struct FieldState {
    /// (feed id, field name, value hash) -> last written.
    values: HashMap<(String, String, String), DateTime<Utc>>,
    comparison_names: HashMap<String, HashSet<String>>,
}

/// Dedup state held in process memory.
#[derive(Clone)]
pub struct InMemoryArticleFieldStore {
    state: Arc<RwLock<FieldState>>,
    hot_partition_age: Duration,
}

impl Default for InMemoryArticleFieldStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryArticleFieldStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(FieldState::default())),
            hot_partition_age: Duration::days(30),
        }
    }

    pub fn with_hot_partition_age(mut self, age: Duration) -> Self {
        self.hot_partition_age = age;
        self
    }

    /// Writes an article's rows immediately with an explicit timestamp.
    pub async fn insert_at(
        &self,
        feed_id: &str,
        article: &Article,
        field_names: &[String],
        written_at: DateTime<Utc>,
    ) {
        let mut state = self.state.write().await;
        for row in field_rows(feed_id, std::slice::from_ref(article), field_names, true) {
            state.values.insert((row.feed_id, row.field_name, row.value_hash), written_at);
        }
    }

    pub async fn stored_value_count(&self, feed_id: &str) -> usize {
        let state = self.state.read().await;
        state.values.keys().filter(|(feed, _, _)| feed == feed_id).count()
    }
}

#[async_trait]
impl ArticleFieldStore for InMemoryArticleFieldStore {
    fn start_context(&self) -> Box<dyn ArticleFieldContext> {
        Box::new(InMemoryArticleFieldContext {
            state: self.state.clone(),
            pending_rows: Vec::new(),
            pending_names: Vec::new(),
        })
    }

    async fn has_prior_articles_stored(&self, feed_id: &str) -> StoreResult<bool> {
        let state = self.state.read().await;
        Ok(state
            .values
            .keys()
            .any(|(feed, field, _)| feed == feed_id && field == ID_FIELD))
    }

    async fn find_stored_article_ids(
        &self,
        feed_id: &str,
        id_hashes: &[String],
        partition: Partition,
    ) -> StoreResult<HashSet<String>> {
        let cutoff = Utc::now() - self.hot_partition_age;
        let state = self.state.read().await;
        let found = id_hashes
            .iter()
            .filter(|hash| {
                let key = (feed_id.to_string(), ID_FIELD.to_string(), (*hash).clone());
                match (state.values.get(&key), partition) {
                    (Some(written), Partition::Hot) => *written >= cutoff,
                    (Some(written), Partition::Cold) => *written < cutoff,
                    (None, _) => false,
                }
            })
            .cloned()
            .collect();
        Ok(found)
    }

    async fn some_fields_exist(&self, feed_id: &str, fields: &[(String, String)]) -> StoreResult<bool> {
        let state = self.state.read().await;
        Ok(fields.iter().any(|(name, hash)| {
            state
                .values
                .contains_key(&(feed_id.to_string(), name.clone(), hash.clone()))
        }))
    }

    async fn get_stored_comparison_names(&self, feed_id: &str) -> StoreResult<HashSet<String>> {
        let state = self.state.read().await;
        Ok(state.comparison_names.get(feed_id).cloned().unwrap_or_default())
    }

    async fn clear(&self, feed_id: &str) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state.values.retain(|(feed, _, _), _| feed != feed_id);
        state.comparison_names.remove(feed_id);
        debug!("Cleared dedup state for feed {}", feed_id);
        Ok(())
    }
}

pub struct InMemoryArticleFieldContext {
    state: Arc<RwLock<FieldState>>,
    pending_rows: Vec<FieldRow>,
    pending_names: Vec<(String, String)>,
}

#[async_trait]
impl ArticleFieldContext for InMemoryArticleFieldContext {
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
        let now = Utc::now();
        let mut state = self.state.write().await;
        let written = (self.pending_rows.len() + self.pending_names.len()) as u64;

        for row in self.pending_rows.drain(..) {
            state.values.insert((row.feed_id, row.field_name, row.value_hash), now);
        }
        for (feed_id, name) in self.pending_names.drain(..) {
            state.comparison_names.entry(feed_id).or_default().insert(name);
        }
        Ok(written)
    }
}

/// Delivery records held in process memory, in insertion order.
#[derive(Clone, Default)]
pub struct InMemoryDeliveryRecordStore {
    records: Arc<RwLock<Vec<DeliveryRecord>>>,
}

impl InMemoryDeliveryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes a record immediately, bypassing batching.
    pub async fn insert_record(&self, record: DeliveryRecord) {
        self.records.write().await.push(record);
    }

    pub async fn records(&self) -> Vec<DeliveryRecord> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl DeliveryRecordStore for InMemoryDeliveryRecordStore {
    fn start_context(&self) -> Box<dyn DeliveryRecordContext> {
        Box::new(InMemoryDeliveryRecordContext {
            records: self.records.clone(),
            pending: Vec::new(),
        })
    }

    async fn update_delivery_status(&self, id: &str, update: DeliveryStatusUpdate) -> StoreResult<()> {
        let mut records = self.records.write().await;
        let record = records
            .iter_mut()
            .find(|record| record.id == id)
            .ok_or_else(|| StoreError::RecordNotFound { id: id.to_string() })?;

        if record.status.is_terminal() {
            return Err(StoreError::InvalidStatusTransition {
                id: id.to_string(),
                status: record.status,
            });
        }

        record.status = update.status;
        record.error_code = update.error_code;
        record.internal_message = update.internal_message;
        record.external_detail = update.external_detail;
        Ok(())
    }

    async fn count_deliveries_in_past_timeframe(
        &self,
        filter: &DeliveryCountFilter,
        seconds: u64,
    ) -> StoreResult<u64> {
        let since = window_start(seconds);
        let records = self.records.read().await;
        let count = records
            .iter()
            .filter(|record| {
                record.parent_id.is_none()
                    && record.status.counts_as_delivery()
                    && record.created_at >= since
                    && filter.matches(record)
            })
            .count();
        Ok(count as u64)
    }

    async fn get_delivery_logs(&self, query: &DeliveryLogQuery) -> StoreResult<Vec<DeliveryLog>> {
        let records = self.records.read().await;
        let mut parents: Vec<&DeliveryRecord> = records
            .iter()
            .filter(|record| record.feed_id == query.feed_id && record.parent_id.is_none())
            .collect();
        parents.reverse();
        parents.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let logs = parents
            .into_iter()
            .skip(query.skip)
            .take(query.limit)
            .map(|parent| {
                let children: Vec<&DeliveryRecord> = records
                    .iter()
                    .filter(|record| record.parent_id.as_deref() == Some(parent.id.as_str()))
                    .collect();
                DeliveryLog::summarize(parent, &children)
            })
            .collect();
        Ok(logs)
    }
}

pub struct InMemoryDeliveryRecordContext {
    records: Arc<RwLock<Vec<DeliveryRecord>>>,
    pending: Vec<DeliveryRecord>,
}

#[async_trait]
impl DeliveryRecordContext for InMemoryDeliveryRecordContext {
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
        let written = self.pending.len() as u64;
        if written > 0 {
            self.records.write().await.append(&mut self.pending);
        }
        Ok(written)
    }
}
