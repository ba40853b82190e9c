// Shared fakes and builders for the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use feed_delivery::{Article, ArticleDeliveryState, DeliveryRecord, DeliveryStatus};
use interfaces::{ChannelResponse, DeliveryChannelClient, DispatchJob, EventPublisher, PublishError, TransportError};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

pub const FEED_ID: &str = "feed-1";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .try_init();
}

pub fn article(id: &str, title: &str) -> Article {
    Article::new(id).with_field("title", title)
}

/// A record written `age_seconds` ago.
pub fn sent_record(feed_id: &str, medium_id: &str, index: usize, age_seconds: i64) -> DeliveryRecord {
    let article = Article::new(format!("prior-{}", index));
    let state = ArticleDeliveryState::new(format!("record-{}-{}", medium_id, index), medium_id, &article, DeliveryStatus::Sent);
    DeliveryRecord::from_state(feed_id, &state, chrono::Utc::now() - chrono::Duration::seconds(age_seconds))
}

/// Channel client that answers from a script and remembers every job.
#[derive(Clone, Default)]
pub struct ScriptedChannelClient {
    responses: Arc<Mutex<VecDeque<Result<ChannelResponse, TransportError>>>>,
    jobs: Arc<Mutex<Vec<DispatchJob>>>,
    parts: usize,
}

impl ScriptedChannelClient {
    pub fn new() -> Self {
        Self { parts: 1, ..Default::default() }
    }

    /// Splits every article into `parts` payloads.
    pub fn with_parts(mut self, parts: usize) -> Self {
        self.parts = parts;
        self
    }

    pub async fn push(&self, response: Result<ChannelResponse, TransportError>) {
        self.responses.lock().await.push_back(response);
    }

    pub async fn push_status(&self, status: u16, body: Value) {
        self.push(Ok(ChannelResponse::Completed { status, body })).await;
    }

    pub async fn jobs(&self) -> Vec<DispatchJob> {
        self.jobs.lock().await.clone()
    }
}

#[async_trait]
impl DeliveryChannelClient for ScriptedChannelClient {
    fn build_payloads(&self, article: &Article, _medium_details: &Value) -> Vec<Value> {
        (0..self.parts)
            .map(|part| json!({ "articleId": article.id, "part": part }))
            .collect()
    }

    async fn dispatch(&self, job: DispatchJob) -> Result<ChannelResponse, TransportError> {
        self.jobs.lock().await.push(job);
        self.responses
            .lock()
            .await
            .pop_front()
            .unwrap_or(Ok(ChannelResponse::Completed { status: 200, body: Value::Null }))
    }
}

#[derive(Clone, Default)]
pub struct RecordingPublisher {
    events: Arc<Mutex<Vec<(String, Value)>>>,
}

impl RecordingPublisher {
    pub async fn events(&self) -> Vec<(String, Value)> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, queue: &str, payload: Value) -> Result<(), PublishError> {
        self.events.lock().await.push((queue.to_string(), payload));
        Ok(())
    }
}
