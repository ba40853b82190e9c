use crate::defs::Article;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Identifies which delivery record a dispatched job belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryJobMeta {
    pub delivery_id: String,
    pub feed_id: String,
    pub medium_id: String,
    pub article_id: String,
    pub article_id_hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchJob {
    pub route: String,
    pub payload: Value,
    pub meta: DeliveryJobMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ChannelResponse {
    /// The channel answered synchronously.
    Completed { status: u16, body: Value },
    /// The channel accepted the job and will report the result later.
    Queued,
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("Transport error: {message}")]
pub struct TransportError {
    pub message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

#[async_trait]
pub trait DeliveryChannelClient: Send + Sync {
    /// Splits an article into the payload parts sent for one medium.
    fn build_payloads(&self, article: &Article, medium_details: &Value) -> Vec<Value> {
        vec![serde_json::json!({
            "article": {
                "id": article.id,
                "fields": article.flattened,
            },
            "details": medium_details,
        })]
    }

    async fn dispatch(&self, job: DispatchJob) -> Result<ChannelResponse, TransportError>;
}

/// A channel result reported after the fact for a queued job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryResultReport {
    pub meta: DeliveryJobMeta,
    pub status: Option<u16>,
    #[serde(default)]
    pub body: Value,
    pub transport_error: Option<String>,
}

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Failed to publish to {queue}: {message}")]
    Failed { queue: String, message: String },

    #[error("Failed to serialize event: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, queue: &str, payload: Value) -> Result<(), PublishError>;
}

pub fn is_success_status(status: u16) -> bool {
    (200..300).contains(&status)
}

