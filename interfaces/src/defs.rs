use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::collections::BTreeMap;

/// SHA-1 of a value, rendered as lowercase hex.
///
/// Used both for article id hashes and for stored comparison field values,
/// so the dedup state never holds raw article content.
pub fn hash_value(value: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(value.as_bytes());
    hex::encode(hasher.finalize())
}

/// A parsed feed article. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub id: String,
    pub id_hash: String,
    /// Flattened named fields (title, link, custom comparison fields).
    #[serde(default)]
    pub flattened: BTreeMap<String, String>,
    /// The unflattened record as it came out of the parser.
    #[serde(default)]
    pub raw: BTreeMap<String, String>,
}

impl Article {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            id_hash: hash_value(&id),
            id,
            flattened: BTreeMap::new(),
            raw: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.flattened.insert(name.into(), value.into());
        self
    }

    pub fn with_raw(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.raw.insert(name.into(), value.into());
        self
    }

    /// Looks up a flattened field. `id` and `idHash` resolve to the identifiers.
    pub fn field(&self, name: &str) -> Option<&str> {
        match name {
            "id" => Some(self.id.as_str()),
            "idHash" => Some(self.id_hash.as_str()),
            _ => self.flattened.get(name).map(String::as_str),
        }
    }

    pub fn title(&self) -> Option<&str> {
        self.flattened.get("title").map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeliveryStatus {
    PendingDelivery,
    Sent,
    Failed,
    Rejected,
    FilteredOut,
    RateLimited,
    MediumRateLimitedByUser,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::PendingDelivery => "pending-delivery",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Rejected => "rejected",
            DeliveryStatus::FilteredOut => "filtered-out",
            DeliveryStatus::RateLimited => "rate-limited",
            DeliveryStatus::MediumRateLimitedByUser => "medium-rate-limited-by-user",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        [
            DeliveryStatus::PendingDelivery,
            DeliveryStatus::Sent,
            DeliveryStatus::Failed,
            DeliveryStatus::Rejected,
            DeliveryStatus::FilteredOut,
            DeliveryStatus::RateLimited,
            DeliveryStatus::MediumRateLimitedByUser,
        ]
        .into_iter()
        .find(|status| status.as_str() == value)
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, DeliveryStatus::PendingDelivery)
    }

    /// Statuses that consume rate-limit allowance.
    pub fn counts_as_delivery(&self) -> bool {
        matches!(self, DeliveryStatus::Sent | DeliveryStatus::PendingDelivery)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeliveryErrorCode {
    Internal,
    NoChannelOrWebhook,
    ThirdPartyInternal,
    ThirdPartyBadRequest,
    ThirdPartyForbidden,
    ThirdPartyNotFound,
    ArticleProcessingError,
}

impl DeliveryErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryErrorCode::Internal => "internal",
            DeliveryErrorCode::NoChannelOrWebhook => "no-channel-or-webhook",
            DeliveryErrorCode::ThirdPartyInternal => "third-party-internal",
            DeliveryErrorCode::ThirdPartyBadRequest => "third-party-bad-request",
            DeliveryErrorCode::ThirdPartyForbidden => "third-party-forbidden",
            DeliveryErrorCode::ThirdPartyNotFound => "third-party-not-found",
            DeliveryErrorCode::ArticleProcessingError => "article-processing-error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        [
            DeliveryErrorCode::Internal,
            DeliveryErrorCode::NoChannelOrWebhook,
            DeliveryErrorCode::ThirdPartyInternal,
            DeliveryErrorCode::ThirdPartyBadRequest,
            DeliveryErrorCode::ThirdPartyForbidden,
            DeliveryErrorCode::ThirdPartyNotFound,
            DeliveryErrorCode::ArticleProcessingError,
        ]
        .into_iter()
        .find(|code| code.as_str() == value)
    }
}

/// Outcome of one delivery attempt for an (article, medium) pair, as produced
/// by the orchestrator and handed to the delivery record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleDeliveryState {
    pub id: String,
    pub medium_id: String,
    pub article_id: String,
    pub article_id_hash: String,
    pub article_title: Option<String>,
    pub status: DeliveryStatus,
    pub error_code: Option<DeliveryErrorCode>,
    pub internal_message: Option<String>,
    pub external_detail: Option<String>,
    pub parent_id: Option<String>,
}

impl ArticleDeliveryState {
    pub fn new(id: impl Into<String>, medium_id: &str, article: &Article, status: DeliveryStatus) -> Self {
        Self {
            id: id.into(),
            medium_id: medium_id.to_string(),
            article_id: article.id.clone(),
            article_id_hash: article.id_hash.clone(),
            article_title: article.title().map(str::to_string),
            status,
            error_code: None,
            internal_message: None,
            external_detail: None,
            parent_id: None,
        }
    }

    pub fn with_error(mut self, code: DeliveryErrorCode, message: impl Into<String>) -> Self {
        self.error_code = Some(code);
        self.internal_message = Some(message.into());
        self
    }

    pub fn with_external_detail(mut self, detail: impl Into<String>) -> Self {
        self.external_detail = Some(detail.into());
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }
}

/// A persisted delivery attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryRecord {
    pub id: String,
    pub feed_id: String,
    pub medium_id: String,
    pub created_at: DateTime<Utc>,
    pub status: DeliveryStatus,
    pub parent_id: Option<String>,
    pub internal_message: Option<String>,
    pub error_code: Option<DeliveryErrorCode>,
    pub external_detail: Option<String>,
    pub article_id: Option<String>,
    pub article_id_hash: Option<String>,
    pub article_title: Option<String>,
}

impl DeliveryRecord {
    pub fn from_state(feed_id: &str, state: &ArticleDeliveryState, created_at: DateTime<Utc>) -> Self {
        Self {
            id: state.id.clone(),
            feed_id: feed_id.to_string(),
            medium_id: state.medium_id.clone(),
            created_at,
            status: state.status,
            parent_id: state.parent_id.clone(),
            internal_message: state.internal_message.clone(),
            error_code: state.error_code,
            external_detail: state.external_detail.clone(),
            article_id: Some(state.article_id.clone()),
            article_id_hash: Some(state.article_id_hash.clone()),
            article_title: state.article_title.clone(),
        }
    }
}

/// Terminal details applied to a pending record once the channel reports back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryStatusUpdate {
    pub status: DeliveryStatus,
    pub error_code: Option<DeliveryErrorCode>,
    pub internal_message: Option<String>,
    pub external_detail: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryCountFilter {
    pub feed_id: Option<String>,
    pub medium_id: Option<String>,
}

impl DeliveryCountFilter {
    pub fn feed(feed_id: &str) -> Self {
        Self { feed_id: Some(feed_id.to_string()), medium_id: None }
    }

    pub fn medium(medium_id: &str) -> Self {
        Self { feed_id: None, medium_id: Some(medium_id.to_string()) }
    }

    pub fn matches(&self, record: &DeliveryRecord) -> bool {
        self.feed_id.as_deref().map_or(true, |id| id == record.feed_id)
            && self.medium_id.as_deref().map_or(true, |id| id == record.medium_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryLogQuery {
    pub feed_id: String,
    #[serde(default)]
    pub skip: usize,
    pub limit: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryLogStatus {
    Delivered,
    PartiallyDelivered,
    Rejected,
    Failed,
    PendingDelivery,
    ArticleRateLimited,
    MediumRateLimited,
    FilteredOut,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryLog {
    pub id: String,
    pub medium_id: String,
    pub created_at: DateTime<Utc>,
    pub article_id_hash: Option<String>,
    pub article_title: Option<String>,
    pub status: DeliveryLogStatus,
    pub message: Option<String>,
}

impl DeliveryLog {
    /// Summarises a parent record together with its child parts.
    pub fn summarize(parent: &DeliveryRecord, children: &[&DeliveryRecord]) -> Self {
        let (status, message) = match parent.status {
            DeliveryStatus::Sent if children.iter().any(|c| c.status != DeliveryStatus::Sent) => (
                DeliveryLogStatus::PartiallyDelivered,
                Some("Some parts of this article failed to deliver".to_string()),
            ),
            DeliveryStatus::Sent => (DeliveryLogStatus::Delivered, None),
            DeliveryStatus::Rejected => (DeliveryLogStatus::Rejected, Some(rejection_message(parent.error_code))),
            DeliveryStatus::Failed => (DeliveryLogStatus::Failed, parent.internal_message.clone()),
            DeliveryStatus::PendingDelivery => (DeliveryLogStatus::PendingDelivery, None),
            DeliveryStatus::RateLimited => (DeliveryLogStatus::ArticleRateLimited, None),
            DeliveryStatus::MediumRateLimitedByUser => (DeliveryLogStatus::MediumRateLimited, None),
            DeliveryStatus::FilteredOut => (DeliveryLogStatus::FilteredOut, parent.external_detail.clone()),
        };

        Self {
            id: parent.id.clone(),
            medium_id: parent.medium_id.clone(),
            created_at: parent.created_at,
            article_id_hash: parent.article_id_hash.clone(),
            article_title: parent.article_title.clone(),
            status,
            message,
        }
    }
}

fn rejection_message(code: Option<DeliveryErrorCode>) -> String {
    match code {
        Some(DeliveryErrorCode::ThirdPartyBadRequest) => {
            "The destination rejected the message as malformed".to_string()
        }
        Some(DeliveryErrorCode::ThirdPartyForbidden) => {
            "Missing permissions to send to the destination".to_string()
        }
        Some(DeliveryErrorCode::ThirdPartyNotFound) => "The destination no longer exists".to_string(),
        _ => "The message was rejected".to_string(),
    }
}
