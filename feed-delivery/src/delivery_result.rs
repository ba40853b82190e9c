use interfaces::{
    channel::is_success_status, DeliveryJobMeta, DeliveryRecordStore, DeliveryResultReport,
    DeliveryStatusUpdate, EventPublisher, TransportError,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config::{REJECTED_ARTICLE_QUEUE, REMEDIATION_BODY_MAX_LEN};
use crate::types::{DeliveryErrorCode, DeliveryStatus};
use crate::utils::truncate;

/// Event asking downstream services to act on a rejected delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RemediationEvent {
    #[serde(rename_all = "camelCase")]
    BadFormat {
        feed_id: String,
        medium_id: String,
        article_id: String,
        response_body: String,
    },
    #[serde(rename_all = "camelCase")]
    MissingPermissions {
        feed_id: String,
        medium_id: String,
        article_id: String,
    },
    #[serde(rename_all = "camelCase")]
    DestinationNotFound {
        feed_id: String,
        medium_id: String,
        article_id: String,
    },
}

impl RemediationEvent {
    pub fn rejected_code(&self) -> &'static str {
        match self {
            RemediationEvent::BadFormat { .. } => "bad-request",
            RemediationEvent::MissingPermissions { .. } => "forbidden",
            RemediationEvent::DestinationNotFound { .. } => "medium-not-found",
        }
    }

    /// Broker payload for the rejected-article queue.
    pub fn to_payload(&self) -> Value {
        let (feed_id, medium_id, article_id, message) = match self {
            RemediationEvent::BadFormat { feed_id, medium_id, article_id, response_body } => {
                (feed_id, medium_id, article_id, Some(response_body.as_str()))
            }
            RemediationEvent::MissingPermissions { feed_id, medium_id, article_id }
            | RemediationEvent::DestinationNotFound { feed_id, medium_id, article_id } => {
                (feed_id, medium_id, article_id, None)
            }
        };

        json!({
            "data": {
                "rejectedCode": self.rejected_code(),
                "articleId": article_id,
                "rejectedMessage": message,
                "medium": { "id": medium_id },
                "feed": { "id": feed_id },
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedDelivery {
    pub status: DeliveryStatus,
    pub error_code: Option<DeliveryErrorCode>,
    pub internal_message: Option<String>,
    pub external_detail: Option<String>,
    pub remediation: Option<RemediationEvent>,
}

impl ProcessedDelivery {
    fn sent() -> Self {
        Self {
            status: DeliveryStatus::Sent,
            error_code: None,
            internal_message: None,
            external_detail: None,
            remediation: None,
        }
    }

    fn errored(status: DeliveryStatus, code: DeliveryErrorCode, message: String) -> Self {
        Self {
            status,
            error_code: Some(code),
            internal_message: Some(message),
            external_detail: None,
            remediation: None,
        }
    }

    pub fn to_update(&self) -> DeliveryStatusUpdate {
        DeliveryStatusUpdate {
            status: self.status,
            error_code: self.error_code,
            internal_message: self.internal_message.clone(),
            external_detail: self.external_detail.clone(),
        }
    }
}

fn body_text(body: &Value) -> String {
    match body {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Normalizes a channel response into a delivery status.
pub fn process_delivery_result(
    meta: &DeliveryJobMeta,
    response: std::result::Result<(u16, &Value), &TransportError>,
) -> ProcessedDelivery {
    let (status, body) = match response {
        Ok(response) => response,
        Err(err) => {
            return ProcessedDelivery::errored(
                DeliveryStatus::Failed,
                DeliveryErrorCode::Internal,
                err.message.clone(),
            )
        }
    };

    if is_success_status(status) {
        return ProcessedDelivery::sent();
    }

    let feed_id = meta.feed_id.clone();
    let medium_id = meta.medium_id.clone();
    let article_id = meta.article_id.clone();

    match status {
        400 => {
            let response_body = truncate(&body_text(body), REMEDIATION_BODY_MAX_LEN);
            ProcessedDelivery {
                external_detail: Some(response_body.clone()),
                remediation: Some(RemediationEvent::BadFormat {
                    feed_id,
                    medium_id,
                    article_id,
                    response_body,
                }),
                ..ProcessedDelivery::errored(
                    DeliveryStatus::Rejected,
                    DeliveryErrorCode::ThirdPartyBadRequest,
                    "Delivery channel rejected the payload as a bad request".to_string(),
                )
            }
        }
        403 => ProcessedDelivery {
            remediation: Some(RemediationEvent::MissingPermissions { feed_id, medium_id, article_id }),
            ..ProcessedDelivery::errored(
                DeliveryStatus::Rejected,
                DeliveryErrorCode::ThirdPartyForbidden,
                "Missing permissions to deliver to the destination".to_string(),
            )
        },
        404 => ProcessedDelivery {
            remediation: Some(RemediationEvent::DestinationNotFound { feed_id, medium_id, article_id }),
            ..ProcessedDelivery::errored(
                DeliveryStatus::Rejected,
                DeliveryErrorCode::ThirdPartyNotFound,
                "Delivery destination was not found".to_string(),
            )
        },
        500..=599 => ProcessedDelivery::errored(
            DeliveryStatus::Failed,
            DeliveryErrorCode::ThirdPartyInternal,
            format!("Delivery channel internal error (status {})", status),
        ),
        _ => ProcessedDelivery::errored(
            DeliveryStatus::Failed,
            DeliveryErrorCode::Internal,
            format!("Unhandled status code {} received from delivery channel", status),
        ),
    }
}

/// Publishes a remediation event. Failures are logged, never returned.
pub async fn publish_remediation(publisher: &dyn EventPublisher, event: &RemediationEvent) {
    match publisher.publish(REJECTED_ARTICLE_QUEUE, event.to_payload()).await {
        Ok(()) => info!(
            "Published {} remediation event to {}",
            event.rejected_code(),
            REJECTED_ARTICLE_QUEUE
        ),
        Err(e) => warn!("Failed to publish remediation event: {}", e),
    }
}

/// Applies a late channel result to its pending record.
///
/// A failed status update is logged and does not stop the remediation event.
pub async fn handle_delivery_result(
    report: &DeliveryResultReport,
    store: &dyn DeliveryRecordStore,
    publisher: Option<&dyn EventPublisher>,
) -> ProcessedDelivery {
    let transport_error = report.transport_error.as_ref().map(TransportError::new);
    let missing_status = TransportError::new("Delivery result carried no status");
    let response = match (&transport_error, report.status) {
        (Some(err), _) => Err(err),
        (None, Some(status)) => Ok((status, &report.body)),
        (None, None) => Err(&missing_status),
    };

    let processed = process_delivery_result(&report.meta, response);

    if let Err(e) = store
        .update_delivery_status(&report.meta.delivery_id, processed.to_update())
        .await
    {
        warn!(
            "Failed to update delivery {} to {:?}: {}",
            report.meta.delivery_id, processed.status, e
        );
    }

    if let (Some(publisher), Some(event)) = (publisher, processed.remediation.as_ref()) {
        publish_remediation(publisher, event).await;
    }

    processed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> DeliveryJobMeta {
        DeliveryJobMeta {
            delivery_id: "d-1".to_string(),
            feed_id: "feed-1".to_string(),
            medium_id: "medium-1".to_string(),
            article_id: "article-1".to_string(),
            article_id_hash: "hash".to_string(),
        }
    }

    #[test]
    fn maps_status_codes() {
        let body = Value::Null;
        let cases = [
            (204, DeliveryStatus::Sent, None),
            (400, DeliveryStatus::Rejected, Some(DeliveryErrorCode::ThirdPartyBadRequest)),
            (403, DeliveryStatus::Rejected, Some(DeliveryErrorCode::ThirdPartyForbidden)),
            (404, DeliveryStatus::Rejected, Some(DeliveryErrorCode::ThirdPartyNotFound)),
            (502, DeliveryStatus::Failed, Some(DeliveryErrorCode::ThirdPartyInternal)),
            (429, DeliveryStatus::Failed, Some(DeliveryErrorCode::Internal)),
            (302, DeliveryStatus::Failed, Some(DeliveryErrorCode::Internal)),
        ];
        for (code, status, error_code) in cases {
            let processed = process_delivery_result(&meta(), Ok((code, &body)));
            assert_eq!(processed.status, status, "status for {}", code);
            assert_eq!(processed.error_code, error_code, "error code for {}", code);
        }
    }

    #[test]
    fn unhandled_status_has_descriptive_message() {
        let processed = process_delivery_result(&meta(), Ok((418, &Value::Null)));
        let message = processed.internal_message.unwrap_or_default();
        assert!(message.contains("Unhandled status code 418"));
        assert!(processed.remediation.is_none());
    }

    #[test]
    fn transport_errors_fail_without_remediation() {
        let err = TransportError::new("connection reset");
        let processed = process_delivery_result(&meta(), Err(&err));
        assert_eq!(processed.status, DeliveryStatus::Failed);
        assert_eq!(processed.error_code, Some(DeliveryErrorCode::Internal));
        assert_eq!(processed.internal_message.as_deref(), Some("connection reset"));
        assert!(processed.remediation.is_none());
    }

    #[test]
    fn bad_request_carries_truncated_body() {
        let body = Value::String("e".repeat(REMEDIATION_BODY_MAX_LEN * 2));
        let processed = process_delivery_result(&meta(), Ok((400, &body)));
        match processed.remediation {
            Some(RemediationEvent::BadFormat { response_body, article_id, .. }) => {
                assert_eq!(response_body.chars().count(), REMEDIATION_BODY_MAX_LEN);
                assert_eq!(article_id, "article-1");
            }
            other => panic!("expected bad format event, got {:?}", other),
        }
    }

    #[test]
    fn payload_shape() {
        let event = RemediationEvent::MissingPermissions {
            feed_id: "feed-1".to_string(),
            medium_id: "medium-1".to_string(),
            article_id: "article-1".to_string(),
        };
        let payload = event.to_payload();
        assert_eq!(payload["data"]["rejectedCode"], "forbidden");
        assert_eq!(payload["data"]["medium"]["id"], "medium-1");
        assert_eq!(payload["data"]["feed"]["id"], "feed-1");
    }
}
