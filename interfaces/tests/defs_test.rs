use chrono::Utc;
use interfaces::{
    hash_value, Article, ArticleDeliveryState, DeliveryCountFilter, DeliveryErrorCode, DeliveryLog,
    DeliveryLogStatus, DeliveryRecord, DeliveryStatus,
};

fn record(article: &Article, status: DeliveryStatus) -> DeliveryRecord {
    let state = ArticleDeliveryState::new(format!("{}-{:?}", article.id, status), "m1", article, status);
    DeliveryRecord::from_state("feed-1", &state, Utc::now())
}

#[test]
fn test_article_id_hash_is_sha1_hex() {
    let article = Article::new("guid-1");
    assert_eq!(article.id_hash, hash_value("guid-1"));
    assert_eq!(article.id_hash.len(), 40);
    assert_eq!(hash_value("abc"), "a9993e364706816aba3e25717850c26c9cd0d89d");
}

#[test]
fn test_field_lookup_resolves_identifiers() {
    let article = Article::new("guid-1").with_field("title", "Hello");
    assert_eq!(article.field("id"), Some("guid-1"));
    assert_eq!(article.field("idHash"), Some(article.id_hash.as_str()));
    assert_eq!(article.field("title"), Some("Hello"));
    assert_eq!(article.field("author"), None);
}

#[test]
fn test_status_wire_names() {
    assert_eq!(DeliveryStatus::MediumRateLimitedByUser.as_str(), "medium-rate-limited-by-user");
    assert_eq!(DeliveryStatus::parse("pending-delivery"), Some(DeliveryStatus::PendingDelivery));
    assert_eq!(DeliveryStatus::parse("bogus"), None);
    assert_eq!(DeliveryErrorCode::parse(DeliveryErrorCode::ThirdPartyForbidden.as_str()), Some(DeliveryErrorCode::ThirdPartyForbidden));
}

#[test]
fn test_only_sent_and_pending_count() {
    assert!(DeliveryStatus::Sent.counts_as_delivery());
    assert!(DeliveryStatus::PendingDelivery.counts_as_delivery());
    assert!(!DeliveryStatus::Rejected.counts_as_delivery());
    assert!(!DeliveryStatus::FilteredOut.counts_as_delivery());
    assert!(!DeliveryStatus::PendingDelivery.is_terminal());
    assert!(DeliveryStatus::Failed.is_terminal());
}

#[test]
fn test_count_filter_scopes() {
    let article = Article::new("a");
    let sent = record(&article, DeliveryStatus::Sent);
    assert!(DeliveryCountFilter::feed("feed-1").matches(&sent));
    assert!(!DeliveryCountFilter::feed("feed-2").matches(&sent));
    assert!(DeliveryCountFilter::medium("m1").matches(&sent));
    assert!(DeliveryCountFilter::default().matches(&sent));
}

#[test]
fn test_log_summary_reflects_child_parts() {
    let article = Article::new("a").with_field("title", "Title");
    let parent = record(&article, DeliveryStatus::Sent);
    let ok_child = record(&article, DeliveryStatus::Sent);
    let failed_child = record(&article, DeliveryStatus::Failed);

    let delivered = DeliveryLog::summarize(&parent, &[&ok_child]);
    assert_eq!(delivered.status, DeliveryLogStatus::Delivered);
    assert_eq!(delivered.article_title.as_deref(), Some("Title"));

    let partial = DeliveryLog::summarize(&parent, &[&ok_child, &failed_child]);
    assert_eq!(partial.status, DeliveryLogStatus::PartiallyDelivered);

    let mut rejected = record(&article, DeliveryStatus::Rejected);
    rejected.error_code = Some(DeliveryErrorCode::ThirdPartyForbidden);
    let summary = DeliveryLog::summarize(&rejected, &[]);
    assert_eq!(summary.status, DeliveryLogStatus::Rejected);
    assert!(summary.message.unwrap_or_default().contains("permissions"));
}
